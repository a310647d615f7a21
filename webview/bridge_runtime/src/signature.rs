use serde_json::value::RawValue;
use serde_json::{Map, Value};
use std::fmt;

pub const MAX_RETURNS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Bool,
    Int,
    Uint,
    Float,
    String,
    Array,
    Object,
    Any,
    /// A Rust type decoded through its own `Deserialize` impl.
    Native(&'static str),
}

impl TypeTag {
    pub fn native<T: ?Sized>() -> Self {
        TypeTag::Native(std::any::type_name::<T>())
    }

    // Native tags accept any JSON here; the typed adapter decodes them.
    pub fn decode(self, raw: &RawValue) -> serde_json::Result<Value> {
        let text = raw.get();
        match self {
            TypeTag::Bool => serde_json::from_str::<bool>(text).map(Value::Bool),
            TypeTag::Int => serde_json::from_str::<i64>(text).map(Value::from),
            TypeTag::Uint => serde_json::from_str::<u64>(text).map(Value::from),
            TypeTag::Float => serde_json::from_str::<f64>(text).map(Value::from),
            TypeTag::String => serde_json::from_str::<String>(text).map(Value::String),
            TypeTag::Array => serde_json::from_str::<Vec<Value>>(text).map(Value::Array),
            TypeTag::Object => {
                serde_json::from_str::<Map<String, Value>>(text).map(Value::Object)
            }
            TypeTag::Any | TypeTag::Native(_) => serde_json::from_str::<Value>(text),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Bool => f.write_str("bool"),
            TypeTag::Int => f.write_str("int"),
            TypeTag::Uint => f.write_str("uint"),
            TypeTag::Float => f.write_str("float"),
            TypeTag::String => f.write_str("string"),
            TypeTag::Array => f.write_str("array"),
            TypeTag::Object => f.write_str("object"),
            TypeTag::Any => f.write_str("any"),
            TypeTag::Native(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Value,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exactly(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exactly(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

/// When `variadic` is set the last parameter tag is the element type of the
/// tail, so `n` params accept `n - 1` or more arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    params: Vec<TypeTag>,
    variadic: bool,
    returns: Vec<ReturnKind>,
}

impl Signature {
    pub fn new(params: Vec<TypeTag>, returns: Vec<ReturnKind>) -> Self {
        Self {
            params,
            variadic: false,
            returns,
        }
    }

    pub fn variadic(params: Vec<TypeTag>, returns: Vec<ReturnKind>) -> Self {
        Self {
            params,
            variadic: true,
            returns,
        }
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    pub fn returns(&self) -> &[ReturnKind] {
        &self.returns
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.returns.len() > MAX_RETURNS {
            return Err(format!(
                "function may only return a value or a value+error, declared {} return values",
                self.returns.len()
            ));
        }

        if self.variadic && self.params.is_empty() {
            return Err("variadic function must declare its tail element type".to_string());
        }

        Ok(())
    }

    pub fn arity(&self) -> Arity {
        if self.variadic {
            Arity::AtLeast(self.params.len().saturating_sub(1))
        } else {
            Arity::Exactly(self.params.len())
        }
    }

    pub fn param_at(&self, index: usize) -> Option<TypeTag> {
        let fixed = if self.variadic {
            self.params.len().saturating_sub(1)
        } else {
            self.params.len()
        };

        if index < fixed {
            self.params.get(index).copied()
        } else if self.variadic {
            self.params.last().copied()
        } else {
            None
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (index, tag) in self.params.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            if self.variadic && index + 1 == self.params.len() {
                f.write_str("...")?;
            }
            write!(f, "{tag}")?;
        }
        f.write_str(")")?;

        match self.returns.as_slice() {
            [] => Ok(()),
            [ReturnKind::Value] => f.write_str(" -> value"),
            [ReturnKind::Error] => f.write_str(" -> error"),
            kinds => {
                let names: Vec<&str> = kinds
                    .iter()
                    .map(|kind| match kind {
                        ReturnKind::Value => "value",
                        ReturnKind::Error => "error",
                    })
                    .collect();
                write!(f, " -> ({})", names.join(", "))
            }
        }
    }
}
