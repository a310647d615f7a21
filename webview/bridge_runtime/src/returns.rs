use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::hash::{BuildHasher, Hash};

use crate::error::BridgeError;
use crate::signature::ReturnKind;

#[derive(Debug)]
pub enum Returned {
    Value(serde_json::Result<Value>),
    Error(Option<String>),
}

impl Returned {
    pub fn value<T: Serialize>(value: T) -> Self {
        Returned::Value(serde_json::to_value(value))
    }

    pub fn error(message: impl Display) -> Self {
        Returned::Error(Some(message.to_string()))
    }

    pub fn no_error() -> Self {
        Returned::Error(None)
    }
}

/// Applies the return policy:
///
/// - no slots settle to `null`
/// - a lone error slot rejects with its message, or settles to `null`
/// - a lone value slot settles to that value
/// - a value followed by an error slot rejects if the error is set and
///   settles to the value otherwise
///
/// A second slot that is not an error, or more than two slots, breaks the
/// binding contract.
pub fn settle(returned: Vec<Returned>) -> Result<Value, BridgeError> {
    let mut slots = returned.into_iter();

    match (slots.next(), slots.next(), slots.next()) {
        (None, _, _) => Ok(Value::Null),
        (Some(Returned::Error(None)), None, _) => Ok(Value::Null),
        (Some(Returned::Error(Some(message))), None, _) => Err(BridgeError::Host(message)),
        (Some(Returned::Value(value)), None, _) => value.map_err(BridgeError::Encoding),
        (Some(_), Some(Returned::Value(_)), None) => Err(BridgeError::contract(
            "second return value must be an error",
        )),
        (Some(_), Some(Returned::Error(Some(message))), None) => Err(BridgeError::Host(message)),
        (Some(first), Some(Returned::Error(None)), None) => match first {
            Returned::Value(value) => value.map_err(BridgeError::Encoding),
            Returned::Error(None) => Ok(Value::Null),
            Returned::Error(Some(message)) => Ok(Value::String(message)),
        },
        (Some(_), Some(_), Some(_)) => Err(BridgeError::contract(
            "unexpected number of return values",
        )),
    }
}

pub trait IntoReturn {
    fn kinds() -> Vec<ReturnKind>;

    fn into_returned(self) -> Vec<Returned>;
}

impl IntoReturn for () {
    fn kinds() -> Vec<ReturnKind> {
        Vec::new()
    }

    fn into_returned(self) -> Vec<Returned> {
        Vec::new()
    }
}

impl<T: Serialize, E: Display> IntoReturn for Result<T, E> {
    fn kinds() -> Vec<ReturnKind> {
        vec![ReturnKind::Value, ReturnKind::Error]
    }

    fn into_returned(self) -> Vec<Returned> {
        match self {
            Ok(value) => vec![Returned::value(value), Returned::no_error()],
            Err(err) => vec![Returned::Value(Ok(Value::Null)), Returned::error(err)],
        }
    }
}

/// Returns any `Serialize` type, such as a user struct, as a single value.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoReturn for Json<T> {
    fn kinds() -> Vec<ReturnKind> {
        vec![ReturnKind::Value]
    }

    fn into_returned(self) -> Vec<Returned> {
        vec![Returned::value(self.0)]
    }
}

macro_rules! value_return {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoReturn for $ty {
                fn kinds() -> Vec<ReturnKind> {
                    vec![ReturnKind::Value]
                }

                fn into_returned(self) -> Vec<Returned> {
                    vec![Returned::value(self)]
                }
            }
        )*
    };
}

value_return!(
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    isize,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    String,
    &'static str,
    Value,
);

impl<T: Serialize> IntoReturn for Vec<T> {
    fn kinds() -> Vec<ReturnKind> {
        vec![ReturnKind::Value]
    }

    fn into_returned(self) -> Vec<Returned> {
        vec![Returned::value(self)]
    }
}

impl<T: Serialize> IntoReturn for Option<T> {
    fn kinds() -> Vec<ReturnKind> {
        vec![ReturnKind::Value]
    }

    fn into_returned(self) -> Vec<Returned> {
        vec![Returned::value(self)]
    }
}

impl<K: Serialize + Eq + Hash, V: Serialize, S: BuildHasher> IntoReturn for HashMap<K, V, S> {
    fn kinds() -> Vec<ReturnKind> {
        vec![ReturnKind::Value]
    }

    fn into_returned(self) -> Vec<Returned> {
        vec![Returned::value(self)]
    }
}

impl<K: Serialize, V: Serialize> IntoReturn for BTreeMap<K, V> {
    fn kinds() -> Vec<ReturnKind> {
        vec![ReturnKind::Value]
    }

    fn into_returned(self) -> Vec<Returned> {
        vec![Returned::value(self)]
    }
}
