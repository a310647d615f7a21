//! Host functions that can be bound to a script-visible name.
//!
//! Plain Rust closures bind directly: each parameter is decoded from the
//! matching call argument through its `Deserialize` impl, and a trailing
//! [`Variadic`] parameter collects the rest. [`DynamicFunction`] covers
//! callers that only know the signature at run time.

use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::value::RawValue;
use std::fmt;
use std::sync::Arc;

use crate::args::{Variadic, decode_arg, decode_tagged, decode_tail, split_args};
use crate::error::BridgeError;
use crate::returns::{IntoReturn, Returned};
use crate::signature::{ReturnKind, Signature, TypeTag};

/// Marker types that keep the closure impls of [`HostFn`] apart.
#[doc(hidden)]
pub mod marker {
    pub struct Fixed;
    pub struct Tail;
    pub struct Dynamic;
}

/// A function script can call through a binding.
pub trait HostFn<Marker>: Send + Sync + 'static {
    fn signature(&self) -> Signature;

    /// Decodes `args` and invokes the function. Callers check the argument
    /// count against [`HostFn::signature`] first.
    fn invoke(&self, args: &[Box<RawValue>]) -> Result<Vec<Returned>, BridgeError>;
}

fn missing_argument(signature: &Signature, got: usize) -> BridgeError {
    BridgeError::ArgumentMismatch {
        expected: signature.arity(),
        got,
    }
}

macro_rules! fixed_host_fn {
    ($($arg:ident),*) => {
        impl<Func, Ret, $($arg,)*> HostFn<(marker::Fixed, Ret, $($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Ret + Send + Sync + 'static,
            Ret: IntoReturn,
            $($arg: DeserializeOwned,)*
        {
            fn signature(&self) -> Signature {
                Signature::new(vec![$(TypeTag::native::<$arg>()),*], Ret::kinds())
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn invoke(&self, args: &[Box<RawValue>]) -> Result<Vec<Returned>, BridgeError> {
                let mut slots = args.iter().enumerate();
                $(
                    let $arg: $arg = match slots.next() {
                        Some((index, raw)) => decode_arg(index, raw)?,
                        None => return Err(missing_argument(&self.signature(), args.len())),
                    };
                )*
                if slots.next().is_some() {
                    return Err(missing_argument(&self.signature(), args.len()));
                }
                Ok((self)($($arg),*).into_returned())
            }
        }
    };
}

macro_rules! tail_host_fn {
    ($($arg:ident),*) => {
        impl<Func, Ret, Elem, $($arg,)*> HostFn<(marker::Tail, Ret, Elem, $($arg,)*)> for Func
        where
            Func: Fn($($arg,)* Variadic<Elem>) -> Ret + Send + Sync + 'static,
            Ret: IntoReturn,
            Elem: DeserializeOwned,
            $($arg: DeserializeOwned,)*
        {
            fn signature(&self) -> Signature {
                Signature::variadic(
                    vec![$(TypeTag::native::<$arg>(),)* TypeTag::native::<Elem>()],
                    Ret::kinds(),
                )
            }

            #[allow(non_snake_case, unused_mut)]
            fn invoke(&self, args: &[Box<RawValue>]) -> Result<Vec<Returned>, BridgeError> {
                let mut slots = args.iter().enumerate();
                $(
                    let $arg: $arg = match slots.next() {
                        Some((index, raw)) => decode_arg(index, raw)?,
                        None => return Err(missing_argument(&self.signature(), args.len())),
                    };
                )*
                let tail = decode_tail::<Elem>(args.len() - slots.len(), args)?;
                Ok((self)($($arg,)* tail).into_returned())
            }
        }
    };
}

fixed_host_fn!();
fixed_host_fn!(A1);
fixed_host_fn!(A1, A2);
fixed_host_fn!(A1, A2, A3);
fixed_host_fn!(A1, A2, A3, A4);
fixed_host_fn!(A1, A2, A3, A4, A5);
fixed_host_fn!(A1, A2, A3, A4, A5, A6);

tail_host_fn!();
tail_host_fn!(A1);
tail_host_fn!(A1, A2);
tail_host_fn!(A1, A2, A3);
tail_host_fn!(A1, A2, A3, A4);
tail_host_fn!(A1, A2, A3, A4, A5);

type DynamicBody = dyn Fn(Vec<Value>) -> Vec<Value> + Send + Sync;

/// A host function described by an explicit signature.
///
/// Arguments are decoded through the tag table and handed over as JSON
/// values. The body returns one value per declared return slot; an error
/// slot holds `null` for no error, or the error message.
#[derive(Clone)]
pub struct DynamicFunction {
    signature: Signature,
    body: Arc<DynamicBody>,
}

impl DynamicFunction {
    pub fn new<F>(signature: Signature, body: F) -> Self
    where
        F: Fn(Vec<Value>) -> Vec<Value> + Send + Sync + 'static,
    {
        Self {
            signature,
            body: Arc::new(body),
        }
    }
}

impl fmt::Debug for DynamicFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicFunction")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

impl HostFn<marker::Dynamic> for DynamicFunction {
    fn signature(&self) -> Signature {
        self.signature.clone()
    }

    fn invoke(&self, args: &[Box<RawValue>]) -> Result<Vec<Returned>, BridgeError> {
        let values = decode_tagged(&self.signature, args)?;
        let produced = (self.body)(values);
        pair_returns(self.signature.returns(), produced)
    }
}

fn pair_returns(kinds: &[ReturnKind], produced: Vec<Value>) -> Result<Vec<Returned>, BridgeError> {
    if kinds.len() != produced.len() {
        return Err(BridgeError::contract(format!(
            "function declared {} return values but produced {}",
            kinds.len(),
            produced.len()
        )));
    }

    Ok(kinds
        .iter()
        .zip(produced)
        .map(|(kind, value)| match (kind, value) {
            (ReturnKind::Value, value) => Returned::Value(Ok(value)),
            (ReturnKind::Error, Value::Null) => Returned::no_error(),
            (ReturnKind::Error, Value::String(message)) => Returned::Error(Some(message)),
            (ReturnKind::Error, other) => Returned::Error(Some(other.to_string())),
        })
        .collect())
}

/// Adapter stored per binding: takes the call id and the raw request and
/// yields the unsettled return slots.
pub type Adapter = Arc<dyn Fn(&str, &str) -> Result<Vec<Returned>, BridgeError> + Send + Sync>;

/// A validated binding ready to be stored in the registry.
#[derive(Clone)]
pub struct Binding {
    pub signature: Signature,
    pub adapter: Adapter,
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

impl Binding {
    /// Validates the function's signature and wraps it in an adapter.
    pub fn new<F, M>(function: F) -> Result<Self, BridgeError>
    where
        F: HostFn<M>,
    {
        let signature = function.signature();
        signature.validate().map_err(BridgeError::signature)?;

        let checked = signature.clone();
        let adapter: Adapter = Arc::new(move |_id: &str, req: &str| {
            let args = split_args(&checked, req)?;
            function.invoke(&args)
        });

        Ok(Self { signature, adapter })
    }

    pub fn call(&self, id: &str, req: &str) -> Result<Vec<Returned>, BridgeError> {
        (self.adapter)(id, req)
    }
}
