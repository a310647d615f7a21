use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::value::RawValue;

use crate::error::BridgeError;
use crate::protocol::parse_request;
use crate::signature::Signature;

/// Every argument past the fixed prefix, each decoded as `T`.
// Not `Deserialize`, so a closure ending in `Variadic<T>` only binds as variadic.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Variadic<T>(pub Vec<T>);

impl<T> Variadic<T> {
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> std::ops::Deref for Variadic<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

pub fn split_args(signature: &Signature, req: &str) -> Result<Vec<Box<RawValue>>, BridgeError> {
    let raw = parse_request(req)?;
    check_arity(signature, raw.len())?;
    Ok(raw)
}

pub fn check_arity(signature: &Signature, count: usize) -> Result<(), BridgeError> {
    let expected = signature.arity();
    if expected.accepts(count) {
        Ok(())
    } else {
        Err(BridgeError::ArgumentMismatch {
            expected,
            got: count,
        })
    }
}

pub fn decode_arg<T: DeserializeOwned>(index: usize, raw: &RawValue) -> Result<T, BridgeError> {
    serde_json::from_str(raw.get()).map_err(|source| BridgeError::Decode { index, source })
}

pub fn decode_tail<T: DeserializeOwned>(
    start: usize,
    raw: &[Box<RawValue>],
) -> Result<Variadic<T>, BridgeError> {
    raw.iter()
        .enumerate()
        .skip(start)
        .map(|(index, item)| decode_arg(index, item))
        .collect::<Result<Vec<T>, _>>()
        .map(Variadic)
}

// Stops at the first failure.
pub fn decode_tagged(signature: &Signature, raw: &[Box<RawValue>]) -> Result<Vec<Value>, BridgeError> {
    check_arity(signature, raw.len())?;

    let mut values = Vec::with_capacity(raw.len());
    for (index, item) in raw.iter().enumerate() {
        let tag = signature.param_at(index).ok_or(BridgeError::ArgumentMismatch {
            expected: signature.arity(),
            got: raw.len(),
        })?;
        let value = tag
            .decode(item)
            .map_err(|source| BridgeError::Decode { index, source })?;
        values.push(value);
    }

    Ok(values)
}
