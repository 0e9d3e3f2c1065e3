//! Value codecs
//!
//! The engine stores opaque bytes; a [`ValueCodec`] maps them to and from the
//! caller's value type and decides when a `put` is a no-op.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PageKvError, Result};

/// Converts values to bytes and back
pub trait ValueCodec: Send + Sync + 'static {
    /// The value type handed to and returned from the engine
    type Value: Clone + Send + Sync + 'static;

    /// Encode a value for storage
    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>>;

    /// Decode stored bytes
    fn decode(&self, bytes: &[u8]) -> Result<Self::Value>;

    /// Whether storing `a` over `b` would change nothing
    fn value_equals(&self, a: &Self::Value, b: &Self::Value) -> bool;
}

/// Raw byte values
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl ValueCodec for BytesCodec {
    type Value = Vec<u8>;

    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn value_equals(&self, a: &Vec<u8>, b: &Vec<u8>) -> bool {
        a == b
    }
}

/// UTF-8 string values
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl ValueCodec for StringCodec {
    type Value = String;

    fn encode(&self, value: &String) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| PageKvError::Codec(format!("value is not UTF-8: {}", e)))
    }

    fn value_equals(&self, a: &String, b: &String) -> bool {
        a == b
    }
}

/// Any serde type, encoded with bincode
pub struct BincodeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ValueCodec for BincodeCodec<T>
where
    T: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync + 'static,
{
    type Value = T;

    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn value_equals(&self, a: &T, b: &T) -> bool {
        a == b
    }
}
