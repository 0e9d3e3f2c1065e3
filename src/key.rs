//! Keys
//!
//! A database stores keys of exactly one [`KeyType`]. Strings are encoded as
//! UTF-8, numbers as fixed-width big-endian (floats via their IEEE-754 bits).

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{PageKvError, Result};

/// Maximum encoded key length (stored in one byte)
pub const MAX_KEY_LENGTH: usize = u8::MAX as usize;

/// Type of the keys a database holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    String,
    Short,
    Int,
    Float,
    Long,
    Double,
}

impl KeyType {
    /// Encoded width of fixed-size key types
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            KeyType::String => None,
            KeyType::Short => Some(2),
            KeyType::Int | KeyType::Float => Some(4),
            KeyType::Long | KeyType::Double => Some(8),
        }
    }
}

/// A key value
#[derive(Debug, Clone)]
pub enum Key {
    Str(String),
    Short(i16),
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
}

impl Key {
    /// The type of this key
    pub fn key_type(&self) -> KeyType {
        match self {
            Key::Str(_) => KeyType::String,
            Key::Short(_) => KeyType::Short,
            Key::Int(_) => KeyType::Int,
            Key::Float(_) => KeyType::Float,
            Key::Long(_) => KeyType::Long,
            Key::Double(_) => KeyType::Double,
        }
    }

    /// Encode to the on-disk / on-log byte form
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Key::Str(s) => s.as_bytes().to_vec(),
            Key::Short(v) => v.to_be_bytes().to_vec(),
            Key::Int(v) => v.to_be_bytes().to_vec(),
            Key::Float(v) => v.to_bits().to_be_bytes().to_vec(),
            Key::Long(v) => v.to_be_bytes().to_vec(),
            Key::Double(v) => v.to_bits().to_be_bytes().to_vec(),
        }
    }

    /// Decode bytes produced by [`Key::encode`] for the given type
    pub fn decode(key_type: KeyType, bytes: &[u8]) -> Result<Key> {
        if let Some(width) = key_type.fixed_width() {
            if bytes.len() != width {
                return Err(PageKvError::InvalidArgument(format!(
                    "{:?} key needs {} bytes, got {}",
                    key_type,
                    width,
                    bytes.len()
                )));
            }
        }

        let key = match key_type {
            KeyType::String => {
                let s = std::str::from_utf8(bytes).map_err(|e| {
                    PageKvError::InvalidArgument(format!("string key is not UTF-8: {}", e))
                })?;
                Key::Str(s.to_string())
            }
            KeyType::Short => Key::Short(i16::from_be_bytes([bytes[0], bytes[1]])),
            KeyType::Int => Key::Int(i32::from_be_bytes(fixed(bytes))),
            KeyType::Float => Key::Float(f32::from_bits(u32::from_be_bytes(fixed(bytes)))),
            KeyType::Long => Key::Long(i64::from_be_bytes(fixed(bytes))),
            KeyType::Double => Key::Double(f64::from_bits(u64::from_be_bytes(fixed(bytes)))),
        };
        Ok(key)
    }

    /// Check this key against the configured type and encode it
    pub(crate) fn encode_checked(&self, expected: KeyType) -> Result<Vec<u8>> {
        if self.key_type() != expected {
            return Err(PageKvError::InvalidArgument(format!(
                "key type {:?} does not match configured {:?}",
                self.key_type(),
                expected
            )));
        }
        let bytes = self.encode();
        if bytes.len() > MAX_KEY_LENGTH {
            return Err(PageKvError::InvalidArgument(format!(
                "key length {} exceeds {}",
                bytes.len(),
                MAX_KEY_LENGTH
            )));
        }
        Ok(bytes)
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Str(_) => 0,
            Key::Short(_) => 1,
            Key::Int(_) => 2,
            Key::Float(_) => 3,
            Key::Long(_) => 4,
            Key::Double(_) => 5,
        }
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Str(a), Key::Str(b)) => a.cmp(b),
            (Key::Short(a), Key::Short(b)) => a.cmp(b),
            (Key::Int(a), Key::Int(b)) => a.cmp(b),
            (Key::Float(a), Key::Float(b)) => a.total_cmp(b),
            (Key::Long(a), Key::Long(b)) => a.cmp(b),
            (Key::Double(a), Key::Double(b)) => a.total_cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Key::Str(s) => s.hash(state),
            Key::Short(v) => v.hash(state),
            Key::Int(v) => v.hash(state),
            Key::Float(v) => v.to_bits().hash(state),
            Key::Long(v) => v.hash(state),
            Key::Double(v) => v.to_bits().hash(state),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => write!(f, "{:?}", s),
            Key::Short(v) => write!(f, "{}", v),
            Key::Int(v) => write!(f, "{}", v),
            Key::Float(v) => write!(f, "{}", v),
            Key::Long(v) => write!(f, "{}", v),
            Key::Double(v) => write!(f, "{}", v),
        }
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<i16> for Key {
    fn from(v: i16) -> Self {
        Key::Short(v)
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Key::Int(v)
    }
}

impl From<f32> for Key {
    fn from(v: f32) -> Self {
        Key::Float(v)
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Long(v)
    }
}

impl From<f64> for Key {
    fn from(v: f64) -> Self {
        Key::Double(v)
    }
}
