//! WAL Entry definitions
//!
//! Defines the payload of individual WAL records.

use crate::error::{PageKvError, Result};
use crate::key::MAX_KEY_LENGTH;

/// Bytes of the big-endian length prefix in front of every record
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Operation code stored in the first payload byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogOp {
    Update = 1,
    Delete = 2,
}

impl LogOp {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(LogOp::Update),
            2 => Some(LogOp::Delete),
            _ => None,
        }
    }

    /// Opcode + key length prefix of a payload
    pub fn header(self, key_len: usize) -> Result<[u8; 2]> {
        if key_len > MAX_KEY_LENGTH {
            return Err(PageKvError::InvalidArgument(format!(
                "key length should <= {}",
                MAX_KEY_LENGTH
            )));
        }
        Ok([self.code(), key_len as u8])
    }
}

/// A decoded WAL payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Put a key-value pair
    Update { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

impl LogRecord {
    pub fn op(&self) -> LogOp {
        match self {
            LogRecord::Update { .. } => LogOp::Update,
            LogRecord::Delete { .. } => LogOp::Delete,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            LogRecord::Update { key, .. } | LogRecord::Delete { key } => key,
        }
    }

    /// Payload bytes (without the length prefix)
    pub fn encode(&self) -> Result<Vec<u8>> {
        let key = self.key();
        let header = self.op().header(key.len())?;
        let mut out = Vec::with_capacity(header.len() + key.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(key);
        if let LogRecord::Update { value, .. } = self {
            out.extend_from_slice(value);
        }
        Ok(out)
    }

    /// Parse a payload read back from a segment
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < 2 {
            return Err(PageKvError::WalCorruption(format!(
                "payload of {} bytes is too short",
                payload.len()
            )));
        }
        let op = LogOp::from_code(payload[0]).ok_or_else(|| {
            PageKvError::WalCorruption(format!("unknown opcode {}", payload[0]))
        })?;
        let key_end = 2 + payload[1] as usize;
        if payload.len() < key_end {
            return Err(PageKvError::WalCorruption(format!(
                "key length {} exceeds payload of {} bytes",
                payload[1],
                payload.len()
            )));
        }
        let key = payload[2..key_end].to_vec();
        Ok(match op {
            LogOp::Update => LogRecord::Update {
                key,
                value: payload[key_end..].to_vec(),
            },
            LogOp::Delete => LogRecord::Delete { key },
        })
    }
}
