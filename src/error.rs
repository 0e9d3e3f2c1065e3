//! Error types for PageKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using PageKvError
pub type Result<T> = std::result::Result<T, PageKvError>;

/// Unified error type for PageKV operations
#[derive(Debug, Error)]
pub enum PageKvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Engine has not been initialized")]
    Uninitialized,

    // -------------------------------------------------------------------------
    // Page Store Errors
    // -------------------------------------------------------------------------
    /// A page expected to exist is missing or unreadable
    #[error("Page fault: {0}")]
    PageFault(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Value codec error: {0}")]
    Codec(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for PageKvError {
    fn from(e: bincode::Error) -> Self {
        PageKvError::Codec(e.to_string())
    }
}

impl PageKvError {
    /// True for the page-missing condition surfaced by reads and recovery scans
    pub fn is_page_fault(&self) -> bool {
        matches!(self, PageKvError::PageFault(_))
    }
}
