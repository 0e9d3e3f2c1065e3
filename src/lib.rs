//! # PageKV
//!
//! An embedded key-value store keeping records in a memory-mapped page file:
//! - Write-Ahead Logging (WAL) with segment rolling and write backpressure
//! - Crash recovery by parallel page scan followed by WAL redo
//! - Per-key locking; operations on different keys run in parallel
//! - Bounded read and write caches of decoded values
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                              │
//! │        (per-key locks, value caches, rolling worker)        │
//! └──────┬──────────────────────┬───────────────────────┬───────┘
//!        │                      │                       │
//!        ▼                      ▼                       ▼
//! ┌─────────────┐       ┌──────────────┐        ┌──────────────┐
//! │     WAL     │       │    Index     │        │ RecordCodec  │
//! │  (segments) │       │  (BTreeMap)  │───────▶│ (page chains)│
//! └─────────────┘       └──────────────┘        └──────┬───────┘
//!                                                      │
//!                                                      ▼
//!                                              ┌──────────────┐
//!                                              │  PageStore   │
//!                                              │   (mmap)     │
//!                                              └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod key;
pub mod storage;
pub mod record;
pub mod wal;
pub mod index;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use codec::{BincodeCodec, BytesCodec, StringCodec, ValueCodec};
pub use config::{Config, ConfigBuilder, WalSyncStrategy};
pub use engine::{Engine, RecoverySummary};
pub use error::{PageKvError, Result};
pub use key::{Key, KeyType};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of PageKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
