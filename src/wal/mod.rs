//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append length-prefixed records before any page mutation
//! - Roll the active segment into a fresh timestamped file
//! - Replay retired segments in creation order on startup
//! - Discard a torn trailing record left by a crash
//!
//! ## Directory Layout
//! ```text
//! {redo_log_dir}/
//!   ├── 1715312400123.redo   (oldest, replayed first)
//!   ├── 1715312460881.redo
//!   └── 1715312522004.redo   (active)
//! ```
//!
//! ## Segment Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Record 1                                                │
//! │ ┌─────────┬─────────┬─────────┬───────┬───────────────┐ │
//! │ │ Len (4) │ Op (1)  │KeyLen(1)│  Key  │ Value (UPDATE)│ │
//! │ └─────────┴─────────┴─────────┴───────┴───────────────┘ │
//! ├─────────────────────────────────────────────────────────┤
//! │ Record 2 ...                                            │
//! └─────────────────────────────────────────────────────────┘
//! Len is big-endian and counts the bytes after itself.
//! Op: 1 = UPDATE, 2 = DEL
//! ```

mod entry;
mod reader;
mod recovery;
mod writer;

pub use entry::{LogOp, LogRecord, LENGTH_PREFIX_SIZE};
pub use reader::SegmentReader;
pub use recovery::{RedoSummary, ReplayedSegments};
pub use writer::{RetiredSegment, WriteAheadLog};
