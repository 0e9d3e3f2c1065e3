//! WAL Reader
//!
//! Sequentially reads length-prefixed records from one segment file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::Result;

use super::LENGTH_PREFIX_SIZE;

/// Reads records from a segment, front to back
pub struct SegmentReader {
    reader: BufReader<File>,

    /// Bytes consumed so far
    position: u64,

    /// Size of the file when opened
    file_len: u64,

    /// Set once a torn trailing record has been seen
    truncated: bool,
}

impl SegmentReader {
    /// Open a segment for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            file_len,
            truncated: false,
        })
    }

    /// Read the next record payload
    ///
    /// Returns `Ok(None)` at the end of the segment. A record whose prefix or
    /// body is cut short (a write interrupted by a crash) also ends the
    /// segment and sets [`was_truncated`](Self::was_truncated).
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        if self.truncated {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        let n = self.read_fully(&mut prefix)?;
        if n == 0 {
            return Ok(None);
        }
        if n < LENGTH_PREFIX_SIZE {
            return Ok(self.torn_tail());
        }

        let len = u32::from_be_bytes(prefix) as u64;
        if len == 0 || len > self.file_len.saturating_sub(self.position) {
            return Ok(self.torn_tail());
        }

        let mut payload = vec![0u8; len as usize];
        if self.read_fully(&mut payload)? < payload.len() {
            return Ok(self.torn_tail());
        }
        Ok(Some(payload))
    }

    /// Whether reading stopped at a torn trailing record
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    /// Bytes of complete records read so far
    pub fn position(&self) -> u64 {
        self.position
    }

    fn torn_tail(&mut self) -> Option<Vec<u8>> {
        tracing::warn!(
            position = self.position,
            file_len = self.file_len,
            "Discarding torn WAL tail"
        );
        self.truncated = true;
        None
    }

    /// Read until `buf` is full or EOF; returns bytes read
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == buf.len() {
            self.position += filled as u64;
        }
        Ok(filled)
    }
}

impl Iterator for SegmentReader {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
