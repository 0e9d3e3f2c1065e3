//! Concurrent bitset used by the recovery scan
//!
//! Bits are set lock-free with atomic word updates; growing the word array
//! takes the write side of the lock.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

const WORD_BITS: u64 = 64;

pub(crate) struct AtomicBitSet {
    words: RwLock<Vec<AtomicU64>>,
}

impl AtomicBitSet {
    pub(crate) fn with_capacity(bits: u64) -> Self {
        let words = (0..word_count(bits)).map(|_| AtomicU64::new(0)).collect();
        Self {
            words: RwLock::new(words),
        }
    }

    pub(crate) fn set(&self, bit: u64) {
        let index = word_index(bit);
        self.ensure_words(index + 1);
        let words = self.words.read();
        words[index].fetch_or(mask(bit), Ordering::AcqRel);
    }

    pub(crate) fn unset(&self, bit: u64) {
        let index = word_index(bit);
        let words = self.words.read();
        if let Some(word) = words.get(index) {
            word.fetch_and(!mask(bit), Ordering::AcqRel);
        }
    }

    pub(crate) fn get(&self, bit: u64) -> bool {
        let words = self.words.read();
        words
            .get(word_index(bit))
            .is_some_and(|w| w.load(Ordering::Acquire) & mask(bit) != 0)
    }

    /// Clear every bit
    pub(crate) fn clear(&self) {
        for word in self.words.read().iter() {
            word.store(0, Ordering::Release);
        }
    }

    /// Bits in `0..limit` that are not set
    pub(crate) fn unset_below(&self, limit: u64) -> Vec<u64> {
        let words = self.words.read();
        let mut out = Vec::new();
        for bit in 0..limit {
            let set = words
                .get(word_index(bit))
                .is_some_and(|w| w.load(Ordering::Acquire) & mask(bit) != 0);
            if !set {
                out.push(bit);
            }
        }
        out
    }

    fn ensure_words(&self, required: usize) {
        if self.words.read().len() >= required {
            return;
        }
        let mut words = self.words.write();
        if words.len() < required {
            let target = required.max(words.len() * 2);
            words.resize_with(target, || AtomicU64::new(0));
        }
    }
}

fn word_index(bit: u64) -> usize {
    (bit / WORD_BITS) as usize
}

fn word_count(bits: u64) -> usize {
    bits.div_ceil(WORD_BITS) as usize
}

fn mask(bit: u64) -> u64 {
    1u64 << (bit % WORD_BITS)
}
