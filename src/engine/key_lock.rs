//! Per-key lock registry
//!
//! A fixed array of mutexes indexed by a hash of the encoded key. Every
//! operation on one key goes through the same stripe; unrelated keys only
//! contend when they collide.

use parking_lot::{Mutex, MutexGuard};

pub(crate) struct KeyLocks {
    stripes: Box<[Mutex<()>]>,
}

impl KeyLocks {
    pub(crate) fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Block until the stripe of `key_bytes` is free
    pub(crate) fn lock(&self, key_bytes: &[u8]) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_of(key_bytes)].lock()
    }

    fn stripe_of(&self, key_bytes: &[u8]) -> usize {
        crc32fast::hash(key_bytes) as usize % self.stripes.len()
    }
}
