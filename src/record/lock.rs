//! Record lock
//!
//! Blocking state machine over a record's flag word:
//!
//! ```text
//!   Idle ──GET──▶ ReadBusy(n) ──GET──▶ ReadBusy(n+1)
//!    │  ◀─unlock── ReadBusy(1)
//!    ├──UPDATE──▶ UpdateBusy
//!    └──DELETE──▶ DeleteBusy
//! ```
//!
//! Releasing an UPDATE or DELETE leaves its bit set. The record stays retired
//! for that operation until `set_page_ids` / `remove_page_ids` resets the
//! flag, which the engine does while holding the lock.

use super::Record;

const DEL_MASK: u32 = 0x8000_0000;
const UPDATE_MASK: u32 = 0x4000_0000;
const REF_MASK: u32 = 0x3fff_ffff;

/// Operation a record lock is taken for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOp {
    Get,
    Update,
    Delete,
}

/// Decoded view of the flag word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Idle,
    ReadBusy(u32),
    UpdateBusy,
    DeleteBusy,
}

impl Record {
    /// Block until `op` is allowed, then take the lock
    pub fn lock(&self, op: LockOp) -> RecordGuard<'_> {
        let mut state = self.state.lock();
        loop {
            let flag = state.flag;
            let blocked = match op {
                LockOp::Get => flag & (UPDATE_MASK | DEL_MASK) != 0,
                LockOp::Update | LockOp::Delete => flag != 0,
            };
            if !blocked {
                break;
            }
            self.changed.wait(&mut state);
        }

        match op {
            LockOp::Get => state.flag += 1,
            LockOp::Update => state.flag |= UPDATE_MASK,
            LockOp::Delete => state.flag |= DEL_MASK,
        }
        RecordGuard { record: self, op }
    }

    /// Current lock state
    pub fn lock_state(&self) -> LockState {
        let flag = self.state.lock().flag;
        if flag & DEL_MASK != 0 {
            LockState::DeleteBusy
        } else if flag & UPDATE_MASK != 0 {
            LockState::UpdateBusy
        } else if flag & REF_MASK != 0 {
            LockState::ReadBusy(flag & REF_MASK)
        } else {
            LockState::Idle
        }
    }

    fn unlock(&self, op: LockOp) {
        let mut state = self.state.lock();
        match op {
            LockOp::Get => state.flag -= 1,
            LockOp::Update => state.flag |= UPDATE_MASK,
            LockOp::Delete => state.flag |= DEL_MASK,
        }
        self.changed.notify_all();
    }
}

/// Held record lock; unlocks on drop
#[must_use = "the record is unlocked as soon as the guard is dropped"]
pub struct RecordGuard<'a> {
    record: &'a Record,
    op: LockOp,
}

impl RecordGuard<'_> {
    pub fn op(&self) -> LockOp {
        self.op
    }
}

impl Drop for RecordGuard<'_> {
    fn drop(&mut self) {
        self.record.unlock(self.op);
    }
}
