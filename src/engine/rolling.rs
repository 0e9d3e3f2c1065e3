//! WAL rolling and write backpressure
//!
//! Writers add the bytes they log to a shared counter. Past the rolling
//! threshold they wake the rolling worker; past the block threshold they
//! also wait until a roll has finished. The worker swaps in a fresh WAL
//! segment, flushes the page store, then deletes the retired segment.
//!
//! ## Roll ordering
//! ```text
//! writer:  enter() { log ─ add_logged() ─ mutate pages } ─ throttle()
//! worker:  gate.write() { wal.roll() ─ reset counter } ─ store.flush() ─ discard
//! ```
//! The gate guarantees every record in a retired segment has reached the
//! page store before that store is flushed, and that the counter only
//! holds bytes of the active segment.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard};

use crate::error::Result;
use crate::storage::PageStore;
use crate::wal::WriteAheadLog;

struct RollState {
    /// A roll was requested and not yet picked up
    pending: bool,

    /// Rolls picked up by the worker
    started: u64,

    /// Rolls finished, successfully or not
    completed: u64,

    shutdown: bool,
}

/// Shared state between writers and the rolling worker
pub(crate) struct RollControl {
    rolling_threshold: u64,
    block_threshold: u64,
    logged_bytes: AtomicU64,
    rolls: AtomicU64,
    state: Mutex<RollState>,
    requested: Condvar,
    finished: Condvar,
    gate: RwLock<()>,
}

impl RollControl {
    pub(crate) fn new(rolling_threshold: u64, block_threshold: u64) -> Self {
        Self {
            rolling_threshold,
            block_threshold,
            logged_bytes: AtomicU64::new(0),
            rolls: AtomicU64::new(0),
            state: Mutex::new(RollState {
                pending: false,
                started: 0,
                completed: 0,
                shutdown: false,
            }),
            requested: Condvar::new(),
            finished: Condvar::new(),
            gate: RwLock::new(()),
        }
    }

    /// Held by a mutation from its WAL append until its pages are written
    pub(crate) fn enter(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read()
    }

    /// Count `bytes` appended to the active segment; returns the new total
    ///
    /// Called while holding the gate, so the bytes are counted against the
    /// segment they were written to.
    pub(crate) fn add_logged(&self, bytes: u64) -> u64 {
        self.logged_bytes.fetch_add(bytes, Ordering::AcqRel) + bytes
    }

    /// Request a roll past the rolling threshold; wait for one past the
    /// block threshold
    ///
    /// Must be called without holding the gate.
    pub(crate) fn throttle(&self, total: u64) {
        if total <= self.rolling_threshold {
            return;
        }

        let mut state = self.state.lock();
        state.pending = true;
        self.requested.notify_one();

        if total > self.block_threshold {
            tracing::debug!(logged_bytes = total, "Blocking writer until WAL roll completes");
            self.wait_for_next_roll(&mut state);
        }
    }

    /// Request a roll and wait for it to finish
    ///
    /// Returns false when the worker has shut down.
    pub(crate) fn roll_and_wait(&self) -> bool {
        let mut state = self.state.lock();
        if state.shutdown {
            return false;
        }
        state.pending = true;
        self.requested.notify_one();
        self.wait_for_next_roll(&mut state);
        !state.shutdown
    }

    pub(crate) fn logged_bytes(&self) -> u64 {
        self.logged_bytes.load(Ordering::Acquire)
    }

    /// Rolls completed without error
    pub(crate) fn roll_count(&self) -> u64 {
        self.rolls.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.requested.notify_all();
        self.finished.notify_all();
    }

    /// Wait for a roll that starts after this call
    fn wait_for_next_roll(&self, state: &mut MutexGuard<'_, RollState>) {
        let target = state.started + 1;
        while state.completed < target && !state.shutdown {
            self.finished.wait(state);
        }
    }

    /// Block until a roll is requested; false on shutdown
    fn next_request(&self) -> bool {
        let mut state = self.state.lock();
        while !state.pending && !state.shutdown {
            self.requested.wait(&mut state);
        }
        if state.shutdown {
            return false;
        }
        state.pending = false;
        state.started += 1;
        true
    }

    fn complete(&self) {
        let mut state = self.state.lock();
        state.completed += 1;
        self.finished.notify_all();
    }
}

/// Background thread performing WAL rolls
pub(crate) struct RollingWorker {
    control: Arc<RollControl>,
    handle: Option<JoinHandle<()>>,
}

impl RollingWorker {
    pub(crate) fn spawn(
        control: Arc<RollControl>,
        wal: Arc<WriteAheadLog>,
        store: Arc<PageStore>,
    ) -> Result<Self> {
        let worker_control = Arc::clone(&control);
        let handle = thread::Builder::new()
            .name("pagekv-wal-roller".to_string())
            .spawn(move || run(&worker_control, &wal, &store))?;
        Ok(Self {
            control,
            handle: Some(handle),
        })
    }

    /// Signal shutdown and join the thread
    pub(crate) fn stop(&mut self) {
        self.control.shutdown();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("WAL rolling worker panicked");
            }
        }
    }
}

impl Drop for RollingWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(control: &RollControl, wal: &WriteAheadLog, store: &PageStore) {
    tracing::debug!("WAL rolling worker started");
    while control.next_request() {
        match roll_once(control, wal, store) {
            Ok(()) => {
                control.rolls.fetch_add(1, Ordering::AcqRel);
            }
            Err(e) => tracing::error!(error = %e, "WAL roll failed"),
        }
        control.complete();
    }
    tracing::debug!("WAL rolling worker stopped");
}

fn roll_once(control: &RollControl, wal: &WriteAheadLog, store: &PageStore) -> Result<()> {
    let retired = {
        let _gate = control.gate.write();
        let retired = wal.roll()?;
        control.logged_bytes.store(0, Ordering::Release);
        retired
    };
    store.flush()?;
    retired.discard()
}
