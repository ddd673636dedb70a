//! Countdown gate used by `evaluate` to await terminal statuses.

use parking_lot::{Condvar, Mutex};

/// A one-shot countdown shared between an evaluating caller and the cells
/// it waits on.
///
/// The caller registers itself on each non-terminal cell with [`add`] and
/// then blocks in [`wait`]; each cell calls [`arrive`] exactly once, on its
/// next transition into a terminal status.
///
/// [`add`]: EvalGate::add
/// [`wait`]: EvalGate::wait
/// [`arrive`]: EvalGate::arrive
pub(crate) struct EvalGate {
    remaining: Mutex<usize>,
    cv: Condvar,
}

impl EvalGate {
    pub(crate) fn new() -> Self {
        Self {
            remaining: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    /// Register one more cell to wait for.
    pub(crate) fn add(&self) {
        *self.remaining.lock() += 1;
    }

    /// A watched cell reached a terminal status.
    pub(crate) fn arrive(&self) {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.cv.notify_all();
        }
    }

    /// Block until every registered cell has arrived.
    pub(crate) fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.cv.wait(&mut remaining);
        }
    }
}
