//! Scheduler binding: dispatches cell message handlers onto a worker pool.
//!
//! The pool guarantees nothing beyond running submitted closures on some
//! worker thread; per-cell ordering comes from each cell's inbox and
//! scheduled flag (see `cell`). Handlers for distinct cells run in
//! parallel, bounded by the pool size. A slow update function pins exactly
//! one worker.

pub(crate) mod gate;

use std::sync::Arc;

use crate::error::{Error, Result};

/// A shared worker pool driving cell message handlers.
///
/// Cloning is cheap; all clones dispatch onto the same pool. Cells hold a
/// clone of the scheduler they were created on, so the pool stays alive as
/// long as any cell does.
#[derive(Clone)]
pub struct Scheduler {
    pool: Arc<rayon::ThreadPool>,
}

impl Scheduler {
    /// Build a scheduler with one worker per available CPU.
    pub fn new() -> Result<Self> {
        Self::with_threads(0)
    }

    /// Build a scheduler with an explicit worker count.
    ///
    /// Zero means the rayon default (one per available CPU). Cells whose
    /// functions block for long stretches may want a larger pool.
    pub fn with_threads(num_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("trellis-worker-{i}"))
            .build()
            .map_err(|e| Error::Pool(e.to_string()))?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Number of worker threads in the pool.
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run a closure on some worker.
    pub(crate) fn spawn(&self, op: impl FnOnce() + Send + 'static) {
        self.pool.spawn(op);
    }
}
