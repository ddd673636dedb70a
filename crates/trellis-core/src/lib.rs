//! Core engine for Trellis: concurrent, demand-driven dataflow cells.
//!
//! A *cell* caches the result of a pure function over the current values
//! of its parents, which may be constants, other cells, or watchable
//! [`Source`] handles. Cells recompute only when demanded and only when a
//! parent actually changed; independent branches of the graph compute in
//! parallel on a shared worker pool, and each cell computes at most once
//! per [`evaluate`] call.
//!
//! ```rust
//! use trellis_core::{evaluate, Cell, Outcome, Parent, Scheduler, Source};
//!
//! let sched = Scheduler::new().unwrap();
//! let x = Source::new(10.0_f64);
//! let a = Cell::new(&sched, "a", vec![Parent::constant(1.0), Parent::source(&x)], |args| {
//!     Ok(args[0] / args[1])
//! });
//! let b = Cell::new(&sched, "b", vec![Parent::cell(&a), Parent::constant(5.0)], |args| {
//!     Ok(args[0] + args[1])
//! });
//!
//! assert_eq!(evaluate(&[b]), vec![Outcome::Computed(1.0 / 10.0 + 5.0)]);
//! ```
//!
//! Failures are values: a cell whose function errors enters the `Error`
//! status and downstream cells accumulate the failure in their fault maps,
//! recovering per source once inputs change. A cell built with
//! [`Cell::new_oblivious`] becomes a memoized snapshot after its first
//! compute and ignores parent traffic until reset with
//! [`force_needs_update`].

pub mod api;
pub mod cell;
pub mod error;
pub mod handle;
pub mod sched;
pub mod topology;

pub use api::{evaluate, force_error, force_needs_update, update};
pub use cell::outcome::{ErrorSource, FaultMap, HandleId, Outcome, Snapshot, Status};
pub use cell::{Cell, ComputeResult, Parent, Value};
pub use error::{CellError, Error, Result};
pub use handle::{Handle, Source, Watch, WatchId};
pub use sched::Scheduler;
