//! Trellis: concurrent, demand-driven dataflow cells.
//!
//! Trellis arranges *cells*, first-class units of deferred computation,
//! into a DAG of parent/child dependencies:
//! - **Lazy**: nothing computes without demand.
//! - **Minimal**: a cell recomputes only when a parent actually changed,
//!   and at most once per evaluation.
//! - **Parallel**: independent branches compute simultaneously.
//! - **Fault-carrying**: errors propagate down the graph as values and
//!   recover per source; `evaluate` never deadlocks on a faulted branch.
//! - **Oblivious mode**: a cell can opt out of invalidation and act as a
//!   memoized snapshot until explicitly reset.
//!
//! # Quick Start
//!
//! ```rust
//! use trellis::prelude::*;
//!
//! let sched = Scheduler::new().unwrap();
//! let price = Source::new(40.0_f64);
//! let tax = Cell::new(&sched, "tax", vec![Parent::source(&price)], |args| {
//!     Ok(args[0] * 0.19)
//! });
//! let total = Cell::new(
//!     &sched,
//!     "total",
//!     vec![Parent::source(&price), Parent::cell(&tax)],
//!     |args| Ok(args[0] + args[1]),
//! );
//!
//! let values = evaluate(&[total.clone()]);
//! assert_eq!(values[0], Outcome::Computed(40.0 + 40.0 * 0.19));
//! ```
//!
//! Setting `price` afterwards regresses `tax` and `total` to
//! `NeedsUpdate`; nothing recomputes until the next demand.

pub mod prelude {
    //! Common imports for Trellis users.
    //!
    //! ```rust
    //! use trellis::prelude::*;
    //! ```

    pub use trellis_core::{
        Cell, CellError, ComputeResult, ErrorSource, Handle, Outcome, Parent, Scheduler,
        Snapshot, Source, Status, evaluate, force_error, force_needs_update, update,
    };
}

pub use trellis_core::{
    Cell, CellError, ComputeResult, Error, ErrorSource, FaultMap, Handle, HandleId, Outcome,
    Parent, Result, Scheduler, Snapshot, Source, Status, Value, Watch, WatchId, evaluate,
    force_error, force_needs_update, topology, update,
};
