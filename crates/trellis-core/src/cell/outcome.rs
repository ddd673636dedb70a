//! Observable cell state: statuses, outcomes and fault maps.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CellError;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(0);

/// Stable identity of a handle (a cell or a source) within the process.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct HandleId(u64);

impl HandleId {
    /// Allocate a fresh identity.
    pub(crate) fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle_{}", self.0)
    }
}

/// Lifecycle status of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No current value; the cell recomputes on the next demand.
    NeedsUpdate,
    /// Demanded and waiting for parent values (or currently computing).
    Updating,
    /// Holds the result of its function over the latest parent values.
    UpToDate,
    /// Holds a computed value and ignores all parent traffic until reset.
    Oblivious,
    /// The cell's own function or an ancestor failed.
    Error,
}

impl Status {
    /// Terminal statuses do not change without new demand or input.
    ///
    /// `evaluate` waits for exactly these; `Error` counts so evaluation
    /// never deadlocks on a faulted branch.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::UpToDate | Status::Oblivious | Status::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::NeedsUpdate => "needs-update",
            Status::Updating => "updating",
            Status::UpToDate => "up-to-date",
            Status::Oblivious => "oblivious",
            Status::Error => "error",
        };
        f.write_str(name)
    }
}

/// Origin of an entry in a fault map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSource {
    /// The cell's own update function failed.
    Own,
    /// A direct handle parent reported a failure.
    Parent(HandleId),
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSource::Own => f.write_str("self"),
            ErrorSource::Parent(id) => write!(f, "{id}"),
        }
    }
}

/// Accumulated failures visible at a cell, keyed by origin.
///
/// The error values relay the originating failure unchanged as it travels
/// down the graph; the keys name the local source (the cell itself or the
/// direct parent that reported it).
pub type FaultMap = BTreeMap<ErrorSource, CellError>;

/// The externally observable value of a cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<V> {
    /// No value has been computed yet, or the last one was invalidated.
    Pending,
    /// The update function produced a value.
    Computed(V),
    /// The cell or an ancestor failed; the map enumerates the sources.
    Faulted(FaultMap),
}

impl<V> Outcome<V> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Outcome::Computed(_))
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, Outcome::Faulted(_))
    }

    /// The computed value, if any.
    pub fn computed(&self) -> Option<&V> {
        match self {
            Outcome::Computed(v) => Some(v),
            _ => None,
        }
    }

    /// Consume the outcome, yielding the computed value if any.
    pub fn into_computed(self) -> Option<V> {
        match self {
            Outcome::Computed(v) => Some(v),
            _ => None,
        }
    }

    /// The fault map, if the outcome is faulted.
    pub fn faults(&self) -> Option<&FaultMap> {
        match self {
            Outcome::Faulted(m) => Some(m),
            _ => None,
        }
    }
}

/// A consistent `{status, value}` pair read from a cell.
///
/// Snapshots are plain values; a reader never observes a torn state, and a
/// snapshot reflects only completed transitions.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<V> {
    pub status: Status,
    pub value: Outcome<V>,
}
