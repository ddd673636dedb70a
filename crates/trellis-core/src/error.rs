//! Error types for trellis-core.

use thiserror::Error;

/// Result type for trellis-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced synchronously by the public API.
///
/// These are precondition violations; they never enter a cell's state
/// machine. Failures *inside* the dataflow (a cell function returning an
/// error) are carried as [`CellError`] values in fault maps instead.
#[derive(Debug, Error)]
pub enum Error {
    /// `set` was called on a cell that has handle parents.
    #[error("cannot set cell '{name}': it has {n_handle} handle parent(s)")]
    SetOnNonLeaf { name: String, n_handle: usize },

    /// Cyclic dependency detected among cells.
    #[error("cyclic dependency detected: {0}")]
    CyclicDependency(String),

    /// The scheduler's worker pool could not be built.
    #[error("failed to build worker pool: {0}")]
    Pool(String),
}

/// A failure produced by a cell's update function, or inherited from an
/// ancestor through the graph.
///
/// `CellError` is a value: it is cloned into the fault map of every
/// downstream cell the failure reaches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CellError {
    message: String,
}

impl CellError {
    /// Create an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for CellError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for CellError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}
