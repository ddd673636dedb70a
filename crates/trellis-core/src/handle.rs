//! The handle protocol: observable value sources usable as cell parents.
//!
//! A handle has no status of its own; its value is always considered
//! current. Cells observe non-cell handles through watches installed at
//! construction and removed at teardown.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::cell::outcome::HandleId;

/// Identifier of a registered watch, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchId(u64);

/// Callback invoked with each new value of a watched handle.
pub type Watch<V> = Box<dyn Fn(V) + Send + Sync>;

/// An observable reference yielding a current value.
///
/// Anything implementing `Handle` may appear as a cell parent. The engine
/// reads the current value once at cell construction and thereafter relies
/// on the subscribed watch to report changes.
pub trait Handle<V>: Send + Sync {
    /// Stable identity of this handle.
    fn id(&self) -> HandleId;

    /// Read the current value.
    fn current(&self) -> V;

    /// Register a watch invoked on each distinct value change.
    fn subscribe(&self, watch: Watch<V>) -> WatchId;

    /// Remove a previously registered watch.
    fn unsubscribe(&self, watch: WatchId);
}

struct SourceInner<V> {
    value: V,
    watches: Vec<(WatchId, Watch<V>)>,
    next_watch: u64,
}

/// A settable source handle: a plain mutable value cells can depend on.
///
/// Sources are the leaf inputs of a graph. Setting a source notifies every
/// watching cell with the new value; setting it to an equal value is a
/// no-op, so dependents are not spuriously invalidated.
pub struct Source<V> {
    id: HandleId,
    inner: Arc<Mutex<SourceInner<V>>>,
}

impl<V> Clone for Source<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Source<V> {
    /// Create a source holding `initial`.
    pub fn new(initial: V) -> Self {
        Self {
            id: HandleId::next(),
            inner: Arc::new(Mutex::new(SourceInner {
                value: initial,
                watches: Vec::new(),
                next_watch: 0,
            })),
        }
    }

    /// Read the current value.
    pub fn get(&self) -> V {
        self.inner.lock().value.clone()
    }
}

impl<V: Clone + PartialEq + Send + Sync + 'static> Source<V> {
    /// Store a new value and notify watchers.
    ///
    /// Watchers run under the source lock, so two concurrent `set` calls
    /// deliver their notifications in a consistent order.
    pub fn set(&self, value: V) {
        let mut inner = self.inner.lock();
        if inner.value == value {
            return;
        }
        inner.value = value.clone();
        tracing::trace!("source {} set", self.id);
        for (_, watch) in &inner.watches {
            watch(value.clone());
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Handle<V> for Source<V> {
    fn id(&self) -> HandleId {
        self.id
    }

    fn current(&self) -> V {
        self.get()
    }

    fn subscribe(&self, watch: Watch<V>) -> WatchId {
        let mut inner = self.inner.lock();
        let id = WatchId(inner.next_watch);
        inner.next_watch += 1;
        inner.watches.push((id, watch));
        id
    }

    fn unsubscribe(&self, watch: WatchId) {
        self.inner.lock().watches.retain(|(id, _)| *id != watch);
    }
}
