//! Cells: first-class units of deferred computation over observable parents.
//!
//! A cell owns a cached function result, the latest values observed from
//! its parents, and back-references to its children. All mutation happens
//! inside the cell's own message handler; the scheduler runs handlers for
//! distinct cells in parallel while each cell processes its inbox strictly
//! in arrival order.

pub(crate) mod machine;
pub mod outcome;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{CellError, Error, Result};
use crate::handle::{Handle, Source, WatchId};
use crate::sched::Scheduler;
use machine::{Broadcast, CellState, Effects, Layout, Message, ParentSlot};
use outcome::{HandleId, Outcome, Snapshot, Status};

/// Values flowing through cells.
///
/// Blanket-implemented. Equality is what distinguishes a genuine change
/// from a duplicate report: a parent recomputing an equal value does not
/// invalidate its children.
pub trait Value: Clone + PartialEq + Send + Sync + 'static {}
impl<T: Clone + PartialEq + Send + Sync + 'static> Value for T {}

/// Result of a cell's update function: a value or a fault.
pub type ComputeResult<V> = std::result::Result<V, CellError>;

type UpdateFn<V> = Box<dyn Fn(&[V]) -> ComputeResult<V> + Send + Sync>;

/// One entry of a cell's ordered parent list.
///
/// Order matters: the update function receives its arguments in parent
/// order, with constants passed through verbatim and handles substituted
/// by their most recently observed value.
pub enum Parent<V> {
    /// A plain immutable value.
    Constant(V),
    /// Another cell; demanded when this cell updates.
    Cell(Cell<V>),
    /// A non-cell handle (e.g. a [`Source`]), observed through a watch.
    Handle(Arc<dyn Handle<V>>),
}

impl<V: Value> Parent<V> {
    pub fn constant(value: V) -> Self {
        Parent::Constant(value)
    }

    pub fn cell(cell: &Cell<V>) -> Self {
        Parent::Cell(cell.clone())
    }

    pub fn source(source: &Source<V>) -> Self {
        Parent::Handle(Arc::new(source.clone()))
    }

    pub fn handle(handle: Arc<dyn Handle<V>>) -> Self {
        Parent::Handle(handle)
    }
}

impl<V: Value> From<&Cell<V>> for Parent<V> {
    fn from(cell: &Cell<V>) -> Self {
        Parent::cell(cell)
    }
}

impl<V: Value> From<&Source<V>> for Parent<V> {
    fn from(source: &Source<V>) -> Self {
        Parent::source(source)
    }
}

pub(crate) struct CellCore<V> {
    pub(crate) id: HandleId,
    pub(crate) name: String,
    pub(crate) layout: Layout<V>,
    func: UpdateFn<V>,
    pub(crate) state: Mutex<CellState<V>>,
    inbox: Mutex<VecDeque<Message<V>>>,
    scheduled: AtomicBool,
    /// Non-owning back-references, used only for broadcast.
    children: Mutex<Vec<Weak<CellCore<V>>>>,
    /// Distinct cell parents, strongly held; ownership runs child-to-parent.
    pub(crate) cell_parents: Vec<Arc<CellCore<V>>>,
    /// Distinct non-cell handle parents.
    source_parents: Vec<Arc<dyn Handle<V>>>,
    /// Watches installed on `source_parents`, removed at teardown.
    watch_ids: Mutex<Vec<WatchId>>,
    sched: Scheduler,
}

impl<V: Value> CellCore<V> {
    /// Enqueue a message and make sure a drain task is running.
    pub(crate) fn send(self: &Arc<Self>, msg: Message<V>) {
        self.inbox.lock().push_back(msg);
        if !self.scheduled.swap(true, Ordering::AcqRel) {
            let cell = Arc::clone(self);
            self.sched.spawn(move || cell.drain());
        }
    }

    /// Process the inbox until it drains.
    ///
    /// The scheduled flag guarantees a single drain task per cell, which is
    /// what serializes the state machine. The re-check after clearing the
    /// flag closes the race against a concurrent `send`.
    fn drain(self: Arc<Self>) {
        loop {
            let msg = self.inbox.lock().pop_front();
            match msg {
                Some(msg) => self.process(msg),
                None => {
                    self.scheduled.store(false, Ordering::Release);
                    let pending = !self.inbox.lock().is_empty();
                    if pending && !self.scheduled.swap(true, Ordering::AcqRel) {
                        continue;
                    }
                    return;
                }
            }
        }
    }

    fn process(self: &Arc<Self>, msg: Message<V>) {
        tracing::trace!("cell '{}' handling {}", self.name, msg.kind());
        let fx = {
            let mut state = self.state.lock();
            machine::step(&self.layout, &mut state, msg)
        };
        self.perform(fx);
        self.settle_observers();
    }

    /// Carry out the effects of a step, outside the state lock.
    fn perform(self: &Arc<Self>, fx: Effects<V>) {
        if fx.demand_parents {
            self.demand_parents();
        }
        if let Some(args) = fx.compute {
            self.run_compute(args);
        }
        for broadcast in fx.broadcasts {
            self.broadcast(broadcast);
        }
    }

    /// Demand every cell parent, first re-pulling values that are already
    /// observable.
    ///
    /// The re-pull mirrors the constructor's pre-population: a parent that
    /// is already computed ignores `UpdateRequest`, so its value has to be
    /// read from its snapshot. Sources are always current and never receive
    /// demand at all.
    fn demand_parents(self: &Arc<Self>) {
        let mut known_faults = Vec::new();
        let ready_args = {
            let mut state = self.state.lock();
            for src in &self.source_parents {
                let sid = src.id();
                if !state.parent_values.contains_key(&sid) {
                    state.parent_values.insert(sid, src.current());
                }
            }
            for parent in &self.cell_parents {
                if !state.parent_values.contains_key(&parent.id) {
                    let snap = parent.state.lock().snapshot();
                    match snap.value {
                        Outcome::Computed(v) => {
                            state.parent_values.insert(parent.id, v);
                        }
                        // A faulted parent ignores demand; its fault has to
                        // be learned here or the demand never settles.
                        Outcome::Faulted(faults) => {
                            if let Some(e) = faults.values().next().cloned() {
                                known_faults.push((parent.id, e));
                            }
                        }
                        Outcome::Pending => {}
                    }
                }
            }
            if state.is_ready(&self.layout) {
                state.assemble_args(&self.layout)
            } else {
                None
            }
        };
        for (parent, error) in known_faults {
            self.send(Message::ParentError(parent, error));
        }
        // Duplicates are idempotent on the receiving side: an updating or
        // computed parent ignores the request.
        for parent in &self.cell_parents {
            parent.send(Message::UpdateRequest);
        }
        if let Some(args) = ready_args {
            self.run_compute(args);
        }
    }

    /// Run the update function and publish its result.
    ///
    /// The function runs without the state lock held, so readers keep
    /// seeing the pre-compute snapshot while a slow function pins this
    /// worker. The drain task is the only state writer, which makes the
    /// unlock sound.
    fn run_compute(self: &Arc<Self>, args: Vec<V>) {
        tracing::debug!("cell '{}' computing", self.name);
        let result = (self.func)(&args);
        if let Err(e) = &result {
            tracing::debug!("cell '{}' failed: {e}", self.name);
        }
        let fx = {
            let mut state = self.state.lock();
            machine::apply_compute(&self.layout, &mut state, result)
        };
        self.perform(fx);
    }

    /// Fan a payload out to every live child.
    fn broadcast(self: &Arc<Self>, broadcast: Broadcast<V>) {
        let children: Vec<Arc<CellCore<V>>> = {
            let mut children = self.children.lock();
            children.retain(|w| w.strong_count() > 0);
            children.iter().filter_map(Weak::upgrade).collect()
        };
        for child in &children {
            let msg = match &broadcast {
                Broadcast::Computed(v) => Message::ParentComputed(self.id, v.clone()),
                Broadcast::NeedsUpdate => Message::ParentNeedsUpdate(self.id),
                Broadcast::Error(e) => Message::ParentError(self.id, e.clone()),
                Broadcast::Recovered => Message::ParentRecovered(self.id),
            };
            child.send(msg);
        }
    }

    /// Fire one-shot evaluation observers if the cell settled.
    fn settle_observers(&self) {
        let fired = {
            let mut state = self.state.lock();
            if state.status.is_terminal() && !state.observers.is_empty() {
                std::mem::take(&mut state.observers)
            } else {
                Vec::new()
            }
        };
        for gate in fired {
            gate.arrive();
        }
    }
}

impl<V> Drop for CellCore<V> {
    fn drop(&mut self) {
        let watch_ids = std::mem::take(self.watch_ids.get_mut());
        for (src, watch) in self.source_parents.iter().zip(watch_ids) {
            src.unsubscribe(watch);
        }
        // Prune our (now dead) back-reference from each parent.
        for parent in &self.cell_parents {
            parent.children.lock().retain(|w| w.strong_count() > 0);
        }
    }
}

/// A first-class unit of deferred computation.
///
/// `Cell` is a cheaply clonable reference to shared state. Cells are
/// created against a [`Scheduler`] and updated exclusively through
/// messages; reading [`Cell::snapshot`] never blocks on a computation.
pub struct Cell<V> {
    pub(crate) core: Arc<CellCore<V>>,
}

impl<V> Clone for Cell<V> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<V: Value> Cell<V> {
    /// Create a cell applying `func` to `parents` in order.
    ///
    /// The cell starts in `NeedsUpdate`; values of parents that are already
    /// computed are recorded immediately so the first demand does not walk
    /// further up the graph than it has to.
    pub fn new(
        sched: &Scheduler,
        name: impl Into<String>,
        parents: Vec<Parent<V>>,
        func: impl Fn(&[V]) -> ComputeResult<V> + Send + Sync + 'static,
    ) -> Self {
        Self::build(sched, name.into(), parents, false, Box::new(func))
    }

    /// Create an oblivious cell: once computed, it ignores all parent
    /// events until [`Cell::force_needs_update`].
    pub fn new_oblivious(
        sched: &Scheduler,
        name: impl Into<String>,
        parents: Vec<Parent<V>>,
        func: impl Fn(&[V]) -> ComputeResult<V> + Send + Sync + 'static,
    ) -> Self {
        Self::build(sched, name.into(), parents, true, Box::new(func))
    }

    /// A leaf cell holding `initial` until it is [`Cell::set`].
    pub fn leaf(sched: &Scheduler, name: impl Into<String>, initial: V) -> Self {
        let value = initial.clone();
        Self::new(sched, name, Vec::new(), move |_| Ok(value.clone()))
    }

    fn build(
        sched: &Scheduler,
        name: String,
        parents: Vec<Parent<V>>,
        oblivious: bool,
        func: UpdateFn<V>,
    ) -> Self {
        let mut slots = Vec::with_capacity(parents.len());
        let mut cell_parents: Vec<Arc<CellCore<V>>> = Vec::new();
        let mut source_parents: Vec<Arc<dyn Handle<V>>> = Vec::new();
        for parent in parents {
            match parent {
                Parent::Constant(v) => slots.push(ParentSlot::Constant(v)),
                Parent::Cell(c) => {
                    slots.push(ParentSlot::Cell(c.core.id));
                    if !cell_parents.iter().any(|p| p.id == c.core.id) {
                        cell_parents.push(c.core);
                    }
                }
                Parent::Handle(h) => {
                    slots.push(ParentSlot::Source(h.id()));
                    if !source_parents.iter().any(|p| p.id() == h.id()) {
                        source_parents.push(h);
                    }
                }
            }
        }

        let core = Arc::new(CellCore {
            id: HandleId::next(),
            name,
            layout: Layout::new(slots, oblivious),
            func,
            state: Mutex::new(CellState::new()),
            inbox: Mutex::new(VecDeque::new()),
            scheduled: AtomicBool::new(false),
            children: Mutex::new(Vec::new()),
            cell_parents,
            source_parents,
            watch_ids: Mutex::new(Vec::new()),
            sched: sched.clone(),
        });

        // Register as a child first, then read the parent's snapshot: a
        // value computed in between reaches us either way, at worst twice.
        for parent in &core.cell_parents {
            parent.children.lock().push(Arc::downgrade(&core));
            let snap = parent.state.lock().snapshot();
            match snap.value {
                Outcome::Computed(v) => {
                    core.state.lock().parent_values.insert(parent.id, v);
                }
                Outcome::Faulted(faults) => {
                    // A faulted parent ignores demand, so the fault has to
                    // be learned now for a later evaluate to terminate.
                    if let Some(e) = faults.values().next().cloned() {
                        core.send(Message::ParentError(parent.id, e));
                    }
                }
                Outcome::Pending => {}
            }
        }
        for src in &core.source_parents {
            let sid = src.id();
            let weak = Arc::downgrade(&core);
            let watch = src.subscribe(Box::new(move |v: V| {
                if let Some(cell) = weak.upgrade() {
                    cell.send(Message::ParentComputed(sid, v));
                }
            }));
            core.watch_ids.lock().push(watch);
            core.state.lock().parent_values.insert(sid, src.current());
        }

        tracing::debug!(
            "created cell '{}' ({} parents, {} handles)",
            core.name,
            core.layout.slots.len(),
            core.layout.n_handle,
        );
        Cell { core }
    }

    /// Stable identity of this cell.
    pub fn id(&self) -> HandleId {
        self.core.id
    }

    /// The name given at construction.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Whether the cell was configured as oblivious.
    pub fn is_oblivious(&self) -> bool {
        self.core.layout.oblivious
    }

    /// A consistent `{status, value}` pair.
    pub fn snapshot(&self) -> Snapshot<V> {
        self.core.state.lock().snapshot()
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.core.state.lock().status
    }

    /// Current outcome.
    pub fn value(&self) -> Outcome<V> {
        self.snapshot().value
    }

    /// External write. Only valid on a leaf cell (no handle parents).
    ///
    /// The value is published as `Computed`, the status becomes `UpToDate`
    /// (or `Oblivious` if so configured) and children are notified.
    pub fn set(&self, value: V) -> Result<()> {
        if self.core.layout.n_handle > 0 {
            return Err(Error::SetOnNonLeaf {
                name: self.core.name.clone(),
                n_handle: self.core.layout.n_handle,
            });
        }
        self.core.send(Message::Set(value));
        Ok(())
    }

    /// Enqueue a demand for this cell and return immediately.
    pub fn request_update(&self) {
        self.core.send(Message::UpdateRequest);
    }

    /// Unconditionally mark this cell as needing an update.
    ///
    /// Resets an oblivious cell and recovers a faulted one; children are
    /// told their input is gone.
    pub fn force_needs_update(&self) {
        self.core.send(Message::ForceNeedsUpdate);
    }

    /// Inject `error` as if this cell's own function had failed.
    pub fn force_error(&self, error: CellError) {
        self.core.send(Message::ForceError(error));
    }
}
