//! The per-cell state machine.
//!
//! Every message addressed to a cell is applied here, one at a time, in
//! arrival order. `step` is a pure transition over `(layout, state,
//! message)`: it mutates the cell's private state and returns the
//! [`Effects`] the scheduler must carry out *after* the state lock is
//! released (broadcasts to children, demand on parents, a compute run).
//! Keeping the transition free of I/O is what makes the table testable in
//! isolation.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::cell::outcome::{ErrorSource, FaultMap, HandleId, Outcome, Snapshot, Status};
use crate::error::CellError;
use crate::sched::gate::EvalGate;

/// A message delivered to a cell's inbox.
#[derive(Clone)]
pub(crate) enum Message<V> {
    /// Demand: become up to date.
    UpdateRequest,
    /// A handle parent reported a new value.
    ParentComputed(HandleId, V),
    /// A handle parent lost its value.
    ParentNeedsUpdate(HandleId),
    /// A handle parent entered the error state.
    ParentError(HandleId, CellError),
    /// A handle parent left the error state.
    ParentRecovered(HandleId),
    /// External write; the API only enqueues this on leaf cells.
    Set(V),
    /// Unconditionally regress to `NeedsUpdate`.
    ForceNeedsUpdate,
    /// Inject a failure as if the cell's own function had failed.
    ForceError(CellError),
}

impl<V> Message<V> {
    /// Message tag, for logs.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Message::UpdateRequest => "update-request",
            Message::ParentComputed(..) => "parent-computed",
            Message::ParentNeedsUpdate(_) => "parent-needs-update",
            Message::ParentError(..) => "parent-error",
            Message::ParentRecovered(_) => "parent-recovered",
            Message::Set(_) => "set",
            Message::ForceNeedsUpdate => "force-needs-update",
            Message::ForceError(_) => "force-error",
        }
    }
}

/// Payloads fanned out to every child once a step completes.
pub(crate) enum Broadcast<V> {
    Computed(V),
    NeedsUpdate,
    Error(CellError),
    Recovered,
}

/// Work the scheduler performs after a step, outside the state lock.
pub(crate) struct Effects<V> {
    /// Messages to fan out to the children, in order.
    pub broadcasts: Vec<Broadcast<V>>,
    /// Refresh missing parent values and send `UpdateRequest` upward.
    pub demand_parents: bool,
    /// Run the update function over these arguments and apply the result.
    pub compute: Option<Vec<V>>,
}

impl<V> Default for Effects<V> {
    fn default() -> Self {
        Self {
            broadcasts: Vec::new(),
            demand_parents: false,
            compute: None,
        }
    }
}

/// One ordered parent entry, reduced to what the transition table needs.
#[derive(Clone)]
pub(crate) enum ParentSlot<V> {
    /// A plain immutable value.
    Constant(V),
    /// Another cell; receives `UpdateRequest` when demanded.
    Cell(HandleId),
    /// A non-cell handle; always current, observed through a watch.
    Source(HandleId),
}

/// Immutable per-cell topology: the ordered parent slots and the mode flag.
pub(crate) struct Layout<V> {
    pub slots: Vec<ParentSlot<V>>,
    /// Number of *distinct* handle parents; readiness compares against it.
    pub n_handle: usize,
    pub oblivious: bool,
}

impl<V> Layout<V> {
    pub(crate) fn new(slots: Vec<ParentSlot<V>>, oblivious: bool) -> Self {
        let mut seen = Vec::new();
        for slot in &slots {
            if let ParentSlot::Cell(id) | ParentSlot::Source(id) = slot {
                if !seen.contains(id) {
                    seen.push(*id);
                }
            }
        }
        Self {
            slots,
            n_handle: seen.len(),
            oblivious,
        }
    }

    fn is_parent(&self, id: HandleId) -> bool {
        self.slots.iter().any(|slot| {
            matches!(slot, ParentSlot::Cell(p) | ParentSlot::Source(p) if *p == id)
        })
    }
}

/// Mutable state owned by a cell's message handler.
pub(crate) struct CellState<V> {
    pub status: Status,
    /// Last successfully computed value; present while `UpToDate` or
    /// `Oblivious`.
    pub computed: Option<V>,
    /// Non-empty exactly while the status is `Error`.
    pub faults: FaultMap,
    /// Most recently observed value of each handle parent.
    pub parent_values: FxHashMap<HandleId, V>,
    /// One-shot observers fired on the next terminal transition.
    pub observers: Vec<Arc<EvalGate>>,
}

impl<V: Clone> CellState<V> {
    pub(crate) fn new() -> Self {
        Self {
            status: Status::NeedsUpdate,
            computed: None,
            faults: FaultMap::new(),
            parent_values: FxHashMap::default(),
            observers: Vec::new(),
        }
    }

    /// A consistent `{status, value}` pair.
    pub(crate) fn snapshot(&self) -> Snapshot<V> {
        let value = match self.status {
            Status::NeedsUpdate | Status::Updating => Outcome::Pending,
            Status::UpToDate | Status::Oblivious => match &self.computed {
                Some(v) => Outcome::Computed(v.clone()),
                None => Outcome::Pending,
            },
            Status::Error => Outcome::Faulted(self.faults.clone()),
        };
        Snapshot {
            status: self.status,
            value,
        }
    }

    /// Ready to compute: a value for every distinct handle parent and no
    /// unrecovered fault.
    pub(crate) fn is_ready(&self, layout: &Layout<V>) -> bool {
        self.parent_values.len() == layout.n_handle && self.faults.is_empty()
    }

    /// Argument list in parent order, or `None` if a value is missing.
    pub(crate) fn assemble_args(&self, layout: &Layout<V>) -> Option<Vec<V>> {
        layout
            .slots
            .iter()
            .map(|slot| match slot {
                ParentSlot::Constant(v) => Some(v.clone()),
                ParentSlot::Cell(id) | ParentSlot::Source(id) => {
                    self.parent_values.get(id).cloned()
                }
            })
            .collect()
    }
}

/// Apply one message. Returns the effects to perform after the step.
pub(crate) fn step<V: Clone + PartialEq>(
    layout: &Layout<V>,
    state: &mut CellState<V>,
    msg: Message<V>,
) -> Effects<V> {
    let mut fx = Effects::default();
    match msg {
        Message::UpdateRequest => on_update_request(layout, state, &mut fx),
        Message::ParentComputed(p, v) => on_parent_computed(layout, state, p, v, &mut fx),
        Message::ParentNeedsUpdate(p) => on_parent_needs_update(state, p, &mut fx),
        Message::ParentError(p, e) => on_parent_error(state, p, e, &mut fx),
        Message::ParentRecovered(p) => on_parent_recovered(state, p, &mut fx),
        Message::Set(v) => on_set(layout, state, v, &mut fx),
        Message::ForceNeedsUpdate => on_force_needs_update(state, &mut fx),
        Message::ForceError(e) => on_force_error(state, e, &mut fx),
    }
    fx
}

/// Publish a compute result. Runs after the update function returned,
/// back under the state lock.
pub(crate) fn apply_compute<V: Clone>(
    layout: &Layout<V>,
    state: &mut CellState<V>,
    result: Result<V, CellError>,
) -> Effects<V> {
    let mut fx = Effects::default();
    match result {
        Ok(v) => {
            state.status = if layout.oblivious {
                Status::Oblivious
            } else {
                Status::UpToDate
            };
            state.computed = Some(v.clone());
            fx.broadcasts.push(Broadcast::Computed(v));
        }
        Err(e) => {
            state.status = Status::Error;
            state.computed = None;
            state.faults.insert(ErrorSource::Own, e.clone());
            fx.broadcasts.push(Broadcast::Error(e));
        }
    }
    fx
}

/// Transition to `Updating` and either compute (if ready) or demand.
fn begin_update<V: Clone>(layout: &Layout<V>, state: &mut CellState<V>, fx: &mut Effects<V>) {
    state.status = Status::Updating;
    if state.is_ready(layout) {
        match state.assemble_args(layout) {
            Some(args) => fx.compute = Some(args),
            None => fx.demand_parents = true,
        }
    } else {
        fx.demand_parents = true;
    }
}

fn on_update_request<V: Clone>(
    layout: &Layout<V>,
    state: &mut CellState<V>,
    fx: &mut Effects<V>,
) {
    match state.status {
        Status::NeedsUpdate => begin_update(layout, state, fx),
        // Already demanded, already current, absorbing, or faulted.
        Status::Updating | Status::UpToDate | Status::Oblivious | Status::Error => {}
    }
}

fn on_parent_computed<V: Clone + PartialEq>(
    layout: &Layout<V>,
    state: &mut CellState<V>,
    parent: HandleId,
    value: V,
    fx: &mut Effects<V>,
) {
    if !layout.is_parent(parent) {
        return;
    }
    // A report of the value already on record is not a change. The demand
    // action re-pulls computed parent snapshots, so a parent's broadcast
    // can reach us a second time; equality is what keeps that duplicate
    // (or a parent recomputing an equal value) from invalidating us.
    let duplicate = state.parent_values.get(&parent) == Some(&value);
    match state.status {
        Status::NeedsUpdate => {
            state.parent_values.insert(parent, value);
        }
        Status::Updating => {
            state.parent_values.insert(parent, value);
            if state.is_ready(layout) {
                if let Some(args) = state.assemble_args(layout) {
                    fx.compute = Some(args);
                }
            }
        }
        Status::UpToDate => {
            if duplicate {
                return;
            }
            // A parent changed under us: keep the fresh value but regress
            // and tell the children their input is gone.
            state.parent_values.insert(parent, value);
            state.status = Status::NeedsUpdate;
            state.computed = None;
            fx.broadcasts.push(Broadcast::NeedsUpdate);
        }
        Status::Oblivious => {}
        Status::Error => {
            // A value from a parent we hold faulted means that parent
            // recovered, whatever the value.
            let parent_recovered = state.faults.remove(&ErrorSource::Parent(parent)).is_some();
            if duplicate && !parent_recovered {
                return;
            }
            state.parent_values.insert(parent, value);
            // An actual input change also invalidates a failure of our own
            // function; a duplicate report does not.
            let self_only = state.faults.keys().all(|s| matches!(s, ErrorSource::Own));
            if state.faults.is_empty() || (self_only && !duplicate) {
                state.faults.clear();
                state.status = Status::NeedsUpdate;
                state.computed = None;
                fx.broadcasts.push(Broadcast::Recovered);
            }
        }
    }
}

fn on_parent_needs_update<V: Clone>(
    state: &mut CellState<V>,
    parent: HandleId,
    fx: &mut Effects<V>,
) {
    match state.status {
        Status::NeedsUpdate => {
            state.parent_values.remove(&parent);
        }
        Status::Updating => {
            // The demand is still outstanding; wait for the parent to
            // recompute and report back.
            state.parent_values.remove(&parent);
        }
        Status::UpToDate => {
            state.parent_values.remove(&parent);
            state.status = Status::NeedsUpdate;
            state.computed = None;
            fx.broadcasts.push(Broadcast::NeedsUpdate);
        }
        Status::Oblivious => {}
        Status::Error => {
            state.parent_values.remove(&parent);
        }
    }
}

fn on_parent_error<V: Clone>(
    state: &mut CellState<V>,
    parent: HandleId,
    error: CellError,
    fx: &mut Effects<V>,
) {
    let source = ErrorSource::Parent(parent);
    match state.status {
        Status::NeedsUpdate | Status::Updating | Status::UpToDate => {
            state.status = Status::Error;
            state.computed = None;
            state.faults.insert(source, error.clone());
            fx.broadcasts.push(Broadcast::Error(error));
        }
        Status::Oblivious => {}
        Status::Error => {
            // Accumulate; re-reports of a known source stay silent.
            if !state.faults.contains_key(&source) {
                state.faults.insert(source, error.clone());
                fx.broadcasts.push(Broadcast::Error(error));
            }
        }
    }
}

fn on_parent_recovered<V: Clone>(
    state: &mut CellState<V>,
    parent: HandleId,
    fx: &mut Effects<V>,
) {
    match state.status {
        Status::Error => {
            state.faults.remove(&ErrorSource::Parent(parent));
            if state.faults.is_empty() {
                state.status = Status::NeedsUpdate;
                fx.broadcasts.push(Broadcast::Recovered);
            }
        }
        // No prior error from this parent; nothing to do.
        _ => {}
    }
}

fn on_set<V: Clone>(layout: &Layout<V>, state: &mut CellState<V>, value: V, fx: &mut Effects<V>) {
    state.status = if layout.oblivious {
        Status::Oblivious
    } else {
        Status::UpToDate
    };
    state.computed = Some(value.clone());
    state.faults.clear();
    fx.broadcasts.push(Broadcast::Computed(value));
}

fn on_force_needs_update<V: Clone>(state: &mut CellState<V>, fx: &mut Effects<V>) {
    state.status = Status::NeedsUpdate;
    state.computed = None;
    state.faults.clear();
    // Cached parent values may predate an oblivious stretch; drop them so
    // the next demand re-pulls current ones.
    state.parent_values.clear();
    fx.broadcasts.push(Broadcast::NeedsUpdate);
}

fn on_force_error<V: Clone>(state: &mut CellState<V>, error: CellError, fx: &mut Effects<V>) {
    if state.status != Status::Error {
        state.faults.clear();
    }
    state.status = Status::Error;
    state.computed = None;
    state.faults.insert(ErrorSource::Own, error.clone());
    fx.broadcasts.push(Broadcast::Error(error));
}
