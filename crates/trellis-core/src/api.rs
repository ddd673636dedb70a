//! Operations over sets of cells: demand, synchronization, administration.

use std::sync::Arc;

use crate::cell::outcome::Outcome;
use crate::cell::{Cell, Value};
use crate::error::CellError;
use crate::sched::gate::EvalGate;

/// Enqueue an update request to each cell and return immediately.
///
/// Demand propagates up the graph from each cell; results flow back down
/// as they are computed. Use [`evaluate`] to wait for them.
pub fn update<V: Value>(cells: &[Cell<V>]) {
    for cell in cells {
        cell.request_update();
    }
}

/// Demand the given cells and block until each settles.
///
/// Returns the outcomes in argument order once every cell has reached a
/// terminal status (`UpToDate`, `Oblivious` or `Error`). Faulted cells
/// yield their fault maps; evaluation never panics on a faulted branch and
/// cells that are already terminal are returned as-is.
///
/// Within one call, every reachable cell computes at most once: the first
/// demand moves a cell to `Updating`, and further requests are ignored.
pub fn evaluate<V: Value>(cells: &[Cell<V>]) -> Vec<Outcome<V>> {
    let gate = Arc::new(EvalGate::new());
    for cell in cells {
        // Install under the state lock so a transition cannot slip between
        // the status check and the observer registration.
        let mut state = cell.core.state.lock();
        if !state.status.is_terminal() {
            gate.add();
            state.observers.push(Arc::clone(&gate));
        }
    }
    update(cells);
    gate.wait();
    cells.iter().map(Cell::value).collect()
}

/// Unconditionally mark each cell as needing an update.
///
/// This is the one way to reset an oblivious cell; it also recovers cells
/// from the error state. Children are told their input is gone.
pub fn force_needs_update<V: Value>(cells: &[Cell<V>]) {
    for cell in cells {
        cell.force_needs_update();
    }
}

/// Inject a synthetic failure into each cell, as if its own update
/// function had failed.
pub fn force_error<V: Value>(cells: &[Cell<V>]) {
    for cell in cells {
        cell.force_error(CellError::new("forced error"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Parent;
    use crate::cell::outcome::Status;
    use crate::sched::Scheduler;

    fn sched() -> Scheduler {
        Scheduler::with_threads(4).unwrap()
    }

    #[test]
    fn test_evaluate_of_terminal_cells_returns_immediately() {
        let sched = sched();
        let leaf = Cell::leaf(&sched, "leaf", 5);
        let first = evaluate(&[leaf.clone()]);
        let second = evaluate(&[leaf.clone()]);
        assert_eq!(first, second);
        assert_eq!(second, vec![Outcome::Computed(5)]);
    }

    #[test]
    fn test_evaluate_chain() {
        let sched = sched();
        let a = Cell::leaf(&sched, "a", 2);
        let b = Cell::new(
            &sched,
            "b",
            vec![Parent::cell(&a), Parent::constant(3)],
            |args| Ok(args[0] * args[1]),
        );
        let c = Cell::new(
            &sched,
            "c",
            vec![Parent::cell(&b), Parent::constant(1)],
            |args| Ok(args[0] + args[1]),
        );

        let values = evaluate(&[c.clone()]);
        assert_eq!(values, vec![Outcome::Computed(7)]);
        assert_eq!(a.status(), Status::UpToDate);
        assert_eq!(b.status(), Status::UpToDate);
    }

    #[test]
    fn test_evaluate_repeated_cell_argument() {
        let sched = sched();
        let leaf = Cell::leaf(&sched, "leaf", 9);
        let values = evaluate(&[leaf.clone(), leaf.clone()]);
        assert_eq!(
            values,
            vec![Outcome::Computed(9), Outcome::Computed(9)]
        );
    }

    #[test]
    fn test_force_error_then_evaluate_terminates() {
        let sched = sched();
        let leaf = Cell::leaf(&sched, "leaf", 1);
        force_error(&[leaf.clone()]);
        let values = evaluate(&[leaf.clone()]);
        assert!(values[0].is_faulted());
        assert_eq!(leaf.status(), Status::Error);
    }
}
