//! End-to-end tests over a small arithmetic dataflow graph.
//!
//! The graph mirrors the crate's demo setup: a division cell over a
//! source, oblivious intermediates, and sinks mixing both.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use trellis_core::{
    Cell, CellError, ComputeResult, Outcome, Parent, Scheduler, Source, Status, evaluate,
    force_needs_update,
};

// =============================================================================
// Test Helpers
// =============================================================================

fn sum(args: &[f64]) -> f64 {
    args.iter().sum()
}

/// Poll until `cell` reaches `want`; propagation is asynchronous.
fn wait_for_status(cell: &Cell<f64>, want: Status) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while cell.status() != want {
        assert!(
            Instant::now() < deadline,
            "cell '{}' stuck in {} waiting for {}",
            cell.name(),
            cell.status(),
            want
        );
        thread::sleep(Duration::from_millis(5));
    }
}

fn counted_sum(
    counter: &Arc<AtomicUsize>,
) -> impl Fn(&[f64]) -> ComputeResult<f64> + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move |args| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(sum(args))
    }
}

fn counted_div(
    counter: &Arc<AtomicUsize>,
) -> impl Fn(&[f64]) -> ComputeResult<f64> + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move |args| {
        counter.fetch_add(1, Ordering::SeqCst);
        if args[1] == 0.0 {
            Err(CellError::new("division by zero"))
        } else {
            Ok(args[0] / args[1])
        }
    }
}

/// `a = 1/x`, `b = 2+3`, `c = a+b` (oblivious), `d = c+a+3`,
/// `e = a+2` (oblivious), `f = c+e+12`.
struct DemoGraph {
    x: Source<f64>,
    a: Cell<f64>,
    b: Cell<f64>,
    c: Cell<f64>,
    d: Cell<f64>,
    e: Cell<f64>,
    f: Cell<f64>,
    computes: [Arc<AtomicUsize>; 6],
}

impl DemoGraph {
    fn build(sched: &Scheduler) -> Self {
        let computes: [Arc<AtomicUsize>; 6] = std::array::from_fn(|_| Arc::default());
        let x = Source::new(10.0);
        let a = Cell::new(
            sched,
            "a",
            vec![Parent::constant(1.0), Parent::source(&x)],
            counted_div(&computes[0]),
        );
        let b = Cell::new(
            sched,
            "b",
            vec![Parent::constant(2.0), Parent::constant(3.0)],
            counted_sum(&computes[1]),
        );
        let c = Cell::new_oblivious(
            sched,
            "c",
            vec![Parent::cell(&a), Parent::cell(&b)],
            counted_sum(&computes[2]),
        );
        let d = Cell::new(
            sched,
            "d",
            vec![Parent::cell(&c), Parent::cell(&a), Parent::constant(3.0)],
            counted_sum(&computes[3]),
        );
        let e = Cell::new_oblivious(
            sched,
            "e",
            vec![Parent::cell(&a), Parent::constant(2.0)],
            counted_sum(&computes[4]),
        );
        let f = Cell::new(
            sched,
            "f",
            vec![Parent::cell(&c), Parent::cell(&e), Parent::constant(12.0)],
            counted_sum(&computes[5]),
        );
        Self {
            x,
            a,
            b,
            c,
            d,
            e,
            f,
            computes,
        }
    }

    fn compute_counts(&self) -> [usize; 6] {
        std::array::from_fn(|i| self.computes[i].load(Ordering::SeqCst))
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_nothing_computes_without_demand() {
    let sched = Scheduler::with_threads(4).unwrap();
    let g = DemoGraph::build(&sched);

    thread::sleep(Duration::from_millis(100));
    for cell in [&g.a, &g.b, &g.c, &g.d, &g.e, &g.f] {
        assert_eq!(cell.status(), Status::NeedsUpdate);
        assert_eq!(cell.value(), Outcome::Pending);
    }
    assert_eq!(g.compute_counts(), [0; 6]);
}

#[test]
fn test_independent_branches_compute_in_parallel() {
    let sched = Scheduler::with_threads(4).unwrap();
    let delay = Duration::from_millis(400);
    let x = Source::new(10.0);
    let a = Cell::new(
        &sched,
        "a",
        vec![Parent::constant(1.0), Parent::source(&x)],
        move |args: &[f64]| {
            thread::sleep(delay);
            Ok(args[0] / args[1])
        },
    );
    let b = Cell::new(
        &sched,
        "b",
        vec![Parent::constant(2.0), Parent::constant(3.0)],
        move |args: &[f64]| {
            thread::sleep(delay);
            Ok(args.iter().sum())
        },
    );

    let started = Instant::now();
    let values = evaluate(&[a, b]);
    let elapsed = started.elapsed();

    assert_eq!(
        values,
        vec![Outcome::Computed(1.0 / 10.0), Outcome::Computed(5.0)]
    );
    assert!(elapsed >= delay, "cells returned before computing");
    assert!(
        elapsed < delay * 2,
        "siblings computed sequentially: {elapsed:?}"
    );
}

#[test]
fn test_full_graph_evaluates_each_cell_once() {
    let sched = Scheduler::with_threads(4).unwrap();
    let g = DemoGraph::build(&sched);

    let values = evaluate(&[g.d.clone(), g.e.clone(), g.f.clone()]);

    let a = 1.0 / 10.0;
    let b = sum(&[2.0, 3.0]);
    let c = sum(&[a, b]);
    let d = sum(&[c, a, 3.0]);
    let e = sum(&[a, 2.0]);
    let f = sum(&[c, e, 12.0]);
    assert_eq!(
        values,
        vec![Outcome::Computed(d), Outcome::Computed(e), Outcome::Computed(f)]
    );

    assert_eq!(g.a.status(), Status::UpToDate);
    assert_eq!(g.b.status(), Status::UpToDate);
    assert_eq!(g.c.status(), Status::Oblivious);
    assert_eq!(g.e.status(), Status::Oblivious);
    assert_eq!(g.compute_counts(), [1; 6], "some cell computed twice");
}

#[test]
fn test_source_change_invalidates_only_non_oblivious_descendants() {
    let sched = Scheduler::with_threads(4).unwrap();
    let g = DemoGraph::build(&sched);
    evaluate(&[g.d.clone(), g.e.clone(), g.f.clone()]);

    let a_old = 1.0 / 10.0;
    let c_old = sum(&[a_old, sum(&[2.0, 3.0])]);
    let e_old = sum(&[a_old, 2.0]);

    g.x.set(11.0);
    wait_for_status(&g.a, Status::NeedsUpdate);
    wait_for_status(&g.d, Status::NeedsUpdate);

    // Oblivious cells keep their snapshot; f sits behind them, untouched.
    assert_eq!(g.c.value(), Outcome::Computed(c_old));
    assert_eq!(g.e.value(), Outcome::Computed(e_old));
    assert_eq!(g.f.status(), Status::UpToDate);

    let values = evaluate(&[g.a.clone(), g.d.clone()]);
    let a_new = 1.0 / 11.0;
    assert_eq!(
        values,
        vec![
            Outcome::Computed(a_new),
            Outcome::Computed(sum(&[c_old, a_new, 3.0]))
        ]
    );
    // a and d recomputed; b, c, e and f did not.
    assert_eq!(g.compute_counts(), [2, 1, 1, 2, 1, 1]);
}

#[test]
fn test_forced_oblivious_cell_recomputes_with_current_inputs() {
    let sched = Scheduler::with_threads(4).unwrap();
    let g = DemoGraph::build(&sched);
    evaluate(&[g.d.clone(), g.e.clone(), g.f.clone()]);

    g.x.set(11.0);
    wait_for_status(&g.a, Status::NeedsUpdate);
    evaluate(&[g.a.clone(), g.d.clone()]);

    force_needs_update(&[g.c.clone()]);
    wait_for_status(&g.c, Status::NeedsUpdate);
    let values = evaluate(&[g.c.clone()]);

    // The reset cell sees the post-change value of a, not its stale cache.
    let a_new = 1.0 / 11.0;
    assert_eq!(values, vec![Outcome::Computed(sum(&[a_new, 5.0]))]);
    assert_eq!(g.c.status(), Status::Oblivious);
    assert_eq!(g.computes[2].load(Ordering::SeqCst), 2);
}

#[test]
fn test_evaluate_returns_outcomes_in_argument_order() {
    let sched = Scheduler::with_threads(4).unwrap();
    let g = DemoGraph::build(&sched);

    let values = evaluate(&[g.b.clone(), g.a.clone(), g.b.clone()]);
    assert_eq!(
        values,
        vec![
            Outcome::Computed(5.0),
            Outcome::Computed(1.0 / 10.0),
            Outcome::Computed(5.0)
        ]
    );
}
