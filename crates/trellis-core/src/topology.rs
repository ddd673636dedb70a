//! Read-side diagnostics over the dependency graph.
//!
//! Cells carry their topology as local links; these helpers materialize
//! the graph reachable from a set of cells for inspection. The engine
//! itself never consults them.

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use rustc_hash::FxHashMap;

use crate::cell::outcome::HandleId;
use crate::cell::{Cell, Value};
use crate::error::{Error, Result};

/// Every cell reachable from `roots` by following parent links.
///
/// The result is deduplicated but otherwise unordered.
pub fn reachable_cells<V: Value>(roots: &[Cell<V>]) -> Vec<Cell<V>> {
    let mut seen: FxHashMap<HandleId, Cell<V>> = FxHashMap::default();
    let mut stack: Vec<Cell<V>> = roots.to_vec();
    while let Some(cell) = stack.pop() {
        if seen.contains_key(&cell.id()) {
            continue;
        }
        for parent in &cell.core.cell_parents {
            stack.push(Cell {
                core: parent.clone(),
            });
        }
        seen.insert(cell.id(), cell);
    }
    seen.into_values().collect()
}

/// Cells reachable from `roots`, ancestors before descendants.
///
/// Construction makes cycles impossible, but the check is kept so a
/// corrupted graph reports instead of looping.
pub fn topological_order<V: Value>(roots: &[Cell<V>]) -> Result<Vec<Cell<V>>> {
    let cells = reachable_cells(roots);
    let mut by_id: FxHashMap<HandleId, Cell<V>> =
        cells.iter().map(|c| (c.id(), c.clone())).collect();

    let mut graph = DiGraph::new();
    let mut indices = FxHashMap::default();
    for cell in &cells {
        indices.insert(cell.id(), graph.add_node(cell.id()));
    }
    // Edges run producer to consumer.
    for cell in &cells {
        for parent in &cell.core.cell_parents {
            graph.add_edge(indices[&parent.id], indices[&cell.id()], ());
        }
    }

    let order = toposort(&graph, None).map_err(|cycle| {
        let id = graph[cycle.node_id()];
        let name = by_id
            .get(&id)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| id.to_string());
        Error::CyclicDependency(format!("cycle detected at cell '{name}'"))
    })?;

    Ok(order
        .into_iter()
        .filter_map(|idx| by_id.remove(&graph[idx]))
        .collect())
}

/// Group the cells reachable from `roots` by dependency level.
///
/// Cells in the same level have no dependencies on each other and may
/// compute concurrently; levels are ordered ancestors-first.
pub fn topological_levels<V: Value>(roots: &[Cell<V>]) -> Result<Vec<Vec<Cell<V>>>> {
    let order = topological_order(roots)?;
    let mut level_of: FxHashMap<HandleId, usize> = FxHashMap::default();
    let mut levels: Vec<Vec<Cell<V>>> = Vec::new();
    for cell in order {
        let level = cell
            .core
            .cell_parents
            .iter()
            .filter_map(|p| level_of.get(&p.id).map(|l| l + 1))
            .max()
            .unwrap_or(0);
        level_of.insert(cell.id(), level);
        if levels.len() == level {
            levels.push(Vec::new());
        }
        levels[level].push(cell);
    }
    Ok(levels)
}
