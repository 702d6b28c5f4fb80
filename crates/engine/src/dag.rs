//! DAG validation — run this before dispatching a workflow.
//!
//! Works on the engine's arena indices: `deps[i]` lists the indices task `i`
//! depends on. Returns a topological order (Kahn's algorithm) on success.
//! On failure it returns every task that can never become ready. Those are
//! the tasks on a cycle plus everything downstream of one.

use std::collections::VecDeque;

/// Topologically sort the dependency graph.
///
/// Ties are broken by index, so the order is deterministic for a given
/// registration order.
///
/// # Errors
/// The sorted list of indices that could not be ordered, if the graph
/// contains a cycle.
pub fn topological_order(deps: &[Vec<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let n = deps.len();

    let dependents = dependents_of(deps);
    let mut in_degree: Vec<usize> = deps.iter().map(Vec::len).collect();

    // Seed the queue with tasks that have no dependencies.
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(n);

    while let Some(task) = queue.pop_front() {
        sorted.push(task);
        for &next in &dependents[task] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if sorted.len() == n {
        Ok(sorted)
    } else {
        Err((0..n).filter(|&i| in_degree[i] > 0).collect())
    }
}

/// Reverse adjacency: for each task, the tasks that depend on it. A task
/// that lists the same dependency twice appears twice.
pub fn dependents_of(deps: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut dependents = vec![Vec::new(); deps.len()];
    for (task, task_deps) in deps.iter().enumerate() {
        for &dep in task_deps {
            dependents[dep].push(task);
        }
    }
    dependents
}
