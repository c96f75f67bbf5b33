//! Cycle detection over any dependency graph.
//!
//! Used for populate chains between cells and for base/view links between
//! collections: a depth-first search from `start` that reports the first
//! cycle reachable from it.

use std::collections::HashSet;
use std::hash::Hash;

/// Detect a cycle reachable from `start`.
/// Returns the path that closes the cycle (ending with the repeated node), or None.
pub fn detect_cycle<K, F>(start: &K, mut deps_of: F) -> Option<Vec<K>>
where
    K: Clone + Eq + Hash,
    F: FnMut(&K) -> Vec<K>,
{
    let mut visiting = HashSet::new();
    let mut finished = HashSet::new();
    let mut path = Vec::new();

    if detect_cycle_dfs(start, &mut deps_of, &mut visiting, &mut finished, &mut path) {
        Some(path)
    } else {
        None
    }
}

fn detect_cycle_dfs<K, F>(
    current: &K,
    deps_of: &mut F,
    visiting: &mut HashSet<K>,
    finished: &mut HashSet<K>,
    path: &mut Vec<K>,
) -> bool
where
    K: Clone + Eq + Hash,
    F: FnMut(&K) -> Vec<K>,
{
    if visiting.contains(current) {
        path.push(current.clone());
        return true;
    }
    if finished.contains(current) {
        return false;
    }

    visiting.insert(current.clone());
    path.push(current.clone());

    for dep in deps_of(current) {
        if detect_cycle_dfs(&dep, deps_of, visiting, finished, path) {
            return true;
        }
    }

    path.pop();
    visiting.remove(current);
    finished.insert(current.clone());
    false
}
