//! BFS, DFS, shortest-path, and connected-component traversal over the
//! cached adjacency of a materialized state.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::abort::AbortSignal;
use crate::error::Result;
use crate::materialize::Adjacency;

/// Which edge direction(s) a traversal follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
    Both,
}

/// Restricts traversal to edges whose label matches.
#[derive(Debug, Clone)]
pub enum LabelFilter {
    Any,
    One(String),
    Set(BTreeSet<String>),
}

impl LabelFilter {
    fn matches(&self, label: &str) -> bool {
        match self {
            LabelFilter::Any => true,
            LabelFilter::One(l) => l == label,
            LabelFilter::Set(set) => set.contains(label),
        }
    }
}

/// `(neighborId, label)` pairs reachable from `node` in `direction`,
/// filtered by `label_filter`, sorted by `(neighborId, label)` for
/// deterministic iteration (required for `Direction::Both`, which merges
/// forward and reverse edges).
pub fn neighbors_one_hop(adjacency: &Adjacency, node: &str, direction: Direction, label_filter: &LabelFilter) -> Vec<(String, String)> {
    neighbors(adjacency, node, direction, label_filter)
}

fn neighbors(adjacency: &Adjacency, node: &str, direction: Direction, label_filter: &LabelFilter) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    if matches!(direction, Direction::Out | Direction::Both) {
        if let Some(set) = adjacency.forward.get(node) {
            out.extend(set.iter().filter(|(_, label)| label_filter.matches(label)).cloned());
        }
    }
    if matches!(direction, Direction::In | Direction::Both) {
        if let Some(set) = adjacency.reverse.get(node) {
            out.extend(set.iter().filter(|(_, label)| label_filter.matches(label)).cloned());
        }
    }
    out.sort();
    out.dedup();
    out
}

/// Breadth-first traversal order starting at `start`, bounded by `max_depth`
/// hops. Checks `abort` once per dequeued node.
pub fn bfs(
    adjacency: &Adjacency,
    start: &str,
    direction: Direction,
    label_filter: &LabelFilter,
    max_depth: u32,
    abort: Option<&AbortSignal>,
) -> Result<Vec<String>> {
    let mut order = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, u32)> = VecDeque::new();
    queue.push_back((start.to_string(), 0));
    visited.insert(start.to_string());

    while let Some((node, depth)) = queue.pop_front() {
        if let Some(signal) = abort {
            signal.check()?;
        }
        order.push(node.clone());
        if depth >= max_depth {
            continue;
        }
        for (neighbor, _label) in neighbors(adjacency, &node, direction, label_filter) {
            if visited.insert(neighbor.clone()) {
                queue.push_back((neighbor, depth + 1));
            }
        }
    }
    Ok(order)
}

/// Pre-order depth-first traversal starting at `start`, bounded by
/// `max_depth` hops. Checks `abort` once per popped node.
pub fn dfs(
    adjacency: &Adjacency,
    start: &str,
    direction: Direction,
    label_filter: &LabelFilter,
    max_depth: u32,
    abort: Option<&AbortSignal>,
) -> Result<Vec<String>> {
    let mut order = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<(String, u32)> = vec![(start.to_string(), 0)];

    while let Some((node, depth)) = stack.pop() {
        if let Some(signal) = abort {
            signal.check()?;
        }
        if !visited.insert(node.clone()) {
            continue;
        }
        order.push(node.clone());
        if depth >= max_depth {
            continue;
        }
        // push in reverse so the lexicographically-first neighbor is
        // popped (and thus visited) first, matching the BFS tie-break.
        for (neighbor, _label) in neighbors(adjacency, &node, direction, label_filter).into_iter().rev() {
            if !visited.contains(&neighbor) {
                stack.push((neighbor, depth + 1));
            }
        }
    }
    Ok(order)
}

/// Shortest path (by hop count, via BFS) from `from` to `to`, or `None` if
/// unreachable within `max_depth` hops. Checks `abort` once per dequeued
/// node.
pub fn shortest_path(
    adjacency: &Adjacency,
    from: &str,
    to: &str,
    direction: Direction,
    label_filter: &LabelFilter,
    max_depth: u32,
    abort: Option<&AbortSignal>,
) -> Result<Option<Vec<String>>> {
    if from == to {
        return Ok(Some(vec![from.to_string()]));
    }
    let mut visited: HashSet<String> = HashSet::new();
    let mut parent: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    let mut queue: VecDeque<(String, u32)> = VecDeque::new();
    queue.push_back((from.to_string(), 0));
    visited.insert(from.to_string());

    while let Some((node, depth)) = queue.pop_front() {
        if let Some(signal) = abort {
            signal.check()?;
        }
        if depth >= max_depth {
            continue;
        }
        for (neighbor, _label) in neighbors(adjacency, &node, direction, label_filter) {
            if visited.insert(neighbor.clone()) {
                parent.insert(neighbor.clone(), node.clone());
                if neighbor == to {
                    let mut path = vec![to.to_string()];
                    let mut cur = to.to_string();
                    while let Some(p) = parent.get(&cur) {
                        path.push(p.clone());
                        cur = p.clone();
                    }
                    path.reverse();
                    return Ok(Some(path));
                }
                queue.push_back((neighbor, depth + 1));
            }
        }
    }
    Ok(None)
}

/// The undirected connected component containing `start`: reachability
/// ignores edge direction (both forward and reverse edges are followed)
/// but still honors `label_filter`.
pub fn connected_component(
    adjacency: &Adjacency,
    start: &str,
    label_filter: &LabelFilter,
    max_depth: u32,
    abort: Option<&AbortSignal>,
) -> Result<BTreeSet<String>> {
    Ok(bfs(adjacency, start, Direction::Both, label_filter, max_depth, abort)?.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_graph() -> Adjacency {
        let mut adjacency = Adjacency::default();
        adjacency.forward.insert("a".to_string(), [("b".to_string(), "next".to_string())].into());
        adjacency.reverse.insert("b".to_string(), [("a".to_string(), "next".to_string())].into());
        adjacency.forward.insert("b".to_string(), [("c".to_string(), "next".to_string())].into());
        adjacency.reverse.insert("c".to_string(), [("b".to_string(), "next".to_string())].into());
        adjacency
    }

    #[test]
    fn bfs_visits_in_hop_order() {
        let adjacency = line_graph();
        let order = bfs(&adjacency, "a", Direction::Out, &LabelFilter::Any, 1000, None).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn shortest_path_finds_minimal_hops() {
        let adjacency = line_graph();
        let path = shortest_path(&adjacency, "a", "c", Direction::Out, &LabelFilter::Any, 1000, None)
            .unwrap()
            .unwrap();
        assert_eq!(path, vec!["a", "b", "c"]);
    }

    #[test]
    fn max_depth_bounds_traversal() {
        let adjacency = line_graph();
        let order = bfs(&adjacency, "a", Direction::Out, &LabelFilter::Any, 0, None).unwrap();
        assert_eq!(order, vec!["a"]);
    }

    #[test]
    fn connected_component_ignores_direction() {
        let adjacency = line_graph();
        let component = connected_component(&adjacency, "c", &LabelFilter::Any, 1000, None).unwrap();
        assert_eq!(component, ["a", "b", "c"].into_iter().map(String::from).collect());
    }

    #[test]
    fn bfs_stops_when_aborted() {
        let adjacency = line_graph();
        let signal = AbortSignal::new();
        signal.abort();
        let err = bfs(&adjacency, "a", Direction::Out, &LabelFilter::Any, 1000, Some(&signal)).unwrap_err();
        assert!(matches!(err, crate::error::WarpError::OperationAborted));
    }
}
