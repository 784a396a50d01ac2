//! Dependency extraction over the node graph: which nodes a render target
//! actually needs, and a deterministic evaluation order for them.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::graph::Edge;

/// Every node the target transitively reads from, the target included.
/// Walks `to -> from` over all edges; self-loop feedback edges add nothing
/// new so they need no special casing here.
pub(crate) fn upstream_reachable(edges: &[Edge], target: &str) -> HashSet<String> {
    let mut incoming: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        incoming
            .entry(edge.to.node_id.as_str())
            .or_default()
            .push(edge.from.node_id.as_str());
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut stack = vec![target];
    while let Some(id) = stack.pop() {
        if !seen.insert(id.to_string()) {
            continue;
        }
        if let Some(sources) = incoming.get(id) {
            for &src in sources {
                if !seen.contains(src) {
                    stack.push(src);
                }
            }
        }
    }
    seen
}

/// Kahn's algorithm restricted to `members`, producers before consumers.
///
/// Feedback self-edges are excluded from the degree counts: a node reading
/// its own previous frame is not a cycle, the ping-pong slot breaks the
/// dependency at runtime. Ready nodes are drained in lexicographic id order
/// so identical graphs always produce identical pass sequences.
///
/// A genuine cycle returns `Err` with the lexicographically smallest node
/// left unresolved (a cycle member or something downstream of one), for
/// stable error attribution.
pub(crate) fn topo_sort(members: &HashSet<String>, edges: &[Edge]) -> Result<Vec<String>, String> {
    let mut indegree: BTreeMap<&str, usize> = members
        .iter()
        .map(|id| (id.as_str(), 0))
        .collect();
    let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();

    for edge in edges {
        if edge.is_feedback() {
            continue;
        }
        let from = edge.from.node_id.as_str();
        let to = edge.to.node_id.as_str();
        if !members.contains(from) || !members.contains(to) {
            continue;
        }
        if let Some(d) = indegree.get_mut(to) {
            *d += 1;
        }
        outgoing.entry(from).or_default().push(to);
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|&(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut order = Vec::with_capacity(members.len());
    while let Some(&id) = ready.iter().next() {
        ready.remove(id);
        order.push(id.to_string());
        if let Some(consumers) = outgoing.get(id) {
            for &to in consumers {
                if let Some(d) = indegree.get_mut(to) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(to);
                    }
                }
            }
        }
    }

    if order.len() == members.len() {
        Ok(order)
    } else {
        let mut stuck: Vec<&str> = indegree
            .iter()
            .filter(|&(_, &d)| d > 0)
            .map(|(&id, _)| id)
            .collect();
        stuck.sort_unstable();
        Err(stuck.first().map(|s| s.to_string()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Edge;

    fn members(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reachability_follows_edges_backward_only() {
        let edges = vec![
            Edge::new("e1", "a", "o", "b", "i"),
            Edge::new("e2", "b", "o", "c", "i"),
            Edge::new("e3", "c", "o", "d", "i"),
            Edge::new("e4", "x", "o", "d", "i"),
        ];
        let seen = upstream_reachable(&edges, "c");
        assert_eq!(seen, members(&["a", "b", "c"]));
    }

    #[test]
    fn sort_puts_producers_first_and_breaks_ties_by_id() {
        let edges = vec![
            Edge::new("e1", "z_src", "o", "mix", "a"),
            Edge::new("e2", "a_src", "o", "mix", "b"),
        ];
        let order = topo_sort(&members(&["mix", "z_src", "a_src"]), &edges).unwrap();
        assert_eq!(order, vec!["a_src", "z_src", "mix"]);
    }

    #[test]
    fn self_loop_is_not_a_cycle() {
        let edges = vec![
            Edge::new("e1", "sim", "o", "sim", "prev"),
            Edge::new("e2", "sim", "o", "out", "i"),
        ];
        let order = topo_sort(&members(&["sim", "out"]), &edges).unwrap();
        assert_eq!(order, vec!["sim", "out"]);
    }

    #[test]
    fn cycle_reports_smallest_unresolved_node() {
        let edges = vec![
            Edge::new("e1", "b", "o", "c", "i"),
            Edge::new("e2", "c", "o", "b", "i"),
        ];
        let err = topo_sort(&members(&["b", "c"]), &edges).unwrap_err();
        assert_eq!(err, "b");

        // A node downstream of the cycle is unresolved too and can win the
        // tie-break; what matters is that the pick is stable.
        let edges = vec![
            Edge::new("e1", "b", "o", "c", "i"),
            Edge::new("e2", "c", "o", "b", "i"),
            Edge::new("e3", "b", "o", "a", "i"),
        ];
        let err = topo_sort(&members(&["a", "b", "c"]), &edges).unwrap_err();
        assert_eq!(err, "a");
    }

    #[test]
    fn edges_outside_the_member_set_are_ignored() {
        let edges = vec![Edge::new("e1", "ghost", "o", "a", "i")];
        let order = topo_sort(&members(&["a"]), &edges).unwrap();
        assert_eq!(order, vec!["a"]);
    }
}
