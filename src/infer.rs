//! Graph type inference: overload resolution for polymorphic nodes, port
//! synchronization, and edge validation against the implicit-cast matrix.

use std::collections::{HashMap, HashSet};

use crate::graph::{Edge, NodeKind, NodePort, ShaderNode};
use crate::signature::{Signature, parse_signatures};
use crate::types::{GlslType, UniformValue, can_cast};

/// Outcome of one inference pass over a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Inferred {
    /// Updated node list (same order as the input snapshot).
    pub nodes: Vec<ShaderNode>,
    /// Edges that became invalid under the cast matrix. Removal is deferred
    /// to the caller's next tick; inference never mutates the edge list it
    /// is iterating.
    pub pruned_edges: Vec<String>,
}

/// Re-derive ports and overload selection for every source-bearing node,
/// then validate all edges. Returns `None` when nothing changed, so callers
/// can keep their existing snapshot untouched.
///
/// Deterministic: the same snapshot always produces the same result, and a
/// node's currently selected overload is preferred on scoring ties so an
/// unrelated edit elsewhere in the graph never silently re-picks an
/// overload and discards user-entered literals.
pub fn infer_types(nodes: &[ShaderNode], edges: &[Edge]) -> Option<Inferred> {
    let mut updated: Vec<ShaderNode> = nodes.to_vec();
    let mut changed = false;

    let index_of: HashMap<String, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.clone(), i))
        .collect();

    for i in 0..updated.len() {
        if updated[i].kind != NodeKind::Standard {
            continue;
        }
        let Some(source) = updated[i].source.clone() else {
            continue;
        };

        let parsed = parse_signatures(&source);
        if !parsed.valid {
            // Broken edit in progress: keep the last-known-good ports so
            // existing wiring survives until the source parses again.
            continue;
        }

        let selected = choose_overload(&updated, &index_of, edges, i, &parsed.signatures);
        let sig = &parsed.signatures[selected];

        let node = &mut updated[i];
        if apply_signature(node, sig, selected) {
            changed = true;
        }
    }

    let pruned_edges = validate_edges(&updated, edges);

    if !changed && pruned_edges.is_empty() {
        return None;
    }
    Some(Inferred {
        nodes: updated,
        pruned_edges,
    })
}

/// Score every overload against the types currently arriving on the node's
/// connected inputs: +2 per exact match, +1 per cast-compatible match.
/// Ties prefer the sticky `selected_overload`, then the lowest index
/// (directive order, then declaration order).
fn choose_overload(
    nodes: &[ShaderNode],
    index_of: &HashMap<String, usize>,
    edges: &[Edge],
    node_index: usize,
    signatures: &[Signature],
) -> usize {
    if signatures.len() == 1 {
        return 0;
    }
    let node = &nodes[node_index];

    let arriving: Vec<(&str, GlslType)> = edges
        .iter()
        .filter(|e| e.to.node_id == node.id)
        .filter_map(|e| {
            let src = index_of.get(&e.from.node_id).map(|&i| &nodes[i])?;
            let ty = src.output_port(&e.from.port_id).map(|p| p.ty.clone())?;
            Some((e.to.port_id.as_str(), ty))
        })
        .collect();

    let scores: Vec<i32> = signatures
        .iter()
        .map(|sig| {
            let mut score = 0i32;
            for (port_id, arriving_ty) in &arriving {
                let Some(param) = sig.inputs.iter().find(|p| p.name == *port_id) else {
                    continue;
                };
                if param.ty == *arriving_ty {
                    score += 2;
                } else if can_cast(arriving_ty, &param.ty) {
                    score += 1;
                }
            }
            score
        })
        .collect();

    let best = scores.iter().copied().max().unwrap_or(0);
    // Sticky: the active overload keeps winning ties.
    if let Some(current) = node.selected_overload {
        if scores.get(current) == Some(&best) {
            return current;
        }
    }
    scores.iter().position(|&s| s == best).unwrap_or(0)
}

/// Swap the node's exposed ports for the winning overload's params and sync
/// uniform storage: values for vanished input ids are dropped, new input
/// ids get a type-appropriate default. Returns whether anything changed.
fn apply_signature(node: &mut ShaderNode, sig: &Signature, selected: usize) -> bool {
    let inputs: Vec<NodePort> = sig
        .inputs
        .iter()
        .map(|p| NodePort::new(p.name.clone(), p.ty.clone()))
        .collect();
    let outputs: Vec<NodePort> = sig
        .outputs
        .iter()
        .map(|p| NodePort::new(p.name.clone(), p.ty.clone()))
        .collect();
    let output_type = outputs.first().map(|p| p.ty.clone());

    let unchanged = node.inputs == inputs
        && node.outputs == outputs
        && node.selected_overload == Some(selected)
        && node.output_type == output_type;
    if unchanged {
        return false;
    }

    let keep: HashSet<&str> = inputs.iter().map(|p| p.id.as_str()).collect();
    node.uniforms.retain(|k, _| keep.contains(k.as_str()));
    for port in &inputs {
        node.uniforms
            .entry(port.id.clone())
            .or_insert_with(|| UniformValue::default_for(&port.ty));
    }

    node.inputs = inputs;
    node.outputs = outputs;
    node.output_type = output_type;
    node.selected_overload = Some(selected);
    true
}

/// Every edge whose resolved endpoint types fall outside the cast matrix is
/// marked for removal, as are edges referencing missing nodes or ports.
fn validate_edges(nodes: &[ShaderNode], edges: &[Edge]) -> Vec<String> {
    let by_id: HashMap<&str, &ShaderNode> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut pruned = Vec::new();
    for edge in edges {
        let valid = (|| {
            let from = by_id.get(edge.from.node_id.as_str())?;
            let to = by_id.get(edge.to.node_id.as_str())?;
            let src_ty = &from.output_port(&edge.from.port_id)?.ty;
            let dst_ty = &to.input_port(&edge.to.port_id)?.ty;
            Some(can_cast(src_ty, dst_ty))
        })()
        .unwrap_or(false);

        if !valid {
            pruned.push(edge.id.clone());
        }
    }
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, NodeKind, ShaderNode};

    fn source_node(id: &str, source: &str) -> ShaderNode {
        let mut n = ShaderNode::new(id, NodeKind::Standard);
        n.source = Some(source.to_string());
        n
    }

    fn run_inference(nodes: &[ShaderNode], edges: &[Edge]) -> Vec<ShaderNode> {
        infer_types(nodes, edges)
            .map(|inf| inf.nodes)
            .unwrap_or_else(|| nodes.to_vec())
    }

    #[test]
    fn single_overload_ports_are_adopted() {
        let nodes = vec![source_node(
            "a",
            "void run(float x, out vec3 c) { c = vec3(x); }",
        )];
        let inferred = infer_types(&nodes, &[]).expect("ports should change");
        let a = &inferred.nodes[0];
        assert_eq!(a.inputs.len(), 1);
        assert_eq!(a.inputs[0].id, "x");
        assert_eq!(a.output_type, Some(GlslType::Vec3));
        assert_eq!(a.uniforms.get("x"), Some(&UniformValue::Float(0.0)));
    }

    #[test]
    fn invalid_source_retains_previous_ports() {
        let mut node = source_node("a", "void run(float x, out vec3 c) { c = vec3(x); }");
        let inferred = run_inference(&[node.clone()], &[]);
        node = inferred[0].clone();
        assert_eq!(node.inputs.len(), 1);

        // Half-typed edit: ports and uniforms must survive untouched.
        node.source = Some("void ru".to_string());
        assert!(infer_types(&[node.clone()], &[]).is_none());
    }

    #[test]
    fn overload_follows_connected_types() {
        let add = source_node(
            "add",
            "void run(float a, float b, out float r) { r = a + b; }\n\
             void run(vec3 a, vec3 b, out vec3 r) { r = a + b; }",
        );
        let vec_src = source_node("v", "void run(out vec3 c) { c = vec3(1.0); }");
        let edges = vec![Edge::new("e1", "v", "c", "add", "a")];

        let mut nodes = run_inference(&[add, vec_src], &edges);
        nodes = run_inference(&nodes, &edges);
        let add = nodes.iter().find(|n| n.id == "add").unwrap();
        // vec3 arriving on `a` exactly matches the second overload.
        assert_eq!(add.selected_overload, Some(1));
        assert_eq!(add.output_type, Some(GlslType::Vec3));
    }

    #[test]
    fn sticky_selection_survives_unrelated_edits() {
        let mix = source_node(
            "mix",
            "void run(float a, float b, out float r) { r = a; }\n\
             void run(vec4 a, vec4 b, out vec4 r) { r = a; }",
        );
        let mut nodes = run_inference(&[mix], &[]);
        nodes[0].selected_overload = Some(1);
        nodes = run_inference(&nodes, &[]);
        nodes[0].uniforms.insert(
            "b".to_string(),
            UniformValue::Vec4([0.5, 0.5, 0.5, 1.0]),
        );

        // No connections at all: both overloads score zero, the current one
        // must stay selected and its literal must survive.
        let after = infer_types(&nodes, &[]);
        assert!(after.is_none(), "nothing should change: {after:?}");
        assert_eq!(nodes[0].selected_overload, Some(1));
        assert_eq!(
            nodes[0].uniforms.get("b"),
            Some(&UniformValue::Vec4([0.5, 0.5, 0.5, 1.0]))
        );
    }

    #[test]
    fn overload_switch_syncs_uniform_storage() {
        let node = source_node(
            "n",
            "void run(float scale, out float r) { r = scale; }\n\
             void run(vec2 offset, vec2 size, out vec2 r) { r = offset + size; }",
        );
        let v2 = source_node("v2", "void run(out vec2 p) { p = vec2(0.0); }");
        let mut nodes = run_inference(&[node, v2], &[]);
        assert!(nodes[0].uniforms.contains_key("scale"));

        let edges = vec![Edge::new("e", "v2", "p", "n", "offset")];
        nodes = run_inference(&nodes, &edges);
        let n = &nodes[0];
        assert_eq!(n.selected_overload, Some(1));
        assert!(!n.uniforms.contains_key("scale"));
        assert_eq!(n.uniforms.get("size"), Some(&UniformValue::Vec2([0.0; 2])));
    }

    #[test]
    fn widening_edge_survives_but_narrowing_is_pruned() {
        let f = source_node("f", "void run(out float v) { v = 1.0; }");
        let v3 = source_node("v3", "void run(out vec3 v) { v = vec3(1.0); }");
        let sink = source_node(
            "sink",
            "void run(float a, vec3 b, out vec4 c) { c = vec4(b * a, 1.0); }",
        );
        let nodes = run_inference(&[f, v3, sink], &[]);

        let edges = vec![
            // float -> vec3: widening splat, retained.
            Edge::new("widen", "f", "v", "sink", "b"),
            // vec3 -> float: would drop channels, pruned.
            Edge::new("narrow", "v3", "v", "sink", "a"),
        ];
        let out = infer_types(&nodes, &edges).expect("pruning is a change");
        assert_eq!(out.pruned_edges, vec!["narrow"]);
    }

    #[test]
    fn incompatible_edge_is_marked_for_pruning() {
        let m = source_node("m", "void run(out mat3 v) { v = mat3(1.0); }");
        let sink = source_node("sink", "void run(float a, out float r) { r = a; }");
        let nodes = run_inference(&[m, sink], &[]);

        let edges = vec![Edge::new("bad", "m", "v", "sink", "a")];
        let inferred = infer_types(&nodes, &edges).expect("pruning is a change");
        assert_eq!(inferred.pruned_edges, vec!["bad".to_string()]);
    }

    #[test]
    fn any_producer_feeds_a_sampler_input() {
        let v3 = source_node("v3", "void run(out vec3 v) { v = vec3(1.0); }");
        let blur = source_node(
            "blur",
            "void run(sampler2D src, vec2 uv, out vec4 c) { c = texture(src, uv); }",
        );
        let nodes = run_inference(&[v3, blur], &[]);
        let edges = vec![Edge::new("tex", "v3", "v", "blur", "src")];
        let out = infer_types(&nodes, &edges);
        assert!(out.is_none() || out.unwrap().pruned_edges.is_empty());
    }

    #[test]
    fn inference_is_idempotent() {
        let nodes = vec![
            source_node("a", "void run(float x, out vec3 c) { c = vec3(x); }"),
            source_node("b", "void run(vec3 c, out vec4 o) { o = vec4(c, 1.0); }"),
        ];
        let edges = vec![Edge::new("e", "a", "c", "b", "c")];

        let first = infer_types(&nodes, &edges).expect("first pass changes ports");
        let second = infer_types(&first.nodes, &edges);
        assert!(second.is_none(), "second pass must be a fixed point");
    }
}
