//! Standalone compound flattening: the editor previews a compound node's
//! generated GLSL without compiling a whole graph.

use std::collections::HashSet;

use anyhow::{Result, bail};

use crate::graph::{Edge, NodeKind, ShaderNode};

use super::inline::{InlineCtx, PassAssembly, emit_compound_fn};

/// Flatten `node` (a compound) and everything it transitively inlines into
/// GLSL source: helper functions first, the compound's own function last.
/// Interior uniforms are hoisted, so the text is only callable inside a
/// pass that declares them; this entry point exists for inspection and
/// tests, the graph compiler goes through the assembly directly.
pub fn compile_compound_node(
    node: &ShaderNode,
    nodes: &[ShaderNode],
    edges: &[Edge],
) -> Result<String> {
    if node.kind != NodeKind::Compound {
        bail!("node '{}' is not a compound", node.id);
    }
    let no_passes = HashSet::new();
    let mut ctx = InlineCtx::scoped(nodes, edges, &no_passes, node.scope.as_deref());
    let mut asm = PassAssembly::default();
    emit_compound_fn(&mut ctx, &mut asm, node)?;
    Ok(asm.helpers.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodePort, ShaderNode};
    use crate::types::{GlslType, UniformValue};

    fn standard(id: &str, scope: &str, source: &str) -> ShaderNode {
        let mut n = ShaderNode::new(id, NodeKind::Standard);
        n.scope = Some(scope.to_string());
        n.source = Some(source.to_string());
        n
    }

    fn compound_fixture() -> (ShaderNode, Vec<ShaderNode>, Vec<Edge>) {
        let mut comp = ShaderNode::new("grp", NodeKind::Compound);
        comp.inputs.push(NodePort::new("x", GlslType::Float));
        comp.outputs.push(NodePort::new("result", GlslType::Float));

        let mut input_proxy = ShaderNode::new("in_proxy", NodeKind::GraphInputProxy);
        input_proxy.scope = Some("grp".to_string());
        input_proxy.outputs.push(NodePort::new("x", GlslType::Float));

        let mut output_proxy = ShaderNode::new("out_proxy", NodeKind::GraphOutputProxy);
        output_proxy.scope = Some("grp".to_string());
        output_proxy.inputs.push(NodePort::new("result", GlslType::Float));

        let mut double = standard(
            "double",
            "grp",
            "void run(in float v, out float r) { r = v * 2.0; }",
        );
        double.inputs.push(NodePort::new("v", GlslType::Float));
        double.outputs.push(NodePort::new("r", GlslType::Float));

        let edges = vec![
            Edge::new("e1", "in_proxy", "x", "double", "v"),
            Edge::new("e2", "double", "r", "out_proxy", "result"),
        ];
        let nodes = vec![comp.clone(), input_proxy, output_proxy, double];
        (comp, nodes, edges)
    }

    #[test]
    fn flattens_proxy_bounded_subgraph_into_one_function() {
        let (comp, nodes, edges) = compound_fixture();
        let glsl = compile_compound_node(&comp, &nodes, &edges).unwrap();

        assert!(glsl.contains("void run_grp(in float p_x, out float o_result)"));
        // The interior node's run is renamed and its call wired to the param.
        assert!(glsl.contains("void run_grp__double(in float v, out float r)"));
        assert!(glsl.contains("run_grp__double(p_x, v_grp__double_r);"));
        assert!(glsl.contains("o_result = v_grp__double_r;"));
    }

    #[test]
    fn unconnected_interior_input_becomes_namespaced_uniform() {
        let (comp, mut nodes, mut edges) = compound_fixture();
        // Swap the doubler for a two-input node with only one edge attached.
        nodes[3].source = Some(
            "void run(in float v, in float gain, out float r) { r = v * gain; }".to_string(),
        );
        nodes[3]
            .uniforms
            .insert("gain".to_string(), UniformValue::Float(3.5));
        edges.truncate(2);

        let no_passes = HashSet::new();
        let mut ctx = InlineCtx::scoped(&nodes, &edges, &no_passes, None);
        let mut asm = PassAssembly::default();
        emit_compound_fn(&mut ctx, &mut asm, &comp).unwrap();

        let (ty, value) = asm.uniforms.get("u_n_grp__double_gain").unwrap();
        assert_eq!(*ty, GlslType::Float);
        assert_eq!(*value, UniformValue::Float(3.5));
    }

    #[test]
    fn missing_output_proxy_is_an_error() {
        let (comp, mut nodes, edges) = compound_fixture();
        nodes.retain(|n| n.kind != NodeKind::GraphOutputProxy);
        let err = compile_compound_node(&comp, &nodes, &edges).unwrap_err();
        assert!(err.to_string().contains("no output proxy"));
    }

    #[test]
    fn nested_compound_recurses() {
        let (mut inner_comp, mut nodes, mut edges) = compound_fixture();
        // Wrap the whole thing in an outer compound that calls the inner one.
        inner_comp.scope = Some("outer".to_string());
        for n in &mut nodes {
            if n.id == "grp" {
                n.scope = Some("outer".to_string());
            }
        }

        let mut outer = ShaderNode::new("outer", NodeKind::Compound);
        outer.inputs.push(NodePort::new("x", GlslType::Float));
        outer.outputs.push(NodePort::new("y", GlslType::Float));

        let mut in_proxy = ShaderNode::new("outer_in", NodeKind::GraphInputProxy);
        in_proxy.scope = Some("outer".to_string());
        in_proxy.outputs.push(NodePort::new("x", GlslType::Float));
        let mut out_proxy = ShaderNode::new("outer_out", NodeKind::GraphOutputProxy);
        out_proxy.scope = Some("outer".to_string());
        out_proxy.inputs.push(NodePort::new("y", GlslType::Float));

        nodes.push(outer.clone());
        nodes.push(in_proxy);
        nodes.push(out_proxy);
        edges.push(Edge::new("e3", "outer_in", "x", "grp", "x"));
        edges.push(Edge::new("e4", "grp", "result", "outer_out", "y"));

        let glsl = compile_compound_node(&outer, &nodes, &edges).unwrap();
        assert!(glsl.contains("void run_outer(in float p_x, out float o_y)"));
        assert!(glsl.contains("void run_outer__grp(in float p_x, out float o_result)"));
        assert!(glsl.contains("run_outer__grp(p_x, "));
    }
}
