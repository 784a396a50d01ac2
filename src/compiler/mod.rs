//! Graph compilation: turn a node graph plus a render target into an
//! ordered list of GPU passes.
//!
//! The pipeline, in order: resolve the target, walk backward to collect the
//! nodes it needs, topologically sort them, split them into pass nodes
//! (those that render an image) and value nodes (inlined into consumers),
//! then assemble one fragment shader per pass. Compilation never panics and
//! never returns `Err`; structural problems come back as a
//! [`CompileError`] attributed to the responsible node.

mod compound;
mod emit;
mod inline;
mod subgraph;
mod types;

pub use compound::compile_compound_node;
pub use types::{CompilationResult, CompileError, CompiledPass, OutputTarget};

use std::collections::{BTreeMap, HashSet};

use anyhow::{Result, anyhow, bail};

use crate::graph::{Edge, NodeKind, NodePass, NodePassTarget, NodePort, ShaderNode, sanitize_ident};
use crate::signature::{ParamDirection, parse_signatures};
use crate::types::TextureSource;

use emit::{VERTEX_SOURCE, build_fragment, decl, to_vec4_color};
use inline::{InlineCtx, PassAssembly, emit_compound_fn, input_expr};

/// Compile the subgraph feeding `target` into an executable pass list.
pub fn compile_graph(nodes: &[ShaderNode], edges: &[Edge], target: &str) -> CompilationResult {
    let root_ids: HashSet<&str> = nodes
        .iter()
        .filter(|n| n.scope.is_none())
        .map(|n| n.id.as_str())
        .collect();
    let Some(target_node) = nodes
        .iter()
        .find(|n| n.scope.is_none() && n.id == target)
    else {
        return CompilationResult::failure(target, format!("unknown render target '{target}'"));
    };

    let root_edges: Vec<Edge> = edges
        .iter()
        .filter(|e| {
            root_ids.contains(e.from.node_id.as_str()) && root_ids.contains(e.to.node_id.as_str())
        })
        .cloned()
        .collect();

    let reachable = subgraph::upstream_reachable(&root_edges, target);
    let order = match subgraph::topo_sort(&reachable, &root_edges) {
        Ok(order) => order,
        Err(member) => {
            return CompilationResult::failure(
                member.clone(),
                format!("cyclic dependency involving node '{member}'"),
            );
        }
    };

    let pass_nodes = split_pass_nodes(nodes, &root_edges, &reachable, target);
    if !pass_nodes.contains(target) {
        return CompilationResult::failure(
            target,
            format!("target node '{target}' cannot render"),
        );
    }

    let mut result = CompilationResult::default();
    for id in &order {
        if !pass_nodes.contains(id) {
            continue;
        }
        let Some(node) = nodes.iter().find(|n| n.scope.is_none() && n.id == *id) else {
            continue;
        };
        let is_target = node.id == target;
        let passes = match assemble_node(nodes, edges, &pass_nodes, node, is_target) {
            Ok(passes) => passes,
            Err(e) => return CompilationResult::failure(node.id.clone(), format!("{e:#}")),
        };
        result.passes.extend(passes);
    }

    // A target whose final pass writes its feedback slot still has to reach
    // the screen; a trailing copy pass reads the slot's fresh half.
    let wrote_screen = result
        .passes
        .iter()
        .any(|p| p.output_target == OutputTarget::Screen);
    if !wrote_screen && !result.passes.is_empty() {
        result.passes.push(present_pass(&target_node.id));
    }

    result
}

/// Decide which reachable nodes render as their own GPU passes. A node gets
/// a pass when it produces an image, is the render target, reads its own
/// previous frame, or feeds a sampler port (sampling requires rendered
/// pixels, so the producer is promoted even if its output type is numeric).
fn split_pass_nodes(
    nodes: &[ShaderNode],
    root_edges: &[Edge],
    reachable: &HashSet<String>,
    target: &str,
) -> HashSet<String> {
    let by_id = crate::graph::nodes_by_id(nodes);
    let mut pass_nodes = HashSet::new();
    for id in reachable {
        let Some(node) = by_id.get(id.as_str()) else {
            continue;
        };
        match node.kind {
            NodeKind::GlobalVar | NodeKind::GraphInputProxy | NodeKind::GraphOutputProxy => {
                continue;
            }
            _ => {}
        }
        let feedback = root_edges
            .iter()
            .any(|e| e.is_feedback() && e.to.node_id == *id);
        let feeds_sampler = root_edges.iter().any(|e| {
            e.from.node_id == *id
                && !e.is_feedback()
                && reachable.contains(&e.to.node_id)
                && by_id
                    .get(e.to.node_id.as_str())
                    .and_then(|n| n.input_port(&e.to.port_id))
                    .is_some_and(|p| p.ty.is_sampler())
        });
        if node.produces_image() || *id == target || feedback || feeds_sampler {
            pass_nodes.insert(id.clone());
        }
    }
    pass_nodes
}

fn assemble_node(
    nodes: &[ShaderNode],
    edges: &[Edge],
    pass_nodes: &HashSet<String>,
    node: &ShaderNode,
    is_target: bool,
) -> Result<Vec<CompiledPass>> {
    match node.kind {
        NodeKind::MultiPass => assemble_multi_pass(nodes, edges, pass_nodes, node, is_target),
        NodeKind::Standard | NodeKind::Compound => {
            let has_feedback = edges
                .iter()
                .any(|e| e.is_feedback() && e.to.node_id == node.id);
            let output_target = if has_feedback {
                OutputTarget::FeedbackSlot(node.id.clone())
            } else if is_target {
                OutputTarget::Screen
            } else {
                OutputTarget::NodeOutput(node.id.clone())
            };
            assemble_single_pass(nodes, edges, pass_nodes, node, output_target)
        }
        _ => bail!("node '{}' cannot render a pass", node.id),
    }
}

fn assemble_single_pass(
    nodes: &[ShaderNode],
    edges: &[Edge],
    pass_nodes: &HashSet<String>,
    node: &ShaderNode,
    output_target: OutputTarget,
) -> Result<Vec<CompiledPass>> {
    let mut ctx = InlineCtx::scoped(nodes, edges, pass_nodes, None);
    let mut asm = PassAssembly::default();

    let fragment = match node.kind {
        NodeKind::Standard => {
            let source = node
                .source
                .as_deref()
                .ok_or_else(|| anyhow!("node '{}' has no source", node.id))?;
            let parsed = parse_signatures(source);
            if !parsed.valid {
                bail!("node '{}' has no parsable run overload", node.id);
            }
            let idx = node
                .selected_overload
                .unwrap_or(0)
                .min(parsed.signatures.len() - 1);
            let sig = &parsed.signatures[idx];
            emit_run_call(&mut ctx, &mut asm, node, &sig.params, "run", "r")?;
            build_fragment(&asm, Some(source))
        }
        NodeKind::Compound => {
            let fn_name = emit_compound_fn(&mut ctx, &mut asm, node)?;
            let sig_params: Vec<_> = node
                .inputs
                .iter()
                .map(|p| crate::signature::SignatureParam {
                    name: p.id.clone(),
                    ty: p.ty.clone(),
                    direction: ParamDirection::In,
                })
                .chain(node.outputs.iter().map(|p| crate::signature::SignatureParam {
                    name: p.id.clone(),
                    ty: p.ty.clone(),
                    direction: ParamDirection::Out,
                }))
                .collect();
            emit_run_call(&mut ctx, &mut asm, node, &sig_params, &fn_name, "r")?;
            build_fragment(&asm, None)
        }
        _ => bail!("node '{}' cannot render a single pass", node.id),
    };

    Ok(compiled(node, node.id.clone(), fragment, asm, output_target))
}

/// Push the arg evaluation, out-param declarations, the call itself and the
/// final `frag_color` write for one `run`-style invocation.
fn emit_run_call(
    ctx: &mut InlineCtx<'_>,
    asm: &mut PassAssembly,
    node: &ShaderNode,
    params: &[crate::signature::SignatureParam],
    fn_name: &str,
    local_prefix: &str,
) -> Result<()> {
    let mut args = Vec::with_capacity(params.len());
    let mut first_out: Option<(String, crate::types::GlslType)> = None;
    for param in params {
        match param.direction {
            ParamDirection::In => {
                let port = node
                    .input_port(&param.name)
                    .cloned()
                    .unwrap_or_else(|| NodePort {
                        id: param.name.clone(),
                        name: None,
                        ty: param.ty.clone(),
                    });
                args.push(input_expr(ctx, asm, node, &port, true)?);
            }
            ParamDirection::Out => {
                let local = format!("{local_prefix}_{}", sanitize_ident(&param.name));
                asm.statements.push(format!("{};", decl(&param.ty, &local)));
                if first_out.is_none() {
                    first_out = Some((local.clone(), param.ty.clone()));
                }
                args.push(local);
            }
        }
    }
    let (out_local, out_ty) =
        first_out.ok_or_else(|| anyhow!("node '{}' has no outputs to render", node.id))?;
    asm.statements.push(format!("{fn_name}({});", args.join(", ")));
    asm.statements.push(format!(
        "vec4 sf_color = {};",
        to_vec4_color(&out_local, &out_ty)
    ));
    asm.statements
        .push("frag_color = vec4(sf_color.rgb, sf_color.a * sf_opacity);".to_string());
    Ok(())
}

fn assemble_multi_pass(
    nodes: &[ShaderNode],
    edges: &[Edge],
    pass_nodes: &HashSet<String>,
    node: &ShaderNode,
    is_target: bool,
) -> Result<Vec<CompiledPass>> {
    if node.passes.is_empty() {
        bail!("multi-pass node '{}' declares no passes", node.id);
    }
    let mut out = Vec::with_capacity(node.passes.len());
    let last = node.passes.len() - 1;
    for (pass_idx, node_pass) in node.passes.iter().enumerate() {
        let mut ctx = InlineCtx::scoped(nodes, edges, pass_nodes, None);
        let mut asm = PassAssembly::default();

        let source = node_pass.source.as_str();
        let parsed = parse_signatures(source);
        if !parsed.valid {
            bail!(
                "pass '{}' of node '{}' has no parsable run overload",
                node_pass.id,
                node.id
            );
        }
        let sig = parsed.signatures[0].clone();

        let mut args = Vec::with_capacity(sig.params.len());
        let mut first_out: Option<(String, crate::types::GlslType)> = None;
        for param in &sig.params {
            match param.direction {
                ParamDirection::In => {
                    // Earlier sibling passes win over node ports; a param
                    // named after one samples its intermediate buffer.
                    if let Some(key) =
                        intra_pass_key(node, &node.passes[..pass_idx], &param.name)
                    {
                        let name = format!("u_t_{}", sanitize_ident(&param.name));
                        args.push(inline::bind_sampler(
                            &mut asm,
                            name,
                            TextureSource::NodeOutput(key),
                            &param.ty,
                        ));
                        continue;
                    }
                    let port = node
                        .input_port(&param.name)
                        .cloned()
                        .unwrap_or_else(|| NodePort {
                            id: param.name.clone(),
                            name: None,
                            ty: param.ty.clone(),
                        });
                    args.push(input_expr(&mut ctx, &mut asm, node, &port, true)?);
                }
                ParamDirection::Out => {
                    let local = format!("r_{}", sanitize_ident(&param.name));
                    asm.statements.push(format!("{};", decl(&param.ty, &local)));
                    if first_out.is_none() {
                        first_out = Some((local.clone(), param.ty.clone()));
                    }
                    args.push(local);
                }
            }
        }
        let (out_local, out_ty) = first_out.ok_or_else(|| {
            anyhow!("pass '{}' of node '{}' has no outputs", node_pass.id, node.id)
        })?;
        asm.statements.push(format!("run({});", args.join(", ")));
        asm.statements.push(format!(
            "vec4 sf_color = {};",
            to_vec4_color(&out_local, &out_ty)
        ));
        asm.statements
            .push("frag_color = vec4(sf_color.rgb, sf_color.a * sf_opacity);".to_string());

        let output_target = match &node_pass.target {
            NodePassTarget::Feedback => OutputTarget::FeedbackSlot(node.id.clone()),
            NodePassTarget::Buffer(name) => {
                OutputTarget::NodeOutput(format!("{}/{}", node.id, name))
            }
            NodePassTarget::Output => {
                if pass_idx == last {
                    if is_target {
                        OutputTarget::Screen
                    } else {
                        OutputTarget::NodeOutput(node.id.clone())
                    }
                } else {
                    OutputTarget::NodeOutput(format!("{}/{}", node.id, node_pass.id))
                }
            }
        };

        let fragment = build_fragment(&asm, Some(source));
        let pass_id = format!("{}/{}", node.id, node_pass.id);
        out.extend(compiled(node, pass_id, fragment, asm, output_target));
    }
    Ok(out)
}

/// The intermediate-buffer key a pass param refers to, if it names an
/// earlier sibling pass (by pass id or by its `Buffer` target name).
fn intra_pass_key(node: &ShaderNode, earlier: &[NodePass], param: &str) -> Option<String> {
    for pass in earlier {
        let matches = pass.id == param
            || matches!(&pass.target, NodePassTarget::Buffer(name) if name == param);
        if matches {
            return Some(match &pass.target {
                NodePassTarget::Buffer(name) => format!("{}/{}", node.id, name),
                _ => format!("{}/{}", node.id, pass.id),
            });
        }
    }
    None
}

fn compiled(
    node: &ShaderNode,
    pass_id: String,
    fragment: String,
    asm: PassAssembly,
    output_target: OutputTarget,
) -> Vec<CompiledPass> {
    let uniforms: BTreeMap<_, _> = asm
        .uniforms
        .into_iter()
        .map(|(name, (_, value))| (name, value))
        .collect();
    let input_textures: BTreeMap<_, _> = asm
        .samplers
        .into_iter()
        .map(|(name, binding)| (name, binding.source))
        .collect();
    vec![CompiledPass {
        id: pass_id,
        node_id: node.id.clone(),
        vertex_source: VERTEX_SOURCE.to_string(),
        fragment_source: fragment,
        uniforms,
        input_textures,
        output_target,
    }]
}

/// Trailing screen copy for a target whose own passes all land offscreen
/// (a feedback-writing tail pass, typically).
fn present_pass(target: &str) -> CompiledPass {
    let mut asm = PassAssembly::default();
    inline::bind_sampler(
        &mut asm,
        "u_t_src".to_string(),
        TextureSource::NodeOutput(target.to_string()),
        &crate::types::GlslType::Sampler2D,
    );
    asm.statements
        .push("vec4 sf_color = texture(u_t_src, v_uv - sf_offset);".to_string());
    asm.statements
        .push("frag_color = vec4(sf_color.rgb, sf_color.a * sf_opacity);".to_string());
    let fragment = build_fragment(&asm, None);
    CompiledPass {
        id: format!("{target}/present"),
        node_id: target.to_string(),
        vertex_source: VERTEX_SOURCE.to_string(),
        fragment_source: fragment,
        uniforms: BTreeMap::new(),
        input_textures: [(
            "u_t_src".to_string(),
            TextureSource::NodeOutput(target.to_string()),
        )]
        .into(),
        output_target: OutputTarget::Screen,
    }
}
