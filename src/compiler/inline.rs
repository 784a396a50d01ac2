//! Per-pass shader assembly state and value-node inlining.
//!
//! Nodes whose outputs are plain numeric values do not get GPU passes of
//! their own. Their GLSL is carried into each consuming pass as a renamed
//! helper function, their unconnected inputs become namespaced uniforms,
//! and their call results are cached in local variables so a node feeding
//! two ports of the same consumer still runs once.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Context, Result, anyhow, bail};

use crate::graph::{Edge, NodeKind, NodePort, ShaderNode, sanitize_ident};
use crate::signature::{ParamDirection, Signature, parse_signatures};
use crate::types::{GlslType, TextureSource, UniformValue};

use super::emit::{cast_expr, decl, helper_fn_name, rename_run};

/// One sampler uniform of the fragment shader under construction.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SamplerBinding {
    pub source: TextureSource,
    pub cube: bool,
}

/// Mutable state of the fragment shader being assembled for one pass.
#[derive(Debug, Default)]
pub(crate) struct PassAssembly {
    /// `main()` body statements, in emission order.
    pub statements: Vec<String>,
    /// Complete helper function definitions.
    pub helpers: Vec<String>,
    /// Helper fn names already emitted, so shared upstream nodes inline once.
    pub helper_names: HashSet<String>,
    /// Literal uniforms; sorted map so block declaration order is stable.
    pub uniforms: BTreeMap<String, (GlslType, UniformValue)>,
    /// Sampler uniforms; sorted for stable binding slot assignment.
    pub samplers: BTreeMap<String, SamplerBinding>,
    /// Memoized value-node results: (scope key, output port) -> expression.
    locals: HashMap<(String, String), String>,
}

/// Graph view the inliner walks: the current scope's nodes and edges, plus
/// the compile-wide facts that do not change per scope.
pub(crate) struct InlineCtx<'a> {
    /// All nodes of the graph, every scope included.
    pub all_nodes: &'a [ShaderNode],
    pub all_edges: &'a [Edge],
    /// Nodes visible in the current scope, by id.
    pub nodes: HashMap<&'a str, &'a ShaderNode>,
    /// Edges whose endpoints both live in the current scope.
    pub edges: Vec<&'a Edge>,
    /// Node ids the compiler decided to render as their own passes.
    pub pass_nodes: &'a HashSet<String>,
    visiting: HashSet<String>,
}

impl<'a> InlineCtx<'a> {
    /// View of one scope: `None` is the root graph, `Some(id)` the interior
    /// of a compound node.
    pub fn scoped(
        all_nodes: &'a [ShaderNode],
        all_edges: &'a [Edge],
        pass_nodes: &'a HashSet<String>,
        scope: Option<&str>,
    ) -> Self {
        let nodes: HashMap<&str, &ShaderNode> = all_nodes
            .iter()
            .filter(|n| n.scope.as_deref() == scope)
            .map(|n| (n.id.as_str(), n))
            .collect();
        let edges = all_edges
            .iter()
            .filter(|e| {
                nodes.contains_key(e.from.node_id.as_str())
                    && nodes.contains_key(e.to.node_id.as_str())
            })
            .collect();
        Self {
            all_nodes,
            all_edges,
            nodes,
            edges,
            pass_nodes,
            visiting: HashSet::new(),
        }
    }

    fn incoming(&self, node_id: &str, port_id: &str) -> Option<&'a Edge> {
        self.edges
            .iter()
            .find(|e| e.to.node_id == node_id && e.to.port_id == port_id)
            .copied()
    }

    fn node(&self, id: &str) -> Result<&'a ShaderNode> {
        self.nodes
            .get(id)
            .copied()
            .ok_or_else(|| anyhow!("edge references unknown node '{id}'"))
    }
}

/// Identifier fragment unique to a node across scopes, used in uniform and
/// local names.
pub(crate) fn scoped_ident(node: &ShaderNode) -> String {
    match &node.scope {
        Some(scope) => format!("{}__{}", sanitize_ident(scope), sanitize_ident(&node.id)),
        None => sanitize_ident(&node.id),
    }
}

/// Memoization key for a node; raw ids, so sanitizer collisions cannot
/// alias two different nodes.
fn scope_key(node: &ShaderNode) -> String {
    format!("{}\u{0}{}", node.scope.as_deref().unwrap_or(""), node.id)
}

fn uniform_name(own: bool, node: &ShaderNode, port_id: &str) -> String {
    if own {
        format!("u_{}", sanitize_ident(port_id))
    } else {
        format!("u_n_{}_{}", scoped_ident(node), sanitize_ident(port_id))
    }
}

fn sampler_name(own: bool, node: &ShaderNode, port_id: &str) -> String {
    if own {
        format!("u_t_{}", sanitize_ident(port_id))
    } else {
        format!("u_t_{}_{}", scoped_ident(node), sanitize_ident(port_id))
    }
}

/// Register a sampler uniform and return the expression reading it: the
/// sampler name itself for sampler-typed consumers, otherwise a `texture`
/// fetch cast down to the consumer's numeric type.
pub(crate) fn bind_sampler(
    asm: &mut PassAssembly,
    name: String,
    source: TextureSource,
    ty: &GlslType,
) -> String {
    sampler_read(asm, name, source, ty)
}

fn sampler_read(
    asm: &mut PassAssembly,
    name: String,
    source: TextureSource,
    ty: &GlslType,
) -> String {
    let cube = matches!(ty, GlslType::SamplerCube);
    let read = if ty.is_sampler() {
        name.clone()
    } else {
        cast_expr(
            &format!("texture({name}, v_uv)"),
            &GlslType::Vec4,
            ty,
        )
    };
    asm.samplers.insert(name, SamplerBinding { source, cube });
    read
}

/// Seed a compound input proxy's output so inner nodes resolve it to the
/// enclosing function's parameter instead of trying to inline past the
/// scope boundary.
pub(crate) fn seed_local(asm: &mut PassAssembly, proxy: &ShaderNode, port_id: &str, expr: String) {
    asm.locals.insert((scope_key(proxy), port_id.to_string()), expr);
}

/// Resolve one input port of `node` to a GLSL expression, registering any
/// uniforms, samplers, helpers and statements it needs. `own` marks the
/// pass's root node, whose uniforms keep short unprefixed names.
pub(crate) fn input_expr(
    ctx: &mut InlineCtx<'_>,
    asm: &mut PassAssembly,
    node: &ShaderNode,
    port: &NodePort,
    own: bool,
) -> Result<String> {
    if let Some(edge) = ctx.incoming(&node.id, &port.id) {
        if edge.is_feedback() {
            let name = sampler_name(own, node, &port.id);
            return Ok(sampler_read(
                asm,
                name,
                TextureSource::FeedbackSlot(node.id.clone()),
                &port.ty,
            ));
        }
        let src = ctx.node(&edge.from.node_id)?;
        if src.kind == NodeKind::GlobalVar && port.ty.is_sampler() {
            // A texture-valued global binds its reference straight into the
            // slot; no pass is involved.
            let source = match src
                .uniforms
                .get(&edge.from.port_id)
                .or_else(|| src.uniforms.get("value"))
            {
                Some(UniformValue::Texture(s)) => s.clone(),
                _ => TextureSource::Builtin("black".to_string()),
            };
            let name = sampler_name(own, node, &port.id);
            return Ok(sampler_read(asm, name, source, &port.ty));
        }
        if ctx.pass_nodes.contains(&src.id) {
            let name = sampler_name(own, node, &port.id);
            return Ok(sampler_read(
                asm,
                name,
                TextureSource::NodeOutput(src.id.clone()),
                &port.ty,
            ));
        }
        if port.ty.is_sampler() {
            // can_cast admits this wiring, but a raw value has no pixels to
            // sample; the pass-split promotes every value node feeding a
            // sampler port, so reaching here means the split missed it.
            bail!(
                "value output '{}:{}' cannot feed texture input '{}'",
                src.id,
                edge.from.port_id,
                port.id
            );
        }
        let expr = value_output_expr(ctx, asm, src, &edge.from.port_id)
            .with_context(|| format!("while inlining node '{}'", src.id))?;
        let src_ty = src
            .output_port(&edge.from.port_id)
            .map(|p| p.ty.clone())
            .or_else(|| src.primary_output_type().cloned())
            .unwrap_or(GlslType::Float);
        return Ok(cast_expr(&expr, &src_ty, &port.ty));
    }

    // Unconnected: reserved names bind engine builtins, samplers bind their
    // stored texture reference, everything else becomes a literal uniform.
    match (port.id.as_str(), &port.ty) {
        ("uv", GlslType::Vec2) => return Ok("(v_uv - sf_offset)".to_string()),
        ("time", GlslType::Float) => return Ok("sf_time".to_string()),
        ("resolution", GlslType::Vec2) => return Ok("sf_resolution".to_string()),
        _ => {}
    }

    if port.ty.is_sampler() {
        let source = match node.uniforms.get(&port.id) {
            Some(UniformValue::Texture(src)) => src.clone(),
            _ => TextureSource::Builtin("black".to_string()),
        };
        let name = sampler_name(own, node, &port.id);
        return Ok(sampler_read(asm, name, source, &port.ty));
    }

    let name = uniform_name(own, node, &port.id);
    let value = node
        .uniforms
        .get(&port.id)
        .filter(|v| stored_matches(v, &port.ty))
        .cloned()
        .unwrap_or_else(|| UniformValue::default_for(&port.ty));
    asm.uniforms.insert(name.clone(), (port.ty.clone(), value));
    Ok(name)
}

fn stored_matches(value: &UniformValue, ty: &GlslType) -> bool {
    match ty {
        GlslType::Array(..) => matches!(
            value,
            UniformValue::FloatArray(_)
                | UniformValue::IntArray(_)
                | UniformValue::Vec2Array(_)
                | UniformValue::Vec3Array(_)
                | UniformValue::Vec4Array(_)
        ),
        _ => value.glsl_type().as_ref() == Some(ty),
    }
}

/// Expression for output `out_port` of the value node `src`, inlining its
/// GLSL into the assembly on first use.
pub(crate) fn value_output_expr(
    ctx: &mut InlineCtx<'_>,
    asm: &mut PassAssembly,
    src: &ShaderNode,
    out_port: &str,
) -> Result<String> {
    let key = (scope_key(src), out_port.to_string());
    if let Some(expr) = asm.locals.get(&key) {
        return Ok(expr.clone());
    }

    match src.kind {
        NodeKind::GlobalVar => {
            let ty = src
                .output_port(out_port)
                .map(|p| p.ty.clone())
                .or_else(|| {
                    src.uniforms
                        .get(out_port)
                        .or_else(|| src.uniforms.get("value"))
                        .and_then(|v| v.glsl_type())
                })
                .unwrap_or(GlslType::Float);
            let value = src
                .uniforms
                .get(out_port)
                .or_else(|| src.uniforms.get("value"))
                .filter(|v| stored_matches(v, &ty))
                .cloned()
                .unwrap_or_else(|| UniformValue::default_for(&ty));
            let name = format!("u_n_{}_{}", scoped_ident(src), sanitize_ident(out_port));
            asm.uniforms.insert(name.clone(), (ty, value));
            asm.locals.insert(key, name.clone());
            Ok(name)
        }
        NodeKind::GraphInputProxy => bail!(
            "input '{out_port}' of compound scope '{}' is not wired through",
            src.scope.as_deref().unwrap_or("?")
        ),
        NodeKind::GraphOutputProxy => bail!("output proxy '{}' cannot be a source", src.id),
        NodeKind::MultiPass => bail!(
            "multi-pass node '{}' must render before it can be read",
            src.id
        ),
        NodeKind::Standard => inline_function_node(ctx, asm, src, out_port, None),
        NodeKind::Compound => {
            let fn_name = emit_compound_fn(ctx, asm, src)?;
            inline_function_node(ctx, asm, src, out_port, Some(fn_name))
        }
    }
}

/// Emit the helper call pattern shared by standard and compound value
/// nodes: declare out locals, evaluate input args, call, memoize outputs.
fn inline_function_node(
    ctx: &mut InlineCtx<'_>,
    asm: &mut PassAssembly,
    src: &ShaderNode,
    out_port: &str,
    compound_fn: Option<String>,
) -> Result<String> {
    let key = scope_key(src);
    if !ctx.visiting.insert(key.clone()) {
        bail!("cyclic wiring through node '{}'", src.id);
    }

    let result = (|| {
        let (fn_name, sig) = match compound_fn {
            Some(fn_name) => (fn_name, compound_signature(src)),
            None => {
                let source = src
                    .source
                    .as_deref()
                    .ok_or_else(|| anyhow!("node '{}' has no source", src.id))?;
                let parsed = parse_signatures(source);
                if !parsed.valid {
                    bail!("node '{}' has no parsable run overload", src.id);
                }
                let idx = src
                    .selected_overload
                    .unwrap_or(0)
                    .min(parsed.signatures.len() - 1);
                let sig = parsed.signatures[idx].clone();

                let fn_name = helper_fn_name(src.scope.as_deref(), &src.id);
                if asm.helper_names.insert(fn_name.clone()) {
                    asm.helpers.push(rename_run(source, &fn_name));
                }
                (fn_name, sig)
            }
        };

        if sig.outputs.is_empty() {
            bail!("node '{}' has no outputs to read", src.id);
        }

        let ident = scoped_ident(src);
        let mut args = Vec::with_capacity(sig.params.len());
        for param in &sig.params {
            match param.direction {
                ParamDirection::In => {
                    let port = NodePort {
                        id: param.name.clone(),
                        name: None,
                        ty: param.ty.clone(),
                    };
                    args.push(input_expr(ctx, asm, src, &port, false)?);
                }
                ParamDirection::Out => {
                    let local = format!("v_{}_{}", ident, sanitize_ident(&param.name));
                    asm.statements.push(format!("{};", decl(&param.ty, &local)));
                    asm.locals
                        .insert((scope_key(src), param.name.clone()), local.clone());
                    args.push(local);
                }
            }
        }
        asm.statements.push(format!("{fn_name}({});", args.join(", ")));

        asm.locals
            .get(&(scope_key(src), out_port.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("node '{}' has no output port '{out_port}'", src.id))
    })();

    ctx.visiting.remove(&key);
    result
}

/// Synthetic signature for a compound node call, derived from its declared
/// ports (inputs first, then outputs, matching the emitted fn).
fn compound_signature(node: &ShaderNode) -> Signature {
    let mut params = Vec::new();
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    for p in &node.inputs {
        let param = crate::signature::SignatureParam {
            name: p.id.clone(),
            ty: p.ty.clone(),
            direction: ParamDirection::In,
        };
        inputs.push(param.clone());
        params.push(param);
    }
    for p in &node.outputs {
        let param = crate::signature::SignatureParam {
            name: p.id.clone(),
            ty: p.ty.clone(),
            direction: ParamDirection::Out,
        };
        outputs.push(param.clone());
        params.push(param);
    }
    Signature {
        label: None,
        order: None,
        inputs,
        outputs,
        params,
    }
}

/// Flatten a compound node's interior into a single GLSL function and emit
/// it as a helper. Returns the function name. Nested compounds recurse;
/// every interior node's uniforms hoist into the enclosing pass.
pub(crate) fn emit_compound_fn(
    ctx: &mut InlineCtx<'_>,
    asm: &mut PassAssembly,
    compound: &ShaderNode,
) -> Result<String> {
    let fn_name = helper_fn_name(compound.scope.as_deref(), &compound.id);
    if asm.helper_names.contains(&fn_name) {
        return Ok(fn_name);
    }
    let guard = scope_key(compound);
    if !ctx.visiting.insert(guard.clone()) {
        bail!("cyclic wiring through compound '{}'", compound.id);
    }

    let result = (|| {
        if let Some(p) = compound.outputs.iter().find(|p| p.ty.is_sampler()) {
            bail!(
                "compound '{}' output '{}' cannot be a texture",
                compound.id,
                p.id
            );
        }
        let mut inner = InlineCtx::scoped(
            ctx.all_nodes,
            ctx.all_edges,
            ctx.pass_nodes,
            Some(compound.id.as_str()),
        );

        let out_proxy = inner
            .nodes
            .values()
            .copied()
            .find(|n| n.kind == NodeKind::GraphOutputProxy)
            .ok_or_else(|| anyhow!("compound '{}' has no output proxy", compound.id))?;

        // Input proxy outputs resolve to the function's parameters.
        let in_proxies: Vec<&ShaderNode> = inner
            .nodes
            .values()
            .copied()
            .filter(|n| n.kind == NodeKind::GraphInputProxy)
            .collect();
        for proxy in &in_proxies {
            for port in &proxy.outputs {
                if compound.input_port(&port.id).is_some() {
                    seed_local(asm, proxy, &port.id, format!("p_{}", sanitize_ident(&port.id)));
                }
            }
        }

        // Build the body against a clean statement buffer; uniforms and
        // helpers keep accumulating into the surrounding pass.
        let saved = std::mem::take(&mut asm.statements);
        let body_result = (|| -> Result<()> {
            for port in &compound.outputs {
                let expr = match inner.incoming(&out_proxy.id, &port.id) {
                    Some(edge) => {
                        let src = inner.node(&edge.from.node_id)?;
                        let expr = value_output_expr(&mut inner, asm, src, &edge.from.port_id)
                            .with_context(|| {
                                format!("while flattening compound '{}'", compound.id)
                            })?;
                        let src_ty = src
                            .output_port(&edge.from.port_id)
                            .map(|p| p.ty.clone())
                            .unwrap_or(GlslType::Float);
                        cast_expr(&expr, &src_ty, &port.ty)
                    }
                    None => {
                        let proxy_port = NodePort {
                            id: port.id.clone(),
                            name: None,
                            ty: port.ty.clone(),
                        };
                        input_expr(&mut inner, asm, out_proxy, &proxy_port, false)?
                    }
                };
                asm.statements
                    .push(format!("o_{} = {expr};", sanitize_ident(&port.id)));
            }
            Ok(())
        })();
        let body = std::mem::replace(&mut asm.statements, saved);
        body_result?;

        let mut params = Vec::new();
        for p in &compound.inputs {
            params.push(format!("in {}", decl(&p.ty, &format!("p_{}", sanitize_ident(&p.id)))));
        }
        for p in &compound.outputs {
            params.push(format!("out {}", decl(&p.ty, &format!("o_{}", sanitize_ident(&p.id)))));
        }

        let mut text = format!("void {fn_name}({}) {{\n", params.join(", "));
        for stmt in &body {
            text.push_str("    ");
            text.push_str(stmt);
            text.push('\n');
        }
        text.push('}');

        asm.helper_names.insert(fn_name.clone());
        asm.helpers.push(text);
        Ok(fn_name.clone())
    })();

    ctx.visiting.remove(&guard);
    result
}
