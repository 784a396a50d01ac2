//! GLSL text assembly: the shared vertex stage, fragment shader layout,
//! implicit numeric casts, and `run` renaming for inlined helper functions.

use crate::graph::sanitize_ident;
use crate::types::GlslType;

use super::inline::PassAssembly;

/// Fullscreen triangle; `v_uv` spans [0,1] over the visible quad.
pub(crate) const VERTEX_SOURCE: &str = "\
#version 450
layout(location = 0) out vec2 v_uv;
void main() {
    vec2 corner = vec2(float((gl_VertexID << 1) & 2), float(gl_VertexID & 2));
    v_uv = corner;
    gl_Position = vec4(corner * 2.0 - 1.0, 0.0, 1.0);
}
";

/// Engine-provided uniforms present in every pass params block, in
/// declaration order. The engine packs these four first and then the pass's
/// own uniforms in sorted-name order; `build_fragment` declares them the
/// same way so both sides agree on std140 offsets.
pub(crate) const RESERVED_UNIFORMS: [(&str, GlslType); 4] = [
    ("sf_time", GlslType::Float),
    ("sf_opacity", GlslType::Float),
    ("sf_resolution", GlslType::Vec2),
    ("sf_offset", GlslType::Vec2),
];

/// GLSL declaration of `name` with type `ty`, array suffix on the name.
pub(crate) fn decl(ty: &GlslType, name: &str) -> String {
    match ty {
        GlslType::Array(elem, n) => format!("{} {}[{}]", elem.glsl(), name, n),
        _ => format!("{} {}", ty.glsl(), name),
    }
}

/// Expression adapting `expr` of type `from` to type `to`, per the numeric
/// cast family: splat scalars up, truncate vectors down, pad with 0 and a
/// final 1 when widening vectors.
pub(crate) fn cast_expr(expr: &str, from: &GlslType, to: &GlslType) -> String {
    use GlslType::*;
    if from == to {
        return expr.to_string();
    }
    match (from, to) {
        (Float, Int) => format!("int({expr})"),
        (Int, Float) => format!("float({expr})"),
        (Float, Vec2) => format!("vec2({expr})"),
        (Float, Vec3) => format!("vec3({expr})"),
        (Float, Vec4) => format!("vec4({expr})"),
        (Int, Vec2) => format!("vec2(float({expr}))"),
        (Int, Vec3) => format!("vec3(float({expr}))"),
        (Int, Vec4) => format!("vec4(float({expr}))"),
        (Vec2 | Vec3 | Vec4, Float) => format!("({expr}).x"),
        (Vec2 | Vec3 | Vec4, Int) => format!("int(({expr}).x)"),
        (Vec2, Vec3) => format!("vec3({expr}, 0.0)"),
        (Vec2, Vec4) => format!("vec4({expr}, 0.0, 1.0)"),
        (Vec3, Vec4) => format!("vec4({expr}, 1.0)"),
        (Vec3, Vec2) => format!("({expr}).xy"),
        (Vec4, Vec2) => format!("({expr}).xy"),
        (Vec4, Vec3) => format!("({expr}).xyz"),
        _ => expr.to_string(),
    }
}

/// Adapt a run output of type `from` to the vec4 written to `frag_color`.
/// Scalars become opaque grayscale, vec2 becomes rg, vec3 gets alpha 1.
pub(crate) fn to_vec4_color(expr: &str, from: &GlslType) -> String {
    use GlslType::*;
    match from {
        Vec4 => expr.to_string(),
        Vec3 => format!("vec4({expr}, 1.0)"),
        Vec2 => format!("vec4({expr}, 0.0, 1.0)"),
        Float => format!("vec4(vec3({expr}), 1.0)"),
        Int => format!("vec4(vec3(float({expr})), 1.0)"),
        _ => "vec4(0.0, 0.0, 0.0, 1.0)".to_string(),
    }
}

/// Rename every identifier occurrence of `run` in `source` to `new_name`,
/// so multiple inlined node sources coexist in one fragment shader.
/// Boundary-checked so `grunt` and `run2` survive untouched.
pub(crate) fn rename_run(source: &str, new_name: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len() + 32);
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"run") {
            let before_ok = i == 0 || !is_ident_byte(bytes[i - 1]);
            let after_ok = i + 3 >= bytes.len() || !is_ident_byte(bytes[i + 3]);
            if before_ok && after_ok {
                out.push_str(new_name);
                i += 3;
                continue;
            }
        }
        // advance one full UTF-8 scalar
        let ch_len = utf8_len(bytes[i]);
        out.push_str(&source[i..i + ch_len]);
        i += ch_len;
    }
    out
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn utf8_len(lead: u8) -> usize {
    match lead {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}

/// Helper-function name for an inlined node, unique per scope chain.
pub(crate) fn helper_fn_name(scope: Option<&str>, node_id: &str) -> String {
    match scope {
        Some(scope) => format!("run_{}__{}", sanitize_ident(scope), sanitize_ident(node_id)),
        None => format!("run_{}", sanitize_ident(node_id)),
    }
}

/// Assemble the final fragment shader for one pass. `node_source` is the
/// pass node's own GLSL (its `run` stays unrenamed; `main` calls it
/// directly); inlined helpers and the uniform interface come from `asm`.
pub(crate) fn build_fragment(asm: &PassAssembly, node_source: Option<&str>) -> String {
    let mut out = String::with_capacity(1024);
    out.push_str("#version 450\n");
    out.push_str("layout(location = 0) in vec2 v_uv;\n");
    out.push_str("layout(location = 0) out vec4 frag_color;\n\n");

    out.push_str("layout(std140, set = 0, binding = 0) uniform PassParams {\n");
    for (name, ty) in RESERVED_UNIFORMS {
        out.push_str(&format!("    {};\n", decl(&ty, name)));
    }
    for (name, (ty, _)) in &asm.uniforms {
        out.push_str(&format!("    {};\n", decl(ty, name)));
    }
    out.push_str("};\n");

    for (binding, (name, sampler)) in asm.samplers.iter().enumerate() {
        let glsl_ty = if sampler.cube { "samplerCube" } else { "sampler2D" };
        out.push_str(&format!(
            "layout(set = 0, binding = {}) uniform {glsl_ty} {name};\n",
            binding + 1
        ));
    }
    out.push('\n');

    for helper in &asm.helpers {
        out.push_str(helper);
        out.push_str("\n\n");
    }

    if let Some(source) = node_source {
        out.push_str(source.trim_end());
        out.push_str("\n\n");
    }

    out.push_str("void main() {\n");
    for stmt in &asm.statements {
        out.push_str("    ");
        out.push_str(stmt);
        out.push('\n');
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_respects_identifier_boundaries() {
        let src = "void run(in float x) { float grunt = run2(x); run(grunt); }";
        let renamed = rename_run(src, "run_blur");
        assert_eq!(
            renamed,
            "void run_blur(in float x) { float grunt = run2(x); run_blur(grunt); }"
        );
    }

    #[test]
    fn cast_widens_and_narrows_vectors() {
        assert_eq!(cast_expr("v", &GlslType::Vec2, &GlslType::Vec4), "vec4(v, 0.0, 1.0)");
        assert_eq!(cast_expr("v", &GlslType::Vec4, &GlslType::Float), "(v).x");
        assert_eq!(cast_expr("x", &GlslType::Float, &GlslType::Vec3), "vec3(x)");
        assert_eq!(cast_expr("x", &GlslType::Float, &GlslType::Float), "x");
    }

    #[test]
    fn array_declarations_put_the_suffix_on_the_name() {
        let ty = GlslType::Array(Box::new(GlslType::Vec2), 8);
        assert_eq!(decl(&ty, "u_taps"), "vec2 u_taps[8]");
    }

    #[test]
    fn color_adaptation_covers_the_numeric_family() {
        assert_eq!(to_vec4_color("c", &GlslType::Vec4), "c");
        assert_eq!(to_vec4_color("c", &GlslType::Vec3), "vec4(c, 1.0)");
        assert_eq!(to_vec4_color("x", &GlslType::Float), "vec4(vec3(x), 1.0)");
    }
}
