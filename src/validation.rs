//! Shader translation and validation through naga.
//!
//! Generated pass shaders are GLSL; the GPU backend wants WGSL plus the
//! reflected module for bind group layout. Everything funnels through
//! [`glsl_to_module`] so parse and validation errors surface once, with the
//! offending source attached.

use anyhow::{Context, Result, anyhow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    fn naga(self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

/// Parse and validate one GLSL stage, returning the module and its
/// validation info (needed by both the WGSL writer and reflection).
pub fn glsl_to_module(
    source: &str,
    stage: ShaderStage,
) -> Result<(naga::Module, naga::valid::ModuleInfo)> {
    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options {
        stage: stage.naga(),
        defines: Default::default(),
    };

    let module = frontend
        .parse(&options, source)
        .map_err(|e| anyhow!("GLSL parse failed: {e:?}\n{}", numbered(source)))?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| anyhow!("GLSL validation failed: {e:?}\n{}", numbered(source)))?;

    Ok((module, info))
}

/// Translate one GLSL stage to WGSL.
pub fn glsl_to_wgsl(source: &str, stage: ShaderStage) -> Result<String> {
    let (module, info) = glsl_to_module(source, stage)?;
    naga::back::wgsl::write_string(
        &module,
        &info,
        naga::back::wgsl::WriterFlags::EXPLICIT_TYPES,
    )
    .map_err(|e| anyhow!("WGSL writer failed: {e:?}"))
}

/// Parse WGSL source, with the pass that generated it named in the error.
pub fn validate_wgsl(source: &str, context: &str) -> Result<naga::Module> {
    naga::front::wgsl::parse_str(source)
        .map_err(|e| anyhow!("WGSL parse failed:\n  {e}\n{}", numbered(source)))
        .with_context(|| format!("{context} generated invalid WGSL"))
}

/// Source with line numbers, for readable shader errors in logs.
fn numbered(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + 128);
    for (i, line) in source.lines().enumerate() {
        out.push_str(&format!("{:4} | {}\n", i + 1, line));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_glsl_translates_to_wgsl() {
        let glsl = r#"
#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 frag_color;
void main() {
    frag_color = vec4(v_uv, 0.0, 1.0);
}
"#;
        let wgsl = glsl_to_wgsl(glsl, ShaderStage::Fragment).unwrap();
        assert!(wgsl.contains("@fragment"));
    }

    #[test]
    fn broken_glsl_reports_numbered_source() {
        let err = glsl_to_wgsl("#version 450\nvoid main() { nope; }", ShaderStage::Fragment)
            .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("   2 | "));
    }

    #[test]
    fn wgsl_validation_names_the_context() {
        let err = validate_wgsl("fn broken( -> f32 {}", "pass blur_1").unwrap_err();
        assert!(format!("{err:#}").contains("pass blur_1"));
    }
}
