//! Graph builders shared by the integration tests.

use shaderflow::graph::{NodeKind, NodePass, NodePassTarget, NodePort};
use shaderflow::{Edge, GlslType, ShaderNode, UniformValue};

/// A node that renders an image: samples nothing, writes a solid color.
pub fn image_node(id: &str) -> ShaderNode {
    let mut n = ShaderNode::new(id, NodeKind::Standard);
    n.source = Some(
        "void run(in vec2 uv, out vec4 color) { color = vec4(uv, 0.5, 1.0); }".to_string(),
    );
    n.inputs.push(NodePort::new("uv", GlslType::Vec2));
    n.outputs.push(NodePort::new("color", GlslType::Vec4));
    n.output_type = Some(GlslType::Sampler2D);
    n
}

/// An image filter: one sampler input, one image output.
pub fn filter_node(id: &str) -> ShaderNode {
    let mut n = ShaderNode::new(id, NodeKind::Standard);
    n.source = Some(
        "void run(in sampler2D src, in vec2 uv, out vec4 color) { color = texture(src, uv); }"
            .to_string(),
    );
    n.inputs.push(NodePort::new("src", GlslType::Sampler2D));
    n.inputs.push(NodePort::new("uv", GlslType::Vec2));
    n.outputs.push(NodePort::new("color", GlslType::Vec4));
    n.output_type = Some(GlslType::Sampler2D);
    n
}

/// A pure value node: two floats in, one float out.
pub fn add_node(id: &str) -> ShaderNode {
    let mut n = ShaderNode::new(id, NodeKind::Standard);
    n.source = Some("void run(in float a, in float b, out float sum) { sum = a + b; }".to_string());
    n.inputs.push(NodePort::new("a", GlslType::Float));
    n.inputs.push(NodePort::new("b", GlslType::Float));
    n.outputs.push(NodePort::new("sum", GlslType::Float));
    n.output_type = Some(GlslType::Float);
    n
}

/// A float constant.
pub fn const_node(id: &str, value: f32) -> ShaderNode {
    let mut n = ShaderNode::new(id, NodeKind::GlobalVar);
    n.outputs.push(NodePort::new("value", GlslType::Float));
    n.uniforms
        .insert("value".to_string(), UniformValue::Float(value));
    n.output_type = Some(GlslType::Float);
    n
}

/// A self-feedback simulation node: reads its previous frame on `prev`.
pub fn feedback_node(id: &str) -> ShaderNode {
    let mut n = ShaderNode::new(id, NodeKind::Standard);
    n.source = Some(
        "void run(in sampler2D prev, in vec2 uv, out vec4 color) { color = texture(prev, uv) * 0.95; }"
            .to_string(),
    );
    n.inputs.push(NodePort::new("prev", GlslType::Sampler2D));
    n.inputs.push(NodePort::new("uv", GlslType::Vec2));
    n.outputs.push(NodePort::new("color", GlslType::Vec4));
    n.output_type = Some(GlslType::Sampler2D);
    n
}

/// A two-pass separable blur; the second pass samples the first's buffer
/// through a param named after the first pass.
pub fn blur_multipass(id: &str) -> ShaderNode {
    let mut n = ShaderNode::new(id, NodeKind::MultiPass);
    n.inputs.push(NodePort::new("src", GlslType::Sampler2D));
    n.outputs.push(NodePort::new("color", GlslType::Vec4));
    n.passes.push(NodePass {
        id: "horizontal".to_string(),
        name: None,
        source:
            "void run(in sampler2D src, in vec2 uv, out vec4 color) { color = texture(src, uv); }"
                .to_string(),
        target: NodePassTarget::Output,
    });
    n.passes.push(NodePass {
        id: "vertical".to_string(),
        name: None,
        source:
            "void run(in sampler2D horizontal, in vec2 uv, out vec4 color) { color = texture(horizontal, uv); }"
                .to_string(),
        target: NodePassTarget::Output,
    });
    n
}

pub fn edge(id: &str, from: &str, from_port: &str, to: &str, to_port: &str) -> Edge {
    Edge::new(id, from, from_port, to, to_port)
}
