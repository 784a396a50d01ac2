//! Graph snapshot data model: nodes, edges and lookup helpers.
//!
//! The editor owns and mutates these structures; the compiler and type
//! inference only ever read snapshots of them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{GlslType, UniformValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    /// A node with a single GLSL source exposing one or more `run` overloads.
    Standard,
    /// A grouped subgraph bounded by input/output proxies, compiled into one
    /// reusable function.
    Compound,
    /// A node with an ordered list of internal render passes.
    MultiPass,
    /// Stands in for a compound's external inputs inside its scope.
    GraphInputProxy,
    /// Stands in for a compound's external output inside its scope.
    GraphOutputProxy,
    /// A plain stored value exposed as a single output (constants, globals).
    GlobalVar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePort {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub ty: GlslType,
}

impl NodePort {
    pub fn new(id: impl Into<String>, ty: GlslType) -> Self {
        let id = id.into();
        Self {
            name: Some(id.clone()),
            id,
            ty,
        }
    }
}

/// Where one internal pass of a multi-pass node writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodePassTarget {
    /// The node's externally visible output.
    Output,
    /// A named intermediate buffer other passes of the same node may sample.
    Buffer(String),
    /// The node's ping-pong feedback slot (previous-frame self read).
    Feedback,
}

impl Default for NodePassTarget {
    fn default() -> Self {
        NodePassTarget::Output
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePass {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub source: String,
    #[serde(default)]
    pub target: NodePassTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShaderNode {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub inputs: Vec<NodePort>,
    #[serde(default)]
    pub outputs: Vec<NodePort>,
    /// Stored literal values for unconnected inputs, keyed by input port id.
    #[serde(default)]
    pub uniforms: HashMap<String, UniformValue>,
    /// GLSL source for `Standard` nodes.
    #[serde(default)]
    pub source: Option<String>,
    /// Ordered internal passes for `MultiPass` nodes.
    #[serde(default)]
    pub passes: Vec<NodePass>,
    /// Owning compound node id, or `None` for the root graph.
    #[serde(default)]
    pub scope: Option<String>,
    /// Declared or inferred type of the node's primary output.
    #[serde(default)]
    pub output_type: Option<GlslType>,
    /// Index of the currently active `run` overload. Kept sticky across
    /// unrelated graph edits so literal values on its inputs survive.
    #[serde(default)]
    pub selected_overload: Option<usize>,
}

impl ShaderNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            uniforms: HashMap::new(),
            source: None,
            passes: Vec::new(),
            scope: None,
            output_type: None,
            selected_overload: None,
        }
    }

    pub fn output_port(&self, port_id: &str) -> Option<&NodePort> {
        self.outputs.iter().find(|p| p.id == port_id)
    }

    pub fn input_port(&self, port_id: &str) -> Option<&NodePort> {
        self.inputs.iter().find(|p| p.id == port_id)
    }

    /// The type of the node's primary (first) output, preferring the
    /// explicitly declared/inferred `output_type`.
    pub fn primary_output_type(&self) -> Option<&GlslType> {
        self.output_type
            .as_ref()
            .or_else(|| self.outputs.first().map(|p| &p.ty))
    }

    /// Whether this node renders an image of its own (and therefore becomes
    /// one or more GPU passes) rather than inlining into its consumers.
    pub fn produces_image(&self) -> bool {
        match self.kind {
            NodeKind::MultiPass => true,
            NodeKind::GraphInputProxy | NodeKind::GraphOutputProxy | NodeKind::GlobalVar => false,
            NodeKind::Standard | NodeKind::Compound => self
                .primary_output_type()
                .is_some_and(|ty| ty.is_sampler()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub node_id: String,
    pub port_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from: Endpoint,
    pub to: Endpoint,
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        from_node: impl Into<String>,
        from_port: impl Into<String>,
        to_node: impl Into<String>,
        to_port: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            from: Endpoint {
                node_id: from_node.into(),
                port_id: from_port.into(),
            },
            to: Endpoint {
                node_id: to_node.into(),
                port_id: to_port.into(),
            },
        }
    }

    /// A feedback edge reads a node's own previous-frame output: both
    /// endpoints live on the same node.
    pub fn is_feedback(&self) -> bool {
        self.from.node_id == self.to.node_id
    }
}

pub fn nodes_by_id(nodes: &[ShaderNode]) -> HashMap<&str, &ShaderNode> {
    nodes.iter().map(|n| (n.id.as_str(), n)).collect()
}

/// The edge (if any) driving `to_node.to_port`. Inputs accept at most one
/// incoming edge; if the editor ever produces more, the first in edge order
/// wins deterministically.
pub fn incoming_edge<'a>(edges: &'a [Edge], to_node: &str, to_port: &str) -> Option<&'a Edge> {
    edges
        .iter()
        .find(|e| e.to.node_id == to_node && e.to.port_id == to_port)
}

/// Replace characters that cannot appear in a GLSL identifier, prefixing a
/// leading digit. Distinct ids can collide after sanitizing; compiled pass
/// naming always pairs the sanitized form with the full id where uniqueness
/// matters.
pub fn sanitize_ident(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for (i, c) in raw.chars().enumerate() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if i == 0 && c.is_ascii_digit() {
                out.push('n');
            }
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incoming_edge_matches_node_and_port() {
        let edges = vec![
            Edge::new("e1", "a", "out", "b", "x"),
            Edge::new("e2", "a", "out", "b", "y"),
        ];
        assert_eq!(
            incoming_edge(&edges, "b", "y").map(|e| e.id.as_str()),
            Some("e2")
        );
        assert!(incoming_edge(&edges, "b", "z").is_none());
    }

    #[test]
    fn feedback_edge_is_a_self_loop() {
        assert!(Edge::new("e", "a", "out", "a", "prev").is_feedback());
        assert!(!Edge::new("e", "a", "out", "b", "prev").is_feedback());
    }

    #[test]
    fn sanitize_ident_produces_valid_glsl_identifiers() {
        assert_eq!(sanitize_ident("Blur Pass-2"), "Blur_Pass_2");
        assert_eq!(sanitize_ident("9lives"), "n9lives");
        assert_eq!(sanitize_ident(""), "n");
    }
}
