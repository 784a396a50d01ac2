//! Output types of graph compilation: immutable value objects handed to the
//! execution engine once per render request.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{TextureSource, UniformValue};

/// Where a compiled pass writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum OutputTarget {
    /// The caller-provided surface at the requested resolution.
    Screen,
    /// A lazily-allocated offscreen framebuffer keyed by this id.
    NodeOutput(String),
    /// The inactive half of the named ping-pong pair; the engine swaps the
    /// active index after the draw so no pass ever reads and writes the
    /// same texture within one draw call.
    FeedbackSlot(String),
}

/// One full-screen GPU program execution producing a single 2D image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledPass {
    /// Deterministic identity: `<node id>` for single-pass nodes,
    /// `<node id>/<pass id>` for multi-pass internals. Stable across
    /// recompiles of an unchanged graph so GPU cache keys stay warm.
    pub id: String,
    /// The node this pass renders for (error attribution, eviction keys).
    pub node_id: String,
    pub vertex_source: String,
    pub fragment_source: String,
    /// Literal uniform values, keyed by the uniform name declared in
    /// `fragment_source`'s params block. Sorted; the declaration order in
    /// the block is reserved uniforms first, then these names in order.
    pub uniforms: BTreeMap<String, UniformValue>,
    /// Sampler uniform name -> texture reference for the engine to resolve.
    pub input_textures: BTreeMap<String, TextureSource>,
    pub output_target: OutputTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileError {
    /// The node whose source or wiring caused the failure, so the editor
    /// can mark just that node instead of blanking the whole preview.
    pub node_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompilationResult {
    /// Dependency-ordered passes; executing them in sequence renders the
    /// requested target.
    pub passes: Vec<CompiledPass>,
    pub error: Option<CompileError>,
}

impl CompilationResult {
    pub fn failure(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            passes: Vec::new(),
            error: Some(CompileError {
                node_id: node_id.into(),
                message: message.into(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Every cache key this compile keeps alive: pass ids, offscreen output
    /// ids, and feedback slot ids. The engine's eviction sweep frees
    /// resources whose keys have been absent from this set for longer than
    /// the retention window.
    pub fn live_keys(&self) -> HashSet<String> {
        let mut keys = HashSet::new();
        for pass in &self.passes {
            keys.insert(pass.id.clone());
            match &pass.output_target {
                OutputTarget::Screen => {}
                OutputTarget::NodeOutput(id) | OutputTarget::FeedbackSlot(id) => {
                    keys.insert(id.clone());
                }
            }
            for source in pass.input_textures.values() {
                match source {
                    TextureSource::NodeOutput(id) | TextureSource::FeedbackSlot(id) => {
                        keys.insert(id.clone());
                    }
                    _ => {}
                }
            }
        }
        keys
    }
}
