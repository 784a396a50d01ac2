//! shaderflow: a node-graph shader compiler and multi-pass GPU execution
//! engine.
//!
//! A graph of [`graph::ShaderNode`]s wired by [`graph::Edge`]s compiles via
//! [`compiler::compile_graph`] into an ordered list of full-screen passes,
//! which [`engine::RenderEngine`] executes against any [`engine::gpu::GpuBackend`].
//! Node GLSL exposes typed `run(...)` overloads parsed by [`signature`];
//! [`infer`] propagates port types across edges and prunes connections the
//! cast rules refuse.

pub mod asset_store;
pub mod compiler;
pub mod engine;
pub mod graph;
pub mod infer;
pub mod signature;
pub mod types;
pub mod validation;

pub use asset_store::{AssetData, AssetStore};
pub use compiler::{CompilationResult, CompileError, CompiledPass, OutputTarget, compile_graph};
pub use engine::{EngineConfig, RenderEngine, RenderOptions};
pub use graph::{Edge, NodeKind, ShaderNode};
pub use infer::infer_types;
pub use signature::parse_signatures;
pub use types::{GlslType, TextureSource, UniformValue, can_cast};
