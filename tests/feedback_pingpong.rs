mod common;

use common::{edge, feedback_node, filter_node};
use shaderflow::compiler::OutputTarget;
use shaderflow::engine::gpu::{DrawTarget, NullGpu};
use shaderflow::types::TextureSource;
use shaderflow::{AssetStore, EngineConfig, RenderEngine, RenderOptions, compile_graph};

#[test]
fn self_edge_compiles_to_a_feedback_pass_plus_present_copy() {
    let nodes = vec![feedback_node("sim")];
    let edges = vec![edge("e1", "sim", "color", "sim", "prev")];

    let result = compile_graph(&nodes, &edges, "sim");
    assert!(result.is_ok(), "unexpected error: {:?}", result.error);

    let ids: Vec<&str> = result.passes.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["sim", "sim/present"]);
    assert_eq!(
        result.passes[0].output_target,
        OutputTarget::FeedbackSlot("sim".to_string())
    );
    assert_eq!(
        result.passes[0].input_textures.get("u_t_prev"),
        Some(&TextureSource::FeedbackSlot("sim".to_string()))
    );
    assert_eq!(result.passes[1].output_target, OutputTarget::Screen);
    assert_eq!(
        result.passes[1].input_textures.get("u_t_src"),
        Some(&TextureSource::NodeOutput("sim".to_string()))
    );
}

#[test]
fn feedback_halves_alternate_between_frames() {
    let nodes = vec![feedback_node("sim")];
    let edges = vec![edge("e1", "sim", "color", "sim", "prev")];
    let result = compile_graph(&nodes, &edges, "sim");
    assert!(result.is_ok());

    let mut engine = RenderEngine::new(NullGpu::new(), AssetStore::new(), EngineConfig::default());
    let opts = RenderOptions::default();
    engine.render(&result, 64, 64, 0.0, &opts).unwrap();
    engine.render(&result, 64, 64, 0.016, &opts).unwrap();

    let draws = &engine.gpu().draws;
    assert_eq!(draws.len(), 4, "two passes per frame");

    let read_of = |i: usize| draws[i].textures[0].1;
    // The simulation pass reads the opposite half each frame.
    assert_ne!(read_of(0), read_of(2));
    // The present copy shows the half the simulation just wrote, which is
    // the half the next frame reads from.
    assert_eq!(read_of(1), read_of(2));
    assert_eq!(read_of(3), read_of(0));

    // Simulation draws land offscreen on alternating framebuffers; the
    // copies land on screen.
    assert!(matches!(draws[0].target, DrawTarget::Framebuffer(_)));
    assert_ne!(draws[0].target, draws[2].target);
    assert_eq!(draws[1].target, DrawTarget::Screen);
    assert_eq!(draws[3].target, DrawTarget::Screen);

    // Both programs compiled once, not per frame.
    assert_eq!(engine.gpu().programs_compiled, 2);
    // One ping-pong pair, no plain framebuffer for the feedback output.
    assert_eq!(engine.gpu().framebuffers_created, 2);
}

#[test]
fn downstream_consumer_of_a_feedback_node_reads_its_fresh_half() {
    let nodes = vec![feedback_node("sim"), filter_node("post")];
    let edges = vec![
        edge("e1", "sim", "color", "sim", "prev"),
        edge("e2", "sim", "color", "post", "src"),
    ];
    let result = compile_graph(&nodes, &edges, "post");
    assert!(result.is_ok(), "unexpected error: {:?}", result.error);
    let ids: Vec<&str> = result.passes.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["sim", "post"]);

    let mut engine = RenderEngine::new(NullGpu::new(), AssetStore::new(), EngineConfig::default());
    engine
        .render(&result, 64, 64, 0.0, &RenderOptions::default())
        .unwrap();

    let draws = &engine.gpu().draws;
    assert_eq!(draws.len(), 2);
    // post samples the half sim wrote this frame, not the stale one it read.
    let sim_read = draws[0].textures[0].1;
    let post_read = draws[1].textures[0].1;
    assert_ne!(sim_read, post_read);
}
