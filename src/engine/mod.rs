//! Multi-pass execution engine.
//!
//! Takes a [`CompilationResult`] and renders it: one draw per pass, in
//! order, with offscreen targets, feedback ping-pong pairs and compiled
//! programs pooled in a [`ResourceCache`] and aged out on a retention
//! window. The engine is generic over [`GpuBackend`], so the full pipeline
//! runs under test on [`NullGpu`] with no GPU present.

pub mod cache;
pub mod gpu;
pub mod textures;
pub mod wgpu_backend;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;

use crate::asset_store::AssetStore;
use crate::compiler::{CompilationResult, CompiledPass, OutputTarget};
use crate::types::{TextureSource, UniformValue};

use cache::ResourceCache;
use gpu::{DrawCall, DrawTarget, GpuBackend, TextureHandle};
use textures::TextureRegistry;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// How long an unused cache entry survives before eviction.
    pub retention: Duration,
    /// Minimum spacing between eviction sweeps.
    pub cleanup_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(2),
        }
    }
}

/// Per-frame knobs. `prevent_cleanup` renders without marking anything as
/// recently used: a warmup or thumbnail frame that must not extend the
/// lifetime of resources the interactive view no longer needs.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Overrides by uniform name, applied after the compiled values.
    pub uniform_overrides: HashMap<String, UniformValue>,
    /// Uniforms the compile did not bind, appended after the pass's own.
    /// Names already bound by the pass and the reserved `sf_` names are
    /// ignored.
    pub extra_uniforms: HashMap<String, UniformValue>,
    pub clear: Option<[f32; 4]>,
    /// Final-pass alpha multiplier.
    pub opacity: f32,
    /// UV-space shift of the final image.
    pub offset: [f32; 2],
    pub prevent_cleanup: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            uniform_overrides: HashMap::new(),
            extra_uniforms: HashMap::new(),
            clear: Some([0.0, 0.0, 0.0, 0.0]),
            opacity: 1.0,
            offset: [0.0, 0.0],
            prevent_cleanup: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub programs: usize,
    pub framebuffers: usize,
    pub feedback_slots: usize,
    pub textures: usize,
    pub millis_since_last_cleanup: u64,
}

pub struct RenderEngine<G: GpuBackend> {
    gpu: G,
    cache: ResourceCache,
    textures: TextureRegistry,
    assets: AssetStore,
    config: EngineConfig,
    /// Keys kept alive by the most recent non-warmup render.
    live: HashSet<String>,
}

impl<G: GpuBackend> RenderEngine<G> {
    pub fn new(gpu: G, assets: AssetStore, config: EngineConfig) -> Self {
        Self {
            gpu,
            cache: ResourceCache::new(config.retention),
            textures: TextureRegistry::new(),
            assets,
            config,
            live: HashSet::new(),
        }
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    /// Execute every pass of a compilation at the given resolution. A
    /// result carrying a compile error renders nothing; a pass whose shader
    /// the backend rejects is skipped while the rest still draw.
    pub fn render(
        &mut self,
        compiled: &CompilationResult,
        width: u32,
        height: u32,
        time: f32,
        opts: &RenderOptions,
    ) -> Result<()> {
        if let Some(err) = &compiled.error {
            log::debug!("skipping render, graph failed to compile: {}", err.message);
            return Ok(());
        }

        let now = Instant::now();
        let refresh = !opts.prevent_cleanup;
        if refresh {
            self.live = compiled.live_keys();
        }

        for pass in &compiled.passes {
            let Some(program) = self.cache.program(
                &mut self.gpu,
                &pass.id,
                &pass.vertex_source,
                &pass.fragment_source,
                now,
                refresh,
            ) else {
                continue;
            };

            let textures = self.resolve_textures(pass, width, height, now, refresh)?;
            let on_screen = pass.output_target == OutputTarget::Screen;
            let uniforms = self.pass_uniforms(pass, width, height, time, on_screen, opts);

            let (target, clear, swap_after) = match &pass.output_target {
                OutputTarget::Screen => (DrawTarget::Screen, opts.clear, None),
                OutputTarget::NodeOutput(id) => {
                    let fb =
                        self.cache
                            .framebuffer(&mut self.gpu, id, width, height, now, refresh)?;
                    (
                        DrawTarget::Framebuffer(fb.fbo),
                        Some([0.0, 0.0, 0.0, 0.0]),
                        None,
                    )
                }
                OutputTarget::FeedbackSlot(id) => {
                    self.cache
                        .ensure_feedback(&mut self.gpu, id, width, height, now, refresh)?;
                    let fbo = self
                        .cache
                        .feedback_write(id)
                        .ok_or_else(|| anyhow::anyhow!("feedback slot '{id}' missing"))?;
                    (DrawTarget::Framebuffer(fbo), None, Some(id.clone()))
                }
            };

            self.gpu.draw(&DrawCall {
                program,
                target,
                viewport: (width, height),
                clear,
                uniforms: &uniforms,
                textures: &textures,
            })?;

            if let Some(slot) = swap_after {
                self.cache.swap_feedback(&slot);
            }
        }

        if refresh && now.duration_since(self.cache.last_cleanup()) >= self.config.cleanup_interval
        {
            self.cache.evict(&mut self.gpu, &self.live, now);
        }
        Ok(())
    }

    fn resolve_textures(
        &mut self,
        pass: &CompiledPass,
        width: u32,
        height: u32,
        now: Instant,
        refresh: bool,
    ) -> Result<Vec<(String, TextureHandle)>> {
        let mut out = Vec::with_capacity(pass.input_textures.len());
        for (name, source) in &pass.input_textures {
            let handle = match source {
                TextureSource::NodeOutput(id) => {
                    // A feedback node's visible output is the half most
                    // recently swapped in.
                    match self.cache.feedback_read(id) {
                        Some(texture) => texture,
                        None => {
                            self.cache
                                .framebuffer(&mut self.gpu, id, width, height, now, refresh)?
                                .texture
                        }
                    }
                }
                TextureSource::FeedbackSlot(id) => {
                    self.cache
                        .ensure_feedback(&mut self.gpu, id, width, height, now, refresh)?;
                    self.cache
                        .feedback_read(id)
                        .ok_or_else(|| anyhow::anyhow!("feedback slot '{id}' missing"))?
                }
                other => self.textures.resolve(&mut self.gpu, &self.assets, other)?,
            };
            out.push((name.clone(), handle));
        }
        Ok(out)
    }

    /// Reserved engine uniforms followed by the pass's own, in the exact
    /// order the fragment shader declared its params block.
    fn pass_uniforms(
        &self,
        pass: &CompiledPass,
        width: u32,
        height: u32,
        time: f32,
        on_screen: bool,
        opts: &RenderOptions,
    ) -> Vec<(String, UniformValue)> {
        let (opacity, offset) = if on_screen {
            (opts.opacity, opts.offset)
        } else {
            (1.0, [0.0, 0.0])
        };
        let mut uniforms = vec![
            ("sf_time".to_string(), UniformValue::Float(time)),
            ("sf_opacity".to_string(), UniformValue::Float(opacity)),
            (
                "sf_resolution".to_string(),
                UniformValue::Vec2([width as f32, height as f32]),
            ),
            ("sf_offset".to_string(), UniformValue::Vec2(offset)),
        ];
        for (name, value) in &pass.uniforms {
            let value = opts
                .uniform_overrides
                .get(name)
                .filter(|v| v.glsl_type() == value.glsl_type())
                .unwrap_or(value);
            uniforms.push((name.clone(), value.clone()));
        }
        let mut extras: Vec<_> = opts
            .extra_uniforms
            .iter()
            .filter(|(name, _)| !name.starts_with("sf_") && !pass.uniforms.contains_key(*name))
            .collect();
        extras.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in extras {
            uniforms.push((name.clone(), value.clone()));
        }
        uniforms
    }

    pub fn update_dynamic_texture(
        &mut self,
        id: &str,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<()> {
        self.textures
            .update_dynamic(&mut self.gpu, id, width, height, rgba)
    }

    /// Read back the screen target as tightly packed RGBA8.
    pub fn read_pixels(&mut self, width: u32, height: u32) -> Result<Vec<u8>> {
        self.gpu.read_pixels(width, height)
    }

    /// Run an eviction sweep immediately instead of waiting for the
    /// interval.
    pub fn evict_now(&mut self) {
        let live = std::mem::take(&mut self.live);
        self.cache.evict(&mut self.gpu, &live, Instant::now());
        self.live = live;
    }

    pub fn stats(&self) -> EngineStats {
        let cache = self.cache.stats();
        EngineStats {
            programs: cache.programs,
            framebuffers: cache.framebuffers,
            feedback_slots: cache.feedback_slots,
            textures: self.textures.count(),
            millis_since_last_cleanup: cache.time_since_last_cleanup.as_millis() as u64,
        }
    }

    /// Release every GPU resource, caches and registry both.
    pub fn release_resources(&mut self) {
        self.cache.clear(&mut self.gpu);
        self.textures.clear(&mut self.gpu);
        self.live.clear();
    }
}
