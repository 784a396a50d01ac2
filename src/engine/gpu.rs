//! GPU backend abstraction.
//!
//! The engine talks to the GPU through opaque handles so its caching,
//! eviction and feedback logic runs identically on real hardware and on the
//! recording [`NullGpu`] used by the test suite.

use anyhow::{Result, bail};

use crate::types::UniformValue;

macro_rules! handle {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

handle!(ProgramHandle);
handle!(FramebufferHandle);
handle!(TextureHandle);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawTarget {
    /// The caller-provided surface (or the readback texture, headless).
    Screen,
    Framebuffer(FramebufferHandle),
}

/// One full-screen draw: program, destination, and the resolved uniform and
/// texture bindings in the order the pass declared them.
#[derive(Debug)]
pub struct DrawCall<'a> {
    pub program: ProgramHandle,
    pub target: DrawTarget,
    pub viewport: (u32, u32),
    pub clear: Option<[f32; 4]>,
    /// Reserved engine uniforms first, then the pass uniforms sorted by
    /// name; matches the shader's params block declaration order.
    pub uniforms: &'a [(String, UniformValue)],
    /// Sampler uniform name -> bound texture, in binding slot order.
    pub textures: &'a [(String, TextureHandle)],
}

pub trait GpuBackend {
    /// Compile a vertex/fragment pair. `pass_id` is attribution for error
    /// messages only.
    fn compile_program(
        &mut self,
        pass_id: &str,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<ProgramHandle>;
    fn destroy_program(&mut self, program: ProgramHandle);

    /// Allocate an offscreen color target plus the texture sampling it.
    fn create_framebuffer(&mut self, width: u32, height: u32)
    -> Result<(FramebufferHandle, TextureHandle)>;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    fn upload_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<TextureHandle>;
    fn update_texture(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<()>;
    fn destroy_texture(&mut self, texture: TextureHandle);

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()>;

    /// Read back the screen target as tightly-packed RGBA8.
    fn read_pixels(&mut self, width: u32, height: u32) -> Result<Vec<u8>>;
}

/// A draw recorded by [`NullGpu`], owned copies so assertions outlive the
/// borrowed `DrawCall`.
#[derive(Debug, Clone)]
pub struct RecordedDraw {
    pub program: ProgramHandle,
    pub target: DrawTarget,
    pub viewport: (u32, u32),
    pub uniforms: Vec<(String, UniformValue)>,
    pub textures: Vec<(String, TextureHandle)>,
}

/// Backend that allocates handles and records draws without touching a GPU.
#[derive(Debug, Default)]
pub struct NullGpu {
    next_handle: u64,
    pub programs_compiled: usize,
    pub programs_destroyed: usize,
    pub framebuffers_created: usize,
    pub framebuffers_destroyed: usize,
    pub textures_uploaded: usize,
    pub textures_updated: usize,
    pub textures_destroyed: usize,
    pub draws: Vec<RecordedDraw>,
    fail_compiles: Vec<String>,
}

impl NullGpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future `compile_program` for `pass_id` fail, simulating a
    /// shader the driver rejects.
    pub fn fail_compiles_for(&mut self, pass_id: impl Into<String>) {
        self.fail_compiles.push(pass_id.into());
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl GpuBackend for NullGpu {
    fn compile_program(
        &mut self,
        pass_id: &str,
        _vertex_source: &str,
        _fragment_source: &str,
    ) -> Result<ProgramHandle> {
        if self.fail_compiles.iter().any(|p| p == pass_id) {
            bail!("simulated compile failure for pass '{pass_id}'");
        }
        self.programs_compiled += 1;
        Ok(ProgramHandle(self.next()))
    }

    fn destroy_program(&mut self, _program: ProgramHandle) {
        self.programs_destroyed += 1;
    }

    fn create_framebuffer(
        &mut self,
        _width: u32,
        _height: u32,
    ) -> Result<(FramebufferHandle, TextureHandle)> {
        self.framebuffers_created += 1;
        Ok((FramebufferHandle(self.next()), TextureHandle(self.next())))
    }

    fn destroy_framebuffer(&mut self, _framebuffer: FramebufferHandle) {
        self.framebuffers_destroyed += 1;
    }

    fn upload_texture(&mut self, _width: u32, _height: u32, _rgba: &[u8]) -> Result<TextureHandle> {
        self.textures_uploaded += 1;
        Ok(TextureHandle(self.next()))
    }

    fn update_texture(
        &mut self,
        _texture: TextureHandle,
        _width: u32,
        _height: u32,
        _rgba: &[u8],
    ) -> Result<()> {
        self.textures_updated += 1;
        Ok(())
    }

    fn destroy_texture(&mut self, _texture: TextureHandle) {
        self.textures_destroyed += 1;
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()> {
        self.draws.push(RecordedDraw {
            program: call.program,
            target: call.target,
            viewport: call.viewport,
            uniforms: call.uniforms.to_vec(),
            textures: call.textures.to_vec(),
        });
        Ok(())
    }

    fn read_pixels(&mut self, width: u32, height: u32) -> Result<Vec<u8>> {
        Ok(vec![0; (width * height * 4) as usize])
    }
}
