//! Hardware backend on wgpu, headless.
//!
//! Pass shaders arrive as GLSL, go through naga to WGSL, and the reflected
//! module drives both the bind group layout and the uniform buffer layout.
//! Uniform packing follows the offsets naga reports for the translated
//! params block, so the engine never has to second-guess std140 rules.
//!
//! "Screen" here is a persistent RGBA8 readback target, resized to the
//! requested viewport; `read_pixels` copies it out through a staging
//! buffer.

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use wgpu::util::DeviceExt;

use crate::validation::{ShaderStage, glsl_to_module};

use super::gpu::{
    DrawCall, DrawTarget, FramebufferHandle, GpuBackend, ProgramHandle, TextureHandle,
};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[derive(Debug, Clone)]
enum Binding {
    UniformBlock {
        binding: u32,
        size: u64,
        members: Vec<MemberLayout>,
    },
    Texture {
        binding: u32,
        name: String,
        cube: bool,
    },
    Sampler {
        binding: u32,
    },
}

#[derive(Debug, Clone)]
struct MemberLayout {
    name: String,
    offset: u32,
    /// Element stride for arrays, from naga's reflected type.
    array_stride: Option<u32>,
    /// Column stride for matrices.
    matrix_col_stride: Option<u32>,
}

struct Program {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    bindings: Vec<Binding>,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct Framebuffer {
    view: wgpu::TextureView,
}

struct ScreenTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    sampler: wgpu::Sampler,
    fallback: GpuTexture,
    next_handle: u64,
    programs: HashMap<u64, Program>,
    framebuffers: HashMap<u64, Framebuffer>,
    textures: HashMap<u64, GpuTexture>,
    screen: Option<ScreenTarget>,
}

impl WgpuBackend {
    /// Acquire any available adapter without a surface.
    pub fn new_headless() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow!("no suitable GPU adapter found"))?;
        log::info!("GPU adapter: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("shaderflow device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .context("requesting wgpu device")?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shaderflow sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let fallback = make_texture(&device, &queue, 1, 1, &[0, 0, 0, 255]);

        Ok(Self {
            device,
            queue,
            sampler,
            fallback,
            next_handle: 0,
            programs: HashMap::new(),
            framebuffers: HashMap::new(),
            textures: HashMap::new(),
            screen: None,
        })
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn ensure_screen(&mut self, width: u32, height: u32) {
        let stale = self
            .screen
            .as_ref()
            .is_none_or(|s| s.width != width || s.height != height);
        if stale {
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("screen target"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.screen = Some(ScreenTarget {
                texture,
                view,
                width,
                height,
            });
        }
    }

    fn bind_group_for(&self, program: &Program, call: &DrawCall<'_>) -> Result<wgpu::BindGroup> {
        let uniform_buffer = program.bindings.iter().find_map(|b| match b {
            Binding::UniformBlock { size, members, .. } => {
                let bytes = pack_uniforms(call.uniforms, members, *size);
                Some(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("pass params"),
                    contents: &bytes,
                    usage: wgpu::BufferUsages::UNIFORM,
                }))
            }
            _ => None,
        });

        let mut entries = Vec::with_capacity(program.bindings.len());
        for binding in &program.bindings {
            match binding {
                Binding::UniformBlock { binding, .. } => {
                    let buffer = uniform_buffer
                        .as_ref()
                        .ok_or_else(|| anyhow!("uniform buffer missing"))?;
                    entries.push(wgpu::BindGroupEntry {
                        binding: *binding,
                        resource: buffer.as_entire_binding(),
                    });
                }
                Binding::Texture { binding, name, .. } => {
                    let view = self.texture_view_for(call, name);
                    entries.push(wgpu::BindGroupEntry {
                        binding: *binding,
                        resource: wgpu::BindingResource::TextureView(view),
                    });
                }
                Binding::Sampler { binding } => {
                    entries.push(wgpu::BindGroupEntry {
                        binding: *binding,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    });
                }
            }
        }

        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &program.layout,
            entries: &entries,
        }))
    }

    /// Match a reflected image global to the draw call's texture list by
    /// name; naga keeps GLSL global names, occasionally suffixed.
    fn texture_view_for(&self, call: &DrawCall<'_>, global_name: &str) -> &wgpu::TextureView {
        let matched = call
            .textures
            .iter()
            .find(|(name, _)| global_name == name || global_name.starts_with(name.as_str()))
            .or_else(|| (call.textures.len() == 1).then(|| &call.textures[0]));
        match matched {
            Some((_, handle)) => self
                .textures
                .get(&handle.0)
                .map(|t| &t.view)
                .unwrap_or(&self.fallback.view),
            None => &self.fallback.view,
        }
    }
}

impl GpuBackend for WgpuBackend {
    fn compile_program(
        &mut self,
        pass_id: &str,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<ProgramHandle> {
        let vertex_wgsl = crate::validation::glsl_to_wgsl(vertex_source, ShaderStage::Vertex)
            .with_context(|| format!("vertex shader of pass '{pass_id}'"))?;
        let (frag_module, frag_info) = glsl_to_module(fragment_source, ShaderStage::Fragment)
            .with_context(|| format!("fragment shader of pass '{pass_id}'"))?;
        let fragment_wgsl = naga::back::wgsl::write_string(
            &frag_module,
            &frag_info,
            naga::back::wgsl::WriterFlags::EXPLICIT_TYPES,
        )
        .map_err(|e| anyhow!("WGSL writer failed for pass '{pass_id}': {e:?}"))?;
        crate::validation::validate_wgsl(&fragment_wgsl, &format!("pass '{pass_id}'"))?;

        let bindings = reflect_bindings(&frag_module);
        let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
            .iter()
            .map(|b| match b {
                Binding::UniformBlock { binding, size, .. } => wgpu::BindGroupLayoutEntry {
                    binding: *binding,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(*size),
                    },
                    count: None,
                },
                Binding::Texture { binding, cube, .. } => wgpu::BindGroupLayoutEntry {
                    binding: *binding,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: if *cube {
                            wgpu::TextureViewDimension::Cube
                        } else {
                            wgpu::TextureViewDimension::D2
                        },
                        multisampled: false,
                    },
                    count: None,
                },
                Binding::Sampler { binding } => wgpu::BindGroupLayoutEntry {
                    binding: *binding,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            })
            .collect();

        let bind_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(pass_id),
                entries: &layout_entries,
            });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(pass_id),
                bind_group_layouts: &[&bind_layout],
                push_constant_ranges: &[],
            });

        let vertex_module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("pass vertex"),
                source: wgpu::ShaderSource::Wgsl(vertex_wgsl.into()),
            });
        let fragment_module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("pass fragment"),
                source: wgpu::ShaderSource::Wgsl(fragment_wgsl.into()),
            });

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(pass_id),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: Some("main"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: Some("main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

        let handle = self.next();
        self.programs.insert(
            handle,
            Program {
                pipeline,
                layout: bind_layout,
                bindings,
            },
        );
        Ok(ProgramHandle(handle))
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.0);
    }

    fn create_framebuffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<(FramebufferHandle, TextureHandle)> {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pass framebuffer"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let fb_view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sample_view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let tex_handle = self.next();
        self.textures.insert(
            tex_handle,
            GpuTexture {
                texture,
                view: sample_view,
                width,
                height,
            },
        );
        let fb_handle = self.next();
        self.framebuffers
            .insert(fb_handle, Framebuffer { view: fb_view });
        Ok((FramebufferHandle(fb_handle), TextureHandle(tex_handle)))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer.0);
    }

    fn upload_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<TextureHandle> {
        let tex = make_texture(&self.device, &self.queue, width, height, rgba);
        let handle = self.next();
        self.textures.insert(handle, tex);
        Ok(TextureHandle(handle))
    }

    fn update_texture(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<()> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| anyhow!("unknown texture handle"))?;
        if tex.width != width || tex.height != height {
            return Err(anyhow!("texture update size mismatch"));
        }
        write_rgba(&self.queue, &tex.texture, width, height, rgba);
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()> {
        if call.target == DrawTarget::Screen {
            self.ensure_screen(call.viewport.0, call.viewport.1);
        }
        let program = self
            .programs
            .get(&call.program.0)
            .ok_or_else(|| anyhow!("unknown program handle"))?;
        let view = match call.target {
            DrawTarget::Screen => {
                &self
                    .screen
                    .as_ref()
                    .ok_or_else(|| anyhow!("screen target missing"))?
                    .view
            }
            DrawTarget::Framebuffer(fb) => {
                &self
                    .framebuffers
                    .get(&fb.0)
                    .ok_or_else(|| anyhow!("unknown framebuffer handle"))?
                    .view
            }
        };

        let bind_group = self.bind_group_for(program, call)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pass encoder"),
            });
        {
            let load = match call.clear {
                Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                }),
                None => wgpu::LoadOp::Load,
            };
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: None,
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&program.pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_pixels(&mut self, width: u32, height: u32) -> Result<Vec<u8>> {
        self.ensure_screen(width, height);
        let screen = self
            .screen
            .as_ref()
            .ok_or_else(|| anyhow!("screen target missing"))?;

        let padded_bpr = (width * 4).div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: (padded_bpr * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &screen.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bpr),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv().context("readback never completed")??;

        let data = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for row in 0..height {
            let start = (row * padded_bpr) as usize;
            pixels.extend_from_slice(&data[start..start + (width * 4) as usize]);
        }
        drop(data);
        staging.unmap();
        Ok(pixels)
    }
}

/// Extract the fragment module's resource interface, preserving the binding
/// numbers naga assigned during translation.
fn reflect_bindings(module: &naga::Module) -> Vec<Binding> {
    let mut bindings = Vec::new();
    for (_, gv) in module.global_variables.iter() {
        let Some(res) = &gv.binding else {
            continue;
        };
        match &module.types[gv.ty].inner {
            naga::TypeInner::Image { dim, .. } => bindings.push(Binding::Texture {
                binding: res.binding,
                name: gv.name.clone().unwrap_or_default(),
                cube: *dim == naga::ImageDimension::Cube,
            }),
            naga::TypeInner::Sampler { .. } => bindings.push(Binding::Sampler {
                binding: res.binding,
            }),
            inner => {
                if gv.space == naga::AddressSpace::Uniform {
                    bindings.push(Binding::UniformBlock {
                        binding: res.binding,
                        size: inner.size(module.to_ctx()) as u64,
                        members: reflect_members(module, gv.ty),
                    });
                }
            }
        }
    }
    bindings
}

fn reflect_members(module: &naga::Module, ty: naga::Handle<naga::Type>) -> Vec<MemberLayout> {
    let naga::TypeInner::Struct { members, .. } = &module.types[ty].inner else {
        return Vec::new();
    };
    members
        .iter()
        .map(|m| {
            let (array_stride, matrix_col_stride) = match &module.types[m.ty].inner {
                naga::TypeInner::Array { stride, .. } => (Some(*stride), None),
                naga::TypeInner::Matrix { rows, .. } => {
                    let rows = *rows as u32;
                    (None, Some(if rows == 3 { 16 } else { rows * 4 }))
                }
                _ => (None, None),
            };
            MemberLayout {
                name: m.name.clone().unwrap_or_default(),
                offset: m.offset,
                array_stride,
                matrix_col_stride,
            }
        })
        .collect()
}

/// Serialize the ordered uniform list into the block's byte layout using
/// the reflected member offsets.
fn pack_uniforms(
    uniforms: &[(String, crate::types::UniformValue)],
    members: &[MemberLayout],
    size: u64,
) -> Vec<u8> {
    use crate::types::UniformValue as V;

    let mut bytes = vec![0u8; size as usize];
    let mut write = |offset: u32, data: &[u8]| {
        let offset = offset as usize;
        if offset + data.len() <= bytes.len() {
            bytes[offset..offset + data.len()].copy_from_slice(data);
        }
    };

    for (name, value) in uniforms {
        let Some(member) = members.iter().find(|m| &m.name == name) else {
            continue;
        };
        let at = member.offset;
        match value {
            V::Float(x) => write(at, bytemuck::bytes_of(x)),
            V::Int(x) => write(at, bytemuck::bytes_of(x)),
            V::UInt(x) => write(at, bytemuck::bytes_of(x)),
            V::Bool(x) => write(at, bytemuck::bytes_of(&(*x as u32))),
            V::Vec2(v) => write(at, bytemuck::cast_slice(v)),
            V::Vec3(v) => write(at, bytemuck::cast_slice(v)),
            V::Vec4(v) => write(at, bytemuck::cast_slice(v)),
            V::UVec2(v) => write(at, bytemuck::cast_slice(v)),
            V::UVec3(v) => write(at, bytemuck::cast_slice(v)),
            V::UVec4(v) => write(at, bytemuck::cast_slice(v)),
            V::Mat2(m) => {
                let stride = member.matrix_col_stride.unwrap_or(8);
                for col in 0..2 {
                    write(at + col * stride, bytemuck::cast_slice(&m[(col as usize * 2)..][..2]));
                }
            }
            V::Mat3(m) => {
                let stride = member.matrix_col_stride.unwrap_or(16);
                for col in 0..3 {
                    write(at + col * stride, bytemuck::cast_slice(&m[(col as usize * 3)..][..3]));
                }
            }
            V::Mat4(m) => write(at, bytemuck::cast_slice(m)),
            V::FloatArray(xs) => {
                let stride = member.array_stride.unwrap_or(16);
                for (i, x) in xs.iter().enumerate() {
                    write(at + i as u32 * stride, bytemuck::bytes_of(x));
                }
            }
            V::IntArray(xs) => {
                let stride = member.array_stride.unwrap_or(16);
                for (i, x) in xs.iter().enumerate() {
                    write(at + i as u32 * stride, bytemuck::bytes_of(x));
                }
            }
            V::Vec2Array(xs) => {
                let stride = member.array_stride.unwrap_or(16);
                for (i, v) in xs.iter().enumerate() {
                    write(at + i as u32 * stride, bytemuck::cast_slice(v));
                }
            }
            V::Vec3Array(xs) => {
                let stride = member.array_stride.unwrap_or(16);
                for (i, v) in xs.iter().enumerate() {
                    write(at + i as u32 * stride, bytemuck::cast_slice(v));
                }
            }
            V::Vec4Array(xs) => {
                let stride = member.array_stride.unwrap_or(16);
                for (i, v) in xs.iter().enumerate() {
                    write(at + i as u32 * stride, bytemuck::cast_slice(v));
                }
            }
            V::Texture(_) => {}
        }
    }
    bytes
}

fn make_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    width: u32,
    height: u32,
    rgba: &[u8],
) -> GpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("uploaded texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    write_rgba(queue, &texture, width, height, rgba);
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture {
        texture,
        view,
        width,
        height,
    }
}

fn write_rgba(queue: &wgpu::Queue, texture: &wgpu::Texture, width: u32, height: u32, rgba: &[u8]) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        rgba,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UniformValue;

    fn member(name: &str, offset: u32) -> MemberLayout {
        MemberLayout {
            name: name.to_string(),
            offset,
            array_stride: None,
            matrix_col_stride: None,
        }
    }

    #[test]
    fn packing_places_values_at_reflected_offsets() {
        let members = vec![
            member("sf_time", 0),
            member("sf_opacity", 4),
            member("sf_resolution", 8),
            member("u_scale", 16),
        ];
        let uniforms = vec![
            ("sf_time".to_string(), UniformValue::Float(2.0)),
            ("sf_opacity".to_string(), UniformValue::Float(0.5)),
            (
                "sf_resolution".to_string(),
                UniformValue::Vec2([640.0, 480.0]),
            ),
            ("u_scale".to_string(), UniformValue::Vec3([1.0, 2.0, 3.0])),
        ];
        let bytes = pack_uniforms(&uniforms, &members, 32);
        assert_eq!(bytes.len(), 32);
        assert_eq!(f32::from_le_bytes(bytes[0..4].try_into().unwrap()), 2.0);
        assert_eq!(f32::from_le_bytes(bytes[4..8].try_into().unwrap()), 0.5);
        assert_eq!(f32::from_le_bytes(bytes[8..12].try_into().unwrap()), 640.0);
        assert_eq!(f32::from_le_bytes(bytes[20..24].try_into().unwrap()), 2.0);
    }

    #[test]
    fn array_members_honor_the_reflected_stride() {
        let members = vec![MemberLayout {
            name: "u_weights".to_string(),
            offset: 0,
            array_stride: Some(16),
            matrix_col_stride: None,
        }];
        let uniforms = vec![(
            "u_weights".to_string(),
            UniformValue::FloatArray(vec![1.0, 2.0]),
        )];
        let bytes = pack_uniforms(&uniforms, &members, 32);
        assert_eq!(f32::from_le_bytes(bytes[0..4].try_into().unwrap()), 1.0);
        assert_eq!(f32::from_le_bytes(bytes[16..20].try_into().unwrap()), 2.0);
    }

    #[test]
    fn unknown_names_are_ignored_not_panicked() {
        let members = vec![member("known", 0)];
        let uniforms = vec![("mystery".to_string(), UniformValue::Float(9.0))];
        let bytes = pack_uniforms(&uniforms, &members, 16);
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
