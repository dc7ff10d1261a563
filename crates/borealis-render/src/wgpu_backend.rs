//! wgpu implementation of [`RenderBackend`].
//!
//! The flush engine issues state changes and draws mid-frame, while wgpu
//! forbids buffer writes inside an open render pass. The backend therefore
//! records every call into an internal op list plus CPU staging buffers and
//! replays the whole frame inside a single render pass at [`end_frame`],
//! after all uploads have been submitted.
//!
//! Per-draw uniforms live in one dynamic-offset uniform buffer; each draw
//! snapshots the pending uniform block into the next 256-byte slot.
//!
//! [`end_frame`]: WgpuBackend::end_frame

use std::sync::Arc;

use ahash::HashMap;
use borealis_core::Color;
use borealis_core::geometry::Rect;
use bytemuck::{Pod, Zeroable};
use glam::Mat3;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

use crate::backend::{ProgramKind, ProjViewMatrices, RenderBackend, Uniform, UniformValue};
use crate::batch::Vertex2D;
use crate::texture::{TextureId, TextureInfo};

/// A globally shared, headless graphics context.
pub struct GraphicsContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GraphicsContext {
    /// Create a context, blocking on adapter/device acquisition.
    pub fn new_sync() -> Arc<Self> {
        pollster::block_on(Self::new())
    }

    pub async fn new() -> Arc<Self> {
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
            .expect("no suitable GPU adapter");

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("borealis device"),
                ..Default::default()
            })
            .await
            .expect("failed to create device");

        info!(adapter = %adapter.get_info().name, "created graphics context");

        Arc::new(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

/// Dynamic-offset stride; the guaranteed minimum uniform buffer offset
/// alignment across WebGPU implementations.
const UNIFORM_STRIDE: usize = 256;

/// Frame-level uniforms, bound once per space phase.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FrameUniform {
    projection: [[f32; 4]; 3],
    view: [[f32; 4]; 3],
}

/// Per-draw uniforms, snapshotted into one 256-byte slot per draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DrawUniform {
    model: [[f32; 4]; 3],
    uv_rect: [f32; 4],
    modulate: [f32; 4],
    array_layer: f32,
    _pad: [f32; 3],
}

impl Default for DrawUniform {
    fn default() -> Self {
        Self {
            model: mat3_columns(&Mat3::IDENTITY),
            uv_rect: [0.0, 0.0, 1.0, 1.0],
            modulate: [1.0; 4],
            array_layer: 0.0,
            _pad: [0.0; 3],
        }
    }
}

/// `mat3x3<f32>` uniform layout: three vec3 columns, each padded to 16 bytes.
fn mat3_columns(m: &Mat3) -> [[f32; 4]; 3] {
    [
        [m.x_axis.x, m.x_axis.y, m.x_axis.z, 0.0],
        [m.y_axis.x, m.y_axis.y, m.y_axis.z, 0.0],
        [m.z_axis.x, m.z_axis.y, m.z_axis.z, 0.0],
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineKind {
    Quad,
    QuadArray,
    BatchQuad,
    BatchQuadArray,
}

/// Byte range of one batch upload within the frame's staging buffers.
#[derive(Debug, Clone, Copy)]
struct BatchRange {
    vertex_offset: u64,
    vertex_bytes: u64,
    index_offset: u64,
    index_bytes: u64,
    index_count: u32,
}

enum GpuOp {
    FrameUniform { offset: u32 },
    Scissor(Option<Rect<i32>>),
    Quad {
        pipeline: PipelineKind,
        texture: TextureId,
        uniform_offset: u32,
    },
    Batch {
        pipeline: PipelineKind,
        texture: TextureId,
        uniform_offset: u32,
        range: BatchRange,
    },
}

struct GpuTexture {
    info: TextureInfo,
    bind_group: wgpu::BindGroup,
}

struct FrameTarget {
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    clear: Option<Color>,
}

/// GPU state growing buffer; recreated (never shrunk) when a frame needs more.
struct GrowBuffer {
    buffer: wgpu::Buffer,
    capacity: u64,
    usage: wgpu::BufferUsages,
    label: &'static str,
}

impl GrowBuffer {
    fn new(device: &wgpu::Device, label: &'static str, capacity: u64, usage: wgpu::BufferUsages) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: capacity,
            usage: usage | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            capacity,
            usage,
            label,
        }
    }

    /// Returns true if the underlying buffer was recreated, invalidating any
    /// bind group that references it.
    fn ensure(&mut self, device: &wgpu::Device, needed: u64, force: bool) -> bool {
        if needed <= self.capacity && !force {
            return false;
        }
        let capacity = needed.next_power_of_two().max(self.capacity);
        debug!(label = self.label, capacity, "reallocating GPU buffer");
        self.buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(self.label),
            size: capacity,
            usage: self.usage | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.capacity = capacity;
        true
    }
}

/// The real GPU backend.
pub struct WgpuBackend {
    context: Arc<GraphicsContext>,

    quad_pipeline: wgpu::RenderPipeline,
    quad_array_pipeline: wgpu::RenderPipeline,
    batch_pipeline: wgpu::RenderPipeline,
    batch_array_pipeline: wgpu::RenderPipeline,

    frame_layout: wgpu::BindGroupLayout,
    draw_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    texture_array_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,

    unit_quad: wgpu::Buffer,
    frame_uniforms: GrowBuffer,
    frame_bind_group: wgpu::BindGroup,
    draw_uniforms: GrowBuffer,
    draw_bind_group: wgpu::BindGroup,
    vertex_buffer: GrowBuffer,
    index_buffer: GrowBuffer,

    textures: HashMap<TextureId, GpuTexture>,
    next_texture: u32,

    // Per-frame recording state.
    target: Option<FrameTarget>,
    ops: Vec<GpuOp>,
    frame_staging: Vec<u8>,
    draw_staging: Vec<u8>,
    vertex_staging: Vec<Vertex2D>,
    index_staging: Vec<u16>,
    pending_batch: Option<BatchRange>,
    pending_program: ProgramKind,
    pending_texture: Option<TextureId>,
    pending_uniforms: DrawUniform,
    reallocate: bool,
}

impl WgpuBackend {
    /// `target_format` must match the texture views later passed to
    /// [`begin_frame`](Self::begin_frame).
    pub fn new(context: Arc<GraphicsContext>, target_format: wgpu::TextureFormat) -> Self {
        let device = context.device();

        let frame_layout = uniform_layout(device, "frame uniform layout", wgpu::ShaderStages::VERTEX);
        let draw_layout = uniform_layout(
            device,
            "draw uniform layout",
            wgpu::ShaderStages::VERTEX_FRAGMENT,
        );
        let texture_layout = texture_bind_layout(device, wgpu::TextureViewDimension::D2);
        let texture_array_layout = texture_bind_layout(device, wgpu::TextureViewDimension::D2Array);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("quad sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("quad shader"),
            source: wgpu::ShaderSource::Wgsl(QUAD_SHADER.into()),
        });
        let array_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("quad array shader"),
            source: wgpu::ShaderSource::Wgsl(QUAD_ARRAY_SHADER.into()),
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("quad pipeline layout"),
            bind_group_layouts: &[&frame_layout, &draw_layout, &texture_layout],
            push_constant_ranges: &[],
        });
        let array_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("quad array pipeline layout"),
            bind_group_layouts: &[&frame_layout, &draw_layout, &texture_array_layout],
            push_constant_ranges: &[],
        });

        let quad_pipeline =
            build_pipeline(device, "quad", &layout, &shader, target_format, false);
        let batch_pipeline =
            build_pipeline(device, "quad batch", &layout, &shader, target_format, true);
        let quad_array_pipeline = build_pipeline(
            device,
            "quad array",
            &array_layout,
            &array_shader,
            target_format,
            false,
        );
        let batch_array_pipeline = build_pipeline(
            device,
            "quad array batch",
            &array_layout,
            &array_shader,
            target_format,
            true,
        );

        // Unit quad strip: bottom-left, bottom-right, top-left, top-right in
        // a y-down rectangle, with the whole-texture UV convention baked in.
        let unit_quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("unit quad"),
            contents: bytemuck::cast_slice(&[
                Vertex2D {
                    position: [0.0, 0.0],
                    uv: [0.0, 1.0],
                    layer: 0.0,
                },
                Vertex2D {
                    position: [1.0, 0.0],
                    uv: [1.0, 1.0],
                    layer: 0.0,
                },
                Vertex2D {
                    position: [0.0, 1.0],
                    uv: [0.0, 0.0],
                    layer: 0.0,
                },
                Vertex2D {
                    position: [1.0, 1.0],
                    uv: [1.0, 0.0],
                    layer: 0.0,
                },
            ]),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let frame_uniforms = GrowBuffer::new(
            device,
            "frame uniforms",
            (UNIFORM_STRIDE * 8) as u64,
            wgpu::BufferUsages::UNIFORM,
        );
        let draw_uniforms = GrowBuffer::new(
            device,
            "draw uniforms",
            (UNIFORM_STRIDE * 256) as u64,
            wgpu::BufferUsages::UNIFORM,
        );
        let frame_bind_group = uniform_bind_group(
            device,
            "frame bind group",
            &frame_layout,
            &frame_uniforms.buffer,
            std::mem::size_of::<FrameUniform>() as u64,
        );
        let draw_bind_group = uniform_bind_group(
            device,
            "draw bind group",
            &draw_layout,
            &draw_uniforms.buffer,
            std::mem::size_of::<DrawUniform>() as u64,
        );

        let vertex_buffer = GrowBuffer::new(
            device,
            "batch vertices",
            64 * 1024,
            wgpu::BufferUsages::VERTEX,
        );
        let index_buffer = GrowBuffer::new(
            device,
            "batch indices",
            16 * 1024,
            wgpu::BufferUsages::INDEX,
        );

        Self {
            context,
            quad_pipeline,
            quad_array_pipeline,
            batch_pipeline,
            batch_array_pipeline,
            frame_layout,
            draw_layout,
            texture_layout,
            texture_array_layout,
            sampler,
            unit_quad,
            frame_uniforms,
            frame_bind_group,
            draw_uniforms,
            draw_bind_group,
            vertex_buffer,
            index_buffer,
            textures: HashMap::default(),
            next_texture: 0,
            target: None,
            ops: Vec::new(),
            frame_staging: Vec::new(),
            draw_staging: Vec::new(),
            vertex_staging: Vec::new(),
            index_staging: Vec::new(),
            pending_batch: None,
            pending_program: ProgramKind::Quad,
            pending_texture: None,
            pending_uniforms: DrawUniform::default(),
            reallocate: false,
        }
    }

    /// Upload an RGBA8 image and register it for sampling.
    pub fn create_texture(&mut self, label: &str, width: u32, height: u32, data: &[u8]) -> TextureId {
        self.create_texture_inner(label, width, height, 1, false, data)
    }

    /// Upload a stack of same-sized RGBA8 images as one 2D-array texture.
    pub fn create_texture_array(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        layers: u32,
        data: &[u8],
    ) -> TextureId {
        self.create_texture_inner(label, width, height, layers, true, data)
    }

    fn create_texture_inner(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        layers: u32,
        arrayed: bool,
        data: &[u8],
    ) -> TextureId {
        assert_eq!(
            data.len() as u32,
            width * height * layers * 4,
            "texture data size mismatch"
        );
        let device = self.context.device();
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: layers,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.context.queue().write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(if arrayed {
                wgpu::TextureViewDimension::D2Array
            } else {
                wgpu::TextureViewDimension::D2
            }),
            ..Default::default()
        });
        let layout = if arrayed {
            &self.texture_array_layout
        } else {
            &self.texture_layout
        };
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(
            id,
            GpuTexture {
                info: TextureInfo {
                    width,
                    height,
                    arrayed,
                },
                bind_group,
            },
        );
        id
    }

    /// Start recording a frame against `view`.
    ///
    /// `width`/`height` are the view's size in pixels; `clear` fills the
    /// target before any draw.
    pub fn begin_frame(
        &mut self,
        view: wgpu::TextureView,
        width: u32,
        height: u32,
        clear: Option<Color>,
    ) {
        assert!(self.target.is_none(), "begin_frame while a frame is open");
        self.target = Some(FrameTarget {
            view,
            width,
            height,
            clear,
        });
    }

    /// Upload all staged data and replay the recorded frame in one render
    /// pass, then submit.
    pub fn end_frame(&mut self) {
        let target = self.target.take().expect("end_frame without begin_frame");
        let device = self.context.device();
        let queue = self.context.queue();

        let force = self.reallocate;
        let frame_grew = self
            .frame_uniforms
            .ensure(device, self.frame_staging.len() as u64, force);
        if frame_grew {
            self.frame_bind_group = uniform_bind_group(
                device,
                "frame bind group",
                &self.frame_layout,
                &self.frame_uniforms.buffer,
                std::mem::size_of::<FrameUniform>() as u64,
            );
        }
        let draw_grew = self
            .draw_uniforms
            .ensure(device, self.draw_staging.len() as u64, force);
        if draw_grew {
            self.draw_bind_group = uniform_bind_group(
                device,
                "draw bind group",
                &self.draw_layout,
                &self.draw_uniforms.buffer,
                std::mem::size_of::<DrawUniform>() as u64,
            );
        }
        self.vertex_buffer.ensure(
            device,
            (self.vertex_staging.len() * std::mem::size_of::<Vertex2D>()) as u64,
            force,
        );
        self.index_buffer.ensure(
            device,
            (self.index_staging.len() * std::mem::size_of::<u16>()) as u64,
            force,
        );

        if !self.frame_staging.is_empty() {
            queue.write_buffer(&self.frame_uniforms.buffer, 0, &self.frame_staging);
        }
        if !self.draw_staging.is_empty() {
            queue.write_buffer(&self.draw_uniforms.buffer, 0, &self.draw_staging);
        }
        if !self.vertex_staging.is_empty() {
            queue.write_buffer(
                &self.vertex_buffer.buffer,
                0,
                bytemuck::cast_slice(&self.vertex_staging),
            );
        }
        if !self.index_staging.is_empty() {
            queue.write_buffer(
                &self.index_buffer.buffer,
                0,
                bytemuck::cast_slice(&self.index_staging),
            );
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame encoder"),
        });
        {
            let load = match target.clear {
                Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
                    r: c.r as f64,
                    g: c.g as f64,
                    b: c.b as f64,
                    a: c.a as f64,
                }),
                None => wgpu::LoadOp::Load,
            };
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("frame pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let mut current_pipeline = None;
            for op in &self.ops {
                match op {
                    GpuOp::FrameUniform { offset } => {
                        pass.set_bind_group(0, &self.frame_bind_group, &[*offset]);
                    }
                    GpuOp::Scissor(rect) => {
                        let (x, y, w, h) =
                            scissor_to_target(*rect, target.width, target.height);
                        pass.set_scissor_rect(x, y, w, h);
                    }
                    GpuOp::Quad {
                        pipeline,
                        texture,
                        uniform_offset,
                    } => {
                        self.bind_draw(
                            &mut pass,
                            &mut current_pipeline,
                            *pipeline,
                            *texture,
                            *uniform_offset,
                        );
                        pass.set_vertex_buffer(0, self.unit_quad.slice(..));
                        pass.draw(0..4, 0..1);
                    }
                    GpuOp::Batch {
                        pipeline,
                        texture,
                        uniform_offset,
                        range,
                    } => {
                        self.bind_draw(
                            &mut pass,
                            &mut current_pipeline,
                            *pipeline,
                            *texture,
                            *uniform_offset,
                        );
                        pass.set_vertex_buffer(
                            0,
                            self.vertex_buffer
                                .buffer
                                .slice(range.vertex_offset..range.vertex_offset + range.vertex_bytes),
                        );
                        pass.set_index_buffer(
                            self.index_buffer
                                .buffer
                                .slice(range.index_offset..range.index_offset + range.index_bytes),
                            wgpu::IndexFormat::Uint16,
                        );
                        pass.draw_indexed(0..range.index_count, 0, 0..1);
                    }
                }
            }
        }
        queue.submit(std::iter::once(encoder.finish()));

        self.ops.clear();
        self.frame_staging.clear();
        self.draw_staging.clear();
        self.vertex_staging.clear();
        self.index_staging.clear();
        self.pending_batch = None;
        self.reallocate = false;
    }

    fn bind_draw(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        current: &mut Option<PipelineKind>,
        pipeline: PipelineKind,
        texture: TextureId,
        uniform_offset: u32,
    ) {
        if *current != Some(pipeline) {
            pass.set_pipeline(match pipeline {
                PipelineKind::Quad => &self.quad_pipeline,
                PipelineKind::QuadArray => &self.quad_array_pipeline,
                PipelineKind::BatchQuad => &self.batch_pipeline,
                PipelineKind::BatchQuadArray => &self.batch_array_pipeline,
            });
            *current = Some(pipeline);
        }
        pass.set_bind_group(1, &self.draw_bind_group, &[uniform_offset]);
        pass.set_bind_group(2, &self.textures[&texture].bind_group, &[]);
    }

    /// Snapshot the pending uniform block into the staging arena, returning
    /// its dynamic offset.
    fn push_draw_uniforms(&mut self) -> u32 {
        let offset = self.draw_staging.len() as u32;
        let mut block = [0u8; UNIFORM_STRIDE];
        block[..std::mem::size_of::<DrawUniform>()]
            .copy_from_slice(bytemuck::bytes_of(&self.pending_uniforms));
        self.draw_staging.extend_from_slice(&block);
        offset
    }
}

impl RenderBackend for WgpuBackend {
    fn texture_info(&self, texture: TextureId) -> TextureInfo {
        self.textures[&texture].info
    }

    fn set_proj_view(&mut self, matrices: ProjViewMatrices, reallocate: bool) {
        let offset = self.frame_staging.len() as u32;
        let uniform = FrameUniform {
            projection: mat3_columns(&matrices.projection),
            view: mat3_columns(&matrices.view),
        };
        let mut block = [0u8; UNIFORM_STRIDE];
        block[..std::mem::size_of::<FrameUniform>()]
            .copy_from_slice(bytemuck::bytes_of(&uniform));
        self.frame_staging.extend_from_slice(&block);
        self.ops.push(GpuOp::FrameUniform { offset });
        self.reallocate |= reallocate;
    }

    fn bind_program(&mut self, program: ProgramKind) {
        self.pending_program = program;
    }

    fn set_uniform(&mut self, uniform: Uniform, value: UniformValue) {
        let u = &mut self.pending_uniforms;
        match (uniform, value) {
            (Uniform::ModelMatrix, UniformValue::Mat3(m)) => u.model = mat3_columns(&m),
            (Uniform::UvRect, UniformValue::Vec4(v)) => u.uv_rect = v,
            (Uniform::Modulate, UniformValue::Color(c)) => u.modulate = c.to_array(),
            (Uniform::Modulate, UniformValue::Vec4(v)) => u.modulate = v,
            (Uniform::ArrayLayer, UniformValue::Float(f)) => u.array_layer = f,
            (uniform, value) => panic!("uniform {uniform:?} cannot hold {value:?}"),
        }
    }

    fn bind_texture(&mut self, texture: TextureId, _arrayed: bool) {
        self.pending_texture = Some(texture);
    }

    fn upload_quad_buffers(&mut self, vertices: &[Vertex2D], indices: &[u16], reallocate: bool) {
        let vertex_offset = (self.vertex_staging.len() * std::mem::size_of::<Vertex2D>()) as u64;
        let index_offset = (self.index_staging.len() * std::mem::size_of::<u16>()) as u64;
        self.vertex_staging.extend_from_slice(vertices);
        self.index_staging.extend_from_slice(indices);
        self.pending_batch = Some(BatchRange {
            vertex_offset,
            vertex_bytes: (vertices.len() * std::mem::size_of::<Vertex2D>()) as u64,
            index_offset,
            index_bytes: (indices.len() * std::mem::size_of::<u16>()) as u64,
            index_count: indices.len() as u32,
        });
        self.reallocate |= reallocate;
    }

    fn draw_batch(&mut self, index_count: u32) {
        let range = self
            .pending_batch
            .take()
            .expect("draw_batch without a preceding buffer upload");
        debug_assert_eq!(range.index_count, index_count);
        let texture = self.pending_texture.expect("draw without a bound texture");
        let uniform_offset = self.push_draw_uniforms();
        let pipeline = match self.pending_program {
            ProgramKind::Quad => PipelineKind::BatchQuad,
            ProgramKind::QuadArray => PipelineKind::BatchQuadArray,
        };
        self.ops.push(GpuOp::Batch {
            pipeline,
            texture,
            uniform_offset,
            range,
        });
    }

    fn draw_quad(&mut self) {
        let texture = self.pending_texture.expect("draw without a bound texture");
        let uniform_offset = self.push_draw_uniforms();
        let pipeline = match self.pending_program {
            ProgramKind::Quad => PipelineKind::Quad,
            ProgramKind::QuadArray => PipelineKind::QuadArray,
        };
        self.ops.push(GpuOp::Quad {
            pipeline,
            texture,
            uniform_offset,
        });
    }

    fn set_scissor_enabled(&mut self, enabled: bool) {
        // Enabling is implicit in the rect that follows; wgpu has no
        // standalone scissor toggle, disabling restores the full target.
        if !enabled {
            self.ops.push(GpuOp::Scissor(None));
        }
    }

    fn set_scissor_rect(&mut self, rect: Rect<i32>) {
        self.ops.push(GpuOp::Scissor(Some(rect)));
    }
}

/// Convert a bottom-left-origin scissor rect to wgpu's top-left origin,
/// clamped inside the target. `None` restores the full target.
fn scissor_to_target(rect: Option<Rect<i32>>, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let Some(rect) = rect else {
        return (0, 0, width, height);
    };
    let x = rect.x.clamp(0, width as i32) as u32;
    let top = (height as i32 - rect.y - rect.height).clamp(0, height as i32) as u32;
    let w = (rect.width.max(0) as u32).min(width - x);
    let h = (rect.height.max(0) as u32).min(height - top);
    (x, top, w, h)
}

fn uniform_layout(
    device: &wgpu::Device,
    label: &str,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

fn uniform_bind_group(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    buffer: &wgpu::Buffer,
    binding_size: u64,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer,
                offset: 0,
                size: wgpu::BufferSize::new(binding_size),
            }),
        }],
    })
}

fn texture_bind_layout(
    device: &wgpu::Device,
    dimension: wgpu::TextureViewDimension,
) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("texture layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: dimension,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

/// `batched` selects the indexed-strip vertex entry point and enables the
/// `0xFFFF` primitive-restart sentinel via the strip index format.
fn build_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    target_format: wgpu::TextureFormat,
    batched: bool,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some(if batched { "vs_batch" } else { "vs_quad" }),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<Vertex2D>() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &[
                    wgpu::VertexAttribute {
                        format: wgpu::VertexFormat::Float32x2,
                        offset: 0,
                        shader_location: 0,
                    },
                    wgpu::VertexAttribute {
                        format: wgpu::VertexFormat::Float32x2,
                        offset: 8,
                        shader_location: 1,
                    },
                    wgpu::VertexAttribute {
                        format: wgpu::VertexFormat::Float32,
                        offset: 16,
                        shader_location: 2,
                    },
                ],
            }],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: target_format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            strip_index_format: if batched {
                Some(wgpu::IndexFormat::Uint16)
            } else {
                None
            },
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Plain 2D variant. The immediate and batched entry points are identical
/// here; the split mirrors the array shader, where they differ.
const QUAD_SHADER: &str = r#"
struct FrameUniform {
    projection: mat3x3<f32>,
    view: mat3x3<f32>,
}

struct DrawUniform {
    model: mat3x3<f32>,
    uv_rect: vec4<f32>,
    modulate: vec4<f32>,
    array_layer: f32,
}

@group(0) @binding(0) var<uniform> frame: FrameUniform;
@group(1) @binding(0) var<uniform> draw: DrawUniform;
@group(2) @binding(0) var quad_texture: texture_2d<f32>;
@group(2) @binding(1) var quad_sampler: sampler;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) layer: f32,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

fn project(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    let world = frame.view * (draw.model * vec3<f32>(input.position, 1.0));
    let clip = frame.projection * vec3<f32>(world.xy, 1.0);
    output.position = vec4<f32>(clip.xy, 0.0, 1.0);
    output.uv = vec2<f32>(
        mix(draw.uv_rect.x, draw.uv_rect.z, input.uv.x),
        mix(draw.uv_rect.y, draw.uv_rect.w, input.uv.y),
    );
    return output;
}

@vertex
fn vs_quad(input: VertexInput) -> VertexOutput {
    return project(input);
}

@vertex
fn vs_batch(input: VertexInput) -> VertexOutput {
    return project(input);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(quad_texture, quad_sampler, input.uv) * draw.modulate;
}
"#;

/// 2D-array variant. The immediate path takes the layer from the draw
/// uniforms; the batched path takes it from the per-vertex attribute.
const QUAD_ARRAY_SHADER: &str = r#"
struct FrameUniform {
    projection: mat3x3<f32>,
    view: mat3x3<f32>,
}

struct DrawUniform {
    model: mat3x3<f32>,
    uv_rect: vec4<f32>,
    modulate: vec4<f32>,
    array_layer: f32,
}

@group(0) @binding(0) var<uniform> frame: FrameUniform;
@group(1) @binding(0) var<uniform> draw: DrawUniform;
@group(2) @binding(0) var quad_texture: texture_2d_array<f32>;
@group(2) @binding(1) var quad_sampler: sampler;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) layer: f32,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) layer: f32,
}

fn project(input: VertexInput, layer: f32) -> VertexOutput {
    var output: VertexOutput;
    let world = frame.view * (draw.model * vec3<f32>(input.position, 1.0));
    let clip = frame.projection * vec3<f32>(world.xy, 1.0);
    output.position = vec4<f32>(clip.xy, 0.0, 1.0);
    output.uv = vec2<f32>(
        mix(draw.uv_rect.x, draw.uv_rect.z, input.uv.x),
        mix(draw.uv_rect.y, draw.uv_rect.w, input.uv.y),
    );
    output.layer = layer;
    return output;
}

@vertex
fn vs_quad(input: VertexInput) -> VertexOutput {
    return project(input, draw.array_layer);
}

@vertex
fn vs_batch(input: VertexInput) -> VertexOutput {
    return project(input, input.layer);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let layer = i32(round(max(input.layer, 0.0)));
    return textureSample(quad_texture, quad_sampler, input.uv, layer) * draw.modulate;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_blocks_fit_the_dynamic_stride() {
        assert!(std::mem::size_of::<FrameUniform>() <= UNIFORM_STRIDE);
        assert!(std::mem::size_of::<DrawUniform>() <= UNIFORM_STRIDE);
        // mat3x3 uniform layout: 3 columns of 16 bytes.
        assert_eq!(std::mem::size_of::<FrameUniform>(), 96);
        assert_eq!(std::mem::size_of::<DrawUniform>(), 96);
    }

    #[test]
    fn scissor_converts_to_top_left_origin() {
        // A 100x50 rect 20 pixels above the bottom of a 600-tall target
        // starts 530 pixels down from the top.
        let (x, y, w, h) = scissor_to_target(Some(Rect::new(10, 20, 100, 50)), 800, 600);
        assert_eq!((x, y, w, h), (10, 530, 100, 50));
    }

    #[test]
    fn scissor_none_restores_full_target() {
        assert_eq!(scissor_to_target(None, 800, 600), (0, 0, 800, 600));
    }

    #[test]
    fn scissor_clamps_to_target_bounds() {
        let (x, y, w, h) = scissor_to_target(Some(Rect::new(-10, -10, 2000, 2000)), 800, 600);
        assert_eq!(x, 0);
        assert_eq!(y, 0);
        assert!(w <= 800 && h <= 600);
    }
}
