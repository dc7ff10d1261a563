//! The seam between the flush engine and the GPU.
//!
//! Everything the engine needs from a graphics API is expressed through
//! [`RenderBackend`], so the batching logic can be driven against the
//! call-recording mock in [`crate::testing`] as well as the real wgpu
//! implementation in [`crate::wgpu_backend`].

use borealis_core::Color;
use borealis_core::geometry::Rect;
use glam::Mat3;

use crate::batch::Vertex2D;
use crate::texture::{TextureId, TextureInfo};

/// The shader variant a draw is issued with.
///
/// Array-layered textures need a vertex layout and sampler type of their
/// own, so the two variants are distinct pipelines on every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    /// Samples a plain 2D texture.
    Quad,
    /// Samples a 2D-array texture using the per-vertex/uniform layer index.
    QuadArray,
}

/// Named uniforms of the quad programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uniform {
    /// Model transform applied to quad-local positions.
    ModelMatrix,
    /// Normalized UV rectangle `[u0, v0, u1, v1]` remapping the unit quad.
    UvRect,
    /// Per-draw RGBA multiplier.
    Modulate,
    /// Array layer for the single-quad arrayed path.
    ArrayLayer,
}

/// Value assigned to a [`Uniform`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Mat3(Mat3),
    Vec4([f32; 4]),
    Float(f32),
    Color(Color),
}

/// Combined projection and view matrices for one rendering space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjViewMatrices {
    pub projection: Mat3,
    pub view: Mat3,
}

/// Graphics backend driven by the flush engine and the frame driver.
///
/// Failures inside a backend (buffer allocation, shader binding) are fatal:
/// a frame that cannot be submitted cannot be displayed, and rendering is
/// resubmitted fresh every frame anyway. Implementations panic rather than
/// plumb `Result` through the hot path.
pub trait RenderBackend {
    /// Size/layout metadata for a loaded texture.
    fn texture_info(&self, texture: TextureId) -> TextureInfo;

    /// Upload the projection/view matrices for the current space phase.
    ///
    /// `reallocate` requests full buffer reallocation instead of a
    /// sub-range update, for drivers where persistent buffers misbehave.
    fn set_proj_view(&mut self, matrices: ProjViewMatrices, reallocate: bool);

    /// Bind a shader program variant.
    fn bind_program(&mut self, program: ProgramKind);

    /// Set a named uniform on the currently bound program.
    fn set_uniform(&mut self, uniform: Uniform, value: UniformValue);

    /// Bind `texture` to the sampling unit; `arrayed` picks the 2D-array
    /// binding point.
    fn bind_texture(&mut self, texture: TextureId, arrayed: bool);

    /// Upload interleaved batch vertex/index data to the GPU-resident
    /// scratch buffers, either by sub-range update or full reallocation.
    fn upload_quad_buffers(&mut self, vertices: &[Vertex2D], indices: &[u16], reallocate: bool);

    /// Issue one indexed triangle-strip draw over the batch buffers with
    /// `0xFFFF` acting as the primitive-restart sentinel.
    fn draw_batch(&mut self, index_count: u32);

    /// Issue one non-indexed 4-vertex triangle-strip draw of the unit quad.
    fn draw_quad(&mut self);

    /// Toggle scissor testing. Only called on actual enable/disable edges.
    fn set_scissor_enabled(&mut self, enabled: bool);

    /// Set the clip rectangle in bottom-left-origin pixel coordinates.
    fn set_scissor_rect(&mut self, rect: Rect<i32>);
}
