//! Call-recording mock backend for testing the engine without a GPU.
//!
//! Every [`RenderBackend`] call is recorded as a [`BackendCall`] so tests
//! can assert on draw-call counts, uniform values and upload sizes.

use ahash::HashMap;
use borealis_core::geometry::Rect;

use crate::backend::{ProgramKind, ProjViewMatrices, RenderBackend, Uniform, UniformValue};
use crate::batch::Vertex2D;
use crate::texture::{TextureId, TextureInfo};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    SetProjView {
        matrices: ProjViewMatrices,
        reallocate: bool,
    },
    BindProgram(ProgramKind),
    SetUniform {
        uniform: Uniform,
        value: UniformValue,
    },
    BindTexture {
        texture: TextureId,
        arrayed: bool,
    },
    UploadQuadBuffers {
        vertex_count: usize,
        index_count: usize,
        reallocate: bool,
    },
    DrawBatch {
        index_count: u32,
    },
    DrawQuad,
    SetScissorEnabled(bool),
    SetScissorRect(Rect<i32>),
}

/// Mock backend that records calls instead of talking to a GPU.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    textures: HashMap<TextureId, TextureInfo>,
    next_texture: u32,
    calls: Vec<BackendCall>,
    last_vertices: Vec<Vertex2D>,
    last_indices: Vec<u16>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a texture and return its id.
    pub fn add_texture(&mut self, width: u32, height: u32, arrayed: bool) -> TextureId {
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(
            id,
            TextureInfo {
                width,
                height,
                arrayed,
            },
        );
        id
    }

    /// All recorded calls, in order.
    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    /// Clear recorded calls (useful between test steps).
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Number of batched draw submissions.
    pub fn batch_draws(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::DrawBatch { .. }))
    }

    /// Number of single-quad draw submissions.
    pub fn quad_draws(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::DrawQuad))
    }

    /// Total draw submissions of either kind.
    pub fn draw_calls(&self) -> usize {
        self.batch_draws() + self.quad_draws()
    }

    /// Number of scissor-test toggles.
    pub fn scissor_toggles(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::SetScissorEnabled(_)))
    }

    /// Vertex data of the most recent batch upload.
    pub fn last_vertices(&self) -> &[Vertex2D] {
        &self.last_vertices
    }

    /// Index data of the most recent batch upload.
    pub fn last_indices(&self) -> &[u16] {
        &self.last_indices
    }

    /// The most recently set value of `uniform`, if any.
    pub fn last_uniform(&self, uniform: Uniform) -> Option<UniformValue> {
        self.calls.iter().rev().find_map(|c| match c {
            BackendCall::SetUniform { uniform: u, value } if *u == uniform => Some(*value),
            _ => None,
        })
    }

    fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }
}

impl RenderBackend for RecordingBackend {
    fn texture_info(&self, texture: TextureId) -> TextureInfo {
        self.textures[&texture]
    }

    fn set_proj_view(&mut self, matrices: ProjViewMatrices, reallocate: bool) {
        self.calls.push(BackendCall::SetProjView {
            matrices,
            reallocate,
        });
    }

    fn bind_program(&mut self, program: ProgramKind) {
        self.calls.push(BackendCall::BindProgram(program));
    }

    fn set_uniform(&mut self, uniform: Uniform, value: UniformValue) {
        self.calls.push(BackendCall::SetUniform { uniform, value });
    }

    fn bind_texture(&mut self, texture: TextureId, arrayed: bool) {
        self.calls.push(BackendCall::BindTexture { texture, arrayed });
    }

    fn upload_quad_buffers(&mut self, vertices: &[Vertex2D], indices: &[u16], reallocate: bool) {
        self.last_vertices = vertices.to_vec();
        self.last_indices = indices.to_vec();
        self.calls.push(BackendCall::UploadQuadBuffers {
            vertex_count: vertices.len(),
            index_count: indices.len(),
            reallocate,
        });
    }

    fn draw_batch(&mut self, index_count: u32) {
        self.calls.push(BackendCall::DrawBatch { index_count });
    }

    fn draw_quad(&mut self) {
        self.calls.push(BackendCall::DrawQuad);
    }

    fn set_scissor_enabled(&mut self, enabled: bool) {
        self.calls.push(BackendCall::SetScissorEnabled(enabled));
    }

    fn set_scissor_rect(&mut self, rect: Rect<i32>) {
        self.calls.push(BackendCall::SetScissorRect(rect));
    }
}
