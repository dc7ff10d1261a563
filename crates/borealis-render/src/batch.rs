//! The batching & flush engine.
//!
//! Replays a command list in recording order while maintaining a run of
//! pending same-texture, same-modulate quads. Runs long enough to amortize
//! the buffer upload become one indexed multi-quad draw; short runs are
//! replayed through the single-quad uniform path, which is cheaper than the
//! upload for a handful of quads.

use borealis_core::Color;
use borealis_core::geometry::Rect;
use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Vec2};
use static_assertions::const_assert;

use crate::backend::{ProgramKind, RenderBackend, Uniform, UniformValue};
use crate::command::{CommandList, RenderCommand, TextureCommand};
use crate::error::RenderError;
use crate::handle::{RenderHandle, Space};
use crate::texture::{TextureId, TextureInfo};

/// Minimum run length worth batching. Below this, per-quad draws beat the
/// buffer-upload overhead.
pub const TEXTURE_BATCH_THRESHOLD: usize = 8;

/// Maximum quads in one hardware draw. `(2^16 / 4) - 1` so vertex indices
/// fit in `u16` with `0xFFFF` left free for primitive restart.
pub const MAX_BATCH_QUADS: usize = 16_333;

/// Vertex scratch capacity: 4 corners per quad.
pub const MAX_BATCH_VERTICES: usize = MAX_BATCH_QUADS * 4;

/// Index scratch capacity: 4 corner indices plus one restart per quad.
pub const MAX_BATCH_INDICES: usize = MAX_BATCH_QUADS * 5;

/// Reserved index value terminating one strip and starting the next within
/// a single draw call. Never used as a real vertex index.
pub const PRIMITIVE_RESTART_INDEX: u16 = u16::MAX;

const_assert!(MAX_BATCH_QUADS * 4 < 65_536);

/// Interleaved vertex format of the batch buffers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex2D {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    /// Array layer, already 0-based. `-1.0` for non-layered textures
    /// (ignored by the plain shader variant).
    pub layer: f32,
}

/// One pending quad in the current batch run.
#[derive(Debug, Clone, Copy)]
struct BatchQuad {
    a: Vec2,
    b: Vec2,
    sub_region: Option<Rect<f32>>,
    array_index: u32,
    /// Index into the parallel transform slot list.
    transform: u32,
}

/// The run key: a run must be homogeneous in both fields.
#[derive(Debug, Clone, Copy, PartialEq)]
struct BatchKey {
    texture: TextureId,
    modulate: Color,
}

/// Per-render-thread flush state.
///
/// Holds the active transform/scissor state, the open batch run and the
/// reused vertex/index scratch buffers. There is exactly one of these per
/// render thread; it must be fully drained (flushed) before its state is
/// repurposed for the next list or frame.
pub struct FlushContext {
    space: Space,
    model_matrix: Mat3,
    /// The next batched quad must (re)establish its transform slot.
    matrices_dirty: bool,
    scissoring: bool,
    reallocate_buffers: bool,
    key: Option<BatchKey>,
    quads: Vec<BatchQuad>,
    /// Transform slots referenced by quads; consecutive identical
    /// transforms share one slot.
    matrices: Vec<Mat3>,
    vertices: Vec<Vertex2D>,
    indices: Vec<u16>,
}

impl FlushContext {
    /// Create a flush context with pre-sized scratch buffers.
    ///
    /// `reallocate_buffers` makes every GPU upload a full reallocation
    /// instead of a sub-range update.
    pub fn new(reallocate_buffers: bool) -> Self {
        Self {
            space: Space::Screen,
            model_matrix: Mat3::IDENTITY,
            matrices_dirty: true,
            scissoring: false,
            reallocate_buffers,
            key: None,
            quads: Vec::with_capacity(MAX_BATCH_QUADS),
            matrices: Vec::new(),
            vertices: Vec::with_capacity(MAX_BATCH_VERTICES),
            indices: Vec::with_capacity(MAX_BATCH_INDICES),
        }
    }

    /// The space whose texture-orientation convention is active.
    pub fn space(&self) -> Space {
        self.space
    }

    /// Switch the active space. Must not be called with an open batch run;
    /// the frame driver flushes between phases.
    pub fn set_space(&mut self, space: Space) {
        debug_assert!(self.quads.is_empty(), "space change with an open batch run");
        self.space = space;
    }

    /// Reset per-frame state: the active transform starts at identity.
    pub fn begin_frame(&mut self) {
        self.model_matrix = Mat3::IDENTITY;
        self.matrices_dirty = true;
    }

    /// Flush every list recorded into `render` in creation order, then close
    /// any open run and force scissor off.
    ///
    /// Consumes the frame's lists: all outstanding drawing handles become
    /// stale and the list storage returns to the pool.
    pub fn flush_render_handle<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        render: &mut RenderHandle,
    ) -> Result<(), RenderError> {
        let mut result = Ok(());
        for list in render.begin_flush() {
            if result.is_ok() {
                result = self.process_list(backend, &list);
            }
            render.recycle(list);
        }
        if result.is_ok() {
            result = self.flush_batch(backend);
        } else {
            // A failed flush abandons the open run; no quads, slots or run
            // key from this frame may survive into the next one.
            self.quads.clear();
            self.matrices.clear();
            self.matrices_dirty = true;
            self.key = None;
        }
        self.disable_scissor(backend);
        render.end_flush();
        result
    }

    /// Replay one command list in order, batching texture draws.
    pub fn process_list<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        list: &CommandList,
    ) -> Result<(), RenderError> {
        for command in list.commands() {
            match command {
                RenderCommand::Texture(cmd) => self.batch_quad(backend, cmd)?,
                RenderCommand::Transform(matrix) => {
                    self.model_matrix = *matrix;
                    self.matrices_dirty = true;
                }
                RenderCommand::Scissor(rect) => {
                    // Scissor changes must not be merged across a batch.
                    self.flush_batch(backend)?;
                    let was_scissoring = self.scissoring;
                    self.scissoring = rect.is_some();
                    if let Some(rect) = rect {
                        if !was_scissoring {
                            backend.set_scissor_enabled(true);
                        }
                        backend.set_scissor_rect(*rect);
                    } else if was_scissoring {
                        backend.set_scissor_enabled(false);
                    }
                }
            }
        }
        Ok(())
    }

    /// Append a texture draw to the batch run, closing the run first if the
    /// (texture, modulate) key changes.
    fn batch_quad<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        cmd: &TextureCommand,
    ) -> Result<(), RenderError> {
        let key = BatchKey {
            texture: cmd.texture,
            modulate: cmd.modulate,
        };
        match self.key {
            Some(active) if active != key => {
                self.flush_batch(backend)?;
                self.key = Some(key);
            }
            Some(_) => {}
            None => self.key = Some(key),
        }

        if self.quads.len() == MAX_BATCH_QUADS {
            return Err(RenderError::BatchCapacity {
                quads: self.quads.len() + 1,
            });
        }

        if self.matrices_dirty {
            self.matrices_dirty = false;
            if self.matrices.last() != Some(&self.model_matrix) {
                self.matrices.push(self.model_matrix);
            }
        }

        self.quads.push(BatchQuad {
            a: cmd.a,
            b: cmd.b,
            sub_region: cmd.sub_region,
            array_index: cmd.array_index,
            transform: (self.matrices.len() - 1) as u32,
        });
        Ok(())
    }

    /// Close the current batch run, submitting it as one multi-quad draw or
    /// replaying it through the single-quad path when below threshold.
    fn flush_batch<B: RenderBackend>(&mut self, backend: &mut B) -> Result<(), RenderError> {
        let Some(key) = self.key else {
            debug_assert!(self.quads.is_empty());
            return Ok(());
        };
        let info = backend.texture_info(key.texture);

        if self.quads.len() < TEXTURE_BATCH_THRESHOLD {
            for i in 0..self.quads.len() {
                let quad = self.quads[i];
                let transform = self.matrices[quad.transform as usize];
                let cmd = TextureCommand {
                    texture: key.texture,
                    a: quad.a,
                    b: quad.b,
                    sub_region: quad.sub_region,
                    array_index: quad.array_index,
                    modulate: key.modulate,
                };
                self.draw_immediate(backend, &cmd, &transform, &info);
            }
        } else {
            tracing::trace!(quads = self.quads.len(), "submitting quad batch");
            self.vertices.clear();
            self.indices.clear();
            for (nth, quad) in self.quads.iter().enumerate() {
                let transform = &self.matrices[quad.transform as usize];
                let [u0, v0, u1, v1] = normalized_uv(quad.sub_region.as_ref(), &info, self.space);
                let layer = quad.array_index as f32 - 1.0;

                let bl = transform.transform_point2(quad.a);
                let br = transform.transform_point2(Vec2::new(quad.b.x, quad.a.y));
                let tr = transform.transform_point2(quad.b);
                let tl = transform.transform_point2(Vec2::new(quad.a.x, quad.b.y));
                self.vertices.extend_from_slice(&[
                    Vertex2D {
                        position: bl.to_array(),
                        uv: [u0, v1],
                        layer,
                    },
                    Vertex2D {
                        position: br.to_array(),
                        uv: [u1, v1],
                        layer,
                    },
                    Vertex2D {
                        position: tl.to_array(),
                        uv: [u0, v0],
                        layer,
                    },
                    Vertex2D {
                        position: tr.to_array(),
                        uv: [u1, v0],
                        layer,
                    },
                ]);

                let base = (nth * 4) as u16;
                self.indices.extend_from_slice(&[
                    base,
                    base + 1,
                    base + 2,
                    base + 3,
                    PRIMITIVE_RESTART_INDEX,
                ]);
            }

            backend.upload_quad_buffers(&self.vertices, &self.indices, self.reallocate_buffers);
            backend.bind_texture(key.texture, info.arrayed);
            backend.bind_program(if info.arrayed {
                ProgramKind::QuadArray
            } else {
                ProgramKind::Quad
            });
            // Transforms are baked into the mesh; reset the per-quad uniforms
            // so they don't carry over from an earlier immediate draw.
            backend.set_uniform(Uniform::ModelMatrix, UniformValue::Mat3(Mat3::IDENTITY));
            backend.set_uniform(Uniform::UvRect, UniformValue::Vec4([0.0, 0.0, 1.0, 1.0]));
            backend.set_uniform(Uniform::Modulate, UniformValue::Color(key.modulate));
            backend.draw_batch(self.indices.len() as u32);
        }

        self.quads.clear();
        self.matrices.clear();
        self.matrices_dirty = true;
        self.key = None;
        Ok(())
    }

    /// The single-quad immediate path, also used to replay short runs.
    ///
    /// Composes a rectangle-shape transform (scale `b - a`, translate `a`)
    /// with the given model transform and issues one 4-vertex strip. Does
    /// not touch the batch scratch buffers.
    fn draw_immediate<B: RenderBackend>(
        &self,
        backend: &mut B,
        cmd: &TextureCommand,
        transform: &Mat3,
        info: &TextureInfo,
    ) {
        backend.bind_program(if info.arrayed {
            ProgramKind::QuadArray
        } else {
            ProgramKind::Quad
        });
        if info.arrayed {
            backend.set_uniform(
                Uniform::ArrayLayer,
                UniformValue::Float(cmd.array_index as f32 - 1.0),
            );
        }

        let uv = normalized_uv(cmd.sub_region.as_ref(), info, self.space);
        backend.set_uniform(Uniform::UvRect, UniformValue::Vec4(uv));
        backend.set_uniform(Uniform::Modulate, UniformValue::Color(cmd.modulate));

        let rect_transform = Mat3::from_scale_angle_translation(cmd.b - cmd.a, 0.0, cmd.a);
        backend.set_uniform(
            Uniform::ModelMatrix,
            UniformValue::Mat3(*transform * rect_transform),
        );

        backend.bind_texture(cmd.texture, info.arrayed);
        backend.draw_quad();
    }

    /// Force scissor testing off at a flush boundary.
    fn disable_scissor<B: RenderBackend>(&mut self, backend: &mut B) {
        if self.scissoring {
            backend.set_scissor_enabled(false);
        }
        self.scissoring = false;
    }
}

/// Normalized UV rectangle `[u0, v0, u1, v1]` for a draw, where `v0` is
/// sampled at the quad's top corners.
///
/// Screen space flips V relative to world space because its vertical axis
/// is inverted with respect to the texture-sample convention. Both the
/// batched and the single-quad path go through this helper so the mirroring
/// is always identical.
fn normalized_uv(sub_region: Option<&Rect<f32>>, info: &TextureInfo, space: Space) -> [f32; 4] {
    match sub_region {
        None => match space {
            Space::World => [0.0, 0.0, 1.0, 1.0],
            Space::Screen => [0.0, 1.0, 1.0, 0.0],
        },
        Some(region) => {
            let w = info.width as f32;
            let h = info.height as f32;
            let (left, top) = (region.x / w, region.y / h);
            let (right, bottom) = (region.right() / w, region.bottom() / h);
            match space {
                Space::World => [left, top, right, bottom],
                Space::Screen => [left, bottom, right, top],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BackendCall, RecordingBackend};
    use crate::texture::TextureRef;

    fn info(width: u32, height: u32) -> TextureInfo {
        TextureInfo {
            width,
            height,
            arrayed: false,
        }
    }

    #[test]
    fn vertex_layout_size() {
        assert_eq!(std::mem::size_of::<Vertex2D>(), 20);
    }

    #[test]
    fn whole_texture_uv_mirrors_in_screen_space() {
        let info = info(64, 64);
        assert_eq!(
            normalized_uv(None, &info, Space::World),
            [0.0, 0.0, 1.0, 1.0]
        );
        assert_eq!(
            normalized_uv(None, &info, Space::Screen),
            [0.0, 1.0, 1.0, 0.0]
        );
    }

    #[test]
    fn sub_region_uv_mirrors_v_only() {
        let info = info(128, 64);
        let region = Rect::new(32.0, 16.0, 64.0, 32.0);
        let world = normalized_uv(Some(&region), &info, Space::World);
        let screen = normalized_uv(Some(&region), &info, Space::Screen);
        assert_eq!(world, [0.25, 0.25, 0.75, 0.75]);
        // U unchanged, V swapped.
        assert_eq!(screen, [world[0], world[3], world[2], world[1]]);
    }

    #[test]
    fn consecutive_identical_transforms_share_a_slot() {
        let mut backend = RecordingBackend::new();
        let tex = backend.add_texture(32, 32, false);
        let mut ctx = FlushContext::new(false);
        ctx.set_space(Space::World);

        let matrix = Mat3::from_scale_angle_translation(Vec2::ONE, 0.0, Vec2::new(3.0, 4.0));
        let mut list = CommandList::default();
        list.push(RenderCommand::Transform(matrix));
        for _ in 0..3 {
            list.push(RenderCommand::Texture(TextureCommand {
                texture: tex,
                a: Vec2::ZERO,
                b: Vec2::ONE,
                sub_region: None,
                array_index: 0,
                modulate: Color::WHITE,
            }));
        }
        // A redundant transform change must not allocate a second slot.
        list.push(RenderCommand::Transform(matrix));
        list.push(RenderCommand::Texture(TextureCommand {
            texture: tex,
            a: Vec2::ZERO,
            b: Vec2::ONE,
            sub_region: None,
            array_index: 0,
            modulate: Color::WHITE,
        }));

        ctx.process_list(&mut backend, &list).unwrap();
        assert_eq!(ctx.matrices.len(), 1);
        assert_eq!(ctx.quads.len(), 4);
        assert!(ctx.quads.iter().all(|q| q.transform == 0));
    }

    #[test]
    fn capacity_error_before_any_partial_draw() {
        let mut backend = RecordingBackend::new();
        let tex = backend.add_texture(32, 32, false);
        let mut ctx = FlushContext::new(false);
        ctx.set_space(Space::World);

        let mut list = CommandList::default();
        for _ in 0..(MAX_BATCH_QUADS + 1) {
            list.push(RenderCommand::Texture(TextureCommand {
                texture: tex,
                a: Vec2::ZERO,
                b: Vec2::ONE,
                sub_region: None,
                array_index: 0,
                modulate: Color::WHITE,
            }));
        }

        let err = ctx.process_list(&mut backend, &list).unwrap_err();
        assert_eq!(
            err,
            RenderError::BatchCapacity {
                quads: MAX_BATCH_QUADS + 1
            }
        );
        assert!(
            !backend
                .calls()
                .iter()
                .any(|c| matches!(c, BackendCall::DrawBatch { .. } | BackendCall::DrawQuad)),
        );
    }

    #[test]
    fn failed_flush_leaves_clean_state() {
        let mut backend = RecordingBackend::new();
        let tex = backend.add_texture(32, 32, false);
        let mut render = RenderHandle::new();
        render.set_active_space(Space::World);
        let mut ctx = FlushContext::new(false);
        ctx.set_space(Space::World);

        let handle = render.create_handle(Space::World);
        render.set_scissor(handle, Some(Rect::new(0, 0, 8, 8)));
        for _ in 0..(MAX_BATCH_QUADS + 1) {
            render.draw_texture_rect(
                handle,
                TextureRef::whole(tex),
                Vec2::ZERO,
                Vec2::ONE,
                Color::WHITE,
                None,
            );
        }
        assert!(ctx.flush_render_handle(&mut backend, &mut render).is_err());
        // The consumed list storage still returns to the pool.
        assert_eq!(render.pool_free_count(), 1);
        // Scissor is forced off at the flush boundary even on failure.
        assert_eq!(
            backend.calls().last(),
            Some(&BackendCall::SetScissorEnabled(false))
        );
        assert!(ctx.quads.is_empty());
        assert!(ctx.matrices.is_empty());
        assert_eq!(ctx.key, None);

        // The next frame starts from a clean run and may switch spaces.
        backend.clear_calls();
        ctx.begin_frame();
        ctx.set_space(Space::Screen);
        render.set_active_space(Space::Screen);
        let handle = render.create_handle(Space::Screen);
        render.draw_texture_rect(
            handle,
            TextureRef::whole(tex),
            Vec2::ZERO,
            Vec2::ONE,
            Color::WHITE,
            None,
        );
        ctx.flush_render_handle(&mut backend, &mut render).unwrap();
        assert_eq!(backend.quad_draws(), 1);
        assert_eq!(backend.batch_draws(), 0);
    }
}
