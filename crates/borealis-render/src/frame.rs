//! The per-frame pass driver.
//!
//! A frame is three phases over the same [`RenderHandle`]:
//! screen-space overlays below the world, world-space content (tile grids,
//! then depth-sorted entity sprites), and screen-space UI. Each pass ends
//! with a full flush so projection changes never straddle recorded work.

use tracing::trace;

use crate::backend::RenderBackend;
use crate::batch::FlushContext;
use crate::camera::{self, Eye};
use crate::error::RenderError;
use crate::handle::{DrawCtx, RenderHandle, Space};

/// A screen-space layer drawn below the world, ordered by z-index.
pub trait Overlay {
    /// Draw order; lower draws first. Ties keep registration order.
    fn z_index(&self) -> i32 {
        0
    }

    fn draw(&mut self, render: &mut RenderHandle);
}

/// A world-space sprite, ordered by draw depth within the entity pass.
pub trait EntitySprite {
    /// Draw order; lower draws first. Ties keep the order returned by
    /// [`FrameScene::entities`].
    fn draw_depth(&self) -> i32;

    fn draw(&mut self, ctx: &mut DrawCtx<'_>);
}

/// The content of one frame, queried pass by pass.
///
/// The default implementations draw nothing, so scenes only implement the
/// passes they populate.
pub trait FrameScene {
    /// Screen-space overlays composited beneath the world.
    fn overlays_below_world(&mut self) -> Vec<&mut dyn Overlay> {
        Vec::new()
    }

    /// World-space tile grids. Handles created here are world-space.
    fn draw_tiles(&mut self, _render: &mut RenderHandle) {}

    /// World-space entity sprites. All sprites share one drawing handle and
    /// are drawn in ascending draw depth.
    fn entities(&mut self) -> Vec<&mut dyn EntitySprite> {
        Vec::new()
    }

    /// Screen-space user interface, drawn above everything else.
    fn draw_ui(&mut self, _render: &mut RenderHandle) {}
}

/// Owns the recording and flush state and runs the fixed pass sequence.
pub struct FrameDriver {
    render: RenderHandle,
    flush: FlushContext,
    eye: Eye,
    width: f32,
    height: f32,
    reallocate_buffers: bool,
}

impl FrameDriver {
    /// `width`/`height` are the render target size in pixels.
    ///
    /// `reallocate_buffers` makes every per-frame GPU upload a full buffer
    /// reallocation instead of a sub-range update, for drivers where
    /// persistent buffer updates misbehave.
    pub fn new(width: f32, height: f32, reallocate_buffers: bool) -> Self {
        Self {
            render: RenderHandle::new(),
            flush: FlushContext::new(reallocate_buffers),
            eye: Eye::default(),
            width,
            height,
            reallocate_buffers,
        }
    }

    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.width = width;
        self.height = height;
    }

    pub fn eye(&self) -> &Eye {
        &self.eye
    }

    pub fn eye_mut(&mut self) -> &mut Eye {
        &mut self.eye
    }

    /// Record and flush one full frame against `backend`.
    pub fn render_frame<B: RenderBackend>(
        &mut self,
        backend: &mut B,
        scene: &mut (impl FrameScene + ?Sized),
    ) -> Result<(), RenderError> {
        self.flush.begin_frame();

        // Screen phase: overlays below the world.
        self.enter_space(backend, Space::Screen);
        let mut overlays = scene.overlays_below_world();
        overlays.sort_by_key(|o| o.z_index());
        trace!(overlays = overlays.len(), "overlay pass");
        for overlay in overlays {
            overlay.draw(&mut self.render);
        }
        self.flush.flush_render_handle(backend, &mut self.render)?;

        // World phase: tile grids first, then entities.
        self.enter_space(backend, Space::World);
        scene.draw_tiles(&mut self.render);
        self.flush.flush_render_handle(backend, &mut self.render)?;

        let handle = self.render.create_handle(Space::World);
        let mut entities = scene.entities();
        entities.sort_by_key(|e| e.draw_depth());
        trace!(entities = entities.len(), "entity pass");
        for entity in entities {
            let mut ctx = DrawCtx::new(&mut self.render, handle);
            entity.draw(&mut ctx);
        }
        self.flush.flush_render_handle(backend, &mut self.render)?;

        // Screen phase: UI on top.
        self.enter_space(backend, Space::Screen);
        scene.draw_ui(&mut self.render);
        self.flush.flush_render_handle(backend, &mut self.render)?;

        Ok(())
    }

    fn enter_space<B: RenderBackend>(&mut self, backend: &mut B, space: Space) {
        let matrices = match space {
            Space::Screen => camera::screen_matrices(self.width, self.height),
            Space::World => camera::world_matrices(self.width, self.height, &self.eye),
        };
        backend.set_proj_view(matrices, self.reallocate_buffers);
        self.render.set_active_space(space);
        self.flush.set_space(space);
    }
}
