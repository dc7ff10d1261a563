//! Recording handles: the capability surface handed to scene code.
//!
//! A [`RenderHandle`] owns every command list created during a frame, in
//! creation order. Scene code records through lightweight [`DrawingHandle`]
//! ids; a generation counter bumped at flush time turns any use-after-flush
//! into an immediate panic instead of silent corruption.

use borealis_core::Color;
use borealis_core::geometry::Rect;
use glam::{Mat3, Vec2};

use crate::command::{CommandList, CommandListPool, RenderCommand, TextureCommand};
use crate::texture::TextureRef;

/// The coordinate/projection regime a handle records in.
///
/// Screen space and world space are active during disjoint frame phases and
/// differ in their texture V-axis convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Space {
    Screen,
    World,
}

/// Capability to record into one command list of a [`RenderHandle`].
///
/// Handles are frame-scoped: once the owning frame's lists have been
/// flushed, every handle from that frame is stale and any further recording
/// through it panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawingHandle {
    index: u32,
    generation: u64,
    space: Space,
}

impl DrawingHandle {
    /// The space this handle was created in.
    pub fn space(&self) -> Space {
        self.space
    }
}

/// Owner of all command lists recorded during the current frame.
pub struct RenderHandle {
    lists: Vec<CommandList>,
    pool: CommandListPool,
    generation: u64,
    active_space: Space,
}

impl Default for RenderHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderHandle {
    pub fn new() -> Self {
        Self {
            lists: Vec::new(),
            pool: CommandListPool::new(),
            generation: 0,
            active_space: Space::Screen,
        }
    }

    /// The space new handles are currently allowed to record in.
    pub fn active_space(&self) -> Space {
        self.active_space
    }

    /// Switch the active space. Called by the frame driver between phases;
    /// existing handles keep the space they were created in.
    pub fn set_active_space(&mut self, space: Space) {
        self.active_space = space;
    }

    /// Create a fresh handle backed by an empty (possibly pooled) list.
    ///
    /// # Panics
    ///
    /// Panics if `space` does not match the active rendering space.
    pub fn create_handle(&mut self, space: Space) -> DrawingHandle {
        assert_eq!(
            space, self.active_space,
            "cannot create a {:?}-space drawing handle while rendering in {:?} space",
            space, self.active_space,
        );
        let handle = DrawingHandle {
            index: self.lists.len() as u32,
            generation: self.generation,
            space,
        };
        self.lists.push(self.pool.take());
        handle
    }

    /// Append a model transform change.
    pub fn set_model_transform(&mut self, handle: DrawingHandle, matrix: Mat3) {
        self.list_mut(handle).push(RenderCommand::Transform(matrix));
    }

    /// Append a textured quad draw.
    ///
    /// Atlas references are resolved here: the command stores the source
    /// texture, and a caller-supplied sub-region is translated by the atlas
    /// entry's origin before use. Degenerate rectangles (`a == b`) are
    /// permitted and produce a zero-area quad.
    pub fn draw_texture_rect(
        &mut self,
        handle: DrawingHandle,
        texture: TextureRef,
        a: Vec2,
        b: Vec2,
        modulate: Color,
        sub_region: Option<Rect<f32>>,
    ) {
        let sub_region = match (texture.atlas_region, sub_region) {
            (Some(entry), Some(region)) => Some(region.translated(entry.x, entry.y)),
            (Some(entry), None) => Some(entry),
            (None, region) => region,
        };
        self.list_mut(handle)
            .push(RenderCommand::Texture(TextureCommand {
                texture: texture.id,
                a,
                b,
                sub_region,
                array_index: texture.array_index,
                modulate,
            }));
    }

    /// Append a scissor change; `None` disables clipping.
    pub fn set_scissor(&mut self, handle: DrawingHandle, rect: Option<Rect<i32>>) {
        self.list_mut(handle).push(RenderCommand::Scissor(rect));
    }

    /// Number of lists recorded this frame.
    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    fn list_mut(&mut self, handle: DrawingHandle) -> &mut CommandList {
        assert_eq!(
            handle.generation, self.generation,
            "drawing handle used after its frame was flushed"
        );
        &mut self.lists[handle.index as usize]
    }

    /// Take the frame's lists for flushing, staling every outstanding handle.
    pub(crate) fn begin_flush(&mut self) -> Vec<CommandList> {
        self.generation += 1;
        std::mem::take(&mut self.lists)
    }

    /// Return a consumed list's storage to the pool.
    pub(crate) fn recycle(&mut self, list: CommandList) {
        self.pool.put_back(list);
    }

    /// Mark the flush boundary for pool-overdraw accounting.
    pub(crate) fn end_flush(&mut self) {
        self.pool.end_frame();
    }

    #[cfg(test)]
    pub(crate) fn pool_free_count(&self) -> usize {
        self.pool.free_count()
    }
}

/// Borrow of one handle's recording surface.
///
/// Handed to entity sprites so they can draw without being able to create
/// handles or record into other lists.
pub struct DrawCtx<'a> {
    render: &'a mut RenderHandle,
    handle: DrawingHandle,
}

impl<'a> DrawCtx<'a> {
    pub fn new(render: &'a mut RenderHandle, handle: DrawingHandle) -> Self {
        Self { render, handle }
    }

    pub fn set_model_transform(&mut self, matrix: Mat3) {
        self.render.set_model_transform(self.handle, matrix);
    }

    pub fn draw_texture_rect(
        &mut self,
        texture: TextureRef,
        a: Vec2,
        b: Vec2,
        modulate: Color,
        sub_region: Option<Rect<f32>>,
    ) {
        self.render
            .draw_texture_rect(self.handle, texture, a, b, modulate, sub_region);
    }

    pub fn set_scissor(&mut self, rect: Option<Rect<i32>>) {
        self.render.set_scissor(self.handle, rect);
    }
}
