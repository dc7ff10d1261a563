//! The deferred command representation and pooled command lists.
//!
//! Commands are a plain enum rather than trait objects so the hot flush loop
//! stays branch-predictable and free of virtual dispatch.

use borealis_core::Color;
use borealis_core::geometry::Rect;
use glam::{Mat3, Vec2};

use crate::texture::TextureId;

/// A single recorded draw-affecting operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderCommand {
    /// Draw an axis-aligned textured quad.
    Texture(TextureCommand),
    /// Replace the active model transform for subsequent texture commands.
    Transform(Mat3),
    /// Change the clip rectangle; `None` disables clipping.
    ///
    /// The rectangle is in backend (bottom-left-origin) pixel coordinates.
    Scissor(Option<Rect<i32>>),
}

/// Payload of [`RenderCommand::Texture`].
///
/// `a` and `b` are two opposite corners of the quad in the recording
/// handle's coordinate space. `sub_region` is a pixel rectangle inside the
/// source texture; atlas references have already been resolved to their
/// source texture by the time a command is recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureCommand {
    pub texture: TextureId,
    pub a: Vec2,
    pub b: Vec2,
    pub sub_region: Option<Rect<f32>>,
    /// `0` = not array-layered, `n >= 1` = layer `n - 1`.
    pub array_index: u32,
    pub modulate: Color,
}

/// An ordered, append-only sequence of [`RenderCommand`]s.
///
/// Owned by exactly one drawing handle while recording, consumed read-only
/// during flush, then cleared and returned to the [`CommandListPool`].
#[derive(Debug, Default)]
pub struct CommandList {
    commands: Vec<RenderCommand>,
}

impl CommandList {
    pub fn push(&mut self, command: RenderCommand) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn clear(&mut self) {
        self.commands.clear();
    }
}

/// Free-list of command list storage, reused across frames to avoid
/// allocation churn during recording.
#[derive(Debug, Default)]
pub struct CommandListPool {
    free: Vec<CommandList>,
    /// Lists allocated since the last frame boundary because the pool ran dry.
    created_this_frame: usize,
}

impl CommandListPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a cleared list from the pool, allocating if the pool is dry.
    pub fn take(&mut self) -> CommandList {
        match self.free.pop() {
            Some(list) => list,
            None => {
                self.created_this_frame += 1;
                CommandList::default()
            }
        }
    }

    /// Clear a consumed list and return its storage to the pool.
    pub fn put_back(&mut self, mut list: CommandList) {
        list.clear();
        self.free.push(list);
    }

    /// Log pool overdraw and reset the per-frame allocation counter.
    ///
    /// Called once per flush boundary so steady-state frames can be verified
    /// to allocate nothing.
    pub fn end_frame(&mut self) {
        if self.created_this_frame > 0 {
            tracing::debug!(
                lists = self.created_this_frame,
                "command list pool overdraw"
            );
        }
        self.created_this_frame = 0;
    }

    #[cfg(test)]
    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_reuses_storage() {
        let mut pool = CommandListPool::new();
        let mut list = pool.take();
        list.push(RenderCommand::Transform(Mat3::IDENTITY));
        pool.put_back(list);
        assert_eq!(pool.free_count(), 1);

        let list = pool.take();
        assert!(list.is_empty());
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn put_back_clears() {
        let mut pool = CommandListPool::new();
        let mut list = pool.take();
        list.push(RenderCommand::Scissor(None));
        list.push(RenderCommand::Scissor(None));
        assert_eq!(list.len(), 2);
        pool.put_back(list);
        assert!(pool.take().is_empty());
    }
}
