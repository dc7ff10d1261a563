//! Deferred 2D command recording and quad-batching renderer.
//!
//! Scene code records draw operations into per-handle command lists during a
//! frame; the flush engine replays those lists in order and merges contiguous
//! same-texture draws into large indexed draw calls, falling back to one draw
//! per quad for short runs.
//!
//! The pipeline per frame:
//!
//! 1. The [`FrameDriver`] installs the projection/view matrices for the
//!    current space (screen or world) and walks the scene collaborators.
//! 2. Collaborators obtain [`DrawingHandle`]s from the [`RenderHandle`] and
//!    record [`RenderCommand`]s.
//! 3. After each pass the accumulated lists are flushed through a
//!    [`FlushContext`] into a [`RenderBackend`].
//!
//! The backend seam is a trait so the whole engine can be exercised against
//! the call-recording mock in [`testing`] without a GPU.

pub mod backend;
pub mod batch;
pub mod camera;
pub mod command;
pub mod error;
pub mod frame;
pub mod handle;
pub mod texture;
pub mod wgpu_backend;

#[cfg(any(test, feature = "mock"))]
pub mod testing;

pub use backend::{ProgramKind, ProjViewMatrices, RenderBackend, Uniform, UniformValue};
pub use batch::{FlushContext, MAX_BATCH_QUADS, TEXTURE_BATCH_THRESHOLD, Vertex2D};
pub use borealis_core::Color;
pub use camera::{Eye, PIXELS_PER_METER};
pub use command::{CommandList, CommandListPool, RenderCommand, TextureCommand};
pub use error::RenderError;
pub use frame::{EntitySprite, FrameDriver, FrameScene, Overlay};
pub use handle::{DrawCtx, DrawingHandle, RenderHandle, Space};
pub use texture::{TextureId, TextureInfo, TextureRef};
pub use wgpu_backend::{GraphicsContext, WgpuBackend};
