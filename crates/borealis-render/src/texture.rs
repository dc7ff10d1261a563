//! Texture identity as seen by the recording API and the flush engine.
//!
//! Loading, decoding and atlas packing happen outside this crate; draws
//! reference textures through an opaque [`TextureId`] plus the metadata in
//! [`TextureRef`], and the backend answers size/layout queries through
//! [`TextureInfo`].

use borealis_core::geometry::Rect;

/// Opaque handle to a texture owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Size and layout metadata for a loaded texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureInfo {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Whether the texture is a 2D array.
    pub arrayed: bool,
}

/// A drawable reference to a texture, an array layer, or an atlas entry.
///
/// `array_index` uses the convention of the recording format: `0` means the
/// texture is not array-layered, `n >= 1` selects layer `n - 1` of a 2D-array
/// texture. `atlas_region` is the entry's pixel rectangle inside the source
/// texture when this reference points into a packed atlas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureRef {
    pub id: TextureId,
    pub array_index: u32,
    pub atlas_region: Option<Rect<f32>>,
}

impl TextureRef {
    /// Reference to a whole, non-layered texture.
    pub fn whole(id: TextureId) -> Self {
        Self {
            id,
            array_index: 0,
            atlas_region: None,
        }
    }

    /// Reference to one layer of a 2D-array texture.
    pub fn layer(id: TextureId, layer: u32) -> Self {
        Self {
            id,
            array_index: layer + 1,
            atlas_region: None,
        }
    }

    /// Reference to an atlas entry: `region` in pixel coordinates of `source`.
    pub fn atlas(source: TextureId, region: Rect<f32>) -> Self {
        Self {
            id: source,
            array_index: 0,
            atlas_region: Some(region),
        }
    }
}
