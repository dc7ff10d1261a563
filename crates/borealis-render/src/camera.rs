//! Per-space projection/view matrix construction.
//!
//! Screen space maps window pixels (top-left origin, y-down) to clip space.
//! World space maps world units (y-up) through the eye's zoom and position,
//! scaled by [`PIXELS_PER_METER`].

use glam::{Mat3, Vec2, Vec3};

use crate::backend::ProjViewMatrices;

/// World units to pixels at zoom 1.
pub const PIXELS_PER_METER: f32 = 32.0;

/// The camera for the world-space phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Eye {
    /// Eye position in world units.
    pub position: Vec2,
    /// Zoom factor per axis; larger means more world visible.
    pub zoom: Vec2,
}

impl Default for Eye {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            zoom: Vec2::ONE,
        }
    }
}

/// Screen-space matrices: pixels to clip space, view is identity.
pub fn screen_matrices(width: f32, height: f32) -> ProjViewMatrices {
    let projection = Mat3::from_cols(
        Vec3::new(2.0 / width, 0.0, 0.0),
        Vec3::new(0.0, -2.0 / height, 0.0),
        Vec3::new(-1.0, 1.0, 1.0),
    );
    ProjViewMatrices {
        projection,
        view: Mat3::IDENTITY,
    }
}

/// World-space matrices for the given eye.
pub fn world_matrices(width: f32, height: f32, eye: &Eye) -> ProjViewMatrices {
    let projection = Mat3::from_cols(
        Vec3::new(PIXELS_PER_METER * 2.0 / width, 0.0, 0.0),
        Vec3::new(0.0, PIXELS_PER_METER * 2.0 / height, 0.0),
        Vec3::Z,
    );
    let view = Mat3::from_cols(
        Vec3::new(1.0 / eye.zoom.x, 0.0, 0.0),
        Vec3::new(0.0, 1.0 / eye.zoom.y, 0.0),
        Vec3::new(-eye.position.x / eye.zoom.x, -eye.position.y / eye.zoom.y, 1.0),
    );
    ProjViewMatrices { projection, view }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_projection_corners() {
        let m = screen_matrices(800.0, 600.0);
        let top_left = m.projection.transform_point2(Vec2::ZERO);
        let bottom_right = m.projection.transform_point2(Vec2::new(800.0, 600.0));
        assert!((top_left - Vec2::new(-1.0, 1.0)).length() < 1e-6);
        assert!((bottom_right - Vec2::new(1.0, -1.0)).length() < 1e-6);
    }

    #[test]
    fn world_view_centers_on_eye() {
        let eye = Eye {
            position: Vec2::new(10.0, -4.0),
            zoom: Vec2::splat(2.0),
        };
        let m = world_matrices(640.0, 480.0, &eye);
        let centered = m.view.transform_point2(eye.position);
        assert!(centered.length() < 1e-6);
    }
}
