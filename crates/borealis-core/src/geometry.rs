use std::ops::Add;

/// An axis-aligned rectangle described by its origin corner and size.
///
/// Which corner the origin refers to depends on the coordinate convention
/// of the consumer; texture sub-regions are top-left based, scissor
/// rectangles bottom-left based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect<T> {
    pub x: T,
    pub y: T,
    pub width: T,
    pub height: T,
}

impl<T> Rect<T> {
    pub fn new(x: T, y: T, width: T, height: T) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }
}

impl<T: Add<Output = T> + Copy> Rect<T> {
    /// Right edge (`x + width`).
    pub fn right(&self) -> T {
        self.x + self.width
    }

    /// Bottom edge (`y + height`).
    pub fn bottom(&self) -> T {
        self.y + self.height
    }

    /// The same rectangle translated by `(dx, dy)`.
    pub fn translated(&self, dx: T, dy: T) -> Self {
        Rect {
            x: self.x + dx,
            y: self.y + dy,
            width: self.width,
            height: self.height,
        }
    }
}
