pub mod color;
pub mod geometry;
pub mod logging;

pub use color::Color;
