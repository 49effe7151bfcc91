//! Color values written into vertex and shader data.

mod color;

pub use color::Color;
