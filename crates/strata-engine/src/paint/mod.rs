//! Color model shared by the painter, the vertex cache and the compositor.
//!
//! Colors are linear and premultiplied; vertex buffers, compositor clears and
//! blending all assume premultiplied alpha.

mod color;

pub use color::Color;
