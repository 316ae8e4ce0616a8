//! Primitive drawing surface.
//!
//! `Gal` turns lines, circles, rectangles and polygons into vertices, keeps
//! cached groups in the vertex cache and drives the compositor once per frame.

#[allow(clippy::module_inception)]
mod gal;
mod target;
mod tessellate;

pub use gal::{layer_depth, Gal, GalConfig};
pub use target::RenderTargetKind;
