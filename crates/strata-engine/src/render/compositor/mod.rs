//! Offscreen buffers, antialiasing and final composition.

#[allow(clippy::module_inception)]
mod compositor;
mod presenter;

pub use compositor::{AntialiasingMode, Compositor, TargetHandle};
