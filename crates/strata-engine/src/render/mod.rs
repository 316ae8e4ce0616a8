//! Rendering pipeline.
//!
//! - `cache`: vertex storage for cached groups and per-frame streams.
//! - `batch`: turns group spans into draw calls.
//! - `compositor`: offscreen buffers, antialiasing and presentation.
//! - `gal`: primitive drawing surface tying them together.
//!
//! Convention:
//! - Vertices are in world coordinates; `z` is the layer depth.
//! - The world-to-clip transform is a per-draw uniform.

pub mod batch;
pub mod cache;
pub mod compositor;
mod error;
pub mod gal;
mod vertex;

pub use batch::{BatchStats, DrawBatcher, HUGE_RANGE};
pub use compositor::{AntialiasingMode, Compositor, TargetHandle};
pub use error::RenderError;
pub use gal::{Gal, GalConfig, RenderTargetKind};
pub use vertex::{ShaderMode, Vertex};
