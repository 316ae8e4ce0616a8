//! Screen sizes and the world ↔ screen camera.
//!
//! Canonical spaces:
//! - world: `f64`, unbounded, via `kurbo` value types
//! - screen: physical pixels, origin top-left, +Y down
//! - clip: normalized device coordinates, +Y up
//!
//! Renderers receive a single world-to-clip affine per draw.

mod transform;
mod viewport;

pub use transform::{screen_to_clip, ViewTransform};
pub use viewport::Viewport;
