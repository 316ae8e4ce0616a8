//! Strata: a layered 2D scene renderer.
//!
//! - [`view`]: items, layers and the [`Scene`](view::Scene) that indexes and
//!   redraws them
//! - [`painter`]: turns items into primitives
//! - [`render`]: vertex cache, draw batching, compositing and the
//!   [`Gal`](render::Gal) drawing surface
//! - [`device`]: graphics contexts, in-memory and wgpu
//! - [`window`], [`core`], [`time`]: the winit host loop

pub mod coords;
pub mod core;
pub mod device;
pub mod logging;
pub mod paint;
pub mod painter;
pub mod render;
pub mod time;
pub mod view;
pub mod window;
