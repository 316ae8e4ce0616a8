//! Contract between the window runtime and the application it hosts.
//!
//! The runtime owns the platform loop and the GPU; the application sees one
//! [`FrameCtx`] per rendered frame and the raw window events in between.

mod app;
mod ctx;

pub use app::{App, AppControl};
pub use ctx::{FrameCtx, WindowCtx};
