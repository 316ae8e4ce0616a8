//! Graphics contexts.
//!
//! The renderer talks to the device through [`GraphicsContext`]:
//! - [`RecordingContext`] keeps everything in memory and logs each call
//! - [`WgpuContext`] draws with a wgpu device, bootstrapped by [`Gpu`]
//!
//! [`ContextManager`] serializes contexts sharing one drawing thread.

mod context;
mod error;
mod frame;
mod gpu;
mod init;
mod manager;
mod recording;
mod surface;
mod wgpu_context;

pub use context::{
    BufferId, BufferUsage, ContextLimits, GraphicsContext, PostPass, TargetFormat, TextureId,
};
pub use error::{ContextError, SurfaceErrorAction};
pub use frame::GpuFrame;
pub use gpu::Gpu;
pub use init::GpuInit;
pub use manager::{ContextGuard, ContextId, ContextManager};
pub use recording::{ContextCall, RecordingContext};
pub use wgpu_context::{DisplaySlot, WgpuContext};
