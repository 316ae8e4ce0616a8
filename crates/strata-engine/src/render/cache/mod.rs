//! Vertex caches.
//!
//! - `CachedContainer` keeps per-group vertices alive across frames in one
//!   shared buffer, with a best-fit chunk allocator and online compaction.
//! - `StreamContainer` collects vertices that are rebuilt every frame.

mod chunks;
mod container;
mod storage;
mod stream;

pub use container::{CachedContainer, GroupId, Span};
pub use storage::{DeviceStorage, HostStorage, Relocation, Residency, VertexStorage};
pub use stream::StreamContainer;

/// Default capacity of a new cache, in vertices.
pub const DEFAULT_INITIAL_CAPACITY: u32 = 1 << 20;
