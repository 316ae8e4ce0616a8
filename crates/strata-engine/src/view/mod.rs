//! Layered scene: items, per-layer spatial indices and the update pipeline
//! that keeps cached drawings in sync with them.
//!
//! Applications own their items (`Rc<dyn ViewItem>`) and register them with
//! a [`Scene`]. Changes are queued with [`Scene::update`] and applied in one
//! pass by [`Scene::update_items`], which runs before every redraw.

mod flags;
mod index;
mod item;
mod layer;
mod observer;
mod record;
mod scene;

pub use flags::{UpdateFlags, Visibility};
pub use index::{DEFAULT_CELL_SIZE, SpatialIndex};
pub use item::{ItemId, LayerSet, ViewItem};
pub use layer::{Layer, LayerCycleError, LayerId, TOP_LAYER_MODIFIER};
pub use observer::{Observable, SceneObserver, Subscription};
pub use scene::{Scene, SceneConfig};
