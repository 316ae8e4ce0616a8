use kurbo::Rect;
use smallvec::SmallVec;

use crate::painter::Shape;

use super::LayerId;

/// Layers an item is drawn on.
pub type LayerSet = SmallVec<[LayerId; 4]>;

/// Handle to an item added to a [`Scene`](super::Scene).
///
/// Becomes stale when the item is removed; a later item reusing the same
/// slot gets a different generation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ItemId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ItemId {
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Something the scene can index and draw.
///
/// Items are owned by the application; the scene keeps a weak reference and
/// reads the geometry back whenever an update is processed.
pub trait ViewItem {
    /// World-space bounds covering everything drawn on every layer.
    fn bbox(&self) -> Rect;

    fn layers(&self) -> LayerSet;

    /// Minimum scale at which the item is drawn on `layer`; the item is
    /// skipped while the view scale is at or below it.
    fn lod(&self, _layer: LayerId) -> f64 {
        0.0
    }

    /// Geometry for the shape painter. Items without one draw nothing.
    fn shape(&self) -> Option<Shape> {
        None
    }
}
