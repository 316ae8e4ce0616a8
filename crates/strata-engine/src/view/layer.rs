use std::fmt;

use smallvec::SmallVec;

use crate::render::RenderTargetKind;

use super::SpatialIndex;

/// Added to the rendering order of top layers while the top-layer mode is
/// enabled.
pub const TOP_LAYER_MODIFIER: i32 = 1 << 16;

/// Identifies a layer; also its default rendering order.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u32);

impl LayerId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer {}", self.0)
    }
}

/// Making `layer` require `required` would create a dependency cycle.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LayerCycleError {
    pub layer: LayerId,
    pub required: LayerId,
}

impl fmt::Display for LayerCycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cannot require {}: the layers would depend on each other", self.layer, self.required)
    }
}

impl std::error::Error for LayerCycleError {}

/// One drawing layer of a scene.
#[derive(Debug, Clone)]
pub struct Layer {
    pub(crate) id: LayerId,
    pub(crate) order: i32,
    pub(crate) visible: bool,
    /// Drawn but ignored by item queries.
    pub(crate) display_only: bool,
    pub(crate) target: RenderTargetKind,
    pub(crate) required: SmallVec<[LayerId; 2]>,
    pub(crate) index: SpatialIndex,
}

impl Layer {
    pub(crate) fn new(id: LayerId, cell_size: f64) -> Self {
        Self {
            id,
            order: id.0 as i32,
            visible: true,
            display_only: false,
            target: RenderTargetKind::Cached,
            required: SmallVec::new(),
            index: SpatialIndex::new(cell_size),
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_display_only(&self) -> bool {
        self.display_only
    }

    pub fn target(&self) -> RenderTargetKind {
        self.target
    }

    pub fn is_cached(&self) -> bool {
        self.target == RenderTargetKind::Cached
    }

    /// Layers that must be visible for this one to be drawn.
    pub fn required(&self) -> &[LayerId] {
        &self.required
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }
}
