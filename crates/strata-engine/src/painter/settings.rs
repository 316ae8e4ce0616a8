use hashbrown::HashMap;

use crate::paint::Color;
use crate::view::{LayerId, ViewItem};

/// Colors and widths the painter applies to items.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    layer_colors: HashMap<LayerId, Color>,
    /// Color of layers without an explicit entry.
    pub default_color: Color,
    /// Width of lines and polylines, in world units.
    pub line_width: f64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            layer_colors: HashMap::new(),
            default_color: Color::WHITE,
            line_width: 1.0,
        }
    }
}

impl RenderSettings {
    pub fn set_layer_color(&mut self, layer: LayerId, color: Color) {
        self.layer_colors.insert(layer, color);
    }

    pub fn layer_color(&self, layer: LayerId) -> Color {
        self.layer_colors.get(&layer).copied().unwrap_or(self.default_color)
    }

    /// Color of `item` when drawn on `layer`.
    pub fn color(&self, _item: &dyn ViewItem, layer: LayerId) -> Color {
        self.layer_color(layer)
    }
}
