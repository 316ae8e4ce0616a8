//! Turns view items into gal primitives.
//!
//! The scene hands every item it draws to a [`Painter`]. [`ShapePainter`]
//! draws items exposing a [`Shape`]; applications with richer items supply
//! their own painter.

mod item;
mod settings;
mod shape;

pub use item::ShapeItem;
pub use settings::RenderSettings;
pub use shape::Shape;

use kurbo::Point;

use crate::render::{Gal, RenderError};
use crate::view::{LayerId, ViewItem};

pub trait Painter {
    /// Draws `item` as it appears on `layer`. Returns `false` when the
    /// painter does not know how to draw it.
    fn draw(&self, item: &dyn ViewItem, layer: LayerId, gal: &mut Gal) -> Result<bool, RenderError>;

    fn settings(&self) -> &RenderSettings;

    fn settings_mut(&mut self) -> &mut RenderSettings;
}

/// Draws the [`Shape`] of an item in its layer color.
#[derive(Debug, Clone, Default)]
pub struct ShapePainter {
    settings: RenderSettings,
}

impl ShapePainter {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }
}

impl Painter for ShapePainter {
    fn draw(&self, item: &dyn ViewItem, layer: LayerId, gal: &mut Gal) -> Result<bool, RenderError> {
        let Some(shape) = item.shape() else {
            return Ok(false);
        };

        let color = self.settings.color(item, layer);
        gal.set_stroke_color(color);
        gal.set_fill_color(color);
        gal.set_line_width(self.settings.line_width);

        match &shape {
            Shape::Line { a, b } => {
                gal.set_stroke_enabled(true);
                gal.draw_line(*a, *b)?;
            }
            Shape::Segment { a, b, width } => gal.draw_segment(*a, *b, *width)?,
            Shape::Circle { center, radius } => {
                gal.set_fill_enabled(true);
                gal.set_stroke_enabled(false);
                gal.draw_circle(*center, *radius)?;
            }
            Shape::Rectangle(r) => {
                gal.set_fill_enabled(true);
                gal.set_stroke_enabled(false);
                gal.draw_rectangle(r.origin(), Point::new(r.x1, r.y1))?;
            }
            Shape::Polyline(points) => {
                gal.set_stroke_enabled(true);
                gal.draw_polyline(points)?;
            }
            Shape::Triangle([a, b, c]) => {
                gal.set_fill_enabled(true);
                gal.set_stroke_enabled(false);
                gal.draw_triangle(*a, *b, *c)?;
            }
        }
        Ok(true)
    }

    fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut RenderSettings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kurbo::Rect;
    use smallvec::smallvec;

    use super::*;
    use crate::device::{ContextManager, RecordingContext};
    use crate::paint::Color;
    use crate::render::GalConfig;
    use crate::view::LayerSet;

    struct Blank;

    impl ViewItem for Blank {
        fn bbox(&self) -> Rect {
            Rect::ZERO
        }

        fn layers(&self) -> LayerSet {
            smallvec![LayerId(0)]
        }
    }

    fn gal() -> Gal {
        Gal::new(
            Box::new(RecordingContext::new(64, 64)),
            Arc::new(ContextManager::new()),
            GalConfig { cache_capacity: 256, ..GalConfig::default() },
        )
    }

    /// Vertices cached for `item` on layer 0.
    fn cached(painter: &ShapePainter, item: &dyn ViewItem) -> Vec<[f32; 4]> {
        let mut gal = gal();
        let manager = Arc::clone(gal.manager());
        let guard = manager.lock(gal.context_id());
        gal.begin_update(&guard).unwrap();
        let group = gal.begin_group();
        let drawn = painter.draw(item, LayerId(0), &mut gal).unwrap();
        gal.end_group();
        assert!(drawn);
        let colors = gal.cache().vertices(group).unwrap().iter().map(|v| v.color).collect();
        gal.end_update(&guard);
        colors
    }

    // ── dispatch ─────────────────────────────────────────────────────────

    #[test]
    fn item_without_shape_is_skipped() {
        let painter = ShapePainter::default();
        let mut gal = gal();
        let manager = Arc::clone(gal.manager());
        let guard = manager.lock(gal.context_id());
        gal.begin_update(&guard).unwrap();
        assert!(!painter.draw(&Blank, LayerId(0), &mut gal).unwrap());
        gal.end_update(&guard);
    }

    #[test]
    fn every_shape_produces_its_triangles() {
        let painter = ShapePainter::default();
        let p = Point::new;
        let cases = [
            (Shape::Line { a: p(0.0, 0.0), b: p(4.0, 0.0) }, 6),
            (Shape::Segment { a: p(0.0, 0.0), b: p(4.0, 0.0), width: 1.0 }, 18),
            (Shape::Circle { center: p(1.0, 1.0), radius: 2.0 }, 6),
            (Shape::Rectangle(Rect::new(0.0, 0.0, 3.0, 2.0)), 6),
            (Shape::Polyline(smallvec![p(0.0, 0.0), p(1.0, 0.0), p(1.0, 1.0)]), 36),
            (Shape::Triangle([p(0.0, 0.0), p(1.0, 0.0), p(0.0, 1.0)]), 3),
        ];
        for (shape, expected) in cases {
            let item = ShapeItem::new(shape.clone(), [LayerId(0)]);
            assert_eq!(cached(&painter, &item).len(), expected, "{shape:?}");
        }
    }

    #[test]
    fn shapes_take_the_layer_color() {
        let red = Color::from_straight(1.0, 0.0, 0.0, 1.0);
        let mut painter = ShapePainter::default();
        painter.settings_mut().set_layer_color(LayerId(0), red);
        let item = ShapeItem::new(Shape::Rectangle(Rect::new(0.0, 0.0, 1.0, 1.0)), [LayerId(0)]);
        assert!(cached(&painter, &item).iter().all(|&c| c == red.to_array()));
        assert_eq!(painter.settings().layer_color(LayerId(3)), Color::WHITE);
    }
}
