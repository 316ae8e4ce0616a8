use std::cell::RefCell;

use kurbo::Rect;

use crate::view::{LayerId, LayerSet, ViewItem};

use super::Shape;

/// Application item drawing one [`Shape`].
///
/// Shape and layers can be changed through a shared reference; tell the
/// scene afterwards with `Scene::update`.
#[derive(Debug)]
pub struct ShapeItem {
    shape: RefCell<Shape>,
    layers: RefCell<LayerSet>,
}

impl ShapeItem {
    pub fn new(shape: Shape, layers: impl IntoIterator<Item = LayerId>) -> Self {
        Self {
            shape: RefCell::new(shape),
            layers: RefCell::new(layers.into_iter().collect()),
        }
    }

    pub fn set_shape(&self, shape: Shape) {
        *self.shape.borrow_mut() = shape;
    }

    pub fn set_layers(&self, layers: impl IntoIterator<Item = LayerId>) {
        *self.layers.borrow_mut() = layers.into_iter().collect();
    }
}

impl ViewItem for ShapeItem {
    fn bbox(&self) -> Rect {
        self.shape.borrow().bbox()
    }

    fn layers(&self) -> LayerSet {
        self.layers.borrow().clone()
    }

    fn shape(&self) -> Option<Shape> {
        Some(self.shape.borrow().clone())
    }
}
