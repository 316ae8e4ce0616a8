/// Drawable size in physical pixels.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Size as a `kurbo` vector, for transform math.
    #[inline]
    pub fn to_vec2(self) -> kurbo::Vec2 {
        kurbo::Vec2::new(self.width as f64, self.height as f64)
    }

    /// Scales both dimensions by an integer factor (supersampling).
    #[inline]
    pub fn scaled(self, factor: u32) -> Self {
        Self::new(self.width.saturating_mul(factor), self.height.saturating_mul(factor))
    }
}
