use kurbo::{Affine, Point, Rect, Vec2};

use super::Viewport;

/// Camera mapping world coordinates onto the screen.
///
/// World space is unbounded `f64`; screen space is physical pixels with a
/// top-left origin and +Y down. `scale` is the number of screen pixels per
/// world unit. The world point `center` lands in the middle of the screen.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ViewTransform {
    pub center: Point,
    pub scale: f64,
    pub screen: Viewport,
    pub mirror_x: bool,
    pub mirror_y: bool,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            center: Point::ORIGIN,
            scale: 1.0,
            screen: Viewport::new(1, 1),
            mirror_x: false,
            mirror_y: false,
        }
    }
}

impl ViewTransform {
    pub fn world_to_screen(&self) -> Affine {
        let sx = if self.mirror_x { -self.scale } else { self.scale };
        let sy = if self.mirror_y { -self.scale } else { self.scale };
        Affine::translate(self.screen.to_vec2() * 0.5)
            * Affine::scale_non_uniform(sx, sy)
            * Affine::translate(-self.center.to_vec2())
    }

    pub fn screen_to_world(&self) -> Affine {
        self.world_to_screen().inverse()
    }

    /// World → normalized device coordinates (`[-1, 1]`, +Y up).
    pub fn world_to_clip(&self) -> Affine {
        screen_to_clip(self.screen) * self.world_to_screen()
    }

    #[inline]
    pub fn to_screen(&self, p: Point) -> Point {
        self.world_to_screen() * p
    }

    #[inline]
    pub fn to_world(&self, p: Point) -> Point {
        self.screen_to_world() * p
    }

    /// Converts a screen-space displacement (no translation applied).
    #[inline]
    pub fn to_world_vec(&self, v: Vec2) -> Vec2 {
        let sx = if self.mirror_x { -1.0 } else { 1.0 };
        let sy = if self.mirror_y { -1.0 } else { 1.0 };
        Vec2::new(sx * v.x / self.scale, sy * v.y / self.scale)
    }

    #[inline]
    pub fn to_screen_vec(&self, v: Vec2) -> Vec2 {
        let sx = if self.mirror_x { -1.0 } else { 1.0 };
        let sy = if self.mirror_y { -1.0 } else { 1.0 };
        Vec2::new(sx * v.x * self.scale, sy * v.y * self.scale)
    }

    #[inline]
    pub fn to_world_len(&self, len: f64) -> f64 {
        len / self.scale
    }

    #[inline]
    pub fn to_screen_len(&self, len: f64) -> f64 {
        len * self.scale
    }

    /// The world rectangle currently covered by the screen.
    pub fn visible_world_rect(&self) -> Rect {
        let a = self.to_world(Point::ORIGIN);
        let b = self.to_world(Point::new(self.screen.width as f64, self.screen.height as f64));
        Rect::from_points(a, b)
    }
}

/// Screen pixels → normalized device coordinates.
pub fn screen_to_clip(screen: Viewport) -> Affine {
    let w = (screen.width.max(1)) as f64;
    let h = (screen.height.max(1)) as f64;
    Affine::new([2.0 / w, 0.0, 0.0, -2.0 / h, -1.0, 1.0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9
    }

    fn camera() -> ViewTransform {
        ViewTransform {
            center: Point::new(100.0, 50.0),
            scale: 2.0,
            screen: Viewport::new(800, 600),
            ..ViewTransform::default()
        }
    }

    // ── mapping ───────────────────────────────────────────────────────────

    #[test]
    fn center_maps_to_screen_middle() {
        let t = camera();
        assert!(approx(t.to_screen(t.center), Point::new(400.0, 300.0)));
    }

    #[test]
    fn world_screen_round_trip() {
        let t = camera();
        let p = Point::new(-37.5, 812.25);
        assert!(approx(t.to_world(t.to_screen(p)), p));
    }

    #[test]
    fn mirror_flips_axis() {
        let mut t = camera();
        t.mirror_x = true;
        let right = t.to_screen(Point::new(110.0, 50.0));
        assert!(right.x < 400.0);
        assert_eq!(t.to_world_vec(Vec2::new(4.0, 4.0)), Vec2::new(-2.0, 2.0));
    }

    #[test]
    fn lengths_scale() {
        let t = camera();
        assert_eq!(t.to_screen_len(3.0), 6.0);
        assert_eq!(t.to_world_len(6.0), 3.0);
    }

    // ── derived rects ─────────────────────────────────────────────────────

    #[test]
    fn visible_rect_spans_screen() {
        let t = camera();
        let r = t.visible_world_rect();
        assert!((r.width() - 400.0).abs() < 1e-9);
        assert!((r.height() - 300.0).abs() < 1e-9);
        assert!(approx(r.center(), t.center));
    }

    #[test]
    fn clip_corners() {
        let t = camera();
        let clip = t.world_to_clip();
        assert!(approx(clip * t.center, Point::ORIGIN));
        let top_left = clip * t.to_world(Point::ORIGIN);
        assert!(approx(top_left, Point::new(-1.0, 1.0)));
    }
}
