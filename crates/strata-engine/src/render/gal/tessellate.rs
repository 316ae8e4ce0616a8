//! Primitive shapes to triangle lists.
//!
//! Every function appends whole triangles to `out`. Circles are quads whose
//! fragment program cuts the disc or ring out (see [`ShaderMode`]).

use kurbo::{Point, Vec2};

use crate::paint::Color;
use crate::render::{ShaderMode, Vertex};

/// Color and depth shared by the vertices of one primitive.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Brush {
    pub color: [f32; 4],
    pub depth: f32,
}

impl Brush {
    pub fn new(color: Color, depth: f32) -> Self {
        Self { color: color.to_array(), depth }
    }

    #[inline]
    fn vertex(self, p: Point, shader: [f32; 4]) -> Vertex {
        Vertex { pos: [p.x as f32, p.y as f32, self.depth], color: self.color, shader }
    }
}

const SOLID: [f32; 4] = [0.0; 4];

const CORNERS: [(f32, f32); 4] = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

fn quad(out: &mut Vec<Vertex>, brush: Brush, corners: [Point; 4], shader: [[f32; 4]; 4]) {
    for i in [0, 1, 2, 0, 2, 3] {
        out.push(brush.vertex(corners[i], shader[i]));
    }
}

pub(crate) fn triangle(out: &mut Vec<Vertex>, brush: Brush, a: Point, b: Point, c: Point) {
    out.push(brush.vertex(a, SOLID));
    out.push(brush.vertex(b, SOLID));
    out.push(brush.vertex(c, SOLID));
}

/// Straight line of `width` with square ends at `a` and `b`.
pub(crate) fn line(out: &mut Vec<Vertex>, brush: Brush, a: Point, b: Point, width: f64) {
    let d = b - a;
    let len = d.hypot();
    if len <= f64::EPSILON || width <= 0.0 {
        return;
    }
    let n = Vec2::new(-d.y, d.x) * (width * 0.5 / len);
    quad(out, brush, [a + n, b + n, b - n, a - n], [SOLID; 4]);
}

pub(crate) fn filled_circle(out: &mut Vec<Vertex>, brush: Brush, center: Point, radius: f64) {
    if radius <= 0.0 {
        return;
    }
    let mode = ShaderMode::FilledCircle.as_f32();
    circle_quad(out, brush, center, radius, CORNERS.map(|(u, v)| [mode, u, v, 0.0]));
}

/// Ring centered on the circle of `radius`, `width` wide.
pub(crate) fn stroked_circle(
    out: &mut Vec<Vertex>,
    brush: Brush,
    center: Point,
    radius: f64,
    width: f64,
) {
    let outer = radius + width * 0.5;
    if outer <= 0.0 || width <= 0.0 {
        return;
    }
    let inner = (radius - width * 0.5).max(0.0);
    let ratio = (inner / outer) as f32;
    let mode = ShaderMode::StrokedCircle.as_f32();
    circle_quad(out, brush, center, outer, CORNERS.map(|(u, v)| [mode, u, v, ratio]));
}

fn circle_quad(
    out: &mut Vec<Vertex>,
    brush: Brush,
    center: Point,
    radius: f64,
    shader: [[f32; 4]; 4],
) {
    let corners = CORNERS.map(|(u, v)| center + Vec2::new(u as f64, v as f64) * radius);
    quad(out, brush, corners, shader);
}

/// Line of `width` with round caps.
pub(crate) fn segment(out: &mut Vec<Vertex>, brush: Brush, a: Point, b: Point, width: f64) {
    line(out, brush, a, b, width);
    filled_circle(out, brush, a, width * 0.5);
    if b != a {
        filled_circle(out, brush, b, width * 0.5);
    }
}

pub(crate) fn rect_fill(out: &mut Vec<Vertex>, brush: Brush, a: Point, b: Point) {
    let corners = [a, Point::new(b.x, a.y), b, Point::new(a.x, b.y)];
    quad(out, brush, corners, [SOLID; 4]);
}

pub(crate) fn rect_outline(out: &mut Vec<Vertex>, brush: Brush, a: Point, b: Point, width: f64) {
    let corners = [a, Point::new(b.x, a.y), b, Point::new(a.x, b.y), a];
    polyline(out, brush, &corners, width);
}

/// Consecutive segments through `points`.
pub(crate) fn polyline(out: &mut Vec<Vertex>, brush: Brush, points: &[Point], width: f64) {
    for w in points.windows(2) {
        segment(out, brush, w[0], w[1], width);
    }
}

/// Triangle fan over `points`. Exact for convex outlines.
pub(crate) fn polygon_fill(out: &mut Vec<Vertex>, brush: Brush, points: &[Point]) {
    let Some((&first, rest)) = points.split_first() else {
        return;
    };
    for w in rest.windows(2) {
        triangle(out, brush, first, w[0], w[1]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brush() -> Brush {
        Brush::new(Color::WHITE, 0.25)
    }

    fn pos(v: &Vertex) -> (f32, f32) {
        (v.pos[0], v.pos[1])
    }

    #[test]
    fn line_is_a_quad_of_the_requested_width() {
        let mut out = Vec::new();
        line(&mut out, brush(), Point::new(0.0, 0.0), Point::new(10.0, 0.0), 2.0);
        assert_eq!(out.len(), 6);
        let ys: Vec<f32> = out.iter().map(|v| v.pos[1]).collect();
        assert!(ys.iter().all(|&y| y == 1.0 || y == -1.0));
        assert!(out.iter().all(|v| v.pos[2] == 0.25));
    }

    #[test]
    fn degenerate_line_emits_nothing() {
        let mut out = Vec::new();
        line(&mut out, brush(), Point::new(3.0, 3.0), Point::new(3.0, 3.0), 2.0);
        assert!(out.is_empty());
    }

    #[test]
    fn circle_quad_carries_unit_coordinates() {
        let mut out = Vec::new();
        filled_circle(&mut out, brush(), Point::new(10.0, 20.0), 5.0);
        assert_eq!(out.len(), 6);
        assert_eq!(pos(&out[0]), (5.0, 15.0));
        assert_eq!(out[0].shader, [1.0, -1.0, -1.0, 0.0]);
        assert_eq!(pos(&out[2]), (15.0, 25.0));
    }

    #[test]
    fn ring_stores_inner_ratio() {
        let mut out = Vec::new();
        stroked_circle(&mut out, brush(), Point::ZERO, 4.0, 2.0);
        assert_eq!(out[0].shader[0], ShaderMode::StrokedCircle.as_f32());
        assert_eq!(out[0].shader[3], 0.6);
        assert_eq!(pos(&out[0]), (-5.0, -5.0));
    }

    #[test]
    fn fan_and_outline_vertex_counts() {
        let square = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ];
        let mut out = Vec::new();
        polygon_fill(&mut out, brush(), &square);
        assert_eq!(out.len(), 6);

        out.clear();
        rect_outline(&mut out, brush(), square[0], square[2], 0.1);
        // four segments: body + two caps each
        assert_eq!(out.len(), 4 * 18);
    }
}
