use kurbo::{Point, Rect};
use smallvec::SmallVec;

/// Geometry the shape painter knows how to draw.
///
/// Extending the painter:
/// - add a variant here and its bounds in [`Shape::bbox`]
/// - draw it in `ShapePainter::draw`
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Hairline in the current line width.
    Line { a: Point, b: Point },
    /// Thick line with round ends.
    Segment { a: Point, b: Point, width: f64 },
    Circle { center: Point, radius: f64 },
    /// Filled axis-aligned rectangle.
    Rectangle(Rect),
    Polyline(SmallVec<[Point; 8]>),
    Triangle([Point; 3]),
}

impl Shape {
    /// World-space bounds of the drawn geometry.
    pub fn bbox(&self) -> Rect {
        match self {
            Shape::Line { a, b } => Rect::from_points(*a, *b),
            Shape::Segment { a, b, width } => Rect::from_points(*a, *b).inflate(width * 0.5, width * 0.5),
            Shape::Circle { center, radius } => {
                Rect::from_center_size(*center, (radius * 2.0, radius * 2.0))
            }
            Shape::Rectangle(r) => r.abs(),
            Shape::Polyline(points) => bounds(points),
            Shape::Triangle(points) => bounds(points),
        }
    }
}

fn bounds(points: &[Point]) -> Rect {
    let Some((&first, rest)) = points.split_first() else {
        return Rect::ZERO;
    };
    rest.iter().fold(Rect::from_points(first, first), |r, &p| r.union_pt(p))
}
