#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn add(self, other: Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(self, other: Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }

    pub fn scaled(self, factor: f32) -> Point {
        Point::new(self.x * factor, self.y * factor)
    }

    pub fn distance(self, other: Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        libm::sqrtf(dx * dx + dy * dy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned box. Width and height are kept non-negative; an absent box is
/// represented as `Option<BBox>` rather than a sentinel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    pub fn from_points(a: Point, b: Point) -> Self {
        let x = a.x.min(b.x);
        let y = a.y.min(b.y);
        Self {
            x,
            y,
            width: (a.x - b.x).abs(),
            height: (a.y - b.y).abs(),
        }
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn union(&self, other: &BBox) -> BBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let max_x = self.max_x().max(other.max_x());
        let max_y = self.max_y().max(other.max_y());
        BBox::from_xywh(x, y, max_x - x, max_y - y)
    }

    pub fn union_point(&self, p: Point) -> BBox {
        let x = self.x.min(p.x);
        let y = self.y.min(p.y);
        let max_x = self.max_x().max(p.x);
        let max_y = self.max_y().max(p.y);
        BBox::from_xywh(x, y, max_x - x, max_y - y)
    }

    /// Intersection, or `None` when the boxes do not overlap.
    pub fn intersect(&self, other: &BBox) -> Option<BBox> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let max_x = self.max_x().min(other.max_x());
        let max_y = self.max_y().min(other.max_y());
        if max_x <= x || max_y <= y {
            return None;
        }
        Some(BBox::from_xywh(x, y, max_x - x, max_y - y))
    }

    pub fn expand(&self, pad: f32) -> BBox {
        BBox::from_xywh(
            self.x - pad,
            self.y - pad,
            self.width + pad * 2.0,
            self.height + pad * 2.0,
        )
    }
}

/// The `viewBox` attribute of the root element: a user-space window that the
/// fit transform maps onto the raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewBox {
    pub min_x: f32,
    pub min_y: f32,
    pub width: f32,
    pub height: f32,
}

/// The nine anchor alignments of `preserveAspectRatio`, plus `none`
/// (non-uniform stretch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitAlign {
    None,
    XMinYMin,
    XMidYMin,
    XMaxYMin,
    XMinYMid,
    #[default]
    XMidYMid,
    XMaxYMid,
    XMinYMax,
    XMidYMax,
    XMaxYMax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitPolicy {
    /// Uniform scale so the whole view box is visible.
    #[default]
    Meet,
    /// Uniform scale so the view box covers the raster, cropping overflow.
    Slice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreserveAspectRatio {
    pub align: FitAlign,
    pub policy: FitPolicy,
}

/// How the document-level transform maps user units to pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitMode {
    /// Natural size: one user unit is one pixel at 96 dpi, no view-box
    /// rescale. The raster simply crops or letterboxes the document.
    #[default]
    Norm,
    /// Fit the root view box onto the raster honoring `preserveAspectRatio`.
    ViewBox,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn from_u8(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientStop {
    pub offset: f32, // 0..=1
    pub color: Color,
    pub opacity: f32,
}

/// Fully resolved gradient geometry handed to a painter: absolute control
/// points in the coordinate space active at draw time.
#[derive(Debug, Clone, PartialEq)]
pub enum Shading {
    Axial {
        start: Point,
        end: Point,
        stops: Vec<GradientStop>,
    },
    Radial {
        center: Point,
        focal: Point,
        radius: f32,
        stops: Vec<GradientStop>,
    },
}

/// Active paint for one slot (fill or stroke) of a painter.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PaintSource {
    #[default]
    None,
    Solid(Color),
    Gradient(Shading),
}

impl PaintSource {
    pub fn is_none(&self) -> bool {
        matches!(self, PaintSource::None)
    }
}

/// Decoded raster image: straight (non-premultiplied) RGBA8 rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_union_covers_both() {
        let a = BBox::from_xywh(0.0, 0.0, 10.0, 10.0);
        let b = BBox::from_xywh(5.0, 5.0, 10.0, 10.0);
        let u = a.union(&b);
        assert_eq!(u, BBox::from_xywh(0.0, 0.0, 15.0, 15.0));
    }

    #[test]
    fn bbox_intersect_disjoint_is_none() {
        let a = BBox::from_xywh(0.0, 0.0, 10.0, 10.0);
        let b = BBox::from_xywh(20.0, 20.0, 5.0, 5.0);
        assert!(a.intersect(&b).is_none());
        let c = BBox::from_xywh(8.0, 8.0, 4.0, 4.0);
        assert_eq!(a.intersect(&c), Some(BBox::from_xywh(8.0, 8.0, 2.0, 2.0)));
    }

    #[test]
    fn bbox_from_points_normalizes_order() {
        let b = BBox::from_points(Point::new(10.0, 2.0), Point::new(-2.0, 8.0));
        assert_eq!(b, BBox::from_xywh(-2.0, 2.0, 12.0, 6.0));
    }
}
