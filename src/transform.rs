use crate::types::{BBox, Point};

const EPS: f32 = 1e-6;

/// 2D affine transform in SVG column order:
///
/// ```text
/// | a c e |   | x |
/// | b d f | * | y |
/// | 0 0 1 |   | 1 |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix::identity()
    }
}

impl Matrix {
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn translate(tx: f32, ty: f32) -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: tx,
            f: ty,
        }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            b: 0.0,
            c: 0.0,
            d: sy,
            e: 0.0,
            f: 0.0,
        }
    }

    /// Rotation by `rad` radians, positive turning +x toward +y.
    pub fn rotate(rad: f32) -> Self {
        let s = libm::sinf(rad);
        let c = libm::cosf(rad);
        Self {
            a: c,
            b: s,
            c: -s,
            d: c,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn rotate_deg(deg: f32) -> Self {
        Matrix::rotate(deg.to_radians())
    }

    pub fn skew_x(deg: f32) -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: libm::tanf(deg.to_radians()),
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn skew_y(deg: f32) -> Self {
        Self {
            a: 1.0,
            b: libm::tanf(deg.to_radians()),
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    /// `self * other`: `other` is applied to points first, then `self`.
    /// Descending a tree therefore composes `parent.mul(child)`.
    pub fn mul(self, other: Self) -> Self {
        Self {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    pub fn apply(self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    pub fn apply_point(self, p: Point) -> Point {
        let (x, y) = self.apply(p.x, p.y);
        Point::new(x, y)
    }

    /// Applies only the linear part (no translation). Used for relative path
    /// coordinates and direction vectors.
    pub fn apply_vector(self, x: f32, y: f32) -> (f32, f32) {
        (self.a * x + self.c * y, self.b * x + self.d * y)
    }

    pub fn determinant(self) -> f32 {
        self.a * self.d - self.b * self.c
    }

    pub fn invert(self) -> Option<Matrix> {
        let det = self.determinant();
        if det.abs() < EPS {
            return None;
        }
        let inv = 1.0 / det;
        Some(Matrix {
            a: self.d * inv,
            b: -self.b * inv,
            c: -self.c * inv,
            d: self.a * inv,
            e: (self.c * self.f - self.d * self.e) * inv,
            f: (self.b * self.e - self.a * self.f) * inv,
        })
    }

    pub fn is_identity(self) -> bool {
        (self.a - 1.0).abs() < EPS
            && self.b.abs() < EPS
            && self.c.abs() < EPS
            && (self.d - 1.0).abs() < EPS
            && self.e.abs() < EPS
            && self.f.abs() < EPS
    }

    /// True when the matrix carries any rotation or skew. Axis-aligned
    /// translate/scale transforms keep b and c at zero.
    pub fn has_rotation(self) -> bool {
        self.b.abs() > EPS || self.c.abs() > EPS
    }

    /// Recovers (rotation radians, scale x, scale y) assuming no skew.
    pub fn decompose(self) -> (f32, f32, f32) {
        let sx = libm::sqrtf(self.a * self.a + self.b * self.b);
        if sx < EPS {
            return (0.0, 0.0, 0.0);
        }
        let rotation = libm::atan2f(self.b, self.a);
        let sy = self.determinant() / sx;
        (rotation, sx, sy)
    }

    // Approx: area scale -> sqrt(|det|). Good enough for scaling stroke
    // widths and marker sizes in this subset.
    pub fn scale_factor(self) -> f32 {
        libm::sqrtf(self.determinant().abs()).max(0.0)
    }

    /// Maps all four corners and re-wraps them in an axis-aligned box.
    pub fn map_bbox(self, b: &BBox) -> BBox {
        let p0 = self.apply_point(Point::new(b.x, b.y));
        let p1 = self.apply_point(Point::new(b.max_x(), b.y));
        let p2 = self.apply_point(Point::new(b.max_x(), b.max_y()));
        let p3 = self.apply_point(Point::new(b.x, b.max_y()));
        BBox::from_points(p0, p2).union_point(p1).union_point(p3)
    }
}

/// Parses an SVG `transform` attribute: a whitespace-separated list of
/// `translate/scale/rotate/skewX/skewY/matrix` calls, composed left to right.
/// Unknown function names contribute identity.
pub fn parse_transform(input: &str) -> Matrix {
    let mut out = Matrix::identity();
    let mut s = input.trim();

    while !s.is_empty() {
        let Some(open) = s.find('(') else { break };
        let name = s[..open].trim();
        let Some(close) = s[open + 1..].find(')') else {
            break;
        };
        let args_str = &s[open + 1..open + 1 + close];
        let args = parse_number_list(args_str);

        let m = match name {
            "translate" => {
                let tx = args.first().copied().unwrap_or(0.0);
                let ty = args.get(1).copied().unwrap_or(0.0);
                Matrix::translate(tx, ty)
            }
            "scale" => {
                let sx = args.first().copied().unwrap_or(1.0);
                let sy = args.get(1).copied().unwrap_or(sx);
                Matrix::scale(sx, sy)
            }
            "rotate" => {
                let a = args.first().copied().unwrap_or(0.0);
                if args.len() >= 3 {
                    let cx = args[1];
                    let cy = args[2];
                    Matrix::translate(cx, cy)
                        .mul(Matrix::rotate_deg(a))
                        .mul(Matrix::translate(-cx, -cy))
                } else {
                    Matrix::rotate_deg(a)
                }
            }
            "skewX" => Matrix::skew_x(args.first().copied().unwrap_or(0.0)),
            "skewY" => Matrix::skew_y(args.first().copied().unwrap_or(0.0)),
            "matrix" => {
                if args.len() >= 6 {
                    Matrix {
                        a: args[0],
                        b: args[1],
                        c: args[2],
                        d: args[3],
                        e: args[4],
                        f: args[5],
                    }
                } else {
                    Matrix::identity()
                }
            }
            _ => Matrix::identity(),
        };

        out = out.mul(m);
        s = s[open + 1 + close + 1..].trim_start();
    }

    out
}

pub(crate) fn parse_number_list(input: &str) -> Vec<f32> {
    input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f32>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn translate_then_scale_maps_point() {
        let m = Matrix::translate(10.0, 0.0).mul(Matrix::scale(2.0, 2.0));
        let (x, y) = m.apply(1.0, 1.0);
        assert!(close(x, 12.0) && close(y, 2.0), "got ({x}, {y})");
    }

    #[test]
    fn invert_round_trips_points() {
        let m = Matrix::translate(3.0, -7.0)
            .mul(Matrix::rotate_deg(30.0))
            .mul(Matrix::scale(2.0, 0.5));
        let inv = m.invert().unwrap();
        let (x, y) = m.apply(4.0, 9.0);
        let (bx, by) = inv.apply(x, y);
        assert!(close(bx, 4.0) && close(by, 9.0), "got ({bx}, {by})");
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        assert!(Matrix::scale(0.0, 1.0).invert().is_none());
    }

    #[test]
    fn decompose_recovers_rotation_and_scale() {
        let m = Matrix::rotate_deg(40.0).mul(Matrix::scale(2.0, 3.0));
        let (rot, sx, sy) = m.decompose();
        assert!(close(rot, 40.0_f32.to_radians()));
        assert!(close(sx, 2.0));
        assert!(close(sy, 3.0));
    }

    #[test]
    fn has_rotation_flags_rotation_only() {
        assert!(!Matrix::translate(5.0, 2.0).has_rotation());
        assert!(!Matrix::scale(2.0, 3.0).has_rotation());
        assert!(Matrix::rotate_deg(10.0).has_rotation());
        assert!(Matrix::skew_x(15.0).has_rotation());
    }

    #[test]
    fn parse_transform_composes_left_to_right() {
        let m = parse_transform("translate(10 0) scale(2)");
        let (x, y) = m.apply(1.0, 1.0);
        assert!(close(x, 12.0) && close(y, 2.0));
    }

    #[test]
    fn parse_transform_rotate_about_point() {
        let m = parse_transform("rotate(90 10 10)");
        let (x, y) = m.apply(10.0, 0.0);
        assert!(close(x, 20.0) && close(y, 10.0), "got ({x}, {y})");
    }

    #[test]
    fn parse_transform_matrix_form() {
        let m = parse_transform("matrix(1, 0, 0, 1, 5, 6)");
        assert_eq!(m, Matrix::translate(5.0, 6.0));
    }

    #[test]
    fn map_bbox_of_rotated_unit_square() {
        let b = BBox::from_xywh(0.0, 0.0, 1.0, 1.0);
        let m = Matrix::rotate_deg(45.0);
        let mapped = m.map_bbox(&b);
        let half = libm::sqrtf(2.0) / 2.0;
        assert!(close(mapped.x, -half));
        assert!(close(mapped.width, 2.0 * half));
    }
}
