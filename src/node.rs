use crate::document::NodeId;
use crate::gradient::{Grad, GradKind, GradientGeom};
use crate::path::PathData;
use crate::style::{PaintStyle, TextAnchor};
use crate::transform::Matrix;
use crate::types::{BBox, ImageData, Point, PreserveAspectRatio, Size, ViewBox};

// Rough text metrics used before a shaper has run. 0.6em per glyph matches
// the average advance of common sans faces closely enough for box estimates.
const TEXT_ADVANCE_EM: f32 = 0.6;
const TEXT_ASCENT_EM: f32 = 0.8;
const TEXT_DESCENT_EM: f32 = 0.2;

/// Per-variant behavior hooks. Every method has a do-nothing default so a
/// variant only spells out what it actually supports.
pub trait NodeOps {
    /// Local geometric extent, before any transform. `None` for nodes that
    /// occupy no space of their own (groups, definitions).
    fn local_bbox(&self, _style: &PaintStyle) -> Option<BBox> {
        None
    }

    /// Folds a rotation-free transform directly into the stored geometry.
    /// Returns false when the variant has no explicit fields to absorb it,
    /// in which case the caller accumulates it on the node instead.
    fn bake_transform(&mut self, _m: &Matrix) -> bool {
        false
    }

    /// Moves the top-left corner of the local extent to `p`.
    fn set_pos(&mut self, _p: Point) {}

    /// Resizes the local extent in place, keeping the top-left corner.
    fn set_size(&mut self, _s: Size) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Circle {
    pub center: Point,
    pub radius: f32,
}

impl NodeOps for Circle {
    fn local_bbox(&self, _style: &PaintStyle) -> Option<BBox> {
        Some(BBox::from_xywh(
            self.center.x - self.radius,
            self.center.y - self.radius,
            self.radius * 2.0,
            self.radius * 2.0,
        ))
    }

    fn bake_transform(&mut self, m: &Matrix) -> bool {
        self.center = m.apply_point(self.center);
        self.radius *= m.scale_factor();
        true
    }

    fn set_pos(&mut self, p: Point) {
        self.center = Point::new(p.x + self.radius, p.y + self.radius);
    }

    fn set_size(&mut self, s: Size) {
        let corner = Point::new(self.center.x - self.radius, self.center.y - self.radius);
        self.radius = s.width.min(s.height) / 2.0;
        self.center = Point::new(corner.x + self.radius, corner.y + self.radius);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ellipse {
    pub center: Point,
    pub rx: f32,
    pub ry: f32,
}

impl NodeOps for Ellipse {
    fn local_bbox(&self, _style: &PaintStyle) -> Option<BBox> {
        Some(BBox::from_xywh(
            self.center.x - self.rx,
            self.center.y - self.ry,
            self.rx * 2.0,
            self.ry * 2.0,
        ))
    }

    fn bake_transform(&mut self, m: &Matrix) -> bool {
        self.center = m.apply_point(self.center);
        self.rx *= m.a.abs();
        self.ry *= m.d.abs();
        true
    }

    fn set_pos(&mut self, p: Point) {
        self.center = Point::new(p.x + self.rx, p.y + self.ry);
    }

    fn set_size(&mut self, s: Size) {
        let corner = Point::new(self.center.x - self.rx, self.center.y - self.ry);
        self.rx = s.width / 2.0;
        self.ry = s.height / 2.0;
        self.center = Point::new(corner.x + self.rx, corner.y + self.ry);
    }
}

/// Rectangle with optional rounded corners. `rx`/`ry` of zero mean square
/// corners; a single authored radius fills in the other axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub rx: f32,
    pub ry: f32,
}

impl Rect {
    pub fn corner_radii(&self) -> (f32, f32) {
        let rx = if self.rx > 0.0 { self.rx } else { self.ry };
        let ry = if self.ry > 0.0 { self.ry } else { self.rx };
        (rx.min(self.width / 2.0), ry.min(self.height / 2.0))
    }
}

impl NodeOps for Rect {
    fn local_bbox(&self, _style: &PaintStyle) -> Option<BBox> {
        Some(BBox::from_xywh(self.x, self.y, self.width, self.height))
    }

    fn bake_transform(&mut self, m: &Matrix) -> bool {
        let a = m.apply_point(Point::new(self.x, self.y));
        let b = m.apply_point(Point::new(self.x + self.width, self.y + self.height));
        let boxed = BBox::from_points(a, b);
        self.x = boxed.x;
        self.y = boxed.y;
        self.width = boxed.width;
        self.height = boxed.height;
        self.rx *= m.a.abs();
        self.ry *= m.d.abs();
        true
    }

    fn set_pos(&mut self, p: Point) {
        self.x = p.x;
        self.y = p.y;
    }

    fn set_size(&mut self, s: Size) {
        self.width = s.width.max(0.0);
        self.height = s.height.max(0.0);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub p1: Point,
    pub p2: Point,
}

impl NodeOps for Line {
    fn local_bbox(&self, _style: &PaintStyle) -> Option<BBox> {
        Some(BBox::from_points(self.p1, self.p2))
    }

    fn bake_transform(&mut self, m: &Matrix) -> bool {
        self.p1 = m.apply_point(self.p1);
        self.p2 = m.apply_point(self.p2);
        true
    }

    fn set_pos(&mut self, p: Point) {
        let b = BBox::from_points(self.p1, self.p2);
        let d = Point::new(p.x - b.x, p.y - b.y);
        self.p1 = self.p1.add(d);
        self.p2 = self.p2.add(d);
    }
}

fn points_bbox(points: &[Point]) -> Option<BBox> {
    let first = points.first()?;
    let mut b = BBox::from_points(*first, *first);
    for p in &points[1..] {
        b = b.union_point(*p);
    }
    Some(b)
}

fn translate_points(points: &mut [Point], to: Point) {
    let Some(b) = points_bbox(points) else { return };
    let d = Point::new(to.x - b.x, to.y - b.y);
    for p in points {
        *p = p.add(d);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    pub points: Vec<Point>,
}

impl NodeOps for Polyline {
    fn local_bbox(&self, _style: &PaintStyle) -> Option<BBox> {
        points_bbox(&self.points)
    }

    fn bake_transform(&mut self, m: &Matrix) -> bool {
        for p in &mut self.points {
            *p = m.apply_point(*p);
        }
        true
    }

    fn set_pos(&mut self, p: Point) {
        translate_points(&mut self.points, p);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub points: Vec<Point>,
}

impl NodeOps for Polygon {
    fn local_bbox(&self, _style: &PaintStyle) -> Option<BBox> {
        points_bbox(&self.points)
    }

    fn bake_transform(&mut self, m: &Matrix) -> bool {
        for p in &mut self.points {
            *p = m.apply_point(*p);
        }
        true
    }

    fn set_pos(&mut self, p: Point) {
        translate_points(&mut self.points, p);
    }
}

/// Path geometry: the packed command buffer plus the source `d` string kept
/// in sync with it for serialization and inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct PathGeom {
    pub data: PathData,
    pub d: String,
}

impl PathGeom {
    pub fn from_data(data: PathData) -> Self {
        let d = data.to_svg_string();
        Self { data, d }
    }
}

impl NodeOps for PathGeom {
    fn local_bbox(&self, _style: &PaintStyle) -> Option<BBox> {
        self.data.bbox()
    }

    fn bake_transform(&mut self, m: &Matrix) -> bool {
        self.data.transform_in_place(m);
        self.d = self.data.to_svg_string();
        true
    }

    fn set_pos(&mut self, p: Point) {
        if let Some(b) = self.data.bbox() {
            self.bake_transform(&Matrix::translate(p.x - b.x, p.y - b.y));
        }
    }
}

/// One run of a text element: either the element's own character data or a
/// `tspan` child, with its optional position overrides and local styling.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextSpan {
    pub text: String,
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub dx: f32,
    pub dy: f32,
    pub declarations: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    /// Anchor point: `x`/`y` of the text element, on the baseline.
    pub pos: Point,
    pub spans: Vec<TextSpan>,
}

impl TextBlock {
    pub fn plain_text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }
}

impl NodeOps for TextBlock {
    fn local_bbox(&self, style: &PaintStyle) -> Option<BBox> {
        let chars: usize = self.spans.iter().map(|s| s.text.chars().count()).sum();
        if chars == 0 {
            return None;
        }
        let em = style.font_size;
        let width = chars as f32 * em * TEXT_ADVANCE_EM;
        let shift = match style.text_anchor {
            TextAnchor::Start => 0.0,
            TextAnchor::Middle => -width / 2.0,
            TextAnchor::End => -width,
        };
        Some(BBox::from_xywh(
            self.pos.x + shift,
            self.pos.y - em * TEXT_ASCENT_EM,
            width,
            em * (TEXT_ASCENT_EM + TEXT_DESCENT_EM),
        ))
    }

    fn bake_transform(&mut self, m: &Matrix) -> bool {
        // Scale would have to touch the font size, which lives in the style,
        // so only pure translations are folded in.
        if (m.a - 1.0).abs() > 1e-6 || (m.d - 1.0).abs() > 1e-6 {
            return false;
        }
        self.pos = m.apply_point(self.pos);
        for span in &mut self.spans {
            if let Some(x) = &mut span.x {
                *x += m.e;
            }
            if let Some(y) = &mut span.y {
                *y += m.f;
            }
        }
        true
    }

    fn set_pos(&mut self, p: Point) {
        self.pos = p;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub rect: BBox,
    pub href: String,
    /// Decoded pixels, populated at load time. `None` when the source could
    /// not be decoded; the image then occupies space but draws nothing.
    pub data: Option<ImageData>,
}

impl NodeOps for ImageRef {
    fn local_bbox(&self, _style: &PaintStyle) -> Option<BBox> {
        Some(self.rect)
    }

    fn bake_transform(&mut self, m: &Matrix) -> bool {
        let a = m.apply_point(Point::new(self.rect.x, self.rect.y));
        let b = m.apply_point(Point::new(self.rect.max_x(), self.rect.max_y()));
        self.rect = BBox::from_points(a, b);
        true
    }

    fn set_pos(&mut self, p: Point) {
        self.rect.x = p.x;
        self.rect.y = p.y;
    }

    fn set_size(&mut self, s: Size) {
        self.rect.width = s.width.max(0.0);
        self.rect.height = s.height.max(0.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkerUnits {
    /// Marker coordinates scale with the stroke width of the referencing
    /// shape.
    #[default]
    StrokeWidth,
    UserSpace,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MarkerOrient {
    /// Rotate with the path tangent at the vertex.
    Auto,
    #[default]
    Fixed,
    Angle(f32),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarkerDef {
    pub ref_point: Point,
    pub size: Size,
    pub orient: MarkerOrient,
    pub units: MarkerUnits,
    pub view_box: Option<ViewBox>,
}

/// Root element state: the optional view box and its fit policy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RootInfo {
    pub view_box: Option<ViewBox>,
    pub preserve: PreserveAspectRatio,
}

/// An element we recognize but do not interpret: kept verbatim so documents
/// survive a load/save round trip without losing it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawElement {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Circle(Circle),
    Ellipse(Ellipse),
    Rect(Rect),
    Line(Line),
    Polyline(Polyline),
    Polygon(Polygon),
    Path(PathGeom),
    Text(TextBlock),
    Image(ImageRef),
    Group,
    Root(RootInfo),
    Gradient(Grad),
    Marker(MarkerDef),
    ClipPath,
    Raw(RawElement),
    StyleSheet(String),
}

impl Shape {
    pub fn svg_name(&self) -> &str {
        match self {
            Shape::Circle(_) => "circle",
            Shape::Ellipse(_) => "ellipse",
            Shape::Rect(_) => "rect",
            Shape::Line(_) => "line",
            Shape::Polyline(_) => "polyline",
            Shape::Polygon(_) => "polygon",
            Shape::Path(_) => "path",
            Shape::Text(_) => "text",
            Shape::Image(_) => "image",
            Shape::Group => "g",
            Shape::Root(_) => "svg",
            Shape::Gradient(g) => match g.kind {
                GradKind::Linear => "linearGradient",
                GradKind::Radial => "radialGradient",
            },
            Shape::Marker(_) => "marker",
            Shape::ClipPath => "clipPath",
            Shape::Raw(raw) => raw.tag.as_str(),
            Shape::StyleSheet(_) => "style",
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Shape::Group | Shape::Root(_) | Shape::Marker(_) | Shape::ClipPath
        )
    }

    fn ops(&self) -> Option<&dyn NodeOps> {
        Some(match self {
            Shape::Circle(v) => v,
            Shape::Ellipse(v) => v,
            Shape::Rect(v) => v,
            Shape::Line(v) => v,
            Shape::Polyline(v) => v,
            Shape::Polygon(v) => v,
            Shape::Path(v) => v,
            Shape::Text(v) => v,
            Shape::Image(v) => v,
            _ => return None,
        })
    }

    fn ops_mut(&mut self) -> Option<&mut dyn NodeOps> {
        Some(match self {
            Shape::Circle(v) => v,
            Shape::Ellipse(v) => v,
            Shape::Rect(v) => v,
            Shape::Line(v) => v,
            Shape::Polyline(v) => v,
            Shape::Polygon(v) => v,
            Shape::Path(v) => v,
            Shape::Text(v) => v,
            Shape::Image(v) => v,
            _ => return None,
        })
    }

    pub fn local_bbox(&self, style: &PaintStyle) -> Option<BBox> {
        self.ops().and_then(|ops| ops.local_bbox(style))
    }

    pub fn bake_transform(&mut self, m: &Matrix) -> bool {
        self.ops_mut().is_some_and(|ops| ops.bake_transform(m))
    }

    pub fn set_pos(&mut self, p: Point) {
        if let Some(ops) = self.ops_mut() {
            ops.set_pos(p);
        }
    }

    pub fn set_size(&mut self, s: Size) {
        if let Some(ops) = self.ops_mut() {
            ops.set_size(s);
        }
    }
}

/// One scene-tree node. Geometry lives in `shape`; everything else here is
/// tree structure, authored styling inputs, and pass outputs (resolved style,
/// boxes, absolute transform, gradient caches).
#[derive(Debug, Clone)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Unique display name: the SVG tag plus a numeric suffix. Doubles as
    /// the `id` attribute on save.
    pub name: String,
    pub classes: Vec<String>,
    /// Authored property inputs in document order: presentation attributes
    /// first, then the `style` attribute's declarations.
    pub declarations: Vec<(String, String)>,
    pub transform: Matrix,
    pub style: PaintStyle,
    pub bbox: Option<BBox>,
    pub visible_bbox: Option<BBox>,
    pub abs_transform: Matrix,
    pub is_def: bool,
    pub fill_geom: Option<GradientGeom>,
    pub stroke_geom: Option<GradientGeom>,
    pub shape: Shape,
}

impl Node {
    pub fn new(shape: Shape) -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            name: String::new(),
            classes: Vec::new(),
            declarations: Vec::new(),
            transform: Matrix::identity(),
            style: PaintStyle::default(),
            bbox: None,
            visible_bbox: None,
            abs_transform: Matrix::identity(),
            is_def: false,
            fill_geom: None,
            stroke_geom: None,
            shape,
        }
    }

    pub fn with_name(shape: Shape, name: impl Into<String>) -> Self {
        let mut node = Node::new(shape);
        node.name = name.into();
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::PaintStyle;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn circle_bbox_and_bake() {
        let mut c = Shape::Circle(Circle {
            center: Point::new(10.0, 10.0),
            radius: 5.0,
        });
        let b = c.local_bbox(&PaintStyle::default()).unwrap();
        assert_eq!(b, BBox::from_xywh(5.0, 5.0, 10.0, 10.0));

        assert!(c.bake_transform(&Matrix::translate(2.0, 0.0).mul(Matrix::scale(2.0, 2.0))));
        let Shape::Circle(c) = c else { unreachable!() };
        assert_eq!(c.center, Point::new(22.0, 20.0));
        assert!(close(c.radius, 10.0));
    }

    #[test]
    fn rect_set_pos_and_size() {
        let mut r = Shape::Rect(Rect {
            x: 0.0,
            y: 0.0,
            width: 4.0,
            height: 4.0,
            rx: 0.0,
            ry: 0.0,
        });
        r.set_pos(Point::new(7.0, 8.0));
        r.set_size(Size::new(10.0, 20.0));
        let b = r.local_bbox(&PaintStyle::default()).unwrap();
        assert_eq!(b, BBox::from_xywh(7.0, 8.0, 10.0, 20.0));
    }

    #[test]
    fn rect_corner_radii_fill_in_and_clamp() {
        let r = Rect {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 4.0,
            rx: 8.0,
            ry: 0.0,
        };
        let (rx, ry) = r.corner_radii();
        assert!(close(rx, 5.0));
        assert!(close(ry, 2.0));
    }

    #[test]
    fn polyline_set_pos_translates_all_points() {
        let mut p = Shape::Polyline(Polyline {
            points: vec![Point::new(1.0, 1.0), Point::new(3.0, 5.0)],
        });
        p.set_pos(Point::new(0.0, 0.0));
        let Shape::Polyline(p) = p else { unreachable!() };
        assert_eq!(p.points[0], Point::new(0.0, 0.0));
        assert_eq!(p.points[1], Point::new(2.0, 4.0));
    }

    #[test]
    fn text_bake_rejects_scale() {
        let mut t = Shape::Text(TextBlock {
            pos: Point::new(5.0, 5.0),
            spans: vec![TextSpan {
                text: "hi".into(),
                ..TextSpan::default()
            }],
        });
        assert!(!t.bake_transform(&Matrix::scale(2.0, 2.0)));
        assert!(t.bake_transform(&Matrix::translate(3.0, 0.0)));
        let Shape::Text(t) = t else { unreachable!() };
        assert_eq!(t.pos, Point::new(8.0, 5.0));
    }

    #[test]
    fn text_bbox_honors_anchor() {
        let style = PaintStyle {
            font_size: 10.0,
            text_anchor: TextAnchor::Middle,
            ..PaintStyle::default()
        };
        let t = Shape::Text(TextBlock {
            pos: Point::new(0.0, 0.0),
            spans: vec![TextSpan {
                text: "abcd".into(),
                ..TextSpan::default()
            }],
        });
        let b = t.local_bbox(&style).unwrap();
        assert!(close(b.x, -12.0));
        assert!(close(b.width, 24.0));
    }

    #[test]
    fn group_has_no_local_bbox() {
        assert!(Shape::Group.local_bbox(&PaintStyle::default()).is_none());
        assert!(!Shape::Group.bake_transform(&Matrix::translate(1.0, 1.0)));
    }

    #[test]
    fn gradient_svg_name_tracks_kind() {
        let lin = Shape::Gradient(Grad::linear());
        let rad = Shape::Gradient(Grad::radial());
        assert_eq!(lin.svg_name(), "linearGradient");
        assert_eq!(rad.svg_name(), "radialGradient");
    }
}
