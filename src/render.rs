use libm::atan2f;

use crate::document::{Document, NodeId};
use crate::error::LineworkError;
use crate::gradient;
use crate::node::{MarkerOrient, MarkerUnits, Shape, TextBlock};
use crate::painter::{Painter, StrokeProps};
use crate::path::{ArcSegment, PathCmd, PathData, PathVisitor};
use crate::raster::{Raster, RasterPainter};
use crate::style::{apply_declarations, PaintRef, PaintStyle, Stylesheet, TextAnchor};
use crate::text::TextShaper;
use crate::transform::Matrix;
use crate::types::{BBox, PaintSource, Point, PreserveAspectRatio, FitAlign, FitPolicy, Size, ViewBox};

// Cubic approximation of a quarter circle.
const KAPPA: f32 = 0.552_284_8;

/// Runs the full pipeline and rasterizes.
pub(crate) fn render_document(doc: &mut Document) -> Result<Raster, LineworkError> {
    run_passes(doc);
    let size = doc.raster_size();
    let mut painter = RasterPainter::new(
        size.width.max(1.0) as u32,
        size.height.max(1.0) as u32,
        doc.background,
    )?;
    paint_document(doc, &mut painter);
    if let Some(debug) = &doc.debug {
        debug.emit_summary("render");
        debug.flush();
    }
    Ok(painter.finish())
}

/// Style pass then box pass. Outputs land on the nodes; the paint pass and
/// editing operations read them.
pub(crate) fn run_passes(doc: &mut Document) {
    style_pass(doc);
    bbox_pass(doc);
}

// ---- fit ---------------------------------------------------------------

fn align_fractions(align: FitAlign) -> (f32, f32) {
    match align {
        FitAlign::None => (0.0, 0.0),
        FitAlign::XMinYMin => (0.0, 0.0),
        FitAlign::XMidYMin => (0.5, 0.0),
        FitAlign::XMaxYMin => (1.0, 0.0),
        FitAlign::XMinYMid => (0.0, 0.5),
        FitAlign::XMidYMid => (0.5, 0.5),
        FitAlign::XMaxYMid => (1.0, 0.5),
        FitAlign::XMinYMax => (0.0, 1.0),
        FitAlign::XMidYMax => (0.5, 1.0),
        FitAlign::XMaxYMax => (1.0, 1.0),
    }
}

/// Maps a view box onto a target surface per `preserveAspectRatio`.
pub(crate) fn fit_viewbox(vb: &ViewBox, target: Size, preserve: PreserveAspectRatio) -> Matrix {
    if vb.width <= 0.0 || vb.height <= 0.0 {
        return Matrix::identity();
    }
    let sx = target.width / vb.width;
    let sy = target.height / vb.height;
    if preserve.align == FitAlign::None {
        return Matrix::scale(sx, sy).mul(Matrix::translate(-vb.min_x, -vb.min_y));
    }
    let s = match preserve.policy {
        FitPolicy::Meet => sx.min(sy),
        FitPolicy::Slice => sx.max(sy),
    };
    let (fx, fy) = align_fractions(preserve.align);
    let extra_x = target.width - vb.width * s;
    let extra_y = target.height - vb.height * s;
    Matrix::translate(fx * extra_x, fy * extra_y)
        .mul(Matrix::scale(s, s))
        .mul(Matrix::translate(-vb.min_x, -vb.min_y))
}

// ---- style pass --------------------------------------------------------

fn style_pass(doc: &mut Document) {
    let base = Stylesheet::default();
    let root = doc.root();
    resolve_styles(doc, root, &PaintStyle::default(), &base);
    // Definition content resolves against the root's aggregated sheet.
    let root_sheet = aggregate_sheet(doc, root, &base);
    for def in doc.defs().to_vec() {
        resolve_styles(doc, def, &PaintStyle::default(), &root_sheet);
    }
}

fn aggregate_sheet(doc: &Document, id: NodeId, inherited: &Stylesheet) -> Stylesheet {
    let mut own = Stylesheet::default();
    for &child in &doc.node(id).children {
        if let Shape::StyleSheet(css) = &doc.node(child).shape {
            own.append_css(css);
        }
    }
    if own.is_empty() {
        inherited.clone()
    } else {
        inherited.merged(&own)
    }
}

fn resolve_styles(doc: &mut Document, id: NodeId, parent_style: &PaintStyle, sheet: &Stylesheet) {
    let sheet = aggregate_sheet(doc, id, sheet);

    let (tag, name, classes, declarations) = {
        let node = doc.node(id);
        (
            node.shape.svg_name().to_string(),
            node.name.clone(),
            node.classes.clone(),
            node.declarations.clone(),
        )
    };
    let mut style = parent_style.inherited();
    sheet.apply(&tag, &name, &classes, &mut style);
    apply_declarations(&mut style, &declarations);
    doc.node_mut(id).style = style;

    let style = doc.node(id).style.clone();
    for child in doc.node(id).children.clone() {
        resolve_styles(doc, child, &style, &sheet);
    }
}

// ---- box pass ----------------------------------------------------------

fn bbox_pass(doc: &mut Document) {
    let doc_m = doc.document_transform();
    let size = doc.raster_size();
    let raster_rect = BBox::from_xywh(0.0, 0.0, size.width, size.height);
    let root = doc.root();
    compute_bbox(doc, root, doc_m, &raster_rect);
    for def in doc.defs().to_vec() {
        compute_bbox(doc, def, Matrix::identity(), &raster_rect);
    }
}

fn compute_bbox(doc: &mut Document, id: NodeId, parent_abs: Matrix, raster: &BBox) -> Option<BBox> {
    let abs = parent_abs.mul(doc.node(id).transform);
    doc.node_mut(id).abs_transform = abs;

    let bbox = if doc.node(id).shape.is_container() {
        let mut union: Option<BBox> = None;
        for child in doc.node(id).children.clone() {
            if let Some(b) = compute_bbox(doc, child, abs, raster) {
                union = Some(match union {
                    Some(u) => u.union(&b),
                    None => b,
                });
            }
        }
        union
    } else if !doc.node(id).style.renders() && !matches!(doc.node(id).shape, Shape::Image(_)) {
        // No paint resolved, nothing will be drawn; the shape contributes
        // no box to its containers.
        None
    } else {
        let node = doc.node(id);
        let local = node.shape.local_bbox(&node.style).map(|b| {
            // Half the pen hangs outside the geometry.
            if !node.style.stroke.is_none() && node.style.stroke_width > 0.0 {
                b.expand(node.style.stroke_width / 2.0)
            } else {
                b
            }
        });
        local.map(|b| abs.map_bbox(&b))
    };

    let node = doc.node_mut(id);
    node.bbox = bbox;
    node.visible_bbox = bbox.and_then(|b| b.intersect(raster));
    bbox
}

// ---- paint pass --------------------------------------------------------

/// Paints the styled, boxed tree into any painter. `run_passes` must have
/// run on this document state first.
pub(crate) fn paint_document(doc: &Document, painter: &mut dyn Painter) {
    let doc_m = doc.document_transform();
    painter.save();
    painter.concat(&doc_m);
    for &child in &doc.node(doc.root()).children {
        paint_node(doc, child, painter, false);
    }
    painter.restore();
}

fn paint_node(doc: &Document, id: NodeId, painter: &mut dyn Painter, in_defs: bool) {
    let node = doc.node(id);
    match &node.shape {
        Shape::StyleSheet(_) | Shape::Raw(_) | Shape::Gradient(_) => return,
        Shape::Marker(_) | Shape::ClipPath => {
            if !in_defs {
                return;
            }
        }
        _ => {}
    }
    // A leaf with neither fill nor stroke resolved is styled but never
    // drawn. Images blit pixels and carry no paint of their own.
    if !node.shape.is_container()
        && !matches!(node.shape, Shape::Image(_))
        && !node.style.renders()
    {
        return;
    }
    // Culling only applies in document space; definition content is placed
    // by reference-site transforms the box pass has not seen.
    if !in_defs && node.visible_bbox.is_none() {
        return;
    }

    let style = &node.style;
    painter.save();
    painter.concat(&node.transform);

    let grouped = style.group_opacity < 1.0;
    if grouped {
        painter.push_group(style.group_opacity);
    }

    if let Some(name) = &style.clip_path {
        apply_clip(doc, name, painter);
    }

    match &node.shape {
        Shape::Group | Shape::Root(_) | Shape::Marker(_) | Shape::ClipPath => {
            for &child in &node.children {
                paint_node(doc, child, painter, in_defs);
            }
        }
        Shape::Text(block) => paint_text(doc, id, block, style, painter),
        Shape::Image(image) => {
            if let Some(data) = &image.data {
                painter.draw_image(&image.rect, data);
            } else {
                doc.warn("render", format!("image '{}' has no decoded pixels", node.name));
            }
        }
        shape => {
            if let Some(path) = shape_outline(shape, style) {
                paint_shape_path(doc, id, &path, style, painter);
                paint_markers(doc, id, &path, style, painter);
            }
        }
    }

    if grouped {
        painter.pop_group();
    }
    painter.restore();
    if let Some(debug) = &doc.debug {
        debug.increment("nodes_painted", 1);
    }
}

fn resolve_paint(
    doc: &Document,
    id: NodeId,
    paint: &PaintRef,
    fill_slot: bool,
) -> PaintSource {
    match paint {
        PaintRef::None => PaintSource::None,
        PaintRef::Color(c) => PaintSource::Solid(*c),
        PaintRef::Ref(name) => {
            let node = doc.node(id);
            let geom = if fill_slot {
                node.fill_geom.as_ref()
            } else {
                node.stroke_geom.as_ref()
            };
            let bbox = node.shape.local_bbox(&node.style);
            match gradient::resolve_shading(doc, name, geom, bbox.as_ref()) {
                Some(shading) => PaintSource::Gradient(shading),
                None => {
                    doc.warn(
                        "render",
                        format!("node '{}' references missing paint '{name}'", node.name),
                    );
                    if let Some(debug) = &doc.debug {
                        debug.increment("missing_references", 1);
                    }
                    PaintSource::None
                }
            }
        }
    }
}

fn stroke_props(style: &PaintStyle) -> StrokeProps {
    StrokeProps {
        width: style.stroke_width,
        cap: style.line_cap,
        join: style.line_join,
        miter_limit: style.miter_limit,
        dash: style.dash_pattern.clone(),
        dash_offset: style.dash_offset,
    }
}

fn paint_shape_path(
    doc: &Document,
    id: NodeId,
    path: &PathData,
    style: &PaintStyle,
    painter: &mut dyn Painter,
) {
    let fill = resolve_paint(doc, id, &style.fill, true);
    let stroke = resolve_paint(doc, id, &style.stroke, false);
    let has_fill = !fill.is_none();
    let has_stroke = !stroke.is_none() && style.stroke_width > 0.0;
    if !has_fill && !has_stroke {
        return;
    }

    painter.set_fill(&fill);
    painter.set_stroke(&stroke);
    painter.set_opacity(style.fill_opacity, style.stroke_opacity);
    if has_stroke {
        painter.set_stroke_props(&stroke_props(style));
    }

    emit_path(path, painter);
    match (has_fill, has_stroke) {
        (true, true) => painter.fill_stroke_path(style.fill_rule_evenodd),
        (true, false) => painter.fill_path(style.fill_rule_evenodd),
        (false, true) => painter.stroke_path(),
        (false, false) => unreachable!(),
    }
}

fn apply_clip(doc: &Document, name: &str, painter: &mut dyn Painter) {
    let Some(def_id) = doc.find_def(name) else {
        doc.warn("render", format!("missing clip path '{name}'"));
        return;
    };
    let def = doc.node(def_id);
    if !matches!(def.shape, Shape::ClipPath) {
        return;
    }
    let mut emitted = false;
    for &child in &def.children {
        let node = doc.node(child);
        if let Some(mut path) = shape_outline(&node.shape, &node.style) {
            if !node.transform.is_identity() {
                path.transform_in_place(&node.transform);
            }
            emit_path(&path, painter);
            emitted = true;
        }
    }
    if emitted {
        painter.clip_current_path(false);
    }
}

// ---- geometry emission -------------------------------------------------

struct PainterSink<'a> {
    painter: &'a mut dyn Painter,
}

impl PathVisitor for PainterSink<'_> {
    fn move_to(&mut self, to: Point) {
        self.painter.move_to(to);
    }

    fn line_to(&mut self, _from: Point, to: Point) {
        self.painter.line_to(to);
    }

    fn cubic_to(&mut self, _from: Point, c1: Point, c2: Point, to: Point) {
        self.painter.cubic_to(c1, c2, to);
    }

    fn quad_to(&mut self, _from: Point, ctrl: Point, to: Point) {
        self.painter.quad_to(ctrl, to);
    }

    fn arc_to(&mut self, _from: Point, arc: &ArcSegment) {
        self.painter.arc_to(arc);
    }

    fn close(&mut self, _from: Point, _start: Point) {
        self.painter.close_path();
    }
}

fn emit_path(path: &PathData, painter: &mut dyn Painter) {
    let mut sink = PainterSink { painter };
    path.walk(&mut sink);
}

fn ellipse_path(cx: f32, cy: f32, rx: f32, ry: f32) -> PathData {
    let kx = rx * KAPPA;
    let ky = ry * KAPPA;
    let mut p = PathData::new();
    p.push(PathCmd::MoveTo, &[cx + rx, cy]);
    p.push(
        PathCmd::CubicTo,
        &[cx + rx, cy + ky, cx + kx, cy + ry, cx, cy + ry],
    );
    p.push(
        PathCmd::CubicTo,
        &[cx - kx, cy + ry, cx - rx, cy + ky, cx - rx, cy],
    );
    p.push(
        PathCmd::CubicTo,
        &[cx - rx, cy - ky, cx - kx, cy - ry, cx, cy - ry],
    );
    p.push(
        PathCmd::CubicTo,
        &[cx + kx, cy - ry, cx + rx, cy - ky, cx + rx, cy],
    );
    p.push(PathCmd::Close, &[]);
    p
}

fn rect_path(x: f32, y: f32, w: f32, h: f32, rx: f32, ry: f32) -> PathData {
    let mut p = PathData::new();
    if rx <= 0.0 || ry <= 0.0 {
        p.push(PathCmd::MoveTo, &[x, y]);
        p.push(PathCmd::LineTo, &[x + w, y, x + w, y + h, x, y + h]);
        p.push(PathCmd::Close, &[]);
        return p;
    }
    let kx = rx * (1.0 - KAPPA);
    let ky = ry * (1.0 - KAPPA);
    p.push(PathCmd::MoveTo, &[x + rx, y]);
    p.push(PathCmd::LineTo, &[x + w - rx, y]);
    p.push(
        PathCmd::CubicTo,
        &[x + w - kx, y, x + w, y + ky, x + w, y + ry],
    );
    p.push(PathCmd::LineTo, &[x + w, y + h - ry]);
    p.push(
        PathCmd::CubicTo,
        &[x + w, y + h - ky, x + w - kx, y + h, x + w - rx, y + h],
    );
    p.push(PathCmd::LineTo, &[x + rx, y + h]);
    p.push(
        PathCmd::CubicTo,
        &[x + kx, y + h, x, y + h - ky, x, y + h - ry],
    );
    p.push(PathCmd::LineTo, &[x, y + ry]);
    p.push(PathCmd::CubicTo, &[x, y + ky, x + kx, y, x + rx, y]);
    p.push(PathCmd::Close, &[]);
    p
}

/// Converts any drawable shape into path geometry. `None` for non-geometric
/// variants and empty point lists.
fn shape_outline(shape: &Shape, _style: &PaintStyle) -> Option<PathData> {
    match shape {
        Shape::Circle(c) => Some(ellipse_path(c.center.x, c.center.y, c.radius, c.radius)),
        Shape::Ellipse(e) => Some(ellipse_path(e.center.x, e.center.y, e.rx, e.ry)),
        Shape::Rect(r) => {
            let (rx, ry) = r.corner_radii();
            Some(rect_path(r.x, r.y, r.width, r.height, rx, ry))
        }
        Shape::Line(l) => {
            let mut p = PathData::new();
            p.push(PathCmd::MoveTo, &[l.p1.x, l.p1.y]);
            p.push(PathCmd::LineTo, &[l.p2.x, l.p2.y]);
            Some(p)
        }
        Shape::Polyline(poly) => points_path(&poly.points, false),
        Shape::Polygon(poly) => points_path(&poly.points, true),
        Shape::Path(geom) => {
            if geom.data.is_empty() {
                None
            } else {
                Some(geom.data.clone())
            }
        }
        _ => None,
    }
}

fn points_path(points: &[Point], close: bool) -> Option<PathData> {
    let first = points.first()?;
    let mut p = PathData::new();
    p.push(PathCmd::MoveTo, &[first.x, first.y]);
    let mut args = Vec::with_capacity((points.len() - 1) * 2);
    for pt in &points[1..] {
        args.push(pt.x);
        args.push(pt.y);
    }
    if !args.is_empty() {
        p.push(PathCmd::LineTo, &args);
    }
    if close {
        p.push(PathCmd::Close, &[]);
    }
    Some(p)
}

// ---- text --------------------------------------------------------------

fn paint_text(
    doc: &Document,
    id: NodeId,
    block: &TextBlock,
    style: &PaintStyle,
    painter: &mut dyn Painter,
) {
    if doc.fonts.is_empty() {
        doc.warn(
            "render",
            format!("text '{}' skipped, no fonts registered", doc.node(id).name),
        );
        return;
    }
    let shaper: &dyn TextShaper = doc.fonts.as_ref();
    let mut cursor = block.pos;
    for span in &block.spans {
        let mut span_style = style.clone();
        apply_declarations(&mut span_style, &span.declarations);
        let x = span.x.unwrap_or(cursor.x) + span.dx;
        let y = span.y.unwrap_or(cursor.y) + span.dy;
        let Some(run) = shaper.shape(&span_style.font_family, &span.text, span_style.font_size)
        else {
            continue;
        };
        let shift = match span_style.text_anchor {
            TextAnchor::Start => 0.0,
            TextAnchor::Middle => -run.advance / 2.0,
            TextAnchor::End => -run.advance,
        };

        let fill = resolve_paint(doc, id, &span_style.fill, true);
        if !fill.is_none() {
            painter.set_fill(&fill);
            painter.set_opacity(span_style.fill_opacity, span_style.stroke_opacity);
            let mut emitted = false;
            for glyph in &run.glyphs {
                let origin = Point::new(x + shift + glyph.dx, y + glyph.dy);
                if let Some(outline) = shaper.outline(
                    &span_style.font_family,
                    glyph.id,
                    origin,
                    span_style.font_size,
                ) {
                    emit_path(&outline, painter);
                    emitted = true;
                }
            }
            if emitted {
                painter.fill_path(false);
            }
        }

        cursor = Point::new(x + run.advance, y);
    }
}

// ---- markers -----------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Vertex {
    at: Point,
    angle: f32,
}

#[derive(Debug, Default)]
struct VertexCollector {
    /// Per subpath: the vertices with their tangent angles.
    subpaths: Vec<Vec<Vertex>>,
    /// Incoming tangent angle of the last segment, for averaging.
    last_in: Option<f32>,
}

impl VertexCollector {
    fn segment(&mut self, from: Point, to: Point, out_angle: f32, in_angle: f32) {
        let _ = from;
        let Some(current) = self.subpaths.last_mut() else {
            return;
        };
        if let Some(last) = current.last_mut() {
            // Interior vertex: average the incoming and outgoing directions.
            if let Some(prev_in) = self.last_in {
                let vx = libm::cosf(prev_in) + libm::cosf(out_angle);
                let vy = libm::sinf(prev_in) + libm::sinf(out_angle);
                last.angle = atan2f(vy, vx);
            } else {
                last.angle = out_angle;
            }
        }
        current.push(Vertex {
            at: to,
            angle: in_angle,
        });
        self.last_in = Some(in_angle);
    }

    fn line_angle(from: Point, to: Point) -> f32 {
        atan2f(to.y - from.y, to.x - from.x)
    }
}

impl PathVisitor for VertexCollector {
    fn move_to(&mut self, to: Point) {
        self.subpaths.push(vec![Vertex {
            at: to,
            angle: 0.0,
        }]);
        self.last_in = None;
    }

    fn line_to(&mut self, from: Point, to: Point) {
        let a = Self::line_angle(from, to);
        self.segment(from, to, a, a);
    }

    fn cubic_to(&mut self, from: Point, c1: Point, c2: Point, to: Point) {
        let out = Self::line_angle(from, if c1 == from { c2 } else { c1 });
        let inn = Self::line_angle(if c2 == to { c1 } else { c2 }, to);
        self.segment(from, to, out, inn);
    }

    fn quad_to(&mut self, from: Point, ctrl: Point, to: Point) {
        let out = Self::line_angle(from, ctrl);
        let inn = Self::line_angle(ctrl, to);
        self.segment(from, to, out, inn);
    }

    fn arc_to(&mut self, from: Point, arc: &ArcSegment) {
        let out = arc.tangent_angle(arc.start_angle);
        let inn = arc.tangent_angle(arc.end_angle());
        self.segment(from, arc.end, out, inn);
    }

    fn close(&mut self, from: Point, start: Point) {
        if from != start {
            let a = Self::line_angle(from, start);
            self.segment(from, start, a, a);
        }
    }
}

fn paint_markers(
    doc: &Document,
    id: NodeId,
    path: &PathData,
    style: &PaintStyle,
    painter: &mut dyn Painter,
) {
    if style.marker_start.is_none() && style.marker_mid.is_none() && style.marker_end.is_none() {
        return;
    }
    let mut collector = VertexCollector::default();
    path.walk(&mut collector);

    for vertices in &collector.subpaths {
        let last = vertices.len().saturating_sub(1);
        for (i, vertex) in vertices.iter().enumerate() {
            let name = if i == 0 {
                style.marker_start.as_ref()
            } else if i == last {
                style.marker_end.as_ref()
            } else {
                style.marker_mid.as_ref()
            };
            if let Some(name) = name {
                paint_marker_at(doc, id, name, *vertex, style, painter);
            }
        }
    }
}

fn paint_marker_at(
    doc: &Document,
    id: NodeId,
    name: &str,
    vertex: Vertex,
    style: &PaintStyle,
    painter: &mut dyn Painter,
) {
    let Some(def_id) = doc.find_def(name) else {
        doc.warn(
            "render",
            format!("node '{}' references missing marker '{name}'", doc.node(id).name),
        );
        return;
    };
    let def = doc.node(def_id);
    let Shape::Marker(marker) = &def.shape else {
        return;
    };

    let angle = match marker.orient {
        MarkerOrient::Auto => vertex.angle,
        MarkerOrient::Fixed => 0.0,
        MarkerOrient::Angle(deg) => deg.to_radians(),
    };
    let mut scale = match marker.units {
        MarkerUnits::StrokeWidth => style.stroke_width.max(0.0),
        MarkerUnits::UserSpace => 1.0,
    };
    // A view box rescales marker content into the marker's own size.
    if let (Some(vb), true) = (marker.view_box, marker.size.width > 0.0) {
        if vb.width > 0.0 {
            scale *= marker.size.width / vb.width;
        }
    }
    if scale <= 0.0 {
        return;
    }

    let m = Matrix::translate(vertex.at.x, vertex.at.y)
        .mul(Matrix::rotate(angle))
        .mul(Matrix::scale(scale, scale))
        .mul(Matrix::translate(-marker.ref_point.x, -marker.ref_point.y));

    painter.save();
    painter.concat(&m);
    for &child in &def.children {
        paint_node(doc, child, painter, true);
    }
    painter.restore();
}
