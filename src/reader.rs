use std::collections::HashMap;

use crate::debug::DebugLogger;
use crate::document::{Document, NodeId};
use crate::error::LineworkError;
use crate::gradient::{self, Grad, GradKind, GradUnits};
use crate::node::{
    Circle, Ellipse, ImageRef, Line, MarkerDef, MarkerOrient, MarkerUnits, Node, PathGeom,
    Polygon, Polyline, RawElement, Rect, RootInfo, Shape, TextBlock, TextSpan,
};
use crate::path::PathData;
use crate::raster;
use crate::render;
use crate::style::{parse_declarations, parse_number, PaintRef};
use crate::transform::{parse_number_list, parse_transform, Matrix};
use crate::types::{
    BBox, Color, FitAlign, FitPolicy, GradientStop, Point, PreserveAspectRatio, Size, ViewBox,
};

// SVG's intrinsic default size when the root gives neither dimensions nor a
// view box.
const DEFAULT_WIDTH: f32 = 300.0;
const DEFAULT_HEIGHT: f32 = 150.0;

/// Presentation attributes that participate in the cascade. Everything else
/// on an element is geometry or structure.
const STYLE_ATTRS: &[&str] = &[
    "fill",
    "stroke",
    "stroke-width",
    "stroke-miterlimit",
    "stroke-linecap",
    "stroke-linejoin",
    "stroke-dasharray",
    "stroke-dashoffset",
    "fill-rule",
    "opacity",
    "fill-opacity",
    "stroke-opacity",
    "color",
    "font-family",
    "font-size",
    "text-anchor",
    "marker-start",
    "marker-mid",
    "marker-end",
    "clip-path",
];

struct Loader {
    /// `id` attribute → node, for `use` resolution.
    by_id: HashMap<String, NodeId>,
}

/// Parses an SVG document. Malformed XML fails the whole load; malformed
/// path data inside well-formed XML degrades to an empty shape with a
/// warning. The logger is attached before parsing so load-time warnings
/// reach it.
pub(crate) fn parse_svg(
    text: &str,
    debug: Option<DebugLogger>,
) -> Result<Document, LineworkError> {
    let xml = roxmltree::Document::parse(text)
        .map_err(|e| LineworkError::Parse(format!("invalid xml: {e}")))?;
    let root = xml.root_element();
    if root.tag_name().name() != "svg" {
        return Err(LineworkError::Parse(format!(
            "root element is <{}>, expected <svg>",
            root.tag_name().name()
        )));
    }

    let view_box = root.attribute("viewBox").and_then(parse_viewbox);
    let preserve = root
        .attribute("preserveAspectRatio")
        .map(parse_preserve)
        .unwrap_or_default();
    let width = root.attribute("width").and_then(parse_number);
    let height = root.attribute("height").and_then(parse_number);
    let raster = Size::new(
        width.or(view_box.map(|vb| vb.width)).unwrap_or(DEFAULT_WIDTH),
        height
            .or(view_box.map(|vb| vb.height))
            .unwrap_or(DEFAULT_HEIGHT),
    );

    let mut doc = Document::new(raster);
    doc.debug = debug;
    let root_id = doc.root();
    if let Some(id) = root.attribute("id") {
        doc.node_mut(root_id).name = id.to_string();
    }
    doc.node_mut(root_id).shape = Shape::Root(RootInfo { view_box, preserve });
    capture_common(&mut doc, root_id, &root);

    let mut loader = Loader {
        by_id: HashMap::new(),
    };
    for child in root.children() {
        parse_node(&mut doc, &mut loader, &child, root_id, false);
    }

    // Pull per-shape gradient caches once styles and boxes exist.
    render::run_passes(&mut doc);
    for id in doc.subtree_ids(doc.root()) {
        gradient::to_geom(&mut doc, id);
    }
    Ok(doc)
}

fn attr_f32(el: &roxmltree::Node, name: &str, default: f32) -> f32 {
    el.attribute(name).and_then(parse_number).unwrap_or(default)
}

fn href<'a>(el: &'a roxmltree::Node) -> Option<&'a str> {
    el.attribute("href")
        .or_else(|| el.attribute(("http://www.w3.org/1999/xlink", "href")))
}

fn parse_viewbox(value: &str) -> Option<ViewBox> {
    let nums = parse_number_list(value);
    if nums.len() != 4 || nums[2] <= 0.0 || nums[3] <= 0.0 {
        return None;
    }
    Some(ViewBox {
        min_x: nums[0],
        min_y: nums[1],
        width: nums[2],
        height: nums[3],
    })
}

fn parse_preserve(value: &str) -> PreserveAspectRatio {
    let mut parts = value.split_whitespace();
    let align = match parts.next() {
        Some("none") => FitAlign::None,
        Some("xMinYMin") => FitAlign::XMinYMin,
        Some("xMidYMin") => FitAlign::XMidYMin,
        Some("xMaxYMin") => FitAlign::XMaxYMin,
        Some("xMinYMid") => FitAlign::XMinYMid,
        Some("xMaxYMid") => FitAlign::XMaxYMid,
        Some("xMinYMax") => FitAlign::XMinYMax,
        Some("xMidYMax") => FitAlign::XMidYMax,
        Some("xMaxYMax") => FitAlign::XMaxYMax,
        _ => FitAlign::XMidYMid,
    };
    let policy = match parts.next() {
        Some("slice") => FitPolicy::Slice,
        _ => FitPolicy::Meet,
    };
    PreserveAspectRatio { align, policy }
}

/// Copies id, class, transform, and the cascade inputs onto a node.
fn capture_common(doc: &mut Document, id: NodeId, el: &roxmltree::Node) {
    let node = doc.node_mut(id);
    if let Some(class) = el.attribute("class") {
        node.classes = class.split_whitespace().map(str::to_string).collect();
    }
    if let Some(transform) = el.attribute("transform") {
        node.transform = parse_transform(transform);
    }
    for attr in el.attributes() {
        let key = attr.name();
        if STYLE_ATTRS.contains(&key) {
            node.declarations.push((key.to_string(), attr.value().to_string()));
        }
    }
    // The style attribute outranks presentation attributes; it goes last.
    if let Some(style) = el.attribute("style") {
        node.declarations.extend(parse_declarations(style));
    }
}

fn attach_parsed(
    doc: &mut Document,
    loader: &mut Loader,
    el: &roxmltree::Node,
    shape: Shape,
    parent: NodeId,
    as_def: bool,
) -> NodeId {
    let mut node = Node::new(shape);
    if let Some(id) = el.attribute("id") {
        node.name = id.to_string();
    }
    let nid = if as_def {
        doc.add_def_id(node)
    } else {
        doc.attach(node, parent)
    };
    capture_common(doc, nid, el);
    if let Some(id) = el.attribute("id") {
        loader.by_id.insert(id.to_string(), nid);
    }
    nid
}

fn parse_node(
    doc: &mut Document,
    loader: &mut Loader,
    el: &roxmltree::Node,
    parent: NodeId,
    in_defs: bool,
) {
    if !el.is_element() {
        return;
    }
    let tag = el.tag_name().name();
    match tag {
        "defs" => {
            for child in el.children() {
                parse_node(doc, loader, &child, parent, true);
            }
        }
        // Definitions regardless of where they appear in the tree.
        "linearGradient" | "radialGradient" => {
            parse_gradient(doc, loader, el, tag == "radialGradient");
        }
        "marker" => parse_marker(doc, loader, el),
        "clipPath" => {
            let id = attach_parsed(doc, loader, el, Shape::ClipPath, parent, true);
            for child in el.children() {
                parse_node(doc, loader, &child, id, true);
            }
        }
        "g" => {
            let id = attach_parsed(doc, loader, el, Shape::Group, parent, in_defs);
            for child in el.children() {
                parse_node(doc, loader, &child, id, in_defs);
            }
        }
        "style" => {
            let css: String = el.children().filter_map(|c| c.text()).collect();
            attach_parsed(doc, loader, el, Shape::StyleSheet(css), parent, false);
        }
        "circle" => {
            let shape = Shape::Circle(Circle {
                center: Point::new(attr_f32(el, "cx", 0.0), attr_f32(el, "cy", 0.0)),
                radius: attr_f32(el, "r", 0.0),
            });
            attach_parsed(doc, loader, el, shape, parent, in_defs);
        }
        "ellipse" => {
            let shape = Shape::Ellipse(Ellipse {
                center: Point::new(attr_f32(el, "cx", 0.0), attr_f32(el, "cy", 0.0)),
                rx: attr_f32(el, "rx", 0.0),
                ry: attr_f32(el, "ry", 0.0),
            });
            attach_parsed(doc, loader, el, shape, parent, in_defs);
        }
        "rect" => {
            let shape = Shape::Rect(Rect {
                x: attr_f32(el, "x", 0.0),
                y: attr_f32(el, "y", 0.0),
                width: attr_f32(el, "width", 0.0),
                height: attr_f32(el, "height", 0.0),
                rx: attr_f32(el, "rx", 0.0),
                ry: attr_f32(el, "ry", 0.0),
            });
            attach_parsed(doc, loader, el, shape, parent, in_defs);
        }
        "line" => {
            let shape = Shape::Line(Line {
                p1: Point::new(attr_f32(el, "x1", 0.0), attr_f32(el, "y1", 0.0)),
                p2: Point::new(attr_f32(el, "x2", 0.0), attr_f32(el, "y2", 0.0)),
            });
            attach_parsed(doc, loader, el, shape, parent, in_defs);
        }
        "polyline" | "polygon" => {
            let points = parse_points(el.attribute("points").unwrap_or(""));
            let shape = if tag == "polygon" {
                Shape::Polygon(Polygon { points })
            } else {
                Shape::Polyline(Polyline { points })
            };
            attach_parsed(doc, loader, el, shape, parent, in_defs);
        }
        "path" => {
            let d = el.attribute("d").unwrap_or("").to_string();
            let geom = match PathData::parse(&d).and_then(|mut data| {
                let synthesized = data.validate()?;
                Ok((data, synthesized))
            }) {
                Ok((data, synthesized)) => {
                    if synthesized {
                        doc.warn("reader", format!("synthesized leading moveto for '{d}'"));
                    }
                    PathGeom::from_data(data)
                }
                Err(err) => {
                    doc.warn("reader", format!("path data rejected: {err}"));
                    PathGeom {
                        data: PathData::new(),
                        d,
                    }
                }
            };
            attach_parsed(doc, loader, el, Shape::Path(geom), parent, in_defs);
        }
        "text" => {
            let block = parse_text(el);
            attach_parsed(doc, loader, el, Shape::Text(block), parent, in_defs);
        }
        "image" => {
            let rect = BBox::from_xywh(
                attr_f32(el, "x", 0.0),
                attr_f32(el, "y", 0.0),
                attr_f32(el, "width", 0.0),
                attr_f32(el, "height", 0.0),
            );
            let source = href(el).unwrap_or("").to_string();
            let data = raster::load_image_data(&source, doc.base_dir.as_deref());
            if data.is_none() {
                doc.warn("reader", format!("image source '{source}' did not decode"));
            }
            let shape = Shape::Image(ImageRef {
                rect,
                href: source,
                data,
            });
            attach_parsed(doc, loader, el, shape, parent, in_defs);
        }
        "use" => parse_use(doc, loader, el, parent),
        "title" | "desc" | "metadata" => {
            let raw = RawElement {
                tag: tag.to_string(),
                attrs: plain_attrs(el),
                text: el.children().filter_map(|c| c.text()).collect(),
            };
            attach_parsed(doc, loader, el, Shape::Raw(raw), parent, in_defs);
        }
        "" => {}
        other => {
            doc.warn("reader", format!("unhandled element <{other}> kept verbatim"));
            let raw = RawElement {
                tag: other.to_string(),
                attrs: plain_attrs(el),
                text: el.children().filter_map(|c| c.text()).collect(),
            };
            attach_parsed(doc, loader, el, Shape::Raw(raw), parent, in_defs);
        }
    }
}

fn plain_attrs(el: &roxmltree::Node) -> Vec<(String, String)> {
    el.attributes()
        .map(|a| (a.name().to_string(), a.value().to_string()))
        .collect()
}

fn parse_points(value: &str) -> Vec<Point> {
    let nums = parse_number_list(value);
    nums.chunks_exact(2)
        .map(|c| Point::new(c[0], c[1]))
        .collect()
}

fn parse_text(el: &roxmltree::Node) -> TextBlock {
    let pos = Point::new(attr_f32(el, "x", 0.0), attr_f32(el, "y", 0.0));
    let mut spans = Vec::new();
    for child in el.children() {
        if let Some(text) = child.text() {
            if !text.trim().is_empty() {
                spans.push(TextSpan {
                    text: text.to_string(),
                    ..TextSpan::default()
                });
            }
        } else if child.is_element() && child.tag_name().name() == "tspan" {
            let mut declarations = Vec::new();
            for attr in child.attributes() {
                if STYLE_ATTRS.contains(&attr.name()) {
                    declarations.push((attr.name().to_string(), attr.value().to_string()));
                }
            }
            if let Some(style) = child.attribute("style") {
                declarations.extend(parse_declarations(style));
            }
            spans.push(TextSpan {
                text: child.children().filter_map(|c| c.text()).collect(),
                x: child.attribute("x").and_then(parse_number),
                y: child.attribute("y").and_then(parse_number),
                dx: attr_f32(&child, "dx", 0.0),
                dy: attr_f32(&child, "dy", 0.0),
                declarations,
            });
        }
    }
    TextBlock { pos, spans }
}

/// Gradient coordinates accept percentages, which are fractions in bounding
/// box mode.
fn grad_coord(el: &roxmltree::Node, name: &str, default: f32) -> f32 {
    let Some(raw) = el.attribute(name) else {
        return default;
    };
    let raw = raw.trim();
    if let Some(pct) = raw.strip_suffix('%') {
        return pct.trim().parse::<f32>().map(|v| v / 100.0).unwrap_or(default);
    }
    parse_number(raw).unwrap_or(default)
}

fn parse_gradient(doc: &mut Document, loader: &mut Loader, el: &roxmltree::Node, radial: bool) {
    let mut grad = if radial { Grad::radial() } else { Grad::linear() };
    if el.attribute("gradientUnits") == Some("userSpaceOnUse") {
        grad.units = GradUnits::UserSpaceOnUse;
    }
    if let Some(t) = el.attribute("gradientTransform") {
        grad.transform = parse_transform(t);
    }
    if let Some(link) = href(el) {
        if let Some(name) = link.strip_prefix('#') {
            grad.stops_source = Some(name.to_string());
        }
    }
    match grad.kind {
        GradKind::Linear => {
            grad.points = [
                Point::new(grad_coord(el, "x1", 0.0), grad_coord(el, "y1", 0.0)),
                Point::new(grad_coord(el, "x2", 1.0), grad_coord(el, "y2", 0.0)),
            ];
        }
        GradKind::Radial => {
            let cx = grad_coord(el, "cx", 0.5);
            let cy = grad_coord(el, "cy", 0.5);
            grad.points = [
                Point::new(cx, cy),
                Point::new(grad_coord(el, "fx", cx), grad_coord(el, "fy", cy)),
            ];
            grad.radius = grad_coord(el, "r", 0.5);
        }
    }
    for child in el.children() {
        if child.is_element() && child.tag_name().name() == "stop" {
            grad.stops.push(parse_stop(&child));
        }
    }
    attach_parsed(doc, loader, el, Shape::Gradient(grad), doc.root(), true);
}

fn parse_stop(el: &roxmltree::Node) -> GradientStop {
    let mut color = Color::BLACK;
    let mut opacity = 1.0f32;
    let offset = grad_coord(el, "offset", 0.0).clamp(0.0, 1.0);
    let mut apply = |key: &str, value: &str| match key {
        "stop-color" => {
            if let Some(c) = crate::style::parse_color(value) {
                color = c;
            }
        }
        "stop-opacity" => {
            if let Some(v) = parse_number(value) {
                opacity = v.clamp(0.0, 1.0);
            }
        }
        _ => {}
    };
    for attr in el.attributes() {
        apply(attr.name(), attr.value());
    }
    if let Some(style) = el.attribute("style") {
        for (key, value) in parse_declarations(style) {
            apply(&key, &value);
        }
    }
    GradientStop {
        offset,
        color,
        opacity,
    }
}

fn parse_marker(doc: &mut Document, loader: &mut Loader, el: &roxmltree::Node) {
    let orient = match el.attribute("orient") {
        Some("auto") | Some("auto-start-reverse") => MarkerOrient::Auto,
        Some(value) => parse_number(value)
            .map(MarkerOrient::Angle)
            .unwrap_or(MarkerOrient::Fixed),
        None => MarkerOrient::Fixed,
    };
    let units = match el.attribute("markerUnits") {
        Some("userSpaceOnUse") => MarkerUnits::UserSpace,
        _ => MarkerUnits::StrokeWidth,
    };
    let marker = MarkerDef {
        ref_point: Point::new(attr_f32(el, "refX", 0.0), attr_f32(el, "refY", 0.0)),
        size: Size::new(attr_f32(el, "markerWidth", 3.0), attr_f32(el, "markerHeight", 3.0)),
        orient,
        units,
        view_box: el.attribute("viewBox").and_then(parse_viewbox),
    };
    let id = attach_parsed(doc, loader, el, Shape::Marker(marker), doc.root(), true);
    for child in el.children() {
        parse_node(doc, loader, &child, id, true);
    }
}

/// `use` clones the referenced subtree in place, then overlays the use
/// site's position and styling.
fn parse_use(doc: &mut Document, loader: &mut Loader, el: &roxmltree::Node, parent: NodeId) {
    let Some(link) = href(el).and_then(|h| h.strip_prefix('#')) else {
        doc.warn("reader", "use element without a target".to_string());
        return;
    };
    let Some(&target) = loader.by_id.get(link) else {
        doc.warn("reader", format!("use references missing node '{link}'"));
        return;
    };
    let id = doc.clone_subtree(target, parent);
    doc.node_mut(id).is_def = false;

    let offset = Matrix::translate(attr_f32(el, "x", 0.0), attr_f32(el, "y", 0.0));
    let site = el
        .attribute("transform")
        .map(parse_transform)
        .unwrap_or(Matrix::identity());
    {
        let node = doc.node_mut(id);
        node.transform = site.mul(offset).mul(node.transform);
        for attr in el.attributes() {
            if STYLE_ATTRS.contains(&attr.name()) {
                node.declarations
                    .push((attr.name().to_string(), attr.value().to_string()));
            }
        }
        if let Some(style) = el.attribute("style") {
            node.declarations.extend(parse_declarations(style));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::TextAnchor;

    fn parse(svg: &str) -> Document {
        parse_svg(svg, None).expect("document should parse")
    }

    #[test]
    fn malformed_xml_is_an_error() {
        let err = parse_svg("<svg><circle r='5'</svg>", None);
        assert!(matches!(err, Err(LineworkError::Parse(_))));
    }

    #[test]
    fn non_svg_root_is_an_error() {
        let err = parse_svg("<html></html>", None);
        assert!(matches!(err, Err(LineworkError::Parse(_))));
    }

    #[test]
    fn synthesized_moveto_is_logged() {
        let dir = std::env::temp_dir().join("linework_reader_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("moveto.jsonl");
        let logger = DebugLogger::new(&path).unwrap();

        let doc = parse_svg(
            r##"<svg width="10" height="10"><path d="L 5 5 L 10 10"/></svg>"##,
            Some(logger.clone()),
        )
        .expect("document should parse");
        logger.flush();

        let kids = &doc.node(doc.root()).children;
        let Shape::Path(geom) = &doc.node(kids[0]).shape else {
            panic!("expected path");
        };
        assert!(geom.data.to_svg_string().starts_with('M'));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(
            text.contains("synthesized leading moveto"),
            "got {text}"
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn shapes_parse_with_geometry() {
        let doc = parse(
            r##"<svg width="100" height="100">
                <circle cx="10" cy="20" r="5"/>
                <rect x="1" y="2" width="3" height="4" rx="1"/>
                <line x1="0" y1="0" x2="9" y2="9"/>
                <polygon points="0,0 10,0 5,8"/>
            </svg>"##,
        );
        let root = doc.root();
        let kids = &doc.node(root).children;
        assert_eq!(kids.len(), 4);
        let Shape::Circle(c) = &doc.node(kids[0]).shape else {
            panic!("expected circle");
        };
        assert_eq!(c.center, Point::new(10.0, 20.0));
        let Shape::Polygon(p) = &doc.node(kids[3]).shape else {
            panic!("expected polygon");
        };
        assert_eq!(p.points.len(), 3);
    }

    #[test]
    fn malformed_path_keeps_empty_geometry() {
        let doc = parse(r##"<svg width="10" height="10"><path d="M 0 0 L x"/></svg>"##);
        let id = doc.node(doc.root()).children[0];
        let Shape::Path(geom) = &doc.node(id).shape else {
            panic!("expected path");
        };
        assert!(geom.data.is_empty());
        assert_eq!(geom.d, "M 0 0 L x");
    }

    #[test]
    fn viewbox_and_preserve_parse() {
        let doc = parse(
            r##"<svg viewBox="0 0 50 25" preserveAspectRatio="xMaxYMin slice"></svg>"##,
        );
        let Shape::Root(info) = &doc.node(doc.root()).shape else {
            panic!("expected root");
        };
        let vb = info.view_box.unwrap();
        assert_eq!((vb.width, vb.height), (50.0, 25.0));
        assert_eq!(info.preserve.align, FitAlign::XMaxYMin);
        assert_eq!(info.preserve.policy, FitPolicy::Slice);
        assert_eq!(doc.raster_size(), Size::new(50.0, 25.0));
    }

    #[test]
    fn gradient_lands_in_defs_with_stops() {
        let doc = parse(
            r##"<svg width="10" height="10">
                <defs>
                    <linearGradient id="fade" x1="0" y1="0" x2="100%" y2="0">
                        <stop offset="0" stop-color="#ff0000"/>
                        <stop offset="100%" stop-color="blue" stop-opacity="0.5"/>
                    </linearGradient>
                </defs>
                <rect width="10" height="10" fill="url(#fade)"/>
            </svg>"##,
        );
        let def = doc.find_def("fade").unwrap();
        let Shape::Gradient(grad) = &doc.node(def).shape else {
            panic!("expected gradient");
        };
        assert_eq!(grad.stops.len(), 2);
        assert_eq!(grad.stops[1].opacity, 0.5);
        assert_eq!(grad.points[1], Point::new(1.0, 0.0));

        // The referencing rect picked up a geometry cache at load.
        let rect = doc.node(doc.root()).children[0];
        assert!(doc.node(rect).fill_geom.is_some());
    }

    #[test]
    fn gradient_href_becomes_stops_source() {
        let doc = parse(
            r##"<svg width="10" height="10">
                <defs>
                    <linearGradient id="base">
                        <stop offset="0" stop-color="black"/>
                        <stop offset="1" stop-color="white"/>
                    </linearGradient>
                    <linearGradient id="derived" href="#base" gradientUnits="userSpaceOnUse"
                        x1="0" y1="0" x2="5" y2="5"/>
                </defs>
            </svg>"##,
        );
        let def = doc.find_def("derived").unwrap();
        let Shape::Gradient(grad) = &doc.node(def).shape else {
            panic!("expected gradient");
        };
        assert_eq!(grad.stops_source.as_deref(), Some("base"));
        assert!(grad.stops.is_empty());
        assert_eq!(gradient::effective_stops(&doc, "derived").len(), 2);
    }

    #[test]
    fn marker_parses_into_defs() {
        let doc = parse(
            r##"<svg width="10" height="10">
                <marker id="dot" refX="1" refY="1" markerWidth="2" markerHeight="2"
                        orient="auto" markerUnits="userSpaceOnUse">
                    <circle cx="1" cy="1" r="1"/>
                </marker>
            </svg>"##,
        );
        let def = doc.find_def("dot").unwrap();
        let Shape::Marker(marker) = &doc.node(def).shape else {
            panic!("expected marker");
        };
        assert_eq!(marker.orient, MarkerOrient::Auto);
        assert_eq!(marker.units, MarkerUnits::UserSpace);
        assert_eq!(doc.node(def).children.len(), 1);
    }

    #[test]
    fn text_with_tspans() {
        let doc = parse(
            r##"<svg width="100" height="100">
                <text x="10" y="20" text-anchor="middle">Hello <tspan x="10" dy="12" fill="red">world</tspan></text>
            </svg>"##,
        );
        let id = doc.node(doc.root()).children[0];
        let node = doc.node(id);
        let Shape::Text(block) = &node.shape else {
            panic!("expected text");
        };
        assert_eq!(block.pos, Point::new(10.0, 20.0));
        assert_eq!(block.spans.len(), 2);
        assert_eq!(block.spans[0].text, "Hello ");
        assert_eq!(block.spans[1].x, Some(10.0));
        assert_eq!(block.spans[1].dy, 12.0);
        assert_eq!(node.style.text_anchor, TextAnchor::Middle);
    }

    #[test]
    fn use_clones_target_with_offset() {
        let doc = parse(
            r##"<svg width="100" height="100">
                <circle id="disc" cx="5" cy="5" r="2"/>
                <use href="#disc" x="20" y="0" fill="red"/>
            </svg>"##,
        );
        let kids = &doc.node(doc.root()).children;
        assert_eq!(kids.len(), 2);
        let copy = doc.node(kids[1]);
        assert!(matches!(copy.shape, Shape::Circle(_)));
        assert_eq!(copy.transform.apply(5.0, 5.0), (25.0, 5.0));
        assert_ne!(copy.name, doc.node(kids[0]).name);
        assert_eq!(copy.style.fill, PaintRef::Color(Color::rgb(1.0, 0.0, 0.0)));
    }

    #[test]
    fn stylesheet_applies_to_shapes() {
        let doc = parse(
            r##"<svg width="100" height="100">
                <style>circle { fill: #00ff00; } #special { fill: blue; }</style>
                <circle cx="5" cy="5" r="2"/>
                <circle id="special" cx="15" cy="5" r="2"/>
            </svg>"##,
        );
        let kids = &doc.node(doc.root()).children;
        assert_eq!(
            doc.node(kids[1]).style.fill,
            PaintRef::Color(Color::rgb(0.0, 1.0, 0.0))
        );
        assert_eq!(
            doc.node(kids[2]).style.fill,
            PaintRef::Color(Color::rgb(0.0, 0.0, 1.0))
        );
    }

    #[test]
    fn data_uri_image_decodes_at_load() {
        use base64::Engine as _;
        let mut png = Vec::new();
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 0, 255, 255]));
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(&png);
        let svg = format!(
            r##"<svg width="10" height="10"><image x="0" y="0" width="4" height="4" href="data:image/png;base64,{b64}"/></svg>"##
        );
        let doc = parse(&svg);
        let id = doc.node(doc.root()).children[0];
        let Shape::Image(image) = &doc.node(id).shape else {
            panic!("expected image");
        };
        let data = image.data.as_ref().unwrap();
        assert_eq!((data.width, data.height), (2, 2));
    }
}
