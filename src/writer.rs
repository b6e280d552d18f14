use crate::document::{Document, NodeId};
use crate::gradient::{Grad, GradKind, GradUnits};
use crate::node::{MarkerOrient, MarkerUnits, Shape, TextBlock};
use crate::types::{Color, FitAlign, FitPolicy, PreserveAspectRatio};

fn fmt(v: f32) -> String {
    if v == v.trunc() && v.abs() < 1e7 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

fn color_hex(c: Color) -> String {
    let ch = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    format!("#{:02x}{:02x}{:02x}", ch(c.r), ch(c.g), ch(c.b))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn align_name(align: FitAlign) -> &'static str {
    match align {
        FitAlign::None => "none",
        FitAlign::XMinYMin => "xMinYMin",
        FitAlign::XMidYMin => "xMidYMin",
        FitAlign::XMaxYMin => "xMaxYMin",
        FitAlign::XMinYMid => "xMinYMid",
        FitAlign::XMidYMid => "xMidYMid",
        FitAlign::XMaxYMid => "xMaxYMid",
        FitAlign::XMinYMax => "xMinYMax",
        FitAlign::XMidYMax => "xMidYMax",
        FitAlign::XMaxYMax => "xMaxYMax",
    }
}

struct Writer<'a> {
    doc: &'a Document,
    out: String,
}

/// Serializes the whole document. Callers sweep Defs first so the output
/// carries no orphaned definitions.
pub(crate) fn write_document(doc: &Document) -> String {
    let mut w = Writer {
        doc,
        out: String::new(),
    };
    w.write_root();
    w.out
}

impl Writer<'_> {
    fn write_root(&mut self) {
        let root_id = self.doc.root();
        let root = self.doc.node(root_id);
        let size = self.doc.raster_size();
        self.out.push_str(&format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{}\" height=\"{}\"",
            fmt(size.width),
            fmt(size.height)
        ));
        if let Shape::Root(info) = &root.shape {
            if let Some(vb) = info.view_box {
                self.out.push_str(&format!(
                    " viewBox=\"{} {} {} {}\"",
                    fmt(vb.min_x),
                    fmt(vb.min_y),
                    fmt(vb.width),
                    fmt(vb.height)
                ));
                if info.preserve != PreserveAspectRatio::default() {
                    let mut value = align_name(info.preserve.align).to_string();
                    if info.preserve.policy == FitPolicy::Slice {
                        value.push_str(" slice");
                    }
                    self.out
                        .push_str(&format!(" preserveAspectRatio=\"{value}\""));
                }
            }
        }
        self.common_attrs(root_id);
        self.out.push_str(">\n");

        if !self.doc.defs().is_empty() {
            self.out.push_str("  <defs>\n");
            for &def in self.doc.defs() {
                self.write_node(def, 2);
            }
            self.out.push_str("  </defs>\n");
        }
        for &child in &root.children {
            self.write_node(child, 1);
        }
        self.out.push_str("</svg>\n");
    }

    fn indent(&mut self, depth: usize) {
        for _ in 0..depth {
            self.out.push_str("  ");
        }
    }

    /// id, class, transform, and the authored property inputs. Later
    /// declarations win the cascade, so duplicates keep the last value.
    fn common_attrs(&mut self, id: NodeId) {
        let node = self.doc.node(id);
        if !node.name.is_empty() {
            self.out
                .push_str(&format!(" id=\"{}\"", escape(&node.name)));
        }
        if !node.classes.is_empty() {
            self.out
                .push_str(&format!(" class=\"{}\"", escape(&node.classes.join(" "))));
        }
        if !node.transform.is_identity() {
            let m = node.transform;
            self.out.push_str(&format!(
                " transform=\"matrix({} {} {} {} {} {})\"",
                fmt(m.a),
                fmt(m.b),
                fmt(m.c),
                fmt(m.d),
                fmt(m.e),
                fmt(m.f)
            ));
        }
        let mut seen: Vec<&str> = Vec::new();
        for (key, _) in node.declarations.iter().rev() {
            if !seen.contains(&key.as_str()) {
                seen.push(key);
            }
        }
        seen.reverse();
        for key in seen {
            if let Some((_, value)) = node.declarations.iter().rev().find(|(k, _)| k == key) {
                self.out
                    .push_str(&format!(" {key}=\"{}\"", escape(value)));
            }
        }
    }

    fn write_node(&mut self, id: NodeId, depth: usize) {
        let node = self.doc.node(id);
        match &node.shape {
            Shape::Root(_) => {}
            Shape::Group | Shape::ClipPath => {
                self.open_tag(id, depth, node.shape.svg_name(), "");
                self.write_children(id, depth);
                self.close_tag(depth, node.shape.svg_name());
            }
            Shape::Circle(c) => {
                let geom = format!(
                    " cx=\"{}\" cy=\"{}\" r=\"{}\"",
                    fmt(c.center.x),
                    fmt(c.center.y),
                    fmt(c.radius)
                );
                self.leaf_tag(id, depth, "circle", &geom);
            }
            Shape::Ellipse(e) => {
                let geom = format!(
                    " cx=\"{}\" cy=\"{}\" rx=\"{}\" ry=\"{}\"",
                    fmt(e.center.x),
                    fmt(e.center.y),
                    fmt(e.rx),
                    fmt(e.ry)
                );
                self.leaf_tag(id, depth, "ellipse", &geom);
            }
            Shape::Rect(r) => {
                let mut geom = format!(
                    " x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\"",
                    fmt(r.x),
                    fmt(r.y),
                    fmt(r.width),
                    fmt(r.height)
                );
                if r.rx > 0.0 {
                    geom.push_str(&format!(" rx=\"{}\"", fmt(r.rx)));
                }
                if r.ry > 0.0 {
                    geom.push_str(&format!(" ry=\"{}\"", fmt(r.ry)));
                }
                self.leaf_tag(id, depth, "rect", &geom);
            }
            Shape::Line(l) => {
                let geom = format!(
                    " x1=\"{}\" y1=\"{}\" x2=\"{}\" y2=\"{}\"",
                    fmt(l.p1.x),
                    fmt(l.p1.y),
                    fmt(l.p2.x),
                    fmt(l.p2.y)
                );
                self.leaf_tag(id, depth, "line", &geom);
            }
            Shape::Polyline(p) => {
                let geom = format!(" points=\"{}\"", points_attr(&p.points));
                self.leaf_tag(id, depth, "polyline", &geom);
            }
            Shape::Polygon(p) => {
                let geom = format!(" points=\"{}\"", points_attr(&p.points));
                self.leaf_tag(id, depth, "polygon", &geom);
            }
            Shape::Path(geom) => {
                let d = if geom.data.is_empty() {
                    geom.d.clone()
                } else {
                    geom.data.to_svg_string()
                };
                let attr = format!(" d=\"{}\"", escape(&d));
                self.leaf_tag(id, depth, "path", &attr);
            }
            Shape::Text(block) => self.write_text(id, depth, block),
            Shape::Image(image) => {
                let geom = format!(
                    " x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" href=\"{}\"",
                    fmt(image.rect.x),
                    fmt(image.rect.y),
                    fmt(image.rect.width),
                    fmt(image.rect.height),
                    escape(&image.href)
                );
                self.leaf_tag(id, depth, "image", &geom);
            }
            Shape::Gradient(grad) => self.write_gradient(id, depth, grad),
            Shape::Marker(marker) => {
                let mut geom = format!(
                    " refX=\"{}\" refY=\"{}\" markerWidth=\"{}\" markerHeight=\"{}\"",
                    fmt(marker.ref_point.x),
                    fmt(marker.ref_point.y),
                    fmt(marker.size.width),
                    fmt(marker.size.height)
                );
                match marker.orient {
                    MarkerOrient::Auto => geom.push_str(" orient=\"auto\""),
                    MarkerOrient::Angle(a) => geom.push_str(&format!(" orient=\"{}\"", fmt(a))),
                    MarkerOrient::Fixed => {}
                }
                if marker.units == MarkerUnits::UserSpace {
                    geom.push_str(" markerUnits=\"userSpaceOnUse\"");
                }
                if let Some(vb) = marker.view_box {
                    geom.push_str(&format!(
                        " viewBox=\"{} {} {} {}\"",
                        fmt(vb.min_x),
                        fmt(vb.min_y),
                        fmt(vb.width),
                        fmt(vb.height)
                    ));
                }
                self.open_tag(id, depth, "marker", &geom);
                self.write_children(id, depth);
                self.close_tag(depth, "marker");
            }
            Shape::StyleSheet(css) => {
                self.indent(depth);
                self.out
                    .push_str(&format!("<style>{}</style>\n", escape(css)));
            }
            Shape::Raw(raw) => {
                self.indent(depth);
                self.out.push_str(&format!("<{}", raw.tag));
                for (key, value) in &raw.attrs {
                    self.out
                        .push_str(&format!(" {key}=\"{}\"", escape(value)));
                }
                if raw.text.is_empty() {
                    self.out.push_str("/>\n");
                } else {
                    self.out
                        .push_str(&format!(">{}</{}>\n", escape(&raw.text), raw.tag));
                }
            }
        }
    }

    fn write_children(&mut self, id: NodeId, depth: usize) {
        for &child in &self.doc.node(id).children {
            self.write_node(child, depth + 1);
        }
    }

    fn open_tag(&mut self, id: NodeId, depth: usize, tag: &str, geometry: &str) {
        self.indent(depth);
        self.out.push_str(&format!("<{tag}{geometry}"));
        self.common_attrs(id);
        self.out.push_str(">\n");
    }

    fn leaf_tag(&mut self, id: NodeId, depth: usize, tag: &str, geometry: &str) {
        self.indent(depth);
        self.out.push_str(&format!("<{tag}{geometry}"));
        self.common_attrs(id);
        self.out.push_str("/>\n");
    }

    fn close_tag(&mut self, depth: usize, tag: &str) {
        self.indent(depth);
        self.out.push_str(&format!("</{tag}>\n"));
    }

    fn write_gradient(&mut self, id: NodeId, depth: usize, grad: &Grad) {
        let tag = match grad.kind {
            GradKind::Linear => "linearGradient",
            GradKind::Radial => "radialGradient",
        };
        let mut geom = String::new();
        match grad.kind {
            GradKind::Linear => {
                geom.push_str(&format!(
                    " x1=\"{}\" y1=\"{}\" x2=\"{}\" y2=\"{}\"",
                    fmt(grad.points[0].x),
                    fmt(grad.points[0].y),
                    fmt(grad.points[1].x),
                    fmt(grad.points[1].y)
                ));
            }
            GradKind::Radial => {
                geom.push_str(&format!(
                    " cx=\"{}\" cy=\"{}\" r=\"{}\"",
                    fmt(grad.points[0].x),
                    fmt(grad.points[0].y),
                    fmt(grad.radius)
                ));
                if grad.points[1] != grad.points[0] {
                    geom.push_str(&format!(
                        " fx=\"{}\" fy=\"{}\"",
                        fmt(grad.points[1].x),
                        fmt(grad.points[1].y)
                    ));
                }
            }
        }
        if grad.units == GradUnits::UserSpaceOnUse {
            geom.push_str(" gradientUnits=\"userSpaceOnUse\"");
        }
        if !grad.transform.is_identity() {
            let m = grad.transform;
            geom.push_str(&format!(
                " gradientTransform=\"matrix({} {} {} {} {} {})\"",
                fmt(m.a),
                fmt(m.b),
                fmt(m.c),
                fmt(m.d),
                fmt(m.e),
                fmt(m.f)
            ));
        }
        if let Some(source) = &grad.stops_source {
            geom.push_str(&format!(" href=\"#{}\"", escape(source)));
        }

        if grad.stops.is_empty() {
            self.indent(depth);
            self.out.push_str(&format!("<{tag}{geom}"));
            self.common_attrs(id);
            self.out.push_str("/>\n");
            return;
        }
        self.open_tag(id, depth, tag, &geom);
        for stop in &grad.stops {
            self.indent(depth + 1);
            self.out.push_str(&format!(
                "<stop offset=\"{}\" stop-color=\"{}\"",
                fmt(stop.offset),
                color_hex(stop.color)
            ));
            if stop.opacity < 1.0 {
                self.out
                    .push_str(&format!(" stop-opacity=\"{}\"", fmt(stop.opacity)));
            }
            self.out.push_str("/>\n");
        }
        self.close_tag(depth, tag);
    }

    fn write_text(&mut self, id: NodeId, depth: usize, block: &TextBlock) {
        let geom = format!(" x=\"{}\" y=\"{}\"", fmt(block.pos.x), fmt(block.pos.y));
        self.indent(depth);
        self.out.push_str(&format!("<text{geom}"));
        self.common_attrs(id);
        self.out.push('>');
        for span in &block.spans {
            let plain = span.x.is_none()
                && span.y.is_none()
                && span.dx == 0.0
                && span.dy == 0.0
                && span.declarations.is_empty();
            if plain {
                self.out.push_str(&escape(&span.text));
            } else {
                self.out.push_str("<tspan");
                if let Some(x) = span.x {
                    self.out.push_str(&format!(" x=\"{}\"", fmt(x)));
                }
                if let Some(y) = span.y {
                    self.out.push_str(&format!(" y=\"{}\"", fmt(y)));
                }
                if span.dx != 0.0 {
                    self.out.push_str(&format!(" dx=\"{}\"", fmt(span.dx)));
                }
                if span.dy != 0.0 {
                    self.out.push_str(&format!(" dy=\"{}\"", fmt(span.dy)));
                }
                for (key, value) in &span.declarations {
                    self.out
                        .push_str(&format!(" {key}=\"{}\"", escape(value)));
                }
                self.out
                    .push_str(&format!(">{}</tspan>", escape(&span.text)));
            }
        }
        self.out.push_str("</text>\n");
    }
}

fn points_attr(points: &[crate::types::Point]) -> String {
    points
        .iter()
        .map(|p| format!("{},{}", fmt(p.x), fmt(p.y)))
        .collect::<Vec<_>>()
        .join(" ")
}
