use std::collections::HashMap;

use crate::document::{Document, NodeId};
use crate::node::Shape;
use crate::style::{PaintRef, parse_url_ref};
use crate::transform::Matrix;
use crate::types::{BBox, GradientStop, Point, Shading};

/// Gradient coordinate modes: fractions of the referencing shape's bounding
/// box, or absolute document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradUnits {
    #[default]
    ObjectBoundingBox,
    UserSpaceOnUse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradKind {
    #[default]
    Linear,
    Radial,
}

/// A gradient definition as stored in Defs. `points` is `[start, end]` for
/// linear gradients and `[center, focal]` for radial ones; in bounding-box
/// mode the coordinates are fractions of the shape's box.
#[derive(Debug, Clone, PartialEq)]
pub struct Grad {
    pub kind: GradKind,
    pub units: GradUnits,
    pub points: [Point; 2],
    pub radius: f32,
    pub stops: Vec<GradientStop>,
    /// Name of another gradient supplying the color stops (`href`). Only
    /// stops travel through this link, never geometry.
    pub stops_source: Option<String>,
    pub transform: Matrix,
}

impl Grad {
    pub fn linear() -> Self {
        Self {
            kind: GradKind::Linear,
            units: GradUnits::ObjectBoundingBox,
            points: [Point::new(0.0, 0.0), Point::new(1.0, 0.0)],
            radius: 0.0,
            stops: Vec::new(),
            stops_source: None,
            transform: Matrix::identity(),
        }
    }

    pub fn radial() -> Self {
        Self {
            kind: GradKind::Radial,
            units: GradUnits::ObjectBoundingBox,
            points: [Point::new(0.5, 0.5), Point::new(0.5, 0.5)],
            radius: 0.5,
            stops: Vec::new(),
            stops_source: None,
            transform: Matrix::identity(),
        }
    }
}

/// Per-shape gradient geometry cache: absolute control points plus the local
/// transform that was in effect when they were computed. Kept per paint slot
/// so fill and stroke gradients edit independently.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientGeom {
    pub points: [Point; 2],
    pub radius: f32,
    pub base_transform: Matrix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Fill,
    Stroke,
}

fn slot_ref_name(doc: &Document, node: NodeId, slot: Slot) -> Option<String> {
    let style = &doc.node(node).style;
    let paint = match slot {
        Slot::Fill => &style.fill,
        Slot::Stroke => &style.stroke,
    };
    paint.ref_name().map(str::to_string)
}

fn grad_def<'a>(doc: &'a Document, name: &str) -> Option<(NodeId, &'a Grad)> {
    let id = doc.find_def(name)?;
    match &doc.node(id).shape {
        Shape::Gradient(grad) => Some((id, grad)),
        _ => None,
    }
}

/// Default absolute geometry derived from a shape's local bounding box:
/// left-to-right midline for linear, centered with a half-diagonal radius
/// for radial.
pub fn default_geom(kind: GradKind, bbox: &BBox, base_transform: Matrix) -> GradientGeom {
    match kind {
        GradKind::Linear => GradientGeom {
            points: [
                Point::new(bbox.x, bbox.y + bbox.height / 2.0),
                Point::new(bbox.max_x(), bbox.y + bbox.height / 2.0),
            ],
            radius: 0.0,
            base_transform,
        },
        GradKind::Radial => {
            let c = bbox.center();
            GradientGeom {
                points: [c, c],
                radius: bbox.width.max(bbox.height) / 2.0,
                base_transform,
            }
        }
    }
}

/// Seeds an empty cache slot: copy the opposite slot's geometry when present,
/// otherwise derive defaults from the shape's local bounding box.
pub fn gradient_geom_default(doc: &mut Document, node: NodeId, slot: Slot) {
    {
        let n = doc.node(node);
        let cache = match slot {
            Slot::Fill => &n.fill_geom,
            Slot::Stroke => &n.stroke_geom,
        };
        if cache.is_some() {
            return;
        }
    }

    let opposite = {
        let n = doc.node(node);
        match slot {
            Slot::Fill => n.stroke_geom.clone(),
            Slot::Stroke => n.fill_geom.clone(),
        }
    };

    let geom = match opposite {
        Some(geom) => geom,
        None => {
            let kind = slot_ref_name(doc, node, slot)
                .and_then(|name| grad_def(doc, &name).map(|(_, g)| g.kind))
                .unwrap_or_default();
            let n = doc.node(node);
            let bbox = n
                .shape
                .local_bbox(&n.style)
                .unwrap_or(BBox::from_xywh(0.0, 0.0, 1.0, 1.0));
            default_geom(kind, &bbox, n.transform)
        }
    };

    let n = doc.node_mut(node);
    match slot {
        Slot::Fill => n.fill_geom = Some(geom),
        Slot::Stroke => n.stroke_geom = Some(geom),
    }
}

/// Pulls a shape's caches from its referenced gradient definitions. Run once
/// per shape after load: on disk only the definitions carry true state.
pub fn to_geom(doc: &mut Document, node: NodeId) {
    for slot in [Slot::Fill, Slot::Stroke] {
        let Some(name) = slot_ref_name(doc, node, slot) else {
            continue;
        };
        let Some((_, grad)) = grad_def(doc, &name) else {
            continue;
        };
        let geom = match grad.units {
            GradUnits::UserSpaceOnUse => {
                let base = doc.node(node).transform;
                GradientGeom {
                    points: [
                        grad.transform.apply_point(grad.points[0]),
                        grad.transform.apply_point(grad.points[1]),
                    ],
                    radius: grad.radius * grad.transform.scale_factor(),
                    base_transform: base,
                }
            }
            GradUnits::ObjectBoundingBox => {
                let kind = grad.kind;
                let n = doc.node(node);
                let Some(bbox) = n.shape.local_bbox(&n.style) else {
                    continue;
                };
                let fractions = [grad.points[0], grad.points[1]];
                let radius_frac = grad.radius;
                let mut geom = default_geom(kind, &bbox, n.transform);
                geom.points = [
                    Point::new(
                        bbox.x + bbox.width * fractions[0].x,
                        bbox.y + bbox.height * fractions[0].y,
                    ),
                    Point::new(
                        bbox.x + bbox.width * fractions[1].x,
                        bbox.y + bbox.height * fractions[1].y,
                    ),
                ];
                geom.radius = bbox.width.max(bbox.height) * radius_frac;
                geom
            }
        };
        let n = doc.node_mut(node);
        match slot {
            Slot::Fill => n.fill_geom = Some(geom),
            Slot::Stroke => n.stroke_geom = Some(geom),
        }
    }
}

/// Pushes a shape's cached geometry into its referenced definition. Only
/// user-space definitions store absolute points; bounding-box definitions
/// stay untouched (their geometry is implied by the shape).
pub fn from_geom(doc: &mut Document, node: NodeId, slot: Slot) {
    let Some(name) = slot_ref_name(doc, node, slot) else {
        return;
    };
    let geom = {
        let n = doc.node(node);
        let cache = match slot {
            Slot::Fill => &n.fill_geom,
            Slot::Stroke => &n.stroke_geom,
        };
        match cache {
            Some(geom) => geom.clone(),
            None => return,
        }
    };
    let Some((def_id, grad)) = grad_def(doc, &name) else {
        return;
    };
    if grad.units != GradUnits::UserSpaceOnUse {
        return;
    }
    if let Shape::Gradient(grad) = &mut doc.node_mut(def_id).shape {
        grad.points = geom.points;
        grad.radius = geom.radius;
        grad.transform = Matrix::identity();
    }
}

/// Applies the relative transform of a geometric edit to both cache slots
/// and propagates the result into user-space definitions.
pub fn transform_geom(doc: &mut Document, node: NodeId, relative: &Matrix) {
    let new_base = doc.node(node).transform;
    for slot in [Slot::Fill, Slot::Stroke] {
        {
            let n = doc.node_mut(node);
            let cache = match slot {
                Slot::Fill => &mut n.fill_geom,
                Slot::Stroke => &mut n.stroke_geom,
            };
            let Some(geom) = cache.as_mut() else { continue };
            geom.points = [
                relative.apply_point(geom.points[0]),
                relative.apply_point(geom.points[1]),
            ];
            geom.radius *= relative.scale_factor();
            geom.base_transform = new_base;
        }
        from_geom(doc, node, slot);
    }
}

/// Copies the stop list from a gradient's stops source. Geometry never
/// travels through the link.
pub fn sync_stops(doc: &mut Document, name: &str) {
    let Some((def_id, grad)) = grad_def(doc, name) else {
        return;
    };
    let Some(source_name) = grad.stops_source.clone() else {
        return;
    };
    let Some((_, source)) = grad_def(doc, &source_name) else {
        return;
    };
    let stops = source.stops.clone();
    if let Shape::Gradient(grad) = &mut doc.node_mut(def_id).shape {
        grad.stops = stops;
    }
}

/// Effective stops of a definition: its own when non-empty, otherwise the
/// stops-source chain (bounded, cycles tolerated).
pub fn effective_stops(doc: &Document, name: &str) -> Vec<GradientStop> {
    let mut current = name.to_string();
    for _ in 0..8 {
        let Some((_, grad)) = grad_def(doc, &current) else {
            return Vec::new();
        };
        if !grad.stops.is_empty() {
            return grad.stops.clone();
        }
        match &grad.stops_source {
            Some(next) => current = next.clone(),
            None => return Vec::new(),
        }
    }
    Vec::new()
}

/// Resolves a gradient reference into concrete painter geometry. `geom` is
/// the shape's cache (preferred when present); `bbox` is the shape's local
/// box for bounding-box-relative definitions without a cache.
pub fn resolve_shading(
    doc: &Document,
    name: &str,
    geom: Option<&GradientGeom>,
    bbox: Option<&BBox>,
) -> Option<Shading> {
    let (_, grad) = grad_def(doc, name)?;
    let stops = effective_stops(doc, name);
    if stops.is_empty() {
        return None;
    }

    let (points, radius) = if let Some(geom) = geom {
        (geom.points, geom.radius)
    } else {
        match grad.units {
            GradUnits::UserSpaceOnUse => (
                [
                    grad.transform.apply_point(grad.points[0]),
                    grad.transform.apply_point(grad.points[1]),
                ],
                grad.radius * grad.transform.scale_factor(),
            ),
            GradUnits::ObjectBoundingBox => {
                let b = bbox?;
                (
                    [
                        Point::new(b.x + b.width * grad.points[0].x, b.y + b.height * grad.points[0].y),
                        Point::new(b.x + b.width * grad.points[1].x, b.y + b.height * grad.points[1].y),
                    ],
                    b.width.max(b.height) * grad.radius,
                )
            }
        }
    };

    Some(match grad.kind {
        GradKind::Linear => Shading::Axial {
            start: points[0],
            end: points[1],
            stops,
        },
        GradKind::Radial => Shading::Radial {
            center: points[0],
            focal: points[1],
            radius: radius.max(0.0),
            stops,
        },
    })
}

/// One whole-tree walk counting references into Defs, then deletes
/// unreferenced gradient definitions that carry no stops of their own, and
/// moves referenced stop-source gradients to the front of Defs so readers
/// resolving top-down find them already defined.
pub fn sweep_orphans(doc: &mut Document) -> usize {
    let mut counts: HashMap<String, usize> = HashMap::new();

    let mut ids = doc.subtree_ids(doc.root());
    for def in doc.defs().to_vec() {
        ids.extend(doc.subtree_ids(def));
    }

    let mut stop_sources: Vec<String> = Vec::new();
    for id in ids {
        let node = doc.node(id);
        for paint in [&node.style.fill, &node.style.stroke] {
            if let PaintRef::Ref(name) = paint {
                *counts.entry(name.clone()).or_insert(0) += 1;
            }
        }
        for name in [
            &node.style.marker_start,
            &node.style.marker_mid,
            &node.style.marker_end,
            &node.style.clip_path,
        ]
        .into_iter()
        .flatten()
        {
            *counts.entry(name.clone()).or_insert(0) += 1;
        }
        // Literal attribute values cover references the style pass has not
        // resolved yet (or resolved away).
        for (_, value) in &node.declarations {
            if let Some(name) = parse_url_ref(value) {
                *counts.entry(name).or_insert(0) += 1;
            }
        }
        if let Shape::Gradient(grad) = &node.shape {
            if let Some(source) = &grad.stops_source {
                *counts.entry(source.clone()).or_insert(0) += 1;
                stop_sources.push(source.clone());
            }
        }
    }

    let mut removed = 0usize;
    let dead: Vec<NodeId> = doc
        .defs()
        .iter()
        .copied()
        .filter(|&id| {
            let node = doc.node(id);
            match &node.shape {
                // A definition with its own stops is palette data worth
                // keeping even when nothing references it right now.
                Shape::Gradient(grad) => {
                    grad.stops.is_empty() && counts.get(&node.name).copied().unwrap_or(0) == 0
                }
                _ => false,
            }
        })
        .collect();
    for id in dead {
        doc.delete_def(id);
        removed += 1;
    }

    // Stable partition: referenced stop sources first, in their current
    // relative order.
    let order: Vec<NodeId> = {
        let is_source =
            |doc: &Document, id: NodeId| stop_sources.iter().any(|s| *s == doc.node(id).name);
        let mut front: Vec<NodeId> = Vec::new();
        let mut back: Vec<NodeId> = Vec::new();
        for &id in doc.defs() {
            if is_source(doc, id) {
                front.push(id);
            } else {
                back.push(id);
            }
        }
        front.extend(back);
        front
    };
    doc.reorder_defs(order);

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::node::{Circle, Node, Shape};
    use crate::types::{Color, Size};

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    fn stop(offset: f32) -> GradientStop {
        GradientStop {
            offset,
            color: Color::BLACK,
            opacity: 1.0,
        }
    }

    fn doc_with_gradient(units: GradUnits) -> (Document, NodeId, String) {
        let mut doc = Document::new(Size::new(100.0, 100.0));
        let mut grad = Grad::linear();
        grad.units = units;
        if units == GradUnits::UserSpaceOnUse {
            grad.points = [Point::new(10.0, 10.0), Point::new(40.0, 10.0)];
        }
        grad.stops = vec![stop(0.0), stop(1.0)];
        let name = doc.add_def(Node::new(Shape::Gradient(grad)));

        let circle = doc.attach(
            Node::new(Shape::Circle(Circle {
                center: Point::new(25.0, 25.0),
                radius: 15.0,
            })),
            doc.root(),
        );
        doc.node_mut(circle).style.fill = PaintRef::Ref(name.clone());
        (doc, circle, name)
    }

    #[test]
    fn to_geom_pulls_user_space_points() {
        let (mut doc, circle, _) = doc_with_gradient(GradUnits::UserSpaceOnUse);
        to_geom(&mut doc, circle);
        let geom = doc.node(circle).fill_geom.clone().unwrap();
        assert_eq!(geom.points[0], Point::new(10.0, 10.0));
        assert_eq!(geom.points[1], Point::new(40.0, 10.0));
    }

    #[test]
    fn to_geom_derives_bbox_mode_from_shape() {
        let (mut doc, circle, _) = doc_with_gradient(GradUnits::ObjectBoundingBox);
        to_geom(&mut doc, circle);
        let geom = doc.node(circle).fill_geom.clone().unwrap();
        // Circle local box is (10,10)-(40,40); linear default runs 0..1 in x.
        assert!(close(geom.points[0].x, 10.0));
        assert!(close(geom.points[1].x, 40.0));
    }

    #[test]
    fn transform_geom_pushes_into_user_space_definition() {
        let (mut doc, circle, name) = doc_with_gradient(GradUnits::UserSpaceOnUse);
        to_geom(&mut doc, circle);
        let xf = Matrix::translate(5.0, 0.0).mul(Matrix::scale(2.0, 2.0));
        transform_geom(&mut doc, circle, &xf);

        let def = doc.find_def(&name).unwrap();
        let Shape::Gradient(grad) = &doc.node(def).shape else {
            panic!("not a gradient");
        };
        assert_eq!(grad.points[0], Point::new(25.0, 20.0));
        assert_eq!(grad.points[1], Point::new(85.0, 20.0));
    }

    #[test]
    fn geom_default_copies_opposite_slot() {
        let (mut doc, circle, _) = doc_with_gradient(GradUnits::UserSpaceOnUse);
        to_geom(&mut doc, circle);
        let fill = doc.node(circle).fill_geom.clone().unwrap();
        doc.node_mut(circle).style.stroke = doc.node(circle).style.fill.clone();
        gradient_geom_default(&mut doc, circle, Slot::Stroke);
        assert_eq!(doc.node(circle).stroke_geom.clone().unwrap(), fill);
    }

    #[test]
    fn stops_follow_source_not_geometry() {
        let mut doc = Document::new(Size::new(100.0, 100.0));
        let mut source = Grad::linear();
        source.stops = vec![stop(0.0), stop(0.5), stop(1.0)];
        source.points = [Point::new(0.0, 0.0), Point::new(9.0, 9.0)];
        let source_name = doc.add_def(Node::new(Shape::Gradient(source)));

        let mut user = Grad::linear();
        user.units = GradUnits::UserSpaceOnUse;
        user.points = [Point::new(1.0, 2.0), Point::new(3.0, 4.0)];
        user.stops_source = Some(source_name);
        let user_name = doc.add_def(Node::new(Shape::Gradient(user)));

        sync_stops(&mut doc, &user_name);
        let def = doc.find_def(&user_name).unwrap();
        let Shape::Gradient(grad) = &doc.node(def).shape else {
            panic!("not a gradient");
        };
        assert_eq!(grad.stops.len(), 3);
        assert_eq!(grad.points[0], Point::new(1.0, 2.0));
    }

    #[test]
    fn sweep_removes_unreferenced_stopless_gradient() {
        let (mut doc, _, name) = doc_with_gradient(GradUnits::UserSpaceOnUse);
        let orphan = Grad::linear();
        let orphan_name = doc.add_def(Node::new(Shape::Gradient(orphan)));

        let removed = sweep_orphans(&mut doc);
        assert_eq!(removed, 1);
        assert!(doc.find_def(&name).is_some());
        assert!(doc.find_def(&orphan_name).is_none());
    }

    #[test]
    fn sweep_keeps_unreferenced_gradient_with_own_stops() {
        let (mut doc, _, name) = doc_with_gradient(GradUnits::UserSpaceOnUse);
        let mut palette = Grad::linear();
        palette.stops = vec![stop(0.0), stop(1.0)];
        let palette_name = doc.add_def(Node::new(Shape::Gradient(palette)));

        let removed = sweep_orphans(&mut doc);
        assert_eq!(removed, 0);
        assert!(doc.find_def(&name).is_some());
        assert!(doc.find_def(&palette_name).is_some());
    }

    #[test]
    fn sweep_keeps_and_fronts_stop_sources() {
        let (mut doc, circle, name) = doc_with_gradient(GradUnits::UserSpaceOnUse);
        // A stops-only gradient referenced through the shape's gradient.
        let mut stops_grad = Grad::linear();
        stops_grad.stops = vec![stop(0.0), stop(1.0)];
        let stops_name = doc.add_def(Node::new(Shape::Gradient(stops_grad)));
        {
            let def = doc.find_def(&name).unwrap();
            if let Shape::Gradient(grad) = &mut doc.node_mut(def).shape {
                grad.stops.clear();
                grad.stops_source = Some(stops_name.clone());
            }
        }
        let _ = circle;

        let removed = sweep_orphans(&mut doc);
        assert_eq!(removed, 0);
        let first = doc.defs()[0];
        assert_eq!(doc.node(first).name, stops_name);
    }

    #[test]
    fn resolve_shading_maps_bbox_fractions() {
        let (doc, circle, name) = doc_with_gradient(GradUnits::ObjectBoundingBox);
        let bbox = {
            let n = doc.node(circle);
            n.shape.local_bbox(&n.style).unwrap()
        };
        let shading = resolve_shading(&doc, &name, None, Some(&bbox)).unwrap();
        let Shading::Axial { start, end, stops } = shading else {
            panic!("expected axial");
        };
        assert!(close(start.x, 10.0) && close(end.x, 40.0));
        assert_eq!(stops.len(), 2);
    }
}
