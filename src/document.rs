use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use slab::Slab;

use crate::debug::DebugLogger;
use crate::error::LineworkError;
use crate::gradient;
use crate::node::{Node, RootInfo, Shape};
use crate::raster::Raster;
use crate::render;
use crate::text::FontCatalog;
use crate::transform::Matrix;
use crate::types::{Color, FitMode, Point, Size};
use crate::writer;

pub type NodeId = usize;

/// One loaded or built document: the scene tree in a slab arena, the Defs
/// list, and the view state that positions user space on the raster.
///
/// Rendering takes `&mut self`; the exclusive borrow is what keeps pass
/// outputs (resolved styles, boxes) consistent while they are written.
pub struct Document {
    nodes: Slab<Node>,
    root: NodeId,
    defs: Vec<NodeId>,
    raster_size: Size,
    translate: Point,
    scale: f32,
    dpi: f32,
    invert_y: bool,
    fit: FitMode,
    pub background: Option<Color>,
    pub(crate) debug: Option<DebugLogger>,
    pub(crate) fonts: Arc<FontCatalog>,
    /// Directory image hrefs resolve against; set when loaded from a file.
    pub(crate) base_dir: Option<PathBuf>,
    defs_index: RefCell<Option<HashMap<String, NodeId>>>,
    used_numbers: RefCell<Option<BTreeSet<u64>>>,
}

impl Document {
    pub fn new(raster_size: Size) -> Self {
        let mut nodes = Slab::new();
        let root = nodes.insert(Node::with_name(Shape::Root(RootInfo::default()), "svg1"));
        Self {
            nodes,
            root,
            defs: Vec::new(),
            raster_size,
            translate: Point::ZERO,
            scale: 1.0,
            dpi: 96.0,
            invert_y: false,
            fit: FitMode::default(),
            background: None,
            debug: None,
            fonts: Arc::new(FontCatalog::new()),
            base_dir: None,
            defs_index: RefCell::new(None),
            used_numbers: RefCell::new(None),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn try_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn warn(&self, context: &str, message: String) {
        if let Some(debug) = &self.debug {
            debug.warn(context, &message);
        }
    }

    // ---- naming ----------------------------------------------------------

    fn used_numbers(&self) -> BTreeSet<u64> {
        let mut cache = self.used_numbers.borrow_mut();
        if cache.is_none() {
            let mut set = BTreeSet::new();
            for (_, node) in self.nodes.iter() {
                if let Some(n) = trailing_number(&node.name) {
                    set.insert(n);
                }
            }
            *cache = Some(set);
        }
        cache.clone().unwrap_or_default()
    }

    /// Allocates a display name: the SVG tag plus the next unused numeric
    /// suffix. Suffixes are unique across the whole document, not per tag,
    /// so renames between tags can never collide.
    pub fn alloc_name(&self, tag: &str) -> String {
        let used = self.used_numbers();
        let next = used.last().map(|n| n + 1).unwrap_or(1);
        if let Some(cache) = self.used_numbers.borrow_mut().as_mut() {
            cache.insert(next);
        }
        format!("{tag}{next}")
    }

    fn note_name(&self, name: &str) {
        if let Some(n) = trailing_number(name) {
            if let Some(cache) = self.used_numbers.borrow_mut().as_mut() {
                cache.insert(n);
            }
        }
    }

    // ---- tree edits ------------------------------------------------------

    /// Inserts `node` as the last child of `parent`. An empty name gets a
    /// fresh one allocated from the node's tag.
    pub fn attach(&mut self, mut node: Node, parent: NodeId) -> NodeId {
        if node.name.is_empty() {
            node.name = self.alloc_name(node.shape.svg_name());
        } else {
            self.note_name(&node.name);
        }
        node.parent = Some(parent);
        node.is_def = self.nodes[parent].is_def;
        let id = self.nodes.insert(node);
        self.nodes[parent].children.push(id);
        self.invalidate_defs_index();
        id
    }

    /// Inserts a definition node and returns its name. Definitions render
    /// only when referenced.
    pub fn add_def(&mut self, node: Node) -> String {
        let id = self.add_def_id(node);
        self.nodes[id].name.clone()
    }

    pub(crate) fn add_def_id(&mut self, mut node: Node) -> NodeId {
        if node.name.is_empty() {
            node.name = self.alloc_name(node.shape.svg_name());
        } else {
            self.note_name(&node.name);
        }
        node.is_def = true;
        let id = self.nodes.insert(node);
        self.defs.push(id);
        self.invalidate_defs_index();
        id
    }

    pub fn defs(&self) -> &[NodeId] {
        &self.defs
    }

    pub fn find_def(&self, name: &str) -> Option<NodeId> {
        let mut cache = self.defs_index.borrow_mut();
        if cache.is_none() {
            let mut index = HashMap::new();
            for &id in &self.defs {
                index.insert(self.nodes[id].name.clone(), id);
            }
            *cache = Some(index);
        }
        cache.as_ref().and_then(|index| index.get(name).copied())
    }

    pub(crate) fn invalidate_defs_index(&self) {
        *self.defs_index.borrow_mut() = None;
    }

    pub(crate) fn reorder_defs(&mut self, order: Vec<NodeId>) {
        debug_assert_eq!(order.len(), self.defs.len());
        self.defs = order;
    }

    /// Pre-order ids of a subtree, the argument first.
    pub fn subtree_ids(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if self.nodes.get(id).is_none() {
                continue;
            }
            out.push(id);
            for &child in self.nodes[id].children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    fn remove_subtree(&mut self, id: NodeId) {
        for nid in self.subtree_ids(id) {
            if self.nodes.contains(nid) {
                self.nodes.remove(nid);
            }
        }
    }

    /// Deletes a node with its subtree, then sweeps Defs for definitions the
    /// deletion orphaned.
    pub fn delete_node(&mut self, id: NodeId) {
        if id == self.root {
            return;
        }
        if let Some(parent) = self.nodes[id].parent {
            self.nodes[parent].children.retain(|&c| c != id);
        }
        self.defs.retain(|&d| d != id);
        self.remove_subtree(id);
        self.invalidate_defs_index();
        gradient::sweep_orphans(self);
    }

    /// Removes a definition without triggering another sweep. Used by the
    /// sweep itself.
    pub(crate) fn delete_def(&mut self, id: NodeId) {
        self.defs.retain(|&d| d != id);
        self.remove_subtree(id);
        self.invalidate_defs_index();
    }

    /// Deep-copies a subtree under `parent` with fresh names.
    pub fn clone_subtree(&mut self, src: NodeId, parent: NodeId) -> NodeId {
        let mut node = self.nodes[src].clone();
        let children = std::mem::take(&mut node.children);
        node.name = self.alloc_name(node.shape.svg_name());
        let id = self.attach(node, parent);
        for child in children {
            self.clone_subtree(child, id);
        }
        id
    }

    // ---- transforms ------------------------------------------------------

    /// Composed transform from the root down to `id`.
    pub fn parent_transform(&self, id: NodeId, include_self: bool) -> Matrix {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(nid) = cursor {
            chain.push(nid);
            cursor = self.nodes[nid].parent;
        }
        let mut m = Matrix::identity();
        for nid in chain.iter().rev() {
            if *nid == id && !include_self {
                break;
            }
            m = m.mul(self.nodes[*nid].transform);
        }
        m
    }

    /// Applies `xf` to a node. Rotation-free transforms on a node with an
    /// identity local transform are baked straight into the geometry fields;
    /// everything else accumulates on the node's transform. Gradient caches
    /// follow either way.
    pub fn apply_transform(&mut self, id: NodeId, xf: &Matrix) {
        let baked = if !xf.has_rotation() && self.nodes[id].transform.is_identity() {
            self.nodes[id].shape.bake_transform(xf)
        } else {
            false
        };
        if !baked {
            let node = &mut self.nodes[id];
            node.transform = xf.mul(node.transform);
        }
        gradient::transform_geom(self, id, xf);
    }

    /// Builds a transform from edit deltas given in document-root
    /// coordinates and applies it. The ancestor-chain transform is inverted
    /// first so the translation and pivot land in the node's local space.
    /// `pivot` defaults to the center of the shape's local extent; rotation
    /// is in degrees.
    pub fn apply_delta_transform(
        &mut self,
        id: NodeId,
        translate: Point,
        rotate_deg: f32,
        scale: (f32, f32),
        pivot: Option<Point>,
    ) {
        // A degenerate ancestor (zero scale) has no inverse; the deltas are
        // taken as already local in that case.
        let inv = self
            .parent_transform(id, false)
            .invert()
            .unwrap_or_else(Matrix::identity);
        let (tx, ty) = inv.apply_vector(translate.x, translate.y);
        let pivot = pivot.map(|p| inv.apply_point(p)).or_else(|| {
            let node = &self.nodes[id];
            node.shape.local_bbox(&node.style).map(|b| b.center())
        });
        let p = pivot.unwrap_or(Point::ZERO);
        let m = Matrix::translate(tx, ty)
            .mul(Matrix::translate(p.x, p.y))
            .mul(Matrix::rotate_deg(rotate_deg))
            .mul(Matrix::scale(scale.0, scale.1))
            .mul(Matrix::translate(-p.x, -p.y));
        self.apply_transform(id, &m);
    }

    // ---- view state ------------------------------------------------------

    pub fn raster_size(&self) -> Size {
        self.raster_size
    }

    pub fn resize_raster(&mut self, size: Size) {
        self.raster_size = Size::new(size.width.max(1.0), size.height.max(1.0));
    }

    pub fn set_pan(&mut self, translate: Point) {
        self.translate = translate;
    }

    pub fn pan(&self) -> Point {
        self.translate
    }

    pub fn set_zoom(&mut self, scale: f32) {
        self.scale = if scale > 0.0 { scale } else { 1.0 };
    }

    pub fn zoom(&self) -> f32 {
        self.scale
    }

    pub fn set_invert_y(&mut self, invert: bool) {
        self.invert_y = invert;
    }

    pub fn invert_y(&self) -> bool {
        self.invert_y
    }

    pub fn set_fit(&mut self, fit: FitMode) {
        self.fit = fit;
    }

    pub fn fit(&self) -> FitMode {
        self.fit
    }

    pub fn set_dpi(&mut self, dpi: f32) {
        if dpi > 0.0 {
            self.dpi = dpi;
        }
    }

    pub fn dpi(&self) -> f32 {
        self.dpi
    }

    /// Document-level transform: dpi compensation, then the view-box fit,
    /// then pan/zoom, then the optional y flip, innermost first.
    pub fn document_transform(&self) -> Matrix {
        let dpi_scale = self.dpi / 96.0;
        let mut m = Matrix::scale(dpi_scale, dpi_scale);

        if self.fit == FitMode::ViewBox {
            if let Shape::Root(info) = &self.nodes[self.root].shape {
                if let Some(vb) = info.view_box {
                    let target = Size::new(
                        self.raster_size.width / dpi_scale,
                        self.raster_size.height / dpi_scale,
                    );
                    m = m.mul(render::fit_viewbox(&vb, target, info.preserve));
                }
            }
        }

        m = m
            .mul(Matrix::translate(self.translate.x, self.translate.y))
            .mul(Matrix::scale(self.scale, self.scale));

        if self.invert_y {
            let height = self.user_height();
            m = m.mul(Matrix::translate(0.0, height).mul(Matrix::scale(1.0, -1.0)));
        }
        m
    }

    /// Height of user space for the y flip: the root view box when present,
    /// otherwise the raster height at natural scale.
    fn user_height(&self) -> f32 {
        if let Shape::Root(info) = &self.nodes[self.root].shape {
            if let Some(vb) = info.view_box {
                return vb.height;
            }
        }
        self.raster_size.height / (self.dpi / 96.0)
    }

    // ---- pipeline entry points -------------------------------------------

    /// Runs the three passes and rasterizes. Exclusive access for the whole
    /// call; pass outputs land on the nodes.
    pub fn render_to_raster(&mut self) -> Result<Raster, LineworkError> {
        render::render_document(self)
    }

    /// Runs the passes against a caller-supplied painter (used with the
    /// command recorder).
    pub fn render_with(&mut self, painter: &mut dyn crate::painter::Painter) {
        render::run_passes(self);
        render::paint_document(self, painter);
    }

    // ---- serialization ---------------------------------------------------

    pub fn to_svg_string(&mut self) -> String {
        gradient::sweep_orphans(self);
        writer::write_document(self)
    }

    pub fn save_writer<W: Write>(&mut self, writer: &mut W) -> Result<(), LineworkError> {
        let text = self.to_svg_string();
        writer.write_all(text.as_bytes())?;
        Ok(())
    }

    pub fn save_file(&mut self, path: &Path) -> Result<(), LineworkError> {
        let text = self.to_svg_string();
        std::fs::write(path, text)?;
        Ok(())
    }
}

fn trailing_number(name: &str) -> Option<u64> {
    let digits: String = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.chars().rev().collect::<String>().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Circle, Rect};
    use crate::style::PaintRef;

    fn circle(center: Point, radius: f32) -> Node {
        Node::new(Shape::Circle(Circle { center, radius }))
    }

    #[test]
    fn names_are_unique_across_tags() {
        let mut doc = Document::new(Size::new(100.0, 100.0));
        let a = doc.attach(circle(Point::ZERO, 1.0), doc.root());
        let b = doc.attach(
            Node::new(Shape::Rect(Rect {
                x: 0.0,
                y: 0.0,
                width: 1.0,
                height: 1.0,
                rx: 0.0,
                ry: 0.0,
            })),
            doc.root(),
        );
        let na = trailing_number(&doc.node(a).name).unwrap();
        let nb = trailing_number(&doc.node(b).name).unwrap();
        assert_ne!(na, nb);
        assert!(doc.node(a).name.starts_with("circle"));
        assert!(doc.node(b).name.starts_with("rect"));
    }

    #[test]
    fn alloc_skips_numbers_taken_by_loaded_names() {
        let mut doc = Document::new(Size::new(10.0, 10.0));
        let mut named = circle(Point::ZERO, 1.0);
        named.name = "circle7".into();
        doc.attach(named, doc.root());
        let fresh = doc.attach(circle(Point::ZERO, 1.0), doc.root());
        assert!(trailing_number(&doc.node(fresh).name).unwrap() > 7);
    }

    #[test]
    fn delete_node_removes_subtree() {
        let mut doc = Document::new(Size::new(10.0, 10.0));
        let group = doc.attach(Node::new(Shape::Group), doc.root());
        let child = doc.attach(circle(Point::ZERO, 1.0), group);
        doc.delete_node(group);
        assert!(doc.try_node(group).is_none());
        assert!(doc.try_node(child).is_none());
        assert!(doc.node(doc.root()).children.is_empty());
    }

    #[test]
    fn delete_node_sweeps_orphaned_gradient() {
        let mut doc = Document::new(Size::new(10.0, 10.0));
        let grad = crate::gradient::Grad::linear();
        let name = doc.add_def(Node::new(Shape::Gradient(grad)));
        let shape = doc.attach(circle(Point::new(5.0, 5.0), 2.0), doc.root());
        doc.node_mut(shape).style.fill = PaintRef::Ref(name.clone());
        assert!(doc.find_def(&name).is_some());

        doc.delete_node(shape);
        assert!(doc.find_def(&name).is_none());
    }

    #[test]
    fn parent_transform_composes_down_the_chain() {
        let mut doc = Document::new(Size::new(10.0, 10.0));
        let group = doc.attach(Node::new(Shape::Group), doc.root());
        doc.node_mut(group).transform = Matrix::translate(10.0, 0.0);
        let child = doc.attach(circle(Point::ZERO, 1.0), group);
        doc.node_mut(child).transform = Matrix::scale(2.0, 2.0);

        let excl = doc.parent_transform(child, false);
        assert_eq!(excl.apply(1.0, 0.0), (11.0, 0.0));
        let incl = doc.parent_transform(child, true);
        assert_eq!(incl.apply(1.0, 0.0), (12.0, 0.0));
    }

    #[test]
    fn apply_transform_bakes_when_rotation_free() {
        let mut doc = Document::new(Size::new(10.0, 10.0));
        let id = doc.attach(circle(Point::new(1.0, 1.0), 1.0), doc.root());
        doc.apply_transform(id, &Matrix::translate(4.0, 0.0));
        let node = doc.node(id);
        assert!(node.transform.is_identity());
        let Shape::Circle(c) = &node.shape else {
            unreachable!()
        };
        assert_eq!(c.center, Point::new(5.0, 1.0));
    }

    #[test]
    fn apply_transform_accumulates_rotation() {
        let mut doc = Document::new(Size::new(10.0, 10.0));
        let id = doc.attach(circle(Point::new(1.0, 1.0), 1.0), doc.root());
        doc.apply_transform(id, &Matrix::rotate_deg(30.0));
        let node = doc.node(id);
        assert!(node.transform.has_rotation());
        let Shape::Circle(c) = &node.shape else {
            unreachable!()
        };
        assert_eq!(c.center, Point::new(1.0, 1.0));
    }

    #[test]
    fn delta_translate_maps_through_scaled_ancestor() {
        let mut doc = Document::new(Size::new(100.0, 100.0));
        let group = doc.attach(Node::new(Shape::Group), doc.root());
        doc.node_mut(group).transform = Matrix::scale(2.0, 2.0);
        let id = doc.attach(circle(Point::new(1.0, 1.0), 1.0), group);

        doc.apply_delta_transform(id, Point::new(10.0, 0.0), 0.0, (1.0, 1.0), None);

        let Shape::Circle(c) = &doc.node(id).shape else {
            unreachable!()
        };
        // A root-space move of 10 is a local move of 5 under scale(2).
        assert_eq!(c.center, Point::new(6.0, 1.0));
        let root_center = doc.parent_transform(id, true).apply_point(c.center);
        assert_eq!(root_center, Point::new(12.0, 2.0));
    }

    #[test]
    fn clone_subtree_gets_fresh_names() {
        let mut doc = Document::new(Size::new(10.0, 10.0));
        let group = doc.attach(Node::new(Shape::Group), doc.root());
        doc.attach(circle(Point::ZERO, 1.0), group);
        let copy = doc.clone_subtree(group, doc.root());
        assert_ne!(doc.node(copy).name, doc.node(group).name);
        assert_eq!(doc.node(copy).children.len(), 1);
        let orig_child = doc.node(group).children[0];
        let copy_child = doc.node(copy).children[0];
        assert_ne!(doc.node(copy_child).name, doc.node(orig_child).name);
    }

    #[test]
    fn zoom_rejects_non_positive() {
        let mut doc = Document::new(Size::new(10.0, 10.0));
        doc.set_zoom(0.0);
        assert_eq!(doc.zoom(), 1.0);
        doc.set_zoom(2.5);
        assert_eq!(doc.zoom(), 2.5);
    }
}
