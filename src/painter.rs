use crate::path::ArcSegment;
use crate::transform::Matrix;
use crate::types::{BBox, ImageData, PaintSource, Point};

pub const CAP_BUTT: u8 = 0;
pub const CAP_ROUND: u8 = 1;
pub const CAP_SQUARE: u8 = 2;

pub const JOIN_MITER: u8 = 0;
pub const JOIN_ROUND: u8 = 1;
pub const JOIN_BEVEL: u8 = 2;

/// Pen state for stroking, set as one unit before a stroke operation.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeProps {
    pub width: f32,
    pub cap: u8,
    pub join: u8,
    pub miter_limit: f32,
    pub dash: Vec<f32>,
    pub dash_offset: f32,
}

impl Default for StrokeProps {
    fn default() -> Self {
        Self {
            width: 1.0,
            cap: CAP_BUTT,
            join: JOIN_MITER,
            miter_limit: 4.0,
            dash: Vec::new(),
            dash_offset: 0.0,
        }
    }
}

/// Drawing backend. The render pass builds a path with the `*_to` calls and
/// then consumes it with exactly one of `fill_path`, `stroke_path`,
/// `fill_stroke_path`, or `clip_current_path`; graphics state (transform,
/// paints, clip) nests with `save`/`restore`.
pub trait Painter {
    fn save(&mut self);
    fn restore(&mut self);

    /// Post-multiplies the current transform: the matrix applies in the
    /// coordinate space established so far.
    fn concat(&mut self, m: &Matrix);

    fn set_fill(&mut self, paint: &PaintSource);
    fn set_stroke(&mut self, paint: &PaintSource);
    fn set_stroke_props(&mut self, props: &StrokeProps);

    /// Per-slot paint opacity, multiplied into whatever the paints carry.
    fn set_opacity(&mut self, fill: f32, stroke: f32);

    /// Opens an isolated layer composited back at `opacity` on `pop_group`.
    fn push_group(&mut self, opacity: f32);
    fn pop_group(&mut self);

    fn move_to(&mut self, p: Point);
    fn line_to(&mut self, p: Point);
    fn cubic_to(&mut self, c1: Point, c2: Point, p: Point);
    fn quad_to(&mut self, c: Point, p: Point);
    fn arc_to(&mut self, arc: &ArcSegment);
    fn close_path(&mut self);

    fn fill_path(&mut self, evenodd: bool);
    fn stroke_path(&mut self);
    fn fill_stroke_path(&mut self, evenodd: bool);

    /// Intersects the clip with the current path and discards the path.
    fn clip_current_path(&mut self, evenodd: bool);

    /// Blits decoded pixels into `rect` in the current coordinate space.
    fn draw_image(&mut self, rect: &BBox, image: &ImageData);
}

/// Everything a painter can be asked to do, as data.
#[derive(Debug, Clone, PartialEq)]
pub enum PaintCmd {
    Save,
    Restore,
    Concat(Matrix),
    SetFill(PaintSource),
    SetStroke(PaintSource),
    SetStrokeProps(StrokeProps),
    SetOpacity(f32, f32),
    PushGroup(f32),
    PopGroup,
    MoveTo(Point),
    LineTo(Point),
    CubicTo(Point, Point, Point),
    QuadTo(Point, Point),
    ArcTo(ArcSegment),
    ClosePath,
    FillPath(bool),
    StrokePath,
    FillStrokePath(bool),
    Clip(bool),
    DrawImage(BBox, u32, u32),
}

/// Painter that records the call stream instead of rasterizing. Used by
/// render tests to assert on ordering and state without a pixel backend.
#[derive(Debug, Default)]
pub struct CommandRecorder {
    commands: Vec<PaintCmd>,
}

impl CommandRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[PaintCmd] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<PaintCmd> {
        self.commands
    }

    pub fn count<F: Fn(&PaintCmd) -> bool>(&self, pred: F) -> usize {
        self.commands.iter().filter(|c| pred(c)).count()
    }
}

impl Painter for CommandRecorder {
    fn save(&mut self) {
        self.commands.push(PaintCmd::Save);
    }

    fn restore(&mut self) {
        self.commands.push(PaintCmd::Restore);
    }

    fn concat(&mut self, m: &Matrix) {
        self.commands.push(PaintCmd::Concat(*m));
    }

    fn set_fill(&mut self, paint: &PaintSource) {
        self.commands.push(PaintCmd::SetFill(paint.clone()));
    }

    fn set_stroke(&mut self, paint: &PaintSource) {
        self.commands.push(PaintCmd::SetStroke(paint.clone()));
    }

    fn set_stroke_props(&mut self, props: &StrokeProps) {
        self.commands.push(PaintCmd::SetStrokeProps(props.clone()));
    }

    fn set_opacity(&mut self, fill: f32, stroke: f32) {
        self.commands.push(PaintCmd::SetOpacity(fill, stroke));
    }

    fn push_group(&mut self, opacity: f32) {
        self.commands.push(PaintCmd::PushGroup(opacity));
    }

    fn pop_group(&mut self) {
        self.commands.push(PaintCmd::PopGroup);
    }

    fn move_to(&mut self, p: Point) {
        self.commands.push(PaintCmd::MoveTo(p));
    }

    fn line_to(&mut self, p: Point) {
        self.commands.push(PaintCmd::LineTo(p));
    }

    fn cubic_to(&mut self, c1: Point, c2: Point, p: Point) {
        self.commands.push(PaintCmd::CubicTo(c1, c2, p));
    }

    fn quad_to(&mut self, c: Point, p: Point) {
        self.commands.push(PaintCmd::QuadTo(c, p));
    }

    fn arc_to(&mut self, arc: &ArcSegment) {
        self.commands.push(PaintCmd::ArcTo(arc.clone()));
    }

    fn close_path(&mut self) {
        self.commands.push(PaintCmd::ClosePath);
    }

    fn fill_path(&mut self, evenodd: bool) {
        self.commands.push(PaintCmd::FillPath(evenodd));
    }

    fn stroke_path(&mut self) {
        self.commands.push(PaintCmd::StrokePath);
    }

    fn fill_stroke_path(&mut self, evenodd: bool) {
        self.commands.push(PaintCmd::FillStrokePath(evenodd));
    }

    fn clip_current_path(&mut self, evenodd: bool) {
        self.commands.push(PaintCmd::Clip(evenodd));
    }

    fn draw_image(&mut self, rect: &BBox, image: &ImageData) {
        self.commands
            .push(PaintCmd::DrawImage(*rect, image.width, image.height));
    }
}
