use std::f32::consts::PI;

use crate::error::LineworkError;
use crate::transform::Matrix;
use crate::types::{BBox, Point};

/// Path command tags. Twenty variants: absolute/relative pairs of the ten
/// SVG path verbs, in letter order `M m L l H h V v C c S s Q q T t A a Z z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathCmd {
    MoveTo = 0,
    MoveToRel = 1,
    LineTo = 2,
    LineToRel = 3,
    HorizTo = 4,
    HorizToRel = 5,
    VertTo = 6,
    VertToRel = 7,
    CubicTo = 8,
    CubicToRel = 9,
    SmoothCubicTo = 10,
    SmoothCubicToRel = 11,
    QuadTo = 12,
    QuadToRel = 13,
    SmoothQuadTo = 14,
    SmoothQuadToRel = 15,
    ArcTo = 16,
    ArcToRel = 17,
    Close = 18,
    CloseRel = 19,
}

impl PathCmd {
    pub fn from_letter(ch: char) -> Option<PathCmd> {
        Some(match ch {
            'M' => PathCmd::MoveTo,
            'm' => PathCmd::MoveToRel,
            'L' => PathCmd::LineTo,
            'l' => PathCmd::LineToRel,
            'H' => PathCmd::HorizTo,
            'h' => PathCmd::HorizToRel,
            'V' => PathCmd::VertTo,
            'v' => PathCmd::VertToRel,
            'C' => PathCmd::CubicTo,
            'c' => PathCmd::CubicToRel,
            'S' => PathCmd::SmoothCubicTo,
            's' => PathCmd::SmoothCubicToRel,
            'Q' => PathCmd::QuadTo,
            'q' => PathCmd::QuadToRel,
            'T' => PathCmd::SmoothQuadTo,
            't' => PathCmd::SmoothQuadToRel,
            'A' => PathCmd::ArcTo,
            'a' => PathCmd::ArcToRel,
            'Z' => PathCmd::Close,
            'z' => PathCmd::CloseRel,
            _ => return None,
        })
    }

    pub fn letter(self) -> char {
        match self {
            PathCmd::MoveTo => 'M',
            PathCmd::MoveToRel => 'm',
            PathCmd::LineTo => 'L',
            PathCmd::LineToRel => 'l',
            PathCmd::HorizTo => 'H',
            PathCmd::HorizToRel => 'h',
            PathCmd::VertTo => 'V',
            PathCmd::VertToRel => 'v',
            PathCmd::CubicTo => 'C',
            PathCmd::CubicToRel => 'c',
            PathCmd::SmoothCubicTo => 'S',
            PathCmd::SmoothCubicToRel => 's',
            PathCmd::QuadTo => 'Q',
            PathCmd::QuadToRel => 'q',
            PathCmd::SmoothQuadTo => 'T',
            PathCmd::SmoothQuadToRel => 't',
            PathCmd::ArcTo => 'A',
            PathCmd::ArcToRel => 'a',
            PathCmd::Close => 'Z',
            PathCmd::CloseRel => 'z',
        }
    }

    /// Canonical operand group size. A command word may carry any exact
    /// multiple of this (repeat groups).
    pub fn arity(self) -> u32 {
        match self {
            PathCmd::MoveTo | PathCmd::MoveToRel => 2,
            PathCmd::LineTo | PathCmd::LineToRel => 2,
            PathCmd::HorizTo | PathCmd::HorizToRel => 1,
            PathCmd::VertTo | PathCmd::VertToRel => 1,
            PathCmd::CubicTo | PathCmd::CubicToRel => 6,
            PathCmd::SmoothCubicTo | PathCmd::SmoothCubicToRel => 4,
            PathCmd::QuadTo | PathCmd::QuadToRel => 4,
            PathCmd::SmoothQuadTo | PathCmd::SmoothQuadToRel => 2,
            PathCmd::ArcTo | PathCmd::ArcToRel => 7,
            PathCmd::Close | PathCmd::CloseRel => 0,
        }
    }

    pub fn is_relative(self) -> bool {
        (self as u32) & 1 == 1
    }

    pub fn is_moveto(self) -> bool {
        matches!(self, PathCmd::MoveTo | PathCmd::MoveToRel)
    }

    fn from_tag(tag: u32) -> Option<PathCmd> {
        Some(match tag {
            0 => PathCmd::MoveTo,
            1 => PathCmd::MoveToRel,
            2 => PathCmd::LineTo,
            3 => PathCmd::LineToRel,
            4 => PathCmd::HorizTo,
            5 => PathCmd::HorizToRel,
            6 => PathCmd::VertTo,
            7 => PathCmd::VertToRel,
            8 => PathCmd::CubicTo,
            9 => PathCmd::CubicToRel,
            10 => PathCmd::SmoothCubicTo,
            11 => PathCmd::SmoothCubicToRel,
            12 => PathCmd::QuadTo,
            13 => PathCmd::QuadToRel,
            14 => PathCmd::SmoothQuadTo,
            15 => PathCmd::SmoothQuadToRel,
            16 => PathCmd::ArcTo,
            17 => PathCmd::ArcToRel,
            18 => PathCmd::Close,
            19 => PathCmd::CloseRel,
            _ => return None,
        })
    }
}

// Word layout: 5-bit command tag in the high bits, 27-bit operand count in
// the low bits. Operands follow as f32 bit patterns in the same buffer.
const CMD_SHIFT: u32 = 27;
const COUNT_MASK: u32 = (1 << CMD_SHIFT) - 1;

fn pack_word(cmd: PathCmd, count: u32) -> u32 {
    ((cmd as u32) << CMD_SHIFT) | (count & COUNT_MASK)
}

fn unpack_word(word: u32) -> (u32, u32) {
    (word >> CMD_SHIFT, word & COUNT_MASK)
}

/// An elliptical arc in center parameterization, solved from the SVG
/// endpoint form (SVG 1.1 implementation notes, F.6.5). Angles are eccentric
/// anomalies in radians; `sweep_angle` is signed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcSegment {
    pub center: Point,
    pub rx: f32,
    pub ry: f32,
    pub x_rotation: f32,
    pub start_angle: f32,
    pub sweep_angle: f32,
    pub end: Point,
}

impl ArcSegment {
    pub fn point_at(&self, t: f32) -> Point {
        let sin_phi = libm::sinf(self.x_rotation);
        let cos_phi = libm::cosf(self.x_rotation);
        let x = self.rx * libm::cosf(t);
        let y = self.ry * libm::sinf(t);
        Point::new(
            self.center.x + cos_phi * x - sin_phi * y,
            self.center.y + sin_phi * x + cos_phi * y,
        )
    }

    /// Direction of travel at parameter `t`, honoring the sweep sign.
    pub fn tangent_angle(&self, t: f32) -> f32 {
        let sin_phi = libm::sinf(self.x_rotation);
        let cos_phi = libm::cosf(self.x_rotation);
        let dx = -self.rx * libm::sinf(t);
        let dy = self.ry * libm::cosf(t);
        let mut vx = cos_phi * dx - sin_phi * dy;
        let mut vy = sin_phi * dx + cos_phi * dy;
        if self.sweep_angle < 0.0 {
            vx = -vx;
            vy = -vy;
        }
        libm::atan2f(vy, vx)
    }

    pub fn end_angle(&self) -> f32 {
        self.start_angle + self.sweep_angle
    }

    fn contains_angle(&self, t: f32) -> bool {
        let dir = if self.sweep_angle >= 0.0 { 1.0 } else { -1.0 };
        let tau = 2.0 * PI;
        let mut rel = (t - self.start_angle) * dir;
        rel %= tau;
        if rel < 0.0 {
            rel += tau;
        }
        rel <= self.sweep_angle.abs() + 1e-5
    }

    /// Axis-extreme points lying within the sweep. Together with the two
    /// endpoints these bound the arc exactly.
    pub(crate) fn extrema(&self) -> Vec<Point> {
        let sin_phi = libm::sinf(self.x_rotation);
        let cos_phi = libm::cosf(self.x_rotation);
        let tx = libm::atan2f(-self.ry * sin_phi, self.rx * cos_phi);
        let ty = libm::atan2f(self.ry * cos_phi, self.rx * sin_phi);
        let mut out = Vec::new();
        for t in [tx, tx + PI, ty, ty + PI] {
            if self.contains_angle(t) {
                out.push(self.point_at(t));
            }
        }
        out
    }

    /// Approximates the arc as cubic segments of at most a quarter turn,
    /// `k = 4/3 * tan(dt/4)` for the control handles.
    pub fn to_cubics(&self) -> Vec<[Point; 3]> {
        let sin_phi = libm::sinf(self.x_rotation);
        let cos_phi = libm::cosf(self.x_rotation);
        let seg_count = libm::ceilf(self.sweep_angle.abs() / (PI / 2.0)).max(1.0) as i32;
        let delta = self.sweep_angle / seg_count as f32;

        let map = |x: f32, y: f32| {
            let x = self.rx * x;
            let y = self.ry * y;
            Point::new(
                self.center.x + cos_phi * x - sin_phi * y,
                self.center.y + sin_phi * x + cos_phi * y,
            )
        };

        let mut out = Vec::with_capacity(seg_count as usize);
        let mut t1 = self.start_angle;
        for _ in 0..seg_count {
            let t2 = t1 + delta;
            let k = (4.0 / 3.0) * libm::tanf((t2 - t1) / 4.0);
            let s1 = libm::sinf(t1);
            let c1 = libm::cosf(t1);
            let s2 = libm::sinf(t2);
            let c2 = libm::cosf(t2);
            out.push([
                map(c1 - k * s1, s1 + k * c1),
                map(c2 + k * s2, s2 - k * c2),
                map(c2, s2),
            ]);
            t1 = t2;
        }
        out
    }
}

/// Solves the ellipse center from the SVG endpoint parameterization.
/// Returns `None` for degenerate arcs (zero radius or coincident
/// endpoints), which the caller renders as a straight line.
pub(crate) fn arc_center_params(
    from: Point,
    rx_in: f32,
    ry_in: f32,
    x_rotation_deg: f32,
    large_arc: bool,
    sweep: bool,
    to: Point,
) -> Option<ArcSegment> {
    let mut rx = rx_in.abs();
    let mut ry = ry_in.abs();
    if rx == 0.0 || ry == 0.0 || (from.x == to.x && from.y == to.y) {
        return None;
    }

    let phi = x_rotation_deg.to_radians();
    let sin_phi = libm::sinf(phi);
    let cos_phi = libm::cosf(phi);

    let dx2 = (from.x - to.x) / 2.0;
    let dy2 = (from.y - to.y) / 2.0;
    let x1p = cos_phi * dx2 + sin_phi * dy2;
    let y1p = -sin_phi * dx2 + cos_phi * dy2;

    // Scale radii up if the endpoints cannot be joined with the given pair.
    let lambda = (x1p * x1p) / (rx * rx) + (y1p * y1p) / (ry * ry);
    if lambda > 1.0 {
        let s = libm::sqrtf(lambda);
        rx *= s;
        ry *= s;
    }

    let rx2 = rx * rx;
    let ry2 = ry * ry;
    let x1p2 = x1p * x1p;
    let y1p2 = y1p * y1p;
    let num = rx2 * ry2 - rx2 * y1p2 - ry2 * x1p2;
    let den = rx2 * y1p2 + ry2 * x1p2;
    let mut coef = 0.0;
    if den != 0.0 {
        let sign = if large_arc == sweep { -1.0 } else { 1.0 };
        coef = sign * libm::sqrtf((num / den).max(0.0));
    }
    let cxp = coef * (rx * y1p / ry);
    let cyp = coef * (-ry * x1p / rx);

    let cx = cos_phi * cxp - sin_phi * cyp + (from.x + to.x) / 2.0;
    let cy = sin_phi * cxp + cos_phi * cyp + (from.y + to.y) / 2.0;

    fn angle(ux: f32, uy: f32, vx: f32, vy: f32) -> f32 {
        let dot = ux * vx + uy * vy;
        let det = ux * vy - uy * vx;
        libm::atan2f(det, dot)
    }

    let ux = (x1p - cxp) / rx;
    let uy = (y1p - cyp) / ry;
    let vx = (-x1p - cxp) / rx;
    let vy = (-y1p - cyp) / ry;

    let theta1 = angle(1.0, 0.0, ux, uy);
    let mut dtheta = angle(ux, uy, vx, vy);
    if !sweep && dtheta > 0.0 {
        dtheta -= 2.0 * PI;
    } else if sweep && dtheta < 0.0 {
        dtheta += 2.0 * PI;
    }

    Some(ArcSegment {
        center: Point::new(cx, cy),
        rx,
        ry,
        x_rotation: phi,
        start_angle: theta1,
        sweep_angle: dtheta,
        end: to,
    })
}

/// Receiver for the normalized traversal: every callback gets absolute
/// coordinates, with smooth-curve control points already reflected.
pub(crate) trait PathVisitor {
    fn move_to(&mut self, _to: Point) {}
    fn line_to(&mut self, _from: Point, _to: Point) {}
    fn cubic_to(&mut self, _from: Point, _c1: Point, _c2: Point, _to: Point) {}
    fn quad_to(&mut self, _from: Point, _ctrl: Point, _to: Point) {}
    fn arc_to(&mut self, _from: Point, _arc: &ArcSegment) {}
    fn close(&mut self, _from: Point, _start: Point) {}
}

/// Path geometry as one flat buffer of 32-bit words: each command word
/// (tag + operand count) is followed by that many coordinates stored as
/// `f32` bit patterns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathData {
    words: Vec<u32>,
}

impl PathData {
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Number of command words (not operands).
    pub fn command_count(&self) -> usize {
        let mut n = 0;
        let mut i = 0;
        while i < self.words.len() {
            let (_, count) = unpack_word(self.words[i]);
            n += 1;
            i += 1 + count as usize;
        }
        n
    }

    /// Appends one complete command. Operand count must be an exact
    /// multiple of the command arity.
    pub fn push(&mut self, cmd: PathCmd, args: &[f32]) {
        debug_assert!(
            (cmd.arity() == 0 && args.is_empty())
                || (cmd.arity() > 0 && args.len() as u32 % cmd.arity() == 0)
        );
        self.words.push(pack_word(cmd, args.len() as u32));
        self.words.extend(args.iter().map(|v| v.to_bits()));
    }

    /// Single left-to-right scan over the `d` string. Number runs end at
    /// whitespace, a comma, a sign not preceded by an exponent marker, or a
    /// second decimal point in the same run. A command letter equal to the
    /// open command continues the same word (except moveto, whose repeats
    /// change meaning); the operand count of each word is back-patched when
    /// the next command begins.
    pub fn parse(d: &str) -> Result<PathData, LineworkError> {
        let bytes = d.as_bytes();
        let mut words: Vec<u32> = Vec::new();
        // (index of open command word, its command)
        let mut open: Option<(usize, PathCmd)> = None;
        let mut count: u32 = 0;
        let mut i = 0;

        while i < bytes.len() {
            let b = bytes[i];
            if b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' || b == b',' {
                i += 1;
                continue;
            }
            if b.is_ascii_alphabetic() {
                let ch = b as char;
                let Some(cmd) = PathCmd::from_letter(ch) else {
                    return Err(LineworkError::Parse(format!(
                        "unrecognized path command '{}'",
                        ch
                    )));
                };
                let same = matches!(open, Some((_, prev)) if prev == cmd && !cmd.is_moveto());
                if !same {
                    if let Some((at, _)) = open {
                        words[at] |= count & COUNT_MASK;
                    }
                    words.push(pack_word(cmd, 0));
                    open = Some((words.len() - 1, cmd));
                    count = 0;
                }
                i += 1;
                continue;
            }
            if b.is_ascii_digit() || b == b'.' || b == b'+' || b == b'-' {
                if open.is_none() {
                    return Err(LineworkError::Parse(
                        "path data begins with a number".to_string(),
                    ));
                }
                let start = i;
                let mut seen_dot = false;
                let mut seen_exp = false;
                if bytes[i] == b'+' || bytes[i] == b'-' {
                    i += 1;
                }
                while i < bytes.len() {
                    match bytes[i] {
                        b'0'..=b'9' => i += 1,
                        b'.' if !seen_dot && !seen_exp => {
                            seen_dot = true;
                            i += 1;
                        }
                        b'e' | b'E' if !seen_exp => {
                            seen_exp = true;
                            i += 1;
                            if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
                                i += 1;
                            }
                        }
                        _ => break,
                    }
                }
                let token = &d[start..i];
                let value: f32 = token.parse().map_err(|_| {
                    LineworkError::Parse(format!("unparsable number '{}'", token))
                })?;
                words.push(value.to_bits());
                count += 1;
                continue;
            }
            return Err(LineworkError::Parse(format!(
                "unexpected character '{}' in path data",
                b as char
            )));
        }
        if let Some((at, _)) = open {
            words[at] |= count & COUNT_MASK;
        }
        Ok(PathData { words })
    }

    /// Checks command arities and the leading-moveto rule. A missing moveto
    /// is synthesized by promoting the first line pair (or inserting
    /// `M 0 0`); the return value reports whether that happened so the
    /// caller can log it.
    pub fn validate(&mut self) -> Result<bool, LineworkError> {
        let mut synthesized = false;
        if !self.words.is_empty() {
            let (tag, count) = unpack_word(self.words[0]);
            let cmd = PathCmd::from_tag(tag).ok_or_else(|| {
                LineworkError::MalformedPath(format!("unknown command tag {}", tag))
            })?;
            if !cmd.is_moveto() {
                synthesized = true;
                match cmd {
                    PathCmd::LineTo | PathCmd::LineToRel if count >= 2 => {
                        let m_cmd = if cmd.is_relative() {
                            PathCmd::MoveToRel
                        } else {
                            PathCmd::MoveTo
                        };
                        // Promote the first pair into a moveto, keep the rest.
                        self.words[0] = pack_word(m_cmd, 2);
                        if count > 2 {
                            self.words.insert(3, pack_word(cmd, count - 2));
                        }
                    }
                    _ => {
                        let zero = 0f32.to_bits();
                        self.words
                            .splice(0..0, [pack_word(PathCmd::MoveTo, 2), zero, zero]);
                    }
                }
            }
        }

        let mut i = 0;
        while i < self.words.len() {
            let (tag, count) = unpack_word(self.words[i]);
            let cmd = PathCmd::from_tag(tag).ok_or_else(|| {
                LineworkError::MalformedPath(format!("unknown command tag {}", tag))
            })?;
            let arity = cmd.arity();
            let ok = if arity == 0 {
                count == 0
            } else {
                count % arity == 0
            };
            if !ok {
                return Err(LineworkError::MalformedPath(format!(
                    "command '{}' carries {} operands, not a multiple of {}",
                    cmd.letter(),
                    count,
                    arity
                )));
            }
            let end = i + 1 + count as usize;
            if end > self.words.len() {
                return Err(LineworkError::MalformedPath(
                    "operand count overruns the buffer".to_string(),
                ));
            }
            i = end;
        }
        Ok(synthesized)
    }

    /// The one traversal routine. Tracks current point, subpath start point
    /// and the previous command's control point (for smooth reflection), and
    /// feeds the visitor absolute coordinates.
    pub(crate) fn walk(&self, visitor: &mut dyn PathVisitor) {
        let mut cur = Point::ZERO;
        let mut start = Point::ZERO;
        let mut last_cubic_ctrl: Option<Point> = None;
        let mut last_quad_ctrl: Option<Point> = None;

        let mut i = 0;
        while i < self.words.len() {
            let (tag, count) = unpack_word(self.words[i]);
            let Some(cmd) = PathCmd::from_tag(tag) else {
                return;
            };
            let end = (i + 1 + count as usize).min(self.words.len());
            let args = &self.words[i + 1..end];
            i = end;
            let rel = cmd.is_relative();

            let value = |w: u32| f32::from_bits(w);
            let resolve = |x: f32, y: f32, cur: Point| {
                if rel {
                    Point::new(cur.x + x, cur.y + y)
                } else {
                    Point::new(x, y)
                }
            };

            match cmd {
                PathCmd::MoveTo | PathCmd::MoveToRel => {
                    for (idx, pair) in args.chunks_exact(2).enumerate() {
                        let p = resolve(value(pair[0]), value(pair[1]), cur);
                        if idx == 0 {
                            visitor.move_to(p);
                            start = p;
                        } else {
                            // Trailing pairs on a moveto are implicit linetos.
                            visitor.line_to(cur, p);
                        }
                        cur = p;
                    }
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
                PathCmd::LineTo | PathCmd::LineToRel => {
                    for pair in args.chunks_exact(2) {
                        let p = resolve(value(pair[0]), value(pair[1]), cur);
                        visitor.line_to(cur, p);
                        cur = p;
                    }
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
                PathCmd::HorizTo | PathCmd::HorizToRel => {
                    for w in args {
                        let x = value(*w);
                        let p = if rel {
                            Point::new(cur.x + x, cur.y)
                        } else {
                            Point::new(x, cur.y)
                        };
                        visitor.line_to(cur, p);
                        cur = p;
                    }
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
                PathCmd::VertTo | PathCmd::VertToRel => {
                    for w in args {
                        let y = value(*w);
                        let p = if rel {
                            Point::new(cur.x, cur.y + y)
                        } else {
                            Point::new(cur.x, y)
                        };
                        visitor.line_to(cur, p);
                        cur = p;
                    }
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
                PathCmd::CubicTo | PathCmd::CubicToRel => {
                    for group in args.chunks_exact(6) {
                        let c1 = resolve(value(group[0]), value(group[1]), cur);
                        let c2 = resolve(value(group[2]), value(group[3]), cur);
                        let p = resolve(value(group[4]), value(group[5]), cur);
                        visitor.cubic_to(cur, c1, c2, p);
                        cur = p;
                        last_cubic_ctrl = Some(c2);
                        last_quad_ctrl = None;
                    }
                }
                PathCmd::SmoothCubicTo | PathCmd::SmoothCubicToRel => {
                    for group in args.chunks_exact(4) {
                        let c2 = resolve(value(group[0]), value(group[1]), cur);
                        let p = resolve(value(group[2]), value(group[3]), cur);
                        let c1 = match last_cubic_ctrl {
                            Some(prev) => Point::new(2.0 * cur.x - prev.x, 2.0 * cur.y - prev.y),
                            None => cur,
                        };
                        visitor.cubic_to(cur, c1, c2, p);
                        cur = p;
                        last_cubic_ctrl = Some(c2);
                        last_quad_ctrl = None;
                    }
                }
                PathCmd::QuadTo | PathCmd::QuadToRel => {
                    for group in args.chunks_exact(4) {
                        let ctrl = resolve(value(group[0]), value(group[1]), cur);
                        let p = resolve(value(group[2]), value(group[3]), cur);
                        visitor.quad_to(cur, ctrl, p);
                        cur = p;
                        last_quad_ctrl = Some(ctrl);
                        last_cubic_ctrl = None;
                    }
                }
                PathCmd::SmoothQuadTo | PathCmd::SmoothQuadToRel => {
                    for pair in args.chunks_exact(2) {
                        let p = resolve(value(pair[0]), value(pair[1]), cur);
                        let ctrl = match last_quad_ctrl {
                            Some(prev) => Point::new(2.0 * cur.x - prev.x, 2.0 * cur.y - prev.y),
                            None => cur,
                        };
                        visitor.quad_to(cur, ctrl, p);
                        cur = p;
                        last_quad_ctrl = Some(ctrl);
                        last_cubic_ctrl = None;
                    }
                }
                PathCmd::ArcTo | PathCmd::ArcToRel => {
                    for group in args.chunks_exact(7) {
                        let rx = value(group[0]);
                        let ry = value(group[1]);
                        let rot = value(group[2]);
                        let large = value(group[3]).abs() > 0.5;
                        let sweep = value(group[4]).abs() > 0.5;
                        let p = resolve(value(group[5]), value(group[6]), cur);
                        match arc_center_params(cur, rx, ry, rot, large, sweep, p) {
                            Some(arc) => visitor.arc_to(cur, &arc),
                            None => visitor.line_to(cur, p),
                        }
                        cur = p;
                    }
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
                PathCmd::Close | PathCmd::CloseRel => {
                    visitor.close(cur, start);
                    cur = start;
                    last_cubic_ctrl = None;
                    last_quad_ctrl = None;
                }
            }
        }
    }

    /// Rewrites coordinates in place under `m`. Callers guarantee `m`
    /// carries no rotation: horizontal/vertical segments stay axis-aligned
    /// and arc radii scale per axis. A mirroring transform flips arc sweep
    /// flags.
    pub(crate) fn transform_in_place(&mut self, m: &Matrix) {
        let mut i = 0;
        while i < self.words.len() {
            let (tag, count) = unpack_word(self.words[i]);
            let Some(cmd) = PathCmd::from_tag(tag) else {
                return;
            };
            i += 1;
            let end = (i + count as usize).min(self.words.len());
            let rel = cmd.is_relative();
            match cmd {
                PathCmd::MoveTo
                | PathCmd::MoveToRel
                | PathCmd::LineTo
                | PathCmd::LineToRel
                | PathCmd::CubicTo
                | PathCmd::CubicToRel
                | PathCmd::SmoothCubicTo
                | PathCmd::SmoothCubicToRel
                | PathCmd::QuadTo
                | PathCmd::QuadToRel
                | PathCmd::SmoothQuadTo
                | PathCmd::SmoothQuadToRel => {
                    let mut j = i;
                    while j + 2 <= end {
                        let x = f32::from_bits(self.words[j]);
                        let y = f32::from_bits(self.words[j + 1]);
                        let (nx, ny) = if rel {
                            m.apply_vector(x, y)
                        } else {
                            m.apply(x, y)
                        };
                        self.words[j] = nx.to_bits();
                        self.words[j + 1] = ny.to_bits();
                        j += 2;
                    }
                }
                PathCmd::HorizTo | PathCmd::HorizToRel => {
                    for j in i..end {
                        let x = f32::from_bits(self.words[j]);
                        let nx = if rel { m.a * x } else { m.a * x + m.e };
                        self.words[j] = nx.to_bits();
                    }
                }
                PathCmd::VertTo | PathCmd::VertToRel => {
                    for j in i..end {
                        let y = f32::from_bits(self.words[j]);
                        let ny = if rel { m.d * y } else { m.d * y + m.f };
                        self.words[j] = ny.to_bits();
                    }
                }
                PathCmd::ArcTo | PathCmd::ArcToRel => {
                    let mut j = i;
                    while j + 7 <= end {
                        let rx = f32::from_bits(self.words[j]);
                        let ry = f32::from_bits(self.words[j + 1]);
                        self.words[j] = (rx * m.a.abs()).to_bits();
                        self.words[j + 1] = (ry * m.d.abs()).to_bits();
                        // x-rotation unchanged: the transform has none.
                        if m.a * m.d < 0.0 {
                            let sweep = f32::from_bits(self.words[j + 4]);
                            let flipped = if sweep.abs() > 0.5 { 0.0f32 } else { 1.0f32 };
                            self.words[j + 4] = flipped.to_bits();
                        }
                        let x = f32::from_bits(self.words[j + 5]);
                        let y = f32::from_bits(self.words[j + 6]);
                        let (nx, ny) = if rel {
                            m.apply_vector(x, y)
                        } else {
                            m.apply(x, y)
                        };
                        self.words[j + 5] = nx.to_bits();
                        self.words[j + 6] = ny.to_bits();
                        j += 7;
                    }
                }
                PathCmd::Close | PathCmd::CloseRel => {}
            }
            i = end;
        }
    }

    /// Serializes from the raw words, preserving the author's command
    /// letters (including relative forms), so parse -> string -> parse is
    /// the identity on the buffer.
    pub fn to_svg_string(&self) -> String {
        let mut out = String::new();
        let mut i = 0;
        while i < self.words.len() {
            let (tag, count) = unpack_word(self.words[i]);
            let Some(cmd) = PathCmd::from_tag(tag) else {
                break;
            };
            if !out.is_empty() {
                out.push(' ');
            }
            out.push(cmd.letter());
            let end = (i + 1 + count as usize).min(self.words.len());
            for w in &self.words[i + 1..end] {
                out.push(' ');
                format_coord(&mut out, f32::from_bits(*w));
            }
            i = end;
        }
        out
    }

    /// Axis-aligned bounds of the geometry: exact for lines and arcs,
    /// control-hull for curves. `None` when the path draws nothing.
    pub fn bbox(&self) -> Option<BBox> {
        let mut visitor = BBoxVisitor { bounds: None };
        self.walk(&mut visitor);
        visitor.bounds
    }
}

fn format_coord(out: &mut String, v: f32) {
    // Display for f32 already picks the shortest round-trip form.
    use std::fmt::Write;
    let _ = write!(out, "{}", v);
}

struct BBoxVisitor {
    bounds: Option<BBox>,
}

impl BBoxVisitor {
    fn add(&mut self, p: Point) {
        self.bounds = Some(match self.bounds {
            Some(b) => b.union_point(p),
            None => BBox::from_xywh(p.x, p.y, 0.0, 0.0),
        });
    }
}

impl PathVisitor for BBoxVisitor {
    fn move_to(&mut self, to: Point) {
        self.add(to);
    }

    fn line_to(&mut self, from: Point, to: Point) {
        self.add(from);
        self.add(to);
    }

    fn cubic_to(&mut self, from: Point, c1: Point, c2: Point, to: Point) {
        self.add(from);
        self.add(c1);
        self.add(c2);
        self.add(to);
    }

    fn quad_to(&mut self, from: Point, ctrl: Point, to: Point) {
        self.add(from);
        self.add(ctrl);
        self.add(to);
    }

    fn arc_to(&mut self, from: Point, arc: &ArcSegment) {
        self.add(from);
        self.add(arc.end);
        for p in arc.extrema() {
            self.add(p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[derive(Default)]
    struct Recorder {
        ops: Vec<String>,
    }

    impl PathVisitor for Recorder {
        fn move_to(&mut self, to: Point) {
            self.ops.push(format!("M {} {}", to.x, to.y));
        }
        fn line_to(&mut self, _from: Point, to: Point) {
            self.ops.push(format!("L {} {}", to.x, to.y));
        }
        fn cubic_to(&mut self, _from: Point, c1: Point, c2: Point, to: Point) {
            self.ops.push(format!(
                "C {} {} {} {} {} {}",
                c1.x, c1.y, c2.x, c2.y, to.x, to.y
            ));
        }
        fn quad_to(&mut self, _from: Point, ctrl: Point, to: Point) {
            self.ops
                .push(format!("Q {} {} {} {}", ctrl.x, ctrl.y, to.x, to.y));
        }
        fn arc_to(&mut self, _from: Point, arc: &ArcSegment) {
            self.ops.push(format!(
                "A c=({:.1} {:.1}) {} {}",
                arc.center.x, arc.center.y, arc.rx, arc.ry
            ));
        }
        fn close(&mut self, _from: Point, start: Point) {
            self.ops.push(format!("Z {} {}", start.x, start.y));
        }
    }

    #[test]
    fn triangle_packs_three_command_words() {
        let mut path = PathData::parse("M0,0 L10,0 L10,10 Z").unwrap();
        let synthesized = path.validate().unwrap();
        assert!(!synthesized);
        assert_eq!(path.command_count(), 3);
        let b = path.bbox().unwrap();
        assert!(close(b.x, 0.0) && close(b.y, 0.0));
        assert!(close(b.max_x(), 10.0) && close(b.max_y(), 10.0));
    }

    #[test]
    fn string_round_trip_is_identity_on_words() {
        let sources = [
            "M0,0 L10,0 L10,10 Z",
            "m 5 5 l 10 0 v 4 h -3 z",
            "M 0 0 C 0 10 10 10 10 0 S 20 -10 20 0",
            "M 0 0 Q 5 10 10 0 T 20 0",
            "M 0 0 A 10 10 0 0 1 20 0 Z",
        ];
        for src in sources {
            let first = PathData::parse(src).unwrap();
            let text = first.to_svg_string();
            let second = PathData::parse(&text).unwrap();
            assert_eq!(first, second, "round trip changed words for {src}");
        }
    }

    #[test]
    fn second_decimal_point_ends_a_number_run() {
        let path = PathData::parse("M.5.5L1.25.75").unwrap();
        let mut rec = Recorder::default();
        path.walk(&mut rec);
        assert_eq!(rec.ops, vec!["M 0.5 0.5", "L 1.25 0.75"]);
    }

    #[test]
    fn sign_starts_a_new_number_run() {
        let path = PathData::parse("M10-20L-5+3").unwrap();
        let mut rec = Recorder::default();
        path.walk(&mut rec);
        assert_eq!(rec.ops, vec!["M 10 -20", "L -5 3"]);
    }

    #[test]
    fn exponent_signs_stay_in_the_run() {
        let path = PathData::parse("M1e2 2e-1").unwrap();
        let mut rec = Recorder::default();
        path.walk(&mut rec);
        assert_eq!(rec.ops, vec!["M 100 0.2"]);
    }

    #[test]
    fn unrecognized_letter_is_a_parse_error() {
        let err = PathData::parse("M0 0 X 5 5").unwrap_err();
        assert!(matches!(err, LineworkError::Parse(_)));
    }

    #[test]
    fn leading_number_is_a_parse_error() {
        let err = PathData::parse("10 10 L 5 5").unwrap_err();
        assert!(matches!(err, LineworkError::Parse(_)));
    }

    #[test]
    fn missing_moveto_is_synthesized_from_first_line_pair() {
        let mut path = PathData::parse("L10,0 L10,10").unwrap();
        let synthesized = path.validate().unwrap();
        assert!(synthesized);
        let mut rec = Recorder::default();
        path.walk(&mut rec);
        assert_eq!(rec.ops, vec!["M 10 0", "L 10 10"]);
    }

    #[test]
    fn missing_moveto_before_vertical_inserts_origin() {
        let mut path = PathData::parse("V 5").unwrap();
        assert!(path.validate().unwrap());
        let mut rec = Recorder::default();
        path.walk(&mut rec);
        assert_eq!(rec.ops, vec!["M 0 0", "L 0 5"]);
    }

    #[test]
    fn arity_mismatch_is_malformed() {
        let mut path = PathData::parse("M 0 0 C 1 2 3").unwrap();
        let err = path.validate().unwrap_err();
        assert!(matches!(err, LineworkError::MalformedPath(_)));
    }

    #[test]
    fn close_with_operands_is_malformed() {
        let mut path = PathData::parse("M 0 0 Z 3").unwrap();
        let err = path.validate().unwrap_err();
        assert!(matches!(err, LineworkError::MalformedPath(_)));
    }

    #[test]
    fn implicit_lineto_after_moveto_pairs() {
        let path = PathData::parse("M 0 0 10 10 20 0").unwrap();
        let mut rec = Recorder::default();
        path.walk(&mut rec);
        assert_eq!(rec.ops, vec!["M 0 0", "L 10 10", "L 20 0"]);
        assert_eq!(path.command_count(), 1);
    }

    #[test]
    fn relative_commands_accumulate_from_current_point() {
        let path = PathData::parse("m 5 5 l 10 0 v 4 h -3").unwrap();
        let mut rec = Recorder::default();
        path.walk(&mut rec);
        assert_eq!(rec.ops, vec!["M 5 5", "L 15 5", "L 15 9", "L 12 9"]);
    }

    #[test]
    fn smooth_cubic_reflects_previous_control() {
        let path = PathData::parse("M 0 0 C 0 10 10 10 10 0 S 20 -10 20 0").unwrap();
        let mut rec = Recorder::default();
        path.walk(&mut rec);
        // Reflection of (10,10) about (10,0) is (10,-10).
        assert_eq!(rec.ops[2], "C 10 -10 20 -10 20 0");
    }

    #[test]
    fn smooth_cubic_without_previous_curve_uses_current_point() {
        let path = PathData::parse("M 3 4 S 20 -10 20 0").unwrap();
        let mut rec = Recorder::default();
        path.walk(&mut rec);
        assert_eq!(rec.ops[1], "C 3 4 20 -10 20 0");
    }

    #[test]
    fn smooth_quad_reflects_previous_control() {
        let path = PathData::parse("M 0 0 Q 5 10 10 0 T 20 0").unwrap();
        let mut rec = Recorder::default();
        path.walk(&mut rec);
        // Reflection of (5,10) about (10,0) is (15,-10).
        assert_eq!(rec.ops[2], "Q 15 -10 20 0");
    }

    #[test]
    fn close_returns_to_subpath_start() {
        let path = PathData::parse("M 5 5 L 10 5 Z L 0 0").unwrap();
        let mut rec = Recorder::default();
        path.walk(&mut rec);
        assert_eq!(rec.ops[2], "Z 5 5");
        // After close the current point is the subpath start again.
        assert_eq!(rec.ops[3], "L 0 0");
    }

    #[test]
    fn arc_solves_center_parameterization() {
        let arc = arc_center_params(
            Point::new(0.0, 0.0),
            10.0,
            10.0,
            0.0,
            false,
            true,
            Point::new(20.0, 0.0),
        )
        .unwrap();
        assert!(close(arc.center.x, 10.0) && close(arc.center.y, 0.0));
        assert!(close(arc.sweep_angle, PI));
        let mid = arc.point_at(arc.start_angle + arc.sweep_angle / 2.0);
        assert!(close(mid.x, 10.0) && close(mid.y, -10.0), "mid {:?}", mid);
    }

    #[test]
    fn degenerate_arc_walks_as_line() {
        let path = PathData::parse("M 0 0 A 0 10 0 0 1 20 0").unwrap();
        let mut rec = Recorder::default();
        path.walk(&mut rec);
        assert_eq!(rec.ops, vec!["M 0 0", "L 20 0"]);
    }

    #[test]
    fn arc_bbox_includes_extreme_point() {
        let path = PathData::parse("M 0 0 A 10 10 0 0 1 20 0").unwrap();
        let b = path.bbox().unwrap();
        assert!(close(b.x, 0.0));
        assert!(close(b.y, -10.0), "top {}", b.y);
        assert!(close(b.max_x(), 20.0));
        assert!(close(b.max_y(), 0.0));
    }

    #[test]
    fn arc_to_cubics_hits_the_endpoints() {
        let arc = arc_center_params(
            Point::new(0.0, 0.0),
            10.0,
            10.0,
            0.0,
            false,
            true,
            Point::new(20.0, 0.0),
        )
        .unwrap();
        let cubics = arc.to_cubics();
        assert_eq!(cubics.len(), 2);
        let last = cubics.last().unwrap()[2];
        assert!(close(last.x, 20.0) && close(last.y, 0.0));
    }

    #[test]
    fn transform_in_place_translates_and_scales() {
        let mut path = PathData::parse("M 10 10 H 20 V 30 l 2 2").unwrap();
        let m = Matrix::translate(5.0, 5.0).mul(Matrix::scale(2.0, 3.0));
        path.transform_in_place(&m);
        let mut rec = Recorder::default();
        path.walk(&mut rec);
        assert_eq!(rec.ops[0], "M 25 35");
        assert_eq!(rec.ops[1], "L 45 35");
        assert_eq!(rec.ops[2], "L 45 95");
        // Relative coordinates only scale.
        assert_eq!(rec.ops[3], "L 49 101");
    }

    #[test]
    fn transform_in_place_scales_arc_radii_and_flips_sweep_on_mirror() {
        let mut path = PathData::parse("M 0 0 A 10 5 0 0 1 20 0").unwrap();
        path.transform_in_place(&Matrix::scale(2.0, -1.0));
        let mut rec = Recorder::default();
        path.walk(&mut rec);
        assert!(rec.ops[1].contains("20 5"), "radii were {:?}", rec.ops[1]);
        // Sweep flipped: the serialized flag is now 0.
        let text = path.to_svg_string();
        assert_eq!(text, "M 0 0 A 20 5 0 0 0 40 0");
    }

    #[test]
    fn bytecode_packs_counts_and_tags() {
        let path = PathData::parse("M 1 2 L 3 4 5 6").unwrap();
        assert_eq!(path.words.len(), 8);
        let (tag, count) = unpack_word(path.words[0]);
        assert_eq!(PathCmd::from_tag(tag), Some(PathCmd::MoveTo));
        assert_eq!(count, 2);
        let (tag, count) = unpack_word(path.words[3]);
        assert_eq!(PathCmd::from_tag(tag), Some(PathCmd::LineTo));
        assert_eq!(count, 4);
    }

    #[test]
    fn push_builds_the_same_words_as_parse() {
        let mut built = PathData::new();
        built.push(PathCmd::MoveTo, &[0.0, 0.0]);
        built.push(PathCmd::LineTo, &[10.0, 0.0, 10.0, 10.0]);
        built.push(PathCmd::Close, &[]);
        let parsed = PathData::parse("M 0 0 L 10 0 L 10 10 Z").unwrap();
        assert_eq!(built, parsed);
    }

    #[test]
    fn empty_path_is_valid_and_boundless() {
        let mut path = PathData::parse("").unwrap();
        assert!(!path.validate().unwrap());
        assert!(path.is_empty());
        assert!(path.bbox().is_none());
    }
}
