use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::LineworkError;
use crate::path::{PathCmd, PathData};
use crate::types::Point;

/// One registered face: raw file bytes plus the normalized family name it is
/// looked up under.
#[derive(Debug, Clone)]
pub struct FontEntry {
    pub family: String,
    pub data: Arc<Vec<u8>>,
    pub index: u32,
}

/// Font registry keyed by normalized family name. Text rendering degrades to
/// box estimates when the catalog is empty.
#[derive(Debug, Default)]
pub struct FontCatalog {
    fonts: Vec<FontEntry>,
    lookup: HashMap<String, usize>,
}

fn normalize_family(name: &str) -> String {
    name.trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .trim()
        .to_lowercase()
}

fn face_family(data: &[u8], index: u32) -> Option<String> {
    let face = ttf_parser::Face::parse(data, index).ok()?;
    face.names()
        .into_iter()
        .filter(|n| {
            n.name_id == ttf_parser::name_id::TYPOGRAPHIC_FAMILY
                || n.name_id == ttf_parser::name_id::FAMILY
        })
        .find_map(|n| n.to_string())
}

impl FontCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    /// Registers every `.ttf`/`.otf` file in `dir`, skipping files that fail
    /// to parse. Returns the number registered.
    pub fn register_dir(&mut self, dir: &Path) -> Result<usize, LineworkError> {
        let mut registered = 0;
        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        entries.sort();
        for path in entries {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase);
            if !matches!(ext.as_deref(), Some("ttf") | Some("otf")) {
                continue;
            }
            if self.register_file(&path).is_ok() {
                registered += 1;
            }
        }
        Ok(registered)
    }

    pub fn register_file(&mut self, path: &Path) -> Result<(), LineworkError> {
        let data = std::fs::read(path)?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("font")
            .to_string();
        self.register_bytes(&stem, data)
    }

    /// Registers a face from raw bytes. The family name comes from the name
    /// table when present, otherwise from `fallback_name`.
    pub fn register_bytes(&mut self, fallback_name: &str, data: Vec<u8>) -> Result<(), LineworkError> {
        if ttf_parser::Face::parse(&data, 0).is_err() {
            return Err(LineworkError::InvalidConfiguration(format!(
                "font '{fallback_name}' is not a readable TrueType/OpenType face"
            )));
        }
        let family = face_family(&data, 0).unwrap_or_else(|| fallback_name.to_string());
        let key = normalize_family(&family);
        let entry = FontEntry {
            family,
            data: Arc::new(data),
            index: 0,
        };
        if let Some(&slot) = self.lookup.get(&key) {
            self.fonts[slot] = entry;
        } else {
            self.lookup.insert(key, self.fonts.len());
            self.fonts.push(entry);
        }
        Ok(())
    }

    /// Resolves a CSS-style family list. Unmatched names (including the
    /// generic families) fall back to the first registered face.
    pub fn resolve(&self, family_list: &str) -> Option<&FontEntry> {
        for family in family_list.split(',') {
            let key = normalize_family(family);
            if key.is_empty() {
                continue;
            }
            if let Some(&slot) = self.lookup.get(&key) {
                return Some(&self.fonts[slot]);
            }
        }
        self.fonts.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapedGlyph {
    pub id: u16,
    /// Pen offset from the run origin, in text-space units.
    pub dx: f32,
    pub dy: f32,
    pub advance: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapedRun {
    pub glyphs: Vec<ShapedGlyph>,
    pub advance: f32,
    pub ascent: f32,
    pub descent: f32,
}

/// Shapes one run of text at `font_size`. Uses full shaping (ligatures,
/// kerning, marks); falls back to naive per-character advances when the face
/// cannot be loaded by the shaper.
pub fn shape_run(entry: &FontEntry, text: &str, font_size: f32) -> ShapedRun {
    let Ok(face) = ttf_parser::Face::parse(&entry.data, entry.index) else {
        return ShapedRun::default();
    };
    let upem = face.units_per_em() as f32;
    if upem <= 0.0 {
        return ShapedRun::default();
    }
    let scale = font_size / upem;
    let ascent = face.ascender() as f32 * scale;
    let descent = -(face.descender() as f32) * scale;

    if let Some(hb_face) = rustybuzz::Face::from_slice(&entry.data, entry.index) {
        let mut buffer = rustybuzz::UnicodeBuffer::new();
        buffer.push_str(text);
        let shaped = rustybuzz::shape(&hb_face, &[], buffer);

        let mut glyphs = Vec::with_capacity(shaped.len());
        let mut pen = 0.0f32;
        for (info, pos) in shaped
            .glyph_infos()
            .iter()
            .zip(shaped.glyph_positions().iter())
        {
            let advance = pos.x_advance as f32 * scale;
            glyphs.push(ShapedGlyph {
                id: info.glyph_id as u16,
                dx: pen + pos.x_offset as f32 * scale,
                dy: -(pos.y_offset as f32) * scale,
                advance,
            });
            pen += advance;
        }
        return ShapedRun {
            glyphs,
            advance: pen,
            ascent,
            descent,
        };
    }

    let mut glyphs = Vec::new();
    let mut pen = 0.0f32;
    for ch in text.chars() {
        let Some(gid) = face.glyph_index(ch) else {
            continue;
        };
        let advance = face.glyph_hor_advance(gid).unwrap_or(0) as f32 * scale;
        glyphs.push(ShapedGlyph {
            id: gid.0,
            dx: pen,
            dy: 0.0,
            advance,
        });
        pen += advance;
    }
    ShapedRun {
        glyphs,
        advance: pen,
        ascent,
        descent,
    }
}

/// Shaping seam used by the render pass. The engine ships the
/// rustybuzz-backed `FontCatalog`; anything that can turn one styled span
/// into positioned glyphs and glyph outlines can stand in for it. Spans are
/// never wrapped, so one span is always one run.
pub trait TextShaper {
    /// Shapes one span of text. `None` when no registered face matches.
    fn shape(&self, family_list: &str, text: &str, font_size: f32) -> Option<ShapedRun>;

    /// Document-space outline for one shaped glyph with the baseline pen at
    /// `origin`. `None` for blank glyphs.
    fn outline(
        &self,
        family_list: &str,
        glyph_id: u16,
        origin: Point,
        font_size: f32,
    ) -> Option<PathData>;
}

impl TextShaper for FontCatalog {
    fn shape(&self, family_list: &str, text: &str, font_size: f32) -> Option<ShapedRun> {
        self.resolve(family_list)
            .map(|entry| shape_run(entry, text, font_size))
    }

    fn outline(
        &self,
        family_list: &str,
        glyph_id: u16,
        origin: Point,
        font_size: f32,
    ) -> Option<PathData> {
        self.resolve(family_list)
            .and_then(|entry| glyph_outline(entry, glyph_id, origin, font_size))
    }
}

struct OutlineSink {
    path: PathData,
    origin: Point,
    scale: f32,
}

impl OutlineSink {
    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        // Font units are y-up; document space is y-down.
        (
            self.origin.x + x * self.scale,
            self.origin.y - y * self.scale,
        )
    }
}

impl ttf_parser::OutlineBuilder for OutlineSink {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.path.push(PathCmd::MoveTo, &[x, y]);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.path.push(PathCmd::LineTo, &[x, y]);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.path.push(PathCmd::QuadTo, &[x1, y1, x, y]);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.path.push(PathCmd::CubicTo, &[x1, y1, x2, y2, x, y]);
    }

    fn close(&mut self) {
        self.path.push(PathCmd::Close, &[]);
    }
}

/// Extracts a glyph's outline as document-space path geometry with the
/// baseline pen position at `origin`. `None` for blank glyphs (spaces).
pub fn glyph_outline(
    entry: &FontEntry,
    glyph_id: u16,
    origin: Point,
    font_size: f32,
) -> Option<PathData> {
    let face = ttf_parser::Face::parse(&entry.data, entry.index).ok()?;
    let upem = face.units_per_em() as f32;
    if upem <= 0.0 {
        return None;
    }
    let mut sink = OutlineSink {
        path: PathData::new(),
        origin,
        scale: font_size / upem,
    };
    face.outline_glyph(ttf_parser::GlyphId(glyph_id), &mut sink)?;
    if sink.path.is_empty() {
        return None;
    }
    Some(sink.path)
}
