mod debug;
mod document;
mod error;
mod gradient;
mod node;
mod painter;
mod path;
mod raster;
mod reader;
mod render;
mod style;
mod text;
mod transform;
mod types;
mod writer;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use debug::DebugLogger;

pub use document::{Document, NodeId};
pub use error::LineworkError;
pub use gradient::{Grad, GradKind, GradUnits, GradientGeom, Slot};
pub use node::{
    Circle, Ellipse, ImageRef, Line, MarkerDef, MarkerOrient, MarkerUnits, Node, PathGeom, Polygon,
    Polyline, Rect, RootInfo, Shape, TextBlock, TextSpan,
};
pub use painter::{
    CAP_BUTT, CAP_ROUND, CAP_SQUARE, CommandRecorder, JOIN_BEVEL, JOIN_MITER, JOIN_ROUND, PaintCmd,
    Painter, StrokeProps,
};
pub use path::{ArcSegment, PathCmd, PathData};
pub use raster::Raster;
pub use style::{PaintRef, PaintStyle, Stylesheet, TextAnchor};
pub use text::{FontCatalog, FontEntry, ShapedGlyph, ShapedRun, TextShaper};
pub use transform::{Matrix, parse_transform};
pub use types::{
    BBox, Color, FitAlign, FitMode, FitPolicy, GradientStop, ImageData, PaintSource, Point,
    PreserveAspectRatio, Shading, Size, ViewBox,
};

/// Configured engine instance. Holds the font catalog and the defaults every
/// document it constructs starts from.
pub struct Linework {
    fonts: Arc<FontCatalog>,
    background: Option<Color>,
    dpi: f32,
    debug: Option<DebugLogger>,
}

#[derive(Clone)]
pub struct LineworkBuilder {
    font_dirs: Vec<PathBuf>,
    font_files: Vec<PathBuf>,
    font_bytes: Vec<(String, Vec<u8>)>,
    background: Option<Color>,
    dpi: f32,
    debug_path: Option<PathBuf>,
}

impl LineworkBuilder {
    pub fn new() -> Self {
        Self {
            font_dirs: Vec::new(),
            font_files: Vec::new(),
            font_bytes: Vec::new(),
            background: None,
            dpi: 96.0,
            debug_path: None,
        }
    }

    pub fn register_font_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_dirs.push(path.into());
        self
    }

    pub fn register_font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    pub fn register_font_bytes(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.font_bytes.push((name.into(), data));
        self
    }

    /// Background color rasters are cleared to before painting. Documents
    /// default to a transparent raster when none is set.
    pub fn background(mut self, color: Color) -> Self {
        self.background = Some(color);
        self
    }

    /// Default rendering resolution for constructed documents. 96 dpi maps
    /// one user unit to one raster pixel.
    pub fn dpi(mut self, dpi: f32) -> Self {
        self.dpi = dpi;
        self
    }

    // Enable debug logging to a JSONL file for parse/render inspection.
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Linework, LineworkError> {
        if !self.dpi.is_finite() || self.dpi <= 0.0 {
            return Err(LineworkError::InvalidConfiguration(format!(
                "dpi must be finite and positive (got {})",
                self.dpi
            )));
        }
        let mut catalog = FontCatalog::new();
        for dir in &self.font_dirs {
            catalog.register_dir(dir)?;
        }
        for file in &self.font_files {
            catalog.register_file(file)?;
        }
        for (name, data) in self.font_bytes {
            catalog.register_bytes(&name, data)?;
        }
        let debug = match self.debug_path {
            Some(path) => Some(DebugLogger::new(path)?),
            None => None,
        };
        Ok(Linework {
            fonts: Arc::new(catalog),
            background: self.background,
            dpi: self.dpi,
            debug,
        })
    }
}

impl Default for LineworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Linework {
    pub fn builder() -> LineworkBuilder {
        LineworkBuilder::new()
    }

    pub fn fonts(&self) -> &FontCatalog {
        &self.fonts
    }

    /// Starts an empty document with the given raster size in pixels.
    pub fn new_document(&self, width: f32, height: f32) -> Document {
        let mut doc = Document::new(Size::new(width, height));
        self.decorate(&mut doc);
        doc
    }

    /// Loads a document from an SVG file. Relative image hrefs inside it
    /// resolve against the file's directory.
    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<Document, LineworkError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut doc = reader::parse_svg(&text, self.debug.clone())?;
        doc.base_dir = path.parent().map(Path::to_path_buf);
        self.decorate(&mut doc);
        Ok(doc)
    }

    pub fn open_bytes(&self, bytes: &[u8]) -> Result<Document, LineworkError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| LineworkError::Parse(format!("document is not valid UTF-8: {e}")))?;
        let mut doc = reader::parse_svg(text, self.debug.clone())?;
        self.decorate(&mut doc);
        Ok(doc)
    }

    pub fn open_reader<R: Read>(&self, mut reader: R) -> Result<Document, LineworkError> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        let mut doc = reader::parse_svg(&text, self.debug.clone())?;
        self.decorate(&mut doc);
        Ok(doc)
    }

    fn decorate(&self, doc: &mut Document) {
        doc.fonts = Arc::clone(&self.fonts);
        doc.debug = self.debug.clone();
        doc.background = self.background;
        doc.set_dpi(self.dpi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Linework {
        match Linework::builder().build() {
            Ok(engine) => engine,
            Err(e) => panic!("default engine should build: {e:?}"),
        }
    }

    #[test]
    fn builder_rejects_bad_dpi() {
        let err = Linework::builder().dpi(0.0).build();
        assert!(matches!(
            err,
            Err(LineworkError::InvalidConfiguration(_))
        ));
        let err = Linework::builder().dpi(f32::NAN).build();
        assert!(matches!(
            err,
            Err(LineworkError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn new_document_carries_engine_defaults() {
        let engine = match Linework::builder()
            .background(Color::WHITE)
            .dpi(192.0)
            .build()
        {
            Ok(engine) => engine,
            Err(e) => panic!("engine should build: {e:?}"),
        };
        let doc = engine.new_document(320.0, 200.0);
        assert_eq!(doc.raster_size(), Size::new(320.0, 200.0));
        assert_eq!(doc.background, Some(Color::WHITE));
        assert_eq!(doc.dpi(), 192.0);
    }

    #[test]
    fn open_bytes_parses_minimal_document() {
        let engine = engine();
        let doc = engine
            .open_bytes(b"<svg width=\"64\" height=\"48\"><rect x=\"1\" y=\"2\" width=\"10\" height=\"20\"/></svg>")
            .unwrap();
        assert_eq!(doc.raster_size(), Size::new(64.0, 48.0));
        assert_eq!(doc.node(doc.root()).children.len(), 1);
    }

    #[test]
    fn open_bytes_rejects_invalid_utf8() {
        let engine = engine();
        let err = engine.open_bytes(&[0x3c, 0xff, 0xfe]);
        assert!(matches!(err, Err(LineworkError::Parse(_))));
    }

    #[test]
    fn open_reader_matches_open_bytes() {
        let engine = engine();
        let svg = b"<svg width=\"10\" height=\"10\"><circle cx=\"5\" cy=\"5\" r=\"4\"/></svg>";
        let from_bytes = engine.open_bytes(svg).unwrap();
        let from_reader = engine.open_reader(&svg[..]).unwrap();
        assert_eq!(from_bytes.node_count(), from_reader.node_count());
    }

    #[test]
    fn register_font_bytes_rejects_garbage() {
        let err = Linework::builder()
            .register_font_bytes("bogus", vec![0u8; 8])
            .build();
        assert!(matches!(
            err,
            Err(LineworkError::InvalidConfiguration(_))
        ));
    }
}
