use std::path::Path as FsPath;

use tiny_skia::{
    FillRule, FilterQuality, LineCap, LineJoin, LinearGradient, Mask, Paint, PathBuilder, Pixmap,
    PixmapPaint, RadialGradient, SpreadMode, Stroke, StrokeDash, Transform,
};

use crate::error::LineworkError;
use crate::painter::{Painter, StrokeProps};
use crate::path::ArcSegment;
use crate::transform::Matrix;
use crate::types::{BBox, Color, GradientStop, ImageData, PaintSource, Point, Shading};

/// Finished render output: straight-alpha RGBA8 rows, top-left origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Raster {
    /// Encodes to the format implied by the file extension. PNG keeps the
    /// alpha channel; JPEG flattens it against white.
    pub fn save_file(&self, path: &FsPath) -> Result<(), LineworkError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let img = image::RgbaImage::from_raw(self.width, self.height, self.rgba.clone())
            .ok_or_else(|| {
                LineworkError::Raster(format!(
                    "pixel buffer does not match {}x{}",
                    self.width, self.height
                ))
            })?;
        match ext.as_str() {
            "png" => img
                .save(path)
                .map_err(|e| LineworkError::Raster(format!("png encode failed: {e}"))),
            "jpg" | "jpeg" => {
                let mut flat = image::RgbImage::new(self.width, self.height);
                for (x, y, px) in img.enumerate_pixels() {
                    let a = px[3] as u32;
                    let blend = |c: u8| ((c as u32 * a + 255 * (255 - a)) / 255) as u8;
                    flat.put_pixel(x, y, image::Rgb([blend(px[0]), blend(px[1]), blend(px[2])]));
                }
                flat.save(path)
                    .map_err(|e| LineworkError::Raster(format!("jpeg encode failed: {e}")))
            }
            other => Err(LineworkError::InvalidConfiguration(format!(
                "unsupported raster format '{other}', use png or jpeg"
            ))),
        }
    }
}

/// Decodes an `image` element source: `data:` URIs inline, anything else as
/// a filesystem path relative to `base_dir`.
pub(crate) fn load_image_data(href: &str, base_dir: Option<&FsPath>) -> Option<ImageData> {
    let bytes = if let Some(bytes) = parse_data_uri(href) {
        bytes
    } else if href.contains("://") {
        return None;
    } else {
        let path = match base_dir {
            Some(dir) => dir.join(href),
            None => FsPath::new(href).to_path_buf(),
        };
        std::fs::read(path).ok()?
    };
    decode_image_bytes(&bytes)
}

pub(crate) fn parse_data_uri(href: &str) -> Option<Vec<u8>> {
    let rest = href.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    if meta.ends_with(";base64") {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim().as_bytes())
            .ok()
    } else {
        Some(payload.as_bytes().to_vec())
    }
}

pub(crate) fn decode_image_bytes(bytes: &[u8]) -> Option<ImageData> {
    let img = image::load_from_memory(bytes).ok()?;
    let rgba = img.to_rgba8();
    Some(ImageData {
        width: rgba.width(),
        height: rgba.height(),
        rgba: rgba.into_raw(),
    })
}

#[derive(Clone)]
struct PainterState {
    transform: Transform,
    fill: PaintSource,
    stroke: PaintSource,
    fill_opacity: f32,
    stroke_opacity: f32,
    stroke_props: StrokeProps,
    clip_mask: Option<Mask>,
}

impl Default for PainterState {
    fn default() -> Self {
        Self {
            transform: Transform::identity(),
            fill: PaintSource::Solid(Color::BLACK),
            stroke: PaintSource::None,
            fill_opacity: 1.0,
            stroke_opacity: 1.0,
            stroke_props: StrokeProps::default(),
            clip_mask: None,
        }
    }
}

struct Layer {
    pixmap: Pixmap,
    opacity: f32,
}

/// tiny-skia backend. Owns the pixmap; `finish` hands the pixels back as a
/// straight-alpha `Raster`.
pub struct RasterPainter {
    pixmap: Pixmap,
    state: PainterState,
    stack: Vec<PainterState>,
    layers: Vec<Layer>,
    builder: PathBuilder,
    has_path: bool,
}

fn to_sk(m: &Matrix) -> Transform {
    Transform::from_row(m.a, m.b, m.c, m.d, m.e, m.f)
}

fn to_sk_color(color: Color, opacity: f32) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba(
        color.r.clamp(0.0, 1.0),
        color.g.clamp(0.0, 1.0),
        color.b.clamp(0.0, 1.0),
        opacity.clamp(0.0, 1.0),
    )
    .unwrap_or_else(|| tiny_skia::Color::from_rgba8(0, 0, 0, 255))
}

fn shading_stops(stops: &[GradientStop], opacity: f32) -> Vec<tiny_skia::GradientStop> {
    if stops.is_empty() {
        return vec![
            tiny_skia::GradientStop::new(0.0, to_sk_color(Color::BLACK, opacity)),
            tiny_skia::GradientStop::new(1.0, to_sk_color(Color::BLACK, opacity)),
        ];
    }
    stops
        .iter()
        .map(|stop| {
            tiny_skia::GradientStop::new(
                stop.offset.clamp(0.0, 1.0),
                to_sk_color(stop.color, stop.opacity * opacity),
            )
        })
        .collect()
}

fn build_paint(source: &PaintSource, opacity: f32) -> Option<Paint<'static>> {
    let mut paint = Paint::default();
    paint.anti_alias = true;
    match source {
        PaintSource::None => return None,
        PaintSource::Solid(color) => paint.set_color(to_sk_color(*color, opacity)),
        PaintSource::Gradient(shading) => {
            paint.shader = build_shading_shader(shading, opacity)?;
        }
    }
    Some(paint)
}

fn build_shading_shader(shading: &Shading, opacity: f32) -> Option<tiny_skia::Shader<'static>> {
    match shading {
        Shading::Axial { start, end, stops } => LinearGradient::new(
            tiny_skia::Point::from_xy(start.x, start.y),
            tiny_skia::Point::from_xy(end.x, end.y),
            shading_stops(stops, opacity),
            SpreadMode::Pad,
            Transform::identity(),
        ),
        Shading::Radial {
            center,
            focal,
            radius,
            stops,
        } => RadialGradient::new(
            tiny_skia::Point::from_xy(focal.x, focal.y),
            tiny_skia::Point::from_xy(center.x, center.y),
            radius.max(0.0001),
            shading_stops(stops, opacity),
            SpreadMode::Pad,
            Transform::identity(),
        ),
    }
}

fn build_stroke(props: &StrokeProps) -> Stroke {
    let mut stroke = Stroke {
        width: props.width.max(0.0),
        miter_limit: props.miter_limit.max(0.0),
        ..Stroke::default()
    };
    stroke.line_cap = match props.cap {
        1 => LineCap::Round,
        2 => LineCap::Square,
        _ => LineCap::Butt,
    };
    stroke.line_join = match props.join {
        1 => LineJoin::Round,
        2 => LineJoin::Bevel,
        _ => LineJoin::Miter,
    };
    if !props.dash.is_empty() {
        let mut pattern: Vec<f32> = props.dash.iter().map(|p| p.abs().max(0.0)).collect();
        if pattern.len() % 2 == 1 {
            let copy = pattern.clone();
            pattern.extend(copy);
        }
        if pattern.len() >= 2 {
            stroke.dash = StrokeDash::new(pattern, props.dash_offset);
        }
    }
    stroke
}

impl RasterPainter {
    pub fn new(width: u32, height: u32, background: Option<Color>) -> Result<Self, LineworkError> {
        let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
            LineworkError::InvalidConfiguration(format!("invalid raster size {width}x{height}"))
        })?;
        if let Some(color) = background {
            pixmap.fill(to_sk_color(color, 1.0));
        }
        Ok(Self {
            pixmap,
            state: PainterState::default(),
            stack: Vec::new(),
            layers: Vec::new(),
            builder: PathBuilder::new(),
            has_path: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Demultiplies the pixmap back to straight alpha.
    pub fn finish(self) -> Raster {
        let width = self.pixmap.width();
        let height = self.pixmap.height();
        let mut rgba = Vec::with_capacity((width * height * 4) as usize);
        for px in self.pixmap.pixels() {
            let c = px.demultiply();
            rgba.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
        }
        Raster {
            width,
            height,
            rgba,
        }
    }

    fn take_path(&mut self) -> Option<tiny_skia::Path> {
        let builder = std::mem::replace(&mut self.builder, PathBuilder::new());
        let had_path = std::mem::replace(&mut self.has_path, false);
        if !had_path {
            return None;
        }
        builder.finish()
    }

    fn fill_with(&mut self, path: &tiny_skia::Path, evenodd: bool) {
        let Some(paint) = build_paint(&self.state.fill, self.state.fill_opacity) else {
            return;
        };
        let rule = if evenodd {
            FillRule::EvenOdd
        } else {
            FillRule::Winding
        };
        self.pixmap.fill_path(
            path,
            &paint,
            rule,
            self.state.transform,
            self.state.clip_mask.as_ref(),
        );
    }

    fn stroke_with(&mut self, path: &tiny_skia::Path) {
        let Some(paint) = build_paint(&self.state.stroke, self.state.stroke_opacity) else {
            return;
        };
        let stroke = build_stroke(&self.state.stroke_props);
        if stroke.width <= 0.0 {
            return;
        }
        self.pixmap.stroke_path(
            path,
            &paint,
            &stroke,
            self.state.transform,
            self.state.clip_mask.as_ref(),
        );
    }
}

impl Painter for RasterPainter {
    fn save(&mut self) {
        self.stack.push(self.state.clone());
    }

    fn restore(&mut self) {
        if let Some(prev) = self.stack.pop() {
            self.state = prev;
        }
    }

    fn concat(&mut self, m: &Matrix) {
        self.state.transform = self.state.transform.pre_concat(to_sk(m));
    }

    fn set_fill(&mut self, paint: &PaintSource) {
        self.state.fill = paint.clone();
    }

    fn set_stroke(&mut self, paint: &PaintSource) {
        self.state.stroke = paint.clone();
    }

    fn set_stroke_props(&mut self, props: &StrokeProps) {
        self.state.stroke_props = props.clone();
    }

    fn set_opacity(&mut self, fill: f32, stroke: f32) {
        self.state.fill_opacity = fill.clamp(0.0, 1.0);
        self.state.stroke_opacity = stroke.clamp(0.0, 1.0);
    }

    fn push_group(&mut self, opacity: f32) {
        let Some(fresh) = Pixmap::new(self.pixmap.width(), self.pixmap.height()) else {
            return;
        };
        let parent = std::mem::replace(&mut self.pixmap, fresh);
        self.layers.push(Layer {
            pixmap: parent,
            opacity: opacity.clamp(0.0, 1.0),
        });
    }

    fn pop_group(&mut self) {
        let Some(layer) = self.layers.pop() else {
            return;
        };
        let child = std::mem::replace(&mut self.pixmap, layer.pixmap);
        let paint = PixmapPaint {
            opacity: layer.opacity,
            ..PixmapPaint::default()
        };
        self.pixmap
            .draw_pixmap(0, 0, child.as_ref(), &paint, Transform::identity(), None);
    }

    fn move_to(&mut self, p: Point) {
        self.builder.move_to(p.x, p.y);
        self.has_path = true;
    }

    fn line_to(&mut self, p: Point) {
        self.builder.line_to(p.x, p.y);
        self.has_path = true;
    }

    fn cubic_to(&mut self, c1: Point, c2: Point, p: Point) {
        self.builder.cubic_to(c1.x, c1.y, c2.x, c2.y, p.x, p.y);
        self.has_path = true;
    }

    fn quad_to(&mut self, c: Point, p: Point) {
        self.builder.quad_to(c.x, c.y, p.x, p.y);
        self.has_path = true;
    }

    fn arc_to(&mut self, arc: &ArcSegment) {
        for [c1, c2, end] in arc.to_cubics() {
            self.builder.cubic_to(c1.x, c1.y, c2.x, c2.y, end.x, end.y);
        }
        self.has_path = true;
    }

    fn close_path(&mut self) {
        self.builder.close();
    }

    fn fill_path(&mut self, evenodd: bool) {
        if let Some(path) = self.take_path() {
            self.fill_with(&path, evenodd);
        }
    }

    fn stroke_path(&mut self) {
        if let Some(path) = self.take_path() {
            self.stroke_with(&path);
        }
    }

    fn fill_stroke_path(&mut self, evenodd: bool) {
        if let Some(path) = self.take_path() {
            self.fill_with(&path, evenodd);
            self.stroke_with(&path);
        }
    }

    fn clip_current_path(&mut self, evenodd: bool) {
        let Some(path) = self.take_path() else {
            return;
        };
        let rule = if evenodd {
            FillRule::EvenOdd
        } else {
            FillRule::Winding
        };
        if let Some(mask) = self.state.clip_mask.as_mut() {
            mask.intersect_path(&path, rule, true, self.state.transform);
            return;
        }
        let Some(mut mask) = Mask::new(self.pixmap.width(), self.pixmap.height()) else {
            return;
        };
        mask.fill_path(&path, rule, true, self.state.transform);
        self.state.clip_mask = Some(mask);
    }

    fn draw_image(&mut self, rect: &BBox, image: &ImageData) {
        if image.width == 0 || image.height == 0 || rect.is_empty() {
            return;
        }
        let Some(mut src) = Pixmap::new(image.width, image.height) else {
            return;
        };
        let pixels = src.pixels_mut();
        for (i, chunk) in image.rgba.chunks_exact(4).enumerate() {
            if i >= pixels.len() {
                break;
            }
            let color = tiny_skia::ColorU8::from_rgba(chunk[0], chunk[1], chunk[2], chunk[3]);
            pixels[i] = color.premultiply();
        }
        let sx = rect.width / image.width as f32;
        let sy = rect.height / image.height as f32;
        let place = Transform::from_translate(rect.x, rect.y).pre_scale(sx, sy);
        let paint = PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        self.pixmap.draw_pixmap(
            0,
            0,
            src.as_ref(),
            &paint,
            self.state.transform.pre_concat(place),
            self.state.clip_mask.as_ref(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(raster: &Raster, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * raster.width + x) * 4) as usize;
        [
            raster.rgba[i],
            raster.rgba[i + 1],
            raster.rgba[i + 2],
            raster.rgba[i + 3],
        ]
    }

    fn fill_rect(p: &mut RasterPainter, b: BBox) {
        p.move_to(Point::new(b.x, b.y));
        p.line_to(Point::new(b.max_x(), b.y));
        p.line_to(Point::new(b.max_x(), b.max_y()));
        p.line_to(Point::new(b.x, b.max_y()));
        p.close_path();
        p.fill_path(false);
    }

    #[test]
    fn solid_fill_covers_rect() {
        let mut p = RasterPainter::new(10, 10, None).unwrap();
        p.set_fill(&PaintSource::Solid(Color::rgb(1.0, 0.0, 0.0)));
        fill_rect(&mut p, BBox::from_xywh(0.0, 0.0, 10.0, 5.0));
        let raster = p.finish();
        assert_eq!(pixel(&raster, 5, 2), [255, 0, 0, 255]);
        assert_eq!(pixel(&raster, 5, 8), [0, 0, 0, 0]);
    }

    #[test]
    fn background_fills_whole_surface() {
        let p = RasterPainter::new(4, 4, Some(Color::WHITE)).unwrap();
        let raster = p.finish();
        assert_eq!(pixel(&raster, 3, 3), [255, 255, 255, 255]);
    }

    #[test]
    fn transform_moves_drawing() {
        let mut p = RasterPainter::new(10, 10, None).unwrap();
        p.set_fill(&PaintSource::Solid(Color::rgb(0.0, 1.0, 0.0)));
        p.concat(&Matrix::translate(5.0, 5.0));
        fill_rect(&mut p, BBox::from_xywh(0.0, 0.0, 3.0, 3.0));
        let raster = p.finish();
        assert_eq!(pixel(&raster, 6, 6), [0, 255, 0, 255]);
        assert_eq!(pixel(&raster, 1, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn clip_limits_fill() {
        let mut p = RasterPainter::new(10, 10, None).unwrap();
        // Clip to the left half, then fill everything.
        fill_rect_path(&mut p, BBox::from_xywh(0.0, 0.0, 5.0, 10.0));
        p.clip_current_path(false);
        p.set_fill(&PaintSource::Solid(Color::rgb(0.0, 0.0, 1.0)));
        fill_rect(&mut p, BBox::from_xywh(0.0, 0.0, 10.0, 10.0));
        let raster = p.finish();
        assert_eq!(pixel(&raster, 2, 5), [0, 0, 255, 255]);
        assert_eq!(pixel(&raster, 8, 5), [0, 0, 0, 0]);
    }

    fn fill_rect_path(p: &mut RasterPainter, b: BBox) {
        p.move_to(Point::new(b.x, b.y));
        p.line_to(Point::new(b.max_x(), b.y));
        p.line_to(Point::new(b.max_x(), b.max_y()));
        p.line_to(Point::new(b.x, b.max_y()));
        p.close_path();
    }

    #[test]
    fn group_opacity_blends() {
        let mut p = RasterPainter::new(4, 4, Some(Color::WHITE)).unwrap();
        p.push_group(0.5);
        p.set_fill(&PaintSource::Solid(Color::BLACK));
        fill_rect(&mut p, BBox::from_xywh(0.0, 0.0, 4.0, 4.0));
        p.pop_group();
        let raster = p.finish();
        let px = pixel(&raster, 2, 2);
        // Half-opaque black over white lands mid-gray.
        assert!(px[0] > 100 && px[0] < 155, "got {px:?}");
    }

    #[test]
    fn linear_gradient_interpolates() {
        let mut p = RasterPainter::new(10, 1, None).unwrap();
        let stops = vec![
            GradientStop {
                offset: 0.0,
                color: Color::rgb(0.0, 0.0, 0.0),
                opacity: 1.0,
            },
            GradientStop {
                offset: 1.0,
                color: Color::rgb(1.0, 1.0, 1.0),
                opacity: 1.0,
            },
        ];
        p.set_fill(&PaintSource::Gradient(Shading::Axial {
            start: Point::new(0.0, 0.0),
            end: Point::new(10.0, 0.0),
            stops,
        }));
        fill_rect(&mut p, BBox::from_xywh(0.0, 0.0, 10.0, 1.0));
        let raster = p.finish();
        let left = pixel(&raster, 0, 0)[0];
        let right = pixel(&raster, 9, 0)[0];
        assert!(left < 40, "left {left}");
        assert!(right > 215, "right {right}");
    }

    #[test]
    fn data_uri_roundtrip() {
        use base64::Engine as _;
        // 1x1 red PNG.
        let mut png = Vec::new();
        let img = image::RgbaImage::from_pixel(1, 1, image::Rgba([255, 0, 0, 255]));
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let uri = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&png)
        );
        let bytes = parse_data_uri(&uri).unwrap();
        let data = decode_image_bytes(&bytes).unwrap();
        assert_eq!((data.width, data.height), (1, 1));
        assert_eq!(&data.rgba[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn unsupported_save_format_errors() {
        let raster = Raster {
            width: 1,
            height: 1,
            rgba: vec![0, 0, 0, 0],
        };
        let err = raster.save_file(FsPath::new("/tmp/out.gif"));
        assert!(matches!(err, Err(LineworkError::InvalidConfiguration(_))));
    }
}
