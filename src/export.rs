//! Flattening a composition to a bitmap.
//!
//! Captions are laid out as an SVG overlay the size of the template and rasterized with resvg
//! straight onto the template pixels, so text shaping and stroking come from usvg's text stack.

use crate::composer::{Color, ComposeError, TextField};
use image::RgbaImage;
use kurbo::Point;
use std::{
    fmt::Write as _,
    io::Cursor,
    sync::{Arc, OnceLock},
};

const FONT_FAMILY: &str = "Impact, Anton, 'Oswald', 'Arial Black', 'DejaVu Sans', sans-serif";
const STROKE_COLOR: Color = Color::BLACK;

/// One caption, resolved to native pixel space.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionPlacement {
    pub text: String,
    pub center: Point,
    pub font_px: f64,
    pub stroke_px: f64,
    pub color: Color,
}

pub fn stroke_width(font_px: f64) -> f64 {
    (font_px * 0.075).max(2.0)
}

/// Resolves fields against a `width`x`height` surface. Fields without text are skipped.
/// `font_factor` converts authored (display) font sizes to export sizes.
pub fn caption_placements(fields: &[TextField], width: u32, height: u32, font_factor: f64) -> Vec<CaptionPlacement> {
    fields
        .iter()
        .filter(|f| !f.text.trim().is_empty())
        .map(|f| {
            let font_px = f.font_size * font_factor;
            CaptionPlacement {
                text: f.text.to_uppercase(),
                center: Point::new(
                    f.position.x / 100.0 * f64::from(width),
                    f.position.y / 100.0 * f64::from(height),
                ),
                font_px,
                stroke_px: stroke_width(font_px),
                color: f.color,
            }
        })
        .collect()
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// An SVG document drawing every caption stroked first, then filled on top.
pub fn overlay_svg(placements: &[CaptionPlacement], width: u32, height: u32) -> String {
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#
    );
    for p in placements {
        let text = escape_xml(&p.text);
        let common = format!(
            r#"x="{:.2}" y="{:.2}" font-family="{}" font-size="{:.2}" font-weight="bold" font-stretch="condensed" text-anchor="middle" dominant-baseline="central" xml:space="preserve""#,
            p.center.x, p.center.y, FONT_FAMILY, p.font_px
        );
        let _ = write!(
            svg,
            r#"<text {common} fill="none" stroke="{STROKE_COLOR}" stroke-width="{:.2}" stroke-linejoin="round">{text}</text>"#,
            p.stroke_px
        );
        let _ = write!(svg, r#"<text {common} fill="{}">{text}</text>"#, p.color);
    }
    svg.push_str("</svg>");
    svg
}

fn font_db() -> Arc<usvg::fontdb::Database> {
    static FONTS: OnceLock<Arc<usvg::fontdb::Database>> = OnceLock::new();
    FONTS
        .get_or_init(|| {
            let mut db = usvg::fontdb::Database::new();
            db.load_system_fonts();
            tracing::debug!(faces = db.len(), "Loaded system fonts");
            Arc::new(db)
        })
        .clone()
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        for c in &mut px[..3] {
            *c = ((*c as u16 * a + 127) / 255) as u8;
        }
    }
}

fn demultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 || a == 255 {
            continue;
        }
        for c in &mut px[..3] {
            *c = ((*c as u16 * 255 + a / 2) / a).min(255) as u8;
        }
    }
}

/// Draws `placements` over a copy of `base`.
pub fn render(base: &RgbaImage, placements: &[CaptionPlacement]) -> Result<RgbaImage, ComposeError> {
    let (width, height) = base.dimensions();
    if placements.is_empty() {
        return Ok(base.clone());
    }

    let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height).ok_or(ComposeError::Surface(width, height))?;
    pixmap.data_mut().copy_from_slice(base.as_raw());
    premultiply_rgba8_in_place(pixmap.data_mut());

    let opts = usvg::Options {
        fontdb: font_db(),
        ..Default::default()
    };
    let tree = usvg::Tree::from_str(&overlay_svg(placements, width, height), &opts)?;
    resvg::render(&tree, resvg::tiny_skia::Transform::identity(), &mut pixmap.as_mut());

    let mut rgba = pixmap.take();
    demultiply_rgba8_in_place(&mut rgba);
    RgbaImage::from_raw(width, height, rgba).ok_or(ComposeError::Surface(width, height))
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, ComposeError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(ComposeError::Encode)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::FieldId;

    fn field(text: &str, x: f64, y: f64) -> TextField {
        TextField {
            id: FieldId(0),
            text: text.into(),
            position: Point::new(x, y),
            font_size: 40.0,
            color: Color::WHITE,
        }
    }

    #[test]
    fn placement_maps_percentages_to_native_pixels() {
        let fields = vec![field("top", 50.0, 15.0), field("", 10.0, 10.0), field("bottom", 25.0, 85.0)];
        let placed = caption_placements(&fields, 1200, 600, 2.0);

        assert_eq!(placed.len(), 2);
        assert_eq!(placed[0].center, Point::new(600.0, 90.0));
        assert_eq!(placed[1].center, Point::new(300.0, 510.0));
        assert_eq!(placed[0].text, "TOP");
        assert!((placed[0].font_px - 80.0).abs() < 1e-9);
        assert!((placed[0].stroke_px - 6.0).abs() < 1e-9);
    }

    #[test]
    fn stroke_has_a_floor() {
        assert_eq!(stroke_width(10.0), 2.0);
        assert!((stroke_width(100.0) - 7.5).abs() < 1e-9);
    }

    #[test]
    fn overlay_escapes_markup_and_strokes_before_fill() {
        let placed = caption_placements(&[field("<b> & \"q\"", 50.0, 50.0)], 100, 100, 1.0);
        let svg = overlay_svg(&placed, 100, 100);
        assert!(svg.contains("&lt;B&gt; &amp; &quot;Q&quot;"));
        let stroke = svg.find("stroke=\"#000000\"").unwrap();
        let fill = svg.find("fill=\"#FFFFFF\"").unwrap();
        assert!(stroke < fill);
        assert!(usvg::Tree::from_str(&svg, &usvg::Options::default()).is_ok());
    }

    #[test]
    fn caption_is_drawn_around_its_center_only() {
        let base = RgbaImage::from_pixel(200, 100, image::Rgba([10, 20, 30, 255]));
        let mut caption = field("hello", 50.0, 50.0);
        caption.color = Color { r: 255, g: 0, b: 0 };
        let placed = caption_placements(&[caption], 200, 100, 1.0);
        let out = render(&base, &placed).unwrap();

        let near_center: Vec<_> = (30..70)
            .flat_map(|y| (40..160).map(move |x| (x, y)))
            .map(|(x, y)| *out.get_pixel(x, y))
            .collect();
        let changed = near_center.iter().filter(|px| **px != *base.get_pixel(0, 0)).count();
        assert!(changed > 100, "only {changed} pixels changed, is a font installed?");
        assert!(near_center.iter().any(|px| px.0 == [255, 0, 0, 255]));

        for (x, y) in [(0, 0), (199, 0), (0, 99), (199, 99)] {
            assert_eq!(out.get_pixel(x, y), base.get_pixel(x, y));
        }
    }

    #[test]
    fn render_without_captions_is_a_copy() {
        let base = RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 255]));
        assert_eq!(render(&base, &[]).unwrap(), base);
    }

    #[test]
    fn opaque_pixels_survive_the_premultiply_round_trip() {
        let mut data = vec![10, 200, 30, 255, 0, 0, 0, 0];
        premultiply_rgba8_in_place(&mut data);
        demultiply_rgba8_in_place(&mut data);
        assert_eq!(data, vec![10, 200, 30, 255, 0, 0, 0, 0]);
    }

    #[test]
    fn png_encoding_decodes_back() {
        let img = RgbaImage::from_pixel(5, 4, image::Rgba([9, 9, 9, 255]));
        let png = encode_png(&img).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (5, 4));
    }
}
