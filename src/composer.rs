//! Caption layout over a template image.
//!
//! A [`Composer`] owns one composition session: the loaded template bitmap, its display scale,
//! and an ordered list of [`TextField`]s whose positions are stored as percentages of the image
//! so that the on-screen preview and the native-resolution export agree.

use crate::{catalog::Template, export, imagedata::ImageData};
use async_trait::async_trait;
use image::RgbaImage;
use kurbo::{Point, Rect, Size, Vec2};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("no template loaded")]
    NoTemplate,
    #[error("failed to fetch template image '{url}': {reason}")]
    Fetch { url: String, reason: String },
    #[error("failed to decode template image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("template image has no pixels")]
    EmptyImage,
    #[error("unknown text field {0}")]
    UnknownField(FieldId),
    #[error("a composition needs at least one text field")]
    LastField,
    #[error("invalid color '{0}', expected #rgb or #rrggbb")]
    InvalidColor(String),
    #[error("invalid font size {0}")]
    InvalidFontSize(f64),
    #[error("container has no area")]
    InvalidContainer,
    #[error("text field {0} is not being dragged")]
    NotDragging(FieldId),
    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("failed to allocate a {0}x{1} surface")]
    Surface(u32, u32),
    #[error("failed to lay out captions: {0}")]
    Overlay(#[from] usvg::Error),
}

/// An sRGB color, parsed from and printed as hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255 };
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
}

impl FromStr for Color {
    type Err = ComposeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ComposeError::InvalidColor(s.to_string());
        let hex = s.trim().strip_prefix('#').ok_or_else(invalid)?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |digits: &str| u8::from_str_radix(digits, 16).map_err(|_| invalid());
        match hex.len() {
            3 => {
                let expand = |i: usize| channel(hex[i..=i].repeat(2).as_str());
                Ok(Color {
                    r: expand(0)?,
                    g: expand(1)?,
                    b: expand(2)?,
                })
            }
            6 => Ok(Color {
                r: channel(&hex[0..2])?,
                g: channel(&hex[2..4])?,
                b: channel(&hex[4..6])?,
            }),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Identifies a text field within one composer. Never reused, even across template loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) u32);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextField {
    pub id: FieldId,
    pub text: String,
    /// Center of the caption, as percentages (0..=100) of the image width and height.
    pub position: Point,
    /// Font size in display pixels.
    pub font_size: f64,
    pub color: Color,
}

#[derive(Debug, Clone)]
pub struct ComposerOptions {
    pub max_display_width: f64,
    pub max_display_height: f64,
    /// Extra multiplier applied to every caption on export.
    pub font_scale: f64,
    pub default_color: Color,
}

impl Default for ComposerOptions {
    fn default() -> Self {
        Self {
            max_display_width: 600.0,
            max_display_height: 480.0,
            font_scale: 1.0,
            default_color: Color::WHITE,
        }
    }
}

/// Where template bytes come from.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ComposeError>;
}

/// Resolves `data:` URLs in place, fetches `http(s)` URLs, and reads anything else from disk.
#[derive(Debug, Clone, Default)]
pub struct DefaultImageSource {
    http: reqwest::Client,
}

impl DefaultImageSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageSource for DefaultImageSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ComposeError> {
        let fetch_err = |reason: String| ComposeError::Fetch {
            url: url.chars().take(80).collect(),
            reason,
        };

        if url.starts_with("data:") {
            return ImageData::parse(url)
                .map(|image| image.bytes)
                .map_err(|e| fetch_err(e.to_string()));
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            tracing::debug!(%url, "Fetching template image");
            let resp = self
                .http
                .get(url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| fetch_err(e.to_string()))?;
            let bytes = resp.bytes().await.map_err(|e| fetch_err(e.to_string()))?;
            return Ok(bytes.to_vec());
        }
        tokio::fs::read(url).await.map_err(|e| fetch_err(e.to_string()))
    }
}

#[derive(Debug, Clone)]
struct LoadedTemplate {
    template: Template,
    image: RgbaImage,
    display_scale: f64,
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    field: FieldId,
    grab: Vec2,
    container: Rect,
}

/// Default center for the `index`-th field: top, bottom, then middle.
fn default_position(index: usize) -> Point {
    match index {
        0 => Point::new(50.0, 15.0),
        1 => Point::new(50.0, 85.0),
        _ => Point::new(50.0, 50.0),
    }
}

pub struct Composer {
    options: ComposerOptions,
    loaded: Option<LoadedTemplate>,
    fields: Vec<TextField>,
    next_id: u32,
    drag: Option<Drag>,
}

impl Composer {
    pub fn new(options: ComposerOptions) -> Self {
        Composer {
            options,
            loaded: None,
            fields: Vec::new(),
            next_id: 0,
            drag: None,
        }
    }

    /// Fetches and decodes the template image. On failure the composer is left empty.
    pub async fn load_template(&mut self, template: &Template, source: &dyn ImageSource) -> Result<(), ComposeError> {
        match source.fetch(&template.url).await {
            Ok(bytes) => self.load_template_bytes(template, &bytes),
            Err(e) => {
                tracing::warn!(template = %template.name, error = %e, "Template image unavailable");
                self.reset();
                Err(e)
            }
        }
    }

    pub fn load_template_bytes(&mut self, template: &Template, bytes: &[u8]) -> Result<(), ComposeError> {
        self.reset();

        let image = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ComposeError::EmptyImage);
        }
        let display_scale = (self.options.max_display_width / f64::from(width))
            .min(self.options.max_display_height / f64::from(height))
            .min(1.0);

        tracing::debug!(template = %template.name, width, height, display_scale, "Loaded template");
        self.loaded = Some(LoadedTemplate {
            template: template.clone(),
            image,
            display_scale,
        });
        for _ in 0..template.slot_count.max(1) {
            self.push_field();
        }
        Ok(())
    }

    /// Back to the empty state. Field ids keep counting up.
    pub fn reset(&mut self) {
        self.loaded = None;
        self.fields.clear();
        self.drag = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn template(&self) -> Option<&Template> {
        self.loaded.as_ref().map(|l| &l.template)
    }

    pub fn native_size(&self) -> Option<(u32, u32)> {
        self.loaded.as_ref().map(|l| l.image.dimensions())
    }

    pub fn display_scale(&self) -> Option<f64> {
        self.loaded.as_ref().map(|l| l.display_scale)
    }

    /// Size of the on-screen preview.
    pub fn display_size(&self) -> Option<Size> {
        self.loaded.as_ref().map(|l| {
            let (w, h) = l.image.dimensions();
            Size::new(f64::from(w) * l.display_scale, f64::from(h) * l.display_scale)
        })
    }

    pub fn fields(&self) -> &[TextField] {
        &self.fields
    }

    pub fn field(&self, id: FieldId) -> Option<&TextField> {
        self.fields.iter().find(|f| f.id == id)
    }

    fn field_mut(&mut self, id: FieldId) -> Result<&mut TextField, ComposeError> {
        self.fields
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or(ComposeError::UnknownField(id))
    }

    fn default_font_size(&self) -> f64 {
        self.display_size().map_or(0.0, |size| size.width / 15.0)
    }

    fn push_field(&mut self) -> FieldId {
        let id = FieldId(self.next_id);
        self.next_id += 1;
        self.fields.push(TextField {
            id,
            text: String::new(),
            position: default_position(self.fields.len()),
            font_size: self.default_font_size(),
            color: self.options.default_color,
        });
        id
    }

    pub fn add_field(&mut self) -> Result<FieldId, ComposeError> {
        if !self.is_loaded() {
            return Err(ComposeError::NoTemplate);
        }
        Ok(self.push_field())
    }

    /// Removes a field. The last remaining field cannot be removed.
    pub fn remove_field(&mut self, id: FieldId) -> Result<(), ComposeError> {
        let index = self
            .fields
            .iter()
            .position(|f| f.id == id)
            .ok_or(ComposeError::UnknownField(id))?;
        if self.fields.len() <= 1 {
            return Err(ComposeError::LastField);
        }
        self.fields.remove(index);
        if self.drag.is_some_and(|d| d.field == id) {
            self.drag = None;
        }
        Ok(())
    }

    pub fn set_text(&mut self, id: FieldId, text: impl Into<String>) -> Result<(), ComposeError> {
        self.field_mut(id)?.text = text.into();
        Ok(())
    }

    pub fn set_color(&mut self, id: FieldId, color: Color) -> Result<(), ComposeError> {
        self.field_mut(id)?.color = color;
        Ok(())
    }

    pub fn set_font_size(&mut self, id: FieldId, font_size: f64) -> Result<(), ComposeError> {
        if !font_size.is_finite() || font_size <= 0.0 {
            return Err(ComposeError::InvalidFontSize(font_size));
        }
        self.field_mut(id)?.font_size = font_size;
        Ok(())
    }

    /// Recolors every field and uses `color` for fields added later.
    pub fn set_default_color(&mut self, color: Color) {
        self.options.default_color = color;
        for field in &mut self.fields {
            field.color = color;
        }
    }

    /// Starts dragging `id`. `container` is the preview's on-screen rectangle.
    pub fn begin_drag(&mut self, id: FieldId, pointer: Point, container: Rect) -> Result<(), ComposeError> {
        if container.width() <= 0.0 || container.height() <= 0.0 {
            return Err(ComposeError::InvalidContainer);
        }
        let position = self.field(id).ok_or(ComposeError::UnknownField(id))?.position;
        let anchor = container.origin()
            + Vec2::new(
                position.x / 100.0 * container.width(),
                position.y / 100.0 * container.height(),
            );
        self.drag = Some(Drag {
            field: id,
            grab: pointer - anchor,
            container,
        });
        Ok(())
    }

    /// Moves the dragged field so the grab point follows `pointer`, clamped to the image.
    pub fn move_field(&mut self, id: FieldId, pointer: Point) -> Result<(), ComposeError> {
        let drag = self
            .drag
            .filter(|d| d.field == id)
            .ok_or(ComposeError::NotDragging(id))?;

        let local = pointer - drag.container.origin() - drag.grab;
        let x = local.x / drag.container.width() * 100.0;
        let y = local.y / drag.container.height() * 100.0;
        if !x.is_finite() || !y.is_finite() {
            return Ok(());
        }

        self.field_mut(id)?.position = Point::new(x.clamp(0.0, 100.0), y.clamp(0.0, 100.0));
        Ok(())
    }

    pub fn end_drag(&mut self) {
        self.drag = None;
    }

    pub fn dragging(&self) -> Option<FieldId> {
        self.drag.map(|d| d.field)
    }

    /// Flattens template and captions at the template's native resolution.
    /// `None` when no template is loaded.
    pub fn export_final(&self) -> Result<Option<RgbaImage>, ComposeError> {
        let Some(loaded) = &self.loaded else {
            return Ok(None);
        };
        let (width, height) = loaded.image.dimensions();
        let font_factor = self.options.font_scale / loaded.display_scale;
        let placements = export::caption_placements(&self.fields, width, height, font_factor);
        export::render(&loaded.image, &placements).map(Some)
    }

    /// Caption texts in field order, empty ones included.
    pub fn caption_texts(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.text.clone()).collect()
    }

    /// First non-empty caption, used as the meme's name.
    pub fn display_name(&self) -> String {
        self.fields
            .iter()
            .map(|f| f.text.trim())
            .find(|t| !t.is_empty())
            .unwrap_or("Untitled Meme")
            .to_string()
    }
}

impl Default for Composer {
    fn default() -> Self {
        Self::new(ComposerOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png).unwrap();
        buf
    }

    fn template(slots: u32) -> Template {
        Template {
            id: "t".into(),
            name: "Test".into(),
            url: "unused".into(),
            slot_count: slots,
        }
    }

    fn loaded(width: u32, height: u32, slots: u32) -> Composer {
        let mut composer = Composer::default();
        composer.load_template_bytes(&template(slots), &png(width, height)).unwrap();
        composer
    }

    #[test]
    fn parses_hex_colors() {
        assert_eq!("#fff".parse::<Color>().unwrap(), Color::WHITE);
        assert_eq!("#FF8000".parse::<Color>().unwrap(), Color { r: 255, g: 128, b: 0 });
        assert_eq!(Color { r: 255, g: 128, b: 0 }.to_string(), "#FF8000");
        for bad in ["fff", "#ff", "#ggg", "#12345", "#1234567", "#+12345"] {
            assert!(bad.parse::<Color>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn load_sets_scale_and_default_fields() {
        let composer = loaded(1200, 600, 3);
        assert_eq!(composer.native_size(), Some((1200, 600)));
        assert_eq!(composer.display_scale(), Some(0.5));

        let fields = composer.fields();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].position, Point::new(50.0, 15.0));
        assert_eq!(fields[1].position, Point::new(50.0, 85.0));
        assert_eq!(fields[2].position, Point::new(50.0, 50.0));
        assert!((fields[0].font_size - 40.0).abs() < 1e-9);
        assert_eq!(fields[0].color, Color::WHITE);
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let composer = loaded(100, 50, 0);
        assert_eq!(composer.display_scale(), Some(1.0));
        // Zero slots still yields one field.
        assert_eq!(composer.fields().len(), 1);
    }

    #[test]
    fn failed_load_leaves_placeholder_state() {
        let mut composer = loaded(100, 100, 2);
        assert!(composer.load_template_bytes(&template(2), b"not an image").is_err());
        assert!(!composer.is_loaded());
        assert!(composer.fields().is_empty());
        assert!(composer.export_final().unwrap().is_none());
    }

    #[test]
    fn last_field_cannot_be_removed() {
        let mut composer = loaded(100, 100, 2);
        let ids: Vec<FieldId> = composer.fields().iter().map(|f| f.id).collect();
        composer.remove_field(ids[0]).unwrap();
        assert!(matches!(composer.remove_field(ids[1]), Err(ComposeError::LastField)));
        assert_eq!(composer.fields().len(), 1);
    }

    #[test]
    fn field_ids_are_never_reused() {
        let mut composer = loaded(100, 100, 1);
        let first = composer.fields()[0].id;
        let added = composer.add_field().unwrap();
        composer.remove_field(added).unwrap();
        let again = composer.add_field().unwrap();
        assert_ne!(added, again);
        assert_ne!(first, again);
    }

    #[test]
    fn drag_follows_pointer_and_keeps_grab_offset() {
        let mut composer = loaded(200, 100, 1);
        let id = composer.fields()[0].id;
        let container = Rect::new(10.0, 20.0, 210.0, 120.0);

        // Field at 50%/15% -> top-left (110, 35). Grab 5px right and 2px down of it.
        composer.begin_drag(id, Point::new(115.0, 37.0), container).unwrap();
        composer.move_field(id, Point::new(65.0, 72.0)).unwrap();
        let position = composer.field(id).unwrap().position;
        assert!((position.x - 25.0).abs() < 1e-9);
        assert!((position.y - 50.0).abs() < 1e-9);

        composer.end_drag();
        assert!(matches!(
            composer.move_field(id, Point::new(0.0, 0.0)),
            Err(ComposeError::NotDragging(_))
        ));
    }

    #[test]
    fn drag_is_clamped_to_the_image() {
        let mut composer = loaded(200, 100, 1);
        let id = composer.fields()[0].id;
        let container = Rect::new(0.0, 0.0, 200.0, 100.0);
        composer.begin_drag(id, Point::new(100.0, 15.0), container).unwrap();

        for pointer in [
            Point::new(-1e6, -1e6),
            Point::new(1e6, 1e6),
            Point::new(-50.0, 500.0),
            Point::new(f64::NAN, 10.0),
        ] {
            composer.move_field(id, pointer).unwrap();
            let p = composer.field(id).unwrap().position;
            assert!((0.0..=100.0).contains(&p.x) && (0.0..=100.0).contains(&p.y));
        }
    }

    #[test]
    fn only_the_dragged_field_moves() {
        let mut composer = loaded(200, 100, 2);
        let (a, b) = (composer.fields()[0].id, composer.fields()[1].id);
        composer
            .begin_drag(a, Point::new(100.0, 15.0), Rect::new(0.0, 0.0, 200.0, 100.0))
            .unwrap();
        assert_eq!(composer.dragging(), Some(a));
        assert!(matches!(
            composer.move_field(b, Point::new(10.0, 10.0)),
            Err(ComposeError::NotDragging(_))
        ));

        composer.end_drag();
        assert_eq!(composer.dragging(), None);
        assert!(matches!(
            composer.move_field(a, Point::new(10.0, 10.0)),
            Err(ComposeError::NotDragging(_))
        ));
    }

    #[test]
    fn zero_area_container_is_rejected() {
        let mut composer = loaded(200, 100, 1);
        let id = composer.fields()[0].id;
        assert!(matches!(
            composer.begin_drag(id, Point::ZERO, Rect::new(0.0, 0.0, 0.0, 100.0)),
            Err(ComposeError::InvalidContainer)
        ));
    }

    #[test]
    fn edits_and_names() {
        let mut composer = loaded(100, 100, 2);
        let (a, b) = (composer.fields()[0].id, composer.fields()[1].id);
        assert_eq!(composer.display_name(), "Untitled Meme");

        composer.set_text(b, "bottom text").unwrap();
        composer.set_color(a, "#f00".parse().unwrap()).unwrap();
        assert!(matches!(
            composer.set_font_size(a, f64::INFINITY),
            Err(ComposeError::InvalidFontSize(_))
        ));
        assert_eq!(composer.display_name(), "bottom text");
        assert_eq!(composer.caption_texts(), vec!["".to_string(), "bottom text".to_string()]);

        composer.set_default_color(Color::BLACK);
        assert!(composer.fields().iter().all(|f| f.color == Color::BLACK));
    }

    #[test]
    fn export_is_native_resolution() {
        let mut composer = loaded(1200, 600, 2);
        let id = composer.fields()[0].id;
        composer.set_text(id, "hello").unwrap();
        let image = composer.export_final().unwrap().unwrap();
        assert_eq!(image.dimensions(), (1200, 600));
    }

    #[tokio::test]
    async fn data_url_source_loads_in_place() {
        let url = crate::imagedata::to_data_url("image/png", &png(4, 4));
        let mut t = template(2);
        t.url = url;
        let mut composer = Composer::default();
        composer.load_template(&t, &DefaultImageSource::new()).await.unwrap();
        assert_eq!(composer.native_size(), Some((4, 4)));
    }

    #[tokio::test]
    async fn missing_file_source_fails_cleanly() {
        let mut t = template(2);
        t.url = "/definitely/not/here.png".into();
        let mut composer = Composer::default();
        let err = composer.load_template(&t, &DefaultImageSource::new()).await.unwrap_err();
        assert!(matches!(err, ComposeError::Fetch { .. }));
        assert!(!composer.is_loaded());
    }
}
