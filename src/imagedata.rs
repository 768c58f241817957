//! `data:` URL handling for meme images, which travel inline as base64 in JSON records.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use thiserror::Error;

const SUPPORTED: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
];

#[derive(Error, Debug)]
pub enum ImageDataError {
    #[error("image data is not a data URL")]
    NotDataUrl,
    #[error("image data URL is not base64 encoded")]
    NotBase64,
    #[error("unsupported image type: {0}")]
    UnsupportedType(String),
    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("image data is empty")]
    Empty,
}

/// A decoded `data:<mime>;base64,<payload>` image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ImageData {
    pub fn parse(data_url: &str) -> Result<Self, ImageDataError> {
        let rest = data_url
            .trim()
            .strip_prefix("data:")
            .ok_or(ImageDataError::NotDataUrl)?;
        let (header, payload) = rest.split_once(',').ok_or(ImageDataError::NotDataUrl)?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or(ImageDataError::NotBase64)?
            .to_ascii_lowercase();
        if extension_for(&mime).is_none() {
            return Err(ImageDataError::UnsupportedType(mime));
        }

        let bytes = STANDARD.decode(payload.trim())?;
        if bytes.is_empty() {
            return Err(ImageDataError::Empty);
        }
        Ok(ImageData { mime, bytes })
    }

    pub fn to_data_url(&self) -> String {
        to_data_url(&self.mime, &self.bytes)
    }

    /// File extension used for the stored object key.
    pub fn extension(&self) -> &'static str {
        extension_for(&self.mime).unwrap_or("bin")
    }
}

pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

pub fn extension_for(mime: &str) -> Option<&'static str> {
    SUPPORTED
        .iter()
        .find(|(m, _)| *m == mime)
        .map(|(_, ext)| *ext)
}
