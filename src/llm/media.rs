use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::StudioError;

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    infer::get(data).map(|kind| kind.mime_type().to_string())
}

/// Image formats accepted at the upload boundary and understood by the
/// generation API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Png,
    Jpeg,
    Webp,
}

impl MediaType {
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        match mime_type.trim().to_ascii_lowercase().as_str() {
            "image/png" => Some(MediaType::Png),
            "image/jpeg" | "image/jpg" => Some(MediaType::Jpeg),
            "image/webp" => Some(MediaType::Webp),
            _ => None,
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "png" => Some(MediaType::Png),
            "jpg" | "jpeg" => Some(MediaType::Jpeg),
            "webp" => Some(MediaType::Webp),
            _ => None,
        }
    }

    pub fn sniff(data: &[u8]) -> Option<Self> {
        detect_mime_type(data).and_then(|mime| Self::from_mime(&mime))
    }

    pub const fn as_mime(self) -> &'static str {
        match self {
            MediaType::Png => "image/png",
            MediaType::Jpeg => "image/jpeg",
            MediaType::Webp => "image/webp",
        }
    }

    fn image_format(self) -> image::ImageFormat {
        match self {
            MediaType::Png => image::ImageFormat::Png,
            MediaType::Jpeg => image::ImageFormat::Jpeg,
            MediaType::Webp => image::ImageFormat::WebP,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_mime())
    }
}

/// Immutable image payload. Cloning shares the underlying bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    bytes: Arc<[u8]>,
    media_type: MediaType,
}

impl ImageData {
    pub fn new(bytes: impl Into<Arc<[u8]>>, media_type: MediaType) -> Self {
        Self {
            bytes: bytes.into(),
            media_type,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns PNG-encoded bytes, transcoding when the payload is another format.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>, image::ImageError> {
        if self.media_type == MediaType::Png {
            return Ok(self.bytes.to_vec());
        }
        let decoded = image::load_from_memory_with_format(
            &self.bytes,
            self.media_type.image_format(),
        )?;
        let mut output = Cursor::new(Vec::new());
        decoded.write_to(&mut output, image::ImageFormat::Png)?;
        Ok(output.into_inner())
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("media_type", &self.media_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Resolves the media type of an uploaded file: content sniffing first, then
/// the file extension. `None` means the file is not an accepted image.
pub fn classify_upload(path: &Path, bytes: &[u8]) -> Option<MediaType> {
    if let Some(detected) = detect_mime_type(bytes) {
        return MediaType::from_mime(&detected);
    }
    MediaType::from_extension(path)
}

/// Reads an image file from disk. Unsupported file types yield `Ok(None)` so the
/// caller can ignore them without surfacing an error.
pub async fn load_image_file(path: &Path) -> Result<Option<ImageData>, StudioError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| StudioError::FileRead {
            path: path.display().to_string(),
            source,
        })?;

    let Some(media_type) = classify_upload(path, &bytes) else {
        warn!(
            "Ignoring upload {} (detected={:?}): not a PNG, JPEG or WEBP image",
            path.display(),
            detect_mime_type(&bytes)
        );
        return Ok(None);
    };

    debug!(
        "Loaded image {} ({}, {} bytes)",
        path.display(),
        media_type,
        bytes.len()
    );
    Ok(Some(ImageData::new(bytes, media_type)))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn encoded(format: image::ImageFormat, shade: u8) -> Vec<u8> {
        let image = image::RgbImage::from_pixel(4, 4, image::Rgb([shade, 40, 200]));
        let mut output = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut output, format)
            .unwrap();
        output.into_inner()
    }

    pub fn png(shade: u8) -> ImageData {
        ImageData::new(encoded(image::ImageFormat::Png, shade), MediaType::Png)
    }

    pub fn jpeg(shade: u8) -> ImageData {
        ImageData::new(encoded(image::ImageFormat::Jpeg, shade), MediaType::Jpeg)
    }
}
