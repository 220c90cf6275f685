//! Image intake: turns a user-selected file into an [`UploadedImage`].
//!
//! The media type always comes from the file's declaration (or, for files opened
//! from disk, its extension). The bytes are only checked to decode under that
//! declared format; they are never sniffed to pick a different one.

use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, ImageReader};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const ACCEPTED_MEDIA_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp", "image/gif"];

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("failed reading {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is empty")]
    Empty(String),

    #[error("{0} has no declared media type")]
    MissingMediaType(String),

    #[error("{name} is declared as {media_type}, which is not an accepted image type")]
    UnsupportedMediaType { name: String, media_type: String },

    #[error("{name} does not decode as {media_type}: {source}")]
    Undecodable {
        name: String,
        media_type: String,
        #[source]
        source: image::ImageError,
    },
}

/// A file as handed over by the user: a name, its bytes and the media type it declares.
#[derive(Debug, Clone)]
pub struct ImageFile {
    name: String,
    media_type: Option<String>,
    bytes: Arc<[u8]>,
}

impl ImageFile {
    pub fn new(
        name: impl Into<String>,
        media_type: Option<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type,
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, declaring its media type from the extension.
    pub fn open(path: &Path) -> Result<Self, IntakeError> {
        let bytes = fs::read(path).map_err(|source| IntakeError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(
            name,
            media_type_for_path(path).map(str::to_string),
            bytes,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Locally resolvable handle to the selected bytes, for redisplay without re-reading the file.
#[derive(Clone, PartialEq, Eq)]
pub struct PreviewRef {
    id: Uuid,
    media_type: String,
    bytes: Arc<[u8]>,
}

impl PreviewRef {
    fn new(media_type: &str, bytes: Arc<[u8]>) -> Self {
        Self {
            id: Uuid::new_v4(),
            media_type: media_type.to_string(),
            bytes,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.media_type,
            BASE64.encode(&self.bytes)
        )
    }
}

impl fmt::Debug for PreviewRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewRef")
            .field("id", &self.id)
            .field("media_type", &self.media_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Normalised payload produced by [`intake`]. Immutable once built.
#[derive(Clone, PartialEq)]
pub struct UploadedImage {
    file_name: String,
    content: String,
    media_type: String,
    dimensions: (u32, u32),
    preview: PreviewRef,
}

impl UploadedImage {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Standard base64 of the original bytes.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    pub fn preview(&self) -> &PreviewRef {
        &self.preview
    }

    /// Rebuild the selection this image came from.
    pub fn source_file(&self) -> ImageFile {
        ImageFile {
            name: self.file_name.clone(),
            media_type: Some(self.media_type.clone()),
            bytes: Arc::clone(&self.preview.bytes),
        }
    }
}

impl fmt::Debug for UploadedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedImage")
            .field("file_name", &self.file_name)
            .field("media_type", &self.media_type)
            .field("dimensions", &self.dimensions)
            .field("content_len", &self.content.len())
            .field("preview", &self.preview)
            .finish()
    }
}

pub fn intake(file: &ImageFile) -> Result<UploadedImage, IntakeError> {
    if file.bytes.is_empty() {
        return Err(IntakeError::Empty(file.name.clone()));
    }
    let declared = file
        .media_type()
        .map(normalize_media_type)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| IntakeError::MissingMediaType(file.name.clone()))?;
    let format = accepted_format(&declared).ok_or_else(|| IntakeError::UnsupportedMediaType {
        name: file.name.clone(),
        media_type: declared.clone(),
    })?;

    let decoded = ImageReader::with_format(Cursor::new(file.bytes()), format)
        .decode()
        .map_err(|source| IntakeError::Undecodable {
            name: file.name.clone(),
            media_type: declared.clone(),
            source,
        })?;
    let dimensions = (decoded.width(), decoded.height());
    debug!(
        file = %file.name,
        media_type = %declared,
        width = dimensions.0,
        height = dimensions.1,
        bytes = file.bytes.len(),
        "image accepted"
    );

    Ok(UploadedImage {
        file_name: file.name.clone(),
        content: BASE64.encode(file.bytes()),
        preview: PreviewRef::new(&declared, Arc::clone(&file.bytes)),
        media_type: declared,
        dimensions,
    })
}

pub fn media_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

fn normalize_media_type(raw: &str) -> String {
    let essence = raw.split(';').next().unwrap_or_default().trim();
    let lowered = essence.to_ascii_lowercase();
    if lowered == "image/jpg" {
        return "image/jpeg".to_string();
    }
    lowered
}

fn accepted_format(media_type: &str) -> Option<ImageFormat> {
    if !ACCEPTED_MEDIA_TYPES.contains(&media_type) {
        return None;
    }
    ImageFormat::from_mime_type(media_type)
}
