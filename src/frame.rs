//! Image payloads.
//!
//! `ImagePayload` is the unit every capture source produces and the detection
//! client transmits: encoded image bytes plus the MIME type and file name the
//! service receives in the multipart upload.
//!
//! Payload bytes are wiped on drop and never written to logs.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use zeroize::Zeroize;

/// MIME type used when nothing better can be determined.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Hard cap on payload size accepted for upload.
pub const MAX_PAYLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct ImagePayload {
    bytes: Vec<u8>,
    mime: String,
    file_name: String,
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            bytes,
            mime: mime.into(),
            file_name: file_name.into(),
        }
    }

    /// Build a payload from raw bytes, sniffing the MIME type from content.
    pub fn sniffed(bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let mime = sniff_mime(&bytes, &file_name);
        Self::new(bytes, mime, file_name)
    }

    /// Read a local file into a payload.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read image file {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::sniffed(bytes, file_name))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// True for any `image/*` MIME type.
    pub fn is_image(&self) -> bool {
        is_image_mime(&self.mime)
    }
}

impl Drop for ImagePayload {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

// Bytes are deliberately left out of Debug output.
impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime", &self.mime)
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

pub fn is_image_mime(mime: &str) -> bool {
    let mime = mime.trim().to_ascii_lowercase();
    mime.starts_with("image/") && mime.len() > "image/".len()
}

/// Determine a MIME type from magic bytes, falling back to the file extension.
pub fn sniff_mime(bytes: &[u8], file_name: &str) -> String {
    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type().to_string();
    }
    mime_from_extension(file_name)
        .unwrap_or(OCTET_STREAM)
        .to_string()
}

fn mime_from_extension(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name)
        .extension()?
        .to_string_lossy()
        .to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(mime)
}
