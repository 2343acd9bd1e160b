//! Static image source.
//!
//! Wraps one previously supplied image. Acquisition only marks the source
//! ready; there is no device to lock. Every capture returns the same payload.

use std::path::Path;

use super::CaptureSource;
use crate::error::{MonitorError, Result};
use crate::frame::ImagePayload;

#[derive(Debug)]
pub struct StaticImageSource {
    payload: ImagePayload,
    ready: bool,
    frame_count: u64,
}

impl StaticImageSource {
    pub fn from_payload(payload: ImagePayload) -> Self {
        Self {
            payload,
            ready: false,
            frame_count: 0,
        }
    }

    /// Raw file contents; the MIME type is sniffed from the bytes.
    pub fn from_bytes(bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        Self::from_payload(ImagePayload::sniffed(bytes, file_name))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let payload = ImagePayload::from_path(path)
            .map_err(|e| MonitorError::Validation(format!("{:#}", e)))?;
        Ok(Self::from_payload(payload))
    }

    pub fn payload(&self) -> &ImagePayload {
        &self.payload
    }
}

impl CaptureSource for StaticImageSource {
    fn acquire(&mut self) -> Result<()> {
        self.ready = true;
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<ImagePayload> {
        if !self.ready {
            return Err(MonitorError::DeviceUnavailable(format!(
                "static image {} not acquired",
                self.payload.file_name()
            )));
        }
        self.frame_count += 1;
        Ok(self.payload.clone())
    }

    fn release(&mut self) {
        self.ready = false;
    }

    fn is_acquired(&self) -> bool {
        self.ready
    }

    fn describe(&self) -> String {
        format!("file {}", self.payload.file_name())
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn replays_the_same_payload() {
        let mut source =
            StaticImageSource::from_payload(ImagePayload::new(vec![7; 16], "image/png", "a.png"));
        assert!(source.capture_frame().is_err());
        source.acquire().unwrap();
        let a = source.capture_frame().unwrap();
        let b = source.capture_frame().unwrap();
        assert_eq!(a.bytes(), b.bytes());
        assert_eq!(source.frames_captured(), 2);
        source.release();
        assert!(matches!(
            source.capture_frame(),
            Err(MonitorError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn loads_from_disk_with_sniffed_mime() {
        let mut file = tempfile::Builder::new().suffix(".dat").tempfile().unwrap();
        file.write_all(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]).unwrap();
        let source = StaticImageSource::from_path(file.path()).unwrap();
        assert_eq!(source.payload().mime(), "image/jpeg");
    }

    #[test]
    fn from_bytes_sniffs_content() {
        let source = StaticImageSource::from_bytes(b"GIF89a\x01\x00\x01\x00".to_vec(), "blob");
        assert_eq!(source.payload().mime(), "image/gif");
        assert!(source.payload().is_image());
    }

    #[test]
    fn missing_file_is_validation_error() {
        let err = StaticImageSource::from_path(Path::new("/nonexistent/ppe.jpg")).unwrap_err();
        assert!(matches!(err, MonitorError::Validation(_)));
        assert!(format!("{:?}", StaticImageSource::from_bytes(vec![0xFF, 0xD8, 0xFF], "a.jpg"))
            .contains("StaticImageSource"));
    }
}
