//! Live camera source.
//!
//! `LiveCameraSource` binds to one camera device and produces a fresh JPEG on
//! every `capture_frame` by sampling the device's current frame.
//!
//! Device paths:
//! - `stub://<name>` - synthetic device generating a moving test pattern
//! - anything else - a V4L2 device node such as `/dev/video0`; requires the
//!   `camera-v4l2` feature
//!
//! A device name can be held by only one source at a time in this process. A
//! second source acquiring the same device fails with `DeviceUnavailable`
//! until the first releases it.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use super::CaptureSource;
use crate::error::{MonitorError, Result};
use crate::frame::ImagePayload;

const STUB_SCHEME: &str = "stub://";
const FRAME_FILE_NAME: &str = "webcam_frame.jpg";

/// Configuration for a live camera.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g. "/dev/video0") or "stub://<name>".
    pub device: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// JPEG quality for transmitted frames (1-100).
    pub jpeg_quality: u8,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "stub://camera0".to_string(),
            width: 640,
            height: 480,
            jpeg_quality: 80,
        }
    }
}

pub struct LiveCameraSource {
    config: CameraConfig,
    backend: CameraBackend,
    held: bool,
    frame_count: u64,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "camera-v4l2")]
    Device(DeviceCamera),
    #[cfg(not(feature = "camera-v4l2"))]
    Unsupported,
}

impl LiveCameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.device.trim().is_empty() {
            return Err(MonitorError::Validation("camera device must not be empty".into()));
        }
        if config.width == 0 || config.height == 0 {
            return Err(MonitorError::Validation(format!(
                "camera resolution {}x{} is invalid",
                config.width, config.height
            )));
        }
        let backend = if config.device.starts_with(STUB_SCHEME) {
            CameraBackend::Synthetic(SyntheticCamera::new(config.width, config.height))
        } else {
            #[cfg(feature = "camera-v4l2")]
            {
                CameraBackend::Device(DeviceCamera::new(config.clone()))
            }
            #[cfg(not(feature = "camera-v4l2"))]
            {
                CameraBackend::Unsupported
            }
        };
        Ok(Self {
            config,
            backend,
            held: false,
            frame_count: 0,
        })
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    fn encode_jpeg(&self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(pixels.len() / 8);
        let quality = self.config.jpeg_quality.clamp(1, 100);
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode(pixels, width, height, ExtendedColorType::Rgb8)
            .map_err(|e| MonitorError::DeviceUnavailable(format!("encode frame: {}", e)))?;
        Ok(out)
    }
}

impl CaptureSource for LiveCameraSource {
    fn acquire(&mut self) -> Result<()> {
        if self.held {
            return Ok(());
        }
        claim_device(&self.config.device)?;

        let opened = match &mut self.backend {
            CameraBackend::Synthetic(camera) => {
                camera.open();
                Ok(())
            }
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.open(),
            #[cfg(not(feature = "camera-v4l2"))]
            CameraBackend::Unsupported => Err(MonitorError::DeviceUnavailable(format!(
                "{}: camera devices require the camera-v4l2 feature",
                self.config.device
            ))),
        };
        if let Err(err) = opened {
            release_device(&self.config.device);
            return Err(err);
        }

        self.held = true;
        log::info!("LiveCameraSource: acquired {}", self.config.device);
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<ImagePayload> {
        if !self.held {
            return Err(MonitorError::DeviceUnavailable(format!(
                "{} not acquired",
                self.config.device
            )));
        }
        let (pixels, width, height) = match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.sample(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.sample()?,
            #[cfg(not(feature = "camera-v4l2"))]
            CameraBackend::Unsupported => {
                return Err(MonitorError::DeviceUnavailable(self.config.device.clone()))
            }
        };
        let jpeg = self.encode_jpeg(&pixels, width, height)?;
        self.frame_count += 1;
        Ok(ImagePayload::new(jpeg, "image/jpeg", FRAME_FILE_NAME))
    }

    fn release(&mut self) {
        if !self.held {
            return;
        }
        match &mut self.backend {
            CameraBackend::Synthetic(_) => {}
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.close(),
            #[cfg(not(feature = "camera-v4l2"))]
            CameraBackend::Unsupported => {}
        }
        release_device(&self.config.device);
        self.held = false;
        log::info!(
            "LiveCameraSource: released {} after {} frames",
            self.config.device,
            self.frame_count
        );
    }

    fn is_acquired(&self) -> bool {
        self.held
    }

    fn describe(&self) -> String {
        format!("camera {}", self.config.device)
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

impl Drop for LiveCameraSource {
    fn drop(&mut self) {
        self.release();
    }
}

// ----------------------------------------------------------------------------
// Process-wide device ownership
// ----------------------------------------------------------------------------

fn held_devices() -> &'static Mutex<HashSet<String>> {
    static HELD: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    HELD.get_or_init(|| Mutex::new(HashSet::new()))
}

fn claim_device(device: &str) -> Result<()> {
    let mut held = held_devices()
        .lock()
        .map_err(|_| MonitorError::DeviceUnavailable("device registry poisoned".into()))?;
    if !held.insert(device.to_string()) {
        return Err(MonitorError::DeviceUnavailable(format!(
            "{} is in use by another source",
            device
        )));
    }
    Ok(())
}

fn release_device(device: &str) {
    if let Ok(mut held) = held_devices().lock() {
        held.remove(device);
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://)
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    width: u32,
    height: u32,
    tick: u64,
}

impl SyntheticCamera {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: 0,
        }
    }

    /// Restart the pattern.
    fn open(&mut self) {
        self.tick = 0;
    }

    /// Diagonal gradient that drifts a little every frame.
    fn sample(&mut self) -> (Vec<u8>, u32, u32) {
        self.tick += 1;
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = vec![0u8; w * h * 3];
        for y in 0..h {
            for x in 0..w {
                let i = (y * w + x) * 3;
                let base = (x + y + self.tick as usize * 4) % 256;
                pixels[i] = base as u8;
                pixels[i + 1] = ((base + 85) % 256) as u8;
                pixels[i + 2] = ((base + 170) % 256) as u8;
            }
        }
        (pixels, self.width, self.height)
    }
}

// ----------------------------------------------------------------------------
// V4L2 camera
// ----------------------------------------------------------------------------

#[cfg(feature = "camera-v4l2")]
struct DeviceCamera {
    config: CameraConfig,
    state: Option<DeviceState>,
    active_width: u32,
    active_height: u32,
}

#[cfg(feature = "camera-v4l2")]
#[ouroboros::self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "camera-v4l2")]
impl DeviceCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
        }
    }

    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let unavailable =
            |what: &str, err: std::io::Error| MonitorError::DeviceUnavailable(format!("{}: {}", what, err));

        let mut device = v4l::Device::with_path(&self.config.device)
            .map_err(|e| unavailable(&format!("open {}", self.config.device), e))?;
        let mut format = device.format().map_err(|e| unavailable("read format", e))?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "LiveCameraSource: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .map_err(|e| unavailable("read format after set failure", e))?
            }
        };
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            return Err(MonitorError::DeviceUnavailable(format!(
                "{} does not support RGB3 capture",
                self.config.device
            )));
        }
        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|e| unavailable("create buffer stream", e))?;
        self.state = Some(state);

        log::info!(
            "LiveCameraSource: opened {} ({}x{})",
            self.config.device,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn sample(&mut self) -> Result<(Vec<u8>, u32, u32)> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().ok_or_else(|| {
            MonitorError::DeviceUnavailable(format!("{} not open", self.config.device))
        })?;
        let pixels = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|e| MonitorError::DeviceUnavailable(format!("capture frame: {}", e)))?;
        Ok((pixels, self.active_width, self.active_height))
    }

    fn close(&mut self) {
        // Dropping the stream unmaps buffers and closes the fd.
        self.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(name: &str) -> CameraConfig {
        CameraConfig {
            device: format!("stub://{}", name),
            width: 64,
            height: 48,
            jpeg_quality: 70,
        }
    }

    #[test]
    fn capture_requires_acquisition() {
        let mut camera = LiveCameraSource::new(stub_config("unit-acquire")).unwrap();
        let err = camera.capture_frame().unwrap_err();
        assert!(matches!(err, MonitorError::DeviceUnavailable(_)));

        camera.acquire().unwrap();
        let frame = camera.capture_frame().unwrap();
        assert_eq!(frame.mime(), "image/jpeg");
        assert_eq!(&frame.bytes()[..2], &[0xFF, 0xD8]);

        camera.release();
        assert!(camera.capture_frame().is_err());
        assert_eq!(camera.frames_captured(), 1);
    }

    #[test]
    fn device_is_exclusive_until_released() {
        let mut first = LiveCameraSource::new(stub_config("unit-exclusive")).unwrap();
        let mut second = LiveCameraSource::new(stub_config("unit-exclusive")).unwrap();
        first.acquire().unwrap();
        assert!(matches!(
            second.acquire(),
            Err(MonitorError::DeviceUnavailable(_))
        ));
        first.release();
        second.acquire().unwrap();
    }

    #[test]
    fn drop_releases_device() {
        {
            let mut camera = LiveCameraSource::new(stub_config("unit-drop")).unwrap();
            camera.acquire().unwrap();
        }
        let mut again = LiveCameraSource::new(stub_config("unit-drop")).unwrap();
        again.acquire().unwrap();
    }

    #[test]
    fn frames_differ_between_samples() {
        let mut camera = LiveCameraSource::new(stub_config("unit-frames")).unwrap();
        camera.acquire().unwrap();
        let a = camera.capture_frame().unwrap();
        let b = camera.capture_frame().unwrap();
        assert_ne!(a.bytes(), b.bytes());
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = stub_config("x");
        config.width = 0;
        assert!(LiveCameraSource::new(config).is_err());
    }

    #[cfg(not(feature = "camera-v4l2"))]
    #[test]
    fn real_devices_need_feature() {
        let config = CameraConfig {
            device: "/dev/video9".to_string(),
            ..CameraConfig::default()
        };
        let mut camera = LiveCameraSource::new(config).unwrap();
        assert!(matches!(
            camera.acquire(),
            Err(MonitorError::DeviceUnavailable(_))
        ));
        assert!(!camera.is_acquired());
    }
}
