//! Capture sources.
//!
//! Two producers of image payloads sit behind one capability:
//! - `LiveCameraSource`: samples the current frame of a camera device
//!   (`stub://` synthetic devices, or V4L2 with feature `camera-v4l2`)
//! - `StaticImageSource`: one previously supplied image file
//!
//! Device access is a scoped resource. Every `acquire` must be matched by a
//! `release` on every exit path; sources also release on drop so a panic or
//! early return does not leave the device locked.
//!
//! Capture outside an acquire/release window fails with `DeviceUnavailable`.

pub mod camera;
pub mod still;

pub use camera::{CameraConfig, LiveCameraSource};
pub use still::StaticImageSource;

use crate::error::Result;
use crate::frame::ImagePayload;

pub trait CaptureSource: Send {
    /// Take the device handle. Idempotent while already acquired.
    fn acquire(&mut self) -> Result<()>;

    /// Produce a fresh image payload from the acquired device.
    fn capture_frame(&mut self) -> Result<ImagePayload>;

    /// Give the device handle back. Safe to call when not acquired.
    fn release(&mut self);

    fn is_acquired(&self) -> bool;

    /// Human-readable source identifier for logs.
    fn describe(&self) -> String;

    /// Frames produced since construction.
    fn frames_captured(&self) -> u64 {
        0
    }
}

impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
    fn acquire(&mut self) -> Result<()> {
        (**self).acquire()
    }

    fn capture_frame(&mut self) -> Result<ImagePayload> {
        (**self).capture_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn is_acquired(&self) -> bool {
        (**self).is_acquired()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn frames_captured(&self) -> u64 {
        (**self).frames_captured()
    }
}
