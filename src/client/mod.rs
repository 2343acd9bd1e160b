//! Detection clients.
//!
//! A detection client performs one request/response exchange with the remote
//! detection service for a single image. Two implementations share the
//! `DetectionClient` trait:
//! - `HttpDetectionClient`: multipart upload over HTTP (production)
//! - `ScriptedDetectionClient`: deterministic replay of canned outcomes (tests,
//!   demos without a service)
//!
//! Implementations only provide `submit`, which returns the raw JSON body.
//! The provided `detect_once` / `detect_with_progress` wrap it with
//! normalization and the progress contract: reported percentages are clamped
//! to [0,100], never decrease, and end at 100 when the exchange succeeds.

mod credential;
mod http;
mod scripted;

pub use credential::{CredentialProvider, EnvCredential, StaticCredential};
pub use http::{HttpClientConfig, HttpDetectionClient};
pub use scripted::{labels_response, ScriptedDetectionClient, ScriptedStats};

use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::frame::ImagePayload;
use crate::normalize::{normalize, Normalized};

pub trait DetectionClient: Send + Sync {
    /// Client identifier for logs.
    fn name(&self) -> &'static str;

    /// Send one image and return the raw response body.
    ///
    /// `progress`, when given, receives upload percentages as the body is
    /// transmitted. Implementations must map HTTP 401 to `Auth`, any other
    /// transport or status failure to `Network`, and a 2xx response carrying
    /// `"success": false` to `Service`.
    fn submit(&self, image: &ImagePayload, progress: Option<&mut dyn FnMut(f32)>) -> Result<Value>;

    /// Connectivity check against the service root.
    fn probe(&self) -> Result<()> {
        Ok(())
    }

    fn detect_once(&self, image: &ImagePayload) -> Result<Normalized> {
        let raw = self.submit(image, None)?;
        normalize(&raw)
    }

    fn detect_with_progress(
        &self,
        image: &ImagePayload,
        on_progress: &mut dyn FnMut(f32),
    ) -> Result<Normalized> {
        let mut monotonic = MonotonicProgress::new(on_progress);
        let raw = {
            let mut report = |pct: f32| monotonic.report(pct);
            self.submit(image, Some(&mut report))?
        };
        monotonic.finish();
        normalize(&raw)
    }
}

impl<T: DetectionClient + ?Sized> DetectionClient for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn submit(&self, image: &ImagePayload, progress: Option<&mut dyn FnMut(f32)>) -> Result<Value> {
        (**self).submit(image, progress)
    }

    fn probe(&self) -> Result<()> {
        (**self).probe()
    }
}

/// Forwards only values that move the indicator forward.
struct MonotonicProgress<'a> {
    sink: &'a mut dyn FnMut(f32),
    last: Option<f32>,
}

impl<'a> MonotonicProgress<'a> {
    fn new(sink: &'a mut dyn FnMut(f32)) -> Self {
        Self { sink, last: None }
    }

    fn report(&mut self, pct: f32) {
        let pct = if pct.is_nan() { 0.0 } else { pct.clamp(0.0, 100.0) };
        if self.last.map_or(true, |last| pct > last) {
            self.last = Some(pct);
            (self.sink)(pct);
        }
    }

    fn finish(&mut self) {
        self.report(100.0);
    }
}
