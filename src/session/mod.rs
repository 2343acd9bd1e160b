//! Session controller.
//!
//! Owns the monitoring session: which mode the UI is in, the capture source,
//! the stream scheduler and the last compliance evaluation. Operations are
//! only valid from specific modes:
//!
//! ```text
//!   Idle --start_camera--> CameraActive --start_streaming--> Streaming
//!   Streaming --stop_streaming--> CameraActive --stop_camera--> Idle
//!   Streaming --stop_camera--> Idle
//!   Idle --upload_image--> Uploading --(done/failed)--> Idle
//! ```
//!
//! Anything else fails with `InvalidTransition` and leaves the session
//! untouched. A rejected credential at any point drops the session back to
//! Idle with the device released and the evaluation cleared.

mod context;
mod events;

pub use context::SessionContext;
pub use events::{EventBus, SessionEvent};

use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use serde::Serialize;

use crate::capture::CaptureSource;
use crate::client::DetectionClient;
use crate::compliance::{evaluate, ComplianceEvaluation};
use crate::error::{MonitorError, Result};
use crate::finding::Finding;
use crate::frame::{ImagePayload, MAX_PAYLOAD_BYTES};
use crate::scheduler::{Cadence, SchedulerConfig, SchedulerStats, StreamScheduler};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum SessionMode {
    #[default]
    Idle,
    CameraActive,
    Streaming,
    Uploading,
}

/// Point-in-time view of the session for display.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Session {
    pub mode: SessionMode,
    pub last_evaluation: Option<ComplianceEvaluation>,
    pub active_request_in_flight: bool,
    /// Percent, 0 when no upload is running.
    pub upload_progress: f32,
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct SessionConfig {
    pub scheduler: SchedulerConfig,
}

/// Result of a completed one-shot upload.
#[derive(Clone, Debug)]
pub struct UploadOutcome {
    pub evaluation: ComplianceEvaluation,
    pub findings: Vec<Finding>,
    pub annotated_image: Option<String>,
}

pub struct SessionController {
    client: Arc<dyn DetectionClient>,
    ctx: SessionContext,
    scheduler: StreamScheduler,
}

impl SessionController {
    pub fn new(
        client: Arc<dyn DetectionClient>,
        camera: Box<dyn CaptureSource>,
        config: SessionConfig,
    ) -> Self {
        let scheduler = StreamScheduler::new(client.clone(), config.scheduler);
        Self {
            client,
            ctx: SessionContext::new(camera),
            scheduler,
        }
    }

    pub fn session(&self) -> Session {
        self.ctx.snapshot()
    }

    pub fn mode(&self) -> SessionMode {
        self.ctx.mode()
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.ctx.events().subscribe()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Takes effect at the next `start_streaming`.
    pub fn set_cadence(&mut self, cadence: Cadence) {
        self.scheduler.set_cadence(cadence);
    }

    pub fn start_camera(&mut self) -> Result<()> {
        self.require(&[SessionMode::Idle], "start camera")?;
        if let Err(err) = self.ctx.acquire_source() {
            log::warn!("Session: camera unavailable: {}", err);
            self.ctx.record_error(&err);
            return Err(err);
        }
        log::info!("Session: camera acquired ({})", self.ctx.source_description());
        self.ctx.set_mode(SessionMode::CameraActive);
        Ok(())
    }

    pub fn start_streaming(&mut self) -> Result<()> {
        self.require(&[SessionMode::CameraActive], "start streaming")?;
        // A previous run may have ended on its own; reap it before restarting.
        self.scheduler.stop();
        self.ctx.set_mode(SessionMode::Streaming);
        let events = self.ctx.events().clone();
        let started = self
            .scheduler
            .start(&self.ctx, move |evaluation| events.publish_evaluation(evaluation));
        if let Err(err) = started {
            self.ctx.set_mode(SessionMode::CameraActive);
            return Err(err);
        }
        Ok(())
    }

    /// Returns once the stream worker has exited; no detection request is
    /// started after this call.
    pub fn stop_streaming(&mut self) -> Result<()> {
        self.scheduler.stop();
        self.require(&[SessionMode::Streaming], "stop streaming")?;
        self.ctx.set_request_in_flight(false);
        self.ctx.set_mode(SessionMode::CameraActive);
        Ok(())
    }

    /// Release the device and clear the last evaluation. A no-op when Idle.
    pub fn stop_camera(&mut self) -> Result<()> {
        self.scheduler.stop();
        match self.ctx.mode() {
            SessionMode::Idle => return Ok(()),
            SessionMode::Uploading => {
                return Err(MonitorError::InvalidTransition {
                    from: SessionMode::Uploading,
                    operation: "stop camera",
                })
            }
            SessionMode::CameraActive | SessionMode::Streaming => {}
        }
        self.ctx.release_source();
        self.ctx.clear_evaluation();
        self.ctx.set_request_in_flight(false);
        self.ctx.set_mode(SessionMode::Idle);
        Ok(())
    }

    /// One-shot detection for a user-supplied image.
    ///
    /// The payload is validated before anything is sent. Progress events are
    /// non-decreasing and end at 100 on success; the session's progress field
    /// returns to 0 whether the upload succeeds or fails.
    pub fn upload_image(&mut self, payload: ImagePayload) -> Result<UploadOutcome> {
        self.require(&[SessionMode::Idle], "upload image")?;
        validate_upload(&payload)?;

        self.ctx.set_mode(SessionMode::Uploading);
        self.ctx.set_upload_progress(0.0);
        self.ctx.set_request_in_flight(true);
        log::info!(
            "Session: uploading {} ({} bytes, {})",
            payload.file_name(),
            payload.len(),
            payload.mime()
        );

        let ctx = &self.ctx;
        let result = self.client.detect_with_progress(&payload, &mut |pct: f32| {
            ctx.set_upload_progress(pct);
            ctx.emit(SessionEvent::Progress(pct));
        });

        self.ctx.set_request_in_flight(false);
        self.ctx.set_upload_progress(0.0);

        match result {
            Ok(normalized) => {
                let evaluation = evaluate(&normalized.findings, self.ctx.last_status())
                    .with_warnings(normalized.warnings);
                self.ctx.record_evaluation(evaluation.clone());
                self.ctx.set_mode(SessionMode::Idle);
                self.ctx.events().publish_evaluation(&evaluation);
                Ok(UploadOutcome {
                    evaluation,
                    findings: normalized.findings,
                    annotated_image: normalized.annotated_image,
                })
            }
            Err(err) if err.is_auth() => {
                log::warn!("Session: credential rejected during upload: {}", err);
                self.ctx.invalidate(&err);
                Err(err)
            }
            Err(err) => {
                log::warn!("Session: upload failed: {}", err);
                self.ctx.record_error(&err);
                self.ctx.set_mode(SessionMode::Idle);
                Err(err)
            }
        }
    }

    pub fn upload_file(&mut self, path: &Path) -> Result<UploadOutcome> {
        let payload = ImagePayload::from_path(path)
            .map_err(|e| MonitorError::Validation(format!("{:#}", e)))?;
        self.upload_image(payload)
    }

    fn require(&self, allowed: &[SessionMode], operation: &'static str) -> Result<()> {
        let from = self.ctx.mode();
        if allowed.contains(&from) {
            Ok(())
        } else {
            Err(MonitorError::InvalidTransition { from, operation })
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.scheduler.stop();
        self.ctx.release_source();
    }
}

fn validate_upload(payload: &ImagePayload) -> Result<()> {
    if !payload.is_image() {
        return Err(MonitorError::Validation(format!(
            "{} is not an image ({})",
            payload.file_name(),
            payload.mime()
        )));
    }
    if payload.is_empty() {
        return Err(MonitorError::Validation(format!(
            "{} is empty",
            payload.file_name()
        )));
    }
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(MonitorError::Validation(format!(
            "{} exceeds {} bytes",
            payload.file_name(),
            MAX_PAYLOAD_BYTES
        )));
    }
    Ok(())
}
