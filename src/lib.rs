//! PPE compliance monitor
//!
//! Client-side core of a safety-compliance monitor. Images come from a camera
//! or a user-supplied file, are sent to a remote object-detection service, and
//! the findings are reduced to a compliance status with edge-triggered alerts.
//!
//! # Module Structure
//!
//! - `frame`: Image payloads (bytes, MIME type, file name)
//! - `finding`: Detection findings and label classification
//! - `normalize`: Raw service response -> findings
//! - `compliance`: Findings -> status, missing equipment, change detection
//! - `capture`: Camera and static-image sources
//! - `client`: Detection service clients (HTTP, scripted)
//! - `scheduler`: Periodic capture/detect/evaluate loop
//! - `session`: Mode state machine tying the above together
//! - `config`: File + environment configuration for the binary

pub mod capture;
pub mod client;
pub mod compliance;
pub mod config;
pub mod error;
pub mod finding;
pub mod frame;
pub mod normalize;
pub mod scheduler;
pub mod session;

pub use capture::{CameraConfig, CaptureSource, LiveCameraSource, StaticImageSource};
pub use client::{
    CredentialProvider, DetectionClient, EnvCredential, HttpClientConfig, HttpDetectionClient,
    ScriptedDetectionClient, StaticCredential,
};
pub use compliance::{evaluate, AlertTracker, ComplianceEvaluation, ComplianceStatus};
pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use finding::{BoundingBox, Equipment, Finding, LabelClass};
pub use frame::ImagePayload;
pub use normalize::{normalize, NormalizationWarning, Normalized};
pub use scheduler::{Cadence, CancellationToken, SchedulerConfig, SchedulerState, StreamScheduler};
pub use session::{
    Session, SessionConfig, SessionController, SessionEvent, SessionMode, UploadOutcome,
};
