//! Shared session state.
//!
//! `SessionContext` owns the camera handle and the session record. The
//! controller and the stream worker each hold a clone; neither touches the
//! device or the record except through these methods. The source lock and
//! the session lock are never held at the same time.

use std::sync::{Arc, Mutex, MutexGuard};

use super::events::{EventBus, SessionEvent};
use super::{Session, SessionMode};
use crate::capture::CaptureSource;
use crate::compliance::{ComplianceEvaluation, ComplianceStatus};
use crate::error::{MonitorError, Result};
use crate::frame::ImagePayload;

#[derive(Clone)]
pub struct SessionContext {
    source: Arc<Mutex<Box<dyn CaptureSource>>>,
    session: Arc<Mutex<Session>>,
    events: EventBus,
}

impl SessionContext {
    pub fn new(source: Box<dyn CaptureSource>) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            session: Arc::new(Mutex::new(Session::default())),
            events: EventBus::new(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn emit(&self, event: SessionEvent) {
        self.events.emit(event);
    }

    pub fn snapshot(&self) -> Session {
        self.session().clone()
    }

    pub fn mode(&self) -> SessionMode {
        self.session().mode
    }

    pub fn set_mode(&self, to: SessionMode) {
        let from = {
            let mut session = self.session();
            std::mem::replace(&mut session.mode, to)
        };
        if from != to {
            log::info!("Session: {:?} -> {:?}", from, to);
            self.emit(SessionEvent::ModeChanged { from, to });
        }
    }

    pub fn last_status(&self) -> ComplianceStatus {
        self.session()
            .last_evaluation
            .as_ref()
            .map(|e| e.status)
            .unwrap_or_default()
    }

    pub fn record_evaluation(&self, evaluation: ComplianceEvaluation) {
        let mut session = self.session();
        session.last_error = None;
        session.last_evaluation = Some(evaluation);
    }

    pub fn record_error(&self, err: &MonitorError) {
        self.session().last_error = Some(err.to_string());
    }

    pub fn clear_evaluation(&self) {
        let mut session = self.session();
        session.last_evaluation = None;
        session.last_error = None;
    }

    pub fn set_request_in_flight(&self, in_flight: bool) {
        self.session().active_request_in_flight = in_flight;
    }

    pub fn set_upload_progress(&self, pct: f32) {
        self.session().upload_progress = pct;
    }

    pub fn acquire_source(&self) -> Result<()> {
        self.source()?.acquire()
    }

    pub fn release_source(&self) {
        match self.source.lock() {
            Ok(mut source) => source.release(),
            Err(poisoned) => poisoned.into_inner().release(),
        }
    }

    pub fn capture_frame(&self) -> Result<ImagePayload> {
        self.source()?.capture_frame()
    }

    pub fn source_description(&self) -> String {
        self.source()
            .map(|source| source.describe())
            .unwrap_or_else(|_| "unavailable source".to_string())
    }

    /// Tear the session down after the credential was rejected.
    pub fn invalidate(&self, err: &MonitorError) {
        let from = {
            let mut session = self.session();
            let from = session.mode;
            *session = Session {
                last_error: Some(err.to_string()),
                ..Session::default()
            };
            from
        };
        self.release_source();
        if from != SessionMode::Idle {
            self.emit(SessionEvent::ModeChanged {
                from,
                to: SessionMode::Idle,
            });
        }
        self.emit(SessionEvent::AuthExpired {
            reason: err.to_string(),
        });
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn source(&self) -> Result<MutexGuard<'_, Box<dyn CaptureSource>>> {
        self.source
            .lock()
            .map_err(|_| MonitorError::DeviceUnavailable("capture source lock poisoned".into()))
    }
}
