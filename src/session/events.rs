//! Session event fan-out.
//!
//! The UI layer subscribes with `EventBus::subscribe` and receives every event
//! emitted after subscription. Receivers that have been dropped are pruned on
//! the next emit.
//!
//! Each subscriber gets a bounded queue. A subscriber that stops draining
//! loses events once its queue is full instead of growing without limit;
//! the other subscribers are unaffected.

use std::collections::BTreeSet;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};

use super::SessionMode;
use crate::compliance::{ComplianceEvaluation, ComplianceStatus};
use crate::error::MonitorError;
use crate::finding::Equipment;

#[derive(Clone, Debug)]
pub enum SessionEvent {
    ModeChanged {
        from: SessionMode,
        to: SessionMode,
    },
    /// Every completed evaluation, streaming or upload.
    Evaluation(ComplianceEvaluation),
    /// Status changed since the previous evaluation. Never repeated for an
    /// unchanged status.
    Alert {
        status: ComplianceStatus,
        message: String,
        missing: BTreeSet<Equipment>,
    },
    /// A streaming tick failed; the stream keeps running.
    TickError { tick: u64, error: MonitorError },
    /// The credential was rejected; the session has been reset to Idle.
    AuthExpired { reason: String },
    /// Upload progress in percent.
    Progress(f32),
}

/// Events queued per subscriber before new ones are dropped.
pub const SUBSCRIBER_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<SyncSender<SessionEvent>>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(SUBSCRIBER_CAPACITY)
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// Receive every event emitted from now on. At most `capacity` undrained
    /// events are held for this receiver; later ones are dropped until it
    /// catches up.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::sync_channel(self.capacity);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    pub fn emit(&self, event: SessionEvent) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("EventBus: subscriber queue full, dropping event");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Publish an evaluation, plus an alert when the status changed.
    pub fn publish_evaluation(&self, evaluation: &ComplianceEvaluation) {
        self.emit(SessionEvent::Evaluation(evaluation.clone()));
        if evaluation.changed_from_previous {
            self.emit(SessionEvent::Alert {
                status: evaluation.status,
                message: evaluation.message(),
                missing: evaluation.missing.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_receivers_are_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        let gone = bus.subscribe();
        drop(gone);
        bus.emit(SessionEvent::Progress(10.0));
        assert_eq!(bus.subscribers.lock().unwrap().len(), 1);
        assert!(matches!(keep.try_recv(), Ok(SessionEvent::Progress(p)) if p == 10.0));
    }

    #[test]
    fn stalled_subscriber_is_capped_without_starving_others() {
        let bus = EventBus::with_capacity(3);
        let stalled = bus.subscribe();
        let active = bus.subscribe();

        let mut delivered = Vec::new();
        for pct in 1..=10 {
            bus.emit(SessionEvent::Progress(pct as f32));
            delivered.extend(active.try_iter());
        }
        assert_eq!(delivered.len(), 10);

        let held: Vec<f32> = stalled
            .try_iter()
            .filter_map(|event| match event {
                SessionEvent::Progress(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(held, vec![1.0, 2.0, 3.0]);
        // Still subscribed: it resumes once drained.
        bus.emit(SessionEvent::Progress(11.0));
        assert!(matches!(stalled.try_recv(), Ok(SessionEvent::Progress(p)) if p == 11.0));
    }

    #[test]
    fn unchanged_evaluation_publishes_no_alert() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let evaluation = ComplianceEvaluation {
            status: ComplianceStatus::Critical,
            missing: BTreeSet::from([Equipment::Helmet]),
            changed_from_previous: false,
            warnings: Vec::new(),
        };
        bus.publish_evaluation(&evaluation);
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::Evaluation(_)));
    }
}
