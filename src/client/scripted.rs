//! Deterministic detection client.
//!
//! Replays a queue of canned outcomes in order, then repeats a fallback
//! forever. Used wherever a real service is unavailable: tests, demos, and
//! offline runs of the CLI.
//!
//! The client records how it was called (call count, peak concurrency, call
//! instants) so callers can assert on scheduling behaviour.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use super::DetectionClient;
use crate::error::{MonitorError, Result};
use crate::frame::ImagePayload;

const PROGRESS_STEPS: u32 = 4;

pub struct ScriptedDetectionClient {
    script: Mutex<VecDeque<Result<Value>>>,
    fallback: Result<Value>,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    call_log: Mutex<Vec<Instant>>,
}

/// Snapshot of how a scripted client has been exercised.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScriptedStats {
    pub calls: usize,
    pub peak_in_flight: usize,
}

impl ScriptedDetectionClient {
    /// Every call answers with `fallback`.
    pub fn new(fallback: Result<Value>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            call_log: Mutex::new(Vec::new()),
        }
    }

    /// Always reports the given labels with fixed confidence.
    pub fn with_labels(labels: &[&str]) -> Self {
        Self::new(Ok(labels_response(labels)))
    }

    /// Outcomes consumed in order before falling back.
    pub fn with_script(mut self, outcomes: impl IntoIterator<Item = Result<Value>>) -> Self {
        self.script = Mutex::new(outcomes.into_iter().collect());
        self
    }

    /// Simulated service latency per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn stats(&self) -> ScriptedStats {
        ScriptedStats {
            calls: self.calls.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }

    /// Instants at which calls started, in order.
    pub fn call_instants(&self) -> Vec<Instant> {
        self.call_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn next_outcome(&self) -> Result<Value> {
        let scripted = self
            .script
            .lock()
            .map_err(|_| MonitorError::Service("script lock poisoned".into()))?
            .pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Service-shaped response listing the given labels.
pub fn labels_response(labels: &[&str]) -> Value {
    let violations: Vec<Value> = labels
        .iter()
        .map(|label| json!({"label": label, "confidence": "0.90"}))
        .collect();
    json!({"success": true, "violations": violations})
}

impl DetectionClient for ScriptedDetectionClient {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn submit(&self, _image: &ImagePayload, mut progress: Option<&mut dyn FnMut(f32)>) -> Result<Value> {
        if let Ok(mut log) = self.call_log.lock() {
            log.push(Instant::now());
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let step = self.latency / PROGRESS_STEPS;
        for i in 1..=PROGRESS_STEPS {
            if !step.is_zero() {
                std::thread::sleep(step);
            }
            if let Some(progress) = progress.as_mut() {
                progress(i as f32 * 100.0 / PROGRESS_STEPS as f32);
            }
        }

        let outcome = self.next_outcome();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImagePayload {
        ImagePayload::new(vec![0xFF, 0xD8, 0xFF], "image/jpeg", "a.jpg")
    }

    #[test]
    fn replays_script_then_fallback() {
        let client = ScriptedDetectionClient::with_labels(&["GoodToGo"]).with_script([
            Ok(labels_response(&["NoHelmet"])),
            Err(MonitorError::Network("down".into())),
        ]);
        let first = client.detect_once(&image()).unwrap();
        assert_eq!(first.findings[0].label(), "NoHelmet");
        assert!(matches!(
            client.detect_once(&image()),
            Err(MonitorError::Network(_))
        ));
        let third = client.detect_once(&image()).unwrap();
        assert_eq!(third.findings[0].label(), "GoodToGo");
        assert_eq!(client.stats().calls, 3);
        assert_eq!(client.stats().peak_in_flight, 1);
    }

    #[test]
    fn reports_progress_to_one_hundred() {
        let client = ScriptedDetectionClient::with_labels(&[]);
        let mut seen = Vec::new();
        client
            .detect_with_progress(&image(), &mut |pct| seen.push(pct))
            .unwrap();
        assert_eq!(seen, vec![25.0, 50.0, 75.0, 100.0]);
    }
}
