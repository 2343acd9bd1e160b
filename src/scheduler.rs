//! Stream scheduler.
//!
//! Runs the capture -> detect -> evaluate cycle for a streaming session:
//!
//! 1. capture one frame from the session's source
//! 2. submit it with `detect_once`
//! 3. on success evaluate against the session's last status, hand the result
//!    to `on_evaluation`, then record it as the new last status
//! 4. on failure report a `TickError` and keep going
//! 5. wait the inter-tick delay, then repeat while still running
//!
//! The cycle runs sequentially on one worker thread, so there is never more
//! than one request in flight and evaluations arrive in capture order. The
//! delay starts when a cycle completes, not when it starts: a slow service
//! lowers the sampling rate instead of building a backlog.
//!
//! `stop` cancels the token, wakes the inter-tick wait and joins the worker.
//! Once it returns no further detection call can begin. A response that lands
//! after cancellation is discarded.
//!
//! Cancellation is checked right before a request is submitted, but a request
//! already on the wire is not aborted. A `stop` that lands after that check
//! blocks until the request completes or hits the client timeout (30 s by
//! default), and its result is then dropped.
//!
//! Two failures end the loop on their own: `Auth` (the session is invalidated
//! and never retried) and `DeviceUnavailable` from the capture source.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::client::DetectionClient;
use crate::compliance::{evaluate, ComplianceEvaluation};
use crate::error::{MonitorError, Result};
use crate::session::{SessionContext, SessionEvent};

const NORMAL_INTERVAL: Duration = Duration::from_millis(3000);
const FAST_INTERVAL: Duration = Duration::from_millis(1000);

/// Inter-tick delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Cadence {
    /// One detection every 3 s.
    #[default]
    Normal,
    /// One detection every second.
    Fast,
    Custom(Duration),
}

impl Cadence {
    pub fn interval(self) -> Duration {
        match self {
            Cadence::Normal => NORMAL_INTERVAL,
            Cadence::Fast => FAST_INTERVAL,
            Cadence::Custom(interval) => interval,
        }
    }
}

impl FromStr for Cadence {
    type Err = MonitorError;

    /// Accepts "normal", "fast" or a millisecond count.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Cadence::Normal),
            "fast" => Ok(Cadence::Fast),
            other => {
                let millis: u64 = other.parse().map_err(|_| {
                    MonitorError::Config(format!(
                        "cadence must be 'normal', 'fast' or milliseconds, got '{}'",
                        s
                    ))
                })?;
                if millis == 0 {
                    return Err(MonitorError::Config("cadence must be greater than zero".into()));
                }
                Ok(Cadence::Custom(Duration::from_millis(millis)))
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SchedulerConfig {
    pub cadence: Cadence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Cancellation flag with a wakeable wait.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cv) = &*self.inner;
        let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());
        *cancelled = true;
        cv.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep up to `timeout`. Returns true if cancelled before or during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cv) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = cv
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

/// Counters for one scheduler across all its runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub evaluations: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    evaluations: AtomicU64,
    errors: AtomicU64,
    in_flight: AtomicBool,
}

/// The pending cycle of a running scheduler.
struct ScheduledTick {
    token: CancellationToken,
    worker: JoinHandle<()>,
}

pub struct StreamScheduler {
    client: Arc<dyn DetectionClient>,
    config: SchedulerConfig,
    tick: Option<ScheduledTick>,
    counters: Arc<Counters>,
}

impl StreamScheduler {
    pub fn new(client: Arc<dyn DetectionClient>, config: SchedulerConfig) -> Self {
        Self {
            client,
            config,
            tick: None,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.config.cadence.interval()
    }

    pub fn set_cadence(&mut self, cadence: Cadence) {
        self.config.cadence = cadence;
    }

    /// Running until `stop` is called or the loop ends itself on a fatal error.
    pub fn state(&self) -> SchedulerState {
        match &self.tick {
            Some(tick) if !tick.worker.is_finished() => SchedulerState::Running,
            _ => SchedulerState::Stopped,
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            ticks: self.counters.ticks.load(Ordering::SeqCst),
            evaluations: self.counters.evaluations.load(Ordering::SeqCst),
            errors: self.counters.errors.load(Ordering::SeqCst),
        }
    }

    /// True while a detection request is outstanding.
    pub fn request_in_flight(&self) -> bool {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    pub fn start<F>(&mut self, ctx: &SessionContext, on_evaluation: F) -> Result<()>
    where
        F: FnMut(&ComplianceEvaluation) + Send + 'static,
    {
        if self.state() == SchedulerState::Running {
            return Err(MonitorError::AlreadyRunning);
        }
        // A loop that ended on its own still has a handle to reap.
        self.stop();

        let token = CancellationToken::new();
        let run = StreamRun {
            ctx: ctx.clone(),
            client: self.client.clone(),
            interval: self.interval(),
            token: token.clone(),
            counters: self.counters.clone(),
        };
        log::info!(
            "StreamScheduler: starting ({} client, {:?} interval)",
            self.client.name(),
            run.interval
        );
        let worker = std::thread::spawn(move || run.run(on_evaluation));
        self.tick = Some(ScheduledTick { token, worker });
        Ok(())
    }

    /// Cancel the pending tick and wait for the worker to exit.
    pub fn stop(&mut self) {
        let Some(tick) = self.tick.take() else {
            return;
        };
        tick.token.cancel();
        if self.request_in_flight() {
            log::info!("StreamScheduler: waiting for the in-flight request before stopping");
        }
        if tick.worker.join().is_err() {
            log::error!("StreamScheduler: stream worker panicked");
        }
        log::info!("StreamScheduler: stopped");
    }
}

impl Drop for StreamScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct StreamRun {
    ctx: SessionContext,
    client: Arc<dyn DetectionClient>,
    interval: Duration,
    token: CancellationToken,
    counters: Arc<Counters>,
}

enum TickOutcome {
    Continue,
    Finished,
}

impl StreamRun {
    fn run<F: FnMut(&ComplianceEvaluation)>(self, mut on_evaluation: F) {
        loop {
            if self.token.is_cancelled() {
                break;
            }
            if let TickOutcome::Finished = self.tick(&mut on_evaluation) {
                break;
            }
            if self.token.wait_timeout(self.interval) {
                break;
            }
        }
        self.ctx.set_request_in_flight(false);
    }

    fn tick<F: FnMut(&ComplianceEvaluation)>(&self, on_evaluation: &mut F) -> TickOutcome {
        let tick_no = self.counters.ticks.fetch_add(1, Ordering::SeqCst) + 1;

        let frame = match self.ctx.capture_frame() {
            Ok(frame) => frame,
            Err(err) => {
                self.report_error(tick_no, &err);
                return match err {
                    MonitorError::DeviceUnavailable(_) => TickOutcome::Finished,
                    _ => TickOutcome::Continue,
                };
            }
        };

        if self.token.is_cancelled() {
            return TickOutcome::Finished;
        }
        self.ctx.set_request_in_flight(true);
        self.counters.in_flight.store(true, Ordering::SeqCst);
        let result = self.client.detect_once(&frame);
        self.counters.in_flight.store(false, Ordering::SeqCst);
        self.ctx.set_request_in_flight(false);
        drop(frame);

        if self.token.is_cancelled() {
            log::debug!("StreamScheduler: tick {} result discarded after stop", tick_no);
            return TickOutcome::Finished;
        }

        match result {
            Ok(normalized) => {
                let previous = self.ctx.last_status();
                let evaluation =
                    evaluate(&normalized.findings, previous).with_warnings(normalized.warnings);
                log::debug!(
                    "StreamScheduler: tick {} -> {:?} ({} findings)",
                    tick_no,
                    evaluation.status,
                    normalized.findings.len()
                );
                on_evaluation(&evaluation);
                self.ctx.record_evaluation(evaluation);
                self.counters.evaluations.fetch_add(1, Ordering::SeqCst);
                TickOutcome::Continue
            }
            Err(err) if err.is_auth() => {
                self.counters.errors.fetch_add(1, Ordering::SeqCst);
                log::warn!("StreamScheduler: credential rejected, ending stream: {}", err);
                self.ctx.invalidate(&err);
                TickOutcome::Finished
            }
            Err(err) => {
                self.report_error(tick_no, &err);
                TickOutcome::Continue
            }
        }
    }

    fn report_error(&self, tick_no: u64, err: &MonitorError) {
        self.counters.errors.fetch_add(1, Ordering::SeqCst);
        log::warn!("StreamScheduler: tick {} failed: {}", tick_no, err);
        self.ctx.record_error(err);
        self.ctx.emit(SessionEvent::TickError {
            tick: tick_no,
            error: err.clone(),
        });
    }
}
