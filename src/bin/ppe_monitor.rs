//! ppe_monitor - command-line front end for the PPE compliance monitor
//!
//! Subcommands:
//! - `probe`: check the detection service is reachable
//! - `upload <file>`: one-shot detection for an image file
//! - `stream`: open the camera and evaluate frames until Ctrl-C
//!
//! Configuration comes from `PPE_MONITOR_CONFIG` plus `PPE_MONITOR_*`
//! environment overrides. `--offline` swaps the HTTP client for a scripted
//! one so the pipeline can be exercised without a service.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ppe_monitor::client::labels_response;
use ppe_monitor::{
    AlertTracker, Cadence, DetectionClient, EnvCredential, HttpDetectionClient, LiveCameraSource,
    MonitorConfig, ScriptedDetectionClient, SessionConfig, SessionController, SessionEvent,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "ppe_monitor",
    about = "PPE compliance monitor (camera/upload -> detection service -> compliance alerts)"
)]
struct Args {
    /// Use a scripted detection client instead of the HTTP service
    #[arg(long, global = true)]
    offline: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(
        long,
        global = true,
        env = "PPE_MONITOR_UI",
        default_value = "auto",
        value_name = "MODE"
    )]
    ui: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the detection service is reachable
    Probe,

    /// Run one detection on an image file
    Upload {
        file: PathBuf,
        /// Print the result as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Stream camera frames to the detection service until stopped
    Stream {
        /// Stop after this many seconds (default: run until Ctrl-C)
        #[arg(long)]
        seconds: Option<u64>,
        /// One detection per second instead of every three
        #[arg(long, conflicts_with = "interval_ms")]
        fast: bool,
        /// Explicit inter-tick delay in milliseconds
        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,
        /// Override the configured camera device
        #[arg(long)]
        device: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = MonitorConfig::load().context("load configuration")?;
    let client = build_client(&cfg, args.offline)?;

    match args.command {
        Command::Probe => probe(&ui, client.as_ref(), &cfg),
        Command::Upload { file, json } => upload(&ui, client, &cfg, file, json),
        Command::Stream {
            seconds,
            fast,
            interval_ms,
            device,
        } => {
            let mut cfg = cfg;
            if let Some(device) = device {
                cfg.camera.device = device;
            }
            if fast {
                cfg.cadence = Cadence::Fast;
            } else if let Some(ms) = interval_ms {
                cfg.cadence = ms.to_string().parse()?;
            }
            stream(&ui, client, &cfg, seconds.map(Duration::from_secs))
        }
    }
}

fn build_client(cfg: &MonitorConfig, offline: bool) -> Result<Arc<dyn DetectionClient>> {
    if offline {
        log::info!("offline mode: using scripted detection client");
        let client = ScriptedDetectionClient::with_labels(&["Person", "Helmet", "Vest"])
            .with_script([
                Ok(labels_response(&["Person", "NoHelmet", "Vest"])),
                Ok(labels_response(&["Person", "NoHelmet", "NoVest"])),
                Ok(labels_response(&["Person", "Helmet", "NoVest"])),
            ])
            .with_latency(Duration::from_millis(200));
        return Ok(Arc::new(client));
    }
    let credentials = Arc::new(EnvCredential::new(cfg.service.token_env.clone()));
    let client = HttpDetectionClient::new(cfg.http_client_config(), credentials)?;
    log::info!("detection endpoint: {}", client.detect_url());
    Ok(Arc::new(client))
}

fn probe(ui: &ui::Ui, client: &dyn DetectionClient, cfg: &MonitorConfig) -> Result<()> {
    let _stage = ui.stage("Probe detection service");
    client
        .probe()
        .with_context(|| format!("service at {} is not reachable", cfg.service.url))?;
    log::info!("{} client: service at {} is reachable", client.name(), cfg.service.url);
    Ok(())
}

fn upload(
    ui: &ui::Ui,
    client: Arc<dyn DetectionClient>,
    cfg: &MonitorConfig,
    file: PathBuf,
    as_json: bool,
) -> Result<()> {
    let camera = LiveCameraSource::new(cfg.camera.clone())?;
    let mut session = SessionController::new(client, Box::new(camera), SessionConfig::default());
    let events = session.subscribe();

    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| file.display().to_string());
    let mut bar = ui.upload_bar(&file_name);

    // Progress events are delivered on the channel while the upload runs on
    // this thread, so drain them on a helper thread.
    let drain = std::thread::spawn(move || {
        for event in events {
            if let SessionEvent::Progress(pct) = event {
                bar.set(pct);
            }
        }
        bar
    });

    let outcome = session.upload_file(&file);
    drop(session);
    let bar = drain
        .join()
        .map_err(|_| anyhow!("progress display thread panicked"))?;
    bar.finish();
    let outcome = outcome.with_context(|| format!("detection failed for {}", file.display()))?;

    if as_json {
        let body = json!({
            "status": outcome.evaluation.status,
            "message": outcome.evaluation.message(),
            "missing": outcome.evaluation.missing_display(),
            "findings": outcome.findings,
            "warnings": outcome.evaluation.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    ui.report(&outcome.evaluation);
    for finding in &outcome.findings {
        println!("    {:<16} {:.2}", finding.label(), finding.confidence());
    }
    for warning in &outcome.evaluation.warnings {
        log::warn!(
            "finding #{} ({}): {}",
            warning.index,
            warning.label,
            warning.reason
        );
    }
    Ok(())
}

fn stream(
    ui: &ui::Ui,
    client: Arc<dyn DetectionClient>,
    cfg: &MonitorConfig,
    limit: Option<Duration>,
) -> Result<()> {
    let camera = LiveCameraSource::new(cfg.camera.clone())?;
    let mut config = SessionConfig::default();
    config.scheduler.cadence = cfg.cadence;
    let mut session = SessionController::new(client, Box::new(camera), config);
    let events = session.subscribe();

    {
        let _stage = ui.stage(&format!("Open camera {}", cfg.camera.device));
        session.start_camera()?;
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    session.start_streaming()?;
    log::info!(
        "streaming every {:?} (Ctrl-C to stop)",
        cfg.cadence.interval()
    );

    let started = Instant::now();
    let mut auth_expired = None;
    let mut tracker = AlertTracker::new();
    while running.load(Ordering::SeqCst) {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(SessionEvent::Evaluation(evaluation)) => {
                tracker.record(&evaluation);
                ui.report(&evaluation);
            }
            Ok(SessionEvent::Alert { message, .. }) => log::warn!("ALERT: {}", message),
            Ok(SessionEvent::TickError { tick, error }) => {
                log::warn!("tick {} failed: {}", tick, error)
            }
            Ok(SessionEvent::AuthExpired { reason }) => {
                auth_expired = Some(reason);
                break;
            }
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!("stopping stream...");
    session.stop_camera()?;
    let stats = session.scheduler_stats();
    log::info!(
        "stream finished: {} ticks, {} evaluations, {} errors, {} status changes (last {:?})",
        stats.ticks,
        stats.evaluations,
        stats.errors,
        tracker.transitions(),
        tracker.last_status()
    );

    if let Some(reason) = auth_expired {
        return Err(anyhow!("credential rejected, sign in again: {}", reason));
    }
    Ok(())
}
