//! Terminal presentation for the `ppe_monitor` binary.
//!
//! Progress goes to stderr: spinners for stages, a percentage bar for
//! uploads. Plain mode prints one line per step instead, for logs and pipes.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use ppe_monitor::{ComplianceEvaluation, ComplianceStatus};

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Bar driven by upload percentages.
    pub fn upload_bar(&self, file_name: &str) -> UploadBar {
        if self.pretty() {
            let bar = ProgressBar::new(100);
            bar.set_draw_target(ProgressDrawTarget::stderr());
            let style = ProgressStyle::with_template("{msg} [{bar:30}] {pos:>3}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            bar.set_style(style.progress_chars("=> "));
            bar.set_message(format!("Uploading {file_name}"));
            UploadBar {
                bar: Some(bar),
                last_printed: 0,
            }
        } else {
            eprintln!("==> Uploading {}", file_name);
            UploadBar {
                bar: None,
                last_printed: 0,
            }
        }
    }

    /// One status line per evaluation; alerts are marked.
    pub fn report(&self, evaluation: &ComplianceEvaluation) {
        let marker = match evaluation.status {
            ComplianceStatus::Critical => "!!",
            ComplianceStatus::Warning => " !",
            ComplianceStatus::Compliant => "ok",
            ComplianceStatus::Unknown => " ?",
        };
        let change = if evaluation.changed_from_previous {
            " (changed)"
        } else {
            ""
        };
        println!("[{}] {}{}", marker, evaluation.message(), change);
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct UploadBar {
    bar: Option<ProgressBar>,
    last_printed: u64,
}

impl UploadBar {
    pub fn set(&mut self, pct: f32) {
        let pos = pct.clamp(0.0, 100.0).round() as u64;
        match &self.bar {
            Some(bar) => bar.set_position(pos),
            // Plain mode prints quarter steps only.
            None if pos >= self.last_printed + 25 || (pos == 100 && self.last_printed < 100) => {
                eprintln!("    {:>3}%", pos);
                self.last_printed = pos;
            }
            None => {}
        }
    }

    pub fn finish(self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
