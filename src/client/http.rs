//! HTTP detection client.
//!
//! Sends the image as a `multipart/form-data` upload (single `file` part) to
//! the detection endpoint with an `Authorization: Bearer` header, and maps the
//! response onto the error taxonomy:
//! - 401 -> `Auth` (never retried)
//! - other non-2xx, transport failures, timeouts -> `Network`
//! - 2xx with `"success": false` -> `Service`
//! - 2xx body that is not JSON -> `MalformedResponse`
//!
//! A missing `success` flag counts as success.

use std::io::{Cursor, Read};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;
use zeroize::Zeroizing;

use super::credential::CredentialProvider;
use super::DetectionClient;
use crate::error::{MonitorError, Result};
use crate::frame::ImagePayload;

const MAX_RESPONSE_BYTES: u64 = 32 * 1024 * 1024;
const MULTIPART_FIELD: &str = "file";
const PROGRESS_POLL: Duration = Duration::from_millis(50);

/// Configuration for the HTTP detection client.
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    /// Service root, e.g. "http://localhost:8000".
    pub base_url: String,
    /// Detection endpoint path relative to the root.
    pub detect_path: String,
    /// Whole-request deadline; a hung service surfaces as `Network`.
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            detect_path: "/detect/".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

pub struct HttpDetectionClient {
    client: Client,
    base_url: Url,
    detect_url: Url,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpDetectionClient {
    pub fn new(config: HttpClientConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| MonitorError::Config(format!("invalid service url '{}': {}", config.base_url, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(MonitorError::Config(format!(
                "unsupported service scheme '{}'; expected http(s)",
                base_url.scheme()
            )));
        }
        let detect_url = base_url
            .join(&config.detect_path)
            .map_err(|e| MonitorError::Config(format!("invalid detect path '{}': {}", config.detect_path, e)))?;
        if config.timeout.is_zero() {
            return Err(MonitorError::Config("request timeout must be greater than zero".into()));
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|e| MonitorError::Config(format!("build http client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            detect_url,
            credentials,
        })
    }

    pub fn detect_url(&self) -> &str {
        self.detect_url.as_str()
    }

    fn token(&self) -> Result<String> {
        self.credentials
            .bearer_token()
            .ok_or_else(|| MonitorError::Auth("no credential available".into()))
    }
}

impl DetectionClient for HttpDetectionClient {
    fn name(&self) -> &'static str {
        "http"
    }

    fn submit(&self, image: &ImagePayload, progress: Option<&mut dyn FnMut(f32)>) -> Result<Value> {
        let token = self.token()?;
        let total = image.len() as u64;
        let (progress_tx, progress_rx) = mpsc::channel();
        let reader = ProgressReader::new(
            Cursor::new(Zeroizing::new(image.bytes().to_vec())),
            total,
            progress_tx,
        );
        let part = Part::reader_with_length(reader, total)
            .file_name(image.file_name().to_string())
            .mime_str(image.mime())
            .map_err(|e| MonitorError::Validation(format!("invalid content type '{}': {}", image.mime(), e)))?;
        let request = self
            .client
            .post(self.detect_url.clone())
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .multipart(Form::new().part(MULTIPART_FIELD, part));

        log::debug!(
            "HttpDetectionClient: POST {} ({} bytes, {})",
            self.detect_url,
            total,
            image.mime()
        );

        // The body is pulled on the sending thread; progress is relayed back
        // here so the callback never leaves the caller's thread.
        let sent = std::thread::scope(|scope| {
            let worker = scope.spawn(move || request.send());
            let mut progress = progress;
            loop {
                match progress_rx.recv_timeout(PROGRESS_POLL) {
                    Ok(pct) => {
                        if let Some(progress) = progress.as_mut() {
                            progress(pct);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) if worker.is_finished() => break,
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            if let Some(progress) = progress.as_mut() {
                for pct in progress_rx.try_iter() {
                    progress(pct);
                }
            }
            worker.join()
        });

        let response = sent
            .map_err(|_| MonitorError::Network("request thread panicked".into()))?
            .map_err(|e| MonitorError::Network(e.to_string()))?;
        parse_response(response)
    }

    fn probe(&self) -> Result<()> {
        let response = self.client.get(self.base_url.clone()).send().map_err(|e| {
            MonitorError::Network(format!("cannot connect to service at {}: {}", self.base_url, e))
        })?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(MonitorError::Network(format!(
                "service at {} returned HTTP {}",
                self.base_url,
                status.as_u16()
            )));
        }
        Ok(())
    }
}

fn parse_response(response: Response) -> Result<Value> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(MonitorError::Auth(error_detail(response, "unauthorized")));
    }
    if !status.is_success() {
        return Err(MonitorError::Network(format!(
            "HTTP {}: {}",
            status.as_u16(),
            error_detail(response, "request failed")
        )));
    }

    let body = read_body(response)?;
    let value: Value = serde_json::from_str(&body)
        .map_err(|e| MonitorError::MalformedResponse(format!("response is not JSON: {}", e)))?;
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(MonitorError::Service(
            detail_from_json(&value).unwrap_or_else(|| "detection failed".to_string()),
        ));
    }
    Ok(value)
}

fn read_body(response: Response) -> Result<String> {
    let mut body = String::new();
    response
        .take(MAX_RESPONSE_BYTES)
        .read_to_string(&mut body)
        .map_err(|e| MonitorError::Network(format!("read response: {}", e)))?;
    Ok(body)
}

fn error_detail(response: Response, fallback: &str) -> String {
    read_body(response)
        .ok()
        .and_then(|body| serde_json::from_str::<Value>(&body).ok())
        .and_then(|value| detail_from_json(&value))
        .unwrap_or_else(|| fallback.to_string())
}

fn detail_from_json(value: &Value) -> Option<String> {
    ["detail", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Counts image bytes as the request body is read and reports the upload
/// percentage over a channel.
struct ProgressReader<R> {
    inner: R,
    sent: u64,
    total: u64,
    progress: Sender<f32>,
}

impl<R: Read> ProgressReader<R> {
    fn new(inner: R, total: u64, progress: Sender<f32>) -> Self {
        Self {
            inner,
            sent: 0,
            total,
            progress,
        }
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.sent += n as u64;
            let pct = if self.total == 0 {
                100.0
            } else {
                (self.sent as f64 / self.total as f64 * 100.0) as f32
            };
            // Receiver gone means the caller stopped listening; keep uploading.
            let _ = self.progress.send(pct);
        }
        Ok(n)
    }
}
