use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::capture::CameraConfig;
use crate::client::HttpClientConfig;
use crate::scheduler::Cadence;

const DEFAULT_SERVICE_URL: &str = "http://localhost:8000";
const DEFAULT_DETECT_PATH: &str = "/detect/";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CAMERA_DEVICE: &str = "stub://camera0";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_TOKEN_VAR: &str = "PPE_MONITOR_TOKEN";

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    service: Option<ServiceConfigFile>,
    camera: Option<CameraConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    url: Option<String>,
    detect_path: Option<String>,
    timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    token_env: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    cadence: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub service: ServiceSettings,
    pub camera: CameraConfig,
    pub cadence: Cadence,
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub url: String,
    pub detect_path: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Environment variable holding the bearer token.
    pub token_env: String,
}

impl MonitorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PPE_MONITOR_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            base_url: self.service.url.clone(),
            detect_path: self.service.detect_path.clone(),
            timeout: self.service.timeout,
            connect_timeout: self.service.connect_timeout,
        }
    }

    fn from_file(file: MonitorConfigFile) -> Result<Self> {
        let service = file.service.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let cadence = match file.stream.and_then(|stream| stream.cadence) {
            Some(raw) => raw.parse().map_err(|e| anyhow!("stream.cadence: {}", e))?,
            None => Cadence::default(),
        };
        Ok(Self {
            service: ServiceSettings {
                url: service
                    .url
                    .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string()),
                detect_path: service
                    .detect_path
                    .unwrap_or_else(|| DEFAULT_DETECT_PATH.to_string()),
                timeout: Duration::from_secs(service.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
                connect_timeout: Duration::from_secs(
                    service
                        .connect_timeout_secs
                        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
                ),
                token_env: service
                    .token_env
                    .unwrap_or_else(|| DEFAULT_TOKEN_VAR.to_string()),
            },
            camera: CameraConfig {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                jpeg_quality: camera.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            cadence,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("PPE_MONITOR_SERVICE_URL") {
            if !url.trim().is_empty() {
                self.service.url = url.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("PPE_MONITOR_DETECT_PATH") {
            if !path.trim().is_empty() {
                self.service.detect_path = path.trim().to_string();
            }
        }
        if let Ok(timeout) = std::env::var("PPE_MONITOR_TIMEOUT_SECS") {
            let seconds: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("PPE_MONITOR_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.service.timeout = Duration::from_secs(seconds);
        }
        if let Ok(device) = std::env::var("PPE_MONITOR_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device.trim().to_string();
            }
        }
        if let Ok(cadence) = std::env::var("PPE_MONITOR_CADENCE") {
            self.cadence = cadence
                .parse()
                .map_err(|e| anyhow!("PPE_MONITOR_CADENCE: {}", e))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let parsed = url::Url::parse(&self.service.url)
            .map_err(|e| anyhow!("service url '{}' is invalid: {}", self.service.url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "service url must use http or https, got '{}'",
                parsed.scheme()
            ));
        }
        if !self.service.detect_path.starts_with('/') {
            self.service.detect_path = format!("/{}", self.service.detect_path);
        }
        if self.service.timeout.is_zero() {
            return Err(anyhow!("service timeout must be greater than zero"));
        }
        if self.service.connect_timeout.is_zero() {
            return Err(anyhow!("service connect timeout must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if !(1..=100).contains(&self.camera.jpeg_quality) {
            return Err(anyhow!("camera jpeg_quality must be between 1 and 100"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
