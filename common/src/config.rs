use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which frame source backs the capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    /// Platform camera through the OS capture API.
    Native,
    /// Network camera exposing a single-frame JPEG endpoint.
    Snapshot,
    /// In-process test pattern or still image.
    Synthetic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_backend")]
    pub backend: CameraBackend,
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_snapshot_url")]
    pub snapshot_url: String,
    #[serde(default = "default_snapshot_quality")]
    pub snapshot_quality: u32,
    /// Still image served by the synthetic backend. A generated test pattern
    /// is used when unset.
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Pause after a read that produced no frame, so a dead device does not
    /// spin the polling thread.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewConfig {
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            device_index: 0,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            snapshot_url: default_snapshot_url(),
            snapshot_quality: default_snapshot_quality(),
            image_path: None,
            read_timeout_ms: default_read_timeout_ms(),
            idle_backoff_ms: default_idle_backoff_ms(),
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl CameraConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    /// Time between two frames at the configured rate. A non-positive fps
    /// means "as fast as the device delivers". Rates whose interval does not
    /// fit a `Duration` are rejected by validation and read as unpaced here.
    pub fn frame_interval(&self) -> Duration {
        self.checked_frame_interval().unwrap_or(Duration::ZERO)
    }

    fn checked_frame_interval(&self) -> Option<Duration> {
        if !self.fps.is_finite() {
            return None;
        }
        if self.fps <= 0.0 {
            return Some(Duration::ZERO);
        }
        Duration::try_from_secs_f64(1.0 / self.fps).ok()
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera resolution must be non-zero, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }
        if self.camera.checked_frame_interval().is_none() {
            return Err(ConfigError::Invalid(format!(
                "camera.fps must be a finite rate with a representable frame interval, got {}",
                self.camera.fps
            )));
        }
        if self.preview.queue_depth == 0 {
            return Err(ConfigError::Invalid("preview.queue_depth must be at least 1".into()));
        }
        if !(1..=100).contains(&self.preview.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "preview.jpeg_quality must be in 1..=100, got {}",
                self.preview.jpeg_quality
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_backend() -> CameraBackend {
    CameraBackend::Native
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_fps() -> f64 {
    30.0
}
fn default_snapshot_url() -> String {
    "http://localhost:8080/frame".into()
}
fn default_snapshot_quality() -> u32 {
    80
}
fn default_read_timeout_ms() -> u64 {
    1000
}
fn default_idle_backoff_ms() -> u64 {
    20
}
fn default_queue_depth() -> usize {
    2
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_bind() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8090
}
fn default_log_level() -> String {
    "info".into()
}
