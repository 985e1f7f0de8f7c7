//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! server, storage, tool, transcode, worker and notification sections. Every
//! section defaults sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::video::Category;
use crate::Error;

/// Smallest part size S3 accepts for every part but the last.
pub const MIN_PART_SIZE_BYTES: u64 = 5 * 1024 * 1024;
/// Largest part size S3 accepts.
pub const MAX_PART_SIZE_BYTES: u64 = 5 * 1024 * 1024 * 1024;
/// Upper bound on the lifetime of a signed part URL.
pub const MAX_PART_URL_TTL_SECS: u64 = 3600;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub tools: ToolsConfig,
    pub transcode: TranscodeConfig,
    pub worker: WorkerConfig,
    pub notifications: NotificationsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        match self.storage.backend.as_str() {
            "s3" => {
                if self.storage.bucket.is_empty() {
                    warnings.push("storage.bucket is empty for the s3 backend".into());
                }
            }
            "memory" => {
                warnings.push("storage.backend is 'memory'; objects are lost on restart".into());
            }
            other => warnings.push(format!(
                "storage.backend '{other}' is not recognized (valid: s3, memory)"
            )),
        }

        let part = self.storage.part_size_bytes;
        if !(MIN_PART_SIZE_BYTES..=MAX_PART_SIZE_BYTES).contains(&part) {
            warnings.push(format!(
                "storage.part_size_bytes {part} is outside 5 MiB..=5 GiB and will be clamped"
            ));
        }
        if self.storage.part_url_ttl_secs > MAX_PART_URL_TTL_SECS {
            warnings.push(format!(
                "storage.part_url_ttl_secs {} exceeds one hour and will be clamped",
                self.storage.part_url_ttl_secs
            ));
        }

        if self.worker.concurrency == 0 {
            warnings.push("worker.concurrency is 0; no videos will be processed".into());
        }
        if self.transcode.max_parallel_rungs == 0 {
            warnings.push("transcode.max_parallel_rungs is 0; treated as 1".into());
        }
        if !(0.0..=1.0).contains(&self.transcode.thumbnail_position) {
            warnings.push("transcode.thumbnail_position must be within 0.0..=1.0".into());
        }

        for (i, hook) in self.notifications.webhooks.iter().enumerate() {
            if hook.url.is_empty() {
                warnings.push(format!("notifications.webhooks[{i}].url is empty"));
            }
        }

        let email = &self.notifications.email;
        if email.enabled {
            if email.relay_url.is_none() {
                warnings.push("notifications.email is enabled but relay_url is not set".into());
            }
            if email.recipients.is_empty() {
                warnings.push("notifications.email is enabled but has no recipients".into());
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            db_path: PathBuf::from("/data/vodforge.db"),
        }
    }
}

/// Object storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `s3` or `memory`.
    pub backend: String,
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO, R2).
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
    #[serde(default = "default_part_size")]
    pub part_size_bytes: u64,
    #[serde(default = "default_part_url_ttl")]
    pub part_url_ttl_secs: u64,
    pub folders: FolderConfig,
}

fn default_part_size() -> u64 {
    100 * 1024 * 1024
}
fn default_part_url_ttl() -> u64 {
    MAX_PART_URL_TTL_SECS
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "s3".into(),
            bucket: "vodforge-media".into(),
            region: "us-east-1".into(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
            part_size_bytes: default_part_size(),
            part_url_ttl_secs: default_part_url_ttl(),
            folders: FolderConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Part size clamped to the range S3 accepts.
    pub fn effective_part_size(&self) -> u64 {
        self.part_size_bytes
            .clamp(MIN_PART_SIZE_BYTES, MAX_PART_SIZE_BYTES)
    }

    /// Signed-URL lifetime, never above one hour.
    pub fn effective_part_url_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.part_url_ttl_secs.clamp(1, MAX_PART_URL_TTL_SECS))
    }
}

/// Top-level storage folder per category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderConfig {
    pub daily_classes: String,
    pub master_classes: String,
    pub psychology: String,
    pub stocks: String,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            daily_classes: "daily-classes".into(),
            master_classes: "master-classes".into(),
            psychology: "psychology".into(),
            stocks: "stocks".into(),
        }
    }
}

impl FolderConfig {
    pub fn folder(&self, category: Category) -> &str {
        match category {
            Category::DailyClasses => &self.daily_classes,
            Category::MasterClasses => &self.master_classes,
            Category::Psychology => &self.psychology,
            Category::Stocks => &self.stocks,
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Transcoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    #[serde(default = "default_segment_secs")]
    pub segment_secs: u32,
    /// Fraction of the duration at which the thumbnail frame is taken.
    #[serde(default = "default_thumbnail_position")]
    pub thumbnail_position: f64,
    #[serde(default = "default_max_parallel_rungs")]
    pub max_parallel_rungs: usize,
    #[serde(default = "default_video_preset")]
    pub video_preset: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// Parent directory for per-job scratch workspaces (system temp if unset).
    pub scratch_dir: Option<PathBuf>,
    /// Per-ffmpeg-invocation limit; unlimited when unset.
    pub timeout_secs: Option<u64>,
}

fn default_segment_secs() -> u32 {
    10
}
fn default_thumbnail_position() -> f64 {
    0.1
}
fn default_max_parallel_rungs() -> usize {
    1
}
fn default_video_preset() -> String {
    "veryfast".into()
}
fn default_audio_bitrate() -> String {
    "128k".into()
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            segment_secs: default_segment_secs(),
            thumbnail_position: default_thumbnail_position(),
            max_parallel_rungs: default_max_parallel_rungs(),
            video_preset: default_video_preset(),
            audio_bitrate: default_audio_bitrate(),
            scratch_dir: None,
            timeout_secs: None,
        }
    }
}

/// Background worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    pub retry: RetryConfig,
}

fn default_concurrency() -> usize {
    2
}
fn default_poll_interval() -> u64 {
    2000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            retry: RetryConfig::default(),
        }
    }
}

/// Automatic retry policy for failed processing jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Zero disables automatic retries.
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_initial_backoff() -> u64 {
    30
}
fn default_max_backoff() -> u64 {
    900
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

/// Outbound notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub webhooks: Vec<WebhookConfig>,
    pub email: EmailConfig,
}

/// A webhook endpoint that receives every lifecycle event as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Email relay used for processing-completed / processing-failed mails.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub relay_url: Option<String>,
    pub api_key: Option<String>,
    pub from: Option<String>,
    pub recipients: Vec<String>,
}
