//! Configuration loaded from the environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Where finished artifacts are published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    /// Copy into a local directory served under `/media`.
    Fs,
    /// `PUT` each artifact to an HTTP object store.
    Http,
}

/// Configuration for the relay server.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    /// Directory where raw uploads are persisted before transcoding
    pub upload_dir: PathBuf,
    /// Parent of the per-session working directories
    pub work_dir: PathBuf,
    pub storage_backend: StorageBackend,
    /// Root directory of the fs object store
    pub storage_root: PathBuf,
    /// Base URL returned for artifacts in the fs object store
    pub public_base_url: String,
    /// Base URL of the HTTP object store
    pub storage_endpoint: String,
    /// Remote folder every session folder is nested under
    pub storage_prefix: String,
    pub pipeline: PipelineSettings,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let addr = env::var("ADDR").unwrap_or_else(|_| String::from("127.0.0.1"));
        let port = env::var("PORT").unwrap_or_else(|_| String::from("3000"));
        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}/media", addr, port));

        Self {
            upload_dir: PathBuf::from(
                env::var("UPLOAD_DIR").unwrap_or_else(|_| String::from("temp/uploads")),
            ),
            work_dir: PathBuf::from(
                env::var("WORK_DIR").unwrap_or_else(|_| String::from("temp/final")),
            ),
            storage_backend: match env::var("STORAGE_BACKEND").as_deref() {
                Ok("http") => StorageBackend::Http,
                _ => StorageBackend::Fs,
            },
            storage_root: PathBuf::from(
                env::var("STORAGE_ROOT").unwrap_or_else(|_| String::from("temp/storage")),
            ),
            public_base_url,
            storage_endpoint: env::var("STORAGE_ENDPOINT")
                .unwrap_or_else(|_| String::from("http://127.0.0.1:9000/media")),
            storage_prefix: env::var("STORAGE_PREFIX")
                .unwrap_or_else(|_| String::from("hls_videos")),
            pipeline: PipelineSettings::from_env(),
            addr,
            port,
        }
    }
}

/// Knobs of the transcode-and-upload pipeline.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Maximum simultaneous outbound transfers
    pub upload_concurrency: usize,
    /// Attempts per artifact before it is considered failed
    pub upload_attempts: u32,
    /// Base delay between attempts, multiplied by the attempt number
    pub upload_retry_delay: Duration,
    /// How long in-flight uploads may run after the session has ended
    pub upload_grace: Duration,
    /// Interval between two size checks of a detected file
    pub settle_interval: Duration,
    /// Minimum length of the shorter video side
    pub min_dimension: u32,
    /// Target duration of one HLS segment
    pub segment_seconds: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            upload_concurrency: 5,
            upload_attempts: 1,
            upload_retry_delay: Duration::from_millis(250),
            upload_grace: Duration::from_secs(2),
            settle_interval: Duration::from_millis(100),
            min_dimension: 360,
            segment_seconds: 4,
        }
    }
}

impl PipelineSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            upload_concurrency: parse_var("UPLOAD_CONCURRENCY", defaults.upload_concurrency).max(1),
            upload_attempts: parse_var("UPLOAD_ATTEMPTS", defaults.upload_attempts).max(1),
            upload_retry_delay: millis_var("UPLOAD_RETRY_DELAY_MS", defaults.upload_retry_delay),
            upload_grace: millis_var("UPLOAD_GRACE_MS", defaults.upload_grace),
            settle_interval: millis_var("SETTLE_INTERVAL_MS", defaults.settle_interval),
            min_dimension: parse_var("MIN_DIMENSION", defaults.min_dimension),
            segment_seconds: parse_var("HLS_SEGMENT_SECONDS", defaults.segment_seconds).max(1),
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}

fn millis_var(key: &str, default: Duration) -> Duration {
    Duration::from_millis(parse_var(key, default.as_millis() as u64))
}
