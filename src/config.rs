use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Capture backend: "cpal" for real devices, "synth" for a deterministic
    /// generator (tests, machines without audio hardware).
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Capture buffer granularity in milliseconds.
    #[serde(default = "default_buffer_ms")]
    pub buffer_ms: u64,
    /// Duration of each persisted chunk in seconds.
    #[serde(default = "default_chunk_secs")]
    pub chunk_secs: u64,
    /// Cadence of the force-flush that drains partial capture buffers.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Bound on opening a capture source.
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,
    /// Bound on graceful capture shutdown before forced teardown.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// Whether to attempt the best-effort system/output-audio source.
    #[serde(default = "default_true")]
    pub system_audio: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub nats_url: String,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Bounded worker pool size for bulk sync. 1 = sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Upper bound on a single submission payload in bytes.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

fn default_backend() -> String {
    "cpal".to_string()
}
fn default_sample_rate() -> u32 {
    16000
}
fn default_channels() -> u16 {
    1
}
fn default_buffer_ms() -> u64 {
    100
}
fn default_chunk_secs() -> u64 {
    30
}
fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_open_timeout_secs() -> u64 {
    5
}
fn default_stop_timeout_ms() -> u64 {
    2000
}
fn default_true() -> bool {
    true
}
fn default_subject() -> String {
    "processing.audio".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_backoff_cap_ms() -> u64 {
    30000
}
fn default_concurrency() -> usize {
    1
}
fn default_max_payload_bytes() -> usize {
    8 * 1024 * 1024
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl AudioConfig {
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs(self.chunk_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            buffer_ms: default_buffer_ms(),
            chunk_secs: default_chunk_secs(),
            flush_interval_ms: default_flush_interval_ms(),
            open_timeout_secs: default_open_timeout_secs(),
            stop_timeout_ms: default_stop_timeout_ms(),
            system_audio: default_true(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            subject: default_subject(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            concurrency: default_concurrency(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}
