use anyhow::{Context, Result};
use serde::Deserialize;

use crate::transcription::DEFAULT_MAX_UPLOAD_BYTES;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub transcription: TranscriptionConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
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
    pub recordings_path: String,
    pub sample_rate: u32,
    pub channels: u16,
    #[serde(default = "default_chunk_duration_secs")]
    pub chunk_duration_secs: u64,
    #[serde(default = "default_frame_duration_ms")]
    pub frame_duration_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionConfig {
    /// Base URL of the lecture server (`/upload?preview=true` is appended)
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base URL of the finalize backend (`/upload` is appended)
    pub upload_endpoint: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// sled database holding the `handles` and `files` trees
    pub store_path: String,
    /// Directory of the URL-keyed response cache
    pub response_cache_path: String,
    /// Base URL that serves `/uploads/<file>` for local audio locations
    pub media_base_url: String,
    /// Audio bytes the in-memory tier may hold before evicting
    #[serde(default = "default_memory_limit_bytes")]
    pub memory_limit_bytes: usize,
}

fn default_chunk_duration_secs() -> u64 {
    120
}

fn default_frame_duration_ms() -> u64 {
    100
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_memory_limit_bytes() -> usize {
    crate::cache::DEFAULT_MEMORY_LIMIT_BYTES
}

impl Config {
    /// Load `path` (any extension the config crate understands) and apply
    /// `SCRIBE__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SCRIBE").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }
}
