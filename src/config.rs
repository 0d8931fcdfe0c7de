//! Engine settings.
//!
//! Defaults suit a desktop install; every field can be overridden through an
//! `INSPECTION_DL_*` environment variable.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::warn;
use reqwest::Url;

/// Ranged request size (4 MB)
pub const DEFAULT_CHUNK_SIZE: u64 = range_dl::DEFAULT_CHUNK_SIZE;

/// Maximum concurrently executing project jobs
pub const MAX_CONCURRENT_JOBS: usize = 5;

/// Delay before retrying a project whose download root is missing
pub const DEFAULT_RESCHEDULE_MINUTES: u64 = 5;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Machine-scoped directory holding one sub-directory per project.
    pub settings_root: PathBuf,
    pub chunk_size: u64,
    /// `None` runs every inspection of a project at once.
    pub inspection_parallelism: Option<usize>,
    /// `None` runs every file of an inspection at once.
    pub file_parallelism: Option<usize>,
    pub max_concurrent_jobs: usize,
    pub reschedule_delay: Duration,
    /// Pause before force-resolving an inspection still in `Loading`.
    pub loading_settle_delay: Duration,
    pub restart_poll_interval: Duration,
    pub restart_timeout: Duration,
    pub pack_endpoint: Option<Url>,
}

impl Settings {
    pub fn with_root(settings_root: impl Into<PathBuf>) -> Self {
        Self {
            settings_root: settings_root.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            inspection_parallelism: default_parallelism(),
            file_parallelism: default_parallelism(),
            max_concurrent_jobs: MAX_CONCURRENT_JOBS,
            reschedule_delay: minutes(DEFAULT_RESCHEDULE_MINUTES),
            loading_settle_delay: Duration::from_secs(1),
            restart_poll_interval: Duration::from_millis(250),
            restart_timeout: Duration::from_secs(30),
            pack_endpoint: None,
        }
    }

    /// Defaults overlaid with `INSPECTION_DL_*` environment variables.
    pub fn from_env() -> Self {
        let root = std::env::var("INSPECTION_DL_SETTINGS_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_settings_root);
        let mut settings = Self::with_root(root);

        if let Some(chunk) = env_parse::<u64>("INSPECTION_DL_CHUNK_SIZE") {
            settings.chunk_size = chunk.max(1);
        }
        if let Some(limit) = env_parse::<usize>("INSPECTION_DL_INSPECTION_PARALLELISM") {
            settings.inspection_parallelism = (limit > 0).then_some(limit);
        }
        if let Some(limit) = env_parse::<usize>("INSPECTION_DL_FILE_PARALLELISM") {
            settings.file_parallelism = (limit > 0).then_some(limit);
        }
        if let Some(jobs) = env_parse::<usize>("INSPECTION_DL_MAX_JOBS") {
            settings.max_concurrent_jobs = jobs.max(1);
        }
        if let Some(count) = env_parse::<u64>("INSPECTION_DL_RESCHEDULE_MINUTES") {
            settings.reschedule_delay = minutes(count);
        }
        settings.pack_endpoint = env_parse::<Url>("INSPECTION_DL_PACK_ENDPOINT");
        settings
    }

    pub(crate) fn inspection_limit(&self, count: usize) -> usize {
        self.inspection_parallelism.unwrap_or(count).max(1)
    }

    pub(crate) fn file_limit(&self, count: usize) -> usize {
        self.file_parallelism.unwrap_or(count).max(1)
    }
}

pub fn default_settings_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("inspection-downloader")
        .join("downloads")
}

fn minutes(count: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(60))
}

// Debug builds serialize work so runs are reproducible.
fn default_parallelism() -> Option<usize> {
    if cfg!(debug_assertions) {
        Some(1)
    } else {
        None
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("settings: ignoring invalid {}={}", key, raw);
            None
        }
    }
}
