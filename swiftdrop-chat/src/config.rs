//! Configuration for the sync engine.
//!
//! Every behavior constant — page sizes, request timeout, cache TTL, retry
//! bound, backoff schedule — lives in [`SyncConfig`]. Compiled defaults can
//! be overlaid by a TOML file (`~/.config/swiftdrop/sync.toml`); a missing
//! file is not an error, an explicitly-passed path that does not exist is.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// Could not determine the user's config directory.
    #[error("could not determine config directory (no HOME or XDG_CONFIG_HOME)")]
    NoConfigDir,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    sync: SyncFileConfig,
    cache: CacheFileConfig,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    initial_page_size: Option<u32>,
    page_size: Option<u32>,
    request_timeout_secs: Option<u64>,
    max_send_retries: Option<u32>,
    retry_backoff_secs: Option<Vec<u64>>,
    read_receipt_debounce_ms: Option<u64>,
    event_buffer: Option<usize>,
}

/// `[cache]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct CacheFileConfig {
    ttl_secs: Option<u64>,
    dir: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved sync engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Page size for the initial history load (favors fast first paint).
    pub initial_page_size: u32,
    /// Page size for incremental older-history fetches.
    pub page_size: u32,
    /// Timeout applied to every network request.
    pub request_timeout: Duration,
    /// How long a cached snapshot stays servable.
    pub cache_ttl: Duration,
    /// Maximum automatic resend attempts before a send becomes `Failed`.
    pub max_send_retries: u32,
    /// Delay before each retry, indexed by retries already made.
    pub retry_backoff: Vec<Duration>,
    /// Debounce window for mark-read emissions.
    pub read_receipt_debounce: Duration,
    /// Buffer size for the session event channel.
    pub event_buffer: usize,
    /// Override for the cache directory; `None` uses the platform default.
    pub cache_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_page_size: 30,
            page_size: 15,
            request_timeout: Duration::from_secs(20),
            cache_ttl: Duration::from_secs(5 * 60),
            max_send_retries: 3,
            retry_backoff: vec![
                Duration::from_secs(5),
                Duration::from_secs(15),
                Duration::from_secs(30),
            ],
            read_receipt_debounce: Duration::from_millis(500),
            event_buffer: 64,
            cache_dir: None,
        }
    }
}

impl SyncConfig {
    /// Delay to wait before the next resend of an entry that has already
    /// made `retries_made` attempts.
    ///
    /// The schedule is clamped to its last entry, so a schedule shorter
    /// than the retry bound repeats its final delay.
    #[must_use]
    pub fn backoff_delay(&self, retries_made: u32) -> Duration {
        let idx = (retries_made as usize).min(self.retry_backoff.len().saturating_sub(1));
        self.retry_backoff
            .get(idx)
            .copied()
            .unwrap_or(Duration::from_secs(5))
    }

    /// Loads configuration from the default location
    /// (`~/.config/swiftdrop/sync.toml`), falling back to compiled
    /// defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config directory cannot be
    /// determined or an existing file cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        let path = dir.join("swiftdrop").join("sync.toml");
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from an explicit path. Unlike [`load`](Self::load),
    /// a missing file here is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&raw)?;
        Ok(Self::default().overlay(file))
    }

    /// Applies the Option-fields of a parsed file on top of `self`.
    fn overlay(mut self, file: ConfigFile) -> Self {
        if let Some(v) = file.sync.initial_page_size {
            self.initial_page_size = v;
        }
        if let Some(v) = file.sync.page_size {
            self.page_size = v;
        }
        if let Some(v) = file.sync.request_timeout_secs {
            self.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.sync.max_send_retries {
            self.max_send_retries = v;
        }
        if let Some(v) = file.sync.retry_backoff_secs {
            self.retry_backoff = v.into_iter().map(Duration::from_secs).collect();
        }
        if let Some(v) = file.sync.read_receipt_debounce_ms {
            self.read_receipt_debounce = Duration::from_millis(v);
        }
        if let Some(v) = file.sync.event_buffer {
            self.event_buffer = v;
        }
        if let Some(v) = file.cache.ttl_secs {
            self.cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = file.cache.dir {
            self.cache_dir = Some(PathBuf::from(v));
        }
        self
    }
}
