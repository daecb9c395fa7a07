//! Ingestion configuration.
//!
//! An [`IngestConfig`] is built once at startup and handed to each
//! orchestrator explicitly. It can be read from a JSON file:
//!
//! ```json
//! {
//!   "feed_source_id": 1,
//!   "static_feed_url": "https://example.org/gtfs.zip",
//!   "realtime_urls": {
//!     "trip_updates": "https://example.org/trip_updates.pb",
//!     "vehicle_positions": "https://example.org/vehicle_positions.pb"
//!   },
//!   "storage_path": "data/gtfs_rt"
//! }
//! ```
//!
//! or from `TRANSIT_*` environment variables (see [`IngestConfig::from_env`]).
//! Omitted fields take the defaults below.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{IngestError, Result};

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_REALTIME_INTERVAL_SECONDS: u64 = 10;
pub const DEFAULT_STATIC_INTERVAL_SECONDS: u64 = 24 * 60 * 60;

/// The two GTFS-realtime endpoints polled every realtime cycle.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RealtimeUrls {
    pub trip_updates: String,
    pub vehicle_positions: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_feed_source_id")]
    pub feed_source_id: i64,
    pub static_feed_url: String,
    pub realtime_urls: RealtimeUrls,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_realtime_interval")]
    pub realtime_interval_seconds: u64,
    #[serde(default = "default_static_interval")]
    pub static_interval_seconds: u64,
    /// Root of the realtime snapshot tree.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    /// Where static archives are unpacked; each run gets its own subdirectory.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Upper bound on a triggered static sync.
    #[serde(default = "default_static_sync_timeout")]
    pub static_sync_timeout_seconds: u64,
}

fn default_feed_source_id() -> i64 {
    1
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_realtime_interval() -> u64 {
    DEFAULT_REALTIME_INTERVAL_SECONDS
}

fn default_static_interval() -> u64 {
    DEFAULT_STATIC_INTERVAL_SECONDS
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/gtfs_rt")
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_database_url() -> String {
    "sqlite://data/transit.db".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_static_sync_timeout() -> u64 {
    30 * 60
}

impl IngestConfig {
    /// Creates a config for the given endpoints with every other field defaulted.
    pub fn new(static_feed_url: impl Into<String>, realtime_urls: RealtimeUrls) -> Self {
        Self {
            feed_source_id: default_feed_source_id(),
            static_feed_url: static_feed_url.into(),
            realtime_urls,
            batch_size: default_batch_size(),
            realtime_interval_seconds: default_realtime_interval(),
            static_interval_seconds: default_static_interval(),
            storage_path: default_storage_path(),
            scratch_dir: default_scratch_dir(),
            database_url: default_database_url(),
            request_timeout_seconds: default_request_timeout(),
            static_sync_timeout_seconds: default_static_sync_timeout(),
        }
    }

    /// Loads and validates the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| IngestError::filesystem(path, e))?;
        let config: IngestConfig = serde_json::from_str(&content)
            .map_err(|e| IngestError::Config(format!("{path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the config from environment variables.
    ///
    /// `TRANSIT_STATIC_FEED_URL`, `TRANSIT_TRIP_UPDATES_URL` and
    /// `TRANSIT_VEHICLE_POSITIONS_URL` are required. `TRANSIT_FEED_SOURCE_ID`,
    /// `TRANSIT_BATCH_SIZE`, `TRANSIT_REALTIME_INTERVAL_SECONDS`,
    /// `TRANSIT_STATIC_INTERVAL_SECONDS`, `TRANSIT_STORAGE_PATH`,
    /// `TRANSIT_SCRATCH_DIR`, `DATABASE_URL`,
    /// `TRANSIT_REQUEST_TIMEOUT_SECONDS` and
    /// `TRANSIT_STATIC_SYNC_TIMEOUT_SECONDS` override the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| IngestError::Config(format!("{key} must be set")))
        };

        let mut config = IngestConfig::new(
            required("TRANSIT_STATIC_FEED_URL")?,
            RealtimeUrls {
                trip_updates: required("TRANSIT_TRIP_UPDATES_URL")?,
                vehicle_positions: required("TRANSIT_VEHICLE_POSITIONS_URL")?,
            },
        );

        if let Some(v) = lookup("TRANSIT_FEED_SOURCE_ID") {
            config.feed_source_id = parse_var("TRANSIT_FEED_SOURCE_ID", &v)?;
        }
        if let Some(v) = lookup("TRANSIT_BATCH_SIZE") {
            config.batch_size = parse_var("TRANSIT_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("TRANSIT_REALTIME_INTERVAL_SECONDS") {
            config.realtime_interval_seconds = parse_var("TRANSIT_REALTIME_INTERVAL_SECONDS", &v)?;
        }
        if let Some(v) = lookup("TRANSIT_STATIC_INTERVAL_SECONDS") {
            config.static_interval_seconds = parse_var("TRANSIT_STATIC_INTERVAL_SECONDS", &v)?;
        }
        if let Some(v) = lookup("TRANSIT_STORAGE_PATH") {
            config.storage_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("TRANSIT_SCRATCH_DIR") {
            config.scratch_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DATABASE_URL") {
            config.database_url = v;
        }
        if let Some(v) = lookup("TRANSIT_REQUEST_TIMEOUT_SECONDS") {
            config.request_timeout_seconds = parse_var("TRANSIT_REQUEST_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = lookup("TRANSIT_STATIC_SYNC_TIMEOUT_SECONDS") {
            config.static_sync_timeout_seconds =
                parse_var("TRANSIT_STATIC_SYNC_TIMEOUT_SECONDS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(IngestError::Config("batch_size must be at least 1".into()));
        }
        if self.realtime_interval_seconds == 0 || self.static_interval_seconds == 0 {
            return Err(IngestError::Config("sync intervals must be positive".into()));
        }
        if self.request_timeout_seconds == 0 || self.static_sync_timeout_seconds == 0 {
            return Err(IngestError::Config("timeouts must be positive".into()));
        }
        for (name, url) in [
            ("static_feed_url", &self.static_feed_url),
            ("realtime_urls.trip_updates", &self.realtime_urls.trip_updates),
            ("realtime_urls.vehicle_positions", &self.realtime_urls.vehicle_positions),
        ] {
            if url.trim().is_empty() {
                return Err(IngestError::Config(format!("{name} is empty")));
            }
        }
        Ok(())
    }

    pub fn realtime_interval(&self) -> Duration {
        Duration::from_secs(self.realtime_interval_seconds)
    }

    pub fn static_interval(&self) -> Duration {
        Duration::from_secs(self.static_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn static_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.static_sync_timeout_seconds)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| IngestError::Config(format!("{key}={value:?}: {e}")))
}
