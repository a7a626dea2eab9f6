//! Runtime configuration.
//!
//! Every field has a default, so a config file only needs the values it changes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_PRIMARY_URL: &str = "http://elite.ripz.org/files/";
pub const DEFAULT_FALLBACK_URL: &str = "https://eddb.io/archive/v5/";
pub const DEFAULT_SHIPS_URL: &str =
    "https://raw.githubusercontent.com/EDCD/coriolis-data/master/dist/index.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Mirror tried first
    pub primary_url: String,
    /// Origin tried when the mirror fails
    pub fallback_url: String,
    /// Ship catalog location, shared by both sources
    pub ships_url: String,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Extra attempts against the same source before moving on
    pub retries_per_source: u32,
    /// Fraction of rejected rows above which a batch is refused as corrupt
    pub malformed_threshold: f64,
    /// Concurrent downloads
    pub fetch_workers: usize,
    /// Rows per insert batch; progress is reported after each
    pub batch_size: usize,
    /// Keep fetched dumps in the data directory
    pub keep_dumps: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            primary_url: DEFAULT_PRIMARY_URL.to_string(),
            fallback_url: DEFAULT_FALLBACK_URL.to_string(),
            ships_url: DEFAULT_SHIPS_URL.to_string(),
            timeout_secs: 30,
            retries_per_source: 1,
            malformed_threshold: 0.05,
            fetch_workers: 2,
            batch_size: 1000,
            keep_dumps: true,
        }
    }
}

impl SyncConfig {
    /// Load from a JSON file, then validate
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: SyncConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.malformed_threshold) {
            return Err(Error::Configuration(format!(
                "malformed_threshold must be within 0..=1, got {}",
                self.malformed_threshold
            )));
        }
        if self.fetch_workers == 0 {
            return Err(Error::Configuration("fetch_workers must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Configuration("timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Attempts made against each source, the first try included
    pub fn attempts_per_source(&self) -> u32 {
        self.retries_per_source + 1
    }
}
