use chrono::DateTime;
use reqwest::blocking::Client;
use reqwest::header::LAST_MODIFIED;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::time::Duration;
use tracing::debug;

use super::payload::{FreshnessToken, Payload};
use crate::config::SyncConfig;
use crate::error::{Error, Result};

/// A fetched dump and where it came from
#[derive(Debug, Clone)]
pub struct Dump {
    pub payload: Payload,
    pub bytes: Vec<u8>,
    /// `None` when the source publishes no last-modified time
    pub token: Option<FreshnessToken>,
    pub source: String,
}

/// One place dumps can be fetched from
pub trait DumpSource: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this source publishes `payload` at all
    fn serves(&self, payload: Payload) -> bool;

    /// Freshness token of the remote payload, without downloading it
    fn remote_token(&self, payload: Payload) -> Result<Option<FreshnessToken>>;

    fn fetch(&self, payload: Payload) -> Result<Dump>;
}

/// HTTP source: `base_url` + file name, with per-payload overrides
pub struct HttpSource {
    name: String,
    base_url: String,
    overrides: HashMap<Payload, String>,
    excluded: HashSet<Payload>,
    client: Client,
}

impl HttpSource {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("eddblink-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into(),
            overrides: HashMap::new(),
            excluded: HashSet::new(),
            client,
        })
    }

    /// The mirror: serves every payload
    pub fn primary(config: &SyncConfig) -> Result<Self> {
        Ok(Self::new("primary", &config.primary_url, config.timeout())?
            .with_override(Payload::Ships, &config.ships_url))
    }

    /// The origin: has no crowd-sourced listings
    pub fn fallback(config: &SyncConfig) -> Result<Self> {
        Ok(Self::new("fallback", &config.fallback_url, config.timeout())?
            .with_override(Payload::Ships, &config.ships_url)
            .without(Payload::LiveListings))
    }

    pub fn with_override(mut self, payload: Payload, url: impl Into<String>) -> Self {
        self.overrides.insert(payload, url.into());
        self
    }

    pub fn without(mut self, payload: Payload) -> Self {
        self.excluded.insert(payload);
        self
    }

    pub fn url_for(&self, payload: Payload) -> Option<String> {
        if self.excluded.contains(&payload) {
            return None;
        }
        Some(match self.overrides.get(&payload) {
            Some(url) => url.clone(),
            None => format!("{}{}", self.base_url, payload.file_name()),
        })
    }

    fn require_url(&self, payload: Payload) -> Result<String> {
        self.url_for(payload).ok_or_else(|| {
            Error::Configuration(format!("{} does not serve {}", self.name, payload))
        })
    }
}

impl DumpSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn serves(&self, payload: Payload) -> bool {
        self.url_for(payload).is_some()
    }

    fn remote_token(&self, payload: Payload) -> Result<Option<FreshnessToken>> {
        let url = self.require_url(payload)?;
        let response = self.client.head(&url).send()?.error_for_status()?;
        Ok(response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_last_modified))
    }

    fn fetch(&self, payload: Payload) -> Result<Dump> {
        let url = self.require_url(payload)?;
        let response = self.client.get(&url).send()?.error_for_status()?;

        let expected = response.content_length();
        let token = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_last_modified);

        let mut bytes = Vec::with_capacity(expected.unwrap_or(0) as usize);
        let mut buffer = [0u8; 8192];
        let mut reader = response;

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            bytes.extend_from_slice(&buffer[..bytes_read]);
        }

        if let Some(total) = expected {
            if bytes.len() as u64 != total {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("truncated download: {}", format_bytes(bytes.len() as u64, total)),
                )));
            }
        }

        debug!(%payload, source = %self.name, size = bytes.len(), "Downloaded dump");
        Ok(Dump {
            payload,
            bytes,
            token,
            source: self.name.clone(),
        })
    }
}

/// Parse an HTTP `Last-Modified` value ("Wed, 21 Oct 2015 07:28:00 GMT")
pub fn parse_last_modified(value: &str) -> Option<FreshnessToken> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| FreshnessToken(dt.timestamp()))
}

/// Format bytes as human-readable string
pub fn format_bytes(current: u64, total: u64) -> String {
    fn fmt(bytes: u64) -> String {
        if bytes >= 1_000_000_000 {
            format!("{:.1} GB", bytes as f64 / 1_000_000_000.0)
        } else if bytes >= 1_000_000 {
            format!("{:.1} MB", bytes as f64 / 1_000_000.0)
        } else if bytes >= 1_000 {
            format!("{:.1} KB", bytes as f64 / 1_000.0)
        } else {
            format!("{} B", bytes)
        }
    }
    format!("{} / {}", fmt(current), fmt(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500, 999), "500 B / 999 B");
        assert_eq!(format_bytes(1500, 3000), "1.5 KB / 3.0 KB");
        assert_eq!(format_bytes(1_500_000, 3_000_000), "1.5 MB / 3.0 MB");
    }

    #[test]
    fn test_parse_last_modified() {
        let token = parse_last_modified("Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
        assert_eq!(token, FreshnessToken(1_445_412_480));
        assert!(parse_last_modified("yesterday").is_none());
    }

    #[test]
    fn test_urls() {
        let config = SyncConfig::default();
        let primary = HttpSource::primary(&config).unwrap();
        let fallback = HttpSource::fallback(&config).unwrap();

        assert_eq!(
            primary.url_for(Payload::Stations).unwrap(),
            "http://elite.ripz.org/files/stations.jsonl"
        );
        assert_eq!(primary.url_for(Payload::Ships).unwrap(), config.ships_url);
        assert_eq!(fallback.url_for(Payload::Ships).unwrap(), config.ships_url);
        assert!(primary.serves(Payload::LiveListings));
        assert!(!fallback.serves(Payload::LiveListings));
    }
}
