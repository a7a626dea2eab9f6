//! Two-stage acquisition: each source in priority order, a bounded number of attempts
//! per source, then give up with `SourceUnavailable`.

use std::thread;
use tracing::{debug, info, warn};

use super::client::{Dump, DumpSource, HttpSource};
use super::payload::{FreshnessToken, Payload};
use crate::config::SyncConfig;
use crate::error::{Error, Result};

pub struct SourceFetcher {
    /// Sources in priority order
    sources: Vec<Box<dyn DumpSource>>,
    attempts_per_source: u32,
    workers: usize,
    /// Try the sources in reverse order
    fallback_first: bool,
}

impl SourceFetcher {
    pub fn new(sources: Vec<Box<dyn DumpSource>>) -> Self {
        Self {
            sources,
            attempts_per_source: 2,
            workers: 2,
            fallback_first: false,
        }
    }

    /// Mirror then origin, or the reverse when `fallback_first`
    pub fn from_config(config: &SyncConfig, fallback_first: bool) -> Result<Self> {
        let sources: Vec<Box<dyn DumpSource>> = vec![
            Box::new(HttpSource::primary(config)?),
            Box::new(HttpSource::fallback(config)?),
        ];
        let fetcher = Self::new(sources)
            .with_attempts(config.attempts_per_source())
            .with_workers(config.fetch_workers);
        Ok(if fallback_first {
            fetcher.fallback_first()
        } else {
            fetcher
        })
    }

    pub fn with_attempts(mut self, attempts_per_source: u32) -> Self {
        self.attempts_per_source = attempts_per_source.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Reverse source priority
    pub fn fallback_first(mut self) -> Self {
        self.fallback_first = true;
        self
    }

    pub fn set_fallback_first(&mut self, fallback_first: bool) {
        self.fallback_first = fallback_first;
    }

    fn ordered(&self) -> Vec<&dyn DumpSource> {
        let mut sources: Vec<&dyn DumpSource> = self.sources.iter().map(|s| s.as_ref()).collect();
        if self.fallback_first {
            sources.reverse();
        }
        sources
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.ordered().into_iter().map(|s| s.name()).collect()
    }

    pub fn remote_token(&self, payload: Payload) -> Result<Option<FreshnessToken>> {
        self.acquire(payload, |source| source.remote_token(payload))
    }

    pub fn fetch(&self, payload: Payload) -> Result<Dump> {
        self.acquire(payload, |source| source.fetch(payload))
    }

    /// Fetch several payloads with at most `workers` downloads in flight.
    /// Results come back in input order.
    pub fn fetch_all(&self, payloads: &[Payload]) -> Vec<(Payload, Result<Dump>)> {
        if payloads.is_empty() {
            return Vec::new();
        }
        let workers = self.workers.min(payloads.len());

        // Round-robin buckets, one thread each
        let mut buckets: Vec<Vec<(usize, Payload)>> = vec![Vec::new(); workers];
        for (idx, payload) in payloads.iter().copied().enumerate() {
            buckets[idx % workers].push((idx, payload));
        }

        let mut results: Vec<(usize, Payload, Result<Dump>)> = thread::scope(|scope| {
            let handles: Vec<_> = buckets
                .into_iter()
                .map(|bucket| {
                    scope.spawn(move || {
                        bucket
                            .into_iter()
                            .map(|(idx, payload)| (idx, payload, self.fetch(payload)))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|h| match h.join() {
                    Ok(done) => done,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });

        results.sort_by_key(|(idx, _, _)| *idx);
        results.into_iter().map(|(_, p, r)| (p, r)).collect()
    }

    fn acquire<T>(&self, payload: Payload, op: impl Fn(&dyn DumpSource) -> Result<T>) -> Result<T> {
        let mut attempts: Vec<String> = Vec::new();

        for source in self.ordered() {
            if !source.serves(payload) {
                debug!(%payload, source = source.name(), "Source does not serve payload");
                continue;
            }
            for attempt in 1..=self.attempts_per_source {
                match op(source) {
                    Ok(value) => {
                        if !attempts.is_empty() {
                            info!(%payload, source = source.name(), "Recovered after {} failed attempts", attempts.len());
                        }
                        return Ok(value);
                    }
                    Err(e) => {
                        warn!(%payload, source = source.name(), attempt, "Fetch failed: {}", e);
                        attempts.push(format!("{} attempt {}: {}", source.name(), attempt, e));
                    }
                }
            }
        }

        if attempts.is_empty() {
            attempts.push("no source serves this payload".to_string());
        }
        Err(Error::SourceUnavailable { payload, attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fails the first `failures` calls, then serves a fixed body
    struct FlakySource {
        name: &'static str,
        failures: usize,
        calls: Arc<AtomicUsize>,
        skip: Option<Payload>,
    }

    impl FlakySource {
        fn new(name: &'static str, failures: usize) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    failures,
                    calls: calls.clone(),
                    skip: None,
                },
                calls,
            )
        }
    }

    impl DumpSource for FlakySource {
        fn name(&self) -> &str {
            self.name
        }

        fn serves(&self, payload: Payload) -> bool {
            self.skip != Some(payload)
        }

        fn remote_token(&self, payload: Payload) -> Result<Option<FreshnessToken>> {
            self.fetch(payload).map(|d| d.token)
        }

        fn fetch(&self, payload: Payload) -> Result<Dump> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(Error::Configuration(format!("{} down", self.name)));
            }
            Ok(Dump {
                payload,
                bytes: self.name.as_bytes().to_vec(),
                token: Some(FreshnessToken(100)),
                source: self.name.to_string(),
            })
        }
    }

    #[test]
    fn test_one_retry_then_fallback() {
        let (primary, primary_calls) = FlakySource::new("primary", usize::MAX);
        let (fallback, fallback_calls) = FlakySource::new("fallback", 0);
        let fetcher = SourceFetcher::new(vec![Box::new(primary), Box::new(fallback)]).with_attempts(2);

        let dump = fetcher.fetch(Payload::Ships).unwrap();
        assert_eq!(dump.source, "fallback");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 2);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_recovers_on_same_source() {
        let (primary, _) = FlakySource::new("primary", 1);
        let (fallback, fallback_calls) = FlakySource::new("fallback", 0);
        let fetcher = SourceFetcher::new(vec![Box::new(primary), Box::new(fallback)]).with_attempts(2);

        assert_eq!(fetcher.fetch(Payload::Modules).unwrap().source, "primary");
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_both_down_is_source_unavailable() {
        let (primary, _) = FlakySource::new("primary", usize::MAX);
        let (fallback, _) = FlakySource::new("fallback", usize::MAX);
        let fetcher = SourceFetcher::new(vec![Box::new(primary), Box::new(fallback)]).with_attempts(2);

        match fetcher.fetch(Payload::Systems) {
            Err(Error::SourceUnavailable { payload, attempts }) => {
                assert_eq!(payload, Payload::Systems);
                assert_eq!(attempts.len(), 4);
            }
            other => panic!("expected SourceUnavailable, got {:?}", other.map(|d| d.source)),
        }
    }

    #[test]
    fn test_fallback_first_reverses_priority() {
        let (primary, primary_calls) = FlakySource::new("primary", 0);
        let (fallback, _) = FlakySource::new("fallback", 0);
        let fetcher = SourceFetcher::new(vec![Box::new(primary), Box::new(fallback)]).fallback_first();

        assert_eq!(fetcher.source_names(), vec!["fallback", "primary"]);
        assert_eq!(fetcher.fetch(Payload::Stations).unwrap().source, "fallback");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unserved_payload_skips_source() {
        let (primary, _) = FlakySource::new("primary", usize::MAX);
        let (mut fallback, fallback_calls) = FlakySource::new("fallback", 0);
        fallback.skip = Some(Payload::LiveListings);
        let fetcher = SourceFetcher::new(vec![Box::new(primary), Box::new(fallback)]);

        assert!(matches!(
            fetcher.fetch(Payload::LiveListings),
            Err(Error::SourceUnavailable { .. })
        ));
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fetch_all_keeps_input_order() {
        let (primary, calls) = FlakySource::new("primary", 0);
        let fetcher = SourceFetcher::new(vec![Box::new(primary)]).with_workers(3);
        let payloads = [Payload::Ships, Payload::Modules, Payload::Systems, Payload::Commodities];

        let results = fetcher.fetch_all(&payloads);
        let order: Vec<Payload> = results.iter().map(|(p, _)| *p).collect();
        assert_eq!(order, payloads.to_vec());
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
