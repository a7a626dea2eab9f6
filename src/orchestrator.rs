//! One synchronization run, end to end.
//!
//! Resolving → (Cleaning) → gating → fetching → regenerating each domain in dependency
//! order → Done or Failed. Domain-level failures are collected into the `RunReport`;
//! only configuration, locking and clean failures are returned as errors.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::download::{feeds, CacheManager, Payload, SourceFetcher};
use crate::error::{Error, ErrorCode, Result};
use crate::lock::RunLock;
use crate::options::{resolve, OptionSet, Resolution};
use crate::schema::{domain_tables, DependencyResolver, Domain, STATION_ITEM};
use crate::state::{Freshness, StalenessTracker};
use crate::ui::{Phase, Ui};
use crate::writer::{
    export_prices, export_table, regenerate, FeedDump, SharedDump, SqliteStore, PRICES_FILE,
};

type Dumps = HashMap<Payload, std::result::Result<Arc<SharedDump>, FetchFailure>>;

#[derive(Debug, Clone, PartialEq)]
pub enum DomainStatus {
    Applied { rows: u64, rejected: usize },
    SkippedFresh,
    Failed { code: ErrorCode, reason: String },
    NotAttempted,
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainStatus::Applied { rows, rejected: 0 } => write!(f, "applied ({} rows)", rows),
            DomainStatus::Applied { rows, rejected } => {
                write!(f, "applied ({} rows, {} skipped)", rows, rejected)
            }
            DomainStatus::SkippedFresh => write!(f, "skipped, up to date"),
            DomainStatus::Failed { code, reason } => write!(f, "failed [{}]: {}", code, reason),
            DomainStatus::NotAttempted => write!(f, "not attempted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomainReport {
    pub domain: Domain,
    pub status: DomainStatus,
    /// Non-fatal problems, such as an unavailable optional feed
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Done { partial: bool },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub resolution: Resolution,
    pub domains: Vec<DomainReport>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn status(&self, domain: Domain) -> Option<&DomainStatus> {
        self.domains
            .iter()
            .find(|r| r.domain == domain)
            .map(|r| &r.status)
    }

    fn with_status(&self, pred: impl Fn(&DomainStatus) -> bool) -> Vec<Domain> {
        self.domains
            .iter()
            .filter(|r| pred(&r.status))
            .map(|r| r.domain)
            .collect()
    }

    pub fn applied(&self) -> Vec<Domain> {
        self.with_status(|s| matches!(s, DomainStatus::Applied { .. }))
    }

    pub fn skipped(&self) -> Vec<Domain> {
        self.with_status(|s| matches!(s, DomainStatus::SkippedFresh))
    }

    pub fn failed(&self) -> Vec<Domain> {
        self.with_status(|s| matches!(s, DomainStatus::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Done { partial: false }
    }

    /// 0 on a clean finish, 1 when some domains failed, else the first failure's code
    pub fn exit_code(&self) -> u8 {
        match &self.outcome {
            RunOutcome::Done { partial: false } => 0,
            RunOutcome::Done { partial: true } => 1,
            RunOutcome::Failed { .. } => self
                .domains
                .iter()
                .find_map(|r| match &r.status {
                    DomainStatus::Failed { code, .. } => Some(code.exit_code()),
                    _ => None,
                })
                .unwrap_or(1),
        }
    }

    /// One line per domain, then the totals
    pub fn summary(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .domains
            .iter()
            .map(|r| format!("{:>9}: {}", r.domain.name(), r.status))
            .collect();
        let outcome = match &self.outcome {
            RunOutcome::Done { partial: false } => "Done".to_string(),
            RunOutcome::Done { partial: true } => "Done with failures".to_string(),
            RunOutcome::Failed { reason } => format!("Failed: {}", reason),
        };
        lines.push(format!(
            "{}. {} applied, {} up to date, {} failed",
            outcome,
            self.applied().len(),
            self.skipped().len(),
            self.failed().len()
        ));
        lines
    }
}

/// A failed fetch, kept so every domain needing the payload can report it
#[derive(Debug, Clone)]
struct FetchFailure {
    code: ErrorCode,
    reason: String,
}

impl From<&Error> for FetchFailure {
    fn from(e: &Error) -> Self {
        Self {
            code: e.code(),
            reason: e.to_string(),
        }
    }
}

pub struct Orchestrator {
    store: SqliteStore,
    fetcher: SourceFetcher,
    config: SyncConfig,
    resolver: DependencyResolver,
    lock_db: Option<PathBuf>,
    cache: Option<CacheManager>,
    export_dir: Option<PathBuf>,
    abort: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(store: SqliteStore, fetcher: SourceFetcher, config: SyncConfig) -> Self {
        Self {
            store,
            fetcher,
            config,
            resolver: DependencyResolver::new(),
            lock_db: None,
            cache: None,
            export_dir: None,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Hold the run lock for `db_path` while running
    pub fn with_lock(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.lock_db = Some(db_path.into());
        self
    }

    /// Keep fetched dumps on disk
    pub fn with_cache(mut self, cache: CacheManager) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Write CSV copies of each regenerated table, and the listings as a `.prices`
    /// file, into `dir`
    pub fn with_export(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = Some(dir.into());
        self
    }

    /// Set to stop the run at the next domain boundary. Cleared when a run starts.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn into_store(self) -> SqliteStore {
        self.store
    }

    pub fn run<U: Ui>(&mut self, options: &OptionSet, ui: &mut U) -> Result<RunReport> {
        self.abort.store(false, Ordering::SeqCst);
        let _lock = match &self.lock_db {
            Some(db) => Some(RunLock::acquire(db)?),
            None => None,
        };

        ui.set_phase(Phase::Resolving);
        let first_run = !self.store.is_initialized()?;
        let resolution = resolve(options, first_run, &self.resolver)?;
        if resolution.forced_clean {
            ui.log("No previous sync found: rebuilding the database from empty");
        }
        let names: Vec<&str> = resolution.domains.iter().map(|d| d.name()).collect();
        info!(domains = ?names, clean = resolution.clean, force = resolution.force, "Starting sync");
        ui.set_info(format!("Updating: {}", names.join(", ")));
        self.fetcher.set_fallback_first(resolution.fallback);

        if resolution.clean {
            ui.set_phase(Phase::Cleaning);
            self.clean()?;
        }

        let fresh = self.gate(&resolution)?;
        let dumps = self.fetch(&resolution, &fresh, ui);
        let report = self.process(resolution, &fresh, dumps, ui);

        match report.outcome {
            RunOutcome::Done { .. } => ui.set_phase(Phase::Done),
            RunOutcome::Failed { .. } => ui.set_phase(Phase::Failed),
        }
        for line in report.summary() {
            ui.log(line);
        }
        if let Err(e) = self.store.optimize() {
            warn!("PRAGMA optimize failed: {}", e);
        }
        Ok(report)
    }

    /// Wipe and recreate the store. Any failure is fatal to the run.
    fn clean(&mut self) -> Result<()> {
        warn!("Rebuilding database from empty");
        self.store
            .reset()
            .map_err(|e| Error::CleanFailure(e.to_string()))?;
        if let Some(cache) = &self.cache {
            match cache.cleanup_partial_dumps() {
                Ok(0) => {}
                Ok(n) => debug!(removed = n, "Removed partial dumps"),
                Err(e) => warn!("Could not clean partial dumps: {}", e),
            }
        }
        Ok(())
    }

    /// Domains whose every feed is already applied at the remote's version
    fn gate(&self, resolution: &Resolution) -> Result<HashSet<Domain>> {
        let mut fresh = HashSet::new();
        if resolution.force || resolution.clean {
            return Ok(fresh);
        }

        let mut tokens: HashMap<Payload, std::result::Result<_, String>> = HashMap::new();
        for &domain in &resolution.domains {
            let mut stale = false;
            for feed in feeds(domain, resolution.solo) {
                let lookup = tokens
                    .entry(feed.payload)
                    .or_insert_with(|| self.fetcher.remote_token(feed.payload).map_err(|e| e.to_string()));
                let remote = match lookup {
                    Ok(token) => *token,
                    // Cannot be fetched either, so it cannot make the domain stale
                    Err(_) if feed.optional => continue,
                    Err(e) => {
                        warn!(%domain, payload = %feed.payload, "Freshness lookup failed: {}", e);
                        None
                    }
                };
                match StalenessTracker::check(self.store.conn(), &feed, remote, false)? {
                    Freshness::Fresh => debug!(key = %feed.sync_key(), "Feed is current"),
                    Freshness::Stale(reason) => {
                        info!(key = %feed.sync_key(), %reason, "Feed needs refresh");
                        stale = true;
                    }
                }
            }
            if !stale {
                fresh.insert(domain);
            }
        }
        Ok(fresh)
    }

    /// Fetch every payload a stale domain needs, each once
    fn fetch<U: Ui>(
        &self,
        resolution: &Resolution,
        fresh: &HashSet<Domain>,
        ui: &mut U,
    ) -> Dumps {
        let mut payloads: Vec<Payload> = Vec::new();
        for domain in resolution.domains.iter().filter(|d| !fresh.contains(d)) {
            for feed in feeds(*domain, resolution.solo) {
                if !payloads.contains(&feed.payload) {
                    payloads.push(feed.payload);
                }
            }
        }
        if payloads.is_empty() {
            return HashMap::new();
        }

        ui.set_phase(Phase::Fetching);
        let names: Vec<&str> = payloads.iter().map(|p| p.file_name()).collect();
        ui.set_info(names.join(", "));

        let mut dumps = HashMap::new();
        for (payload, result) in self.fetcher.fetch_all(&payloads) {
            let entry = match result {
                Ok(dump) => {
                    info!(%payload, source = %dump.source, size = dump.bytes.len(), "Fetched");
                    if self.config.keep_dumps {
                        if let Some(cache) = &self.cache {
                            if let Err(e) = cache.store_dump(&dump) {
                                warn!(%payload, "Could not keep dump: {}", e);
                            }
                        }
                    }
                    Ok(Arc::new(SharedDump::new(dump)))
                }
                Err(e) => Err(FetchFailure::from(&e)),
            };
            dumps.insert(payload, entry);
        }
        dumps
    }

    fn process<U: Ui>(
        &mut self,
        resolution: Resolution,
        fresh: &HashSet<Domain>,
        mut dumps: Dumps,
        ui: &mut U,
    ) -> RunReport {
        let order = resolution.domains.clone();
        let last_use = last_uses(&order, fresh, resolution.solo);
        let mut reports: Vec<DomainReport> = order
            .iter()
            .map(|&domain| DomainReport {
                domain,
                status: DomainStatus::NotAttempted,
                warnings: Vec::new(),
            })
            .collect();
        let mut halted: Option<String> = None;

        for (idx, &domain) in order.iter().enumerate() {
            if self.abort.load(Ordering::SeqCst) {
                warn!(%domain, "Abort requested, stopping before this domain");
                halted = Some("aborted".to_string());
                break;
            }

            if fresh.contains(&domain) {
                info!(%domain, "Up to date, skipping");
                reports[idx].status = DomainStatus::SkippedFresh;
                continue;
            }

            let mut inputs = Vec::new();
            let mut failure: Option<FetchFailure> = None;
            for feed in feeds(domain, resolution.solo) {
                match dumps.get(&feed.payload) {
                    Some(Ok(dump)) => inputs.push(FeedDump::new(feed, dump.clone())),
                    Some(Err(f)) if feed.optional => {
                        warn!(%domain, payload = %feed.payload, "Optional feed unavailable: {}", f.reason);
                        reports[idx]
                            .warnings
                            .push(format!("{} unavailable: {}", feed.payload, f.reason));
                    }
                    Some(Err(f)) => {
                        failure = Some(f.clone());
                        break;
                    }
                    None => {
                        failure = Some(FetchFailure {
                            code: ErrorCode::Internal,
                            reason: format!("{} was never fetched", feed.payload),
                        });
                        break;
                    }
                }
            }

            let result = match failure {
                Some(f) => Err(f),
                None => {
                    ui.set_phase(Phase::Regenerating(domain.name().to_string()));
                    let outcome = regenerate(
                        &mut self.store,
                        domain,
                        &inputs,
                        self.config.malformed_threshold,
                        &mut |current, total| ui.set_progress(current, total, domain.name()),
                    );
                    ui.clear_progress();
                    outcome.map_err(|e| FetchFailure::from(&e))
                }
            };

            match result {
                Ok(stats) => {
                    if let Some(dir) = &self.export_dir {
                        let warnings = export_domain(self.store.conn(), domain, dir);
                        reports[idx].warnings.extend(warnings);
                    }
                    for warning in &reports[idx].warnings {
                        ui.log(format!("{}: {}", domain, warning));
                    }
                    if !stats.rejected.is_empty() {
                        ui.log(format!(
                            "{}: skipped {} of {} records",
                            domain,
                            stats.rejected.len(),
                            stats.seen
                        ));
                    }
                    reports[idx].status = DomainStatus::Applied {
                        rows: stats.rows,
                        rejected: stats.rejected.len(),
                    };
                }
                Err(f) => {
                    error!(%domain, code = %f.code, "Domain failed: {}", f.reason);
                    reports[idx].status = DomainStatus::Failed {
                        code: f.code,
                        reason: f.reason,
                    };
                    let blocked = self.resolver.dependents_within(domain, &order[idx + 1..]);
                    if !blocked.is_empty() {
                        let names: Vec<&str> = blocked.iter().map(|d| d.name()).collect();
                        halted = Some(format!("{} failed and {} depend on it", domain, names.join(", ")));
                        break;
                    }
                }
            }

            drop(inputs);
            dumps.retain(|payload, _| last_use.get(payload).is_some_and(|&last| last > idx));
        }

        let outcome = match halted {
            Some(reason) => RunOutcome::Failed { reason },
            None => RunOutcome::Done {
                partial: reports
                    .iter()
                    .any(|r| matches!(r.status, DomainStatus::Failed { .. })),
            },
        };

        RunReport {
            resolution,
            domains: reports,
            outcome,
        }
    }
}

/// Index in `order` of the last domain that reads each payload
fn last_uses(order: &[Domain], fresh: &HashSet<Domain>, solo: bool) -> HashMap<Payload, usize> {
    let mut last = HashMap::new();
    for (idx, &domain) in order.iter().enumerate() {
        if fresh.contains(&domain) {
            continue;
        }
        for feed in feeds(domain, solo) {
            last.insert(feed.payload, idx);
        }
    }
    last
}

/// Export the tables `domain` regenerated. Failures come back as warnings.
fn export_domain(conn: &rusqlite::Connection, domain: Domain, dir: &Path) -> Vec<String> {
    let mut warnings = Vec::new();
    for table in domain_tables(domain) {
        let exported = if table.name == STATION_ITEM.name {
            export_prices(conn, &dir.join(PRICES_FILE)).map(|lines| (dir.join(PRICES_FILE), lines))
        } else {
            export_table(conn, table, dir)
        };
        match exported {
            Ok((path, rows)) => info!(%domain, rows, path = %path.display(), "Exported"),
            Err(e) => {
                warn!(%domain, table = table.name, "Export failed: {}", e);
                warnings.push(format!("could not export {}: {}", table.name, e));
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(statuses: Vec<(Domain, DomainStatus)>, outcome: RunOutcome) -> RunReport {
        let resolution = Resolution {
            domains: statuses.iter().map(|(d, _)| *d).collect(),
            clean: false,
            forced_clean: false,
            defaulted: false,
            force: false,
            fallback: false,
            solo: false,
            progbar: false,
        };
        RunReport {
            resolution,
            domains: statuses
                .into_iter()
                .map(|(domain, status)| DomainReport {
                    domain,
                    status,
                    warnings: Vec::new(),
                })
                .collect(),
            outcome,
        }
    }

    #[test]
    fn test_exit_codes() {
        let ok = report(
            vec![(Domain::Ship, DomainStatus::Applied { rows: 3, rejected: 0 })],
            RunOutcome::Done { partial: false },
        );
        assert_eq!(ok.exit_code(), 0);

        let failed = DomainStatus::Failed {
            code: ErrorCode::SourceUnavailable,
            reason: "down".into(),
        };
        let partial = report(
            vec![(Domain::Ship, failed.clone()), (Domain::Upgrade, DomainStatus::SkippedFresh)],
            RunOutcome::Done { partial: true },
        );
        assert_eq!(partial.exit_code(), 1);

        let halted = report(
            vec![(Domain::System, failed), (Domain::Station, DomainStatus::NotAttempted)],
            RunOutcome::Failed { reason: "system failed".into() },
        );
        assert_eq!(halted.exit_code(), 3);
    }

    #[test]
    fn test_summary_lines() {
        let r = report(
            vec![
                (Domain::Ship, DomainStatus::Applied { rows: 3, rejected: 1 }),
                (Domain::Upgrade, DomainStatus::SkippedFresh),
            ],
            RunOutcome::Done { partial: false },
        );
        let lines = r.summary();
        assert_eq!(lines[0], "     ship: applied (3 rows, 1 skipped)");
        assert_eq!(lines[1], "  upgrade: skipped, up to date");
        assert_eq!(lines[2], "Done. 1 applied, 1 up to date, 0 failed");
    }

    #[test]
    fn test_last_uses_of_shared_payloads() {
        let order = [Domain::Station, Domain::ShipVendor, Domain::UpgradeVendor, Domain::Listings];
        let last = last_uses(&order, &HashSet::new(), false);
        assert_eq!(last[&Payload::Stations], 2);
        assert_eq!(last[&Payload::Listings], 3);

        let fresh: HashSet<Domain> = [Domain::UpgradeVendor].into_iter().collect();
        let last = last_uses(&order, &fresh, false);
        assert_eq!(last[&Payload::Stations], 1);
    }
}
