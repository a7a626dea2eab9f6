//! Sync options and their resolution into an ordered set of domains.
//!
//! Option strings are validated here, at the boundary, into closed enums. Nothing past
//! this module sees a raw option string.

use std::collections::BTreeSet;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::schema::{DependencyResolver, Domain};

/// Options naming what to update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    Domain(Domain),
    All,
    Clean,
}

/// Options changing how an update runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modifier {
    SkipVend,
    Force,
    Fallback,
    Solo,
    ProgBar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOption {
    Target(Target),
    Modifier(Modifier),
}

impl FromStr for SyncOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        if let Some(domain) = Domain::from_name(&name) {
            return Ok(SyncOption::Target(Target::Domain(domain)));
        }
        let option = match name.as_str() {
            "all" => SyncOption::Target(Target::All),
            "clean" => SyncOption::Target(Target::Clean),
            "skipvend" => SyncOption::Modifier(Modifier::SkipVend),
            "force" => SyncOption::Modifier(Modifier::Force),
            "fallback" => SyncOption::Modifier(Modifier::Fallback),
            "solo" => SyncOption::Modifier(Modifier::Solo),
            "progbar" => SyncOption::Modifier(Modifier::ProgBar),
            _ => return Err(Error::Configuration(format!("Unknown option: {}", s.trim()))),
        };
        Ok(option)
    }
}

/// Every option with its description
pub const OPTION_HELP: &[(&str, &str)] = &[
    ("item", "Regenerate Categories and Items using the latest commodities.json dump."),
    ("system", "Regenerate Systems using the latest systems_populated.jsonl dump."),
    ("station", "Regenerate Stations using the latest stations.jsonl dump. (implies system)"),
    ("ship", "Regenerate Ships using the latest coriolis.io json dump."),
    ("shipvend", "Regenerate ShipVendors using the latest stations.jsonl dump. (implies system,station,ship)"),
    ("upgrade", "Regenerate Upgrades using the latest modules.json dump."),
    ("upvend", "Regenerate UpgradeVendors using the latest stations.jsonl dump. (implies system,station,upgrade)"),
    ("listings", "Update market data using the latest listings.csv dump. (implies item,system,station)"),
    ("all", "Update everything with the latest dump files."),
    ("clean", "Erase the entire database and rebuild from empty. (implies all)"),
    ("skipvend", "Don't regenerate ShipVendors or UpgradeVendors. Supersedes all and clean."),
    ("force", "Regenerate selected domains even if the source dump has not changed."),
    ("fallback", "Try the EDDB.io origin before the mirror."),
    ("solo", "Skip market listings and the crowd-sourced listings feed. Supersedes all, clean and listings."),
    ("progbar", "Show progress bars."),
];

/// A validated, order-independent set of options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    targets: BTreeSet<Target>,
    modifiers: BTreeSet<Modifier>,
}

impl OptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse option strings, rejecting unknown ones
    pub fn parse<S: AsRef<str>>(options: &[S]) -> Result<Self> {
        let mut set = Self::new();
        for raw in options {
            if raw.as_ref().trim().is_empty() {
                continue;
            }
            set.insert(raw.as_ref().parse()?);
        }
        Ok(set)
    }

    pub fn insert(&mut self, option: SyncOption) {
        match option {
            SyncOption::Target(t) => {
                self.targets.insert(t);
            }
            SyncOption::Modifier(m) => {
                self.modifiers.insert(m);
            }
        }
    }

    pub fn with(mut self, option: SyncOption) -> Self {
        self.insert(option);
        self
    }

    pub fn has_target(&self, target: Target) -> bool {
        self.targets.contains(&target)
    }

    pub fn has(&self, modifier: Modifier) -> bool {
        self.modifiers.contains(&modifier)
    }
}

/// The effective plan for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Domains to process, parents before children
    pub domains: Vec<Domain>,
    /// Wipe and rebuild the whole store before processing
    pub clean: bool,
    /// `clean` was imposed because the store was never initialised
    pub forced_clean: bool,
    /// No target was requested, so `listings` was assumed
    pub defaulted: bool,
    pub force: bool,
    pub fallback: bool,
    /// Never fetch the crowd-sourced listings feed
    pub solo: bool,
    pub progbar: bool,
}

/// Expand requested options into the effective domain set.
///
/// `first_run` is true when the store has no schema or no sync state yet; it forces a
/// clean rebuild whatever was asked for.
pub fn resolve(
    options: &OptionSet,
    first_run: bool,
    resolver: &DependencyResolver,
) -> Result<Resolution> {
    let explicit_clean = options.has_target(Target::Clean);
    let forced_clean = first_run && !explicit_clean;
    if forced_clean {
        warn!("No previous sync found: forcing a clean rebuild");
    }

    let mut requested: BTreeSet<Domain> = BTreeSet::new();
    for target in &options.targets {
        match target {
            Target::Domain(d) => {
                requested.insert(*d);
            }
            Target::All | Target::Clean => requested.extend(Domain::ALL),
        }
    }

    let defaulted = options.targets.is_empty();
    if defaulted {
        debug!("No target requested, defaulting to listings");
        requested.insert(Domain::Listings);
    }

    let mut domains = resolver.resolve(requested).map_err(Error::Configuration)?;

    if options.has(Modifier::SkipVend) {
        domains.retain(|d| !matches!(d, Domain::ShipVendor | Domain::UpgradeVendor));
    }
    let solo = options.has(Modifier::Solo);
    if solo {
        domains.retain(|d| *d != Domain::Listings);
    }

    if domains.is_empty() {
        return Err(Error::Configuration(
            "Nothing to update: the requested options cancel every domain".to_string(),
        ));
    }

    debug!(
        domains = ?domains.iter().map(|d| d.name()).collect::<Vec<_>>(),
        clean = explicit_clean || first_run,
        "Resolved sync targets"
    );

    Ok(Resolution {
        domains,
        clean: explicit_clean || first_run,
        forced_clean,
        defaulted,
        force: options.has(Modifier::Force),
        fallback: options.has(Modifier::Fallback),
        solo,
        progbar: options.has(Modifier::ProgBar),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use Domain::*;

    fn run(opts: &[&str], first_run: bool) -> Result<Resolution> {
        let set = OptionSet::parse(opts)?;
        resolve(&set, first_run, &DependencyResolver::new())
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = OptionSet::parse(&["station", "bogus"]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_options_are_case_insensitive() {
        let set = OptionSet::parse(&["ShipVend", " FORCE "]).unwrap();
        assert!(set.has_target(Target::Domain(ShipVendor)));
        assert!(set.has(Modifier::Force));
    }

    #[test]
    fn test_station_implies_system() {
        let r = run(&["station"], false).unwrap();
        assert_eq!(r.domains, vec![System, Station]);
        assert!(!r.clean);
    }

    #[test]
    fn test_skipvend_overrides_explicit_and_all() {
        for opts in [
            &["all", "skipvend"][..],
            &["clean", "skipvend"][..],
            &["shipvend", "upvend", "listings", "skipvend"][..],
        ] {
            let r = run(opts, false).unwrap();
            assert!(!r.domains.contains(&ShipVendor), "{:?}", opts);
            assert!(!r.domains.contains(&UpgradeVendor), "{:?}", opts);
        }
    }

    #[test]
    fn test_skipvend_keeps_vendor_parents() {
        let r = run(&["shipvend", "skipvend"], false).unwrap();
        assert_eq!(r.domains, vec![System, Station, Ship]);
    }

    #[test]
    fn test_solo_overrides_listings_all_and_clean() {
        for opts in [&["listings", "solo"][..], &["all", "solo"][..], &["clean", "solo"][..]] {
            let r = run(opts, false).unwrap();
            assert!(!r.domains.contains(&Listings), "{:?}", opts);
            assert!(r.solo);
        }
    }

    #[test]
    fn test_first_run_forces_clean_without_widening() {
        let r = run(&["listings"], true).unwrap();
        assert!(r.clean);
        assert!(r.forced_clean);
        assert_eq!(r.domains, vec![Item, System, Station, Listings]);
    }

    #[test]
    fn test_explicit_clean_is_not_reported_as_forced() {
        let r = run(&["clean"], true).unwrap();
        assert!(r.clean);
        assert!(!r.forced_clean);
        assert_eq!(r.domains.len(), 8);
    }

    #[test]
    fn test_modifiers_only_default_to_listings() {
        let r = run(&["force", "fallback"], false).unwrap();
        assert!(r.defaulted);
        assert!(r.force);
        assert!(r.fallback);
        assert_eq!(r.domains, vec![Item, System, Station, Listings]);
    }

    #[test]
    fn test_solo_alone_keeps_listing_parents() {
        let r = run(&["solo"], false).unwrap();
        assert!(r.defaulted);
        assert_eq!(r.domains, vec![Item, System, Station]);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        for opts in [&["listings"][..], &["upvend", "ship"][..], &["all"][..]] {
            let first = run(opts, false).unwrap();
            let names: Vec<&str> = first.domains.iter().map(|d| d.name()).collect();
            let second = run(&names, false).unwrap();
            assert_eq!(first.domains, second.domains);
        }
    }

    #[test]
    fn test_help_covers_every_option() {
        for (name, _) in OPTION_HELP {
            assert!(name.parse::<SyncOption>().is_ok(), "{}", name);
        }
        assert_eq!(OPTION_HELP.len(), 15);
    }
}
