use std::fmt;

use crate::schema::Domain;

/// A named dump published by the sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Payload {
    Commodities,
    Systems,
    Stations,
    Ships,
    Modules,
    Listings,
    /// Crowd-sourced listings collected since the last base dump
    LiveListings,
}

impl Payload {
    pub const fn file_name(&self) -> &'static str {
        match self {
            Payload::Commodities => "commodities.json",
            Payload::Systems => "systems_populated.jsonl",
            Payload::Stations => "stations.jsonl",
            Payload::Ships => "index.json",
            Payload::Modules => "modules.json",
            Payload::Listings => "listings.csv",
            Payload::LiveListings => "listings-live.csv",
        }
    }

    pub const fn is_crowd_sourced(&self) -> bool {
        matches!(self, Payload::LiveListings)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Opaque freshness marker: the dump's last-modified time in epoch seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FreshnessToken(pub i64);

/// One payload consumed by one domain. Each feed has its own sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feed {
    pub domain: Domain,
    pub payload: Payload,
    /// Unavailability is a warning rather than a domain failure
    pub optional: bool,
}

impl Feed {
    const fn required(domain: Domain, payload: Payload) -> Self {
        Self {
            domain,
            payload,
            optional: false,
        }
    }

    const fn optional(domain: Domain, payload: Payload) -> Self {
        Self {
            domain,
            payload,
            optional: true,
        }
    }

    /// Key of this feed's row in SyncState
    pub fn sync_key(&self) -> String {
        format!("{}:{}", self.domain.name(), self.payload.file_name())
    }
}

static ITEM_FEEDS: [Feed; 1] = [Feed::required(Domain::Item, Payload::Commodities)];
static SYSTEM_FEEDS: [Feed; 1] = [Feed::required(Domain::System, Payload::Systems)];
static STATION_FEEDS: [Feed; 1] = [Feed::required(Domain::Station, Payload::Stations)];
static SHIP_FEEDS: [Feed; 1] = [Feed::required(Domain::Ship, Payload::Ships)];
static SHIP_VENDOR_FEEDS: [Feed; 1] = [Feed::required(Domain::ShipVendor, Payload::Stations)];
static UPGRADE_FEEDS: [Feed; 1] = [Feed::required(Domain::Upgrade, Payload::Modules)];
static UPGRADE_VENDOR_FEEDS: [Feed; 1] =
    [Feed::required(Domain::UpgradeVendor, Payload::Stations)];
static LISTINGS_FEEDS: [Feed; 2] = [
    Feed::required(Domain::Listings, Payload::Listings),
    Feed::optional(Domain::Listings, Payload::LiveListings),
];

/// Feeds a domain consumes. `solo` drops crowd-sourced feeds.
pub fn feeds(domain: Domain, solo: bool) -> Vec<Feed> {
    let all: &[Feed] = match domain {
        Domain::Item => &ITEM_FEEDS,
        Domain::System => &SYSTEM_FEEDS,
        Domain::Station => &STATION_FEEDS,
        Domain::Ship => &SHIP_FEEDS,
        Domain::ShipVendor => &SHIP_VENDOR_FEEDS,
        Domain::Upgrade => &UPGRADE_FEEDS,
        Domain::UpgradeVendor => &UPGRADE_VENDOR_FEEDS,
        Domain::Listings => &LISTINGS_FEEDS,
    };
    all.iter()
        .filter(|f| !(solo && f.payload.is_crowd_sourced()))
        .copied()
        .collect()
}
