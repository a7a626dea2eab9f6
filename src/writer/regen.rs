//! Table regenerators: one per domain, each turning fetched dumps into table rows.
//!
//! Every regeneration runs on a single store transaction that also records the feeds'
//! SyncState. Replace-mode domains delete and reload their tables; listings merge row
//! by row. Any error before commit rolls the whole domain back.

use std::collections::{BTreeMap, HashSet};
use std::ops::Deref;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use super::sqlite::{SqliteStore, StoreTx};
use crate::download::{Dump, Feed, Payload};
use crate::error::{Error, Result};
use crate::parser::*;
use crate::schema::tables::{CATEGORY, ITEM, SHIP, SHIP_VENDOR, STATION, SYSTEM, UPGRADE, UPGRADE_VENDOR};
use crate::schema::{domain_tables, ApplyMode, Domain, TableSchema};
use crate::state::StalenessTracker;

/// A fetched dump as shared by every domain reading it during one run. Station
/// records are decoded on first use and reused by the station and vendor domains.
#[derive(Debug)]
pub struct SharedDump {
    dump: Dump,
    stations: OnceLock<std::result::Result<Batch<StationRecord>, DecodeError>>,
}

impl SharedDump {
    pub fn new(dump: Dump) -> Self {
        Self {
            dump,
            stations: OnceLock::new(),
        }
    }

    pub fn stations(&self) -> std::result::Result<&Batch<StationRecord>, DecodeError> {
        self.stations
            .get_or_init(|| decode_stations(&self.dump.bytes))
            .as_ref()
            .map_err(|e| DecodeError(e.0.clone()))
    }
}

impl Deref for SharedDump {
    type Target = Dump;

    fn deref(&self) -> &Dump {
        &self.dump
    }
}

impl From<Dump> for SharedDump {
    fn from(dump: Dump) -> Self {
        Self::new(dump)
    }
}

/// A fetched dump bound to the feed it satisfies
#[derive(Debug, Clone)]
pub struct FeedDump {
    pub feed: Feed,
    pub dump: Arc<SharedDump>,
}

impl FeedDump {
    pub fn new(feed: Feed, dump: Arc<SharedDump>) -> Self {
        Self { feed, dump }
    }
}

/// What a regeneration did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegenStats {
    /// Rows inserted (replace) or changed (merge)
    pub rows: u64,
    pub seen: usize,
    pub rejected: Vec<RowRejection>,
    pub pruned: Vec<(&'static str, u64)>,
}

impl RegenStats {
    fn absorb<T>(&mut self, batch: &Batch<T>) {
        self.seen += batch.seen();
        self.rejected.extend(batch.rejected.iter().cloned());
    }
}

/// Progress callback: rows done, rows total
pub type Progress<'a> = &'a mut dyn FnMut(u64, u64);

pub trait Regenerator {
    fn domain(&self) -> Domain;

    fn mode(&self) -> ApplyMode {
        self.domain().mode()
    }

    /// Write the domain's rows on `tx`. Must not commit.
    fn apply(&self, tx: &StoreTx, inputs: &[FeedDump], progress: Progress) -> Result<RegenStats>;
}

pub fn regenerator(domain: Domain) -> Box<dyn Regenerator> {
    match domain {
        Domain::Item => Box::new(ItemRegenerator),
        Domain::System => Box::new(SystemRegenerator),
        Domain::Station => Box::new(StationRegenerator),
        Domain::Ship => Box::new(ShipRegenerator),
        Domain::ShipVendor => Box::new(ShipVendorRegenerator),
        Domain::Upgrade => Box::new(UpgradeRegenerator),
        Domain::UpgradeVendor => Box::new(UpgradeVendorRegenerator),
        Domain::Listings => Box::new(ListingsRegenerator),
    }
}

/// Regenerate one domain from its dumps and record their tokens, all-or-nothing.
///
/// `malformed_threshold` is the largest tolerated fraction of rejected records per
/// payload; above it the domain fails with `DataCorruption` and nothing is written.
pub fn regenerate(
    store: &mut SqliteStore,
    domain: Domain,
    inputs: &[FeedDump],
    malformed_threshold: f64,
    progress: Progress,
) -> Result<RegenStats> {
    let regen = regenerator(domain);
    let tx = store.begin()?;
    if regen.mode() == ApplyMode::Replace {
        tx.defer_foreign_keys()?;
    }

    let stats = regen.apply(&tx, inputs, progress)?;
    check_threshold(domain, &stats, malformed_threshold)?;

    for input in inputs {
        StalenessTracker::record(tx.conn(), &input.feed, input.dump.token)?;
    }
    tx.commit()?;

    if !stats.rejected.is_empty() {
        warn!(%domain, rejected = stats.rejected.len(), seen = stats.seen, "Skipped rows");
    }
    info!(%domain, rows = stats.rows, "Regenerated");
    Ok(stats)
}

fn check_threshold(domain: Domain, stats: &RegenStats, threshold: f64) -> Result<()> {
    if stats.seen == 0 {
        return Ok(());
    }
    let ratio = stats.rejected.len() as f64 / stats.seen as f64;
    if ratio > threshold {
        return Err(Error::DataCorruption {
            domain,
            reason: format!(
                "{} of {} records rejected ({:.1}% > {:.1}%), first: {}",
                stats.rejected.len(),
                stats.seen,
                ratio * 100.0,
                threshold * 100.0,
                stats.rejected.first().map(|r| r.to_string()).unwrap_or_default()
            ),
        });
    }
    Ok(())
}

/// The dump for `payload`, which the orchestrator must have supplied
fn dump_for(domain: Domain, inputs: &[FeedDump], payload: Payload) -> Result<&SharedDump> {
    inputs
        .iter()
        .find(|i| i.feed.payload == payload)
        .map(|i| i.dump.as_ref())
        .ok_or_else(|| Error::DataCorruption {
            domain,
            reason: format!("no {} dump supplied", payload),
        })
}

fn decoded<T>(domain: Domain, result: std::result::Result<Batch<T>, DecodeError>) -> Result<Batch<T>> {
    let batch = result.map_err(|e| Error::DataCorruption {
        domain,
        reason: e.to_string(),
    })?;
    check_batch(domain, &batch)?;
    Ok(batch)
}

/// The stations dump, decoded once for all domains reading it
fn decoded_stations(domain: Domain, dump: &SharedDump) -> Result<&Batch<StationRecord>> {
    let batch = dump.stations().map_err(|e| Error::DataCorruption {
        domain,
        reason: e.to_string(),
    })?;
    check_batch(domain, batch)?;
    Ok(batch)
}

fn check_batch<T>(domain: Domain, batch: &Batch<T>) -> Result<()> {
    if batch.seen() == 0 {
        return Err(Error::DataCorruption {
            domain,
            reason: "dump contains no records".to_string(),
        });
    }
    for rejection in &batch.rejected {
        debug!(%domain, "Rejected: {}", rejection);
    }
    Ok(())
}

/// Delete every row of `tables`, insert the new rows, then prune anything that
/// referenced a key that is now gone
struct Replace<'t, 'a> {
    tx: &'t StoreTx<'a>,
    tables: &'static [&'static TableSchema],
    stats: RegenStats,
    total: u64,
}

impl<'t, 'a> Replace<'t, 'a> {
    fn begin(tx: &'t StoreTx<'a>, domain: Domain, total: u64) -> Result<Self> {
        let tables = domain_tables(domain);
        for table in tables.iter().rev() {
            let deleted = tx.delete_all(table)?;
            debug!(table = table.name, deleted, "Cleared table");
        }
        Ok(Self {
            tx,
            tables,
            stats: RegenStats::default(),
            total,
        })
    }

    fn insert<R: TableRow>(&mut self, schema: &TableSchema, rows: &[R], progress: Progress) -> Result<()> {
        let done = self.stats.rows;
        let total = self.total;
        self.stats.rows += self
            .tx
            .insert_rows(schema, rows, |n| progress(done + n, total))?;
        Ok(())
    }

    fn finish(mut self) -> Result<RegenStats> {
        for table in self.tables {
            self.stats.pruned.extend(self.tx.prune_orphans(table)?);
        }
        for (table, removed) in &self.stats.pruned {
            info!(table, removed, "Removed rows whose parent no longer exists");
        }
        Ok(self.stats)
    }
}

// =============================================================================
// Replace-mode domains
// =============================================================================

struct ItemRegenerator;

impl Regenerator for ItemRegenerator {
    fn domain(&self) -> Domain {
        Domain::Item
    }

    fn apply(&self, tx: &StoreTx, inputs: &[FeedDump], progress: Progress) -> Result<RegenStats> {
        let dump = dump_for(self.domain(), inputs, Payload::Commodities)?;
        let batch = decoded(self.domain(), decode_commodities(&dump.bytes))?;

        let mut categories: BTreeMap<i64, CategoryRow> = BTreeMap::new();
        let mut by_category: BTreeMap<i64, Vec<ItemRow>> = BTreeMap::new();
        for commodity in &batch.rows {
            // Rare items are not listed, but their category still is
            categories
                .entry(commodity.category.category_id)
                .or_insert_with(|| commodity.category.clone());
            if commodity.is_rare {
                continue;
            }
            by_category
                .entry(commodity.item.category_id)
                .or_default()
                .push(commodity.item.clone());
        }

        // Items are listed by name within their category
        let mut items = Vec::new();
        for (_, mut group) in by_category {
            group.sort_by(|a, b| a.name.cmp(&b.name));
            for (pos, mut item) in group.into_iter().enumerate() {
                item.ui_order = pos as i64 + 1;
                items.push(item);
            }
        }
        let categories: Vec<CategoryRow> = categories.into_values().collect();

        let mut replace = Replace::begin(tx, self.domain(), (categories.len() + items.len()) as u64)?;
        replace.stats.absorb(&batch);
        replace.insert(&CATEGORY, &categories, progress)?;
        replace.insert(&ITEM, &items, progress)?;
        replace.finish()
    }
}

struct SystemRegenerator;

impl Regenerator for SystemRegenerator {
    fn domain(&self) -> Domain {
        Domain::System
    }

    fn apply(&self, tx: &StoreTx, inputs: &[FeedDump], progress: Progress) -> Result<RegenStats> {
        let dump = dump_for(self.domain(), inputs, Payload::Systems)?;
        let batch = decoded(self.domain(), decode_systems(&dump.bytes))?;

        let mut replace = Replace::begin(tx, self.domain(), batch.rows.len() as u64)?;
        replace.stats.absorb(&batch);
        replace.insert(&SYSTEM, &batch.rows, progress)?;
        replace.finish()
    }
}

struct StationRegenerator;

impl Regenerator for StationRegenerator {
    fn domain(&self) -> Domain {
        Domain::Station
    }

    fn apply(&self, tx: &StoreTx, inputs: &[FeedDump], progress: Progress) -> Result<RegenStats> {
        let dump = dump_for(self.domain(), inputs, Payload::Stations)?;
        let batch = decoded_stations(self.domain(), dump)?;

        let seen = batch.seen();
        let mut rejected = batch.rejected.clone();
        let systems = tx.keys("System", "system_id")?;
        let mut rows = Vec::with_capacity(batch.rows.len());
        for (idx, station) in batch.rows.iter().enumerate() {
            if !systems.contains(&station.system_id) {
                rejected.push(RowRejection::ReferentialGap {
                    table: "System",
                    key: station.system_id.to_string(),
                });
                continue;
            }
            match station.to_row() {
                Ok(row) => rows.push(row),
                Err(reason) => rejected.push(RowRejection::Malformed { line: idx + 1, reason }),
            }
        }

        let mut replace = Replace::begin(tx, self.domain(), rows.len() as u64)?;
        replace.stats.seen = seen;
        replace.stats.rejected = rejected;
        replace.insert(&STATION, &rows, progress)?;
        replace.finish()
    }
}

struct ShipRegenerator;

impl Regenerator for ShipRegenerator {
    fn domain(&self) -> Domain {
        Domain::Ship
    }

    fn apply(&self, tx: &StoreTx, inputs: &[FeedDump], progress: Progress) -> Result<RegenStats> {
        let dump = dump_for(self.domain(), inputs, Payload::Ships)?;
        let batch = decoded(self.domain(), decode_ships(&dump.bytes))?;

        let mut replace = Replace::begin(tx, self.domain(), batch.rows.len() as u64)?;
        replace.stats.absorb(&batch);
        replace.insert(&SHIP, &batch.rows, progress)?;
        replace.finish()
    }
}

struct UpgradeRegenerator;

impl Regenerator for UpgradeRegenerator {
    fn domain(&self) -> Domain {
        Domain::Upgrade
    }

    fn apply(&self, tx: &StoreTx, inputs: &[FeedDump], progress: Progress) -> Result<RegenStats> {
        let dump = dump_for(self.domain(), inputs, Payload::Modules)?;
        let batch = decoded(self.domain(), decode_modules(&dump.bytes))?;

        let mut replace = Replace::begin(tx, self.domain(), batch.rows.len() as u64)?;
        replace.stats.absorb(&batch);
        replace.insert(&UPGRADE, &batch.rows, progress)?;
        replace.finish()
    }
}

// =============================================================================
// Vendors
// =============================================================================

struct ShipVendorEntry {
    ship_id: i64,
    station_id: i64,
    modified: String,
}

impl TableRow for ShipVendorEntry {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.ship_id.into(),
            self.station_id.into(),
            self.modified.as_str().into(),
        ]
    }
}

struct UpgradeVendorEntry {
    upgrade_id: i64,
    station_id: i64,
    cost: Option<i64>,
    modified: String,
}

impl TableRow for UpgradeVendorEntry {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.upgrade_id.into(),
            self.station_id.into(),
            self.cost.into(),
            self.modified.as_str().into(),
        ]
    }
}

/// Vendor rows are counted per entry, not per station record
struct VendorBatch<T> {
    rows: Vec<T>,
    seen: usize,
    rejected: Vec<RowRejection>,
}

impl<T> VendorBatch<T> {
    fn from_stations(stations: &Batch<StationRecord>) -> Self {
        Self {
            rows: Vec::new(),
            seen: stations.rejected.len(),
            rejected: stations.rejected.clone(),
        }
    }

    fn gap(&mut self, table: &'static str, key: impl ToString) {
        self.rejected.push(RowRejection::ReferentialGap {
            table,
            key: key.to_string(),
        });
    }
}

struct ShipVendorRegenerator;

impl Regenerator for ShipVendorRegenerator {
    fn domain(&self) -> Domain {
        Domain::ShipVendor
    }

    fn apply(&self, tx: &StoreTx, inputs: &[FeedDump], progress: Progress) -> Result<RegenStats> {
        let dump = dump_for(self.domain(), inputs, Payload::Stations)?;
        let stations = decoded_stations(self.domain(), dump)?;

        let ships = tx.ship_ids_by_name()?;
        let known_stations = tx.keys("Station", "station_id")?;
        let mut vendors = VendorBatch::from_stations(stations);
        let mut placed = HashSet::new();

        for (idx, station) in stations.rows.iter().enumerate() {
            let entries = match station.ship_vendor_rows() {
                Ok(entries) => entries,
                Err(reason) => {
                    vendors.seen += 1;
                    vendors.rejected.push(RowRejection::Malformed { line: idx + 1, reason });
                    continue;
                }
            };
            for entry in entries {
                vendors.seen += 1;
                if !known_stations.contains(&entry.station_id) {
                    vendors.gap("Station", entry.station_id);
                    continue;
                }
                let Some(&ship_id) = ships.get(&entry.ship_name) else {
                    vendors.gap("Ship", &entry.ship_name);
                    continue;
                };
                if placed.insert((ship_id, entry.station_id)) {
                    vendors.rows.push(ShipVendorEntry {
                        ship_id,
                        station_id: entry.station_id,
                        modified: entry.modified,
                    });
                }
            }
        }

        let mut replace = Replace::begin(tx, self.domain(), vendors.rows.len() as u64)?;
        replace.stats.seen = vendors.seen;
        replace.stats.rejected = vendors.rejected;
        replace.insert(&SHIP_VENDOR, &vendors.rows, progress)?;
        replace.finish()
    }
}

struct UpgradeVendorRegenerator;

impl Regenerator for UpgradeVendorRegenerator {
    fn domain(&self) -> Domain {
        Domain::UpgradeVendor
    }

    fn apply(&self, tx: &StoreTx, inputs: &[FeedDump], progress: Progress) -> Result<RegenStats> {
        let dump = dump_for(self.domain(), inputs, Payload::Stations)?;
        let stations = decoded_stations(self.domain(), dump)?;

        let upgrades = tx.upgrade_costs()?;
        let known_stations = tx.keys("Station", "station_id")?;
        let mut vendors = VendorBatch::from_stations(stations);
        let mut placed = HashSet::new();

        for (idx, station) in stations.rows.iter().enumerate() {
            let entries = match station.upgrade_vendor_rows() {
                Ok(entries) => entries,
                Err(reason) => {
                    vendors.seen += 1;
                    vendors.rejected.push(RowRejection::Malformed { line: idx + 1, reason });
                    continue;
                }
            };
            for entry in entries {
                vendors.seen += 1;
                if !known_stations.contains(&entry.station_id) {
                    vendors.gap("Station", entry.station_id);
                    continue;
                }
                let Some(&cost) = upgrades.get(&entry.upgrade_id) else {
                    vendors.gap("Upgrade", entry.upgrade_id);
                    continue;
                };
                if placed.insert((entry.upgrade_id, entry.station_id)) {
                    vendors.rows.push(UpgradeVendorEntry {
                        upgrade_id: entry.upgrade_id,
                        station_id: entry.station_id,
                        cost: Some(cost),
                        modified: entry.modified,
                    });
                }
            }
        }

        let mut replace = Replace::begin(tx, self.domain(), vendors.rows.len() as u64)?;
        replace.stats.seen = vendors.seen;
        replace.stats.rejected = vendors.rejected;
        replace.insert(&UPGRADE_VENDOR, &vendors.rows, progress)?;
        replace.finish()
    }
}

// =============================================================================
// Listings (merge)
// =============================================================================

struct ListingsRegenerator;

impl ListingsRegenerator {
    fn merge(
        &self,
        tx: &StoreTx,
        dump: &Dump,
        from_live: bool,
        stats: &mut RegenStats,
        progress: Progress,
    ) -> Result<()> {
        let domain = self.domain();
        let batch = match decode_listings(&dump.bytes) {
            Ok(batch) => batch,
            Err(e) => {
                return Err(Error::DataCorruption {
                    domain,
                    reason: format!("{}: {}", dump.payload, e),
                })
            }
        };
        // The base dump must carry rows; the live feed may legitimately be empty
        if batch.seen() == 0 && !from_live {
            return Err(Error::DataCorruption {
                domain,
                reason: format!("{} contains no records", dump.payload),
            });
        }

        let stations = tx.keys("Station", "station_id")?;
        let items = tx.keys("Item", "item_id")?;
        let total = batch.rows.len() as u64;
        let mut changed = 0;
        stats.absorb(&batch);

        for (idx, row) in batch.rows.iter().enumerate() {
            if !stations.contains(&row.station_id) {
                stats.rejected.push(RowRejection::ReferentialGap {
                    table: "Station",
                    key: row.station_id.to_string(),
                });
                continue;
            }
            if !items.contains(&row.item_id) {
                stats.rejected.push(RowRejection::ReferentialGap {
                    table: "Item",
                    key: row.item_id.to_string(),
                });
                continue;
            }
            let Some(modified) = format_timestamp(row.modified) else {
                stats.rejected.push(RowRejection::Malformed {
                    line: idx + 2,
                    reason: format!("timestamp out of range: {}", row.modified),
                });
                continue;
            };

            let values: [SqlValue; 8] = [
                row.station_id.into(),
                row.item_id.into(),
                row.demand_price.into(),
                row.demand_units.into(),
                row.demand_level.into(),
                row.supply_price.into(),
                row.supply_units.into(),
                row.supply_level.into(),
            ];
            changed += tx.merge_listing(&values, &modified, from_live)?;

            let done = idx as u64 + 1;
            if done % 1000 == 0 || done == total {
                progress(done, total);
            }
        }

        debug!(payload = %dump.payload, changed, "Merged listings");
        stats.rows += changed;
        Ok(())
    }
}

impl Regenerator for ListingsRegenerator {
    fn domain(&self) -> Domain {
        Domain::Listings
    }

    fn apply(&self, tx: &StoreTx, inputs: &[FeedDump], progress: Progress) -> Result<RegenStats> {
        dump_for(self.domain(), inputs, Payload::Listings)?;
        let mut stats = RegenStats::default();

        // Base dump first so live rows with the same key win on newer timestamps
        let mut ordered: Vec<&FeedDump> = inputs.iter().collect();
        ordered.sort_by_key(|i| i.feed.payload.is_crowd_sourced());

        for input in ordered {
            let from_live = input.feed.payload.is_crowd_sourced();
            self.merge(tx, &input.dump, from_live, &mut stats, progress)?;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{feeds, FreshnessToken};

    fn input(domain: Domain, payload: Payload, body: &str, token: i64) -> FeedDump {
        let feed = feeds(domain, false)
            .into_iter()
            .find(|f| f.payload == payload)
            .unwrap();
        let dump = Dump {
            payload,
            bytes: body.as_bytes().to_vec(),
            token: Some(FreshnessToken(token)),
            source: "test".into(),
        };
        FeedDump::new(feed, Arc::new(dump.into()))
    }

    fn run(store: &mut SqliteStore, domain: Domain, inputs: &[FeedDump]) -> Result<RegenStats> {
        regenerate(store, domain, inputs, 0.05, &mut |_, _| {})
    }

    fn store() -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.create_schema().unwrap();
        store
    }

    const COMMODITIES: &str = r#"[
        {"id": 2, "name": "Tea", "category_id": 1, "is_rare": 0, "category": {"id": 1, "name": "Foods"}},
        {"id": 1, "name": "Coffee", "category_id": 1, "is_rare": 0, "category": {"id": 1, "name": "Foods"}},
        {"id": 3, "name": "Lavian Brandy", "category_id": 1, "is_rare": 1, "category": {"id": 1, "name": "Foods"}},
        {"id": 4, "name": "Gold", "category_id": 2, "is_rare": 0, "category": {"id": 2, "name": "Metals"}},
        {"id": 5, "name": "Onionhead", "category_id": 3, "is_rare": 1, "category": {"id": 3, "name": "Legal Drugs"}}
    ]"#;

    #[test]
    fn test_items_skip_rares_and_order_by_name() {
        let mut store = store();
        let stats = run(&mut store, Domain::Item, &[input(Domain::Item, Payload::Commodities, COMMODITIES, 1)]).unwrap();
        assert_eq!(stats.rows, 3 + 3);
        assert_eq!(store.count("Category").unwrap(), 3);
        assert_eq!(store.count("Item").unwrap(), 3);

        let order: Vec<(String, i64)> = store
            .conn()
            .prepare("SELECT name, ui_order FROM Item ORDER BY item_id")
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(
            order,
            vec![("Coffee".into(), 1), ("Tea".into(), 2), ("Gold".into(), 1)]
        );
    }

    #[test]
    fn test_too_many_rejections_is_corruption_and_writes_nothing() {
        let mut store = store();
        let systems = "{\"id\":1,\"name\":\"Sol\",\"x\":0,\"y\":0,\"z\":0,\"updated_at\":0}\nnot json\n";
        let err = run(&mut store, Domain::System, &[input(Domain::System, Payload::Systems, systems, 1)]).unwrap_err();
        assert!(matches!(err, Error::DataCorruption { domain: Domain::System, .. }));
        assert_eq!(store.count("System").unwrap(), 0);
        assert_eq!(store.count("SyncState").unwrap(), 0);
    }

    #[test]
    fn test_empty_dump_is_corruption() {
        let mut store = store();
        let err = run(&mut store, Domain::Upgrade, &[input(Domain::Upgrade, Payload::Modules, "[]", 1)]).unwrap_err();
        assert!(matches!(err, Error::DataCorruption { .. }));
    }

    #[test]
    fn test_vendor_gaps_are_skipped_rows() {
        let mut store = store();
        let systems = "{\"id\":1,\"name\":\"Sol\",\"x\":0,\"y\":0,\"z\":0,\"updated_at\":0}\n";
        let stations = r#"{"id": 10, "name": "Abraham Lincoln", "system_id": 1, "updated_at": 0, "has_shipyard": true, "selling_ships": ["Adder", "Anaconda"]}"#;
        let ships = r#"{"Ships": {"adder": {"eddbID": 1, "retailCost": 87808, "properties": {"name": "Adder"}}}}"#;

        run(&mut store, Domain::System, &[input(Domain::System, Payload::Systems, systems, 1)]).unwrap();
        run(&mut store, Domain::Station, &[input(Domain::Station, Payload::Stations, stations, 1)]).unwrap();
        run(&mut store, Domain::Ship, &[input(Domain::Ship, Payload::Ships, ships, 1)]).unwrap();

        // One of two entries missing its ship is far above 5%
        let err = run(&mut store, Domain::ShipVendor, &[input(Domain::ShipVendor, Payload::Stations, stations, 1)]).unwrap_err();
        assert!(matches!(err, Error::DataCorruption { .. }));

        let stats = regenerate(
            &mut store,
            Domain::ShipVendor,
            &[input(Domain::ShipVendor, Payload::Stations, stations, 1)],
            0.5,
            &mut |_, _| {},
        )
        .unwrap();
        assert_eq!(stats.rows, 1);
        assert_eq!(
            stats.rejected,
            vec![RowRejection::ReferentialGap { table: "Ship", key: "Anaconda".into() }]
        );
    }

    #[test]
    fn test_station_and_vendor_domains_share_one_decode() {
        let mut store = store();
        let systems = "{\"id\":1,\"name\":\"Sol\",\"x\":0,\"y\":0,\"z\":0,\"updated_at\":0}\n";
        let stations = r#"{"id": 10, "name": "Abraham Lincoln", "system_id": 1, "updated_at": 0, "has_shipyard": true, "selling_ships": ["Adder"]}"#;
        let ships = r#"{"Ships": {"adder": {"eddbID": 1, "retailCost": 87808, "properties": {"name": "Adder"}}}}"#;
        run(&mut store, Domain::System, &[input(Domain::System, Payload::Systems, systems, 1)]).unwrap();
        run(&mut store, Domain::Ship, &[input(Domain::Ship, Payload::Ships, ships, 1)]).unwrap();

        let shared = input(Domain::Station, Payload::Stations, stations, 1).dump;
        let first: *const Batch<StationRecord> = shared.stations().unwrap();

        let station_feed = feeds(Domain::Station, false)[0];
        let vendor_feed = feeds(Domain::ShipVendor, false)[0];
        run(&mut store, Domain::Station, &[FeedDump::new(station_feed, shared.clone())]).unwrap();
        let stats = run(&mut store, Domain::ShipVendor, &[FeedDump::new(vendor_feed, shared.clone())]).unwrap();

        assert_eq!(stats.rows, 1);
        assert!(std::ptr::eq(shared.stations().unwrap(), first));
    }

    #[test]
    fn test_listing_merge_keeps_newer() {
        let mut store = store();
        let systems = "{\"id\":1,\"name\":\"Sol\",\"x\":0,\"y\":0,\"z\":0,\"updated_at\":0}\n";
        let stations = r#"{"id": 5, "name": "Abraham Lincoln", "system_id": 1, "updated_at": 0}"#;
        let commodities = r#"[{"id": 9, "name": "Tea", "category_id": 1, "category": {"id": 1, "name": "Foods"}}]"#;
        run(&mut store, Domain::System, &[input(Domain::System, Payload::Systems, systems, 1)]).unwrap();
        run(&mut store, Domain::Station, &[input(Domain::Station, Payload::Stations, stations, 1)]).unwrap();
        run(&mut store, Domain::Item, &[input(Domain::Item, Payload::Commodities, commodities, 1)]).unwrap();

        let header = "id,station_id,commodity_id,supply,supply_bracket,buy_price,sell_price,demand,demand_bracket,collected_at\n";
        let newer = format!("{}1,5,9,10,1,100,90,0,0,2000\n", header);
        let older = format!("{}1,5,9,10,1,50,40,0,0,1000\n", header);

        let stats = run(&mut store, Domain::Listings, &[input(Domain::Listings, Payload::Listings, &newer, 2)]).unwrap();
        assert_eq!(stats.rows, 1);
        let stats = run(&mut store, Domain::Listings, &[input(Domain::Listings, Payload::Listings, &older, 3)]).unwrap();
        assert_eq!(stats.rows, 0);
        let stats = run(&mut store, Domain::Listings, &[input(Domain::Listings, Payload::Listings, &newer, 4)]).unwrap();
        assert_eq!(stats.rows, 0);

        let price: i64 = store
            .conn()
            .query_row("SELECT supply_price FROM StationItem WHERE station_id = 5 AND item_id = 9", [], |r| r.get(0))
            .unwrap();
        assert_eq!(price, 100);
    }
}
