//! Decoders for each dump format: bytes in, rows out.
//!
//! A payload that cannot be read at all is a `DecodeError`. A single bad record is
//! recorded as a `RowRejection` and decoding carries on.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use super::record::*;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct DecodeError(pub String);

/// Decoded rows plus the records that had to be skipped
#[derive(Debug, Clone)]
pub struct Batch<T> {
    pub rows: Vec<T>,
    pub rejected: Vec<RowRejection>,
}

impl<T> Batch<T> {
    fn new() -> Self {
        Self {
            rows: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Records seen, accepted or not
    pub fn seen(&self) -> usize {
        self.rows.len() + self.rejected.len()
    }

    fn reject(&mut self, line: usize, reason: impl Into<String>) {
        self.rejected.push(RowRejection::Malformed {
            line,
            reason: reason.into(),
        });
    }
}

fn utf8(bytes: &[u8]) -> Result<&str, DecodeError> {
    std::str::from_utf8(bytes).map_err(|e| DecodeError(format!("payload is not UTF-8: {}", e)))
}

/// One JSON document per line
fn decode_json_lines<T, R>(
    bytes: &[u8],
    convert: impl Fn(T) -> Result<R, String>,
) -> Result<Batch<R>, DecodeError>
where
    T: DeserializeOwned,
{
    let text = utf8(bytes)?;
    let mut batch = Batch::new();

    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => match convert(record) {
                Ok(row) => batch.rows.push(row),
                Err(reason) => batch.reject(idx + 1, reason),
            },
            Err(e) => batch.reject(idx + 1, e.to_string()),
        }
    }

    Ok(batch)
}

/// A single JSON array of records
fn decode_json_array<T, R>(
    bytes: &[u8],
    convert: impl Fn(T) -> Result<R, String>,
) -> Result<Batch<R>, DecodeError>
where
    T: DeserializeOwned,
{
    let values: Vec<Value> = serde_json::from_slice(bytes)
        .map_err(|e| DecodeError(format!("unparsable JSON array: {}", e)))?;
    let mut batch = Batch::new();

    for (idx, value) in values.into_iter().enumerate() {
        match serde_json::from_value::<T>(value) {
            Ok(record) => match convert(record) {
                Ok(row) => batch.rows.push(row),
                Err(reason) => batch.reject(idx + 1, reason),
            },
            Err(e) => batch.reject(idx + 1, e.to_string()),
        }
    }

    Ok(batch)
}

fn timestamp(epoch: i64) -> Result<String, String> {
    format_timestamp(epoch).ok_or_else(|| format!("timestamp out of range: {}", epoch))
}

/// Dumps spell booleans as `true`/`false`, `0`/`1` or `null` depending on the feed
fn loose_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => Some(b),
        Value::Number(n) => Some(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        Value::String(s) => Some(!s.is_empty() && s != "0"),
        _ => None,
    })
}

fn flag(value: Option<bool>) -> &'static str {
    if value.unwrap_or(false) {
        "Y"
    } else {
        "N"
    }
}

// =============================================================================
// commodities.json
// =============================================================================

#[derive(Debug, Deserialize)]
struct CommodityRecord {
    id: i64,
    name: String,
    category_id: i64,
    average_price: Option<i64>,
    #[serde(default, deserialize_with = "loose_bool")]
    is_rare: Option<bool>,
    ed_id: Option<i64>,
    category: CategoryRecord,
}

#[derive(Debug, Deserialize)]
struct CategoryRecord {
    id: i64,
    name: String,
}

/// A commodity with its category, before rare items are filtered out
#[derive(Debug, Clone, PartialEq)]
pub struct Commodity {
    pub category: CategoryRow,
    pub item: ItemRow,
    pub is_rare: bool,
}

pub fn decode_commodities(bytes: &[u8]) -> Result<Batch<Commodity>, DecodeError> {
    decode_json_array(bytes, |r: CommodityRecord| {
        if r.category_id != r.category.id {
            return Err(format!(
                "category_id {} disagrees with category {}",
                r.category_id, r.category.id
            ));
        }
        Ok(Commodity {
            category: CategoryRow {
                category_id: r.category.id,
                name: r.category.name,
            },
            item: ItemRow {
                item_id: r.id,
                name: r.name,
                category_id: r.category_id,
                ui_order: 0,
                avg_price: r.average_price,
                fdev_id: r.ed_id,
            },
            is_rare: r.is_rare.unwrap_or(false),
        })
    })
}

// =============================================================================
// systems_populated.jsonl
// =============================================================================

#[derive(Debug, Deserialize)]
struct SystemRecord {
    id: i64,
    name: String,
    x: f64,
    y: f64,
    z: f64,
    updated_at: i64,
}

pub fn decode_systems(bytes: &[u8]) -> Result<Batch<SystemRow>, DecodeError> {
    decode_json_lines(bytes, |r: SystemRecord| {
        Ok(SystemRow {
            system_id: r.id,
            name: r.name,
            pos_x: r.x,
            pos_y: r.y,
            pos_z: r.z,
            modified: timestamp(r.updated_at)?,
        })
    })
}

// =============================================================================
// stations.jsonl
// =============================================================================

/// The fields of a station record the station and vendor domains use
#[derive(Debug, Clone, Deserialize)]
pub struct StationRecord {
    pub id: i64,
    pub name: String,
    pub system_id: i64,
    pub updated_at: i64,
    pub distance_to_star: Option<f64>,
    pub max_landing_pad_size: Option<String>,
    #[serde(default, deserialize_with = "loose_bool")]
    pub has_blackmarket: Option<bool>,
    #[serde(default, deserialize_with = "loose_bool")]
    pub has_market: Option<bool>,
    #[serde(default, deserialize_with = "loose_bool")]
    pub has_shipyard: Option<bool>,
    #[serde(default, deserialize_with = "loose_bool")]
    pub has_outfitting: Option<bool>,
    #[serde(default, deserialize_with = "loose_bool")]
    pub has_rearm: Option<bool>,
    #[serde(default, deserialize_with = "loose_bool")]
    pub has_refuel: Option<bool>,
    #[serde(default, deserialize_with = "loose_bool")]
    pub has_repair: Option<bool>,
    #[serde(default, deserialize_with = "loose_bool")]
    pub is_planetary: Option<bool>,
    pub shipyard_updated_at: Option<i64>,
    pub outfitting_updated_at: Option<i64>,
    #[serde(default)]
    pub selling_ships: Vec<String>,
    #[serde(default)]
    pub selling_modules: Vec<i64>,
}

pub fn decode_stations(bytes: &[u8]) -> Result<Batch<StationRecord>, DecodeError> {
    decode_json_lines(bytes, |r: StationRecord| {
        timestamp(r.updated_at)?;
        Ok(r)
    })
}

impl StationRecord {
    pub fn to_row(&self) -> Result<StationRow, String> {
        let max_pad_size = match self.max_landing_pad_size.as_deref() {
            Some(size) if !size.is_empty() && size != "None" => size.to_string(),
            _ => "?".to_string(),
        };
        Ok(StationRow {
            station_id: self.id,
            name: self.name.clone(),
            system_id: self.system_id,
            ls_from_star: self.distance_to_star.map(|d| d.round() as i64).unwrap_or(0),
            blackmarket: flag(self.has_blackmarket),
            max_pad_size,
            market: flag(self.has_market),
            shipyard: flag(self.has_shipyard),
            modified: timestamp(self.updated_at)?,
            outfitting: flag(self.has_outfitting),
            rearm: flag(self.has_rearm),
            refuel: flag(self.has_refuel),
            repair: flag(self.has_repair),
            planetary: flag(self.is_planetary),
        })
    }

    /// Ships sold here; empty unless the station has a shipyard
    pub fn ship_vendor_rows(&self) -> Result<Vec<ShipVendorRow>, String> {
        if !self.has_shipyard.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let modified = timestamp(self.shipyard_updated_at.unwrap_or(self.updated_at))?;
        Ok(self
            .selling_ships
            .iter()
            .map(|ship| ShipVendorRow {
                ship_name: normalize_vendor_ship_name(ship),
                station_id: self.id,
                modified: modified.clone(),
            })
            .collect())
    }

    /// Modules sold here; empty unless the station has outfitting
    pub fn upgrade_vendor_rows(&self) -> Result<Vec<UpgradeVendorRow>, String> {
        if !self.has_outfitting.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let modified = timestamp(self.outfitting_updated_at.unwrap_or(self.updated_at))?;
        Ok(self
            .selling_modules
            .iter()
            .map(|upgrade_id| UpgradeVendorRow {
                upgrade_id: *upgrade_id,
                station_id: self.id,
                modified: modified.clone(),
            })
            .collect())
    }
}

// =============================================================================
// index.json (coriolis ship catalog)
// =============================================================================

#[derive(Debug, Deserialize)]
struct ShipCatalog {
    #[serde(rename = "Ships")]
    ships: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ShipRecord {
    #[serde(rename = "eddbID")]
    eddb_id: i64,
    #[serde(rename = "edID")]
    ed_id: Option<i64>,
    #[serde(rename = "retailCost")]
    retail_cost: Option<i64>,
    properties: ShipProperties,
}

#[derive(Debug, Deserialize)]
struct ShipProperties {
    name: String,
}

pub fn decode_ships(bytes: &[u8]) -> Result<Batch<ShipRow>, DecodeError> {
    let catalog: ShipCatalog = serde_json::from_slice(bytes)
        .map_err(|e| DecodeError(format!("unparsable ship catalog: {}", e)))?;
    let mut batch = Batch::new();

    for (idx, (key, value)) in catalog.ships.into_iter().enumerate() {
        match serde_json::from_value::<ShipRecord>(value) {
            Ok(r) => batch.rows.push(ShipRow {
                ship_id: r.eddb_id,
                name: normalize_ship_name(&r.properties.name),
                cost: r.retail_cost,
                fdev_id: r.ed_id,
            }),
            Err(e) => batch.reject(idx + 1, format!("{}: {}", key, e)),
        }
    }

    Ok(batch)
}

/// Catalog names use "Mk III"; station dumps use "Mk. III" and spell out the marks of
/// a few base hulls.
pub fn normalize_ship_name(name: &str) -> String {
    match name {
        "Eagle" => "Eagle Mk. II".to_string(),
        "Sidewinder" => "Sidewinder Mk. I".to_string(),
        "Viper" => "Viper Mk. III".to_string(),
        _ => name.replace("Mk ", "Mk. "),
    }
}

pub fn normalize_vendor_ship_name(name: &str) -> String {
    name.replace(" MK ", " Mk ").replace(" Mk ", " Mk. ")
}

// =============================================================================
// modules.json
// =============================================================================

#[derive(Debug, Deserialize)]
struct ModuleRecord {
    id: i64,
    name: Option<String>,
    ed_symbol: Option<String>,
    mass: Option<f64>,
    price: Option<i64>,
}

pub fn decode_modules(bytes: &[u8]) -> Result<Batch<UpgradeRow>, DecodeError> {
    decode_json_array(bytes, |r: ModuleRecord| {
        let name = match (r.name, r.ed_symbol) {
            (Some(name), _) if !name.is_empty() => name,
            (_, Some(symbol)) if !symbol.is_empty() => symbol.replace('_', " "),
            _ => return Err(format!("module {} has neither name nor ed_symbol", r.id)),
        };
        Ok(UpgradeRow {
            upgrade_id: r.id,
            name,
            weight: r.mass.unwrap_or(0.0),
            cost: r.price.unwrap_or(0),
        })
    })
}

// =============================================================================
// listings.csv / listings-live.csv
// =============================================================================

#[derive(Debug, Deserialize)]
struct ListingRecord {
    station_id: i64,
    commodity_id: i64,
    supply: i64,
    supply_bracket: Option<i64>,
    buy_price: i64,
    sell_price: i64,
    demand: i64,
    demand_bracket: Option<i64>,
    collected_at: i64,
}

pub fn decode_listings(bytes: &[u8]) -> Result<Batch<ListingRow>, DecodeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    reader
        .headers()
        .map_err(|e| DecodeError(format!("unreadable listings header: {}", e)))?;

    let mut batch = Batch::new();
    for (idx, result) in reader.deserialize::<ListingRecord>().enumerate() {
        match result {
            Ok(r) => batch.rows.push(ListingRow {
                station_id: r.station_id,
                item_id: r.commodity_id,
                modified: r.collected_at,
                demand_price: r.sell_price,
                demand_units: r.demand,
                demand_level: r.demand_bracket.unwrap_or(-1),
                supply_price: r.buy_price,
                supply_units: r.supply,
                supply_level: r.supply_bracket.unwrap_or(-1),
            }),
            // +2: one for the header, one for 1-based lines
            Err(e) => batch.reject(idx + 2, e.to_string()),
        }
    }

    Ok(batch)
}
