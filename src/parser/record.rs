use chrono::{DateTime, NaiveDateTime};
use std::fmt;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn bind_to(&self, idx: usize, stmt: &mut rusqlite::Statement) -> rusqlite::Result<()> {
        match self {
            SqlValue::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null)?,
            SqlValue::Integer(i) => stmt.raw_bind_parameter(idx, i)?,
            SqlValue::Real(f) => stmt.raw_bind_parameter(idx, f)?,
            SqlValue::Text(s) => stmt.raw_bind_parameter(idx, s.as_str())?,
        }
        Ok(())
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// A row that can be bound to its table's INSERT, values in schema column order
pub trait TableRow {
    fn values(&self) -> Vec<SqlValue>;
}

/// Why a single row was left out of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum RowRejection {
    /// The row could not be decoded
    Malformed { line: usize, reason: String },
    /// The row references a parent that does not exist
    ReferentialGap { table: &'static str, key: String },
}

impl fmt::Display for RowRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowRejection::Malformed { line, reason } => write!(f, "line {}: {}", line, reason),
            RowRejection::ReferentialGap { table, key } => {
                write!(f, "no {} row for {}", table, key)
            }
        }
    }
}

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRow {
    pub category_id: i64,
    pub name: String,
}

impl TableRow for CategoryRow {
    fn values(&self) -> Vec<SqlValue> {
        vec![self.category_id.into(), self.name.as_str().into()]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemRow {
    pub item_id: i64,
    pub name: String,
    pub category_id: i64,
    pub ui_order: i64,
    pub avg_price: Option<i64>,
    pub fdev_id: Option<i64>,
}

impl TableRow for ItemRow {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.item_id.into(),
            self.name.as_str().into(),
            self.category_id.into(),
            self.ui_order.into(),
            self.avg_price.into(),
            self.fdev_id.into(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemRow {
    pub system_id: i64,
    pub name: String,
    pub pos_x: f64,
    pub pos_y: f64,
    pub pos_z: f64,
    pub modified: String,
}

impl TableRow for SystemRow {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.system_id.into(),
            self.name.as_str().into(),
            self.pos_x.into(),
            self.pos_y.into(),
            self.pos_z.into(),
            self.modified.as_str().into(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationRow {
    pub station_id: i64,
    pub name: String,
    pub system_id: i64,
    pub ls_from_star: i64,
    pub blackmarket: &'static str,
    pub max_pad_size: String,
    pub market: &'static str,
    pub shipyard: &'static str,
    pub modified: String,
    pub outfitting: &'static str,
    pub rearm: &'static str,
    pub refuel: &'static str,
    pub repair: &'static str,
    pub planetary: &'static str,
}

impl TableRow for StationRow {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.station_id.into(),
            self.name.as_str().into(),
            self.system_id.into(),
            self.ls_from_star.into(),
            self.blackmarket.into(),
            self.max_pad_size.as_str().into(),
            self.market.into(),
            self.shipyard.into(),
            self.modified.as_str().into(),
            self.outfitting.into(),
            self.rearm.into(),
            self.refuel.into(),
            self.repair.into(),
            self.planetary.into(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShipRow {
    pub ship_id: i64,
    pub name: String,
    pub cost: Option<i64>,
    pub fdev_id: Option<i64>,
}

impl TableRow for ShipRow {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.ship_id.into(),
            self.name.as_str().into(),
            self.cost.into(),
            self.fdev_id.into(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeRow {
    pub upgrade_id: i64,
    pub name: String,
    pub weight: f64,
    pub cost: i64,
}

impl TableRow for UpgradeRow {
    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.upgrade_id.into(),
            self.name.as_str().into(),
            self.weight.into(),
            self.cost.into(),
        ]
    }
}

/// A ship sold at a station, still keyed by ship name
#[derive(Debug, Clone, PartialEq)]
pub struct ShipVendorRow {
    pub ship_name: String,
    pub station_id: i64,
    pub modified: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeVendorRow {
    pub upgrade_id: i64,
    pub station_id: i64,
    pub modified: String,
}

/// A market quote. `modified` is epoch seconds so merges compare numerically.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRow {
    pub station_id: i64,
    pub item_id: i64,
    pub modified: i64,
    pub demand_price: i64,
    pub demand_units: i64,
    pub demand_level: i64,
    pub supply_price: i64,
    pub supply_units: i64,
    pub supply_level: i64,
}

// =============================================================================
// Timestamps
// =============================================================================

/// Epoch seconds to the stored `YYYY-MM-DD HH:MM:SS` form
pub fn format_timestamp(epoch: i64) -> Option<String> {
    DateTime::from_timestamp(epoch, 0).map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
}

/// Stored `YYYY-MM-DD HH:MM:SS` form back to epoch seconds
pub fn parse_timestamp(text: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}
