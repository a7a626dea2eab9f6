use std::collections::HashSet;
use std::fmt;

/// A data domain: one selectable unit of regeneration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    Item,
    System,
    Station,
    Ship,
    ShipVendor,
    Upgrade,
    UpgradeVendor,
    Listings,
}

impl Domain {
    /// Every domain, in canonical order. Ties in the dependency order are broken by
    /// this order.
    pub const ALL: [Domain; 8] = [
        Domain::Item,
        Domain::System,
        Domain::Station,
        Domain::Ship,
        Domain::ShipVendor,
        Domain::Upgrade,
        Domain::UpgradeVendor,
        Domain::Listings,
    ];

    /// The option symbol naming this domain.
    pub const fn name(&self) -> &'static str {
        match self {
            Domain::Item => "item",
            Domain::System => "system",
            Domain::Station => "station",
            Domain::Ship => "ship",
            Domain::ShipVendor => "shipvend",
            Domain::Upgrade => "upgrade",
            Domain::UpgradeVendor => "upvend",
            Domain::Listings => "listings",
        }
    }

    pub fn from_name(name: &str) -> Option<Domain> {
        Domain::ALL.into_iter().find(|d| d.name() == name)
    }

    /// Listings is the only domain merged row by row.
    pub const fn mode(&self) -> ApplyMode {
        match self {
            Domain::Listings => ApplyMode::Merge,
            _ => ApplyMode::Replace,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a regenerator writes its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Delete every row of the domain's tables, then load the new rows.
    Replace,
    /// Upsert row by row, keeping whichever side carries the newer timestamp.
    Merge,
}

/// Column data type
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    /// `YYYY-MM-DD HH:MM:SS` UTC, stored as text
    DateTime,
}

impl ColumnType {
    pub const fn sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::DateTime => "DATETIME",
        }
    }
}

/// Column definition
#[derive(Debug, Clone)]
pub struct Column {
    pub name: &'static str,
    pub col_type: ColumnType,
    pub nullable: bool,
    pub default: Option<&'static str>,
}

impl Column {
    /// Create an optional (nullable) column
    pub const fn new(name: &'static str, col_type: ColumnType) -> Self {
        Self {
            name,
            col_type,
            nullable: true,
            default: None,
        }
    }

    /// Create a required (non-nullable) column
    pub const fn required(name: &'static str, col_type: ColumnType) -> Self {
        Self {
            name,
            col_type,
            nullable: false,
            default: None,
        }
    }

    /// Set the SQL default expression
    pub const fn default(self, expr: &'static str) -> Self {
        Self {
            default: Some(expr),
            ..self
        }
    }
}

/// Foreign key reference. The referenced column shares the referencing column's name.
#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references_table: &'static str,
    pub references_column: &'static str,
}

impl ForeignKey {
    pub const fn new(column: &'static str, references_table: &'static str) -> Self {
        Self {
            column,
            references_table,
            references_column: column,
        }
    }
}

/// Index definition
#[derive(Debug, Clone)]
pub struct Index {
    pub columns: &'static [&'static str],
    pub unique: bool,
}

impl Index {
    /// Create a non-unique index
    pub const fn on(columns: &'static [&'static str]) -> Self {
        Self {
            columns,
            unique: false,
        }
    }

    /// Create a unique index
    pub const fn unique(columns: &'static [&'static str]) -> Self {
        Self {
            columns,
            unique: true,
        }
    }
}

/// Table schema definition
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub primary_key: &'static [&'static str],
    pub foreign_keys: &'static [ForeignKey],
    pub indexes: &'static [Index],
}

impl TableSchema {
    /// Get all tables this table depends on (FK parents)
    pub fn dependencies(&self) -> HashSet<&'static str> {
        self.foreign_keys
            .iter()
            .map(|fk| fk.references_table)
            .collect()
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }
}
