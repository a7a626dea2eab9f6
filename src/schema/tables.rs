//! Table schema definitions for the TradeDangerous tables this engine maintains

use super::types::*;

// =============================================================================
// Commodity taxonomy
// =============================================================================

pub static CATEGORY: TableSchema = TableSchema {
    name: "Category",
    columns: &[
        Column::required("category_id", ColumnType::Integer),
        Column::required("name", ColumnType::Text),
    ],
    primary_key: &["category_id"],
    foreign_keys: &[],
    indexes: &[],
};

pub static ITEM: TableSchema = TableSchema {
    name: "Item",
    columns: &[
        Column::required("item_id", ColumnType::Integer),
        Column::required("name", ColumnType::Text),
        Column::required("category_id", ColumnType::Integer),
        Column::required("ui_order", ColumnType::Integer).default("0"),
        Column::new("avg_price", ColumnType::Integer),
        Column::new("fdev_id", ColumnType::Integer),
    ],
    primary_key: &["item_id"],
    foreign_keys: &[ForeignKey::new("category_id", "Category")],
    indexes: &[],
};

// =============================================================================
// Galaxy
// =============================================================================

pub static SYSTEM: TableSchema = TableSchema {
    name: "System",
    columns: &[
        Column::required("system_id", ColumnType::Integer),
        Column::required("name", ColumnType::Text),
        Column::required("pos_x", ColumnType::Real),
        Column::required("pos_y", ColumnType::Real),
        Column::required("pos_z", ColumnType::Real),
        Column::required("modified", ColumnType::DateTime),
    ],
    primary_key: &["system_id"],
    foreign_keys: &[],
    indexes: &[],
};

pub static STATION: TableSchema = TableSchema {
    name: "Station",
    columns: &[
        Column::required("station_id", ColumnType::Integer),
        Column::required("name", ColumnType::Text),
        Column::required("system_id", ColumnType::Integer),
        Column::required("ls_from_star", ColumnType::Integer).default("0"),
        Column::required("blackmarket", ColumnType::Text).default("'?'"),
        Column::required("max_pad_size", ColumnType::Text).default("'?'"),
        Column::required("market", ColumnType::Text).default("'?'"),
        Column::required("shipyard", ColumnType::Text).default("'?'"),
        Column::required("modified", ColumnType::DateTime),
        Column::required("outfitting", ColumnType::Text).default("'?'"),
        Column::required("rearm", ColumnType::Text).default("'?'"),
        Column::required("refuel", ColumnType::Text).default("'?'"),
        Column::required("repair", ColumnType::Text).default("'?'"),
        Column::required("planetary", ColumnType::Text).default("'?'"),
    ],
    primary_key: &["station_id"],
    foreign_keys: &[ForeignKey::new("system_id", "System")],
    indexes: &[Index::on(&["system_id"])],
};

// =============================================================================
// Ships and outfitting
// =============================================================================

pub static SHIP: TableSchema = TableSchema {
    name: "Ship",
    columns: &[
        Column::required("ship_id", ColumnType::Integer),
        Column::required("name", ColumnType::Text),
        Column::new("cost", ColumnType::Integer),
        Column::new("fdev_id", ColumnType::Integer),
    ],
    primary_key: &["ship_id"],
    foreign_keys: &[],
    indexes: &[Index::on(&["name"])],
};

pub static SHIP_VENDOR: TableSchema = TableSchema {
    name: "ShipVendor",
    columns: &[
        Column::required("ship_id", ColumnType::Integer),
        Column::required("station_id", ColumnType::Integer),
        Column::required("modified", ColumnType::DateTime),
    ],
    primary_key: &["ship_id", "station_id"],
    foreign_keys: &[
        ForeignKey::new("ship_id", "Ship"),
        ForeignKey::new("station_id", "Station"),
    ],
    indexes: &[Index::on(&["station_id"])],
};

pub static UPGRADE: TableSchema = TableSchema {
    name: "Upgrade",
    columns: &[
        Column::required("upgrade_id", ColumnType::Integer),
        Column::required("name", ColumnType::Text),
        Column::required("weight", ColumnType::Real).default("0"),
        Column::required("cost", ColumnType::Integer).default("0"),
    ],
    primary_key: &["upgrade_id"],
    foreign_keys: &[],
    indexes: &[],
};

pub static UPGRADE_VENDOR: TableSchema = TableSchema {
    name: "UpgradeVendor",
    columns: &[
        Column::required("upgrade_id", ColumnType::Integer),
        Column::required("station_id", ColumnType::Integer),
        Column::new("cost", ColumnType::Integer),
        Column::required("modified", ColumnType::DateTime),
    ],
    primary_key: &["upgrade_id", "station_id"],
    foreign_keys: &[
        ForeignKey::new("upgrade_id", "Upgrade"),
        ForeignKey::new("station_id", "Station"),
    ],
    indexes: &[Index::on(&["station_id"])],
};

// =============================================================================
// Market
// =============================================================================

pub static STATION_ITEM: TableSchema = TableSchema {
    name: "StationItem",
    columns: &[
        Column::required("station_id", ColumnType::Integer),
        Column::required("item_id", ColumnType::Integer),
        Column::required("demand_price", ColumnType::Integer),
        Column::required("demand_units", ColumnType::Integer),
        Column::required("demand_level", ColumnType::Integer),
        Column::required("supply_price", ColumnType::Integer),
        Column::required("supply_units", ColumnType::Integer),
        Column::required("supply_level", ColumnType::Integer),
        Column::required("modified", ColumnType::DateTime),
        Column::required("from_live", ColumnType::Integer).default("0"),
    ],
    primary_key: &["station_id", "item_id"],
    foreign_keys: &[
        ForeignKey::new("station_id", "Station"),
        ForeignKey::new("item_id", "Item"),
    ],
    indexes: &[Index::on(&["item_id"])],
};

// =============================================================================
// Bookkeeping
// =============================================================================

pub static SYNC_STATE: TableSchema = TableSchema {
    name: "SyncState",
    columns: &[
        Column::required("sync_key", ColumnType::Text),
        Column::new("token", ColumnType::Integer),
        Column::required("applied_at", ColumnType::DateTime),
    ],
    primary_key: &["sync_key"],
    foreign_keys: &[],
    indexes: &[],
};

// =============================================================================
// Schema Registry
// =============================================================================

/// All table schemas in dependency order
pub static ALL_TABLES: &[&TableSchema] = &[
    &CATEGORY,
    &ITEM,
    &SYSTEM,
    &STATION,
    &SHIP,
    &SHIP_VENDOR,
    &UPGRADE,
    &UPGRADE_VENDOR,
    &STATION_ITEM,
    &SYNC_STATE,
];

/// Get table schema by name
pub fn get_table(name: &str) -> Option<&'static TableSchema> {
    ALL_TABLES.iter().find(|t| t.name == name).copied()
}

/// Get all table names
pub fn table_names() -> Vec<&'static str> {
    ALL_TABLES.iter().map(|t| t.name).collect()
}

static ITEM_TABLES: [&TableSchema; 2] = [&CATEGORY, &ITEM];
static SYSTEM_TABLES: [&TableSchema; 1] = [&SYSTEM];
static STATION_TABLES: [&TableSchema; 1] = [&STATION];
static SHIP_TABLES: [&TableSchema; 1] = [&SHIP];
static SHIP_VENDOR_TABLES: [&TableSchema; 1] = [&SHIP_VENDOR];
static UPGRADE_TABLES: [&TableSchema; 1] = [&UPGRADE];
static UPGRADE_VENDOR_TABLES: [&TableSchema; 1] = [&UPGRADE_VENDOR];
static LISTINGS_TABLES: [&TableSchema; 1] = [&STATION_ITEM];

/// Tables written by a domain's regenerator, parents first
pub fn domain_tables(domain: Domain) -> &'static [&'static TableSchema] {
    match domain {
        Domain::Item => &ITEM_TABLES,
        Domain::System => &SYSTEM_TABLES,
        Domain::Station => &STATION_TABLES,
        Domain::Ship => &SHIP_TABLES,
        Domain::ShipVendor => &SHIP_VENDOR_TABLES,
        Domain::Upgrade => &UPGRADE_TABLES,
        Domain::UpgradeVendor => &UPGRADE_VENDOR_TABLES,
        Domain::Listings => &LISTINGS_TABLES,
    }
}

/// Tables whose foreign keys reference `table`
pub fn child_tables(table: &str) -> Vec<&'static TableSchema> {
    ALL_TABLES
        .iter()
        .filter(|t| t.name != table && t.dependencies().contains(table))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_parent_first() {
        for (pos, table) in ALL_TABLES.iter().enumerate() {
            for dep in table.dependencies() {
                let dep_pos = ALL_TABLES.iter().position(|t| t.name == dep).unwrap();
                assert!(dep_pos < pos, "{} listed before its parent {}", table.name, dep);
            }
        }
    }

    #[test]
    fn test_child_tables_of_station() {
        let names: Vec<_> = child_tables("Station").iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["ShipVendor", "UpgradeVendor", "StationItem"]);
    }

    #[test]
    fn test_every_domain_has_tables() {
        for domain in Domain::ALL {
            assert!(!domain_tables(domain).is_empty());
        }
        let item: Vec<_> = domain_tables(Domain::Item).iter().map(|t| t.name).collect();
        assert_eq!(item, vec!["Category", "Item"]);
        assert_eq!(domain_tables(Domain::Listings)[0].name, "StationItem");
    }
}
