//! Flat-file copies of regenerated tables, for tools that rebuild their database from
//! the CSV and `.prices` files beside it.

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::schema::TableSchema;

/// File name of the listings export
pub const PRICES_FILE: &str = "TradeDangerous.prices";

/// Write `schema` to `<dir>/<Table>.csv`, rows ordered by primary key.
///
/// The header names every column; primary key columns carry an `unq:` prefix. The file
/// is written beside its final name and renamed into place once complete.
pub fn export_table(conn: &Connection, schema: &TableSchema, dir: &Path) -> Result<(PathBuf, u64)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.csv", schema.name));
    let partial = dir.join(format!("{}.csv.part", schema.name));

    let header: Vec<String> = schema
        .columns
        .iter()
        .map(|c| {
            if schema.primary_key.contains(&c.name) {
                format!("unq:{}", c.name)
            } else {
                c.name.to_string()
            }
        })
        .collect();
    let columns: Vec<&str> = schema.columns.iter().map(|c| c.name).collect();
    let sql = format!(
        "SELECT {} FROM {} ORDER BY {}",
        columns.join(", "),
        schema.name,
        schema.primary_key.join(", ")
    );

    let mut writer = csv::Writer::from_path(&partial)?;
    writer.write_record(&header)?;

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut count = 0;
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            record.push(match row.get_ref(idx)? {
                ValueRef::Null => String::new(),
                ValueRef::Integer(i) => i.to_string(),
                ValueRef::Real(f) => f.to_string(),
                ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
            });
        }
        writer.write_record(&record)?;
        count += 1;
    }
    writer.flush()?;
    drop(writer);

    fs::rename(&partial, &path)?;
    debug!(table = schema.name, rows = count, path = %path.display(), "Exported table");
    Ok((path, count))
}

/// Quantity column of a price line: units and level, `?` when unknown, `-` when none
fn quantity(units: i64, level: i64) -> String {
    match (units, level) {
        (u, l) if u < 0 || l < 0 => "?".to_string(),
        (0, _) | (_, 0) => "-".to_string(),
        (u, 1) => format!("{}L", u),
        (u, 2) => format!("{}M", u),
        (u, _) => format!("{}H", u),
    }
}

struct PriceLine {
    system: String,
    station: String,
    category: String,
    item: String,
    demand_price: i64,
    supply_price: i64,
    demand_units: i64,
    demand_level: i64,
    supply_units: i64,
    supply_level: i64,
    modified: String,
}

/// Write every listing to `path`, grouped by station then category. Returns the
/// number of item lines.
pub fn export_prices(conn: &Connection, path: &Path) -> Result<u64> {
    let mut stmt = conn.prepare(
        "SELECT sys.name, stn.name, cat.name, itm.name,
                si.demand_price, si.supply_price, si.demand_units, si.demand_level,
                si.supply_units, si.supply_level, si.modified
           FROM StationItem si
           JOIN Station stn ON stn.station_id = si.station_id
           JOIN System sys ON sys.system_id = stn.system_id
           JOIN Item itm ON itm.item_id = si.item_id
           JOIN Category cat ON cat.category_id = itm.category_id
          ORDER BY sys.name, stn.name, cat.name, itm.ui_order, itm.name",
    )?;
    let lines = stmt
        .query_map([], |r| {
            Ok(PriceLine {
                system: r.get(0)?,
                station: r.get(1)?,
                category: r.get(2)?,
                item: r.get(3)?,
                demand_price: r.get(4)?,
                supply_price: r.get(5)?,
                demand_units: r.get(6)?,
                demand_level: r.get(7)?,
                supply_units: r.get(8)?,
                supply_level: r.get(9)?,
                modified: r.get(10)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let partial = path.with_extension("prices.part");
    let mut out = BufWriter::new(File::create(&partial)?);
    writeln!(out, "# Generated by eddblink-sync")?;
    writeln!(out, "#")?;
    writeln!(
        out,
        "#     {:<30} {:>7} {:>7} {:>11} {:>11}  {}",
        "<item name>", "<sellCR>", "<buyCR>", "<demand>", "<supply>", "<timestamp>"
    )?;

    let mut station: Option<(&str, &str)> = None;
    let mut category: Option<&str> = None;
    for line in &lines {
        let here = (line.system.as_str(), line.station.as_str());
        if station != Some(here) {
            writeln!(out)?;
            writeln!(out, "@ {}/{}", line.system.to_uppercase(), line.station)?;
            station = Some(here);
            category = None;
        }
        if category != Some(line.category.as_str()) {
            writeln!(out, "   + {}", line.category)?;
            category = Some(line.category.as_str());
        }
        let supply = if line.supply_price == 0 {
            "-".to_string()
        } else {
            quantity(line.supply_units, line.supply_level)
        };
        writeln!(
            out,
            "      {:<30} {:>7} {:>7} {:>11} {:>11}  {}",
            line.item,
            line.demand_price,
            line.supply_price,
            quantity(line.demand_units, line.demand_level),
            supply,
            line.modified
        )?;
    }
    out.flush()?;
    drop(out);

    fs::rename(&partial, path)?;
    debug!(lines = lines.len(), path = %path.display(), "Exported prices");
    Ok(lines.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SqlValue;
    use crate::schema::tables::SYSTEM;
    use crate::writer::SqliteStore;

    fn seeded() -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.create_schema().unwrap();
        store
            .conn()
            .execute_batch(
                "INSERT INTO System VALUES (2, 'Lave', 75.75, 48.75, 70.75, '2020-01-01 00:00:00');
                 INSERT INTO System VALUES (1, 'Sol', 0.0, 0.0, 0.0, '2020-01-01 00:00:00');",
            )
            .unwrap();
        store
    }

    #[test]
    fn test_export_table_orders_by_key_and_marks_unique_columns() {
        let store = seeded();
        let dir = tempfile::tempdir().unwrap();

        let (path, rows) = export_table(store.conn(), &SYSTEM, dir.path()).unwrap();
        assert_eq!(rows, 2);
        assert_eq!(path, dir.path().join("System.csv"));
        assert!(!dir.path().join("System.csv.part").exists());

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("unq:system_id,name,"));
        assert!(lines[1].starts_with("1,Sol,"));
        assert!(lines[2].starts_with("2,Lave,75.75,"));
    }

    #[test]
    fn test_export_prices_groups_by_station() {
        let mut store = seeded();
        let tx = store.begin().unwrap();
        tx.conn()
            .execute_batch(
                "INSERT INTO Station (station_id, name, system_id, ls_from_star, blackmarket,
                     max_pad_size, market, shipyard, modified, outfitting, rearm, refuel,
                     repair, planetary)
                 VALUES (5, 'Abraham Lincoln', 1, 496, 'N', 'L', 'Y', 'Y',
                     '2020-01-01 00:00:00', 'Y', 'Y', 'Y', 'Y', 'N');
                 INSERT INTO Category VALUES (1, 'Foods');
                 INSERT INTO Item (item_id, name, category_id, ui_order) VALUES (9, 'Tea', 1, 1);",
            )
            .unwrap();
        let values: Vec<SqlValue> = [5i64, 9, 1490, 0, 0, 1500, 100, 2]
            .into_iter()
            .map(SqlValue::from)
            .collect();
        tx.merge_listing(&values, "2020-01-01 00:00:03", false).unwrap();
        tx.commit().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PRICES_FILE);
        assert_eq!(export_prices(store.conn(), &path).unwrap(), 1);

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("@ SOL/Abraham Lincoln\n   + Foods\n"));
        let tea = text.lines().find(|l| l.trim_start().starts_with("Tea")).unwrap();
        let fields: Vec<&str> = tea.split_whitespace().collect();
        assert_eq!(fields, vec!["Tea", "1490", "1500", "-", "100M", "2020-01-01", "00:00:03"]);
    }

    #[test]
    fn test_quantity_levels() {
        assert_eq!(quantity(-1, -1), "?");
        assert_eq!(quantity(0, 0), "-");
        assert_eq!(quantity(1200, 1), "1200L");
        assert_eq!(quantity(35, 3), "35H");
    }
}
