use rusqlite::{Connection, Transaction};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

use super::schema_gen::{generate_create_table, generate_indexes, generate_insert};
use crate::error::Result;
use crate::parser::{SqlValue, TableRow};
use crate::schema::{child_tables, TableSchema, ALL_TABLES};

const DEFAULT_BATCH_SIZE: usize = 1000;

/// The TradeDangerous database
pub struct SqliteStore {
    conn: Connection,
    batch_size: usize,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;",
        )?;
        debug!(path = %db_path.display(), "Opened database");
        Ok(Self::with_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// True when every table exists
    pub fn is_initialized(&self) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
        for schema in ALL_TABLES {
            if !stmt.exists([schema.name])? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Create any missing tables and indexes
    pub fn create_schema(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        create_tables(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// Drop and recreate every table, SyncState included, as one transaction
    pub fn reset(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch("PRAGMA defer_foreign_keys = ON;")?;
        for schema in ALL_TABLES.iter().rev() {
            tx.execute(&format!("DROP TABLE IF EXISTS {}", schema.name), [])?;
        }
        create_tables(&tx)?;
        tx.commit()?;
        info!("Database reset: {} tables recreated", ALL_TABLES.len());
        Ok(())
    }

    /// Begin a scoped write. Dropping the handle without `commit` rolls back.
    pub fn begin(&mut self) -> Result<StoreTx<'_>> {
        let tx = self.conn.transaction()?;
        Ok(StoreTx {
            tx,
            batch_size: self.batch_size,
        })
    }

    pub fn count(&self, table: &str) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Rows whose foreign keys point nowhere, across every table
    pub fn dangling_references(&self) -> Result<u64> {
        let mut stmt = self.conn.prepare("PRAGMA foreign_key_check")?;
        let mut rows = stmt.query([])?;
        let mut count = 0;
        while rows.next()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    pub fn optimize(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA optimize;")?;
        Ok(())
    }
}

fn create_tables(conn: &Connection) -> Result<()> {
    for schema in ALL_TABLES {
        conn.execute(&generate_create_table(schema), [])?;
        for index_sql in generate_indexes(schema) {
            conn.execute(&index_sql, [])?;
        }
    }
    Ok(())
}

/// One write transaction against the store
pub struct StoreTx<'a> {
    tx: Transaction<'a>,
    batch_size: usize,
}

impl<'a> StoreTx<'a> {
    pub fn conn(&self) -> &Connection {
        &self.tx
    }

    /// Check foreign keys at commit instead of per statement
    pub fn defer_foreign_keys(&self) -> Result<()> {
        self.tx.execute_batch("PRAGMA defer_foreign_keys = ON;")?;
        Ok(())
    }

    pub fn delete_all(&self, schema: &TableSchema) -> Result<u64> {
        let deleted = self.tx.execute(&format!("DELETE FROM {}", schema.name), [])?;
        Ok(deleted as u64)
    }

    /// Insert rows in batches, calling `progress` with the running total after each
    pub fn insert_rows<R: TableRow>(
        &self,
        schema: &TableSchema,
        rows: &[R],
        mut progress: impl FnMut(u64),
    ) -> Result<u64> {
        let sql = generate_insert(schema);
        let mut count: u64 = 0;

        for batch in rows.chunks(self.batch_size) {
            insert_batch(&self.tx, &sql, batch)?;
            count += batch.len() as u64;
            progress(count);
        }

        Ok(count)
    }

    /// Every value of an integer key column
    pub fn keys(&self, table: &str, column: &str) -> Result<HashSet<i64>> {
        let mut stmt = self
            .tx
            .prepare(&format!("SELECT {} FROM {}", column, table))?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<i64>>>()?;
        Ok(keys)
    }

    /// Ship ids keyed by name
    pub fn ship_ids_by_name(&self) -> Result<HashMap<String, i64>> {
        let mut stmt = self.tx.prepare("SELECT name, ship_id FROM Ship")?;
        let ships = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<HashMap<String, i64>>>()?;
        Ok(ships)
    }

    /// Upgrade prices keyed by id
    pub fn upgrade_costs(&self) -> Result<HashMap<i64, i64>> {
        let mut stmt = self.tx.prepare("SELECT upgrade_id, cost FROM Upgrade")?;
        let costs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<HashMap<i64, i64>>>()?;
        Ok(costs)
    }

    /// Delete rows that reference keys missing from `parent`, then the rows that
    /// referenced those, and so on down. Returns rows removed per table.
    pub fn prune_orphans(&self, parent: &TableSchema) -> Result<Vec<(&'static str, u64)>> {
        let mut pruned = Vec::new();
        let mut pending = vec![parent.name];

        while let Some(table) = pending.pop() {
            for child in child_tables(table) {
                let mut removed = 0;
                for fk in child.foreign_keys.iter().filter(|fk| fk.references_table == table) {
                    removed += self.tx.execute(
                        &format!(
                            "DELETE FROM {child} WHERE {col} NOT IN (SELECT {ref_col} FROM {parent})",
                            child = child.name,
                            col = fk.column,
                            ref_col = fk.references_column,
                            parent = table,
                        ),
                        [],
                    )? as u64;
                }
                if removed > 0 {
                    debug!(table = child.name, parent = table, removed, "Pruned orphaned rows");
                    pruned.push((child.name, removed));
                    pending.push(child.name);
                }
            }
        }

        Ok(pruned)
    }

    /// Upsert one listing, keeping whichever side is newer. On an equal timestamp
    /// only `from_live` can change, and only from the base feed back to 0.
    /// Returns the number of rows changed (0 or 1).
    pub fn merge_listing(&self, values: &[SqlValue], modified: &str, from_live: bool) -> Result<u64> {
        let mut stmt = self.tx.prepare_cached(
            "INSERT INTO StationItem (
                 station_id, item_id, demand_price, demand_units, demand_level,
                 supply_price, supply_units, supply_level, modified, from_live)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (station_id, item_id) DO UPDATE SET
                 demand_price = CASE WHEN excluded.modified > StationItem.modified
                     THEN excluded.demand_price ELSE StationItem.demand_price END,
                 demand_units = CASE WHEN excluded.modified > StationItem.modified
                     THEN excluded.demand_units ELSE StationItem.demand_units END,
                 demand_level = CASE WHEN excluded.modified > StationItem.modified
                     THEN excluded.demand_level ELSE StationItem.demand_level END,
                 supply_price = CASE WHEN excluded.modified > StationItem.modified
                     THEN excluded.supply_price ELSE StationItem.supply_price END,
                 supply_units = CASE WHEN excluded.modified > StationItem.modified
                     THEN excluded.supply_units ELSE StationItem.supply_units END,
                 supply_level = CASE WHEN excluded.modified > StationItem.modified
                     THEN excluded.supply_level ELSE StationItem.supply_level END,
                 modified = CASE WHEN excluded.modified > StationItem.modified
                     THEN excluded.modified ELSE StationItem.modified END,
                 from_live = CASE WHEN excluded.modified > StationItem.modified
                     THEN excluded.from_live ELSE 0 END
             WHERE excluded.modified > StationItem.modified
                OR (excluded.modified = StationItem.modified
                    AND excluded.from_live = 0 AND StationItem.from_live = 1)",
        )?;
        for (idx, value) in values.iter().enumerate() {
            value.bind_to(idx + 1, &mut stmt)?;
        }
        stmt.raw_bind_parameter(values.len() + 1, modified)?;
        stmt.raw_bind_parameter(values.len() + 2, from_live as i64)?;
        Ok(stmt.raw_execute()? as u64)
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> Result<()> {
        self.tx.rollback()?;
        Ok(())
    }
}

/// Insert a batch of rows into the database
fn insert_batch<R: TableRow>(tx: &Transaction, sql: &str, batch: &[R]) -> Result<()> {
    let mut stmt = tx.prepare_cached(sql)?;

    for row in batch {
        for (idx, value) in row.values().iter().enumerate() {
            value.bind_to(idx + 1, &mut stmt)?;
        }
        stmt.raw_execute()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{CategoryRow, ItemRow, StationRow, SystemRow};
    use crate::schema::tables::{CATEGORY, ITEM, STATION, SYSTEM};

    fn system(id: i64) -> SystemRow {
        SystemRow {
            system_id: id,
            name: format!("System {}", id),
            pos_x: 0.0,
            pos_y: 0.0,
            pos_z: 0.0,
            modified: "2020-01-01 00:00:00".into(),
        }
    }

    fn station(id: i64, system_id: i64) -> StationRow {
        StationRow {
            station_id: id,
            name: format!("Station {}", id),
            system_id,
            ls_from_star: 0,
            blackmarket: "N",
            max_pad_size: "L".into(),
            market: "Y",
            shipyard: "N",
            modified: "2020-01-01 00:00:00".into(),
            outfitting: "N",
            rearm: "N",
            refuel: "N",
            repair: "N",
            planetary: "N",
        }
    }

    fn store() -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap().with_batch_size(2);
        store.create_schema().unwrap();
        store
    }

    #[test]
    fn test_initialized_after_create() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.is_initialized().unwrap());
        store.create_schema().unwrap();
        assert!(store.is_initialized().unwrap());
    }

    #[test]
    fn test_insert_rows_reports_batches() {
        let mut store = store();
        let tx = store.begin().unwrap();
        let mut seen = Vec::new();
        let rows: Vec<SystemRow> = (1..=5).map(system).collect();
        assert_eq!(tx.insert_rows(&SYSTEM, &rows, |n| seen.push(n)).unwrap(), 5);
        tx.commit().unwrap();

        assert_eq!(seen, vec![2, 4, 5]);
        assert_eq!(store.count("System").unwrap(), 5);
    }

    #[test]
    fn test_uncommitted_tx_rolls_back() {
        let mut store = store();
        {
            let tx = store.begin().unwrap();
            tx.insert_rows(&SYSTEM, &[system(1)], |_| {}).unwrap();
        }
        assert_eq!(store.count("System").unwrap(), 0);
    }

    #[test]
    fn test_prune_orphans_after_parent_reload() {
        let mut store = store();
        let tx = store.begin().unwrap();
        tx.insert_rows(&SYSTEM, &[system(1), system(2)], |_| {}).unwrap();
        tx.insert_rows(&STATION, &[station(10, 1), station(20, 2)], |_| {}).unwrap();
        tx.commit().unwrap();

        let tx = store.begin().unwrap();
        tx.defer_foreign_keys().unwrap();
        tx.delete_all(&SYSTEM).unwrap();
        tx.insert_rows(&SYSTEM, &[system(1)], |_| {}).unwrap();
        let pruned = tx.prune_orphans(&SYSTEM).unwrap();
        tx.commit().unwrap();

        assert_eq!(pruned, vec![("Station", 1)]);
        assert_eq!(store.count("Station").unwrap(), 1);
        assert_eq!(store.dangling_references().unwrap(), 0);
    }

    #[test]
    fn test_reset_empties_everything() {
        let mut store = store();
        let tx = store.begin().unwrap();
        tx.insert_rows(&SYSTEM, &[system(1)], |_| {}).unwrap();
        tx.commit().unwrap();

        store.reset().unwrap();
        assert!(store.is_initialized().unwrap());
        assert_eq!(store.count("System").unwrap(), 0);
    }

    fn listing(station: i64, item: i64, price: i64) -> Vec<SqlValue> {
        [station, item, price - 10, 0, -1, price, 100, 2]
            .into_iter()
            .map(SqlValue::from)
            .collect()
    }

    fn stored_listing(store: &SqliteStore) -> (i64, String, i64) {
        store
            .conn()
            .query_row(
                "SELECT supply_price, modified, from_live FROM StationItem",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap()
    }

    #[test]
    fn test_merge_listing_equal_timestamp_only_clears_live_flag() {
        let mut store = store();
        let tx = store.begin().unwrap();
        tx.insert_rows(&SYSTEM, &[system(1)], |_| {}).unwrap();
        tx.insert_rows(&STATION, &[station(5, 1)], |_| {}).unwrap();
        let category = CategoryRow {
            category_id: 1,
            name: "Foods".into(),
        };
        tx.insert_rows(&CATEGORY, &[category], |_| {}).unwrap();
        let tea = ItemRow {
            item_id: 9,
            name: "Tea".into(),
            category_id: 1,
            ui_order: 1,
            avg_price: None,
            fdev_id: None,
        };
        tx.insert_rows(&ITEM, &[tea], |_| {}).unwrap();

        let t2 = "2020-01-01 00:00:02";
        let t3 = "2020-01-01 00:00:03";
        assert_eq!(tx.merge_listing(&listing(5, 9, 1500), t2, false).unwrap(), 1);
        assert_eq!(tx.merge_listing(&listing(5, 9, 1600), t3, true).unwrap(), 1);
        // Same time from the base feed: prices stay, the row is no longer live
        assert_eq!(tx.merge_listing(&listing(5, 9, 1650), t3, false).unwrap(), 1);
        // Nothing left to change at that time
        assert_eq!(tx.merge_listing(&listing(5, 9, 1700), t3, false).unwrap(), 0);
        assert_eq!(tx.merge_listing(&listing(5, 9, 1700), t3, true).unwrap(), 0);
        assert_eq!(tx.merge_listing(&listing(5, 9, 1400), t2, false).unwrap(), 0);
        tx.commit().unwrap();

        assert_eq!(stored_listing(&store), (1600, t3.to_string(), 0));
    }
}
