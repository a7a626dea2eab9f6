use crate::schema::TableSchema;

/// Generate CREATE TABLE SQL for a table schema
pub fn generate_create_table(schema: &TableSchema) -> String {
    let mut sql = format!("CREATE TABLE IF NOT EXISTS {} (\n", schema.name);
    let mut columns = Vec::new();

    for col in schema.columns {
        let null_constraint = if !col.nullable { " NOT NULL" } else { "" };
        let default = col
            .default
            .map(|expr| format!(" DEFAULT {}", expr))
            .unwrap_or_default();

        columns.push(format!(
            "    {} {}{}{}",
            col.name,
            col.col_type.sql(),
            null_constraint,
            default
        ));
    }

    columns.push(format!("    PRIMARY KEY ({})", schema.primary_key.join(", ")));

    for fk in schema.foreign_keys {
        columns.push(format!(
            "    FOREIGN KEY ({}) REFERENCES {}({})",
            fk.column, fk.references_table, fk.references_column
        ));
    }

    sql.push_str(&columns.join(",\n"));
    sql.push_str("\n)");

    sql
}

/// Generate CREATE INDEX statements for a table's declared indexes
pub fn generate_indexes(schema: &TableSchema) -> Vec<String> {
    schema
        .indexes
        .iter()
        .map(|index| {
            format!(
                "CREATE {}INDEX IF NOT EXISTS idx_{}_{} ON {}({})",
                if index.unique { "UNIQUE " } else { "" },
                schema.name,
                index.columns.join("_"),
                schema.name,
                index.columns.join(", ")
            )
        })
        .collect()
}

/// `INSERT INTO t (a, b) VALUES (?, ?)` over every column of the table
pub fn generate_insert(schema: &TableSchema) -> String {
    let columns = schema.column_names();
    let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        schema.name,
        columns.join(", "),
        placeholders.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tables::{SHIP_VENDOR, STATION, STATION_ITEM};

    #[test]
    fn test_generate_create_table() {
        let sql = generate_create_table(&STATION);
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS Station"));
        assert!(sql.contains("station_id INTEGER NOT NULL"));
        assert!(sql.contains("blackmarket TEXT NOT NULL DEFAULT '?'"));
        assert!(sql.contains("PRIMARY KEY (station_id)"));
        assert!(sql.contains("FOREIGN KEY (system_id) REFERENCES System(system_id)"));
    }

    #[test]
    fn test_composite_primary_key() {
        let sql = generate_create_table(&SHIP_VENDOR);
        assert!(sql.contains("PRIMARY KEY (ship_id, station_id)"));
    }

    #[test]
    fn test_generate_indexes() {
        let indexes = generate_indexes(&STATION_ITEM);
        assert_eq!(
            indexes,
            vec!["CREATE INDEX IF NOT EXISTS idx_StationItem_item_id ON StationItem(item_id)"]
        );
    }

    #[test]
    fn test_generate_insert() {
        assert_eq!(
            generate_insert(&SHIP_VENDOR),
            "INSERT INTO ShipVendor (ship_id, station_id, modified) VALUES (?, ?, ?)"
        );
    }
}
