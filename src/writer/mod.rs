pub mod export;
pub mod regen;
pub mod schema_gen;
pub mod sqlite;

pub use export::{export_prices, export_table, PRICES_FILE};
pub use regen::*;
pub use sqlite::{SqliteStore, StoreTx};
