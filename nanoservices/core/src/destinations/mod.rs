pub mod loader;
pub mod postgres;
pub mod sqlite;
pub mod table;
pub mod traits;
pub mod warehouse;

pub use loader::{full_refresh, FullRefreshLoader, LoadRun, LoadState};
pub use postgres::PostgresWarehouse;
pub use sqlite::SqliteWarehouse;
pub use table::{Column, ColumnType, Dialect, TableRef, SNAPSHOT_COLUMNS};
pub use traits::Destination;
pub use warehouse::{Warehouse, WarehouseSession};
