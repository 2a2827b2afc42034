use async_trait::async_trait;
use snapflow_utils::error::LoadError;
use snapflow_utils::Record;

use super::table::{Column, TableRef};

/// A SQL warehouse the loader can open sessions against.
///
/// One session is opened per load and dropped when the load returns, on
/// success and failure alike.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Backend name for logging, e.g. `sqlite`.
    fn kind(&self) -> &'static str;

    async fn connect(&self) -> Result<Box<dyn WarehouseSession>, LoadError>;
}

/// One warehouse connection with explicit transaction control.
///
/// Dropping a session with an open transaction must not commit it.
#[async_trait]
pub trait WarehouseSession: Send {
    async fn begin(&mut self) -> Result<(), LoadError>;

    async fn drop_table(&mut self, target: &TableRef) -> Result<(), LoadError>;

    async fn create_table(&mut self, target: &TableRef, columns: &[Column]) -> Result<(), LoadError>;

    /// Insert one row using bound parameters.
    async fn insert(&mut self, target: &TableRef, record: &Record) -> Result<(), LoadError>;

    async fn commit(&mut self) -> Result<(), LoadError>;

    async fn rollback(&mut self) -> Result<(), LoadError>;
}
