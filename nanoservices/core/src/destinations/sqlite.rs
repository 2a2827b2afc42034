use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use snapflow_utils::error::{LoadError, LoadStep};
use snapflow_utils::Record;

use super::table::{self, Column, Dialect, TableRef, SNAPSHOT_COLUMNS};
use super::warehouse::{Warehouse, WarehouseSession};

/// SQLite-backed warehouse.
///
/// The database file is opened fresh for every load. Schemas map to SQLite
/// database names: `main` is the file itself, anything else must be added
/// with [`SqliteWarehouse::attach`].
#[derive(Debug, Clone)]
pub struct SqliteWarehouse {
    path: PathBuf,
    attachments: Vec<(String, PathBuf)>,
    busy_timeout: Duration,
}

impl SqliteWarehouse {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            attachments: Vec::new(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Attach another database file under `schema`.
    pub fn attach(mut self, schema: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let schema = table::validate(schema.into())?;
        self.attachments.push((schema, path.as_ref().to_path_buf()));
        Ok(self)
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection, LoadError> {
        let conn = Connection::open(&self.path).map_err(LoadError::sqlite(LoadStep::Connect))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(LoadError::sqlite(LoadStep::Connect))?;
        for (schema, path) in &self.attachments {
            conn.execute(
                &format!("ATTACH DATABASE ?1 AS \"{schema}\""),
                params![path.to_string_lossy().into_owned()],
            )
            .map_err(LoadError::sqlite(LoadStep::Connect))?;
        }
        Ok(conn)
    }

    /// Read back the rows of `target` in insertion order, or `None` if the
    /// table does not exist.
    pub fn fetch_rows(&self, target: &TableRef) -> Result<Option<Vec<Record>>, LoadError> {
        let conn = self.open()?;

        let exists: i64 = conn
            .query_row(
                &format!(
                    "SELECT count(*) FROM \"{}\".sqlite_master WHERE type = 'table' AND name = ?1",
                    target.schema()
                ),
                params![target.table()],
                |row| row.get(0),
            )
            .map_err(LoadError::sqlite(LoadStep::Connect))?;
        if exists == 0 {
            return Ok(None);
        }

        let mut stmt = conn
            .prepare(&format!(
                "SELECT country, population, area FROM {} ORDER BY rowid",
                target.qualified()
            ))
            .map_err(LoadError::sqlite(LoadStep::Connect))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Record {
                    country: row.get(0)?,
                    population: row.get(1)?,
                    area: row.get(2)?,
                })
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(LoadError::sqlite(LoadStep::Connect))?;
        Ok(Some(rows))
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    async fn connect(&self) -> Result<Box<dyn WarehouseSession>, LoadError> {
        let conn = self.open()?;
        Ok(Box::new(SqliteSession { conn, in_transaction: false }))
    }
}

struct SqliteSession {
    conn: Connection,
    in_transaction: bool,
}

impl SqliteSession {
    fn exec(&self, sql: &str, step: LoadStep) -> Result<(), LoadError> {
        self.conn.execute_batch(sql).map_err(LoadError::sqlite(step))
    }
}

#[async_trait]
impl WarehouseSession for SqliteSession {
    async fn begin(&mut self) -> Result<(), LoadError> {
        // IMMEDIATE takes the write lock now instead of at the first write.
        self.exec("BEGIN IMMEDIATE", LoadStep::Begin)?;
        self.in_transaction = true;
        Ok(())
    }

    async fn drop_table(&mut self, target: &TableRef) -> Result<(), LoadError> {
        self.exec(&target.drop_sql(), LoadStep::DropTable)
    }

    async fn create_table(&mut self, target: &TableRef, columns: &[Column]) -> Result<(), LoadError> {
        self.exec(&target.create_sql(columns, Dialect::Sqlite), LoadStep::CreateTable)
    }

    async fn insert(&mut self, target: &TableRef, record: &Record) -> Result<(), LoadError> {
        let sql = target.insert_sql(&SNAPSHOT_COLUMNS, Dialect::Sqlite);
        let mut stmt = self
            .conn
            .prepare_cached(&sql)
            .map_err(LoadError::sqlite(LoadStep::Insert))?;
        stmt.execute(params![record.country, record.population, record.area])
            .map_err(LoadError::sqlite(LoadStep::Insert))?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), LoadError> {
        self.exec("COMMIT", LoadStep::Commit)?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), LoadError> {
        // SQLITE_FULL, IOERR and NOMEM can end the transaction on their own.
        if !self.in_transaction || self.conn.is_autocommit() {
            self.in_transaction = false;
            return Ok(());
        }
        self.exec("ROLLBACK", LoadStep::Rollback)?;
        self.in_transaction = false;
        Ok(())
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if self.in_transaction && !self.conn.is_autocommit() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "rollback on session drop failed");
            }
        }
    }
}
