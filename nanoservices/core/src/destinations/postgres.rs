use std::fmt;

use async_trait::async_trait;
use snapflow_utils::error::{LoadError, LoadStep};
use snapflow_utils::Record;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Statement};

use super::table::{Column, Dialect, TableRef, SNAPSHOT_COLUMNS};
use super::warehouse::{Warehouse, WarehouseSession};

/// Postgres-protocol warehouse (Postgres, Redshift).
///
/// Each load opens its own connection from `dsn` and closes it when the
/// session is dropped; the server discards any transaction left open.
#[derive(Clone)]
pub struct PostgresWarehouse {
    dsn: String,
}

impl PostgresWarehouse {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self { dsn: dsn.into() }
    }
}

// The DSN usually carries a password.
impl fmt::Debug for PostgresWarehouse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresWarehouse").field("dsn", &"<redacted>").finish()
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn connect(&self) -> Result<Box<dyn WarehouseSession>, LoadError> {
        let (client, connection) = tokio_postgres::connect(&self.dsn, NoTls)
            .await
            .map_err(LoadError::postgres(LoadStep::Connect))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "warehouse connection closed with error");
            }
        });

        Ok(Box::new(PostgresSession { client, driver, insert: None }))
    }
}

struct PostgresSession {
    client: Client,
    driver: JoinHandle<()>,
    insert: Option<Statement>,
}

impl PostgresSession {
    async fn exec(&self, sql: &str, step: LoadStep) -> Result<(), LoadError> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(LoadError::postgres(step))
    }
}

#[async_trait]
impl WarehouseSession for PostgresSession {
    async fn begin(&mut self) -> Result<(), LoadError> {
        self.exec("BEGIN", LoadStep::Begin).await
    }

    async fn drop_table(&mut self, target: &TableRef) -> Result<(), LoadError> {
        self.exec(&target.drop_sql(), LoadStep::DropTable).await
    }

    async fn create_table(&mut self, target: &TableRef, columns: &[Column]) -> Result<(), LoadError> {
        self.exec(&target.create_sql(columns, Dialect::Postgres), LoadStep::CreateTable)
            .await
    }

    async fn insert(&mut self, target: &TableRef, record: &Record) -> Result<(), LoadError> {
        let stmt = match &self.insert {
            Some(stmt) => stmt.clone(),
            None => {
                let stmt = self
                    .client
                    .prepare(&target.insert_sql(&SNAPSHOT_COLUMNS, Dialect::Postgres))
                    .await
                    .map_err(LoadError::postgres(LoadStep::Insert))?;
                self.insert = Some(stmt.clone());
                stmt
            }
        };

        self.client
            .execute(&stmt, &[&record.country, &record.population, &record.area])
            .await
            .map_err(LoadError::postgres(LoadStep::Insert))?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), LoadError> {
        self.exec("COMMIT", LoadStep::Commit).await
    }

    async fn rollback(&mut self) -> Result<(), LoadError> {
        self.exec("ROLLBACK", LoadStep::Rollback).await
    }
}

impl Drop for PostgresSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
