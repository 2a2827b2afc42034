//! Transactional full-refresh of a single table.
//!
//! A load runs `BEGIN; DROP TABLE IF EXISTS; CREATE TABLE; INSERT ...; COMMIT`
//! inside one transaction. Any failure after `BEGIN` rolls the whole
//! transaction back before the error is returned, so readers only ever see
//! the previous table or the complete new one.

use std::fmt;

use async_trait::async_trait;
use snapflow_utils::error::LoadError;
use snapflow_utils::Snapshot;

use super::table::{TableRef, SNAPSHOT_COLUMNS};
use super::traits::Destination;
use super::warehouse::{Warehouse, WarehouseSession};

/// Progress of one load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    TransactionOpen,
    TableDropped,
    TableCreated,
    RowsInserted,
    Committed,
    RolledBack,
}

impl LoadState {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadState::Idle => "idle",
            LoadState::TransactionOpen => "transaction_open",
            LoadState::TableDropped => "table_dropped",
            LoadState::TableCreated => "table_created",
            LoadState::RowsInserted => "rows_inserted",
            LoadState::Committed => "committed",
            LoadState::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LoadState::Committed | LoadState::RolledBack)
    }

    fn can_advance_to(self, next: LoadState) -> bool {
        use LoadState::*;
        match (self, next) {
            (Idle, TransactionOpen)
            | (TransactionOpen, TableDropped)
            | (TableDropped, TableCreated)
            | (TableCreated, RowsInserted)
            | (RowsInserted, Committed) => true,
            (from, RolledBack) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state history of one load.
#[derive(Debug, Clone)]
pub struct LoadRun {
    history: Vec<LoadState>,
}

impl LoadRun {
    pub fn new() -> Self {
        Self { history: vec![LoadState::Idle] }
    }

    pub fn state(&self) -> LoadState {
        self.history.last().copied().unwrap_or(LoadState::Idle)
    }

    pub fn history(&self) -> &[LoadState] {
        &self.history
    }

    pub fn transition(&mut self, next: LoadState) -> Result<(), LoadError> {
        let from = self.state();
        if !from.can_advance_to(next) {
            return Err(LoadError::IllegalTransition { from: from.as_str(), to: next.as_str() });
        }
        tracing::trace!(from = %from, to = %next, "load state");
        self.history.push(next);
        Ok(())
    }

    fn roll_back(&mut self) {
        if !self.state().is_terminal() {
            self.history.push(LoadState::RolledBack);
        }
    }
}

impl Default for LoadRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace `target` with `snapshot` inside one transaction on `session`.
///
/// On error the transaction has been rolled back and `run` ends in
/// [`LoadState::RolledBack`]. If the rollback itself fails the returned error
/// is [`LoadError::RollbackFailed`] carrying both causes.
pub async fn full_refresh(
    session: &mut dyn WarehouseSession,
    target: &TableRef,
    snapshot: &Snapshot,
    run: &mut LoadRun,
) -> Result<u64, LoadError> {
    if run.state() != LoadState::Idle {
        return Err(LoadError::IllegalTransition {
            from: run.state().as_str(),
            to: LoadState::TransactionOpen.as_str(),
        });
    }
    if let Err(e) = session.begin().await {
        run.roll_back();
        return Err(e);
    }
    run.transition(LoadState::TransactionOpen)?;

    match replace_rows(session, target, snapshot, run).await {
        Ok(rows) => Ok(rows),
        Err(cause) => {
            let rollback = session.rollback().await;
            run.roll_back();
            match rollback {
                Ok(()) => Err(cause),
                Err(rollback) => Err(LoadError::RollbackFailed {
                    cause: Box::new(cause),
                    rollback: Box::new(rollback),
                }),
            }
        }
    }
}

async fn replace_rows(
    session: &mut dyn WarehouseSession,
    target: &TableRef,
    snapshot: &Snapshot,
    run: &mut LoadRun,
) -> Result<u64, LoadError> {
    session.drop_table(target).await?;
    run.transition(LoadState::TableDropped)?;

    session.create_table(target, &SNAPSHOT_COLUMNS).await?;
    run.transition(LoadState::TableCreated)?;

    let mut rows = 0u64;
    for record in snapshot {
        session.insert(target, record).await?;
        rows += 1;
    }
    run.transition(LoadState::RowsInserted)?;

    session.commit().await?;
    run.transition(LoadState::Committed)?;
    Ok(rows)
}

/// [`Destination`] that full-refreshes one warehouse table per load.
pub struct FullRefreshLoader<W> {
    name: String,
    warehouse: W,
    target: TableRef,
}

impl<W: Warehouse> FullRefreshLoader<W> {
    pub fn new(warehouse: W, target: TableRef) -> Self {
        Self { name: "load".to_string(), warehouse, target }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn target(&self) -> &TableRef {
        &self.target
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    /// Like [`Destination::load`] but records the state history in `run`.
    pub async fn load_tracked(&self, snapshot: &Snapshot, run: &mut LoadRun) -> Result<u64, LoadError> {
        let mut session = match self.warehouse.connect().await {
            Ok(session) => session,
            Err(e) => {
                run.roll_back();
                return Err(e);
            }
        };

        let result = full_refresh(session.as_mut(), &self.target, snapshot, run).await;
        // Release the connection before reporting, on every path.
        drop(session);
        result
    }
}

#[async_trait]
impl<W: Warehouse> Destination for FullRefreshLoader<W> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, snapshot: &Snapshot) -> Result<u64, LoadError> {
        let mut run = LoadRun::new();
        match self.load_tracked(snapshot, &mut run).await {
            Ok(rows) => {
                tracing::info!(
                    warehouse = self.warehouse.kind(),
                    table = %self.target,
                    rows,
                    "table replaced"
                );
                Ok(rows)
            }
            Err(e) => {
                tracing::error!(
                    warehouse = self.warehouse.kind(),
                    table = %self.target,
                    state = %run.state(),
                    error = %e,
                    "load rolled back"
                );
                Err(e)
            }
        }
    }
}
