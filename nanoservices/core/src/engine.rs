use std::collections::HashMap;
use std::future::Future;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use snapflow_utils::SnapflowResult;
use tokio::sync::{watch, Mutex};

use crate::events::bus::{EventBus, ManualTrigger};
use crate::events::timer::spawn_trigger;
use crate::events::trigger::Trigger;
use crate::metrics;
use crate::scheduler::runner::{self, PipelineDef};
use crate::scheduler::state::RunState;
use crate::store::db::Store;

/// Top-level orchestrator. Register pipelines, then call [`Snapflow::run`].
#[derive(Default)]
pub struct Snapflow {
    pipelines: Vec<(Trigger, PipelineDef)>,
    db_path: Option<PathBuf>,
    metrics_addr: Option<String>,
    bus: EventBus,
}

impl Snapflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the path for the run history database. Defaults to in-memory.
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Serve Prometheus metrics on `addr` while running.
    pub fn metrics_addr(mut self, addr: impl Into<String>) -> Self {
        self.metrics_addr = Some(addr.into());
        self
    }

    /// Add a pipeline (trigger + definition).
    pub fn add_pipeline(mut self, trigger: Trigger, def: PipelineDef) -> Self {
        self.pipelines.push((trigger, def));
        self
    }

    /// Handle for starting runs by hand once [`Snapflow::run`] is going.
    pub fn manual_trigger(&self) -> ManualTrigger {
        self.bus.manual_trigger()
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> SnapflowResult<()> {
        self.run_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Run until `shutdown` resolves, then wait for runs already in flight.
    pub async fn run_with_shutdown<F: Future>(self, shutdown: F) -> SnapflowResult<()> {
        let store = open_store(self.db_path.as_deref())?;
        let crashed = store.mark_inflight_as_crashed()?;
        if crashed > 0 {
            tracing::warn!(count = crashed, "marked in-flight runs as crashed from previous session");
        }
        let store = Arc::new(Mutex::new(store));

        let exporter = match &self.metrics_addr {
            Some(addr) => Some(metrics::start_exporter(TcpListener::bind(addr)?)),
            None => None,
        };

        let (event_tx, event_rx) = self.bus.split();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut trigger_handles = Vec::new();
        let mut pipeline_defs = HashMap::new();
        for (trigger, def) in self.pipelines {
            let name = def.name.clone();
            if pipeline_defs.contains_key(&name) {
                tracing::warn!(pipeline = %name, "duplicate pipeline name, keeping the first");
                continue;
            }
            tracing::info!(pipeline = %name, trigger = %trigger, "pipeline registered");
            match spawn_trigger(name.clone(), trigger, event_tx.clone()) {
                Some(handle) => trigger_handles.push(handle),
                None => tracing::info!(pipeline = %name, "manual trigger, not scheduled"),
            }
            pipeline_defs.insert(name, Arc::new(def));
        }
        drop(event_tx);

        let scheduler = tokio::spawn(runner::run_scheduler(event_rx, pipeline_defs, store, shutdown_rx));

        shutdown.await;
        let _ = shutdown_tx.send(true);
        for handle in trigger_handles {
            handle.abort();
        }
        let _ = scheduler.await;

        if let Some((handle, stop)) = exporter {
            let _ = stop.send(());
            let _ = handle.await;
        }

        tracing::info!("snapflow shutdown complete");
        Ok(())
    }
}

/// Run `def` once now, retries included, and return how the run ended.
///
/// Does not mark earlier runs as crashed, so it is safe to use next to a
/// running daemon sharing the same history database.
pub async fn run_once(def: &PipelineDef, db_path: Option<&Path>) -> SnapflowResult<RunState> {
    let store = Mutex::new(open_store(db_path)?);
    Ok(runner::execute_run(def, &Trigger::Manual, &store).await)
}

fn open_store(path: Option<&Path>) -> SnapflowResult<Store> {
    let store = match path {
        Some(path) => Store::open(path)?,
        None => Store::in_memory()?,
    };
    Ok(store)
}
