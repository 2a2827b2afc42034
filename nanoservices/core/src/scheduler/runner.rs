use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinError, JoinSet};
use uuid::Uuid;

use crate::events::trigger::{Trigger, TriggerEvent};
use crate::metrics;
use crate::pipeline::Pipeline;
use crate::scheduler::retry::RetryPolicy;
use crate::scheduler::state::{RunState, RunStatus};
use crate::store::db::{CompletedRun, Store};

/// A registered pipeline and the retry policy the scheduler applies to it.
pub struct PipelineDef {
    pub name: String,
    pub pipeline: Pipeline,
    pub retry: RetryPolicy,
}

// `Pipeline` holds trait objects, so Debug cannot be derived.
impl std::fmt::Debug for PipelineDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineDef")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Execute one run of `def`: attempt it, retrying after the policy's delay
/// until it succeeds or the attempts are used up.
///
/// Every attempt and stage is written to `store`. Failing to write history
/// is logged and never fails the run.
pub async fn execute_run(def: &PipelineDef, trigger: &Trigger, store: &Mutex<Store>) -> RunState {
    run_attempts(Uuid::new_v4().to_string(), def, trigger, store, None).await
}

/// Attempts of one run. When `shutdown` fires, a pending retry is dropped
/// and the run ends as failed; an attempt already under way always finishes.
async fn run_attempts(
    run_id: String,
    def: &PipelineDef,
    trigger: &Trigger,
    store: &Mutex<Store>,
    mut shutdown: Option<watch::Receiver<bool>>,
) -> RunState {
    let mut state = RunState::new(
        run_id.clone(),
        def.name.clone(),
        trigger.kind().to_string(),
        &def.retry,
    );

    persist(store, |s| s.insert_pipeline_run(&run_id, &def.name, trigger.kind(), &now())).await;
    metrics::inc_run(&def.name);
    tracing::info!(run = %run_id, pipeline = %def.name, trigger = %trigger, "pipeline run started");

    loop {
        let attempt = state.start_attempt();
        persist(store, |s| s.start_attempt(&run_id, attempt)).await;

        let mut trace = Vec::new();
        let result = def.pipeline.run_traced(&mut trace).await;

        let finished_at = now();
        for outcome in &trace {
            persist(store, |s| {
                s.insert_stage_run(
                    &run_id,
                    attempt,
                    outcome.stage.as_str(),
                    outcome.error.as_deref(),
                    &finished_at,
                    outcome.duration.as_millis() as i64,
                )
            })
            .await;
        }

        if state.finish_attempt(&trace, result.map_err(|e| e.to_string())) != RunStatus::Retrying {
            break;
        }

        metrics::inc_retry(&def.name);
        tracing::warn!(
            run = %run_id,
            pipeline = %def.name,
            attempt,
            error = state.last_error.as_deref().unwrap_or_default(),
            delay_secs = def.retry.delay.as_secs(),
            "attempt failed, retrying"
        );
        let interrupted = match shutdown.as_mut() {
            Some(rx) => tokio::select! {
                _ = tokio::time::sleep(def.retry.delay) => false,
                _ = rx.changed() => true,
            },
            None => {
                tokio::time::sleep(def.retry.delay).await;
                false
            }
        };
        if interrupted {
            tracing::warn!(run = %run_id, pipeline = %def.name, "shutting down, retry abandoned");
            state.stop_retrying();
            break;
        }
    }

    let duration = state.started_at.elapsed().as_millis() as i64;
    persist(store, |s| {
        s.complete_pipeline_run(&CompletedRun {
            id: &run_id,
            status: state.status.as_str(),
            rows: state.rows.map(|r| r as i64),
            error: state.last_error.as_deref(),
            finished_at: &now(),
            duration_ms: duration,
        })
    })
    .await;

    metrics::observe_duration(&def.name, duration as f64);
    match state.status {
        RunStatus::Completed => metrics::add_rows(&def.name, state.rows.unwrap_or_default()),
        _ => metrics::inc_failure(&def.name),
    }

    state
}

/// What the scheduler learns when a spawned run ends, panics included.
struct Finished {
    pipeline: String,
    run_id: String,
    started: Instant,
    result: Result<RunState, JoinError>,
}

/// The scheduler loop. Receives trigger events and runs pipelines, at most
/// one run per pipeline at a time.
///
/// A trigger that arrives while its pipeline is still running (including
/// while waiting to retry) is dropped. On shutdown no new runs start and the
/// loop returns once every run in flight has ended.
pub async fn run_scheduler(
    mut event_rx: mpsc::Receiver<TriggerEvent>,
    pipelines: HashMap<String, Arc<PipelineDef>>,
    store: Arc<Mutex<Store>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut runs: JoinSet<Finished> = JoinSet::new();
    let mut active: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                let Some(def) = pipelines.get(&event.pipeline) else {
                    tracing::warn!(pipeline = %event.pipeline, "received trigger for unknown pipeline");
                    continue;
                };

                if !active.insert(event.pipeline.clone()) {
                    tracing::warn!(
                        pipeline = %event.pipeline,
                        fired_at = %event.fired_at,
                        "previous run still in flight, skipping trigger"
                    );
                    metrics::inc_skipped(&event.pipeline);
                    continue;
                }

                let TriggerEvent { pipeline, trigger, .. } = event;
                let run_id = Uuid::new_v4().to_string();
                let run = {
                    let (def, store, run_id) = (def.clone(), store.clone(), run_id.clone());
                    let shutdown = shutdown_rx.clone();
                    tokio::spawn(async move {
                        run_attempts(run_id, &def, &trigger, &store, Some(shutdown)).await
                    })
                };
                let started = Instant::now();
                runs.spawn(async move { Finished { pipeline, run_id, started, result: run.await } });
            }

            Some(joined) = runs.join_next() => settle(joined, &mut active, &store).await,

            _ = shutdown_rx.changed() => break,
        }
    }

    if !runs.is_empty() {
        tracing::info!(in_flight = runs.len(), "waiting for runs in flight");
    }
    while let Some(joined) = runs.join_next().await {
        settle(joined, &mut active, &store).await;
    }
    tracing::info!("scheduler shut down");
}

async fn settle(joined: Result<Finished, JoinError>, active: &mut HashSet<String>, store: &Mutex<Store>) {
    let finished = match joined {
        Ok(finished) => finished,
        Err(e) => {
            tracing::error!(error = %e, "run supervisor task failed");
            return;
        }
    };
    active.remove(&finished.pipeline);
    let duration_ms = finished.started.elapsed().as_millis() as u64;

    match finished.result {
        Ok(state) => tracing::info!(
            run = %state.id,
            pipeline = %state.pipeline,
            status = state.status.as_str(),
            attempts = state.attempt,
            rows = state.rows,
            duration_ms,
            "pipeline run finished"
        ),
        Err(e) => {
            let error = abort_reason(e);
            tracing::error!(run = %finished.run_id, pipeline = %finished.pipeline, error = %error, "pipeline run aborted");
            persist(store, |s| {
                s.complete_pipeline_run(&CompletedRun {
                    id: &finished.run_id,
                    status: RunStatus::Failed.as_str(),
                    rows: None,
                    error: Some(error.as_str()),
                    finished_at: &now(),
                    duration_ms: duration_ms as i64,
                })
            })
            .await;
            metrics::observe_duration(&finished.pipeline, duration_ms as f64);
            metrics::inc_failure(&finished.pipeline);
        }
    }
}

fn abort_reason(err: JoinError) -> String {
    if err.is_cancelled() {
        return "run was cancelled".to_string();
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("run panicked: {message}")
}

async fn persist<T, F>(store: &Mutex<Store>, f: F)
where
    F: FnOnce(&Store) -> Result<T, rusqlite::Error>,
{
    let store = store.lock().await;
    if let Err(e) = f(&store) {
        tracing::warn!(error = %e, "failed to record run history");
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destinations::Destination;
    use crate::sources::Source;
    use crate::transforms::CountryProjection;
    use serde_json::json;
    use snapflow_utils::error::{ExtractionError, LoadError};
    use snapflow_utils::{RawDocument, Snapshot};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` extractions, then serves one country.
    struct FlakySource {
        calls: AtomicU32,
        failures: u32,
    }

    #[async_trait::async_trait]
    impl Source for FlakySource {
        fn name(&self) -> &str { "flaky" }
        async fn extract(&self) -> Result<RawDocument, ExtractionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(ExtractionError::Status { url: "http://source/all".into(), status: 502 });
            }
            Ok(json!([{"name": {"official": "Testland"}, "population": 100, "area": 50.5}]))
        }
    }

    struct NullDestination;

    #[async_trait::async_trait]
    impl Destination for NullDestination {
        fn name(&self) -> &str { "null" }
        async fn load(&self, snapshot: &Snapshot) -> Result<u64, LoadError> {
            Ok(snapshot.len() as u64)
        }
    }

    fn def(failures: u32, retries: u32) -> (PipelineDef, Arc<FlakySource>) {
        let source = Arc::new(FlakySource { calls: AtomicU32::new(0), failures });
        let pipeline = Pipeline::new(
            "test",
            source.clone(),
            Arc::new(CountryProjection::new()),
            Arc::new(NullDestination),
        );
        let retry = RetryPolicy::new(retries, Duration::from_millis(10));
        (PipelineDef { name: "test".to_string(), pipeline, retry }, source)
    }

    #[tokio::test]
    async fn failed_attempt_is_retried_once() {
        let (def, source) = def(1, 1);
        let store = Mutex::new(Store::in_memory().unwrap());

        let state = execute_run(&def, &Trigger::Manual, &store).await;

        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.attempt, 2);
        assert_eq!(state.rows, Some(1));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        let store = store.lock().await;
        let runs = store.recent_runs(10).unwrap();
        assert_eq!(runs[0].status, "completed");
        assert_eq!(runs[0].attempts, 2);
        let stages = store.stage_runs_for(&state.id).unwrap();
        let summary: Vec<(u32, &str, &str)> = stages
            .iter()
            .map(|s| (s.attempt, s.stage.as_str(), s.status.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (1, "extract", "failed"),
                (2, "extract", "completed"),
                (2, "transform", "completed"),
                (2, "load", "completed"),
            ]
        );
    }

    #[tokio::test]
    async fn run_fails_after_retries_are_exhausted() {
        let (def, source) = def(5, 1);
        let store = Mutex::new(Store::in_memory().unwrap());

        let state = execute_run(&def, &Trigger::Manual, &store).await;

        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(state.last_error.unwrap().contains("HTTP 502"));
        let store = store.lock().await;
        assert_eq!(store.recent_runs(1).unwrap()[0].status, "failed");
    }

    #[tokio::test]
    async fn scheduler_runs_triggered_pipeline() {
        let (def, source) = def(0, 0);
        let mut pipelines = HashMap::new();
        pipelines.insert("test".to_string(), Arc::new(def));

        let store = Arc::new(Mutex::new(Store::in_memory().unwrap()));
        let (event_tx, event_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_scheduler(event_rx, pipelines, store.clone(), shutdown_rx));

        event_tx.send(TriggerEvent::manual("test")).await.unwrap();
        event_tx.send(TriggerEvent::manual("unknown")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        {
            let store = store.lock().await;
            let runs = store.recent_runs(10).unwrap();
            assert_eq!(runs.len(), 1);
            assert_eq!(runs[0].status, "completed");
            assert_eq!(runs[0].rows_loaded, Some(1));
        }

        shutdown_tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn overlapping_trigger_is_skipped() {
        // first attempt fails, so the run sits in its retry delay
        let (mut def, source) = def(1, 1);
        def.retry.delay = Duration::from_millis(300);
        let mut pipelines = HashMap::new();
        pipelines.insert("test".to_string(), Arc::new(def));

        let store = Arc::new(Mutex::new(Store::in_memory().unwrap()));
        let (event_tx, event_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_scheduler(event_rx, pipelines, store.clone(), shutdown_rx));

        event_tx.send(TriggerEvent::manual("test")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        event_tx.send(TriggerEvent::manual("test")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        // one run, two attempts; the second trigger never started a run
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.lock().await.recent_runs(10).unwrap().len(), 1);

        shutdown_tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    /// Panics on its first call, then serves one country.
    struct PanickyOnce {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Source for PanickyOnce {
        fn name(&self) -> &str { "panicky" }
        async fn extract(&self) -> Result<RawDocument, ExtractionError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("source bug");
            }
            Ok(json!([{"name": {"official": "Testland"}, "population": 100, "area": 50.5}]))
        }
    }

    #[tokio::test]
    async fn panicked_run_is_failed_and_frees_the_pipeline() {
        let source = Arc::new(PanickyOnce { calls: AtomicU32::new(0) });
        let pipeline = Pipeline::new(
            "panicky",
            source.clone(),
            Arc::new(CountryProjection::new()),
            Arc::new(NullDestination),
        );
        let def = PipelineDef { name: "panicky".to_string(), pipeline, retry: RetryPolicy::none() };
        let mut pipelines = HashMap::new();
        pipelines.insert("panicky".to_string(), Arc::new(def));

        let store = Arc::new(Mutex::new(Store::in_memory().unwrap()));
        let (event_tx, event_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_scheduler(event_rx, pipelines, store.clone(), shutdown_rx));

        event_tx.send(TriggerEvent::manual("panicky")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        event_tx.send(TriggerEvent::manual("panicky")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        {
            let store = store.lock().await;
            let mut statuses: Vec<String> = store.recent_runs(10).unwrap().into_iter().map(|r| r.status).collect();
            statuses.sort();
            assert_eq!(statuses, vec!["completed", "failed"]);
            let failed = store.recent_runs(10).unwrap().into_iter().find(|r| r.status == "failed").unwrap();
            assert_eq!(failed.error.as_deref(), Some("run panicked: source bug"));
        }
        assert_eq!(metrics::counter_value("pipeline_failures_total", "panicky"), 1.0);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_cuts_retry_delay_and_waits_for_the_run() {
        let (mut def, source) = def(5, 1);
        def.retry.delay = Duration::from_secs(60);
        let mut pipelines = HashMap::new();
        pipelines.insert("test".to_string(), Arc::new(def));

        let store = Arc::new(Mutex::new(Store::in_memory().unwrap()));
        let (event_tx, event_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_scheduler(event_rx, pipelines, store.clone(), shutdown_rx));

        event_tx.send(TriggerEvent::manual("test")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        let runs = store.lock().await.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "failed");
        assert!(runs[0].error.as_deref().unwrap().contains("HTTP 502"));
    }
}
