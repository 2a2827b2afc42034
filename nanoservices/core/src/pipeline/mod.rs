//! The linear extract → transform → load contract.

pub mod stage;

use std::sync::Arc;
use std::time::{Duration, Instant};

use snapflow_utils::SnapflowResult;

use crate::destinations::Destination;
use crate::sources::Source;
use crate::transforms::Transform;

pub use stage::{Stage, StageOutcome};

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub rows: u64,
    pub stages: Vec<StageOutcome>,
}

impl RunReport {
    pub fn duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }
}

/// One source, one transform, one destination, run strictly in sequence.
///
/// A pipeline holds no state between runs. It never retries: the first
/// error from any stage ends the run and is returned unchanged.
pub struct Pipeline {
    name: String,
    source: Arc<dyn Source>,
    transform: Arc<dyn Transform>,
    destination: Arc<dyn Destination>,
}

impl Pipeline {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn Source>,
        transform: Arc<dyn Transform>,
        destination: Arc<dyn Destination>,
    ) -> Self {
        Self { name: name.into(), source, transform, destination }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(&self) -> SnapflowResult<RunReport> {
        let mut stages = Vec::with_capacity(Stage::ALL.len());
        let rows = self.run_traced(&mut stages).await?;
        Ok(RunReport { rows, stages })
    }

    /// Run once, appending one [`StageOutcome`] per stage that was started.
    /// Stages after a failure are not started and get no outcome.
    pub async fn run_traced(&self, trace: &mut Vec<StageOutcome>) -> SnapflowResult<u64> {
        let start = Instant::now();
        let doc = self.source.extract().await;
        let doc = observe(trace, Stage::Extract, start, doc)?;
        tracing::debug!(pipeline = %self.name, source = self.source.name(), "extract finished");

        let start = Instant::now();
        let snapshot = self.transform.transform(&doc);
        let snapshot = observe(trace, Stage::Transform, start, snapshot)?;
        drop(doc);
        tracing::debug!(pipeline = %self.name, records = snapshot.len(), "transform finished");

        let start = Instant::now();
        let rows = self.destination.load(&snapshot).await;
        let rows = observe(trace, Stage::Load, start, rows)?;

        tracing::info!(pipeline = %self.name, rows, "pipeline run succeeded");
        Ok(rows)
    }
}

fn observe<T, E>(
    trace: &mut Vec<StageOutcome>,
    stage: Stage,
    start: Instant,
    result: Result<T, E>,
) -> SnapflowResult<T>
where
    E: Into<snapflow_utils::error::Error> + std::fmt::Display,
{
    let duration = start.elapsed();
    match result {
        Ok(value) => {
            trace.push(StageOutcome { stage, duration, error: None });
            Ok(value)
        }
        Err(e) => {
            tracing::warn!(stage = %stage, error = %e, "stage failed");
            trace.push(StageOutcome { stage, duration, error: Some(e.to_string()) });
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::CountryProjection;
    use async_trait::async_trait;
    use serde_json::json;
    use snapflow_utils::error::{Error, ExtractionError, LoadError};
    use snapflow_utils::{RawDocument, Record, Snapshot};
    use std::sync::Mutex;

    struct FixedSource(RawDocument);

    #[async_trait]
    impl Source for FixedSource {
        fn name(&self) -> &str { "fixed" }
        async fn extract(&self) -> Result<RawDocument, ExtractionError> {
            Ok(self.0.clone())
        }
    }

    struct DownSource;

    #[async_trait]
    impl Source for DownSource {
        fn name(&self) -> &str { "down" }
        async fn extract(&self) -> Result<RawDocument, ExtractionError> {
            Err(ExtractionError::Status { url: "http://source/all".into(), status: 503 })
        }
    }

    #[derive(Default)]
    struct MemoryDestination {
        loads: Mutex<Vec<Vec<Record>>>,
    }

    #[async_trait]
    impl Destination for MemoryDestination {
        fn name(&self) -> &str { "memory" }
        async fn load(&self, snapshot: &Snapshot) -> Result<u64, LoadError> {
            self.loads.lock().unwrap().push(snapshot.records().to_vec());
            Ok(snapshot.len() as u64)
        }
    }

    fn pipeline(source: Arc<dyn Source>, dest: Arc<MemoryDestination>) -> Pipeline {
        Pipeline::new("countries", source, Arc::new(CountryProjection::new()), dest)
    }

    #[tokio::test]
    async fn stages_feed_each_other_in_order() {
        let dest = Arc::new(MemoryDestination::default());
        let doc = json!([{"name": {"official": "Testland"}, "population": 100, "area": 50.5}]);
        let report = pipeline(Arc::new(FixedSource(doc)), dest.clone()).run().await.unwrap();

        assert_eq!(report.rows, 1);
        let stages: Vec<Stage> = report.stages.iter().map(|s| s.stage).collect();
        assert_eq!(stages, Stage::ALL.to_vec());
        assert_eq!(*dest.loads.lock().unwrap(), vec![vec![Record::new("Testland", 100, 50.5)]]);
    }

    #[tokio::test]
    async fn extraction_failure_skips_load() {
        let dest = Arc::new(MemoryDestination::default());
        let mut trace = Vec::new();
        let err = pipeline(Arc::new(DownSource), dest.clone())
            .run_traced(&mut trace)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Extraction(ExtractionError::Status { status: 503, .. })));
        assert_eq!(trace.len(), 1);
        assert!(!trace[0].succeeded());
        assert!(dest.loads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transformation_failure_skips_load() {
        let dest = Arc::new(MemoryDestination::default());
        let doc = json!([{"name": {"official": "Testland"}, "area": 50.5}]);
        let mut trace = Vec::new();
        let err = pipeline(Arc::new(FixedSource(doc)), dest.clone())
            .run_traced(&mut trace)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some("transform"));
        assert_eq!(trace.iter().map(|s| s.stage).collect::<Vec<_>>(), vec![Stage::Extract, Stage::Transform]);
        assert!(dest.loads.lock().unwrap().is_empty());
    }
}
