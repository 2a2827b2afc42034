use async_trait::async_trait;
use snapflow_utils::error::ExtractionError;
use snapflow_utils::RawDocument;

/// The extract stage: fetches one raw document per run.
///
/// Implementations must not retry or swallow failures; a failed fetch is
/// returned to the caller, which decides whether the run is retried.
#[async_trait]
pub trait Source: Send + Sync {
    /// Human-readable name for logging and metrics
    fn name(&self) -> &str;

    /// Fetch the current snapshot of the source
    async fn extract(&self) -> Result<RawDocument, ExtractionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StaticSource;

    #[async_trait]
    impl Source for StaticSource {
        fn name(&self) -> &str { "static" }
        async fn extract(&self) -> Result<RawDocument, ExtractionError> {
            Ok(json!([{"name": {"official": "Testland"}, "population": 100, "area": 50.5}]))
        }
    }

    #[tokio::test]
    async fn source_trait_works() {
        let src = StaticSource;
        assert_eq!(src.name(), "static");
        let doc = src.extract().await.unwrap();
        assert_eq!(doc.as_array().map(Vec::len), Some(1));
    }
}
