use async_trait::async_trait;
use snapflow_utils::error::LoadError;
use snapflow_utils::Snapshot;

/// The load stage: writes a snapshot to its destination.
#[async_trait]
pub trait Destination: Send + Sync {
    fn name(&self) -> &str;

    /// Replace the destination's contents with `snapshot`. Returns rows written.
    async fn load(&self, snapshot: &Snapshot) -> Result<u64, LoadError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapflow_utils::Record;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingDestination {
        count: AtomicU64,
    }

    #[async_trait]
    impl Destination for CountingDestination {
        fn name(&self) -> &str { "counter" }
        async fn load(&self, snapshot: &Snapshot) -> Result<u64, LoadError> {
            let n = snapshot.len() as u64;
            self.count.fetch_add(n, Ordering::SeqCst);
            Ok(n)
        }
    }

    #[tokio::test]
    async fn destination_trait_works() {
        let dest = CountingDestination { count: AtomicU64::new(0) };
        assert_eq!(dest.name(), "counter");

        let snapshot = Snapshot::new(vec![
            Record::new("a", 1, 1.0),
            Record::new("b", 2, 2.0),
        ]);
        assert_eq!(dest.load(&snapshot).await.unwrap(), 2);
        assert_eq!(dest.count.load(Ordering::SeqCst), 2);
    }
}
