use snapflow_utils::error::TransformationError;
use snapflow_utils::{RawDocument, Snapshot};

/// The transform stage: reshapes a raw document into table rows.
///
/// Transforms are pure. The same document always yields the same snapshot,
/// in the same order, and a document that cannot be fully mapped yields an
/// error instead of a partial snapshot.
pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    fn transform(&self, doc: &RawDocument) -> Result<Snapshot, TransformationError>;
}
