pub use snapflow_core as core;
pub use snapflow_utils as utils;

// Convenience re-exports for common usage
pub use snapflow_core::builder::{from_config, PipelineBuilder};
pub use snapflow_core::destinations::{Destination, FullRefreshLoader, PostgresWarehouse, SqliteWarehouse, TableRef};
pub use snapflow_core::engine::{run_once, Snapflow};
pub use snapflow_core::events::{CronSchedule, Trigger};
pub use snapflow_core::sources::{HttpSourceBuilder, Source};
pub use snapflow_core::transforms::{CountryProjection, Transform};
pub use snapflow_utils::{Record, SnapflowResult, Snapshot};
