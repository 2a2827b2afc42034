pub mod loader;
pub mod types;

pub use loader::{load_pipeline, load_pipelines, load_pipelines_dir, parse_duration, parse_pipeline, ConfigError};
pub use types::{DestinationConfig, PipelineConfig, SourceConfig, TriggerConfig, WarehouseKind};
