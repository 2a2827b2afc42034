pub mod db;

pub use db::{CompletedRun, PipelineRunRow, StageRunRow, Store};
