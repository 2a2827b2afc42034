pub mod retry;
pub mod runner;
pub mod state;

pub use retry::RetryPolicy;
pub use runner::{execute_run, run_scheduler, PipelineDef};
pub use state::{RunState, RunStatus, StageStatus};
