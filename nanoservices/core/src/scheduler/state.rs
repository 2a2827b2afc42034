use std::collections::HashMap;

use crate::pipeline::{Stage, StageOutcome};
use crate::scheduler::retry::RetryPolicy;

/// Status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Triggered,
    Running,
    /// The last attempt failed and another one is scheduled.
    Retrying,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Triggered => "triggered",
            RunStatus::Running => "running",
            RunStatus::Retrying => "retrying",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// Status of one stage within the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Waiting,
    Completed,
    Failed,
    Skipped,
}

/// In-memory state for a single pipeline run across its attempts.
#[derive(Debug)]
pub struct RunState {
    pub id: String,
    pub pipeline: String,
    pub trigger: String,
    pub status: RunStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub stage_statuses: HashMap<Stage, StageStatus>,
    pub rows: Option<u64>,
    pub last_error: Option<String>,
    pub started_at: std::time::Instant,
}

impl RunState {
    pub fn new(id: String, pipeline: String, trigger: String, policy: &RetryPolicy) -> Self {
        Self {
            id,
            pipeline,
            trigger,
            status: RunStatus::Triggered,
            attempt: 0,
            max_attempts: policy.max_attempts(),
            stage_statuses: waiting(),
            rows: None,
            last_error: None,
            started_at: std::time::Instant::now(),
        }
    }

    /// Begin the next attempt. Returns its 1-based number.
    pub fn start_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.status = RunStatus::Running;
        self.stage_statuses = waiting();
        self.attempt
    }

    /// Fold the outcome of the current attempt into the run.
    ///
    /// Stages that were never started because an earlier one failed are
    /// marked skipped. A failure moves the run to `Retrying` while attempts
    /// remain, otherwise to `Failed`.
    pub fn finish_attempt(&mut self, outcomes: &[StageOutcome], result: Result<u64, String>) -> RunStatus {
        for outcome in outcomes {
            let status = if outcome.succeeded() { StageStatus::Completed } else { StageStatus::Failed };
            self.stage_statuses.insert(outcome.stage, status);
        }

        self.status = match result {
            Ok(rows) => {
                self.rows = Some(rows);
                self.last_error = None;
                RunStatus::Completed
            }
            Err(error) => {
                for status in self.stage_statuses.values_mut() {
                    if *status == StageStatus::Waiting {
                        *status = StageStatus::Skipped;
                    }
                }
                self.last_error = Some(error);
                if self.attempt < self.max_attempts {
                    RunStatus::Retrying
                } else {
                    RunStatus::Failed
                }
            }
        };
        self.status
    }

    /// Give up on a pending retry; the run ends as failed with its last error.
    pub fn stop_retrying(&mut self) {
        if self.status == RunStatus::Retrying {
            self.status = RunStatus::Failed;
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::Failed)
    }
}

fn waiting() -> HashMap<Stage, StageStatus> {
    Stage::ALL.iter().map(|s| (*s, StageStatus::Waiting)).collect()
}
