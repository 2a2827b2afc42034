use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::cron::CronSchedule;

/// What starts a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Run on a fixed interval
    Interval(Duration),
    /// Run on a calendar, e.g. weekly
    Cron(CronSchedule),
    /// Run only when asked explicitly
    Manual,
}

impl Trigger {
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Interval(_) => "interval",
            Trigger::Cron(_) => "cron",
            Trigger::Manual => "manual",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Interval(every) => write!(f, "interval({}s)", every.as_secs_f64()),
            Trigger::Cron(schedule) => write!(f, "cron({schedule})"),
            Trigger::Manual => f.write_str("manual"),
        }
    }
}

/// An event delivered to the scheduler.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    /// Which pipeline this event is for
    pub pipeline: String,
    /// What kind of trigger caused this event
    pub trigger: Trigger,
    pub fired_at: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(pipeline: impl Into<String>, trigger: Trigger) -> Self {
        Self { pipeline: pipeline.into(), trigger, fired_at: Utc::now() }
    }

    pub fn manual(pipeline: impl Into<String>) -> Self {
        Self::new(pipeline, Trigger::Manual)
    }
}
