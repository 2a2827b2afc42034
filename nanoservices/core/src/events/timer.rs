use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::cron::CronSchedule;
use crate::events::trigger::{Trigger, TriggerEvent};

/// Spawns a task that emits [`TriggerEvent`]s for `pipeline` on the trigger's
/// schedule. Manual triggers have no timer and return `None`.
///
/// The task stops when the receiving side of `sender` is dropped; abort the
/// handle to stop it sooner.
pub fn spawn_trigger(
    pipeline: String,
    trigger: Trigger,
    sender: mpsc::Sender<TriggerEvent>,
) -> Option<JoinHandle<()>> {
    match trigger {
        Trigger::Interval(every) => Some(spawn_interval(pipeline, every, sender)),
        Trigger::Cron(schedule) => Some(spawn_cron(pipeline, schedule, sender)),
        Trigger::Manual => None,
    }
}

fn spawn_interval(
    pipeline: String,
    every: Duration,
    sender: mpsc::Sender<TriggerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // Skip the first immediate tick
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let event = TriggerEvent::new(pipeline.clone(), Trigger::Interval(every));
            if sender.send(event).await.is_err() {
                break;
            }
        }
    })
}

fn spawn_cron(
    pipeline: String,
    schedule: CronSchedule,
    sender: mpsc::Sender<TriggerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = schedule.next_after(now) else {
                tracing::warn!(pipeline = %pipeline, schedule = %schedule, "schedule never fires again");
                break;
            };
            tracing::debug!(pipeline = %pipeline, next = %next, "next scheduled run");

            // Missed firings (process asleep, clock jump) are not caught up.
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = sender.closed() => break,
            }

            let event = TriggerEvent::new(pipeline.clone(), Trigger::Cron(schedule.clone()));
            if sender.send(event).await.is_err() {
                break;
            }
        }
    })
}
