use tokio::sync::mpsc;

use crate::events::trigger::TriggerEvent;

const DEFAULT_CAPACITY: usize = 256;

/// Queue of trigger events between the trigger tasks and the scheduler.
pub struct EventBus {
    sender: mpsc::Sender<TriggerEvent>,
    receiver: mpsc::Receiver<TriggerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self { sender, receiver }
    }

    /// A handle for requesting runs by hand while the scheduler is up.
    pub fn manual_trigger(&self) -> ManualTrigger {
        ManualTrigger { sender: self.sender.clone() }
    }

    /// Split into sender and receiver (consumes self).
    pub fn split(self) -> (mpsc::Sender<TriggerEvent>, mpsc::Receiver<TriggerEvent>) {
        (self.sender, self.receiver)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Fires [`Trigger::Manual`](crate::events::Trigger::Manual) events.
///
/// The request is subject to the same at-most-one-run rule as timed
/// triggers. Returns `false` once the scheduler has stopped.
#[derive(Clone)]
pub struct ManualTrigger {
    sender: mpsc::Sender<TriggerEvent>,
}

impl ManualTrigger {
    pub async fn fire(&self, pipeline: impl Into<String>) -> bool {
        self.sender.send(TriggerEvent::manual(pipeline)).await.is_ok()
    }
}
