pub mod bus;
pub mod cron;
pub mod timer;
pub mod trigger;

pub use cron::CronSchedule;
pub use bus::{EventBus, ManualTrigger};
pub use trigger::{Trigger, TriggerEvent};
