//! The switch engine: the scheduled tasks and the helpers they share.

pub mod activity;
pub mod audit;
pub mod checkin;
pub mod codes;
pub mod reminder;
pub mod timelock;
pub mod trigger;

pub use activity::{ActivityReconciler, ActivityTask};
pub use checkin::PingTask;
pub use reminder::{ReminderTask, Urgency};
pub use timelock::{SealedBlob, TimelockCipher, TimelockTask};
pub use trigger::DeadSwitchTask;
