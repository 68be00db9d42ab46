//! Vigil core: a dead man's switch trigger engine.
//!
//! Subjects get periodic check-in pings; responding, or being seen
//! active on an external service, proves they are alive. When a
//! subject's deadline passes with no proof of life, the switch fires:
//! each of their recipients receives a disclosure notification with a
//! single-use access code, and the subject drops out of the schedule
//! for good. A timelock task keeps sealed question-set payloads from
//! unlocking early while the subject is alive.
//!
//! The crate is a library; a host binary wires the tasks in
//! [`engine`] onto a [`scheduler::TaskScheduler`] with a
//! [`storage::SqliteRepository`] and the gateways in [`gateways`].

pub mod config;
pub mod engine;
pub mod error;
pub mod gateways;
pub mod model;
pub mod providers;
pub mod scheduler;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use config::EngineConfig;
pub use engine::{
    ActivityReconciler, ActivityTask, DeadSwitchTask, PingTask, ReminderTask, TimelockCipher,
    TimelockTask,
};
pub use error::{CoreError, Result};
pub use scheduler::{Task, TaskScheduler};
pub use storage::{Repository, SqliteRepository};
