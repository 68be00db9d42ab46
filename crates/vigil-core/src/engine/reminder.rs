//! Deadline reminders.
//!
//! Between the regular ping cadence and the hard deadline, subjects get
//! escalating reminders. A reminder goes out once the deadline is within
//! the look-ahead window, is debounced so repeated scheduler ticks do
//! not spam, and carries an urgency tone derived from the remaining
//! time.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use super::{audit, checkin};
use crate::error::CoreError;
use crate::gateways::{EmailSender, MessageSender};
use crate::model::{audit_actions, PingStatus, Subject};
use crate::scheduler::Task;
use crate::storage::Repository;

/// Reminders start once the deadline is this close.
const LOOKAHEAD_HOURS: i64 = 48;

/// Minimum gap between consecutive reminders to the same subject.
const DEBOUNCE_HOURS: i64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Reminder,
    Urgent,
    FinalWarning,
}

impl Urgency {
    /// Classify by time remaining until the deadline. Overdue subjects
    /// (negative remaining) get the final warning tone.
    pub fn classify(remaining: Duration) -> Self {
        if remaining <= Duration::hours(12) {
            Urgency::FinalWarning
        } else if remaining <= Duration::hours(24) {
            Urgency::Urgent
        } else {
            Urgency::Reminder
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Urgency::Reminder => "reminder",
            Urgency::Urgent => "urgent",
            Urgency::FinalWarning => "final_warning",
        }
    }

    fn chat_text(self, remaining_hours: i64) -> String {
        match self {
            Urgency::Reminder => format!(
                "Vigil reminder: please check in. Your deadline is in about {remaining_hours} hours."
            ),
            Urgency::Urgent => format!(
                "Vigil URGENT: your deadline is in about {remaining_hours} hours. Please check in now."
            ),
            Urgency::FinalWarning => "Vigil FINAL WARNING: your deadline is imminent. \
                 Check in immediately or disclosure will proceed."
                .to_string(),
        }
    }
}

pub struct ReminderTask {
    repo: Arc<dyn Repository>,
    mailer: Arc<dyn EmailSender>,
    messenger: Arc<dyn MessageSender>,
}

impl ReminderTask {
    pub fn new(
        repo: Arc<dyn Repository>,
        mailer: Arc<dyn EmailSender>,
        messenger: Arc<dyn MessageSender>,
    ) -> Self {
        Self {
            repo,
            mailer,
            messenger,
        }
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let subjects = self.repo.active_subjects()?;
        for subject in subjects {
            if let Err(e) = self.remind_subject(&subject, now).await {
                warn!(subject_id = subject.id, "reminder failed for subject: {e}");
            }
        }
        Ok(())
    }

    async fn remind_subject(&self, subject: &Subject, now: DateTime<Utc>) -> Result<(), CoreError> {
        let remaining = subject.deadline() - now;
        if remaining > Duration::hours(LOOKAHEAD_HOURS) {
            return Ok(());
        }

        if let Some(latest) = self.repo.latest_ping_history(subject.id)? {
            // A response to the outstanding ping means no reminder is
            // needed until the next cycle.
            if latest.status == PingStatus::Responded {
                return Ok(());
            }
            if now - latest.sent_at < Duration::hours(DEBOUNCE_HOURS) {
                return Ok(());
            }
        }

        let urgency = Urgency::classify(remaining);
        let remaining_hours = remaining.num_hours().max(0);

        if let Some(chat_id) = subject.telegram_chat_id.as_deref().filter(|c| !c.is_empty()) {
            checkin::send_chat(
                &*self.repo,
                &*self.messenger,
                subject,
                chat_id,
                &urgency.chat_text(remaining_hours),
                now,
            )
            .await?;
        }

        // Email carries a fresh verification code so the subject can
        // confirm from the reminder itself.
        checkin::issue_email_ping(&*self.repo, &*self.mailer, subject, now).await?;

        audit::record(
            &*self.repo,
            subject.id,
            audit_actions::REMINDER_SENT,
            &format!("{} ({remaining_hours}h remaining)", urgency.as_str()),
        );
        info!(
            subject_id = subject.id,
            urgency = urgency.as_str(),
            "reminder sent"
        );
        Ok(())
    }
}

#[async_trait]
impl Task for ReminderTask {
    fn name(&self) -> &str {
        "deadline-reminder"
    }

    async fn run(&self) -> Result<(), CoreError> {
        self.run_at(Utc::now()).await
    }
}
