//! Check-in orchestrator: the recurring ping task.
//!
//! Selects subjects whose `next_scheduled_ping` has arrived and sends
//! them a check-in request over their configured channel(s). Send
//! failures are logged, never propagated: the schedule always advances,
//! so a transient gateway outage delays one ping rather than stalling
//! the whole cadence. The next frequency window retries naturally.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use super::codes;
use crate::error::CoreError;
use crate::gateways::{EmailSender, MessageSender};
use crate::model::{NewPingHistory, NewPingVerification, PingMethod, Subject};
use crate::scheduler::Task;
use crate::storage::Repository;

pub struct PingTask {
    repo: Arc<dyn Repository>,
    mailer: Arc<dyn EmailSender>,
    messenger: Arc<dyn MessageSender>,
}

impl PingTask {
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

    /// Run the ping cycle against an explicit clock.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        // A failing due-query aborts the whole run; the scheduler
        // reschedules it at the normal interval.
        let due = self.repo.subjects_due_for_ping(now)?;
        for mut subject in due {
            if let Err(e) = self.ping_subject(&mut subject, now).await {
                warn!(subject_id = subject.id, "check-in failed for subject: {e}");
            }
        }
        Ok(())
    }

    async fn ping_subject(&self, subject: &mut Subject, now: DateTime<Utc>) -> Result<(), CoreError> {
        match subject.ping_method {
            PingMethod::Chat => {
                self.send_chat_ping(subject, now).await?;
            }
            PingMethod::Email => {
                issue_email_ping(&*self.repo, &*self.mailer, subject, now).await?;
            }
            PingMethod::Both => {
                // Chat first, best-effort; email always follows.
                self.send_chat_ping(subject, now).await?;
                issue_email_ping(&*self.repo, &*self.mailer, subject, now).await?;
            }
        }

        // Advance the schedule even when every send failed.
        subject.next_scheduled_ping = now + Duration::days(subject.ping_frequency_days);
        self.repo.update_subject(subject)?;
        info!(subject_id = subject.id, "check-in dispatched");
        Ok(())
    }

    async fn send_chat_ping(&self, subject: &Subject, now: DateTime<Utc>) -> Result<(), CoreError> {
        let Some(chat_id) = subject.telegram_chat_id.as_deref().filter(|c| !c.is_empty()) else {
            warn!(
                subject_id = subject.id,
                "chat ping requested but no chat id is configured, skipping"
            );
            return Ok(());
        };

        send_chat(
            &*self.repo,
            &*self.messenger,
            subject,
            chat_id,
            "Vigil check-in: please confirm you are still active.",
            now,
        )
        .await
    }
}

/// Send a chat message and record the history row. The send itself is
/// best-effort; the history insert is not.
pub(crate) async fn send_chat(
    repo: &dyn Repository,
    messenger: &dyn MessageSender,
    subject: &Subject,
    chat_id: &str,
    text: &str,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    if let Err(e) = messenger.send_message(chat_id, text).await {
        warn!(subject_id = subject.id, "chat ping send failed: {e}");
    }
    repo.create_ping_history(&NewPingHistory {
        subject_id: subject.id,
        method: PingMethod::Chat,
        sent_at: now,
    })?;
    Ok(())
}

/// Issue a fresh verification code, email it, and record the history
/// row. Shared between the ping and reminder tasks.
pub(crate) async fn issue_email_ping(
    repo: &dyn Repository,
    mailer: &dyn EmailSender,
    subject: &Subject,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    let code = codes::generate_verification_code();
    repo.create_ping_verification(&NewPingVerification {
        subject_id: subject.id,
        code: code.clone(),
        expires_at: now + Duration::days(subject.ping_deadline_days),
    })?;

    if let Err(e) = mailer.send_ping(&subject.email, &code).await {
        warn!(subject_id = subject.id, "email ping send failed: {e}");
    }

    repo.create_ping_history(&NewPingHistory {
        subject_id: subject.id,
        method: PingMethod::Email,
        sent_at: now,
    })?;
    Ok(())
}

#[async_trait]
impl Task for PingTask {
    fn name(&self) -> &str {
        "check-in-ping"
    }

    async fn run(&self) -> Result<(), CoreError> {
        self.run_at(Utc::now()).await
    }
}
