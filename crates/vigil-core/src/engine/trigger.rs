//! The dead-switch trigger.
//!
//! Scans for subjects whose deadline has passed, gives them two last
//! chances to cancel (fresh external activity, a responded ping), and
//! otherwise fires: one delivery event plus one hashed access code per
//! recipient, created atomically, followed by the disclosure email with
//! the plaintext code. Firing disables pinging for the subject; the
//! latch is one-way.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::activity::ActivityReconciler;
use super::{audit, codes};
use crate::config::AccessCodeConfig;
use crate::error::CoreError;
use crate::gateways::EmailSender;
use crate::model::{
    audit_actions, DeliveryStatus, NewAccessCode, NewDeliveryEvent, PingStatus, Recipient, Subject,
};
use crate::scheduler::Task;
use crate::storage::Repository;

pub struct DeadSwitchTask {
    repo: Arc<dyn Repository>,
    mailer: Arc<dyn EmailSender>,
    reconciler: Arc<ActivityReconciler>,
    access_codes: AccessCodeConfig,
    // Serializes trigger runs beyond the scheduler's own overlap guard;
    // firing must never race with itself.
    run_lock: Mutex<()>,
}

impl DeadSwitchTask {
    pub fn new(
        repo: Arc<dyn Repository>,
        mailer: Arc<dyn EmailSender>,
        reconciler: Arc<ActivityReconciler>,
        access_codes: AccessCodeConfig,
    ) -> Self {
        Self {
            repo,
            mailer,
            reconciler,
            access_codes,
            run_lock: Mutex::new(()),
        }
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let _guard = self.run_lock.lock().await;
        let expired = self.repo.subjects_past_deadline(now)?;
        for mut subject in expired {
            if let Err(e) = self.evaluate_subject(&mut subject, now).await {
                error!(subject_id = subject.id, "trigger evaluation failed: {e}");
            }
        }
        Ok(())
    }

    async fn evaluate_subject(
        &self,
        subject: &mut Subject,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        // Last-moment cancellation check 1: fresh external activity.
        // Provider failures are swallowed inside reconcile; an Err here
        // means fresh activity was found but could not be persisted, so
        // the subject must be skipped and retried, never fired.
        if self.reconciler.reconcile(&*self.repo, subject).await? {
            audit::record(
                &*self.repo,
                subject.id,
                audit_actions::TRIGGER_CANCELLED,
                "external activity detected during final check",
            );
            info!(subject_id = subject.id, "trigger cancelled by external activity");
            return Ok(());
        }

        // Last-moment cancellation check 2: a ping response newer than
        // the recorded activity.
        if let Some(latest) = self.repo.latest_ping_history(subject.id)? {
            if latest.status == PingStatus::Responded {
                if let Some(responded_at) = latest.responded_at {
                    if responded_at > subject.last_activity {
                        subject.last_activity = responded_at;
                        subject.next_scheduled_ping =
                            responded_at + Duration::days(subject.ping_frequency_days);
                        self.repo.update_subject(subject)?;
                        audit::record(
                            &*self.repo,
                            subject.id,
                            audit_actions::TRIGGER_CANCELLED,
                            "ping response found during final check",
                        );
                        info!(subject_id = subject.id, "trigger cancelled by ping response");
                        return Ok(());
                    }
                }
            }
        }

        self.fire(subject, now).await
    }

    async fn fire(&self, subject: &mut Subject, now: DateTime<Utc>) -> Result<(), CoreError> {
        error!(subject_id = subject.id, "deadline passed, firing disclosure");
        audit::record(
            &*self.repo,
            subject.id,
            audit_actions::TRIGGER_FIRED,
            &format!("deadline {} passed", subject.deadline().to_rfc3339()),
        );

        let recipients = self.repo.recipients_for_subject(subject.id)?;
        for recipient in &recipients {
            if let Err(e) = self.disclose_to(subject, recipient, now).await {
                // One recipient's failure must not block the others.
                error!(
                    subject_id = subject.id,
                    recipient_id = recipient.id,
                    "disclosure failed: {e}"
                );
            }
        }

        // One-way latch: the subject leaves every scheduled scan.
        subject.pinging_enabled = false;
        self.repo.update_subject(subject)?;
        Ok(())
    }

    async fn disclose_to(
        &self,
        subject: &Subject,
        recipient: &Recipient,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let assignments = self.repo.assignments_for_recipient(recipient.id)?;
        if assignments.is_empty() {
            // Nothing assigned, nothing to disclose.
            return Ok(());
        }

        let plaintext = codes::generate_access_code();
        let record = self.repo.create_delivery_with_access_code(
            &NewDeliveryEvent {
                subject_id: subject.id,
                recipient_id: recipient.id,
                sent_at: now,
            },
            &NewAccessCode {
                code_hash: codes::hash_code(&plaintext),
                recipient_id: recipient.id,
                subject_id: subject.id,
                created_at: now,
                expires_at: now + Duration::days(self.access_codes.expiry_days),
                max_attempts: self.access_codes.max_attempts,
            },
        )?;

        match self
            .mailer
            .send_disclosure(&recipient.email, &recipient.farewell_message, &plaintext)
            .await
        {
            Ok(()) => {
                self.repo
                    .update_delivery_status(record.delivery_event_id, DeliveryStatus::Sent, None)?;
                info!(
                    subject_id = subject.id,
                    recipient_id = recipient.id,
                    "disclosure sent"
                );
            }
            Err(e) => {
                // The code row stays; a later resend reuses it.
                self.repo.update_delivery_status(
                    record.delivery_event_id,
                    DeliveryStatus::Failed,
                    Some(&e.to_string()),
                )?;
                warn!(
                    subject_id = subject.id,
                    recipient_id = recipient.id,
                    "disclosure send failed: {e}"
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Task for DeadSwitchTask {
    fn name(&self) -> &str {
        "dead-switch-trigger"
    }

    async fn run(&self) -> Result<(), CoreError> {
        self.run_at(Utc::now()).await
    }
}
