//! Timelock renewal.
//!
//! Question-set blobs are sealed against a future unlock time. While a
//! subject is alive the blob must never become openable, so sets whose
//! unlock time is approaching get resealed further into the future.
//! Once a subject's switch has fired (or the deadline has passed), the
//! set is left alone and the timelock is allowed to expire on schedule.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use super::audit;
use crate::error::CoreError;
use crate::model::{audit_actions, SecretQuestionSet};
use crate::scheduler::Task;
use crate::storage::Repository;

/// Sets unlocking within this margin are renewed.
const RENEWAL_MARGIN_HOURS: i64 = 24;

/// Blob sealed against a drand-style round at some unlock time.
#[derive(Debug, Clone)]
pub struct SealedBlob {
    pub data: Vec<u8>,
    pub round: u64,
}

/// Re-encryption backend. Implementations map an unlock time onto a
/// beacon round and reseal the payload against it.
pub trait TimelockCipher: Send + Sync {
    fn reseal(&self, blob: &[u8], unlock_at: DateTime<Utc>) -> Result<SealedBlob, CoreError>;
}

pub struct TimelockTask {
    repo: Arc<dyn Repository>,
    cipher: Arc<dyn TimelockCipher>,
}

impl TimelockTask {
    pub fn new(repo: Arc<dyn Repository>, cipher: Arc<dyn TimelockCipher>) -> Self {
        Self { repo, cipher }
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let cutoff = now + Duration::hours(RENEWAL_MARGIN_HOURS);
        let expiring = self.repo.question_sets_unlocking_before(cutoff)?;
        for set in expiring {
            if let Err(e) = self.renew_set(set, now).await {
                warn!("timelock renewal failed for a question set: {e}");
            }
        }
        Ok(())
    }

    async fn renew_set(&self, mut set: SecretQuestionSet, now: DateTime<Utc>) -> Result<(), CoreError> {
        let Some(assignment) = self.repo.assignment_by_id(set.assignment_id)? else {
            warn!(set_id = set.id, "question set references a missing assignment");
            return Ok(());
        };
        let Some(subject) = self.repo.subject_by_id(assignment.subject_id)? else {
            warn!(set_id = set.id, "question set references a missing subject");
            return Ok(());
        };

        // A fired or expired switch means the unlock should happen.
        if !subject.pinging_enabled || now >= subject.deadline() {
            info!(
                set_id = set.id,
                subject_id = subject.id,
                "leaving timelock to expire"
            );
            return Ok(());
        }

        let unlock_at = now + Duration::days(subject.ping_deadline_days);
        let sealed = self.cipher.reseal(&set.sealed_blob, unlock_at)?;

        set.sealed_blob = sealed.data;
        set.round = sealed.round;
        set.unlock_at = unlock_at;
        self.repo.update_question_set(&set)?;

        audit::record(
            &*self.repo,
            subject.id,
            audit_actions::TIMELOCK_RENEWED,
            &format!("set {} resealed until {}", set.id, unlock_at.to_rfc3339()),
        );
        info!(set_id = set.id, subject_id = subject.id, "timelock renewed");
        Ok(())
    }
}

#[async_trait]
impl Task for TimelockTask {
    fn name(&self) -> &str {
        "timelock-renewal"
    }

    async fn run(&self) -> Result<(), CoreError> {
        self.run_at(Utc::now()).await
    }
}
