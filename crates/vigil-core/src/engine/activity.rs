//! External-activity reconciliation.
//!
//! Providers (GitHub and friends) report when a subject was last seen
//! alive elsewhere. Fresh activity moves `last_activity` forward and
//! reschedules the next ping, so an active subject never has to answer
//! pings by hand. The reconciler is shared with the trigger task, which
//! uses it as a last-moment cancellation check.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{info, warn};

use super::audit;
use crate::error::CoreError;
use crate::model::{audit_actions, Subject};
use crate::providers::ActivityProvider;
use crate::scheduler::Task;
use crate::storage::Repository;

pub struct ActivityReconciler {
    providers: Vec<Arc<dyn ActivityProvider>>,
}

impl ActivityReconciler {
    pub fn new(providers: Vec<Arc<dyn ActivityProvider>>) -> Self {
        Self { providers }
    }

    pub fn has_provider_for(&self, subject: &Subject) -> bool {
        self.providers.iter().any(|p| p.is_configured(subject))
    }

    /// Poll every configured provider and fold fresh activity into the
    /// subject. Returns true when `last_activity` moved forward. A
    /// failing provider is logged and skipped; the others still count.
    pub async fn reconcile(
        &self,
        repo: &dyn Repository,
        subject: &mut Subject,
    ) -> Result<bool, CoreError> {
        let mut fresh: Vec<(&str, chrono::DateTime<Utc>)> = Vec::new();
        for provider in &self.providers {
            if !provider.is_configured(subject) {
                continue;
            }
            match provider.last_activity(subject).await {
                Ok(Some(at)) if at > subject.last_activity => {
                    fresh.push((provider.name(), at));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        subject_id = subject.id,
                        provider = provider.name(),
                        "activity poll failed: {e}"
                    );
                }
            }
        }

        let Some(newest) = fresh.iter().map(|(_, at)| *at).max() else {
            return Ok(false);
        };

        subject.last_activity = newest;
        subject.next_scheduled_ping = newest + Duration::days(subject.ping_frequency_days);
        repo.update_subject(subject)?;

        for (provider, at) in &fresh {
            audit::record(
                repo,
                subject.id,
                audit_actions::EXTERNAL_ACTIVITY,
                &format!("{provider} activity at {}", at.to_rfc3339()),
            );
        }
        info!(
            subject_id = subject.id,
            last_activity = %newest.to_rfc3339(),
            "external activity recorded"
        );
        Ok(true)
    }
}

pub struct ActivityTask {
    repo: Arc<dyn Repository>,
    reconciler: Arc<ActivityReconciler>,
}

impl ActivityTask {
    pub fn new(repo: Arc<dyn Repository>, reconciler: Arc<ActivityReconciler>) -> Self {
        Self { repo, reconciler }
    }

    pub async fn run_once(&self) -> Result<(), CoreError> {
        let subjects = self.repo.active_subjects()?;
        for mut subject in subjects {
            if !self.reconciler.has_provider_for(&subject) {
                continue;
            }
            if let Err(e) = self.reconciler.reconcile(&*self.repo, &mut subject).await {
                warn!(subject_id = subject.id, "reconciliation failed: {e}");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Task for ActivityTask {
    fn name(&self) -> &str {
        "activity-reconcile"
    }

    async fn run(&self) -> Result<(), CoreError> {
        self.run_once().await
    }
}
