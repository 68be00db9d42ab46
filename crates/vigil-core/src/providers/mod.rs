//! External liveness-signal providers.
//!
//! A provider answers one question per subject: when did we last see them
//! active on an external platform? Providers are pure query components --
//! registered at construction, iterated by the reconciler, and never hold
//! subject state.

pub mod github;

pub use github::GitHubActivityProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ProviderError;
use crate::model::Subject;

/// A pluggable source of external liveness signals.
#[async_trait]
pub trait ActivityProvider: Send + Sync {
    /// Unique identifier (e.g. "github"), used in audit details.
    fn name(&self) -> &str;

    /// Whether this subject carries the handle this provider polls.
    fn is_configured(&self, subject: &Subject) -> bool;

    /// Most recent activity timestamp observed for the subject, or
    /// `None` when the feed is empty.
    async fn last_activity(&self, subject: &Subject)
        -> Result<Option<DateTime<Utc>>, ProviderError>;
}
