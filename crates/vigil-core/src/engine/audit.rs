//! Best-effort audit logging.
//!
//! Audit rows describe actions that have already happened (or are about
//! to, irrevocably). A failed audit write must never abort the action it
//! describes, so the single entry point here swallows storage errors
//! after logging them.

use tracing::warn;

use crate::storage::Repository;

/// Append an audit entry, logging (but never propagating) failures.
pub fn record(repo: &dyn Repository, subject_id: i64, action: &str, details: &str) {
    if let Err(e) = repo.append_audit(subject_id, action, details) {
        warn!(subject_id, action, "audit write failed: {e}");
    }
}
