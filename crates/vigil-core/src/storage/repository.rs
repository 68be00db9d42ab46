//! Abstract persistent store consumed by the trigger engine.
//!
//! The engine owns no durable state of its own; every task reads and
//! writes rows through this trait. The web surface (subject, secret and
//! recipient management) shares the same store but is outside this crate.
//!
//! The transactional boundary required by the delivery pipeline is
//! expressed as one atomic operation, `create_delivery_with_access_code`:
//! either both rows are durable or neither is.

use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::model::{
    AuditLog, DeliveryEvent, DeliveryStatus, NewAccessCode, NewDeliveryEvent, NewPingHistory,
    NewPingVerification, PingHistory, Recipient, SecretAssignment, SecretQuestionSet, Subject,
};

/// Row ids produced by the transactional delivery insert.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryRecord {
    pub delivery_event_id: i64,
    pub access_code_id: i64,
}

/// Persistent store surface required by the engine tasks.
pub trait Repository: Send + Sync {
    // ── Subjects ─────────────────────────────────────────────────────

    /// Subjects with `pinging_enabled` and `next_scheduled_ping <= now`.
    fn subjects_due_for_ping(&self, now: DateTime<Utc>) -> Result<Vec<Subject>, StorageError>;

    /// Subjects with `pinging_enabled` whose check-in deadline
    /// (`last_activity + ping_deadline_days`) has passed.
    fn subjects_past_deadline(&self, now: DateTime<Utc>) -> Result<Vec<Subject>, StorageError>;

    /// All subjects with `pinging_enabled = true`.
    fn active_subjects(&self) -> Result<Vec<Subject>, StorageError>;

    fn subject_by_id(&self, id: i64) -> Result<Option<Subject>, StorageError>;

    fn update_subject(&self, subject: &Subject) -> Result<(), StorageError>;

    // ── Pings ────────────────────────────────────────────────────────

    fn create_ping_history(&self, ping: &NewPingHistory) -> Result<i64, StorageError>;

    /// The most recently sent ping for a subject, if any.
    fn latest_ping_history(&self, subject_id: i64) -> Result<Option<PingHistory>, StorageError>;

    fn create_ping_verification(
        &self,
        verification: &NewPingVerification,
    ) -> Result<i64, StorageError>;

    // ── Recipients and assignments ───────────────────────────────────

    fn recipients_for_subject(&self, subject_id: i64) -> Result<Vec<Recipient>, StorageError>;

    fn assignments_for_recipient(
        &self,
        recipient_id: i64,
    ) -> Result<Vec<SecretAssignment>, StorageError>;

    fn assignment_by_id(&self, id: i64) -> Result<Option<SecretAssignment>, StorageError>;

    // ── Delivery pipeline ────────────────────────────────────────────

    /// Insert a pending `DeliveryEvent` and its `AccessCode` atomically.
    ///
    /// The access code row is bound to the new delivery event inside the
    /// same transaction. On any failure nothing is persisted.
    fn create_delivery_with_access_code(
        &self,
        delivery: &NewDeliveryEvent,
        code: &NewAccessCode,
    ) -> Result<DeliveryRecord, StorageError>;

    fn update_delivery_status(
        &self,
        delivery_event_id: i64,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<(), StorageError>;

    fn delivery_events_for_subject(
        &self,
        subject_id: i64,
    ) -> Result<Vec<DeliveryEvent>, StorageError>;

    // ── Audit ────────────────────────────────────────────────────────

    fn append_audit(&self, subject_id: i64, action: &str, details: &str)
        -> Result<(), StorageError>;

    fn audit_for_subject(&self, subject_id: i64) -> Result<Vec<AuditLog>, StorageError>;

    // ── Timelock question sets ───────────────────────────────────────

    /// Question sets whose timelock opens before `cutoff`.
    fn question_sets_unlocking_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SecretQuestionSet>, StorageError>;

    fn update_question_set(&self, set: &SecretQuestionSet) -> Result<(), StorageError>;
}
