//! Test doubles shared by the engine test modules.
//!
//! `MemoryRepository` is a faithful in-memory implementation of the
//! `Repository` trait; the recording gateways and scripted providers
//! capture calls so tests can assert on exactly what a task did.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::engine::timelock::{SealedBlob, TimelockCipher};
use crate::error::{CoreError, GatewayError, ProviderError, StorageError};
use crate::gateways::{EmailSender, MessageSender};
use crate::model::{
    AccessCode, AuditLog, DeliveryEvent, DeliveryStatus, NewAccessCode, NewDeliveryEvent,
    NewPingHistory, NewPingVerification, PingHistory, PingMethod, PingStatus, PingVerification,
    Recipient, SecretAssignment, SecretQuestionSet, Subject,
};
use crate::providers::ActivityProvider;
use crate::storage::{DeliveryRecord, Repository};

/// A subject with sensible defaults: email pings, 3-day frequency,
/// 14-day deadline, active right now.
pub fn subject_fixture(id: i64) -> Subject {
    let now = Utc::now();
    Subject {
        id,
        email: format!("subject{id}@example.com"),
        telegram_chat_id: None,
        github_username: None,
        ping_frequency_days: 3,
        ping_deadline_days: 14,
        ping_method: PingMethod::Email,
        pinging_enabled: true,
        last_activity: now,
        next_scheduled_ping: now + Duration::days(3),
    }
}

#[derive(Default)]
struct MemoryState {
    subjects: Vec<Subject>,
    ping_history: Vec<PingHistory>,
    ping_verifications: Vec<PingVerification>,
    recipients: Vec<Recipient>,
    assignments: Vec<SecretAssignment>,
    deliveries: Vec<DeliveryEvent>,
    access_codes: Vec<AccessCode>,
    audit: Vec<AuditLog>,
    question_sets: Vec<SecretQuestionSet>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
    /// Makes `create_delivery_with_access_code` fail atomically.
    pub fail_delivery_txn: AtomicBool,
    /// Makes `update_subject` fail, as a dropped connection would.
    pub fail_update_subject: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subject(&self, subject: Subject) {
        self.state.lock().unwrap().subjects.push(subject);
    }

    pub fn add_recipient(&self, recipient: Recipient) {
        self.state.lock().unwrap().recipients.push(recipient);
    }

    pub fn add_assignment(&self, assignment: SecretAssignment) {
        self.state.lock().unwrap().assignments.push(assignment);
    }

    pub fn add_question_set(&self, set: SecretQuestionSet) {
        self.state.lock().unwrap().question_sets.push(set);
    }

    /// Record a responded ping directly, as the external
    /// verification-confirmation path would.
    pub fn add_responded_ping(&self, subject_id: i64, sent_at: DateTime<Utc>, responded_at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.ping_history.push(PingHistory {
            id,
            subject_id,
            method: PingMethod::Email,
            sent_at,
            status: PingStatus::Responded,
            responded_at: Some(responded_at),
        });
    }

    pub fn subject(&self, id: i64) -> Subject {
        self.state
            .lock()
            .unwrap()
            .subjects
            .iter()
            .find(|s| s.id == id)
            .expect("unknown subject")
            .clone()
    }

    pub fn ping_history(&self) -> Vec<PingHistory> {
        self.state.lock().unwrap().ping_history.clone()
    }

    pub fn ping_verifications(&self) -> Vec<PingVerification> {
        self.state.lock().unwrap().ping_verifications.clone()
    }

    pub fn deliveries(&self) -> Vec<DeliveryEvent> {
        self.state.lock().unwrap().deliveries.clone()
    }

    pub fn access_codes(&self) -> Vec<AccessCode> {
        self.state.lock().unwrap().access_codes.clone()
    }

    pub fn audit(&self) -> Vec<AuditLog> {
        self.state.lock().unwrap().audit.clone()
    }

    pub fn question_sets(&self) -> Vec<SecretQuestionSet> {
        self.state.lock().unwrap().question_sets.clone()
    }
}

impl Repository for MemoryRepository {
    fn subjects_due_for_ping(&self, now: DateTime<Utc>) -> Result<Vec<Subject>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .subjects
            .iter()
            .filter(|s| s.pinging_enabled && s.next_scheduled_ping <= now)
            .cloned()
            .collect())
    }

    fn subjects_past_deadline(&self, now: DateTime<Utc>) -> Result<Vec<Subject>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .subjects
            .iter()
            .filter(|s| s.pinging_enabled && s.deadline() <= now)
            .cloned()
            .collect())
    }

    fn active_subjects(&self) -> Result<Vec<Subject>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .subjects
            .iter()
            .filter(|s| s.pinging_enabled)
            .cloned()
            .collect())
    }

    fn subject_by_id(&self, id: i64) -> Result<Option<Subject>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state.subjects.iter().find(|s| s.id == id).cloned())
    }

    fn update_subject(&self, subject: &Subject) -> Result<(), StorageError> {
        if self.fail_update_subject.load(Ordering::Relaxed) {
            return Err(StorageError::QueryFailed("injected failure".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.subjects.iter_mut().find(|s| s.id == subject.id) {
            *existing = subject.clone();
        }
        Ok(())
    }

    fn create_ping_history(&self, ping: &NewPingHistory) -> Result<i64, StorageError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.ping_history.push(PingHistory {
            id,
            subject_id: ping.subject_id,
            method: ping.method,
            sent_at: ping.sent_at,
            status: PingStatus::Sent,
            responded_at: None,
        });
        Ok(id)
    }

    fn latest_ping_history(&self, subject_id: i64) -> Result<Option<PingHistory>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .ping_history
            .iter()
            .filter(|p| p.subject_id == subject_id)
            .max_by_key(|p| (p.sent_at, p.id))
            .cloned())
    }

    fn create_ping_verification(
        &self,
        verification: &NewPingVerification,
    ) -> Result<i64, StorageError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.ping_verifications.push(PingVerification {
            id,
            subject_id: verification.subject_id,
            code: verification.code.clone(),
            expires_at: verification.expires_at,
            used: false,
        });
        Ok(id)
    }

    fn recipients_for_subject(&self, subject_id: i64) -> Result<Vec<Recipient>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .recipients
            .iter()
            .filter(|r| r.subject_id == subject_id)
            .cloned()
            .collect())
    }

    fn assignments_for_recipient(
        &self,
        recipient_id: i64,
    ) -> Result<Vec<SecretAssignment>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .assignments
            .iter()
            .filter(|a| a.recipient_id == recipient_id)
            .cloned()
            .collect())
    }

    fn assignment_by_id(&self, id: i64) -> Result<Option<SecretAssignment>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state.assignments.iter().find(|a| a.id == id).cloned())
    }

    fn create_delivery_with_access_code(
        &self,
        delivery: &NewDeliveryEvent,
        code: &NewAccessCode,
    ) -> Result<DeliveryRecord, StorageError> {
        if self.fail_delivery_txn.load(Ordering::Relaxed) {
            return Err(StorageError::QueryFailed("injected failure".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        let delivery_event_id = state.next_id();
        let access_code_id = state.next_id();
        state.deliveries.push(DeliveryEvent {
            id: delivery_event_id,
            subject_id: delivery.subject_id,
            recipient_id: delivery.recipient_id,
            sent_at: delivery.sent_at,
            status: DeliveryStatus::Pending,
            error: None,
        });
        state.access_codes.push(AccessCode {
            id: access_code_id,
            code_hash: code.code_hash.clone(),
            recipient_id: code.recipient_id,
            subject_id: code.subject_id,
            delivery_event_id,
            created_at: code.created_at,
            expires_at: code.expires_at,
            max_attempts: code.max_attempts,
        });
        Ok(DeliveryRecord {
            delivery_event_id,
            access_code_id,
        })
    }

    fn update_delivery_status(
        &self,
        delivery_event_id: i64,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if let Some(event) = state
            .deliveries
            .iter_mut()
            .find(|d| d.id == delivery_event_id)
        {
            event.status = status;
            event.error = error.map(String::from);
        }
        Ok(())
    }

    fn delivery_events_for_subject(
        &self,
        subject_id: i64,
    ) -> Result<Vec<DeliveryEvent>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .deliveries
            .iter()
            .filter(|d| d.subject_id == subject_id)
            .cloned()
            .collect())
    }

    fn append_audit(
        &self,
        subject_id: i64,
        action: &str,
        details: &str,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.audit.push(AuditLog {
            id,
            subject_id,
            action: action.to_string(),
            at: Utc::now(),
            details: details.to_string(),
        });
        Ok(())
    }

    fn audit_for_subject(&self, subject_id: i64) -> Result<Vec<AuditLog>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .audit
            .iter()
            .filter(|a| a.subject_id == subject_id)
            .cloned()
            .collect())
    }

    fn question_sets_unlocking_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SecretQuestionSet>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .question_sets
            .iter()
            .filter(|q| q.unlock_at <= cutoff)
            .cloned()
            .collect())
    }

    fn update_question_set(&self, set: &SecretQuestionSet) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.question_sets.iter_mut().find(|q| q.id == set.id) {
            *existing = set.clone();
        }
        Ok(())
    }
}

// ── Recording gateways ───────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingMailer {
    pub pings: Mutex<Vec<(String, String)>>,
    pub disclosures: Mutex<Vec<(String, String, String)>>,
    pub fail: AtomicBool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self) -> Result<(), GatewayError> {
        if self.fail.load(Ordering::Relaxed) {
            Err(GatewayError::NotConfigured {
                gateway: "test-mailer".to_string(),
                message: "scripted failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EmailSender for RecordingMailer {
    async fn send_ping(&self, to: &str, verification_code: &str) -> Result<(), GatewayError> {
        self.check()?;
        self.pings
            .lock()
            .unwrap()
            .push((to.to_string(), verification_code.to_string()));
        Ok(())
    }

    async fn send_disclosure(
        &self,
        to: &str,
        message: &str,
        access_code: &str,
    ) -> Result<(), GatewayError> {
        self.check()?;
        self.disclosures.lock().unwrap().push((
            to.to_string(),
            message.to_string(),
            access_code.to_string(),
        ));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMessenger {
    pub messages: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageSender for RecordingMessenger {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), GatewayError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(GatewayError::NotConfigured {
                gateway: "test-messenger".to_string(),
                message: "scripted failure".to_string(),
            });
        }
        self.messages
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

// ── Scripted activity provider ───────────────────────────────────────

pub struct ScriptedProvider {
    name: String,
    pub activity: Mutex<Option<DateTime<Utc>>>,
    pub fail: AtomicBool,
    pub configured: bool,
}

impl ScriptedProvider {
    pub fn reporting(name: &str, at: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            activity: Mutex::new(Some(at)),
            fail: AtomicBool::new(false),
            configured: true,
        }
    }

    pub fn silent(name: &str) -> Self {
        Self {
            name: name.to_string(),
            activity: Mutex::new(None),
            fail: AtomicBool::new(false),
            configured: true,
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            activity: Mutex::new(None),
            fail: AtomicBool::new(true),
            configured: true,
        }
    }
}

#[async_trait]
impl ActivityProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_configured(&self, _subject: &Subject) -> bool {
        self.configured
    }

    async fn last_activity(
        &self,
        _subject: &Subject,
    ) -> Result<Option<DateTime<Utc>>, ProviderError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(ProviderError::Rejected {
                provider: self.name.clone(),
                status: 500,
            });
        }
        Ok(*self.activity.lock().unwrap())
    }
}

// ── Scripted timelock cipher ─────────────────────────────────────────

#[derive(Default)]
pub struct ScriptedCipher {
    pub fail: AtomicBool,
}

impl ScriptedCipher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimelockCipher for ScriptedCipher {
    fn reseal(&self, blob: &[u8], _unlock_at: DateTime<Utc>) -> Result<SealedBlob, CoreError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(CoreError::Custom("scripted cipher failure".to_string()));
        }
        let mut data = blob.to_vec();
        data.reverse();
        Ok(SealedBlob {
            data,
            round: blob.len() as u64 + 1,
        })
    }
}
