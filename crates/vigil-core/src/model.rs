//! Domain entities shared by the trigger engine and the repository.
//!
//! All timestamps are UTC. Integer ids are SQLite rowids; `New*` structs
//! carry the fields of a row that has not been inserted yet.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How a subject wants to receive check-in pings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingMethod {
    Email,
    Chat,
    Both,
}

impl PingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PingMethod::Email => "email",
            PingMethod::Chat => "chat",
            PingMethod::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(PingMethod::Email),
            "chat" => Some(PingMethod::Chat),
            "both" => Some(PingMethod::Both),
            _ => None,
        }
    }
}

/// The person being monitored by the switch.
///
/// `pinging_enabled` is the master switch: it becomes `false` the instant
/// secrets are delivered and is never set back to `true` by the engine.
/// `last_activity` anchors every deadline computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    pub email: String,
    /// Chat-platform chat id, required for chat pings.
    pub telegram_chat_id: Option<String>,
    /// Code-hosting handle polled by the activity provider.
    pub github_username: Option<String>,
    pub ping_frequency_days: i64,
    /// Must be greater than `ping_frequency_days`; enforced at
    /// configuration time, outside this crate.
    pub ping_deadline_days: i64,
    pub ping_method: PingMethod,
    pub pinging_enabled: bool,
    pub last_activity: DateTime<Utc>,
    pub next_scheduled_ping: DateTime<Utc>,
}

impl Subject {
    /// The instant after which the switch may fire.
    pub fn deadline(&self) -> DateTime<Utc> {
        self.last_activity + Duration::days(self.ping_deadline_days)
    }
}

/// Status of an outbound ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingStatus {
    Sent,
    Responded,
}

impl PingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PingStatus::Sent => "sent",
            PingStatus::Responded => "responded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(PingStatus::Sent),
            "responded" => Some(PingStatus::Responded),
            _ => None,
        }
    }
}

/// One outbound ping or reminder. Updated to `responded` exactly once by
/// the verification-confirmation path outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingHistory {
    pub id: i64,
    pub subject_id: i64,
    pub method: PingMethod,
    pub sent_at: DateTime<Utc>,
    pub status: PingStatus,
    pub responded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewPingHistory {
    pub subject_id: i64,
    pub method: PingMethod,
    pub sent_at: DateTime<Utc>,
}

/// One-time code proving a subject responded to an emailed ping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingVerification {
    pub id: i64,
    pub subject_id: i64,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

#[derive(Debug, Clone)]
pub struct NewPingVerification {
    pub subject_id: i64,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// A person who receives disclosed secrets. Read-only for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: i64,
    pub subject_id: i64,
    pub name: String,
    pub email: String,
    /// Free-text farewell message from the subject, sent with the
    /// disclosure notification.
    pub farewell_message: String,
}

/// Link between one of a subject's secrets and a recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretAssignment {
    pub id: i64,
    pub subject_id: i64,
    pub secret_id: i64,
    pub recipient_id: i64,
}

/// Status of a secret disclosure attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "sent" => Some(DeliveryStatus::Sent),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// One disclosure attempt per recipient per trigger event. Status moves
/// pending -> sent or pending -> failed, never backwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub id: i64,
    pub subject_id: i64,
    pub recipient_id: i64,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewDeliveryEvent {
    pub subject_id: i64,
    pub recipient_id: i64,
    pub sent_at: DateTime<Utc>,
}

/// Single-use disclosure credential. Only the sha256 hex hash of the code
/// is ever persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessCode {
    pub id: i64,
    pub code_hash: String,
    pub recipient_id: i64,
    pub subject_id: i64,
    pub delivery_event_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct NewAccessCode {
    pub code_hash: String,
    pub recipient_id: i64,
    pub subject_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_attempts: u32,
}

/// Append-only audit record. Writes are best-effort: a failed audit write
/// never aborts the action it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: i64,
    pub subject_id: i64,
    pub action: String,
    pub at: DateTime<Utc>,
    pub details: String,
}

/// Threshold-shared secret questions, sealed under a timelock.
///
/// The blob is opaque to the engine; only the deadline/round bookkeeping
/// is interpreted here. Rewritten in place by the re-encryption job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretQuestionSet {
    pub id: i64,
    pub assignment_id: i64,
    pub threshold: u32,
    pub sealed_blob: Vec<u8>,
    pub round: u64,
    pub unlock_at: DateTime<Utc>,
}

/// Audit action tags written by the engine.
pub mod audit_actions {
    pub const REMINDER_SENT: &str = "reminder_sent";
    pub const EXTERNAL_ACTIVITY: &str = "external_activity";
    pub const TRIGGER_CANCELLED: &str = "trigger_cancelled";
    pub const TRIGGER_FIRED: &str = "trigger_fired";
    pub const TIMELOCK_RENEWED: &str = "timelock_renewed";
}
