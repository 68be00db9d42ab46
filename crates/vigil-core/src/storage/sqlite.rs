//! SQLite-backed repository implementation.
//!
//! One connection behind a mutex; timestamps are stored as RFC 3339 text
//! and normalized with sqlite's `datetime()` in comparisons. Rows whose
//! stored values cannot be interpreted are skipped (with a warning) in
//! list queries so one corrupt subject cannot take down a whole task run.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::warn;

use super::migrations;
use super::repository::{DeliveryRecord, Repository};
use crate::error::StorageError;
use crate::model::{
    AuditLog, DeliveryEvent, DeliveryStatus, NewAccessCode, NewDeliveryEvent, NewPingHistory,
    NewPingVerification, PingHistory, PingMethod, PingStatus, Recipient, SecretAssignment,
    SecretQuestionSet, Subject,
};

/// SQLite repository for the trigger engine.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
    /// Forces a rollback after both delivery rows are written, before
    /// commit. Exercises the all-or-nothing property.
    #[cfg(test)]
    pub fail_delivery_txn: std::sync::atomic::AtomicBool,
}

impl SqliteRepository {
    /// Open the database at `~/.config/vigil/vigil.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StorageError> {
        let path = super::data_dir()
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?
            .join("vigil.db");
        Self::open_at(&path)
    }

    /// Open the database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(|source| StorageError::OpenFailed {
            path: PathBuf::from(path),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for tests).
    #[cfg(test)]
    pub fn open_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        migrations::migrate(&conn)
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            #[cfg(test)]
            fail_delivery_txn: std::sync::atomic::AtomicBool::new(false),
        })
    }
}

// ── Row mapping ──────────────────────────────────────────────────────

fn parse_ts(entity: &'static str, id: i64, s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::MalformedRow {
            entity,
            id,
            message: format!("bad timestamp '{s}': {e}"),
        })
}

struct RawSubject {
    id: i64,
    email: String,
    telegram_chat_id: Option<String>,
    github_username: Option<String>,
    ping_frequency_days: i64,
    ping_deadline_days: i64,
    ping_method: String,
    pinging_enabled: bool,
    last_activity: String,
    next_scheduled_ping: String,
}

fn raw_subject(row: &Row) -> rusqlite::Result<RawSubject> {
    Ok(RawSubject {
        id: row.get(0)?,
        email: row.get(1)?,
        telegram_chat_id: row.get(2)?,
        github_username: row.get(3)?,
        ping_frequency_days: row.get(4)?,
        ping_deadline_days: row.get(5)?,
        ping_method: row.get(6)?,
        pinging_enabled: row.get(7)?,
        last_activity: row.get(8)?,
        next_scheduled_ping: row.get(9)?,
    })
}

fn parse_subject(raw: RawSubject) -> Result<Subject, StorageError> {
    let method =
        PingMethod::parse(&raw.ping_method).ok_or_else(|| StorageError::MalformedRow {
            entity: "subject",
            id: raw.id,
            message: format!("unknown ping method '{}'", raw.ping_method),
        })?;
    Ok(Subject {
        id: raw.id,
        email: raw.email,
        telegram_chat_id: raw.telegram_chat_id,
        github_username: raw.github_username,
        ping_frequency_days: raw.ping_frequency_days,
        ping_deadline_days: raw.ping_deadline_days,
        ping_method: method,
        pinging_enabled: raw.pinging_enabled,
        last_activity: parse_ts("subject", raw.id, &raw.last_activity)?,
        next_scheduled_ping: parse_ts("subject", raw.id, &raw.next_scheduled_ping)?,
    })
}

const SUBJECT_COLS: &str = "id, email, telegram_chat_id, github_username, ping_frequency_days, \
     ping_deadline_days, ping_method, pinging_enabled, last_activity, next_scheduled_ping";

impl SqliteRepository {
    fn query_subjects(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::types::ToSql],
    ) -> Result<Vec<Subject>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let raws = stmt
            .query_map(args, raw_subject)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);

        let mut subjects = Vec::with_capacity(raws.len());
        for raw in raws {
            match parse_subject(raw) {
                Ok(s) => subjects.push(s),
                // Malformed rows are isolated, not fatal to the scan.
                Err(e) => warn!("skipping malformed subject row: {e}"),
            }
        }
        Ok(subjects)
    }
}

impl Repository for SqliteRepository {
    fn subjects_due_for_ping(&self, now: DateTime<Utc>) -> Result<Vec<Subject>, StorageError> {
        self.query_subjects(
            &format!(
                "SELECT {SUBJECT_COLS} FROM subjects
                 WHERE pinging_enabled = 1
                   AND datetime(next_scheduled_ping) <= datetime(?1)"
            ),
            &[&now.to_rfc3339()],
        )
    }

    fn subjects_past_deadline(&self, now: DateTime<Utc>) -> Result<Vec<Subject>, StorageError> {
        self.query_subjects(
            &format!(
                "SELECT {SUBJECT_COLS} FROM subjects
                 WHERE pinging_enabled = 1
                   AND datetime(last_activity, '+' || ping_deadline_days || ' days')
                       <= datetime(?1)"
            ),
            &[&now.to_rfc3339()],
        )
    }

    fn active_subjects(&self) -> Result<Vec<Subject>, StorageError> {
        self.query_subjects(
            &format!("SELECT {SUBJECT_COLS} FROM subjects WHERE pinging_enabled = 1"),
            &[],
        )
    }

    fn subject_by_id(&self, id: i64) -> Result<Option<Subject>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("SELECT {SUBJECT_COLS} FROM subjects WHERE id = ?1"))?;
        let raw = match stmt.query_row(params![id], raw_subject) {
            Ok(raw) => raw,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        drop(stmt);
        drop(conn);
        parse_subject(raw).map(Some)
    }

    fn update_subject(&self, subject: &Subject) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE subjects SET
                email = ?1, telegram_chat_id = ?2, github_username = ?3,
                ping_frequency_days = ?4, ping_deadline_days = ?5, ping_method = ?6,
                pinging_enabled = ?7, last_activity = ?8, next_scheduled_ping = ?9
             WHERE id = ?10",
            params![
                subject.email,
                subject.telegram_chat_id,
                subject.github_username,
                subject.ping_frequency_days,
                subject.ping_deadline_days,
                subject.ping_method.as_str(),
                subject.pinging_enabled,
                subject.last_activity.to_rfc3339(),
                subject.next_scheduled_ping.to_rfc3339(),
                subject.id,
            ],
        )?;
        Ok(())
    }

    fn create_ping_history(&self, ping: &NewPingHistory) -> Result<i64, StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ping_history (subject_id, method, sent_at, status)
             VALUES (?1, ?2, ?3, 'sent')",
            params![ping.subject_id, ping.method.as_str(), ping.sent_at.to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn latest_ping_history(&self, subject_id: i64) -> Result<Option<PingHistory>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, subject_id, method, sent_at, status, responded_at
             FROM ping_history WHERE subject_id = ?1
             ORDER BY datetime(sent_at) DESC, id DESC LIMIT 1",
        )?;
        let raw = match stmt.query_row(params![subject_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        }) {
            Ok(raw) => raw,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        drop(stmt);
        drop(conn);

        let (id, subject_id, method, sent_at, status, responded_at) = raw;
        let method = PingMethod::parse(&method).ok_or_else(|| StorageError::MalformedRow {
            entity: "ping_history",
            id,
            message: format!("unknown ping method '{method}'"),
        })?;
        let status = PingStatus::parse(&status).ok_or_else(|| StorageError::MalformedRow {
            entity: "ping_history",
            id,
            message: format!("unknown ping status '{status}'"),
        })?;
        Ok(Some(PingHistory {
            id,
            subject_id,
            method,
            sent_at: parse_ts("ping_history", id, &sent_at)?,
            status,
            responded_at: responded_at
                .map(|s| parse_ts("ping_history", id, &s))
                .transpose()?,
        }))
    }

    fn create_ping_verification(
        &self,
        verification: &NewPingVerification,
    ) -> Result<i64, StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO ping_verifications (subject_id, code, expires_at, used)
             VALUES (?1, ?2, ?3, 0)",
            params![
                verification.subject_id,
                verification.code,
                verification.expires_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn recipients_for_subject(&self, subject_id: i64) -> Result<Vec<Recipient>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, subject_id, name, email, farewell_message
             FROM recipients WHERE subject_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![subject_id], |row| {
                Ok(Recipient {
                    id: row.get(0)?,
                    subject_id: row.get(1)?,
                    name: row.get(2)?,
                    email: row.get(3)?,
                    farewell_message: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn assignments_for_recipient(
        &self,
        recipient_id: i64,
    ) -> Result<Vec<SecretAssignment>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, subject_id, secret_id, recipient_id
             FROM secret_assignments WHERE recipient_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![recipient_id], |row| {
                Ok(SecretAssignment {
                    id: row.get(0)?,
                    subject_id: row.get(1)?,
                    secret_id: row.get(2)?,
                    recipient_id: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn assignment_by_id(&self, id: i64) -> Result<Option<SecretAssignment>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, subject_id, secret_id, recipient_id
             FROM secret_assignments WHERE id = ?1",
        )?;
        match stmt.query_row(params![id], |row| {
            Ok(SecretAssignment {
                id: row.get(0)?,
                subject_id: row.get(1)?,
                secret_id: row.get(2)?,
                recipient_id: row.get(3)?,
            })
        }) {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn create_delivery_with_access_code(
        &self,
        delivery: &NewDeliveryEvent,
        code: &NewAccessCode,
    ) -> Result<DeliveryRecord, StorageError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO delivery_events (subject_id, recipient_id, sent_at, status)
             VALUES (?1, ?2, ?3, 'pending')",
            params![
                delivery.subject_id,
                delivery.recipient_id,
                delivery.sent_at.to_rfc3339(),
            ],
        )?;
        let delivery_event_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO access_codes
                (code_hash, recipient_id, subject_id, delivery_event_id,
                 created_at, expires_at, max_attempts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                code.code_hash,
                code.recipient_id,
                code.subject_id,
                delivery_event_id,
                code.created_at.to_rfc3339(),
                code.expires_at.to_rfc3339(),
                code.max_attempts,
            ],
        )?;
        let access_code_id = tx.last_insert_rowid();

        #[cfg(test)]
        if self
            .fail_delivery_txn
            .load(std::sync::atomic::Ordering::Relaxed)
        {
            // Dropping the transaction rolls both inserts back.
            return Err(StorageError::QueryFailed(
                "injected failure before commit".to_string(),
            ));
        }

        tx.commit()?;
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
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE delivery_events SET status = ?1, error = ?2 WHERE id = ?3",
            params![status.as_str(), error, delivery_event_id],
        )?;
        Ok(())
    }

    fn delivery_events_for_subject(
        &self,
        subject_id: i64,
    ) -> Result<Vec<DeliveryEvent>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, subject_id, recipient_id, sent_at, status, error
             FROM delivery_events WHERE subject_id = ?1 ORDER BY id",
        )?;
        let raws = stmt
            .query_map(params![subject_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);

        let mut events = Vec::with_capacity(raws.len());
        for (id, subject_id, recipient_id, sent_at, status, error) in raws {
            let status =
                DeliveryStatus::parse(&status).ok_or_else(|| StorageError::MalformedRow {
                    entity: "delivery_event",
                    id,
                    message: format!("unknown delivery status '{status}'"),
                })?;
            events.push(DeliveryEvent {
                id,
                subject_id,
                recipient_id,
                sent_at: parse_ts("delivery_event", id, &sent_at)?,
                status,
                error,
            });
        }
        Ok(events)
    }

    fn append_audit(
        &self,
        subject_id: i64,
        action: &str,
        details: &str,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO audit_log (subject_id, action, at, details)
             VALUES (?1, ?2, ?3, ?4)",
            params![subject_id, action, Utc::now().to_rfc3339(), details],
        )?;
        Ok(())
    }

    fn audit_for_subject(&self, subject_id: i64) -> Result<Vec<AuditLog>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, subject_id, action, at, details
             FROM audit_log WHERE subject_id = ?1 ORDER BY id",
        )?;
        let raws = stmt
            .query_map(params![subject_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);

        let mut entries = Vec::with_capacity(raws.len());
        for (id, subject_id, action, at, details) in raws {
            entries.push(AuditLog {
                id,
                subject_id,
                action,
                at: parse_ts("audit_log", id, &at)?,
                details,
            });
        }
        Ok(entries)
    }

    fn question_sets_unlocking_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SecretQuestionSet>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, assignment_id, threshold, sealed_blob, round, unlock_at
             FROM secret_question_sets
             WHERE datetime(unlock_at) <= datetime(?1) ORDER BY id",
        )?;
        let raws = stmt
            .query_map(params![cutoff.to_rfc3339()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);

        let mut sets = Vec::with_capacity(raws.len());
        for (id, assignment_id, threshold, sealed_blob, round, unlock_at) in raws {
            let round = u64::try_from(round).map_err(|_| StorageError::MalformedRow {
                entity: "secret_question_set",
                id,
                message: format!("negative round {round}"),
            })?;
            sets.push(SecretQuestionSet {
                id,
                assignment_id,
                threshold,
                sealed_blob,
                round,
                unlock_at: parse_ts("secret_question_set", id, &unlock_at)?,
            });
        }
        Ok(sets)
    }

    fn update_question_set(&self, set: &SecretQuestionSet) -> Result<(), StorageError> {
        let round = i64::try_from(set.round).map_err(|_| {
            StorageError::QueryFailed(format!("round {} out of storage range", set.round))
        })?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE secret_question_sets
             SET sealed_blob = ?1, round = ?2, unlock_at = ?3 WHERE id = ?4",
            params![set.sealed_blob, round, set.unlock_at.to_rfc3339(), set.id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn insert_subject(repo: &SqliteRepository, last_activity: DateTime<Utc>) -> i64 {
        let conn = repo.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO subjects
                (email, ping_frequency_days, ping_deadline_days, ping_method,
                 pinging_enabled, last_activity, next_scheduled_ping)
             VALUES ('s@example.com', 3, 14, 'email', 1, ?1, ?2)",
            params![
                last_activity.to_rfc3339(),
                (last_activity + Duration::days(3)).to_rfc3339()
            ],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn insert_recipient(repo: &SqliteRepository, subject_id: i64) -> i64 {
        let conn = repo.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO recipients (subject_id, name, email, farewell_message)
             VALUES (?1, 'R', 'r@example.com', 'goodbye')",
            params![subject_id],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn open_at_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.db");
        let now = Utc::now();

        let id = {
            let repo = SqliteRepository::open_at(&path).unwrap();
            insert_subject(&repo, now)
        };

        let repo = SqliteRepository::open_at(&path).unwrap();
        let subject = repo.subject_by_id(id).unwrap().unwrap();
        assert_eq!(subject.email, "s@example.com");
    }

    #[test]
    fn due_for_ping_honors_next_scheduled_ping() {
        let repo = SqliteRepository::open_memory().unwrap();
        let now = Utc::now();
        // next ping = last_activity + 3d, so a subject active 4 days ago is due
        insert_subject(&repo, now - Duration::days(4));
        // and one active yesterday is not
        insert_subject(&repo, now - Duration::days(1));

        let due = repo.subjects_due_for_ping(now).unwrap();
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn past_deadline_uses_last_activity_plus_deadline() {
        let repo = SqliteRepository::open_memory().unwrap();
        let now = Utc::now();
        let overdue = insert_subject(&repo, now - Duration::days(15));
        insert_subject(&repo, now - Duration::days(13));

        let past = repo.subjects_past_deadline(now).unwrap();
        assert_eq!(past.len(), 1);
        assert_eq!(past[0].id, overdue);
    }

    #[test]
    fn disabled_subjects_never_selected() {
        let repo = SqliteRepository::open_memory().unwrap();
        let now = Utc::now();
        let id = insert_subject(&repo, now - Duration::days(20));
        let mut subject = repo.subject_by_id(id).unwrap().unwrap();
        subject.pinging_enabled = false;
        repo.update_subject(&subject).unwrap();

        assert!(repo.subjects_due_for_ping(now).unwrap().is_empty());
        assert!(repo.subjects_past_deadline(now).unwrap().is_empty());
        assert!(repo.active_subjects().unwrap().is_empty());
    }

    #[test]
    fn malformed_subject_row_is_skipped_not_fatal() {
        let repo = SqliteRepository::open_memory().unwrap();
        let now = Utc::now();
        insert_subject(&repo, now - Duration::days(4));
        {
            let conn = repo.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO subjects
                    (email, ping_frequency_days, ping_deadline_days, ping_method,
                     pinging_enabled, last_activity, next_scheduled_ping)
                 VALUES ('bad@example.com', 3, 14, 'email', 1, 'not-a-date', 'also-bad')",
                [],
            )
            .unwrap();
        }

        let due = repo.subjects_due_for_ping(now).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].email, "s@example.com");
    }

    #[test]
    fn latest_ping_history_returns_most_recent() {
        let repo = SqliteRepository::open_memory().unwrap();
        let now = Utc::now();
        let id = insert_subject(&repo, now);
        repo.create_ping_history(&NewPingHistory {
            subject_id: id,
            method: PingMethod::Email,
            sent_at: now - Duration::hours(20),
        })
        .unwrap();
        let newest = repo
            .create_ping_history(&NewPingHistory {
                subject_id: id,
                method: PingMethod::Chat,
                sent_at: now - Duration::hours(2),
            })
            .unwrap();

        let latest = repo.latest_ping_history(id).unwrap().unwrap();
        assert_eq!(latest.id, newest);
        assert_eq!(latest.method, PingMethod::Chat);
        assert_eq!(latest.status, PingStatus::Sent);
    }

    #[test]
    fn delivery_and_access_code_commit_together() {
        let repo = SqliteRepository::open_memory().unwrap();
        let now = Utc::now();
        let subject_id = insert_subject(&repo, now);
        let recipient_id = insert_recipient(&repo, subject_id);

        let record = repo
            .create_delivery_with_access_code(
                &NewDeliveryEvent {
                    subject_id,
                    recipient_id,
                    sent_at: now,
                },
                &NewAccessCode {
                    code_hash: "abc123".into(),
                    recipient_id,
                    subject_id,
                    created_at: now,
                    expires_at: now + Duration::days(30),
                    max_attempts: 5,
                },
            )
            .unwrap();

        let events = repo.delivery_events_for_subject(subject_id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, record.delivery_event_id);
        assert_eq!(events[0].status, DeliveryStatus::Pending);

        let conn = repo.conn.lock().unwrap();
        let bound: i64 = conn
            .query_row(
                "SELECT delivery_event_id FROM access_codes WHERE id = ?1",
                params![record.access_code_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(bound, record.delivery_event_id);
    }

    #[test]
    fn failed_delivery_txn_leaves_no_rows() {
        let repo = SqliteRepository::open_memory().unwrap();
        let now = Utc::now();
        let subject_id = insert_subject(&repo, now);
        let recipient_id = insert_recipient(&repo, subject_id);

        repo.fail_delivery_txn
            .store(true, std::sync::atomic::Ordering::Relaxed);
        let result = repo.create_delivery_with_access_code(
            &NewDeliveryEvent {
                subject_id,
                recipient_id,
                sent_at: now,
            },
            &NewAccessCode {
                code_hash: "abc123".into(),
                recipient_id,
                subject_id,
                created_at: now,
                expires_at: now + Duration::days(30),
                max_attempts: 5,
            },
        );
        assert!(result.is_err());

        assert!(repo.delivery_events_for_subject(subject_id).unwrap().is_empty());
        let conn = repo.conn.lock().unwrap();
        let codes: i64 = conn
            .query_row("SELECT COUNT(*) FROM access_codes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(codes, 0);
    }

    #[test]
    fn question_set_renewal_roundtrip() {
        let repo = SqliteRepository::open_memory().unwrap();
        let now = Utc::now();
        let subject_id = insert_subject(&repo, now);
        let recipient_id = insert_recipient(&repo, subject_id);
        {
            let conn = repo.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO secret_assignments (subject_id, secret_id, recipient_id)
                 VALUES (?1, 1, ?2)",
                params![subject_id, recipient_id],
            )
            .unwrap();
            let assignment_id = conn.last_insert_rowid();
            conn.execute(
                "INSERT INTO secret_question_sets
                    (assignment_id, threshold, sealed_blob, round, unlock_at)
                 VALUES (?1, 2, X'0102', 7, ?2)",
                params![assignment_id, (now + Duration::hours(3)).to_rfc3339()],
            )
            .unwrap();
        }

        let expiring = repo
            .question_sets_unlocking_before(now + Duration::hours(24))
            .unwrap();
        assert_eq!(expiring.len(), 1);
        let mut set = expiring.into_iter().next().unwrap();
        assert_eq!(set.round, 7);

        set.sealed_blob = vec![9, 9, 9];
        set.round = 8;
        set.unlock_at = now + Duration::days(14);
        repo.update_question_set(&set).unwrap();

        assert!(repo
            .question_sets_unlocking_before(now + Duration::hours(24))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn negative_round_surfaces_as_malformed_row() {
        let repo = SqliteRepository::open_memory().unwrap();
        let now = Utc::now();
        let subject_id = insert_subject(&repo, now);
        let recipient_id = insert_recipient(&repo, subject_id);
        {
            let conn = repo.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO secret_assignments (subject_id, secret_id, recipient_id)
                 VALUES (?1, 1, ?2)",
                params![subject_id, recipient_id],
            )
            .unwrap();
            let assignment_id = conn.last_insert_rowid();
            conn.execute(
                "INSERT INTO secret_question_sets
                    (assignment_id, threshold, sealed_blob, round, unlock_at)
                 VALUES (?1, 2, X'0102', -3, ?2)",
                params![assignment_id, (now + Duration::hours(3)).to_rfc3339()],
            )
            .unwrap();
        }

        let err = repo
            .question_sets_unlocking_before(now + Duration::hours(24))
            .unwrap_err();
        assert!(matches!(err, StorageError::MalformedRow { entity: "secret_question_set", .. }));
    }

    #[test]
    fn audit_appends_and_lists() {
        let repo = SqliteRepository::open_memory().unwrap();
        let id = insert_subject(&repo, Utc::now());
        repo.append_audit(id, "trigger_fired", "test details").unwrap();
        let entries = repo.audit_for_subject(id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "trigger_fired");
    }
}
