//! Database schema migrations for vigil.
//!
//! Migrations are versioned and applied automatically when opening the
//! database. The `schema_version` table tracks the current version.

use rusqlite::{Connection, Result as SqliteResult};

/// Apply all pending migrations.
///
/// # Errors
/// Returns an error if a migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 if no version is set (initial database).
fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or(0)
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: baseline schema for the trigger engine.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS subjects (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            email               TEXT NOT NULL,
            telegram_chat_id    TEXT,
            github_username     TEXT,
            ping_frequency_days INTEGER NOT NULL,
            ping_deadline_days  INTEGER NOT NULL,
            ping_method         TEXT NOT NULL DEFAULT 'email',
            pinging_enabled     INTEGER NOT NULL DEFAULT 1,
            last_activity       TEXT NOT NULL,
            next_scheduled_ping TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ping_history (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id   INTEGER NOT NULL REFERENCES subjects(id),
            method       TEXT NOT NULL,
            sent_at      TEXT NOT NULL,
            status       TEXT NOT NULL DEFAULT 'sent',
            responded_at TEXT
        );

        CREATE TABLE IF NOT EXISTS ping_verifications (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id INTEGER NOT NULL REFERENCES subjects(id),
            code       TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            used       INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS recipients (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id       INTEGER NOT NULL REFERENCES subjects(id),
            name             TEXT NOT NULL,
            email            TEXT NOT NULL,
            farewell_message TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS secret_assignments (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id   INTEGER NOT NULL REFERENCES subjects(id),
            secret_id    INTEGER NOT NULL,
            recipient_id INTEGER NOT NULL REFERENCES recipients(id)
        );

        CREATE TABLE IF NOT EXISTS delivery_events (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id   INTEGER NOT NULL REFERENCES subjects(id),
            recipient_id INTEGER NOT NULL REFERENCES recipients(id),
            sent_at      TEXT NOT NULL,
            status       TEXT NOT NULL DEFAULT 'pending',
            error        TEXT
        );

        CREATE TABLE IF NOT EXISTS access_codes (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            code_hash         TEXT NOT NULL,
            recipient_id      INTEGER NOT NULL REFERENCES recipients(id),
            subject_id        INTEGER NOT NULL REFERENCES subjects(id),
            delivery_event_id INTEGER NOT NULL REFERENCES delivery_events(id),
            created_at        TEXT NOT NULL,
            expires_at        TEXT NOT NULL,
            max_attempts      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id INTEGER NOT NULL,
            action     TEXT NOT NULL,
            at         TEXT NOT NULL,
            details    TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS secret_question_sets (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            assignment_id INTEGER NOT NULL REFERENCES secret_assignments(id),
            threshold     INTEGER NOT NULL,
            sealed_blob   BLOB NOT NULL,
            round         INTEGER NOT NULL,
            unlock_at     TEXT NOT NULL
        );",
    )?;
    set_schema_version(conn, 1)?;
    Ok(())
}

/// Migration v2: indexes for the due/deadline scans and history lookups.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_subjects_next_ping
             ON subjects(pinging_enabled, next_scheduled_ping);
         CREATE INDEX IF NOT EXISTS idx_ping_history_subject_sent
             ON ping_history(subject_id, sent_at);
         CREATE INDEX IF NOT EXISTS idx_delivery_events_subject
             ON delivery_events(subject_id);
         CREATE INDEX IF NOT EXISTS idx_access_codes_delivery
             ON access_codes(delivery_event_id);
         CREATE INDEX IF NOT EXISTS idx_question_sets_unlock
             ON secret_question_sets(unlock_at);",
    )?;
    set_schema_version(conn, 2)?;
    Ok(())
}
