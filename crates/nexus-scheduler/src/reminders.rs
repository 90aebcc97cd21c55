//! Dedicated reminder persistence (spec §3, §6.3) — distinct from the
//! generic `jobs` table the teacher's [`crate::engine`] polls.
//!
//! `jobs` remains the substrate for ad-hoc scheduled actions (see
//! `reminder.rs`'s existing `Schedule`-based path); this module gives the
//! `Reminder` record its own table and lifecycle so the exactly-once firing
//! contract (§4.7, testable property #7) is expressed directly as a
//! `status`-guarded `UPDATE`, matching the teacher's `SchedulerHandle`
//! connection-cache pattern in `engine.rs`.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::cron::compute_next_run;
use crate::error::{Result, SchedulerError};

/// Lifecycle state of a reminder (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Pending,
    Sent,
    Cancelled,
    Failed,
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Sent => "sent",
            ReminderStatus::Cancelled => "cancelled",
            ReminderStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ReminderStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReminderStatus::Pending),
            "sent" => Ok(ReminderStatus::Sent),
            "cancelled" => Ok(ReminderStatus::Cancelled),
            "failed" => Ok(ReminderStatus::Failed),
            other => Err(format!("unknown reminder status: {other}")),
        }
    }
}

/// A persisted reminder (§3). Delivery-routing fields (`channel`,
/// `channel_id`, `session_key`, `image_url`, `bash_command`) are not part of
/// spec's minimal data model but are required to actually deliver the
/// reminder back through the owning channel (§4.7 "re-entry") — the same
/// need the teacher's `ReminderAction` struct (`nexus-core::reminder`) fills
/// for the generic `jobs` path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub thread_id: String,
    pub message: String,
    pub due_time: DateTime<Utc>,
    /// Raw recurrence expression (5-field cron, `@daily`-style shortcut, or
    /// `daily at HH:MM`) resolved via [`compute_next_run`] when it fires.
    pub recurrence: Option<String>,
    pub timezone: Option<String>,
    pub status: ReminderStatus,
    pub created_at: DateTime<Utc>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub channel: String,
    pub channel_id: Option<u64>,
    pub session_key: Option<String>,
    pub image_url: Option<String>,
    pub bash_command: Option<String>,
}

/// Arguments for creating a new reminder; grouped to keep `create()` readable.
#[derive(Debug, Clone, Default)]
pub struct NewReminder {
    pub thread_id: String,
    pub message: String,
    pub due_time: DateTime<Utc>,
    pub recurrence: Option<String>,
    pub timezone: Option<String>,
    pub channel: String,
    pub channel_id: Option<u64>,
    pub session_key: Option<String>,
    pub image_url: Option<String>,
    pub bash_command: Option<String>,
}

pub struct ReminderStore {
    conn: Arc<Mutex<Connection>>,
}

impl ReminderStore {
    /// Build a store over an already-open shared connection, initialising
    /// the `reminders` table if needed.
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        {
            let guard = conn.lock().unwrap();
            init_reminders_table(&guard)?;
        }
        Ok(Self { conn })
    }

    /// Open a dedicated connection to `path`, for use from the scheduler's
    /// own polling loop (kept separate from [`SchedulerHandle`]'s connection
    /// so the tick loop and management API never contend on the same
    /// `Mutex`, matching the teacher's two-connections-one-file pattern).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_reminders_table(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn create(&self, new: NewReminder) -> Result<Reminder> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO reminders
             (id, thread_id, message, due_time, recurrence, timezone, status,
              created_at, last_fired_at, channel, channel_id, session_key,
              image_url, bash_command)
             VALUES (?1,?2,?3,?4,?5,?6,'pending',?7,NULL,?8,?9,?10,?11,?12)",
            params![
                id,
                new.thread_id,
                new.message,
                new.due_time.to_rfc3339(),
                new.recurrence,
                new.timezone,
                now.to_rfc3339(),
                new.channel,
                new.channel_id.map(|v| v as i64),
                new.session_key,
                new.image_url,
                new.bash_command,
            ],
        )?;
        info!(reminder_id = %id, thread_id = %new.thread_id, "reminder created");
        Ok(Reminder {
            id,
            thread_id: new.thread_id,
            message: new.message,
            due_time: new.due_time,
            recurrence: new.recurrence,
            timezone: new.timezone,
            status: ReminderStatus::Pending,
            created_at: now,
            last_fired_at: None,
            channel: new.channel,
            channel_id: new.channel_id,
            session_key: new.session_key,
            image_url: new.image_url,
            bash_command: new.bash_command,
        })
    }

    pub fn list_for_thread(&self, thread_id: &str) -> Result<Vec<Reminder>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, thread_id, message, due_time, recurrence, timezone, status,
                    created_at, last_fired_at, channel, channel_id, session_key,
                    image_url, bash_command
             FROM reminders WHERE thread_id = ?1 ORDER BY due_time",
        )?;
        let rows = stmt
            .query_map(params![thread_id], row_to_reminder)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Reminders whose `due_time` has arrived and are still `pending`.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, thread_id, message, due_time, recurrence, timezone, status,
                    created_at, last_fired_at, channel, channel_id, session_key,
                    image_url, bash_command
             FROM reminders WHERE status = 'pending' AND due_time <= ?1",
        )?;
        let rows = stmt
            .query_map(params![now.to_rfc3339()], row_to_reminder)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Atomically transition `pending -> sent`. Returns `false` if another
    /// worker already claimed it (testable property #7: no two workers mark
    /// the same reminder `sent`).
    pub fn try_claim_sent(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE reminders SET status = 'sent', last_fired_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![at.to_rfc3339(), id],
        )?;
        Ok(n == 1)
    }

    pub fn mark_failed(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE reminders SET status = 'failed' WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        Ok(n == 1)
    }

    /// Cancel a still-pending reminder. No-op (but not an error) if it
    /// already fired or was already cancelled.
    pub fn cancel(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE reminders SET status = 'cancelled' WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        if n == 0 {
            // Distinguish "not found" from "already terminal" for the caller's message.
            let exists: Option<String> = conn
                .query_row("SELECT id FROM reminders WHERE id = ?1", params![id], |r| {
                    r.get(0)
                })
                .optional()?;
            if exists.is_none() {
                return Err(SchedulerError::JobNotFound { id: id.to_string() });
            }
        }
        Ok(())
    }

    /// Insert a successor row for a recurring reminder. Spec §4.7 requires
    /// this happen *before* the firing row's own terminal transition — the
    /// caller is responsible for sequencing the two calls.
    pub fn create_successor(&self, from: &Reminder, next_due: DateTime<Utc>) -> Result<Reminder> {
        self.create(NewReminder {
            thread_id: from.thread_id.clone(),
            message: from.message.clone(),
            due_time: next_due,
            recurrence: from.recurrence.clone(),
            timezone: from.timezone.clone(),
            channel: from.channel.clone(),
            channel_id: from.channel_id,
            session_key: from.session_key.clone(),
            image_url: from.image_url.clone(),
            bash_command: from.bash_command.clone(),
        })
    }

    /// Resolve `recurrence` into the next fire time strictly after `from`,
    /// degrading unrecognized expressions per §4.7/§6.4 (never `None`).
    pub fn next_recurrence(recurrence: &str, from: DateTime<Utc>) -> DateTime<Utc> {
        compute_next_run(recurrence, from)
    }
}

fn row_to_reminder(row: &rusqlite::Row) -> rusqlite::Result<Reminder> {
    let due_time: String = row.get(3)?;
    let created_at: String = row.get(7)?;
    let last_fired_at: Option<String> = row.get(8)?;
    let status_str: String = row.get(6)?;
    let channel_id: Option<i64> = row.get(10)?;
    Ok(Reminder {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        message: row.get(2)?,
        due_time: DateTime::parse_from_rfc3339(&due_time)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        recurrence: row.get(4)?,
        timezone: row.get(5)?,
        status: status_str.parse().unwrap_or(ReminderStatus::Failed),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        last_fired_at: last_fired_at.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|d| d.with_timezone(&Utc))
        }),
        channel: row.get(9)?,
        channel_id: channel_id.map(|v| v as u64),
        session_key: row.get(11)?,
        image_url: row.get(12)?,
        bash_command: row.get(13)?,
    })
}

fn init_reminders_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS reminders (
            id           TEXT NOT NULL PRIMARY KEY,
            thread_id    TEXT NOT NULL,
            message      TEXT NOT NULL,
            due_time     TEXT NOT NULL,
            recurrence   TEXT,
            timezone     TEXT,
            status       TEXT NOT NULL DEFAULT 'pending',
            created_at   TEXT NOT NULL,
            last_fired_at TEXT,
            channel      TEXT NOT NULL,
            channel_id   INTEGER,
            session_key  TEXT,
            image_url    TEXT,
            bash_command TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_reminders_due
            ON reminders (status, due_time);
        CREATE INDEX IF NOT EXISTS idx_reminders_thread
            ON reminders (thread_id);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ReminderStore {
        let conn = Connection::open_in_memory().unwrap();
        ReminderStore::new(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn create_and_claim_is_exactly_once() {
        let store = store();
        let r = store
            .create(NewReminder {
                thread_id: "discord:1".into(),
                message: "stretch".into(),
                due_time: Utc::now() - chrono::Duration::seconds(1),
                channel: "discord".into(),
                ..Default::default()
            })
            .unwrap();

        let due = store.due(Utc::now()).unwrap();
        assert_eq!(due.len(), 1);

        let now = Utc::now();
        assert!(store.try_claim_sent(&r.id, now).unwrap());
        // Second claim attempt must fail — exactly-once (property #7).
        assert!(!store.try_claim_sent(&r.id, now).unwrap());

        let due_after = store.due(Utc::now()).unwrap();
        assert!(due_after.is_empty());
    }

    #[test]
    fn cancel_on_never_fired_is_idempotent_no_op_after_first() {
        let store = store();
        let r = store
            .create(NewReminder {
                thread_id: "discord:1".into(),
                message: "hi".into(),
                due_time: Utc::now() + chrono::Duration::seconds(60),
                channel: "discord".into(),
                ..Default::default()
            })
            .unwrap();
        store.cancel(&r.id).unwrap();
        let due = store.due(Utc::now() + chrono::Duration::seconds(120)).unwrap();
        assert!(due.is_empty());
    }

    #[test]
    fn recurring_successor_due_time_strictly_advances() {
        let store = store();
        let from = store
            .create(NewReminder {
                thread_id: "discord:1".into(),
                message: "daily check-in".into(),
                due_time: Utc::now() - chrono::Duration::seconds(1),
                recurrence: Some("@daily".into()),
                channel: "discord".into(),
                ..Default::default()
            })
            .unwrap();
        let now = Utc::now();
        let next = ReminderStore::next_recurrence(from.recurrence.as_deref().unwrap(), now);
        assert!(next > now);
        let successor = store.create_successor(&from, next).unwrap();
        assert_ne!(successor.id, from.id);
        assert_eq!(successor.status, ReminderStatus::Pending);
    }
}
