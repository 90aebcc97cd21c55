//! `ScheduledFlow` persistence (spec §3, §4.7, §4.8, §6.3).
//!
//! Mirrors [`crate::reminders::ReminderStore`]'s shape: its own table, an
//! atomic `pending -> running` claim for exactly-once firing, and explicit
//! successor-row creation for recurring flows *before* the firing row is
//! marked terminal (testable property #8).

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, SchedulerError};

/// Lifecycle state of a scheduled flow (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FlowStatus::Pending => "pending",
            FlowStatus::Running => "running",
            FlowStatus::Completed => "completed",
            FlowStatus::Failed => "failed",
            FlowStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FlowStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FlowStatus::Pending),
            "running" => Ok(FlowStatus::Running),
            "completed" => Ok(FlowStatus::Completed),
            "failed" => Ok(FlowStatus::Failed),
            "cancelled" => Ok(FlowStatus::Cancelled),
            other => Err(format!("unknown flow status: {other}")),
        }
    }
}

/// A persisted scheduled flow (§3). `flow_spec` is the serialized
/// `FlowSpec` JSON; `result` is populated on completion with
/// `{"results":[{agent_id,status,output}...]}` per §4.8.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledFlow {
    pub id: String,
    pub owner_user: String,
    pub thread_id: String,
    pub name: String,
    pub flow_spec: String,
    pub due_time: DateTime<Utc>,
    pub cron: Option<String>,
    pub status: FlowStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewScheduledFlow {
    pub owner_user: String,
    pub thread_id: String,
    pub name: String,
    pub flow_spec: String,
    pub due_time: DateTime<Utc>,
    pub cron: Option<String>,
}

#[derive(Clone)]
pub struct ScheduledFlowStore {
    conn: Arc<Mutex<Connection>>,
}

impl ScheduledFlowStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        {
            let guard = conn.lock().unwrap();
            init_flows_table(&guard)?;
        }
        Ok(Self { conn })
    }

    /// Open a dedicated connection, for the scheduler's own polling loop.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_flows_table(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn create(&self, new: NewScheduledFlow) -> Result<ScheduledFlow> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO scheduled_flows
             (id, owner_user, thread_id, name, flow_spec, due_time, cron,
              status, result, error, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,'pending',NULL,NULL,?8,?8)",
            params![
                id,
                new.owner_user,
                new.thread_id,
                new.name,
                new.flow_spec,
                new.due_time.to_rfc3339(),
                new.cron,
                now.to_rfc3339(),
            ],
        )?;
        info!(flow_id = %id, name = %new.name, "scheduled flow created");
        Ok(ScheduledFlow {
            id,
            owner_user: new.owner_user,
            thread_id: new.thread_id,
            name: new.name,
            flow_spec: new.flow_spec,
            due_time: new.due_time,
            cron: new.cron,
            status: FlowStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<ScheduledFlow>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, owner_user, thread_id, name, flow_spec, due_time, cron,
                    status, result, error, created_at, updated_at
             FROM scheduled_flows WHERE id = ?1",
            params![id],
            row_to_flow,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_for_owner(&self, owner_user: &str) -> Result<Vec<ScheduledFlow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, owner_user, thread_id, name, flow_spec, due_time, cron,
                    status, result, error, created_at, updated_at
             FROM scheduled_flows WHERE owner_user = ?1 ORDER BY due_time",
        )?;
        let rows = stmt
            .query_map(params![owner_user], row_to_flow)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Flows whose `due_time` has arrived and are still `pending`.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledFlow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, owner_user, thread_id, name, flow_spec, due_time, cron,
                    status, result, error, created_at, updated_at
             FROM scheduled_flows WHERE status = 'pending' AND due_time <= ?1",
        )?;
        let rows = stmt
            .query_map(params![now.to_rfc3339()], row_to_flow)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Atomically transition `pending -> running`. `false` means another
    /// worker already claimed it.
    pub fn try_claim_running(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE scheduled_flows SET status = 'running', updated_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(n == 1)
    }

    pub fn mark_completed(&self, id: &str, result_json: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scheduled_flows SET status = 'completed', result = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'running'",
            params![result_json, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scheduled_flows SET status = 'failed', error = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'running'",
            params![error, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn cancel(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE scheduled_flows SET status = 'cancelled', updated_at = ?1
             WHERE id = ?2 AND status IN ('pending','running')",
            params![Utc::now().to_rfc3339(), id],
        )?;
        if n == 0 {
            let exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM scheduled_flows WHERE id = ?1",
                    params![id],
                    |r| r.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(SchedulerError::JobNotFound { id: id.to_string() });
            }
        }
        Ok(())
    }

    /// Permanently remove a flow row regardless of status. Returns `false`
    /// when no row matched (caller decides whether that's an error).
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM scheduled_flows WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// Insert a successor row for a recurring flow. Per §4.7, the caller
    /// must call this *before* [`Self::mark_completed`] on the firing row so
    /// a crash between the two still leaves exactly one successor with a
    /// strictly later `due_time` (property #8).
    pub fn create_successor(&self, from: &ScheduledFlow, next_due: DateTime<Utc>) -> Result<ScheduledFlow> {
        self.create(NewScheduledFlow {
            owner_user: from.owner_user.clone(),
            thread_id: from.thread_id.clone(),
            name: from.name.clone(),
            flow_spec: from.flow_spec.clone(),
            due_time: next_due,
            cron: from.cron.clone(),
        })
    }
}

fn row_to_flow(row: &rusqlite::Row) -> rusqlite::Result<ScheduledFlow> {
    let due_time: String = row.get(5)?;
    let status_str: String = row.get(7)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;
    Ok(ScheduledFlow {
        id: row.get(0)?,
        owner_user: row.get(1)?,
        thread_id: row.get(2)?,
        name: row.get(3)?,
        flow_spec: row.get(4)?,
        due_time: DateTime::parse_from_rfc3339(&due_time)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        cron: row.get(6)?,
        status: status_str.parse().unwrap_or(FlowStatus::Failed),
        result: row.get(8)?,
        error: row.get(9)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn init_flows_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduled_flows (
            id          TEXT NOT NULL PRIMARY KEY,
            owner_user  TEXT NOT NULL,
            thread_id   TEXT NOT NULL,
            name        TEXT NOT NULL,
            flow_spec   TEXT NOT NULL,
            due_time    TEXT NOT NULL,
            cron        TEXT,
            status      TEXT NOT NULL DEFAULT 'pending',
            result      TEXT,
            error       TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_scheduled_flows_due
            ON scheduled_flows (status, due_time);
        CREATE INDEX IF NOT EXISTS idx_scheduled_flows_owner
            ON scheduled_flows (owner_user);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ScheduledFlowStore {
        let conn = Connection::open_in_memory().unwrap();
        ScheduledFlowStore::new(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn claim_is_exactly_once() {
        let store = store();
        let f = store
            .create(NewScheduledFlow {
                owner_user: "user:1".into(),
                thread_id: "discord:1".into(),
                name: "morning-briefing".into(),
                flow_spec: "{}".into(),
                due_time: Utc::now() - chrono::Duration::seconds(1),
                cron: None,
            })
            .unwrap();
        assert!(store.try_claim_running(&f.id).unwrap());
        assert!(!store.try_claim_running(&f.id).unwrap());
        store.mark_completed(&f.id, r#"{"results":[]}"#).unwrap();
        let reloaded = store.get(&f.id).unwrap().unwrap();
        assert_eq!(reloaded.status, FlowStatus::Completed);
    }

    #[test]
    fn recurring_chain_has_exactly_one_successor() {
        let store = store();
        let f = store
            .create(NewScheduledFlow {
                owner_user: "user:1".into(),
                thread_id: "discord:1".into(),
                name: "daily-digest".into(),
                flow_spec: "{}".into(),
                due_time: Utc::now() - chrono::Duration::seconds(1),
                cron: Some("@daily".into()),
            })
            .unwrap();
        store.try_claim_running(&f.id).unwrap();
        let completed_at = Utc::now();
        let next_due = crate::cron::compute_next_run(f.cron.as_deref().unwrap(), completed_at);
        let successor = store.create_successor(&f, next_due).unwrap();
        store.mark_completed(&f.id, "{}").unwrap();

        let owned = store.list_for_owner("user:1").unwrap();
        let successors: Vec<_> = owned
            .iter()
            .filter(|r| r.id != f.id && r.status == FlowStatus::Pending)
            .collect();
        assert_eq!(successors.len(), 1);
        assert_eq!(successors[0].id, successor.id);
        assert!(successors[0].due_time > completed_at);
    }
}
