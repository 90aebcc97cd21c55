//! `AgentState` (§3) — the per-thread checkpointed state the reasoning loop
//! (C4) reads and writes at every node transition, plus the checkpoint
//! store (§6.3 `checkpoints` table) that persists it.
//!
//! Messages are kept as `serde_json::Value` rather than a typed enum: the
//! loop's wire format already has to round-trip whatever shape the active
//! `LlmProvider` emits (text blocks, `tool_use`, `tool_result`), and
//! `nexus-agent` owns that shape. Keeping `AgentState` provider-agnostic
//! here avoids a circular crate dependency while still giving the scheduler
//! and storage layers a concrete type to checkpoint.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{NexusError, Result};

/// One message in the conversation, in the raw wire shape the provider
/// expects (role + content blocks). `message_id` is used by the reducer to
/// deduplicate on replay (§3 "the reducer deduplicates by message_id and
/// preserves order").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMessage {
    pub message_id: String,
    pub role: String,
    pub content: serde_json::Value,
}

/// Structured summary produced by the `summarize` node (§4.4), split into
/// active (still relevant) and inactive (archived) topics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuredSummary {
    pub active_topics: Vec<String>,
    pub inactive_topics: Vec<String>,
    pub text: String,
}

/// Which node of the reasoning-loop state machine a checkpoint was taken
/// at. Sum-typed per §9's "graph nodes referenced by string names" →
/// "sum-typed states" re-architecture note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopNode {
    Agent,
    Tools,
    Summarize,
    End,
}

impl std::fmt::Display for LoopNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopNode::Agent => write!(f, "agent"),
            LoopNode::Tools => write!(f, "tools"),
            LoopNode::Summarize => write!(f, "summarize"),
            LoopNode::End => write!(f, "end"),
        }
    }
}

impl std::str::FromStr for LoopNode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "agent" => Ok(LoopNode::Agent),
            "tools" => Ok(LoopNode::Tools),
            "summarize" => Ok(LoopNode::Summarize),
            "end" => Ok(LoopNode::End),
            other => Err(format!("unknown loop node: {other}")),
        }
    }
}

/// Per-thread reasoning-loop state (§3). Checkpointed after every node
/// transition, keyed by `(workspace_id, thread_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub messages: Vec<StateMessage>,
    pub structured_summary: Option<StructuredSummary>,
    /// Reasoning cycles since the last user input. Incremented only on the
    /// `agent` node (§4.4 "Iteration counter increments only on the agent
    /// node, not on tools").
    pub iterations: u32,
    pub user_id: String,
    pub channel: String,
    pub task_state: Option<serde_json::Value>,
    /// The node this snapshot was captured at — the unit of crash recovery
    /// (§4.4 "on restart, the loop resumes at the last persisted node").
    pub node: LoopNode,
}

impl AgentState {
    pub fn new(user_id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            structured_summary: None,
            iterations: 0,
            user_id: user_id.into(),
            channel: channel.into(),
            task_state: None,
            node: LoopNode::Agent,
        }
    }

    /// Append a message, deduplicating by `message_id` and preserving
    /// arrival order of the first occurrence (§3 reducer contract).
    pub fn append_message(&mut self, msg: StateMessage) {
        if self.messages.iter().any(|m| m.message_id == msg.message_id) {
            return;
        }
        self.messages.push(msg);
    }
}

/// Atomic per-(workspace, thread) checkpoint store backed by SQLite
/// (§6.3 `checkpoints` table, keyed by `(thread_id, checkpoint_id)`).
///
/// Writes are wrapped in a transaction so a crash mid-write leaves the
/// previous checkpoint intact rather than a torn one (§4.4 "Checkpoint
/// writes must be atomic; partial writes must be discarded").
pub struct CheckpointStore {
    conn: Mutex<Connection>,
}

impl CheckpointStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id      TEXT NOT NULL,
                workspace_id   TEXT NOT NULL,
                checkpoint_id  TEXT NOT NULL,
                state_json     TEXT NOT NULL,
                node           TEXT NOT NULL,
                created_at     TEXT NOT NULL,
                PRIMARY KEY (thread_id, checkpoint_id)
            );
            CREATE INDEX IF NOT EXISTS idx_checkpoints_latest
                ON checkpoints(thread_id, created_at DESC);",
        )
        .map_err(|e| NexusError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Persist `state` as the latest checkpoint for `(workspace_id,
    /// thread_id)`. A fresh `checkpoint_id` (UUIDv7) is generated per write
    /// so history is retained; [`Self::load_latest`] reads the newest row.
    pub fn save(&self, workspace_id: &str, thread_id: &str, state: &AgentState) -> Result<String> {
        let checkpoint_id = uuid::Uuid::now_v7().to_string();
        let state_json = serde_json::to_string(state)?;
        let now = chrono::Utc::now().to_rfc3339();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| NexusError::Database(e.to_string()))?;
        tx.execute(
            "INSERT INTO checkpoints (thread_id, workspace_id, checkpoint_id, state_json, node, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![thread_id, workspace_id, checkpoint_id, state_json, state.node.to_string(), now],
        )
        .map_err(|e| NexusError::Database(e.to_string()))?;
        tx.commit().map_err(|e| NexusError::Database(e.to_string()))?;
        Ok(checkpoint_id)
    }

    /// Load the most recent checkpoint for `thread_id`, if any. Used both
    /// to resume a checkpointed turn after a crash (§4.4) and to seed a new
    /// turn's `AgentState` from history.
    pub fn load_latest(&self, thread_id: &str) -> Result<Option<AgentState>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<String> = conn
            .query_row(
                "SELECT state_json FROM checkpoints
                 WHERE thread_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![thread_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| NexusError::Database(e.to_string()))?;
        match row {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Clear all checkpoints for a thread (`/reset all`, §4.6).
    pub fn clear(&self, thread_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM checkpoints WHERE thread_id = ?1", params![thread_id])
            .map_err(|e| NexusError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_by_message_id_preserves_order() {
        let mut state = AgentState::new("u1", "telegram");
        state.append_message(StateMessage {
            message_id: "m1".into(),
            role: "user".into(),
            content: serde_json::json!("hi"),
        });
        state.append_message(StateMessage {
            message_id: "m2".into(),
            role: "assistant".into(),
            content: serde_json::json!("hello"),
        });
        // Replaying m1 must not duplicate or reorder.
        state.append_message(StateMessage {
            message_id: "m1".into(),
            role: "user".into(),
            content: serde_json::json!("hi again"),
        });
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].message_id, "m1");
        assert_eq!(state.messages[0].role, "user");
    }

    #[test]
    fn checkpoint_round_trips_latest_state() {
        let conn = Connection::open_in_memory().unwrap();
        let store = CheckpointStore::new(conn).unwrap();
        let mut state = AgentState::new("u1", "telegram");
        state.iterations = 3;
        state.node = LoopNode::Tools;
        store.save("ws1", "telegram:123", &state).unwrap();

        let loaded = store.load_latest("telegram:123").unwrap().unwrap();
        assert_eq!(loaded.iterations, 3);
        assert_eq!(loaded.node, LoopNode::Tools);
    }

    #[test]
    fn clearing_removes_checkpoints() {
        let conn = Connection::open_in_memory().unwrap();
        let store = CheckpointStore::new(conn).unwrap();
        let state = AgentState::new("u1", "telegram");
        store.save("ws1", "t1", &state).unwrap();
        store.clear("t1").unwrap();
        assert!(store.load_latest("t1").unwrap().is_none());
    }
}
