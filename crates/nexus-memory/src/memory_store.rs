//! Content-addressed recall store (§3 `Memory`, §4.9).
//!
//! Distinct from `manager::MemoryManager`'s `user_memory` table: memories
//! here are thread-scoped (semantic/episodic/procedural), not per-user
//! personalization, and are queried per-turn by `MemoryContextMW` rather
//! than rendered once into the system prompt at session start.

use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Semantic,
    Episodic,
    Procedural,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Semantic => write!(f, "semantic"),
            Self::Episodic => write!(f, "episodic"),
            Self::Procedural => write!(f, "procedural"),
        }
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(Self::Semantic),
            "episodic" => Ok(Self::Episodic),
            "procedural" => Ok(Self::Procedural),
            other => Err(format!("unknown memory kind: {other}")),
        }
    }
}

/// A single content-addressed recall entry, scoped to a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub thread_id: String,
    pub content: String,
    pub kind: MemoryKind,
    pub confidence: f64,
    pub source: String,
    pub key: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub last_accessed: Option<String>,
}

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
    let kind_str: String = row.get(3)?;
    let metadata_str: String = row.get(7)?;
    Ok(Memory {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        content: row.get(2)?,
        kind: kind_str.parse().unwrap_or(MemoryKind::Semantic),
        confidence: row.get(4)?,
        source: row.get(5)?,
        key: row.get(6)?,
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
        created_at: row.get(8)?,
        last_accessed: row.get(9)?,
    })
}

const SELECT_COLUMNS: &str =
    "id, thread_id, content, kind, confidence, source, key, metadata, created_at, last_accessed";

/// Thread-scoped store for `Memory` entries (§4.9).
pub struct MemoryStore {
    conn: Mutex<Connection>,
}

impl MemoryStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn add(
        &self,
        thread_id: &str,
        content: &str,
        kind: MemoryKind,
        confidence: f64,
        source: &str,
        key: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<Memory, MemoryError> {
        let db = self.conn.lock().unwrap();
        let id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let metadata_str = metadata.to_string();
        db.execute(
            "INSERT INTO memories
                (id, thread_id, content, kind, confidence, source, key, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                id,
                thread_id,
                content,
                kind.to_string(),
                confidence,
                source,
                key,
                metadata_str,
                now
            ],
        )?;
        let rowid = db.last_insert_rowid();
        db.execute(
            "INSERT INTO memories_fts(rowid, content) VALUES (?1, ?2)",
            rusqlite::params![rowid, content],
        )?;
        Ok(Memory {
            id,
            thread_id: thread_id.to_string(),
            content: content.to_string(),
            kind,
            confidence,
            source: source.to_string(),
            key: key.map(|k| k.to_string()),
            metadata,
            created_at: now,
            last_accessed: None,
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<Memory>, MemoryError> {
        let db = self.conn.lock().unwrap();
        let mem = db
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM memories WHERE id = ?1"),
                rusqlite::params![id],
                row_to_memory,
            )
            .optional()?;
        if mem.is_some() {
            db.execute(
                "UPDATE memories SET last_accessed = ?1 WHERE id = ?2",
                rusqlite::params![chrono::Utc::now().to_rfc3339(), id],
            )?;
        }
        Ok(mem)
    }

    pub fn update(
        &self,
        id: &str,
        content: Option<&str>,
        confidence: Option<f64>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Memory, MemoryError> {
        let db = self.conn.lock().unwrap();
        let existing: Option<(String, String, f64, String)> = db
            .query_row(
                "SELECT content, metadata, confidence, key FROM memories WHERE id = ?1",
                rusqlite::params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        let (old_content, old_metadata, old_confidence, _key) = existing.ok_or_else(|| {
            MemoryError::NotFound {
                category: "memories".into(),
                key: id.to_string(),
            }
        })?;

        let new_content = content.unwrap_or(&old_content);
        let new_confidence = confidence.unwrap_or(old_confidence);
        let new_metadata = metadata
            .map(|m| m.to_string())
            .unwrap_or(old_metadata);

        db.execute(
            "UPDATE memories SET content = ?1, confidence = ?2, metadata = ?3 WHERE id = ?4",
            rusqlite::params![new_content, new_confidence, new_metadata, id],
        )?;

        if content.is_some() {
            let rowid: i64 = db.query_row(
                "SELECT rowid FROM memories WHERE id = ?1",
                rusqlite::params![id],
                |r| r.get(0),
            )?;
            db.execute(
                "INSERT INTO memories_fts(memories_fts, rowid, content) VALUES('delete', ?1, ?2)",
                rusqlite::params![rowid, old_content],
            )?;
            db.execute(
                "INSERT INTO memories_fts(rowid, content) VALUES (?1, ?2)",
                rusqlite::params![rowid, new_content],
            )?;
        }

        drop(db);
        self.get(id)?.ok_or_else(|| MemoryError::NotFound {
            category: "memories".into(),
            key: id.to_string(),
        })
    }

    pub fn delete(&self, id: &str) -> Result<(), MemoryError> {
        let db = self.conn.lock().unwrap();
        let row: Option<(i64, String)> = db
            .query_row(
                "SELECT rowid, content FROM memories WHERE id = ?1",
                rusqlite::params![id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        if let Some((rowid, content)) = row {
            db.execute(
                "INSERT INTO memories_fts(memories_fts, rowid, content) VALUES('delete', ?1, ?2)",
                rusqlite::params![rowid, content],
            )?;
            db.execute("DELETE FROM memories WHERE id = ?1", rusqlite::params![id])?;
        }
        Ok(())
    }

    /// Keyword search scoped to a thread, ordered by decreasing relevance
    /// (FTS5 bm25 rank, ties broken by confidence) where relevance implies
    /// `confidence >= min_confidence`. Empty query falls back to recency.
    pub fn search(
        &self,
        thread_id: &str,
        query: &str,
        limit: usize,
        min_confidence: f64,
        kinds: &[MemoryKind],
    ) -> Result<Vec<Memory>, MemoryError> {
        let db = self.conn.lock().unwrap();
        let kind_filter: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();

        let mems = if query.trim().is_empty() {
            let mut stmt = db.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM memories
                 WHERE thread_id = ?1 AND confidence >= ?2
                 ORDER BY created_at DESC LIMIT ?3"
            ))?;
            let rows = stmt.query_map(
                rusqlite::params![thread_id, min_confidence, limit as i64],
                row_to_memory,
            )?;
            rows.filter_map(|r| r.ok()).collect::<Vec<_>>()
        } else {
            let fts_query = sanitize_fts_query(query);
            let mut stmt = db.prepare(&format!(
                "SELECT m.id, m.thread_id, m.content, m.kind, m.confidence, m.source, m.key,
                        m.metadata, m.created_at, m.last_accessed
                 FROM memories m
                 JOIN memories_fts f ON f.rowid = m.rowid
                 WHERE f.content MATCH ?1 AND m.thread_id = ?2 AND m.confidence >= ?3
                 ORDER BY bm25(memories_fts), m.confidence DESC
                 LIMIT ?4"
            ))?;
            let rows = stmt.query_map(
                rusqlite::params![fts_query, thread_id, min_confidence, limit as i64],
                row_to_memory,
            )?;
            rows.filter_map(|r| r.ok()).collect::<Vec<_>>()
        };

        Ok(mems
            .into_iter()
            .filter(|m| kind_filter.is_empty() || kind_filter.contains(&m.kind.to_string()))
            .collect())
    }

    pub fn get_recent(&self, thread_id: &str, limit: usize) -> Result<Vec<Memory>, MemoryError> {
        let db = self.conn.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM memories
             WHERE thread_id = ?1 ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(rusqlite::params![thread_id, limit as i64], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn export(&self, thread_id: &str) -> Result<Vec<Memory>, MemoryError> {
        let db = self.conn.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM memories WHERE thread_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(rusqlite::params![thread_id], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Re-insert a previously exported set of memories under (possibly) a
    /// new thread, preserving ids so re-import is idempotent.
    pub fn import(&self, thread_id: &str, memories: Vec<Memory>) -> Result<usize, MemoryError> {
        let mut db = self.conn.lock().unwrap();
        let tx = db.transaction()?;
        let mut count = 0;
        for mem in &memories {
            tx.execute(
                "INSERT OR REPLACE INTO memories
                    (id, thread_id, content, kind, confidence, source, key, metadata,
                     created_at, last_accessed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    mem.id,
                    thread_id,
                    mem.content,
                    mem.kind.to_string(),
                    mem.confidence,
                    mem.source,
                    mem.key,
                    mem.metadata.to_string(),
                    mem.created_at,
                    mem.last_accessed,
                ],
            )?;
            let rowid = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO memories_fts(memories_fts, rowid, content) VALUES('delete', ?1, ?2)",
                rusqlite::params![rowid, mem.content],
            )
            .ok();
            tx.execute(
                "INSERT INTO memories_fts(rowid, content) VALUES (?1, ?2)",
                rusqlite::params![rowid, mem.content],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }
}

/// FTS5 MATCH treats `"`, `*`, `:`, `(`, `)` as syntax; strip them so
/// free-form user text never produces a syntax error from the engine.
fn sanitize_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| {
            tok.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|tok| !tok.is_empty())
        .map(|tok| format!("{tok}*"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn test_store() -> MemoryStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        MemoryStore::new(conn)
    }

    #[test]
    fn add_and_get_round_trips() {
        let store = test_store();
        let mem = store
            .add(
                "thread-1",
                "user prefers dark mode",
                MemoryKind::Semantic,
                0.8,
                "user_said",
                Some("ui_theme"),
                serde_json::json!({}),
            )
            .unwrap();
        let fetched = store.get(&mem.id).unwrap().unwrap();
        assert_eq!(fetched.content, "user prefers dark mode");
    }

    #[test]
    fn search_respects_min_confidence() {
        let store = test_store();
        store
            .add(
                "thread-1",
                "likes terse replies",
                MemoryKind::Semantic,
                0.9,
                "observed",
                None,
                serde_json::json!({}),
            )
            .unwrap();
        store
            .add(
                "thread-1",
                "likes terse replies but unsure",
                MemoryKind::Semantic,
                0.2,
                "observed",
                None,
                serde_json::json!({}),
            )
            .unwrap();
        let results = store
            .search("thread-1", "terse", 10, 0.5, &[])
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].confidence >= 0.5);
    }

    #[test]
    fn delete_removes_from_fts() {
        let store = test_store();
        let mem = store
            .add(
                "thread-1",
                "vegetarian diet",
                MemoryKind::Semantic,
                0.7,
                "user_said",
                None,
                serde_json::json!({}),
            )
            .unwrap();
        store.delete(&mem.id).unwrap();
        assert!(store.get(&mem.id).unwrap().is_none());
        let results = store.search("thread-1", "vegetarian", 10, 0.0, &[]).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn export_then_import_round_trips() {
        let store = test_store();
        store
            .add(
                "thread-1",
                "likes coffee",
                MemoryKind::Episodic,
                0.6,
                "observed",
                None,
                serde_json::json!({}),
            )
            .unwrap();
        let exported = store.export("thread-1").unwrap();
        assert_eq!(exported.len(), 1);

        let other = test_store();
        let count = other.import("thread-2", exported).unwrap();
        assert_eq!(count, 1);
        let recent = other.get_recent("thread-2", 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "likes coffee");
    }
}
