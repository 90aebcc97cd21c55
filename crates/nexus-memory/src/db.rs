use rusqlite::{Connection, Result};

/// Initialise memory tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_user_memory_table(conn)?;
    create_fts_index(conn)?;
    create_conversations_table(conn)?;
    create_memories_table(conn)?;
    create_instincts_table(conn)?;
    Ok(())
}

/// Content-addressed recall store (§3 `Memory`, §4.9). Distinct from
/// `user_memory` above: `user_memory` is flat per-user personalization
/// (tone, interests, capability flags) rendered once into the system
/// prompt; `memories` is the thread-scoped semantic/episodic/procedural
/// store the `search`/`get_recent`/`export`/`import` contract in §4.9
/// operates over, queried per-turn by `MemoryContextMW`.
fn create_memories_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memories (
            id              TEXT PRIMARY KEY NOT NULL,
            thread_id       TEXT NOT NULL,
            content         TEXT NOT NULL,
            kind            TEXT NOT NULL,
            confidence      REAL NOT NULL DEFAULT 0.7,
            source          TEXT NOT NULL,
            key             TEXT,
            metadata        TEXT NOT NULL DEFAULT '{}',
            created_at      TEXT NOT NULL,
            last_accessed   TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_memories_thread
            ON memories(thread_id, created_at DESC);
        CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts
            USING fts5(content, content='memories', content_rowid='rowid');",
    )
}

/// Learned behavioral rules (§3 `Instinct`, §4.9). `occurrence_count`,
/// `last_triggered`, and `success_rate` live in `metadata` JSON per the
/// spec's field grouping; the read-time confidence formula consumes them.
fn create_instincts_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS instincts (
            id              TEXT PRIMARY KEY NOT NULL,
            thread_id       TEXT NOT NULL,
            trigger         TEXT NOT NULL,
            action          TEXT NOT NULL,
            domain          TEXT NOT NULL,
            base_confidence REAL NOT NULL DEFAULT 0.5,
            source          TEXT NOT NULL,
            occurrence_count    INTEGER NOT NULL DEFAULT 1,
            last_triggered      TEXT,
            success_rate        REAL NOT NULL DEFAULT 1.0,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_instincts_thread
            ON instincts(thread_id, domain);",
    )
}

fn create_user_memory_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_memory (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     TEXT NOT NULL,
            category    TEXT NOT NULL,
            key         TEXT NOT NULL,
            value       TEXT NOT NULL,
            confidence  REAL NOT NULL DEFAULT 0.8,
            source      TEXT NOT NULL DEFAULT 'inferred',
            expires_at  TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            UNIQUE(user_id, category, key)
        );
        CREATE INDEX IF NOT EXISTS idx_memory_user
            ON user_memory(user_id);",
    )
}

/// FTS5 virtual table for full-text search across memory keys and values.
/// content='' makes it an external-content table — we sync manually on write.
fn create_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS user_memory_fts
            USING fts5(key, value, content='user_memory', content_rowid='id');",
    )
}

fn create_conversations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     TEXT,
            session_key TEXT NOT NULL,
            channel     TEXT NOT NULL,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            model_used  TEXT,
            tokens_in   INTEGER NOT NULL DEFAULT 0,
            tokens_out  INTEGER NOT NULL DEFAULT 0,
            cost_usd    REAL NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conv_user
            ON conversations(user_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_conv_session
            ON conversations(session_key, created_at);",
    )
}
