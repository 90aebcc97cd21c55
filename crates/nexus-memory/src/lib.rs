//! `nexus-memory` — per-user personalization (`user_memory`, carried from
//! the original channel-identity assistant) plus C9 Memory & Instincts:
//! thread-scoped content-addressed recall (`Memory`), learned behavioral
//! rules (`Instinct`), and the passive `Observer` that detects them.
//!
//! The two layers are complementary rather than redundant: `MemoryManager`
//! renders a per-user system-prompt block once per session and is keyed by
//! `user_id`; `MemoryStore`/`InstinctStore` are queried per turn by C5's
//! `MemoryContextMW`/`InstinctInjectorMW` and are keyed by `thread_id`.

pub mod db;
pub mod error;
pub mod instinct;
pub mod manager;
pub mod memory_store;
pub mod observer;
pub mod types;

pub use db::init_db;
pub use error::{MemoryError, Result};
pub use instinct::{Instinct, InstinctMetadata, InstinctStore};
pub use manager::MemoryManager;
pub use memory_store::{Memory, MemoryKind, MemoryStore};
pub use observer::Observer;
pub use types::{ConversationMessage, KnowledgeEntry, MemoryCategory, MemorySource, UserContext, UserMemory};
