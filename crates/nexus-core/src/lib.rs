//! `nexus-core` — shared types, configuration, and error taxonomy for the
//! Nexus agent runtime.
//!
//! Every other crate in the workspace depends on this one for the newtypes
//! that cross crate boundaries (`UserId`, `AgentId`, `SessionKey`,
//! `WorkspaceId`), the layered configuration loader, and the top-level
//! error enum used at the edges (HTTP responses, channel error rendering).

pub mod agent_state;
pub mod config;
pub mod context;
pub mod error;
pub mod reminder;
pub mod storage;
pub mod types;
pub mod update;
pub mod workspace;

pub use agent_state::{AgentState, CheckpointStore, LoopNode, StateMessage, StructuredSummary};
pub use context::{ChatType, RequestContext};
pub use error::{NexusError, Result};
pub use storage::{FileSandbox, StorageRouter, WorkspacePaths};
pub use types::{AgentId, ConnId, SessionKey, UserId, UserRole};
pub use workspace::{
    Workspace, WorkspaceAcl, WorkspaceAction, WorkspaceId, WorkspaceKind, WorkspaceOwner,
    WorkspaceRole,
};
