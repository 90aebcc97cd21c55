//! Workspace data model — the isolation unit shared by every tenant-facing
//! subsystem (storage routing, identity resolution, tool dispatch).
//!
//! A workspace owns all physical storage paths derived from it (§4.2) and is
//! the unit threads are bound to (§4.1). See `nexus-users` for the resolver
//! that implements alias resolution, binding, and access checks against these
//! types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Workspace identifier (UUIDv7 — time-sortable for log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(pub String);

impl WorkspaceId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form: `:/@\` replaced with `_`.
    ///
    /// Used to derive `files_root`/`relational_db`/etc. paths (§4.2). Kept
    /// here (rather than in the storage crate) so any crate holding a
    /// `WorkspaceId` can compute the same sanitized form without a
    /// round-trip through storage.
    pub fn sanitized(&self) -> String {
        self.0
            .chars()
            .map(|c| if matches!(c, ':' | '/' | '@' | '\\') { '_' } else { c })
            .collect()
    }
}

impl Default for WorkspaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkspaceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkspaceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Isolation scope of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceKind {
    /// One per canonical user; created on first thread bind.
    Individual,
    /// Shared among an explicit member list plus a parent group.
    Group,
    /// Exactly one globally; readable by anyone, writable by explicit members.
    Public,
}

impl fmt::Display for WorkspaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceKind::Individual => write!(f, "individual"),
            WorkspaceKind::Group => write!(f, "group"),
            WorkspaceKind::Public => write!(f, "public"),
        }
    }
}

impl std::str::FromStr for WorkspaceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(WorkspaceKind::Individual),
            "group" => Ok(WorkspaceKind::Group),
            "public" => Ok(WorkspaceKind::Public),
            other => Err(format!("unknown workspace kind: {other}")),
        }
    }
}

/// Owner of a workspace: a single user, a group, or the system (public).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WorkspaceOwner {
    User { user_id: String },
    Group { group_id: String },
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub workspace_id: WorkspaceId,
    pub kind: WorkspaceKind,
    pub name: String,
    pub owner: WorkspaceOwner,
    pub created_at: String,
}

/// Permission lattice role for workspace/group membership.
///
/// `Admin ⊇ {read, write, admin}`, `Editor ⊇ {read, write}`, `Reader ⊇ {read}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceRole {
    Reader,
    Editor,
    Admin,
}

impl WorkspaceRole {
    pub fn allows(&self, action: WorkspaceAction) -> bool {
        match (self, action) {
            (WorkspaceRole::Admin, _) => true,
            (WorkspaceRole::Editor, WorkspaceAction::Read | WorkspaceAction::Write) => true,
            (WorkspaceRole::Reader, WorkspaceAction::Read) => true,
            _ => false,
        }
    }
}

impl fmt::Display for WorkspaceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceRole::Admin => write!(f, "admin"),
            WorkspaceRole::Editor => write!(f, "editor"),
            WorkspaceRole::Reader => write!(f, "reader"),
        }
    }
}

impl std::str::FromStr for WorkspaceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(WorkspaceRole::Admin),
            "editor" => Ok(WorkspaceRole::Editor),
            "reader" => Ok(WorkspaceRole::Reader),
            other => Err(format!("unknown workspace role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceAction {
    Read,
    Write,
    Admin,
}

impl fmt::Display for WorkspaceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceAction::Read => write!(f, "read"),
            WorkspaceAction::Write => write!(f, "write"),
            WorkspaceAction::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for WorkspaceAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(WorkspaceAction::Read),
            "write" => Ok(WorkspaceAction::Write),
            "admin" => Ok(WorkspaceAction::Admin),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// A single ACL grant row: a user may be granted a role on a workspace
/// directly (outside group/ownership), optionally time-limited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceAcl {
    pub workspace_id: WorkspaceId,
    pub user_id: String,
    pub role: WorkspaceRole,
    pub expires_at: Option<String>,
}
