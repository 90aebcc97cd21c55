//! C1 Identity & Workspace Resolver (§4.1): alias resolution, workspace
//! creation/lookup, thread→workspace binding, and ACL evaluation.
//!
//! Grounded on `resolver.rs`'s `UserResolver` (same `Arc<Mutex<Connection>>`
//! handle, same cache-then-DB shape) but answers a different question: that
//! resolver maps external channel identities to a Nexus user id, this one
//! maps a (possibly aliased) user id to the workspace its threads are
//! isolated in, and evaluates who else may read/write/admin it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use nexus_core::workspace::{Workspace, WorkspaceAction, WorkspaceId, WorkspaceKind, WorkspaceOwner, WorkspaceRole};

use crate::error::{Result, UserError};

/// Upper bound on alias-chain hops before we treat it as a cycle. Real
/// alias chains are never more than one or two hops; this is a generous
/// backstop, not a design constraint.
const MAX_ALIAS_HOPS: usize = 64;

pub struct WorkspaceResolver {
    db: Arc<Mutex<Connection>>,
}

impl WorkspaceResolver {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Record that `alias_user_id` should resolve to `canonical_user_id`.
    /// Admin-driven operation (merging duplicate accounts); not itself named
    /// by §4.1 but required to populate the table `resolve_alias` reads.
    pub fn set_alias(&self, alias_user_id: &str, canonical_user_id: &str) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO user_aliases (alias_user_id, canonical_user_id) VALUES (?1, ?2)
             ON CONFLICT(alias_user_id) DO UPDATE SET canonical_user_id = excluded.canonical_user_id",
            params![alias_user_id, canonical_user_id],
        )?;
        Ok(())
    }

    /// Follow the alias chain to its canonical end. Returns the input
    /// unchanged if it has no alias entry. Cycle-safe: if a loop is
    /// detected, returns the lexicographically smallest id in the loop so
    /// that re-resolving the result is a fixed point
    /// (`resolve_alias(resolve_alias(u)) == resolve_alias(u)`).
    pub fn resolve_alias(&self, user_id: &str) -> Result<String> {
        let conn = self.db.lock().unwrap();
        let mut current = user_id.to_string();
        let mut visited = HashSet::new();
        visited.insert(current.clone());

        for _ in 0..MAX_ALIAS_HOPS {
            let next: Option<String> = conn
                .query_row(
                    "SELECT canonical_user_id FROM user_aliases WHERE alias_user_id = ?1",
                    params![current],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(next) = next else {
                return Ok(current);
            };
            if next == current {
                return Ok(current);
            }
            if visited.contains(&next) {
                // Cycle: pick a deterministic representative so repeated
                // calls converge regardless of entry point.
                let mut cycle_members: Vec<&String> = visited.iter().collect();
                cycle_members.push(&next);
                let min = cycle_members.into_iter().min().cloned().unwrap_or(next);
                return Ok(min);
            }
            visited.insert(next.clone());
            current = next;
        }
        Ok(current)
    }

    /// Idempotent: returns the existing individual workspace for
    /// `canonical_user_id` if one exists, else creates it.
    pub fn ensure_workspace(&self, canonical_user_id: &str) -> Result<WorkspaceId> {
        let conn = self.db.lock().unwrap();
        let existing: Option<String> = conn
            .query_row(
                "SELECT workspace_id FROM workspaces
                 WHERE owner_kind = 'user' AND owner_id = ?1 AND kind = 'individual'",
                params![canonical_user_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(WorkspaceId::from(id));
        }

        let workspace_id = WorkspaceId::new();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO workspaces (workspace_id, kind, name, owner_kind, owner_id, created_at)
             VALUES (?1, 'individual', ?2, 'user', ?3, ?4)",
            params![
                workspace_id.as_str(),
                format!("{canonical_user_id}'s workspace"),
                canonical_user_id,
                now
            ],
        )?;
        conn.execute(
            "INSERT INTO workspace_members (workspace_id, user_id, role)
             VALUES (?1, ?2, 'admin')",
            params![workspace_id.as_str(), canonical_user_id],
        )?;
        Ok(workspace_id)
    }

    /// Resolve `user_id`'s alias and workspace, then bind `thread_id` to it.
    /// First write wins: a second `bind_thread` call for the same thread is
    /// a no-op that returns the originally-bound workspace.
    pub fn bind_thread(&self, thread_id: &str, user_id: &str) -> Result<WorkspaceId> {
        let canonical = self.resolve_alias(user_id)?;
        let workspace_id = self.ensure_workspace(&canonical)?;

        let conn = self.db.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO thread_workspaces (thread_id, workspace_id, bound_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(thread_id) DO NOTHING",
            params![thread_id, workspace_id.as_str(), now],
        )?;

        let bound: String = conn.query_row(
            "SELECT workspace_id FROM thread_workspaces WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get(0),
        )?;
        Ok(WorkspaceId::from(bound))
    }

    fn load_workspace(conn: &Connection, workspace_id: &WorkspaceId) -> Result<Option<Workspace>> {
        conn.query_row(
            "SELECT workspace_id, kind, name, owner_kind, owner_id, created_at
             FROM workspaces WHERE workspace_id = ?1",
            params![workspace_id.as_str()],
            |row| {
                let kind: String = row.get(1)?;
                let owner_kind: String = row.get(3)?;
                let owner_id: Option<String> = row.get(4)?;
                let owner = match owner_kind.as_str() {
                    "user" => WorkspaceOwner::User {
                        user_id: owner_id.unwrap_or_default(),
                    },
                    "group" => WorkspaceOwner::Group {
                        group_id: owner_id.unwrap_or_default(),
                    },
                    _ => WorkspaceOwner::System,
                };
                Ok(Workspace {
                    workspace_id: WorkspaceId::from(row.get::<_, String>(0)?),
                    kind: kind.parse().unwrap_or(WorkspaceKind::Individual),
                    name: row.get(2)?,
                    owner,
                    created_at: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(UserError::DatabaseError)
    }

    /// Highest role `user_id` holds on `workspace_id` from membership,
    /// group membership, public-readability, or ACL grant — `None` if no
    /// source grants access. Does not consider ownership (see `can_access`).
    fn best_granted_role(
        conn: &Connection,
        workspace: &Workspace,
        user_id: &str,
        now: &str,
    ) -> Result<Option<WorkspaceRole>> {
        let explicit: Option<String> = conn
            .query_row(
                "SELECT role FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
                params![workspace.workspace_id.as_str(), user_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(role) = explicit {
            return Ok(Some(role.parse().unwrap_or(WorkspaceRole::Reader)));
        }

        // Group membership: the workspace's owning group, or any group
        // explicitly granted the workspace via group_workspaces.
        let mut group_ids: Vec<String> = Vec::new();
        if let WorkspaceOwner::Group { group_id } = &workspace.owner {
            group_ids.push(group_id.clone());
        }
        {
            let mut stmt = conn.prepare(
                "SELECT group_id FROM group_workspaces WHERE workspace_id = ?1",
            )?;
            let rows = stmt.query_map(params![workspace.workspace_id.as_str()], |row| {
                row.get::<_, String>(0)
            })?;
            for r in rows.filter_map(|r| r.ok()) {
                group_ids.push(r);
            }
        }
        for group_id in &group_ids {
            let group_role: Option<String> = conn
                .query_row(
                    "SELECT role FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                    params![group_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(role) = group_role {
                // Group admin promotes to workspace admin; plain member is a reader.
                let workspace_role = if role == "admin" {
                    WorkspaceRole::Admin
                } else {
                    WorkspaceRole::Reader
                };
                return Ok(Some(workspace_role));
            }
        }

        if workspace.kind == WorkspaceKind::Public {
            return Ok(Some(WorkspaceRole::Reader));
        }

        let acl: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT role, expires_at FROM workspace_acl
                 WHERE workspace_id = ?1 AND user_id = ?2",
                params![workspace.workspace_id.as_str(), user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((role, expires_at)) = acl {
            let still_valid = match &expires_at {
                Some(exp) => exp.as_str() > now,
                None => true,
            };
            if still_valid {
                return Ok(Some(role.parse().unwrap_or(WorkspaceRole::Reader)));
            }
        }

        Ok(None)
    }

    /// Precedence: owner > explicit member > group > public > ACL (§4.1).
    pub fn can_access(
        &self,
        user_id: &str,
        workspace_id: &WorkspaceId,
        action: WorkspaceAction,
    ) -> Result<bool> {
        let conn = self.db.lock().unwrap();
        let Some(workspace) = Self::load_workspace(&conn, workspace_id)? else {
            return Ok(false);
        };
        if let WorkspaceOwner::User { user_id: owner_id } = &workspace.owner {
            if owner_id == user_id {
                return Ok(true);
            }
        }
        let now = Utc::now().to_rfc3339();
        let role = Self::best_granted_role(&conn, &workspace, user_id, &now)?;
        Ok(role.is_some_and(|r| r.allows(action)))
    }

    /// Union of owned, explicitly-member, group-member, public, and
    /// ACL-granted workspaces, de-duplicated by workspace id keeping the
    /// highest role.
    pub fn list_accessible_workspaces(&self, user_id: &str) -> Result<Vec<(Workspace, WorkspaceRole)>> {
        let conn = self.db.lock().unwrap();
        let mut best: std::collections::HashMap<String, (Workspace, WorkspaceRole)> =
            std::collections::HashMap::new();

        let mut upsert = |ws: Workspace, role: WorkspaceRole| {
            best.entry(ws.workspace_id.as_str().to_string())
                .and_modify(|(_, existing_role)| {
                    if role > *existing_role {
                        *existing_role = role;
                    }
                })
                .or_insert((ws, role));
        };

        // Owned workspaces.
        {
            let mut stmt = conn.prepare(
                "SELECT workspace_id FROM workspaces WHERE owner_kind = 'user' AND owner_id = ?1",
            )?;
            let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
            for id in rows.filter_map(|r| r.ok()) {
                if let Some(ws) = Self::load_workspace(&conn, &WorkspaceId::from(id))? {
                    upsert(ws, WorkspaceRole::Admin);
                }
            }
        }

        // Explicit membership.
        {
            let mut stmt = conn.prepare(
                "SELECT workspace_id, role FROM workspace_members WHERE user_id = ?1",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for (id, role) in rows.filter_map(|r| r.ok()) {
                if let Some(ws) = Self::load_workspace(&conn, &WorkspaceId::from(id))? {
                    upsert(ws, role.parse().unwrap_or(WorkspaceRole::Reader));
                }
            }
        }

        // Group membership (owning group + explicitly shared workspaces).
        {
            let mut stmt = conn.prepare("SELECT group_id, role FROM group_members WHERE user_id = ?1")?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for (group_id, group_role) in rows.filter_map(|r| r.ok()) {
                let role = if group_role == "admin" {
                    WorkspaceRole::Admin
                } else {
                    WorkspaceRole::Reader
                };

                let mut owned_stmt = conn.prepare(
                    "SELECT workspace_id FROM workspaces WHERE owner_kind = 'group' AND owner_id = ?1",
                )?;
                let owned_rows = owned_stmt.query_map(params![group_id], |row| row.get::<_, String>(0))?;
                for id in owned_rows.filter_map(|r| r.ok()) {
                    if let Some(ws) = Self::load_workspace(&conn, &WorkspaceId::from(id))? {
                        upsert(ws, role);
                    }
                }

                let mut shared_stmt =
                    conn.prepare("SELECT workspace_id FROM group_workspaces WHERE group_id = ?1")?;
                let shared_rows = shared_stmt.query_map(params![group_id], |row| row.get::<_, String>(0))?;
                for id in shared_rows.filter_map(|r| r.ok()) {
                    if let Some(ws) = Self::load_workspace(&conn, &WorkspaceId::from(id))? {
                        upsert(ws, role);
                    }
                }
            }
        }

        // Public workspaces.
        {
            let mut stmt = conn.prepare("SELECT workspace_id FROM workspaces WHERE kind = 'public'")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for id in rows.filter_map(|r| r.ok()) {
                if let Some(ws) = Self::load_workspace(&conn, &WorkspaceId::from(id))? {
                    upsert(ws, WorkspaceRole::Reader);
                }
            }
        }

        // ACL grants, excluding expired ones.
        {
            let now = Utc::now().to_rfc3339();
            let mut stmt = conn.prepare(
                "SELECT workspace_id, role FROM workspace_acl
                 WHERE user_id = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            )?;
            let rows = stmt.query_map(params![user_id, now], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for (id, role) in rows.filter_map(|r| r.ok()) {
                if let Some(ws) = Self::load_workspace(&conn, &WorkspaceId::from(id))? {
                    upsert(ws, role.parse().unwrap_or(WorkspaceRole::Reader));
                }
            }
        }

        Ok(best.into_values().collect())
    }

    /// Grant `user_id` `role` on `workspace_id`, optionally expiring.
    pub fn grant_acl(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &str,
        role: WorkspaceRole,
        expires_at: Option<&str>,
    ) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO workspace_acl (workspace_id, user_id, role, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(workspace_id, user_id) DO UPDATE SET role = excluded.role, expires_at = excluded.expires_at",
            params![workspace_id.as_str(), user_id, role.to_string(), expires_at],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn test_resolver() -> WorkspaceResolver {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        WorkspaceResolver::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn alias_resolves_to_canonical() {
        let r = test_resolver();
        r.set_alias("alice-alt", "alice").unwrap();
        assert_eq!(r.resolve_alias("alice-alt").unwrap(), "alice");
        assert_eq!(r.resolve_alias("alice").unwrap(), "alice");
    }

    #[test]
    fn alias_resolution_is_idempotent_under_cycle() {
        let r = test_resolver();
        r.set_alias("a", "b").unwrap();
        r.set_alias("b", "a").unwrap();
        let first = r.resolve_alias("a").unwrap();
        let second = r.resolve_alias(&first).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn ensure_workspace_is_idempotent() {
        let r = test_resolver();
        let w1 = r.ensure_workspace("alice").unwrap();
        let w2 = r.ensure_workspace("alice").unwrap();
        assert_eq!(w1, w2);
    }

    #[test]
    fn bind_thread_first_write_wins() {
        let r = test_resolver();
        let w1 = r.bind_thread("thread-1", "alice").unwrap();
        let w2 = r.bind_thread("thread-1", "bob").unwrap();
        assert_eq!(w1, w2);
    }

    #[test]
    fn owner_always_has_admin_access() {
        let r = test_resolver();
        let w = r.ensure_workspace("alice").unwrap();
        assert!(r
            .can_access("alice", &w, WorkspaceAction::Admin)
            .unwrap());
    }

    #[test]
    fn stranger_has_no_access() {
        let r = test_resolver();
        let w = r.ensure_workspace("alice").unwrap();
        assert!(!r.can_access("mallory", &w, WorkspaceAction::Read).unwrap());
    }

    #[test]
    fn acl_grant_allows_read_only() {
        let r = test_resolver();
        let w = r.ensure_workspace("alice").unwrap();
        r.grant_acl(&w, "bob", WorkspaceRole::Reader, None).unwrap();
        assert!(r.can_access("bob", &w, WorkspaceAction::Read).unwrap());
        assert!(!r.can_access("bob", &w, WorkspaceAction::Write).unwrap());
    }

    #[test]
    fn expired_acl_grant_denies_access() {
        let r = test_resolver();
        let w = r.ensure_workspace("alice").unwrap();
        r.grant_acl(&w, "bob", WorkspaceRole::Reader, Some("2000-01-01T00:00:00Z"))
            .unwrap();
        assert!(!r.can_access("bob", &w, WorkspaceAction::Read).unwrap());
    }

    #[test]
    fn list_accessible_workspaces_dedupes_with_highest_role() {
        let r = test_resolver();
        let w = r.ensure_workspace("alice").unwrap();
        r.grant_acl(&w, "alice", WorkspaceRole::Reader, None).unwrap();
        let list = r.list_accessible_workspaces("alice").unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].1, WorkspaceRole::Admin);
    }
}
