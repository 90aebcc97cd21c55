//! Storage Router (C2) — derives per-workspace physical paths and enforces
//! the file sandbox contract (§4.2).
//!
//! Every tool resolves its storage location through [`StorageRouter`] rather
//! than building paths ad hoc; this is what gives the isolation invariant
//! (§8 Invariant 1) a single place to hold.

use std::path::{Path, PathBuf};

use crate::error::{NexusError, Result};
use crate::workspace::WorkspaceId;

/// Root directory under which every workspace's subtree lives
/// (`<root>/workspaces/<sanitized-id>/...`).
#[derive(Debug, Clone)]
pub struct StorageRouter {
    root: PathBuf,
    /// Legacy per-thread root, checked as a read fallback (§4.2 "Legacy
    /// fallback"). `None` disables the fallback entirely.
    legacy_root: Option<PathBuf>,
}

/// The full set of paths a workspace owns. All parents are created on first
/// access (`ensure_dirs`); the paths themselves are lazily created by the
/// subsystem that owns them (SQLite opens `relational_db`, the vector store
/// opens `vector_db`, etc).
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub files_root: PathBuf,
    pub relational_db: PathBuf,
    pub vector_db: PathBuf,
    pub memory_db: PathBuf,
    pub reminders_dir: PathBuf,
    pub workflows_dir: PathBuf,
}

impl StorageRouter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            legacy_root: None,
        }
    }

    /// Enable the one-way legacy-per-thread migration fallback (§4.2).
    pub fn with_legacy_root(mut self, legacy_root: impl Into<PathBuf>) -> Self {
        self.legacy_root = Some(legacy_root.into());
        self
    }

    /// Derive every physical path for `workspace_id`. Pure — does not touch
    /// the filesystem. Call [`Self::ensure_dirs`] before first use.
    pub fn paths_for(&self, workspace_id: &WorkspaceId) -> WorkspacePaths {
        let base = self.root.join("workspaces").join(workspace_id.sanitized());
        WorkspacePaths {
            files_root: base.join("files"),
            relational_db: base.join("db").join("db.sqlite"),
            vector_db: base.join("kb"),
            memory_db: base.join("mem").join("mem.db"),
            reminders_dir: base.join("reminders"),
            workflows_dir: base.join("workflows"),
        }
    }

    /// Create every parent directory for `paths`. Idempotent.
    pub fn ensure_dirs(&self, paths: &WorkspacePaths) -> Result<()> {
        for dir in [
            &paths.files_root,
            paths.relational_db.parent().unwrap_or(&paths.relational_db),
            &paths.vector_db,
            paths.memory_db.parent().unwrap_or(&paths.memory_db),
            &paths.reminders_dir,
            &paths.workflows_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(NexusError::Io)?;
        }
        Ok(())
    }

    /// Legacy fallback (§4.2): given a thread id, does a pre-migration path
    /// exist under the legacy per-thread root? Returns it if so — callers
    /// read from here once, then write forward to the new workspace path
    /// (one-way migration; never written back to).
    pub fn legacy_files_root(&self, thread_id: &str) -> Option<PathBuf> {
        let legacy = self.legacy_root.as_ref()?;
        let sanitized = sanitize_component(thread_id);
        let candidate = legacy.join(sanitized).join("files");
        candidate.is_dir().then_some(candidate)
    }
}

/// Replace `:/@\` with `_`, matching `WorkspaceId::sanitized` (§4.2).
fn sanitize_component(id: &str) -> String {
    id.chars()
        .map(|c| if matches!(c, ':' | '/' | '@' | '\\') { '_' } else { c })
        .collect()
}

/// File sandbox contract used by file tools (§4.2).
///
/// Holds an allow-list of suffixes and a maximum byte count; `resolve`
/// canonicalizes the caller-supplied path and rejects anything that doesn't
/// land under `root`, has a disallowed extension, or exceeds the size cap.
#[derive(Debug, Clone)]
pub struct FileSandbox {
    root: PathBuf,
    allowed_extensions: Vec<String>,
    max_bytes: u64,
}

impl FileSandbox {
    pub fn new(root: impl Into<PathBuf>, allowed_extensions: Vec<String>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_bytes,
        }
    }

    /// Validate a caller-supplied relative or absolute path against the
    /// sandbox root. Does not require the file to exist — canonicalization
    /// walks up to the first existing ancestor so new-file writes still get
    /// a traversal check.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf> {
        let joined = if Path::new(requested).is_absolute() {
            PathBuf::from(requested)
        } else {
            self.root.join(requested)
        };

        let canonical_root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());
        let canonical = canonicalize_lenient(&joined);

        if !canonical.starts_with(&canonical_root) {
            return Err(NexusError::PathTraversal(requested.to_string()));
        }

        if let Some(ext) = canonical.extension().and_then(|e| e.to_str()) {
            if !self.allowed_extensions.is_empty()
                && !self
                    .allowed_extensions
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(ext))
            {
                return Err(NexusError::ExtensionDenied(ext.to_string()));
            }
        } else if !self.allowed_extensions.is_empty() {
            return Err(NexusError::ExtensionDenied("<none>".to_string()));
        }

        Ok(canonical)
    }

    /// Like [`Self::resolve`] but skips the extension check — for tools that
    /// operate on directories (`list_files`, `search_files`), which have no
    /// extension of their own to validate.
    pub fn resolve_dir(&self, requested: &str) -> Result<PathBuf> {
        let joined = if Path::new(requested).is_absolute() {
            PathBuf::from(requested)
        } else {
            self.root.join(requested)
        };

        let canonical_root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());
        let canonical = canonicalize_lenient(&joined);

        if !canonical.starts_with(&canonical_root) {
            return Err(NexusError::PathTraversal(requested.to_string()));
        }

        Ok(canonical)
    }

    /// Check a byte count against the configured cap. Called after reading
    /// bytes off disk or before accepting an upload body.
    pub fn check_size(&self, size: u64) -> Result<()> {
        if size > self.max_bytes {
            return Err(NexusError::SizeExceeded {
                size,
                max: self.max_bytes,
            });
        }
        Ok(())
    }
}

/// Canonicalize what exists, then re-append the remaining (not-yet-created)
/// components lexically. This lets the sandbox check reject `../../etc`
/// style traversal even for paths that don't exist yet (e.g. a new file the
/// model is about to write).
fn canonicalize_lenient(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                tail.push(name.to_os_string());
                existing = existing
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("/"));
            }
            None => break,
        }
    }

    let mut result = existing.canonicalize().unwrap_or(existing);
    for component in tail.into_iter().rev() {
        result.push(component);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_derived_from_sanitized_id() {
        let router = StorageRouter::new("/data");
        let ws = WorkspaceId::from("user:42/abc");
        let paths = router.paths_for(&ws);
        assert_eq!(
            paths.files_root,
            PathBuf::from("/data/workspaces/user_42_abc/files")
        );
        assert_eq!(
            paths.relational_db,
            PathBuf::from("/data/workspaces/user_42_abc/db/db.sqlite")
        );
    }

    #[test]
    fn path_derivation_is_canonical_under_sanitization() {
        // workspace_path(id) == workspace_path(sanitize(id)) — round-trip law (§8).
        let router = StorageRouter::new("/data");
        let raw = WorkspaceId::from("a:b/c@d\\e");
        let pre_sanitized = WorkspaceId::from(raw.sanitized());
        assert_eq!(router.paths_for(&raw).files_root, router.paths_for(&pre_sanitized).files_root);
    }

    #[test]
    fn sandbox_rejects_traversal_outside_root() {
        let tmp = std::env::temp_dir().join(format!("nexus-sandbox-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&tmp).unwrap();
        let sandbox = FileSandbox::new(&tmp, vec!["txt".into()], 1024);
        let err = sandbox.resolve("../../etc/passwd").unwrap_err();
        assert!(matches!(err, NexusError::PathTraversal(_)));
        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn sandbox_rejects_disallowed_extension() {
        let tmp = std::env::temp_dir().join(format!("nexus-sandbox-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&tmp).unwrap();
        let sandbox = FileSandbox::new(&tmp, vec!["txt".into()], 1024);
        let err = sandbox.resolve("notes.exe").unwrap_err();
        assert!(matches!(err, NexusError::ExtensionDenied(_)));
        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn sandbox_accepts_allowed_path() {
        let tmp = std::env::temp_dir().join(format!("nexus-sandbox-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&tmp).unwrap();
        let sandbox = FileSandbox::new(&tmp, vec!["txt".into()], 1024);
        let resolved = sandbox.resolve("notes.txt").unwrap();
        assert!(resolved.starts_with(tmp.canonicalize().unwrap()));
        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn size_cap_enforced() {
        let sandbox = FileSandbox::new("/tmp", vec![], 100);
        assert!(sandbox.check_size(50).is_ok());
        assert!(matches!(
            sandbox.check_size(200),
            Err(NexusError::SizeExceeded { .. })
        ));
    }
}
