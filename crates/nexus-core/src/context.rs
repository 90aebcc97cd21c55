//! Request-scoped context (§5) — `{workspace_id, thread_id, channel,
//! chat_type}` carried through the reasoning loop, middleware, and tool
//! dispatch without ever living in a process global.
//!
//! Source annotation processes used a context-var; the ownership-aware
//! target makes that explicit with `tokio::task_local!`, which gives the
//! same "set once per logical request, invisible across concurrent tasks
//! sharing an OS thread" property the spec calls out as a compile-time
//! contract opportunity (§9).

use crate::workspace::WorkspaceId;

/// A single in-flight request's routing context. Cheap to clone — every
/// tool handler and middleware hook gets an owned copy rather than a
/// borrow, so none of them can outlive the request by accident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub workspace_id: WorkspaceId,
    pub thread_id: String,
    pub channel: String,
    pub chat_type: ChatType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatType {
    Direct,
    Group,
    Public,
}

impl std::fmt::Display for ChatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatType::Direct => write!(f, "direct"),
            ChatType::Group => write!(f, "group"),
            ChatType::Public => write!(f, "public"),
        }
    }
}

impl RequestContext {
    pub fn new(
        workspace_id: WorkspaceId,
        thread_id: impl Into<String>,
        channel: impl Into<String>,
        chat_type: ChatType,
    ) -> Self {
        Self {
            workspace_id,
            thread_id: thread_id.into(),
            channel: channel.into(),
            chat_type,
        }
    }
}

tokio::task_local! {
    static CURRENT: RequestContext;
}

/// Run `fut` with `ctx` installed as the ambient request context for the
/// duration of the task. Nested calls on unrelated tasks never observe this
/// value — that is the whole point: two inbound messages processed
/// concurrently on the same worker thread each get their own task-local
/// slot, so neither can read the other's workspace/thread.
pub async fn scope<F, T>(ctx: RequestContext, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    CURRENT.scope(ctx, fut).await
}

/// Read the ambient context. Panics outside of [`scope`] — every tool
/// handler and middleware hook runs inside a scoped task by construction,
/// so reaching this without a context indicates a wiring bug, not a
/// recoverable runtime condition.
pub fn current() -> RequestContext {
    CURRENT.with(|c| c.clone())
}

/// Non-panicking variant for code paths that may run outside a request
/// (e.g. scheduler bootstrap, background maintenance).
pub fn try_current() -> Option<RequestContext> {
    CURRENT.try_with(|c| c.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_does_not_leak_across_scopes() {
        let ws_a = WorkspaceId::from("a");
        let ws_b = WorkspaceId::from("b");

        let a = scope(
            RequestContext::new(ws_a.clone(), "t1", "telegram", ChatType::Direct),
            async { current().workspace_id },
        );
        let b = scope(
            RequestContext::new(ws_b.clone(), "t2", "discord", ChatType::Group),
            async { current().workspace_id },
        );

        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra, ws_a);
        assert_eq!(rb, ws_b);
    }

    #[test]
    fn try_current_is_none_outside_scope() {
        assert!(try_current().is_none());
    }
}
