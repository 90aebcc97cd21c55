//! Shared context interface for all channel adapters.
//!
//! `MessageContext` is the single trait that every channel host (gateway, discord,
//! future telegram, etc.) must implement. It replaces the old `DiscordAppContext`
//! and lets the pipeline crate stay channel-agnostic.

use nexus_core::config::{McpProxyConfig, MiddlewareConfig, StorageConfig, WebToolsConfig};
use nexus_core::storage::StorageRouter;
use nexus_memory::instinct::InstinctStore;
use nexus_memory::manager::MemoryManager;
use nexus_memory::memory_store::MemoryStore;
use nexus_scheduler::SchedulerHandle;
use nexus_terminal::manager::TerminalManager;
use nexus_users::resolver::UserResolver;
use nexus_users::workspace_resolver::WorkspaceResolver;

use crate::runtime::AgentRuntime;
use crate::tools::loop_breaker::ToolLoopBreaker;

/// Minimal context interface required by the shared message pipeline.
///
/// Implemented by `AppState` in `nexus-gateway` and any future channel host.
/// Defined here (in `nexus-agent`) to avoid circular dependency: all channel
/// crates depend on `nexus-agent`; `nexus-agent` depends only on `nexus-core`,
/// `nexus-memory`, `nexus-scheduler`, `nexus-terminal`, and `nexus-users`.
pub trait MessageContext: Send + Sync {
    fn agent(&self) -> &AgentRuntime;
    fn memory(&self) -> &MemoryManager;
    fn terminal(&self) -> &tokio::sync::Mutex<TerminalManager>;
    fn scheduler(&self) -> &SchedulerHandle;
    /// Identity resolver (C1) — alias resolution, workspace binding lookups.
    fn users(&self) -> &UserResolver;
    /// Names of currently-connected outbound channels (for `send_message` tool).
    fn connected_channels(&self) -> Vec<String>;
    /// Route an outbound message to another connected channel by name.
    fn send_to_channel(&self, channel: &str, recipient: &str, message: &str)
        -> Result<(), String>;
    /// The gateway's own HTTP port, if this host exposes one (for self-links).
    fn gateway_port(&self) -> Option<u16> {
        None
    }
    /// Path to the primary relational database, for `/status`-style slash commands.
    fn database_path(&self) -> Option<&str> {
        None
    }
    /// Workspace binding/ACL resolver (C1, §4.1).
    fn workspace_resolver(&self) -> &WorkspaceResolver;
    /// Thread-scoped semantic/episodic/procedural recall store (C9, §4.9),
    /// queried per-turn by `MemoryContextMW`.
    fn memory_store(&self) -> &MemoryStore;
    /// Learned behavioral rules store (C9, §4.9), queried per-turn by
    /// `InstinctInjectorMW` and updated by the passive `Observer`.
    fn instinct_store(&self) -> &InstinctStore;
    /// Storage router (C2, §4.2) — derives per-workspace physical paths and
    /// builds the sandboxes file tools resolve paths through.
    fn storage(&self) -> &StorageRouter;
    /// File sandbox tunables (allowed extensions, max size) — paired with
    /// [`Self::storage`] to build the `FileSandbox` the filesystem tools use.
    fn storage_config(&self) -> &StorageConfig;
    /// Middleware pipeline tunables (C5, §4.5, §6.5).
    fn middleware_config(&self) -> &MiddlewareConfig;
    /// Sliding-window tool retry tracker shared across the whole process
    /// (C5 `ToolLoopBreaker`, §4.5).
    fn loop_breaker(&self) -> &ToolLoopBreaker;
    /// `web_search`/`web_scrape` tool tunables (§4.3, §6.5).
    fn web_config(&self) -> &WebToolsConfig;
    /// Configured external MCP servers the `mcp_proxy` tool may dispatch to (§4.3).
    fn mcp_config(&self) -> &McpProxyConfig;

    /// Extra tools contributed by a higher layer that `nexus-agent` cannot
    /// depend on directly (e.g. the flow-management tools in `nexus-flows`,
    /// which itself depends on `nexus-agent` — registering them here instead
    /// of in `build_tools` avoids a circular crate dependency). Default is
    /// empty; hosts that carry a flow runner override it.
    fn extra_tools(self: &std::sync::Arc<Self>, _thread_id: &str) -> Vec<Box<dyn crate::tools::Tool>>
    where
        Self: Sized,
    {
        Vec::new()
    }
}
