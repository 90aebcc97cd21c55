use axum::{
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use nexus_agent::runtime::AgentRuntime;
use nexus_agent::tools::loop_breaker::ToolLoopBreaker;
use nexus_core::config::{MiddlewareConfig, NexusConfig, StorageConfig};
use nexus_core::storage::StorageRouter;
use nexus_core::types::ChannelOutbound;
use nexus_memory::instinct::InstinctStore;
use nexus_memory::manager::MemoryManager;
use nexus_memory::memory_store::MemoryStore;
use nexus_scheduler::SchedulerHandle;
use nexus_sessions::SessionManager;
use nexus_terminal::manager::TerminalManager;
use nexus_users::resolver::UserResolver;
use nexus_users::workspace_resolver::WorkspaceResolver;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ws::broadcast::EventBroadcaster;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: NexusConfig,
    pub event_seq: AtomicU64,
    #[allow(dead_code)]
    pub presence_version: AtomicU64,
    pub broadcaster: EventBroadcaster,
    pub agent: AgentRuntime,
    pub users: UserResolver,
    pub memory: MemoryManager,
    pub sessions: SessionManager,
    pub scheduler: SchedulerHandle,
    /// Identity→workspace binding and ACL resolver (C1, §4.1).
    pub workspace_resolver: WorkspaceResolver,
    /// Thread-scoped recall store (C9, §4.9), shared across workspaces via
    /// one SQLite connection/file with `InstinctStore`.
    pub memory_store: MemoryStore,
    /// Learned behavioral rules store (C9, §4.9).
    pub instinct_store: InstinctStore,
    /// Storage router (C2, §4.2) — derives per-workspace physical paths.
    pub storage: StorageRouter,
    /// Sliding-window tool retry tracker shared across the whole process
    /// (C5 `ToolLoopBreaker`, §4.5).
    pub loop_breaker: ToolLoopBreaker,
    /// Terminal subsystem — tokio::sync::Mutex because create_session, kill,
    /// exec_background, and job_kill are async and must be awaited while the
    /// lock is held.
    pub terminal: tokio::sync::Mutex<TerminalManager>,
    /// Active WS connections: conn_id -> message sender.
    pub ws_clients: DashMap<String, mpsc::Sender<String>>,
    /// Notification queue for HTTP/terminal clients: session_key -> pending messages.
    /// Drained by `GET /notifications`.
    pub notifications: DashMap<String, Vec<String>>,
    /// Active pipeline operations: session_key -> CancellationToken.
    /// `/stop` cancels all tokens to abort running tool loops.
    pub active_operations: DashMap<String, CancellationToken>,
    /// Outbound channel senders for cross-channel messaging.
    /// Key: channel name (e.g. "discord"), Value: sender for `ChannelOutbound` messages.
    pub channel_senders: DashMap<String, mpsc::Sender<ChannelOutbound>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: NexusConfig,
        agent: AgentRuntime,
        users: UserResolver,
        memory: MemoryManager,
        sessions: SessionManager,
        scheduler: SchedulerHandle,
        terminal: TerminalManager,
        workspace_resolver: WorkspaceResolver,
        memory_store: MemoryStore,
        instinct_store: InstinctStore,
        storage: StorageRouter,
    ) -> Self {
        Self {
            config,
            event_seq: AtomicU64::new(0),
            presence_version: AtomicU64::new(0),
            broadcaster: EventBroadcaster::new(),
            agent,
            users,
            memory,
            sessions,
            scheduler,
            workspace_resolver,
            memory_store,
            instinct_store,
            storage,
            loop_breaker: ToolLoopBreaker::new(),
            terminal: tokio::sync::Mutex::new(terminal),
            ws_clients: DashMap::new(),
            notifications: DashMap::new(),
            active_operations: DashMap::new(),
            channel_senders: DashMap::new(),
        }
    }

    /// Monotonically increasing sequence for broadcast events.
    pub fn next_seq(&self) -> u64 {
        self.event_seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl nexus_agent::pipeline::MessageContext for AppState {
    fn agent(&self) -> &nexus_agent::runtime::AgentRuntime {
        &self.agent
    }

    fn memory(&self) -> &nexus_memory::manager::MemoryManager {
        &self.memory
    }

    fn terminal(&self) -> &tokio::sync::Mutex<nexus_terminal::manager::TerminalManager> {
        &self.terminal
    }

    fn scheduler(&self) -> &nexus_scheduler::SchedulerHandle {
        &self.scheduler
    }

    fn users(&self) -> &nexus_users::resolver::UserResolver {
        &self.users
    }

    fn connected_channels(&self) -> Vec<String> {
        self.channel_senders
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn send_to_channel(&self, channel: &str, recipient: &str, message: &str) -> Result<(), String> {
        let sender = self
            .channel_senders
            .get(channel)
            .ok_or_else(|| format!("channel '{}' is not connected", channel))?;
        sender
            .try_send(ChannelOutbound {
                recipient: recipient.to_string(),
                message: message.to_string(),
            })
            .map_err(|e| format!("failed to send to '{}': {}", channel, e))
    }

    fn gateway_port(&self) -> Option<u16> {
        Some(self.config.gateway.port)
    }

    fn database_path(&self) -> Option<&str> {
        Some(&self.config.database.path)
    }

    fn workspace_resolver(&self) -> &WorkspaceResolver {
        &self.workspace_resolver
    }

    fn memory_store(&self) -> &MemoryStore {
        &self.memory_store
    }

    fn instinct_store(&self) -> &InstinctStore {
        &self.instinct_store
    }

    fn storage(&self) -> &StorageRouter {
        &self.storage
    }

    fn middleware_config(&self) -> &MiddlewareConfig {
        &self.config.middleware
    }

    fn storage_config(&self) -> &StorageConfig {
        &self.config.storage
    }

    fn loop_breaker(&self) -> &ToolLoopBreaker {
        &self.loop_breaker
    }

    fn web_config(&self) -> &nexus_core::config::WebToolsConfig {
        &self.config.web
    }

    fn mcp_config(&self) -> &nexus_core::config::McpProxyConfig {
        &self.config.mcp
    }

    /// Flow-management tools (C8, §4.8) — registered here rather than in
    /// `nexus-agent::tools::build` because `nexus-flows` depends on
    /// `nexus-agent`; doing it there would be circular.
    fn extra_tools(
        self: &Arc<Self>,
        thread_id: &str,
    ) -> Vec<Box<dyn nexus_agent::tools::Tool>> {
        vec![
            Box::new(nexus_flows::tools::CreateFlowTool::new(
                Arc::clone(self),
                thread_id,
            )),
            Box::new(nexus_flows::tools::ListFlowsTool::new(
                Arc::clone(self),
                thread_id,
            )),
            Box::new(nexus_flows::tools::RunFlowTool::new(Arc::clone(self))),
            Box::new(nexus_flows::tools::CancelFlowTool::new(Arc::clone(self))),
            Box::new(nexus_flows::tools::DeleteFlowTool::new(Arc::clone(self))),
        ]
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(crate::http::ui::ui_handler))
        .route("/health", get(crate::http::health::health_handler))
        .route("/health/ready", get(crate::http::health::ready_handler))
        .route("/health/live", get(crate::http::health::live_handler))
        .route("/chat", post(crate::http::chat::chat_handler))
        .route("/message", post(crate::http::message::message_handler))
        .route(
            "/message/stream",
            post(crate::http::message::message_stream_handler),
        )
        .route(
            "/summarize",
            post(crate::http::message::summarize_handler),
        )
        .route(
            "/notifications",
            get(crate::http::notifications::notifications_handler),
        )
        .route("/ws", get(crate::ws::connection::ws_handler))
        .route(
            "/v1/chat/completions",
            post(crate::http::openai_compat::chat_completions),
        )
        .route(
            "/webhooks/{source}",
            post(crate::http::webhooks::webhook_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
