use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{info, warn};

mod app;
mod delivery;
mod http;
mod mcp_bridge;
mod mcp_lifecycle;
mod provider_builder;
mod stop;
mod tools;
mod update;
mod ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `nexus-gateway mcp-bridge` — launched by Claude Code itself over stdio,
    // registered by `mcp_lifecycle::ensure_mcp_registration`. Runs synchronously
    // and never reaches the HTTP gateway below.
    if std::env::args().nth(1).as_deref() == Some("mcp-bridge") {
        let config_path = std::env::var("NEXUS_CONFIG").ok();
        let config = nexus_core::config::NexusConfig::load(config_path.as_deref())
            .unwrap_or_else(|_| nexus_core::config::NexusConfig::default());
        return mcp_bridge::run(&config);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nexus_gateway=info,tower_http=debug".into()),
        )
        .init();

    // load config: explicit path > NEXUS_CONFIG env > ~/.nexus/nexus.toml
    let config_path = std::env::var("NEXUS_CONFIG").ok();
    let config = nexus_core::config::NexusConfig::load(config_path.as_deref())
        .unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            nexus_core::config::NexusConfig::default()
        });

    if let Some(parent) = Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    mcp_lifecycle::ensure_mcp_registration(&config);

    let provider = provider_builder::build_provider(&config)?;
    let prompt = nexus_agent::prompt::PromptBuilder::load(config.agent.soul_path.as_deref(), None);
    let agent = nexus_agent::runtime::AgentRuntime::new(provider, prompt, config.agent.model.clone());

    let sessions = nexus_sessions::SessionManager::new(open_conn(&config.database.path)?);
    let memory = nexus_memory::manager::MemoryManager::new(open_conn(&config.database.path)?);
    let memory_store = nexus_memory::memory_store::MemoryStore::new(open_conn(&config.database.path)?);
    let instinct_store = nexus_memory::instinct::InstinctStore::new(open_conn(&config.database.path)?);
    let terminal = nexus_terminal::manager::TerminalManager::new();
    let storage = nexus_core::storage::StorageRouter::new(config.storage.root.clone());
    let scheduler = nexus_scheduler::SchedulerHandle::new(open_conn(&config.database.path)?)?;

    let shared_db = Arc::new(Mutex::new(open_conn(&config.database.path)?));
    let users = nexus_users::resolver::UserResolver::new(shared_db.clone());
    let workspace_resolver = nexus_users::workspace_resolver::WorkspaceResolver::new(shared_db);

    let state = Arc::new(app::AppState::new(
        config.clone(),
        agent,
        users,
        memory,
        sessions,
        scheduler,
        terminal,
        workspace_resolver,
        memory_store,
        instinct_store,
        storage,
    ));

    // Channel adapters (C6, §4.6) — spawned before the scheduler so their
    // delivery channels exist when the first tick fires.
    let discord_tx = spawn_discord(&config, state.clone());
    let telegram_tx = spawn_telegram(&config, state.clone());

    let delivery = delivery::spawn(state.clone(), discord_tx, telegram_tx);

    let scheduler_conn = open_conn(&config.database.path)?;
    let engine = nexus_scheduler::SchedulerEngine::new(
        scheduler_conn,
        &config.database.path,
        Some(delivery.fired_tx),
        Some(delivery.fired_reminder_tx),
        Some(delivery.fired_flow_tx),
    )?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(engine.run(shutdown_rx));

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let router = app::build_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Nexus gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}

fn open_conn(path: &str) -> rusqlite::Result<Connection> {
    Connection::open(path)
}

/// Start the Discord adapter if `channels.discord` is configured, returning
/// the sender half of its proactive-delivery channel.
fn spawn_discord(
    config: &nexus_core::config::NexusConfig,
    state: Arc<app::AppState>,
) -> Option<tokio::sync::mpsc::Sender<nexus_core::reminder::ReminderDelivery>> {
    let discord_cfg = config.channels.discord.clone()?;
    let (tx, rx) = tokio::sync::mpsc::channel(64);
    let adapter = nexus_discord::adapter::DiscordAdapter::new(&discord_cfg, state);
    tokio::spawn(async move {
        adapter.run(Some(rx)).await;
        warn!("Discord adapter exited");
    });
    info!("Discord adapter started");
    Some(tx)
}

/// Start the Telegram adapter if `channels.telegram` is configured, returning
/// the sender half of its proactive-delivery channel.
fn spawn_telegram(
    config: &nexus_core::config::NexusConfig,
    state: Arc<app::AppState>,
) -> Option<tokio::sync::mpsc::Sender<nexus_core::reminder::ReminderDelivery>> {
    let telegram_cfg = config.channels.telegram.clone()?;
    let (tx, rx) = tokio::sync::mpsc::channel(64);
    let (outbound_tx, outbound_rx) = tokio::sync::mpsc::channel(64);
    state
        .channel_senders
        .insert("telegram".to_string(), outbound_tx);
    let adapter = nexus_telegram::adapter::TelegramAdapter::new(&telegram_cfg, state);
    tokio::spawn(async move {
        adapter.run(Some(rx), Some(outbound_rx)).await;
        warn!("Telegram adapter exited");
    });
    info!("Telegram adapter started");
    Some(tx)
}
