use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Protocol constants — must match OpenClaw wire protocol exactly
pub const PROTOCOL_VERSION: u32 = 3;
pub const DEFAULT_PORT: u16 = 18789;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024; // 128 KB hard cap per frame
pub const MAX_BUFFERED_BYTES: usize = 1024 * 1024; // 1 MB: slow consumer threshold
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000; // close if client doesn't auth in 10s
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30; // tick event cadence

/// Top-level config (nexus.toml + NEXUS_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NexusConfig {
    pub gateway: GatewayConfig,
    pub agent: AgentConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub middleware: MiddlewareConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub web: WebToolsConfig,
    #[serde(default)]
    pub mcp: McpProxyConfig,
}

/// Web-search/scrape tool tunables (§4.3 built-in "web" tools, §6.5).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebToolsConfig {
    /// API key for the configured search provider. `web_search` returns an
    /// actionable error when unset rather than silently no-opping.
    pub search_api_key: Option<String>,
    /// Search provider id — only "brave" is wired up today.
    #[serde(default = "default_search_provider")]
    pub search_provider: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_fetch_bytes")]
    pub max_fetch_bytes: usize,
}

fn default_search_provider() -> String {
    "brave".to_string()
}
fn default_fetch_timeout_secs() -> u64 {
    20
}
fn default_max_fetch_bytes() -> usize {
    2 * 1024 * 1024
}

/// Dynamically-dispatched external MCP servers the `mcp_proxy` tool may
/// call into (§4.3 "MCP-proxy" built-in, distinct from `nexus-gateway`'s
/// own MCP bridge which exposes Nexus *as* a server).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpProxyConfig {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Name the agent references in `mcp_proxy` calls (e.g. "github").
    pub name: String,
    /// Binary to launch over stdio JSON-RPC.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Storage-subsystem tunables (§6.5): storage root, per-workspace path
/// overrides, allowed file extensions, max file size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Per-workspace root overrides, keyed by workspace id.
    #[serde(default)]
    pub workspace_overrides: std::collections::HashMap<String, String>,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// OCR engine choice for document/photo uploads (§6.5).
    #[serde(default = "default_ocr_engine")]
    pub ocr_engine: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            workspace_overrides: Default::default(),
            allowed_extensions: default_allowed_extensions(),
            max_file_size_mb: default_max_file_size_mb(),
            ocr_engine: default_ocr_engine(),
        }
    }
}

fn default_storage_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.nexus/data", home)
}
fn default_allowed_extensions() -> Vec<String> {
    vec![
        "txt", "md", "json", "yaml", "yml", "toml", "csv", "pdf", "png", "jpg", "jpeg", "gif",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_max_file_size_mb() -> u64 {
    25
}
fn default_ocr_engine() -> String {
    "tesseract".to_string()
}

/// Middleware pipeline enable-flags and thresholds (§4.5, §6.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    #[serde(default = "bool_true")]
    pub summarization_enabled: bool,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
    #[serde(default = "bool_true")]
    pub retry_enabled: bool,
    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_model_call_limit")]
    pub model_call_limit: u32,
    #[serde(default = "default_tool_call_limit")]
    pub tool_call_limit: u32,
    #[serde(default = "bool_true")]
    pub context_editing_enabled: bool,
    #[serde(default = "default_context_edit_trigger_tokens")]
    pub context_edit_trigger_tokens: u32,
    #[serde(default = "default_context_edit_keep_recent")]
    pub context_edit_keep_recent: u32,
    #[serde(default = "bool_true")]
    pub loop_breaker_enabled: bool,
    #[serde(default = "default_loop_breaker_max_retries")]
    pub loop_breaker_max_retries: u32,
    #[serde(default = "default_loop_breaker_window_secs")]
    pub loop_breaker_window_secs: u64,
    #[serde(default = "bool_true")]
    pub memory_context_enabled: bool,
    #[serde(default = "default_memory_context_top_n")]
    pub memory_context_top_n: usize,
    #[serde(default = "bool_true")]
    pub instinct_injector_enabled: bool,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            summarization_enabled: true,
            summary_max_tokens: default_summary_max_tokens(),
            retry_enabled: true,
            retry_max_attempts: default_retry_attempts(),
            model_call_limit: default_model_call_limit(),
            tool_call_limit: default_tool_call_limit(),
            context_editing_enabled: true,
            context_edit_trigger_tokens: default_context_edit_trigger_tokens(),
            context_edit_keep_recent: default_context_edit_keep_recent(),
            loop_breaker_enabled: true,
            loop_breaker_max_retries: default_loop_breaker_max_retries(),
            loop_breaker_window_secs: default_loop_breaker_window_secs(),
            memory_context_enabled: true,
            memory_context_top_n: default_memory_context_top_n(),
            instinct_injector_enabled: true,
        }
    }
}

fn default_summary_max_tokens() -> u32 {
    8_000
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_model_call_limit() -> u32 {
    20
}
fn default_tool_call_limit() -> u32 {
    50
}
fn default_context_edit_trigger_tokens() -> u32 {
    50_000
}
fn default_context_edit_keep_recent() -> u32 {
    10
}
fn default_loop_breaker_max_retries() -> u32 {
    4
}
fn default_loop_breaker_window_secs() -> u64 {
    30
}
fn default_memory_context_top_n() -> usize {
    5
}

/// Scheduler subsystem tunables (§4.7, §6.5): tick interval and per-tool
/// timeouts shared with the reminder/flow firing path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_reminder_tick_interval_secs")]
    pub reminder_tick_interval_secs: u64,
    #[serde(default = "default_tool_timeout_secs")]
    pub default_tool_timeout_secs: u64,
    #[serde(default = "default_reminder_tool_timeout_secs")]
    pub reminder_tool_timeout_secs: u64,
    #[serde(default)]
    pub admin_user_ids: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            reminder_tick_interval_secs: default_reminder_tick_interval_secs(),
            default_tool_timeout_secs: default_tool_timeout_secs(),
            reminder_tool_timeout_secs: default_reminder_tool_timeout_secs(),
            admin_user_ids: Vec::new(),
        }
    }
}

fn default_tick_interval_secs() -> u64 {
    30
}
fn default_reminder_tick_interval_secs() -> u64 {
    30
}
fn default_tool_timeout_secs() -> u64 {
    45
}
fn default_reminder_tool_timeout_secs() -> u64 {
    25
}

/// Update subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Check for updates on server start (default: true).
    /// Override with env var: NEXUS_UPDATE_CHECK_ON_START=false
    #[serde(default = "bool_true")]
    pub check_on_start: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            check_on_start: true,
        }
    }
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            gateway: GatewayConfig {
                port: DEFAULT_PORT,
                bind: DEFAULT_BIND.to_string(),
                auth: AuthConfig {
                    mode: AuthMode::Token,
                    token: Some("change-me".to_string()),
                    password: None,
                },
            },
            agent: AgentConfig {
                model: "claude-sonnet-4-6".to_string(),
                soul_path: None,
            },
            providers: ProvidersConfig::default(),
            channels: ChannelsConfig::default(),
            webhooks: WebhooksConfig::default(),
            update: UpdateConfig::default(),
            storage: StorageConfig::default(),
            middleware: MiddlewareConfig::default(),
            scheduler: SchedulerConfig::default(),
            web: WebToolsConfig::default(),
            mcp: McpProxyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub token: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    Token,
    Password,
    Tailscale,
    DeviceToken,
    TrustedProxy,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    pub soul_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<AnthropicConfig>,
    pub openai: Option<OpenAiProviderConfig>,
    pub ollama: Option<OllamaConfig>,
    pub copilot: Option<CopilotConfig>,
    pub qwen_oauth: Option<QwenOAuthConfig>,
    pub bedrock: Option<BedrockConfig>,
    pub vertex: Option<VertexConfig>,
    /// Delegate to the Claude Code CLI instead of a direct API provider.
    pub claude_cli: Option<ClaudeCliConfig>,
    /// Additional OpenAI-compatible providers. Each entry can reference a
    /// well-known provider ID (e.g. "groq", "deepseek") or define a fully
    /// custom endpoint. Providers are tried in order after the primary slots.
    #[serde(default)]
    pub openai_compat: Vec<OpenAiCompatEntry>,
}

/// Claude Code CLI provider (§4.4 `ModelRetryMW` slot, no API key needed —
/// delegates tool execution and model calls to an installed `claude` binary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeCliConfig {
    /// Binary name or path (default: "claude", resolved via PATH).
    #[serde(default = "default_claude_cli_command")]
    pub command: String,
    /// Explicit path to the `nexus-gateway` binary for MCP bridge registration.
    /// When unset, auto-detected from `~/.nexus/nexus-gateway`.
    #[serde(default)]
    pub mcp_bridge: Option<String>,
    /// Tools allowed in pipe mode (`--allowedTools`). Empty = no restriction flag.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
}

fn default_claude_cli_command() -> String {
    "claude".to_string()
}

/// A single OpenAI-compatible provider entry.
///
/// Well-known provider IDs are resolved automatically:
/// `groq`, `deepseek`, `openrouter`, `xai`, `mistral`, `perplexity`,
/// `together`, `fireworks`, `cerebras`, `sambanova`, `hyperbolic`,
/// `novita`, `lepton`, `corethink`, `featherless`, `requesty`, `glama`,
/// `chutes`, `cohere`, `moonshot`, `glm`, `doubao`, `qwen`, `zai`,
/// `yi`, `minimax`, `hunyuan`, `stepfun`, `lmstudio`, `llamacpp`,
/// `localai`, `litellm`.
///
/// For unknown IDs, `base_url` is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiCompatEntry {
    /// Provider identifier — matches a known ID or a custom label.
    pub id: String,
    /// API key for this provider.
    pub api_key: String,
    /// Base URL (without trailing slash). Auto-filled from registry for known IDs.
    /// Required for custom/unknown providers.
    pub base_url: Option<String>,
    /// Override the chat completions path. Auto-filled from registry.
    /// Defaults to "/v1/chat/completions" when not in registry.
    pub chat_path: Option<String>,
    /// Override the model for requests routed to this provider.
    /// Falls back to `agent.model` when not set.
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

/// GitHub Copilot provider — reads a long-lived GitHub access token from file.
/// The token is exchanged for short-lived Copilot API keys at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopilotConfig {
    /// Path to file containing the GitHub access token (written by setup.sh).
    pub token_path: String,
}

/// Qwen OAuth provider — reads OAuth credentials (access + refresh token) from file.
/// Tokens are auto-refreshed at runtime when expired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QwenOAuthConfig {
    /// Path to JSON credentials file (written by setup.sh).
    pub credentials_path: String,
}

/// AWS Bedrock provider — uses SigV4 authentication.
/// Credentials from AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY env vars
/// or ~/.aws/credentials file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BedrockConfig {
    /// AWS region (e.g. "us-east-1").
    pub region: String,
    /// Optional AWS credentials profile name (default: "default").
    pub profile: Option<String>,
}

/// Google Vertex AI provider — uses service account JWT authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexConfig {
    /// Path to GCP service account JSON key file.
    pub key_file: String,
    /// GCP project ID. Auto-detected from key file if not set.
    pub project_id: Option<String>,
    /// GCP region (default: "us-central1").
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub telegram: Option<TelegramConfig>,
    pub discord: Option<DiscordConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: String,
    /// When true, guild messages are only processed when the bot is @mentioned.
    /// Defaults to false (respond to all messages in channels).
    #[serde(default)]
    pub require_mention: bool,
    /// When true, direct messages (DMs) are accepted.
    /// Defaults to true.
    #[serde(default = "bool_true")]
    pub dm_allowed: bool,
}

fn bool_true() -> bool {
    true
}

/// Authentication mode for an incoming webhook source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum WebhookAuthMode {
    /// HMAC-SHA256 over the raw request body (GitHub-style X-Hub-Signature-256).
    HmacSha256,
    /// Static bearer token in the Authorization header.
    BearerToken,
    /// No authentication — use only for internal/trusted networks.
    None,
}

/// Configuration for a single webhook source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSourceConfig {
    /// Identifier used in the route, e.g. "github" → POST /webhooks/github.
    pub name: String,
    /// HMAC signing secret or bearer token value.
    pub secret: Option<String>,
    /// How the incoming request should be authenticated.
    pub auth_mode: WebhookAuthMode,
}

/// Top-level webhooks subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhooksConfig {
    /// When false the /webhooks/:source route returns 404.
    #[serde(default)]
    pub enabled: bool,
    /// List of allowed webhook sources and their auth settings.
    #[serde(default)]
    pub sources: Vec<WebhookSourceConfig>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.nexus/nexus.db", home)
}

impl NexusConfig {
    /// Load config from a TOML file with NEXUS_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.nexus/nexus.toml  (native)
    ///   3. ~/.openclaw/openclaw.json  (migration path — Phase 2)
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: NexusConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("NEXUS_").split("_"))
            .extract()
            .map_err(|e| crate::error::NexusError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.nexus/nexus.toml", home)
}
