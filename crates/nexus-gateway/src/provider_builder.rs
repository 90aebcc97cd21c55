//! Constructs the active `LlmProvider` from config (§4.4, `ModelRetryMW` slot).
//!
//! Priority mirrors `mcp_lifecycle::uses_claude_cli`:
//!   1. Every explicitly configured provider slot (`providers.*`, in config
//!      declaration order below), each wrapped in a `ProviderRouter` slot so
//!      a failing provider falls through to the next.
//!   2. If nothing is configured: well-known env vars (Anthropic, then OpenAI).
//!   3. Last resort: `claude` CLI auto-detected on PATH.

use nexus_agent::anthropic::AnthropicProvider;
use nexus_agent::bedrock::BedrockProvider;
use nexus_agent::claude_cli::ClaudeCliProvider;
use nexus_agent::copilot::CopilotProvider;
use nexus_agent::ollama::OllamaProvider;
use nexus_agent::openai::OpenAiProvider;
use nexus_agent::provider::LlmProvider;
use nexus_agent::qwen_oauth::QwenOAuthProvider;
use nexus_agent::registry;
use nexus_agent::router::{ProviderRouter, ProviderSlot};
use nexus_agent::vertex::VertexProvider;
use nexus_core::config::NexusConfig;
use tracing::{info, warn};

/// Retries attempted on a provider slot before the router falls through to
/// the next configured provider.
const SLOT_MAX_RETRIES: u32 = 2;

pub fn build_provider(config: &NexusConfig) -> anyhow::Result<Box<dyn LlmProvider>> {
    let mut slots: Vec<ProviderSlot> = Vec::new();

    if let Some(ref cfg) = config.providers.anthropic {
        info!("provider slot: anthropic");
        slots.push(ProviderSlot::new(
            Box::new(AnthropicProvider::new(
                cfg.api_key.clone(),
                Some(cfg.base_url.clone()),
            )),
            SLOT_MAX_RETRIES,
        ));
    }
    if let Some(ref cfg) = config.providers.openai {
        info!("provider slot: openai");
        slots.push(ProviderSlot::new(
            Box::new(OpenAiProvider::new(
                cfg.api_key.clone(),
                Some(cfg.base_url.clone()),
            )),
            SLOT_MAX_RETRIES,
        ));
    }
    if let Some(ref cfg) = config.providers.ollama {
        info!("provider slot: ollama");
        slots.push(ProviderSlot::new(
            Box::new(OllamaProvider::new(Some(cfg.base_url.clone()))),
            SLOT_MAX_RETRIES,
        ));
    }
    if let Some(ref cfg) = config.providers.copilot {
        match CopilotProvider::from_file(&cfg.token_path) {
            Ok(provider) => {
                info!("provider slot: copilot");
                slots.push(ProviderSlot::new(Box::new(provider), SLOT_MAX_RETRIES));
            }
            Err(e) => warn!(error = %e, "copilot provider configured but token load failed"),
        }
    }
    if let Some(ref cfg) = config.providers.qwen_oauth {
        match QwenOAuthProvider::from_file(&cfg.credentials_path) {
            Ok(provider) => {
                info!("provider slot: qwen-oauth");
                slots.push(ProviderSlot::new(Box::new(provider), SLOT_MAX_RETRIES));
            }
            Err(e) => warn!(error = %e, "qwen-oauth provider configured but credential load failed"),
        }
    }
    if let Some(ref cfg) = config.providers.bedrock {
        match BedrockProvider::from_env(cfg.region.clone(), cfg.profile.as_deref()) {
            Ok(provider) => {
                info!("provider slot: bedrock");
                slots.push(ProviderSlot::new(Box::new(provider), SLOT_MAX_RETRIES));
            }
            Err(e) => warn!(error = %e, "bedrock provider configured but credential load failed"),
        }
    }
    if let Some(ref cfg) = config.providers.vertex {
        match VertexProvider::from_file(&cfg.key_file, cfg.project_id.clone(), cfg.location.clone()) {
            Ok(provider) => {
                info!("provider slot: vertex");
                slots.push(ProviderSlot::new(Box::new(provider), SLOT_MAX_RETRIES));
            }
            Err(e) => warn!(error = %e, "vertex provider configured but key file load failed"),
        }
    }
    for entry in &config.providers.openai_compat {
        match openai_compat_provider(entry) {
            Ok(provider) => {
                info!(id = %entry.id, "provider slot: openai-compat");
                slots.push(ProviderSlot::new(provider, SLOT_MAX_RETRIES));
            }
            Err(e) => warn!(id = %entry.id, error = %e, "openai-compat provider entry rejected"),
        }
    }

    if !slots.is_empty() {
        return Ok(Box::new(ProviderRouter::new(slots)));
    }

    // Nothing explicit configured — fall back to env vars, then claude-cli.
    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        info!("provider: anthropic (from ANTHROPIC_API_KEY)");
        return Ok(Box::new(AnthropicProvider::new(key, None)));
    }
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        info!("provider: openai (from OPENAI_API_KEY)");
        return Ok(Box::new(OpenAiProvider::new(key, None)));
    }

    if let Some(ref cli_cfg) = config.providers.claude_cli {
        info!(command = %cli_cfg.command, "provider: claude-cli (explicit config)");
        return Ok(Box::new(
            ClaudeCliProvider::new(cli_cfg.command.clone())
                .with_mcp_bridge(cli_cfg.mcp_bridge.clone())
                .with_allowed_tools(cli_cfg.allowed_tools.clone()),
        ));
    }

    if which::which("claude").is_ok() {
        info!("provider: claude-cli (auto-detected on PATH)");
        return Ok(Box::new(ClaudeCliProvider::new("claude".to_string())));
    }

    anyhow::bail!(
        "no LLM provider configured — set providers.* in nexus.toml, export \
         ANTHROPIC_API_KEY/OPENAI_API_KEY, or install the claude CLI"
    )
}

/// Resolve one `openai_compat` entry against the well-known provider
/// registry, falling back to the entry's own `base_url`/`chat_path` for
/// unrecognized or fully custom ids.
fn openai_compat_provider(
    entry: &nexus_core::config::OpenAiCompatEntry,
) -> anyhow::Result<Box<dyn LlmProvider>> {
    let known = registry::lookup(&entry.id);

    let base_url = entry
        .base_url
        .clone()
        .or_else(|| known.map(|k| k.base_url.to_string()))
        .ok_or_else(|| anyhow::anyhow!("unknown provider id '{}' requires base_url", entry.id))?;

    let chat_path = entry
        .chat_path
        .clone()
        .or_else(|| known.map(|k| k.chat_path.to_string()))
        .unwrap_or_else(|| "/v1/chat/completions".to_string());

    Ok(Box::new(OpenAiProvider::with_path(
        entry.id.clone(),
        entry.api_key.clone(),
        base_url,
        chat_path,
    )))
}
