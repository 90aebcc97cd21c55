//! Tool registry — builds the canonical tool list for any channel adapter.

use std::sync::Arc;

use nexus_core::storage::FileSandbox;
use nexus_core::workspace::WorkspaceId;
use nexus_sessions::types::SessionKey;

use crate::pipeline::context::MessageContext;
use crate::provider::ToolDefinition;

use super::bash_session::BashSessionTool;
use super::execute_command::ExecuteCommandTool;
use super::knowledge::{KnowledgeSearchTool, KnowledgeWriteTool};
use super::link_identity::LinkIdentityTool;
use super::mcp_proxy::McpProxyTool;
use super::memory::{MemoryRecallTool, MemoryRememberTool};
use super::ocr::OcrExtractTool;
use super::reminder::ReminderTool;
use super::send_message::SendMessageTool;
use super::skill::{format_skill_index, load_skills, SkillReadTool};
use super::web_scrape::WebScrapeTool;
use super::web_search::WebSearchTool;
use super::{to_definitions, Tool};

/// Output of [`build_tools`]: the tool list plus the rendered skill index
/// (injected into the volatile prompt tier by the caller).
pub struct BuiltTools {
    pub tools: Vec<Box<dyn Tool>>,
    pub skill_index: String,
}

/// Build the full list of tools available to the AI for a given request.
///
/// Includes:
/// - `read_file`, `write_file`, `list_files`, `search_files`, `patch_file` (filesystem)
/// - `execute_command` (one-shot sh -c via TerminalManager)
/// - `bash` (persistent PTY bash session via TerminalManager)
/// - `reminder` (schedule proactive reminders via the scheduler)
/// - `knowledge_search` / `knowledge_write` (FTS5 knowledge base)
/// - `send_message` / `link_identity` (cross-channel identity and messaging, C1/C6)
/// - `memory_remember` / `memory_recall` (agent-facing recall memory, C9)
/// - `web_search` / `web_scrape` (public web lookup and page fetch)
/// - `mcp_proxy` (dispatch to a configured external MCP server)
/// - `ocr_extract` (extract text from a sandboxed image/document)
/// - `skill_read` (only registered when at least one SKILL.md is discovered)
/// - any `~/.nexus/tools/*.toml` script plugins
///
/// `channel_name` and `channel_id` are forwarded to `ReminderTool` so it can
/// embed the correct delivery target in the persisted job action; `session_key`
/// additionally threads through for HTTP/terminal notification routing.
pub fn build_tools<C: MessageContext + 'static>(
    ctx: Arc<C>,
    channel_name: &str,
    channel_id: Option<u64>,
    session_key: Option<&str>,
) -> BuiltTools {
    let sandbox = file_sandbox_for_session(&ctx, session_key);
    let thread_id = session_key.unwrap_or("default").to_string();

    let mut tools: Vec<Box<dyn Tool>> = vec![
        Box::new(super::read_file::ReadFileTool::new(sandbox.clone())),
        Box::new(super::write_file::WriteFileTool::new(sandbox.clone())),
        Box::new(super::list_files::ListFilesTool::new(sandbox.clone())),
        Box::new(super::search_files::SearchFilesTool::new(sandbox.clone())),
        Box::new(super::patch_file::PatchFileTool::new(sandbox.clone())),
        Box::new(ExecuteCommandTool::new(Arc::clone(&ctx))),
        Box::new(BashSessionTool::new(Arc::clone(&ctx))),
        Box::new(ReminderTool::new(
            Arc::clone(&ctx),
            channel_name,
            channel_id,
            session_key,
        )),
        Box::new(KnowledgeSearchTool::new(Arc::clone(&ctx))),
        Box::new(KnowledgeWriteTool::new(Arc::clone(&ctx))),
        Box::new(SendMessageTool::new(Arc::clone(&ctx))),
        Box::new(LinkIdentityTool::new(Arc::clone(&ctx), None)),
        Box::new(MemoryRememberTool::new(Arc::clone(&ctx), thread_id.clone())),
        Box::new(MemoryRecallTool::new(Arc::clone(&ctx), thread_id.clone())),
        Box::new(WebSearchTool::new(Arc::clone(&ctx))),
        Box::new(WebScrapeTool::new(Arc::clone(&ctx))),
        Box::new(McpProxyTool::new(Arc::clone(&ctx))),
        Box::new(OcrExtractTool::new(Arc::clone(&ctx), sandbox)),
    ];

    // Load script plugins from ~/.nexus/tools/ — no restart needed after adding a plugin,
    // tools are re-scanned on each build_tools() call (i.e. each new message).
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let tools_dir = std::path::Path::new(&home).join(".nexus/tools");
    tools.extend(super::script_tool::load_script_tools(&tools_dir));

    // Host-contributed tools (e.g. flow management) that would otherwise
    // create a circular crate dependency — see `MessageContext::extra_tools`.
    tools.extend(C::extra_tools(&ctx, &thread_id));

    // Skills are optional — only pay for the tool + index when any exist.
    let skills = load_skills();
    let skill_index = format_skill_index(&skills);
    if !skills.is_empty() {
        tools.push(Box::new(SkillReadTool::new(skills)));
    }

    BuiltTools { tools, skill_index }
}

/// Convert a tool list to API-level definitions for the LLM request.
pub fn tool_definitions(tools: &[Box<dyn Tool>]) -> Vec<ToolDefinition> {
    to_definitions(tools)
}

/// Derive the workspace scoping the filesystem tools for this turn, and
/// build a `FileSandbox` rooted at that workspace's `files_root` (§4.2).
///
/// `session_key` is the wire-format `SessionKey` string (`user:{id}:agent:{id}:{name}`);
/// a missing or unparseable key falls back to a shared `"default"` workspace
/// rather than failing tool construction outright.
fn file_sandbox_for_session<C: MessageContext + 'static>(
    ctx: &Arc<C>,
    session_key: Option<&str>,
) -> FileSandbox {
    let canonical_user_id = session_key
        .and_then(|key| SessionKey::parse(key).ok())
        .map(|parsed| parsed.user_id);

    let workspace_id = match canonical_user_id {
        Some(user_id) => {
            let canonical = ctx
                .workspace_resolver()
                .resolve_alias(&user_id)
                .unwrap_or(user_id);
            ctx.workspace_resolver()
                .ensure_workspace(&canonical)
                .unwrap_or_else(|_| WorkspaceId::from(canonical))
        }
        None => WorkspaceId::from("default"),
    };

    let paths = ctx.storage().paths_for(&workspace_id);
    let _ = ctx.storage().ensure_dirs(&paths);

    let storage_config = ctx.storage_config();
    FileSandbox::new(
        paths.files_root,
        storage_config.allowed_extensions.clone(),
        storage_config.max_file_size_mb * 1024 * 1024,
    )
}
