//! Tool execution loop — the core agentic behavior (C4, composed with C5).
//!
//! Flow: prompt → LLM → if tool_use → execute tools → inject results → LLM → repeat
//! Stops when: stop_reason is not "tool_use", a limit trips, cancelled, or error.
//!
//! The middleware behaviors named by §4.5 are folded directly into this loop
//! rather than as a generic hook chain, matching the teacher's preference for
//! a few concrete, readable functions over a pluggable pipeline abstraction:
//! `ModelCallLimitMW`/`ToolCallLimitMW` are `ToolLoopLimits`, `ContextEditingMW`
//! is `apply_context_editing`, and `ToolLoopBreaker` is the `loop_breaker`
//! module this file drives per tool call.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nexus_core::config::MiddlewareConfig;

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ToolCall};

use super::loop_breaker::ToolLoopBreaker;
use super::{Tool, ToolResult};

/// Fallback limits when no `MiddlewareConfig` is available (matches the
/// config defaults).
const DEFAULT_MODEL_CALL_LIMIT: usize = 20;
const DEFAULT_TOOL_CALL_LIMIT: usize = 50;

/// Resolved per-run limits for one tool loop invocation (§4.5
/// `ModelCallLimitMW`/`ToolCallLimitMW`/`ContextEditingMW`/`ToolLoopBreaker`).
#[derive(Debug, Clone)]
pub struct ToolLoopLimits {
    pub model_call_limit: usize,
    pub tool_call_limit: usize,
    pub context_editing_enabled: bool,
    pub context_edit_trigger_tokens: usize,
    pub context_edit_keep_recent: usize,
    pub loop_breaker_enabled: bool,
    pub loop_breaker_max_retries: u32,
    pub loop_breaker_window: Duration,
}

impl Default for ToolLoopLimits {
    fn default() -> Self {
        Self {
            model_call_limit: DEFAULT_MODEL_CALL_LIMIT,
            tool_call_limit: DEFAULT_TOOL_CALL_LIMIT,
            context_editing_enabled: true,
            context_edit_trigger_tokens: 50_000,
            context_edit_keep_recent: 10,
            loop_breaker_enabled: true,
            loop_breaker_max_retries: 4,
            loop_breaker_window: Duration::from_secs(30),
        }
    }
}

impl From<&MiddlewareConfig> for ToolLoopLimits {
    fn from(cfg: &MiddlewareConfig) -> Self {
        Self {
            model_call_limit: cfg.model_call_limit as usize,
            tool_call_limit: cfg.tool_call_limit as usize,
            context_editing_enabled: cfg.context_editing_enabled,
            context_edit_trigger_tokens: cfg.context_edit_trigger_tokens as usize,
            context_edit_keep_recent: cfg.context_edit_keep_recent as usize,
            loop_breaker_enabled: cfg.loop_breaker_enabled,
            loop_breaker_max_retries: cfg.loop_breaker_max_retries,
            loop_breaker_window: Duration::from_secs(cfg.loop_breaker_window_secs),
        }
    }
}

/// Run the full tool execution loop (non-streaming).
///
/// Starts from `initial_request`, which must have `messages` or `raw_messages` set.
/// Returns the final `ChatResponse` (the one with `stop_reason != "tool_use"`) plus
/// the ordered list of tool names invoked during the loop (for usage tracking).
///
/// When `cancel` fires mid-loop, the loop stops after the current iteration's
/// tool results are appended and returns the last response seen so far.
///
/// `thread_id` scopes the loop breaker's call-signature tracking; `breaker`
/// is typically held once per process and shared across turns.
#[allow(clippy::too_many_arguments)]
pub async fn run_tool_loop(
    provider: &dyn LlmProvider,
    initial_request: ChatRequest,
    tools: &[Box<dyn Tool>],
    cancel: Option<&CancellationToken>,
    thread_id: &str,
    breaker: &ToolLoopBreaker,
    limits: &ToolLoopLimits,
) -> Result<(ChatResponse, Vec<String>), crate::provider::ProviderError> {
    // Build initial raw JSON message list from the structured messages.
    let mut raw_messages: Vec<serde_json::Value> =
        if let Some(ref raw) = initial_request.raw_messages {
            raw.clone()
        } else {
            initial_request
                .messages
                .iter()
                .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
                .collect()
        };

    let mut last_response: Option<ChatResponse> = None;
    let mut called_tools: Vec<String> = Vec::new();
    let mut total_tool_calls: usize = 0;

    for iteration in 0..limits.model_call_limit {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            info!(iteration, "tool loop cancelled");
            break;
        }

        if limits.context_editing_enabled
            && estimate_tokens(&raw_messages) > limits.context_edit_trigger_tokens
        {
            apply_context_editing(&mut raw_messages, limits.context_edit_keep_recent);
        }

        // Build the request for this iteration, injecting the full message history.
        let mut req = initial_request.clone();
        req.raw_messages = Some(raw_messages.clone());

        debug!(iteration, "tool loop iteration");

        let response = provider.send(&req).await?;

        if response.tool_calls.is_empty() || response.stop_reason != "tool_use" {
            info!(iteration, "tool loop complete — no more tool calls");
            return Ok((response, called_tools));
        }

        if total_tool_calls + response.tool_calls.len() > limits.tool_call_limit {
            warn!(
                total_tool_calls,
                limit = limits.tool_call_limit,
                "tool call limit reached — stopping loop"
            );
            return Ok((stop_response(&response, "tool call limit reached"), called_tools));
        }

        // Build the assistant turn content block list.
        // It includes any text content plus the tool_use blocks.
        let mut assistant_content: Vec<serde_json::Value> = Vec::new();

        if !response.content.is_empty() {
            assistant_content.push(serde_json::json!({
                "type": "text",
                "text": response.content,
            }));
        }

        for call in &response.tool_calls {
            assistant_content.push(serde_json::json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.input,
            }));
        }

        // Append the assistant message.
        raw_messages.push(serde_json::json!({
            "role": "assistant",
            "content": assistant_content,
        }));

        // Execute each tool call and collect results.
        let mut tool_result_content: Vec<serde_json::Value> = Vec::new();

        for call in &response.tool_calls {
            total_tool_calls += 1;

            if limits.loop_breaker_enabled {
                let sig = ToolLoopBreaker::arg_signature(&call.input);
                let tripped = breaker.record(
                    thread_id,
                    &call.name,
                    &sig,
                    limits.loop_breaker_window,
                    limits.loop_breaker_max_retries,
                );
                if tripped {
                    warn!(tool = %call.name, thread_id, "tool loop breaker tripped — refusing call");
                    called_tools.push(call.name.clone());
                    tool_result_content.push(serde_json::json!({
                        "type": "tool_result",
                        "tool_use_id": call.id,
                        "content": format!(
                            "This exact call to '{}' has been retried {} times with the same arguments in the last {}s. \
                             The arguments are likely wrong (e.g. a structured value passed where a plain string is \
                             expected) — do not repeat this call; change the arguments or pick a different approach.",
                            call.name, limits.loop_breaker_max_retries, limits.loop_breaker_window.as_secs()
                        ),
                        "is_error": true,
                    }));
                    continue;
                }
            }

            let result = execute_tool(tools, call).await;
            if !result.is_error {
                breaker.reset(thread_id, &call.name);
            }
            called_tools.push(call.name.clone());
            tool_result_content.push(serde_json::json!({
                "type": "tool_result",
                "tool_use_id": call.id,
                "content": result.content,
                "is_error": result.is_error,
            }));
        }

        // Append the user message containing all tool results.
        raw_messages.push(serde_json::json!({
            "role": "user",
            "content": tool_result_content,
        }));

        last_response = Some(response);
    }

    if let Some(resp) = last_response {
        Ok((resp, called_tools))
    } else {
        warn!(
            max_iterations = limits.model_call_limit,
            "tool loop hit maximum iterations without a final response"
        );
        Err(crate::provider::ProviderError::Parse(format!(
            "tool loop exceeded {} iterations without a final response",
            limits.model_call_limit
        )))
    }
}

/// Synthesize a terminal response when a hard limit trips mid-loop, carrying
/// over whatever text the model had already produced this turn.
fn stop_response(last: &ChatResponse, reason: &str) -> ChatResponse {
    let mut resp = last.clone();
    resp.stop_reason = "max_calls_reached".to_string();
    resp.tool_calls.clear();
    if resp.content.is_empty() {
        resp.content = format!("[stopped: {reason}]");
    } else {
        resp.content = format!("{}\n\n[stopped: {reason}]", resp.content);
    }
    resp
}

/// Rough token estimate (chars / 4) — good enough to decide when to trim,
/// not meant to match any provider's actual tokenizer.
fn estimate_tokens(raw_messages: &[serde_json::Value]) -> usize {
    raw_messages
        .iter()
        .map(|m| m.to_string().len() / 4)
        .sum()
}

/// §4.5 `ContextEditingMW`: elide `tool_result` content on all but the most
/// recent `keep_recent` tool-result messages. `tool_use` blocks are kept
/// (the API requires every `tool_use` to be paired with a `tool_result`);
/// only the result payload text is replaced. Human/assistant text messages
/// are never touched.
fn apply_context_editing(raw_messages: &mut [serde_json::Value], keep_recent: usize) {
    let tool_result_indices: Vec<usize> = raw_messages
        .iter()
        .enumerate()
        .filter(|(_, m)| is_tool_result_message(m))
        .map(|(i, _)| i)
        .collect();

    if tool_result_indices.len() <= keep_recent {
        return;
    }

    let elide_count = tool_result_indices.len() - keep_recent;
    for &idx in &tool_result_indices[..elide_count] {
        if let Some(blocks) = raw_messages[idx].get_mut("content").and_then(|c| c.as_array_mut()) {
            for block in blocks.iter_mut() {
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_result") {
                    block["content"] =
                        serde_json::json!("[elided — superseded by more recent tool output]");
                }
            }
        }
    }
}

fn is_tool_result_message(message: &serde_json::Value) -> bool {
    if message.get("role").and_then(|r| r.as_str()) != Some("user") {
        return false;
    }
    message
        .get("content")
        .and_then(|c| c.as_array())
        .is_some_and(|blocks| {
            blocks
                .iter()
                .any(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_result"))
        })
}

/// Find and execute the named tool. Falls back to a squashed-lowercase
/// (strip `_`/`-`) match before giving up, since models occasionally emit a
/// close variant of the registered name (`readFile` vs `read_file`).
async fn execute_tool(tools: &[Box<dyn Tool>], call: &ToolCall) -> ToolResult {
    let exact = tools.iter().find(|t| t.name() == call.name);
    let found = exact.or_else(|| {
        let squashed = squash_name(&call.name);
        tools.iter().find(|t| squash_name(t.name()) == squashed)
    });

    match found {
        Some(tool) => {
            debug!(tool = %call.name, "executing tool");
            tool.execute(call.input.clone()).await
        }
        None => ToolResult::error(format!("unknown tool: {}", call.name)),
    }
}

fn squash_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squash_name_ignores_separators_and_case() {
        assert_eq!(squash_name("read_file"), squash_name("Read-File"));
    }

    #[test]
    fn context_editing_elides_old_tool_results_only() {
        let mut messages = vec![
            serde_json::json!({"role": "user", "content": "hi"}),
            serde_json::json!({"role": "assistant", "content": [{"type": "tool_use", "id": "1", "name": "x", "input": {}}]}),
            serde_json::json!({"role": "user", "content": [{"type": "tool_result", "tool_use_id": "1", "content": "old output", "is_error": false}]}),
            serde_json::json!({"role": "assistant", "content": [{"type": "tool_use", "id": "2", "name": "x", "input": {}}]}),
            serde_json::json!({"role": "user", "content": [{"type": "tool_result", "tool_use_id": "2", "content": "new output", "is_error": false}]}),
        ];
        apply_context_editing(&mut messages, 1);
        assert_eq!(messages[2]["content"][0]["content"], serde_json::json!("[elided — superseded by more recent tool output]"));
        assert_eq!(messages[4]["content"][0]["content"], serde_json::json!("new output"));
        assert_eq!(messages[0]["content"], serde_json::json!("hi"));
    }
}
