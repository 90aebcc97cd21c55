//! Sequential multi-agent flow execution (C8, spec §4.8).
//!
//! Grounded on `original_source/executive_assistant/flows/runner.py`:
//! each [`crate::spec::AgentSpec`] runs through the ordinary tool loop (C4),
//! its output is carved from the final message and accumulated into
//! `previous_outputs`, and the whole run terminates the backing
//! [`ScheduledFlow`] row via [`ScheduledFlowStore`].

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use nexus_agent::pipeline::context::MessageContext;
use nexus_agent::provider::{ChatRequest, Role};
use nexus_agent::tools::build::build_tools;
use nexus_agent::tools::tool_loop::{run_tool_loop, ToolLoopLimits};
use nexus_scheduler::flows_store::ScheduledFlow;
use nexus_scheduler::ScheduledFlowStore;

use crate::error::{FlowError, Result};
use crate::spec::{AgentSpec, FlowSpec, FLOW_TOOL_NAMES};

/// Execute one due [`ScheduledFlow`] end to end: parse, run every step,
/// persist the terminal state, send notifications, and enqueue the next
/// recurrence. Failures are always persisted to the row before being
/// returned — the caller only needs to log.
pub async fn execute_flow<C: MessageContext + 'static>(
    flow: &ScheduledFlow,
    store: &ScheduledFlowStore,
    ctx: &Arc<C>,
) -> Result<Value> {
    let flow_spec = match FlowSpec::parse(&flow.flow_spec, &flow.owner_user) {
        Ok(spec) => spec,
        Err(e) => {
            let _ = store.mark_failed(&flow.id, &format!("invalid flow spec: {e}"));
            return Err(e);
        }
    };

    match run_steps(&flow_spec, flow, ctx).await {
        Ok(results) => {
            let result_payload = json!({ "results": results }).to_string();
            store.mark_completed(&flow.id, &result_payload)?;
            info!(flow_id = %flow.id, name = %flow_spec.name, "flow completed");

            if flow_spec.notify_on_complete {
                notify(ctx, &flow_spec, &format!("Flow completed: {}", flow_spec.name)).await;
            }

            if let Some(ref cron) = flow_spec.cron_expression {
                let next_due = nexus_scheduler::cron::compute_next_run(cron, chrono::Utc::now());
                if let Err(e) = store.create_successor(flow, next_due) {
                    error!(flow_id = %flow.id, "failed to enqueue next flow instance: {e}");
                }
            }

            Ok(json!({ "status": "completed", "results": results }))
        }
        Err(e) => {
            let _ = store.mark_failed(&flow.id, &e.to_string());
            warn!(flow_id = %flow.id, name = %flow_spec.name, "flow failed: {e}");

            if flow_spec.notify_on_failure {
                notify(ctx, &flow_spec, &format!("Flow failed: {}", flow_spec.name)).await;
            }

            Err(e)
        }
    }
}

async fn run_steps<C: MessageContext + 'static>(
    flow_spec: &FlowSpec,
    flow: &ScheduledFlow,
    ctx: &Arc<C>,
) -> Result<Vec<Value>> {
    let mut previous_outputs = Map::new();
    let mut results = Vec::with_capacity(flow_spec.agents.len());

    for agent_spec in &flow_spec.agents {
        let output = run_agent_step(agent_spec, &previous_outputs, &flow.thread_id, ctx).await?;
        previous_outputs.insert(agent_spec.agent_id.clone(), output.clone());
        results.push(json!({
            "agent_id": agent_spec.agent_id,
            "status": "success",
            "output": output,
        }));
    }

    Ok(results)
}

/// Run one flow step: a fresh tool set is built and filtered down to this
/// step's declared `tools` (minus [`FLOW_TOOL_NAMES`]), mirroring the
/// original's per-step `get_tools_by_name` call.
async fn run_agent_step<C: MessageContext + 'static>(
    agent_spec: &AgentSpec,
    previous_outputs: &Map<String, Value>,
    thread_id: &str,
    ctx: &Arc<C>,
) -> Result<Value> {
    let mut tools = build_tools(Arc::clone(ctx), "flow", None, Some(thread_id)).tools;
    tools.retain(|t| {
        agent_spec.tools.iter().any(|name| name == t.name()) && !FLOW_TOOL_NAMES.contains(&t.name())
    });
    let tool_defs = nexus_agent::tools::to_definitions(&tools);

    let prompt = build_prompt(&agent_spec.system_prompt, previous_outputs);
    let model = match &agent_spec.model {
        Some(m) if !m.is_empty() => m.clone(),
        _ => ctx.agent().get_model().await,
    };

    let request = ChatRequest {
        model,
        system: prompt,
        system_prompt: None,
        messages: Vec::new(),
        max_tokens: 4096,
        stream: false,
        thinking: None,
        tools: tool_defs,
        raw_messages: Some(vec![json!({
            "role": Role::User,
            "content": "Execute your task.",
        })]),
    };

    let limits = ToolLoopLimits::from(ctx.middleware_config());
    let (response, _called) = run_tool_loop(
        ctx.agent().provider(),
        request,
        &tools,
        None,
        thread_id,
        ctx.loop_breaker(),
        &limits,
    )
    .await
    .map_err(FlowError::Provider)?;

    extract_structured_output(&agent_spec.agent_id, &response.content, agent_spec.output_schema.as_ref())
}

/// Replace the literal `$previous_output` token with a pretty JSON dump of
/// every earlier step's output. A no-op when nothing has run yet.
fn build_prompt(system_prompt: &str, previous_outputs: &Map<String, Value>) -> String {
    if previous_outputs.is_empty() {
        return system_prompt.to_string();
    }
    let dump = serde_json::to_string_pretty(previous_outputs).unwrap_or_default();
    system_prompt.replace("$previous_output", &dump)
}

/// Carve the first `{` .. last `}` substring out of `content` and parse it
/// as JSON. Without a schema, the raw text is wrapped as `{"raw": content}`.
fn extract_structured_output(agent_id: &str, content: &str, schema: Option<&Value>) -> Result<Value> {
    if schema.is_none() {
        return Ok(json!({ "raw": content }));
    }

    let start = content.find('{');
    let end = content.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => {
            serde_json::from_str(&content[s..=e]).map_err(|err| FlowError::StepOutputInvalid {
                agent_id: agent_id.to_string(),
                reason: err.to_string(),
            })
        }
        _ => Err(FlowError::StepOutputInvalid {
            agent_id: agent_id.to_string(),
            reason: "no JSON object found in agent output".to_string(),
        }),
    }
}

async fn notify<C: MessageContext + 'static>(ctx: &Arc<C>, flow_spec: &FlowSpec, message: &str) {
    for channel in &flow_spec.notification_channels {
        if let Err(e) = ctx.send_to_channel(channel, &flow_spec.owner, message) {
            warn!(channel = %channel, "flow notification delivery failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_substitution_is_noop_when_empty() {
        let prompt = build_prompt("Summarize: $previous_output", &Map::new());
        assert_eq!(prompt, "Summarize: $previous_output");
    }

    #[test]
    fn prompt_substitution_injects_json() {
        let mut prev = Map::new();
        prev.insert("step1".to_string(), json!({"answer": 42}));
        let prompt = build_prompt("Use $previous_output here", &prev);
        assert!(prompt.contains("\"answer\""));
        assert!(prompt.contains("42"));
    }

    #[test]
    fn extract_without_schema_wraps_raw() {
        let out = extract_structured_output("a1", "just text", None).unwrap();
        assert_eq!(out, json!({"raw": "just text"}));
    }

    #[test]
    fn extract_with_schema_carves_json() {
        let content = "Here is my result: {\"status\": \"ok\", \"n\": 3} — done.";
        let out = extract_structured_output("a1", content, Some(&json!({"type": "object"}))).unwrap();
        assert_eq!(out["status"], "ok");
        assert_eq!(out["n"], 3);
    }

    #[test]
    fn extract_with_schema_fails_without_json() {
        let err = extract_structured_output("a1", "no braces here", Some(&json!({}))).unwrap_err();
        assert_eq!(err.code(), "SCHEMA_VIOLATION");
    }
}
