//! Flow management tools — `create_flow`, `list_flows`, `run_flow`,
//! `cancel_flow`, `delete_flow` (grounded on
//! `original_source/executive_assistant/tools/flow_tools.py`).
//!
//! These live in `nexus-flows` rather than `nexus-agent` because `run_flow`
//! needs [`crate::runner::execute_flow`], and `nexus-flows` already depends
//! on `nexus-agent` (the reverse dependency would be circular).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use nexus_agent::pipeline::context::MessageContext;
use nexus_agent::tools::{Tool, ToolResult};
use nexus_scheduler::flows_store::NewScheduledFlow;
use nexus_scheduler::time_parse::parse_time_expression;

use crate::runner::execute_flow;
use crate::spec::{AgentSpec, FlowSpec, ScheduleType};

/// Creates a flow (immediate, scheduled, or recurring) for the calling session.
pub struct CreateFlowTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
    thread_id: String,
}

impl<C: MessageContext + 'static> CreateFlowTool<C> {
    pub fn new(ctx: Arc<C>, thread_id: &str) -> Self {
        Self {
            ctx,
            thread_id: thread_id.to_string(),
        }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for CreateFlowTool<C> {
    fn name(&self) -> &str {
        "create_flow"
    }

    fn description(&self) -> &str {
        "Create a flow: a sequential chain of sub-agents, each with its own model, \
         tool subset, and system prompt. A step's prompt may reference $previous_output \
         to see every earlier step's JSON output. Run it immediately, at a specific time, \
         or on a recurring cron schedule."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Human-readable flow name."},
                "description": {"type": "string", "description": "What this flow accomplishes."},
                "agents": {
                    "type": "array",
                    "description": "Ordered list of steps.",
                    "items": {
                        "type": "object",
                        "properties": {
                            "agent_id": {"type": "string", "description": "Unique key for this step's output."},
                            "model": {"type": "string", "description": "Optional model override."},
                            "tools": {"type": "array", "items": {"type": "string"}, "description": "Tool names available to this step. Flow-management tools are always stripped."},
                            "system_prompt": {"type": "string", "description": "This step's instructions. May contain $previous_output."},
                            "output_schema": {"type": "object", "description": "If present, the step's final message must contain a JSON object; it is parsed and stored as this step's output."}
                        },
                        "required": ["agent_id", "system_prompt"]
                    }
                },
                "schedule_type": {"type": "string", "enum": ["immediate", "scheduled", "recurring"], "description": "Default 'immediate'."},
                "schedule_time": {"type": "string", "description": "Natural-language or ISO time expression. Required when schedule_type='scheduled'."},
                "cron_expression": {"type": "string", "description": "5-field cron, '@daily'-style shortcut, or 'daily at HH:MM'. Required when schedule_type='recurring'."},
                "notify_on_complete": {"type": "boolean", "description": "Default false."},
                "notify_on_failure": {"type": "boolean", "description": "Default true."},
                "notification_channels": {"type": "array", "items": {"type": "string"}, "description": "Channels to notify on complete/fail. Defaults to the creating channel."}
            },
            "required": ["name", "agents"]
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let name = match input.get("name").and_then(|v| v.as_str()) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => return ToolResult::error("'name' is required"),
        };
        let description = input
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let agents_raw = match input.get("agents").and_then(|v| v.as_array()) {
            Some(a) if !a.is_empty() => a,
            _ => return ToolResult::error("'agents' must be a non-empty array"),
        };
        let agents: Vec<AgentSpec> = match agents_raw
            .iter()
            .cloned()
            .map(serde_json::from_value)
            .collect::<Result<Vec<AgentSpec>, _>>()
        {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("invalid agent spec: {e}")),
        };

        let schedule_type = match input.get("schedule_type").and_then(|v| v.as_str()) {
            None | Some("immediate") => ScheduleType::Immediate,
            Some("scheduled") => ScheduleType::Scheduled,
            Some("recurring") => ScheduleType::Recurring,
            Some(other) => {
                return ToolResult::error(format!(
                    "schedule_type must be immediate, scheduled, or recurring (got '{other}')"
                ))
            }
        };

        let now = Utc::now();
        let cron_expression = input
            .get("cron_expression")
            .and_then(|v| v.as_str())
            .map(String::from);

        let due_time = match schedule_type {
            ScheduleType::Immediate => now,
            ScheduleType::Scheduled => {
                let raw = match input.get("schedule_time").and_then(|v| v.as_str()) {
                    Some(s) if !s.is_empty() => s,
                    _ => return ToolResult::error("'schedule_time' is required for scheduled flows"),
                };
                match parse_time_expression(raw, now, None) {
                    Some(dt) => dt,
                    None => return ToolResult::error(format!("could not parse schedule_time '{raw}'")),
                }
            }
            ScheduleType::Recurring => {
                let cron = match &cron_expression {
                    Some(c) if !c.is_empty() => c,
                    _ => return ToolResult::error("'cron_expression' is required for recurring flows"),
                };
                nexus_scheduler::cron::compute_next_run(cron, now)
            }
        };

        for agent in &agents {
            let forbidden: Vec<&str> = agent
                .tools
                .iter()
                .map(String::as_str)
                .filter(|t| crate::spec::FLOW_TOOL_NAMES.contains(t))
                .collect();
            if !forbidden.is_empty() {
                return ToolResult::error(format!(
                    "flow agents may not use flow management tools: {forbidden:?}"
                ));
            }
        }

        let notification_channels = input
            .get("notification_channels")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_else(|| {
                vec![self
                    .thread_id
                    .split(':')
                    .next()
                    .unwrap_or(&self.thread_id)
                    .to_string()]
            });

        let flow_spec = FlowSpec {
            flow_id: Uuid::new_v4().to_string(),
            name: name.clone(),
            description,
            owner: self.thread_id.clone(),
            agents,
            schedule_type,
            cron_expression: cron_expression.clone(),
            notify_on_complete: input
                .get("notify_on_complete")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            notify_on_failure: input
                .get("notify_on_failure")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            notification_channels,
        };

        let payload = match flow_spec.to_json() {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("failed to serialize flow: {e}")),
        };

        match self.ctx.scheduler().flows().create(NewScheduledFlow {
            owner_user: self.thread_id.clone(),
            thread_id: self.thread_id.clone(),
            name: name.clone(),
            flow_spec: payload,
            due_time,
            cron: cron_expression,
        }) {
            Ok(flow) => ToolResult::success(format!(
                "Flow created: {} ({}) scheduled for {}",
                flow.id,
                name,
                due_time.to_rfc3339()
            )),
            Err(e) => ToolResult::error(format!("failed to create flow: {e}")),
        }
    }
}

/// Lists flows owned by the calling session.
pub struct ListFlowsTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
    thread_id: String,
}

impl<C: MessageContext + 'static> ListFlowsTool<C> {
    pub fn new(ctx: Arc<C>, thread_id: &str) -> Self {
        Self {
            ctx,
            thread_id: thread_id.to_string(),
        }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for ListFlowsTool<C> {
    fn name(&self) -> &str {
        "list_flows"
    }

    fn description(&self) -> &str {
        "List flows created from this session, with their status and due time."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["pending", "running", "completed", "failed", "cancelled"],
                    "description": "Optional status filter."
                }
            }
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let flows = match self.ctx.scheduler().flows().list_for_owner(&self.thread_id) {
            Ok(f) => f,
            Err(e) => return ToolResult::error(format!("failed to list flows: {e}")),
        };

        let status_filter = input.get("status").and_then(|v| v.as_str());
        let filtered: Vec<_> = flows
            .into_iter()
            .filter(|f| status_filter.is_none_or(|s| f.status.to_string() == s))
            .collect();

        if filtered.is_empty() {
            return ToolResult::success("No flows found.");
        }

        let mut out = format!("Flows ({}):\n", filtered.len());
        for flow in &filtered {
            out.push_str(&format!(
                "- [{}] {} — {} (due {})\n",
                flow.id,
                flow.name,
                flow.status,
                flow.due_time.to_rfc3339()
            ));
        }
        ToolResult::success(out)
    }
}

/// Runs a flow immediately by ID, bypassing its scheduled due time.
pub struct RunFlowTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
}

impl<C: MessageContext + 'static> RunFlowTool<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for RunFlowTool<C> {
    fn name(&self) -> &str {
        "run_flow"
    }

    fn description(&self) -> &str {
        "Run a flow immediately by ID, regardless of its scheduled due time. \
         Blocks until every step completes."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "flow_id": {"type": "string", "description": "ID returned by create_flow or list_flows."}
            },
            "required": ["flow_id"]
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let flow_id = match input.get("flow_id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => id,
            _ => return ToolResult::error("'flow_id' is required"),
        };

        let store = self.ctx.scheduler().flows();
        let flow = match store.get(flow_id) {
            Ok(Some(f)) => f,
            Ok(None) => return ToolResult::error(format!("flow {flow_id} not found")),
            Err(e) => return ToolResult::error(format!("failed to load flow: {e}")),
        };

        match store.try_claim_running(&flow.id) {
            Ok(true) => {}
            Ok(false) => {
                return ToolResult::error(format!(
                    "flow {flow_id} is not pending (status: {})",
                    flow.status
                ))
            }
            Err(e) => return ToolResult::error(format!("failed to claim flow: {e}")),
        }

        match execute_flow(&flow, store, &self.ctx).await {
            Ok(result) => ToolResult::success(result.to_string()),
            Err(e) => ToolResult::error(format!("flow execution failed: {e}")),
        }
    }
}

/// Cancels a pending or running flow by ID.
pub struct CancelFlowTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
}

impl<C: MessageContext + 'static> CancelFlowTool<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for CancelFlowTool<C> {
    fn name(&self) -> &str {
        "cancel_flow"
    }

    fn description(&self) -> &str {
        "Cancel a pending or running flow by ID. Completed/failed/cancelled flows are left as-is."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "flow_id": {"type": "string"}
            },
            "required": ["flow_id"]
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let flow_id = match input.get("flow_id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => id,
            _ => return ToolResult::error("'flow_id' is required"),
        };
        match self.ctx.scheduler().flows().cancel(flow_id) {
            Ok(()) => ToolResult::success(format!("Flow {flow_id} cancelled.")),
            Err(e) => ToolResult::error(format!("failed to cancel flow {flow_id}: {e}")),
        }
    }
}

/// Permanently deletes a flow row by ID.
pub struct DeleteFlowTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
}

impl<C: MessageContext + 'static> DeleteFlowTool<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for DeleteFlowTool<C> {
    fn name(&self) -> &str {
        "delete_flow"
    }

    fn description(&self) -> &str {
        "Permanently delete a flow by ID, regardless of its status."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "flow_id": {"type": "string"}
            },
            "required": ["flow_id"]
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let flow_id = match input.get("flow_id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => id,
            _ => return ToolResult::error("'flow_id' is required"),
        };
        match self.ctx.scheduler().flows().delete(flow_id) {
            Ok(true) => ToolResult::success(format!("Flow {flow_id} deleted.")),
            Ok(false) => ToolResult::error(format!("flow {flow_id} not found")),
            Err(e) => ToolResult::error(format!("failed to delete flow {flow_id}: {e}")),
        }
    }
}
