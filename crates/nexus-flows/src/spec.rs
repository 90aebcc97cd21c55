//! Flow specification types (C8, spec §3/§4.8).
//!
//! A [`FlowSpec`] is the JSON payload stored in `scheduled_flows.flow_spec`
//! (see `nexus_scheduler::flows_store::ScheduledFlow`). It describes a chain
//! of [`AgentSpec`] steps executed sequentially by [`crate::runner`].

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Tool names reserved for flow management — forbidden inside a flow step to
/// prevent a running flow from recursively creating/running/cancelling flows.
pub const FLOW_TOOL_NAMES: &[&str] =
    &["create_flow", "list_flows", "run_flow", "cancel_flow", "delete_flow"];

/// How a flow is scheduled at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Immediate,
    Scheduled,
    Recurring,
}

/// A single step in a flow: one sub-agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Stable key this step's output is recorded under in `previous_outputs`
    /// and in the final `results` array.
    pub agent_id: String,
    /// Model override for this step (falls back to the runtime default when empty).
    #[serde(default)]
    pub model: Option<String>,
    /// Subset of tool names this step may use. Any name in [`FLOW_TOOL_NAMES`]
    /// is stripped at execution time regardless of what's listed here.
    #[serde(default)]
    pub tools: Vec<String>,
    /// System prompt for this step. May contain the literal token
    /// `$previous_output`, substituted with a JSON dump of prior outputs.
    pub system_prompt: String,
    /// When set, the step's final message is parsed as JSON (first `{` to
    /// last `}`) and validated to be present; when absent the raw text is
    /// wrapped as `{"raw": content}`.
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
}

/// A full flow definition (spec §4.8). Serialized verbatim into
/// `scheduled_flows.flow_spec`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSpec {
    pub flow_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Owning user (session key in this implementation — see `nexus-flows` tools).
    pub owner: String,
    pub agents: Vec<AgentSpec>,
    #[serde(default = "default_schedule_type")]
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub notify_on_complete: bool,
    #[serde(default = "default_true")]
    pub notify_on_failure: bool,
    #[serde(default)]
    pub notification_channels: Vec<String>,
}

fn default_schedule_type() -> ScheduleType {
    ScheduleType::Immediate
}

fn default_true() -> bool {
    true
}

impl FlowSpec {
    /// Parse a persisted `flow_spec` JSON blob, filling `owner` if absent.
    pub fn parse(flow_payload: &str, owner: &str) -> Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(flow_payload)
            .map_err(|e| FlowError::InvalidSpec(e.to_string()))?;
        if value.get("owner").is_none() {
            if let Some(obj) = value.as_object_mut() {
                obj.insert("owner".to_string(), serde_json::json!(owner));
            }
        }
        serde_json::from_value(value).map_err(|e| FlowError::InvalidSpec(e.to_string()))
    }

    /// Reject a spec whose steps reference flow-management tools (spec §4.8
    /// step 2: "forbidden inside a flow step to prevent recursion").
    pub fn validate_no_recursive_tools(&self) -> Result<()> {
        for agent in &self.agents {
            let forbidden: Vec<String> = agent
                .tools
                .iter()
                .filter(|t| FLOW_TOOL_NAMES.contains(&t.as_str()))
                .cloned()
                .collect();
            if !forbidden.is_empty() {
                return Err(FlowError::ForbiddenTools {
                    agent_id: agent.agent_id.clone(),
                    tools: forbidden,
                });
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlowSpec {
        FlowSpec {
            flow_id: "f1".into(),
            name: "daily-digest".into(),
            description: "summarize then notify".into(),
            owner: "discord:42".into(),
            agents: vec![AgentSpec {
                agent_id: "summarizer".into(),
                model: None,
                tools: vec!["read_file".into()],
                system_prompt: "Summarize today's notes.".into(),
                output_schema: Some(serde_json::json!({"type": "object"})),
            }],
            schedule_type: ScheduleType::Immediate,
            cron_expression: None,
            notify_on_complete: true,
            notify_on_failure: true,
            notification_channels: vec!["discord".into()],
        }
    }

    #[test]
    fn round_trips_through_json() {
        let spec = sample();
        let json = spec.to_json().unwrap();
        let parsed = FlowSpec::parse(&json, "irrelevant").unwrap();
        assert_eq!(parsed.agents.len(), 1);
        assert_eq!(parsed.owner, "discord:42");
    }

    #[test]
    fn fills_missing_owner_from_caller() {
        let json = r#"{"flow_id":"f2","name":"x","agents":[],"notification_channels":[]}"#;
        let parsed = FlowSpec::parse(json, "discord:99").unwrap();
        assert_eq!(parsed.owner, "discord:99");
    }

    #[test]
    fn rejects_recursive_flow_tools() {
        let mut spec = sample();
        spec.agents[0].tools.push("run_flow".into());
        let err = spec.validate_no_recursive_tools().unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DENIED");
    }
}
