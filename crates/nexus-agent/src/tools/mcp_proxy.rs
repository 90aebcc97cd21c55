//! `mcp_proxy` — built-in dispatch tool for configured external MCP servers
//! (§4.3's "MCP-proxy adapter"). Distinct from `nexus-gateway`'s MCP bridge,
//! which exposes Nexus's *own* tools outward to an MCP client (e.g. the
//! Claude Code CLI) — this is the inbound direction: the agent calling out
//! to a third-party MCP server's tools.
//!
//! One subprocess per call, matching `script_tool.rs`'s model rather than a
//! long-lived session: simpler to reason about, and MCP servers are
//! expected to tolerate cold starts. Speaks just enough of stdio JSON-RPC
//! (`initialize` then `tools/call`) to make one round trip.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use nexus_core::config::McpServerConfig;

use crate::pipeline::context::MessageContext;

use super::{Tool, ToolResult};
use std::sync::Arc;

const MCP_CALL_TIMEOUT_SECS: u64 = 45;

pub struct McpProxyTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
}

impl<C: MessageContext + 'static> McpProxyTool<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for McpProxyTool<C> {
    fn name(&self) -> &str {
        "mcp_proxy"
    }

    fn description(&self) -> &str {
        "Call a tool exposed by a configured external MCP server. \
         Use list to discover configured server names before calling one."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "server": { "type": "string", "description": "Configured MCP server name, or 'list' to enumerate configured servers." },
                "tool": { "type": "string", "description": "Tool name on the remote server (omit when server='list')." },
                "arguments": { "type": "object", "description": "Arguments passed through to the remote tool." }
            },
            "required": ["server"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let server_name = match input.get("server").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolResult::error("missing required parameter: server"),
        };

        let servers = &self.ctx.mcp_config().servers;

        if server_name == "list" {
            if servers.is_empty() {
                return ToolResult::success("No MCP servers configured.");
            }
            let names: Vec<&str> = servers.iter().map(|s| s.name.as_str()).collect();
            return ToolResult::success(format!("Configured MCP servers: {}", names.join(", ")));
        }

        let Some(server) = servers.iter().find(|s| s.name == server_name) else {
            return ToolResult::error(format!(
                "unknown MCP server: {server_name} (call with server='list' to see configured servers)"
            ));
        };

        let Some(tool_name) = input.get("tool").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: tool");
        };
        let arguments = input.get("arguments").cloned().unwrap_or(json!({}));

        match call_remote_tool(server, tool_name, arguments).await {
            Ok(result) => ToolResult::success(result),
            Err(e) => ToolResult::error(format!("mcp_proxy call failed: {e}")),
        }
    }
}

/// Spawn `server.command`, speak `initialize` then `tools/call` over stdio,
/// and return the first `result` payload as pretty-printed JSON text.
async fn call_remote_tool(
    server: &McpServerConfig,
    tool_name: &str,
    arguments: Value,
) -> Result<String, String> {
    let mut child = Command::new(&server.command)
        .args(&server.args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| format!("failed to spawn '{}': {e}", server.command))?;

    let mut stdin = child.stdin.take().ok_or("no stdin handle")?;
    let stdout = child.stdout.take().ok_or("no stdout handle")?;
    let mut lines = BufReader::new(stdout).lines();

    let fut = async {
        write_frame(
            &mut stdin,
            &json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": { "protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": {"name": "nexus", "version": "1"} }
            }),
        )
        .await?;
        let _init_response = read_frame(&mut lines).await?;

        write_frame(
            &mut stdin,
            &json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": { "name": tool_name, "arguments": arguments }
            }),
        )
        .await?;
        let response = read_frame(&mut lines).await?;

        if let Some(err) = response.get("error") {
            return Err(format!("remote error: {err}"));
        }
        Ok(response
            .get("result")
            .cloned()
            .unwrap_or(Value::Null)
            .to_string())
    };

    let result = tokio::time::timeout(Duration::from_secs(MCP_CALL_TIMEOUT_SECS), fut).await;
    let _ = child.start_kill();

    match result {
        Ok(inner) => inner,
        Err(_) => Err(format!("timed out after {MCP_CALL_TIMEOUT_SECS}s")),
    }
}

async fn write_frame(
    stdin: &mut tokio::process::ChildStdin,
    message: &Value,
) -> Result<(), String> {
    let line = format!("{}\n", message);
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| format!("write failed: {e}"))
}

async fn read_frame(
    lines: &mut tokio::io::Lines<BufReader<tokio::process::ChildStdout>>,
) -> Result<Value, String> {
    loop {
        let line = lines
            .next_line()
            .await
            .map_err(|e| format!("read failed: {e}"))?
            .ok_or("stream closed before a response was received")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return serde_json::from_str(trimmed).map_err(|e| format!("invalid JSON-RPC line: {e}"));
    }
}
