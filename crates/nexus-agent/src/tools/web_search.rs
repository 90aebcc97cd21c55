//! `web_search` — built-in web search tool (§4.3).
//!
//! Wired to the Brave Search API (matches the "search_provider" field in
//! `WebToolsConfig` — the only provider wired up today). Returns an
//! actionable tool error rather than a silent empty result when no API key
//! is configured, consistent with the dispatcher's "every failure is a tool
//! result string" contract (§4.3, §7).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use nexus_core::config::WebToolsConfig;

use crate::pipeline::context::MessageContext;

use super::{Tool, ToolResult};

pub struct WebSearchTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
    client: reqwest::Client,
}

impl<C: MessageContext + 'static> WebSearchTool<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self {
            ctx,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for WebSearchTool<C> {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the public web for a query and return a short list of titles, URLs, and snippets."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query." },
                "num_results": { "type": "integer", "description": "Max results to return (default 5, max 20)." }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let query = match coerce_query(&input) {
            Some(q) => q,
            None => return ToolResult::error("missing required parameter: query"),
        };
        let num_results = coerce_num_results(&input).clamp(1, 20);

        let cfg: &WebToolsConfig = self.ctx.web_config();
        let Some(api_key) = cfg.search_api_key.as_ref().filter(|k| !k.is_empty()) else {
            return ToolResult::error(
                "web_search is not configured — set [web] search_api_key in nexus.toml",
            );
        };

        if cfg.search_provider != "brave" {
            return ToolResult::error(format!(
                "unsupported search provider: {} (only 'brave' is wired up)",
                cfg.search_provider
            ));
        }

        let resp = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .query(&[("q", query.as_str()), ("count", &num_results.to_string())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .timeout(Duration::from_secs(cfg.fetch_timeout_secs))
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("web_search request failed: {e}")),
        };

        if !resp.status().is_success() {
            return ToolResult::error(format!("web_search returned status {}", resp.status()));
        }

        let body: BraveResponse = match resp.json().await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("web_search response parse failed: {e}")),
        };

        let results = body.web.map(|w| w.results).unwrap_or_default();
        if results.is_empty() {
            return ToolResult::success(format!("No results for: {}", query));
        }

        let mut out = String::new();
        for (i, r) in results.iter().take(num_results).enumerate() {
            out.push_str(&format!(
                "{}. {} — {}\n   {}\n",
                i + 1,
                r.title,
                r.url,
                r.description
            ));
        }
        ToolResult::success(out.trim_end().to_string())
    }
}

/// `query` may arrive as a plain string or (rarely) wrapped in a single-key
/// object from models that over-structure simple string args.
fn coerce_query(input: &serde_json::Value) -> Option<String> {
    match input.get("query") {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// §4.3 "coerce numresults→num_results-style aliases" plus numeric-string coercion.
fn coerce_num_results(input: &serde_json::Value) -> usize {
    for key in ["num_results", "numresults", "limit", "count"] {
        if let Some(v) = input.get(key) {
            if let Some(n) = v.as_u64() {
                return n as usize;
            }
            if let Some(s) = v.as_str() {
                if let Ok(n) = s.parse::<usize>() {
                    return n;
                }
            }
        }
    }
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_num_results_accepts_numeric_string_alias() {
        let v = serde_json::json!({ "numresults": "7" });
        assert_eq!(coerce_num_results(&v), 7);
    }

    #[test]
    fn coerce_num_results_defaults_when_absent() {
        assert_eq!(coerce_num_results(&serde_json::json!({})), 5);
    }
}
