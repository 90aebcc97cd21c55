//! `web_scrape` — built-in page-fetch tool (§4.3).
//!
//! Fetches a URL and returns a plain-text rendering: HTML tags are stripped
//! (script/style bodies dropped entirely), entities are decoded for the
//! common cases, and the result is capped at `max_fetch_bytes` before any
//! processing so a large page can't blow up the tool result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use nexus_core::config::WebToolsConfig;

use crate::pipeline::context::MessageContext;

use super::{Tool, ToolResult};

pub struct WebScrapeTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
    client: reqwest::Client,
}

impl<C: MessageContext + 'static> WebScrapeTool<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self {
            ctx,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for WebScrapeTool<C> {
    fn name(&self) -> &str {
        "web_scrape"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its visible text content (HTML tags stripped). \
         Use after web_search to read a specific result in full."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Absolute http(s) URL to fetch." }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let url = match input.get("url").and_then(|v| v.as_str()) {
            Some(u) if u.starts_with("http://") || u.starts_with("https://") => u.to_string(),
            Some(_) => return ToolResult::error("url must be an absolute http(s) URL"),
            None => return ToolResult::error("missing required parameter: url"),
        };

        let cfg: &WebToolsConfig = self.ctx.web_config();

        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(cfg.fetch_timeout_secs))
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("web_scrape request failed: {e}")),
        };

        if !resp.status().is_success() {
            return ToolResult::error(format!("web_scrape returned status {}", resp.status()));
        }

        let bytes = match resp.bytes().await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("web_scrape body read failed: {e}")),
        };

        let capped = &bytes[..bytes.len().min(cfg.max_fetch_bytes)];
        let html = String::from_utf8_lossy(capped);
        let text = html_to_text(&html);

        if text.trim().is_empty() {
            return ToolResult::success("(page fetched but contained no extractable text)");
        }
        ToolResult::success(text)
    }
}

static SCRIPT_STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</\1>").expect("valid regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("valid regex"));
static BLANK_LINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

fn html_to_text(html: &str) -> String {
    let without_scripts = SCRIPT_STYLE_RE.replace_all(html, "");
    let without_tags = TAG_RE.replace_all(&without_scripts, "\n");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    let collapsed = BLANK_LINES_RE.replace_all(&decoded, "\n\n");
    collapsed
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_script_bodies() {
        let html = "<html><head><script>alert(1)</script></head><body><p>Hello&nbsp;world</p></body></html>";
        let text = html_to_text(html);
        assert!(text.contains("Hello world"));
        assert!(!text.contains("alert"));
    }

    #[test]
    fn decodes_common_entities() {
        assert_eq!(html_to_text("<p>Tom &amp; Jerry</p>"), "Tom & Jerry");
    }
}
