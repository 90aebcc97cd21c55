//! Agent-facing memory tools (C9, §4.9) — distinct from `MemoryContextMW`'s
//! passive per-turn injection (`pipeline/process.rs`): these let the model
//! explicitly store a recall entry or query the store mid-turn, the way
//! `knowledge_search`/`knowledge_write` do for operator-curated facts.

use std::sync::Arc;

use async_trait::async_trait;

use nexus_memory::memory_store::MemoryKind;

use crate::pipeline::context::MessageContext;

use super::{Tool, ToolResult};

fn parse_kind(s: &str) -> Option<MemoryKind> {
    match s {
        "semantic" => Some(MemoryKind::Semantic),
        "episodic" => Some(MemoryKind::Episodic),
        "procedural" => Some(MemoryKind::Procedural),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// memory_remember
// ---------------------------------------------------------------------------

pub struct MemoryRememberTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
    thread_id: String,
}

impl<C: MessageContext + 'static> MemoryRememberTool<C> {
    pub fn new(ctx: Arc<C>, thread_id: impl Into<String>) -> Self {
        Self {
            ctx,
            thread_id: thread_id.into(),
        }
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for MemoryRememberTool<C> {
    fn name(&self) -> &str {
        "memory_remember"
    }

    fn description(&self) -> &str {
        "Store a fact, event, or learned preference in this thread's recall memory. \
         Use 'semantic' for durable facts, 'episodic' for things that happened, \
         'procedural' for how-to preferences. Distinct from knowledge_write, which is \
         operator-curated and shared across threads."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "The memory content to store." },
                "kind": {
                    "type": "string",
                    "enum": ["semantic", "episodic", "procedural"],
                    "description": "Memory category. Defaults to 'semantic'."
                },
                "confidence": {
                    "type": "number",
                    "description": "Initial confidence in [0,1]. Defaults to 0.8."
                },
                "key": {
                    "type": "string",
                    "description": "Optional stable key — storing again with the same key updates it."
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let content = match input.get("content").and_then(|v| v.as_str()) {
            Some(c) if !c.trim().is_empty() => c.trim().to_string(),
            _ => return ToolResult::error("missing required parameter: content"),
        };
        let kind = input
            .get("kind")
            .and_then(|v| v.as_str())
            .and_then(parse_kind)
            .unwrap_or(MemoryKind::Semantic);
        let confidence = input
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.8)
            .clamp(0.0, 1.0);
        let key = input.get("key").and_then(|v| v.as_str());

        match self.ctx.memory_store().add(
            &self.thread_id,
            &content,
            kind,
            confidence,
            "agent",
            key,
            serde_json::json!({}),
        ) {
            Ok(mem) => ToolResult::success(format!("Remembered ({}): {}", mem.kind, mem.id)),
            Err(e) => ToolResult::error(format!("memory_remember failed: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// memory_recall
// ---------------------------------------------------------------------------

pub struct MemoryRecallTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
    thread_id: String,
}

impl<C: MessageContext + 'static> MemoryRecallTool<C> {
    pub fn new(ctx: Arc<C>, thread_id: impl Into<String>) -> Self {
        Self {
            ctx,
            thread_id: thread_id.into(),
        }
    }
}

const ALL_KINDS: &[MemoryKind] = &[
    MemoryKind::Semantic,
    MemoryKind::Episodic,
    MemoryKind::Procedural,
];

#[async_trait]
impl<C: MessageContext + 'static> Tool for MemoryRecallTool<C> {
    fn name(&self) -> &str {
        "memory_recall"
    }

    fn description(&self) -> &str {
        "Search this thread's recall memory for facts, events, or preferences matching a query. \
         Results are ordered by decreasing relevance (confidence x keyword match)."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Keywords to search for." },
                "limit": { "type": "integer", "description": "Max results (default 5)." },
                "min_confidence": { "type": "number", "description": "Confidence floor (default 0.0)." }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let query = match input.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q.to_string(),
            _ => return ToolResult::error("missing required parameter: query"),
        };
        let limit = input
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(5) as usize;
        let min_confidence = input
            .get("min_confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        match self
            .ctx
            .memory_store()
            .search(&self.thread_id, &query, limit, min_confidence, ALL_KINDS)
        {
            Ok(results) if results.is_empty() => {
                ToolResult::success(format!("No memories found for: {}", query))
            }
            Ok(results) => {
                let mut out = format!("Found {} memory/memories:\n\n", results.len());
                for mem in &results {
                    out.push_str(&format!(
                        "- [{} conf={:.2}] {}\n",
                        mem.kind, mem.confidence, mem.content
                    ));
                }
                ToolResult::success(out.trim_end().to_string())
            }
            Err(e) => ToolResult::error(format!("memory_recall failed: {e}")),
        }
    }
}
