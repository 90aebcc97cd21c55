//! Tool loop breaker (C5 `ToolLoopBreaker`, spec §4.5).
//!
//! Tracks, per `(thread_id, tool_name, arg_signature)`, how many times the
//! same call has been attempted inside a sliding window. Once the count
//! reaches `max_retries` the caller should stop invoking the tool and
//! instead surface a synthetic tool-result nudging the model to change its
//! arguments.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Canonical key identifying one "shape" of tool call within a thread.
type LoopKey = (String, String, String);

/// Sliding-window call tracker shared across a thread's whole lifetime
/// (held by `MessageContext` implementors, one instance per process).
pub struct ToolLoopBreaker {
    calls: DashMap<LoopKey, VecDeque<Instant>>,
}

impl Default for ToolLoopBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolLoopBreaker {
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }

    /// Canonical argument signature — compact JSON with keys sorted, so
    /// equivalent calls collapse to the same string regardless of key order.
    pub fn arg_signature(input: &serde_json::Value) -> String {
        canonical_json(input)
    }

    /// Record a call and report whether it has now tripped the breaker
    /// (i.e. this is the `max_retries`-th or later occurrence within
    /// `window`). Stale entries outside the window are pruned first.
    pub fn record(
        &self,
        thread_id: &str,
        tool_name: &str,
        arg_signature: &str,
        window: Duration,
        max_retries: u32,
    ) -> bool {
        let key = (
            thread_id.to_string(),
            tool_name.to_string(),
            arg_signature.to_string(),
        );
        let now = Instant::now();
        let mut entry = self.calls.entry(key).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) > window {
                entry.pop_front();
            } else {
                break;
            }
        }
        entry.push_back(now);
        entry.len() as u32 >= max_retries.max(1)
    }

    /// Drop tracking for a tool once its argument signature changes, so a
    /// legitimate retry with corrected arguments doesn't inherit the old
    /// signature's count.
    pub fn reset(&self, thread_id: &str, tool_name: &str) {
        self.calls
            .retain(|(t, n, _), _| !(t == thread_id && n == tool_name));
    }
}

fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let rendered: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{:?}:{}", k, canonical_json(v)))
                .collect();
            format!("{{{}}}", rendered.join(","))
        }
        serde_json::Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_max_retries() {
        let breaker = ToolLoopBreaker::new();
        let window = Duration::from_secs(30);
        assert!(!breaker.record("t1", "read_file", "sig", window, 3));
        assert!(!breaker.record("t1", "read_file", "sig", window, 3));
        assert!(breaker.record("t1", "read_file", "sig", window, 3));
    }

    #[test]
    fn different_signatures_track_independently() {
        let breaker = ToolLoopBreaker::new();
        let window = Duration::from_secs(30);
        assert!(!breaker.record("t1", "read_file", "a", window, 2));
        assert!(!breaker.record("t1", "read_file", "b", window, 2));
    }

    #[test]
    fn reset_clears_tool_across_signatures() {
        let breaker = ToolLoopBreaker::new();
        let window = Duration::from_secs(30);
        assert!(breaker.record("t1", "read_file", "sig", window, 1));
        breaker.reset("t1", "read_file");
        assert!(!breaker.calls.contains_key(&(
            "t1".to_string(),
            "read_file".to_string(),
            "sig".to_string()
        )));
    }

    #[test]
    fn arg_signature_is_key_order_independent() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(ToolLoopBreaker::arg_signature(&a), ToolLoopBreaker::arg_signature(&b));
    }
}
