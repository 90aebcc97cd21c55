//! Learned behavioral rules (§3 `Instinct`, §4.9).
//!
//! Confidence is split into a stored `base_confidence` and a read-time
//! adjustment derived from occurrence count, staleness, and success rate
//! (§4.9's formula). `resolve_conflicts` holds the priority table
//! `InstinctInjectorMW` (C5) consults before rendering the
//! `## Behavioral Patterns` block; the table itself is data, so it lives
//! here next to the rows it filters rather than in the middleware crate.

use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemoryError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstinctMetadata {
    pub occurrence_count: u32,
    pub last_triggered: Option<String>,
    pub success_rate: f64,
}

impl Default for InstinctMetadata {
    fn default() -> Self {
        Self {
            occurrence_count: 1,
            last_triggered: None,
            success_rate: 1.0,
        }
    }
}

/// A learned behavioral rule. `confidence()` applies the read-time formula
/// to `base_confidence`; the stored value never changes except through
/// `adjust_confidence`, which nudges `base_confidence` itself (used by the
/// observer's reinforcement path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instinct {
    pub id: String,
    pub thread_id: String,
    pub trigger: String,
    pub action: String,
    pub domain: String,
    pub base_confidence: f64,
    pub source: String,
    pub metadata: InstinctMetadata,
    pub created_at: String,
    pub updated_at: String,
}

impl Instinct {
    /// Read-time confidence: base adjusted by frequency (+), staleness (−),
    /// scaled by success rate (×). See §4.9.
    ///
    /// ```text
    /// final = clamp(base + min(0.15, 0.03*occurrence_count)
    ///                     + max(-0.20, -0.01*days_since_last_trigger - 0.10))
    ///         * max(0.8, success_rate)
    /// ```
    pub fn confidence(&self, now: chrono::DateTime<chrono::Utc>) -> f64 {
        let freq_boost = (0.03 * self.metadata.occurrence_count as f64).min(0.15);

        let days_since = match &self.metadata.last_triggered {
            Some(ts) => chrono::DateTime::parse_from_rfc3339(ts)
                .ok()
                .map(|t| (now - t.with_timezone(&chrono::Utc)).num_days().max(0) as f64),
            None => None,
        };
        // No prior trigger is treated as maximally stale, matching the
        // formula's "...or_default_-0.10" fallback: a bare -0.10 penalty.
        let staleness_penalty = match days_since {
            Some(d) => (-0.01 * d - 0.10).max(-0.20),
            None => -0.10,
        };

        let adjusted = (self.base_confidence + freq_boost + staleness_penalty).clamp(0.0, 1.0);
        adjusted * self.metadata.success_rate.max(0.8)
    }
}

fn row_to_instinct(row: &rusqlite::Row) -> rusqlite::Result<Instinct> {
    let occurrence_count: u32 = row.get(7)?;
    let last_triggered: Option<String> = row.get(8)?;
    let success_rate: f64 = row.get(9)?;
    Ok(Instinct {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        trigger: row.get(2)?,
        action: row.get(3)?,
        domain: row.get(4)?,
        base_confidence: row.get(5)?,
        source: row.get(6)?,
        metadata: InstinctMetadata {
            occurrence_count,
            last_triggered,
            success_rate,
        },
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

const SELECT_COLUMNS: &str = "id, thread_id, trigger, action, domain, base_confidence, source, \
     occurrence_count, last_triggered, success_rate, created_at, updated_at";

/// `(domain, action substring)` → rule: if a kept instinct's domain and
/// action match and its read-time confidence clears `min_confidence`, any
/// instinct whose `(domain, action substring)` appears in `overrides` is
/// dropped. Carried verbatim in structure from the conflict table named by
/// §4.5 ("`timing:urgent` overrides `communication:detailed`").
struct ConflictRule {
    domain: &'static str,
    action_substr: &'static str,
    min_confidence: f64,
    overrides: &'static [(&'static str, &'static str)],
}

const CONFLICT_RULES: &[ConflictRule] = &[
    ConflictRule {
        domain: "timing",
        action_substr: "urgent",
        min_confidence: 0.6,
        overrides: &[
            ("communication", "detailed"),
            ("communication", "thorough"),
            ("communication", "explain"),
            ("learning_style", "explain"),
        ],
    },
    ConflictRule {
        domain: "communication",
        action_substr: "concise",
        min_confidence: 0.6,
        overrides: &[
            ("communication", "detailed"),
            ("communication", "elaborate"),
            ("communication", "thorough"),
        ],
    },
    ConflictRule {
        domain: "communication",
        action_substr: "brief",
        min_confidence: 0.6,
        overrides: &[("communication", "detailed"), ("communication", "elaborate")],
    },
    ConflictRule {
        domain: "emotional_state",
        action_substr: "frustrated",
        min_confidence: 0.5,
        overrides: &[("workflow", "standard"), ("communication", "brief")],
    },
    ConflictRule {
        domain: "emotional_state",
        action_substr: "confused",
        min_confidence: 0.5,
        overrides: &[("communication", "brief"), ("communication", "concise")],
    },
];

/// Thread-scoped store for `Instinct` rows (§4.9).
pub struct InstinctStore {
    conn: Mutex<Connection>,
}

impl InstinctStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn create(
        &self,
        thread_id: &str,
        trigger: &str,
        action: &str,
        domain: &str,
        source: &str,
        confidence: f64,
    ) -> Result<Instinct, MemoryError> {
        let db = self.conn.lock().unwrap();
        let id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO instincts
                (id, thread_id, trigger, action, domain, base_confidence, source,
                 occurrence_count, last_triggered, success_rate, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, NULL, 1.0, ?8, ?8)",
            rusqlite::params![id, thread_id, trigger, action, domain, confidence, source, now],
        )?;
        Ok(Instinct {
            id,
            thread_id: thread_id.to_string(),
            trigger: trigger.to_string(),
            action: action.to_string(),
            domain: domain.to_string(),
            base_confidence: confidence,
            source: source.to_string(),
            metadata: InstinctMetadata::default(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get(&self, id: &str, thread_id: &str) -> Result<Option<Instinct>, MemoryError> {
        let db = self.conn.lock().unwrap();
        Ok(db
            .query_row(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM instincts WHERE id = ?1 AND thread_id = ?2"
                ),
                rusqlite::params![id, thread_id],
                row_to_instinct,
            )
            .optional()?)
    }

    /// List instincts for a thread, optionally filtered by domain, ordered
    /// by read-time confidence (descending), above `min_confidence`.
    pub fn list(
        &self,
        thread_id: &str,
        domain: Option<&str>,
        min_confidence: f64,
    ) -> Result<Vec<Instinct>, MemoryError> {
        let db = self.conn.lock().unwrap();
        let mut rows = if let Some(domain) = domain {
            let mut stmt = db.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM instincts WHERE thread_id = ?1 AND domain = ?2"
            ))?;
            let iter = stmt.query_map(rusqlite::params![thread_id, domain], row_to_instinct)?;
            iter.filter_map(|r| r.ok()).collect::<Vec<_>>()
        } else {
            let mut stmt =
                db.prepare(&format!("SELECT {SELECT_COLUMNS} FROM instincts WHERE thread_id = ?1"))?;
            let iter = stmt.query_map(rusqlite::params![thread_id], row_to_instinct)?;
            iter.filter_map(|r| r.ok()).collect::<Vec<_>>()
        };

        let now = chrono::Utc::now();
        rows.retain(|i| i.confidence(now) >= min_confidence);
        rows.sort_by(|a, b| {
            b.confidence(now)
                .partial_cmp(&a.confidence(now))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(rows)
    }

    /// Nudge `base_confidence` by `delta`, clamped to `[0, 1]`, and bump
    /// `occurrence_count` + `last_triggered`. Used by the observer's
    /// reinforcement path (+0.05 per §4.9/§2.2) and by outcome tracking.
    pub fn adjust_confidence(&self, id: &str, delta: f64) -> Result<(), MemoryError> {
        let db = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let rows = db.execute(
            "UPDATE instincts
             SET base_confidence = MIN(1.0, MAX(0.0, base_confidence + ?1)),
                 occurrence_count = occurrence_count + 1,
                 last_triggered = ?2,
                 updated_at = ?2
             WHERE id = ?3",
            rusqlite::params![delta, now, id],
        )?;
        if rows == 0 {
            return Err(MemoryError::NotFound {
                category: "instincts".into(),
                key: id.to_string(),
            });
        }
        Ok(())
    }

    /// Update the moving-average success rate for an instinct after an
    /// observed outcome (satisfaction/frustration signal). Learning rate
    /// matches the observer's `alpha = 0.2`.
    pub fn record_outcome(&self, id: &str, thread_id: &str, success: bool) -> Result<(), MemoryError> {
        const ALPHA: f64 = 0.2;
        let db = self.conn.lock().unwrap();
        let current: Option<f64> = db
            .query_row(
                "SELECT success_rate FROM instincts WHERE id = ?1 AND thread_id = ?2",
                rusqlite::params![id, thread_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(current_rate) = current else {
            return Err(MemoryError::NotFound {
                category: "instincts".into(),
                key: id.to_string(),
            });
        };
        let signal = if success { 1.0 } else { 0.0 };
        let new_rate = ALPHA * signal + (1.0 - ALPHA) * current_rate;
        db.execute(
            "UPDATE instincts SET success_rate = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![new_rate, chrono::Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Find instincts in `domain` whose trigger or action contains
    /// `needle` (case-insensitive) — used by the observer to decide
    /// reinforce-vs-create.
    pub fn find_similar(
        &self,
        thread_id: &str,
        domain: &str,
        needle: &str,
    ) -> Result<Vec<Instinct>, MemoryError> {
        let needle = needle.to_lowercase();
        let all = self.list(thread_id, Some(domain), 0.0)?;
        Ok(all
            .into_iter()
            .filter(|i| {
                i.trigger.to_lowercase().contains(&needle) || i.action.to_lowercase().contains(&needle)
            })
            .collect())
    }

    /// Remove instincts overridden by a higher-priority rule already kept.
    /// Input order is preserve-first: earlier entries win ties for "kept".
    pub fn resolve_conflicts(&self, instincts: Vec<Instinct>, now: chrono::DateTime<chrono::Utc>) -> Vec<Instinct> {
        let mut kept: Vec<Instinct> = Vec::with_capacity(instincts.len());

        'outer: for candidate in instincts {
            let action_lower = candidate.action.to_lowercase();
            for held in &kept {
                let held_action_lower = held.action.to_lowercase();
                for rule in CONFLICT_RULES {
                    let rule_matches_held = held.domain == rule.domain
                        && held_action_lower.contains(rule.action_substr)
                        && held.confidence(now) >= rule.min_confidence;
                    if !rule_matches_held {
                        continue;
                    }
                    let candidate_overridden = rule
                        .overrides
                        .iter()
                        .any(|(d, a)| *d == candidate.domain && action_lower.contains(a));
                    if candidate_overridden {
                        continue 'outer;
                    }
                }
            }
            kept.push(candidate);
        }

        kept
    }
}

/// Render a conflict-resolved instinct list as the `## Behavioral Patterns`
/// system prompt block `InstinctInjectorMW` appends between the base prompt
/// and any channel-specific appendix. Grouped by domain; within a domain,
/// confidence-banded phrasing per §2.1 (`"(always apply)"` at >=0.8, bare
/// statement at >=0.6, conditional `"(when: ...)"` below that).
pub fn render_behavioral_patterns(instincts: &[Instinct], now: chrono::DateTime<chrono::Utc>) -> String {
    if instincts.is_empty() {
        return String::new();
    }

    let mut domains: Vec<&str> = Vec::new();
    for i in instincts {
        if !domains.contains(&i.domain.as_str()) {
            domains.push(&i.domain);
        }
    }

    let mut out = String::from("\n\n## Behavioral Patterns\n");
    for domain in domains {
        out.push_str(&format!("\n### {domain}\n"));
        for i in instincts.iter().filter(|i| i.domain == domain) {
            let confidence = i.confidence(now);
            let line = if confidence >= 0.8 {
                format!("- {} (always apply)\n", i.action)
            } else if confidence >= 0.6 {
                format!("- {}\n", i.action)
            } else {
                format!("- {} (when: {})\n", i.action, i.trigger)
            };
            out.push_str(&line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn test_store() -> InstinctStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        InstinctStore::new(conn)
    }

    #[test]
    fn confidence_formula_applies_boost_and_staleness() {
        let now = chrono::Utc::now();
        let fresh = Instinct {
            id: "i1".into(),
            thread_id: "t".into(),
            trigger: "x".into(),
            action: "y".into(),
            domain: "d".into(),
            base_confidence: 0.5,
            source: "s".into(),
            metadata: InstinctMetadata {
                occurrence_count: 10,
                last_triggered: Some(now.to_rfc3339()),
                success_rate: 1.0,
            },
            created_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
        };
        // boost capped at 0.15, staleness at day 0 is -0.10 (max(-0.20, -0.10))
        let expected = (0.5_f64 + 0.15 - 0.10).clamp(0.0, 1.0) * 1.0_f64.max(0.8);
        assert!((fresh.confidence(now) - expected).abs() < 1e-9);
    }

    #[test]
    fn confidence_never_triggered_uses_default_penalty() {
        let now = chrono::Utc::now();
        let never = Instinct {
            id: "i2".into(),
            thread_id: "t".into(),
            trigger: "x".into(),
            action: "y".into(),
            domain: "d".into(),
            base_confidence: 0.6,
            source: "s".into(),
            metadata: InstinctMetadata {
                occurrence_count: 0,
                last_triggered: None,
                success_rate: 1.0,
            },
            created_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
        };
        let expected = (0.6_f64 - 0.10).clamp(0.0, 1.0);
        assert!((never.confidence(now) - expected).abs() < 1e-9);
    }

    #[test]
    fn create_and_adjust_confidence_round_trips() {
        let store = test_store();
        let inst = store
            .create("thread-1", "trig", "act", "communication", "test", 0.5)
            .unwrap();
        store.adjust_confidence(&inst.id, 0.05).unwrap();
        let fetched = store.get(&inst.id, "thread-1").unwrap().unwrap();
        assert!((fetched.base_confidence - 0.55).abs() < 1e-9);
        assert_eq!(fetched.metadata.occurrence_count, 2);
    }

    #[test]
    fn urgent_timing_overrides_detailed_communication() {
        let now = chrono::Utc::now();
        let urgent = Instinct {
            id: "urgent".into(),
            thread_id: "t".into(),
            trigger: "deadline".into(),
            action: "respond urgently".into(),
            domain: "timing".into(),
            base_confidence: 0.9,
            source: "s".into(),
            metadata: InstinctMetadata {
                occurrence_count: 1,
                last_triggered: Some(now.to_rfc3339()),
                success_rate: 1.0,
            },
            created_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
        };
        let detailed = Instinct {
            id: "detailed".into(),
            thread_id: "t".into(),
            trigger: "explaining".into(),
            action: "be detailed and thorough".into(),
            domain: "communication".into(),
            base_confidence: 0.9,
            source: "s".into(),
            metadata: InstinctMetadata {
                occurrence_count: 1,
                last_triggered: Some(now.to_rfc3339()),
                success_rate: 1.0,
            },
            created_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
        };

        let store = test_store();
        let kept = store.resolve_conflicts(vec![urgent, detailed], now);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].domain, "timing");
    }

    #[test]
    fn record_outcome_moves_success_rate_toward_signal() {
        let store = test_store();
        let inst = store
            .create("thread-1", "trig", "act", "workflow", "test", 0.6)
            .unwrap();
        store.record_outcome(&inst.id, "thread-1", false).unwrap();
        let fetched = store.get(&inst.id, "thread-1").unwrap().unwrap();
        assert!((fetched.metadata.success_rate - 0.8).abs() < 1e-9);
    }
}
