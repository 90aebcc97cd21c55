//! Passive instinct detection (§4.9, extended by SPEC_FULL §2.2).
//!
//! Runs over every user message: corrections, repeated-request phrasing,
//! verbosity preference, and format preference each have a trigger regex
//! set. A hit either reinforces a matching existing instinct (+0.05) or
//! creates a new one from a domain-specific template. A second pass looks
//! for satisfaction/frustration language to update the success rate of
//! instincts applied in the previous turn.

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

use crate::error::MemoryError;
use crate::instinct::InstinctStore;

const REINFORCE_DELTA: f64 = 0.05;

static CORRECTION_TRIGGERS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)no, i meant",
        r"(?i)actually,?",
        r"(?i)wait, that's not",
        r"(?i)let me clarify",
        r"(?i)i want you to instead",
        r"(?i)not quite, ",
    ])
    .expect("static correction patterns are valid regex")
});

static REPETITION_TRIGGERS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)(again|once more|repeat)",
        r"(?i)like you did before",
        r"(?i)same as last time",
        r"(?i)remember when you",
    ])
    .expect("static repetition patterns are valid regex")
});

struct VerbosityPattern {
    regex: &'static str,
    label: &'static str,
    action: &'static str,
}

static VERBOSITY_PATTERNS: &[VerbosityPattern] = &[
    VerbosityPattern {
        regex: r"(?i)(be brief|concise|short|to the point)",
        label: "concise",
        action: "be brief and concise, skip detailed explanations",
    },
    VerbosityPattern {
        regex: r"(?i)(more detail|explain more|elaborate|expand)",
        label: "detailed",
        action: "provide thorough explanations with examples",
    },
    VerbosityPattern {
        regex: r"(?i)(keep it simple|don't over-explain)",
        label: "simple",
        action: "use simple language and avoid jargon",
    },
];

static VERBOSITY_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    VERBOSITY_PATTERNS
        .iter()
        .map(|p| Regex::new(p.regex).expect("static pattern"))
        .collect()
});

static FORMAT_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    FORMAT_PATTERNS
        .iter()
        .map(|p| Regex::new(p.regex).expect("static pattern"))
        .collect()
});

struct FormatPattern {
    regex: &'static str,
    label: &'static str,
    action: &'static str,
}

static FORMAT_PATTERNS: &[FormatPattern] = &[
    FormatPattern {
        regex: r"(?i)(json|csv|markdown|table)",
        label: "format_preference",
        action: "use the requested structured format by default",
    },
    FormatPattern {
        regex: r"(?i)(bullet points|list format)",
        label: "bullets",
        action: "use bullet points for lists and structured content",
    },
    FormatPattern {
        regex: r"(?i)(paragraph|prose|narrative)",
        label: "prose",
        action: "use paragraph/prose format with full sentences",
    },
];

static SATISFACTION_TRIGGERS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\b(perfect|great|awesome|thanks|exactly what)\b",
        r"(?i)\b(that's what i needed|just what i wanted|love it)\b",
        r"(?i)\b(amazing|brilliant|excellent)\b",
        r"\u{1F44D}|\u{2705}|\u{1F389}|\u{1F60A}",
    ])
    .expect("static satisfaction patterns are valid regex")
});

static FRUSTRATION_TRIGGERS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\b(nevermind|forget it|whatever)\b",
        r"(?i)^(ok|okay|fine)[!.]*$",
        r"\?+$",
    ])
    .expect("static frustration patterns are valid regex")
});

/// Watches message traffic for the passive-learning triggers named in
/// §4.9 and records them via an `InstinctStore`.
pub struct Observer<'a> {
    store: &'a InstinctStore,
}

impl<'a> Observer<'a> {
    pub fn new(store: &'a InstinctStore) -> Self {
        Self { store }
    }

    /// Observe one user message, returning the ids of instincts created or
    /// reinforced as a result.
    pub fn observe_message(
        &self,
        thread_id: &str,
        user_message: &str,
    ) -> Result<Vec<String>, MemoryError> {
        let mut detected = Vec::new();

        if CORRECTION_TRIGGERS.is_match(user_message) {
            detected.push(self.handle_correction(thread_id)?);
        }
        if REPETITION_TRIGGERS.is_match(user_message) {
            detected.push(self.handle_repetition(thread_id)?);
        }
        if let Some(id) = self.detect_verbosity(thread_id, user_message)? {
            detected.push(id);
        }
        if let Some(id) = self.detect_format(thread_id, user_message)? {
            detected.push(id);
        }

        Ok(detected)
    }

    fn handle_correction(&self, thread_id: &str) -> Result<String, MemoryError> {
        let existing = self.store.find_similar(thread_id, "communication", "correct")?;
        if let Some(instinct) = existing.first() {
            self.store.adjust_confidence(&instinct.id, REINFORCE_DELTA)?;
            return Ok(instinct.id.clone());
        }
        let created = self.store.create(
            thread_id,
            "user corrects previous response",
            "acknowledge correction immediately, apologize, and adjust approach",
            "communication",
            "correction-detected",
            0.7,
        )?;
        Ok(created.id)
    }

    fn handle_repetition(&self, thread_id: &str) -> Result<String, MemoryError> {
        let existing = self.store.list(thread_id, Some("workflow"), 0.0)?;
        if let Some(instinct) = existing
            .iter()
            .find(|i| i.trigger.to_lowercase().contains("repeat") || i.trigger.to_lowercase().contains("again"))
        {
            self.store.adjust_confidence(&instinct.id, REINFORCE_DELTA)?;
            return Ok(instinct.id.clone());
        }
        let created = self.store.create(
            thread_id,
            "user requests repetition",
            "repeat the same action or follow the same pattern as before",
            "workflow",
            "repetition-confirmed",
            0.6,
        )?;
        Ok(created.id)
    }

    fn detect_verbosity(
        &self,
        thread_id: &str,
        message: &str,
    ) -> Result<Option<String>, MemoryError> {
        for (pattern, re) in VERBOSITY_PATTERNS.iter().zip(VERBOSITY_REGEXES.iter()) {
            if !re.is_match(message) {
                continue;
            }
            let existing = self.store.list(thread_id, Some("communication"), 0.0)?;
            if let Some(instinct) = existing
                .iter()
                .find(|i| i.action.to_lowercase().contains(pattern.label))
            {
                self.store.adjust_confidence(&instinct.id, REINFORCE_DELTA)?;
                return Ok(Some(instinct.id.clone()));
            }
            let created = self.store.create(
                thread_id,
                &format!("user prefers {} responses", pattern.label),
                pattern.action,
                "communication",
                "preference-expressed",
                0.7,
            )?;
            return Ok(Some(created.id));
        }
        Ok(None)
    }

    fn detect_format(&self, thread_id: &str, message: &str) -> Result<Option<String>, MemoryError> {
        for (pattern, re) in FORMAT_PATTERNS.iter().zip(FORMAT_REGEXES.iter()) {
            if !re.is_match(message) {
                continue;
            }
            let existing = self.store.list(thread_id, Some("format"), 0.0)?;
            if let Some(instinct) = existing
                .iter()
                .find(|i| i.action.to_lowercase().contains(pattern.label))
            {
                self.store.adjust_confidence(&instinct.id, REINFORCE_DELTA)?;
                return Ok(Some(instinct.id.clone()));
            }
            let created = self.store.create(
                thread_id,
                &format!("user prefers {} format", pattern.label),
                pattern.action,
                "format",
                "preference-expressed",
                0.8,
            )?;
            return Ok(Some(created.id));
        }
        Ok(None)
    }

    /// Inspect the next user message for satisfaction/frustration language
    /// and update the success rate of instincts applied in the previous
    /// turn accordingly.
    pub fn observe_outcome(
        &self,
        thread_id: &str,
        user_message: &str,
        applied_instinct_ids: &[String],
    ) -> Result<Vec<String>, MemoryError> {
        if applied_instinct_ids.is_empty() {
            return Ok(Vec::new());
        }
        let success = if SATISFACTION_TRIGGERS.is_match(user_message) {
            Some(true)
        } else if FRUSTRATION_TRIGGERS.is_match(user_message) {
            Some(false)
        } else {
            None
        };
        let Some(success) = success else {
            return Ok(Vec::new());
        };
        let mut updated = Vec::new();
        for id in applied_instinct_ids {
            self.store.record_outcome(id, thread_id, success)?;
            updated.push(id.clone());
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use rusqlite::Connection;

    fn test_store() -> InstinctStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        InstinctStore::new(conn)
    }

    #[test]
    fn correction_phrase_creates_instinct() {
        let store = test_store();
        let observer = Observer::new(&store);
        let ids = observer
            .observe_message("thread-1", "No, I meant the other file")
            .unwrap();
        assert_eq!(ids.len(), 1);
        let inst = store.get(&ids[0], "thread-1").unwrap().unwrap();
        assert_eq!(inst.domain, "communication");
    }

    #[test]
    fn repeated_correction_reinforces_not_duplicates() {
        let store = test_store();
        let observer = Observer::new(&store);
        observer.observe_message("thread-1", "actually, do it differently").unwrap();
        observer.observe_message("thread-1", "actually, wrong again").unwrap();
        let all = store.list("thread-1", Some("communication"), 0.0).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].metadata.occurrence_count, 3);
    }

    #[test]
    fn verbosity_preference_detected() {
        let store = test_store();
        let observer = Observer::new(&store);
        let ids = observer
            .observe_message("thread-1", "please be brief and to the point")
            .unwrap();
        assert_eq!(ids.len(), 1);
        let inst = store.get(&ids[0], "thread-1").unwrap().unwrap();
        assert!(inst.action.contains("brief"));
    }

    #[test]
    fn frustration_language_lowers_success_rate() {
        let store = test_store();
        let inst = store
            .create("thread-1", "trig", "act", "workflow", "test", 0.6)
            .unwrap();
        let observer = Observer::new(&store);
        let updated = observer
            .observe_outcome("thread-1", "nevermind, forget it", &[inst.id.clone()])
            .unwrap();
        assert_eq!(updated, vec![inst.id.clone()]);
        let fetched = store.get(&inst.id, "thread-1").unwrap().unwrap();
        assert!((fetched.metadata.success_rate - 0.8).abs() < 1e-9);
    }
}
