//! Local answer state for an attempt.
//!
//! Holds the in-progress [`AnswerSet`] and the flagged-question set. The
//! store is only ever mutated by the session state machine: local selection
//! events and the resume payload delivered at start. The sync channel never
//! touches it directly; autosave just takes snapshots.

use std::collections::HashSet;

use crate::model::{AnswerSet, Question, QuestionId};

/// In-progress answers plus review flags.
#[derive(Debug, Clone, Default)]
pub struct AnswerStore {
    answers: AnswerSet,
    flags: HashSet<QuestionId>,
}

impl AnswerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a selection. `None` (or an empty option) deselects, removing
    /// the key entirely so autosave snapshots carry no stale entries.
    pub fn select(&mut self, question_id: &str, option: Option<&str>) {
        match option {
            Some(opt) if !opt.is_empty() => {
                self.answers.insert(question_id.to_string(), opt.to_string());
            }
            _ => {
                self.answers.remove(question_id);
            }
        }
    }

    /// Toggle the review flag for a question; returns whether it is now
    /// flagged.
    pub fn toggle_flag(&mut self, question_id: &str) -> bool {
        if self.flags.remove(question_id) {
            false
        } else {
            self.flags.insert(question_id.to_string());
            true
        }
    }

    pub fn is_flagged(&self, question_id: &str) -> bool {
        self.flags.contains(question_id)
    }

    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    /// Exact copy of the current answers, used for autosave payloads.
    pub fn snapshot(&self) -> AnswerSet {
        self.answers.clone()
    }

    /// Snapshot with every value renormalized to an option letter, used
    /// for the terminal submit payload.
    pub fn sanitized_snapshot(&self, questions: &[Question]) -> AnswerSet {
        self.answers
            .iter()
            .map(|(qid, value)| {
                let normalized = questions
                    .iter()
                    .find(|q| q.id == *qid)
                    .map(|q| normalize_answer(value, q))
                    .unwrap_or_else(|| value.clone());
                (qid.clone(), normalized)
            })
            .collect()
    }

    /// Replace local state with a resumed server snapshot.
    ///
    /// Replacement rather than merge keeps resume idempotent: starting a
    /// session twice with the same saved answers yields exactly the saved
    /// snapshot, with nothing duplicated or dropped.
    pub fn resume(&mut self, saved: AnswerSet, questions: &[Question]) {
        self.answers = saved
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(qid, value)| {
                let normalized = questions
                    .iter()
                    .find(|q| q.id == qid)
                    .map(|q| normalize_answer(&value, q))
                    .unwrap_or_else(|| value.clone());
                (qid, normalized)
            })
            .collect();
    }

    /// Drop all local state. Called on session teardown.
    pub fn clear(&mut self) {
        self.answers.clear();
        self.flags.clear();
    }
}

/// Map a stored answer value back to its canonical option letter.
///
/// Saved answers arrive in two shapes: bare letters ("B") or the full
/// option text, possibly prefixed with its letter ("B. Paris" / "B) Paris").
/// Unrecognized values pass through unchanged.
fn normalize_answer(value: &str, question: &Question) -> String {
    let trimmed = strip_letter_prefix(value);

    if is_option_letter(trimmed, question.options.len()) {
        return trimmed.to_string();
    }

    let found = question.options.iter().position(|opt| {
        opt == value || strip_letter_prefix(opt) == trimmed
    });
    match found {
        Some(idx) => option_letter(idx),
        None => value.to_string(),
    }
}

/// Strip a leading "A. " / "A) " style marker.
fn strip_letter_prefix(s: &str) -> &str {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), Some(sep))
            if letter.is_ascii_uppercase() && (sep == '.' || sep == ')') =>
        {
            chars.as_str().trim_start()
        }
        _ => s.trim(),
    }
}

fn is_option_letter(s: &str, option_count: usize) -> bool {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_uppercase() => {
            ((c as u8 - b'A') as usize) < option_count
        }
        _ => false,
    }
}

fn option_letter(idx: usize) -> String {
    char::from(b'A' + idx as u8).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str, options: &[&str]) -> Question {
        Question {
            id: id.to_string(),
            prompt: format!("prompt {id}"),
            options: options.iter().map(|s| s.to_string()).collect(),
            score: 1.0,
            illustration: None,
        }
    }

    #[test]
    fn deselect_removes_key() {
        let mut store = AnswerStore::new();
        store.select("q1", Some("A"));
        store.select("q2", Some("B"));
        store.select("q1", None);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("q2").map(String::as_str), Some("B"));
        assert!(!snapshot.contains_key("q1"));
    }

    #[test]
    fn empty_option_counts_as_deselect() {
        let mut store = AnswerStore::new();
        store.select("q1", Some("A"));
        store.select("q1", Some(""));
        assert_eq!(store.answered_count(), 0);
    }

    #[test]
    fn flags_toggle_and_clear() {
        let mut store = AnswerStore::new();
        assert!(store.toggle_flag("q3"));
        assert!(store.is_flagged("q3"));
        assert!(!store.toggle_flag("q3"));
        assert!(!store.is_flagged("q3"));

        store.toggle_flag("q1");
        store.select("q1", Some("C"));
        store.clear();
        assert!(!store.is_flagged("q1"));
        assert_eq!(store.answered_count(), 0);
    }

    #[test]
    fn resume_replaces_rather_than_merges() {
        let questions = vec![question("q1", &["one", "two"]), question("q2", &["x", "y"])];
        let mut store = AnswerStore::new();
        store.select("q1", Some("A"));
        store.select("q9", Some("D"));

        let saved: AnswerSet = [("q2".to_string(), "B".to_string())].into();
        store.resume(saved.clone(), &questions);
        assert_eq!(store.snapshot(), saved);

        // Resuming again with the same payload is a no-op.
        store.resume(saved.clone(), &questions);
        assert_eq!(store.snapshot(), saved);
    }

    #[test]
    fn resume_normalizes_full_option_text() {
        let questions = vec![question("q1", &["Hanoi", "Paris", "Lima"])];
        let saved: AnswerSet = [("q1".to_string(), "Paris".to_string())].into();

        let mut store = AnswerStore::new();
        store.resume(saved, &questions);
        assert_eq!(store.snapshot().get("q1").map(String::as_str), Some("B"));
    }

    #[test]
    fn resume_normalizes_lettered_prefix() {
        let questions = vec![question("q1", &["A. Hanoi", "B. Paris"])];
        let saved: AnswerSet = [("q1".to_string(), "B. Paris".to_string())].into();

        let mut store = AnswerStore::new();
        store.resume(saved, &questions);
        assert_eq!(store.snapshot().get("q1").map(String::as_str), Some("B"));
    }

    #[test]
    fn resume_keeps_unrecognized_values() {
        let questions = vec![question("q1", &["yes", "no"])];
        let saved: AnswerSet = [("q1".to_string(), "maybe".to_string())].into();

        let mut store = AnswerStore::new();
        store.resume(saved, &questions);
        assert_eq!(
            store.snapshot().get("q1").map(String::as_str),
            Some("maybe")
        );
    }

    #[test]
    fn sanitized_snapshot_normalizes_for_submit() {
        let questions = vec![question("q1", &["one", "two"])];
        let mut store = AnswerStore::new();
        store.select("q1", Some("A) one"));

        let sanitized = store.sanitized_snapshot(&questions);
        assert_eq!(sanitized.get("q1").map(String::as_str), Some("A"));
        // The raw snapshot is untouched.
        assert_eq!(store.snapshot().get("q1").map(String::as_str), Some("A) one"));
    }
}
