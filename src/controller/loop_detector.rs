use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::action_schema::{ActionKind, SemanticStep};
use crate::config::AgentConfig;

/// One executed step, kept only for repetition detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: ActionKind,
    pub target: Option<String>,
    pub text: Option<String>,
    pub description: String,
}

impl ActionRecord {
    pub fn from_step(step: &SemanticStep) -> Self {
        Self {
            action: step.action,
            target: step.element.clone(),
            text: step.text.clone(),
            description: if step.description.trim().is_empty() {
                step.label()
            } else {
                step.description.clone()
            },
        }
    }

    fn triple(&self) -> (ActionKind, Option<&str>, Option<&str>) {
        (self.action, self.target.as_deref(), self.text.as_deref())
    }

    fn key(&self) -> String {
        match &self.target {
            Some(t) => format!("{}:{}", self.action.as_str(), t),
            None => format!("{}:{}", self.action.as_str(), self.description.to_lowercase()),
        }
    }
}

/// Escalating response to an unchanged screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    DismissKeyboard,
    Scroll,
    NavigateBack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepetitionPattern {
    ExactRepeat { count: usize },
    Oscillation,
    Monotone { count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repetition {
    pub pattern: RepetitionPattern,
    pub directive: String,
}

/// Map equality, structural hashing and action repetition in one place.
#[derive(Debug, Clone)]
pub struct StagnationDetector {
    last_map_text: Option<String>,
    same_map_count: u32,
    hashes: VecDeque<u64>,
    actions: VecDeque<ActionRecord>,
    hash_window: usize,
    hash_eval: usize,
    hash_repeat: usize,
    ring_cap: usize,
}

const MONOTONE_RUN: usize = 6;
const MONOTONE_MAX_DISTINCT: usize = 2;

impl StagnationDetector {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            last_map_text: None,
            same_map_count: 0,
            hashes: VecDeque::with_capacity(config.structural_window),
            actions: VecDeque::with_capacity(config.action_ring_cap),
            hash_window: config.structural_window.max(1),
            hash_eval: config.structural_eval.max(1),
            hash_repeat: config.structural_repeat.max(2),
            ring_cap: config.action_ring_cap.max(MONOTONE_RUN),
        }
    }

    pub fn same_map_count(&self) -> u32 {
        self.same_map_count
    }

    /// Feeds this iteration's map text. The count is the number of consecutive
    /// repeats of the previous map: 2 → keyboard, 3 → scroll, 4+ → back.
    pub fn observe_map(&mut self, map_text: &str) -> Option<RecoveryAction> {
        match &self.last_map_text {
            Some(prev) if prev == map_text => self.same_map_count += 1,
            _ => {
                self.same_map_count = 0;
                self.last_map_text = Some(map_text.to_string());
            }
        }
        match self.same_map_count {
            0 | 1 => None,
            2 => Some(RecoveryAction::DismissKeyboard),
            3 => Some(RecoveryAction::Scroll),
            _ => Some(RecoveryAction::NavigateBack),
        }
    }

    /// Starts the escalation over. Called once back-navigation has been tried.
    pub fn reset_map(&mut self) {
        self.last_map_text = None;
        self.same_map_count = 0;
    }

    /// True when the current layout hash recurs often in the recent window.
    pub fn observe_structure(&mut self, hash: u64) -> bool {
        if self.hashes.len() == self.hash_window {
            self.hashes.pop_front();
        }
        self.hashes.push_back(hash);
        let occurrences = self
            .hashes
            .iter()
            .rev()
            .take(self.hash_eval)
            .filter(|h| **h == hash)
            .count();
        occurrences >= self.hash_repeat
    }

    pub fn record(&mut self, record: ActionRecord) {
        if self.actions.len() == self.ring_cap {
            self.actions.pop_front();
        }
        self.actions.push_back(record);
    }

    pub fn recent_actions(&self) -> impl DoubleEndedIterator<Item = &ActionRecord> {
        self.actions.iter()
    }

    pub fn detect_repetition(&self) -> Option<Repetition> {
        self.exact_repeat()
            .or_else(|| self.monotone())
            .or_else(|| self.oscillation())
    }

    fn exact_repeat(&self) -> Option<Repetition> {
        let last = self.actions.back()?;
        let count = self
            .actions
            .iter()
            .rev()
            .take_while(|r| r.triple() == last.triple())
            .count();
        if count < 2 {
            return None;
        }
        let target = last.target.as_deref().unwrap_or("the same spot");
        let directive = match last.action {
            ActionKind::Click => format!(
                "You tapped {} {} times with no progress. Try a long-press on it, or choose a different element that leads to the goal.",
                target, count
            ),
            ActionKind::LongPress => format!(
                "Long-pressing {} {} times did nothing. Use a different element or go back and take an alternate path.",
                target, count
            ),
            ActionKind::Type => format!(
                "You typed the same text into {} {} times. Dismiss the keyboard and check whether the field already holds it, or submit with press_enter.",
                target, count
            ),
            ActionKind::Swipe => format!(
                "Swiping the same way {} times is not revealing anything new. Try the opposite direction, go back, or use the alternate path.",
                count
            ),
            _ => format!(
                "'{}' has been repeated {} times without effect. Choose a different action.",
                last.description, count
            ),
        };
        Some(Repetition {
            pattern: RepetitionPattern::ExactRepeat { count },
            directive,
        })
    }

    fn oscillation(&self) -> Option<Repetition> {
        if self.actions.len() < 4 {
            return None;
        }
        let tail: Vec<&ActionRecord> = self.actions.iter().rev().take(4).collect();
        let by_key = |f: fn(&ActionRecord) -> String| {
            let k: Vec<String> = tail.iter().map(|r| f(r)).collect();
            k[0] == k[2] && k[1] == k[3] && k[0] != k[1]
        };
        let by_target = by_key(|r| r.key());
        let by_description = by_key(|r| r.description.trim().to_lowercase());
        if !(by_target || by_description) {
            return None;
        }
        Some(Repetition {
            pattern: RepetitionPattern::Oscillation,
            directive: format!(
                "You are alternating between '{}' and '{}'. Stop switching back and forth; scroll to find another route or go back and try an alternate path.",
                tail[1].description, tail[0].description
            ),
        })
    }

    fn monotone(&self) -> Option<Repetition> {
        let last = self.actions.back()?;
        let run: Vec<&ActionRecord> = self
            .actions
            .iter()
            .rev()
            .take_while(|r| r.action == last.action)
            .collect();
        if run.len() < MONOTONE_RUN {
            return None;
        }
        let distinct: HashSet<String> = run
            .iter()
            .map(|r| r.description.trim().to_lowercase())
            .collect();
        if distinct.len() > MONOTONE_MAX_DISTINCT {
            return None;
        }
        Some(Repetition {
            pattern: RepetitionPattern::Monotone { count: run.len() },
            directive: format!(
                "The last {} actions were all '{}' with little variety. Change tactics: scroll to a new region, go back, or follow the alternate path.",
                run.len(),
                last.action.as_str()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> StagnationDetector {
        StagnationDetector::new(&AgentConfig::default())
    }

    fn rec(action: ActionKind, target: Option<&str>, desc: &str) -> ActionRecord {
        ActionRecord {
            action,
            target: target.map(str::to_string),
            text: None,
            description: desc.to_string(),
        }
    }

    #[test]
    fn identical_maps_escalate_then_reset() {
        let mut d = detector();
        let seen: Vec<Option<RecoveryAction>> = (0..6).map(|_| d.observe_map("same")).collect();
        assert_eq!(
            seen,
            vec![
                None,
                None,
                Some(RecoveryAction::DismissKeyboard),
                Some(RecoveryAction::Scroll),
                Some(RecoveryAction::NavigateBack),
                Some(RecoveryAction::NavigateBack),
            ]
        );
        assert_eq!(d.observe_map("different"), None);
        assert_eq!(d.same_map_count(), 0);
    }

    #[test]
    fn structural_hash_flags_third_recurrence() {
        let mut d = detector();
        assert!(!d.observe_structure(1));
        assert!(!d.observe_structure(2));
        assert!(!d.observe_structure(1));
        assert!(!d.observe_structure(3));
        assert!(d.observe_structure(1));
    }

    #[test]
    fn structural_hash_only_counts_recent_window() {
        let mut d = detector();
        d.observe_structure(7);
        d.observe_structure(7);
        for n in 100..110 {
            d.observe_structure(n);
        }
        assert!(!d.observe_structure(7));
    }

    #[test]
    fn exact_repeat_of_click_suggests_long_press() {
        let mut d = detector();
        d.record(rec(ActionKind::Click, Some("btn_1"), "tap ok"));
        assert!(d.detect_repetition().is_none());
        d.record(rec(ActionKind::Click, Some("btn_1"), "tap ok"));
        let rep = d.detect_repetition().unwrap();
        assert_eq!(rep.pattern, RepetitionPattern::ExactRepeat { count: 2 });
        assert!(rep.directive.contains("long-press"));
    }

    #[test]
    fn oscillation_between_two_targets() {
        let mut d = detector();
        d.record(rec(ActionKind::Click, Some("tab_1"), "open chats"));
        d.record(rec(ActionKind::Click, Some("tab_2"), "open calls"));
        d.record(rec(ActionKind::Click, Some("tab_1"), "open chats"));
        d.record(rec(ActionKind::Click, Some("tab_2"), "open calls"));
        let rep = d.detect_repetition().unwrap();
        assert_eq!(rep.pattern, RepetitionPattern::Oscillation);
        assert!(rep.directive.contains("alternating"));
    }

    #[test]
    fn monotone_swipes_with_low_diversity() {
        let mut d = detector();
        for i in 0..6 {
            let desc = if i % 2 == 0 { "scroll list" } else { "scroll more" };
            let mut r = rec(ActionKind::Swipe, Some(&format!("item_{}", i)), desc);
            r.text = Some(i.to_string());
            d.record(r);
        }
        let rep = d.detect_repetition().unwrap();
        assert_eq!(rep.pattern, RepetitionPattern::Monotone { count: 6 });
    }

    #[test]
    fn varied_history_is_not_flagged() {
        let mut d = detector();
        d.record(rec(ActionKind::Click, Some("btn_1"), "open menu"));
        d.record(rec(ActionKind::Type, Some("input_1"), "enter name"));
        d.record(rec(ActionKind::Click, Some("btn_4"), "save"));
        assert!(d.detect_repetition().is_none());
    }

    #[test]
    fn ring_is_bounded() {
        let mut d = detector();
        for i in 0..50 {
            d.record(rec(ActionKind::Click, Some(&format!("btn_{}", i)), "x"));
        }
        assert_eq!(d.recent_actions().count(), 20);
    }

    #[test]
    fn recent_actions_read_newest_first_in_reverse() {
        let mut d = detector();
        d.record(rec(ActionKind::Click, Some("btn_1"), "open menu"));
        d.record(rec(ActionKind::Back, None, "leave menu"));
        let newest: Vec<&str> = d.recent_actions().rev().map(|r| r.description.as_str()).collect();
        assert_eq!(newest, vec!["leave menu", "open menu"]);
    }
}
