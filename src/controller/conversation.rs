use std::collections::VecDeque;

use crate::llm_gateway::{Role, Turn};

/// Inputs of the pinned first message.
#[derive(Debug, Clone, Default)]
pub struct PinnedContext<'a> {
    pub task: &'a str,
    pub guidance: Option<&'a str>,
    pub facts: &'a [String],
    pub completed_subtasks: &'a [String],
}

/// Turns exchanged with the planner. Index 0 is the pinned anchor; it is
/// rewritten in place and never trimmed.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
    max_window: usize,
    trimmed_total: usize,
}

impl ConversationHistory {
    pub fn new(task: &str, max_window: usize) -> Self {
        let pinned = render_pinned(&PinnedContext {
            task,
            ..Default::default()
        });
        Self {
            turns: vec![Turn::user(pinned)],
            max_window: max_window.max(1),
            trimmed_total: 0,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn pinned(&self) -> &str {
        &self.turns[0].content
    }

    pub fn update_pinned(&mut self, ctx: &PinnedContext<'_>) {
        self.turns[0].content = render_pinned(ctx);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::assistant(content));
    }

    /// Out-of-band notes (warnings, verification results) go in as user turns.
    pub fn push_note(&mut self, note: &str) {
        self.turns.push(Turn::user(format!("[NOTE] {}", note)));
    }

    /// Drops the trailing turn if it was written by `role`.
    pub fn pop_last_if(&mut self, role: Role) -> Option<Turn> {
        if self.turns.len() > 1 && self.turns.last().map(|t| t.role) == Some(role) {
            return self.turns.pop();
        }
        None
    }

    /// Collapses to pinned + bridge note + last `max_window` turns once the
    /// history outgrows that shape. Returns whether anything was dropped.
    pub fn trim(&mut self) -> bool {
        if self.turns.len() <= self.max_window + 2 {
            return false;
        }
        let keep_from = self.turns.len() - self.max_window;
        let has_bridge = self.turns.get(1).is_some_and(is_bridge);
        let dropped = keep_from - 1 - usize::from(has_bridge);
        self.trimmed_total += dropped;

        let window: Vec<Turn> = self.turns.drain(keep_from..).collect();
        self.turns.truncate(1);
        self.turns.push(Turn::user(format!(
            "{} {} earlier turns omitted; the pinned message above holds the task, strategy and facts.]",
            BRIDGE_PREFIX, self.trimmed_total
        )));
        self.turns.extend(window);
        true
    }
}

const BRIDGE_PREFIX: &str = "[History trimmed:";

fn is_bridge(turn: &Turn) -> bool {
    turn.content.starts_with(BRIDGE_PREFIX)
}

fn render_pinned(ctx: &PinnedContext<'_>) -> String {
    let mut out = format!("TASK: {}\n", ctx.task);
    if let Some(guidance) = ctx.guidance.filter(|g| !g.trim().is_empty()) {
        out.push_str("\nSTRATEGIC GUIDANCE:\n");
        out.push_str(guidance.trim());
        out.push('\n');
    }
    if !ctx.facts.is_empty() {
        out.push_str("\nDISCOVERED FACTS:\n");
        for fact in ctx.facts {
            out.push_str(&format!("- {}\n", fact));
        }
    }
    if !ctx.completed_subtasks.is_empty() {
        out.push_str("\nCOMPLETED SUB-TASKS:\n");
        for done in ctx.completed_subtasks {
            out.push_str(&format!("- {}\n", done));
        }
    }
    out
}

/// Most-recent-N failure descriptions fed back into prompts.
#[derive(Debug, Clone)]
pub struct FailureContext {
    entries: VecDeque<String>,
    cap: usize,
}

impl FailureContext {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap),
            cap: cap.max(1),
        }
    }

    pub fn push(&mut self, failure: impl Into<String>) {
        if self.entries.len() == self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(failure.into());
    }

    pub fn recent(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
