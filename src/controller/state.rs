use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action_schema::PlanningResult;
use crate::config::AgentConfig;
use crate::controller::conversation::{ConversationHistory, FailureContext, PinnedContext};

const MAX_COMPLETED_SUBTASKS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Running,
    Completed,
    Failed,
    MaxIterationsReached,
    Stopped,
}

/// Status reported to the host callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed,
    Error,
    MaxIterations,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::MaxIterations => "max_iterations",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Status,
    Action,
    Warning,
    Strategy,
    Finding,
    Outcome,
}

/// Narration of one loop event, streamed to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub event_id: String,
    pub ts: String,
    pub run_id: String,
    pub iteration: u32,
    pub event_type: EventType,
    pub message: String,
}

impl AgentEvent {
    pub fn new(run_id: &str, iteration: u32, event_type: EventType, message: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            ts: Utc::now().to_rfc3339(),
            run_id: run_id.to_string(),
            iteration,
            event_type,
            message: message.into(),
        }
    }
}

/// Mutable state of one task run. Owned by the loop alone; background tasks
/// hand results back instead of writing here.
#[derive(Debug)]
pub struct LoopState {
    pub task: String,
    pub iteration: u32,
    pub history: ConversationHistory,
    pub failures: FailureContext,
    pub facts: Vec<String>,
    pub completed_subtasks: Vec<String>,
    pub strategy: Option<PlanningResult>,
    pub failures_since_last_plan: u32,
    pub consecutive_model_errors: u32,
    pub last_progress_check: u32,
    pub pending_directives: Vec<String>,
    pub accessibility_only: bool,
    pub final_message: String,
}

impl LoopState {
    pub fn new(task: &str, config: &AgentConfig) -> Self {
        Self {
            task: task.to_string(),
            iteration: 0,
            history: ConversationHistory::new(task, config.history_window),
            failures: FailureContext::new(config.failure_context_cap),
            facts: Vec::new(),
            completed_subtasks: Vec::new(),
            strategy: None,
            failures_since_last_plan: 0,
            consecutive_model_errors: 0,
            last_progress_check: 0,
            pending_directives: Vec::new(),
            accessibility_only: false,
            final_message: String::new(),
        }
    }

    pub fn record_failure(&mut self, failure: impl Into<String>) {
        self.failures.push(failure);
        self.failures_since_last_plan += 1;
    }

    pub fn add_fact(&mut self, fact: impl Into<String>) {
        let fact = fact.into();
        let fact = fact.trim();
        if fact.is_empty() || self.facts.iter().any(|f| f == fact) {
            return;
        }
        self.facts.push(fact.to_string());
    }

    pub fn mark_done(&mut self, description: &str) {
        let description = description.trim();
        if description.is_empty() || self.completed_subtasks.last().map(String::as_str) == Some(description) {
            return;
        }
        if self.completed_subtasks.len() == MAX_COMPLETED_SUBTASKS {
            self.completed_subtasks.remove(0);
        }
        self.completed_subtasks.push(description.to_string());
    }

    /// A new strategy replaces the old one outright and clears failure pressure.
    pub fn adopt_strategy(&mut self, strategy: PlanningResult) {
        self.strategy = Some(strategy);
        self.failures_since_last_plan = 0;
    }

    pub fn refresh_pinned(&mut self) {
        let guidance = self.strategy.as_ref().map(PlanningResult::render);
        self.history.update_pinned(&PinnedContext {
            task: &self.task,
            guidance: guidance.as_deref(),
            facts: &self.facts,
            completed_subtasks: &self.completed_subtasks,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_strings_match_callback_contract() {
        let all = [
            TaskOutcome::Completed,
            TaskOutcome::Failed,
            TaskOutcome::Error,
            TaskOutcome::MaxIterations,
        ];
        let names: Vec<&str> = all.iter().map(TaskOutcome::as_str).collect();
        assert_eq!(names, vec!["completed", "failed", "error", "max_iterations"]);
        assert_eq!(
            serde_json::to_value(TaskOutcome::MaxIterations).unwrap(),
            serde_json::json!("max_iterations")
        );
    }

    #[test]
    fn strategy_replaces_and_resets_pressure() {
        let mut state = LoopState::new("toggle Wi-Fi on", &AgentConfig::default());
        state.record_failure("tap failed");
        state.record_failure("tap failed again");
        assert_eq!(state.failures_since_last_plan, 2);
        state.adopt_strategy(PlanningResult {
            approaches: vec![],
            recommended_index: 0,
            guidance: "Open Settings first".to_string(),
            parallel: None,
        });
        assert_eq!(state.failures_since_last_plan, 0);
        assert_eq!(state.failures.len(), 2);

        state.add_fact("Wi-Fi is under Network");
        state.add_fact("Wi-Fi is under Network");
        state.refresh_pinned();
        assert_eq!(state.facts.len(), 1);
        assert!(state.history.pinned().contains("Open Settings first"));
        assert!(state.history.pinned().contains("Wi-Fi is under Network"));
    }

    #[test]
    fn events_carry_ids_and_timestamps() {
        let event = AgentEvent::new("run-1", 3, EventType::Warning, "tap failed");
        assert!(!event.event_id.is_empty());
        assert!(event.ts.contains('T'));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "warning");
    }
}
