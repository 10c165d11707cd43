use once_cell::sync::Lazy;
use regex::Regex;

use crate::action_schema::ProgressVerdict;
use crate::error::AgentError;
use crate::llm_gateway::{CompletionRequest, PlanningModel, ProgressRequest};

static FAILURE_CLAIM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(cannot|can't|can not|unable to|impossible to|failed to)\s+(complete|finish|do|perform)\b[\s:,.-]*(.*)$")
        .expect("failure claim pattern")
});

/// Reason text when a `complete` message is really an admission of failure.
pub fn parse_failure_claim(message: &str) -> Option<String> {
    let caps = FAILURE_CLAIM.captures(message)?;
    let reason = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("");
    Some(if reason.is_empty() {
        message.trim().to_string()
    } else {
        reason.to_string()
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionDecision {
    Confirmed(String),
    Rejected(String),
    /// Verifier could not answer; the claim stands.
    Unverified(String),
}

pub struct Supervisor;

impl Supervisor {
    /// Progress checks run every `interval` iterations that did not claim completion.
    pub fn progress_check_due(iteration: u32, last_check: u32, interval: u32) -> bool {
        interval > 0 && iteration >= interval && iteration.saturating_sub(last_check) >= interval
    }

    pub async fn check_progress(
        model: &dyn PlanningModel,
        req: &ProgressRequest,
    ) -> Option<ProgressVerdict> {
        match model.check_progress(req).await {
            Ok(verdict) => Some(verdict),
            Err(AgentError::Unavailable(_)) => None,
            Err(e) => {
                log::warn!("Progress check failed: {}", e);
                None
            }
        }
    }

    /// Second stage of completion: only a positive verdict is trusted, but an
    /// unavailable verifier leaves the claim in place.
    pub async fn verify_completion(
        model: &dyn PlanningModel,
        req: &CompletionRequest,
    ) -> CompletionDecision {
        match model.verify_completion(req).await {
            Ok(v) if v.complete => CompletionDecision::Confirmed(v.reason),
            Ok(v) => CompletionDecision::Rejected(if v.reason.is_empty() {
                "verifier says the task is not finished".to_string()
            } else {
                v.reason
            }),
            Err(e) => {
                log::warn!("Completion verification unavailable ({}); trusting the agent", e);
                CompletionDecision::Unverified(e.to_string())
            }
        }
    }
}
