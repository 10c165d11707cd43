//! In-memory collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::action_schema::{
    ActionKind, CompletionVerdict, Plan, PlanningResult, ProgressVerdict, SemanticStep,
};
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::host::{
    Gesture, GestureDispatcher, Host, NoTextRecognizer, ScreenCapture, ScreenState, UiInspector,
};
use crate::llm_gateway::{
    CompletionRequest, PlanningModel, ProgressRequest, PromptContext, StrategyRequest,
};
use crate::schema::RawElement;

/// Loop tunables with every delay shrunk to a millisecond.
pub fn fast_config() -> AgentConfig {
    AgentConfig {
        effect_check_delay: Duration::from_millis(1),
        settle_poll: Duration::from_millis(1),
        settle_max: Duration::from_millis(5),
        model_backoff: Duration::from_millis(1),
        transient_backoff: Duration::from_millis(1),
        result_path: None,
        ..AgentConfig::default()
    }
}

pub fn plan_of(steps: Vec<SemanticStep>) -> Plan {
    Plan {
        steps,
        reasoning: "scripted".to_string(),
        confidence: 0.9,
        alternative_path: None,
        relevant_apps: Vec::new(),
    }
}

fn short_wait() -> Plan {
    let mut wait = SemanticStep::new(ActionKind::Wait).describe("wait for the screen");
    wait.duration_ms = Some(1);
    plan_of(vec![wait])
}

#[derive(Default)]
pub struct RecordingDispatcher {
    gestures: Mutex<Vec<Gesture>>,
    typed: Mutex<Vec<String>>,
    reject_text: bool,
}

impl RecordingDispatcher {
    pub fn rejecting_text() -> Self {
        Self {
            reject_text: true,
            ..Default::default()
        }
    }

    pub fn gestures(&self) -> Vec<Gesture> {
        self.gestures.lock().unwrap().clone()
    }

    pub fn typed(&self) -> Vec<String> {
        self.typed.lock().unwrap().clone()
    }
}

#[async_trait]
impl GestureDispatcher for RecordingDispatcher {
    async fn dispatch_gesture(&self, gesture: Gesture) -> bool {
        self.gestures.lock().unwrap().push(gesture);
        true
    }

    async fn dispatch_text_entry(&self, text: &str) -> bool {
        if self.reject_text {
            return false;
        }
        self.typed.lock().unwrap().push(text.to_string());
        true
    }
}

/// Returns queued frames in order, then repeats the last one forever.
pub struct ScriptedInspector {
    frames: Mutex<VecDeque<Vec<RawElement>>>,
    last: Mutex<Vec<RawElement>>,
    calls: AtomicUsize,
}

#[async_trait]
impl UiInspector for ScriptedInspector {
    async fn extract_structural_elements(&self) -> Vec<RawElement> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.frames.lock().unwrap().pop_front() {
            *last = next;
        }
        last.clone()
    }
}

pub struct FixedScreen {
    width: i32,
    height: i32,
}

#[async_trait]
impl ScreenCapture for FixedScreen {
    async fn capture_screen_state(&self) -> Option<ScreenState> {
        Some(ScreenState {
            pixels: None,
            width: self.width,
            height: self.height,
        })
    }
}

pub struct ScriptedHost {
    inspector: Arc<ScriptedInspector>,
    dispatcher: Arc<RecordingDispatcher>,
    screen: Arc<FixedScreen>,
}

impl ScriptedHost {
    /// Each extraction takes the next frame; the last one then repeats.
    pub fn frames(frames: Vec<Vec<RawElement>>) -> Self {
        Self {
            inspector: Arc::new(ScriptedInspector {
                frames: Mutex::new(frames.into()),
                last: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }),
            dispatcher: Arc::new(RecordingDispatcher::default()),
            screen: Arc::new(FixedScreen {
                width: 1080,
                height: 2400,
            }),
        }
    }

    pub fn static_screen(elements: Vec<RawElement>) -> Self {
        Self::frames(vec![elements])
    }

    /// Same host, but every text entry is refused.
    pub fn rejecting_text(mut self) -> Self {
        self.dispatcher = Arc::new(RecordingDispatcher::rejecting_text());
        self
    }

    pub fn host(&self) -> Host {
        Host {
            screen: self.screen.clone(),
            inspector: self.inspector.clone(),
            ocr: Arc::new(NoTextRecognizer),
            dispatcher: self.dispatcher.clone(),
        }
    }

    pub fn extractions(&self) -> usize {
        self.inspector.calls.load(Ordering::SeqCst)
    }

    pub fn dispatcher(&self) -> Arc<RecordingDispatcher> {
        self.dispatcher.clone()
    }
}

/// Planning model that replays canned replies and records what it was asked.
#[derive(Default)]
pub struct ScriptedModel {
    plans: Mutex<VecDeque<Plan>>,
    fallback_plan: Option<Plan>,
    failing_plans: AtomicUsize,
    plan_delay: Duration,
    strategy: Option<String>,
    answer_delay: Duration,
    completion: Option<CompletionVerdict>,
    progress: Option<ProgressVerdict>,
    contexts: Mutex<Vec<PromptContext>>,
    plan_calls: AtomicUsize,
    progress_calls: AtomicUsize,
    verify_calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn with_plans(self, plans: Vec<Plan>) -> Self {
        *self.plans.lock().unwrap() = plans.into();
        self
    }

    pub fn with_fallback_plan(mut self, plan: Plan) -> Self {
        self.fallback_plan = Some(plan);
        self
    }

    pub fn with_failing_plans(self, count: usize) -> Self {
        self.failing_plans.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_plan_delay(mut self, delay: Duration) -> Self {
        self.plan_delay = delay;
        self
    }

    pub fn with_strategy(mut self, guidance: &str) -> Self {
        self.strategy = Some(guidance.to_string());
        self
    }

    pub fn with_answer_delay(mut self, delay: Duration) -> Self {
        self.answer_delay = delay;
        self
    }

    pub fn with_completion(mut self, verdict: Option<CompletionVerdict>) -> Self {
        self.completion = verdict;
        self
    }

    pub fn with_progress(mut self, verdict: Option<ProgressVerdict>) -> Self {
        self.progress = verdict;
        self
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls.load(Ordering::SeqCst)
    }

    pub fn progress_calls(&self) -> usize {
        self.progress_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<PromptContext> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlanningModel for ScriptedModel {
    async fn request_plan(&self, ctx: &PromptContext) -> AgentResult<Plan> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(ctx.clone());
        if !self.plan_delay.is_zero() {
            tokio::time::sleep(self.plan_delay).await;
        }
        let failing = self.failing_plans.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_plans.store(failing - 1, Ordering::SeqCst);
            return Err(AgentError::Planning("scripted outage".to_string()));
        }
        let next = self.plans.lock().unwrap().pop_front();
        Ok(next
            .or_else(|| self.fallback_plan.clone())
            .unwrap_or_else(short_wait))
    }

    async fn request_strategy(&self, _req: &StrategyRequest) -> AgentResult<Option<PlanningResult>> {
        Ok(self.strategy.as_ref().map(|guidance| PlanningResult {
            approaches: Vec::new(),
            recommended_index: 0,
            guidance: guidance.clone(),
            parallel: None,
        }))
    }

    async fn check_progress(&self, _req: &ProgressRequest) -> AgentResult<ProgressVerdict> {
        self.progress_calls.fetch_add(1, Ordering::SeqCst);
        self.progress
            .clone()
            .ok_or(AgentError::Unavailable("progress check"))
    }

    async fn verify_completion(&self, _req: &CompletionRequest) -> AgentResult<CompletionVerdict> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.completion
            .clone()
            .ok_or(AgentError::Unavailable("completion verification"))
    }

    async fn ask_expert(&self, question: &str, _context: &str) -> AgentResult<String> {
        tokio::time::sleep(self.answer_delay).await;
        Ok(format!("answer to {}", question))
    }

    async fn web_search(&self, query: &str) -> AgentResult<String> {
        tokio::time::sleep(self.answer_delay).await;
        Ok(format!("answer to {}", query))
    }
}
