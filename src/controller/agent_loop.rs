use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use log::{info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use crate::action_schema::{ActionKind, Plan, SemanticStep};
use crate::benchmark::{self, BenchmarkResult};
use crate::config::AgentConfig;
use crate::controller::actions::{missing_element_reason, ExecutorConfig, StepExecutor};
use crate::controller::coordinator::{CoordinatorEvent, PendingTask, PlanningCoordinator, QueryKind, QueryRequest};
use crate::controller::heuristics::{recovery_gesture, recovery_label, wait_for_settle};
use crate::controller::loop_detector::{ActionRecord, RecoveryAction, StagnationDetector};
use crate::controller::state::{AgentEvent, AgentStatus, EventType, LoopState, TaskOutcome};
use crate::controller::supervisor::{parse_failure_claim, CompletionDecision, Supervisor};
use crate::controller::verification::{check_target, spawn_effect_check, EffectVerdict, SafetyVerdict};
use crate::element_map::{ElementMap, ElementMapper};
use crate::error::{AgentError, AgentResult};
use crate::host::{Host, Observation};
use crate::llm_gateway::{
    CompletionRequest, PlanningModel, ProgressRequest, PromptContext, Role, StrategyKind, StrategyRequest,
};
use crate::prompts;

/// `(status, iterations, message)`, fired exactly once per run.
pub type CompletionCallback = Arc<dyn Fn(TaskOutcome, u32, &str) + Send + Sync>;

const DEFAULT_SCREEN: (i32, i32) = (1080, 2400);
const MAX_ANSWER_CHARS: usize = 600;
const PROGRESS_ACTIONS: usize = 6;
const QUERY_CONTEXT_ELEMENTS: usize = 20;
const RECURRING_LAYOUT: &str =
    "This screen layout keeps coming back. You are going in circles: pick a route you have not tried yet or go back further.";

struct RunSlot {
    status: AgentStatus,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

fn lock(slot: &Mutex<RunSlot>) -> MutexGuard<'_, RunSlot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Host-facing handle. One task runs at a time; each run lives on its own
/// tokio task and owns all of its state.
pub struct AgentLoop {
    host: Host,
    model: Arc<dyn PlanningModel>,
    config: AgentConfig,
    on_complete: Option<CompletionCallback>,
    events: Option<mpsc::Sender<AgentEvent>>,
    slot: Arc<Mutex<RunSlot>>,
}

impl AgentLoop {
    pub fn new(host: Host, model: Arc<dyn PlanningModel>, config: AgentConfig) -> Self {
        Self {
            host,
            model,
            config,
            on_complete: None,
            events: None,
            slot: Arc::new(Mutex::new(RunSlot {
                status: AgentStatus::Idle,
                stop_tx: None,
                handle: None,
            })),
        }
    }

    pub fn with_completion_callback(mut self, callback: CompletionCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }

    pub fn with_events(mut self, tx: mpsc::Sender<AgentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Spawns a run for `task` and returns its id.
    pub fn start(&self, task: &str) -> AgentResult<String> {
        let task = task.trim();
        if task.is_empty() {
            return Err(AgentError::Config("task must not be empty".to_string()));
        }
        let mut slot = lock(&self.slot);
        if slot.status == AgentStatus::Running {
            return Err(AgentError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let run_id: String = Uuid::new_v4().to_string().chars().take(8).collect();
        let run = TaskRun::new(
            task,
            &run_id,
            self.host.clone(),
            self.model.clone(),
            self.config.clone(),
            self.events.clone(),
            stop_rx,
        );
        let shared = self.slot.clone();
        let callback = self.on_complete.clone();

        slot.status = AgentStatus::Running;
        slot.stop_tx = Some(stop_tx);
        slot.handle = Some(tokio::spawn(async move {
            let report = run.run().await;
            {
                let mut slot = lock(&shared);
                slot.status = report.status;
                slot.stop_tx = None;
            }
            if let Some(callback) = callback {
                callback(report.outcome, report.iterations, &report.message);
            }
        }));
        Ok(run_id)
    }

    /// Signals the running task to stop. A gesture already in flight
    /// finishes; no new step starts.
    pub fn stop(&self) {
        let slot = lock(&self.slot);
        if let Some(tx) = &slot.stop_tx {
            let _ = tx.send(true);
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.slot).status == AgentStatus::Running
    }

    pub fn status(&self) -> AgentStatus {
        lock(&self.slot).status
    }

    /// Waits for the current run, if any, to finish.
    pub async fn wait(&self) {
        let handle = lock(&self.slot).handle.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Agent run ended abnormally: {}", e);
            }
        }
    }
}

struct RunReport {
    status: AgentStatus,
    outcome: TaskOutcome,
    iterations: u32,
    message: String,
}

enum Flow {
    Continue,
    Finish(AgentStatus, TaskOutcome, String),
}

impl Flow {
    fn stopped() -> Self {
        Flow::Finish(AgentStatus::Stopped, TaskOutcome::Failed, "stopped".to_string())
    }

    fn completed(message: &str) -> Self {
        Flow::Finish(AgentStatus::Completed, TaskOutcome::Completed, message.to_string())
    }
}

enum PlanReply {
    Plan(Plan),
    Failed(String),
    Stopped,
}

async fn wait_for_stop(mut stop: watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            // Sender gone without a stop signal.
            std::future::pending::<()>().await;
        }
    }
}

/// One task from start to terminal status.
struct TaskRun {
    run_id: String,
    host: Host,
    model: Arc<dyn PlanningModel>,
    config: AgentConfig,
    mapper: ElementMapper,
    executor: StepExecutor,
    coordinator: PlanningCoordinator,
    detector: StagnationDetector,
    state: LoopState,
    events: Option<mpsc::Sender<AgentEvent>>,
    stop: watch::Receiver<bool>,
    effect_check: Option<PendingTask<EffectVerdict>>,
    screen_size: (i32, i32),
}

impl TaskRun {
    fn new(
        task: &str,
        run_id: &str,
        host: Host,
        model: Arc<dyn PlanningModel>,
        config: AgentConfig,
        events: Option<mpsc::Sender<AgentEvent>>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            executor: StepExecutor::with_config(host.dispatcher.clone(), ExecutorConfig::from(&config)),
            mapper: ElementMapper::new(config.max_elements),
            coordinator: PlanningCoordinator::new(model.clone(), &config),
            detector: StagnationDetector::new(&config),
            state: LoopState::new(task, &config),
            host,
            model,
            config,
            events,
            stop,
            effect_check: None,
            screen_size: DEFAULT_SCREEN,
        }
    }

    async fn run(mut self) -> RunReport {
        let started = Instant::now();
        if let Some(path) = &self.config.result_path {
            if let Err(e) = benchmark::clear_result(path) {
                warn!("Could not clear previous benchmark result: {}", e);
            }
        }
        self.narrate(EventType::Status, format!("🚀 Starting task: {}", self.state.task));

        let (status, outcome, message) = loop {
            if self.stopped() {
                break (AgentStatus::Stopped, TaskOutcome::Failed, "stopped".to_string());
            }
            if self.state.iteration >= self.config.max_iterations {
                break (
                    AgentStatus::MaxIterationsReached,
                    TaskOutcome::MaxIterations,
                    format!("Reached the {}-iteration limit", self.config.max_iterations),
                );
            }
            self.state.iteration += 1;
            info!("\n🔄 [Iteration {}/{}]", self.state.iteration, self.config.max_iterations);
            if let Flow::Finish(status, outcome, message) = self.iterate().await {
                break (status, outcome, message);
            }
        };

        self.coordinator.cancel_all();
        if let Some(task) = self.effect_check.take() {
            task.cancel();
        }
        self.state.final_message = message.clone();
        self.narrate(
            EventType::Outcome,
            format!("🏁 {} after {} iterations: {}", outcome.as_str(), self.state.iteration, message),
        );

        if let Some(path) = &self.config.result_path {
            let record = BenchmarkResult {
                task_id: self.run_id.clone(),
                task: self.state.task.clone(),
                status: outcome.as_str().to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
                iterations: i64::from(self.state.iteration),
                final_message: message.clone(),
            };
            if let Err(e) = benchmark::write_result(path, &record) {
                warn!("Could not write benchmark result: {}", e);
            }
        }

        RunReport {
            status,
            outcome,
            iterations: self.state.iteration,
            message,
        }
    }

    async fn iterate(&mut self) -> Flow {
        let iteration = self.state.iteration;
        self.merge_background(iteration);
        self.state.history.trim();

        let mut obs = self.observe().await;
        if obs.screen.is_none() && obs.structural_count == 0 && obs.map.is_empty() {
            self.narrate(EventType::Warning, "Nothing could be captured from the screen; retrying");
            if self.unless_stopped(sleep(self.config.transient_backoff)).await.is_none() {
                return Flow::stopped();
            }
            return Flow::Continue;
        }

        // Stagnation only advances on iterations that end up with a plan.
        let detector_before = self.detector.clone();
        let pressure_before = self.state.failures_since_last_plan;
        if let Some(recaptured) = self.check_stagnation(&obs).await {
            obs = recaptured;
        }
        let stagnation_pressure = self.state.failures_since_last_plan - pressure_before;
        self.fire_consultations(iteration, &obs);

        if Supervisor::progress_check_due(
            iteration,
            self.state.last_progress_check,
            self.config.progress_check_interval,
        ) {
            if let Some(flow) = self.run_progress_check(&obs).await {
                return flow;
            }
        }

        self.state.refresh_pinned();
        let ctx = self.build_prompt_context(&obs);
        let plan = match self.request_plan(&ctx).await {
            PlanReply::Plan(plan) => plan,
            PlanReply::Stopped => return Flow::stopped(),
            PlanReply::Failed(reason) => {
                self.detector = detector_before;
                self.state.failures_since_last_plan =
                    self.state.failures_since_last_plan.saturating_sub(stagnation_pressure);
                return self.on_model_failure(reason).await;
            }
        };

        self.state.pending_directives.clear();
        self.state
            .history
            .push_assistant(serde_json::to_string(&plan).unwrap_or_else(|_| plan.reasoning.clone()));
        self.narrate(
            EventType::Action,
            format!(
                "🧠 Plan with {} step(s), confidence {:.2}: {}",
                plan.steps.len(),
                plan.confidence,
                plan.reasoning
            ),
        );
        if plan.steps.is_empty() {
            self.state.record_failure("planner returned no steps");
            self.state
                .history
                .push_note("Your last reply contained no steps. Reply with at least one action.");
            return Flow::Continue;
        }
        self.execute_plan(plan, obs).await
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// `None` when a stop signal arrives first.
    async fn unless_stopped<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            _ = wait_for_stop(self.stop.clone()) => None,
            out = fut => Some(out),
        }
    }

    fn narrate(&self, event_type: EventType, message: impl Into<String>) {
        let message = message.into();
        match event_type {
            EventType::Warning => warn!("⚠️ {}", message),
            _ => info!("{}", message),
        }
        if let Some(tx) = &self.events {
            let _ = tx.try_send(AgentEvent::new(&self.run_id, self.state.iteration, event_type, message));
        }
    }

    async fn observe(&mut self) -> Observation {
        let obs = self.host.observe(&self.mapper, self.screen_size).await;
        if let Some(screen) = &obs.screen {
            if screen.width > 0 && screen.height > 0 {
                self.screen_size = (screen.width, screen.height);
            }
        }
        let visual = obs.screenshot().is_some();
        if !visual && !self.state.accessibility_only {
            self.narrate(
                EventType::Warning,
                "Screen capture unavailable; continuing with the element tree only",
            );
        } else if visual && self.state.accessibility_only {
            self.narrate(EventType::Status, "Screen capture available again");
        }
        self.state.accessibility_only = !visual;
        obs
    }

    async fn settle(&self) {
        wait_for_settle(
            &self.host,
            &self.mapper,
            self.screen_size,
            self.config.settle_poll,
            self.config.settle_max,
        )
        .await;
    }

    fn merge_background(&mut self, iteration: u32) {
        for event in self.coordinator.poll(iteration) {
            match event {
                CoordinatorEvent::Strategy { kind, result } => {
                    self.narrate(
                        EventType::Strategy,
                        format!("🧭 {} strategy ready: {}", kind.label(), result.render()),
                    );
                    self.state.adopt_strategy(result);
                    self.state.history.push_note(&format!(
                        "A new {} strategy replaced the previous guidance in the pinned message.",
                        kind.label()
                    ));
                }
                CoordinatorEvent::StrategyUnavailable { kind, reason } => {
                    self.narrate(
                        EventType::Warning,
                        format!("{} strategy unavailable: {}", kind.label(), reason),
                    );
                }
                CoordinatorEvent::Answer { request, answer } => {
                    let answer: String = answer.trim().chars().take(MAX_ANSWER_CHARS).collect();
                    self.narrate(EventType::Status, format!("💡 Answer to '{}' received", request.query));
                    self.state.add_fact(format!("{} → {}", request.query, answer));
                    self.state.history.push_note(&format!(
                        "The answer to '{}' is now listed under DISCOVERED FACTS.",
                        request.query
                    ));
                }
                CoordinatorEvent::AnswerFailed { request, reason } => {
                    self.narrate(
                        EventType::Warning,
                        format!("Query '{}' failed: {}", request.query, reason),
                    );
                    self.state
                        .history
                        .push_note(&format!("Query '{}' failed: {}", request.query, reason));
                }
            }
        }
    }

    /// Runs map-equality and layout-recurrence checks. Returns a fresh
    /// observation when a recovery gesture changed the screen.
    async fn check_stagnation(&mut self, obs: &Observation) -> Option<Observation> {
        let mut recaptured = None;
        if let Some(action) = self.detector.observe_map(obs.map.to_prompt_text()) {
            let repeats = self.detector.same_map_count();
            let delivered = self
                .host
                .dispatcher
                .dispatch_gesture(recovery_gesture(action, &obs.map))
                .await;
            let message = format!(
                "Screen unchanged for {} iterations; {}{}",
                repeats + 1,
                recovery_label(action),
                if delivered { "" } else { " (gesture rejected)" }
            );
            self.narrate(EventType::Warning, &message);
            self.state.history.push_note(&message);
            if action == RecoveryAction::NavigateBack {
                self.detector.reset_map();
            }
            self.settle().await;
            recaptured = Some(self.observe().await);
        }

        let hash = recaptured.as_ref().unwrap_or(obs).map.structural_hash();
        if self.detector.observe_structure(hash) {
            self.state.failures_since_last_plan += 1;
            if !self.state.pending_directives.iter().any(|d| d == RECURRING_LAYOUT) {
                self.state.pending_directives.push(RECURRING_LAYOUT.to_string());
            }
            self.narrate(EventType::Warning, "Recurring screen layout detected");
        }
        recaptured
    }

    fn fire_consultations(&mut self, iteration: u32, obs: &Observation) {
        if !self.coordinator.initial_fired() {
            let request = strategy_request(StrategyKind::Initial, &self.state.task, obs, None);
            self.coordinator.fire_initial(iteration, request);
        }
        if self
            .coordinator
            .recovery_due(iteration, self.state.failures_since_last_plan)
        {
            let failures = Some(self.state.failures.recent());
            let request = strategy_request(StrategyKind::Recovery, &self.state.task, obs, failures);
            self.coordinator.fire_recovery(iteration, request);
        }
        if self
            .coordinator
            .last_resort_due(iteration, self.state.failures_since_last_plan > 0)
        {
            let failures = Some(self.state.failures.recent());
            let request = strategy_request(StrategyKind::LastResort, &self.state.task, obs, failures);
            self.coordinator.fire_last_resort(iteration, request);
        }
    }

    async fn run_progress_check(&mut self, obs: &Observation) -> Option<Flow> {
        self.state.last_progress_check = self.state.iteration;
        let mut recent: Vec<String> = self
            .detector
            .recent_actions()
            .rev()
            .take(PROGRESS_ACTIONS)
            .map(|r| r.description.clone())
            .collect();
        recent.reverse();
        let request = ProgressRequest {
            task: self.state.task.clone(),
            recent_actions: recent,
            map_text: obs.map.to_prompt_text().to_string(),
            screenshot: obs.screenshot(),
        };
        let verdict = match self
            .unless_stopped(Supervisor::check_progress(&*self.model, &request))
            .await
        {
            None => return Some(Flow::stopped()),
            Some(None) => return None,
            Some(Some(verdict)) => verdict,
        };

        if verdict.task_complete {
            self.narrate(EventType::Status, "Progress check reports the task is already done");
            let claim = if verdict.reason.trim().is_empty() {
                "the task appears to be complete".to_string()
            } else {
                verdict.reason.clone()
            };
            return self.confirm_completion(&claim).await;
        }
        if !verdict.progressing {
            let failure = format!("Progress check: {}", verdict.reason);
            self.narrate(EventType::Warning, &failure);
            self.state.record_failure(failure);
            self.state.pending_directives.push(format!(
                "Your recent actions are not moving toward the goal ({}). Change approach instead of continuing the same way.",
                verdict.reason
            ));
        }
        None
    }

    /// Drains pending directives into the prompt and appends the
    /// iteration's user turn to the history.
    fn build_prompt_context(&mut self, obs: &Observation) -> PromptContext {
        let mut directives: Vec<String> = self
            .detector
            .detect_repetition()
            .map(|r| r.directive)
            .into_iter()
            .collect();
        directives.extend(self.state.pending_directives.iter().cloned());
        let failures = self.state.failures.recent();

        let message = prompts::iteration_message(
            self.state.iteration,
            obs.map.to_prompt_text(),
            self.state.accessibility_only,
            &failures,
            &directives,
        );
        self.state.history.push_user(message);

        PromptContext {
            task: self.state.task.clone(),
            iteration: self.state.iteration,
            turns: self.state.history.turns().to_vec(),
            screenshot: obs.screenshot(),
            failures,
            directives,
        }
    }

    async fn request_plan(&mut self, ctx: &PromptContext) -> PlanReply {
        let attempts = self.config.model_retries + 1;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.unless_stopped(self.model.request_plan(ctx)).await {
                None => return PlanReply::Stopped,
                Some(Ok(plan)) => {
                    self.state.consecutive_model_errors = 0;
                    return PlanReply::Plan(plan);
                }
                Some(Err(e)) => {
                    warn!("Planning call failed (attempt {}/{}): {}", attempt, attempts, e);
                    last_error = e.to_string();
                }
            }
            if attempt < attempts && self.unless_stopped(sleep(self.config.model_backoff)).await.is_none() {
                return PlanReply::Stopped;
            }
        }
        PlanReply::Failed(last_error)
    }

    /// Iteration is spent but stagnation counters stay untouched.
    async fn on_model_failure(&mut self, reason: String) -> Flow {
        self.state.history.pop_last_if(Role::User);
        self.state.consecutive_model_errors += 1;
        self.narrate(
            EventType::Warning,
            format!(
                "Planning model unavailable ({} in a row): {}",
                self.state.consecutive_model_errors, reason
            ),
        );
        if self.state.consecutive_model_errors >= self.config.max_model_errors {
            return Flow::Finish(
                AgentStatus::Failed,
                TaskOutcome::Error,
                format!("Planning model failed repeatedly: {}", reason),
            );
        }
        if self.unless_stopped(sleep(self.config.model_backoff)).await.is_none() {
            return Flow::stopped();
        }
        Flow::Continue
    }

    async fn execute_plan(&mut self, plan: Plan, obs: Observation) -> Flow {
        let iteration = self.state.iteration;
        let planned = Arc::new(obs.map);
        let mut current = planned.clone();
        let total = plan.steps.len();

        for (index, mut step) in plan.steps.into_iter().enumerate() {
            if self.stopped() {
                return Flow::stopped();
            }
            if self.consume_effect_check().await {
                return Flow::Continue;
            }

            match step.action {
                ActionKind::Note | ActionKind::ShareFinding => {
                    self.record_note(&step);
                    continue;
                }
                ActionKind::Extract => {
                    self.extract(&step, &current);
                    continue;
                }
                ActionKind::AskExpert | ActionKind::WebSearch => {
                    self.request_query(iteration, &step, &current);
                    continue;
                }
                ActionKind::Complete => return self.handle_complete(&step).await,
                _ => {}
            }

            if step.action.needs_target_check() {
                if let Some(target) = step.element.clone() {
                    let fresh = self.observe().await;
                    let verdict = check_target(&planned, &fresh.map, &target, self.config.position_tolerance_px);
                    let reason = verdict.reason().unwrap_or_default();
                    match verdict {
                        SafetyVerdict::Safe { .. } => {}
                        SafetyVerdict::Reindexed { element, .. } => {
                            self.narrate(EventType::Status, format!("🔁 {}", reason));
                            self.state.history.push_note(&reason);
                            step.element = Some(element.id.clone());
                        }
                        SafetyVerdict::Unsafe(cause) => {
                            let failure = format!("Skipped '{}': {}", step.label(), cause.tag());
                            self.narrate(EventType::Warning, &failure);
                            self.state.record_failure(failure.clone());
                            self.state.pending_directives.push(cause.directive());
                            self.state
                                .history
                                .push_note(&format!("{}. The remaining steps were not executed.", failure));
                            return Flow::Continue;
                        }
                    }
                    current = Arc::new(fresh.map);
                }
            }

            let mut outcome = self.executor.execute(&step, &current).await;
            if !outcome.success {
                warn!(
                    "Step '{}' failed ({}); retrying once with a fresh map",
                    step.label(),
                    outcome.failure_reason.as_deref().unwrap_or("unknown")
                );
                self.settle().await;
                current = Arc::new(self.observe().await.map);
                outcome = self.executor.execute(&step, &current).await;
            }
            if !outcome.success {
                let failure = format!(
                    "Step {}/{} '{}' failed: {}",
                    index + 1,
                    total,
                    step.label(),
                    outcome.failure_reason.as_deref().unwrap_or("unknown failure")
                );
                self.narrate(EventType::Warning, &failure);
                self.state.record_failure(failure.clone());
                self.state
                    .history
                    .push_note(&format!("{}. The remaining steps were not executed.", failure));
                return Flow::Continue;
            }

            self.detector.record(ActionRecord::from_step(&step));
            let done = if step.description.trim().is_empty() {
                step.label()
            } else {
                step.description.clone()
            };
            self.state.mark_done(&done);
            self.narrate(EventType::Action, format!("✅ {}", step.label()));

            if matches!(step.action, ActionKind::Click | ActionKind::LongPress | ActionKind::Type) {
                self.effect_check = Some(spawn_effect_check(
                    self.host.clone(),
                    self.mapper.clone(),
                    step.clone(),
                    outcome,
                    current.clone(),
                    self.config.effect_check_delay,
                    iteration,
                ));
            }
            if step.action.mutates_ui() {
                self.settle().await;
            }
        }

        self.consume_effect_check().await;
        Flow::Continue
    }

    /// Awaits the previous step's effect check. True when it failed, in
    /// which case the rest of the plan must be dropped.
    async fn consume_effect_check(&mut self) -> bool {
        let Some(task) = self.effect_check.take() else {
            return false;
        };
        match task.join().await {
            Some(verdict) if !verdict.passed => {
                let failure = format!("Verification failed after '{}': {}", verdict.step, verdict.reason);
                self.narrate(EventType::Warning, &failure);
                self.state.record_failure(failure.clone());
                self.state.history.push_note(&format!(
                    "{}. The rest of the plan was skipped; look at the screen again before acting.",
                    failure
                ));
                true
            }
            _ => false,
        }
    }

    fn record_note(&mut self, step: &SemanticStep) {
        let text = step
            .text
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| step.description.clone());
        if text.trim().is_empty() {
            return;
        }
        if step.action == ActionKind::ShareFinding {
            self.narrate(EventType::Finding, format!("📣 {}", text.trim()));
        }
        self.state.add_fact(text);
    }

    fn extract(&mut self, step: &SemanticStep, map: &ElementMap) {
        match step.element.as_deref().map(|id| (id, map.find(id))) {
            Some((_, Some(element))) => {
                let label = if step.description.trim().is_empty() {
                    element.id.clone()
                } else {
                    step.description.trim().to_string()
                };
                self.state.add_fact(format!("{}: {}", label, element.text.trim()));
            }
            Some((id, None)) => {
                let failure = format!("extract failed: {}", missing_element_reason(id, map));
                self.state.record_failure(failure.clone());
                self.state.history.push_note(&failure);
            }
            None => {
                self.state.history.push_note("extract needs an element id");
            }
        }
    }

    fn request_query(&mut self, iteration: u32, step: &SemanticStep, map: &ElementMap) {
        let query = step
            .query
            .clone()
            .or_else(|| step.text.clone())
            .unwrap_or_else(|| step.description.clone());
        if query.trim().is_empty() {
            return;
        }
        let kind = if step.action == ActionKind::AskExpert {
            QueryKind::Expert
        } else {
            QueryKind::Search
        };
        let launched = self.coordinator.request_query(
            iteration,
            QueryRequest {
                kind,
                query: query.clone(),
                context: format!("TASK: {}\nSCREEN: {}", self.state.task, map.summary(QUERY_CONTEXT_ELEMENTS)),
            },
        );
        self.state.history.push_note(&format!(
            "{} '{}' {}; the answer will appear under DISCOVERED FACTS when ready.",
            step.action.as_str(),
            query,
            if launched { "sent" } else { "queued behind the previous query" }
        ));
    }

    async fn handle_complete(&mut self, step: &SemanticStep) -> Flow {
        let message = step
            .text
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| step.description.clone());
        let message = message.trim().to_string();
        if let Some(reason) = parse_failure_claim(&message) {
            self.narrate(EventType::Warning, format!("❌ Agent reports the task cannot be done: {}", reason));
            return Flow::Finish(AgentStatus::Failed, TaskOutcome::Failed, message);
        }
        match self.confirm_completion(&message).await {
            Some(flow) => flow,
            None => Flow::Continue,
        }
    }

    /// Re-captures and asks the verifier. `None` means the claim was
    /// rejected and the loop keeps going.
    async fn confirm_completion(&mut self, claim: &str) -> Option<Flow> {
        // A claim restarts the progress-check cadence.
        self.state.last_progress_check = self.state.iteration;
        self.settle().await;
        let obs = self.observe().await;
        let request = CompletionRequest {
            task: self.state.task.clone(),
            claim: claim.to_string(),
            map_text: obs.map.to_prompt_text().to_string(),
            screenshot: obs.screenshot(),
        };
        let decision = match self
            .unless_stopped(Supervisor::verify_completion(&*self.model, &request))
            .await
        {
            Some(decision) => decision,
            None => return Some(Flow::stopped()),
        };
        match decision {
            CompletionDecision::Confirmed(reason) => {
                self.narrate(EventType::Status, format!("🎉 Completion confirmed: {}", reason));
                Some(Flow::completed(claim))
            }
            CompletionDecision::Unverified(_) => {
                self.narrate(EventType::Status, "Completion could not be verified; accepting the claim");
                Some(Flow::completed(claim))
            }
            CompletionDecision::Rejected(reason) => {
                let failure = format!("Completion claim rejected: {}", reason);
                self.narrate(EventType::Warning, &failure);
                self.state.record_failure(failure.clone());
                self.state
                    .history
                    .push_note(&format!("{}. The task is not done yet; keep working.", failure));
                None
            }
        }
    }
}

fn strategy_request(
    kind: StrategyKind,
    task: &str,
    obs: &Observation,
    failure_history: Option<Vec<String>>,
) -> StrategyRequest {
    StrategyRequest {
        kind,
        task: task.to_string(),
        screenshot: obs.screenshot(),
        map_text: obs.map.to_prompt_text().to_string(),
        failure_history,
    }
}
