use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use log::{info, warn};
use tokio::task::JoinHandle;

use crate::action_schema::PlanningResult;
use crate::config::AgentConfig;
use crate::error::AgentResult;
use crate::llm_gateway::{PlanningModel, StrategyKind, StrategyRequest};

/// A background unit of work owned by the loop. Dropping it aborts the task.
pub struct PendingTask<T> {
    label: &'static str,
    started_iteration: u32,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> PendingTask<T> {
    pub fn spawn<F>(label: &'static str, iteration: u32, fut: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            label,
            started_iteration: iteration,
            handle: tokio::spawn(fut),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Blocks until the task finishes. `None` if it panicked or was aborted.
    pub async fn join(mut self) -> Option<T> {
        match (&mut self.handle).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Background task '{}' ended abnormally: {}", self.label, e);
                None
            }
        }
    }

    /// Non-blocking: takes the result out of `slot` only if it is ready.
    pub fn try_take(slot: &mut Option<Self>) -> Option<T> {
        if !slot.as_ref().is_some_and(|t| t.is_finished()) {
            return None;
        }
        let mut task = slot.take()?;
        match (&mut task.handle).now_or_never() {
            Some(Ok(value)) => {
                info!("'{}' from iteration {} is ready", task.label, task.started_iteration);
                Some(value)
            }
            Some(Err(e)) => {
                warn!("Background task '{}' ended abnormally: {}", task.label, e);
                None
            }
            None => {
                *slot = Some(task);
                None
            }
        }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl<T> Drop for PendingTask<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// One planning category: its in-flight task plus launch bookkeeping.
struct CategorySlot<T> {
    pending: Option<PendingTask<T>>,
    launches: u32,
}

impl<T: Send + 'static> CategorySlot<T> {
    fn new() -> Self {
        Self {
            pending: None,
            launches: 0,
        }
    }

    fn launch<F>(&mut self, label: &'static str, iteration: u32, fut: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.pending = Some(PendingTask::spawn(label, iteration, fut));
        self.launches += 1;
    }

    fn busy(&self) -> bool {
        self.pending.is_some()
    }

    fn cancel(&mut self) {
        if let Some(task) = self.pending.take() {
            task.cancel();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Expert,
    Search,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub kind: QueryKind,
    pub query: String,
    pub context: String,
}

#[derive(Debug)]
pub enum CoordinatorEvent {
    Strategy {
        kind: StrategyKind,
        result: PlanningResult,
    },
    StrategyUnavailable {
        kind: StrategyKind,
        reason: String,
    },
    Answer {
        request: QueryRequest,
        answer: String,
    },
    AnswerFailed {
        request: QueryRequest,
        reason: String,
    },
}

type StrategyOutcome = AgentResult<Option<PlanningResult>>;
type QueryOutcome = (QueryRequest, AgentResult<String>);

/// Lifecycle of background consultations. Tasks only return results; all
/// shared state stays with the loop.
pub struct PlanningCoordinator {
    model: Arc<dyn PlanningModel>,
    initial: CategorySlot<StrategyOutcome>,
    recovery: CategorySlot<StrategyOutcome>,
    last_resort: CategorySlot<StrategyOutcome>,
    query: CategorySlot<QueryOutcome>,
    queued_query: Option<QueryRequest>,
    last_consultation: Option<u32>,
    failure_threshold: u32,
    cooldown: u32,
    last_resort_margin: u32,
    max_iterations: u32,
}

impl PlanningCoordinator {
    pub fn new(model: Arc<dyn PlanningModel>, config: &AgentConfig) -> Self {
        Self {
            model,
            initial: CategorySlot::new(),
            recovery: CategorySlot::new(),
            last_resort: CategorySlot::new(),
            query: CategorySlot::new(),
            queued_query: None,
            last_consultation: None,
            failure_threshold: config.recovery_failure_threshold.max(1),
            cooldown: config.recovery_cooldown,
            last_resort_margin: config.last_resort_margin,
            max_iterations: config.max_iterations,
        }
    }

    pub fn in_flight(&self) -> usize {
        [
            self.initial.busy(),
            self.recovery.busy(),
            self.last_resort.busy(),
            self.query.busy(),
        ]
        .iter()
        .filter(|b| **b)
        .count()
    }

    pub fn has_queued_query(&self) -> bool {
        self.queued_query.is_some()
    }

    fn spawn_strategy(&mut self, request: StrategyRequest, iteration: u32) {
        let model = self.model.clone();
        let kind = request.kind;
        let fut = async move { model.request_strategy(&request).await };
        let slot = match kind {
            StrategyKind::Initial => &mut self.initial,
            StrategyKind::Recovery => &mut self.recovery,
            StrategyKind::LastResort => &mut self.last_resort,
        };
        slot.launch(kind.label(), iteration, fut);
        self.last_consultation = Some(iteration);
        info!("🧭 {} strategy requested (iteration {})", kind.label(), iteration);
    }

    pub fn initial_fired(&self) -> bool {
        self.initial.launches > 0
    }

    /// Fired once, after the first capture.
    pub fn fire_initial(&mut self, iteration: u32, request: StrategyRequest) -> bool {
        if self.initial.launches > 0 {
            return false;
        }
        self.spawn_strategy(StrategyRequest { kind: StrategyKind::Initial, ..request }, iteration);
        true
    }

    pub fn recovery_due(&self, iteration: u32, failures_since_last_plan: u32) -> bool {
        if failures_since_last_plan < self.failure_threshold || self.recovery.busy() || self.initial.busy() {
            return false;
        }
        match self.last_consultation {
            Some(last) => iteration.saturating_sub(last) >= self.cooldown,
            None => true,
        }
    }

    pub fn fire_recovery(&mut self, iteration: u32, request: StrategyRequest) -> bool {
        if self.recovery.busy() {
            return false;
        }
        self.spawn_strategy(StrategyRequest { kind: StrategyKind::Recovery, ..request }, iteration);
        true
    }

    pub fn last_resort_due(&self, iteration: u32, unresolved_failures: bool) -> bool {
        unresolved_failures
            && self.last_resort.launches == 0
            && iteration + self.last_resort_margin >= self.max_iterations
    }

    pub fn fire_last_resort(&mut self, iteration: u32, request: StrategyRequest) -> bool {
        if self.last_resort.launches > 0 {
            return false;
        }
        self.spawn_strategy(StrategyRequest { kind: StrategyKind::LastResort, ..request }, iteration);
        true
    }

    /// Launches now, or parks the request until the in-flight one is consumed.
    /// A newer parked request replaces an older one.
    pub fn request_query(&mut self, iteration: u32, request: QueryRequest) -> bool {
        if self.query.busy() {
            if let Some(old) = self.queued_query.replace(request) {
                info!("Dropping superseded query '{}'", old.query);
            }
            return false;
        }
        self.launch_query(iteration, request);
        true
    }

    fn launch_query(&mut self, iteration: u32, request: QueryRequest) {
        let model = self.model.clone();
        let label = match request.kind {
            QueryKind::Expert => "expert-query",
            QueryKind::Search => "web-search",
        };
        let fut = async move {
            let answer = match request.kind {
                QueryKind::Expert => model.ask_expert(&request.query, &request.context).await,
                QueryKind::Search => model.web_search(&request.query).await,
            };
            (request, answer)
        };
        self.query.launch(label, iteration, fut);
    }

    /// Non-blocking merge point: at most one result per category.
    pub fn poll(&mut self, iteration: u32) -> Vec<CoordinatorEvent> {
        let mut events = Vec::new();
        for kind in [StrategyKind::Initial, StrategyKind::Recovery, StrategyKind::LastResort] {
            let slot = match kind {
                StrategyKind::Initial => &mut self.initial,
                StrategyKind::Recovery => &mut self.recovery,
                StrategyKind::LastResort => &mut self.last_resort,
            };
            if let Some(outcome) = PendingTask::try_take(&mut slot.pending) {
                events.push(match outcome {
                    Ok(Some(result)) => CoordinatorEvent::Strategy { kind, result },
                    Ok(None) => CoordinatorEvent::StrategyUnavailable {
                        kind,
                        reason: "model returned no strategy".to_string(),
                    },
                    Err(e) => CoordinatorEvent::StrategyUnavailable {
                        kind,
                        reason: e.to_string(),
                    },
                });
            }
        }

        if let Some((request, answer)) = PendingTask::try_take(&mut self.query.pending) {
            events.push(match answer {
                Ok(answer) => CoordinatorEvent::Answer { request, answer },
                Err(e) => CoordinatorEvent::AnswerFailed {
                    request,
                    reason: e.to_string(),
                },
            });
            if let Some(next) = self.queued_query.take() {
                self.launch_query(iteration, next);
            }
        }
        events
    }

    pub fn cancel_all(&mut self) {
        self.initial.cancel();
        self.recovery.cancel();
        self.last_resort.cancel();
        self.query.cancel();
        self.queued_query = None;
    }
}
