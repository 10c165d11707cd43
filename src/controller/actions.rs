use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::action_schema::{ActionKind, Direction, SemanticStep};
use crate::config::AgentConfig;
use crate::element_map::ElementMap;
use crate::host::{Gesture, GestureDispatcher};
use crate::schema::UIElement;

const MAX_WAIT_MS: u64 = 10_000;
const DEFAULT_WAIT_MS: u64 = 1_000;
const ALTERNATIVES_SHOWN: usize = 5;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepOutcome {
    pub success: bool,
    pub click_point: Option<(i32, i32)>,
    pub resolved_element_id: Option<String>,
    pub resolved_text: Option<String>,
    pub failure_reason: Option<String>,
}

impl StepOutcome {
    fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            failure_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    fn at(mut self, element: &UIElement, point: (i32, i32)) -> Self {
        self.click_point = Some(point);
        self.resolved_element_id = Some(element.id.clone());
        self.resolved_text = Some(element.text.clone());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub long_press_ms: u64,
    pub swipe_ms: u64,
    /// Fraction of the screen (or target) a swipe travels.
    pub swipe_fraction: f64,
}

impl From<&AgentConfig> for ExecutorConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            long_press_ms: config.long_press_ms,
            swipe_ms: config.swipe_ms,
            swipe_fraction: config.swipe_fraction.clamp(0.1, 0.9),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

/// Turns one semantic step into one physical interaction.
///
/// `type` against a target that is not focused yet is the single exception:
/// it taps the field, then enters the text, and fails if either half fails.
pub struct StepExecutor {
    dispatcher: Arc<dyn GestureDispatcher>,
    config: ExecutorConfig,
}

impl StepExecutor {
    pub fn new(dispatcher: Arc<dyn GestureDispatcher>) -> Self {
        Self {
            dispatcher,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(dispatcher: Arc<dyn GestureDispatcher>, config: ExecutorConfig) -> Self {
        Self { dispatcher, config }
    }

    /// Ids are resolved against `map` only; callers must pass the freshest map.
    pub async fn execute(&self, step: &SemanticStep, map: &ElementMap) -> StepOutcome {
        let outcome = match step.action {
            ActionKind::Click => self.tap(step, map, false).await,
            ActionKind::LongPress => self.tap(step, map, true).await,
            ActionKind::Type => self.type_text(step, map).await,
            ActionKind::Swipe => self.swipe(step, map).await,
            ActionKind::Back => self.simple(Gesture::Back, "back").await,
            ActionKind::Home => self.simple(Gesture::Home, "home").await,
            ActionKind::DismissKeyboard => {
                self.simple(Gesture::DismissKeyboard, "dismiss keyboard").await
            }
            ActionKind::PressEnter => self.simple(Gesture::Enter, "enter").await,
            ActionKind::OpenApp => match step.package.as_deref().map(str::trim) {
                Some(pkg) if !pkg.is_empty() => {
                    self.simple(
                        Gesture::OpenApp {
                            package: pkg.to_string(),
                        },
                        "open app",
                    )
                    .await
                }
                _ => StepOutcome::fail("open_app requires a package identifier"),
            },
            ActionKind::Wait => {
                let ms = step.duration_ms.unwrap_or(DEFAULT_WAIT_MS).min(MAX_WAIT_MS);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                StepOutcome::ok()
            }
            ActionKind::Extract
            | ActionKind::Note
            | ActionKind::AskExpert
            | ActionKind::WebSearch
            | ActionKind::Complete
            | ActionKind::ShareFinding => StepOutcome::fail(format!(
                "{} is not a UI action and cannot be executed on screen",
                step.action.as_str()
            )),
        };

        if outcome.success {
            info!("   ✅ {}", step.label());
        } else {
            warn!(
                "   ❌ {}: {}",
                step.label(),
                outcome.failure_reason.as_deref().unwrap_or("unknown failure")
            );
        }
        outcome
    }

    fn resolve<'a>(
        &self,
        step: &SemanticStep,
        map: &'a ElementMap,
    ) -> Result<&'a UIElement, StepOutcome> {
        let id = match step.element.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id,
            _ => {
                return Err(StepOutcome::fail(format!(
                    "{} requires a target element id",
                    step.action.as_str()
                )))
            }
        };
        match map.find(id) {
            Some(el) => Ok(el),
            None => Err(StepOutcome::fail(missing_element_reason(id, map))),
        }
    }

    async fn tap(&self, step: &SemanticStep, map: &ElementMap, long: bool) -> StepOutcome {
        let element = match self.resolve(step, map) {
            Ok(el) => el,
            Err(outcome) => return outcome,
        };
        if !element.enabled {
            return StepOutcome::fail(format!("{} ('{}') is disabled", element.id, element.text));
        }
        let (x, y) = element.bounds.center();
        let gesture = if long {
            Gesture::LongPress {
                x,
                y,
                duration_ms: step.duration_ms.unwrap_or(self.config.long_press_ms),
            }
        } else {
            Gesture::Tap { x, y }
        };
        if self.dispatcher.dispatch_gesture(gesture).await {
            StepOutcome::ok().at(element, (x, y))
        } else {
            StepOutcome::fail(format!("gesture dispatch rejected for {}", element.id))
        }
    }

    /// Focus tap (only when the target is unfocused) followed by text entry.
    async fn type_text(&self, step: &SemanticStep, map: &ElementMap) -> StepOutcome {
        let text = match step.text.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => return StepOutcome::fail("type requires non-empty text"),
        };

        let mut outcome = StepOutcome::ok();
        if step.element.is_some() {
            let element = match self.resolve(step, map) {
                Ok(el) => el,
                Err(outcome) => return outcome,
            };
            let point = element.bounds.center();
            if !element.focused {
                let focused = self
                    .dispatcher
                    .dispatch_gesture(Gesture::Tap {
                        x: point.0,
                        y: point.1,
                    })
                    .await;
                if !focused {
                    return StepOutcome::fail(format!("could not focus {}", element.id));
                }
            }
            outcome = outcome.at(element, point);
        } else if map.focused_input().is_none() {
            return StepOutcome::fail("no input field is focused; specify the target element");
        }

        if self.dispatcher.dispatch_text_entry(text).await {
            outcome
        } else {
            StepOutcome::fail(format!("text entry of '{}' was rejected", text))
        }
    }

    async fn swipe(&self, step: &SemanticStep, map: &ElementMap) -> StepOutcome {
        let direction = match step.direction {
            Some(d) => d,
            None => return StepOutcome::fail("swipe requires a direction"),
        };
        let (area, target) = match step.element.as_deref() {
            Some(_) => match self.resolve(step, map) {
                Ok(el) => (el.bounds, Some(el)),
                Err(outcome) => return outcome,
            },
            None => (map.screen_rect(), None),
        };
        if area.is_empty() {
            return StepOutcome::fail("swipe area has no size");
        }
        let (from, to) = swipe_path(area.center(), area.width(), area.height(), direction, self.config.swipe_fraction);
        let gesture = Gesture::Swipe {
            from,
            to,
            duration_ms: step.duration_ms.unwrap_or(self.config.swipe_ms),
        };
        if !self.dispatcher.dispatch_gesture(gesture).await {
            return StepOutcome::fail("swipe dispatch rejected");
        }
        match target {
            Some(el) => StepOutcome::ok().at(el, from),
            None => StepOutcome::ok(),
        }
    }

    async fn simple(&self, gesture: Gesture, name: &str) -> StepOutcome {
        if self.dispatcher.dispatch_gesture(gesture).await {
            StepOutcome::ok()
        } else {
            StepOutcome::fail(format!("{} dispatch rejected", name))
        }
    }
}

/// `direction` names where the content scrolls: `Down` reveals content below,
/// so the finger travels upward.
fn swipe_path(
    center: (i32, i32),
    width: i32,
    height: i32,
    direction: Direction,
    fraction: f64,
) -> ((i32, i32), (i32, i32)) {
    let (cx, cy) = center;
    let dx = (width as f64 * fraction / 2.0) as i32;
    let dy = (height as f64 * fraction / 2.0) as i32;
    match direction {
        Direction::Down => ((cx, cy + dy), (cx, cy - dy)),
        Direction::Up => ((cx, cy - dy), (cx, cy + dy)),
        Direction::Right => ((cx + dx, cy), (cx - dx, cy)),
        Direction::Left => ((cx - dx, cy), (cx + dx, cy)),
    }
}

pub fn missing_element_reason(id: &str, map: &ElementMap) -> String {
    let alternatives = map.alternatives_for(id, ALTERNATIVES_SHOWN);
    if alternatives.is_empty() {
        return format!("Element '{}' not found on the current screen", id);
    }
    let listed: Vec<String> = alternatives
        .iter()
        .map(|e| format!("{} \"{}\"", e.id, e.text))
        .collect();
    format!(
        "Element '{}' not found on the current screen. Closest alternatives: {}",
        id,
        listed.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element_map::ElementMapper;
    use crate::schema::{ElementSource, ElementType, RawElement, Rect};
    use crate::test_support::RecordingDispatcher;

    fn map() -> ElementMap {
        let mut input = RawElement::new(ElementType::Input, "Search", Rect::new(0, 200, 1000, 300), ElementSource::Tree);
        input.editable = true;
        input.clickable = true;
        ElementMapper::default().generate(
            vec![
                RawElement::new(ElementType::Button, "OK", Rect::new(100, 100, 300, 180), ElementSource::Tree).clickable(),
                input,
            ],
            vec![],
            1080,
            2400,
        )
    }

    #[tokio::test]
    async fn missing_id_fails_without_dispatching() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let exec = StepExecutor::new(dispatcher.clone());
        let out = exec
            .execute(&SemanticStep::new(ActionKind::Click).on("btn_9"), &map())
            .await;
        assert!(!out.success);
        let reason = out.failure_reason.unwrap();
        assert!(reason.contains("btn_9"));
        assert!(reason.contains("btn_1 \"OK\""));
        assert!(dispatcher.gestures().is_empty());
        assert!(dispatcher.typed().is_empty());
    }

    #[tokio::test]
    async fn click_taps_element_center() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let exec = StepExecutor::new(dispatcher.clone());
        let out = exec
            .execute(&SemanticStep::new(ActionKind::Click).on("btn_1"), &map())
            .await;
        assert!(out.success);
        assert_eq!(out.click_point, Some((200, 140)));
        assert_eq!(out.resolved_text.as_deref(), Some("OK"));
        assert_eq!(dispatcher.gestures(), vec![Gesture::Tap { x: 200, y: 140 }]);
    }

    #[tokio::test]
    async fn type_without_text_fails_immediately() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let exec = StepExecutor::new(dispatcher.clone());
        let out = exec
            .execute(&SemanticStep::new(ActionKind::Type).on("input_1"), &map())
            .await;
        assert!(!out.success);
        assert!(dispatcher.gestures().is_empty());
    }

    #[tokio::test]
    async fn type_focuses_then_enters_text() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let exec = StepExecutor::new(dispatcher.clone());
        let out = exec
            .execute(
                &SemanticStep::new(ActionKind::Type).on("input_1").with_text("wifi"),
                &map(),
            )
            .await;
        assert!(out.success);
        assert_eq!(dispatcher.gestures().len(), 1);
        assert_eq!(dispatcher.typed(), vec!["wifi".to_string()]);
    }

    #[tokio::test]
    async fn focused_target_gets_text_without_a_tap() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let exec = StepExecutor::new(dispatcher.clone());
        let mut input = RawElement::new(ElementType::Input, "Name", Rect::new(0, 200, 1000, 300), ElementSource::Tree);
        input.editable = true;
        input.focused = true;
        let map = ElementMapper::default().generate(vec![input], vec![], 1080, 2400);
        let out = exec
            .execute(
                &SemanticStep::new(ActionKind::Type).on("input_1").with_text("John "),
                &map,
            )
            .await;
        assert!(out.success);
        assert!(dispatcher.gestures().is_empty());
        assert_eq!(dispatcher.typed(), vec!["John ".to_string()]);
    }

    #[tokio::test]
    async fn long_press_duration_comes_from_agent_config() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let config = AgentConfig {
            long_press_ms: 1200,
            ..AgentConfig::default()
        };
        let exec = StepExecutor::with_config(dispatcher.clone(), ExecutorConfig::from(&config));
        let out = exec
            .execute(&SemanticStep::new(ActionKind::LongPress).on("btn_1"), &map())
            .await;
        assert!(out.success);
        assert_eq!(
            dispatcher.gestures(),
            vec![Gesture::LongPress {
                x: 200,
                y: 140,
                duration_ms: 1200
            }]
        );
    }

    #[tokio::test]
    async fn rejected_text_entry_is_reported() {
        let dispatcher = Arc::new(RecordingDispatcher::rejecting_text());
        let exec = StepExecutor::new(dispatcher.clone());
        let out = exec
            .execute(
                &SemanticStep::new(ActionKind::Type).on("input_1").with_text("wifi"),
                &map(),
            )
            .await;
        assert!(!out.success);
    }

    #[tokio::test]
    async fn swipe_down_moves_finger_up() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let exec = StepExecutor::new(dispatcher.clone());
        let out = exec
            .execute(&SemanticStep::new(ActionKind::Swipe).towards(Direction::Down), &map())
            .await;
        assert!(out.success);
        match &dispatcher.gestures()[0] {
            Gesture::Swipe { from, to, .. } => assert!(from.1 > to.1),
            other => panic!("unexpected gesture {:?}", other),
        }
    }

    #[tokio::test]
    async fn swipe_without_direction_and_loop_actions_are_rejected() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let exec = StepExecutor::new(dispatcher.clone());
        assert!(!exec.execute(&SemanticStep::new(ActionKind::Swipe), &map()).await.success);
        assert!(!exec.execute(&SemanticStep::new(ActionKind::Complete), &map()).await.success);
        assert!(!exec.execute(&SemanticStep::new(ActionKind::OpenApp), &map()).await.success);
        assert!(dispatcher.gestures().is_empty());
    }
}
