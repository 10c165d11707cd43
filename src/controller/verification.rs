use std::sync::Arc;
use std::time::Duration;

use crate::action_schema::{ActionKind, SemanticStep};
use crate::controller::actions::StepOutcome;
use crate::controller::coordinator::PendingTask;
use crate::element_map::{ElementMap, ElementMapper};
use crate::host::Host;
use crate::schema::{ElementType, UIElement};

/// Share of the screen a new element must cover to count as an overlay.
const OVERLAY_COVERAGE: f64 = 0.8;
/// Below this text overlap the fresh map is considered a different screen.
const WRONG_SCREEN_OVERLAP: f64 = 0.3;

#[derive(Debug, Clone, PartialEq)]
pub enum UnsafeCause {
    Disappeared { id: String, text: String },
    Shifted { id: String, distance: i32 },
    Overlay { description: String },
    WrongScreen { now_showing: String },
}

impl UnsafeCause {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Disappeared { .. } => "disappeared",
            Self::Shifted { .. } => "shifted",
            Self::Overlay { .. } => "overlay",
            Self::WrongScreen { .. } => "wrong_screen",
        }
    }

    /// Corrective instruction injected into the conversation.
    pub fn directive(&self) -> String {
        match self {
            Self::Disappeared { id, text } => format!(
                "[target disappeared] {} (\"{}\") is no longer on screen. Pick a target from the current element list; do not retry {}.",
                id, text, id
            ),
            Self::Shifted { id, distance } => format!(
                "[target shifted] {} moved {}px since the plan was made; the layout is still changing. Wait for it to settle and plan again with current ids.",
                id, distance
            ),
            Self::Overlay { description } => format!(
                "[overlay] A full-screen overlay appeared ({}). Dismiss it with its close button or back before continuing.",
                description
            ),
            Self::WrongScreen { now_showing } => format!(
                "[wrong screen] The screen changed completely since planning; it now shows: {}. Re-orient before resuming the plan.",
                now_showing
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SafetyVerdict {
    Safe { element: UIElement },
    /// Same element found under a new id.
    Reindexed { from: String, element: UIElement },
    Unsafe(UnsafeCause),
}

impl SafetyVerdict {
    pub fn is_safe(&self) -> bool {
        !matches!(self, Self::Unsafe(_))
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Safe { .. } => None,
            Self::Reindexed { from, element } => Some(format!(
                "re-indexed: {} is now {} (\"{}\")",
                from, element.id, element.text
            )),
            Self::Unsafe(cause) => Some(cause.tag().to_string()),
        }
    }
}

/// Confirms a planned target still exists near where the planner saw it.
pub fn check_target(
    planned: &ElementMap,
    current: &ElementMap,
    target_id: &str,
    tolerance_px: i32,
) -> SafetyVerdict {
    if let Some(overlay) = new_overlay(planned, current) {
        return SafetyVerdict::Unsafe(UnsafeCause::Overlay {
            description: describe(overlay),
        });
    }

    let original = match planned.find(target_id) {
        Some(el) => el,
        None => {
            // Planner referenced something it never saw; judge by the fresh map alone.
            return match current.find(target_id) {
                Some(el) => SafetyVerdict::Safe { element: el.clone() },
                None => SafetyVerdict::Unsafe(UnsafeCause::Disappeared {
                    id: target_id.to_string(),
                    text: String::new(),
                }),
            };
        }
    };

    if let Some(el) = current.find(target_id) {
        if el.same_identity(original) {
            let distance = original.bounds.center_distance(&el.bounds).round() as i32;
            return if distance <= tolerance_px {
                SafetyVerdict::Safe { element: el.clone() }
            } else {
                SafetyVerdict::Unsafe(UnsafeCause::Shifted {
                    id: target_id.to_string(),
                    distance,
                })
            };
        }
    }

    if let Some(candidate) = best_identity_match(original, current) {
        let distance = original.bounds.center_distance(&candidate.bounds).round() as i32;
        return if distance <= tolerance_px {
            SafetyVerdict::Reindexed {
                from: target_id.to_string(),
                element: candidate.clone(),
            }
        } else {
            SafetyVerdict::Unsafe(UnsafeCause::Shifted {
                id: target_id.to_string(),
                distance,
            })
        };
    }

    if planned.text_overlap(current) < WRONG_SCREEN_OVERLAP {
        return SafetyVerdict::Unsafe(UnsafeCause::WrongScreen {
            now_showing: current.summary(6),
        });
    }

    SafetyVerdict::Unsafe(UnsafeCause::Disappeared {
        id: target_id.to_string(),
        text: original.text.clone(),
    })
}

fn best_identity_match<'a>(original: &UIElement, current: &'a ElementMap) -> Option<&'a UIElement> {
    if original.text.trim().is_empty() {
        return None;
    }
    current
        .elements()
        .iter()
        .filter(|e| e.same_identity(original))
        .min_by(|a, b| {
            let da = original.bounds.center_distance(&a.bounds);
            let db = original.bounds.center_distance(&b.bounds);
            da.total_cmp(&db)
        })
}

fn new_overlay<'a>(planned: &ElementMap, current: &'a ElementMap) -> Option<&'a UIElement> {
    let screen = current.screen_rect();
    current.elements().iter().find(|e| {
        let covering = screen.area() > 0 && screen.covered_by(&e.bounds) >= OVERLAY_COVERAGE;
        let blocking = e.clickable || !e.text.trim().is_empty();
        covering
            && blocking
            && !planned
                .elements()
                .iter()
                .any(|p| p.bounds == e.bounds && p.same_identity(e))
    })
}

fn describe(el: &UIElement) -> String {
    if el.text.trim().is_empty() {
        format!("{} covering the screen", el.element_type.as_str())
    } else {
        format!("\"{}\"", el.text.trim())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectVerdict {
    pub passed: bool,
    pub step: String,
    pub reason: String,
}

/// Compares the pre-step snapshot with a fresh extraction.
pub fn evaluate_effect(
    step: &SemanticStep,
    outcome: &StepOutcome,
    before: &ElementMap,
    after: &ElementMap,
) -> EffectVerdict {
    let label = step.label();
    let verdict = |passed: bool, reason: String| EffectVerdict {
        passed,
        step: label.clone(),
        reason,
    };

    match step.action {
        ActionKind::Type => {
            let typed = step.text.as_deref().unwrap_or("").trim();
            if typed.is_empty() {
                return verdict(true, "nothing to confirm".to_string());
            }
            let needle = typed.to_lowercase();
            if let Some(field) = after.focused_input() {
                if field.text.to_lowercase().contains(&needle) {
                    return verdict(true, format!("{} contains the typed text", field.id));
                }
            }
            if after.contains_text(typed) {
                return verdict(true, "typed text is visible on screen".to_string());
            }
            verdict(
                false,
                format!("typed text '{}' did not appear in any field", typed),
            )
        }
        ActionKind::Click | ActionKind::LongPress => {
            if before.tree_only().to_prompt_text() != after.tree_only().to_prompt_text() {
                return verdict(true, "UI changed".to_string());
            }
            let target_kind = outcome
                .resolved_element_id
                .as_deref()
                .and_then(|id| before.find(id))
                .map(|e| e.element_type);
            if matches!(target_kind, Some(ElementType::Input) | Some(ElementType::Text)) {
                return verdict(true, "focus-only change on a text element".to_string());
            }
            verdict(
                false,
                format!(
                    "{} on {} produced no visible change",
                    step.action.as_str(),
                    outcome.resolved_element_id.as_deref().unwrap_or("target")
                ),
            )
        }
        _ => verdict(true, "not verified".to_string()),
    }
}

/// Launches the post-execution check on a background task. The loop
/// consumes it at the start of the next step.
pub fn spawn_effect_check(
    host: Host,
    mapper: ElementMapper,
    step: SemanticStep,
    outcome: StepOutcome,
    before: Arc<ElementMap>,
    delay: Duration,
    iteration: u32,
) -> PendingTask<EffectVerdict> {
    PendingTask::spawn("effect-check", iteration, async move {
        tokio::time::sleep(delay).await;
        let after = host
            .refresh_map(&mapper, before.screen_width(), before.screen_height())
            .await;
        evaluate_effect(&step, &outcome, &before, &after)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ElementSource, RawElement, Rect};

    fn build(elements: Vec<RawElement>) -> ElementMap {
        ElementMapper::default().generate(elements, vec![], 1080, 2400)
    }

    fn switch(text: &str, bounds: Rect) -> RawElement {
        RawElement::new(ElementType::Switch, text, bounds, ElementSource::Tree).clickable()
    }

    fn label(text: &str, bounds: Rect) -> RawElement {
        RawElement::new(ElementType::Text, text, bounds, ElementSource::Tree)
    }

    #[test]
    fn stable_target_is_safe() {
        let planned = build(vec![switch("Wi-Fi", Rect::new(900, 300, 1000, 360))]);
        let current = build(vec![switch("Wi-Fi", Rect::new(900, 310, 1000, 370))]);
        let verdict = check_target(&planned, &current, "switch_1", 50);
        assert!(matches!(verdict, SafetyVerdict::Safe { .. }));
        assert_eq!(verdict.reason(), None);
    }

    #[test]
    fn reindexed_switch_is_safe_with_reason() {
        let planned = build(vec![
            label("Network", Rect::new(0, 100, 500, 160)),
            switch("Wi-Fi", Rect::new(900, 300, 1000, 360)),
            switch("Bluetooth", Rect::new(900, 400, 1000, 460)),
        ]);
        // A new switch above shifts numbering: Wi-Fi is switch_2 now.
        let current = build(vec![
            label("Network", Rect::new(0, 100, 500, 160)),
            switch("Airplane mode", Rect::new(900, 200, 1000, 260)),
            switch("Wi-Fi", Rect::new(900, 300, 1000, 360)),
            switch("Bluetooth", Rect::new(900, 400, 1000, 460)),
        ]);
        let verdict = check_target(&planned, &current, "switch_1", 50);
        assert!(verdict.is_safe());
        match &verdict {
            SafetyVerdict::Reindexed { from, element } => {
                assert_eq!(from, "switch_1");
                assert_eq!(element.id, "switch_2");
            }
            other => panic!("expected re-index, got {:?}", other),
        }
        assert!(verdict.reason().unwrap().starts_with("re-indexed"));
    }

    #[test]
    fn moved_target_is_unsafe_shifted() {
        let planned = build(vec![switch("Wi-Fi", Rect::new(900, 300, 1000, 360))]);
        let current = build(vec![switch("Wi-Fi", Rect::new(900, 700, 1000, 760))]);
        let verdict = check_target(&planned, &current, "switch_1", 50);
        match verdict {
            SafetyVerdict::Unsafe(cause) => {
                assert_eq!(cause.tag(), "shifted");
                assert!(cause.directive().contains("400px"));
            }
            other => panic!("expected shift, got {:?}", other),
        }
    }

    #[test]
    fn vanished_target_on_same_screen_is_disappeared() {
        let planned = build(vec![
            label("Settings", Rect::new(0, 0, 500, 80)),
            label("Network", Rect::new(0, 100, 500, 160)),
            RawElement::new(ElementType::Button, "Save", Rect::new(0, 200, 300, 260), ElementSource::Tree).clickable(),
        ]);
        let current = build(vec![
            label("Settings", Rect::new(0, 0, 500, 80)),
            label("Network", Rect::new(0, 100, 500, 160)),
        ]);
        match check_target(&planned, &current, "btn_1", 50) {
            SafetyVerdict::Unsafe(UnsafeCause::Disappeared { id, text }) => {
                assert_eq!(id, "btn_1");
                assert_eq!(text, "Save");
            }
            other => panic!("expected disappeared, got {:?}", other),
        }
    }

    #[test]
    fn unrelated_screen_is_wrong_screen() {
        let planned = build(vec![
            label("Settings", Rect::new(0, 0, 500, 80)),
            RawElement::new(ElementType::Button, "Save", Rect::new(0, 200, 300, 260), ElementSource::Tree).clickable(),
        ]);
        let current = build(vec![label("Inbox", Rect::new(0, 0, 500, 80)), label("Compose", Rect::new(0, 100, 500, 160))]);
        let verdict = check_target(&planned, &current, "btn_1", 50);
        assert!(matches!(verdict, SafetyVerdict::Unsafe(UnsafeCause::WrongScreen { .. })));
    }

    #[test]
    fn new_full_screen_dialog_is_overlay() {
        let planned = build(vec![switch("Wi-Fi", Rect::new(900, 300, 1000, 360))]);
        let mut dialog = RawElement::new(ElementType::Unknown, "Allow location access?", Rect::new(0, 0, 1080, 2300), ElementSource::Tree);
        dialog.clickable = true;
        let current = build(vec![switch("Wi-Fi", Rect::new(900, 300, 1000, 360)), dialog]);
        let verdict = check_target(&planned, &current, "switch_1", 50);
        match verdict {
            SafetyVerdict::Unsafe(cause) => {
                assert_eq!(cause.tag(), "overlay");
                assert!(cause.directive().contains("Allow location access?"));
            }
            other => panic!("expected overlay, got {:?}", other),
        }
    }

    #[test]
    fn typed_text_found_in_focused_field() {
        let before = build(vec![]);
        let mut field = RawElement::new(ElementType::Input, "hello", Rect::new(0, 0, 500, 80), ElementSource::Tree);
        field.focused = true;
        field.editable = true;
        let after = build(vec![field]);
        let step = SemanticStep::new(ActionKind::Type).with_text("hello");
        assert!(evaluate_effect(&step, &StepOutcome::default(), &before, &after).passed);

        let empty = build(vec![]);
        assert!(!evaluate_effect(&step, &StepOutcome::default(), &before, &empty).passed);
    }

    #[test]
    fn click_without_change_fails_unless_target_is_textual() {
        let screen = build(vec![
            RawElement::new(ElementType::Button, "Next", Rect::new(0, 0, 300, 80), ElementSource::Tree).clickable(),
            RawElement::new(ElementType::Input, "Name", Rect::new(0, 100, 500, 180), ElementSource::Tree).clickable(),
        ]);
        let click = SemanticStep::new(ActionKind::Click).on("btn_1");
        let on_button = StepOutcome {
            success: true,
            resolved_element_id: Some("btn_1".to_string()),
            ..Default::default()
        };
        assert!(!evaluate_effect(&click, &on_button, &screen, &screen).passed);

        let on_input = StepOutcome {
            success: true,
            resolved_element_id: Some("input_1".to_string()),
            ..Default::default()
        };
        assert!(evaluate_effect(&click, &on_input, &screen, &screen).passed);
    }
}
