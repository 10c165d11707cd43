use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, AgentResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    LongPress,
    Type,
    Swipe,
    Back,
    Home,
    OpenApp,
    Wait,
    DismissKeyboard,
    PressEnter,
    Extract,
    Note,
    AskExpert,
    WebSearch,
    Complete,
    ShareFinding,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::LongPress => "long_press",
            Self::Type => "type",
            Self::Swipe => "swipe",
            Self::Back => "back",
            Self::Home => "home",
            Self::OpenApp => "open_app",
            Self::Wait => "wait",
            Self::DismissKeyboard => "dismiss_keyboard",
            Self::PressEnter => "press_enter",
            Self::Extract => "extract",
            Self::Note => "note",
            Self::AskExpert => "ask_expert",
            Self::WebSearch => "web_search",
            Self::Complete => "complete",
            Self::ShareFinding => "share_finding",
        }
    }

    /// Actions that touch the live interface.
    pub fn mutates_ui(&self) -> bool {
        matches!(
            self,
            Self::Click
                | Self::LongPress
                | Self::Type
                | Self::Swipe
                | Self::Back
                | Self::Home
                | Self::OpenApp
                | Self::DismissKeyboard
                | Self::PressEnter
        )
    }

    /// Actions whose target must survive the pre-execution safety check.
    pub fn needs_target_check(&self) -> bool {
        matches!(self, Self::Click | Self::LongPress | Self::Type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// One planned, named UI action. Element ids refer to the map the plan was
/// produced against and must be re-resolved before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticStep {
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub description: String,
}

impl SemanticStep {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            element: None,
            text: None,
            direction: None,
            package: None,
            query: None,
            duration_ms: None,
            description: String::new(),
        }
    }

    pub fn on(mut self, element: &str) -> Self {
        self.element = Some(element.to_string());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn towards(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn label(&self) -> String {
        if !self.description.is_empty() {
            return self.description.clone();
        }
        match (&self.element, &self.text) {
            (Some(el), Some(text)) => format!("{} {} '{}'", self.action.as_str(), el, text),
            (Some(el), None) => format!("{} {}", self.action.as_str(), el),
            (None, Some(text)) => format!("{} '{}'", self.action.as_str(), text),
            (None, None) => self.action.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<SemanticStep>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relevant_apps: Vec<String>,
}

impl Plan {
    /// Parses a model reply, tolerating prose or code fences around the JSON
    /// object and common action-name aliases.
    pub fn parse(raw: &str) -> AgentResult<Plan> {
        let mut value = extract_json_value(raw)?;
        normalize_plan(&mut value)?;
        Ok(serde_json::from_value(value)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approach {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelRecommendation {
    pub first_task: String,
    pub second_task: String,
    #[serde(default)]
    pub reason: String,
}

/// Strategy produced by a background consultation. Replaces, never merges
/// with, the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningResult {
    #[serde(default)]
    pub approaches: Vec<Approach>,
    #[serde(default)]
    pub recommended_index: usize,
    #[serde(default)]
    pub guidance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<ParallelRecommendation>,
}

impl PlanningResult {
    pub fn parse(raw: &str) -> AgentResult<PlanningResult> {
        parse_model_json(raw)
    }

    pub fn recommended(&self) -> Option<&Approach> {
        self.approaches
            .get(self.recommended_index)
            .or_else(|| self.approaches.first())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(approach) = self.recommended() {
            out.push_str(&format!("Recommended approach: {}", approach.name));
            if !approach.description.is_empty() {
                out.push_str(&format!(" - {}", approach.description));
            }
            out.push('\n');
            for (i, step) in approach.steps.iter().enumerate() {
                out.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }
        let others: Vec<&str> = self
            .approaches
            .iter()
            .filter(|a| Some(*a) != self.recommended())
            .map(|a| a.name.as_str())
            .collect();
        if !others.is_empty() {
            out.push_str(&format!("Fallback approaches: {}\n", others.join("; ")));
        }
        if !self.guidance.trim().is_empty() {
            out.push_str(self.guidance.trim());
            out.push('\n');
        }
        if let Some(par) = &self.parallel {
            out.push_str(&format!(
                "Independent sub-tasks: (a) {} (b) {}\n",
                par.first_task, par.second_task
            ));
        }
        out.trim_end().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressVerdict {
    #[serde(default = "default_true")]
    pub progressing: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default, alias = "already_complete")]
    pub task_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionVerdict {
    #[serde(alias = "done", alias = "completed")]
    pub complete: bool,
    #[serde(default)]
    pub reason: String,
}

fn default_true() -> bool {
    true
}

pub fn parse_model_json<T: DeserializeOwned>(raw: &str) -> AgentResult<T> {
    let value = extract_json_value(raw)?;
    Ok(serde_json::from_value(value)?)
}

fn extract_json_value(raw: &str) -> AgentResult<Value> {
    let trimmed = raw.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => serde_json::from_str::<Value>(&trimmed[s..=e])
            .map_err(|e| AgentError::Parse(format!("malformed JSON object: {}", e))),
        _ => Err(AgentError::Parse(format!(
            "no JSON object in response: {}",
            trimmed.chars().take(120).collect::<String>()
        ))),
    }
}

fn get_string_any(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(val) = obj.get(*key).and_then(|v| v.as_str()) {
            let trimmed = val.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn normalize_action_name(raw: &str) -> String {
    let lower = raw.trim().to_lowercase().replace(['-', ' '], "_");
    match lower.as_str() {
        "tap" | "press" | "click_element" => "click".to_string(),
        "long_click" | "longpress" | "hold" => "long_press".to_string(),
        "input" | "type_text" | "enter_text" => "type".to_string(),
        "scroll" | "fling" => "swipe".to_string(),
        "go_back" | "navigate_back" => "back".to_string(),
        "go_home" | "navigate_home" => "home".to_string(),
        "launch" | "launch_app" | "open" => "open_app".to_string(),
        "sleep" | "pause" => "wait".to_string(),
        "hide_keyboard" | "close_keyboard" => "dismiss_keyboard".to_string(),
        "enter" | "submit" | "press_key_enter" => "press_enter".to_string(),
        "read" | "read_text" => "extract".to_string(),
        "remember" | "record_fact" => "note".to_string(),
        "expert" | "consult" => "ask_expert".to_string(),
        "search" | "google" => "web_search".to_string(),
        "done" | "finish" | "finished" | "task_complete" => "complete".to_string(),
        "share" | "report" => "share_finding".to_string(),
        other => other.to_string(),
    }
}

fn normalize_step(step: &mut Value) -> AgentResult<()> {
    let obj = step
        .as_object_mut()
        .ok_or_else(|| AgentError::Parse("step must be a JSON object".to_string()))?;

    let action = get_string_any(obj, &["action", "type", "tool"])
        .ok_or_else(|| AgentError::Parse("step is missing its action".to_string()))?;
    obj.insert("action".to_string(), Value::String(normalize_action_name(&action)));

    adopt_alias(obj, "element", &["element_id", "target", "id"]);
    adopt_alias(obj, "package", &["app", "package_name"]);
    adopt_alias(obj, "text", &["message", "value"]);
    if let Some(dir) = obj.get("direction").and_then(|v| v.as_str()) {
        let dir = dir.trim().to_lowercase();
        obj.insert("direction".to_string(), Value::String(dir));
    }
    if let Some(desc) = obj.get("reason").cloned() {
        obj.entry("description").or_insert(desc);
    }
    Ok(())
}

/// Fills `canonical` from the first non-blank alias. A canonical value that
/// is already present is kept byte for byte.
fn adopt_alias(obj: &mut Map<String, Value>, canonical: &str, aliases: &[&str]) {
    if obj.get(canonical).is_some_and(|v| !v.is_null()) {
        return;
    }
    let found = aliases.iter().find_map(|key| {
        obj.get(*key)
            .and_then(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
            .map(str::to_string)
    });
    if let Some(value) = found {
        obj.insert(canonical.to_string(), Value::String(value));
    }
}

fn normalize_plan(value: &mut Value) -> AgentResult<()> {
    let obj = value
        .as_object_mut()
        .ok_or_else(|| AgentError::Parse("plan must be a JSON object".to_string()))?;

    if !obj.contains_key("steps") {
        if let Some(actions) = obj.remove("actions") {
            obj.insert("steps".to_string(), actions);
        } else if obj.contains_key("action") {
            let single = Value::Object(obj.clone());
            obj.insert("steps".to_string(), Value::Array(vec![single]));
        }
    }

    if let Some(steps) = obj.get_mut("steps").and_then(|s| s.as_array_mut()) {
        for step in steps.iter_mut() {
            normalize_step(step)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_round_trips_through_json() {
        let plan = Plan {
            steps: vec![
                SemanticStep::new(ActionKind::Click).on("btn_2").describe("Open settings"),
                SemanticStep::new(ActionKind::Type).on("input_1").with_text("hello world"),
                SemanticStep::new(ActionKind::Type).on("input_2").with_text("  John "),
                SemanticStep::new(ActionKind::Note).with_text("\tcode 4411\n"),
                SemanticStep::new(ActionKind::Swipe).towards(Direction::Down),
                SemanticStep::new(ActionKind::Complete).with_text("Done"),
            ],
            reasoning: "Settings holds the toggle".to_string(),
            confidence: 0.85,
            alternative_path: Some("Use quick settings".to_string()),
            relevant_apps: vec!["com.android.settings".to_string()],
        };
        let json = serde_json::to_string(&plan).unwrap();
        let parsed = Plan::parse(&json).unwrap();
        assert_eq!(parsed, plan);
        assert_eq!(parsed.steps[2].text.as_deref(), Some("  John "));
    }

    #[test]
    fn aliases_never_override_canonical_fields() {
        let raw = r#"{"steps":[{"action":"type","element":"input_1","id":"btn_9","text":"a ","value":"b"}]}"#;
        let plan = Plan::parse(raw).unwrap();
        assert_eq!(plan.steps[0].element.as_deref(), Some("input_1"));
        assert_eq!(plan.steps[0].text.as_deref(), Some("a "));
    }

    #[test]
    fn parse_tolerates_fences_and_aliases() {
        let raw = "Here is the plan:\n```json\n{\"reasoning\":\"r\",\"confidence\":0.5,\"actions\":[{\"action\":\"tap\",\"element_id\":\"btn_1\"},{\"type\":\"scroll\",\"direction\":\"DOWN\"},{\"action\":\"done\",\"message\":\"ok\"}]}\n```";
        let plan = Plan::parse(raw).unwrap();
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[0].action, ActionKind::Click);
        assert_eq!(plan.steps[0].element.as_deref(), Some("btn_1"));
        assert_eq!(plan.steps[1].action, ActionKind::Swipe);
        assert_eq!(plan.steps[1].direction, Some(Direction::Down));
        assert_eq!(plan.steps[2].action, ActionKind::Complete);
        assert_eq!(plan.steps[2].text.as_deref(), Some("ok"));
    }

    #[test]
    fn single_action_object_becomes_one_step_plan() {
        let plan = Plan::parse(r#"{"action":"back","reasoning":"wrong screen"}"#).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].action, ActionKind::Back);
    }

    #[test]
    fn rejects_unknown_actions_and_garbage() {
        assert!(Plan::parse(r#"{"steps":[{"action":"teleport"}]}"#).is_err());
        assert!(Plan::parse("no json here").is_err());
        assert!(Plan::parse(r#"{"steps":[{"element":"btn_1"}]}"#).is_err());
    }

    #[test]
    fn planning_result_renders_recommended_first() {
        let result = PlanningResult::parse(
            r#"{"approaches":[{"name":"Settings app","steps":["Open Settings","Tap Network"]},{"name":"Quick settings"}],"recommended_index":0,"guidance":"Avoid the search bar."}"#,
        )
        .unwrap();
        let text = result.render();
        assert!(text.starts_with("Recommended approach: Settings app"));
        assert!(text.contains("1. Open Settings"));
        assert!(text.contains("Fallback approaches: Quick settings"));
        assert!(text.contains("Avoid the search bar."));
    }

    #[test]
    fn progress_verdict_accepts_already_complete_alias() {
        let v: ProgressVerdict =
            parse_model_json(r#"{"progressing":false,"reason":"stuck","already_complete":true}"#).unwrap();
        assert!(!v.progressing);
        assert!(v.task_complete);
    }
}
