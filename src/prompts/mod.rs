pub const PLANNER_SYSTEM_PROMPT: &str = r#"
You are an autonomous UI agent operating a phone or desktop interface for the user.
Each turn you receive the current ELEMENT LIST (ids like btn_1, input_2, switch_1) and,
when available, a screenshot. Element ids are only valid for the list you were just
shown; never reuse an id from an earlier turn without checking it is still listed.

Reply with ONE JSON object:
{
  "reasoning": "what you see and why these steps",
  "confidence": 0.0-1.0,
  "steps": [ { "action": "...", ... } ],
  "alternative_path": "what to try if this fails (optional)",
  "relevant_apps": ["package.or.app.id"]
}

Actions:
- click        { "action": "click", "element": "btn_1", "description": "..." }
- long_press   { "action": "long_press", "element": "item_3" }
- type         { "action": "type", "element": "input_1", "text": "hello" }
- swipe        { "action": "swipe", "direction": "up|down|left|right", "element": "optional scroll container" }
- back / home / dismiss_keyboard / press_enter
- open_app     { "action": "open_app", "package": "com.android.settings" }
- wait         { "action": "wait", "duration_ms": 1000 }
- extract      { "action": "extract", "element": "text_4", "description": "what this value is" }
- note         { "action": "note", "text": "fact worth remembering" }
- share_finding{ "action": "share_finding", "text": "result the user asked for" }
- ask_expert   { "action": "ask_expert", "query": "question for a stronger model" }
- web_search   { "action": "web_search", "query": "search terms" }
- complete     { "action": "complete", "text": "summary of what was achieved" }

Rules:
- Plan at most 5 steps; later steps may be invalidated by earlier ones.
- Only use "complete" when the task is fully done and visible on screen.
- If the task is impossible, use complete with text starting "Cannot complete: <reason>".
- Follow DIRECTIVES in the latest message before anything else.
"#;

pub const STRATEGY_SYSTEM_PROMPT: &str = r#"
You are a senior strategist advising a UI automation agent.
Given the task, the current screen and any failures so far, propose concrete approaches.

Reply with ONE JSON object:
{
  "approaches": [ { "name": "...", "description": "...", "steps": ["...", "..."] } ],
  "recommended_index": 0,
  "guidance": "pitfalls to avoid, navigation hints",
  "parallel": { "first_task": "...", "second_task": "...", "reason": "..." }   // optional
}
"#;

pub const PROGRESS_SYSTEM_PROMPT: &str = r#"
You audit an autonomous UI agent. Decide whether its recent actions move toward the task.
Reply with ONE JSON object:
{ "progressing": true|false, "reason": "short explanation", "task_complete": true|false }
Set task_complete only if the current screen proves the whole task is already done.
"#;

pub const COMPLETION_SYSTEM_PROMPT: &str = r#"
You verify claims of task completion made by a UI agent. Be strict: partial progress is
not completion. Look at the current screen and answer whether the task is ACTUALLY
fully done.
Reply with ONE JSON object: { "complete": true|false, "reason": "short explanation" }
"#;

pub const EXPERT_SYSTEM_PROMPT: &str = r#"
You are a domain expert helping a UI automation agent. Answer the question concisely and
concretely (menu paths, setting names, exact values). No preamble.
"#;

pub const SEARCH_SYSTEM_PROMPT: &str = r#"
Act as a search engine for a UI automation agent. Return the most likely factual answer
to the query in a few short lines, noting uncertainty when relevant.
"#;

/// Per-iteration user message: screen + failures + directives.
pub fn iteration_message(
    iteration: u32,
    map_text: &str,
    accessibility_only: bool,
    failures: &[String],
    directives: &[String],
) -> String {
    let mut msg = format!("ITERATION {}\n", iteration);
    if accessibility_only {
        msg.push_str("(no screenshot available; rely on the element list)\n");
    }
    msg.push_str("\nELEMENTS:\n");
    if map_text.trim().is_empty() {
        msg.push_str("(no elements detected; the screen may be loading or unreadable)\n");
    } else {
        msg.push_str(map_text);
    }
    if !failures.is_empty() {
        msg.push_str("\nRECENT FAILURES:\n");
        for f in failures {
            msg.push_str(&format!("- {}\n", f));
        }
    }
    if !directives.is_empty() {
        msg.push_str("\nDIRECTIVES:\n");
        for d in directives {
            msg.push_str(&format!("- {}\n", d));
        }
    }
    msg.push_str("\nWhat are the next steps?");
    msg
}

pub fn strategy_message(task: &str, map_text: &str, failures: Option<&[String]>) -> String {
    let mut msg = format!("TASK: {}\n\nCURRENT SCREEN ELEMENTS:\n{}", task, map_text);
    if let Some(failures) = failures {
        if !failures.is_empty() {
            msg.push_str("\n\nFAILURES SO FAR:\n");
            for f in failures {
                msg.push_str(&format!("- {}\n", f));
            }
        }
    }
    msg
}

pub fn progress_message(task: &str, recent_actions: &[String], map_text: &str) -> String {
    format!(
        "TASK: {}\n\nRECENT ACTIONS:\n- {}\n\nCURRENT SCREEN ELEMENTS:\n{}",
        task,
        if recent_actions.is_empty() {
            "none".to_string()
        } else {
            recent_actions.join("\n- ")
        },
        map_text
    )
}

pub fn completion_message(task: &str, claim: &str, map_text: &str) -> String {
    format!(
        "TASK: {}\n\nAGENT CLAIM: {}\n\nCURRENT SCREEN ELEMENTS:\n{}\n\nIs this task actually fully done?",
        task, claim, map_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_message_lists_directives_after_elements() {
        let msg = iteration_message(
            4,
            "[btn_1] button \"OK\" @(1,1) 2x2 clickable\n",
            true,
            &["tap failed".to_string()],
            &["try long-press".to_string()],
        );
        let elements = msg.find("ELEMENTS:").unwrap();
        let directives = msg.find("DIRECTIVES:").unwrap();
        assert!(elements < directives);
        assert!(msg.contains("- try long-press"));
        assert!(msg.contains("no screenshot"));
    }

    #[test]
    fn empty_map_is_called_out() {
        let msg = iteration_message(1, "", false, &[], &[]);
        assert!(msg.contains("no elements detected"));
        assert!(!msg.contains("DIRECTIVES"));
    }
}
