use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use log::warn;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::action_schema::{
    parse_model_json, CompletionVerdict, Plan, PlanningResult, ProgressVerdict,
};
use crate::config::LlmConfig;
use crate::error::{AgentError, AgentResult};
use crate::prompts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Everything the planner sees for one iteration.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub task: String,
    pub iteration: u32,
    pub turns: Vec<Turn>,
    pub screenshot: Option<Arc<Vec<u8>>>,
    pub failures: Vec<String>,
    pub directives: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Initial,
    Recovery,
    LastResort,
}

impl StrategyKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Recovery => "recovery",
            Self::LastResort => "last-resort",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrategyRequest {
    pub kind: StrategyKind,
    pub task: String,
    pub screenshot: Option<Arc<Vec<u8>>>,
    pub map_text: String,
    pub failure_history: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ProgressRequest {
    pub task: String,
    pub recent_actions: Vec<String>,
    pub map_text: String,
    pub screenshot: Option<Arc<Vec<u8>>>,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub task: String,
    pub claim: String,
    pub map_text: String,
    pub screenshot: Option<Arc<Vec<u8>>>,
}

/// Reasoning model seen as a pure request/response function.
#[async_trait]
pub trait PlanningModel: Send + Sync {
    async fn request_plan(&self, ctx: &PromptContext) -> AgentResult<Plan>;

    async fn request_strategy(&self, req: &StrategyRequest) -> AgentResult<Option<PlanningResult>>;

    async fn check_progress(&self, _req: &ProgressRequest) -> AgentResult<ProgressVerdict> {
        Err(AgentError::Unavailable("progress check"))
    }

    async fn verify_completion(&self, _req: &CompletionRequest) -> AgentResult<CompletionVerdict> {
        Err(AgentError::Unavailable("completion verification"))
    }

    async fn ask_expert(&self, _question: &str, _context: &str) -> AgentResult<String> {
        Err(AgentError::Unavailable("expert query"))
    }

    async fn web_search(&self, _query: &str) -> AgentResult<String> {
        Err(AgentError::Unavailable("web search"))
    }
}

/// OpenAI-compatible chat-completions client.
#[derive(Clone)]
pub struct OpenAiPlanningModel {
    client: Client,
    config: LlmConfig,
}

impl OpenAiPlanningModel {
    pub fn new(config: LlmConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, config })
    }

    async fn post_with_retry(&self, body: &Value) -> AgentResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        let max_retries = 3;
        let mut attempt = 0;
        let mut backoff = Duration::from_secs(1);

        loop {
            attempt += 1;
            match self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.config.api_key))
                .json(body)
                .send()
                .await
            {
                Ok(resp) => {
                    let status = resp.status();
                    let retryable = status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
                    if !retryable || attempt > max_retries {
                        return Ok(resp);
                    }
                    warn!("LLM HTTP {} (attempt {}/{}), retrying in {:?}", status, attempt, max_retries, backoff);
                }
                Err(e) => {
                    if attempt > max_retries {
                        return Err(AgentError::Planning(format!("max retries exceeded: {}", e)));
                    }
                    warn!("LLM network error (attempt {}/{}): {}. Retrying in {:?}", attempt, max_retries, e, backoff);
                }
            }
            sleep(backoff).await;
            backoff *= 2;
        }
    }

    async fn chat(&self, model: &str, messages: Vec<Value>, json_mode: bool) -> AgentResult<String> {
        let mut body = json!({
            "model": model,
            "messages": messages,
            "temperature": 0.0
        });
        if json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        let response = self.post_with_retry(&body).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Planning(format!("API error {}: {}", status, text)));
        }
        let body: Value = response.json().await?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AgentError::Parse("response has no message content".to_string()))
    }
}

fn user_content(text: &str, screenshot: Option<&Arc<Vec<u8>>>) -> Value {
    match screenshot {
        Some(png) => json!([
            { "type": "text", "text": text },
            {
                "type": "image_url",
                "image_url": {
                    "url": format!("data:image/png;base64,{}", general_purpose::STANDARD.encode(png.as_slice()))
                }
            }
        ]),
        None => Value::String(text.to_string()),
    }
}

fn system(prompt: &str) -> Value {
    json!({ "role": "system", "content": prompt.trim() })
}

#[async_trait]
impl PlanningModel for OpenAiPlanningModel {
    async fn request_plan(&self, ctx: &PromptContext) -> AgentResult<Plan> {
        let mut messages = vec![system(prompts::PLANNER_SYSTEM_PROMPT)];
        let last_user = ctx.turns.iter().rposition(|t| t.role == Role::User);
        for (i, turn) in ctx.turns.iter().enumerate() {
            let content = if Some(i) == last_user {
                user_content(&turn.content, ctx.screenshot.as_ref())
            } else {
                Value::String(turn.content.clone())
            };
            messages.push(json!({ "role": turn.role, "content": content }));
        }
        let raw = self.chat(&self.config.model, messages, true).await?;
        Plan::parse(&raw)
    }

    async fn request_strategy(&self, req: &StrategyRequest) -> AgentResult<Option<PlanningResult>> {
        let text = prompts::strategy_message(&req.task, &req.map_text, req.failure_history.as_deref());
        let messages = vec![
            system(prompts::STRATEGY_SYSTEM_PROMPT),
            json!({ "role": "user", "content": user_content(&text, req.screenshot.as_ref()) }),
        ];
        let raw = self.chat(&self.config.model, messages, true).await?;
        let result = PlanningResult::parse(&raw)?;
        if result.approaches.is_empty() && result.guidance.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(result))
    }

    async fn check_progress(&self, req: &ProgressRequest) -> AgentResult<ProgressVerdict> {
        let text = prompts::progress_message(&req.task, &req.recent_actions, &req.map_text);
        let messages = vec![
            system(prompts::PROGRESS_SYSTEM_PROMPT),
            json!({ "role": "user", "content": user_content(&text, req.screenshot.as_ref()) }),
        ];
        let raw = self.chat(&self.config.fast_model, messages, true).await?;
        parse_model_json(&raw)
    }

    async fn verify_completion(&self, req: &CompletionRequest) -> AgentResult<CompletionVerdict> {
        let text = prompts::completion_message(&req.task, &req.claim, &req.map_text);
        let messages = vec![
            system(prompts::COMPLETION_SYSTEM_PROMPT),
            json!({ "role": "user", "content": user_content(&text, req.screenshot.as_ref()) }),
        ];
        let raw = self.chat(&self.config.model, messages, true).await?;
        parse_model_json(&raw)
    }

    async fn ask_expert(&self, question: &str, context: &str) -> AgentResult<String> {
        let messages = vec![
            system(prompts::EXPERT_SYSTEM_PROMPT),
            json!({ "role": "user", "content": format!("CONTEXT:\n{}\n\nQUESTION: {}", context, question) }),
        ];
        self.chat(&self.config.model, messages, false).await
    }

    async fn web_search(&self, query: &str) -> AgentResult<String> {
        let messages = vec![
            system(prompts::SEARCH_SYSTEM_PROMPT),
            json!({ "role": "user", "content": query }),
        ];
        self.chat(&self.config.fast_model, messages, false).await
    }
}
