use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Tunables for the orchestration loop and its subsystems.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub history_window: usize,
    pub max_elements: usize,
    pub failure_context_cap: usize,
    pub action_ring_cap: usize,

    pub recovery_failure_threshold: u32,
    pub recovery_cooldown: u32,
    pub last_resort_margin: u32,
    pub progress_check_interval: u32,

    pub position_tolerance_px: i32,
    pub long_press_ms: u64,
    pub swipe_ms: u64,
    /// Share of the screen (or target) a swipe travels.
    pub swipe_fraction: f64,
    pub effect_check_delay: Duration,
    pub settle_poll: Duration,
    pub settle_max: Duration,

    pub model_retries: u32,
    pub model_backoff: Duration,
    pub max_model_errors: u32,
    pub transient_backoff: Duration,

    pub structural_window: usize,
    pub structural_eval: usize,
    pub structural_repeat: usize,

    pub result_path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            history_window: 12,
            max_elements: 200,
            failure_context_cap: 5,
            action_ring_cap: 20,
            recovery_failure_threshold: 3,
            recovery_cooldown: 5,
            last_resort_margin: 5,
            progress_check_interval: 3,
            position_tolerance_px: 50,
            long_press_ms: 800,
            swipe_ms: 350,
            swipe_fraction: 0.5,
            effect_check_delay: Duration::from_millis(150),
            settle_poll: Duration::from_millis(150),
            settle_max: Duration::from_millis(2000),
            model_retries: 2,
            model_backoff: Duration::from_millis(1500),
            max_model_errors: 5,
            transient_backoff: Duration::from_millis(500),
            structural_window: 15,
            structural_eval: 10,
            structural_repeat: 3,
            result_path: None,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let d = Self::default();
        Self {
            max_iterations: env_or("AGENT_MAX_ITERATIONS", d.max_iterations).max(1),
            history_window: env_or("AGENT_HISTORY_WINDOW", d.history_window).max(1),
            max_elements: env_or("AGENT_MAX_ELEMENTS", d.max_elements).max(1),
            failure_context_cap: env_or("AGENT_FAILURE_CONTEXT", d.failure_context_cap),
            action_ring_cap: env_or("AGENT_ACTION_RING", d.action_ring_cap).max(6),
            recovery_failure_threshold: env_or(
                "AGENT_RECOVERY_THRESHOLD",
                d.recovery_failure_threshold,
            ),
            recovery_cooldown: env_or("AGENT_RECOVERY_COOLDOWN", d.recovery_cooldown),
            last_resort_margin: env_or("AGENT_LAST_RESORT_MARGIN", d.last_resort_margin),
            progress_check_interval: env_or(
                "AGENT_PROGRESS_INTERVAL",
                d.progress_check_interval,
            ),
            position_tolerance_px: env_or("AGENT_POSITION_TOLERANCE", d.position_tolerance_px),
            long_press_ms: env_or("AGENT_LONG_PRESS_MS", d.long_press_ms),
            swipe_ms: env_or("AGENT_SWIPE_MS", d.swipe_ms),
            swipe_fraction: env_or("AGENT_SWIPE_FRACTION", d.swipe_fraction),
            effect_check_delay: Duration::from_millis(env_or("AGENT_EFFECT_DELAY_MS", 150)),
            settle_poll: Duration::from_millis(env_or("AGENT_SETTLE_POLL_MS", 150)),
            settle_max: Duration::from_millis(env_or("AGENT_SETTLE_MAX_MS", 2000)),
            model_retries: env_or("AGENT_MODEL_RETRIES", d.model_retries),
            model_backoff: Duration::from_millis(env_or("AGENT_MODEL_BACKOFF_MS", 1500)),
            max_model_errors: env_or("AGENT_MAX_MODEL_ERRORS", d.max_model_errors).max(1),
            transient_backoff: Duration::from_millis(env_or("AGENT_TRANSIENT_BACKOFF_MS", 500)),
            structural_window: d.structural_window,
            structural_eval: d.structural_eval,
            structural_repeat: d.structural_repeat,
            result_path: env::var("AGENT_RESULT_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| match v.trim() {
                    "default" => crate::benchmark::default_result_path(),
                    path => PathBuf::from(path),
                }),
        }
    }
}

/// Connection settings for the OpenAI-compatible planning endpoint.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub fast_model: String,
    pub request_timeout: Duration,
}

impl LlmConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set in .env"))?;
        let model = env::var("AGENT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        Ok(Self {
            api_key,
            api_base: env::var("OPENAI_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            fast_model: env::var("AGENT_FAST_MODEL").unwrap_or_else(|_| model.clone()),
            model,
            request_timeout: Duration::from_secs(env_or("AGENT_REQUEST_TIMEOUT_SECS", 120)),
        })
    }
}
