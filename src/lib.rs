pub mod action_schema;
pub mod android;
pub mod benchmark;
pub mod config;
pub mod controller;
pub mod element_map;
pub mod error;
pub mod host;
pub mod llm_gateway;
pub mod prompts;
pub mod schema;

#[cfg(test)]
pub mod test_support;

pub use config::{AgentConfig, LlmConfig};
pub use controller::{AgentEvent, AgentLoop, AgentStatus, TaskOutcome};
pub use error::{AgentError, AgentResult};
pub use host::Host;
