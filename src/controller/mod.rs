pub mod actions;
pub mod agent_loop;
pub mod conversation;
pub mod coordinator;
pub mod heuristics;
pub mod loop_detector;
pub mod state;
pub mod supervisor;
pub mod verification;

pub use agent_loop::{AgentLoop, CompletionCallback};
pub use state::{AgentEvent, AgentStatus, EventType, TaskOutcome};
