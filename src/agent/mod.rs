//! Question answering: tool declarations and the orchestrator loop

pub mod orchestrator;
pub mod schema;
pub mod tools;

pub use orchestrator::{extract_answer, AgentEvent, AgentOutcome, Orchestrator, Termination, FORCE_FINISH_PROMPT};
pub use schema::{ParamSpec, ParamType, ToolSpec};
pub use tools::{ToolInvocation, ToolRegistry, CLIP_SEARCH, FINISH, FRAME_INSPECT, GLOBAL_BROWSE};
