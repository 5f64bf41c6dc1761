//! dr-core: Core types and the research loop for deep-research
//!
//! This crate provides the conversation model, the provider and tool traits,
//! the answer validator and the state machine that drives a research session.

pub mod compaction;
pub mod config;
pub mod deadline;
pub mod error;
pub mod handoff;
pub mod message;
pub mod progress;
pub mod prompt;
pub mod provider;
pub mod research;
pub mod state;
pub mod tool;
pub mod validator;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use compaction::CompactionConfig;
pub use config::ResearchConfig;
pub use deadline::{run_with_deadline, Deadline};
pub use error::Error;
pub use handoff::{HandoffStore, InMemoryHandoffStore, FINAL_REPORT_KEY, QUESTION_KEY};
pub use message::{Conversation, Message, Role, ToolCall, Usage, SUBMIT_ANSWER_TOOL};
pub use progress::{ProgressHandler, ProgressSnapshot};
pub use provider::{CompletionRequest, CompletionResponse, FinishReason, Provider};
pub use research::{
    run_research, ResearchAgent, ResearchFailure, ResearchOutcome, ResearchReport, REFLECT_TOOL,
    SEARCH_TOOL,
};
pub use state::{ForceReason, LoopState, Phase};
pub use tool::{PropertySchema, Tool, ToolDefinition, ToolOutput, ToolParameters, ToolRegistry};
pub use validator::{AnswerValidator, ValidationOutcome, ValidatorConfig};

pub type Result<T> = std::result::Result<T, Error>;
