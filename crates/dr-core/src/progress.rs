//! Observation point for UIs: one snapshot after every loop transition.

use async_trait::async_trait;
use serde::Serialize;

use crate::message::Message;
use crate::state::{LoopState, Phase};

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    pub iteration_count: u32,
    pub search_count: u32,
    pub reflection_count: u32,
    pub submit_attempt_count: u32,
    pub timeout_count: u32,
    pub last_message: Option<Message>,
}

impl ProgressSnapshot {
    pub fn capture(state: &LoopState, last_message: Option<&Message>) -> Self {
        Self {
            phase: state.phase,
            iteration_count: state.iteration_count,
            search_count: state.search_count,
            reflection_count: state.reflection_count,
            submit_attempt_count: state.submit_attempt_count,
            timeout_count: state.timeout_count,
            last_message: last_message.cloned(),
        }
    }
}

/// Handler for receiving research progress.
///
/// Called from the loop's own task after each transition; it observes state
/// and never steers the loop. Round-level housekeeping can hang off it too.
#[async_trait]
pub trait ProgressHandler: Send + Sync {
    async fn on_progress(&self, snapshot: ProgressSnapshot);
}
