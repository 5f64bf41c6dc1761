//! Loop state and the pure decision rules of the research state machine.
//!
//! Nothing here performs I/O: the agent loop feeds observations in and reads
//! decisions out, which keeps every transition testable without a model.

use serde::{Deserialize, Serialize};

use crate::config::ResearchConfig;
use crate::message::Message;
use crate::validator::ValidationOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Planning,
    Researching,
    Reflecting,
    Submitting,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Planning => "PLANNING",
            Phase::Researching => "RESEARCHING",
            Phase::Reflecting => "REFLECTING",
            Phase::Submitting => "SUBMITTING",
            Phase::Done => "DONE",
            Phase::Failed => "FAILED",
        };
        f.pad(s)
    }
}

/// Why the loop overrode the model and moved to SUBMITTING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceReason {
    /// Enough searches and reflections, and no submission yet.
    MaterialGathered,
    /// The iteration ceiling was reached.
    IterationCeiling,
    /// Too many model or search timeouts.
    TimeoutBudget,
}

impl ForceReason {
    /// Hard forces end the session without another model call.
    pub fn is_hard(&self) -> bool {
        !matches!(self, ForceReason::MaterialGathered)
    }
}

impl std::fmt::Display for ForceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForceReason::MaterialGathered => write!(f, "enough material gathered"),
            ForceReason::IterationCeiling => write!(f, "iteration ceiling reached"),
            ForceReason::TimeoutBudget => write!(f, "timeout budget exhausted"),
        }
    }
}

/// Shape of one model response, which decides the round's branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    ToolCalls,
    DirectAnswer,
    Empty,
}

pub fn classify_response(message: &Message) -> ResponseKind {
    if message.has_tool_calls() {
        ResponseKind::ToolCalls
    } else if message.has_content() {
        ResponseKind::DirectAnswer
    } else {
        ResponseKind::Empty
    }
}

/// Mutable record owned by exactly one research session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopState {
    pub iteration_count: u32,
    pub search_count: u32,
    pub reflection_count: u32,
    pub submit_attempt_count: u32,
    pub timeout_count: u32,
    /// Consecutive empty responses since the last usable one.
    pub empty_streak: u32,
    pub phase: Phase,
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopState {
    pub fn new() -> Self {
        Self {
            iteration_count: 0,
            search_count: 0,
            reflection_count: 0,
            submit_attempt_count: 0,
            timeout_count: 0,
            empty_streak: 0,
            phase: Phase::Planning,
        }
    }

    /// Check the loop-level overrides, hard budgets first.
    pub fn forced_submission(&self, config: &ResearchConfig) -> Option<ForceReason> {
        if self.iteration_count >= config.iteration_ceiling() {
            Some(ForceReason::IterationCeiling)
        } else if self.timeout_count >= config.max_timeouts {
            Some(ForceReason::TimeoutBudget)
        } else if self.search_count >= config.min_searches
            && self.reflection_count >= config.min_reflections
            && self.submit_attempt_count == 0
        {
            Some(ForceReason::MaterialGathered)
        } else {
            None
        }
    }

    pub fn begin_round(&mut self) {
        self.iteration_count += 1;
    }

    pub fn record_search(&mut self) {
        self.search_count += 1;
        self.phase = Phase::Researching;
    }

    pub fn record_reflection(&mut self) {
        self.reflection_count += 1;
        self.phase = Phase::Reflecting;
    }

    pub fn record_timeout(&mut self) {
        self.timeout_count += 1;
    }

    pub fn record_usable_response(&mut self) {
        self.empty_streak = 0;
    }

    /// Count an empty response; returns true once the streak is long
    /// enough to be charged against the timeout budget.
    pub fn record_empty_response(&mut self, max_empty_retries: u32) -> bool {
        self.empty_streak += 1;
        if self.empty_streak >= max_empty_retries {
            self.empty_streak = 0;
            self.timeout_count += 1;
            true
        } else {
            false
        }
    }

    pub fn begin_submission(&mut self) {
        self.phase = Phase::Submitting;
    }

    /// Apply the validation gate's verdict for a non-forced submission.
    pub fn apply_gate(&mut self, outcome: &ValidationOutcome) {
        if outcome.accepted {
            self.phase = Phase::Done;
        } else {
            self.submit_attempt_count += 1;
            self.phase = Phase::Researching;
        }
    }

    /// Apply the verdict of a hard forced submission, which always ends the session.
    pub fn apply_forced_gate(&mut self, outcome: &ValidationOutcome) {
        if !outcome.accepted {
            self.submit_attempt_count += 1;
        }
        self.phase = Phase::Done;
    }

    pub fn fail(&mut self) {
        self.phase = Phase::Failed;
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}
