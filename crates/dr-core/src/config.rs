//! Tunable budgets and thresholds for a research session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compaction::CompactionConfig;
use crate::error::Error;
use crate::validator::ValidatorConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Hard timeout for one language-model call, in seconds.
    pub model_timeout_secs: u64,
    /// Hard timeout for one search-provider call, in seconds.
    pub search_timeout_secs: u64,
    /// Default number of results requested per search.
    pub search_max_results: usize,
    /// Per-result content cap, in characters.
    pub search_content_chars: usize,
    /// Step budget the iteration ceiling is derived from (two steps per round).
    pub step_budget: u32,
    /// Explicit iteration ceiling; overrides the derived one when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    /// Searches required before the loop forces a first submission.
    pub min_searches: u32,
    /// Reflections required before the loop forces a first submission.
    pub min_reflections: u32,
    /// Infrastructure failures tolerated before forcing submission.
    pub max_timeouts: u32,
    /// Consecutive empty responses nudged before counting one failure.
    pub max_empty_retries: u32,
    pub validator: ValidatorConfig,
    /// Condensing of older rounds in outgoing requests.
    pub compaction: CompactionConfig,
    /// Replaces the built-in research instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            model_timeout_secs: 300,
            search_timeout_secs: 30,
            search_max_results: 5,
            search_content_chars: 2000,
            step_budget: 100,
            max_iterations: None,
            min_searches: 5,
            min_reflections: 2,
            max_timeouts: 3,
            max_empty_retries: 3,
            validator: ValidatorConfig::default(),
            compaction: CompactionConfig::default(),
            system_prompt: None,
        }
    }
}

impl ResearchConfig {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    /// Maximum number of model-invocation rounds in one session.
    pub fn iteration_ceiling(&self) -> u32 {
        self.max_iterations.unwrap_or(self.step_budget / 2)
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Fail fast on budgets that would make the loop meaningless.
    pub fn validate(&self) -> Result<(), Error> {
        if self.model_timeout_secs == 0 {
            return Err(Error::config("model_timeout_secs must be at least 1"));
        }
        if self.search_timeout_secs == 0 {
            return Err(Error::config("search_timeout_secs must be at least 1"));
        }
        if self.search_max_results == 0 {
            return Err(Error::config("search_max_results must be at least 1"));
        }
        if self.search_content_chars == 0 {
            return Err(Error::config("search_content_chars must be at least 1"));
        }
        if self.iteration_ceiling() == 0 {
            return Err(Error::config(format!(
                "iteration ceiling must be at least 1 (step_budget = {}, max_iterations = {:?})",
                self.step_budget, self.max_iterations
            )));
        }
        if self.max_timeouts == 0 {
            return Err(Error::config("max_timeouts must be at least 1"));
        }
        if self.max_empty_retries == 0 {
            return Err(Error::config("max_empty_retries must be at least 1"));
        }
        self.compaction.validate()
    }
}
