//! Fixed texts the loop injects into the conversation.

use crate::config::ResearchConfig;

/// Sent as a user message when the model returns neither tool calls nor text.
pub const EMPTY_RESPONSE_NUDGE: &str = "Your last response was empty. Use a tool: call `search` to gather \
information, `reflect` to record your reasoning, or `submit_answer` with your complete report.";

/// Sent when the loop forces a first submission.
pub const SUBMISSION_DIRECTIVE: &str = "SUBMISSION_REQUIRED: You have gathered enough material. \
Call `submit_answer` now with your complete, cited report. Other tool calls will be skipped this round.";

pub const SUBMISSION_ACCEPTED: &str = "SUBMISSION_ACCEPTED";

pub const SKIPPED_FOR_SUBMISSION: &str =
    "SKIPPED: a submission is required this round; call `submit_answer` instead.";

pub const SKIPPED_SESSION_COMPLETE: &str = "SKIPPED: the research session is already complete.";

pub const REJECTION_PREFIX: &str = "SUBMISSION_REJECTED:";

pub fn rejection_message(reason: &str) -> String {
    format!("{} {}", REJECTION_PREFIX, reason)
}

/// Research instructions with the configured thresholds and today's date.
pub fn system_prompt(config: &ResearchConfig) -> String {
    if let Some(custom) = &config.system_prompt {
        return custom.clone();
    }

    let today = chrono::Local::now().format("%Y-%m-%d");
    format!(
        r#"You are a deep research assistant. Today's date is {today}.

Research the user's question thoroughly and answer with a comprehensive, well-sourced report.

## Tools
- `search`: search the web. Use focused queries and vary the angle between searches.
- `reflect`: record what you have learned, what gaps remain, and what to do next.
- `submit_answer`: submit your final report.

## Workflow
1. Plan the sub-questions you need to answer.
2. Alternate `search` and `reflect` until the gaps are closed.
3. Call `submit_answer` with the full report.

## Report requirements
- At least {min_words} words.
- At least {min_citations} distinct source URLs, cited inline.
- Executive summary, key findings with citations, detailed analysis, conclusion.

Submissions that miss these requirements are rejected with a reason; gather more material and resubmit."#,
        today = today,
        min_words = config.validator.min_words,
        min_citations = config.validator.min_citations,
    )
}
