//! Request-side context compaction.
//!
//! Local models run with small context windows, so once a session grows past
//! the configured thresholds the request sent to the model is rebuilt as:
//! the system prompt and question, one digest message condensing the older
//! rounds, then the most recent messages verbatim. The session's
//! [`Conversation`](crate::message::Conversation) is never touched; only the
//! outgoing view is compacted.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::message::{Message, Role};
use crate::prompt::REJECTION_PREFIX;
use crate::research::{REFLECT_TOOL, SEARCH_TOOL};
use crate::validator::distinct_urls;

pub const DIGEST_PREFIX: &str = "EARLIER_RESEARCH";
const DIGEST_TRUNCATED: &str = "\n... (digest truncated)";
const NOTE_CHARS: usize = 300;

/// Thresholds are counted over the messages after the question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    pub enabled: bool,
    /// Compact once more than this many messages follow the question.
    pub trigger_messages: usize,
    /// Or once those messages carry more than this many characters.
    pub trigger_chars: usize,
    /// Recent messages always sent verbatim.
    pub keep_recent: usize,
    /// Character cap on the digest message.
    pub digest_chars: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        // Roughly 3000 and 1500 tokens at four characters per token.
        Self {
            enabled: true,
            trigger_messages: 8,
            trigger_chars: 12_000,
            keep_recent: 4,
            digest_chars: 6_000,
        }
    }
}

impl CompactionConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.enabled {
            return Ok(());
        }
        if self.keep_recent == 0 {
            return Err(Error::config("compaction.keep_recent must be at least 1"));
        }
        if self.digest_chars == 0 {
            return Err(Error::config("compaction.digest_chars must be at least 1"));
        }
        Ok(())
    }
}

/// The messages to send for the next model call.
///
/// Returns the input unchanged when compaction is disabled or the session is
/// still under both thresholds. A tool-result batch is never split from the
/// assistant message that issued it.
pub fn request_messages(messages: &[Message], config: &CompactionConfig) -> Vec<Message> {
    let head_len = messages
        .iter()
        .position(|m| m.role == Role::User)
        .map_or(messages.len(), |i| i + 1);
    let (head, body) = messages.split_at(head_len);

    if !config.enabled || !over_threshold(body, config) {
        return messages.to_vec();
    }

    let mut split = body.len().saturating_sub(config.keep_recent);
    while split > 0 && body[split].role == Role::Tool {
        split -= 1;
    }
    if split == 0 {
        return messages.to_vec();
    }

    let (older, recent) = body.split_at(split);
    let mut out = Vec::with_capacity(head.len() + 1 + recent.len());
    out.extend_from_slice(head);
    out.push(Message::user(digest(older, config.digest_chars)));
    out.extend_from_slice(recent);
    out
}

fn over_threshold(body: &[Message], config: &CompactionConfig) -> bool {
    body.len() > config.trigger_messages || message_chars(body) > config.trigger_chars
}

pub fn message_chars(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| {
            m.content.chars().count()
                + m.tool_calls
                    .iter()
                    .map(|tc| tc.arguments.to_string().chars().count())
                    .sum::<usize>()
        })
        .sum()
}

/// Condense older messages into the queries run, sources seen, reflection
/// notes and gate feedback. Sources come before notes so they survive the cap.
fn digest(older: &[Message], max_chars: usize) -> String {
    let mut queries = Vec::new();
    let mut notes = Vec::new();
    let mut feedback = Vec::new();
    let mut sources = BTreeSet::new();

    for message in older {
        for call in &message.tool_calls {
            match call.name.as_str() {
                SEARCH_TOOL => {
                    if let Some(query) = call.str_arg("query") {
                        queries.push(query.to_string());
                    }
                }
                REFLECT_TOOL => {
                    if let Some(note) = call.str_arg("reflection") {
                        notes.push(truncate_chars(note.trim(), NOTE_CHARS));
                    }
                }
                _ => {}
            }
        }
        if message.role == Role::Tool {
            sources.extend(distinct_urls(&message.content));
        }
        if message.content.starts_with(REJECTION_PREFIX) {
            feedback.push(message.content.clone());
        }
    }

    let mut out = format!(
        "{}: {} earlier messages were condensed. Cite sources from this list or from the messages below.",
        DIGEST_PREFIX,
        older.len()
    );
    section(&mut out, "Searches run", &queries);
    section(&mut out, "Sources seen", &sources.into_iter().collect::<Vec<_>>());
    section(&mut out, "Earlier feedback", &feedback);
    section(&mut out, "Reflection notes", &notes);

    if out.chars().count() > max_chars {
        let keep = max_chars.saturating_sub(DIGEST_TRUNCATED.chars().count());
        out = format!("{}{}", truncate_chars(&out, keep), DIGEST_TRUNCATED);
    }
    out
}

fn section(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("\n\n{}:", title));
    for item in items {
        out.push_str(&format!("\n- {}", item));
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
