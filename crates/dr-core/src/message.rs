use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Name of the answer submission tool, handled by the research loop itself.
pub const SUBMIT_ANSWER_TOOL: &str = "submit_answer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// String argument by name, if present.
    pub fn str_arg(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// True when the message carries non-whitespace text.
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Append-only transcript of one research session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// The most recent substantive answer candidate from the assistant.
    ///
    /// A non-empty `submit_answer` argument wins over the message text it was
    /// issued with, since that is what the model intended as its answer.
    pub fn best_answer(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .find_map(|m| {
                m.tool_calls
                    .iter()
                    .rev()
                    .filter(|tc| tc.name == SUBMIT_ANSWER_TOOL)
                    .find_map(|tc| tc.str_arg("answer").filter(|a| !a.trim().is_empty()))
                    .or_else(|| m.has_content().then_some(m.content.as_str()))
            })
    }

    /// Check that every tool call has exactly one result, in call order,
    /// and that no tool result refers to a call that was never issued.
    pub fn verify_tool_results(&self) -> Result<(), Error> {
        let mut pending: Vec<&str> = Vec::new();

        for message in &self.messages {
            match message.role {
                Role::Tool => {
                    let id = message.tool_call_id.as_deref().unwrap_or_default();
                    match pending.first() {
                        Some(expected) if *expected == id => {
                            pending.remove(0);
                        }
                        Some(expected) => {
                            return Err(Error::unmatched_tool_call(format!(
                                "expected result for '{}', found result for '{}'",
                                expected, id
                            )));
                        }
                        None => {
                            return Err(Error::unmatched_tool_call(format!(
                                "tool result '{}' has no matching call",
                                id
                            )));
                        }
                    }
                }
                _ => {
                    if let Some(missing) = pending.first() {
                        return Err(Error::unmatched_tool_call(format!(
                            "tool call '{}' was never answered",
                            missing
                        )));
                    }
                    pending = message.tool_calls.iter().map(|tc| tc.id.as_str()).collect();
                }
            }
        }

        match pending.first() {
            Some(missing) => Err(Error::unmatched_tool_call(format!(
                "tool call '{}' was never answered",
                missing
            ))),
            None => Ok(()),
        }
    }
}

/// Reject tool call batches the loop cannot answer one-to-one.
pub fn check_tool_calls(calls: &[ToolCall], known: &[&str]) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for call in calls {
        if call.id.trim().is_empty() {
            return Err(Error::unmatched_tool_call(format!(
                "call to '{}' has no call id",
                call.name
            )));
        }
        if !seen.insert(call.id.as_str()) {
            return Err(Error::unmatched_tool_call(format!(
                "call id '{}' issued more than once",
                call.id
            )));
        }
        if !known.contains(&call.name.as_str()) {
            return Err(Error::unmatched_tool_call(format!(
                "call '{}' references unknown tool '{}'",
                call.id, call.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello, world!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, world!");
        assert!(!msg.has_tool_calls());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Tool.to_string(), "tool");
    }

    #[test]
    fn test_best_answer_prefers_latest_submission() {
        let mut conv = Conversation::new();
        conv.push(Message::user("question"));
        conv.push(Message::assistant("an early draft"));
        conv.push(Message::assistant_with_tool_calls(
            "",
            vec![ToolCall::new("c1", SUBMIT_ANSWER_TOOL, json!({"answer": "the submitted report"}))],
        ));
        conv.push(Message::tool_result("c1", "SUBMISSION_REJECTED: too short"));
        conv.push(Message::assistant_with_tool_calls(
            "  ",
            vec![ToolCall::new("c2", "search", json!({"query": "more"}))],
        ));
        assert_eq!(conv.best_answer(), Some("the submitted report"));
    }

    #[test]
    fn test_best_answer_empty_transcript() {
        let mut conv = Conversation::new();
        conv.push(Message::user("question"));
        assert_eq!(conv.best_answer(), None);
    }

    #[test]
    fn test_verify_tool_results_in_order() {
        let mut conv = Conversation::new();
        conv.push(Message::assistant_with_tool_calls(
            "",
            vec![
                ToolCall::new("a", "search", json!({})),
                ToolCall::new("b", "reflect", json!({})),
            ],
        ));
        conv.push(Message::tool_result("a", "one"));
        conv.push(Message::tool_result("b", "two"));
        assert!(conv.verify_tool_results().is_ok());
    }

    #[test]
    fn test_verify_tool_results_detects_violations() {
        let mut out_of_order = Conversation::new();
        out_of_order.push(Message::assistant_with_tool_calls(
            "",
            vec![
                ToolCall::new("a", "search", json!({})),
                ToolCall::new("b", "search", json!({})),
            ],
        ));
        out_of_order.push(Message::tool_result("b", "two"));
        assert!(matches!(
            out_of_order.verify_tool_results(),
            Err(Error::UnmatchedToolCall(_))
        ));

        let mut orphan = Conversation::new();
        orphan.push(Message::user("hi"));
        orphan.push(Message::tool_result("ghost", "?"));
        assert!(matches!(orphan.verify_tool_results(), Err(Error::UnmatchedToolCall(_))));

        let mut unanswered = Conversation::new();
        unanswered.push(Message::assistant_with_tool_calls(
            "",
            vec![ToolCall::new("a", "search", json!({}))],
        ));
        unanswered.push(Message::user("nudge"));
        assert!(matches!(
            unanswered.verify_tool_results(),
            Err(Error::UnmatchedToolCall(_))
        ));
    }

    #[test]
    fn test_check_tool_calls() {
        let known = ["search", "reflect", SUBMIT_ANSWER_TOOL];
        let ok = vec![ToolCall::new("1", "search", json!({}))];
        assert!(check_tool_calls(&ok, &known).is_ok());

        let unknown = vec![ToolCall::new("1", "browse", json!({}))];
        assert!(check_tool_calls(&unknown, &known).is_err());

        let duplicate = vec![
            ToolCall::new("1", "search", json!({})),
            ToolCall::new("1", "reflect", json!({})),
        ];
        assert!(check_tool_calls(&duplicate, &known).is_err());

        let missing_id = vec![ToolCall::new("", "search", json!({}))];
        assert!(check_tool_calls(&missing_id, &known).is_err());
    }
}
