//! Test utilities shared across the workspace.
//! Only compiled when running tests or with the `testing` feature.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;
use crate::message::{Message, ToolCall};
use crate::provider::{CompletionRequest, CompletionResponse, Provider};
use crate::tool::{PropertySchema, Tool, ToolDefinition, ToolOutput, ToolParameters};

/// One scripted reaction to a `complete()` call.
pub enum MockReply {
    Respond(CompletionResponse),
    /// Never resolve; only the caller's deadline ends the call.
    Hang,
    Fail(Error),
}

/// A mock provider that plays back scripted replies in FIFO order.
pub struct MockProvider {
    replies: Mutex<VecDeque<MockReply>>,
    hang_when_exhausted: bool,
    next_call_id: AtomicUsize,
    /// Captured requests (for assertion).
    pub captured_requests: Mutex<Vec<CompletionRequest>>,
    pub name: String,
    pub default_model: Option<String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            hang_when_exhausted: false,
            next_call_id: AtomicUsize::new(1),
            captured_requests: Mutex::new(Vec::new()),
            name: "mock".to_string(),
            default_model: None,
        }
    }

    /// Once the script runs out, every call hangs instead of erroring.
    pub fn hang_when_exhausted(mut self) -> Self {
        self.hang_when_exhausted = true;
        self
    }

    pub fn queue(&self, reply: MockReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Queue a plain assistant text response.
    pub fn queue_response(&self, content: &str) {
        self.queue_raw_response(CompletionResponse::from_message(Message::assistant(content)));
    }

    /// Queue a response carrying a single tool call with a fresh call id.
    pub fn queue_tool_call(&self, name: &str, arguments: Value) {
        self.queue_tool_calls("", vec![(name, arguments)]);
    }

    /// Queue a response carrying several tool calls, each with a fresh call id.
    pub fn queue_tool_calls(&self, content: &str, calls: Vec<(&str, Value)>) {
        let calls = calls
            .into_iter()
            .map(|(name, arguments)| {
                let id = self.next_call_id.fetch_add(1, Ordering::SeqCst);
                ToolCall::new(format!("call_{}", id), name, arguments)
            })
            .collect();
        self.queue_raw_response(CompletionResponse::from_message(
            Message::assistant_with_tool_calls(content, calls),
        ));
    }

    pub fn queue_raw_response(&self, response: CompletionResponse) {
        self.queue(MockReply::Respond(response));
    }

    pub fn queue_hang(&self) {
        self.queue(MockReply::Hang);
    }

    pub fn queue_error(&self, error: Error) {
        self.queue(MockReply::Fail(error));
    }

    /// Get the number of captured requests.
    pub fn request_count(&self) -> usize {
        self.captured_requests.lock().unwrap().len()
    }

    /// Get the last captured request.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.captured_requests.lock().unwrap().last().cloned()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        self.captured_requests.lock().unwrap().push(request);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::Fail(error)) => Err(error),
            Some(MockReply::Hang) => std::future::pending().await,
            None if self.hang_when_exhausted => std::future::pending().await,
            None => Err(Error::Unknown("No mock response queued".to_string())),
        }
    }
}

/// A named tool that replays queued results, then a default reply.
pub struct MockTool {
    name: String,
    default_reply: String,
    replies: Mutex<VecDeque<Result<ToolOutput, Error>>>,
    /// Arguments of every call (for assertion).
    pub calls: Mutex<Vec<Value>>,
}

impl MockTool {
    pub fn new(name: impl Into<String>, default_reply: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_reply: default_reply.into(),
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn queue(&self, reply: Result<ToolOutput, Error>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Mock tool"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(&self.name, self.description()).with_parameters(
            ToolParameters::new().add_property("input", PropertySchema::string("Free-form input"), false),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, Error> {
        self.calls.lock().unwrap().push(arguments);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ToolOutput::success(self.default_reply.clone())))
    }
}
