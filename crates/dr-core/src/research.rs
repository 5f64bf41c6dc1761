//! The research agent loop.
//!
//! One [`ResearchAgent::run`] call owns one conversation and one
//! [`LoopState`]. Each round invokes the model once on a deadline-bounded
//! worker, dispatches any tool calls in the order they were issued, and lets
//! the pure rules in [`crate::state`] pick the next transition. Every answer,
//! explicit or implicit, passes the [`AnswerValidator`] before it can end the
//! session; when a hard budget runs out the best available answer is returned
//! with a quality warning instead of an error.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compaction;
use crate::config::ResearchConfig;
use crate::deadline::{run_with_deadline, Deadline};
use crate::error::Error;
use crate::handoff::{HandoffStore, FINAL_REPORT_KEY, QUESTION_KEY};
use crate::message::{check_tool_calls, Conversation, Message, ToolCall, SUBMIT_ANSWER_TOOL};
use crate::progress::{ProgressHandler, ProgressSnapshot};
use crate::prompt;
use crate::provider::{CompletionRequest, Provider};
use crate::state::{classify_response, ForceReason, LoopState, ResponseKind};
use crate::tool::{PropertySchema, ToolDefinition, ToolParameters, ToolRegistry};
use crate::validator::{AnswerValidator, ValidationOutcome};

pub const SEARCH_TOOL: &str = "search";
pub const REFLECT_TOOL: &str = "reflect";

/// Definition of the loop-handled `submit_answer` tool.
pub fn submit_answer_definition() -> ToolDefinition {
    ToolDefinition::new(
        SUBMIT_ANSWER_TOOL,
        "Submit your final research report. It is checked for length and distinct cited URLs; \
         rejected submissions come back with the reason.",
    )
    .with_parameters(ToolParameters::new().add_property(
        "answer",
        PropertySchema::string("The complete report in markdown, with inline source URLs"),
        true,
    ))
}

/// A finished session's answer.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchReport {
    pub answer: String,
    pub validation: ValidationOutcome,
    /// Set when the answer did not pass the quality gate and is best effort.
    pub quality_warning: bool,
    /// Set when the loop, not the model, ended the session.
    pub forced: Option<ForceReason>,
    pub state: LoopState,
    pub transcript: Vec<Message>,
}

/// An unrecoverable session failure, with the transcript kept for diagnosis.
#[derive(Debug)]
pub struct ResearchFailure {
    pub error: Error,
    pub state: LoopState,
    pub transcript: Vec<Message>,
}

#[derive(Debug)]
pub enum ResearchOutcome {
    Done(ResearchReport),
    Failed(ResearchFailure),
}

impl ResearchOutcome {
    pub fn state(&self) -> &LoopState {
        match self {
            ResearchOutcome::Done(report) => &report.state,
            ResearchOutcome::Failed(failure) => &failure.state,
        }
    }

    pub fn transcript(&self) -> &[Message] {
        match self {
            ResearchOutcome::Done(report) => &report.transcript,
            ResearchOutcome::Failed(failure) => &failure.transcript,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ResearchOutcome::Done(_))
    }
}

/// Run one research session with default wiring.
///
/// Configuration errors are returned before any model call; everything that
/// happens during the session is reported through the outcome.
pub async fn run_research(
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    question: &str,
    config: ResearchConfig,
) -> Result<ResearchOutcome, Error> {
    let agent = ResearchAgent::new(provider, tools, config)?;
    Ok(agent.run(question).await)
}

struct Session {
    conversation: Conversation,
    state: LoopState,
}

impl Session {
    fn new(system_prompt: &str, question: &str) -> Self {
        let mut conversation = Conversation::new();
        conversation.push(Message::system(system_prompt));
        conversation.push(Message::user(question));
        Self {
            conversation,
            state: LoopState::new(),
        }
    }
}

enum ModelReply {
    Message(Message),
    /// Counted against the timeout budget; carries the cause for logging.
    TimedOut(Error),
}

enum RoundEnd {
    Continue,
    Finished {
        answer: String,
        validation: ValidationOutcome,
    },
}

pub struct ResearchAgent {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    config: ResearchConfig,
    validator: AnswerValidator,
    model: Option<String>,
    temperature: Option<f32>,
    extra: HashMap<String, serde_json::Value>,
    progress: Option<Arc<dyn ProgressHandler>>,
    handoff: Option<Arc<dyn HandoffStore>>,
    cancel: CancellationToken,
}

impl ResearchAgent {
    /// Validate the configuration and tool set, failing fast on either.
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        config: ResearchConfig,
    ) -> Result<Self, Error> {
        config.validate()?;

        for required in [SEARCH_TOOL, REFLECT_TOOL] {
            if !tools.contains(required) {
                return Err(Error::config(format!(
                    "tool registry is missing the '{}' tool",
                    required
                )));
            }
        }
        if tools.contains(SUBMIT_ANSWER_TOOL) {
            return Err(Error::config(format!(
                "'{}' is handled by the research loop and cannot be registered as a tool",
                SUBMIT_ANSWER_TOOL
            )));
        }

        Ok(Self {
            provider,
            tools,
            validator: AnswerValidator::new(config.validator.clone()),
            config,
            model: None,
            temperature: None,
            extra: HashMap::new(),
            progress: None,
            handoff: None,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_extra(mut self, extra: HashMap<String, serde_json::Value>) -> Self {
        self.extra = extra;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_handoff(mut self, store: Arc<dyn HandoffStore>) -> Self {
        self.handoff = Some(store);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the session at the next round boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    pub async fn run(&self, question: &str) -> ResearchOutcome {
        let mut session = Session::new(&prompt::system_prompt(&self.config), question);

        info!(
            provider = self.provider.name(),
            iteration_ceiling = self.config.iteration_ceiling(),
            min_searches = self.config.min_searches,
            min_reflections = self.config.min_reflections,
            "Research session starting"
        );

        self.persist(QUESTION_KEY, question);
        self.report(&session).await;

        loop {
            // A round already in flight is never interrupted; cancellation
            // only stops the next one from being scheduled.
            if self.cancel.is_cancelled() {
                info!(iteration = session.state.iteration_count, "Research session cancelled");
                return self.fail(session, Error::Cancelled).await;
            }

            let forced = session.state.forced_submission(&self.config);
            match forced {
                Some(reason) if reason.is_hard() => {
                    return self.force_submit(session, reason).await;
                }
                Some(reason) => {
                    warn!(
                        %reason,
                        searches = session.state.search_count,
                        reflections = session.state.reflection_count,
                        "Requiring a submission this round"
                    );
                    session.state.begin_submission();
                    session.conversation.push(Message::user(prompt::SUBMISSION_DIRECTIVE));
                    self.report(&session).await;
                }
                None => {}
            }

            let round = self.round(&mut session, forced.is_some()).await;
            self.report(&session).await;

            match round {
                Ok(RoundEnd::Continue) => {}
                Ok(RoundEnd::Finished { answer, validation }) => {
                    return self.finish(session, answer, validation, None).await;
                }
                Err(e) => return self.fail(session, e).await,
            }
        }
    }

    /// One model invocation plus the dispatch it triggers.
    async fn round(&self, session: &mut Session, submission_round: bool) -> Result<RoundEnd, Error> {
        session.state.begin_round();
        debug!(
            iteration = session.state.iteration_count,
            phase = %session.state.phase,
            message_count = session.conversation.len(),
            "Research round starting"
        );

        let (message, timed_out) = match self.invoke_model(&session.conversation).await? {
            ModelReply::Message(message) => (message, false),
            ModelReply::TimedOut(cause) => {
                session.state.record_timeout();
                warn!(
                    error = %cause,
                    timeout_count = session.state.timeout_count,
                    "Model call counted as a timeout"
                );
                (Message::assistant(""), true)
            }
        };

        match classify_response(&message) {
            ResponseKind::ToolCalls => {
                session.state.record_usable_response();
                self.dispatch_tool_calls(session, message, submission_round).await
            }
            ResponseKind::DirectAnswer => {
                session.state.record_usable_response();
                let answer = message.content.clone();
                session.conversation.push(message);
                Ok(self.gate_implicit(session, &answer))
            }
            ResponseKind::Empty if submission_round => {
                let candidate = session.conversation.best_answer().unwrap_or_default().to_string();
                Ok(self.gate_implicit(session, &candidate))
            }
            ResponseKind::Empty => {
                if !timed_out && session.state.record_empty_response(self.config.max_empty_retries) {
                    warn!(
                        timeout_count = session.state.timeout_count,
                        "Repeated empty responses counted against the timeout budget"
                    );
                }
                session.conversation.push(Message::user(prompt::EMPTY_RESPONSE_NUDGE));
                Ok(RoundEnd::Continue)
            }
        }
    }

    async fn invoke_model(&self, conversation: &Conversation) -> Result<ModelReply, Error> {
        let request = self.build_request(conversation);
        let provider = Arc::clone(&self.provider);
        let timeout = self.config.model_timeout();

        match run_with_deadline(timeout, async move { provider.complete(request).await }).await? {
            Deadline::Completed(Ok(response)) => {
                if let Some(ref thinking) = response.thinking {
                    debug!(thinking_len = thinking.len(), "Extracted thinking content (not stored)");
                }
                debug!(
                    content_len = response.message.content.len(),
                    tool_calls = response.message.tool_calls.len(),
                    usage = response.usage.total_tokens,
                    "Model responded"
                );
                Ok(ModelReply::Message(response.message))
            }
            Deadline::Completed(Err(e)) if e.is_retryable() => Ok(ModelReply::TimedOut(e)),
            Deadline::Completed(Err(e)) => Err(e),
            Deadline::TimedOut(after) => Ok(ModelReply::TimedOut(Error::ModelTimeout(after))),
        }
    }

    fn build_request(&self, conversation: &Conversation) -> CompletionRequest {
        let mut tools = self.tools.definitions();
        tools.push(submit_answer_definition());

        let messages = compaction::request_messages(conversation.messages(), &self.config.compaction);
        if messages.len() < conversation.len() {
            debug!(
                transcript = conversation.len(),
                sent = messages.len(),
                "Compacted older rounds for the request"
            );
        }

        let mut request = CompletionRequest::new(messages).with_tools(tools);
        if let Some(model) = &self.model {
            request = request.with_model(model.as_str());
        }
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if !self.extra.is_empty() {
            request = request.with_extra(self.extra.clone());
        }
        request
    }

    async fn dispatch_tool_calls(
        &self,
        session: &mut Session,
        message: Message,
        submission_round: bool,
    ) -> Result<RoundEnd, Error> {
        let mut known = self.tools.names();
        known.push(SUBMIT_ANSWER_TOOL);
        check_tool_calls(&message.tool_calls, &known)?;

        let calls = message.tool_calls.clone();
        session.conversation.push(message);

        let mut finished: Option<(String, ValidationOutcome)> = None;
        let mut submitted = false;

        for call in &calls {
            let result = if finished.is_some() {
                prompt::SKIPPED_SESSION_COMPLETE.to_string()
            } else if call.name == SUBMIT_ANSWER_TOOL {
                submitted = true;
                let answer = call.str_arg("answer").unwrap_or_default();
                session.state.begin_submission();
                let validation = self.validator.validate(answer);
                session.state.apply_gate(&validation);
                if validation.accepted {
                    info!(
                        words = validation.word_count,
                        citations = validation.citation_count,
                        "Submission accepted"
                    );
                    finished = Some((answer.to_string(), validation));
                    prompt::SUBMISSION_ACCEPTED.to_string()
                } else {
                    warn!(
                        reason = %validation.reason,
                        attempts = session.state.submit_attempt_count,
                        "Submission rejected"
                    );
                    prompt::rejection_message(&validation.reason)
                }
            } else if submission_round {
                debug!(tool = %call.name, "Skipping tool call during required submission");
                prompt::SKIPPED_FOR_SUBMISSION.to_string()
            } else {
                self.dispatch_tool(&mut session.state, call).await
            };

            session.conversation.push(Message::tool_result(&call.id, result));
        }

        session.conversation.verify_tool_results()?;

        if let Some((answer, validation)) = finished {
            return Ok(RoundEnd::Finished { answer, validation });
        }

        if submission_round && !submitted {
            let candidate = session.conversation.best_answer().unwrap_or_default().to_string();
            return Ok(self.gate_implicit(session, &candidate));
        }

        Ok(RoundEnd::Continue)
    }

    /// Execute one registry tool and update counters from its outcome.
    async fn dispatch_tool(&self, state: &mut LoopState, call: &ToolCall) -> String {
        let Some(tool) = self.tools.get(&call.name) else {
            return format!("Error: Unknown tool '{}'", call.name);
        };

        debug!(tool = %call.name, arguments = %call.arguments, "Executing tool");

        match tool.execute(call.arguments.clone()).await {
            Ok(output) if output.is_error => {
                debug!(tool = %call.name, "Tool reported an error");
                format!("Error: {}", output.content)
            }
            Ok(output) => {
                match call.name.as_str() {
                    SEARCH_TOOL => state.record_search(),
                    REFLECT_TOOL => state.record_reflection(),
                    _ => {}
                }
                output.content
            }
            Err(e) if e.is_timeout() => {
                state.record_timeout();
                warn!(tool = %call.name, error = %e, timeout_count = state.timeout_count, "Tool timed out");
                format!("Error: {}. Try a different query or continue with what you have.", e)
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool failed");
                format!("Error executing tool: {}", e)
            }
        }
    }

    /// Gate an answer that did not arrive through a `submit_answer` call.
    fn gate_implicit(&self, session: &mut Session, answer: &str) -> RoundEnd {
        session.state.begin_submission();
        let validation = self.validator.validate(answer);
        session.state.apply_gate(&validation);

        if validation.accepted {
            info!(
                words = validation.word_count,
                citations = validation.citation_count,
                "Direct answer accepted"
            );
            RoundEnd::Finished {
                answer: answer.to_string(),
                validation,
            }
        } else {
            warn!(
                reason = %validation.reason,
                attempts = session.state.submit_attempt_count,
                "Direct answer rejected"
            );
            session
                .conversation
                .push(Message::user(prompt::rejection_message(&validation.reason)));
            RoundEnd::Continue
        }
    }

    async fn force_submit(&self, mut session: Session, reason: ForceReason) -> ResearchOutcome {
        warn!(
            %reason,
            iteration = session.state.iteration_count,
            timeouts = session.state.timeout_count,
            "Forcing submission"
        );
        session.state.begin_submission();
        self.report(&session).await;

        let answer = session.conversation.best_answer().unwrap_or_default().to_string();
        let validation = self.validator.validate(&answer);
        session.state.apply_forced_gate(&validation);

        if !validation.accepted {
            warn!(reason = %validation.reason, "Forced answer is below the quality threshold, returning best effort");
        }

        self.finish(session, answer, validation, Some(reason)).await
    }

    async fn finish(
        &self,
        session: Session,
        answer: String,
        validation: ValidationOutcome,
        forced: Option<ForceReason>,
    ) -> ResearchOutcome {
        self.persist(FINAL_REPORT_KEY, &answer);
        self.report(&session).await;

        let quality_warning = !validation.accepted;
        info!(
            iterations = session.state.iteration_count,
            searches = session.state.search_count,
            reflections = session.state.reflection_count,
            submit_attempts = session.state.submit_attempt_count,
            timeouts = session.state.timeout_count,
            quality_warning,
            "Research session complete"
        );

        ResearchOutcome::Done(ResearchReport {
            answer,
            validation,
            quality_warning,
            forced,
            state: session.state,
            transcript: session.conversation.into_messages(),
        })
    }

    async fn fail(&self, mut session: Session, error: Error) -> ResearchOutcome {
        session.state.fail();
        self.report(&session).await;

        warn!(
            error = %error,
            iterations = session.state.iteration_count,
            "Research session failed"
        );

        ResearchOutcome::Failed(ResearchFailure {
            error,
            state: session.state,
            transcript: session.conversation.into_messages(),
        })
    }

    async fn report(&self, session: &Session) {
        if let Some(ref handler) = self.progress {
            handler
                .on_progress(ProgressSnapshot::capture(
                    &session.state,
                    session.conversation.last(),
                ))
                .await;
        }
    }

    fn persist(&self, key: &str, value: &str) {
        if let Some(ref store) = self.handoff {
            if let Err(e) = store.write(key, value) {
                warn!(key, error = %e, "Failed to write handoff entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::handoff::InMemoryHandoffStore;
    use crate::provider::CompletionResponse;
    use crate::state::Phase;
    use crate::testing::{MockProvider, MockTool};
    use crate::tool::ToolOutput;

    const SEARCH_REPLY: &str =
        "**LangGraph overview**\nURL: https://langchain-ai.github.io/langgraph/\nA library for stateful agents.";

    struct Harness {
        provider: Arc<MockProvider>,
        search: Arc<MockTool>,
        reflect: Arc<MockTool>,
    }

    impl Harness {
        fn new(provider: MockProvider) -> Self {
            Self {
                provider: Arc::new(provider),
                search: Arc::new(MockTool::new(SEARCH_TOOL, SEARCH_REPLY)),
                reflect: Arc::new(MockTool::new(REFLECT_TOOL, "Reflection recorded.")),
            }
        }

        fn registry(&self) -> Arc<ToolRegistry> {
            let mut registry = ToolRegistry::new();
            registry.register(self.search.clone());
            registry.register(self.reflect.clone());
            Arc::new(registry)
        }

        fn agent(&self, config: ResearchConfig) -> ResearchAgent {
            ResearchAgent::new(self.provider.clone(), self.registry(), config).unwrap()
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        snapshots: Mutex<Vec<ProgressSnapshot>>,
    }

    impl RecordingProgress {
        fn phases(&self) -> Vec<Phase> {
            self.snapshots.lock().unwrap().iter().map(|s| s.phase).collect()
        }
    }

    #[async_trait]
    impl ProgressHandler for RecordingProgress {
        async fn on_progress(&self, snapshot: ProgressSnapshot) {
            self.snapshots.lock().unwrap().push(snapshot);
        }
    }

    /// An answer of exactly `total` whitespace tokens, `urls` of them distinct URLs.
    fn answer_text(total: usize, urls: usize) -> String {
        let mut tokens: Vec<String> = (0..urls)
            .map(|i| format!("https://source{}.example.org/article", i))
            .collect();
        tokens.extend(std::iter::repeat("finding".to_string()).take(total - urls));
        tokens.join(" ")
    }

    fn queue_material(provider: &MockProvider) {
        for i in 0..5 {
            provider.queue_tool_call(SEARCH_TOOL, json!({"query": format!("langgraph angle {}", i)}));
        }
        for _ in 0..2 {
            provider.queue_tool_call(REFLECT_TOOL, json!({"reflection": "coverage so far"}));
        }
    }

    fn expect_done(outcome: ResearchOutcome) -> ResearchReport {
        match outcome {
            ResearchOutcome::Done(report) => report,
            ResearchOutcome::Failed(failure) => panic!("expected DONE, got FAILED: {}", failure.error),
        }
    }

    fn expect_failed(outcome: ResearchOutcome) -> ResearchFailure {
        match outcome {
            ResearchOutcome::Failed(failure) => failure,
            ResearchOutcome::Done(report) => panic!("expected FAILED, got DONE: {}", report.answer),
        }
    }

    #[tokio::test]
    async fn test_rejected_answer_then_accepted_resubmission() {
        let harness = Harness::new(MockProvider::new());
        queue_material(&harness.provider);
        harness.provider.queue_response(&answer_text(250, 2));
        let accepted = answer_text(350, 6);
        harness.provider.queue_response(&accepted);

        let progress = Arc::new(RecordingProgress::default());
        let agent = harness
            .agent(ResearchConfig::default())
            .with_progress(progress.clone());
        let report = expect_done(agent.run("What is langraph?").await);

        assert_eq!(report.answer, accepted);
        assert!(!report.quality_warning);
        assert_eq!(report.forced, None);
        assert_eq!(report.state.phase, Phase::Done);
        assert_eq!(report.state.search_count, 5);
        assert_eq!(report.state.reflection_count, 2);
        assert_eq!(report.state.submit_attempt_count, 1);
        assert_eq!(report.state.iteration_count, 9);
        assert_eq!(harness.provider.request_count(), 9);

        assert!(report.transcript.iter().any(|m| m.role == crate::message::Role::User
            && m.content
                == "SUBMISSION_REJECTED: Answer has only 250 words (minimum: 300); \
                    Answer cites only 2 distinct URLs (minimum: 5)"));

        let phases = progress.phases();
        assert!(phases.contains(&Phase::Submitting));
        assert!(phases.contains(&Phase::Researching));
        assert_eq!(phases.last(), Some(&Phase::Done));
    }

    #[tokio::test]
    async fn test_every_request_has_answered_tool_calls() {
        let harness = Harness::new(MockProvider::new());
        harness.provider.queue_tool_calls(
            "two angles at once",
            vec![
                (SEARCH_TOOL, json!({"query": "a"})),
                (REFLECT_TOOL, json!({"reflection": "b"})),
                (SEARCH_TOOL, json!({"query": "c"})),
            ],
        );
        harness.provider.queue_response(&answer_text(400, 5));

        let report = expect_done(harness.agent(ResearchConfig::default()).run("q").await);
        assert_eq!(report.state.search_count, 2);
        assert_eq!(report.state.reflection_count, 1);

        let requests = harness.provider.captured_requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        for request in requests.iter() {
            let mut conv = Conversation::new();
            for m in &request.messages {
                conv.push(m.clone());
            }
            conv.verify_tool_results().unwrap();
        }

        let second = &requests[1].messages;
        let results: Vec<&str> = second
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(results, vec!["call_1", "call_2", "call_3"]);

        let tool_names: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tool_names, vec![REFLECT_TOOL, SEARCH_TOOL, SUBMIT_ANSWER_TOOL]);
    }

    #[tokio::test]
    async fn test_forced_submission_ignores_model_tool_choice() {
        let harness = Harness::new(MockProvider::new());
        queue_material(&harness.provider);
        // The model keeps searching during the required submission round.
        harness
            .provider
            .queue_tool_call(SEARCH_TOOL, json!({"query": "yet another angle"}));
        let accepted = answer_text(320, 5);
        harness
            .provider
            .queue_tool_call(SUBMIT_ANSWER_TOOL, json!({"answer": accepted}));

        let progress = Arc::new(RecordingProgress::default());
        let agent = harness
            .agent(ResearchConfig::default())
            .with_progress(progress.clone());
        let report = expect_done(agent.run("q").await);

        assert_eq!(harness.search.call_count(), 5);
        assert_eq!(report.state.search_count, 5);
        assert_eq!(report.state.submit_attempt_count, 1);
        assert_eq!(report.answer, accepted);
        assert!(report
            .transcript
            .iter()
            .any(|m| m.content == prompt::SKIPPED_FOR_SUBMISSION));
        assert!(report
            .transcript
            .iter()
            .any(|m| m.content == prompt::SUBMISSION_DIRECTIVE));

        let snapshots = progress.snapshots.lock().unwrap();
        let forced = snapshots
            .iter()
            .find(|s| s.phase == Phase::Submitting)
            .expect("a SUBMITTING snapshot");
        assert_eq!(forced.search_count, 5);
        assert_eq!(forced.reflection_count, 2);
        assert_eq!(forced.iteration_count, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_timeouts_end_in_best_effort() {
        let harness = Harness::new(MockProvider::new().hang_when_exhausted());
        let config = ResearchConfig::default();
        let report = expect_done(harness.agent(config.clone()).run("q").await);

        assert!(report.quality_warning);
        assert_eq!(report.forced, Some(ForceReason::TimeoutBudget));
        assert_eq!(report.state.timeout_count, config.max_timeouts);
        assert_eq!(report.state.iteration_count, 3);
        assert!(report.state.submit_attempt_count >= 1);
        assert_eq!(report.answer, "");
        assert!(harness.provider.request_count() as u32 <= config.max_timeouts + config.iteration_ceiling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_reply_carries_its_cause() {
        let harness = Harness::new(MockProvider::new());
        harness.provider.queue_hang();
        harness.provider.queue_error(Error::network("connection reset"));
        let config = ResearchConfig::default();
        let agent = harness.agent(config.clone());
        let conversation = Session::new("system", "q").conversation;

        match agent.invoke_model(&conversation).await {
            Ok(ModelReply::TimedOut(Error::ModelTimeout(after))) => {
                assert_eq!(after, config.model_timeout())
            }
            _ => panic!("expected a model timeout"),
        }
        assert!(matches!(
            agent.invoke_model(&conversation).await,
            Ok(ModelReply::TimedOut(Error::Network(_)))
        ));
    }

    fn queue_long_session(provider: &MockProvider, rounds: usize) -> String {
        for i in 0..rounds {
            provider.queue_tool_call(SEARCH_TOOL, json!({"query": format!("angle {}", i)}));
        }
        let accepted = answer_text(300, 5);
        provider.queue_response(&accepted);
        accepted
    }

    #[tokio::test]
    async fn test_long_session_requests_stay_bounded() {
        let harness = Harness::new(MockProvider::new());
        let accepted = queue_long_session(&harness.provider, 25);
        let config = ResearchConfig {
            min_searches: 100,
            ..ResearchConfig::default()
        };
        let bound = 2 + config
            .compaction
            .trigger_messages
            .max(1 + config.compaction.keep_recent + 1);

        let report = expect_done(harness.agent(config).run("What is langraph?").await);
        assert_eq!(report.answer, accepted);
        assert_eq!(report.state.search_count, 25);
        // The transcript keeps every message even though requests were compacted.
        assert_eq!(report.transcript.len(), 2 + 25 * 2 + 1);

        let requests = harness.provider.captured_requests.lock().unwrap();
        assert_eq!(requests.len(), 26);
        for request in requests.iter() {
            assert!(request.messages.len() <= bound, "{} messages sent", request.messages.len());
            let mut conv = Conversation::new();
            for m in &request.messages {
                conv.push(m.clone());
            }
            conv.verify_tool_results().unwrap();
        }

        let last = requests.last().unwrap();
        assert_eq!(last.messages[1].content, "What is langraph?");
        let digest = &last.messages[2].content;
        assert!(digest.starts_with(compaction::DIGEST_PREFIX));
        assert!(digest.contains("- angle 0"));
        assert!(digest.contains("https://langchain-ai.github.io/langgraph/"));
    }

    #[tokio::test]
    async fn test_compaction_can_be_disabled() {
        let harness = Harness::new(MockProvider::new());
        queue_long_session(&harness.provider, 12);
        let config = ResearchConfig {
            min_searches: 100,
            compaction: compaction::CompactionConfig::disabled(),
            ..ResearchConfig::default()
        };

        let report = expect_done(harness.agent(config).run("q").await);
        let last = harness.provider.last_request().unwrap();
        assert_eq!(last.messages.len(), report.transcript.len() - 1);
    }

    #[tokio::test]
    async fn test_iteration_ceiling_is_never_exceeded() {
        let harness = Harness::new(MockProvider::new());
        for i in 0..10 {
            harness.provider.queue_tool_calls(
                "Still looking into it",
                vec![(SEARCH_TOOL, json!({"query": format!("q{}", i)}))],
            );
        }
        let config = ResearchConfig {
            min_searches: 100,
            ..ResearchConfig::default().with_max_iterations(4)
        };
        let report = expect_done(harness.agent(config).run("q").await);

        assert_eq!(report.forced, Some(ForceReason::IterationCeiling));
        assert_eq!(report.state.iteration_count, 4);
        assert_eq!(harness.provider.request_count(), 4);
        assert!(report.quality_warning);
        assert_eq!(report.answer, "Still looking into it");
        assert_eq!(report.state.submit_attempt_count, 1);
    }

    #[tokio::test]
    async fn test_forced_answer_that_passes_has_no_warning() {
        let harness = Harness::new(MockProvider::new());
        let good = answer_text(300, 5);
        harness.provider.queue_tool_calls(&good, vec![(SEARCH_TOOL, json!({"query": "q"}))]);
        let config = ResearchConfig::default().with_max_iterations(1);
        let report = expect_done(harness.agent(config).run("q").await);

        assert_eq!(report.forced, Some(ForceReason::IterationCeiling));
        assert!(!report.quality_warning);
        assert_eq!(report.answer, good);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fatal() {
        let harness = Harness::new(MockProvider::new());
        harness.provider.queue_tool_call("browse", json!({"url": "https://example.com"}));

        let failure = expect_failed(harness.agent(ResearchConfig::default()).run("q").await);
        assert!(matches!(failure.error, Error::UnmatchedToolCall(_)));
        assert_eq!(failure.state.phase, Phase::Failed);
        assert!(failure.transcript.len() >= 2);
    }

    #[tokio::test]
    async fn test_duplicate_call_ids_are_fatal() {
        let harness = Harness::new(MockProvider::new());
        harness.provider.queue_raw_response(CompletionResponse::from_message(
            Message::assistant_with_tool_calls(
                "",
                vec![
                    ToolCall::new("dup", SEARCH_TOOL, json!({"query": "a"})),
                    ToolCall::new("dup", SEARCH_TOOL, json!({"query": "b"})),
                ],
            ),
        ));

        let failure = expect_failed(harness.agent(ResearchConfig::default()).run("q").await);
        assert!(matches!(failure.error, Error::UnmatchedToolCall(_)));
        assert_eq!(harness.search.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_responses_are_nudged_and_counted() {
        let harness = Harness::new(MockProvider::new());
        for _ in 0..3 {
            harness.provider.queue_response("");
        }
        harness.provider.queue_response(&answer_text(300, 5));

        let report = expect_done(harness.agent(ResearchConfig::default()).run("q").await);
        assert_eq!(report.state.timeout_count, 1);
        assert_eq!(report.state.iteration_count, 4);
        let nudges = report
            .transcript
            .iter()
            .filter(|m| m.content == prompt::EMPTY_RESPONSE_NUDGE)
            .count();
        assert_eq!(nudges, 3);
    }

    #[tokio::test]
    async fn test_search_timeout_counts_as_timeout_not_search() {
        let harness = Harness::new(MockProvider::new());
        harness
            .search
            .queue(Err(Error::search_timeout("slow query", std::time::Duration::from_secs(30))));
        harness.provider.queue_tool_call(SEARCH_TOOL, json!({"query": "slow query"}));
        harness.provider.queue_tool_call(SEARCH_TOOL, json!({"query": "fast query"}));
        harness.provider.queue_response(&answer_text(300, 5));

        let report = expect_done(harness.agent(ResearchConfig::default()).run("q").await);
        assert_eq!(report.state.timeout_count, 1);
        assert_eq!(report.state.search_count, 1);
        assert!(report
            .transcript
            .iter()
            .any(|m| m.role == crate::message::Role::Tool && m.content.contains("timed out")));
    }

    #[tokio::test]
    async fn test_tool_error_output_does_not_count() {
        let harness = Harness::new(MockProvider::new());
        harness.search.queue(Ok(ToolOutput::error("provider returned 502")));
        harness.provider.queue_tool_call(SEARCH_TOOL, json!({"query": "q"}));
        harness.provider.queue_response(&answer_text(300, 5));

        let report = expect_done(harness.agent(ResearchConfig::default()).run("q").await);
        assert_eq!(report.state.search_count, 0);
        assert_eq!(report.state.timeout_count, 0);
        assert!(report
            .transcript
            .iter()
            .any(|m| m.content == "Error: provider returned 502"));
    }

    #[tokio::test]
    async fn test_explicit_submission_and_handoff() {
        let harness = Harness::new(MockProvider::new());
        let accepted = answer_text(310, 5);
        harness.provider.queue_tool_calls(
            "",
            vec![
                (SUBMIT_ANSWER_TOOL, json!({"answer": accepted})),
                (SEARCH_TOOL, json!({"query": "after the fact"})),
            ],
        );

        let store = Arc::new(InMemoryHandoffStore::new());
        let agent = harness
            .agent(ResearchConfig::default())
            .with_handoff(store.clone());
        let report = expect_done(agent.run("What is langraph?").await);

        assert_eq!(report.answer, accepted);
        assert_eq!(report.state.submit_attempt_count, 0);
        assert_eq!(harness.search.call_count(), 0);
        assert!(report
            .transcript
            .iter()
            .any(|m| m.content == prompt::SUBMISSION_ACCEPTED));
        assert!(report
            .transcript
            .iter()
            .any(|m| m.content == prompt::SKIPPED_SESSION_COMPLETE));
        assert_eq!(
            store.read(QUESTION_KEY).unwrap().as_deref(),
            Some("What is langraph?")
        );
        assert_eq!(store.read(FINAL_REPORT_KEY).unwrap(), Some(accepted));
    }

    #[tokio::test]
    async fn test_rejected_explicit_submission_is_a_tool_result() {
        let harness = Harness::new(MockProvider::new());
        harness
            .provider
            .queue_tool_call(SUBMIT_ANSWER_TOOL, json!({"answer": "too short"}));
        harness.provider.queue_response(&answer_text(300, 5));

        let report = expect_done(harness.agent(ResearchConfig::default()).run("q").await);
        assert_eq!(report.state.submit_attempt_count, 1);
        let rejection = report
            .transcript
            .iter()
            .find(|m| m.content.starts_with("SUBMISSION_REJECTED:"))
            .unwrap();
        assert_eq!(rejection.role, crate::message::Role::Tool);
        assert_eq!(rejection.tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_fatal_model_error_fails_session() {
        let harness = Harness::new(MockProvider::new());
        harness.provider.queue_error(Error::auth("invalid api key"));

        let failure = expect_failed(harness.agent(ResearchConfig::default()).run("q").await);
        assert!(matches!(failure.error, Error::Auth(_)));
    }

    #[tokio::test]
    async fn test_transient_model_error_counts_as_timeout() {
        let harness = Harness::new(MockProvider::new());
        harness.provider.queue_error(Error::network("connection reset"));
        harness.provider.queue_response(&answer_text(300, 5));

        let report = expect_done(harness.agent(ResearchConfig::default()).run("q").await);
        assert_eq!(report.state.timeout_count, 1);
        assert_eq!(report.state.iteration_count, 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_round() {
        let harness = Harness::new(MockProvider::new());
        let agent = harness.agent(ResearchConfig::default());
        agent.cancellation_token().cancel();

        let failure = expect_failed(agent.run("q").await);
        assert!(matches!(failure.error, Error::Cancelled));
        assert_eq!(harness.provider.request_count(), 0);
    }

    #[tokio::test]
    async fn test_registry_must_provide_research_tools() {
        let provider: Arc<dyn Provider> = Arc::new(MockProvider::new());
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(MockTool::new(SEARCH_TOOL, "")));

        let result = ResearchAgent::new(provider.clone(), Arc::new(registry), ResearchConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));

        let mut reserved = ToolRegistry::new();
        reserved.register(Arc::new(MockTool::new(SEARCH_TOOL, "")));
        reserved.register(Arc::new(MockTool::new(REFLECT_TOOL, "")));
        reserved.register(Arc::new(MockTool::new(SUBMIT_ANSWER_TOOL, "")));
        let result = ResearchAgent::new(provider, Arc::new(reserved), ResearchConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_run_research_rejects_bad_config() {
        let harness = Harness::new(MockProvider::new());
        let config = ResearchConfig {
            max_empty_retries: 0,
            ..Default::default()
        };
        let result = run_research(harness.provider.clone(), harness.registry(), "q", config).await;
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(harness.provider.request_count(), 0);
    }

    #[tokio::test]
    async fn test_request_carries_model_settings() {
        let harness = Harness::new(MockProvider::new());
        harness.provider.queue_response(&answer_text(300, 5));
        let agent = harness
            .agent(ResearchConfig::default())
            .with_model("qwen3:14b")
            .with_temperature(0.0);
        expect_done(agent.run("q").await);

        let request = harness.provider.last_request().unwrap();
        assert_eq!(request.model.as_deref(), Some("qwen3:14b"));
        assert_eq!(request.temperature, Some(0.0));
        assert_eq!(request.messages[0].role, crate::message::Role::System);
        assert_eq!(request.messages[1].content, "q");
    }
}
