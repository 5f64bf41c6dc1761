//! Transcript logging for research sessions.
//!
//! Writes JSON lines: one `progress` entry per snapshot, then a single
//! `outcome` entry carrying the final report or failure and the full message
//! history.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use dr_core::{
    ForceReason, LoopState, Message, ProgressHandler, ProgressSnapshot, ResearchOutcome,
    ValidationOutcome,
};

pub struct TranscriptLog {
    writer: Mutex<BufWriter<File>>,
}

impl TranscriptLog {
    pub fn new(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn log<T: Serialize>(&self, event_type: &str, data: T) {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            event_type: event_type.to_string(),
            data: serde_json::to_value(data).unwrap_or_default(),
        };

        if let Ok(mut writer) = self.writer.lock() {
            if let Ok(json) = serde_json::to_string(&entry) {
                let _ = writeln!(writer, "{}", json);
                let _ = writer.flush();
            }
        }
    }

    pub fn log_question(&self, question: &str) {
        self.log("question", QuestionEvent { question });
    }

    pub fn log_outcome(&self, outcome: &ResearchOutcome) {
        let event = match outcome {
            ResearchOutcome::Done(report) => OutcomeEvent {
                status: "done",
                answer: Some(report.answer.as_str()),
                validation: Some(&report.validation),
                quality_warning: report.quality_warning,
                forced: report.forced,
                error: None,
                state: &report.state,
                transcript: &report.transcript,
            },
            ResearchOutcome::Failed(failure) => OutcomeEvent {
                status: "failed",
                answer: None,
                validation: None,
                quality_warning: false,
                forced: None,
                error: Some(failure.error.to_string()),
                state: &failure.state,
                transcript: &failure.transcript,
            },
        };
        self.log("outcome", event);
    }
}

#[async_trait]
impl ProgressHandler for TranscriptLog {
    async fn on_progress(&self, snapshot: ProgressSnapshot) {
        self.log("progress", snapshot);
    }
}

#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    event_type: String,
    data: serde_json::Value,
}

#[derive(Serialize)]
struct QuestionEvent<'a> {
    question: &'a str,
}

#[derive(Serialize)]
struct OutcomeEvent<'a> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    validation: Option<&'a ValidationOutcome>,
    quality_warning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    forced: Option<ForceReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    state: &'a LoopState,
    transcript: &'a [Message],
}
