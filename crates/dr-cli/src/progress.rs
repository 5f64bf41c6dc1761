//! Progress rendering on stderr.

use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use dr_core::{Phase, ProgressHandler, ProgressSnapshot, Role};

/// Prints one status line whenever the phase or a counter changes.
pub struct TerminalProgress {
    last: Mutex<Option<(Phase, u32, u32, u32, u32, u32)>>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }
}

pub fn status_line(snapshot: &ProgressSnapshot) -> String {
    let mut line = format!(
        "[round {:>2}] {:<11} searches: {}  reflections: {}",
        snapshot.iteration_count, snapshot.phase, snapshot.search_count, snapshot.reflection_count
    );
    if snapshot.submit_attempt_count > 0 {
        line.push_str(&format!("  rejected: {}", snapshot.submit_attempt_count));
    }
    if snapshot.timeout_count > 0 {
        line.push_str(&format!("  timeouts: {}", snapshot.timeout_count));
    }
    if let Some(message) = &snapshot.last_message {
        if message.role == Role::Assistant {
            for call in &message.tool_calls {
                match call.str_arg("query") {
                    Some(query) => line.push_str(&format!("  -> {}: {}", call.name, query)),
                    None => line.push_str(&format!("  -> {}", call.name)),
                }
            }
        }
    }
    line
}

#[async_trait]
impl ProgressHandler for TerminalProgress {
    async fn on_progress(&self, snapshot: ProgressSnapshot) {
        let key = (
            snapshot.phase,
            snapshot.iteration_count,
            snapshot.search_count,
            snapshot.reflection_count,
            snapshot.submit_attempt_count,
            snapshot.timeout_count,
        );

        if let Ok(mut last) = self.last.lock() {
            if *last == Some(key) {
                return;
            }
            *last = Some(key);
        }

        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", status_line(&snapshot));
    }
}

/// Forwards every snapshot to each handler in order.
pub struct ProgressFanout {
    handlers: Vec<Arc<dyn ProgressHandler>>,
}

impl ProgressFanout {
    pub fn new(handlers: Vec<Arc<dyn ProgressHandler>>) -> Self {
        Self { handlers }
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl ProgressHandler for ProgressFanout {
    async fn on_progress(&self, snapshot: ProgressSnapshot) {
        for handler in &self.handlers {
            handler.on_progress(snapshot.clone()).await;
        }
    }
}
