//! Named-text store shared between a research session and anything it hands
//! work to. Keys are path-like strings such as `question.txt`.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::Error;

pub const QUESTION_KEY: &str = "question.txt";
pub const FINAL_REPORT_KEY: &str = "final_report.md";

pub trait HandoffStore: Send + Sync {
    fn write(&self, key: &str, value: &str) -> Result<(), Error>;

    fn read(&self, key: &str) -> Result<Option<String>, Error>;

    fn keys(&self) -> Result<Vec<String>, Error>;
}

#[derive(Debug, Default)]
pub struct InMemoryHandoffStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl InMemoryHandoffStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, Error> {
        self.entries
            .lock()
            .map_err(|_| Error::tool("handoff", "store lock poisoned"))
    }
}

impl HandoffStore for InMemoryHandoffStore {
    fn write(&self, key: &str, value: &str) -> Result<(), Error> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn keys(&self) -> Result<Vec<String>, Error> {
        Ok(self.entries()?.keys().cloned().collect())
    }
}
