use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("API error: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Tool error: {tool} - {message}")]
    Tool { tool: String, message: String },

    #[error("Model call timed out after {0:?}")]
    ModelTimeout(Duration),

    #[error("Search for '{query}' timed out after {timeout:?}")]
    SearchTimeout { query: String, timeout: Duration },

    #[error("Search provider error: {0}")]
    SearchProvider(String),

    #[error("Unmatched tool call: {0}")]
    UnmatchedToolCall(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl Error {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn search_timeout(query: impl Into<String>, timeout: Duration) -> Self {
        Self::SearchTimeout {
            query: query.into(),
            timeout,
        }
    }

    pub fn search_provider(message: impl Into<String>) -> Self {
        Self::SearchProvider(message.into())
    }

    pub fn unmatched_tool_call(message: impl Into<String>) -> Self {
        Self::UnmatchedToolCall(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Transient transport failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::RateLimit(_)
                | Error::ModelTimeout(_)
                | Error::SearchTimeout { .. }
        )
    }

    /// Failures the research loop absorbs instead of terminating the session.
    pub fn is_recoverable(&self) -> bool {
        self.is_retryable() || matches!(self, Error::SearchProvider(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ModelTimeout(_) | Error::SearchTimeout { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::api(400, "Bad request");
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("Bad request"));

        let err = Error::search_timeout("rust async", Duration::from_secs(30));
        assert!(err.to_string().contains("rust async"));
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::network("connection reset").is_retryable());
        assert!(Error::rate_limit("too many requests").is_retryable());
        assert!(Error::ModelTimeout(Duration::from_secs(300)).is_retryable());
        assert!(!Error::auth("invalid key").is_retryable());
        assert!(!Error::unmatched_tool_call("call_9").is_retryable());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::search_provider("502 bad gateway").is_recoverable());
        assert!(Error::search_timeout("q", Duration::from_secs(1)).is_recoverable());
        assert!(!Error::config("max_timeouts must be at least 1").is_recoverable());
        assert!(!Error::Cancelled.is_recoverable());
    }
}
