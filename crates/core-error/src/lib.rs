use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("message parse error: {0}")]
    Parse(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("sink error: {0}")]
    Sink(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MailError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<&'static str>,
    pub retryable: bool,
}

impl From<&MailError> for ErrorReport {
    fn from(err: &MailError) -> Self {
        let (code, suggestion, retryable) = match err {
            MailError::Connection(_) => (
                "CONNECTION_ERROR",
                Some("Check server address and network; the next scheduled run retries"),
                true,
            ),
            MailError::Auth(_) => (
                "AUTH_ERROR",
                Some("Verify the account credential; repeated failures may lock the account"),
                false,
            ),
            MailError::Protocol(_) => (
                "PROTOCOL_ERROR",
                Some("Server sent an unexpected response; progress up to this point is kept"),
                false,
            ),
            MailError::Parse(_) => ("PARSE_ERROR", None, false),
            MailError::Checkpoint(_) => (
                "CHECKPOINT_ERROR",
                Some("Check the checkpoint directory permissions and free space"),
                false,
            ),
            MailError::Sink(_) => (
                "SINK_ERROR",
                Some("Unsent messages are not checkpointed and retry next run"),
                true,
            ),
            MailError::Config(_) => ("CONFIG_ERROR", None, false),
            MailError::Internal(_) => ("INTERNAL_ERROR", Some("Unexpected error"), true),
        };
        Self {
            code,
            message: err.to_string(),
            suggestion,
            retryable,
        }
    }
}

impl ErrorReport {
    pub fn to_compact(&self) -> String {
        let mut parts = vec![format!("[{}] {}", self.code, self.message)];
        if let Some(s) = self.suggestion {
            parts.push(format!("Suggestion: {s}"));
        }
        if self.retryable {
            parts.push("(retryable)".to_string());
        }
        parts.join(" | ")
    }
}
