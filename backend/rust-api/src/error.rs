use thiserror::Error;

/// Errors the quiz engine reports to its callers.
#[derive(Debug, Error)]
pub enum QuizError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Session {0} not found")]
    NotFound(String),

    #[error("Session {0} is already closed")]
    AlreadyTerminal(String),

    #[error("Storage unavailable: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl QuizError {
    pub fn validation(message: impl Into<String>) -> Self {
        QuizError::Validation(message.into())
    }
}

impl From<StoreError> for QuizError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateSubmission(session_id) | StoreError::NotActive(session_id) => {
                QuizError::AlreadyTerminal(session_id)
            }
            StoreError::Backend(e) => QuizError::Persistence(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("A submission already exists for session {0}")]
    DuplicateSubmission(String),

    #[error("Session {0} is no longer active")]
    NotActive(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Failure of the generative AI backend. Never surfaced to clients; every
/// call site resolves it with deterministic content.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("AI backend is disabled")]
    Disabled,

    #[error("AI request timed out")]
    Timeout,

    #[error("AI transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("AI backend rejected credentials ({0})")]
    Auth(u16),

    #[error("AI model or endpoint not found")]
    NotFound,

    #[error("AI backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed AI response: {0}")]
    Malformed(String),
}

impl UpstreamError {
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Disabled => "disabled",
            UpstreamError::Timeout => "timeout",
            UpstreamError::Transport(_) => "transport",
            UpstreamError::Auth(_) => "auth",
            UpstreamError::NotFound => "not_found",
            UpstreamError::Status { .. } => "status",
            UpstreamError::Malformed(_) => "malformed",
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Transport(err)
        }
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(err: serde_json::Error) -> Self {
        UpstreamError::Malformed(err.to_string())
    }
}
