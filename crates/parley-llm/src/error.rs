//! Error types for completion requests.

/// Errors that can occur while requesting a completion.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The request could not be sent or the response could not be read.
    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("completion provider returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The provider answered without any assistant text.
    #[error("completion response contained no text")]
    EmptyResponse,

    /// The client is not configured.
    #[error("invalid completion configuration: {0}")]
    Config(String),
}
