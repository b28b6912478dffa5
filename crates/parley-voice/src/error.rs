use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("LiveKit API error: {0}")]
    LiveKit(#[from] livekit_api::access_token::AccessTokenError),

    /// The transport endpoint is unreachable or rejected the request.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("transcription error: {0}")]
    Transcription(String),

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
