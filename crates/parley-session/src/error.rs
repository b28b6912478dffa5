//! Error types for call session management.

use parley_types::PhoneNumberError;
use parley_voice::VoiceError;

/// Errors surfaced to callers of the session manager.
///
/// Failures inside a running call (completion, synthesis, a dropped audio
/// frame) are handled by the session itself and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The transport leg could not be provisioned or joined.
    #[error("call {call_id}: connection failed: {source}")]
    Connection {
        call_id: String,
        #[source]
        source: VoiceError,
    },

    /// The transport leg did not come up before the setup deadline.
    #[error("call {call_id}: setup timed out")]
    SetupTimeout { call_id: String },

    /// The session task went away before reporting its setup outcome.
    #[error("call {call_id}: session aborted during setup")]
    Aborted { call_id: String },

    #[error("call not found: {0}")]
    NotFound(String),

    #[error("invalid phone number: {0}")]
    InvalidPhoneNumber(#[from] PhoneNumberError),
}

impl SessionError {
    /// The call this error belongs to, if a call was created.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::Connection { call_id, .. }
            | Self::SetupTimeout { call_id }
            | Self::Aborted { call_id } => Some(call_id),
            Self::NotFound(_) | Self::InvalidPhoneNumber(_) => None,
        }
    }
}
