//! Shared types for the Parley voice call platform.
//!
//! This crate provides the foundational types used across all Parley crates:
//! call direction and lifecycle status, conversation turns, transcript events,
//! the public call snapshot, voice options, and phone number normalization.
//!
//! No crate in the workspace depends on anything *except* `parley-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

pub mod phone;
pub mod voice;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use phone::{normalize_phone_number, PhoneNumberError};
pub use voice::{AudioEncoding, VoiceOptions};

/// Which side initiated the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    /// A caller dialed in and joined a room.
    Inbound,
    /// The platform dialed out to a phone number.
    Outbound,
}

impl CallDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Lifecycle status of a call session.
///
/// Transitions only move forward:
/// `Initializing → Connecting → Active → Ending → Ended`. `Ending` may be
/// entered from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Conversation context created, transport target being resolved.
    Initializing,
    /// Transport connect issued; waiting for the leg and the transcription
    /// channel to come up.
    Connecting,
    /// Audio is forwarded and conversation turns are processed.
    Active,
    /// Teardown in progress.
    Ending,
    /// Terminal. Retained for a grace period, then purged.
    Ended,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Ending => "ending",
            Self::Ended => "ended",
        }
    }

    /// Returns `true` for `Ending` and `Ended`.
    pub fn is_terminating(self) -> bool {
        matches!(self, Self::Ending | Self::Ended)
    }

    /// Returns `true` if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: CallStatus) -> bool {
        use CallStatus::*;
        matches!(
            (self, next),
            (Initializing, Connecting)
                | (Connecting, Active)
                | (Initializing | Connecting | Active, Ending)
                | (Ending, Ended)
        )
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session left the `Active` path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// An explicit end request.
    Requested,
    /// The counterparty left or the media leg closed.
    RemoteHangup,
    /// The session did not become active before the setup deadline.
    SetupTimeout,
    /// Provisioning or channel setup failed.
    SetupFailed,
    /// The process is shutting down.
    Shutdown,
}

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in a call's conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A single recognized word with timing, in seconds from stream start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f64,
}

/// A transcription result delivered by the speech engine.
///
/// Interim results (`is_final == false`) are informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    pub call_id: String,
    pub text: String,
    pub is_final: bool,
    pub confidence: f64,
    #[serde(default)]
    pub words: Vec<TranscriptWord>,
}

impl TranscriptEvent {
    /// Returns `true` if this event should drive a conversation turn.
    pub fn is_actionable(&self) -> bool {
        self.is_final && !self.text.trim().is_empty()
    }
}

/// Point-in-time view of a call session, as returned by query and list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub id: String,
    #[serde(rename = "type")]
    pub direction: CallDirection,
    pub status: CallStatus,
    pub room_name: String,
    pub bot_identity: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Elapsed seconds, frozen at `end_time` once the call has ended.
    pub duration: i64,
    pub counterparty: String,
    pub last_transcript: Option<String>,
    pub last_transcript_time: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
}
