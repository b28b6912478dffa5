//! Voice collaborators for Parley call sessions.
//!
//! Provides the transport leg (LiveKit rooms, SIP dialing, and the media
//! bridge that carries PCM audio to and from a media worker), streaming
//! speech-to-text, and text-to-speech synthesis. Each collaborator is exposed
//! through a trait so the session engine never depends on a concrete
//! provider.
//!
//! The audio path separates concerns: the caller's audio arrives from the
//! room via the media bridge, is streamed to the transcription provider, and
//! assistant replies are synthesized and handed back through the bridge.

pub mod config;
pub mod error;
pub mod media;
pub mod service;
pub mod stt;
pub mod transport;
pub mod tts;

pub use config::{DeepgramConfig, LiveKitConfig};
pub use error::VoiceError;
pub use media::{media_closed_event, MediaAttachError, MediaAttachment, MediaBridge};
pub use service::LiveKitService;
pub use stt::{
    parse_deepgram_message, DeepgramTranscriber, TranscriptionChannel, TranscriptionProvider,
};
pub use transport::{
    DisconnectReason, LiveKitTransport, Transport, TransportEvent, TransportHandle,
    TransportTarget,
};
pub use tts::{DeepgramSpeech, PiperSynthesizer, SpeechSynthesizer};
