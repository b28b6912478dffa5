//! Voice output options.
//!
//! A `VoiceOptions` value describes how assistant turns should sound. It is
//! passed with every synthesis request; synthesis clients hold no per-call
//! state.

use serde::{Deserialize, Serialize};

/// PCM container/encoding for synthesized audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// Signed 16-bit little-endian PCM.
    #[default]
    Linear16,
    /// 8-bit G.711 mu-law, as used on PSTN legs.
    Mulaw,
}

impl AudioEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linear16 => "linear16",
            Self::Mulaw => "mulaw",
        }
    }
}

/// Synthesis parameters for a call's assistant voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceOptions {
    /// Provider voice or model identifier (e.g. `aura-asteria-en`, or a
    /// Piper `.onnx` model path).
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default)]
    pub encoding: AudioEncoding,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Speech speed multiplier (1.0 is normal).
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Speaker ID within a multi-speaker model (0-indexed).
    #[serde(default)]
    pub speaker_id: Option<u32>,
}

fn default_voice() -> String {
    "aura-asteria-en".to_string()
}

fn default_sample_rate() -> u32 {
    24_000
}

fn default_speed() -> f32 {
    1.0
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            voice: default_voice(),
            encoding: AudioEncoding::default(),
            sample_rate: default_sample_rate(),
            speed: default_speed(),
            speaker_id: None,
        }
    }
}
