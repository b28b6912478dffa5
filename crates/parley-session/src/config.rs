use parley_types::VoiceOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_system_prompt() -> String {
    "You are a friendly phone assistant. Keep every reply to one or two short \
     sentences, since it will be spoken aloud."
        .to_string()
}

fn default_apology() -> String {
    "Sorry, I'm having trouble right now. Could you say that again?".to_string()
}

fn default_bot_identity() -> String {
    "parley-bot".to_string()
}

fn default_outbound_room_prefix() -> String {
    "call".to_string()
}

fn default_country_code() -> String {
    "1".to_string()
}

fn default_setup_timeout_ms() -> u64 {
    30_000
}

fn default_completion_timeout_ms() -> u64 {
    15_000
}

fn default_grace_period_ms() -> u64 {
    60_000
}

/// Behavior shared by every call session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// First turn of every conversation.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Spoken once when the call becomes active. No greeting if unset.
    #[serde(default)]
    pub greeting: Option<String>,
    /// Spoken in place of a reply when the completion request fails.
    #[serde(default = "default_apology")]
    pub apology: String,
    /// Prefix of the bot's participant identity; the call id is appended.
    #[serde(default = "default_bot_identity")]
    pub bot_identity: String,
    #[serde(default = "default_outbound_room_prefix")]
    pub outbound_room_prefix: String,
    /// Country code applied to national numbers on outbound calls.
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
    /// How long a call may take to become active.
    #[serde(default = "default_setup_timeout_ms")]
    pub setup_timeout_ms: u64,
    #[serde(default = "default_completion_timeout_ms")]
    pub completion_timeout_ms: u64,
    /// How long an ended call stays queryable before it is purged.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default)]
    pub voice: VoiceOptions,
}

impl SessionConfig {
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            greeting: None,
            apology: default_apology(),
            bot_identity: default_bot_identity(),
            outbound_room_prefix: default_outbound_room_prefix(),
            default_country_code: default_country_code(),
            setup_timeout_ms: default_setup_timeout_ms(),
            completion_timeout_ms: default_completion_timeout_ms(),
            grace_period_ms: default_grace_period_ms(),
            voice: VoiceOptions::default(),
        }
    }
}
