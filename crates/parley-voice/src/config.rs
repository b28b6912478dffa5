use serde::{Deserialize, Serialize};
use std::fmt;

fn default_token_ttl_seconds() -> u64 {
    3600
}

fn default_participant_poll_ms() -> u64 {
    1000
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LiveKitConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing)]
    pub api_secret: String,
    /// JWT token TTL in seconds for LiveKit join tokens. Default: 3600 (1 hour).
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,
    /// Outbound SIP trunk used to dial phone numbers. Outbound calls fail
    /// with a connection error when empty.
    #[serde(default)]
    pub sip_trunk_id: String,
    /// How often the participant watcher polls the room, in milliseconds.
    #[serde(default = "default_participant_poll_ms")]
    pub participant_poll_ms: u64,
}

impl Default for LiveKitConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            token_ttl_seconds: default_token_ttl_seconds(),
            sip_trunk_id: String::new(),
            participant_poll_ms: default_participant_poll_ms(),
        }
    }
}

impl fmt::Debug for LiveKitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveKitConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .field("sip_trunk_id", &self.sip_trunk_id)
            .field("participant_poll_ms", &self.participant_poll_ms)
            .finish()
    }
}

impl LiveKitConfig {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            ..Self::default()
        }
    }

    /// The server URL with a `ws`/`wss` scheme rewritten to `http`/`https`.
    pub fn http_url(&self) -> String {
        let url = self.url.trim_end_matches('/');
        if let Some(rest) = url.strip_prefix("wss://") {
            format!("https://{}", rest)
        } else if let Some(rest) = url.strip_prefix("ws://") {
            format!("http://{}", rest)
        } else {
            url.to_string()
        }
    }
}

fn default_deepgram_http_url() -> String {
    "https://api.deepgram.com".to_string()
}

fn default_deepgram_ws_url() -> String {
    "wss://api.deepgram.com".to_string()
}

fn default_stt_model() -> String {
    "nova-2-phonecall".to_string()
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_input_sample_rate() -> u32 {
    16_000
}

fn default_channels() -> u16 {
    1
}

fn default_endpointing_ms() -> u32 {
    300
}

/// Deepgram speech-to-text and text-to-speech settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeepgramConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_deepgram_http_url")]
    pub http_url: String,
    #[serde(default = "default_deepgram_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_stt_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Sample rate of caller audio arriving from the media bridge.
    #[serde(default = "default_input_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Silence in milliseconds before Deepgram finalizes an utterance.
    #[serde(default = "default_endpointing_ms")]
    pub endpointing_ms: u32,
}

impl Default for DeepgramConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            http_url: default_deepgram_http_url(),
            ws_url: default_deepgram_ws_url(),
            model: default_stt_model(),
            language: default_language(),
            sample_rate: default_input_sample_rate(),
            channels: default_channels(),
            endpointing_ms: default_endpointing_ms(),
        }
    }
}

impl fmt::Debug for DeepgramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeepgramConfig")
            .field("api_key", &"[REDACTED]")
            .field("http_url", &self.http_url)
            .field("ws_url", &self.ws_url)
            .field("model", &self.model)
            .field("language", &self.language)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("endpointing_ms", &self.endpointing_ms)
            .finish()
    }
}

impl DeepgramConfig {
    /// Builds the streaming `/v1/listen` URL for PCM16 input.
    pub fn listen_url(&self) -> String {
        format!(
            "{}/v1/listen?model={}&language={}&encoding=linear16&sample_rate={}&channels={}\
             &interim_results=true&punctuate=true&endpointing={}",
            self.ws_url.trim_end_matches('/'),
            self.model,
            self.language,
            self.sample_rate,
            self.channels,
            self.endpointing_ms
        )
    }
}
