//! Server configuration loading from file and environment variables.

use parley_llm::LlmConfig;
use parley_session::SessionConfig;
use parley_voice::{DeepgramConfig, LiveKitConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Room service and SIP trunk.
    #[serde(default)]
    pub livekit: LiveKitConfig,

    /// Streaming transcription, and synthesis when `tts.provider = "deepgram"`.
    #[serde(default)]
    pub deepgram: DeepgramConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "parley_session=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    #[default]
    Deepgram,
    Piper,
}

/// Speech synthesis backend selection.
#[derive(Debug, Clone, Deserialize)]
pub struct TtsConfig {
    #[serde(default)]
    pub provider: TtsProvider,

    /// Directory holding Piper `.onnx` voice models.
    #[serde(default = "default_voices_dir")]
    pub voices_dir: String,

    #[serde(default = "default_piper_binary")]
    pub piper_binary: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_voices_dir() -> String {
    "assets/voices".to_string()
}

fn default_piper_binary() -> String {
    "piper".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: TtsProvider::default(),
            voices_dir: default_voices_dir(),
            piper_binary: default_piper_binary(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override could not be parsed.
    #[error("invalid value for {name}: {value:?}")]
    InvalidOverride { name: &'static str, value: String },
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides (see [`apply_overrides`]).
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if an override has an unparsable value.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Applies `PARLEY_*` overrides read through `lookup`:
///
/// - `PARLEY_HOST`, `PARLEY_PORT`
/// - `PARLEY_LOG_LEVEL`, `PARLEY_LOG_JSON` ("true" or "1" to enable)
/// - `PARLEY_LIVEKIT_URL`, `PARLEY_LIVEKIT_API_KEY`, `PARLEY_LIVEKIT_API_SECRET`,
///   `PARLEY_SIP_TRUNK_ID`
/// - `PARLEY_DEEPGRAM_API_KEY`
/// - `PARLEY_LLM_API_KEY`, `PARLEY_LLM_BASE_URL`, `PARLEY_LLM_MODEL`
/// - `PARLEY_SYSTEM_PROMPT`, `PARLEY_GREETING`
pub fn apply_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(host) = lookup("PARLEY_HOST") {
        config.server.host = host.parse().map_err(|_| ConfigError::InvalidOverride {
            name: "PARLEY_HOST",
            value: host.clone(),
        })?;
    }
    if let Some(port) = lookup("PARLEY_PORT") {
        config.server.port = port.parse().map_err(|_| ConfigError::InvalidOverride {
            name: "PARLEY_PORT",
            value: port.clone(),
        })?;
    }
    if let Some(level) = lookup("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("PARLEY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    let strings: [(&str, &mut String); 9] = [
        ("PARLEY_LIVEKIT_URL", &mut config.livekit.url),
        ("PARLEY_LIVEKIT_API_KEY", &mut config.livekit.api_key),
        ("PARLEY_LIVEKIT_API_SECRET", &mut config.livekit.api_secret),
        ("PARLEY_SIP_TRUNK_ID", &mut config.livekit.sip_trunk_id),
        ("PARLEY_DEEPGRAM_API_KEY", &mut config.deepgram.api_key),
        ("PARLEY_LLM_API_KEY", &mut config.llm.api_key),
        ("PARLEY_LLM_BASE_URL", &mut config.llm.base_url),
        ("PARLEY_LLM_MODEL", &mut config.llm.model),
        ("PARLEY_SYSTEM_PROMPT", &mut config.session.system_prompt),
    ];
    for (name, slot) in strings {
        if let Some(value) = lookup(name) {
            *slot = value;
        }
    }
    if let Some(greeting) = lookup("PARLEY_GREETING") {
        config.session.greeting = Some(greeting).filter(|g| !g.trim().is_empty());
    }

    Ok(())
}
