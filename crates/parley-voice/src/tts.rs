use crate::config::DeepgramConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use parley_types::VoiceOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Maximum text input size for TTS (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Timeout for a single synthesis request.
const TTS_TIMEOUT: Duration = Duration::from_secs(60);

/// Converts assistant text to audio. Implementations hold no per-call state.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceOptions) -> Result<Vec<u8>, VoiceError>;
}

fn check_text(text: &str) -> Result<(), VoiceError> {
    if text.trim().is_empty() {
        return Err(VoiceError::Synthesis("text is empty".to_string()));
    }
    if text.len() > MAX_TTS_INPUT_BYTES {
        return Err(VoiceError::Synthesis(format!(
            "text exceeds maximum size: {} bytes (limit: {} bytes)",
            text.len(),
            MAX_TTS_INPUT_BYTES
        )));
    }
    Ok(())
}

/// Deepgram Aura text-to-speech over HTTP.
#[derive(Debug, Clone)]
pub struct DeepgramSpeech {
    config: DeepgramConfig,
    client: reqwest::Client,
}

impl DeepgramSpeech {
    pub fn new(config: DeepgramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn speak_url(&self, voice: &VoiceOptions) -> String {
        format!(
            "{}/v1/speak?model={}&encoding={}&sample_rate={}&container=none",
            self.config.http_url.trim_end_matches('/'),
            voice.voice,
            voice.encoding.as_str(),
            voice.sample_rate
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for DeepgramSpeech {
    async fn synthesize(&self, text: &str, voice: &VoiceOptions) -> Result<Vec<u8>, VoiceError> {
        check_text(text)?;
        if self.config.api_key.is_empty() {
            return Err(VoiceError::Config(
                "Deepgram API key is not configured".to_string(),
            ));
        }

        let response = self
            .client
            .post(self.speak_url(voice))
            .header("Authorization", format!("Token {}", self.config.api_key))
            .json(&serde_json::json!({ "text": text }))
            .timeout(TTS_TIMEOUT)
            .send()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("TTS request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Synthesis(format!(
                "TTS provider returned {}: {}",
                status, detail
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("failed to read TTS audio: {}", e)))?;

        debug!(bytes = audio.len(), voice = %voice.voice, "synthesized speech");
        Ok(audio.to_vec())
    }
}

/// Local Piper synthesis. `VoiceOptions::voice` names the `.onnx` model,
/// relative to `voices_dir` unless absolute.
#[derive(Debug, Clone)]
pub struct PiperSynthesizer {
    voices_dir: PathBuf,
    piper_binary: PathBuf,
}

impl PiperSynthesizer {
    pub fn new(voices_dir: impl AsRef<Path>, piper_binary: impl AsRef<Path>) -> Self {
        Self {
            voices_dir: voices_dir.as_ref().to_path_buf(),
            piper_binary: piper_binary.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.voices_dir.join(path)
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for PiperSynthesizer {
    /// Returns raw PCM audio data (s16le, at the model's native rate).
    async fn synthesize(&self, text: &str, voice: &VoiceOptions) -> Result<Vec<u8>, VoiceError> {
        check_text(text)?;

        let model_path = self.resolve(&voice.voice);
        if !model_path.exists() {
            return Err(VoiceError::Synthesis(format!(
                "Model file not found: {:?}",
                model_path
            )));
        }

        if voice.speed < 0.1 || voice.speed > 10.0 {
            return Err(VoiceError::Config(
                "Speed must be between 0.1 and 10.0".to_string(),
            ));
        }

        let mut command = Command::new(&self.piper_binary);
        command
            .arg("--model")
            .arg(model_path)
            .arg("--output_raw")
            // Length scale is the inverse of speed.
            .arg("--length_scale")
            .arg((1.0 / voice.speed).to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out or aborted synthesis must not leave piper running.
            .kill_on_drop(true);

        if let Some(speaker) = voice.speaker_id {
            command.arg("--speaker").arg(speaker.to_string());
        }

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Synthesis(format!("Failed to spawn piper: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Synthesis("Failed to open stdin".to_string()))?;
        let text_owned = text.to_string();

        // Write from a separate task so a full stdout pipe cannot deadlock us.
        let write_task = tokio::spawn(async move { stdin.write_all(text_owned.as_bytes()).await });

        let output = tokio::time::timeout(TTS_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                VoiceError::Synthesis(format!(
                    "TTS process timed out after {} seconds",
                    TTS_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Synthesis(format!("Failed to wait for piper: {}", e)))?;

        match write_task.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(VoiceError::Synthesis(format!(
                    "Failed to write to piper stdin: {}",
                    e
                )))
            }
            Err(e) => return Err(VoiceError::Synthesis(format!("Stdin task failed: {}", e))),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Synthesis(format!("Piper failed: {}", stderr)));
        }

        Ok(output.stdout)
    }
}
