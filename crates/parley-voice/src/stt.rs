use crate::config::DeepgramConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parley_types::{TranscriptEvent, TranscriptWord};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Timeout for establishing the streaming socket.
const STT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `close` waits for trailing results after `CloseStream`.
const STT_FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

/// Maximum audio chunk accepted per send (1 MiB).
const MAX_STT_CHUNK_BYTES: usize = 1024 * 1024;

/// Opens streaming transcription channels.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// Establishes a channel for `call_id`. Transcripts, interim and final,
    /// are delivered on `on_transcript`.
    async fn open(
        &self,
        call_id: &str,
        on_transcript: mpsc::Sender<TranscriptEvent>,
    ) -> Result<Box<dyn TranscriptionChannel>, VoiceError>;
}

/// A single call's audio-in / transcript-out stream.
#[async_trait]
pub trait TranscriptionChannel: Send {
    fn is_open(&self) -> bool;

    /// Sends caller audio. Returns `false` if the channel is not open; the
    /// frame should then be dropped.
    async fn send_audio(&mut self, chunk: &[u8]) -> bool;

    /// Flushes pending audio and releases the channel. Idempotent.
    async fn close(&mut self);
}

// --- Deepgram wire types ---

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum DeepgramMessage {
    Results {
        channel: DeepgramChannel,
        #[serde(default)]
        is_final: bool,
    },
    Metadata {},
    SpeechStarted {},
    UtteranceEnd {},
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    #[serde(default)]
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    words: Vec<DeepgramWord>,
}

#[derive(Debug, Deserialize)]
struct DeepgramWord {
    word: String,
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
    #[serde(default)]
    confidence: f64,
}

/// Parses one Deepgram socket message.
///
/// Returns `Ok(None)` for well-formed messages that carry no transcript.
///
/// # Errors
///
/// Returns the parse error for payloads that match no known message shape,
/// including `Results` without alternatives.
pub fn parse_deepgram_message(
    call_id: &str,
    raw: &str,
) -> Result<Option<TranscriptEvent>, serde_json::Error> {
    match serde_json::from_str::<DeepgramMessage>(raw)? {
        DeepgramMessage::Results { channel, is_final } => {
            let best = channel.alternatives.into_iter().next().ok_or_else(|| {
                <serde_json::Error as serde::de::Error>::custom("Results without alternatives")
            })?;
            Ok(Some(TranscriptEvent {
                call_id: call_id.to_string(),
                text: best.transcript,
                is_final,
                confidence: best.confidence,
                words: best
                    .words
                    .into_iter()
                    .map(|w| TranscriptWord {
                        word: w.word,
                        start: w.start,
                        end: w.end,
                        confidence: w.confidence,
                    })
                    .collect(),
            }))
        }
        DeepgramMessage::Metadata {}
        | DeepgramMessage::SpeechStarted {}
        | DeepgramMessage::UtteranceEnd {} => Ok(None),
    }
}

/// Deepgram live transcription over WebSocket.
#[derive(Debug, Clone)]
pub struct DeepgramTranscriber {
    config: DeepgramConfig,
}

impl DeepgramTranscriber {
    pub fn new(config: DeepgramConfig) -> Self {
        Self { config }
    }
}

type DeepgramSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

struct DeepgramChannelHandle {
    call_id: String,
    sink: DeepgramSink,
    open: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl TranscriptionProvider for DeepgramTranscriber {
    async fn open(
        &self,
        call_id: &str,
        on_transcript: mpsc::Sender<TranscriptEvent>,
    ) -> Result<Box<dyn TranscriptionChannel>, VoiceError> {
        if self.config.api_key.is_empty() {
            return Err(VoiceError::Config(
                "Deepgram API key is not configured".to_string(),
            ));
        }

        let mut request = self
            .config
            .listen_url()
            .into_client_request()
            .map_err(|e| VoiceError::Transcription(format!("invalid listen URL: {}", e)))?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.config.api_key))
            .map_err(|e| VoiceError::Config(format!("invalid Deepgram API key: {}", e)))?;
        request.headers_mut().insert("Authorization", auth);

        let (socket, _response) =
            tokio::time::timeout(STT_CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    VoiceError::Transcription(format!(
                        "STT connect timed out after {} seconds",
                        STT_CONNECT_TIMEOUT.as_secs()
                    ))
                })?
                .map_err(|e| VoiceError::Transcription(format!("STT connect failed: {}", e)))?;

        info!(call_id = %call_id, "transcription channel open");

        let (sink, mut stream) = socket.split();
        let open = Arc::new(AtomicBool::new(true));

        let reader_open = open.clone();
        let reader_call_id = call_id.to_string();
        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        match parse_deepgram_message(&reader_call_id, text.as_str()) {
                            Ok(Some(event)) => {
                                if on_transcript.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!(call_id = %reader_call_id, "dropping malformed STT payload: {}", e);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(call_id = %reader_call_id, "STT socket error: {}", e);
                        break;
                    }
                }
            }
            reader_open.store(false, Ordering::SeqCst);
            debug!(call_id = %reader_call_id, "transcription reader finished");
        });

        Ok(Box::new(DeepgramChannelHandle {
            call_id: call_id.to_string(),
            sink,
            open,
            reader: Some(reader),
        }))
    }
}

#[async_trait]
impl TranscriptionChannel for DeepgramChannelHandle {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_audio(&mut self, chunk: &[u8]) -> bool {
        if !self.is_open() {
            return false;
        }
        if chunk.len() > MAX_STT_CHUNK_BYTES {
            warn!(call_id = %self.call_id, bytes = chunk.len(), "dropping oversized audio chunk");
            return false;
        }

        match self.sink.send(Message::Binary(chunk.to_vec().into())).await {
            Ok(()) => true,
            Err(e) => {
                warn!(call_id = %self.call_id, "STT send failed: {}", e);
                self.open.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    async fn close(&mut self) {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        if was_open {
            let close_stream = r#"{"type":"CloseStream"}"#.to_string();
            if let Err(e) = self.sink.send(Message::Text(close_stream.into())).await {
                debug!(call_id = %self.call_id, "CloseStream send failed: {}", e);
            }
        }

        if let Some(mut reader) = self.reader.take() {
            if tokio::time::timeout(STT_FLUSH_TIMEOUT, &mut reader).await.is_err() {
                reader.abort();
            }
            let _ = self.sink.close().await;
            info!(call_id = %self.call_id, "transcription channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_final_result() {
        let raw = r#"{
            "type": "Results",
            "is_final": true,
            "speech_final": true,
            "channel": {
                "alternatives": [{
                    "transcript": "hello there",
                    "confidence": 0.97,
                    "words": [
                        {"word": "hello", "start": 0.1, "end": 0.4, "confidence": 0.98},
                        {"word": "there", "start": 0.5, "end": 0.8, "confidence": 0.96}
                    ]
                }]
            }
        }"#;

        let event = parse_deepgram_message("call-1", raw).unwrap().unwrap();
        assert_eq!(event.call_id, "call-1");
        assert_eq!(event.text, "hello there");
        assert!(event.is_final);
        assert_eq!(event.words.len(), 2);
        assert_eq!(event.words[1].word, "there");
    }

    #[test]
    fn interim_result_is_not_final() {
        let raw = r#"{"type":"Results","is_final":false,"channel":{"alternatives":[{"transcript":"hel","confidence":0.5}]}}"#;
        let event = parse_deepgram_message("call-1", raw).unwrap().unwrap();
        assert!(!event.is_final);
        assert!(event.words.is_empty());
    }

    #[test]
    fn control_messages_carry_no_transcript() {
        let metadata = r#"{"type":"Metadata","request_id":"abc","duration":1.2}"#;
        assert!(parse_deepgram_message("c", metadata).unwrap().is_none());

        let started = r#"{"type":"SpeechStarted","timestamp":0.5}"#;
        assert!(parse_deepgram_message("c", started).unwrap().is_none());
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(parse_deepgram_message("c", "not json").is_err());
        assert!(parse_deepgram_message("c", r#"{"type":"Bogus"}"#).is_err());
        assert!(parse_deepgram_message(
            "c",
            r#"{"type":"Results","channel":{"alternatives":[]}}"#
        )
        .is_err());
    }
}
