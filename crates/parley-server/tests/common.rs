#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use parley_llm::{CompletionClient, LlmError};
use parley_server::{app, AppState};
use parley_session::{SessionConfig, SessionDeps, SessionManager};
use parley_types::{CallStatus, Role, TranscriptEvent, Turn, VoiceOptions};
use parley_voice::{
    MediaBridge, SpeechSynthesizer, TranscriptionChannel, TranscriptionProvider, Transport,
    TransportEvent, TransportHandle, TransportTarget, VoiceError,
};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

/// Transport that routes audio through the real media bridge.
pub struct BridgeTransport {
    bridge: MediaBridge,
    fail_connect: AtomicBool,
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn connect(
        &self,
        target: &TransportTarget,
        bot_identity: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<TransportHandle, VoiceError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(VoiceError::Connection("room service unreachable".into()));
        }
        self.bridge.register(target.room_name(), events)?;
        Ok(TransportHandle {
            room_name: target.room_name().to_string(),
            bot_identity: bot_identity.to_string(),
            bot_token: "token".to_string(),
            counterparty_identity: target.counterparty_identity(),
        })
    }

    async fn send_audio(&self, handle: &TransportHandle, audio: Vec<u8>) -> Result<(), VoiceError> {
        self.bridge.send_audio(&handle.room_name, audio).await
    }

    async fn disconnect(&self, handle: &TransportHandle) {
        self.bridge.unregister(&handle.room_name);
    }
}

#[derive(Default)]
pub struct ScriptedTranscription {
    senders: Mutex<HashMap<String, mpsc::Sender<TranscriptEvent>>>,
    audio: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ScriptedTranscription {
    pub async fn say(&self, call_id: &str, text: &str) {
        let sender = self.senders.lock().unwrap().get(call_id).cloned().unwrap();
        sender
            .send(TranscriptEvent {
                call_id: call_id.to_string(),
                text: text.to_string(),
                is_final: true,
                confidence: 0.9,
                words: Vec::new(),
            })
            .await
            .unwrap();
    }

    pub fn audio(&self) -> Vec<Vec<u8>> {
        self.audio.lock().unwrap().clone()
    }
}

struct ScriptedChannel {
    audio: Arc<Mutex<Vec<Vec<u8>>>>,
    open: bool,
}

#[async_trait]
impl TranscriptionProvider for ScriptedTranscription {
    async fn open(
        &self,
        call_id: &str,
        on_transcript: mpsc::Sender<TranscriptEvent>,
    ) -> Result<Box<dyn TranscriptionChannel>, VoiceError> {
        self.senders
            .lock()
            .unwrap()
            .insert(call_id.to_string(), on_transcript);
        Ok(Box::new(ScriptedChannel {
            audio: Arc::clone(&self.audio),
            open: true,
        }))
    }
}

#[async_trait]
impl TranscriptionChannel for ScriptedChannel {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn send_audio(&mut self, chunk: &[u8]) -> bool {
        self.audio.lock().unwrap().push(chunk.to_vec());
        self.open
    }

    async fn close(&mut self) {
        self.open = false;
    }
}

/// Replies "you said <last user turn>".
pub struct EchoCompletion;

#[async_trait]
impl CompletionClient for EchoCompletion {
    async fn complete(&self, turns: &[Turn]) -> Result<String, LlmError> {
        turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| format!("you said {}", t.content))
            .ok_or(LlmError::EmptyResponse)
    }
}

/// Returns the text's bytes as audio.
pub struct TextAudio;

#[async_trait]
impl SpeechSynthesizer for TextAudio {
    async fn synthesize(&self, text: &str, _voice: &VoiceOptions) -> Result<Vec<u8>, VoiceError> {
        Ok(text.as_bytes().to_vec())
    }
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub transcription: Arc<ScriptedTranscription>,
}

pub fn test_app() -> TestApp {
    build_test_app(false)
}

pub fn failing_test_app() -> TestApp {
    build_test_app(true)
}

fn build_test_app(fail_connect: bool) -> TestApp {
    let bridge = MediaBridge::new();
    let transcription = Arc::new(ScriptedTranscription::default());
    let deps = SessionDeps {
        transport: Arc::new(BridgeTransport {
            bridge: bridge.clone(),
            fail_connect: AtomicBool::new(fail_connect),
        }),
        transcription: transcription.clone(),
        synthesizer: Arc::new(TextAudio),
        completion: Arc::new(EchoCompletion),
    };
    let config = SessionConfig {
        setup_timeout_ms: 5_000,
        grace_period_ms: 500,
        ..SessionConfig::default()
    };
    let state = AppState {
        sessions: SessionManager::new(deps, config),
        bridge,
    };
    TestApp {
        router: app(state.clone()),
        state,
        transcription,
    }
}

/// Sends one request through the router and decodes the JSON body.
pub async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(json) => request.body(Body::from(json.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Serves the router on an ephemeral port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_status(state: &AppState, call_id: &str, status: CallStatus) {
    wait_until(&format!("call {call_id} to reach {status}"), || {
        state.sessions.get(call_id).ok().map(|s| s.status) == Some(status)
    })
    .await;
}
