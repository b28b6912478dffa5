#![allow(dead_code)]

use async_trait::async_trait;
use parley_llm::{CompletionClient, LlmError};
use parley_session::{SessionConfig, SessionDeps, SessionManager};
use parley_types::{CallSnapshot, CallStatus, Role, TranscriptEvent, Turn, VoiceOptions};
use parley_voice::{
    SpeechSynthesizer, TranscriptionChannel, TranscriptionProvider, Transport, TransportEvent,
    TransportHandle, TransportTarget, VoiceError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// --- Transport ---

#[derive(Default)]
pub struct MockTransport {
    fail_connect: AtomicBool,
    events: Mutex<HashMap<String, mpsc::Sender<TransportEvent>>>,
    connects: Mutex<Vec<TransportTarget>>,
    disconnects: Mutex<Vec<String>>,
    sent_audio: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let transport = Self::default();
        transport.fail_connect.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub async fn emit(&self, room: &str, event: TransportEvent) {
        let sender = self.events.lock().unwrap().get(room).cloned();
        sender
            .unwrap_or_else(|| panic!("no transport leg for room {room}"))
            .send(event)
            .await
            .unwrap();
    }

    pub fn connects(&self) -> Vec<TransportTarget> {
        self.connects.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> Vec<String> {
        self.disconnects.lock().unwrap().clone()
    }

    pub fn sent_audio(&self) -> Vec<(String, Vec<u8>)> {
        self.sent_audio.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        target: &TransportTarget,
        bot_identity: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<TransportHandle, VoiceError> {
        self.connects.lock().unwrap().push(target.clone());
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(VoiceError::Connection("room service unreachable".into()));
        }
        let room = target.room_name().to_string();
        self.events.lock().unwrap().insert(room.clone(), events);
        Ok(TransportHandle {
            room_name: room,
            bot_identity: bot_identity.to_string(),
            bot_token: "token".to_string(),
            counterparty_identity: target.counterparty_identity(),
        })
    }

    async fn send_audio(&self, handle: &TransportHandle, audio: Vec<u8>) -> Result<(), VoiceError> {
        self.sent_audio
            .lock()
            .unwrap()
            .push((handle.room_name.clone(), audio));
        Ok(())
    }

    async fn disconnect(&self, handle: &TransportHandle) {
        self.events.lock().unwrap().remove(&handle.room_name);
        self.disconnects
            .lock()
            .unwrap()
            .push(handle.room_name.clone());
    }
}

// --- Transcription ---

#[derive(Default)]
pub struct MockTranscription {
    fail_open: AtomicBool,
    senders: Mutex<HashMap<String, mpsc::Sender<TranscriptEvent>>>,
    audio: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicUsize>,
}

impl MockTranscription {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let transcription = Self::default();
        transcription.fail_open.store(true, Ordering::SeqCst);
        Arc::new(transcription)
    }

    pub async fn emit(&self, call_id: &str, text: &str, is_final: bool) {
        let sender = self.senders.lock().unwrap().get(call_id).cloned();
        let event = TranscriptEvent {
            call_id: call_id.to_string(),
            text: text.to_string(),
            is_final,
            confidence: 0.95,
            words: Vec::new(),
        };
        sender
            .unwrap_or_else(|| panic!("no transcription channel for call {call_id}"))
            .send(event)
            .await
            .unwrap();
    }

    pub fn audio(&self) -> Vec<Vec<u8>> {
        self.audio.lock().unwrap().clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockChannel {
    open: bool,
    audio: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl TranscriptionProvider for MockTranscription {
    async fn open(
        &self,
        call_id: &str,
        on_transcript: mpsc::Sender<TranscriptEvent>,
    ) -> Result<Box<dyn TranscriptionChannel>, VoiceError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(VoiceError::Transcription("handshake rejected".into()));
        }
        self.senders
            .lock()
            .unwrap()
            .insert(call_id.to_string(), on_transcript);
        Ok(Box::new(MockChannel {
            open: true,
            audio: Arc::clone(&self.audio),
            closed: Arc::clone(&self.closed),
        }))
    }
}

#[async_trait]
impl TranscriptionChannel for MockChannel {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn send_audio(&mut self, chunk: &[u8]) -> bool {
        if !self.open {
            return false;
        }
        self.audio.lock().unwrap().push(chunk.to_vec());
        true
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// --- Completion ---

/// Completion client whose replies are released one at a time by the test.
pub struct MockCompletion {
    requests: Mutex<Vec<Vec<Turn>>>,
    replies_tx: mpsc::UnboundedSender<Result<String, LlmError>>,
    replies_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<String, LlmError>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockCompletion {
    pub fn new() -> Arc<Self> {
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            replies_tx,
            replies_rx: tokio::sync::Mutex::new(replies_rx),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn reply(&self, text: &str) {
        self.replies_tx.send(Ok(text.to_string())).unwrap();
    }

    pub fn fail(&self) {
        self.replies_tx
            .send(Err(LlmError::Status {
                status: 503,
                body: "overloaded".into(),
            }))
            .unwrap();
    }

    pub fn requests(&self) -> Vec<Vec<Turn>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for MockCompletion {
    async fn complete(&self, turns: &[Turn]) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(turns.to_vec());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let reply = self
            .replies_rx
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(Err(LlmError::EmptyResponse));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}

// --- Synthesis ---

/// Returns the reply text's bytes as "audio".
#[derive(Default)]
pub struct MockSynthesizer {
    fail: AtomicBool,
    texts: Mutex<Vec<String>>,
}

impl MockSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str, _voice: &VoiceOptions) -> Result<Vec<u8>, VoiceError> {
        self.texts.lock().unwrap().push(text.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(VoiceError::Synthesis("voice unavailable".into()));
        }
        Ok(text.as_bytes().to_vec())
    }
}

// --- Harness ---

pub struct Harness {
    pub manager: SessionManager,
    pub transport: Arc<MockTransport>,
    pub transcription: Arc<MockTranscription>,
    pub completion: Arc<MockCompletion>,
    pub synthesizer: Arc<MockSynthesizer>,
}

pub fn test_config() -> SessionConfig {
    SessionConfig {
        system_prompt: "You are a test assistant.".to_string(),
        greeting: None,
        apology: "Sorry, say that again?".to_string(),
        setup_timeout_ms: 2_000,
        completion_timeout_ms: 2_000,
        grace_period_ms: 300,
        ..SessionConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with(test_config(), MockTransport::new(), MockTranscription::new())
}

pub fn harness_with(
    config: SessionConfig,
    transport: Arc<MockTransport>,
    transcription: Arc<MockTranscription>,
) -> Harness {
    let completion = MockCompletion::new();
    let synthesizer = MockSynthesizer::new();
    let deps = SessionDeps {
        transport: transport.clone(),
        transcription: transcription.clone(),
        synthesizer: synthesizer.clone(),
        completion: completion.clone(),
    };
    Harness {
        manager: SessionManager::new(deps, config),
        transport,
        transcription,
        completion,
        synthesizer,
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_status(manager: &SessionManager, call_id: &str, status: CallStatus) {
    wait_until(&format!("call {call_id} to reach {status}"), || {
        manager.get(call_id).ok().map(|s| s.status) == Some(status)
    })
    .await;
}

pub fn snapshot(manager: &SessionManager, call_id: &str) -> CallSnapshot {
    manager.get(call_id).unwrap()
}

pub fn user_turns(turns: &[Turn]) -> Vec<String> {
    turns
        .iter()
        .filter(|t| t.role == Role::User)
        .map(|t| t.content.clone())
        .collect()
}
