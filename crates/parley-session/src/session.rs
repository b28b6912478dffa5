//! The per-call state machine.
//!
//! Each call runs as a single task that owns its conversation context,
//! transport handle and transcription channel. Completion and synthesis run
//! as step tasks that report back to the session over a channel, so the
//! session keeps reacting to hangups and end requests while a step is in
//! flight. At most one step runs at a time; transcripts that arrive meanwhile
//! collapse into a single pending slot where the newest one wins.

use crate::config::SessionConfig;
use crate::context::ConversationContext;
use crate::error::SessionError;
use crate::registry::CallRegistry;
use chrono::{DateTime, Utc};
use parley_llm::CompletionClient;
use parley_types::{CallDirection, CallSnapshot, CallStatus, EndReason, TranscriptEvent};
use parley_voice::{
    SpeechSynthesizer, TranscriptionChannel, TranscriptionProvider, Transport, TransportEvent,
    TransportHandle, TransportTarget, VoiceError,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

const TRANSPORT_EVENT_BUFFER: usize = 256;
const TRANSCRIPT_EVENT_BUFFER: usize = 64;

/// Upper bound on each teardown step so a stuck provider cannot pin a call
/// in `Ending`.
const TEARDOWN_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// External collaborators every session drives.
#[derive(Clone)]
pub struct SessionDeps {
    pub transport: Arc<dyn Transport>,
    pub transcription: Arc<dyn TranscriptionProvider>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub completion: Arc<dyn CompletionClient>,
}

pub(crate) enum SessionCommand {
    /// `accepted` hears `true` if this command started the teardown.
    End {
        reason: EndReason,
        accepted: Option<oneshot::Sender<bool>>,
    },
}

/// Queryable state of one call. Only the call's own task writes it.
#[derive(Debug, Clone)]
pub(crate) struct CallRecord {
    pub id: String,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub room_name: String,
    pub bot_identity: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub counterparty: String,
    pub last_transcript: Option<String>,
    pub last_transcript_time: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
}

impl CallRecord {
    pub fn new(
        id: &str,
        direction: CallDirection,
        room_name: &str,
        bot_identity: &str,
        counterparty: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            direction,
            status: CallStatus::Initializing,
            room_name: room_name.to_string(),
            bot_identity: bot_identity.to_string(),
            start_time: Utc::now(),
            end_time: None,
            counterparty: counterparty.to_string(),
            last_transcript: None,
            last_transcript_time: None,
            end_reason: None,
        }
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let until = self.end_time.unwrap_or_else(Utc::now);
        CallSnapshot {
            id: self.id.clone(),
            direction: self.direction,
            status: self.status,
            room_name: self.room_name.clone(),
            bot_identity: self.bot_identity.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            duration: (until - self.start_time).num_seconds().max(0),
            counterparty: self.counterparty.clone(),
            last_transcript: self.last_transcript.clone(),
            last_transcript_time: self.last_transcript_time,
            end_reason: self.end_reason,
        }
    }
}

pub(crate) type SharedRecord = Arc<RwLock<CallRecord>>;

/// Everything a session needs to set itself up.
pub(crate) struct SessionSetup {
    pub call_id: String,
    pub target: TransportTarget,
    pub bot_identity: String,
    /// Extra system turn for outbound calls.
    pub initial_context: Option<String>,
    pub record: SharedRecord,
}

enum StepResult {
    Completed(Result<String, String>),
    Synthesized(Result<Vec<u8>, VoiceError>),
}

type OpenResult = Result<Box<dyn TranscriptionChannel>, VoiceError>;

pub(crate) struct CallSession {
    call_id: String,
    target: TransportTarget,
    bot_identity: String,
    initial_context: Option<String>,
    record: SharedRecord,
    status: CallStatus,
    deps: SessionDeps,
    config: Arc<SessionConfig>,
    registry: CallRegistry,
    context: Option<ConversationContext>,
    transport: Option<TransportHandle>,
    transport_connected: bool,
    transcription: Option<Box<dyn TranscriptionChannel>>,
    opening: Option<JoinHandle<OpenResult>>,
    step_in_flight: bool,
    step_task: Option<JoinHandle<()>>,
    pending: Option<TranscriptEvent>,
    dropped_frames: u64,
    steps_tx: mpsc::UnboundedSender<StepResult>,
}

/// Receiving side of a session's step results, handed to [`CallSession::run`].
pub(crate) struct StepResults(mpsc::UnboundedReceiver<StepResult>);

impl CallSession {
    pub fn new(
        setup: SessionSetup,
        deps: SessionDeps,
        config: Arc<SessionConfig>,
        registry: CallRegistry,
    ) -> (Self, StepResults) {
        let (steps_tx, steps_rx) = mpsc::unbounded_channel();
        let session = Self {
            call_id: setup.call_id,
            target: setup.target,
            bot_identity: setup.bot_identity,
            initial_context: setup.initial_context,
            record: setup.record,
            status: CallStatus::Initializing,
            deps,
            config,
            registry,
            context: None,
            transport: None,
            transport_connected: false,
            transcription: None,
            opening: None,
            step_in_flight: false,
            step_task: None,
            pending: None,
            dropped_frames: 0,
            steps_tx,
        };
        (session, StepResults(steps_rx))
    }

    /// Drives the call from `Initializing` to `Ended`, then keeps the record
    /// around for the grace period before purging it.
    ///
    /// `ready` resolves once the transport connect has been issued and
    /// accepted, or with the setup error after the call has been torn down.
    pub async fn run(
        mut self,
        mut control: mpsc::UnboundedReceiver<SessionCommand>,
        steps: StepResults,
        ready: oneshot::Sender<Result<(), SessionError>>,
    ) {
        let StepResults(mut steps_rx) = steps;
        let deadline = Instant::now() + self.config.setup_timeout();
        let (transport_tx, mut transport_rx) = mpsc::channel(TRANSPORT_EVENT_BUFFER);
        let (transcript_tx, mut transcript_rx) = mpsc::channel(TRANSCRIPT_EVENT_BUFFER);

        self.initialize_context();
        self.set_status(CallStatus::Connecting);

        let connected = time::timeout_at(
            deadline,
            self.deps
                .transport
                .connect(&self.target, &self.bot_identity, transport_tx),
        )
        .await;

        match connected {
            Ok(Ok(handle)) => {
                debug!(call_id = %self.call_id, room = %handle.room_name, "transport connect issued");
                self.transport = Some(handle);
            }
            Ok(Err(e)) => {
                warn!(call_id = %self.call_id, error = %e, "transport connect failed");
                self.end(EndReason::SetupFailed).await;
                let _ = ready.send(Err(SessionError::Connection {
                    call_id: self.call_id.clone(),
                    source: e,
                }));
                self.linger_then_purge().await;
                return;
            }
            Err(_) => {
                warn!(call_id = %self.call_id, "transport connect timed out");
                // The abandoned connect may have registered the room already.
                self.transport = Some(self.unconfirmed_handle());
                self.end(EndReason::SetupTimeout).await;
                let _ = ready.send(Err(SessionError::SetupTimeout {
                    call_id: self.call_id.clone(),
                }));
                self.linger_then_purge().await;
                return;
            }
        }

        let _ = ready.send(Ok(()));

        let provider = Arc::clone(&self.deps.transcription);
        let call_id = self.call_id.clone();
        self.opening = Some(tokio::spawn(async move {
            provider.open(&call_id, transcript_tx).await
        }));

        let setup_deadline = time::sleep_until(deadline);
        tokio::pin!(setup_deadline);

        while self.status != CallStatus::Ended {
            tokio::select! {
                command = control.recv() => {
                    let reason = match command {
                        Some(SessionCommand::End { reason, accepted }) => {
                            if let Some(accepted) = accepted {
                                let _ = accepted.send(true);
                            }
                            reason
                        }
                        None => EndReason::Shutdown,
                    };
                    self.end(reason).await;
                }
                Some(event) = transport_rx.recv() => self.on_transport_event(event).await,
                Some(event) = transcript_rx.recv() => self.on_transcript(event),
                Some(result) = steps_rx.recv() => self.on_step_result(result).await,
                opened = join_opening(&mut self.opening), if self.opening.is_some() => {
                    self.opening = None;
                    self.on_transcription_opened(opened).await;
                }
                () = &mut setup_deadline, if self.status == CallStatus::Connecting => {
                    warn!(call_id = %self.call_id, "call did not become active before the setup deadline");
                    self.end(EndReason::SetupTimeout).await;
                }
            }
        }

        // Queued end requests now hear `false`, as do any sent while lingering.
        drop(control);
        self.linger_then_purge().await;
    }

    fn initialize_context(&mut self) {
        let record = self.read_record();
        let mut metadata = HashMap::new();
        metadata.insert("call_id".to_string(), self.call_id.clone());
        metadata.insert("direction".to_string(), record.direction.as_str().to_string());
        metadata.insert("room_name".to_string(), record.room_name.clone());
        metadata.insert("counterparty".to_string(), record.counterparty.clone());

        let mut context = ConversationContext::new();
        context.initialize(&self.call_id, &self.config.system_prompt, metadata);
        if let Some(extra) = self.initial_context.take().filter(|c| !c.trim().is_empty()) {
            context.append_system(extra);
        }
        self.context = Some(context);
    }

    fn unconfirmed_handle(&self) -> TransportHandle {
        TransportHandle {
            room_name: self.target.room_name().to_string(),
            bot_identity: self.bot_identity.clone(),
            bot_token: String::new(),
            counterparty_identity: self.target.counterparty_identity(),
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                if !self.transport_connected {
                    info!(call_id = %self.call_id, "transport connected");
                    self.transport_connected = true;
                    self.try_activate();
                }
            }
            TransportEvent::Disconnected { reason } => {
                info!(call_id = %self.call_id, ?reason, "transport disconnected");
                self.end(EndReason::RemoteHangup).await;
            }
            TransportEvent::RemoteAudioFrame(frame) => self.forward_caller_audio(&frame).await,
        }
    }

    async fn on_transcription_opened(&mut self, opened: Result<OpenResult, JoinError>) {
        match opened {
            Ok(Ok(channel)) => {
                debug!(call_id = %self.call_id, "transcription channel open");
                self.transcription = Some(channel);
                self.try_activate();
            }
            Ok(Err(e)) => {
                warn!(call_id = %self.call_id, error = %e, "failed to open transcription channel");
                self.end(EndReason::SetupFailed).await;
            }
            Err(e) => {
                error!(call_id = %self.call_id, error = %e, "transcription setup task failed");
                self.end(EndReason::SetupFailed).await;
            }
        }
    }

    /// Becomes `Active` once both the transport leg and transcription are up.
    fn try_activate(&mut self) {
        if self.status != CallStatus::Connecting
            || !self.transport_connected
            || self.transcription.is_none()
        {
            return;
        }
        self.set_status(CallStatus::Active);

        if let Some(greeting) = self.config.greeting.clone().filter(|g| !g.trim().is_empty()) {
            debug_assert!(!self.step_in_flight, "step in flight before activation");
            if let Some(context) = self.context.as_mut() {
                context.append_assistant(greeting.clone());
            }
            self.step_in_flight = true;
            self.synthesize(greeting);
        }
    }

    async fn forward_caller_audio(&mut self, frame: &[u8]) {
        if self.status != CallStatus::Active {
            return;
        }
        let Some(channel) = self.transcription.as_mut() else {
            return;
        };
        if !channel.send_audio(frame).await {
            self.dropped_frames += 1;
            if self.dropped_frames == 1 || self.dropped_frames % 100 == 0 {
                debug!(
                    call_id = %self.call_id,
                    dropped = self.dropped_frames,
                    "transcription channel not ready, dropping caller audio"
                );
            }
        }
    }

    fn on_transcript(&mut self, event: TranscriptEvent) {
        if !event.is_actionable() {
            return;
        }
        let now = Utc::now();
        self.update_record(|record| {
            record.last_transcript = Some(event.text.clone());
            record.last_transcript_time = Some(now);
        });

        if self.status != CallStatus::Active {
            debug!(call_id = %self.call_id, status = %self.status, "ignoring transcript outside an active call");
            return;
        }

        if self.step_in_flight {
            if let Some(superseded) = self.pending.replace(event) {
                debug!(
                    call_id = %self.call_id,
                    superseded = %superseded.text,
                    "pending transcript superseded"
                );
            }
            return;
        }

        self.start_reply(event.text);
    }

    /// Appends the caller's turn and asks for a reply.
    fn start_reply(&mut self, text: String) {
        debug_assert!(!self.step_in_flight, "a conversation step is already in flight");
        let Some(context) = self.context.as_mut() else {
            return;
        };
        context.append_user(text);
        let history = context.render();
        self.step_in_flight = true;

        let completion = Arc::clone(&self.deps.completion);
        let results = self.steps_tx.clone();
        let limit = self.config.completion_timeout();
        self.step_task = Some(tokio::spawn(async move {
            let outcome = match time::timeout(limit, completion.complete(&history)).await {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("no reply within {}ms", limit.as_millis())),
            };
            let _ = results.send(StepResult::Completed(outcome));
        }));
    }

    fn synthesize(&mut self, text: String) {
        let synthesizer = Arc::clone(&self.deps.synthesizer);
        let results = self.steps_tx.clone();
        let voice = self.config.voice.clone();
        self.step_task = Some(tokio::spawn(async move {
            let outcome = synthesizer.synthesize(&text, &voice).await;
            let _ = results.send(StepResult::Synthesized(outcome));
        }));
    }

    async fn on_step_result(&mut self, result: StepResult) {
        match result {
            StepResult::Completed(outcome) => self.on_completion(outcome),
            StepResult::Synthesized(outcome) => self.on_synthesis(outcome).await,
        }
    }

    fn on_completion(&mut self, outcome: Result<String, String>) {
        if self.status != CallStatus::Active {
            debug!(call_id = %self.call_id, "discarding completion for inactive call");
            self.step_in_flight = false;
            return;
        }

        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "completion failed, apologizing");
                self.config.apology.clone()
            }
        };
        if let Some(context) = self.context.as_mut() {
            context.append_assistant(reply.clone());
        }
        self.synthesize(reply);
    }

    async fn on_synthesis(&mut self, outcome: Result<Vec<u8>, VoiceError>) {
        self.step_task = None;
        if self.status != CallStatus::Active {
            debug!(call_id = %self.call_id, "discarding synthesized audio for inactive call");
            self.step_in_flight = false;
            return;
        }

        match outcome {
            Ok(audio) if audio.is_empty() => {
                debug!(call_id = %self.call_id, "synthesizer returned no audio");
            }
            Ok(audio) => {
                if let Some(handle) = &self.transport {
                    if let Err(e) = self.deps.transport.send_audio(handle, audio).await {
                        warn!(call_id = %self.call_id, error = %e, "failed to forward reply audio");
                    }
                }
            }
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "speech synthesis failed, reply not spoken");
            }
        }

        self.step_in_flight = false;
        if let Some(next) = self.pending.take() {
            self.start_reply(next.text);
        }
    }

    /// Tears the call down: audio, transcription, transport, then context.
    async fn end(&mut self, reason: EndReason) {
        if self.status.is_terminating() {
            return;
        }
        info!(call_id = %self.call_id, ?reason, "ending call");
        self.update_record(|record| record.end_reason = Some(reason));
        self.set_status(CallStatus::Ending);

        self.pending = None;
        if let Some(task) = self.step_task.take() {
            task.abort();
        }
        self.step_in_flight = false;

        if let Some(mut channel) = self.transcription.take() {
            if time::timeout(TEARDOWN_STEP_TIMEOUT, channel.close()).await.is_err() {
                warn!(call_id = %self.call_id, "timed out closing transcription channel");
            }
        }
        if let Some(opening) = self.opening.take() {
            opening.abort();
            // The open may have finished before the abort landed.
            if let Ok(Ok(mut channel)) = opening.await {
                let _ = time::timeout(TEARDOWN_STEP_TIMEOUT, channel.close()).await;
            }
        }

        if let Some(handle) = self.transport.take() {
            if time::timeout(TEARDOWN_STEP_TIMEOUT, self.deps.transport.disconnect(&handle))
                .await
                .is_err()
            {
                warn!(call_id = %self.call_id, room = %handle.room_name, "timed out disconnecting transport");
            }
        }

        self.context = None;
        let now = Utc::now();
        self.update_record(|record| record.end_time = Some(now));
        self.set_status(CallStatus::Ended);
    }

    async fn linger_then_purge(self) {
        time::sleep(self.config.grace_period()).await;
        if self.registry.remove(&self.call_id) {
            debug!(call_id = %self.call_id, "purged ended call");
        }
    }

    fn set_status(&mut self, next: CallStatus) {
        let current = self.status;
        debug_assert!(
            current.can_transition_to(next),
            "illegal call transition {current} -> {next}"
        );
        self.status = next;
        self.update_record(|record| record.status = next);
        info!(call_id = %self.call_id, from = %current, to = %next, "call status changed");
    }

    fn read_record(&self) -> CallRecord {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_record(&self, apply: impl FnOnce(&mut CallRecord)) {
        let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut record);
    }
}

async fn join_opening(opening: &mut Option<JoinHandle<OpenResult>>) -> Result<OpenResult, JoinError> {
    match opening {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
