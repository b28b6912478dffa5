//! The call's connection to the room/telephony leg.

use crate::error::VoiceError;
use crate::media::MediaBridge;
use crate::service::LiveKitService;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Why the transport leg went away without being asked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The counterparty left the room (caller hung up).
    ParticipantLeft,
    /// The media worker's socket closed.
    MediaClosed,
}

/// Asynchronous events a transport delivers to the owning session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: DisconnectReason },
    RemoteAudioFrame(Vec<u8>),
}

/// Where a call's transport leg should be established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportTarget {
    /// Join a room the caller is already in.
    Inbound {
        room_name: String,
        caller_identity: String,
    },
    /// Create a room and dial a phone number into it.
    Outbound {
        room_name: String,
        phone_number: String,
    },
}

impl TransportTarget {
    pub fn room_name(&self) -> &str {
        match self {
            Self::Inbound { room_name, .. } | Self::Outbound { room_name, .. } => room_name,
        }
    }

    /// Participant identity of the other party in the room.
    pub fn counterparty_identity(&self) -> String {
        match self {
            Self::Inbound {
                caller_identity, ..
            } => caller_identity.clone(),
            Self::Outbound { phone_number, .. } => {
                format!("sip-{}", phone_number.trim_start_matches('+'))
            }
        }
    }
}

/// An established transport leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHandle {
    pub room_name: String,
    pub bot_identity: String,
    /// Join token the media worker uses to enter the room as the bot.
    pub bot_token: String,
    pub counterparty_identity: String,
}

/// Room/telephony leg for one call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes the leg. Events for the call are delivered on `events`.
    ///
    /// On failure nothing stays registered for the room.
    async fn connect(
        &self,
        target: &TransportTarget,
        bot_identity: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<TransportHandle, VoiceError>;

    /// Forwards synthesized audio to the leg.
    async fn send_audio(&self, handle: &TransportHandle, audio: Vec<u8>)
        -> Result<(), VoiceError>;

    /// Releases the leg. Calling this on an already released handle is a
    /// no-op.
    async fn disconnect(&self, handle: &TransportHandle);
}

/// LiveKit rooms for signaling and SIP, the [`MediaBridge`] for audio.
#[derive(Debug, Clone)]
pub struct LiveKitTransport {
    service: Arc<LiveKitService>,
    bridge: MediaBridge,
    watchers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    /// Rooms this transport created for outbound calls, deleted on release.
    owned_rooms: Arc<Mutex<HashSet<String>>>,
    poll_interval: Duration,
}

impl LiveKitTransport {
    pub fn new(service: Arc<LiveKitService>, bridge: MediaBridge) -> Self {
        let poll_interval = Duration::from_millis(service.config().participant_poll_ms.max(100));
        Self {
            service,
            bridge,
            watchers: Arc::new(Mutex::new(HashMap::new())),
            owned_rooms: Arc::new(Mutex::new(HashSet::new())),
            poll_interval,
        }
    }

    pub fn bridge(&self) -> &MediaBridge {
        &self.bridge
    }

    fn start_watcher(&self, room_name: &str, counterparty: &str, events: mpsc::Sender<TransportEvent>) {
        let service = self.service.clone();
        let room = room_name.to_string();
        let identity = counterparty.to_string();
        let interval = self.poll_interval;

        let handle = tokio::spawn(watch_participant(service, room, identity, events, interval));

        if let Ok(mut watchers) = self.watchers.lock() {
            if let Some(previous) = watchers.insert(room_name.to_string(), handle) {
                previous.abort();
            }
        }
    }

    fn stop_watcher(&self, room_name: &str) -> bool {
        let handle = match self.watchers.lock() {
            Ok(mut watchers) => watchers.remove(room_name),
            Err(_) => None,
        };
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn claim_room(&self, room_name: &str) {
        if let Ok(mut rooms) = self.owned_rooms.lock() {
            rooms.insert(room_name.to_string());
        }
    }

    fn unclaim_room(&self, room_name: &str) -> bool {
        match self.owned_rooms.lock() {
            Ok(mut rooms) => rooms.remove(room_name),
            Err(_) => false,
        }
    }

    /// Deletes the room if this transport created it.
    async fn release_room(&self, room_name: &str) {
        if !self.unclaim_room(room_name) {
            return;
        }
        if let Err(e) = self.service.delete_room(room_name).await {
            warn!(room = %room_name, "failed to delete room: {}", e);
        } else {
            debug!(room = %room_name, "deleted call room");
        }
    }
}

/// Polls the room until the counterparty has been seen and then leaves.
async fn watch_participant(
    service: Arc<LiveKitService>,
    room: String,
    identity: String,
    events: mpsc::Sender<TransportEvent>,
    interval: Duration,
) {
    let mut seen = false;
    loop {
        tokio::time::sleep(interval).await;
        if events.is_closed() {
            return;
        }

        match service.participant_identities(&room).await {
            Ok(identities) => {
                let present = identities.iter().any(|i| *i == identity);
                if present {
                    seen = true;
                } else if seen {
                    info!(room = %room, participant = %identity, "counterparty left the room");
                    let _ = events
                        .send(TransportEvent::Disconnected {
                            reason: DisconnectReason::ParticipantLeft,
                        })
                        .await;
                    return;
                }
            }
            Err(e) => {
                debug!(room = %room, "participant poll failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl Transport for LiveKitTransport {
    async fn connect(
        &self,
        target: &TransportTarget,
        bot_identity: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<TransportHandle, VoiceError> {
        let room_name = target.room_name();
        let counterparty = target.counterparty_identity();

        info!(room = %room_name, bot = %bot_identity, "connecting call transport");

        // Claimed before creation so a connect cancelled mid-flight still
        // deletes the room on disconnect.
        if matches!(target, TransportTarget::Outbound { .. }) {
            self.claim_room(room_name);
        }

        let provisioned = async {
            self.service.ensure_room(room_name).await?;
            let bot_token = self
                .service
                .generate_join_token(room_name, bot_identity, bot_identity)?;
            self.bridge.register(room_name, events.clone())?;
            Ok::<_, VoiceError>(bot_token)
        }
        .await;
        let bot_token = match provisioned {
            Ok(token) => token,
            Err(e) => {
                self.release_room(room_name).await;
                return Err(e);
            }
        };

        if let TransportTarget::Outbound { phone_number, .. } = target {
            if let Err(e) = self
                .service
                .dial_sip_participant(room_name, phone_number, &counterparty)
                .await
            {
                self.bridge.unregister(room_name);
                self.release_room(room_name).await;
                return Err(e);
            }
        }

        self.start_watcher(room_name, &counterparty, events);

        Ok(TransportHandle {
            room_name: room_name.to_string(),
            bot_identity: bot_identity.to_string(),
            bot_token,
            counterparty_identity: counterparty,
        })
    }

    async fn send_audio(
        &self,
        handle: &TransportHandle,
        audio: Vec<u8>,
    ) -> Result<(), VoiceError> {
        self.bridge.send_audio(&handle.room_name, audio).await
    }

    async fn disconnect(&self, handle: &TransportHandle) {
        let had_watcher = self.stop_watcher(&handle.room_name);
        let had_link = self.bridge.unregister(&handle.room_name);
        if had_watcher || had_link {
            info!(room = %handle.room_name, "disconnecting call transport");

            if let Err(e) = self
                .service
                .remove_participant(&handle.room_name, &handle.counterparty_identity)
                .await
            {
                // The counterparty usually left already when the call ends on a hangup.
                warn!(
                    "failed to remove participant {} from room {}: {}",
                    handle.counterparty_identity, handle.room_name, e
                );
            }
        }

        self.release_room(&handle.room_name).await;
    }
}
