//! Per-room media links between call sessions and media workers.
//!
//! A media worker joins the LiveKit room with the bot token and attaches to
//! the bridge over a WebSocket. Caller audio it receives is pushed into the
//! session as [`TransportEvent::RemoteAudioFrame`]; synthesized audio the
//! session sends is handed back to the worker for publishing.

use crate::error::VoiceError;
use crate::transport::{DisconnectReason, TransportEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;

/// Capacity of the per-link outbound audio queue.
const OUTBOUND_AUDIO_CAPACITY: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MediaAttachError {
    #[error("no call is waiting for media in room {0}")]
    UnknownRoom(String),

    #[error("media for room {0} is already attached")]
    AlreadyAttached(String),
}

#[derive(Debug)]
struct MediaLink {
    events: mpsc::Sender<TransportEvent>,
    attachment: Option<(u64, mpsc::Sender<Vec<u8>>)>,
}

/// A worker's side of an attached media link.
#[derive(Debug)]
pub struct MediaAttachment {
    pub room_name: String,
    pub attachment_id: u64,
    /// Session event channel. The attaching side sends `Connected` first.
    pub events: mpsc::Sender<TransportEvent>,
    /// Synthesized audio to publish into the room.
    pub outbound: mpsc::Receiver<Vec<u8>>,
}

/// Registry of media links, keyed by room name.
///
/// Uses `std::sync::RwLock`: every lock acquisition is a brief HashMap
/// operation that never spans an `.await` point.
#[derive(Debug, Clone, Default)]
pub struct MediaBridge {
    links: Arc<RwLock<HashMap<String, MediaLink>>>,
    next_attachment_id: Arc<AtomicU64>,
}

impl MediaBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a room whose media has not attached yet.
    pub fn register(
        &self,
        room_name: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), VoiceError> {
        let mut links = self
            .links
            .write()
            .map_err(|_| VoiceError::Connection("media bridge lock poisoned".to_string()))?;

        if links.contains_key(room_name) {
            return Err(VoiceError::Connection(format!(
                "room {} already has a registered media link",
                room_name
            )));
        }

        links.insert(
            room_name.to_string(),
            MediaLink {
                events,
                attachment: None,
            },
        );
        Ok(())
    }

    /// Removes the room's link. Dropping the outbound sender ends the
    /// worker's write loop. Returns `false` if nothing was registered.
    pub fn unregister(&self, room_name: &str) -> bool {
        match self.links.write() {
            Ok(mut links) => links.remove(room_name).is_some(),
            Err(_) => false,
        }
    }

    pub fn is_registered(&self, room_name: &str) -> bool {
        self.links
            .read()
            .map(|links| links.contains_key(room_name))
            .unwrap_or(false)
    }

    pub fn is_attached(&self, room_name: &str) -> bool {
        self.links
            .read()
            .map(|links| {
                links
                    .get(room_name)
                    .is_some_and(|link| link.attachment.is_some())
            })
            .unwrap_or(false)
    }

    /// Attaches a media worker to a registered room.
    pub fn attach(&self, room_name: &str) -> Result<MediaAttachment, MediaAttachError> {
        let mut links = self
            .links
            .write()
            .map_err(|_| MediaAttachError::UnknownRoom(room_name.to_string()))?;

        let link = links
            .get_mut(room_name)
            .ok_or_else(|| MediaAttachError::UnknownRoom(room_name.to_string()))?;

        if link.attachment.is_some() {
            return Err(MediaAttachError::AlreadyAttached(room_name.to_string()));
        }

        let attachment_id = self.next_attachment_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(OUTBOUND_AUDIO_CAPACITY);
        link.attachment = Some((attachment_id, tx));

        Ok(MediaAttachment {
            room_name: room_name.to_string(),
            attachment_id,
            events: link.events.clone(),
            outbound: rx,
        })
    }

    /// Detaches a worker whose socket closed.
    ///
    /// Returns the session's event sender if the link was still registered
    /// under the same attachment, so the caller can report the unsolicited
    /// disconnect. Returns `None` when the session already tore the link down.
    pub fn detach(
        &self,
        room_name: &str,
        attachment_id: u64,
    ) -> Option<mpsc::Sender<TransportEvent>> {
        let mut links = self.links.write().ok()?;
        let link = links.get_mut(room_name)?;
        match &link.attachment {
            Some((id, _)) if *id == attachment_id => {
                link.attachment = None;
                Some(link.events.clone())
            }
            _ => None,
        }
    }

    /// Queues synthesized audio for the room's attached worker.
    pub async fn send_audio(&self, room_name: &str, audio: Vec<u8>) -> Result<(), VoiceError> {
        let sender = {
            let links = self
                .links
                .read()
                .map_err(|_| VoiceError::Connection("media bridge lock poisoned".to_string()))?;
            links
                .get(room_name)
                .and_then(|link| link.attachment.as_ref())
                .map(|(_, tx)| tx.clone())
        };

        let sender = sender.ok_or_else(|| {
            VoiceError::Connection(format!("media for room {} is not attached", room_name))
        })?;

        sender
            .send(audio)
            .await
            .map_err(|_| VoiceError::Connection(format!("media for room {} closed", room_name)))
    }
}

/// The event a worker reports when its socket closes.
pub fn media_closed_event() -> TransportEvent {
    TransportEvent::Disconnected {
        reason: DisconnectReason::MediaClosed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attach_requires_registration() {
        let bridge = MediaBridge::new();
        let err = bridge.attach("room-x").unwrap_err();
        assert_eq!(err, MediaAttachError::UnknownRoom("room-x".to_string()));
    }

    #[tokio::test]
    async fn second_attach_is_rejected() {
        let bridge = MediaBridge::new();
        let (tx, _rx) = mpsc::channel(4);
        bridge.register("room-1", tx).unwrap();

        let _first = bridge.attach("room-1").unwrap();
        let err = bridge.attach("room-1").unwrap_err();
        assert_eq!(err, MediaAttachError::AlreadyAttached("room-1".to_string()));
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let bridge = MediaBridge::new();
        let (tx, _rx) = mpsc::channel(4);
        bridge.register("room-1", tx.clone()).unwrap();
        assert!(bridge.register("room-1", tx).is_err());
    }

    #[tokio::test]
    async fn outbound_audio_reaches_attached_worker() {
        let bridge = MediaBridge::new();
        let (tx, _rx) = mpsc::channel(4);
        bridge.register("room-1", tx).unwrap();

        assert!(bridge.send_audio("room-1", vec![1, 2]).await.is_err());

        let mut attachment = bridge.attach("room-1").unwrap();
        bridge.send_audio("room-1", vec![1, 2, 3]).await.unwrap();
        assert_eq!(attachment.outbound.recv().await, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn unregister_closes_worker_queue_and_suppresses_detach() {
        let bridge = MediaBridge::new();
        let (tx, _rx) = mpsc::channel(4);
        bridge.register("room-1", tx).unwrap();
        let mut attachment = bridge.attach("room-1").unwrap();

        assert!(bridge.unregister("room-1"));
        assert!(!bridge.unregister("room-1"));
        assert_eq!(attachment.outbound.recv().await, None);
        assert!(bridge
            .detach("room-1", attachment.attachment_id)
            .is_none());
    }

    #[tokio::test]
    async fn stale_detach_is_ignored() {
        let bridge = MediaBridge::new();
        let (tx, _rx) = mpsc::channel(4);
        bridge.register("room-1", tx).unwrap();

        let first = bridge.attach("room-1").unwrap();
        assert!(bridge.detach("room-1", first.attachment_id).is_some());
        let second = bridge.attach("room-1").unwrap();

        assert!(bridge.detach("room-1", first.attachment_id).is_none());
        assert!(bridge.is_attached("room-1"));
        assert!(bridge.detach("room-1", second.attachment_id).is_some());
    }
}
