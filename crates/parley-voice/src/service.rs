use crate::config::LiveKitConfig;
use crate::error::VoiceError;
use livekit_api::access_token::{AccessToken, SIPGrants, VideoGrants};
use livekit_api::services::room::{CreateRoomOptions, RoomClient};
use livekit_protocol::Room;
use serde::Serialize;
use std::time::Duration;

/// Timeout for the SIP dial request. Ringing happens after the request
/// returns, so this only bounds the API round trip.
const SIP_DIAL_TIMEOUT: Duration = Duration::from_secs(15);

/// Thin wrapper over the LiveKit server APIs the call transport needs:
/// room provisioning, token issuance, participant listing and removal, and
/// outbound SIP dialing.
#[derive(Debug)]
pub struct LiveKitService {
    config: LiveKitConfig,
    room_client: RoomClient,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CreateSipParticipantRequest<'a> {
    sip_trunk_id: &'a str,
    sip_call_to: &'a str,
    room_name: &'a str,
    participant_identity: &'a str,
    participant_name: &'a str,
    play_ringtone: bool,
}

impl LiveKitService {
    pub fn new(config: LiveKitConfig) -> Self {
        let room_client =
            RoomClient::with_api_key(&config.url, &config.api_key, &config.api_secret);
        Self {
            config,
            room_client,
            http: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.config.url.is_empty()
    }

    pub fn config(&self) -> &LiveKitConfig {
        &self.config
    }

    /// Creates the room, or returns the existing room with the same name.
    pub async fn ensure_room(&self, name: &str) -> Result<Room, VoiceError> {
        let options = CreateRoomOptions::default();

        self.room_client
            .create_room(name, options)
            .await
            .map_err(|e| VoiceError::Connection(e.to_string()))
    }

    pub fn generate_join_token(
        &self,
        room_name: &str,
        participant_identity: &str,
        participant_name: &str,
    ) -> Result<String, VoiceError> {
        let token = AccessToken::with_api_key(&self.config.api_key, &self.config.api_secret)
            .with_identity(participant_identity)
            .with_name(participant_name)
            .with_grants(VideoGrants {
                room_join: true,
                room: room_name.to_string(),
                can_publish: true,
                can_subscribe: true,
                can_publish_data: true,
                ..Default::default()
            })
            .with_ttl(Duration::from_secs(self.config.token_ttl_seconds));

        token.to_jwt().map_err(VoiceError::LiveKit)
    }

    /// Closes the room and disconnects everyone still in it.
    pub async fn delete_room(&self, name: &str) -> Result<(), VoiceError> {
        self.room_client
            .delete_room(name)
            .await
            .map_err(|e| VoiceError::Connection(e.to_string()))
    }

    pub async fn remove_participant(&self, room: &str, identity: &str) -> Result<(), VoiceError> {
        self.room_client
            .remove_participant(room, identity)
            .await
            .map_err(|e| VoiceError::Connection(e.to_string()))
    }

    /// Returns the identities of everyone currently in the room.
    pub async fn participant_identities(&self, room_name: &str) -> Result<Vec<String>, VoiceError> {
        let participants = self
            .room_client
            .list_participants(room_name)
            .await
            .map_err(|e| VoiceError::Connection(e.to_string()))?;
        Ok(participants.into_iter().map(|p| p.identity).collect())
    }

    /// Places an outbound call through the configured SIP trunk. The callee
    /// joins `room_name` as `participant_identity` once they answer.
    pub async fn dial_sip_participant(
        &self,
        room_name: &str,
        phone_number: &str,
        participant_identity: &str,
    ) -> Result<(), VoiceError> {
        if self.config.sip_trunk_id.is_empty() {
            return Err(VoiceError::Connection(
                "no outbound SIP trunk configured (livekit.sip_trunk_id)".to_string(),
            ));
        }

        let token = AccessToken::with_api_key(&self.config.api_key, &self.config.api_secret)
            .with_sip_grants(SIPGrants {
                call: true,
                ..Default::default()
            })
            .with_ttl(SIP_DIAL_TIMEOUT * 4)
            .to_jwt()?;

        let body = CreateSipParticipantRequest {
            sip_trunk_id: &self.config.sip_trunk_id,
            sip_call_to: phone_number,
            room_name,
            participant_identity,
            participant_name: phone_number,
            play_ringtone: true,
        };

        let url = format!(
            "{}/twirp/livekit.SIP/CreateSIPParticipant",
            self.config.http_url()
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .timeout(SIP_DIAL_TIMEOUT)
            .send()
            .await
            .map_err(|e| VoiceError::Connection(format!("SIP dial request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Connection(format!(
                "SIP dial rejected ({}): {}",
                status, detail
            )));
        }

        Ok(())
    }
}
