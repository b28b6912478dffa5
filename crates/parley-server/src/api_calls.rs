//! Call control handlers.

use crate::AppState;
use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use parley_session::{InboundCall, OutboundCall, SessionError};
use parley_types::CallSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Request body for `POST /api/calls/inbound`, as sent by the telephony
/// webhook when a SIP caller lands in a room.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundCallRequest {
    pub room_name: String,
    #[serde(alias = "sipParticipantIdentity")]
    pub caller_identity: String,
    #[serde(default)]
    pub caller_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundCallResponse {
    pub call_id: String,
    pub room_name: String,
    pub bot_identity: String,
}

/// Request body for `POST /api/calls/outbound`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCallRequest {
    pub phone_number: String,
    #[serde(default)]
    pub initial_context: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCallResponse {
    pub call_id: String,
    pub room_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndCallResponse {
    pub success: bool,
}

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// An upstream provider failed while setting the call up.
    #[error("upstream failure: {0}")]
    BadGateway(String),
    #[error("timed out: {0}")]
    GatewayTimeout(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidPhoneNumber(_) => ApiError::BadRequest(e.to_string()),
            SessionError::NotFound(_) => ApiError::NotFound(e.to_string()),
            SessionError::Connection { .. } => ApiError::BadGateway(e.to_string()),
            SessionError::SetupTimeout { .. } => ApiError::GatewayTimeout(e.to_string()),
            SessionError::Aborted { .. } => ApiError::InternalServerError(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} is required", field)));
    }
    Ok(())
}

/// Handler for `POST /api/calls/inbound`.
pub async fn inbound_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<InboundCallRequest>,
) -> Result<Json<InboundCallResponse>, ApiError> {
    require("roomName", &payload.room_name)?;
    require("callerIdentity", &payload.caller_identity)?;

    let created = state
        .sessions
        .create_inbound(InboundCall {
            room_name: payload.room_name,
            caller_identity: payload.caller_identity,
            caller_id: payload.caller_id,
        })
        .await
        .map_err(|e| {
            tracing::warn!("inbound call setup failed: {}", e);
            ApiError::from(e)
        })?;

    Ok(Json(InboundCallResponse {
        call_id: created.call_id,
        room_name: created.room_name,
        bot_identity: created.bot_identity,
    }))
}

/// Handler for `POST /api/calls/outbound`.
pub async fn outbound_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<OutboundCallRequest>,
) -> Result<Json<OutboundCallResponse>, ApiError> {
    require("phoneNumber", &payload.phone_number)?;

    let created = state
        .sessions
        .create_outbound(OutboundCall {
            phone_number: payload.phone_number,
            initial_context: payload.initial_context,
        })
        .await
        .map_err(|e| {
            tracing::warn!("outbound call setup failed: {}", e);
            ApiError::from(e)
        })?;

    Ok(Json(OutboundCallResponse {
        call_id: created.call_id,
        room_name: created.room_name,
    }))
}

/// Handler for `GET /api/calls`.
pub async fn list_calls_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<Vec<CallSnapshot>> {
    Json(state.sessions.list_active())
}

/// Handler for `GET /api/calls/{callId}`.
pub async fn get_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> Result<Json<CallSnapshot>, ApiError> {
    Ok(Json(state.sessions.get(&call_id)?))
}

/// Handler for `POST /api/calls/{callId}/end`.
///
/// `success` is `false` when the call is unknown or already ended.
pub async fn end_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> Json<EndCallResponse> {
    let success = state.sessions.end(&call_id).await;
    tracing::info!(call_id = %call_id, success, "end call requested");
    Json(EndCallResponse { success })
}
