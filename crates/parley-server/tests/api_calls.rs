mod common;

use axum::http::StatusCode;
use common::{failing_test_app, send, test_app, wait_for_status};
use parley_types::CallStatus;
use serde_json::json;

#[tokio::test]
async fn health_reports_active_calls() {
    let app = test_app();
    let (status, body) = send(&app.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["activeCalls"], 0);

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/calls/inbound",
        Some(json!({ "roomName": "room-42", "callerIdentity": "pstn-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app.router, "GET", "/health", None).await;
    assert_eq!(body["activeCalls"], 1);
}

#[tokio::test]
async fn inbound_call_lifecycle_over_http() {
    let app = test_app();

    let (status, created) = send(
        &app.router,
        "POST",
        "/api/calls/inbound",
        Some(json!({
            "roomName": "room-42",
            "callerIdentity": "pstn-1",
            "callerId": "+15551234567"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["roomName"], "room-42");
    let call_id = created["callId"].as_str().unwrap().to_string();
    assert!(created["botIdentity"].as_str().unwrap().starts_with("parley-bot-"));

    let (status, call) = send(&app.router, "GET", &format!("/api/calls/{call_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(call["id"], call_id.as_str());
    assert_eq!(call["type"], "inbound");
    assert_eq!(call["status"], "connecting");
    assert_eq!(call["counterparty"], "+15551234567");
    assert!(call["lastTranscript"].is_null());

    let (_, list) = send(&app.router, "GET", "/api/calls", None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, ended) = send(
        &app.router,
        "POST",
        &format!("/api/calls/{call_id}/end"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["success"], true);

    wait_for_status(&app.state, &call_id, CallStatus::Ended).await;
    let (_, call) = send(&app.router, "GET", &format!("/api/calls/{call_id}"), None).await;
    assert_eq!(call["status"], "ended");
    assert_eq!(call["endReason"], "requested");

    let (_, again) = send(
        &app.router,
        "POST",
        &format!("/api/calls/{call_id}/end"),
        None,
    )
    .await;
    assert_eq!(again["success"], false);

    let (_, list) = send(&app.router, "GET", "/api/calls", None).await;
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn inbound_accepts_sip_participant_identity() {
    let app = test_app();
    let (status, created) = send(
        &app.router,
        "POST",
        "/api/calls/inbound",
        Some(json!({ "roomName": "room-7", "sipParticipantIdentity": "sip_caller" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let call_id = created["callId"].as_str().unwrap();
    let (_, call) = send(&app.router, "GET", &format!("/api/calls/{call_id}"), None).await;
    assert_eq!(call["counterparty"], "sip_caller");
}

#[tokio::test]
async fn inbound_requires_room_and_caller() {
    let app = test_app();
    let (status, body) = send(
        &app.router,
        "POST",
        "/api/calls/inbound",
        Some(json!({ "roomName": "  ", "callerIdentity": "pstn-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("roomName"));

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/calls/inbound",
        Some(json!({ "roomName": "room-42" })),
    )
    .await;
    assert!(status.is_client_error());
    assert!(app.state.sessions.is_empty());
}

#[tokio::test]
async fn outbound_call_is_created() {
    let app = test_app();
    let (status, created) = send(
        &app.router,
        "POST",
        "/api/calls/outbound",
        Some(json!({
            "phoneNumber": "555-123-4567",
            "initialContext": "Reminder about Tuesday's appointment."
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let call_id = created["callId"].as_str().unwrap();
    assert_eq!(created["roomName"], format!("call-{call_id}"));
    assert!(created.get("botIdentity").is_none());

    let (_, call) = send(&app.router, "GET", &format!("/api/calls/{call_id}"), None).await;
    assert_eq!(call["type"], "outbound");
    assert_eq!(call["counterparty"], "+15551234567");
}

#[tokio::test]
async fn outbound_rejects_invalid_phone_number() {
    let app = test_app();
    for number in ["", "12345", "not-a-number"] {
        let (status, body) = send(
            &app.router,
            "POST",
            "/api/calls/outbound",
            Some(json!({ "phoneNumber": number })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "number {number:?}");
        assert!(body["error"].is_string());
    }
    assert!(app.state.sessions.is_empty());
}

#[tokio::test]
async fn connection_failure_is_bad_gateway() {
    let app = failing_test_app();
    let (status, body) = send(
        &app.router,
        "POST",
        "/api/calls/inbound",
        Some(json!({ "roomName": "room-42", "callerIdentity": "pstn-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("connection failed"));

    // The failed call stays queryable as ended until it is purged.
    assert_eq!(app.state.sessions.len(), 1);
    assert!(app.state.sessions.list_active().is_empty());
}

#[tokio::test]
async fn unknown_call_is_not_found() {
    let app = test_app();
    let (status, body) = send(&app.router, "GET", "/api/calls/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nope"));

    let (status, body) = send(&app.router, "POST", "/api/calls/nope/end", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
}
