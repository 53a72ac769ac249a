// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Login, refresh rotation, and handoff over the HTTP surface.

use crate::support::*;
use axum::http::StatusCode;
use vibe80_core::AuditKind;

#[tokio::test]
async fn login_returns_a_token_pair_and_audits() {
    let host = host().await;
    seed_workspace(&host.state, ws_id()).await;

    let (access, refresh) = login(&host, ws_id()).await;
    assert!(!access.is_empty());
    assert!(!refresh.is_empty());

    let audit = host.state.storage.list_audit_events(&ws_id()).await.unwrap();
    assert!(audit.iter().any(|e| e.event == AuditKind::WorkspaceLoginSuccess));
}

#[tokio::test]
async fn login_with_wrong_secret_is_refused_and_audited() {
    let host = host().await;
    seed_workspace(&host.state, ws_id()).await;

    let (status, body) = request(
        &host,
        "POST",
        "/api/workspaces/login",
        None,
        Some(serde_json::json!({
            "workspaceId": ws_id().as_str(),
            "workspaceSecret": "wrong",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("credentials"));

    let audit = host.state.storage.list_audit_events(&ws_id()).await.unwrap();
    assert!(audit.iter().any(|e| e.event == AuditKind::WorkspaceLoginFailed));
}

#[tokio::test]
async fn refresh_rotates_and_reuse_is_detected() {
    let host = host().await;
    seed_workspace(&host.state, ws_id()).await;
    let (_, refresh_0) = login(&host, ws_id()).await;

    // First refresh: a new pair.
    let (status, body) = request(
        &host,
        "POST",
        "/api/workspaces/refresh",
        None,
        Some(serde_json::json!({ "refreshToken": refresh_0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let refresh_1 = body["refreshToken"].as_str().unwrap().to_string();
    assert_ne!(refresh_0, refresh_1);

    // Replaying the rotated-out token: 401 refresh_token_reused + audit.
    let (status, body) = request(
        &host,
        "POST",
        "/api/workspaces/refresh",
        None,
        Some(serde_json::json!({ "refreshToken": refresh_0 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "refresh_token_reused");

    let audit = host.state.storage.list_audit_events(&ws_id()).await.unwrap();
    assert!(audit.iter().any(|e| e.event == AuditKind::RefreshTokenReused));

    // The rotated-in token still works.
    let (status, _) = request(
        &host,
        "POST",
        "/api/workspaces/refresh",
        None,
        Some(serde_json::json!({ "refreshToken": refresh_1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_refresh_token_is_invalid() {
    let host = host().await;
    let (status, body) = request(
        &host,
        "POST",
        "/api/workspaces/refresh",
        None,
        Some(serde_json::json!({ "refreshToken": "deadbeef" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_refresh_token");
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() {
    let host = host().await;
    let (status, _) = request(&host, "GET", "/api/sessions", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = request(&host, "GET", "/api/sessions", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn handoff_is_single_use() {
    let host = host().await;
    seed_workspace(&host.state, ws_id()).await;
    seed_session(&host.state, ws_id(), session_id()).await;
    let (access, _) = login(&host, ws_id()).await;

    let (status, body) = request(
        &host,
        "POST",
        "/api/handoff/create",
        Some(&access),
        Some(serde_json::json!({ "sessionId": session_id().as_str() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = request(
        &host,
        "POST",
        "/api/handoff/consume",
        None,
        Some(serde_json::json!({ "token": token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], session_id().as_str());
    assert!(body["accessToken"].as_str().is_some());

    // Second consume: refused.
    let (status, body) = request(
        &host,
        "POST",
        "/api/handoff/consume",
        None,
        Some(serde_json::json!({ "token": token })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid");
}

#[tokio::test]
async fn handoff_for_foreign_session_is_refused() {
    let host = host().await;
    seed_workspace(&host.state, ws_id()).await;
    seed_workspace(&host.state, other_ws_id()).await;
    seed_session(&host.state, other_ws_id(), session_id()).await;
    let (access, _) = login(&host, ws_id()).await;

    let (status, _) = request(
        &host,
        "POST",
        "/api/handoff/create",
        Some(&access),
        Some(serde_json::json!({ "sessionId": session_id().as_str() })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
