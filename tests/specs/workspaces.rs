// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace config endpoints: sanitised read-back and the active-provider
//! guard on PATCH.

use crate::support::*;
use axum::http::StatusCode;

#[tokio::test]
async fn read_back_is_sanitised() {
    let host = host().await;
    seed_workspace(&host.state, ws_id()).await;
    let (access, _) = login(&host, ws_id()).await;

    let (status, body) = request(
        &host,
        "GET",
        &format!("/api/workspaces/{}", ws_id().as_str()),
        Some(&access),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let codex = &body["providers"]["codex"];
    assert_eq!(codex["enabled"], true);
    assert_eq!(codex["auth"]["hasValue"], true);
    assert!(body.to_string().find("sk-test").is_none(), "secret leaked: {body}");
}

#[tokio::test]
async fn reading_a_foreign_workspace_is_forbidden() {
    let host = host().await;
    seed_workspace(&host.state, ws_id()).await;
    seed_workspace(&host.state, other_ws_id()).await;
    let (access, _) = login(&host, ws_id()).await;

    let (status, _) = request(
        &host,
        "GET",
        &format!("/api/workspaces/{}", other_ws_id().as_str()),
        Some(&access),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn disabling_a_provider_with_active_sessions_is_refused() {
    let host = host().await;
    seed_workspace(&host.state, ws_id()).await;
    // The seeded session's main worktree runs on codex.
    seed_session(&host.state, ws_id(), session_id()).await;
    let (access, _) = login(&host, ws_id()).await;

    let (status, body) = request(
        &host,
        "PATCH",
        &format!("/api/workspaces/{}", ws_id().as_str()),
        Some(&access),
        Some(serde_json::json!({ "providers": { "codex": { "enabled": false } } })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Provider cannot be disabled: active sessions use it.");

    // Stored config unchanged.
    let stored = host.state.storage.get_workspace(&ws_id()).await.unwrap().unwrap();
    assert!(stored.provider_enabled(vibe80_core::ProviderKey::Codex));
}

#[tokio::test]
async fn disabling_without_active_sessions_succeeds() {
    let host = host().await;
    seed_workspace(&host.state, ws_id()).await;
    let (access, _) = login(&host, ws_id()).await;

    let (status, body) = request(
        &host,
        "PATCH",
        &format!("/api/workspaces/{}", ws_id().as_str()),
        Some(&access),
        Some(serde_json::json!({ "providers": { "codex": { "enabled": false } } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["providers"]["codex"]["enabled"], false);
}
