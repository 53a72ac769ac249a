// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session listing, ownership, and the path-confinement boundary.

use crate::support::*;
use axum::http::StatusCode;

#[tokio::test]
async fn sessions_are_listed_per_workspace() {
    let host = host().await;
    seed_workspace(&host.state, ws_id()).await;
    seed_workspace(&host.state, other_ws_id()).await;
    seed_session(&host.state, ws_id(), session_id()).await;
    let (access, _) = login(&host, ws_id()).await;
    let (other_access, _) = login(&host, other_ws_id()).await;

    let (status, body) = request(&host, "GET", "/api/sessions", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) =
        request(&host, "GET", "/api/sessions", Some(&other_access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn cross_workspace_session_access_is_forbidden() {
    let host = host().await;
    seed_workspace(&host.state, ws_id()).await;
    seed_workspace(&host.state, other_ws_id()).await;
    seed_session(&host.state, ws_id(), session_id()).await;
    let (other_access, _) = login(&host, other_ws_id()).await;

    let (status, _) = request(
        &host,
        "GET",
        &format!("/api/session/{}", session_id().as_str()),
        Some(&other_access),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let host = host().await;
    seed_workspace(&host.state, ws_id()).await;
    let (access, _) = login(&host, ws_id()).await;
    let (status, _) = request(
        &host,
        "GET",
        "/api/session/sffffffffffffffffffffffff",
        Some(&access),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_view_includes_active_worktrees() {
    let host = host().await;
    seed_workspace(&host.state, ws_id()).await;
    seed_session(&host.state, ws_id(), session_id()).await;
    let (access, _) = login(&host, ws_id()).await;

    let (status, body) = request(
        &host,
        "GET",
        &format!("/api/session/{}", session_id().as_str()),
        Some(&access),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let worktrees = body["worktrees"].as_array().unwrap();
    assert_eq!(worktrees.len(), 1);
    assert_eq!(worktrees[0]["worktree_id"], "main");
}

#[tokio::test]
async fn worktree_file_read_refuses_path_escapes() {
    let host = host().await;
    seed_workspace(&host.state, ws_id()).await;
    seed_session(&host.state, ws_id(), session_id()).await;
    let (access, _) = login(&host, ws_id()).await;

    for path in ["../../etc/passwd", "/etc/passwd", "a/../../b"] {
        let (status, body) = request(
            &host,
            "GET",
            &format!(
                "/api/worktree/main/file?session={}&path={}",
                session_id().as_str(),
                urlencode(path)
            ),
            Some(&access),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "path {path} must be refused: {body}");
    }
}

#[tokio::test]
async fn deleting_a_session_hides_it() {
    let host = host().await;
    seed_workspace(&host.state, ws_id()).await;
    seed_session(&host.state, ws_id(), session_id()).await;
    let (access, _) = login(&host, ws_id()).await;

    let (status, _) = request(
        &host,
        "DELETE",
        &format!("/api/session/{}", session_id().as_str()),
        Some(&access),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(
        &host,
        "GET",
        &format!("/api/session/{}", session_id().as_str()),
        Some(&access),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn urlencode(s: &str) -> String {
    s.replace('/', "%2F").replace("..", "%2E%2E")
}
