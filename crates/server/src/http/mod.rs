// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket gateway.
//!
//! Every non-public route passes the bearer middleware, which validates the
//! access token and stashes the caller's workspace id in request extensions;
//! handlers then assert resource ownership through the TTL cache before
//! touching anything.

mod attachments;
mod sessions;
mod workspaces;
mod worktrees;
mod ws;

use crate::error::ApiError;
use crate::lifecycle::ServerState;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use vibe80_core::WorkspaceId;

/// The caller's workspace, as proven by its bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AuthedWorkspace(pub WorkspaceId);

/// Build the full application router.
pub fn build_router(state: Arc<ServerState>) -> Router {
    let public = Router::new()
        .route("/api/workspaces", post(workspaces::create))
        .route("/api/workspaces/login", post(workspaces::login))
        .route("/api/workspaces/refresh", post(workspaces::refresh))
        .route("/api/handoff/consume", post(workspaces::consume_handoff))
        .route("/api/status", get(status));

    let protected = Router::new()
        .route(
            "/api/workspaces/:id",
            get(workspaces::read_config).patch(workspaces::update_config),
        )
        .route("/api/session", post(sessions::create))
        .route("/api/session/:id", get(sessions::get).delete(sessions::delete))
        .route("/api/sessions", get(sessions::list))
        .route("/api/branches", get(sessions::list_branches).post(sessions::create_branch))
        .route("/api/branches/fetch", post(sessions::fetch_branches))
        .route("/api/branches/switch", post(sessions::switch_branch))
        .route("/api/worktree", post(worktrees::create))
        .route("/api/worktree/:id", axum::routing::delete(worktrees::close))
        .route("/api/worktree/:id/diff", get(worktrees::diff))
        .route("/api/worktree/:id/file", get(worktrees::file))
        .route("/api/worktree/:id/merge", post(worktrees::merge))
        .route("/api/models", get(worktrees::models))
        .route("/api/attachments/upload", post(attachments::upload))
        .route("/api/attachments/file", get(attachments::file))
        .route("/api/attachments", get(attachments::list))
        .route("/api/handoff/create", post(workspaces::create_handoff))
        .layer(axum::middleware::from_fn_with_state(Arc::clone(&state), bearer_auth));

    // The socket authenticates itself (query token or auth frame).
    let sockets = Router::new().route("/api/session/:id/ws", get(ws::upgrade));

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(sockets)
        .layer(axum::middleware::from_fn_with_state(Arc::clone(&state), count_requests))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// Bearer-token middleware for the protected surface.
async fn bearer_auth(
    State(state): State<Arc<ServerState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::auth("missing bearer token"))?;
    let workspace_id = state.identity.verify_access(token)?;
    request.extensions_mut().insert(AuthedWorkspace(workspace_id));
    Ok(next.run(request).await)
}

async fn count_requests(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    crate::metrics::Metrics::incr(&state.metrics.http_requests);
    next.run(request).await
}

/// Health/status surface with the metrics snapshot.
async fn status(State(state): State<Arc<ServerState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": if state.is_shutting_down() { "shutting_down" } else { "ok" },
        "metrics": state.metrics.snapshot(),
    }))
}

/// Assert the path id matches the authed workspace.
pub(crate) fn assert_same_workspace(
    authed: &AuthedWorkspace,
    path_id: &str,
) -> Result<WorkspaceId, ApiError> {
    let id = WorkspaceId::parse(path_id)
        .map_err(|_| ApiError::validation("invalid workspace id"))?;
    if id != authed.0 {
        return Err(ApiError::forbidden("workspace mismatch"));
    }
    Ok(id)
}

/// Shared extractor glue: resolve + ownership-check a session by query/body.
pub(crate) async fn owned_session(
    state: &ServerState,
    authed: &AuthedWorkspace,
    session_id: &str,
) -> Result<(vibe80_core::Workspace, vibe80_core::Session), ApiError> {
    let session_id = vibe80_core::SessionId::parse(session_id)
        .map_err(|_| ApiError::validation("invalid session id"))?;
    state.assert_session_owned(&authed.0, &session_id).await?;
    let session = state.sessions.get_session(&session_id).await?;
    let workspace = state.workspaces.get_workspace(&authed.0).await?;
    Ok((workspace, session))
}

