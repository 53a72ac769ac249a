// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session and branch endpoints.

use super::{owned_session, AuthedWorkspace};
use crate::error::ApiError;
use crate::lifecycle::ServerState;
use crate::metrics::Metrics;
use crate::session_service::CloneAuth;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vibe80_core::{Session, Worktree};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    pub repo_url: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Workspace-relative SSH key for the clone, if the repo needs one.
    #[serde(default)]
    pub ssh_key_path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    #[serde(flatten)]
    pub session: Session,
    pub worktrees: Vec<Worktree>,
    pub messages: Vec<vibe80_core::ChatMessage>,
}

/// `POST /api/session` — clone the repo and seed the main worktree.
pub async fn create(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Json(body): Json<CreateSessionBody>,
) -> Result<Json<SessionResponse>, ApiError> {
    if state.is_shutting_down() {
        return Err(ApiError::conflict("server is shutting down"));
    }
    let workspace = state.workspaces.get_workspace(&authed.0).await?;
    let auth = CloneAuth {
        ssh_key_path: body
            .ssh_key_path
            .map(|p| {
                crate::worktree_service::confine_path(
                    &state.config.workspace_root.join(workspace.workspace_id.as_str()),
                    &p,
                )
            })
            .transpose()?,
    };
    let (session, main) = state
        .sessions
        .create_session(&workspace, &body.repo_url, body.name, auth)
        .await?;
    Metrics::incr(&state.metrics.sessions_created);
    Ok(Json(SessionResponse { session, worktrees: vec![main], messages: Vec::new() }))
}

/// `GET /api/session/:id`.
pub async fn get(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let (_, session) = owned_session(&state, &authed, &id).await?;
    let worktrees = state.worktrees.list_worktrees(&session.session_id).await?;
    Ok(Json(SessionResponse { session, worktrees, messages: Vec::new() }))
}

/// `DELETE /api/session/:id` — soft delete.
pub async fn delete(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (_, session) = owned_session(&state, &authed, &id).await?;
    state.sessions.delete_session(&session.session_id).await?;
    state.ownership.invalidate(&session.session_id);
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// `GET /api/sessions` — the caller's sessions, most recent first.
pub async fn list(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
) -> Result<Json<Vec<Session>>, ApiError> {
    Ok(Json(state.sessions.list_sessions(&authed.0).await?))
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session: String,
}

/// `GET /api/branches?session=…`.
pub async fn list_branches(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let (workspace, session) = owned_session(&state, &authed, &query.session).await?;
    Ok(Json(state.worktrees.list_branches(&workspace, &session).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateBranchBody {
    pub session: String,
    pub name: String,
}

/// `POST /api/branches`.
pub async fn create_branch(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Json(body): Json<CreateBranchBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (workspace, session) = owned_session(&state, &authed, &body.session).await?;
    state.worktrees.create_branch(&workspace, &session, &body.name).await?;
    Ok(Json(serde_json::json!({ "created": body.name })))
}

#[derive(Debug, Deserialize)]
pub struct FetchBody {
    pub session: String,
}

/// `POST /api/branches/fetch`.
pub async fn fetch_branches(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Json(body): Json<FetchBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (workspace, session) = owned_session(&state, &authed, &body.session).await?;
    state.worktrees.fetch(&workspace, &session).await?;
    Ok(Json(serde_json::json!({ "fetched": true })))
}

#[derive(Debug, Deserialize)]
pub struct SwitchBranchBody {
    pub session: String,
    pub branch: String,
}

/// `POST /api/branches/switch` — main clone only.
pub async fn switch_branch(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Json(body): Json<SwitchBranchBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (workspace, session) = owned_session(&state, &authed, &body.session).await?;
    state.worktrees.switch_branch(&workspace, &session, &body.branch).await?;
    let _ = state.sessions.touch_activity(&session.session_id).await;
    Ok(Json(serde_json::json!({ "branch": body.branch })))
}
