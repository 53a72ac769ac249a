// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace, login/refresh, and handoff endpoints.

use super::{assert_same_workspace, AuthedWorkspace};
use crate::error::ApiError;
use crate::identity::TokenPair;
use crate::lifecycle::ServerState;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vibe80_core::provider::ProviderMap;
use vibe80_core::{AuditKind, SessionId, WorkspaceId};

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceBody {
    #[serde(default)]
    pub providers: ProviderMap,
}

/// `POST /api/workspaces` — create a tenant; the secret appears here once.
pub async fn create(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<CreateWorkspaceBody>,
) -> Result<Json<crate::workspace_service::CreatedWorkspace>, ApiError> {
    if state.is_shutting_down() {
        return Err(ApiError::conflict("server is shutting down"));
    }
    let created = state.workspaces.create_workspace(body.providers).await?;
    Ok(Json(created))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginBody {
    pub workspace_id: String,
    pub workspace_secret: String,
}

/// `POST /api/workspaces/login`.
pub async fn login(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<LoginBody>,
) -> Result<Json<TokenPair>, ApiError> {
    let workspace_id = WorkspaceId::parse(&body.workspace_id)
        .map_err(|_| ApiError::validation("invalid workspace id"))?;
    let verified = state
        .workspaces
        .verify_workspace_secret(&workspace_id, &body.workspace_secret)
        .await
        .unwrap_or(false);
    if !verified {
        state
            .workspaces
            .append_audit_log(&workspace_id, AuditKind::WorkspaceLoginFailed, None)
            .await;
        return Err(ApiError::auth("workspace credentials do not match"));
    }
    state
        .workspaces
        .append_audit_log(&workspace_id, AuditKind::WorkspaceLoginSuccess, None)
        .await;
    let pair = state.identity.issue_tokens(&workspace_id).await?;
    Ok(Json(pair))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshBody {
    pub refresh_token: String,
}

/// `POST /api/workspaces/refresh` — rotate the pair.
pub async fn refresh(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<TokenPair>, ApiError> {
    let pair = state.identity.refresh(&body.refresh_token).await?;
    Ok(Json(pair))
}

/// `GET /api/workspaces/:id` — sanitised config.
pub async fn read_config(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Path(id): Path<String>,
) -> Result<Json<crate::workspace_service::WorkspaceView>, ApiError> {
    let workspace_id = assert_same_workspace(&authed, &id)?;
    Ok(Json(state.workspaces.read_workspace_config(&workspace_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkspaceBody {
    #[serde(default)]
    pub providers: ProviderMap,
}

/// `PATCH /api/workspaces/:id` — merge provider config.
pub async fn update_config(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Path(id): Path<String>,
    Json(body): Json<UpdateWorkspaceBody>,
) -> Result<Json<crate::workspace_service::WorkspaceView>, ApiError> {
    let workspace_id = assert_same_workspace(&authed, &id)?;
    Ok(Json(state.workspaces.update_workspace(&workspace_id, body.providers).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHandoffBody {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHandoffResponse {
    pub token: String,
    pub expires_in: u64,
}

/// `POST /api/handoff/create` — mint a single-use cross-device token.
pub async fn create_handoff(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Json(body): Json<CreateHandoffBody>,
) -> Result<Json<CreateHandoffResponse>, ApiError> {
    let session_id = SessionId::parse(&body.session_id)
        .map_err(|_| ApiError::validation("invalid session id"))?;
    state.assert_session_owned(&authed.0, &session_id).await?;
    let token = state.identity.create_handoff(authed.0, session_id);
    Ok(Json(CreateHandoffResponse {
        token,
        expires_in: crate::identity::HANDOFF_TTL.as_secs(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ConsumeHandoffBody {
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeHandoffResponse {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

/// `POST /api/handoff/consume` — exchange the token for a session identity.
pub async fn consume_handoff(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<ConsumeHandoffBody>,
) -> Result<Json<ConsumeHandoffResponse>, ApiError> {
    let (workspace_id, session_id) = state.identity.consume_handoff(&body.token)?;
    let tokens = state.identity.issue_tokens(&workspace_id).await?;
    Ok(Json(ConsumeHandoffResponse { session_id, tokens }))
}
