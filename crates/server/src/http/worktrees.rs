// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worktree endpoints.

use super::{owned_session, AuthedWorkspace};
use crate::error::ApiError;
use crate::lifecycle::ServerState;
use crate::metrics::Metrics;
use crate::worktree_service::{CreateWorktreeSpec, MergeOutcome};
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vibe80_core::{
    ProviderKey, SessionEvent, Worktree, WorktreeConfig, WorktreeContext, WorktreeId,
    WorktreeStatus,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorktreeBody {
    pub session_id: String,
    pub provider: ProviderKey,
    #[serde(flatten)]
    pub context: WorktreeContext,
    #[serde(default)]
    pub config: WorktreeConfig,
    #[serde(default)]
    pub color: Option<String>,
}

/// `POST /api/worktree` — create, then spawn its agent supervisor.
pub async fn create(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Json(body): Json<CreateWorktreeBody>,
) -> Result<Json<Worktree>, ApiError> {
    let (workspace, session) = owned_session(&state, &authed, &body.session_id).await?;
    if !workspace.provider_enabled(body.provider) {
        return Err(ApiError::forbidden(format!("provider {} is not enabled", body.provider)));
    }

    let worktree = state
        .worktrees
        .create_worktree(
            &workspace,
            &session,
            CreateWorktreeSpec {
                provider: body.provider,
                context: body.context,
                config: body.config,
                color: body.color,
            },
        )
        .await?;
    Metrics::incr(&state.metrics.worktrees_created);

    let hub = state.routers.hub(session.session_id);
    hub.publish(&SessionEvent::WorktreeCreated { worktree: worktree.clone() });

    // The worktree is alive from birth: spawn its supervisor now so the
    // first `ready` event reaches subscribers.
    state.ensure_supervisor(&workspace, &session, &worktree).await?;
    let _ = state.sessions.touch_activity(&session.session_id).await;
    Ok(Json(worktree))
}

#[derive(Debug, Deserialize)]
pub struct WorktreeQuery {
    pub session: String,
}

/// `DELETE /api/worktree/:id?session=…` — close (refuses `main`).
pub async fn close(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Path(id): Path<String>,
    Query(query): Query<WorktreeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (workspace, session) = owned_session(&state, &authed, &query.session).await?;
    let worktree_id = WorktreeId::new(id);

    // Stop any live supervisor before removing the tree under it.
    if let Some(handle) = state.supervisors.get(&session.session_id, &worktree_id) {
        let _ = handle.shutdown().await;
        state.supervisors.remove(&session.session_id, &worktree_id);
    }

    let closed = state.worktrees.close_worktree(&workspace, &session, &worktree_id).await?;
    let hub = state.routers.hub(session.session_id);
    hub.publish(&SessionEvent::WorktreeClosed { worktree_id: closed.worktree_id.clone() });
    Ok(Json(serde_json::json!({ "closed": closed.worktree_id.as_str() })))
}

/// `GET /api/worktree/:id/diff?session=…`.
pub async fn diff(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Path(id): Path<String>,
    Query(query): Query<WorktreeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (workspace, session) = owned_session(&state, &authed, &query.session).await?;
    let worktree_id = WorktreeId::new(id);
    state.worktrees.get_worktree(&session.session_id, &worktree_id).await?;
    let (status, diff) =
        state.worktrees.diff_snapshot(&workspace, &session, Some(&worktree_id)).await?;
    Ok(Json(serde_json::json!({ "status": status, "diff": diff })))
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub session: String,
    pub path: String,
}

/// `GET /api/worktree/:id/file?session=…&path=…` — confined read.
pub async fn file(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Path(id): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (workspace, session) = owned_session(&state, &authed, &query.session).await?;
    let worktree_id = WorktreeId::new(id);
    state.worktrees.get_worktree(&session.session_id, &worktree_id).await?;
    let content = state
        .worktrees
        .read_file(&workspace, &session, &worktree_id, &query.path)
        .await?;
    Ok(Json(serde_json::json!({ "path": query.path, "content": content })))
}

/// `POST /api/worktree/:id/merge?session=…` — merge back into the default
/// branch; the result is also broadcast as `worktree_merge_result`.
pub async fn merge(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Path(id): Path<String>,
    Query(query): Query<WorktreeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (workspace, session) = owned_session(&state, &authed, &query.session).await?;
    let worktree_id = WorktreeId::new(id);

    let outcome = state.worktrees.merge_worktree(&workspace, &session, &worktree_id).await?;
    let (status, message) = match &outcome {
        MergeOutcome::Merged => (WorktreeStatus::Completed, None),
        MergeOutcome::Conflict { message } => {
            (WorktreeStatus::MergeConflict, Some(message.clone()))
        }
    };
    let hub = state.routers.hub(session.session_id);
    hub.publish(&SessionEvent::WorktreeMergeResult {
        worktree_id: worktree_id.clone(),
        status,
        message: message.clone(),
    });
    Ok(Json(serde_json::json!({
        "status": status,
        "message": message,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ModelsQuery {
    pub provider: ProviderKey,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub provider: ProviderKey,
    pub models: Vec<&'static str>,
}

/// `GET /api/models?provider=…` — the static model catalogue; live agents
/// refine this via `model_list` events.
pub async fn models(
    Query(query): Query<ModelsQuery>,
) -> Result<Json<ModelsResponse>, ApiError> {
    let models = match query.provider {
        ProviderKey::Codex => vec!["gpt-5-codex", "gpt-5", "gpt-5-mini"],
        ProviderKey::Claude => vec!["claude-sonnet-4-5", "claude-opus-4-1", "claude-haiku-4-5"],
    };
    Ok(Json(ModelsResponse { provider: query.provider, models }))
}
