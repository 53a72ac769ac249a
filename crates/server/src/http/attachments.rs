// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Attachment endpoints.

use super::{owned_session, AuthedWorkspace};
use crate::attachments::AttachmentListing;
use crate::error::ApiError;
use crate::lifecycle::ServerState;
use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;
use vibe80_core::AttachmentMeta;

#[derive(Debug, Deserialize)]
pub struct AttachmentQuery {
    pub session: String,
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub session: String,
}

/// `POST /api/attachments/upload` — multipart with `session` and `file`.
pub async fn upload(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    mut multipart: Multipart,
) -> Result<Json<Vec<AttachmentMeta>>, ApiError> {
    let mut session_field: Option<String> = None;
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("malformed multipart body: {e}")))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("session") => {
                session_field = Some(
                    field
                        .text()
                        .await
                        .map_err(|_| ApiError::validation("malformed session field"))?,
                );
            }
            Some("file") => {
                let name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::validation("file part needs a filename"))?;
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::validation("failed to read file part"))?;
                files.push((name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let session_id =
        session_field.ok_or_else(|| ApiError::validation("session field is required"))?;
    if files.is_empty() {
        return Err(ApiError::validation("at least one file part is required"));
    }
    let (workspace, session) = owned_session(&state, &authed, &session_id).await?;

    let mut saved = Vec::with_capacity(files.len());
    for (name, bytes) in files {
        saved.push(
            state
                .attachments
                .save_upload(&workspace, &session, &name, &bytes)
                .await?,
        );
    }
    let _ = state.sessions.touch_activity(&session.session_id).await;
    Ok(Json(saved))
}

/// `GET /api/attachments/file?session=…&path=…` — confined download.
pub async fn file(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Query(query): Query<AttachmentQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (_, session) = owned_session(&state, &authed, &query.session).await?;
    let bytes = state.attachments.read_attachment(&session, &query.path).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes))
}

/// `GET /api/attachments?session=…` — listing with truncation flag.
pub async fn list(
    State(state): State<Arc<ServerState>>,
    Extension(authed): Extension<AuthedWorkspace>,
    Query(query): Query<ListQuery>,
) -> Result<Json<AttachmentListing>, ApiError> {
    let (_, session) = owned_session(&state, &authed, &query.session).await?;
    Ok(Json(state.attachments.list_attachments(&session).await?))
}
