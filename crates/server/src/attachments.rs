// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Attachments: scoped upload, download, and listing.
//!
//! Uploads stream to disk through the sandbox (`tee` as the workspace user);
//! downloads and listings use the group-read bit the provisioner set on the
//! tree (mode 02750). Every path is confined to the session's attachments
//! directory before anything touches the filesystem.

use crate::error::ApiError;
use crate::worktree_service::confine_path;
use std::path::PathBuf;
use vibe80_core::{AttachmentMeta, Clock, Session, Workspace};
use vibe80_sandbox::{ExecSpec, SandboxInvoker};

/// Directory listings are truncated at this many entries.
pub const MAX_LIST_ENTRIES: usize = 500;

/// Listing plus its truncation marker.
#[derive(Debug, serde::Serialize)]
pub struct AttachmentListing {
    pub attachments: Vec<AttachmentMeta>,
    pub truncated: bool,
}

pub struct AttachmentService<C: Clock> {
    invoker: SandboxInvoker,
    workspace_root: PathBuf,
    #[allow(dead_code)]
    clock: C,
}

impl<C: Clock> AttachmentService<C> {
    pub fn new(invoker: SandboxInvoker, workspace_root: PathBuf, clock: C) -> Self {
        Self { invoker, workspace_root, clock }
    }

    /// Stream an upload to `<attachments>/<name>` as the workspace user.
    pub async fn save_upload(
        &self,
        workspace: &Workspace,
        session: &Session,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<AttachmentMeta, ApiError> {
        let name = sanitize_file_name(file_name)?;
        let attachments_dir = session.attachments_dir(&self.workspace_root);
        let dest = attachments_dir.join(&name);

        let tee = ExecSpec::new(workspace.workspace_id, "tee")
            .arg(dest.to_string_lossy())
            .rw_dir(&attachments_dir);
        self.invoker.run_with_input(&tee, bytes).await?;

        Ok(AttachmentMeta {
            name: name.clone(),
            path: format!(
                "sessions/{}/attachments/{}",
                session.session_id.as_str(),
                name
            ),
            size: bytes.len() as u64,
            mime_type: mime_for(&name).to_string(),
        })
    }

    /// Read one attachment, path-confined, via the group-read permission.
    pub async fn read_attachment(
        &self,
        session: &Session,
        rel_path: &str,
    ) -> Result<Vec<u8>, ApiError> {
        let root = session.attachments_dir(&self.workspace_root);
        let full = confine_path(&root, rel_path)?;
        let canonical = tokio::fs::canonicalize(&full)
            .await
            .map_err(|_| ApiError::not_found("unknown attachment"))?;
        let canonical_root = tokio::fs::canonicalize(&root)
            .await
            .map_err(|_| ApiError::not_found("unknown attachment"))?;
        if !canonical.starts_with(&canonical_root) {
            return Err(ApiError::validation("path escapes the attachments directory"));
        }
        tokio::fs::read(&canonical)
            .await
            .map_err(|_| ApiError::not_found("unknown attachment"))
    }

    /// List attachments, truncating at [`MAX_LIST_ENTRIES`].
    pub async fn list_attachments(
        &self,
        session: &Session,
    ) -> Result<AttachmentListing, ApiError> {
        let root = session.attachments_dir(&self.workspace_root);
        let mut entries = match tokio::fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(_) => {
                return Ok(AttachmentListing { attachments: Vec::new(), truncated: false })
            }
        };
        let mut attachments = Vec::new();
        let mut truncated = false;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if attachments.len() >= MAX_LIST_ENTRIES {
                truncated = true;
                break;
            }
            let Ok(metadata) = entry.metadata().await else { continue };
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            attachments.push(AttachmentMeta {
                path: format!(
                    "sessions/{}/attachments/{}",
                    session.session_id.as_str(),
                    name
                ),
                mime_type: mime_for(&name).to_string(),
                size: metadata.len(),
                name,
            });
        }
        attachments.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(AttachmentListing { attachments, truncated })
    }
}

/// Accept a bare file name only: no separators, no traversal, no hidden
/// control characters.
pub fn sanitize_file_name(name: &str) -> Result<String, ApiError> {
    if name.is_empty() || name.len() > 255 {
        return Err(ApiError::validation("invalid attachment name"));
    }
    if name == "." || name == ".." {
        return Err(ApiError::validation("invalid attachment name"));
    }
    if name.contains(['/', '\\', '\0']) || name.chars().any(char::is_control) {
        return Err(ApiError::validation("invalid attachment name"));
    }
    Ok(name.to_string())
}

/// Minimal extension-based MIME detection.
fn mime_for(name: &str) -> &'static str {
    match name.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("txt") | Some("md") | Some("log") => "text/plain",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        Some("html") => "text/html",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
#[path = "attachments_tests.rs"]
mod tests;
