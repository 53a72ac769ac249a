// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace metadata file handling and uid/gid resolution.
//!
//! The provisioner writes `metadata/workspace.json` at creation time; the
//! `run-as` helper resolves the workspace user from the name service first
//! and falls back to this file (NSS caches can lag right after useradd).

use crate::SandboxError;
use std::path::{Path, PathBuf};
use vibe80_core::{WorkspaceId, WorkspaceMetadata};

/// Path of the metadata file for a workspace.
pub fn metadata_path(workspace_root: &Path, workspace_id: &WorkspaceId) -> PathBuf {
    workspace_root
        .join(workspace_id.as_str())
        .join("metadata")
        .join("workspace.json")
}

/// Read and parse a workspace metadata file.
pub fn read_metadata(path: &Path) -> Result<WorkspaceMetadata, SandboxError> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| SandboxError::UserResolution(format!("bad metadata file: {e}")))
}

/// Write a workspace metadata file (provisioner side).
pub fn write_metadata(path: &Path, metadata: &WorkspaceMetadata) -> Result<(), SandboxError> {
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| SandboxError::UserResolution(format!("serialize metadata: {e}")))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Resolve the uid/gid for a workspace.
///
/// Name-service lookup first; on miss, the workspace's metadata file. The
/// metadata fallback only trusts a file whose embedded id matches.
pub fn resolve_workspace_user(
    workspace_id: &WorkspaceId,
    workspace_root: &Path,
) -> Result<(u32, u32), SandboxError> {
    if let Ok(Some(user)) = nix::unistd::User::from_name(workspace_id.as_str()) {
        return Ok((user.uid.as_raw(), user.gid.as_raw()));
    }
    let path = metadata_path(workspace_root, workspace_id);
    let metadata = read_metadata(&path).map_err(|_| {
        SandboxError::UserResolution(format!(
            "workspace user {} not found and no metadata file",
            workspace_id
        ))
    })?;
    if metadata.workspace_id != *workspace_id {
        return Err(SandboxError::UserResolution(format!(
            "metadata file id mismatch: {} != {}",
            metadata.workspace_id, workspace_id
        )));
    }
    Ok((metadata.uid, metadata.gid))
}

#[cfg(test)]
#[path = "metadata_tests.rs"]
mod tests;
