// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session record: one Git clone bound to a workspace.
//!
//! The session owns a fixed directory layout under the workspace root; all
//! paths are derived, never stored, so a record cannot point outside its
//! workspace.

use crate::id::{SessionId, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A session: a Git clone plus its worktrees, attachments, and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub workspace_id: WorkspaceId,
    pub repo_url: String,
    pub name: String,
    pub created_at_ms: u64,
    pub last_activity_at_ms: u64,
    /// Soft-delete marker; deleted sessions are hidden from listings but
    /// their directory tree is left for the workspace owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at_ms: Option<u64>,
}

impl Session {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at_ms.is_some()
    }

    /// `<workspace_root>/<workspaceId>/sessions/<sessionId>/`
    pub fn session_dir(&self, workspace_root: &Path) -> PathBuf {
        workspace_root
            .join(self.workspace_id.as_str())
            .join("sessions")
            .join(self.session_id.as_str())
    }

    /// The Git clone directory.
    pub fn repository_dir(&self, workspace_root: &Path) -> PathBuf {
        self.session_dir(workspace_root).join("repository")
    }

    pub fn attachments_dir(&self, workspace_root: &Path) -> PathBuf {
        self.session_dir(workspace_root).join("attachments")
    }

    pub fn worktrees_dir(&self, workspace_root: &Path) -> PathBuf {
        self.session_dir(workspace_root).join("worktrees")
    }

    pub fn logs_dir(&self, workspace_root: &Path) -> PathBuf {
        self.session_dir(workspace_root).join("logs")
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
