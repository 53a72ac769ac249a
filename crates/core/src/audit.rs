// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only audit records.

use crate::id::WorkspaceId;
use serde::{Deserialize, Serialize};

/// Audited event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    WorkspaceLoginSuccess,
    WorkspaceLoginFailed,
    WorkspaceSecretRotated,
    WorkspaceUpdated,
    SessionCreated,
    WorktreeCreated,
    WorktreeClosed,
    AgentSpawnFailed,
    RefreshTokenReused,
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AuditKind::WorkspaceLoginSuccess => "workspace_login_success",
            AuditKind::WorkspaceLoginFailed => "workspace_login_failed",
            AuditKind::WorkspaceSecretRotated => "workspace_secret_rotated",
            AuditKind::WorkspaceUpdated => "workspace_updated",
            AuditKind::SessionCreated => "session_created",
            AuditKind::WorktreeCreated => "worktree_created",
            AuditKind::WorktreeClosed => "worktree_closed",
            AuditKind::AgentSpawnFailed => "agent_spawn_failed",
            AuditKind::RefreshTokenReused => "refresh_token_reused",
        })
    }
}

/// One appended audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub ts_ms: u64,
    pub workspace_id: WorkspaceId,
    pub event: AuditKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
