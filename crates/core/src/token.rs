// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token records for the identity service.
//!
//! Refresh tokens are persisted as SHA-256 hashes only; handoff and
//! mono-auth tokens are in-memory and swept on expiry.

use crate::id::{SessionId, WorkspaceId};
use serde::{Deserialize, Serialize};

/// Claims of the workspace access JWT (HS256).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Workspace id.
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    pub iss: String,
    pub aud: String,
    pub jti: String,
}

/// Kind of a stored refresh token record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTokenKind {
    Current,
    Previous,
}

/// Persisted refresh-token record. At most one `current` per workspace; the
/// prior current is referenced by `previous_token_hash` with a short overlap
/// window for in-flight retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// Hex SHA-256 of the raw token.
    pub token_hash: String,
    pub workspace_id: WorkspaceId,
    pub kind: RefreshTokenKind,
    pub expires_at_ms: u64,
    /// Hash of the rotated-out predecessor, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_token_hash: Option<String>,
    /// Instant after which the predecessor is treated as reuse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_valid_until_ms: Option<u64>,
}

/// Single-use token carrying a workspace+session identity across devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffToken {
    pub token: String,
    pub workspace_id: WorkspaceId,
    pub session_id: SessionId,
    pub created_at_ms: u64,
    pub used_at_ms: Option<u64>,
    pub expires_at_ms: u64,
}

impl HandoffToken {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }

    pub fn is_used(&self) -> bool {
        self.used_at_ms.is_some()
    }
}

/// Bootstrap token for mono-user deployments: seeds the first login from a
/// local browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonoAuthToken {
    pub token: String,
    pub workspace_id: WorkspaceId,
    pub expires_at_ms: u64,
}

impl MonoAuthToken {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }
}
