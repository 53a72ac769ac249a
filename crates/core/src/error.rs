// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error classification shared by every crate that surfaces failures to the
//! gateway. Each kind maps to exactly one HTTP status; the mapping lives here
//! so the REST layer and the WebSocket layer cannot drift apart.

use serde::{Deserialize, Serialize};

/// Classified failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid ids, missing body fields, disabling a provider with active
    /// sessions, path escape attempts.
    Validation,
    /// Missing/invalid/expired access token; credential mismatch; refresh reuse.
    Auth,
    /// Cross-workspace access; action disallowed by sandbox policy.
    Forbidden,
    /// Unknown session, worktree, attachment, message cursor.
    NotFound,
    /// Worktree quota reached; user message while processing.
    Conflict,
    /// Git clone failed; agent failed to spawn. Not retried automatically.
    External,
    /// Storage unavailable; unexpected exception.
    Internal,
}

impl ErrorKind {
    /// HTTP status for this kind.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Auth => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::External => 502,
            ErrorKind::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::External => "external",
            ErrorKind::Internal => "internal",
        })
    }
}
