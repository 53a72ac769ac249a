// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! vibe80-storage: persistence behind a narrow async interface.
//!
//! The [`Storage`] trait is the only mutation path for durable state; the
//! server process never reads workspace files directly. Two backends ship:
//! SQLite (default) and an in-memory map used by tests and ephemeral runs.
//! Message appends are funneled through a single writer per backend, which
//! linearises concurrent appends and keeps per-worktree timestamps strictly
//! monotonic.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use thiserror::Error;
use vibe80_core::{
    AuditEvent, ChatMessage, MessageId, RefreshTokenRecord, Session, SessionId, Workspace,
    WorkspaceId, Worktree, WorktreeId,
};

/// Storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unknown message cursor: {0}")]
    UnknownCursor(String),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("serialization failed: {0}")]
    Serde(String),

    #[error("sqlite error: {0}")]
    Sqlite(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Sqlite(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serde(e.to_string())
    }
}

/// Narrow async persistence interface.
///
/// All implementations must:
/// - serialise appends to the same session's message log (single-writer
///   lane) and keep per-worktree `timestamp_ms` strictly increasing, bumping
///   a late timestamp to `last + 1` when needed;
/// - return messages from `list_messages` in append order;
/// - keep at most one `current` refresh-token row per workspace.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>, StorageError>;
    async fn save_workspace(&self, workspace: &Workspace) -> Result<(), StorageError>;

    async fn list_sessions(&self, workspace_id: &WorkspaceId)
        -> Result<Vec<Session>, StorageError>;
    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StorageError>;
    async fn save_session(&self, session: &Session) -> Result<(), StorageError>;

    /// Append a message; returns the stored message (timestamp may have been
    /// bumped to preserve monotonic ordering).
    async fn append_message(
        &self,
        session_id: &SessionId,
        message: &ChatMessage,
    ) -> Result<ChatMessage, StorageError>;

    /// Messages for one worktree in append order, strictly after the cursor
    /// when given. An unknown cursor is an error (`UnknownCursor`).
    async fn list_messages(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        after: Option<&MessageId>,
    ) -> Result<Vec<ChatMessage>, StorageError>;

    async fn get_worktree(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
    ) -> Result<Option<Worktree>, StorageError>;
    async fn save_worktree(&self, worktree: &Worktree) -> Result<(), StorageError>;
    async fn list_worktrees(&self, session_id: &SessionId) -> Result<Vec<Worktree>, StorageError>;

    async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), StorageError>;
    async fn list_audit_events(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<AuditEvent>, StorageError>;

    async fn save_workspace_refresh_token(
        &self,
        record: &RefreshTokenRecord,
    ) -> Result<(), StorageError>;
    async fn get_workspace_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StorageError>;
    /// The workspace's `current` record, if any.
    async fn get_workspace_refresh_state(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<RefreshTokenRecord>, StorageError>;
    async fn delete_workspace_refresh_token(&self, token_hash: &str)
        -> Result<(), StorageError>;
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
