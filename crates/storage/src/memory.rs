// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory storage backend.
//!
//! Used by the test suites and by ephemeral mono-user runs. State lives in a
//! single mutex, which trivially provides the single-writer lane.

use crate::{Storage, StorageError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use vibe80_core::{
    AuditEvent, ChatMessage, MessageId, RefreshTokenKind, RefreshTokenRecord, Session, SessionId,
    Workspace, WorkspaceId, Worktree, WorktreeId,
};

#[derive(Default)]
struct State {
    workspaces: HashMap<WorkspaceId, Workspace>,
    sessions: HashMap<SessionId, Session>,
    /// (session, seq) ordered append log.
    messages: Vec<(SessionId, u64, ChatMessage)>,
    next_seq: u64,
    worktrees: HashMap<(SessionId, WorktreeId), Worktree>,
    audit: Vec<AuditEvent>,
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
}

/// HashMap-backed storage.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>, StorageError> {
        Ok(self.state.lock().workspaces.get(id).cloned())
    }

    async fn save_workspace(&self, workspace: &Workspace) -> Result<(), StorageError> {
        self.state.lock().workspaces.insert(workspace.workspace_id, workspace.clone());
        Ok(())
    }

    async fn list_sessions(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<Session>, StorageError> {
        let state = self.state.lock();
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.workspace_id == *workspace_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity_at_ms.cmp(&a.last_activity_at_ms));
        Ok(sessions)
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StorageError> {
        Ok(self.state.lock().sessions.get(id).cloned())
    }

    async fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        self.state.lock().sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn append_message(
        &self,
        session_id: &SessionId,
        message: &ChatMessage,
    ) -> Result<ChatMessage, StorageError> {
        let mut state = self.state.lock();
        let last_ts = state
            .messages
            .iter()
            .rev()
            .find(|(sid, _, m)| sid == session_id && m.worktree_id == message.worktree_id)
            .map(|(_, _, m)| m.timestamp_ms);
        let mut stored = message.clone();
        if let Some(last) = last_ts {
            if stored.timestamp_ms <= last {
                stored.timestamp_ms = last + 1;
            }
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.messages.push((*session_id, seq, stored.clone()));
        Ok(stored)
    }

    async fn list_messages(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        after: Option<&MessageId>,
    ) -> Result<Vec<ChatMessage>, StorageError> {
        let state = self.state.lock();
        let cursor_seq = match after {
            Some(id) => Some(
                state
                    .messages
                    .iter()
                    .find(|(sid, _, m)| sid == session_id && m.id == *id)
                    .map(|(_, seq, _)| *seq)
                    .ok_or_else(|| StorageError::UnknownCursor(id.to_string()))?,
            ),
            None => None,
        };
        Ok(state
            .messages
            .iter()
            .filter(|(sid, seq, m)| {
                sid == session_id
                    && m.worktree_id == *worktree_id
                    && cursor_seq.map_or(true, |c| *seq > c)
            })
            .map(|(_, _, m)| m.clone())
            .collect())
    }

    async fn get_worktree(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
    ) -> Result<Option<Worktree>, StorageError> {
        Ok(self
            .state
            .lock()
            .worktrees
            .get(&(*session_id, worktree_id.clone()))
            .cloned())
    }

    async fn save_worktree(&self, worktree: &Worktree) -> Result<(), StorageError> {
        self.state
            .lock()
            .worktrees
            .insert((worktree.session_id, worktree.worktree_id.clone()), worktree.clone());
        Ok(())
    }

    async fn list_worktrees(&self, session_id: &SessionId) -> Result<Vec<Worktree>, StorageError> {
        let state = self.state.lock();
        let mut worktrees: Vec<Worktree> = state
            .worktrees
            .values()
            .filter(|w| w.session_id == *session_id)
            .cloned()
            .collect();
        worktrees.sort_by_key(|w| w.created_at_ms);
        Ok(worktrees)
    }

    async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), StorageError> {
        self.state.lock().audit.push(event.clone());
        Ok(())
    }

    async fn list_audit_events(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<AuditEvent>, StorageError> {
        Ok(self
            .state
            .lock()
            .audit
            .iter()
            .filter(|e| e.workspace_id == *workspace_id)
            .cloned()
            .collect())
    }

    async fn save_workspace_refresh_token(
        &self,
        record: &RefreshTokenRecord,
    ) -> Result<(), StorageError> {
        self.state.lock().refresh_tokens.insert(record.token_hash.clone(), record.clone());
        Ok(())
    }

    async fn get_workspace_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StorageError> {
        Ok(self.state.lock().refresh_tokens.get(token_hash).cloned())
    }

    async fn get_workspace_refresh_state(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<RefreshTokenRecord>, StorageError> {
        Ok(self
            .state
            .lock()
            .refresh_tokens
            .values()
            .find(|r| r.workspace_id == *workspace_id && r.kind == RefreshTokenKind::Current)
            .cloned())
    }

    async fn delete_workspace_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<(), StorageError> {
        self.state.lock().refresh_tokens.remove(token_hash);
        Ok(())
    }
}
