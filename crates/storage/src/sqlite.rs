// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite storage backend.
//!
//! rusqlite is synchronous, so all access runs on one dedicated thread that
//! drains a channel of closures; async callers get their result back over a
//! oneshot. One thread means one writer, which is exactly the single-writer
//! lane the message log needs. Records are stored as JSON blobs beside the
//! columns used for lookups; the schema stays dumb and the serde types stay
//! the source of truth.

use crate::{Storage, StorageError};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use vibe80_core::{
    AuditEvent, ChatMessage, MessageId, RefreshTokenKind, RefreshTokenRecord, Session, SessionId,
    Workspace, WorkspaceId, Worktree, WorktreeId,
};

type DbJob = Box<dyn FnOnce(&mut Connection) + Send>;

/// SQLite-backed storage with a dedicated writer thread.
pub struct SqliteStorage {
    tx: std::sync::mpsc::Sender<DbJob>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS workspaces (
    workspace_id TEXT PRIMARY KEY,
    record       TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sessions (
    session_id   TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    record       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS sessions_by_workspace ON sessions (workspace_id);
CREATE TABLE IF NOT EXISTS worktrees (
    session_id  TEXT NOT NULL,
    worktree_id TEXT NOT NULL,
    record      TEXT NOT NULL,
    PRIMARY KEY (session_id, worktree_id)
);
CREATE TABLE IF NOT EXISTS messages (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id  TEXT NOT NULL UNIQUE,
    session_id  TEXT NOT NULL,
    worktree_id TEXT NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    record      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_by_worktree ON messages (session_id, worktree_id, seq);
CREATE TABLE IF NOT EXISTS refresh_tokens (
    token_hash   TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    kind         TEXT NOT NULL,
    record       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS refresh_tokens_by_workspace ON refresh_tokens (workspace_id, kind);
CREATE TABLE IF NOT EXISTS audit_events (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    workspace_id TEXT NOT NULL,
    record       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS audit_by_workspace ON audit_events (workspace_id, seq);
";

impl SqliteStorage {
    /// Open (or create) the database at `path` and start the writer thread.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Unavailable(format!("create {}: {e}", parent.display())))?;
        }
        let mut conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;

        let (tx, rx) = std::sync::mpsc::channel::<DbJob>();
        std::thread::Builder::new()
            .name("vibe80-sqlite".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job(&mut conn);
                }
            })
            .map_err(|e| StorageError::Unavailable(format!("spawn writer thread: {e}")))?;

        Ok(Self { tx })
    }

    /// Run a closure on the writer thread and await its result.
    async fn call<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        self.tx
            .send(Box::new(move |conn| {
                let _ = reply_tx.send(f(conn));
            }))
            .map_err(|_| StorageError::Unavailable("writer thread gone".to_string()))?;
        reply_rx
            .await
            .map_err(|_| StorageError::Unavailable("writer thread dropped reply".to_string()))?
    }
}

fn row_to<T: serde::de::DeserializeOwned>(record: String) -> Result<T, StorageError> {
    Ok(serde_json::from_str(&record)?)
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>, StorageError> {
        let id = id.to_string();
        self.call(move |conn| {
            let record: Option<String> = conn
                .query_row(
                    "SELECT record FROM workspaces WHERE workspace_id = ?1",
                    [&id],
                    |row| row.get(0),
                )
                .optional()?;
            record.map(row_to).transpose()
        })
        .await
    }

    async fn save_workspace(&self, workspace: &Workspace) -> Result<(), StorageError> {
        let id = workspace.workspace_id.to_string();
        let record = serde_json::to_string(workspace)?;
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO workspaces (workspace_id, record) VALUES (?1, ?2)
                 ON CONFLICT(workspace_id) DO UPDATE SET record = excluded.record",
                [&id, &record],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_sessions(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<Session>, StorageError> {
        let id = workspace_id.to_string();
        self.call(move |conn| {
            let mut stmt =
                conn.prepare("SELECT record FROM sessions WHERE workspace_id = ?1")?;
            let rows = stmt.query_map([&id], |row| row.get::<_, String>(0))?;
            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row_to::<Session>(row?)?);
            }
            sessions.sort_by(|a: &Session, b: &Session| {
                b.last_activity_at_ms.cmp(&a.last_activity_at_ms)
            });
            Ok(sessions)
        })
        .await
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StorageError> {
        let id = id.to_string();
        self.call(move |conn| {
            let record: Option<String> = conn
                .query_row("SELECT record FROM sessions WHERE session_id = ?1", [&id], |row| {
                    row.get(0)
                })
                .optional()?;
            record.map(row_to).transpose()
        })
        .await
    }

    async fn save_session(&self, session: &Session) -> Result<(), StorageError> {
        let id = session.session_id.to_string();
        let workspace_id = session.workspace_id.to_string();
        let record = serde_json::to_string(session)?;
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO sessions (session_id, workspace_id, record) VALUES (?1, ?2, ?3)
                 ON CONFLICT(session_id) DO UPDATE SET record = excluded.record",
                [&id, &workspace_id, &record],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_message(
        &self,
        session_id: &SessionId,
        message: &ChatMessage,
    ) -> Result<ChatMessage, StorageError> {
        let session_id = session_id.to_string();
        let mut stored = message.clone();
        self.call(move |conn| {
            let last_ts: Option<u64> = conn
                .query_row(
                    "SELECT timestamp_ms FROM messages
                     WHERE session_id = ?1 AND worktree_id = ?2
                     ORDER BY seq DESC LIMIT 1",
                    [&session_id, stored.worktree_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(last) = last_ts {
                if stored.timestamp_ms <= last {
                    stored.timestamp_ms = last + 1;
                }
            }
            let record = serde_json::to_string(&stored)?;
            conn.execute(
                "INSERT INTO messages (message_id, session_id, worktree_id, timestamp_ms, record)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    stored.id.as_str(),
                    &session_id,
                    stored.worktree_id.as_str(),
                    stored.timestamp_ms,
                    &record,
                ],
            )?;
            Ok(stored)
        })
        .await
    }

    async fn list_messages(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
        after: Option<&MessageId>,
    ) -> Result<Vec<ChatMessage>, StorageError> {
        let session_id = session_id.to_string();
        let worktree_id = worktree_id.as_str().to_string();
        let after = after.map(|id| id.to_string());
        self.call(move |conn| {
            let cursor_seq: Option<i64> = match &after {
                Some(id) => Some(
                    conn.query_row(
                        "SELECT seq FROM messages WHERE session_id = ?1 AND message_id = ?2",
                        [&session_id, id],
                        |row| row.get(0),
                    )
                    .optional()?
                    .ok_or_else(|| StorageError::UnknownCursor(id.clone()))?,
                ),
                None => None,
            };
            let mut stmt = conn.prepare(
                "SELECT record FROM messages
                 WHERE session_id = ?1 AND worktree_id = ?2 AND seq > ?3
                 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![&session_id, &worktree_id, cursor_seq.unwrap_or(-1)],
                |row| row.get::<_, String>(0),
            )?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(row_to::<ChatMessage>(row?)?);
            }
            Ok(messages)
        })
        .await
    }

    async fn get_worktree(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
    ) -> Result<Option<Worktree>, StorageError> {
        let session_id = session_id.to_string();
        let worktree_id = worktree_id.as_str().to_string();
        self.call(move |conn| {
            let record: Option<String> = conn
                .query_row(
                    "SELECT record FROM worktrees WHERE session_id = ?1 AND worktree_id = ?2",
                    [&session_id, &worktree_id],
                    |row| row.get(0),
                )
                .optional()?;
            record.map(row_to).transpose()
        })
        .await
    }

    async fn save_worktree(&self, worktree: &Worktree) -> Result<(), StorageError> {
        let session_id = worktree.session_id.to_string();
        let worktree_id = worktree.worktree_id.as_str().to_string();
        let record = serde_json::to_string(worktree)?;
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO worktrees (session_id, worktree_id, record) VALUES (?1, ?2, ?3)
                 ON CONFLICT(session_id, worktree_id) DO UPDATE SET record = excluded.record",
                [&session_id, &worktree_id, &record],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_worktrees(&self, session_id: &SessionId) -> Result<Vec<Worktree>, StorageError> {
        let session_id = session_id.to_string();
        self.call(move |conn| {
            let mut stmt =
                conn.prepare("SELECT record FROM worktrees WHERE session_id = ?1")?;
            let rows = stmt.query_map([&session_id], |row| row.get::<_, String>(0))?;
            let mut worktrees = Vec::new();
            for row in rows {
                worktrees.push(row_to::<Worktree>(row?)?);
            }
            worktrees.sort_by_key(|w: &Worktree| w.created_at_ms);
            Ok(worktrees)
        })
        .await
    }

    async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), StorageError> {
        let workspace_id = event.workspace_id.to_string();
        let record = serde_json::to_string(event)?;
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO audit_events (workspace_id, record) VALUES (?1, ?2)",
                [&workspace_id, &record],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_audit_events(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<AuditEvent>, StorageError> {
        let workspace_id = workspace_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT record FROM audit_events WHERE workspace_id = ?1 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map([&workspace_id], |row| row.get::<_, String>(0))?;
            let mut events = Vec::new();
            for row in rows {
                events.push(row_to::<AuditEvent>(row?)?);
            }
            Ok(events)
        })
        .await
    }

    async fn save_workspace_refresh_token(
        &self,
        record: &RefreshTokenRecord,
    ) -> Result<(), StorageError> {
        let token_hash = record.token_hash.clone();
        let workspace_id = record.workspace_id.to_string();
        let kind = match record.kind {
            RefreshTokenKind::Current => "current",
            RefreshTokenKind::Previous => "previous",
        };
        let json = serde_json::to_string(record)?;
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO refresh_tokens (token_hash, workspace_id, kind, record)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(token_hash) DO UPDATE SET
                     workspace_id = excluded.workspace_id,
                     kind = excluded.kind,
                     record = excluded.record",
                [&token_hash, &workspace_id, kind, &json],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_workspace_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StorageError> {
        let token_hash = token_hash.to_string();
        self.call(move |conn| {
            let record: Option<String> = conn
                .query_row(
                    "SELECT record FROM refresh_tokens WHERE token_hash = ?1",
                    [&token_hash],
                    |row| row.get(0),
                )
                .optional()?;
            record.map(row_to).transpose()
        })
        .await
    }

    async fn get_workspace_refresh_state(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<RefreshTokenRecord>, StorageError> {
        let workspace_id = workspace_id.to_string();
        self.call(move |conn| {
            let record: Option<String> = conn
                .query_row(
                    "SELECT record FROM refresh_tokens
                     WHERE workspace_id = ?1 AND kind = 'current'",
                    [&workspace_id],
                    |row| row.get(0),
                )
                .optional()?;
            record.map(row_to).transpose()
        })
        .await
    }

    async fn delete_workspace_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<(), StorageError> {
        let token_hash = token_hash.to_string();
        self.call(move |conn| {
            conn.execute("DELETE FROM refresh_tokens WHERE token_hash = ?1", [&token_hash])?;
            Ok(())
        })
        .await
    }
}
