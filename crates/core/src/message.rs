// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat messages and attachments.
//!
//! Messages are append-only per worktree with strictly monotonic timestamps;
//! the storage layer assigns the per-worktree sequence that backs cursors.

use crate::id::MessageId;
use crate::worktree::WorktreeId;
use serde::{Deserialize, Serialize};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    ToolResult,
    CommandExecution,
}

/// Status of a command-execution message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Running,
    Completed,
    Error,
}

/// Attachment descriptor. `path` is workspace-relative and must resolve
/// under the session's attachments directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub mime_type: String,
}

/// One persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub worktree_id: WorktreeId,
    pub role: ChatRole,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentMeta>,
    pub timestamp_ms: u64,
    /// Command-execution extras.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_status: Option<CommandStatus>,
}

impl ChatMessage {
    /// Plain text message from a role.
    pub fn text(
        worktree_id: WorktreeId,
        role: ChatRole,
        text: impl Into<String>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            worktree_id,
            role,
            text: text.into(),
            attachments: Vec::new(),
            timestamp_ms,
            command: None,
            output: None,
            command_status: None,
        }
    }

    /// Command-execution message.
    pub fn command_execution(
        worktree_id: WorktreeId,
        command: impl Into<String>,
        output: impl Into<String>,
        status: CommandStatus,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            worktree_id,
            role: ChatRole::CommandExecution,
            text: String::new(),
            attachments: Vec::new(),
            timestamp_ms,
            command: Some(command.into()),
            output: Some(output.into()),
            command_status: Some(status),
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
