// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-to-server WebSocket frames and supervisor-to-agent commands.
//!
//! Both are closed tagged unions mirroring the event side in `event.rs`.

use crate::message::AttachmentMeta;
use crate::provider::ProviderKey;
use crate::worktree::{TurnId, WorktreeId};
use serde::{Deserialize, Serialize};

/// Frames a WebSocket client may send. The socket is bound to one session;
/// frames carry the target worktree where relevant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First-frame authentication (alternative to the `?token=` parameter).
    Auth { token: String },
    Ping,
    /// User prompt. Without a worktree id, targets `main`.
    UserMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worktree_id: Option<WorktreeId>,
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<AttachmentMeta>,
    },
    /// Explicitly-addressed variant of `user_message`.
    WorktreeSendMessage {
        worktree_id: WorktreeId,
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<AttachmentMeta>,
    },
    SwitchProvider {
        worktree_id: WorktreeId,
        provider: ProviderKey,
    },
    /// Cancel the in-flight turn.
    Interrupt { worktree_id: WorktreeId },
    /// Respawn a stopped/errored worktree's agent.
    WakeUp { worktree_id: WorktreeId },
    /// Request message backfill before the live stream.
    WorktreeMessagesSync {
        worktree_id: WorktreeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen_message_id: Option<String>,
    },
}

/// Frames the supervisor writes to the agent's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    /// Injected on spawn; carries provider credential material the agent
    /// understands (shape is provider-defined).
    Auth { payload: serde_json::Value },
    UserMessage {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<AttachmentMeta>,
    },
    SwitchProvider { provider: ProviderKey },
    Ping,
    /// Cancel the named turn (or the current one when omitted).
    Cancel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_id: Option<TurnId>,
    },
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
