// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Closed event unions.
//!
//! [`AgentEvent`] is what an agent subprocess emits on its stdout stream;
//! [`SessionEvent`] is what subscribers receive, which is every agent event
//! annotated with its worktree plus worktree-lifecycle notifications. Both
//! are exhaustive tagged unions — the router boundary matches on every
//! variant, so adding an event is a compile-time ripple, not a runtime
//! surprise.

use crate::message::{ChatMessage, CommandStatus};
use crate::provider::ProviderKey;
use crate::worktree::{TurnId, Worktree, WorktreeId, WorktreeStatus};
use serde::{Deserialize, Serialize};

/// Outcome of a completed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Ok,
    Error,
    Cancelled,
}

/// Events produced by an agent subprocess on its JSON-RPC stdout stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Agent ready to accept prompts.
    Ready {
        thread_id: String,
        provider: ProviderKey,
    },
    /// Incremental assistant token.
    AssistantDelta {
        delta: String,
        item_id: String,
        turn_id: TurnId,
    },
    /// Final assistant message with complete text.
    AssistantMessage {
        text: String,
        item_id: String,
        turn_id: TurnId,
    },
    TurnStarted {
        turn_id: TurnId,
    },
    TurnCompleted {
        turn_id: TurnId,
        status: TurnStatus,
    },
    /// Recoverable turn failure.
    TurnError {
        turn_id: TurnId,
        message: String,
        #[serde(default)]
        will_retry: bool,
    },
    CommandExecutionDelta {
        turn_id: TurnId,
        item_id: String,
        command: String,
        delta: String,
    },
    CommandExecutionCompleted {
        turn_id: TurnId,
        item_id: String,
        command: String,
        output: String,
        status: CommandStatus,
    },
    /// Snapshot of `git status` + `git diff`.
    RepoDiff {
        status: String,
        diff: String,
    },
    ModelList {
        models: Vec<String>,
    },
    ModelSet {
        model: String,
    },
    /// Liveness reply to a supervisor ping.
    Pong,
}

/// Events delivered to session subscribers over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Ready {
        worktree_id: WorktreeId,
        thread_id: String,
        provider: ProviderKey,
    },
    AssistantDelta {
        worktree_id: WorktreeId,
        turn_id: TurnId,
        item_id: String,
        delta: String,
    },
    AssistantMessage {
        worktree_id: WorktreeId,
        turn_id: TurnId,
        item_id: String,
        text: String,
    },
    TurnStarted {
        worktree_id: WorktreeId,
        turn_id: TurnId,
    },
    TurnCompleted {
        worktree_id: WorktreeId,
        turn_id: TurnId,
        status: TurnStatus,
    },
    TurnError {
        worktree_id: WorktreeId,
        turn_id: TurnId,
        message: String,
        will_retry: bool,
    },
    CommandExecutionDelta {
        worktree_id: WorktreeId,
        turn_id: TurnId,
        item_id: String,
        command: String,
        delta: String,
    },
    CommandExecutionCompleted {
        worktree_id: WorktreeId,
        turn_id: TurnId,
        item_id: String,
        command: String,
        output: String,
        status: CommandStatus,
    },
    /// Diff snapshot. `worktree_id: None` means the session-wide main clone.
    RepoDiff {
        worktree_id: Option<WorktreeId>,
        status: String,
        diff: String,
    },
    ModelList {
        worktree_id: WorktreeId,
        models: Vec<String>,
    },
    ModelSet {
        worktree_id: WorktreeId,
        model: String,
    },
    WorktreeCreated {
        worktree: Worktree,
    },
    WorktreeUpdated {
        worktree: Worktree,
    },
    WorktreeClosed {
        worktree_id: WorktreeId,
    },
    WorktreeMergeResult {
        worktree_id: WorktreeId,
        status: WorktreeStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    WorktreesList {
        worktrees: Vec<Worktree>,
    },
    /// Persisted message replayed during backfill.
    WorktreeMessage {
        message: ChatMessage,
    },
    /// A user message was rejected because a turn is already in flight.
    Busy {
        worktree_id: WorktreeId,
    },
    /// Reply to a client ping.
    Pong,
    /// Terminal error surfaced on the socket.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl SessionEvent {
    /// Annotate an agent event with the worktree it came from.
    pub fn from_agent(worktree_id: &WorktreeId, event: AgentEvent) -> Self {
        match event {
            AgentEvent::Ready { thread_id, provider } => SessionEvent::Ready {
                worktree_id: worktree_id.clone(),
                thread_id,
                provider,
            },
            AgentEvent::AssistantDelta { delta, item_id, turn_id } => {
                SessionEvent::AssistantDelta {
                    worktree_id: worktree_id.clone(),
                    turn_id,
                    item_id,
                    delta,
                }
            }
            AgentEvent::AssistantMessage { text, item_id, turn_id } => {
                SessionEvent::AssistantMessage {
                    worktree_id: worktree_id.clone(),
                    turn_id,
                    item_id,
                    text,
                }
            }
            AgentEvent::TurnStarted { turn_id } => SessionEvent::TurnStarted {
                worktree_id: worktree_id.clone(),
                turn_id,
            },
            AgentEvent::TurnCompleted { turn_id, status } => SessionEvent::TurnCompleted {
                worktree_id: worktree_id.clone(),
                turn_id,
                status,
            },
            AgentEvent::TurnError { turn_id, message, will_retry } => SessionEvent::TurnError {
                worktree_id: worktree_id.clone(),
                turn_id,
                message,
                will_retry,
            },
            AgentEvent::CommandExecutionDelta { turn_id, item_id, command, delta } => {
                SessionEvent::CommandExecutionDelta {
                    worktree_id: worktree_id.clone(),
                    turn_id,
                    item_id,
                    command,
                    delta,
                }
            }
            AgentEvent::CommandExecutionCompleted { turn_id, item_id, command, output, status } => {
                SessionEvent::CommandExecutionCompleted {
                    worktree_id: worktree_id.clone(),
                    turn_id,
                    item_id,
                    command,
                    output,
                    status,
                }
            }
            AgentEvent::RepoDiff { status, diff } => SessionEvent::RepoDiff {
                worktree_id: Some(worktree_id.clone()),
                status,
                diff,
            },
            AgentEvent::ModelList { models } => SessionEvent::ModelList {
                worktree_id: worktree_id.clone(),
                models,
            },
            AgentEvent::ModelSet { model } => SessionEvent::ModelSet {
                worktree_id: worktree_id.clone(),
                model,
            },
            AgentEvent::Pong => SessionEvent::Pong,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
