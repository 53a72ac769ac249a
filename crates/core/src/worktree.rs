// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worktree record and lifecycle state machine.
//!
//! A worktree is the unit of agent activity: one Git worktree inside a
//! session, driven by at most one in-flight turn. `"main"` is a
//! pseudo-worktree aliasing the session clone's default branch. Parent links
//! between forked worktrees are id lookups, never references.

use crate::id::SessionId;
use crate::provider::ProviderKey;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

/// Identifier of a worktree within its session. Opaque except for the
/// reserved `"main"` alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorktreeId(pub String);

impl WorktreeId {
    pub const MAIN: &'static str = "main";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh opaque id (`t` + 24 hex).
    pub fn generate() -> Self {
        const HEX: [char; 16] = [
            '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
        ];
        Self(format!("t{}", nanoid::nanoid!(24, &HEX)))
    }

    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    pub fn is_main(&self) -> bool {
        self.0 == Self::MAIN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorktreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorktreeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorktreeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl PartialEq<str> for WorktreeId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl Borrow<str> for WorktreeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Identifier of one turn (user prompt + full streamed response). Assigned
/// by the agent; opaque to the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

impl TurnId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a worktree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeStatus {
    /// Directory and agent process being set up.
    #[default]
    Creating,
    /// Agent announced readiness; no turn has run yet.
    Ready,
    /// A turn is in flight.
    Processing,
    /// Last turn finished; next user input moves back to idle.
    Completed,
    /// Between turns.
    Idle,
    /// Agent process gone (crash or explicit cancel); wake_up respawns.
    Stopped,
    /// Fatal failure surfaced to the client.
    Error,
    /// Merge back into the session default branch in progress.
    Merging,
    /// Merge hit conflicts; resolution happens in the worktree.
    MergeConflict,
}

impl WorktreeStatus {
    /// Whether a user message may start a turn right now.
    pub fn can_accept_user_message(self) -> bool {
        matches!(self, WorktreeStatus::Ready | WorktreeStatus::Idle | WorktreeStatus::Completed)
    }

    /// Whether the worktree may be closed.
    pub fn is_closeable(self) -> bool {
        matches!(
            self,
            WorktreeStatus::Stopped
                | WorktreeStatus::Error
                | WorktreeStatus::Completed
                | WorktreeStatus::Idle
        )
    }

    /// Whether a merge back into the default branch may start.
    pub fn can_start_merge(self) -> bool {
        self.can_accept_user_message()
    }
}

impl fmt::Display for WorktreeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorktreeStatus::Creating => "creating",
            WorktreeStatus::Ready => "ready",
            WorktreeStatus::Processing => "processing",
            WorktreeStatus::Completed => "completed",
            WorktreeStatus::Idle => "idle",
            WorktreeStatus::Stopped => "stopped",
            WorktreeStatus::Error => "error",
            WorktreeStatus::Merging => "merging",
            WorktreeStatus::MergeConflict => "merge_conflict",
        })
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid worktree transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: WorktreeStatus,
    pub to: WorktreeStatus,
}

/// Check a transition against the lifecycle graph.
///
/// ```text
/// creating -> ready | error
/// ready <-> idle
/// ready|idle|completed -> processing -> completed -> idle
/// processing -> error | stopped
/// ready|idle|completed -> merging -> completed | merge_conflict
/// merge_conflict -> idle (after resolution)
/// any non-terminal -> stopped (crash) | error (fatal)
/// ```
pub fn check_transition(
    from: WorktreeStatus,
    to: WorktreeStatus,
) -> Result<(), InvalidTransition> {
    use WorktreeStatus as S;
    let ok = match (from, to) {
        (S::Creating, S::Ready | S::Error) => true,
        (S::Ready, S::Idle) | (S::Idle, S::Ready) => true,
        (S::Ready | S::Idle | S::Completed, S::Processing) => true,
        (S::Processing, S::Completed | S::Error | S::Stopped) => true,
        (S::Completed, S::Idle) => true,
        (S::Ready | S::Idle | S::Completed, S::Merging) => true,
        (S::Merging, S::Completed | S::MergeConflict) => true,
        (S::MergeConflict, S::Idle) => true,
        // Crash and explicit-stop paths from any live state.
        (S::Creating | S::Ready | S::Idle | S::Completed | S::Merging, S::Stopped) => true,
        (S::Ready | S::Idle | S::Completed | S::Merging | S::MergeConflict, S::Error) => true,
        // Wake-up respawn re-enters the creating flow.
        (S::Stopped | S::Error, S::Creating) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(InvalidTransition { from, to })
    }
}

/// How a new worktree derives its starting tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "context", rename_all = "snake_case")]
pub enum WorktreeContext {
    /// Branch off `starting_branch` (default branch when omitted).
    New {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        starting_branch: Option<String>,
    },
    /// Base the branch on another worktree's tree.
    Fork { source_worktree_id: WorktreeId },
}

/// Agent configuration carried by a worktree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(default)]
    pub internet_access: bool,
    #[serde(default)]
    pub deny_credentials: bool,
    /// Set for forks; resolved by lookup, never held as a reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_worktree_id: Option<WorktreeId>,
}

/// A worktree record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worktree {
    pub worktree_id: WorktreeId,
    pub session_id: SessionId,
    pub branch_name: String,
    pub status: WorktreeStatus,
    pub provider: ProviderKey,
    #[serde(default)]
    pub config: WorktreeConfig,
    pub created_at_ms: u64,
    /// UI hint only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Set when the worktree was explicitly closed; closed worktrees are
    /// excluded from active listings and the per-session quota.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at_ms: Option<u64>,
}

impl Worktree {
    pub fn is_closed(&self) -> bool {
        self.closed_at_ms.is_some()
    }
}

#[cfg(test)]
#[path = "worktree_tests.rs"]
mod tests;
