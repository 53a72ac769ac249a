// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! vibe80-agent: the agent execution plane.
//!
//! One [`supervisor::Supervisor`] per touched `(session, worktree)` owns the
//! LLM-agent subprocess, multiplexes its JSON-RPC stdio stream, enforces the
//! single-in-flight-turn discipline, and feeds the per-session
//! [`router::SessionHub`] that fans events out to WebSocket subscribers.
//! Dormant worktrees hold no process.

pub mod codec;
pub mod launcher;
pub mod router;
pub mod supervisor;

pub use launcher::{AgentIo, AgentLauncher, LaunchSpec, SandboxLauncher};
pub use router::{RouterSet, SessionHub, SubscriberHandle};
pub use supervisor::{DiffSource, Supervisor, SupervisorConfig, SupervisorHandle};

#[cfg(any(test, feature = "test-support"))]
pub use launcher::{FakeAgentIo, FakeLauncher};

use thiserror::Error;

/// Failures in the agent plane.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent spawn failed: {0}")]
    SpawnFailed(String),

    #[error("worktree is busy")]
    Busy,

    #[error("agent stream codec error: {0}")]
    Codec(String),

    #[error("external command failed: {0}")]
    External(String),

    #[error("storage error: {0}")]
    Storage(#[from] vibe80_storage::StorageError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] vibe80_sandbox::SandboxError),

    #[error("supervisor is gone")]
    SupervisorGone,
}
