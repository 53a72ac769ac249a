// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! vibe80-sandbox: the root-delegated execution plane.
//!
//! Two tiny root helpers and the unprivileged plumbing around them:
//!
//! - `vibe80-run-as` runs one allow-listed command as a workspace UID/GID
//!   behind a landlock filesystem allow-list and a seccomp network filter.
//! - `vibe80-create-workspace` provisions the OS user and the workspace
//!   directory tree, idempotently.
//!
//! The server process never touches workspace files directly; it builds an
//! [`invoker::SandboxInvoker`] and shells every filesystem or Git operation
//! through the `run-as` helper via password-less sudo.

pub mod invoker;
pub mod landlock_rules;
pub mod metadata;
pub mod net_filter;
pub mod policy;
pub mod provision;

pub use invoker::{ExecOutput, ExecSpec, SandboxInvoker};
pub use metadata::resolve_workspace_user;
pub use policy::{ExecPolicy, NetMode, PolicyError, PolicyRoots};

use thiserror::Error;

/// Failures applying sandbox restrictions or running helper processes.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("policy violation: {0}")]
    Policy(#[from] policy::PolicyError),

    #[error("landlock setup failed: {0}")]
    Landlock(String),

    #[error("seccomp setup failed: {0}")]
    Seccomp(String),

    #[error("workspace user resolution failed: {0}")]
    UserResolution(String),

    #[error("helper exited with {code}: {stderr}")]
    HelperFailed { code: i32, stderr: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
