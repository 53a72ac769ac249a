// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! vibe80-server: the HTTP/WebSocket gateway and the services behind it.
//!
//! Process-wide state is one [`lifecycle::ServerState`] built at boot and
//! threaded through every handler; there is no module-level mutable state.

pub mod attachments;
pub mod env;
pub mod error;
pub mod http;
pub mod identity;
pub mod lifecycle;
pub mod metrics;
pub mod session_service;
pub mod supervisors;
pub mod workspace_service;
pub mod worktree_service;

pub use error::ApiError;
pub use lifecycle::{ServerConfig, ServerState};
