// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the server crate.
//!
//! Nothing else in the crate reads the process environment.

use std::path::PathBuf;
use std::time::Duration;

/// Deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    MonoUser,
    MultiUser,
}

/// `DEPLOYMENT_MODE`: `mono_user` (default) or `multi_user`.
pub fn deployment_mode() -> DeploymentMode {
    match std::env::var("DEPLOYMENT_MODE").as_deref() {
        Ok("multi_user") => DeploymentMode::MultiUser,
        _ => DeploymentMode::MonoUser,
    }
}

/// `STORAGE_BACKEND`: `sqlite` (default) or `memory`.
pub fn storage_backend() -> String {
    std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "sqlite".to_string())
}

/// `SQLITE_PATH` (default: `<data dir>/vibe80.db`, resolved by the caller).
pub fn sqlite_path() -> Option<PathBuf> {
    std::env::var("SQLITE_PATH").ok().map(PathBuf::from)
}

/// `JWT_KEY_PATH` (default: `<data dir>/jwt.key`).
pub fn jwt_key_path() -> Option<PathBuf> {
    std::env::var("JWT_KEY_PATH").ok().map(PathBuf::from)
}

/// `WORKSPACE_ROOT_DIRECTORY`.
pub fn workspace_root() -> PathBuf {
    std::env::var("WORKSPACE_ROOT_DIRECTORY")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/vibe80/workspaces"))
}

/// `WORKSPACE_HOME_BASE`.
pub fn workspace_home_base() -> PathBuf {
    std::env::var("WORKSPACE_HOME_BASE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/home"))
}

/// `PORT` (default 3380).
pub fn port() -> u16 {
    std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(3380)
}

/// Mono-auth token TTL (`VIBE80_MONO_TOKEN_TTL_MS`, default 24 h).
pub fn mono_token_ttl() -> Duration {
    duration_ms("VIBE80_MONO_TOKEN_TTL_MS", Duration::from_secs(24 * 3600))
}

/// Overlap window during refresh rotation (`VIBE80_REFRESH_OVERLAP_MS`,
/// default 60 s).
pub fn refresh_overlap_window() -> Duration {
    duration_ms("VIBE80_REFRESH_OVERLAP_MS", Duration::from_secs(60))
}

/// WebSocket keep-alive cadence (`VIBE80_WS_PING_MS`, default 25 s).
pub fn ws_ping_interval() -> Duration {
    duration_ms("VIBE80_WS_PING_MS", Duration::from_secs(25))
}

/// Agent-shutdown grace window (`VIBE80_SHUTDOWN_GRACE_MS`, default 3 s).
pub fn shutdown_grace() -> Duration {
    duration_ms("VIBE80_SHUTDOWN_GRACE_MS", Duration::from_secs(3))
}

/// Agent spawn deadline (`VIBE80_SPAWN_DEADLINE_MS`, default 30 s).
pub fn spawn_deadline() -> Duration {
    duration_ms("VIBE80_SPAWN_DEADLINE_MS", Duration::from_secs(30))
}

/// Paths of the two root helpers (`VIBE80_RUN_AS_PATH`,
/// `VIBE80_CREATE_WORKSPACE_PATH`).
pub fn run_as_path() -> PathBuf {
    std::env::var("VIBE80_RUN_AS_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/usr/local/bin/vibe80-run-as"))
}

pub fn create_workspace_path() -> PathBuf {
    std::env::var("VIBE80_CREATE_WORKSPACE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/usr/local/bin/vibe80-create-workspace"))
}

fn duration_ms(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
