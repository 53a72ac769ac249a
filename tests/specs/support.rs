// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures: an assembled server state with in-memory storage and a
//! fake launcher, plus a small request driver over the router.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;
use vibe80_agent::{FakeAgentIo, FakeLauncher, SupervisorConfig};
use vibe80_core::provider::{ProviderAuth, ProviderAuthKind, ProviderConfig, ProviderMap};
use vibe80_core::{
    ProviderKey, Session, SessionId, Workspace, WorkspaceId, Worktree, WorktreeConfig,
    WorktreeId, WorktreeStatus,
};
use vibe80_sandbox::SandboxInvoker;
use vibe80_server::env::DeploymentMode;
use vibe80_server::{ServerConfig, ServerState};
use vibe80_storage::{MemoryStorage, Storage};

pub const SECRET: &str = "test-workspace-secret";

pub struct TestHost {
    pub state: Arc<ServerState>,
    pub router: Router,
    pub agents: mpsc::UnboundedReceiver<FakeAgentIo>,
    _tmp: tempfile::TempDir,
}

pub fn ws_id() -> WorkspaceId {
    WorkspaceId::parse("w0123456789abcdef01234567").unwrap()
}

pub fn other_ws_id() -> WorkspaceId {
    WorkspaceId::parse("wfedcba9876543210fedcba98").unwrap()
}

pub fn session_id() -> SessionId {
    SessionId::parse("s0123456789abcdef01234567").unwrap()
}

pub async fn host() -> TestHost {
    let tmp = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        port: 0,
        data_dir: tmp.path().to_path_buf(),
        storage_backend: "memory".to_string(),
        deployment_mode: DeploymentMode::MultiUser,
        workspace_root: tmp.path().join("workspaces"),
        home_base: tmp.path().join("home"),
        jwt_key_path: tmp.path().join("jwt.key"),
        sqlite_path: tmp.path().join("vibe80.db"),
        run_as_path: "/bin/false".into(),
        create_workspace_path: "/bin/false".into(),
        supervisor: SupervisorConfig {
            spawn_deadline: std::time::Duration::from_secs(5),
            cancel_ack_timeout: std::time::Duration::from_millis(200),
            kill_grace: std::time::Duration::from_millis(100),
            ping_interval: std::time::Duration::from_secs(60),
        },
        refresh_overlap: std::time::Duration::from_secs(60),
        mono_token_ttl: std::time::Duration::from_secs(3600),
        ws_ping_interval: std::time::Duration::from_secs(25),
        shutdown_grace: std::time::Duration::from_millis(100),
    };
    let (launcher, agents) = FakeLauncher::new();
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let invoker = SandboxInvoker::new("/bin/false", "/bin/false").without_sudo();
    let state = ServerState::assemble(config, storage, invoker, Arc::new(launcher));
    let router = vibe80_server::http::build_router(Arc::clone(&state));
    TestHost { state, router, agents, _tmp: tmp }
}

/// Seed a workspace record directly (provisioning needs root; the record is
/// what the API layer consumes).
pub async fn seed_workspace(state: &ServerState, id: WorkspaceId) {
    let mut providers = ProviderMap::new();
    providers.insert(
        ProviderKey::Codex,
        ProviderConfig {
            enabled: true,
            auth: Some(ProviderAuth {
                kind: ProviderAuthKind::ApiKey,
                value: "sk-test".to_string(),
            }),
        },
    );
    let workspace = Workspace {
        workspace_id: id,
        secret_hash: vibe80_server::identity::sha256_hex(SECRET),
        uid: 2001,
        gid: 2001,
        providers,
        created_at_ms: 1,
        updated_at_ms: 1,
    };
    state.storage.save_workspace(&workspace).await.unwrap();
}

pub async fn seed_session(state: &ServerState, workspace_id: WorkspaceId, id: SessionId) {
    let session = Session {
        session_id: id,
        workspace_id,
        repo_url: "git@example.com:org/repo.git".to_string(),
        name: "repo".to_string(),
        created_at_ms: 1,
        last_activity_at_ms: 1,
        deleted_at_ms: None,
    };
    state.storage.save_session(&session).await.unwrap();
    let main = Worktree {
        worktree_id: WorktreeId::main(),
        session_id: id,
        branch_name: "main".to_string(),
        status: WorktreeStatus::Idle,
        provider: ProviderKey::Codex,
        config: WorktreeConfig::default(),
        created_at_ms: 1,
        color: None,
        closed_at_ms: None,
    };
    state.storage.save_worktree(&main).await.unwrap();
}

/// Login over HTTP, returning (access, refresh).
pub async fn login(host: &TestHost, id: WorkspaceId) -> (String, String) {
    let (status, body) = request(
        host,
        "POST",
        "/api/workspaces/login",
        None,
        Some(serde_json::json!({ "workspaceId": id.as_str(), "workspaceSecret": SECRET })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    (
        body["accessToken"].as_str().unwrap().to_string(),
        body["refreshToken"].as_str().unwrap().to_string(),
    )
}

/// Drive one request through the router.
pub async fn request(
    host: &TestHost,
    method: &str,
    path: &str,
    bearer: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = host.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}
