// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use vibe80_core::provider::{ProviderAuth, ProviderConfig};
use vibe80_core::{FakeClock, Session, SessionId, Worktree, WorktreeConfig, WorktreeId, WorktreeStatus};
use vibe80_storage::MemoryStorage;

fn ws_id() -> WorkspaceId {
    WorkspaceId::parse("w0123456789abcdef01234567").unwrap()
}

fn session_id() -> SessionId {
    SessionId::parse("s0123456789abcdef01234567").unwrap()
}

fn providers(enabled: bool) -> ProviderMap {
    let mut map = ProviderMap::new();
    map.insert(
        ProviderKey::Codex,
        ProviderConfig {
            enabled,
            auth: Some(ProviderAuth {
                kind: ProviderAuthKind::ApiKey,
                value: "sk-test".to_string(),
            }),
        },
    );
    map
}

fn workspace() -> Workspace {
    Workspace {
        workspace_id: ws_id(),
        secret_hash: sha256_hex("super-secret"),
        uid: 2001,
        gid: 2001,
        providers: providers(true),
        created_at_ms: 1,
        updated_at_ms: 1,
    }
}

fn service() -> (WorkspaceService<FakeClock>, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let invoker = SandboxInvoker::new("/bin/false", "/bin/false").without_sudo();
    let service = WorkspaceService::new(
        Arc::clone(&storage) as Arc<dyn Storage>,
        invoker,
        "/tmp/does-not-exist".into(),
        FakeClock::new(),
    );
    (service, storage)
}

async fn seed_codex_worktree(storage: &MemoryStorage, status: WorktreeStatus, closed: bool) {
    storage
        .save_session(&Session {
            session_id: session_id(),
            workspace_id: ws_id(),
            repo_url: "git@example.com:a/b.git".to_string(),
            name: "b".to_string(),
            created_at_ms: 1,
            last_activity_at_ms: 1,
            deleted_at_ms: None,
        })
        .await
        .unwrap();
    storage
        .save_worktree(&Worktree {
            worktree_id: WorktreeId::main(),
            session_id: session_id(),
            branch_name: "main".to_string(),
            status,
            provider: ProviderKey::Codex,
            config: WorktreeConfig::default(),
            created_at_ms: 1,
            color: None,
            closed_at_ms: if closed { Some(2) } else { None },
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn secret_verification_is_exact() {
    let (service, storage) = service();
    storage.save_workspace(&workspace()).await.unwrap();
    assert!(service.verify_workspace_secret(&ws_id(), "super-secret").await.unwrap());
    assert!(!service.verify_workspace_secret(&ws_id(), "wrong").await.unwrap());
    assert!(!service.verify_workspace_secret(&ws_id(), "").await.unwrap());
}

#[tokio::test]
async fn disabling_provider_in_use_is_forbidden_and_config_unchanged() {
    let (service, storage) = service();
    storage.save_workspace(&workspace()).await.unwrap();
    seed_codex_worktree(&storage, WorktreeStatus::Processing, false).await;

    let mut patch = ProviderMap::new();
    patch.insert(ProviderKey::Codex, ProviderConfig { enabled: false, auth: None });
    let err = service.update_workspace(&ws_id(), patch).await.unwrap_err();
    assert_eq!(err.kind.status(), 403);
    assert_eq!(err.message, "Provider cannot be disabled: active sessions use it.");

    let stored = storage.get_workspace(&ws_id()).await.unwrap().unwrap();
    assert!(stored.provider_enabled(ProviderKey::Codex), "config unchanged");
}

#[tokio::test]
async fn disabling_provider_with_only_closed_worktrees_is_allowed() {
    let (service, storage) = service();
    storage.save_workspace(&workspace()).await.unwrap();
    seed_codex_worktree(&storage, WorktreeStatus::Stopped, true).await;

    let mut patch = ProviderMap::new();
    patch.insert(ProviderKey::Codex, ProviderConfig { enabled: false, auth: None });
    let view = service.update_workspace(&ws_id(), patch).await.unwrap();
    assert!(!view.providers[&ProviderKey::Codex].enabled);
}

#[tokio::test]
async fn patch_without_auth_keeps_stored_material() {
    let (service, storage) = service();
    storage.save_workspace(&workspace()).await.unwrap();

    // Re-enable without resending the key.
    let mut patch = ProviderMap::new();
    patch.insert(ProviderKey::Codex, ProviderConfig { enabled: true, auth: None });
    service.update_workspace(&ws_id(), patch).await.unwrap();

    let stored = storage.get_workspace(&ws_id()).await.unwrap().unwrap();
    let auth = stored.providers[&ProviderKey::Codex].auth.as_ref().unwrap();
    assert_eq!(auth.value, "sk-test");
}

#[tokio::test]
async fn enabling_provider_without_any_auth_is_invalid() {
    let (service, storage) = service();
    let mut ws = workspace();
    ws.providers.clear();
    storage.save_workspace(&ws).await.unwrap();

    let mut patch = ProviderMap::new();
    patch.insert(ProviderKey::Claude, ProviderConfig { enabled: true, auth: None });
    let err = service.update_workspace(&ws_id(), patch).await.unwrap_err();
    assert_eq!(err.kind.status(), 400);
}

#[tokio::test]
async fn update_appends_audit_event() {
    let (service, storage) = service();
    storage.save_workspace(&workspace()).await.unwrap();
    let patch = providers(true);
    service.update_workspace(&ws_id(), patch).await.unwrap();
    let audit = storage.list_audit_events(&ws_id()).await.unwrap();
    assert!(audit.iter().any(|e| e.event == AuditKind::WorkspaceUpdated));
}

#[tokio::test]
async fn read_config_never_exposes_auth_values() {
    let (service, storage) = service();
    storage.save_workspace(&workspace()).await.unwrap();
    let view = service.read_workspace_config(&ws_id()).await.unwrap();
    let json = serde_json::to_string(&view).unwrap();
    assert!(!json.contains("sk-test"));
    assert!(json.contains("hasValue"));
}

#[test]
fn agent_credentials_carry_api_key_in_payload() {
    let (service, _storage) = service();
    let creds = service
        .agent_credentials(&workspace(), ProviderKey::Codex, false, Some("o4"), Some("high"))
        .unwrap();
    assert_eq!(creds.payload["provider"], "codex");
    assert_eq!(creds.payload["api_key"], "sk-test");
    assert_eq!(creds.payload["model"], "o4");
    assert_eq!(creds.payload["reasoning_effort"], "high");
    assert!(creds.files.is_empty());
}

#[test]
fn deny_credentials_strips_auth_material() {
    let (service, _storage) = service();
    let creds = service
        .agent_credentials(&workspace(), ProviderKey::Codex, true, None, None)
        .unwrap();
    assert!(creds.payload.get("api_key").is_none());
}

#[test]
fn credentials_for_disabled_provider_are_forbidden() {
    let (service, _storage) = service();
    let mut ws = workspace();
    ws.providers.get_mut(&ProviderKey::Codex).unwrap().enabled = false;
    let err = service
        .agent_credentials(&ws, ProviderKey::Codex, false, None, None)
        .unwrap_err();
    assert_eq!(err.kind.status(), 403);
}

#[test]
fn auth_json_b64_is_decoded_into_payload() {
    let (service, _storage) = service();
    let mut ws = workspace();
    let blob = base64::engine::general_purpose::STANDARD.encode(r#"{"token":"oat-1"}"#);
    ws.providers.insert(
        ProviderKey::Claude,
        ProviderConfig {
            enabled: true,
            auth: Some(ProviderAuth { kind: ProviderAuthKind::AuthJsonB64, value: blob }),
        },
    );
    let creds = service
        .agent_credentials(&ws, ProviderKey::Claude, false, None, None)
        .unwrap();
    assert_eq!(creds.payload["auth_json"]["token"], "oat-1");
}

#[test]
fn constant_time_eq_basics() {
    assert!(constant_time_eq(b"abc", b"abc"));
    assert!(!constant_time_eq(b"abc", b"abd"));
    assert!(!constant_time_eq(b"abc", b"abcd"));
}
