// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use vibe80_core::FakeClock;
use vibe80_storage::MemoryStorage;

fn ws_id() -> vibe80_core::WorkspaceId {
    vibe80_core::WorkspaceId::parse("w0123456789abcdef01234567").unwrap()
}

fn session_id() -> SessionId {
    SessionId::parse("s0123456789abcdef01234567").unwrap()
}

fn workspace() -> Workspace {
    Workspace {
        workspace_id: ws_id(),
        secret_hash: String::new(),
        uid: 2001,
        gid: 2001,
        providers: Default::default(),
        created_at_ms: 1,
        updated_at_ms: 1,
    }
}

fn session() -> Session {
    Session {
        session_id: session_id(),
        workspace_id: ws_id(),
        repo_url: "git@example.com:org/repo.git".to_string(),
        name: "repo".to_string(),
        created_at_ms: 1,
        last_activity_at_ms: 1,
        deleted_at_ms: None,
    }
}

fn worktree(id: &str, status: WorktreeStatus) -> Worktree {
    Worktree {
        worktree_id: WorktreeId::new(id),
        session_id: session_id(),
        branch_name: format!("vibe80/{id}"),
        status,
        provider: ProviderKey::Codex,
        config: WorktreeConfig::default(),
        created_at_ms: 1,
        color: None,
        closed_at_ms: None,
    }
}

fn service() -> (WorktreeService<FakeClock>, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let service = WorktreeService::new(
        Arc::clone(&storage) as Arc<dyn Storage>,
        SandboxInvoker::new("/bin/false", "/bin/false").without_sudo(),
        "/srv/vibe80".into(),
        FakeClock::new(),
    );
    (service, storage)
}

#[tokio::test]
async fn quota_is_enforced_before_any_git_call() {
    let (service, storage) = service();
    for i in 0..MAX_ACTIVE_WORKTREES {
        storage.save_worktree(&worktree(&format!("t{i}"), WorktreeStatus::Idle)).await.unwrap();
    }
    let err = service
        .create_worktree(
            &workspace(),
            &session(),
            CreateWorktreeSpec {
                provider: ProviderKey::Codex,
                context: WorktreeContext::New { starting_branch: Some("main".to_string()) },
                config: WorktreeConfig::default(),
                color: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind.status(), 409);
}

#[tokio::test]
async fn closed_worktrees_do_not_count_against_quota() {
    let (service, storage) = service();
    for i in 0..MAX_ACTIVE_WORKTREES {
        let mut wt = worktree(&format!("t{i}"), WorktreeStatus::Stopped);
        wt.closed_at_ms = Some(2);
        storage.save_worktree(&wt).await.unwrap();
    }
    // Quota passes; the sandbox call then fails (helper is /bin/false),
    // proving the guard ran first.
    let err = service
        .create_worktree(
            &workspace(),
            &session(),
            CreateWorktreeSpec {
                provider: ProviderKey::Codex,
                context: WorktreeContext::New { starting_branch: Some("main".to_string()) },
                config: WorktreeConfig::default(),
                color: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind.status(), 502);
}

#[tokio::test]
async fn fork_requires_a_live_source() {
    let (service, _storage) = service();
    let err = service
        .create_worktree(
            &workspace(),
            &session(),
            CreateWorktreeSpec {
                provider: ProviderKey::Codex,
                context: WorktreeContext::Fork { source_worktree_id: WorktreeId::new("ghost") },
                config: WorktreeConfig::default(),
                color: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind.status(), 404);
}

#[tokio::test]
async fn closing_main_is_refused() {
    let (service, storage) = service();
    storage.save_worktree(&worktree("main", WorktreeStatus::Idle)).await.unwrap();
    let err = service
        .close_worktree(&workspace(), &session(), &WorktreeId::main())
        .await
        .unwrap_err();
    assert_eq!(err.kind.status(), 400);
}

#[tokio::test]
async fn closing_a_processing_worktree_is_refused() {
    let (service, storage) = service();
    storage.save_worktree(&worktree("t1", WorktreeStatus::Processing)).await.unwrap();
    let err = service
        .close_worktree(&workspace(), &session(), &WorktreeId::new("t1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind.status(), 409);
}

#[tokio::test]
async fn merging_a_busy_worktree_is_refused() {
    let (service, storage) = service();
    storage.save_worktree(&worktree("t1", WorktreeStatus::Processing)).await.unwrap();
    let err = service
        .merge_worktree(&workspace(), &session(), &WorktreeId::new("t1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind.status(), 409);
}

#[tokio::test]
async fn listing_hides_closed_worktrees() {
    let (service, storage) = service();
    storage.save_worktree(&worktree("main", WorktreeStatus::Idle)).await.unwrap();
    let mut closed = worktree("t1", WorktreeStatus::Stopped);
    closed.closed_at_ms = Some(5);
    storage.save_worktree(&closed).await.unwrap();

    let active = service.list_worktrees(&session_id()).await.unwrap();
    assert_eq!(active.len(), 1);
    assert!(active[0].worktree_id.is_main());
    assert!(service.get_worktree(&session_id(), &WorktreeId::new("t1")).await.is_err());
}

#[test]
fn main_resolves_to_the_clone_directory() {
    let (service, _storage) = service();
    let dir = service.resolve_tree_dir(&session(), Some(&WorktreeId::main()));
    assert!(dir.ends_with("repository"));
    let dir = service.resolve_tree_dir(&session(), None);
    assert!(dir.ends_with("repository"));
    let dir = service.resolve_tree_dir(&session(), Some(&WorktreeId::new("t9")));
    assert!(dir.ends_with("worktrees/t9"));
}

#[test]
fn path_confinement_rejects_escapes() {
    let root = Path::new("/srv/wt");
    assert!(confine_path(root, "src/main.rs").is_ok());
    assert!(confine_path(root, "./src/../README.md").is_ok());
    assert!(confine_path(root, "").is_err());
    assert!(confine_path(root, "/etc/shadow").is_err());
    assert!(confine_path(root, "../secrets").is_err());
    assert!(confine_path(root, "src/../../other").is_err());
}
