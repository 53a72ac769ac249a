// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::launcher::{FakeAgentIo, FakeLauncher};
use std::time::Duration;
use vibe80_core::{
    ProviderKey, SessionId, SystemClock, TurnStatus, WorkspaceId, WorktreeConfig,
};
use vibe80_storage::MemoryStorage;

fn session_id() -> SessionId {
    SessionId::parse("s0123456789abcdef01234567").unwrap()
}

fn worktree() -> Worktree {
    Worktree {
        worktree_id: WorktreeId::new("t1"),
        session_id: session_id(),
        branch_name: "vibe80/t1".to_string(),
        status: WorktreeStatus::Creating,
        provider: ProviderKey::Codex,
        config: WorktreeConfig::default(),
        created_at_ms: 1,
        color: None,
        closed_at_ms: None,
    }
}

fn launch_spec() -> LaunchSpec {
    LaunchSpec {
        workspace_id: WorkspaceId::parse("w0123456789abcdef01234567").unwrap(),
        session_id: session_id(),
        worktree_id: WorktreeId::new("t1"),
        provider: ProviderKey::Codex,
        worktree_dir: "/tmp/wt".into(),
        attachments_dir: "/tmp/att".into(),
        repository_dir: "/tmp/repo".into(),
        temp_dir: "/tmp/tmp".into(),
        credential_files: vec![],
        internet_access: false,
    }
}

struct NoDiff;

#[async_trait]
impl DiffSource for NoDiff {
    async fn snapshot(&self, _worktree_id: &WorktreeId) -> Result<(String, String), AgentError> {
        Ok(("M src/lib.rs".to_string(), "+line".to_string()))
    }
}

struct Harness {
    storage: Arc<MemoryStorage>,
    handle: SupervisorHandle,
    agent: FakeAgentIo,
    events: crate::router::SubscriberHandle,
}

async fn start() -> Harness {
    start_with_config(SupervisorConfig {
        spawn_deadline: Duration::from_secs(5),
        cancel_ack_timeout: Duration::from_millis(200),
        kill_grace: Duration::from_millis(100),
        ping_interval: Duration::from_secs(60),
    })
    .await
}

async fn start_with_config(config: SupervisorConfig) -> Harness {
    let (launcher, mut io_rx) = FakeLauncher::new();
    let storage = Arc::new(MemoryStorage::new());
    let hub = Arc::new(SessionHub::new(session_id(), 64));
    let events = hub.subscribe();
    let handle = Supervisor::spawn(
        worktree(),
        launch_spec(),
        serde_json::json!({"provider": "codex"}),
        Arc::new(launcher),
        Arc::clone(&storage) as Arc<dyn vibe80_storage::Storage>,
        Arc::clone(&hub),
        Arc::new(NoDiff),
        config,
        SystemClock,
    );
    let agent = io_rx.recv().await.unwrap();
    Harness { storage, handle, agent, events }
}

async fn next_event(harness: &mut Harness) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), harness.events.rx.recv())
        .await
        .expect("event timeout")
        .expect("hub closed")
}

/// Drive the agent to `ready`, consuming the status event.
async fn go_ready(harness: &mut Harness) {
    harness
        .agent
        .events
        .send(AgentEvent::Ready { thread_id: "th1".to_string(), provider: ProviderKey::Codex })
        .unwrap();
    // worktree_updated (ready) then ready.
    let first = next_event(harness).await;
    assert!(matches!(&first, SessionEvent::WorktreeUpdated { worktree } if worktree.status == WorktreeStatus::Ready));
    let second = next_event(harness).await;
    assert!(matches!(second, SessionEvent::Ready { .. }));
}

#[tokio::test]
async fn auth_frame_is_injected_on_spawn() {
    let mut harness = start().await;
    match harness.agent.commands.recv().await.unwrap() {
        AgentCommand::Auth { payload } => assert_eq!(payload["provider"], "codex"),
        other => panic!("expected auth first, got {other:?}"),
    }
}

#[tokio::test]
async fn ready_event_moves_creating_to_ready() {
    let mut harness = start().await;
    go_ready(&mut harness).await;
    let stored = harness
        .storage
        .get_worktree(&session_id(), &WorktreeId::new("t1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, WorktreeStatus::Ready);
}

#[tokio::test]
async fn full_turn_round_trip_in_order() {
    let mut harness = start().await;
    go_ready(&mut harness).await;

    harness.handle.send_user_message("hello".to_string(), vec![]).await.unwrap();
    // The supervisor forwards the message to the agent (after auth).
    let _auth = harness.agent.commands.recv().await.unwrap();
    match harness.agent.commands.recv().await.unwrap() {
        AgentCommand::UserMessage { text, .. } => assert_eq!(text, "hello"),
        other => panic!("expected user_message, got {other:?}"),
    }

    let turn = TurnId::new("turn-1");
    harness.agent.events.send(AgentEvent::TurnStarted { turn_id: turn.clone() }).unwrap();
    harness
        .agent
        .events
        .send(AgentEvent::AssistantDelta {
            delta: "hi ".to_string(),
            item_id: "i1".to_string(),
            turn_id: turn.clone(),
        })
        .unwrap();
    harness
        .agent
        .events
        .send(AgentEvent::AssistantMessage {
            text: "hi there".to_string(),
            item_id: "i1".to_string(),
            turn_id: turn.clone(),
        })
        .unwrap();
    harness
        .agent
        .events
        .send(AgentEvent::TurnCompleted { turn_id: turn.clone(), status: TurnStatus::Ok })
        .unwrap();

    // Ordered: worktree_updated(processing), turn_started, assistant_delta,
    // assistant_message, worktree_updated(completed), turn_completed, repo_diff.
    assert!(matches!(next_event(&mut harness).await,
        SessionEvent::WorktreeUpdated { worktree } if worktree.status == WorktreeStatus::Processing));
    assert!(matches!(next_event(&mut harness).await, SessionEvent::TurnStarted { .. }));
    assert!(matches!(next_event(&mut harness).await, SessionEvent::AssistantDelta { .. }));
    assert!(matches!(next_event(&mut harness).await, SessionEvent::AssistantMessage { .. }));
    assert!(matches!(next_event(&mut harness).await,
        SessionEvent::WorktreeUpdated { worktree } if worktree.status == WorktreeStatus::Completed));
    assert!(matches!(next_event(&mut harness).await, SessionEvent::TurnCompleted { .. }));
    assert!(matches!(next_event(&mut harness).await, SessionEvent::RepoDiff { worktree_id: Some(_), .. }));

    // Both sides of the turn are persisted, user first.
    let messages = harness
        .storage
        .list_messages(&session_id(), &WorktreeId::new("t1"), None)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, ChatRole::User);
    assert_eq!(messages[0].text, "hello");
    assert_eq!(messages[1].role, ChatRole::Assistant);
    assert_eq!(messages[1].text, "hi there");
    assert!(messages[0].timestamp_ms < messages[1].timestamp_ms);
}

#[tokio::test]
async fn second_message_while_processing_is_rejected_with_busy() {
    let mut harness = start().await;
    go_ready(&mut harness).await;

    harness.handle.send_user_message("first".to_string(), vec![]).await.unwrap();
    harness
        .agent
        .events
        .send(AgentEvent::TurnStarted { turn_id: TurnId::new("turn-1") })
        .unwrap();
    // Drain processing + turn_started events.
    assert!(matches!(next_event(&mut harness).await, SessionEvent::WorktreeUpdated { .. }));
    assert!(matches!(next_event(&mut harness).await, SessionEvent::TurnStarted { .. }));

    harness.handle.send_user_message("second".to_string(), vec![]).await.unwrap();
    assert!(matches!(next_event(&mut harness).await, SessionEvent::Busy { .. }));

    // Only the first message was persisted.
    let messages = harness
        .storage
        .list_messages(&session_id(), &WorktreeId::new("t1"), None)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "first");
}

#[tokio::test]
async fn message_before_turn_bracket_opens_is_also_rejected() {
    let mut harness = start().await;
    go_ready(&mut harness).await;

    harness.handle.send_user_message("first".to_string(), vec![]).await.unwrap();
    // No turn_started yet; the pending message still blocks a second one.
    harness.handle.send_user_message("second".to_string(), vec![]).await.unwrap();
    assert!(matches!(next_event(&mut harness).await, SessionEvent::Busy { .. }));
}

#[tokio::test]
async fn turn_error_with_retry_stays_processing() {
    let mut harness = start().await;
    go_ready(&mut harness).await;

    harness.handle.send_user_message("go".to_string(), vec![]).await.unwrap();
    let turn = TurnId::new("turn-1");
    harness.agent.events.send(AgentEvent::TurnStarted { turn_id: turn.clone() }).unwrap();
    harness
        .agent
        .events
        .send(AgentEvent::TurnError {
            turn_id: turn.clone(),
            message: "rate limited".to_string(),
            will_retry: true,
        })
        .unwrap();

    assert!(matches!(next_event(&mut harness).await, SessionEvent::WorktreeUpdated { .. }));
    assert!(matches!(next_event(&mut harness).await, SessionEvent::TurnStarted { .. }));
    assert!(matches!(
        next_event(&mut harness).await,
        SessionEvent::TurnError { will_retry: true, .. }
    ));
    let stored = harness
        .storage
        .get_worktree(&session_id(), &WorktreeId::new("t1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, WorktreeStatus::Processing, "willRetry keeps processing");
}

#[tokio::test]
async fn fatal_turn_error_moves_to_error() {
    let mut harness = start().await;
    go_ready(&mut harness).await;

    harness.handle.send_user_message("go".to_string(), vec![]).await.unwrap();
    let turn = TurnId::new("turn-1");
    harness.agent.events.send(AgentEvent::TurnStarted { turn_id: turn.clone() }).unwrap();
    harness
        .agent
        .events
        .send(AgentEvent::TurnError {
            turn_id: turn,
            message: "credits exhausted".to_string(),
            will_retry: false,
        })
        .unwrap();

    assert!(matches!(next_event(&mut harness).await, SessionEvent::WorktreeUpdated { .. }));
    assert!(matches!(next_event(&mut harness).await, SessionEvent::TurnStarted { .. }));
    assert!(matches!(next_event(&mut harness).await,
        SessionEvent::WorktreeUpdated { worktree } if worktree.status == WorktreeStatus::Error));
    assert!(matches!(
        next_event(&mut harness).await,
        SessionEvent::TurnError { will_retry: false, .. }
    ));
}

#[tokio::test]
async fn crash_commits_partial_message_and_stops() {
    let mut harness = start().await;
    go_ready(&mut harness).await;

    harness.handle.send_user_message("go".to_string(), vec![]).await.unwrap();
    let turn = TurnId::new("turn-1");
    harness.agent.events.send(AgentEvent::TurnStarted { turn_id: turn.clone() }).unwrap();
    harness
        .agent
        .events
        .send(AgentEvent::AssistantDelta {
            delta: "half-finished thought".to_string(),
            item_id: "i1".to_string(),
            turn_id: turn.clone(),
        })
        .unwrap();
    assert!(matches!(next_event(&mut harness).await, SessionEvent::WorktreeUpdated { .. }));
    assert!(matches!(next_event(&mut harness).await, SessionEvent::TurnStarted { .. }));
    assert!(matches!(next_event(&mut harness).await, SessionEvent::AssistantDelta { .. }));

    // Crash: stdout closes.
    let (placeholder_tx, _placeholder_rx) = tokio::sync::mpsc::unbounded_channel();
    drop(std::mem::replace(&mut harness.agent.events, placeholder_tx));

    let committed = next_event(&mut harness).await;
    match &committed {
        SessionEvent::AssistantMessage { text, .. } => {
            assert!(text.starts_with("half-finished thought"));
            assert!(text.contains("terminated"));
        }
        other => panic!("expected committed partial, got {other:?}"),
    }
    assert!(matches!(next_event(&mut harness).await,
        SessionEvent::WorktreeUpdated { worktree } if worktree.status == WorktreeStatus::Stopped));

    let messages = harness
        .storage
        .list_messages(&session_id(), &WorktreeId::new("t1"), None)
        .await
        .unwrap();
    let last = messages.last().unwrap();
    assert_eq!(last.role, ChatRole::Assistant);
    assert!(last.text.contains("terminated"));
}

#[tokio::test]
async fn wake_up_respawns_after_crash() {
    let (launcher, mut io_rx) = FakeLauncher::new();
    let storage = Arc::new(MemoryStorage::new());
    let hub = Arc::new(SessionHub::new(session_id(), 64));
    let mut events = hub.subscribe();
    let handle = Supervisor::spawn(
        worktree(),
        launch_spec(),
        serde_json::json!({}),
        Arc::new(launcher),
        Arc::clone(&storage) as Arc<dyn vibe80_storage::Storage>,
        Arc::clone(&hub),
        Arc::new(NoDiff),
        SupervisorConfig::default(),
        SystemClock,
    );
    let agent = io_rx.recv().await.unwrap();
    drop(agent.events); // immediate crash

    // creating -> stopped.
    loop {
        match tokio::time::timeout(Duration::from_secs(2), events.rx.recv())
            .await
            .unwrap()
            .unwrap()
        {
            SessionEvent::WorktreeUpdated { worktree }
                if worktree.status == WorktreeStatus::Stopped =>
            {
                break;
            }
            _ => {}
        }
    }

    handle.wake_up().await.unwrap();
    let second = tokio::time::timeout(Duration::from_secs(2), io_rx.recv())
        .await
        .unwrap()
        .unwrap();
    // A fresh process: auth is injected again.
    drop(second);
}

#[tokio::test]
async fn spawn_failure_marks_error_and_audits() {
    let (launcher, _io_rx) = FakeLauncher::new();
    *launcher.fail_next.lock() = true;
    let storage = Arc::new(MemoryStorage::new());
    let hub = Arc::new(SessionHub::new(session_id(), 64));
    let mut events = hub.subscribe();
    let _handle = Supervisor::spawn(
        worktree(),
        launch_spec(),
        serde_json::json!({}),
        Arc::new(launcher),
        Arc::clone(&storage) as Arc<dyn vibe80_storage::Storage>,
        Arc::clone(&hub),
        Arc::new(NoDiff),
        SupervisorConfig::default(),
        SystemClock,
    );

    match tokio::time::timeout(Duration::from_secs(2), events.rx.recv()).await.unwrap().unwrap()
    {
        SessionEvent::WorktreeUpdated { worktree } => {
            assert_eq!(worktree.status, WorktreeStatus::Error);
        }
        other => panic!("unexpected {other:?}"),
    }
    let audit = storage
        .list_audit_events(&WorkspaceId::parse("w0123456789abcdef01234567").unwrap())
        .await
        .unwrap();
    assert!(audit.iter().any(|e| e.event == AuditKind::AgentSpawnFailed));
}

#[tokio::test]
async fn interrupt_forwards_cancel_to_agent() {
    let mut harness = start().await;
    go_ready(&mut harness).await;

    harness.handle.send_user_message("go".to_string(), vec![]).await.unwrap();
    harness
        .agent
        .events
        .send(AgentEvent::TurnStarted { turn_id: TurnId::new("turn-1") })
        .unwrap();
    assert!(matches!(next_event(&mut harness).await, SessionEvent::WorktreeUpdated { .. }));
    assert!(matches!(next_event(&mut harness).await, SessionEvent::TurnStarted { .. }));

    harness.handle.interrupt().await.unwrap();
    let _auth = harness.agent.commands.recv().await.unwrap();
    let _user = harness.agent.commands.recv().await.unwrap();
    match tokio::time::timeout(Duration::from_secs(2), harness.agent.commands.recv())
        .await
        .unwrap()
        .unwrap()
    {
        AgentCommand::Cancel { .. } => {}
        other => panic!("expected cancel, got {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_acknowledges_after_grace() {
    let harness = start().await;
    tokio::time::timeout(Duration::from_secs(2), harness.handle.shutdown())
        .await
        .expect("shutdown must resolve")
        .unwrap();
    for _ in 0..100 {
        if !harness.handle.is_alive() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("supervisor loop did not exit");
}
