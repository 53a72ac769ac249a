// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Turn round-trips through the supervisor plane, driven end-to-end with a
//! scripted agent: ordered events, busy rejection, backfill, shutdown.

use crate::support::*;
use std::time::Duration;
use vibe80_core::{
    AgentEvent, ChatRole, ProviderKey, SessionEvent, TurnId, TurnStatus, WorktreeId,
    WorktreeStatus,
};

async fn ready_agent(host: &mut TestHost) -> (vibe80_agent::FakeAgentIo, vibe80_agent::SubscriberHandle) {
    seed_workspace(&host.state, ws_id()).await;
    seed_session(&host.state, ws_id(), session_id()).await;

    let hub = host.state.routers.hub(session_id());
    let events = hub.subscribe();

    let workspace = host.state.storage.get_workspace(&ws_id()).await.unwrap().unwrap();
    let session = host.state.storage.get_session(&session_id()).await.unwrap().unwrap();
    let worktree = host
        .state
        .storage
        .get_worktree(&session_id(), &WorktreeId::main())
        .await
        .unwrap()
        .unwrap();
    host.state.ensure_supervisor(&workspace, &session, &worktree).await.unwrap();
    let agent = host.agents.recv().await.unwrap();
    (agent, events)
}

async fn next_event(events: &mut vibe80_agent::SubscriberHandle) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), events.rx.recv())
        .await
        .expect("event timeout")
        .expect("hub closed")
}

#[tokio::test]
async fn full_turn_streams_in_order_and_persists() {
    let mut host = host().await;
    let (agent, mut events) = ready_agent(&mut host).await;

    let handle = host
        .state
        .supervisors
        .get(&session_id(), &WorktreeId::main())
        .expect("supervisor registered");
    handle.send_user_message("hello".to_string(), vec![]).await.unwrap();

    let turn = TurnId::new("turn-1");
    agent.events.send(AgentEvent::TurnStarted { turn_id: turn.clone() }).unwrap();
    agent
        .events
        .send(AgentEvent::AssistantDelta {
            delta: "hi".to_string(),
            item_id: "i1".to_string(),
            turn_id: turn.clone(),
        })
        .unwrap();
    agent
        .events
        .send(AgentEvent::AssistantMessage {
            text: "hi there".to_string(),
            item_id: "i1".to_string(),
            turn_id: turn.clone(),
        })
        .unwrap();
    agent
        .events
        .send(AgentEvent::TurnCompleted { turn_id: turn.clone(), status: TurnStatus::Ok })
        .unwrap();

    // Ordered stream: turn_started, deltas, assistant_message,
    // turn_completed (status updates interleave as worktree_updated; the
    // post-turn repo_diff is skipped here because the snapshot needs the
    // real sandbox helper).
    let mut kinds = Vec::new();
    for _ in 0..6 {
        let event = next_event(&mut events).await;
        kinds.push(match event {
            SessionEvent::WorktreeUpdated { .. } => "worktree_updated",
            SessionEvent::TurnStarted { .. } => "turn_started",
            SessionEvent::AssistantDelta { .. } => "assistant_delta",
            SessionEvent::AssistantMessage { .. } => "assistant_message",
            SessionEvent::TurnCompleted { .. } => "turn_completed",
            other => panic!("unexpected event {other:?}"),
        });
    }
    let filtered: Vec<&str> =
        kinds.iter().copied().filter(|k| *k != "worktree_updated").collect();
    assert_eq!(
        filtered,
        vec!["turn_started", "assistant_delta", "assistant_message", "turn_completed"]
    );

    // Both messages persisted in order with strictly increasing timestamps.
    let messages = host
        .state
        .storage
        .list_messages(&session_id(), &WorktreeId::main(), None)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, ChatRole::User);
    assert_eq!(messages[1].role, ChatRole::Assistant);
    assert!(messages[0].timestamp_ms < messages[1].timestamp_ms);
}

#[tokio::test]
async fn second_message_during_turn_is_rejected_busy() {
    let mut host = host().await;
    let (agent, mut events) = ready_agent(&mut host).await;
    let handle = host.state.supervisors.get(&session_id(), &WorktreeId::main()).unwrap();

    handle.send_user_message("first".to_string(), vec![]).await.unwrap();
    agent.events.send(AgentEvent::TurnStarted { turn_id: TurnId::new("t1") }).unwrap();
    // Drain until turn_started observed.
    loop {
        if matches!(next_event(&mut events).await, SessionEvent::TurnStarted { .. }) {
            break;
        }
    }

    handle.send_user_message("second".to_string(), vec![]).await.unwrap();
    loop {
        match next_event(&mut events).await {
            SessionEvent::Busy { worktree_id } => {
                assert!(worktree_id.is_main());
                break;
            }
            other => panic!("expected busy, got {other:?}"),
        }
    }

    let messages = host
        .state
        .storage
        .list_messages(&session_id(), &WorktreeId::main(), None)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1, "second message must not be persisted");
}

#[tokio::test]
async fn backfill_returns_history_after_cursor_before_live_events() {
    let mut host = host().await;
    let (agent, mut events) = ready_agent(&mut host).await;
    let handle = host.state.supervisors.get(&session_id(), &WorktreeId::main()).unwrap();

    // Complete one turn to build history.
    handle.send_user_message("hello".to_string(), vec![]).await.unwrap();
    let turn = TurnId::new("t1");
    agent.events.send(AgentEvent::TurnStarted { turn_id: turn.clone() }).unwrap();
    agent
        .events
        .send(AgentEvent::AssistantMessage {
            text: "answer".to_string(),
            item_id: "i1".to_string(),
            turn_id: turn.clone(),
        })
        .unwrap();
    agent
        .events
        .send(AgentEvent::TurnCompleted { turn_id: turn, status: TurnStatus::Ok })
        .unwrap();
    loop {
        if matches!(next_event(&mut events).await, SessionEvent::TurnCompleted { .. }) {
            break;
        }
    }

    let messages = host
        .state
        .storage
        .list_messages(&session_id(), &WorktreeId::main(), None)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);

    // Sync from the first message's cursor: exactly the suffix, in order.
    let hub = host.state.routers.hub(session_id());
    let backfill = hub
        .backfill(host.state.storage.as_ref(), &WorktreeId::main(), Some(&messages[0].id))
        .await
        .unwrap();
    assert_eq!(backfill.len(), 1);
    match &backfill[0] {
        SessionEvent::WorktreeMessage { message } => assert_eq!(message.text, "answer"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn graceful_shutdown_drains_all_supervisors() {
    let mut host = host().await;
    let (_agent, _events) = ready_agent(&mut host).await;
    assert_eq!(host.state.supervisors.len(), 1);

    tokio::time::timeout(Duration::from_secs(5), host.state.graceful_shutdown())
        .await
        .expect("shutdown must drain within the grace budget");
    assert!(host.state.supervisors.is_empty());
    assert!(host.state.is_shutting_down());
}

#[tokio::test]
async fn crashed_agent_parks_worktree_stopped_until_wake_up() {
    let mut host = host().await;
    let (agent, mut events) = ready_agent(&mut host).await;

    agent
        .events
        .send(AgentEvent::Ready { thread_id: "th".to_string(), provider: ProviderKey::Codex })
        .unwrap();
    loop {
        if matches!(next_event(&mut events).await, SessionEvent::Ready { .. }) {
            break;
        }
    }
    drop(agent.events); // crash

    loop {
        if let SessionEvent::WorktreeUpdated { worktree } = next_event(&mut events).await {
            if worktree.status == WorktreeStatus::Stopped {
                break;
            }
        }
    }

    // wake_up respawns through the same supervisor.
    let handle = host.state.supervisors.get(&session_id(), &WorktreeId::main()).unwrap();
    handle.wake_up().await.unwrap();
    let respawned = tokio::time::timeout(Duration::from_secs(2), host.agents.recv())
        .await
        .expect("respawn timeout")
        .expect("launcher closed");
    drop(respawned);
}
