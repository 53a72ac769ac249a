// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::Arc as StdArc;
use vibe80_core::{ChatMessage, ChatRole, TurnId};
use vibe80_storage::MemoryStorage;

fn session_id() -> SessionId {
    SessionId::parse("s0123456789abcdef01234567").unwrap()
}

fn delta(i: usize) -> SessionEvent {
    SessionEvent::AssistantDelta {
        worktree_id: WorktreeId::main(),
        turn_id: TurnId::new("t1"),
        item_id: "i1".to_string(),
        delta: format!("d{i}"),
    }
}

#[tokio::test]
async fn fan_out_preserves_order_per_subscriber() {
    let hub = SessionHub::new(session_id(), 16);
    let mut a = hub.subscribe();
    let mut b = hub.subscribe();
    for i in 0..5 {
        hub.publish(&delta(i));
    }
    for sub in [&mut a, &mut b] {
        for i in 0..5 {
            match sub.rx.recv().await.unwrap() {
                SessionEvent::AssistantDelta { delta, .. } => assert_eq!(delta, format!("d{i}")),
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}

#[tokio::test]
async fn slow_consumer_is_dropped_fast_one_keeps_streaming() {
    let hub = SessionHub::new(session_id(), 4);
    let slow = hub.subscribe();
    let fast = hub.subscribe();

    // Publish queue bound + 1 deltas without the slow subscriber draining,
    // while the fast one drains concurrently.
    let drain = tokio::spawn(async move {
        let mut fast_events = Vec::new();
        let mut rx = fast.rx;
        while let Some(event) = rx.recv().await {
            fast_events.push(event);
        }
        fast_events
    });

    for i in 0..5 {
        hub.publish(&delta(i));
        tokio::task::yield_now().await;
    }
    assert_eq!(hub.subscriber_count(), 1, "slow consumer evicted");

    // The slow subscriber's queue closes without an unsubscribe call.
    let mut slow_rx = slow.rx;
    let mut received = 0;
    while slow_rx.recv().await.is_some() {
        received += 1;
    }
    assert!(received <= 4, "slow consumer got at most its queue bound");

    // Remaining events still reach the fast subscriber in order.
    for i in 5..8 {
        hub.publish(&delta(i));
    }
    drop(hub);
    let fast_events = drain.await.unwrap();
    assert_eq!(fast_events.len(), 8);
}

#[tokio::test]
async fn unsubscribe_detaches_cleanly() {
    let hub = SessionHub::new(session_id(), 4);
    let handle = hub.subscribe();
    assert_eq!(hub.subscriber_count(), 1);
    hub.unsubscribe(handle.id);
    assert_eq!(hub.subscriber_count(), 0);
}

#[tokio::test]
async fn backfill_returns_messages_after_cursor_in_order() {
    let storage = StdArc::new(MemoryStorage::new());
    let hub = SessionHub::new(session_id(), 16);
    let mut ids = Vec::new();
    for (i, text) in ["a", "b", "c"].iter().enumerate() {
        let msg = ChatMessage::text(WorktreeId::main(), ChatRole::User, *text, (i + 1) as u64);
        ids.push(storage.append_message(&session_id(), &msg).await.unwrap().id);
    }

    let events = hub
        .backfill(storage.as_ref(), &WorktreeId::main(), Some(&ids[0]))
        .await
        .unwrap();
    let texts: Vec<&str> = events
        .iter()
        .map(|e| match e {
            SessionEvent::WorktreeMessage { message } => message.text.as_str(),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(texts, vec!["b", "c"]);
}

#[tokio::test]
async fn hub_registry_returns_same_hub_per_session() {
    let routers = RouterSet::new(8);
    let a = routers.hub(session_id());
    let b = routers.hub(session_id());
    assert!(StdArc::ptr_eq(&a, &b));
}
