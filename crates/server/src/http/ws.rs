// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The live session WebSocket.
//!
//! One socket is bound to one session. Authentication is the `?token=`
//! query parameter or an initial `{type:"auth"}` frame; after that the
//! connection is an explicit state struct pumping two directions: client
//! frames in, session events out. A subscriber whose event queue closed
//! underneath it (hub eviction) is closed with reason `slow_consumer`.

use crate::error::ApiError;
use crate::lifecycle::ServerState;
use crate::metrics::Metrics;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vibe80_agent::{SessionHub, SubscriberHandle};
use vibe80_core::{
    ClientFrame, Session, SessionEvent, SessionId, Workspace, WorktreeId,
};

/// Close code for policy violations (RFC 6455 1008).
const CLOSE_POLICY: u16 = 1008;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// `GET /api/session/:id/ws`.
pub async fn upgrade(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, session_id, query.token, socket))
}

async fn handle_socket(
    state: Arc<ServerState>,
    session_id: String,
    query_token: Option<String>,
    socket: WebSocket,
) {
    Metrics::incr(&state.metrics.ws_connections);
    let (mut tx, mut rx) = socket.split();

    match establish(&state, &session_id, query_token, &mut rx).await {
        Ok((workspace, session)) => {
            let hub = state.routers.hub(session.session_id);
            let subscriber = hub.subscribe();
            let connection = WsConnection {
                state,
                workspace,
                session,
                hub,
                subscriber,
                tx,
                rx,
            };
            connection.run().await;
        }
        Err(e) => {
            tracing::debug!(error = %e, "websocket auth failed");
            let _ = tx
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_POLICY,
                    reason: "unauthorized".into(),
                })))
                .await;
        }
    }
}

/// Authenticate and bind the socket to its session.
async fn establish(
    state: &ServerState,
    session_id: &str,
    query_token: Option<String>,
    rx: &mut SplitStream<WebSocket>,
) -> Result<(Workspace, Session), ApiError> {
    let session_id =
        SessionId::parse(session_id).map_err(|_| ApiError::validation("invalid session id"))?;

    let token = match query_token {
        Some(token) => token,
        None => {
            // First frame must be auth; bound wait.
            let frame = tokio::time::timeout(Duration::from_secs(10), rx.next())
                .await
                .map_err(|_| ApiError::auth("auth frame timeout"))?
                .and_then(|r| r.ok())
                .ok_or_else(|| ApiError::auth("socket closed before auth"))?;
            match frame {
                Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(ClientFrame::Auth { token }) => token,
                    _ => return Err(ApiError::auth("first frame must be auth")),
                },
                _ => return Err(ApiError::auth("first frame must be auth")),
            }
        }
    };

    let workspace_id = match state.identity.verify_access(&token) {
        Ok(id) => id,
        Err(_) => state
            .identity
            .verify_mono(&token)
            .ok_or_else(|| ApiError::auth("invalid token"))?,
    };

    state.assert_session_owned(&workspace_id, &session_id).await?;
    let session = state.sessions.get_session(&session_id).await?;
    let workspace = state.workspaces.get_workspace(&workspace_id).await?;
    Ok((workspace, session))
}

/// One live socket's state and protocol loop.
struct WsConnection {
    state: Arc<ServerState>,
    workspace: Workspace,
    session: Session,
    hub: Arc<SessionHub>,
    subscriber: SubscriberHandle,
    tx: SplitSink<WebSocket, Message>,
    rx: SplitStream<WebSocket>,
}

impl WsConnection {
    async fn run(mut self) {
        // Initial snapshot so the client can render before any live event.
        match self.state.worktrees.list_worktrees(&self.session.session_id).await {
            Ok(worktrees) => {
                self.send_event(&SessionEvent::WorktreesList { worktrees }).await;
            }
            Err(e) => tracing::warn!(error = %e, "worktree snapshot failed"),
        }

        let ping_interval = self.state.config.ws_ping_interval;
        let mut ping = tokio::time::interval(ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ping.tick().await;
        let mut last_pong = Instant::now();

        loop {
            tokio::select! {
                message = self.rx.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.on_frame(&text).await {
                                self.send_event(&SessionEvent::Error {
                                    message: e.message.clone(),
                                    code: e.code.clone(),
                                })
                                .await;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => last_pong = Instant::now(),
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = self.tx.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(Message::Binary(_))) => {
                            self.send_event(&SessionEvent::Error {
                                message: "binary frames are not supported".to_string(),
                                code: None,
                            })
                            .await;
                        }
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "websocket read error");
                            break;
                        }
                    }
                }
                event = self.subscriber.rx.recv() => {
                    match event {
                        Some(event) => self.send_event(&event).await,
                        None => {
                            // The hub evicted us for not draining.
                            Metrics::incr(&self.state.metrics.slow_consumers_dropped);
                            let _ = self.tx.send(Message::Close(Some(CloseFrame {
                                code: CLOSE_POLICY,
                                reason: "slow_consumer".into(),
                            })))
                            .await;
                            return;
                        }
                    }
                }
                _ = ping.tick() => {
                    if last_pong.elapsed() > ping_interval * 2 {
                        tracing::debug!(session_id = %self.session.session_id, "missed pongs, closing");
                        break;
                    }
                    let _ = self.tx.send(Message::Ping(Vec::new())).await;
                }
            }
        }
        self.hub.unsubscribe(self.subscriber.id);
    }

    async fn send_event(&mut self, event: &SessionEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                let _ = self.tx.send(Message::Text(json)).await;
            }
            Err(e) => tracing::error!(error = %e, "event serialization failed"),
        }
    }

    async fn on_frame(&mut self, text: &str) -> Result<(), ApiError> {
        let frame: ClientFrame = serde_json::from_str(text)
            .map_err(|_| ApiError::validation("unrecognised frame"))?;
        match frame {
            ClientFrame::Auth { .. } => Ok(()), // already authenticated
            ClientFrame::Ping => {
                self.send_event(&SessionEvent::Pong).await;
                Ok(())
            }
            ClientFrame::UserMessage { worktree_id, text, attachments } => {
                let worktree_id = worktree_id.unwrap_or_else(WorktreeId::main);
                self.deliver_user_message(&worktree_id, text, attachments).await
            }
            ClientFrame::WorktreeSendMessage { worktree_id, text, attachments } => {
                self.deliver_user_message(&worktree_id, text, attachments).await
            }
            ClientFrame::SwitchProvider { worktree_id, provider } => {
                if !self.workspace.provider_enabled(provider) {
                    return Err(ApiError::forbidden(format!(
                        "provider {provider} is not enabled"
                    )));
                }
                let handle = self.supervisor_for(&worktree_id).await?;
                handle
                    .switch_provider(provider)
                    .await
                    .map_err(|_| ApiError::internal("supervisor is gone"))
            }
            ClientFrame::Interrupt { worktree_id } => {
                if let Some(handle) = self
                    .state
                    .supervisors
                    .get(&self.session.session_id, &worktree_id)
                {
                    let _ = handle.interrupt().await;
                }
                Ok(())
            }
            ClientFrame::WakeUp { worktree_id } => {
                let handle = self.supervisor_for(&worktree_id).await?;
                handle.wake_up().await.map_err(|_| ApiError::internal("supervisor is gone"))
            }
            ClientFrame::WorktreeMessagesSync { worktree_id, last_seen_message_id } => {
                let cursor = last_seen_message_id
                    .as_deref()
                    .map(vibe80_core::MessageId::parse)
                    .transpose()
                    .map_err(|_| ApiError::validation("invalid message cursor"))?;
                let events = self
                    .hub
                    .backfill(self.state.storage.as_ref(), &worktree_id, cursor.as_ref())
                    .await?;
                for event in &events {
                    self.send_event(event).await;
                }
                Ok(())
            }
        }
    }

    async fn deliver_user_message(
        &mut self,
        worktree_id: &WorktreeId,
        text: String,
        attachments: Vec<vibe80_core::AttachmentMeta>,
    ) -> Result<(), ApiError> {
        let handle = self.supervisor_for(worktree_id).await?;
        Metrics::incr(&self.state.metrics.turns_started);
        let _ = self.state.sessions.touch_activity(&self.session.session_id).await;
        handle
            .send_user_message(text, attachments)
            .await
            .map_err(|_| ApiError::internal("supervisor is gone"))
    }

    /// Live supervisor for a worktree, spawning one for dormant worktrees.
    async fn supervisor_for(
        &self,
        worktree_id: &WorktreeId,
    ) -> Result<vibe80_agent::SupervisorHandle, ApiError> {
        let worktree = self
            .state
            .worktrees
            .get_worktree(&self.session.session_id, worktree_id)
            .await?;
        self.state
            .ensure_supervisor(&self.workspace, &self.session, &worktree)
            .await
    }
}
