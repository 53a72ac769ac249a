// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-worktree agent supervisor.
//!
//! A single select loop per worktree multiplexes four inputs: client
//! commands, parsed agent frames, the maintenance timer (spawn deadline and
//! the cancel ladder), and the ping ticker. The loop is the only writer to
//! the agent's stdin and the only owner of the worktree record's status, so
//! the single-in-flight-turn rule needs no locking beyond the loop itself.
//!
//! Crash handling: the stdout reader hitting EOF commits any buffered
//! partial assistant text with an error suffix and parks the worktree in
//! `stopped`. There is no automatic restart; a client `wake_up` re-runs the
//! spawn flow.

use crate::codec::{FrameReader, FrameWriter};
use crate::launcher::{AgentLauncher, LaunchSpec};
use crate::router::SessionHub;
use crate::AgentError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use vibe80_core::{
    check_transition, AgentCommand, AgentEvent, AttachmentMeta, AuditEvent, AuditKind,
    ChatMessage, ChatRole, Clock, ProviderKey, SessionEvent, TurnId, Worktree, WorktreeId,
    WorktreeStatus,
};
use vibe80_storage::Storage;

/// Supervisor timing knobs. Tests compress these.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long the agent may take to send `ready` after spawn.
    pub spawn_deadline: Duration,
    /// How long to wait for the agent to acknowledge a cancel before SIGTERM.
    pub cancel_ack_timeout: Duration,
    /// SIGTERM-to-SIGKILL grace window.
    pub kill_grace: Duration,
    /// Keep-alive ping cadence.
    pub ping_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            spawn_deadline: Duration::from_secs(30),
            cancel_ack_timeout: Duration::from_secs(5),
            kill_grace: Duration::from_secs(3),
            ping_interval: Duration::from_secs(25),
        }
    }
}

/// Post-turn repository snapshot provider (`git status` + `git diff` through
/// the sandbox).
#[async_trait]
pub trait DiffSource: Send + Sync + 'static {
    async fn snapshot(&self, worktree_id: &WorktreeId) -> Result<(String, String), AgentError>;
}

/// Commands accepted by the supervisor loop.
enum Command {
    UserMessage { text: String, attachments: Vec<AttachmentMeta> },
    Interrupt,
    WakeUp,
    SwitchProvider { provider: ProviderKey },
    Shutdown { ack: oneshot::Sender<()> },
}

/// Messages from the stdout reader task, tagged with the spawn generation so
/// a respawn can ignore a stale reader's tail.
enum ReaderMsg {
    Event { generation: u64, event: AgentEvent },
    Closed { generation: u64 },
}

/// Cloneable handle to a running supervisor.
#[derive(Clone)]
#[derive(Debug)]
pub struct SupervisorHandle {
    worktree_id: WorktreeId,
    tx: mpsc::Sender<Command>,
}

impl SupervisorHandle {
    pub fn worktree_id(&self) -> &WorktreeId {
        &self.worktree_id
    }

    pub async fn send_user_message(
        &self,
        text: String,
        attachments: Vec<AttachmentMeta>,
    ) -> Result<(), AgentError> {
        self.tx
            .send(Command::UserMessage { text, attachments })
            .await
            .map_err(|_| AgentError::SupervisorGone)
    }

    pub async fn interrupt(&self) -> Result<(), AgentError> {
        self.tx.send(Command::Interrupt).await.map_err(|_| AgentError::SupervisorGone)
    }

    pub async fn wake_up(&self) -> Result<(), AgentError> {
        self.tx.send(Command::WakeUp).await.map_err(|_| AgentError::SupervisorGone)
    }

    pub async fn switch_provider(&self, provider: ProviderKey) -> Result<(), AgentError> {
        self.tx
            .send(Command::SwitchProvider { provider })
            .await
            .map_err(|_| AgentError::SupervisorGone)
    }

    /// Graceful stop: SIGTERM to the agent, SIGKILL after the grace window,
    /// then the loop exits. Resolves once the loop acknowledged.
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { ack: ack_tx })
            .await
            .map_err(|_| AgentError::SupervisorGone)?;
        ack_rx.await.map_err(|_| AgentError::SupervisorGone)
    }

    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Spawns supervisor loops.
pub struct Supervisor;

impl Supervisor {
    /// Start a supervisor for one worktree and kick off the agent spawn.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn<C: Clock>(
        worktree: Worktree,
        launch_spec: LaunchSpec,
        auth_payload: serde_json::Value,
        launcher: Arc<dyn AgentLauncher>,
        storage: Arc<dyn Storage>,
        hub: Arc<SessionHub>,
        diff: Arc<dyn DiffSource>,
        config: SupervisorConfig,
        clock: C,
    ) -> SupervisorHandle {
        let (tx, rx) = mpsc::channel(64);
        let handle = SupervisorHandle { worktree_id: worktree.worktree_id.clone(), tx };
        let mut state = Loop {
            worktree,
            launch_spec,
            auth_payload,
            launcher,
            storage,
            hub,
            diff,
            config,
            clock,
            command_rx: rx,
            reader_rx: None,
            generation: 0,
            writer: None,
            pid: None,
            spawn_started: None,
            cancel: None,
            pending_user: None,
            delta_buffers: HashMap::new(),
            command_buffers: HashMap::new(),
        };
        tokio::spawn(async move { state.run().await });
        handle
    }
}

struct CancelState {
    /// When to escalate to SIGTERM.
    term_at: Instant,
    /// Set once SIGTERM was sent; when to escalate to SIGKILL.
    kill_at: Option<Instant>,
}

struct Loop<C: Clock> {
    worktree: Worktree,
    launch_spec: LaunchSpec,
    auth_payload: serde_json::Value,
    launcher: Arc<dyn AgentLauncher>,
    storage: Arc<dyn Storage>,
    hub: Arc<SessionHub>,
    diff: Arc<dyn DiffSource>,
    config: SupervisorConfig,
    clock: C,
    command_rx: mpsc::Receiver<Command>,
    reader_rx: Option<mpsc::Receiver<ReaderMsg>>,
    generation: u64,
    writer: Option<FrameWriter<Box<dyn AsyncWrite + Send + Unpin>>>,
    pid: Option<i32>,
    spawn_started: Option<Instant>,
    cancel: Option<CancelState>,
    /// User message persisted when the agent brackets it with `turn_started`.
    pending_user: Option<ChatMessage>,
    /// Partial assistant text per unfinished turn.
    delta_buffers: HashMap<TurnId, String>,
    /// Partial command output per (turn, item).
    command_buffers: HashMap<(TurnId, String), (String, String)>,
}

impl<C: Clock> Loop<C> {
    async fn run(&mut self) {
        self.spawn_agent().await;

        let mut maintenance = tokio::time::interval(Duration::from_millis(100));
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut ping = tokio::time::interval(self.config.ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first interval tick fires immediately; swallow it so the agent
        // is not pinged before auth.
        ping.tick().await;

        loop {
            // A dummy closed channel keeps select! uniform when no agent is
            // attached (stopped/error states hold no process).
            let reader_rx = self.reader_rx.as_mut();

            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(Command::UserMessage { text, attachments }) => {
                            self.handle_user_message(text, attachments).await;
                        }
                        Some(Command::Interrupt) => self.handle_interrupt().await,
                        Some(Command::WakeUp) => self.handle_wake_up().await,
                        Some(Command::SwitchProvider { provider }) => {
                            self.handle_switch_provider(provider).await;
                        }
                        Some(Command::Shutdown { ack }) => {
                            self.terminate_child().await;
                            let _ = ack.send(());
                            return;
                        }
                        None => {
                            // Every handle dropped: the worktree is being torn
                            // down. Stop the agent and exit.
                            self.terminate_child().await;
                            return;
                        }
                    }
                }
                msg = async {
                    match reader_rx {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match msg {
                        Some(ReaderMsg::Event { generation, event }) if generation == self.generation => {
                            self.handle_agent_event(event).await;
                        }
                        Some(ReaderMsg::Closed { generation }) if generation == self.generation => {
                            self.handle_crash().await;
                        }
                        Some(_) => {} // stale generation
                        None => {
                            self.reader_rx = None;
                        }
                    }
                }
                _ = maintenance.tick() => self.handle_maintenance().await,
                _ = ping.tick() => {
                    if self.writer.is_some() && !matches!(self.worktree.status, WorktreeStatus::Stopped | WorktreeStatus::Error) {
                        self.write_command(&AgentCommand::Ping).await;
                    }
                }
            }
        }
    }

    // ---- spawn / teardown ------------------------------------------------

    async fn spawn_agent(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        match self.launcher.launch(&self.launch_spec).await {
            Ok(io) => {
                self.pid = io.pid;
                self.writer = Some(FrameWriter::new(io.stdin));
                let (tx, rx) = mpsc::channel(256);
                self.reader_rx = Some(rx);
                let mut reader = FrameReader::new(io.stdout);
                tokio::spawn(async move {
                    loop {
                        match reader.next_event().await {
                            Ok(Some(event)) => {
                                if tx.send(ReaderMsg::Event { generation, event }).await.is_err() {
                                    return;
                                }
                            }
                            Ok(None) | Err(_) => {
                                let _ = tx.send(ReaderMsg::Closed { generation }).await;
                                return;
                            }
                        }
                    }
                });
                self.spawn_started = Some(Instant::now());
                let auth = AgentCommand::Auth { payload: self.auth_payload.clone() };
                self.write_command(&auth).await;
            }
            Err(e) => {
                tracing::error!(worktree_id = %self.worktree.worktree_id, error = %e, "agent spawn failed");
                let _ = self
                    .storage
                    .append_audit_event(&AuditEvent {
                        ts_ms: self.clock.epoch_ms(),
                        workspace_id: self.launch_spec.workspace_id,
                        event: AuditKind::AgentSpawnFailed,
                        details: Some(serde_json::json!({
                            "worktreeId": self.worktree.worktree_id.as_str(),
                            "error": e.to_string(),
                        })),
                    })
                    .await;
                self.set_status(WorktreeStatus::Error).await;
            }
        }
    }

    /// SIGTERM, grace window, SIGKILL. Used by shutdown and teardown.
    async fn terminate_child(&mut self) {
        self.writer = None;
        let Some(pid) = self.pid.take() else { return };
        signal_child(pid, nix::sys::signal::Signal::SIGTERM);
        tokio::time::sleep(self.config.kill_grace).await;
        signal_child(pid, nix::sys::signal::Signal::SIGKILL);
    }

    // ---- command handling ------------------------------------------------

    async fn handle_user_message(&mut self, text: String, attachments: Vec<AttachmentMeta>) {
        // A message whose turn bracket has not opened yet still counts as
        // in-flight.
        if !self.worktree.status.can_accept_user_message() || self.pending_user.is_some() {
            tracing::debug!(
                worktree_id = %self.worktree.worktree_id,
                status = %self.worktree.status,
                "rejecting user message: busy"
            );
            self.hub.publish(&SessionEvent::Busy {
                worktree_id: self.worktree.worktree_id.clone(),
            });
            return;
        }
        // A completed worktree settles back to idle when the next prompt
        // arrives; the turn bracket then moves it to processing.
        if self.worktree.status == WorktreeStatus::Completed {
            self.set_status(WorktreeStatus::Idle).await;
        }
        let mut message = ChatMessage::text(
            self.worktree.worktree_id.clone(),
            ChatRole::User,
            text.clone(),
            self.clock.epoch_ms(),
        );
        message.attachments = attachments.clone();
        self.pending_user = Some(message);
        self.write_command(&AgentCommand::UserMessage { text, attachments }).await;
    }

    async fn handle_interrupt(&mut self) {
        if self.worktree.status != WorktreeStatus::Processing || self.cancel.is_some() {
            return;
        }
        self.write_command(&AgentCommand::Cancel { turn_id: None }).await;
        self.cancel = Some(CancelState {
            term_at: Instant::now() + self.config.cancel_ack_timeout,
            kill_at: None,
        });
    }

    async fn handle_wake_up(&mut self) {
        if !matches!(self.worktree.status, WorktreeStatus::Stopped | WorktreeStatus::Error) {
            return;
        }
        self.set_status(WorktreeStatus::Creating).await;
        self.spawn_agent().await;
    }

    async fn handle_switch_provider(&mut self, provider: ProviderKey) {
        self.write_command(&AgentCommand::SwitchProvider { provider }).await;
        self.worktree.provider = provider;
        self.save_and_publish().await;
    }

    // ---- agent event handling -------------------------------------------

    async fn handle_agent_event(&mut self, event: AgentEvent) {
        match &event {
            AgentEvent::Ready { .. } => {
                if self.worktree.status == WorktreeStatus::Creating {
                    self.spawn_started = None;
                    self.set_status(WorktreeStatus::Ready).await;
                }
            }
            AgentEvent::TurnStarted { .. } => {
                self.set_status(WorktreeStatus::Processing).await;
                if let Some(message) = self.pending_user.take() {
                    if let Err(e) =
                        self.storage.append_message(&self.launch_spec.session_id, &message).await
                    {
                        tracing::error!(error = %e, "failed to persist user message");
                    }
                }
            }
            AgentEvent::AssistantDelta { delta, turn_id, .. } => {
                self.delta_buffers.entry(turn_id.clone()).or_default().push_str(delta);
            }
            AgentEvent::AssistantMessage { text, turn_id, .. } => {
                self.delta_buffers.remove(turn_id);
                let message = ChatMessage::text(
                    self.worktree.worktree_id.clone(),
                    ChatRole::Assistant,
                    text.clone(),
                    self.clock.epoch_ms(),
                );
                if let Err(e) =
                    self.storage.append_message(&self.launch_spec.session_id, &message).await
                {
                    tracing::error!(error = %e, "failed to persist assistant message");
                }
            }
            AgentEvent::TurnCompleted { .. } => {
                self.cancel = None;
                self.set_status(WorktreeStatus::Completed).await;
            }
            AgentEvent::TurnError { will_retry, message, .. } => {
                if !*will_retry {
                    tracing::warn!(
                        worktree_id = %self.worktree.worktree_id,
                        message,
                        "turn failed"
                    );
                    self.set_status(WorktreeStatus::Error).await;
                }
            }
            AgentEvent::CommandExecutionDelta { turn_id, item_id, command, delta } => {
                let entry = self
                    .command_buffers
                    .entry((turn_id.clone(), item_id.clone()))
                    .or_insert_with(|| (command.clone(), String::new()));
                entry.1.push_str(delta);
            }
            AgentEvent::CommandExecutionCompleted { turn_id, item_id, command, output, status } => {
                self.command_buffers.remove(&(turn_id.clone(), item_id.clone()));
                let message = ChatMessage::command_execution(
                    self.worktree.worktree_id.clone(),
                    command.clone(),
                    output.clone(),
                    *status,
                    self.clock.epoch_ms(),
                );
                if let Err(e) =
                    self.storage.append_message(&self.launch_spec.session_id, &message).await
                {
                    tracing::error!(error = %e, "failed to persist command message");
                }
            }
            AgentEvent::RepoDiff { .. }
            | AgentEvent::ModelList { .. }
            | AgentEvent::ModelSet { .. } => {}
            AgentEvent::Pong => return,
        }

        let was_turn_completed = matches!(&event, AgentEvent::TurnCompleted { .. });
        self.hub
            .publish(&SessionEvent::from_agent(&self.worktree.worktree_id, event));

        // Post-turn repository snapshot, broadcast after the turn bracket.
        if was_turn_completed {
            match self.diff.snapshot(&self.worktree.worktree_id).await {
                Ok((status, diff)) => self.hub.publish(&SessionEvent::RepoDiff {
                    worktree_id: Some(self.worktree.worktree_id.clone()),
                    status,
                    diff,
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "post-turn diff snapshot failed");
                }
            }
        }
    }

    /// Agent stdout closed while we still believed it alive.
    async fn handle_crash(&mut self) {
        self.writer = None;
        self.reader_rx = None;
        self.pid = None;
        self.cancel = None;
        self.spawn_started = None;

        // Commit unfinished streams so the history shows what was lost.
        let buffers: Vec<(TurnId, String)> = self.delta_buffers.drain().collect();
        for (turn_id, partial) in buffers {
            let text = format!("{partial}\n[agent terminated before completing this message]");
            let message = ChatMessage::text(
                self.worktree.worktree_id.clone(),
                ChatRole::Assistant,
                text.clone(),
                self.clock.epoch_ms(),
            );
            if let Err(e) =
                self.storage.append_message(&self.launch_spec.session_id, &message).await
            {
                tracing::error!(error = %e, "failed to commit partial message");
            }
            self.hub.publish(&SessionEvent::AssistantMessage {
                worktree_id: self.worktree.worktree_id.clone(),
                turn_id,
                item_id: String::new(),
                text,
            });
        }
        self.command_buffers.clear();
        self.pending_user = None;

        if !matches!(self.worktree.status, WorktreeStatus::Error | WorktreeStatus::Stopped) {
            self.set_status(WorktreeStatus::Stopped).await;
        }
    }

    // ---- timers ----------------------------------------------------------

    async fn handle_maintenance(&mut self) {
        let now = Instant::now();

        if self.worktree.status == WorktreeStatus::Creating {
            if let Some(started) = self.spawn_started {
                if now.duration_since(started) > self.config.spawn_deadline {
                    tracing::warn!(
                        worktree_id = %self.worktree.worktree_id,
                        "agent missed spawn deadline"
                    );
                    self.spawn_started = None;
                    if let Some(pid) = self.pid {
                        signal_child(pid, nix::sys::signal::Signal::SIGTERM);
                    }
                    self.set_status(WorktreeStatus::Error).await;
                }
            }
        }

        // Cancel ladder: forwarded cancel -> SIGTERM -> SIGKILL.
        if let Some(cancel) = &mut self.cancel {
            match cancel.kill_at {
                None if now >= cancel.term_at => {
                    if let Some(pid) = self.pid {
                        tracing::info!(
                            worktree_id = %self.worktree.worktree_id,
                            "cancel not acknowledged, sending SIGTERM"
                        );
                        signal_child(pid, nix::sys::signal::Signal::SIGTERM);
                    }
                    cancel.kill_at = Some(now + self.config.kill_grace);
                }
                Some(kill_at) if now >= kill_at => {
                    if let Some(pid) = self.pid {
                        signal_child(pid, nix::sys::signal::Signal::SIGKILL);
                    }
                    self.cancel = None;
                }
                _ => {}
            }
        }
    }

    // ---- plumbing --------------------------------------------------------

    async fn write_command(&mut self, command: &AgentCommand) {
        if let Some(writer) = &mut self.writer {
            if let Err(e) = writer.write_command(command).await {
                tracing::warn!(
                    worktree_id = %self.worktree.worktree_id,
                    error = %e,
                    "stdin write failed"
                );
            }
        }
    }

    async fn set_status(&mut self, to: WorktreeStatus) {
        let from = self.worktree.status;
        if from == to {
            return;
        }
        if let Err(e) = check_transition(from, to) {
            tracing::warn!(worktree_id = %self.worktree.worktree_id, error = %e, "forcing transition");
        }
        self.worktree.status = to;
        self.save_and_publish().await;
    }

    async fn save_and_publish(&mut self) {
        if let Err(e) = self.storage.save_worktree(&self.worktree).await {
            tracing::error!(error = %e, "failed to save worktree");
        }
        self.hub
            .publish(&SessionEvent::WorktreeUpdated { worktree: self.worktree.clone() });
    }
}

/// Signal the helper process; it forwards to the agent or its process group.
fn signal_child(pid: i32, signal: nix::sys::signal::Signal) {
    if pid <= 0 {
        return;
    }
    if let Err(e) = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), signal) {
        tracing::debug!(pid, error = %e, "signal delivery failed (process already gone?)");
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
