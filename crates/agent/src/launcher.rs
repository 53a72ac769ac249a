// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent process launching.
//!
//! The [`AgentLauncher`] trait is the seam between the supervisor and the
//! sandbox: the production [`SandboxLauncher`] goes through `vibe80-run-as`,
//! the [`FakeLauncher`] hands tests an in-memory agent they can script.

use crate::AgentError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use vibe80_core::{ProviderKey, SessionId, WorkspaceId, WorktreeId};
use vibe80_sandbox::policy::NetMode;
use vibe80_sandbox::{ExecSpec, SandboxInvoker};

/// Everything needed to spawn one worktree's agent.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub workspace_id: WorkspaceId,
    pub session_id: SessionId,
    pub worktree_id: WorktreeId,
    pub provider: ProviderKey,
    /// cwd of the agent.
    pub worktree_dir: PathBuf,
    /// RW: uploads the agent may read and write.
    pub attachments_dir: PathBuf,
    /// RO: the session clone, for cross-worktree reads.
    pub repository_dir: PathBuf,
    /// RW: scratch space; exported as TMPDIR.
    pub temp_dir: PathBuf,
    /// RO: provider credential files named in the auth frame.
    pub credential_files: Vec<PathBuf>,
    pub internet_access: bool,
}

/// Live stdio of a spawned agent. `pid` is `None` for in-memory fakes; when
/// set it names a process group (`run-as` detaches one for piped children).
pub struct AgentIo {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub pid: Option<i32>,
}

/// Spawns agent subprocesses.
#[async_trait]
pub trait AgentLauncher: Send + Sync + 'static {
    async fn launch(&self, spec: &LaunchSpec) -> Result<AgentIo, AgentError>;
}

/// Production launcher: every agent goes through the `run-as` helper.
pub struct SandboxLauncher {
    invoker: SandboxInvoker,
}

impl SandboxLauncher {
    pub fn new(invoker: SandboxInvoker) -> Self {
        Self { invoker }
    }

    /// The sandbox spec for a launch: cwd = worktree, RW worktree +
    /// attachments + temp, RO repository + credential files, net `tcp:443`
    /// iff internet access is granted.
    pub fn exec_spec(spec: &LaunchSpec) -> ExecSpec {
        let mut exec = ExecSpec::new(spec.workspace_id, spec.provider.as_str())
            .cwd(&spec.worktree_dir)
            .rw_dir(&spec.worktree_dir)
            .rw_dir(&spec.attachments_dir)
            .rw_dir(&spec.temp_dir)
            .ro_dir(&spec.repository_dir)
            .env("TMPDIR", spec.temp_dir.to_string_lossy())
            .env("TERM", "dumb")
            .net(if spec.internet_access { NetMode::Tcp(vec![443]) } else { NetMode::None });
        for file in &spec.credential_files {
            exec = exec.ro_file(file);
        }
        exec
    }
}

#[async_trait]
impl AgentLauncher for SandboxLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<AgentIo, AgentError> {
        let exec = Self::exec_spec(spec);
        let mut child = self.invoker.spawn(&exec)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::SpawnFailed("agent stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::SpawnFailed("agent stdout not piped".to_string()))?;
        let pid = child.id().map(|id| id as i32);

        // Reap the child in the background; the supervisor observes exit via
        // stdout EOF and signals via the process group.
        let worktree_id = spec.worktree_id.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    tracing::info!(%worktree_id, ?status, "agent process exited");
                }
                Err(e) => tracing::warn!(%worktree_id, error = %e, "agent wait failed"),
            }
        });

        Ok(AgentIo { stdin: Box::new(stdin), stdout: Box::new(stdout), pid })
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeAgentIo, FakeLauncher};

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::mpsc;
    use vibe80_core::{AgentCommand, AgentEvent};

    /// Test-side handle to one fake agent: commands the supervisor wrote,
    /// and a sender for events the "agent" emits. Dropping `events`
    /// simulates a crash (stdout EOF).
    pub struct FakeAgentIo {
        pub spec: LaunchSpec,
        pub commands: mpsc::UnboundedReceiver<AgentCommand>,
        pub events: mpsc::UnboundedSender<AgentEvent>,
    }

    /// In-memory launcher. Each `launch` delivers a [`FakeAgentIo`] on the
    /// channel handed out at construction.
    pub struct FakeLauncher {
        io_tx: mpsc::UnboundedSender<FakeAgentIo>,
        /// When set, `launch` fails (spawn-failure tests).
        pub fail_next: Mutex<bool>,
    }

    impl FakeLauncher {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeAgentIo>) {
            let (io_tx, io_rx) = mpsc::unbounded_channel();
            (Self { io_tx, fail_next: Mutex::new(false) }, io_rx)
        }
    }

    #[async_trait]
    impl AgentLauncher for FakeLauncher {
        async fn launch(&self, spec: &LaunchSpec) -> Result<AgentIo, AgentError> {
            if std::mem::take(&mut *self.fail_next.lock()) {
                return Err(AgentError::SpawnFailed("scripted spawn failure".to_string()));
            }

            // Supervisor stdin -> parsed AgentCommand stream for the test.
            let (stdin_write, stdin_read) = tokio::io::duplex(64 * 1024);
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdin_read).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Ok(command) = serde_json::from_str::<AgentCommand>(&line) {
                        if command_tx.send(command).is_err() {
                            break;
                        }
                    }
                }
            });

            // Test AgentEvent stream -> supervisor stdout.
            let (mut stdout_write, stdout_read) = tokio::io::duplex(64 * 1024);
            let (event_tx, mut event_rx) = mpsc::unbounded_channel::<AgentEvent>();
            tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    let Ok(mut line) = serde_json::to_vec(&event) else { break };
                    line.push(b'\n');
                    if stdout_write.write_all(&line).await.is_err() {
                        break;
                    }
                }
                // Sender dropped: close the pipe, supervisor sees EOF.
            });

            let _ = self.io_tx.send(FakeAgentIo {
                spec: spec.clone(),
                commands: command_rx,
                events: event_tx,
            });

            Ok(AgentIo {
                stdin: Box::new(stdin_write),
                stdout: Box::new(stdout_read),
                pid: None,
            })
        }
    }
}

#[cfg(test)]
#[path = "launcher_tests.rs"]
mod tests;
