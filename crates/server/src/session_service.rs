// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session manager: one Git clone per session, plus the directory tree
//! around it. Every filesystem and Git operation goes through the sandbox
//! helper as the workspace user; the server itself never touches the tree.

use crate::error::ApiError;
use std::path::PathBuf;
use std::sync::Arc;
use vibe80_core::{
    AuditEvent, AuditKind, Clock, ProviderKey, Session, SessionId, Workspace, Worktree,
    WorktreeConfig, WorktreeId, WorktreeStatus,
};
use vibe80_sandbox::policy::NetMode;
use vibe80_sandbox::{ExecSpec, SandboxInvoker};
use vibe80_storage::Storage;

/// Ports Git may dial during clone/fetch (ssh, http, https).
const GIT_PORTS: &[u16] = &[22, 80, 443];

/// Optional clone authentication.
#[derive(Debug, Clone, Default)]
pub struct CloneAuth {
    /// Private key path (must already live inside the workspace tree).
    pub ssh_key_path: Option<PathBuf>,
}

pub struct SessionService<C: Clock> {
    storage: Arc<dyn Storage>,
    invoker: SandboxInvoker,
    workspace_root: PathBuf,
    clock: C,
}

impl<C: Clock> SessionService<C> {
    pub fn new(
        storage: Arc<dyn Storage>,
        invoker: SandboxInvoker,
        workspace_root: PathBuf,
        clock: C,
    ) -> Self {
        Self { storage, invoker, workspace_root, clock }
    }

    pub fn workspace_root(&self) -> &PathBuf {
        &self.workspace_root
    }

    /// Create a session: directory tree, Git clone, session + main-worktree
    /// records. A failed clone rolls the directory tree back.
    pub async fn create_session(
        &self,
        workspace: &Workspace,
        repo_url: &str,
        name: Option<String>,
        auth: CloneAuth,
    ) -> Result<(Session, Worktree), ApiError> {
        if repo_url.trim().is_empty() {
            return Err(ApiError::validation("repoUrl is required"));
        }
        let now = self.clock.epoch_ms();
        let session = Session {
            session_id: SessionId::generate(),
            workspace_id: workspace.workspace_id,
            repo_url: repo_url.to_string(),
            name: name.unwrap_or_else(|| repo_name(repo_url)),
            created_at_ms: now,
            last_activity_at_ms: now,
            deleted_at_ms: None,
        };

        let session_dir = session.session_dir(&self.workspace_root);
        let sessions_dir = self
            .workspace_root
            .join(workspace.workspace_id.as_str())
            .join("sessions");

        // Tree first, clone second; `mkdir -p` keeps this idempotent.
        let subdirs = [
            session.attachments_dir(&self.workspace_root),
            session.worktrees_dir(&self.workspace_root),
            session.logs_dir(&self.workspace_root),
        ];
        let mut mkdir = ExecSpec::new(workspace.workspace_id, "mkdir")
            .arg("-p")
            .rw_dir(&sessions_dir);
        for dir in &subdirs {
            mkdir = mkdir.arg(dir.to_string_lossy());
        }
        self.invoker.run(&mkdir).await?;
        let chmod = ExecSpec::new(workspace.workspace_id, "chmod")
            .args(["-R", "2750"])
            .arg(session_dir.to_string_lossy())
            .rw_dir(&sessions_dir);
        self.invoker.run(&chmod).await?;

        // Clone with a filtered environment; never prompt.
        let repository_dir = session.repository_dir(&self.workspace_root);
        let mut clone = ExecSpec::new(workspace.workspace_id, "git")
            .args(["clone", repo_url])
            .arg(repository_dir.to_string_lossy())
            .env("GIT_TERMINAL_PROMPT", "0")
            .rw_dir(&session_dir)
            .net(NetMode::Tcp(GIT_PORTS.to_vec()));
        if let Some(key) = &auth.ssh_key_path {
            clone = clone
                .env(
                    "GIT_SSH_COMMAND",
                    format!("ssh -i {} -o StrictHostKeyChecking=accept-new", key.display()),
                )
                .ro_file(key);
        }
        if let Err(e) = self.invoker.run(&clone).await {
            self.rollback_session_dir(workspace, &session_dir, &sessions_dir).await;
            return Err(ApiError::external(format!("git clone failed: {e}")));
        }

        let branch = self.default_branch(workspace, &repository_dir).await;
        let main = Worktree {
            worktree_id: WorktreeId::main(),
            session_id: session.session_id,
            branch_name: branch,
            status: WorktreeStatus::Idle,
            provider: default_provider(workspace),
            config: WorktreeConfig::default(),
            created_at_ms: now,
            color: None,
            closed_at_ms: None,
        };

        self.storage.save_session(&session).await?;
        self.storage.save_worktree(&main).await?;
        self.audit(workspace, AuditKind::SessionCreated, &session).await;
        tracing::info!(session_id = %session.session_id, repo_url, "session created");
        Ok((session, main))
    }

    async fn rollback_session_dir(
        &self,
        workspace: &Workspace,
        session_dir: &std::path::Path,
        sessions_dir: &std::path::Path,
    ) {
        let rm = ExecSpec::new(workspace.workspace_id, "rm")
            .args(["-rf"])
            .arg(session_dir.to_string_lossy())
            .rw_dir(sessions_dir);
        if let Err(e) = self.invoker.run(&rm).await {
            tracing::warn!(error = %e, "session rollback failed");
        }
    }

    /// Default branch of a fresh clone; falls back to `main`.
    async fn default_branch(&self, workspace: &Workspace, repository_dir: &std::path::Path) -> String {
        let spec = ExecSpec::new(workspace.workspace_id, "git")
            .args(["symbolic-ref", "--short", "HEAD"])
            .cwd(repository_dir)
            .rw_dir(repository_dir);
        match self.invoker.run(&spec).await {
            Ok(output) => {
                let branch = output.stdout.trim();
                if branch.is_empty() { "main".to_string() } else { branch.to_string() }
            }
            Err(e) => {
                tracing::warn!(error = %e, "default-branch detection failed");
                "main".to_string()
            }
        }
    }

    pub async fn get_session(&self, id: &SessionId) -> Result<Session, ApiError> {
        self.storage
            .get_session(id)
            .await?
            .filter(|s| !s.is_deleted())
            .ok_or_else(|| ApiError::not_found("unknown session"))
    }

    pub async fn list_sessions(&self, workspace_id: &vibe80_core::WorkspaceId) -> Result<Vec<Session>, ApiError> {
        Ok(self
            .storage
            .list_sessions(workspace_id)
            .await?
            .into_iter()
            .filter(|s| !s.is_deleted())
            .collect())
    }

    /// Soft-delete; the directory tree stays for the workspace owner.
    pub async fn delete_session(&self, id: &SessionId) -> Result<(), ApiError> {
        let mut session = self.get_session(id).await?;
        session.deleted_at_ms = Some(self.clock.epoch_ms());
        self.storage.save_session(&session).await?;
        Ok(())
    }

    pub async fn touch_activity(&self, id: &SessionId) -> Result<(), ApiError> {
        let mut session = self.get_session(id).await?;
        session.last_activity_at_ms = self.clock.epoch_ms();
        self.storage.save_session(&session).await?;
        Ok(())
    }

    async fn audit(&self, workspace: &Workspace, event: AuditKind, session: &Session) {
        let record = AuditEvent {
            ts_ms: self.clock.epoch_ms(),
            workspace_id: workspace.workspace_id,
            event,
            details: Some(serde_json::json!({ "sessionId": session.session_id.as_str() })),
        };
        if let Err(e) = self.storage.append_audit_event(&record).await {
            tracing::error!(error = %e, "audit append failed");
        }
    }
}

/// Last path component of a repo URL, without `.git`.
fn repo_name(repo_url: &str) -> String {
    repo_url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or("repository")
        .trim_end_matches(".git")
        .to_string()
}

/// First enabled provider, defaulting to codex.
fn default_provider(workspace: &Workspace) -> ProviderKey {
    workspace.enabled_providers().next().unwrap_or(ProviderKey::Codex)
}

#[cfg(test)]
#[path = "session_service_tests.rs"]
mod tests;
