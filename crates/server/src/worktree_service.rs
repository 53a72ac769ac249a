// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worktree manager: per-worktree Git worktrees over the session clone.
//!
//! All Git plumbing runs through the sandbox as the workspace user. Guards
//! (quota, main-protection, state checks) run before any helper call so a
//! refused request never touches the filesystem.

use crate::error::ApiError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vibe80_core::{
    AuditEvent, AuditKind, Clock, ProviderKey, Session, SessionId, SystemClock, Workspace,
    Worktree, WorktreeConfig, WorktreeContext, WorktreeId, WorktreeStatus,
};
use vibe80_sandbox::policy::NetMode;
use vibe80_sandbox::{ExecSpec, SandboxInvoker};
use vibe80_storage::Storage;

/// Maximum active (non-closed) worktrees per session.
pub const MAX_ACTIVE_WORKTREES: usize = 10;

/// Request to create a worktree.
#[derive(Debug, Clone)]
pub struct CreateWorktreeSpec {
    pub provider: ProviderKey,
    pub context: WorktreeContext,
    pub config: WorktreeConfig,
    pub color: Option<String>,
}

/// Outcome of a merge back into the default branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    Conflict { message: String },
}

pub struct WorktreeService<C: Clock = SystemClock> {
    storage: Arc<dyn Storage>,
    invoker: SandboxInvoker,
    workspace_root: PathBuf,
    clock: C,
}

impl<C: Clock> WorktreeService<C> {
    pub fn new(
        storage: Arc<dyn Storage>,
        invoker: SandboxInvoker,
        workspace_root: PathBuf,
        clock: C,
    ) -> Self {
        Self { storage, invoker, workspace_root, clock }
    }

    /// Active (non-closed) worktrees of a session.
    pub async fn list_worktrees(&self, session_id: &SessionId) -> Result<Vec<Worktree>, ApiError> {
        Ok(self
            .storage
            .list_worktrees(session_id)
            .await?
            .into_iter()
            .filter(|w| !w.is_closed())
            .collect())
    }

    pub async fn get_worktree(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
    ) -> Result<Worktree, ApiError> {
        self.storage
            .get_worktree(session_id, worktree_id)
            .await?
            .filter(|w| !w.is_closed())
            .ok_or_else(|| ApiError::not_found("unknown worktree"))
    }

    /// Create a worktree (quota-checked), `git worktree add` through C1.
    pub async fn create_worktree(
        &self,
        workspace: &Workspace,
        session: &Session,
        spec: CreateWorktreeSpec,
    ) -> Result<Worktree, ApiError> {
        let active = self.list_worktrees(&session.session_id).await?;
        if active.len() >= MAX_ACTIVE_WORKTREES {
            return Err(ApiError::conflict(format!(
                "worktree quota reached ({MAX_ACTIVE_WORKTREES} active)"
            )));
        }

        let (base_branch, parent) = match &spec.context {
            WorktreeContext::New { starting_branch } => {
                let base = match starting_branch {
                    Some(branch) => branch.clone(),
                    None => self.default_branch(&session.session_id).await?,
                };
                (base, None)
            }
            WorktreeContext::Fork { source_worktree_id } => {
                let source = self
                    .get_worktree(&session.session_id, source_worktree_id)
                    .await
                    .map_err(|_| ApiError::not_found("fork source worktree not found"))?;
                (source.branch_name, Some(source.worktree_id))
            }
        };

        let worktree_id = WorktreeId::generate();
        let branch_name = format!("vibe80/{}", worktree_id.as_str());
        let worktree_dir = session.worktrees_dir(&self.workspace_root).join(worktree_id.as_str());
        let repository_dir = session.repository_dir(&self.workspace_root);

        let add = ExecSpec::new(workspace.workspace_id, "git")
            .args(["worktree", "add", "-b", &branch_name])
            .arg(worktree_dir.to_string_lossy())
            .arg(&base_branch)
            .cwd(&repository_dir)
            .rw_dir(session.session_dir(&self.workspace_root));
        self.invoker.run(&add).await?;

        let mut config = spec.config;
        config.parent_worktree_id = parent;
        let worktree = Worktree {
            worktree_id,
            session_id: session.session_id,
            branch_name,
            status: WorktreeStatus::Creating,
            provider: spec.provider,
            config,
            created_at_ms: self.clock.epoch_ms(),
            color: spec.color,
            closed_at_ms: None,
        };
        self.storage.save_worktree(&worktree).await?;
        self.audit(workspace, AuditKind::WorktreeCreated, &worktree).await;
        Ok(worktree)
    }

    /// Close a worktree: refuse `main`, remove the directory, prune.
    pub async fn close_worktree(
        &self,
        workspace: &Workspace,
        session: &Session,
        worktree_id: &WorktreeId,
    ) -> Result<Worktree, ApiError> {
        if worktree_id.is_main() {
            return Err(ApiError::validation("the main worktree cannot be closed"));
        }
        let mut worktree = self.get_worktree(&session.session_id, worktree_id).await?;
        if !worktree.status.is_closeable() {
            return Err(ApiError::conflict(format!(
                "worktree is {}; stop it before closing",
                worktree.status
            )));
        }

        let worktree_dir = session.worktrees_dir(&self.workspace_root).join(worktree_id.as_str());
        let repository_dir = session.repository_dir(&self.workspace_root);
        let rm = ExecSpec::new(workspace.workspace_id, "rm")
            .args(["-rf"])
            .arg(worktree_dir.to_string_lossy())
            .rw_dir(session.worktrees_dir(&self.workspace_root));
        self.invoker.run(&rm).await?;
        let prune = ExecSpec::new(workspace.workspace_id, "git")
            .args(["worktree", "prune"])
            .cwd(&repository_dir)
            .rw_dir(&repository_dir);
        self.invoker.run(&prune).await?;

        worktree.closed_at_ms = Some(self.clock.epoch_ms());
        if !matches!(worktree.status, WorktreeStatus::Stopped | WorktreeStatus::Error) {
            worktree.status = WorktreeStatus::Stopped;
        }
        self.storage.save_worktree(&worktree).await?;
        self.audit(workspace, AuditKind::WorktreeClosed, &worktree).await;
        Ok(worktree)
    }

    /// Merge a worktree's branch back into the default branch with
    /// `--no-ff`; a conflicted merge is aborted and reported.
    pub async fn merge_worktree(
        &self,
        workspace: &Workspace,
        session: &Session,
        worktree_id: &WorktreeId,
    ) -> Result<MergeOutcome, ApiError> {
        if worktree_id.is_main() {
            return Err(ApiError::validation("main cannot be merged into itself"));
        }
        let worktree = self.get_worktree(&session.session_id, worktree_id).await?;
        if !worktree.status.can_start_merge() {
            return Err(ApiError::conflict(format!("worktree is {}", worktree.status)));
        }

        let repository_dir = session.repository_dir(&self.workspace_root);
        let merge = ExecSpec::new(workspace.workspace_id, "git")
            .args(["merge", "--no-ff", "--no-edit", &worktree.branch_name])
            .cwd(&repository_dir)
            .rw_dir(&repository_dir);
        match self.invoker.run(&merge).await {
            Ok(_) => Ok(MergeOutcome::Merged),
            Err(e) => {
                let abort = ExecSpec::new(workspace.workspace_id, "git")
                    .args(["merge", "--abort"])
                    .cwd(&repository_dir)
                    .rw_dir(&repository_dir);
                if let Err(abort_err) = self.invoker.run(&abort).await {
                    tracing::warn!(error = %abort_err, "merge abort failed");
                }
                Ok(MergeOutcome::Conflict { message: e.to_string() })
            }
        }
    }

    /// `git status --porcelain` + `git diff` for a worktree (or the main
    /// clone when `worktree_id` is `None`).
    pub async fn diff_snapshot(
        &self,
        workspace: &Workspace,
        session: &Session,
        worktree_id: Option<&WorktreeId>,
    ) -> Result<(String, String), ApiError> {
        let dir = self.resolve_tree_dir(session, worktree_id);
        let status = ExecSpec::new(workspace.workspace_id, "git")
            .args(["status", "--porcelain"])
            .cwd(&dir)
            .rw_dir(&dir)
            .ro_dir(session.repository_dir(&self.workspace_root));
        let status = self.invoker.run(&status).await?.stdout;
        let diff = ExecSpec::new(workspace.workspace_id, "git")
            .args(["diff"])
            .cwd(&dir)
            .rw_dir(&dir)
            .ro_dir(session.repository_dir(&self.workspace_root));
        let diff = self.invoker.run(&diff).await?.stdout;
        Ok((status, diff))
    }

    /// Read one file inside a worktree, path-confined.
    pub async fn read_file(
        &self,
        workspace: &Workspace,
        session: &Session,
        worktree_id: &WorktreeId,
        rel_path: &str,
    ) -> Result<String, ApiError> {
        let root = self.resolve_tree_dir(session, Some(worktree_id));
        let full = confine_path(&root, rel_path)?;
        let cat = ExecSpec::new(workspace.workspace_id, "cat")
            .arg(full.to_string_lossy())
            .cwd(&root)
            .ro_dir(&root);
        Ok(self.invoker.run(&cat).await?.stdout)
    }

    /// Branches of the session clone.
    pub async fn list_branches(
        &self,
        workspace: &Workspace,
        session: &Session,
    ) -> Result<Vec<String>, ApiError> {
        let repository_dir = session.repository_dir(&self.workspace_root);
        let spec = ExecSpec::new(workspace.workspace_id, "git")
            .args(["branch", "--format=%(refname:short)"])
            .cwd(&repository_dir)
            .rw_dir(&repository_dir);
        let output = self.invoker.run(&spec).await?;
        Ok(output.stdout.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    /// Create a branch in the session clone.
    pub async fn create_branch(
        &self,
        workspace: &Workspace,
        session: &Session,
        name: &str,
    ) -> Result<(), ApiError> {
        if name.is_empty() || name.contains(|c: char| c.is_whitespace()) {
            return Err(ApiError::validation("invalid branch name"));
        }
        let repository_dir = session.repository_dir(&self.workspace_root);
        let spec = ExecSpec::new(workspace.workspace_id, "git")
            .args(["branch", name])
            .cwd(&repository_dir)
            .rw_dir(&repository_dir);
        self.invoker.run(&spec).await?;
        Ok(())
    }

    /// Fetch from origin (network-enabled sandbox).
    pub async fn fetch(&self, workspace: &Workspace, session: &Session) -> Result<(), ApiError> {
        let repository_dir = session.repository_dir(&self.workspace_root);
        let spec = ExecSpec::new(workspace.workspace_id, "git")
            .args(["fetch", "--all", "--prune"])
            .cwd(&repository_dir)
            .rw_dir(&repository_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .net(NetMode::Tcp(vec![22, 80, 443]));
        self.invoker.run(&spec).await?;
        Ok(())
    }

    /// Switch the main clone to another branch.
    pub async fn switch_branch(
        &self,
        workspace: &Workspace,
        session: &Session,
        branch: &str,
    ) -> Result<(), ApiError> {
        let main = self.get_worktree(&session.session_id, &WorktreeId::main()).await?;
        if !main.status.can_accept_user_message() {
            return Err(ApiError::conflict("main worktree is busy"));
        }
        let repository_dir = session.repository_dir(&self.workspace_root);
        let spec = ExecSpec::new(workspace.workspace_id, "git")
            .args(["checkout", branch])
            .cwd(&repository_dir)
            .rw_dir(&repository_dir);
        self.invoker.run(&spec).await?;
        let mut main = main;
        main.branch_name = branch.to_string();
        self.storage.save_worktree(&main).await?;
        Ok(())
    }

    /// Directory backing a worktree id (`main` aliases the clone).
    pub fn resolve_tree_dir(&self, session: &Session, worktree_id: Option<&WorktreeId>) -> PathBuf {
        match worktree_id {
            Some(id) if !id.is_main() => {
                session.worktrees_dir(&self.workspace_root).join(id.as_str())
            }
            _ => session.repository_dir(&self.workspace_root),
        }
    }

    async fn default_branch(&self, session_id: &SessionId) -> Result<String, ApiError> {
        let main = self.get_worktree(session_id, &WorktreeId::main()).await?;
        Ok(main.branch_name)
    }

    async fn audit(&self, workspace: &Workspace, event: AuditKind, worktree: &Worktree) {
        let record = AuditEvent {
            ts_ms: self.clock.epoch_ms(),
            workspace_id: workspace.workspace_id,
            event,
            details: Some(serde_json::json!({
                "sessionId": worktree.session_id.as_str(),
                "worktreeId": worktree.worktree_id.as_str(),
            })),
        };
        if let Err(e) = self.storage.append_audit_event(&record).await {
            tracing::error!(error = %e, "audit append failed");
        }
    }
}

/// Join `rel_path` under `root`, refusing absolute paths and `..` escapes.
///
/// Purely lexical: the sandboxed `cat` plus landlock enforce the physical
/// boundary, this guard produces the 400 before anything runs.
pub fn confine_path(root: &Path, rel_path: &str) -> Result<PathBuf, ApiError> {
    if rel_path.is_empty() {
        return Err(ApiError::validation("path is required"));
    }
    let candidate = Path::new(rel_path);
    if candidate.is_absolute() {
        return Err(ApiError::validation("path escapes the worktree"));
    }
    let mut depth: i32 = 0;
    for component in candidate.components() {
        match component {
            std::path::Component::Normal(_) => depth += 1,
            std::path::Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(ApiError::validation("path escapes the worktree"));
                }
            }
            std::path::Component::CurDir => {}
            _ => return Err(ApiError::validation("path escapes the worktree")),
        }
    }
    Ok(root.join(candidate))
}

/// Adapter exposing post-turn snapshots to the agent supervisor.
pub struct WorktreeDiffSource<C: Clock> {
    pub service: Arc<WorktreeService<C>>,
    pub workspace: Workspace,
    pub session: Session,
}

#[async_trait]
impl<C: Clock> vibe80_agent::DiffSource for WorktreeDiffSource<C> {
    async fn snapshot(
        &self,
        worktree_id: &WorktreeId,
    ) -> Result<(String, String), vibe80_agent::AgentError> {
        self.service
            .diff_snapshot(&self.workspace, &self.session, Some(worktree_id))
            .await
            .map_err(|e| vibe80_agent::AgentError::External(e.to_string()))
    }
}

#[cfg(test)]
#[path = "worktree_service_tests.rs"]
mod tests;
