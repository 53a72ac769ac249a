// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server lifecycle: boot-time assembly and graceful shutdown.
//!
//! All shared services live in one [`ServerState`] built at startup and
//! threaded through the gateway; shutdown flips the accept flag and drains
//! every agent supervisor before the process exits.

use crate::attachments::AttachmentService;
use crate::env::DeploymentMode;
use crate::error::ApiError;
use crate::identity::IdentityService;
use crate::metrics::Metrics;
use crate::session_service::SessionService;
use crate::supervisors::SupervisorRegistry;
use crate::workspace_service::WorkspaceService;
use crate::worktree_service::{WorktreeDiffSource, WorktreeService};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use vibe80_agent::{
    AgentLauncher, LaunchSpec, RouterSet, SandboxLauncher, Supervisor, SupervisorConfig,
    SupervisorHandle,
};
use vibe80_core::{Session, SessionId, SystemClock, Workspace, WorkspaceId, Worktree};
use vibe80_sandbox::SandboxInvoker;
use vibe80_storage::{MemoryStorage, SqliteStorage, Storage};

/// Startup failures (fatal; the CLI exits 1).
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("unsupported storage backend {0:?} (expected sqlite or memory)")]
    UnsupportedBackend(String),

    #[error("storage init failed: {0}")]
    Storage(#[from] vibe80_storage::StorageError),

    #[error("jwt key setup failed: {0}")]
    JwtKey(std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fully-resolved configuration (env + CLI flags).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub storage_backend: String,
    pub deployment_mode: DeploymentMode,
    pub workspace_root: PathBuf,
    pub home_base: PathBuf,
    pub jwt_key_path: PathBuf,
    pub sqlite_path: PathBuf,
    pub run_as_path: PathBuf,
    pub create_workspace_path: PathBuf,
    pub supervisor: SupervisorConfig,
    pub refresh_overlap: Duration,
    pub mono_token_ttl: Duration,
    pub ws_ping_interval: Duration,
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    /// Resolve from environment with a data dir for derived defaults.
    pub fn from_env(data_dir: PathBuf) -> Self {
        Self {
            port: crate::env::port(),
            storage_backend: crate::env::storage_backend(),
            deployment_mode: crate::env::deployment_mode(),
            workspace_root: crate::env::workspace_root(),
            home_base: crate::env::workspace_home_base(),
            jwt_key_path: crate::env::jwt_key_path().unwrap_or_else(|| data_dir.join("jwt.key")),
            sqlite_path: crate::env::sqlite_path().unwrap_or_else(|| data_dir.join("vibe80.db")),
            run_as_path: crate::env::run_as_path(),
            create_workspace_path: crate::env::create_workspace_path(),
            supervisor: SupervisorConfig {
                spawn_deadline: crate::env::spawn_deadline(),
                kill_grace: crate::env::shutdown_grace(),
                ..SupervisorConfig::default()
            },
            refresh_overlap: crate::env::refresh_overlap_window(),
            mono_token_ttl: crate::env::mono_token_ttl(),
            ws_ping_interval: crate::env::ws_ping_interval(),
            shutdown_grace: crate::env::shutdown_grace(),
            data_dir,
        }
    }
}

/// Ownership cache entry TTL.
const OWNERSHIP_TTL: Duration = Duration::from_secs(30);

/// Small TTL cache over session → workspace lookups for the ownership
/// middleware; invalidated on session mutation.
#[derive(Default)]
pub struct OwnershipCache {
    inner: Mutex<HashMap<SessionId, (WorkspaceId, Instant)>>,
}

impl OwnershipCache {
    pub fn get(&self, session_id: &SessionId) -> Option<WorkspaceId> {
        let inner = self.inner.lock();
        inner
            .get(session_id)
            .filter(|(_, at)| at.elapsed() < OWNERSHIP_TTL)
            .map(|(ws, _)| *ws)
    }

    pub fn put(&self, session_id: SessionId, workspace_id: WorkspaceId) {
        self.inner.lock().insert(session_id, (workspace_id, Instant::now()));
    }

    pub fn invalidate(&self, session_id: &SessionId) {
        self.inner.lock().remove(session_id);
    }
}

/// The process-wide service struct. Initialised once on boot, dropped on
/// exit; no other shared mutable state exists.
pub struct ServerState {
    pub config: ServerConfig,
    pub storage: Arc<dyn Storage>,
    pub identity: IdentityService<SystemClock>,
    pub workspaces: WorkspaceService<SystemClock>,
    pub sessions: SessionService<SystemClock>,
    pub worktrees: Arc<WorktreeService<SystemClock>>,
    pub attachments: AttachmentService<SystemClock>,
    pub routers: RouterSet,
    pub supervisors: SupervisorRegistry,
    pub ownership: OwnershipCache,
    pub metrics: Metrics,
    launcher: Arc<dyn AgentLauncher>,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState").finish_non_exhaustive()
    }
}

impl ServerState {
    /// Assemble the state for production: storage per config, sandbox
    /// launcher, JWT key loaded or created.
    pub fn init(config: ServerConfig) -> Result<Arc<Self>, LifecycleError> {
        let storage: Arc<dyn Storage> = match config.storage_backend.as_str() {
            "sqlite" => Arc::new(SqliteStorage::open(&config.sqlite_path)?),
            "memory" => Arc::new(MemoryStorage::new()),
            other => return Err(LifecycleError::UnsupportedBackend(other.to_string())),
        };
        let invoker =
            SandboxInvoker::new(&config.run_as_path, &config.create_workspace_path);
        let launcher: Arc<dyn AgentLauncher> =
            Arc::new(SandboxLauncher::new(invoker.clone()));
        Ok(Self::assemble(config, storage, invoker, launcher))
    }

    /// Assembly seam shared with the test suites (memory storage, fake
    /// launcher, no sudo).
    pub fn assemble(
        config: ServerConfig,
        storage: Arc<dyn Storage>,
        invoker: SandboxInvoker,
        launcher: Arc<dyn AgentLauncher>,
    ) -> Arc<Self> {
        let key = IdentityService::<SystemClock>::load_or_create_key(&config.jwt_key_path)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "jwt key persistence failed, using ephemeral key");
                let mut key = vec![0u8; 32];
                use rand::RngCore;
                rand::rngs::OsRng.fill_bytes(&mut key);
                key
            });
        let clock = SystemClock;
        let identity = IdentityService::new(
            Arc::clone(&storage),
            &key,
            config.refresh_overlap,
            clock.clone(),
        );
        let workspaces = WorkspaceService::new(
            Arc::clone(&storage),
            invoker.clone(),
            config.workspace_root.clone(),
            clock.clone(),
        );
        let sessions = SessionService::new(
            Arc::clone(&storage),
            invoker.clone(),
            config.workspace_root.clone(),
            clock.clone(),
        );
        let worktrees = Arc::new(WorktreeService::new(
            Arc::clone(&storage),
            invoker.clone(),
            config.workspace_root.clone(),
            clock.clone(),
        ));
        let attachments =
            AttachmentService::new(invoker, config.workspace_root.clone(), clock);

        Arc::new(Self {
            config,
            storage,
            identity,
            workspaces,
            sessions,
            worktrees,
            attachments,
            routers: RouterSet::new(0),
            supervisors: SupervisorRegistry::new(),
            ownership: OwnershipCache::default(),
            metrics: Metrics::default(),
            launcher,
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Supervisor for a worktree, spawning one (and its agent) when the
    /// worktree is dormant.
    pub async fn ensure_supervisor(
        &self,
        workspace: &Workspace,
        session: &Session,
        worktree: &Worktree,
    ) -> Result<SupervisorHandle, ApiError> {
        if let Some(handle) =
            self.supervisors.get(&session.session_id, &worktree.worktree_id)
        {
            return Ok(handle);
        }
        if self.is_shutting_down() {
            return Err(ApiError::conflict("server is shutting down"));
        }

        let credentials = self.workspaces.agent_credentials(
            workspace,
            worktree.provider,
            worktree.config.deny_credentials,
            worktree.config.model.as_deref(),
            worktree.config.reasoning_effort.as_deref(),
        )?;

        let worktree_dir = self
            .worktrees
            .resolve_tree_dir(session, Some(&worktree.worktree_id));
        let launch_spec = LaunchSpec {
            workspace_id: workspace.workspace_id,
            session_id: session.session_id,
            worktree_id: worktree.worktree_id.clone(),
            provider: worktree.provider,
            temp_dir: worktree_dir.join(".tmp"),
            worktree_dir,
            attachments_dir: session.attachments_dir(&self.config.workspace_root),
            repository_dir: session.repository_dir(&self.config.workspace_root),
            credential_files: credentials.files.clone(),
            internet_access: worktree.config.internet_access,
        };

        let hub = self.routers.hub(session.session_id);
        let diff = Arc::new(WorktreeDiffSource {
            service: Arc::clone(&self.worktrees),
            workspace: workspace.clone(),
            session: session.clone(),
        });
        let handle = Supervisor::spawn(
            worktree.clone(),
            launch_spec,
            credentials.payload,
            Arc::clone(&self.launcher),
            Arc::clone(&self.storage),
            hub,
            diff,
            self.config.supervisor.clone(),
            SystemClock,
        );
        self.supervisors.insert(session.session_id, handle.clone());
        Ok(handle)
    }

    /// Flip the accept flag and drain every supervisor.
    pub async fn graceful_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        tracing::info!(supervisors = self.supervisors.len(), "graceful shutdown started");
        self.supervisors.shutdown_all().await;
    }

    /// Resolve the workspace owning a session, consulting the TTL cache.
    pub async fn session_owner(&self, session_id: &SessionId) -> Result<WorkspaceId, ApiError> {
        if let Some(owner) = self.ownership.get(session_id) {
            return Ok(owner);
        }
        let session = self.sessions.get_session(session_id).await?;
        self.ownership.put(*session_id, session.workspace_id);
        Ok(session.workspace_id)
    }

    /// Assert a session belongs to the caller's workspace.
    pub async fn assert_session_owned(
        &self,
        workspace_id: &WorkspaceId,
        session_id: &SessionId,
    ) -> Result<(), ApiError> {
        let owner = self.session_owner(session_id).await?;
        if owner != *workspace_id {
            return Err(ApiError::forbidden("session belongs to another workspace"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
