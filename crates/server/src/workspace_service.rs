// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace service: tenant creation, provider config, secret verification.
//!
//! The secret is returned exactly once at creation; only its SHA-256 is ever
//! stored (server-side and in the workspace's metadata tree). Provider auth
//! material is decoded only when building the agent auth payload.

use crate::error::ApiError;
use crate::identity::sha256_hex;
use base64::Engine as _;
use rand::RngCore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use vibe80_core::{
    provider::{
        sanitise_providers, validate_providers, ProviderAuthKind, ProviderMap,
        SanitisedProviderConfig,
    },
    AuditEvent, AuditKind, Clock, ProviderKey, Workspace, WorkspaceId,
};
use vibe80_sandbox::{resolve_workspace_user, SandboxInvoker};
use vibe80_storage::Storage;

/// Returned once, at creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedWorkspace {
    pub workspace_id: WorkspaceId,
    pub workspace_secret: String,
}

/// Sanitised workspace view for config read-back.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceView {
    pub workspace_id: WorkspaceId,
    pub providers: BTreeMap<ProviderKey, SanitisedProviderConfig>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// Credential material handed to a spawning agent: the auth frame payload
/// plus any files the sandbox must expose read-only.
#[derive(Debug, Clone)]
pub struct AgentCredentials {
    pub payload: serde_json::Value,
    pub files: Vec<std::path::PathBuf>,
}

pub struct WorkspaceService<C: Clock> {
    storage: Arc<dyn Storage>,
    invoker: SandboxInvoker,
    workspace_root: std::path::PathBuf,
    clock: C,
}

impl<C: Clock> WorkspaceService<C> {
    pub fn new(
        storage: Arc<dyn Storage>,
        invoker: SandboxInvoker,
        workspace_root: std::path::PathBuf,
        clock: C,
    ) -> Self {
        Self { storage, invoker, workspace_root, clock }
    }

    /// Create a workspace: synthesise id + secret, provision the OS user and
    /// tree through the root helper, persist the record.
    pub async fn create_workspace(
        &self,
        providers: ProviderMap,
    ) -> Result<CreatedWorkspace, ApiError> {
        validate_providers(&providers).map_err(|e| ApiError::validation(e.to_string()))?;

        let workspace_id = WorkspaceId::generate();
        let mut secret_bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret_bytes);
        let workspace_secret = hex::encode(secret_bytes);
        let secret_hash = sha256_hex(&workspace_secret);

        self.invoker
            .provision_workspace(&workspace_id, &secret_hash)
            .await
            .map_err(|e| ApiError::external(format!("workspace provisioning failed: {e}")))?;

        let (uid, gid) = resolve_workspace_user(&workspace_id, &self.workspace_root)
            .map_err(|e| ApiError::internal(format!("workspace user lookup failed: {e}")))?;

        let now = self.clock.epoch_ms();
        let workspace = Workspace {
            workspace_id,
            secret_hash,
            uid,
            gid,
            providers,
            created_at_ms: now,
            updated_at_ms: now,
        };
        self.storage.save_workspace(&workspace).await?;

        tracing::info!(%workspace_id, uid, gid, "workspace created");
        Ok(CreatedWorkspace { workspace_id, workspace_secret })
    }

    pub async fn get_workspace(&self, id: &WorkspaceId) -> Result<Workspace, ApiError> {
        self.storage
            .get_workspace(id)
            .await?
            .ok_or_else(|| ApiError::not_found("unknown workspace"))
    }

    /// Merge a provider patch into the workspace config.
    ///
    /// Disabling a provider that an active session currently uses is
    /// refused; the stored config is left untouched.
    pub async fn update_workspace(
        &self,
        id: &WorkspaceId,
        patch: ProviderMap,
    ) -> Result<WorkspaceView, ApiError> {
        let mut workspace = self.get_workspace(id).await?;
        validate_providers(&patch).map_err(|e| ApiError::validation(e.to_string()))?;

        for (key, config) in &patch {
            let was_enabled = workspace.provider_enabled(*key);
            if was_enabled && !config.enabled && self.provider_in_use(id, *key).await? {
                return Err(ApiError::forbidden(
                    "Provider cannot be disabled: active sessions use it.",
                ));
            }
        }

        for (key, mut config) in patch {
            // A patch without auth keeps the stored material.
            if config.auth.is_none() {
                if let Some(existing) = workspace.providers.get(&key) {
                    config.auth = existing.auth.clone();
                }
            }
            if config.enabled && config.auth.is_none() {
                return Err(ApiError::validation(format!(
                    "provider {key} is enabled but has no auth configured"
                )));
            }
            workspace.providers.insert(key, config);
        }
        workspace.updated_at_ms = self.clock.epoch_ms();
        self.storage.save_workspace(&workspace).await?;
        self.audit(id, AuditKind::WorkspaceUpdated, None).await;

        Ok(self.view(&workspace))
    }

    /// Whether any non-deleted session has an open worktree on `provider`.
    async fn provider_in_use(
        &self,
        workspace_id: &WorkspaceId,
        provider: ProviderKey,
    ) -> Result<bool, ApiError> {
        let sessions = self.storage.list_sessions(workspace_id).await?;
        for session in sessions.iter().filter(|s| !s.is_deleted()) {
            let worktrees = self.storage.list_worktrees(&session.session_id).await?;
            if worktrees.iter().any(|w| !w.is_closed() && w.provider == provider) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn read_workspace_config(&self, id: &WorkspaceId) -> Result<WorkspaceView, ApiError> {
        let workspace = self.get_workspace(id).await?;
        Ok(self.view(&workspace))
    }

    fn view(&self, workspace: &Workspace) -> WorkspaceView {
        WorkspaceView {
            workspace_id: workspace.workspace_id,
            providers: sanitise_providers(&workspace.providers),
            created_at_ms: workspace.created_at_ms,
            updated_at_ms: workspace.updated_at_ms,
        }
    }

    /// Constant-time comparison of the secret's SHA-256 against the stored
    /// hash.
    pub async fn verify_workspace_secret(
        &self,
        id: &WorkspaceId,
        raw_secret: &str,
    ) -> Result<bool, ApiError> {
        let workspace = self.get_workspace(id).await?;
        Ok(constant_time_eq(sha256_hex(raw_secret).as_bytes(), workspace.secret_hash.as_bytes()))
    }

    /// Build the auth-frame payload for an agent spawn.
    ///
    /// Credential material travels in the injected `auth` frame, never in
    /// the environment: the sandbox env allow-list stays static and secrets
    /// stay out of `/proc/<pid>/environ`.
    pub fn agent_credentials(
        &self,
        workspace: &Workspace,
        provider: ProviderKey,
        deny_credentials: bool,
        model: Option<&str>,
        reasoning_effort: Option<&str>,
    ) -> Result<AgentCredentials, ApiError> {
        let mut payload = serde_json::json!({ "provider": provider.as_str() });
        if let Some(model) = model {
            payload["model"] = serde_json::Value::String(model.to_string());
        }
        if let Some(effort) = reasoning_effort {
            payload["reasoning_effort"] = serde_json::Value::String(effort.to_string());
        }
        if deny_credentials {
            return Ok(AgentCredentials { payload, files: Vec::new() });
        }

        let config = workspace
            .providers
            .get(&provider)
            .filter(|c| c.enabled)
            .ok_or_else(|| ApiError::forbidden(format!("provider {provider} is not enabled")))?;
        let Some(auth) = &config.auth else {
            return Err(ApiError::forbidden(format!("provider {provider} has no credentials")));
        };
        match auth.kind {
            ProviderAuthKind::ApiKey => {
                payload["api_key"] = serde_json::Value::String(auth.value.clone());
            }
            ProviderAuthKind::AuthJsonB64 => {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(&auth.value)
                    .map_err(|_| ApiError::validation("stored auth blob is not valid base64"))?;
                let json: serde_json::Value = serde_json::from_slice(&decoded)
                    .map_err(|_| ApiError::validation("stored auth blob is not valid JSON"))?;
                payload["auth_json"] = json;
            }
            ProviderAuthKind::SetupToken => {
                payload["setup_token"] = serde_json::Value::String(auth.value.clone());
            }
        }
        Ok(AgentCredentials { payload, files: Vec::new() })
    }

    pub async fn append_audit_log(
        &self,
        id: &WorkspaceId,
        event: AuditKind,
        details: Option<serde_json::Value>,
    ) {
        self.audit(id, event, details).await;
    }

    async fn audit(&self, id: &WorkspaceId, event: AuditKind, details: Option<serde_json::Value>) {
        let record = AuditEvent {
            ts_ms: self.clock.epoch_ms(),
            workspace_id: *id,
            event,
            details,
        };
        if let Err(e) = self.storage.append_audit_event(&record).await {
            tracing::error!(error = %e, "audit append failed");
        }
    }
}

/// Length-aware constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
#[path = "workspace_service_tests.rs"]
mod tests;
