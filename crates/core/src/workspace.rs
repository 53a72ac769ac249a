// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace record: the tenant boundary.
//!
//! A workspace corresponds to exactly one OS user; `workspace_id` doubles as
//! the user name and the `uid`/`gid` pair is immutable after provisioning.

use crate::id::WorkspaceId;
use crate::provider::ProviderMap;
use serde::{Deserialize, Serialize};

/// A tenant of the host. The stored record never contains the workspace
/// secret, only its SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub workspace_id: WorkspaceId,
    /// Hex SHA-256 of the workspace secret.
    pub secret_hash: String,
    pub uid: u32,
    pub gid: u32,
    #[serde(default)]
    pub providers: ProviderMap,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Workspace {
    /// Providers currently enabled for this workspace.
    pub fn enabled_providers(&self) -> impl Iterator<Item = crate::provider::ProviderKey> + '_ {
        self.providers.iter().filter(|(_, c)| c.enabled).map(|(k, _)| *k)
    }

    /// Whether the given provider is enabled.
    pub fn provider_enabled(&self, key: crate::provider::ProviderKey) -> bool {
        self.providers.get(&key).is_some_and(|c| c.enabled)
    }
}

/// On-disk metadata written by the provisioner to
/// `<WORKSPACE_ROOT>/<w>/metadata/workspace.json`.
///
/// The sandbox helper falls back to this file when name-service lookup of
/// the workspace user fails (e.g. NSS caching lag right after provisioning).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMetadata {
    #[serde(rename = "workspaceId")]
    pub workspace_id: WorkspaceId,
    pub uid: u32,
    pub gid: u32,
}
