// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace provisioning (the `create-workspace` helper's core).
//!
//! Idempotent: every step checks before it acts, so a partially-failed run
//! re-converges on the next call. There is no rollback; the helper exits
//! non-zero and the caller retries.

use crate::metadata;
use crate::SandboxError;
use nix::unistd::{Gid, Group, Uid, User};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use vibe80_core::{WorkspaceId, WorkspaceMetadata};

/// Group that may read workspace metadata and secrets (mode 0640 group bit).
pub const SERVER_GROUP: &str = "vibe80-server";

/// Directory mode for workspace trees: setgid so new files inherit the
/// group, `o-rwx` so other workspaces cannot traverse.
pub const DIR_MODE: u32 = 0o2750;

/// Mode for metadata and secret files.
pub const FILE_MODE: u32 = 0o640;

/// Provisioner configuration.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub workspace_root: PathBuf,
    pub home_base: PathBuf,
}

/// The directories created for a workspace, in creation order.
pub fn workspace_dirs(workspace_root: &Path, workspace_id: &WorkspaceId) -> [PathBuf; 3] {
    let base = workspace_root.join(workspace_id.as_str());
    let metadata = base.join("metadata");
    let sessions = base.join("sessions");
    [base, metadata, sessions]
}

/// Create the OS user and group for a workspace if absent, returning uid/gid.
fn ensure_user(workspace_id: &WorkspaceId, home_base: &Path) -> Result<(u32, u32), SandboxError> {
    let name = workspace_id.as_str();

    if Group::from_name(name)
        .map_err(|e| SandboxError::UserResolution(e.to_string()))?
        .is_none()
    {
        run_admin("groupadd", &["--system", name])?;
    }

    if User::from_name(name)
        .map_err(|e| SandboxError::UserResolution(e.to_string()))?
        .is_none()
    {
        let home = home_base.join(name);
        let home = home.to_string_lossy().into_owned();
        run_admin(
            "useradd",
            &[
                "--system",
                "--gid", name,
                "--home-dir", &home,
                "--create-home",
                "--shell", "/usr/sbin/nologin",
                name,
            ],
        )?;
    }

    let user = User::from_name(name)
        .map_err(|e| SandboxError::UserResolution(e.to_string()))?
        .ok_or_else(|| {
            SandboxError::UserResolution(format!("user {name} still missing after useradd"))
        })?;
    Ok((user.uid.as_raw(), user.gid.as_raw()))
}

/// Run a user/group administration command, surfacing stderr on failure.
fn run_admin(program: &str, args: &[&str]) -> Result<(), SandboxError> {
    let output = std::process::Command::new(program).args(args).output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(SandboxError::HelperFailed {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Create a directory (if absent), chown it to the workspace and set 02750.
fn converge_dir(dir: &Path, uid: u32, gid: u32) -> Result<(), SandboxError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    nix::unistd::chown(dir, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
        .map_err(|e| SandboxError::UserResolution(format!("chown {}: {e}", dir.display())))?;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(DIR_MODE))?;
    Ok(())
}

/// Write a metadata/secret file owned `<uid>:<server gid>` at mode 0640.
fn converge_file(path: &Path, content: &str, uid: u32, fallback_gid: u32) -> Result<(), SandboxError> {
    std::fs::write(path, content)?;
    let server_gid = Group::from_name(SERVER_GROUP)
        .ok()
        .flatten()
        .map(|g| g.gid.as_raw())
        .unwrap_or(fallback_gid);
    nix::unistd::chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(server_gid)))
        .map_err(|e| SandboxError::UserResolution(format!("chown {}: {e}", path.display())))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(FILE_MODE))?;
    Ok(())
}

/// Provision a workspace: user, group, directory tree, metadata, secret hash.
pub fn provision(
    workspace_id: &WorkspaceId,
    secret_hash: &str,
    config: &ProvisionConfig,
) -> Result<WorkspaceMetadata, SandboxError> {
    let (uid, gid) = ensure_user(workspace_id, &config.home_base)?;

    for dir in workspace_dirs(&config.workspace_root, workspace_id) {
        converge_dir(&dir, uid, gid)?;
    }

    let record = WorkspaceMetadata { workspace_id: *workspace_id, uid, gid };
    let metadata_file = metadata::metadata_path(&config.workspace_root, workspace_id);
    let json = serde_json::to_string_pretty(&record)
        .map_err(|e| SandboxError::UserResolution(format!("serialize metadata: {e}")))?;
    converge_file(&metadata_file, &json, uid, gid)?;

    let secret_file = metadata_file.with_file_name("workspace.secret");
    converge_file(&secret_file, secret_hash, uid, gid)?;

    Ok(record)
}

#[cfg(test)]
#[path = "provision_tests.rs"]
mod tests;
