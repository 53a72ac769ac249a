// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Landlock filesystem confinement for `run-as` children.
//!
//! The ruleset is the union of the explicit RO/RW dirs and files from the
//! policy plus a fixed base RO set (interpreter/libs). Application is
//! best-effort: on kernels without landlock the child still runs, confined
//! only by uid/gid and the seccomp net filter.

use crate::policy::ExecPolicy;
use crate::SandboxError;
use landlock::{
    path_beneath_rules, Access, AccessFs, CompatLevel, Compatible, Ruleset, RulesetAttr,
    RulesetCreatedAttr, RulesetStatus, ABI,
};
use std::path::{Path, PathBuf};

/// Always-readable base set: the command's own directory plus the usual
/// loader and library locations.
const BASE_RO_DIRS: &[&str] =
    &["/lib", "/lib64", "/usr/lib", "/usr/lib64", "/usr/local/bin", "/usr/local/lib"];

/// Read-only paths for a policy: base set + explicit RO dirs and files.
pub fn read_only_paths(policy: &ExecPolicy, resolved_command: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();
    if let Some(dir) = resolved_command.parent() {
        paths.push(dir.to_path_buf());
    }
    paths.extend(BASE_RO_DIRS.iter().map(PathBuf::from));
    paths.extend(policy.allow_ro.iter().cloned());
    paths.extend(policy.allow_ro_files.iter().cloned());
    paths.sort();
    paths.dedup();
    paths
}

/// Read-write paths for a policy: explicit RW dirs and files.
pub fn read_write_paths(policy: &ExecPolicy) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = policy.allow_rw.clone();
    paths.extend(policy.allow_rw_files.iter().cloned());
    paths.sort();
    paths.dedup();
    paths
}

/// Apply the landlock ruleset to the current process (inherited by children).
///
/// Nonexistent paths are skipped; an unsupported kernel degrades to
/// `RulesetStatus::NotEnforced` rather than failing the spawn.
pub fn apply(policy: &ExecPolicy, resolved_command: &Path) -> Result<RulesetStatus, SandboxError> {
    let abi = ABI::V2;
    let ro = read_only_paths(policy, resolved_command);
    let rw = read_write_paths(policy);

    let status = Ruleset::default()
        .set_compatibility(CompatLevel::BestEffort)
        .handle_access(AccessFs::from_all(abi))
        .map_err(|e| SandboxError::Landlock(e.to_string()))?
        .create()
        .map_err(|e| SandboxError::Landlock(e.to_string()))?
        .add_rules(path_beneath_rules(&ro, AccessFs::from_read(abi)))
        .map_err(|e| SandboxError::Landlock(e.to_string()))?
        .add_rules(path_beneath_rules(&rw, AccessFs::from_all(abi)))
        .map_err(|e| SandboxError::Landlock(e.to_string()))?
        .restrict_self()
        .map_err(|e| SandboxError::Landlock(e.to_string()))?;

    Ok(status.ruleset)
}

#[cfg(test)]
#[path = "landlock_rules_tests.rs"]
mod tests;
