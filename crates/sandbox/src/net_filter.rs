// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seccomp network filter for `run-as` children.
//!
//! Classic BPF cannot dereference the sockaddr pointer, so enforcement is at
//! syscall + socket-family granularity:
//!
//! - `none`  — `socket(AF_INET|AF_INET6)` fails with EPERM (AF_UNIX stays
//!   usable for local plumbing).
//! - `tcp:P` — outbound only: `bind` and `listen` fail with EPERM.
//! - `bind:P` — inbound only: `connect` fails with EPERM.
//!
//! Port lists are validated at parse time and recorded for audit; they are
//! not re-checked in the kernel.

use crate::policy::NetMode;
use crate::SandboxError;
use seccompiler::{
    SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter, SeccompRule,
    TargetArch,
};
use std::collections::BTreeMap;

/// Syscall numbers that get an EPERM rule for the given mode. Exposed for
/// tests; the conditions live in [`rule_map`].
pub fn denied_syscalls(mode: &NetMode) -> Vec<i64> {
    match mode {
        NetMode::None => vec![libc::SYS_socket],
        NetMode::Tcp(_) => vec![libc::SYS_bind, libc::SYS_listen],
        NetMode::Bind(_) => vec![libc::SYS_connect],
    }
}

/// Build the syscall → rules map for a mode.
///
/// An empty rule vector means the syscall is denied unconditionally; the
/// `socket` entry carries address-family conditions so AF_UNIX survives.
fn rule_map(mode: &NetMode) -> Result<BTreeMap<i64, Vec<SeccompRule>>, SandboxError> {
    let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();
    match mode {
        NetMode::None => {
            let families = [libc::AF_INET as u64, libc::AF_INET6 as u64];
            let conditions = families
                .iter()
                .map(|family| {
                    SeccompCondition::new(0, SeccompCmpArgLen::Dword, SeccompCmpOp::Eq, *family)
                        .and_then(|c| SeccompRule::new(vec![c]))
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| SandboxError::Seccomp(e.to_string()))?;
            rules.insert(libc::SYS_socket, conditions);
        }
        NetMode::Tcp(_) => {
            rules.insert(libc::SYS_bind, vec![]);
            rules.insert(libc::SYS_listen, vec![]);
        }
        NetMode::Bind(_) => {
            rules.insert(libc::SYS_connect, vec![]);
        }
    }
    Ok(rules)
}

/// Install the filter on the current thread (inherited across fork/exec).
pub fn apply(mode: &NetMode) -> Result<(), SandboxError> {
    let arch: TargetArch = std::env::consts::ARCH
        .try_into()
        .map_err(|_| SandboxError::Seccomp(format!("unsupported arch {}", std::env::consts::ARCH)))?;
    let filter = SeccompFilter::new(
        rule_map(mode)?,
        // Mismatch: allow. Match: refuse with EPERM, per the C1 contract.
        SeccompAction::Allow,
        SeccompAction::Errno(libc::EPERM as u32),
        arch,
    )
    .map_err(|e| SandboxError::Seccomp(e.to_string()))?;
    let program: seccompiler::BpfProgram =
        filter.try_into().map_err(|e: seccompiler::BackendError| {
            SandboxError::Seccomp(e.to_string())
        })?;
    seccompiler::apply_filter(&program).map_err(|e| SandboxError::Seccomp(e.to_string()))
}

#[cfg(test)]
#[path = "net_filter_tests.rs"]
mod tests;
