// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `vibe80-run-as`: run one allow-listed command as a workspace user.
//!
//! Invoked root-owned through password-less sudo. Every violation is
//! reported on stderr and exits non-zero before anything executes. The
//! sandbox (landlock ruleset + seccomp net filter) is applied to this
//! process and inherited by the child across exec.

use std::io::IsTerminal;
use std::process::Stdio;
use vibe80_sandbox::policy::{self, PolicyRoots, FORCED_PATH};
use vibe80_sandbox::{landlock_rules, metadata, net_filter, SandboxError};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Apply a sandbox step with a single retry for transient setup errors.
fn apply_with_retry<T>(
    label: &str,
    mut f: impl FnMut() -> Result<T, SandboxError>,
) -> Result<T, SandboxError> {
    match f() {
        Ok(value) => Ok(value),
        Err(first) => {
            eprintln!("{label} setup failed ({first}), retrying once");
            f()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::process::ExitCode {
    let argv: Vec<String> = std::env::args().skip(1).collect();

    let policy = match policy::parse_args(&argv) {
        Ok(policy) => policy,
        Err(e) => {
            eprintln!("{e}");
            return std::process::ExitCode::from(2);
        }
    };

    let roots = PolicyRoots {
        workspace_root: env_or("WORKSPACE_ROOT_DIRECTORY", "/var/lib/vibe80/workspaces").into(),
        home_base: env_or("WORKSPACE_HOME_BASE", "/home").into(),
    };

    let (resolved_command, cwd) = match policy.validate(&roots) {
        Ok(validated) => validated,
        Err(e) => {
            eprintln!("{e}");
            return std::process::ExitCode::from(2);
        }
    };

    let (uid, gid) = match metadata::resolve_workspace_user(&policy.workspace_id, &roots.workspace_root) {
        Ok(ids) => ids,
        Err(e) => {
            eprintln!("{e}");
            return std::process::ExitCode::from(2);
        }
    };

    if let Err(e) = apply_with_retry("landlock", || landlock_rules::apply(&policy, &resolved_command)) {
        eprintln!("{e}");
        return std::process::ExitCode::from(3);
    }

    if policy.seccomp {
        if let Err(e) = apply_with_retry("seccomp", || net_filter::apply(&policy.net)) {
            eprintln!("{e}");
            return std::process::ExitCode::from(3);
        }
    }

    // Child env is rebuilt from scratch: forced PATH, workspace HOME, and the
    // allow-listed pairs only.
    let home = roots.home_base.join(policy.workspace_id.as_str());
    let workdir = cwd.unwrap_or_else(|| roots.workspace_root.join(policy.workspace_id.as_str()));

    let mut command = std::process::Command::new(&resolved_command);
    command
        .args(&policy.args)
        .env_clear()
        .env("PATH", FORCED_PATH)
        .env("HOME", &home)
        .current_dir(&workdir);
    for (key, value) in &policy.env {
        command.env(key, value);
    }

    {
        use std::os::unix::process::CommandExt;
        command.uid(uid).gid(gid);
        // A fresh process group lets signals reach whole subtrees of
        // detached children; interactive runs keep the terminal's group.
        if !std::io::stdin().is_terminal() {
            command.process_group(0);
        }
    }
    let own_group = !std::io::stdin().is_terminal();

    let mut command = tokio::process::Command::from(command);
    command.stdin(Stdio::inherit()).stdout(Stdio::inherit()).stderr(Stdio::inherit());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            eprintln!("spawn failed: {e}");
            return std::process::ExitCode::from(4);
        }
    };
    let child_pid = child.id().map(|id| id as i32).unwrap_or(0);

    let mut sigint = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
    {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("signal setup failed: {e}");
            return std::process::ExitCode::from(4);
        }
    };
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                eprintln!("signal setup failed: {e}");
                return std::process::ExitCode::from(4);
            }
        };

    loop {
        tokio::select! {
            status = child.wait() => {
                return match status {
                    Ok(status) => match status.code() {
                        Some(code) => std::process::ExitCode::from(code.clamp(0, 255) as u8),
                        // Terminated by signal.
                        None => std::process::ExitCode::from(1),
                    },
                    Err(e) => {
                        eprintln!("wait failed: {e}");
                        std::process::ExitCode::from(4)
                    }
                };
            }
            _ = sigint.recv() => forward_signal(child_pid, own_group, nix::sys::signal::Signal::SIGINT),
            _ = sigterm.recv() => forward_signal(child_pid, own_group, nix::sys::signal::Signal::SIGTERM),
        }
    }
}

/// Forward a received signal to the child or its whole process group.
fn forward_signal(child_pid: i32, own_group: bool, signal: nix::sys::signal::Signal) {
    if child_pid <= 0 {
        return;
    }
    let pid = nix::unistd::Pid::from_raw(child_pid);
    let result = if own_group {
        nix::sys::signal::killpg(pid, signal)
    } else {
        nix::sys::signal::kill(pid, signal)
    };
    if let Err(e) = result {
        eprintln!("signal forward failed: {e}");
    }
}
