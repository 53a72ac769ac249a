// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-side entry point to the root helpers.
//!
//! Builds `sudo -n <helper> …` argument vectors and runs them through
//! `tokio::process`. The server never performs workspace filesystem or Git
//! operations itself; every one goes through [`SandboxInvoker::run`] (capture
//! output) or [`SandboxInvoker::spawn`] (long-running agent with piped
//! stdio).

use crate::policy::NetMode;
use crate::SandboxError;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use vibe80_core::WorkspaceId;

/// One command to execute inside a workspace sandbox.
#[derive(Debug, Clone)]
pub struct ExecSpec {
    pub workspace_id: WorkspaceId,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub ro_dirs: Vec<PathBuf>,
    pub rw_dirs: Vec<PathBuf>,
    pub ro_files: Vec<PathBuf>,
    pub rw_files: Vec<PathBuf>,
    pub net: NetMode,
    pub command: String,
    pub args: Vec<String>,
}

impl ExecSpec {
    pub fn new(workspace_id: WorkspaceId, command: impl Into<String>) -> Self {
        Self {
            workspace_id,
            cwd: None,
            env: Vec::new(),
            ro_dirs: Vec::new(),
            rw_dirs: Vec::new(),
            ro_files: Vec::new(),
            rw_files: Vec::new(),
            net: NetMode::None,
            command: command.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn ro_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ro_dirs.push(dir.into());
        self
    }

    pub fn rw_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.rw_dirs.push(dir.into());
        self
    }

    pub fn ro_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.ro_files.push(file.into());
        self
    }

    pub fn net(mut self, net: NetMode) -> Self {
        self.net = net;
        self
    }
}

/// Captured output of a completed sandboxed command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Handle to the two helpers plus the sudo policy around them.
#[derive(Debug, Clone)]
pub struct SandboxInvoker {
    run_as: PathBuf,
    create_workspace: PathBuf,
    /// `false` only in tests and mono-user dev runs where the server already
    /// is the workspace user.
    use_sudo: bool,
}

impl SandboxInvoker {
    pub fn new(run_as: impl Into<PathBuf>, create_workspace: impl Into<PathBuf>) -> Self {
        Self { run_as: run_as.into(), create_workspace: create_workspace.into(), use_sudo: true }
    }

    /// Dev/test variant that invokes the helpers directly.
    pub fn without_sudo(mut self) -> Self {
        self.use_sudo = false;
        self
    }

    /// Full argv for a `run-as` invocation (program first).
    pub fn run_as_argv(&self, spec: &ExecSpec) -> Vec<String> {
        let mut argv: Vec<String> = Vec::new();
        if self.use_sudo {
            argv.push("sudo".to_string());
            argv.push("-n".to_string());
        }
        argv.push(self.run_as.to_string_lossy().into_owned());
        argv.push("--workspace-id".to_string());
        argv.push(spec.workspace_id.to_string());
        if let Some(cwd) = &spec.cwd {
            argv.push("--cwd".to_string());
            argv.push(cwd.to_string_lossy().into_owned());
        }
        for (key, value) in &spec.env {
            argv.push("--env".to_string());
            argv.push(format!("{key}={value}"));
        }
        for dir in &spec.ro_dirs {
            argv.push("--allow-ro".to_string());
            argv.push(dir.to_string_lossy().into_owned());
        }
        for dir in &spec.rw_dirs {
            argv.push("--allow-rw".to_string());
            argv.push(dir.to_string_lossy().into_owned());
        }
        for file in &spec.ro_files {
            argv.push("--allow-ro-file".to_string());
            argv.push(file.to_string_lossy().into_owned());
        }
        for file in &spec.rw_files {
            argv.push("--allow-rw-file".to_string());
            argv.push(file.to_string_lossy().into_owned());
        }
        argv.push("--net".to_string());
        argv.push(spec.net.to_string());
        argv.push("--".to_string());
        argv.push(spec.command.clone());
        argv.extend(spec.args.iter().cloned());
        argv
    }

    fn command_for(&self, argv: &[String]) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd
    }

    /// Run a sandboxed command to completion, capturing output.
    pub async fn run(&self, spec: &ExecSpec) -> Result<ExecOutput, SandboxError> {
        let argv = self.run_as_argv(spec);
        tracing::debug!(workspace_id = %spec.workspace_id, command = %spec.command, "run-as");
        let output = self
            .command_for(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        let result = ExecOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if result.code != 0 {
            return Err(SandboxError::HelperFailed { code: result.code, stderr: result.stderr });
        }
        Ok(result)
    }

    /// Run a sandboxed command feeding `input` to its stdin (uploads via
    /// `tee`).
    pub async fn run_with_input(
        &self,
        spec: &ExecSpec,
        input: &[u8],
    ) -> Result<ExecOutput, SandboxError> {
        let argv = self.run_as_argv(spec);
        let mut child = self
            .command_for(&argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await?;
        }
        let output = child.wait_with_output().await?;
        let result = ExecOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::new(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if result.code != 0 {
            return Err(SandboxError::HelperFailed { code: result.code, stderr: result.stderr });
        }
        Ok(result)
    }

    /// Spawn a long-running sandboxed process with piped stdio (agents).
    pub fn spawn(&self, spec: &ExecSpec) -> Result<tokio::process::Child, SandboxError> {
        let argv = self.run_as_argv(spec);
        tracing::info!(workspace_id = %spec.workspace_id, command = %spec.command, "spawn agent");
        let child = self
            .command_for(&argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        Ok(child)
    }

    /// Provision a workspace through the root helper, passing the secret
    /// hash on stdin so it never appears in a process listing.
    pub async fn provision_workspace(
        &self,
        workspace_id: &WorkspaceId,
        secret_hash: &str,
    ) -> Result<(), SandboxError> {
        let mut argv: Vec<String> = Vec::new();
        if self.use_sudo {
            argv.push("sudo".to_string());
            argv.push("-n".to_string());
        }
        argv.push(self.create_workspace.to_string_lossy().into_owned());
        argv.push("--workspace-id".to_string());
        argv.push(workspace_id.to_string());

        let mut child = self
            .command_for(&argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(secret_hash.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(SandboxError::HelperFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "invoker_tests.rs"]
mod tests;
