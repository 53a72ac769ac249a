// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `run-as` execution policy: argument parsing and validation.
//!
//! Everything here is pure so the refusal paths are unit-testable without
//! root. The helper binary parses its argv into an [`ExecPolicy`], validates
//! it against [`PolicyRoots`], and only then starts touching the kernel.
//!
//! Unknown flags are ignored deliberately to keep the accepted surface
//! explicit: a new flag does nothing until validation learns about it.

use std::path::{Path, PathBuf};
use thiserror::Error;
use vibe80_core::WorkspaceId;

/// Commands the helper will execute, by basename.
pub const COMMAND_ALLOW_LIST: &[&str] = &[
    "git", "ssh-keyscan", "mkdir", "chmod", "cat", "rm", "ls", "stat", "head", "find", "tee",
    "env", "id", "bash", "sh", "codex", "claude",
];

/// Environment keys the helper will pass through.
pub const ENV_ALLOW_LIST: &[&str] =
    &["GIT_SSH_COMMAND", "GIT_CONFIG_GLOBAL", "GIT_TERMINAL_PROMPT", "TERM", "TMPDIR"];

/// PATH forced onto every spawned child.
pub const FORCED_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Directories searched when the command is given as a bare name.
const COMMAND_SEARCH_DIRS: &[&str] = &["/usr/local/bin", "/usr/bin", "/bin"];

/// Network confinement mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetMode {
    /// All IP networking blocked.
    None,
    /// Outbound connect permitted on the listed ports; bind/listen blocked.
    Tcp(Vec<u16>),
    /// Inbound bind permitted on the listed ports; connect blocked.
    Bind(Vec<u16>),
}

impl NetMode {
    /// Parse `none`, `tcp:443`, `tcp:443,8080`, `bind:8000`.
    pub fn parse(s: &str) -> Result<Self, PolicyError> {
        if s == "none" {
            return Ok(NetMode::None);
        }
        let (mode, ports) = s
            .split_once(':')
            .ok_or_else(|| PolicyError::InvalidNetMode(s.to_string()))?;
        let ports = ports
            .split(',')
            .map(|p| p.trim().parse::<u16>())
            .collect::<Result<Vec<u16>, _>>()
            .map_err(|_| PolicyError::InvalidNetMode(s.to_string()))?;
        if ports.is_empty() {
            return Err(PolicyError::InvalidNetMode(s.to_string()));
        }
        match mode {
            "tcp" => Ok(NetMode::Tcp(ports)),
            "bind" => Ok(NetMode::Bind(ports)),
            _ => Err(PolicyError::InvalidNetMode(s.to_string())),
        }
    }
}

impl std::fmt::Display for NetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn ports(list: &[u16]) -> String {
            list.iter().map(u16::to_string).collect::<Vec<_>>().join(",")
        }
        match self {
            NetMode::None => f.write_str("none"),
            NetMode::Tcp(p) => write!(f, "tcp:{}", ports(p)),
            NetMode::Bind(p) => write!(f, "bind:{}", ports(p)),
        }
    }
}

/// Violations detected before anything executes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("missing --workspace-id")]
    MissingWorkspaceId,

    #[error("invalid workspace id: {0}")]
    InvalidWorkspaceId(String),

    #[error("missing command after --")]
    MissingCommand,

    #[error("cwd outside workspace")]
    CwdOutsideWorkspace,

    #[error("cwd does not exist: {0}")]
    CwdMissing(String),

    #[error("command not allowed: {0}")]
    CommandNotAllowed(String),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("env key not allowed: {0}")]
    EnvKeyNotAllowed(String),

    #[error("malformed --env (expected K=V): {0}")]
    MalformedEnv(String),

    #[error("invalid net mode: {0}")]
    InvalidNetMode(String),

    #[error("invalid --seccomp value (expected on|off): {0}")]
    InvalidSeccomp(String),
}

/// Roots the policy validates paths against.
#[derive(Debug, Clone)]
pub struct PolicyRoots {
    pub workspace_root: PathBuf,
    pub home_base: PathBuf,
}

/// Parsed `run-as` invocation, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecPolicy {
    pub workspace_id: WorkspaceId,
    pub cwd: Option<PathBuf>,
    /// Allow-listed K=V pairs, in argv order.
    pub env: Vec<(String, String)>,
    pub allow_ro: Vec<PathBuf>,
    pub allow_rw: Vec<PathBuf>,
    pub allow_ro_files: Vec<PathBuf>,
    pub allow_rw_files: Vec<PathBuf>,
    pub net: NetMode,
    pub seccomp: bool,
    pub command: String,
    pub args: Vec<String>,
}

/// Parse helper argv (without the program name).
///
/// Env keys are checked against the allow-list here so a disallowed key is
/// refused even if later validation is skipped. Unknown flags are skipped
/// along with their value when they take one (`--flag=value` style is not
/// accepted anywhere, so bare unknown tokens are simply dropped).
pub fn parse_args(argv: &[String]) -> Result<ExecPolicy, PolicyError> {
    let mut workspace_id: Option<String> = None;
    let mut cwd = None;
    let mut env = Vec::new();
    let mut allow_ro = Vec::new();
    let mut allow_rw = Vec::new();
    let mut allow_ro_files = Vec::new();
    let mut allow_rw_files = Vec::new();
    let mut net = NetMode::None;
    let mut seccomp = true;
    let mut command = None;
    let mut args = Vec::new();

    let mut iter = argv.iter().peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--" => {
                command = iter.next().cloned();
                args = iter.cloned().collect();
                break;
            }
            "--workspace-id" => workspace_id = iter.next().cloned(),
            "--cwd" => cwd = iter.next().cloned().map(PathBuf::from),
            "--env" => {
                let pair = iter.next().cloned().unwrap_or_default();
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| PolicyError::MalformedEnv(pair.clone()))?;
                if !ENV_ALLOW_LIST.contains(&key) {
                    return Err(PolicyError::EnvKeyNotAllowed(key.to_string()));
                }
                env.push((key.to_string(), value.to_string()));
            }
            "--allow-ro" => {
                if let Some(dir) = iter.next() {
                    allow_ro.push(PathBuf::from(dir));
                }
            }
            "--allow-rw" => {
                if let Some(dir) = iter.next() {
                    allow_rw.push(PathBuf::from(dir));
                }
            }
            "--allow-ro-file" => {
                if let Some(file) = iter.next() {
                    allow_ro_files.push(PathBuf::from(file));
                }
            }
            "--allow-rw-file" => {
                if let Some(file) = iter.next() {
                    allow_rw_files.push(PathBuf::from(file));
                }
            }
            "--net" => {
                let value = iter.next().cloned().unwrap_or_default();
                net = NetMode::parse(&value)?;
            }
            "--seccomp" => {
                let value = iter.next().cloned().unwrap_or_default();
                seccomp = match value.as_str() {
                    "on" => true,
                    "off" => false,
                    _ => return Err(PolicyError::InvalidSeccomp(value)),
                };
            }
            // Unknown flags are ignored deliberately.
            _ => {}
        }
    }

    let raw_id = workspace_id.ok_or(PolicyError::MissingWorkspaceId)?;
    let workspace_id =
        WorkspaceId::parse(&raw_id).map_err(|_| PolicyError::InvalidWorkspaceId(raw_id))?;
    let command = command.ok_or(PolicyError::MissingCommand)?;

    Ok(ExecPolicy {
        workspace_id,
        cwd,
        env,
        allow_ro,
        allow_rw,
        allow_ro_files,
        allow_rw_files,
        net,
        seccomp,
        command,
        args,
    })
}

impl ExecPolicy {
    /// The two directories this workspace's processes may treat as home
    /// ground for cwd purposes.
    pub fn workspace_dirs(&self, roots: &PolicyRoots) -> [PathBuf; 2] {
        [
            roots.home_base.join(self.workspace_id.as_str()),
            roots.workspace_root.join(self.workspace_id.as_str()),
        ]
    }

    /// Validate cwd confinement and resolve the command to an absolute
    /// allow-listed path. Returns `(resolved_command, canonical_cwd)`.
    pub fn validate(&self, roots: &PolicyRoots) -> Result<(PathBuf, Option<PathBuf>), PolicyError> {
        let cwd = match &self.cwd {
            Some(cwd) => {
                let canonical = std::fs::canonicalize(cwd)
                    .map_err(|_| PolicyError::CwdMissing(cwd.display().to_string()))?;
                let inside = self
                    .workspace_dirs(roots)
                    .iter()
                    .any(|dir| path_starts_with(&canonical, dir));
                if !inside {
                    return Err(PolicyError::CwdOutsideWorkspace);
                }
                Some(canonical)
            }
            None => None,
        };
        Ok((resolve_command(&self.command)?, cwd))
    }
}

/// Resolve a command to an absolute path whose basename is allow-listed.
///
/// Absolute inputs must point into one of the search directories; bare names
/// are searched in [`COMMAND_SEARCH_DIRS`] order.
pub fn resolve_command(command: &str) -> Result<PathBuf, PolicyError> {
    let path = Path::new(command);
    let basename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PolicyError::CommandNotAllowed(command.to_string()))?;
    if !COMMAND_ALLOW_LIST.contains(&basename) {
        return Err(PolicyError::CommandNotAllowed(command.to_string()));
    }
    if path.is_absolute() {
        let parent_ok = path
            .parent()
            .and_then(|p| p.to_str())
            .is_some_and(|p| COMMAND_SEARCH_DIRS.contains(&p));
        if !parent_ok {
            return Err(PolicyError::CommandNotAllowed(command.to_string()));
        }
        if !path.exists() {
            return Err(PolicyError::CommandNotFound(command.to_string()));
        }
        return Ok(path.to_path_buf());
    }
    if command != basename {
        // Relative paths with directory components never resolve.
        return Err(PolicyError::CommandNotAllowed(command.to_string()));
    }
    for dir in COMMAND_SEARCH_DIRS {
        let candidate = Path::new(dir).join(basename);
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(PolicyError::CommandNotFound(command.to_string()))
}

/// Component-wise prefix check (avoids `/a/bc` matching prefix `/a/b`).
pub fn path_starts_with(path: &Path, prefix: &Path) -> bool {
    path.starts_with(prefix)
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
