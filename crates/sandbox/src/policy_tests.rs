// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const WS: &str = "w0123456789abcdef01234567";

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[test]
fn parses_minimal_invocation() {
    let policy = parse_args(&argv(&["--workspace-id", WS, "--", "git", "status"])).unwrap();
    assert_eq!(policy.workspace_id.as_str(), WS);
    assert_eq!(policy.command, "git");
    assert_eq!(policy.args, vec!["status"]);
    assert_eq!(policy.net, NetMode::None);
    assert!(policy.seccomp);
}

#[test]
fn missing_workspace_id_is_refused() {
    assert_eq!(
        parse_args(&argv(&["--", "git"])),
        Err(PolicyError::MissingWorkspaceId)
    );
}

#[test]
fn malformed_workspace_id_is_refused() {
    let err = parse_args(&argv(&["--workspace-id", "root", "--", "git"])).unwrap_err();
    assert!(matches!(err, PolicyError::InvalidWorkspaceId(_)));
}

#[test]
fn missing_command_is_refused() {
    assert_eq!(
        parse_args(&argv(&["--workspace-id", WS])),
        Err(PolicyError::MissingCommand)
    );
    assert_eq!(
        parse_args(&argv(&["--workspace-id", WS, "--"])),
        Err(PolicyError::MissingCommand)
    );
}

#[test]
fn env_keys_outside_allow_list_are_refused() {
    let err = parse_args(&argv(&[
        "--workspace-id", WS, "--env", "LD_PRELOAD=/tmp/evil.so", "--", "git",
    ]))
    .unwrap_err();
    assert_eq!(err, PolicyError::EnvKeyNotAllowed("LD_PRELOAD".to_string()));
}

#[test]
fn allow_listed_env_keys_pass() {
    let policy = parse_args(&argv(&[
        "--workspace-id", WS,
        "--env", "GIT_TERMINAL_PROMPT=0",
        "--env", "TERM=xterm",
        "--", "git", "fetch",
    ]))
    .unwrap();
    assert_eq!(
        policy.env,
        vec![
            ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
            ("TERM".to_string(), "xterm".to_string()),
        ]
    );
}

#[test]
fn malformed_env_pair_is_refused() {
    let err =
        parse_args(&argv(&["--workspace-id", WS, "--env", "TERM", "--", "git"])).unwrap_err();
    assert_eq!(err, PolicyError::MalformedEnv("TERM".to_string()));
}

#[test]
fn unknown_flags_are_ignored() {
    let policy = parse_args(&argv(&[
        "--workspace-id", WS, "--frobnicate", "--", "git", "log",
    ]))
    .unwrap();
    assert_eq!(policy.command, "git");
}

#[test]
fn net_mode_parsing() {
    assert_eq!(NetMode::parse("none").unwrap(), NetMode::None);
    assert_eq!(NetMode::parse("tcp:443").unwrap(), NetMode::Tcp(vec![443]));
    assert_eq!(
        NetMode::parse("tcp:443,8080").unwrap(),
        NetMode::Tcp(vec![443, 8080])
    );
    assert_eq!(NetMode::parse("bind:8000").unwrap(), NetMode::Bind(vec![8000]));
    assert!(NetMode::parse("tcp:").is_err());
    assert!(NetMode::parse("tcp:notaport").is_err());
    assert!(NetMode::parse("udp:53").is_err());
    assert!(NetMode::parse("all").is_err());
}

#[test]
fn net_mode_display_round_trip() {
    for s in ["none", "tcp:443", "tcp:443,8080", "bind:8000"] {
        assert_eq!(NetMode::parse(s).unwrap().to_string(), s);
    }
}

#[test]
fn seccomp_flag_parsing() {
    let policy =
        parse_args(&argv(&["--workspace-id", WS, "--seccomp", "off", "--", "git"])).unwrap();
    assert!(!policy.seccomp);
    assert!(parse_args(&argv(&["--workspace-id", WS, "--seccomp", "maybe", "--", "git"]))
        .is_err());
}

#[test]
fn command_allow_list_refuses_unknown_binaries() {
    assert!(matches!(
        resolve_command("curl"),
        Err(PolicyError::CommandNotAllowed(_))
    ));
    assert!(matches!(
        resolve_command("/usr/bin/python3"),
        Err(PolicyError::CommandNotAllowed(_))
    ));
}

#[test]
fn command_must_live_in_search_dirs() {
    // Allowed basename, disallowed directory.
    assert!(matches!(
        resolve_command("/tmp/git"),
        Err(PolicyError::CommandNotAllowed(_))
    ));
    // Relative path with directory components.
    assert!(matches!(
        resolve_command("./git"),
        Err(PolicyError::CommandNotAllowed(_))
    ));
}

#[test]
fn bare_name_resolves_to_absolute_path() {
    // `sh` exists on any box this suite runs on.
    let resolved = resolve_command("sh").unwrap();
    assert!(resolved.is_absolute());
    assert_eq!(resolved.file_name().unwrap(), "sh");
}

#[test]
fn cwd_outside_workspace_is_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let roots = PolicyRoots {
        workspace_root: tmp.path().join("workspaces"),
        home_base: tmp.path().join("home"),
    };
    let mut policy =
        parse_args(&argv(&["--workspace-id", WS, "--", "cat", "/etc/shadow"])).unwrap();
    policy.cwd = Some(PathBuf::from("/etc"));
    assert_eq!(
        policy.validate(&roots).unwrap_err(),
        PolicyError::CwdOutsideWorkspace
    );
}

#[test]
fn cwd_inside_workspace_root_is_accepted() {
    let tmp = tempfile::tempdir().unwrap();
    let roots = PolicyRoots {
        workspace_root: tmp.path().to_path_buf(),
        home_base: tmp.path().join("home"),
    };
    let ws_dir = tmp.path().join(WS).join("sessions");
    std::fs::create_dir_all(&ws_dir).unwrap();
    let mut policy = parse_args(&argv(&["--workspace-id", WS, "--", "sh"])).unwrap();
    policy.cwd = Some(ws_dir.clone());
    let (_, cwd) = policy.validate(&roots).unwrap();
    assert_eq!(cwd.unwrap(), ws_dir.canonicalize().unwrap());
}

#[test]
fn cwd_symlink_escape_is_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let roots = PolicyRoots {
        workspace_root: tmp.path().to_path_buf(),
        home_base: tmp.path().join("home"),
    };
    let ws_dir = tmp.path().join(WS);
    std::fs::create_dir_all(&ws_dir).unwrap();
    let outside = tmp.path().join("outside");
    std::fs::create_dir_all(&outside).unwrap();
    let link = ws_dir.join("escape");
    std::os::unix::fs::symlink(&outside, &link).unwrap();
    let mut policy = parse_args(&argv(&["--workspace-id", WS, "--", "sh"])).unwrap();
    policy.cwd = Some(link);
    // Canonicalisation resolves the link to a path outside both roots.
    // (`outside` is under tmp but not under tmp/<WS>.)
    assert_eq!(
        policy.validate(&roots).unwrap_err(),
        PolicyError::CwdOutsideWorkspace
    );
}
