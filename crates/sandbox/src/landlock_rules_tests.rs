// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::policy::parse_args;

fn policy_with(extra: &[&str]) -> ExecPolicy {
    let mut argv = vec![
        "--workspace-id".to_string(),
        "w0123456789abcdef01234567".to_string(),
    ];
    argv.extend(extra.iter().map(|s| s.to_string()));
    argv.extend(["--".to_string(), "git".to_string(), "status".to_string()]);
    parse_args(&argv).unwrap()
}

#[test]
fn base_ro_set_includes_command_dir_and_libs() {
    let policy = policy_with(&[]);
    let ro = read_only_paths(&policy, Path::new("/usr/bin/git"));
    assert!(ro.contains(&PathBuf::from("/usr/bin")));
    assert!(ro.contains(&PathBuf::from("/lib")));
    assert!(ro.contains(&PathBuf::from("/usr/lib64")));
    assert!(ro.contains(&PathBuf::from("/usr/local/lib")));
}

#[test]
fn explicit_rules_are_unioned() {
    let policy = policy_with(&[
        "--allow-ro", "/srv/vibe80/w0123456789abcdef01234567/sessions/s1/repository",
        "--allow-rw", "/srv/vibe80/w0123456789abcdef01234567/sessions/s1/worktrees/t1",
        "--allow-ro-file", "/srv/creds/key.json",
    ]);
    let ro = read_only_paths(&policy, Path::new("/usr/bin/git"));
    let rw = read_write_paths(&policy);
    assert!(ro
        .contains(&PathBuf::from("/srv/vibe80/w0123456789abcdef01234567/sessions/s1/repository")));
    assert!(ro.contains(&PathBuf::from("/srv/creds/key.json")));
    assert_eq!(
        rw,
        vec![PathBuf::from(
            "/srv/vibe80/w0123456789abcdef01234567/sessions/s1/worktrees/t1"
        )]
    );
}

#[test]
fn duplicate_paths_are_deduped() {
    let policy = policy_with(&["--allow-ro", "/lib", "--allow-ro", "/lib"]);
    let ro = read_only_paths(&policy, Path::new("/usr/bin/git"));
    assert_eq!(ro.iter().filter(|p| **p == PathBuf::from("/lib")).count(), 1);
}
