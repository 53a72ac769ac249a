// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `vibe80-create-workspace`: provision one workspace's OS user and tree.
//!
//! Idempotent; exits non-zero on partial failure without rollback — the next
//! call re-converges. The workspace secret hash arrives on stdin so it never
//! shows up in a process listing.

use std::io::Read;
use vibe80_core::WorkspaceId;
use vibe80_sandbox::provision::{provision, ProvisionConfig};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> std::process::ExitCode {
    let argv: Vec<String> = std::env::args().skip(1).collect();

    let mut workspace_id: Option<String> = None;
    let mut iter = argv.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--workspace-id" => workspace_id = iter.next().cloned(),
            // Unknown flags are ignored deliberately.
            _ => {}
        }
    }

    let workspace_id = match workspace_id.as_deref().map(WorkspaceId::parse) {
        Some(Ok(id)) => id,
        Some(Err(e)) => {
            eprintln!("{e}");
            return std::process::ExitCode::from(2);
        }
        None => {
            eprintln!("missing --workspace-id");
            return std::process::ExitCode::from(2);
        }
    };

    let mut secret_hash = String::new();
    if std::io::stdin().read_to_string(&mut secret_hash).is_err() {
        eprintln!("failed to read secret hash from stdin");
        return std::process::ExitCode::from(2);
    }
    let secret_hash = secret_hash.trim();
    if secret_hash.is_empty() {
        eprintln!("missing secret hash on stdin");
        return std::process::ExitCode::from(2);
    }

    let config = ProvisionConfig {
        workspace_root: env_or("WORKSPACE_ROOT_DIRECTORY", "/var/lib/vibe80/workspaces").into(),
        home_base: env_or("WORKSPACE_HOME_BASE", "/home").into(),
    };

    match provision(&workspace_id, secret_hash, &config) {
        Ok(record) => {
            // Callers parse this to learn the assigned uid/gid.
            match serde_json::to_string(&record) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("serialize result: {e}");
                    return std::process::ExitCode::from(1);
                }
            }
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::ExitCode::from(1)
        }
    }
}
