// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn sample_session() -> Session {
    Session {
        session_id: SessionId::parse("s0123456789abcdef01234567").unwrap(),
        workspace_id: WorkspaceId::parse("wfedcba9876543210fedcba98").unwrap(),
        repo_url: "git@example.com:org/repo.git".to_string(),
        name: "repo".to_string(),
        created_at_ms: 1_000,
        last_activity_at_ms: 1_000,
        deleted_at_ms: None,
    }
}

#[test]
fn directory_layout_is_derived_from_ids() {
    let session = sample_session();
    let root = Path::new("/srv/vibe80");
    assert_eq!(
        session.repository_dir(root),
        Path::new("/srv/vibe80/wfedcba9876543210fedcba98/sessions/s0123456789abcdef01234567/repository")
    );
    assert_eq!(
        session.attachments_dir(root),
        session.session_dir(root).join("attachments")
    );
    assert_eq!(session.worktrees_dir(root), session.session_dir(root).join("worktrees"));
    assert_eq!(session.logs_dir(root), session.session_dir(root).join("logs"));
}

#[test]
fn soft_delete_flag() {
    let mut session = sample_session();
    assert!(!session.is_deleted());
    session.deleted_at_ms = Some(2_000);
    assert!(session.is_deleted());
}
