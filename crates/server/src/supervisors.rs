// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of live supervisors, keyed by `(session, worktree)`.
//!
//! Dormant worktrees hold no entry (and no process). The registry is part of
//! the boot-time service struct; shutdown drains it by fanning SIGTERM out
//! through every supervisor's handle.

use parking_lot::Mutex;
use std::collections::HashMap;
use vibe80_agent::SupervisorHandle;
use vibe80_core::{SessionId, WorktreeId};

#[derive(Default)]
pub struct SupervisorRegistry {
    inner: Mutex<HashMap<(SessionId, WorktreeId), SupervisorHandle>>,
}

impl SupervisorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live handle for a worktree, if any. Dead entries are pruned on read.
    pub fn get(
        &self,
        session_id: &SessionId,
        worktree_id: &WorktreeId,
    ) -> Option<SupervisorHandle> {
        let mut inner = self.inner.lock();
        let key = (*session_id, worktree_id.clone());
        match inner.get(&key) {
            Some(handle) if handle.is_alive() => Some(handle.clone()),
            Some(_) => {
                inner.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, session_id: SessionId, handle: SupervisorHandle) {
        self.inner
            .lock()
            .insert((session_id, handle.worktree_id().clone()), handle);
    }

    pub fn remove(&self, session_id: &SessionId, worktree_id: &WorktreeId) {
        self.inner.lock().remove(&(*session_id, worktree_id.clone()));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drain every supervisor: each sends SIGTERM to its agent, waits the
    /// grace window, SIGKILLs survivors, then exits.
    pub async fn shutdown_all(&self) {
        let handles: Vec<SupervisorHandle> =
            self.inner.lock().drain().map(|(_, handle)| handle).collect();
        let count = handles.len();
        let mut joins = Vec::with_capacity(count);
        for handle in handles {
            joins.push(tokio::spawn(async move {
                let _ = handle.shutdown().await;
            }));
        }
        for join in joins {
            let _ = join.await;
        }
        tracing::info!(count, "all supervisors drained");
    }
}
