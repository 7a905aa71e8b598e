//! State snapshot
//!
//! Sessions and lock holders, enough to rebuild the lease store and lock
//! table after a restart. Wait queues are ephemeral and never persisted;
//! clients re-request after a restart.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use ldlm_common::{LdlmError, Result};

use crate::lease::{SessionSnapshot, current_unix_ms};
use crate::service::LockService;
use crate::table::LockSnapshot;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub taken_at_unix_ms: i64,
    pub sessions: Vec<SessionSnapshot>,
    pub locks: Vec<LockSnapshot>,
}

/// Counts of what a restore brought back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub sessions: usize,
    pub locks: usize,
    pub skipped_sessions: usize,
    pub skipped_locks: usize,
}

impl LockService {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            taken_at_unix_ms: current_unix_ms(),
            sessions: self.lease_store().export(),
            locks: self.lock_table().export(),
        }
    }

    /// Load a snapshot into an empty service.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<RestoreSummary> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(LdlmError::PersistenceError(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        if !self.lease_store().is_empty() || !self.lock_table().is_empty() {
            return Err(LdlmError::PersistenceError(
                "cannot restore into a non-empty lock manager".to_string(),
            ));
        }

        let mut summary = RestoreSummary::default();
        for session in &snapshot.sessions {
            if self.lease_store().restore_session(session)? {
                summary.sessions += 1;
            } else {
                summary.skipped_sessions += 1;
            }
        }
        for lock in &snapshot.locks {
            if self.lock_table().restore_entry(lock)? {
                summary.locks += 1;
            } else {
                summary.skipped_locks += 1;
            }
        }

        info!(
            sessions = summary.sessions,
            locks = summary.locks,
            skipped_sessions = summary.skipped_sessions,
            skipped_locks = summary.skipped_locks,
            "State restored from snapshot"
        );
        Ok(summary)
    }

    /// Write a snapshot to `path` through a temporary file and rename.
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| LdlmError::PersistenceError(e.to_string()))?;

        let tmp = path.with_extension("tmp");
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persistence_error(path, e))?;
        }
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| persistence_error(&tmp, e))?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to move snapshot into place");
            persistence_error(path, e)
        })?;

        info!(
            path = %path.display(),
            sessions = snapshot.sessions.len(),
            locks = snapshot.locks.len(),
            "Snapshot written"
        );
        Ok(())
    }

    /// Restore from `path`. A missing file is not an error and restores nothing.
    pub async fn restore_from_file(&self, path: &Path) -> Result<Option<RestoreSummary>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No snapshot found, starting empty");
                return Ok(None);
            }
            Err(e) => return Err(persistence_error(path, e)),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| LdlmError::PersistenceError(format!("{}: {}", path.display(), e)))?;
        self.restore(&snapshot).map(Some)
    }
}

fn persistence_error(path: &Path, e: std::io::Error) -> LdlmError {
    LdlmError::PersistenceError(format!("{}: {}", path.display(), e))
}
