use chrono::{DateTime, Duration, Utc};
use houndcore::{ExecutionId, ExecutionSnapshot, ExecutionStatus, StoreError, SNAPSHOT_VERSION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One row of `list()`: enough to render a table without reading the
/// full snapshot into memory downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionListing {
    pub execution_id: ExecutionId,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub current_step_index: usize,
    pub total_steps: usize,
    pub saved_at: DateTime<Utc>,
}

/// Snapshot persistence, one JSON file per execution under a state
/// directory. Saves go through a temp file and rename so a crash
/// mid-write never corrupts the previous checkpoint.
pub struct ExecutionStore {
    dir: PathBuf,
}

impl ExecutionStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, execution_id: ExecutionId) -> PathBuf {
        self.dir.join(format!("{execution_id}.json"))
    }

    pub async fn save(&self, snapshot: &ExecutionSnapshot) -> Result<(), StoreError> {
        let path = self.path_for(snapshot.execution_id);
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(
            execution_id = %snapshot.execution_id,
            path = %path.display(),
            "saved execution snapshot"
        );
        Ok(())
    }

    pub async fn load(&self, execution_id: ExecutionId) -> Result<ExecutionSnapshot, StoreError> {
        let path = self.path_for(execution_id);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(execution_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: ExecutionSnapshot = serde_json::from_slice(&raw)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: snapshot.version,
            });
        }
        Ok(snapshot)
    }

    pub async fn delete(&self, execution_id: ExecutionId) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(self.path_for(execution_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Summaries of every stored execution. Files that fail to parse
    /// are skipped with a warning rather than failing the whole list.
    pub async fn list(&self) -> Result<Vec<ExecutionListing>, StoreError> {
        let mut listings = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<ExecutionSnapshot>(&raw) {
                Ok(snapshot) => listings.push(ExecutionListing {
                    execution_id: snapshot.execution_id,
                    workflow_id: snapshot.workflow_id,
                    status: snapshot.status,
                    current_step_index: snapshot.current_step_index,
                    total_steps: snapshot.total_steps,
                    saved_at: snapshot.saved_at,
                }),
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "skipping unreadable snapshot");
                }
            }
        }
        listings.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(listings)
    }

    /// Delete snapshots of terminal executions older than `max_age`.
    /// Returns how many were removed. In-flight and paused executions
    /// are never touched.
    pub async fn cleanup(&self, max_age: Duration) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;
        for listing in self.list().await? {
            if listing.status.is_terminal() && listing.saved_at < cutoff {
                if self.delete(listing.execution_id).await? {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            tracing::info!(removed, "cleaned up old execution snapshots");
        }
        Ok(removed)
    }

    /// Parse an execution id from a CLI-style string.
    pub fn parse_id(raw: &str) -> Result<ExecutionId, StoreError> {
        Uuid::parse_str(raw).map_err(|_| StoreError::InvalidId(raw.to_string()))
    }
}
