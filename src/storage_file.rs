use std::path::PathBuf;

use async_trait::async_trait;
use tracing::warn;

use crate::error::StoreError;
use crate::storage::SnapshotStore;
use crate::types::WebhookEvent;

/// JSON file snapshot backend.
///
/// The full record set is written as a single JSON array document. The
/// write goes to a sibling temp file first and is renamed into place,
/// so a crash mid-write leaves the previous snapshot intact.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn persist(&self, events: &[WebhookEvent]) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(events)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, body).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }

    async fn load(&self) -> Result<Vec<WebhookEvent>, StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::Io(err)),
        };

        // A corrupt snapshot must never abort startup; log and start empty.
        let value: serde_json::Value = match serde_json::from_slice(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "malformed event snapshot, starting empty"
                );
                return Ok(Vec::new());
            }
        };

        if !value.is_array() {
            warn!(
                path = %self.path.display(),
                "event snapshot is not an array, ignoring"
            );
            return Ok(Vec::new());
        }

        match serde_json::from_value(value) {
            Ok(events) => Ok(events),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "unreadable event records in snapshot, starting empty"
                );
                Ok(Vec::new())
            }
        }
    }
}
