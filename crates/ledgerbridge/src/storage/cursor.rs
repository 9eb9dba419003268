//! Sweep cursor stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerbridge_api::SyncError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::Result;
use crate::core::traits::{CursorKind, CursorStore};

#[derive(Default)]
pub struct MemoryCursorStore {
    cursors: RwLock<BTreeMap<CursorKind, DateTime<Utc>>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cursor(kind: CursorKind, at: DateTime<Utc>) -> Self {
        let mut cursors = BTreeMap::new();
        cursors.insert(kind, at);
        Self {
            cursors: RwLock::new(cursors),
        }
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load_cursor(&self, kind: CursorKind) -> Result<Option<DateTime<Utc>>> {
        Ok(self.cursors.read().await.get(&kind).copied())
    }

    async fn save_cursor(&self, kind: CursorKind, at: DateTime<Utc>) -> Result<()> {
        self.cursors.write().await.insert(kind, at);
        Ok(())
    }
}

/// Cursors persisted as a small JSON document.
pub struct FileCursorStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<BTreeMap<CursorKind, DateTime<Utc>>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                SyncError::storage(format!(
                    "Failed to parse cursor file {}: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(SyncError::storage(format!(
                "Failed to read cursor file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load_cursor(&self, kind: CursorKind) -> Result<Option<DateTime<Utc>>> {
        let _guard = self.lock.lock().await;
        let cursor = self.read_all().await?.get(&kind).copied();
        debug!("[FileCursorStore] loaded {} cursor: {:?}", kind, cursor);
        Ok(cursor)
    }

    async fn save_cursor(&self, kind: CursorKind, at: DateTime<Utc>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut cursors = self.read_all().await?;
        cursors.insert(kind, at);
        let content = serde_json::to_string_pretty(&cursors)
            .map_err(|e| SyncError::storage(format!("Failed to encode cursors: {}", e)))?;
        tokio::fs::write(&self.path, content).await.map_err(|e| {
            SyncError::storage(format!(
                "Failed to write cursor file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        info!("[FileCursorStore] {} cursor advanced to {}", kind, at);
        Ok(())
    }
}
