//! JSON persistence for [`MemoryState`].

use ledgerbridge_api::SyncError;
use std::path::Path;
use tracing::info;

use super::memory::{MemoryLocalStore, MemoryState};
use crate::Result;

/// Loads a state file; a missing file is an empty state.
pub async fn load_state(path: &Path) -> Result<MemoryState> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content).map_err(|e| {
            SyncError::storage(format!(
                "Failed to parse state file {}: {}",
                path.display(),
                e
            ))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MemoryState::default()),
        Err(e) => Err(SyncError::storage(format!(
            "Failed to read state file {}: {}",
            path.display(),
            e
        ))),
    }
}

pub async fn save_state(path: &Path, state: &MemoryState) -> Result<()> {
    let content = serde_json::to_string_pretty(state)
        .map_err(|e| SyncError::storage(format!("Failed to encode state: {}", e)))?;
    tokio::fs::write(path, content).await.map_err(|e| {
        SyncError::storage(format!(
            "Failed to write state file {}: {}",
            path.display(),
            e
        ))
    })
}

impl MemoryLocalStore {
    pub async fn open(path: &Path) -> Result<Self> {
        let state = load_state(path).await?;
        info!(
            "[MemoryLocalStore] loaded {} items and {} sales orders from {}",
            state.items.len(),
            state.sales_orders.len(),
            path.display()
        );
        Ok(Self::from_state(state))
    }

    pub async fn persist(&self, path: &Path) -> Result<()> {
        save_state(path, &self.snapshot().await).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerbridge_api::{Item, WriteOrigin};
    use crate::core::traits::LocalStore;

    #[tokio::test]
    async fn test_persist_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = MemoryLocalStore::open(&path).await.unwrap();
        store
            .insert_item(Item::new("A", "Apple"), WriteOrigin::User)
            .await
            .unwrap();
        store.persist(&path).await.unwrap();

        let reopened = MemoryLocalStore::open(&path).await.unwrap();
        let item = reopened.get_item("A").await.unwrap().unwrap();
        assert_eq!(item.item_name, "Apple");
    }
}
