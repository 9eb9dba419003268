use ledgerbridge_api::{MediaAsset, RemoteId, ServerId};
use std::sync::Arc;
use std::time::Duration;

use super::outcome::OutcomeLog;
use crate::Result;
use crate::config::{ServerConfig, SyncConfig};
use crate::core::traits::{LocalStore, RemoteCatalog};
use crate::core::{EntityLocks, RemoteRegistry, TtlCache};

/// Everything a cycle needs, shared by all cycles of one engine instance.
pub struct SyncContext {
    pub config: Arc<SyncConfig>,
    pub store: Arc<dyn LocalStore>,
    pub remotes: RemoteRegistry,
    pub locks: EntityLocks,
    pub outcomes: OutcomeLog,
    /// `(server, remote product id)` → item code, for order line mapping.
    pub item_index: TtlCache<(ServerId, RemoteId), String>,
    /// `(server, file name)` → media library match.
    pub media_index: TtlCache<(ServerId, String), Option<MediaAsset>>,
}

impl SyncContext {
    pub fn new(
        config: Arc<SyncConfig>,
        store: Arc<dyn LocalStore>,
        remotes: RemoteRegistry,
    ) -> Self {
        let ttl = Duration::from_secs(config.settings.cache_ttl_secs);
        Self {
            config,
            store,
            remotes,
            locks: EntityLocks::new(),
            outcomes: OutcomeLog::default(),
            item_index: TtlCache::new(ttl),
            media_index: TtlCache::new(ttl),
        }
    }

    pub fn server(&self, id: &ServerId) -> Result<&ServerConfig> {
        self.config.server(id)
    }

    pub fn remote(&self, id: &ServerId) -> Result<Arc<dyn RemoteCatalog>> {
        self.remotes.get(id)
    }

    pub fn snapshot_limit(&self) -> usize {
        self.config.settings.snapshot_log_limit
    }
}
