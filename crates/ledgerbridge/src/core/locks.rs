//! Per-entity serialization of sync cycles.
//!
//! Two cycles for the same entity must never interleave; cycles for
//! different entities run freely. Keys are the remote identity when known
//! before pairing, otherwise the local key.

use ledgerbridge_api::EntityKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::trace;

#[derive(Default)]
pub struct EntityLocks {
    slots: Mutex<HashMap<EntityKey, Arc<tokio::sync::Mutex<()>>>>,
}

pub struct EntityGuard {
    _guard: OwnedMutexGuard<()>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &EntityKey) -> EntityGuard {
        let slot = {
            let mut slots = match self.slots.lock() {
                Ok(slots) => slots,
                Err(poisoned) => poisoned.into_inner(),
            };
            // Drop slots nobody holds or waits on.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        trace!("[EntityLocks] acquiring {}", key);
        EntityGuard {
            _guard: slot.lock_owned().await,
        }
    }

    pub fn held(&self) -> usize {
        self.slots
            .lock()
            .map(|slots| {
                slots
                    .values()
                    .filter(|slot| Arc::strong_count(slot) > 1)
                    .count()
            })
            .unwrap_or(0)
    }
}
