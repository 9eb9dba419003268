//! Local change notifications.
//!
//! Stores publish a [`LocalChange`] for every write that did not originate
//! from the sync engine itself, so the dispatcher can schedule a cycle
//! without the engine re-triggering on its own writes.

use serde::{Deserialize, Serialize};

/// Who performed a local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOrigin {
    User,
    Sync,
}

impl WriteOrigin {
    pub fn is_sync(&self) -> bool {
        matches!(self, WriteOrigin::Sync)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocalChange {
    ItemSaved {
        code: String,
    },
    SalesOrderSaved {
        name: String,
    },
    AttachmentChanged {
        item_code: String,
        file_url: String,
        is_private: bool,
        deleted: bool,
    },
}
