//! Finding the other half of a record.
//!
//! Local → remote follows the ref's remote id; remote → local goes through
//! the cross-reference index. Pairing never creates anything: a missing
//! counterpart is reported as `None` for the conflict resolver.

use chrono::{DateTime, Utc};
use ledgerbridge_api::{
    EntityKey, Item, LinkedRemoteRef, Order, Product, RemoteId, SalesOrder, ServerId, SyncError,
};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

use super::conflict::{LocalState, PairState};
use super::context::SyncContext;
use crate::Result;
use crate::core::remote::{order_by_id, product_by_id};

/// Where an item cycle starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemTarget {
    Local { code: String, server: ServerId },
    Remote { server: ServerId, id: RemoteId },
}

impl ItemTarget {
    /// Lock key: the remote identity when known before pairing, else the local one.
    pub fn key(&self) -> EntityKey {
        match self {
            ItemTarget::Local { code, .. } => EntityKey::Item { code: code.clone() },
            ItemTarget::Remote { server, id } => EntityKey::Product {
                server: server.clone(),
                id: *id,
            },
        }
    }
}

impl fmt::Display for ItemTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemTarget::Local { code, server } => write!(f, "item:{}@{}", code, server),
            ItemTarget::Remote { .. } => write!(f, "{}", self.key()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderTarget {
    Local { name: String },
    Remote { server: ServerId, id: RemoteId },
}

impl OrderTarget {
    pub fn key(&self) -> EntityKey {
        match self {
            OrderTarget::Local { name } => EntityKey::SalesOrder { name: name.clone() },
            OrderTarget::Remote { server, id } => EntityKey::Order {
                server: server.clone(),
                id: *id,
            },
        }
    }
}

impl fmt::Display for OrderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// JSON views of both halves, for failure diagnostics.
pub trait PairSnapshot {
    fn local_snapshot(&self) -> String;
    fn remote_snapshot(&self) -> String;
}

fn to_json<T: Serialize>(value: &Option<T>) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unserializable: {}>", e))
}

impl PairSnapshot for ItemPair {
    fn local_snapshot(&self) -> String {
        to_json(&self.local)
    }

    fn remote_snapshot(&self) -> String {
        to_json(&self.remote)
    }
}

impl PairSnapshot for OrderPair {
    fn local_snapshot(&self) -> String {
        to_json(&self.local)
    }

    fn remote_snapshot(&self) -> String {
        to_json(&self.remote)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemPair {
    pub server: ServerId,
    pub local: Option<Item>,
    pub remote: Option<Product>,
}

impl ItemPair {
    pub fn link(&self) -> Option<&LinkedRemoteRef> {
        self.local.as_ref()?.ref_for(&self.server)
    }

    pub fn state(&self) -> Result<PairState> {
        let local = match &self.local {
            Some(item) => Some(local_state(item.modified, item.ref_for(&self.server))),
            None => None,
        };
        let remote = match &self.remote {
            Some(product) => Some(remote_modified(product.date_modified, "product", product.id)?),
            None => None,
        };
        Ok(PairState { local, remote })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderPair {
    pub server: ServerId,
    pub local: Option<SalesOrder>,
    pub remote: Option<Order>,
}

impl OrderPair {
    pub fn link(&self) -> Option<&LinkedRemoteRef> {
        self.local.as_ref()?.remote_ref.as_ref()
    }

    pub fn state(&self) -> Result<PairState> {
        let local = match &self.local {
            Some(order) => Some(local_state(order.modified, order.remote_ref.as_ref())),
            None => None,
        };
        let remote = match &self.remote {
            Some(order) => Some(remote_modified(order.date_modified, "order", order.id)?),
            None => None,
        };
        Ok(PairState { local, remote })
    }
}

fn local_state(modified: DateTime<Utc>, link: Option<&LinkedRemoteRef>) -> LocalState {
    LocalState {
        modified,
        marker: link.and_then(|l| l.last_sync_marker),
        linked: link.map(|l| l.is_linked()).unwrap_or(false),
    }
}

fn remote_modified(
    date_modified: Option<DateTime<Utc>>,
    kind: &str,
    id: RemoteId,
) -> Result<DateTime<Utc>> {
    date_modified.ok_or_else(|| {
        SyncError::reconciliation(format!("Remote {} {} has no date_modified", kind, id))
    })
}

pub struct PairingResolver<'a> {
    ctx: &'a SyncContext,
}

impl<'a> PairingResolver<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    fn ensure_server_enabled(&self, server: &ServerId, entity: &EntityKey) -> Result<()> {
        if !self.ctx.server(server)?.enable_sync {
            return Err(SyncError::SyncDisabled {
                server: server.clone(),
                entity: entity.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_link_enabled(link: &LinkedRemoteRef, entity: &EntityKey) -> Result<()> {
        if !link.enabled {
            return Err(SyncError::SyncDisabled {
                server: link.server.clone(),
                entity: entity.to_string(),
            });
        }
        Ok(())
    }

    pub async fn item_from_local(&self, code: &str, server: &ServerId) -> Result<ItemPair> {
        let entity = EntityKey::Item {
            code: code.to_string(),
        };
        self.ensure_server_enabled(server, &entity)?;

        let item = self
            .ctx
            .store
            .get_item(code)
            .await?
            .ok_or_else(|| SyncError::not_found("Item", code))?;
        let link = item.ref_for(server).cloned().ok_or_else(|| {
            SyncError::not_found("Remote link", format!("{} on {}", code, server))
        })?;
        Self::ensure_link_enabled(&link, &entity)?;

        let remote = match link.remote_id.filter(|_| link.is_linked()) {
            Some(remote_id) => {
                let catalog = self.ctx.remote(server)?;
                let product = product_by_id(catalog.as_ref(), remote_id).await?.ok_or_else(|| {
                    SyncError::DanglingReference {
                        server: server.clone(),
                        remote_id,
                        entity: entity.to_string(),
                    }
                })?;
                Some(product)
            }
            None => None,
        };

        debug!(
            "[PairingResolver] {} paired with remote {:?}",
            entity,
            remote.as_ref().map(|p| p.id)
        );
        Ok(ItemPair {
            server: server.clone(),
            local: Some(item),
            remote,
        })
    }

    pub async fn item_from_remote(&self, server: &ServerId, id: RemoteId) -> Result<ItemPair> {
        let entity = EntityKey::Product {
            server: server.clone(),
            id,
        };
        self.ensure_server_enabled(server, &entity)?;

        let catalog = self.ctx.remote(server)?;
        let product = product_by_id(catalog.as_ref(), id)
            .await?
            .ok_or_else(|| SyncError::not_found("Product", entity.to_string()))?;

        let codes = self.ctx.store.items_for_remote(server, id).await?;
        if codes.len() > 1 {
            warn!(
                "[PairingResolver] {} is linked from {} items ({}); using {}",
                entity,
                codes.len(),
                codes.join(", "),
                codes[0]
            );
        }
        let local = match codes.first() {
            Some(code) => self.ctx.store.get_item(code).await?,
            None => None,
        };
        if let Some(link) = local.as_ref().and_then(|item| item.ref_for(server)) {
            Self::ensure_link_enabled(link, &entity)?;
        }

        Ok(ItemPair {
            server: server.clone(),
            local,
            remote: Some(product),
        })
    }

    pub async fn order_from_local(&self, name: &str) -> Result<OrderPair> {
        let entity = EntityKey::SalesOrder {
            name: name.to_string(),
        };
        let order = self
            .ctx
            .store
            .get_sales_order(name)
            .await?
            .ok_or_else(|| SyncError::not_found("Sales Order", name))?;
        let link = order
            .remote_ref
            .clone()
            .ok_or_else(|| SyncError::not_found("Remote link", name))?;
        self.ensure_server_enabled(&link.server, &entity)?;
        Self::ensure_link_enabled(&link, &entity)?;

        let remote = match link.remote_id.filter(|_| link.is_linked()) {
            Some(remote_id) => {
                let catalog = self.ctx.remote(&link.server)?;
                let remote = order_by_id(catalog.as_ref(), remote_id).await?.ok_or_else(|| {
                    SyncError::DanglingReference {
                        server: link.server.clone(),
                        remote_id,
                        entity: entity.to_string(),
                    }
                })?;
                Some(remote)
            }
            None => None,
        };

        Ok(OrderPair {
            server: link.server,
            local: Some(order),
            remote,
        })
    }

    pub async fn order_from_remote(&self, server: &ServerId, id: RemoteId) -> Result<OrderPair> {
        let entity = EntityKey::Order {
            server: server.clone(),
            id,
        };
        self.ensure_server_enabled(server, &entity)?;

        let catalog = self.ctx.remote(server)?;
        let remote = order_by_id(catalog.as_ref(), id)
            .await?
            .ok_or_else(|| SyncError::not_found("Order", entity.to_string()))?;

        let names = self.ctx.store.sales_orders_for_remote(server, id).await?;
        if names.len() > 1 {
            warn!(
                "[PairingResolver] {} is linked from {} sales orders; using {}",
                entity,
                names.len(),
                names[0]
            );
        }
        let local = match names.first() {
            Some(name) => self.ctx.store.get_sales_order(name).await?,
            None => None,
        };
        if let Some(link) = local.as_ref().and_then(|so| so.remote_ref.as_ref()) {
            Self::ensure_link_enabled(link, &entity)?;
        }

        Ok(OrderPair {
            server: server.clone(),
            local,
            remote: Some(remote),
        })
    }
}
