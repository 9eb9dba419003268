//! Trigger surface of the engine.
//!
//! [`SyncService`] runs single-entity cycles inline or through the
//! background queue, sweeps remote records modified since a persisted
//! cursor, resets sync markers and fronts the remote media library.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use ledgerbridge_api::{EntityKey, MediaAsset, RemoteId, ServerId, SyncError};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::Result;
use crate::config::SyncConfig;
use crate::core::remote::{all_orders, all_products};
use crate::core::traits::{CursorKind, CursorStore, ListQuery, LocalStore};
use crate::core::{DependencyTrail, RemoteRegistry};
use crate::queue::SyncQueue;
use crate::sync::outcome::OutcomeLog;
use crate::sync::{CycleOutcome, ItemTarget, Orchestrator, OrderTarget, SweepReport, SyncContext};

/// What a trigger points at: a local key or a remote reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTarget {
    Item { code: String },
    Product { server: ServerId, id: RemoteId },
    SalesOrder { name: String },
    Order { server: ServerId, id: RemoteId },
}

impl SyncTarget {
    pub fn key(&self) -> EntityKey {
        match self {
            SyncTarget::Item { code } => EntityKey::Item { code: code.clone() },
            SyncTarget::Product { server, id } => EntityKey::Product {
                server: server.clone(),
                id: *id,
            },
            SyncTarget::SalesOrder { name } => EntityKey::SalesOrder { name: name.clone() },
            SyncTarget::Order { server, id } => EntityKey::Order {
                server: server.clone(),
                id: *id,
            },
        }
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dispatch {
    #[default]
    Inline,
    Enqueue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncResponse {
    Completed(Vec<CycleOutcome>),
    Enqueued,
}

/// Runs every cycle a target stands for. An item fans out to each server it
/// is linked to; the first failure is returned after all cycles ran.
pub(crate) async fn run_target(
    orchestrator: &Orchestrator,
    target: &SyncTarget,
) -> Result<Vec<CycleOutcome>> {
    let ctx = orchestrator.context();
    match target {
        SyncTarget::Item { code } => {
            let item = ctx
                .store
                .get_item(code)
                .await?
                .ok_or_else(|| SyncError::not_found("Item", code))?;
            let servers: Vec<ServerId> = item
                .remote_refs
                .iter()
                .filter(|r| r.enabled)
                .map(|r| r.server.clone())
                .collect();
            if servers.is_empty() {
                return Err(SyncError::invalid(format!(
                    "Item {} has no enabled remote link",
                    code
                )));
            }

            let mut outcomes = Vec::with_capacity(servers.len());
            let mut first_error = None;
            for server in servers {
                let target = ItemTarget::Local {
                    code: code.clone(),
                    server,
                };
                match orchestrator.sync_item(target, DependencyTrail::root()).await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
            match first_error {
                Some(e) => Err(e),
                None => Ok(outcomes),
            }
        }
        SyncTarget::Product { server, id } => {
            let target = ItemTarget::Remote {
                server: server.clone(),
                id: *id,
            };
            Ok(vec![orchestrator.sync_item(target, DependencyTrail::root()).await?])
        }
        SyncTarget::SalesOrder { name } => {
            let target = OrderTarget::Local { name: name.clone() };
            Ok(vec![orchestrator.sync_order(target, DependencyTrail::root()).await?])
        }
        SyncTarget::Order { server, id } => {
            let target = OrderTarget::Remote {
                server: server.clone(),
                id: *id,
            };
            Ok(vec![orchestrator.sync_order(target, DependencyTrail::root()).await?])
        }
    }
}

/// Clears the sync marker on every remote link of an item so the next cycle
/// compares timestamps again. Returns the number of links reset.
pub(crate) async fn reset_item_markers(store: &dyn LocalStore, code: &str) -> Result<usize> {
    let item = store
        .get_item(code)
        .await?
        .ok_or_else(|| SyncError::not_found("Item", code))?;
    let mut reset = 0;
    for link in item.remote_refs {
        if link.last_sync_marker.is_some() {
            let mut link = link;
            link.last_sync_marker = None;
            store.update_item_ref(code, link).await?;
            reset += 1;
        }
    }
    Ok(reset)
}

pub(crate) async fn reset_order_marker(store: &dyn LocalStore, name: &str) -> Result<usize> {
    let order = store
        .get_sales_order(name)
        .await?
        .ok_or_else(|| SyncError::not_found("Sales Order", name))?;
    match order.remote_ref {
        Some(mut link) if link.last_sync_marker.is_some() => {
            link.last_sync_marker = None;
            store.update_sales_order_ref(name, link).await?;
            Ok(1)
        }
        _ => Ok(0),
    }
}

pub struct SyncService {
    orchestrator: Orchestrator,
    cursors: Arc<dyn CursorStore>,
    queue: Arc<SyncQueue>,
}

impl SyncService {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        remotes: RemoteRegistry,
        cursors: Arc<dyn CursorStore>,
    ) -> Self {
        let ctx = Arc::new(SyncContext::new(Arc::new(config), store, remotes));
        let orchestrator = Orchestrator::new(ctx);
        let queue = Arc::new(SyncQueue::new(orchestrator.clone()));
        Self {
            orchestrator,
            cursors,
            queue,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    pub fn outcomes(&self) -> &OutcomeLog {
        &self.orchestrator.context().outcomes
    }

    fn ctx(&self) -> &SyncContext {
        self.orchestrator.context()
    }

    pub async fn sync(&self, target: SyncTarget, dispatch: Dispatch) -> Result<SyncResponse> {
        match dispatch {
            Dispatch::Inline => Ok(SyncResponse::Completed(
                run_target(&self.orchestrator, &target).await?,
            )),
            Dispatch::Enqueue => {
                self.queue.enqueue(target)?;
                Ok(SyncResponse::Enqueued)
            }
        }
    }

    /// Clears the markers of the target's local record and runs it inline.
    pub async fn reset_and_sync(&self, target: SyncTarget) -> Result<Vec<CycleOutcome>> {
        self.reset_markers(&target).await?;
        run_target(&self.orchestrator, &target).await
    }

    /// Forces re-evaluation of one entity on its next cycle.
    pub async fn reset_markers(&self, target: &SyncTarget) -> Result<usize> {
        let store = self.ctx().store.as_ref();
        match target {
            SyncTarget::Item { code } => reset_item_markers(store, code).await,
            SyncTarget::SalesOrder { name } => reset_order_marker(store, name).await,
            SyncTarget::Product { server, id } => {
                let mut reset = 0;
                for code in store.items_for_remote(server, *id).await? {
                    reset += reset_item_markers(store, &code).await?;
                }
                Ok(reset)
            }
            SyncTarget::Order { server, id } => {
                let mut reset = 0;
                for name in store.sales_orders_for_remote(server, *id).await? {
                    reset += reset_order_marker(store, &name).await?;
                }
                Ok(reset)
            }
        }
    }

    /// Remote products an item is linked to, for enabled links with an id.
    pub async fn product_links(&self, code: &str) -> Result<Vec<(ServerId, RemoteId)>> {
        let item = self
            .ctx()
            .store
            .get_item(code)
            .await?
            .ok_or_else(|| SyncError::not_found("Item", code))?;
        Ok(item
            .remote_refs
            .iter()
            .filter(|r| r.enabled && r.is_linked())
            .filter_map(|r| r.remote_id.map(|id| (r.server.clone(), id)))
            .collect())
    }

    async fn sweep_since(
        &self,
        kind: CursorKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>> {
        match since {
            Some(since) => Ok(since),
            None => self.cursors.load_cursor(kind).await?.ok_or_else(|| {
                SyncError::config(format!(
                    "No {} cursor recorded yet; pass an explicit start time for the first sweep",
                    kind
                ))
            }),
        }
    }

    /// One item cycle per remote product modified since the cursor (or
    /// `since`). The cursor advances to the sweep's start only when every
    /// server was listed.
    pub async fn sweep_items(&self, since: Option<DateTime<Utc>>) -> Result<SweepReport> {
        let started_at = Utc::now();
        let since = self.sweep_since(CursorKind::Items, since).await?;
        let settings = &self.ctx().config.settings;
        let mut targets = Vec::new();

        for server in self.ctx().config.enabled_servers() {
            let catalog = self.ctx().remote(&server.id)?;
            let query = ListQuery::modified_since(since).with_page_size(settings.page_size);
            let products = all_products(catalog.as_ref(), query).await?;
            info!(
                "[SyncService] {} products modified on {} since {}",
                products.len(),
                server.id,
                since
            );
            targets.extend(products.into_iter().map(|p| ItemTarget::Remote {
                server: server.id.clone(),
                id: p.id,
            }));
        }

        let results: Vec<(EntityKey, Result<CycleOutcome>)> = stream::iter(targets)
            .map(|target| async move {
                let key = target.key();
                (
                    key,
                    self.orchestrator
                        .sync_item(target, DependencyTrail::root())
                        .await,
                )
            })
            .buffer_unordered(settings.sweep_concurrency.max(1))
            .collect()
            .await;

        let report = tally(started_at, results);
        self.cursors.save_cursor(CursorKind::Items, started_at).await?;
        info!(
            "[SyncService] item sweep done: {} scanned, {} failed",
            report.scanned,
            report.errors.len()
        );
        Ok(report)
    }

    /// Like [`Self::sweep_items`] for orders; trashed orders are listed too
    /// and orders created before `minimum_creation_date` are ignored.
    pub async fn sweep_orders(&self, since: Option<DateTime<Utc>>) -> Result<SweepReport> {
        let started_at = Utc::now();
        let since = self.sweep_since(CursorKind::Orders, since).await?;
        let settings = &self.ctx().config.settings;
        let mut targets = Vec::new();

        for server in self.ctx().config.enabled_servers() {
            let catalog = self.ctx().remote(&server.id)?;
            let query = ListQuery::modified_since(since)
                .created_after(settings.minimum_creation_date)
                .with_page_size(settings.page_size);
            let mut orders = all_orders(catalog.as_ref(), query.clone()).await?;
            orders.extend(all_orders(catalog.as_ref(), query.with_status("trash")).await?);

            let mut seen = HashSet::new();
            orders.retain(|o| seen.insert(o.id));
            info!(
                "[SyncService] {} orders modified on {} since {}",
                orders.len(),
                server.id,
                since
            );
            targets.extend(orders.into_iter().map(|o| OrderTarget::Remote {
                server: server.id.clone(),
                id: o.id,
            }));
        }

        let results: Vec<(EntityKey, Result<CycleOutcome>)> = stream::iter(targets)
            .map(|target| async move {
                let key = target.key();
                (
                    key,
                    self.orchestrator
                        .sync_order(target, DependencyTrail::root())
                        .await,
                )
            })
            .buffer_unordered(settings.sweep_concurrency.max(1))
            .collect()
            .await;

        let report = tally(started_at, results);
        self.cursors
            .save_cursor(CursorKind::Orders, started_at)
            .await?;
        info!(
            "[SyncService] order sweep done: {} scanned, {} failed",
            report.scanned,
            report.errors.len()
        );
        Ok(report)
    }

    pub async fn upload_media(
        &self,
        server: &ServerId,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<MediaAsset> {
        self.ensure_media(server)?;
        let asset = self
            .ctx()
            .remote(server)?
            .upload_media(file_name, content_type, bytes)
            .await?;
        self.ctx()
            .media_index
            .invalidate(&(server.clone(), file_name.to_string()));
        info!(
            "[SyncService] uploaded {} to {} as media {}",
            file_name, server, asset.id
        );
        Ok(asset)
    }

    pub async fn delete_media(&self, server: &ServerId, id: u64) -> Result<()> {
        self.ensure_media(server)?;
        self.ctx().remote(server)?.delete_media(id).await?;
        // Entries are keyed by file name; drop them all rather than track ids.
        self.ctx().media_index.clear();
        Ok(())
    }

    fn ensure_media(&self, server: &ServerId) -> Result<()> {
        if !self.ctx().server(server)?.media_enabled() {
            return Err(SyncError::config(format!(
                "Media library access is not configured for server {}",
                server
            )));
        }
        Ok(())
    }
}

fn tally(
    started_at: DateTime<Utc>,
    results: Vec<(EntityKey, Result<CycleOutcome>)>,
) -> SweepReport {
    let mut report = SweepReport {
        started_at: Some(started_at),
        ..Default::default()
    };
    for (key, result) in results {
        report.scanned += 1;
        match result {
            Ok(outcome) => {
                if let Some(action) = outcome.action {
                    report.count(action);
                }
            }
            Err(e) => {
                warn!("[SyncService] sweep skipped {}: {}", key, e);
                report.fail(&key, &e);
            }
        }
    }
    report
}
