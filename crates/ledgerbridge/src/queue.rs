//! Background dispatch of sync cycles.
//!
//! Targets are queued on an unbounded channel and run by a dispatcher task
//! that caps concurrency with a semaphore. The queue also subscribes to the
//! local store's change notifications and turns user edits into cycles.

use ledgerbridge_api::{LocalChange, SyncError};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Result;
use crate::service::{SyncTarget, reset_item_markers, reset_order_marker, run_target};
use crate::sync::images::is_image_file;
use crate::sync::{CycleOutcome, Orchestrator};

pub struct SyncQueue {
    tx: mpsc::UnboundedSender<SyncTarget>,
    /// Taken by the dispatcher once workers start.
    rx: Mutex<Option<mpsc::UnboundedReceiver<SyncTarget>>>,
    orchestrator: Orchestrator,
}

impl SyncQueue {
    pub fn new(orchestrator: Orchestrator) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            orchestrator,
        }
    }

    pub fn enqueue(&self, target: SyncTarget) -> Result<()> {
        debug!("[SyncQueue] enqueued {}", target);
        self.tx
            .send(target)
            .map_err(|e| SyncError::storage(format!("Sync queue closed, dropped {}", e.0)))
    }

    /// Spawns the dispatcher. Each job logs its own failure; outcomes land in
    /// the outcome log like any other cycle.
    pub async fn start_workers(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| SyncError::invalid("Sync queue workers already started"))?;
        let concurrency = self
            .orchestrator
            .context()
            .config
            .settings
            .queue_concurrency
            .max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let queue = Arc::clone(self);

        info!("[SyncQueue] starting {} workers", concurrency);
        Ok(tokio::spawn(async move {
            while let Some(target) = rx.recv().await {
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    if let Err(e) = run_target(&queue.orchestrator, &target).await {
                        warn!("[SyncQueue] {} failed: {}", target, e);
                    }
                    drop(permit);
                });
            }
            debug!("[SyncQueue] dispatcher stopped");
        }))
    }

    /// Runs everything queued so far on the calling task. Only available
    /// while workers have not been started.
    pub async fn drain(&self) -> Result<Vec<(SyncTarget, Result<Vec<CycleOutcome>>)>> {
        let mut guard = self.rx.lock().await;
        let rx = guard
            .as_mut()
            .ok_or_else(|| SyncError::invalid("Sync queue is served by background workers"))?;
        let mut results = Vec::new();
        while let Ok(target) = rx.try_recv() {
            let result = run_target(&self.orchestrator, &target).await;
            results.push((target, result));
        }
        Ok(results)
    }

    /// Turns one local change into a queued cycle. Returns whether anything
    /// was enqueued.
    pub async fn handle_change(&self, change: LocalChange) -> Result<bool> {
        let store = self.orchestrator.context().store.as_ref();
        match change {
            LocalChange::ItemSaved { code } => {
                self.forget_item(&code).await?;
                self.requeue_item(&code).await
            }
            LocalChange::AttachmentChanged {
                item_code,
                file_url,
                is_private,
                deleted,
            } => {
                if !is_image_file(&file_url) || (is_private && !deleted) {
                    return Ok(false);
                }
                self.requeue_item(&item_code).await
            }
            LocalChange::SalesOrderSaved { name } => {
                let linked = store
                    .get_sales_order(&name)
                    .await?
                    .and_then(|so| so.remote_ref)
                    .map(|r| r.enabled)
                    .unwrap_or(false);
                if !linked {
                    return Ok(false);
                }
                reset_order_marker(store, &name).await?;
                self.enqueue(SyncTarget::SalesOrder { name })?;
                Ok(true)
            }
        }
    }

    /// Drops cached product → item lookups that point at `code`.
    async fn forget_item(&self, code: &str) -> Result<()> {
        let ctx = self.orchestrator.context();
        if let Some(item) = ctx.store.get_item(code).await? {
            for link in &item.remote_refs {
                if let Some(id) = link.remote_id {
                    ctx.item_index.invalidate(&(link.server.clone(), id));
                }
            }
        }
        Ok(())
    }

    async fn requeue_item(&self, code: &str) -> Result<bool> {
        let store = self.orchestrator.context().store.as_ref();
        let linked = store
            .get_item(code)
            .await?
            .map(|item| item.remote_refs.iter().any(|r| r.enabled))
            .unwrap_or(false);
        if !linked {
            return Ok(false);
        }
        reset_item_markers(store, code).await?;
        self.enqueue(SyncTarget::Item {
            code: code.to_string(),
        })?;
        Ok(true)
    }

    /// Subscribes the queue to local change notifications until the sender
    /// side is dropped.
    pub fn watch_local_changes(
        self: &Arc<Self>,
        mut changes: broadcast::Receiver<LocalChange>,
    ) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if let Err(e) = queue.handle_change(change).await {
                            warn!("[SyncQueue] change notification not handled: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("[SyncQueue] missed {} change notifications", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
