use anyhow::{Context, Result, anyhow};
use ledgerbridge::storage::{FileCursorStore, MemoryLocalStore};
use ledgerbridge::{Dispatch, SyncConfig, SyncResponse, SyncService, SyncTarget};
use ledgerbridge_woocommerce::WooCommerceCatalog;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::args::{Args, Command};

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn completed(response: SyncResponse) -> Result<Value> {
    match response {
        SyncResponse::Completed(outcomes) => Ok(serde_json::to_value(outcomes)?),
        SyncResponse::Enqueued => Ok(json!({ "enqueued": true })),
    }
}

/// Runs one command against a wired service and returns what to print.
pub async fn execute(service: &SyncService, command: Command) -> Result<Value> {
    match command {
        Command::SyncItem { code } => {
            completed(service.sync(SyncTarget::Item { code }, Dispatch::Inline).await?)
        }
        Command::SyncProduct { server, id } => completed(
            service
                .sync(SyncTarget::Product { server, id }, Dispatch::Inline)
                .await?,
        ),
        Command::SyncOrder { name } => completed(
            service
                .sync(SyncTarget::SalesOrder { name }, Dispatch::Inline)
                .await?,
        ),
        Command::SyncRemoteOrder { server, id } => completed(
            service
                .sync(SyncTarget::Order { server, id }, Dispatch::Inline)
                .await?,
        ),
        Command::ResetItem { code } => Ok(serde_json::to_value(
            service.reset_and_sync(SyncTarget::Item { code }).await?,
        )?),
        Command::ResetOrder { name } => Ok(serde_json::to_value(
            service
                .reset_and_sync(SyncTarget::SalesOrder { name })
                .await?,
        )?),
        Command::SweepItems { since } => Ok(serde_json::to_value(service.sweep_items(since).await?)?),
        Command::SweepOrders { since } => {
            Ok(serde_json::to_value(service.sweep_orders(since).await?)?)
        }
        Command::ProductLinks { code } => {
            let links: Vec<Value> = service
                .product_links(&code)
                .await?
                .into_iter()
                .map(|(server, id)| json!({ "server": server, "id": id }))
                .collect();
            Ok(Value::Array(links))
        }
        Command::UploadMedia { server, file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let file_name = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow!("{} has no file name", file.display()))?;
            let asset = service
                .upload_media(&server, file_name, content_type_for(&file), bytes)
                .await?;
            Ok(serde_json::to_value(asset)?)
        }
        Command::DeleteMedia { server, id } => {
            service.delete_media(&server, id).await?;
            Ok(json!({ "deleted": id }))
        }
    }
}

/// Loads config and state, runs the command and persists the state again.
/// State is written even when the command fails so that records created
/// before the failure keep their links.
pub async fn run(args: Args) -> Result<Value> {
    let config = SyncConfig::load_from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let remotes = WooCommerceCatalog::registry(&config)?;
    let store = Arc::new(MemoryLocalStore::open(&args.state).await?);
    let cursors = Arc::new(FileCursorStore::new(&args.cursors));
    let service = SyncService::new(config, store.clone(), remotes, cursors);

    let result = execute(&service, args.command).await;
    if let Err(e) = store.persist(&args.state).await {
        warn!("[cli] failed to persist state: {}", e);
        if result.is_ok() {
            return Err(e.into());
        }
    } else {
        info!("[cli] state saved to {}", args.state.display());
    }
    result
}
