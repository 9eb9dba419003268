use anyhow::Result;
use chrono::{DateTime, Utc};
use ledgerbridge::testing::Harness;
use ledgerbridge::testing::fixtures::{product, remote_order};
use ledgerbridge::{CursorKind, CursorStore, LocalStore};
use ledgerbridge_api::SyncError;

#[tokio::test]
async fn test_first_sweep_needs_a_start_time() -> Result<()> {
    let h = Harness::new();
    let err = h.service.sweep_items(None).await.unwrap_err();
    assert!(matches!(err, SyncError::Config { .. }));
    assert!(h.cursors.load_cursor(CursorKind::Items).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_item_sweep_advances_cursor() -> Result<()> {
    let h = Harness::new();
    let a = h.remote.seed_product(product("Alpha"));
    h.remote.seed_product(product("Beta"));
    h.remote.seed_product(product("Gamma"));

    let report = h.service.sweep_items(Some(DateTime::UNIX_EPOCH)).await?;
    assert_eq!(report.scanned, 3);
    assert_eq!(report.created_local, 3);
    assert!(report.errors.is_empty());
    assert_eq!(
        h.cursors.load_cursor(CursorKind::Items).await?,
        report.started_at
    );

    let report = h.service.sweep_items(None).await?;
    assert_eq!(report.scanned, 0);

    h.remote
        .edit_product(a.id, |p| p.name = "Alpha II".into())
        .expect("product exists");
    let report = h.service.sweep_items(None).await?;
    assert_eq!(report.scanned, 1);
    assert_eq!(report.updated_local, 1);
    let item = h.store.get_item(&a.id.to_string()).await?.expect("item");
    assert_eq!(item.item_name, "Alpha II");
    Ok(())
}

#[tokio::test]
async fn test_listing_failure_keeps_cursor() -> Result<()> {
    let h = Harness::new();
    h.remote.seed_product(product("Alpha"));
    h.remote.fail_next(1);

    let err = h
        .service
        .sweep_items(Some(DateTime::UNIX_EPOCH))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(h.cursors.load_cursor(CursorKind::Items).await?.is_none());
    assert!(h.store.snapshot().await.items.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_order_sweep_collects_failures_and_includes_trash() -> Result<()> {
    let h = Harness::new();
    h.remote.seed_order(remote_order(Vec::new(), "10.00"));
    let mut odd = remote_order(Vec::new(), "20.00");
    odd.status = "awaiting-pickup".into();
    let odd = h.remote.seed_order(odd);
    let mut trashed = remote_order(Vec::new(), "30.00");
    trashed.status = "trash".into();
    let trashed = h.remote.seed_order(trashed);

    let before = Utc::now();
    let report = h.service.sweep_orders(Some(DateTime::UNIX_EPOCH)).await?;
    assert_eq!(report.scanned, 3);
    assert_eq!(report.created_local, 2);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].0.contains(&odd.id.to_string()));

    let cursor = h.cursors.load_cursor(CursorKind::Orders).await?;
    assert!(cursor.is_some_and(|c| c >= before));

    let names = h
        .store
        .sales_orders_for_remote(&h.server, trashed.id)
        .await?;
    let so = h
        .store
        .get_sales_order(&names[0])
        .await?
        .expect("trashed order booked");
    assert_eq!(so.remote_status.as_deref(), Some("Trash"));
    Ok(())
}

#[tokio::test]
async fn test_orders_created_before_minimum_are_ignored() -> Result<()> {
    let h = Harness::new();
    h.remote.seed_order(remote_order(Vec::new(), "10.00"));
    let cutoff = Utc::now();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let recent = h.remote.seed_order(remote_order(Vec::new(), "20.00"));

    let mut config = h.service.orchestrator().context().config.as_ref().clone();
    config.settings.minimum_creation_date = Some(cutoff);
    let service = ledgerbridge::SyncService::new(
        config,
        h.store.clone(),
        ledgerbridge::core::RemoteRegistry::new().with(h.remote.clone()),
        h.cursors.clone(),
    );

    let report = service.sweep_orders(Some(DateTime::UNIX_EPOCH)).await?;
    assert_eq!(report.scanned, 1);
    assert_eq!(
        h.store
            .sales_orders_for_remote(&h.server, recent.id)
            .await?
            .len(),
        1
    );
    Ok(())
}
