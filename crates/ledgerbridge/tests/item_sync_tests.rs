use anyhow::Result;
use chrono::{Duration, Utc};
use ledgerbridge::sync::CyclePhase;
use ledgerbridge::testing::Harness;
use ledgerbridge::testing::fixtures::{linked_item, pending_item, product};
use ledgerbridge::{Action, Dispatch, LocalStore, SyncResponse, SyncTarget};
use ledgerbridge_api::{
    Attachment, EntityKey, LinkedRemoteRef, LocalChange, RemoteId, SyncError, WriteOrigin,
};

fn completed(response: SyncResponse) -> Vec<ledgerbridge::CycleOutcome> {
    match response {
        SyncResponse::Completed(outcomes) => outcomes,
        SyncResponse::Enqueued => panic!("expected an inline run"),
    }
}

fn product_target(h: &Harness, id: RemoteId) -> SyncTarget {
    SyncTarget::Product {
        server: h.server.clone(),
        id,
    }
}

#[tokio::test]
async fn test_remote_product_creates_item_then_converges() -> Result<()> {
    let h = Harness::new();
    let p = h.remote.seed_product(product("Widget"));

    let outcomes = completed(h.service.sync(product_target(&h, p.id), Dispatch::Inline).await?);
    assert_eq!(outcomes[0].action, Some(Action::CreateLocal));

    let code = p.id.to_string();
    let item = h.store.get_item(&code).await?.expect("item created");
    assert_eq!(item.item_name, "Widget");
    let link = item.ref_for(&h.server).expect("linked");
    assert_eq!(link.remote_id, Some(p.id));
    assert_eq!(link.last_sync_marker, p.date_modified);

    let writes = h.total_writes();
    let outcomes = completed(h.service.sync(product_target(&h, p.id), Dispatch::Inline).await?);
    assert_eq!(outcomes[0].action, Some(Action::NoOp));
    assert_eq!(h.total_writes(), writes, "converged cycle must not write");
    Ok(())
}

#[tokio::test]
async fn test_remote_edit_flows_to_local() -> Result<()> {
    let h = Harness::new();
    let p = h.remote.seed_product(product("Widget"));
    h.service.sync(product_target(&h, p.id), Dispatch::Inline).await?;

    let edited = h
        .remote
        .edit_product(p.id, |p| p.name = "Widget Pro".into())
        .expect("product exists");
    let outcomes = completed(h.service.sync(product_target(&h, p.id), Dispatch::Inline).await?);
    assert_eq!(outcomes[0].action, Some(Action::UpdateLocal));

    let item = h.store.get_item(&p.id.to_string()).await?.expect("item");
    assert_eq!(item.item_name, "Widget Pro");
    assert_eq!(
        item.ref_for(&h.server).and_then(|r| r.last_sync_marker),
        edited.date_modified
    );
    Ok(())
}

#[tokio::test]
async fn test_local_edit_pushes_after_change_notification() -> Result<()> {
    let h = Harness::new();
    let p = h.remote.seed_product(product("Widget"));
    h.service.sync(product_target(&h, p.id), Dispatch::Inline).await?;

    let code = p.id.to_string();
    let mut item = h.store.get_item(&code).await?.expect("item");
    item.item_name = "Widget (local)".into();
    h.store.save_item(item, WriteOrigin::User).await?;

    // Without a marker reset the pair still looks converged.
    let outcomes = completed(
        h.service
            .sync(SyncTarget::Item { code: code.clone() }, Dispatch::Inline)
            .await?,
    );
    assert_eq!(outcomes[0].action, Some(Action::NoOp));

    let queued = h
        .service
        .queue()
        .handle_change(LocalChange::ItemSaved { code: code.clone() })
        .await?;
    assert!(queued);
    let results = h.service.queue().drain().await?;
    assert_eq!(results.len(), 1);
    let outcomes = results.into_iter().next().map(|(_, r)| r).expect("one job")?;
    assert_eq!(outcomes[0].action, Some(Action::UpdateRemote));
    assert_eq!(h.remote.product(p.id).expect("product").name, "Widget (local)");

    let writes = h.total_writes();
    h.service
        .sync(SyncTarget::Item { code }, Dispatch::Inline)
        .await?;
    assert_eq!(h.total_writes(), writes);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_syncs_create_one_item() -> Result<()> {
    let h = Harness::new();
    let p = h.remote.seed_product(product("Widget"));

    let (a, b) = tokio::join!(
        h.service.sync(product_target(&h, p.id), Dispatch::Inline),
        h.service.sync(product_target(&h, p.id), Dispatch::Inline),
    );
    a?;
    b?;

    let state = h.store.snapshot().await;
    assert_eq!(state.items.len(), 1);
    assert_eq!(h.store.items_for_remote(&h.server, p.id).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_local_item_creates_one_product_even_after_failure() -> Result<()> {
    let h = Harness::new();
    h.store
        .seed_item(pending_item("WIDGET", "Widget", &h.server))
        .await;
    let target = SyncTarget::Item {
        code: "WIDGET".into(),
    };

    h.remote.fail_next(1);
    let err = h
        .service
        .sync(target.clone(), Dispatch::Inline)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(h.remote.products().is_empty());
    let link = h.store.get_item("WIDGET").await?.expect("item").remote_refs[0].clone();
    assert!(link.enabled, "a failed create must leave the link retryable");

    let outcomes = completed(h.service.sync(target.clone(), Dispatch::Inline).await?);
    assert_eq!(outcomes[0].action, Some(Action::CreateRemote));
    h.service.sync(target, Dispatch::Inline).await?;

    let products = h.remote.products();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].name, "Widget");
    assert_eq!(products[0].status.as_deref(), Some("draft"));
    let item = h.store.get_item("WIDGET").await?.expect("item");
    assert_eq!(item.remote_refs[0].remote_id, Some(products[0].id));
    assert_eq!(item.remote_refs[0].last_sync_marker, products[0].date_modified);
    Ok(())
}

#[tokio::test]
async fn test_failed_cycle_is_recorded_with_phase() -> Result<()> {
    let h = Harness::new();
    h.store
        .seed_item(linked_item("GONE", "Gone", &h.server, RemoteId(999)))
        .await;

    let err = h
        .service
        .sync(SyncTarget::Item { code: "GONE".into() }, Dispatch::Inline)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::DanglingReference { .. }));

    let outcomes = h.service.outcomes().for_entity(&EntityKey::Item {
        code: "GONE".into(),
    });
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].phase, CyclePhase::Failed);
    assert_eq!(outcomes[0].failed_in, Some(CyclePhase::Pairing));
    Ok(())
}

#[tokio::test]
async fn test_disabled_link_is_skipped() -> Result<()> {
    let h = Harness::new();
    let p = h.remote.seed_product(product("Widget"));
    let mut item = linked_item("W", "Widget", &h.server, p.id);
    item.remote_refs[0].enabled = false;
    h.store.seed_item(item).await;

    let err = h
        .service
        .sync(product_target(&h, p.id), Dispatch::Inline)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::SyncDisabled { .. }));

    let err = h
        .service
        .sync(SyncTarget::Item { code: "W".into() }, Dispatch::Inline)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidInput { .. }));
    Ok(())
}

#[tokio::test]
async fn test_variant_of_itself_is_a_dependency_cycle() -> Result<()> {
    let h = Harness::new();
    let mut item = pending_item("LOOP", "Loop", &h.server);
    item.variant_of = Some("LOOP".into());
    h.store.seed_item(item).await;

    let err = h
        .service
        .sync(SyncTarget::Item { code: "LOOP".into() }, Dispatch::Inline)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::DependencyCycle { .. }));
    assert!(h.remote.products().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_variant_creates_parent_first() -> Result<()> {
    let h = Harness::new();
    h.store
        .save_item_attribute(ledgerbridge_api::ItemAttribute {
            name: "Colour".into(),
            values: vec![
                ledgerbridge_api::ItemAttributeValue {
                    value: "Red".into(),
                    abbr: "R".into(),
                },
                ledgerbridge_api::ItemAttributeValue {
                    value: "Blue".into(),
                    abbr: "B".into(),
                },
            ],
        })
        .await?;

    let mut parent = ledgerbridge::testing::fixtures::item("SHIRT", "Shirt");
    parent.has_variants = true;
    parent.attributes = vec![ledgerbridge_api::ItemVariantAttribute {
        attribute: "Colour".into(),
        value: None,
    }];
    h.store.seed_item(parent).await;

    let mut variant = pending_item("SHIRT-R", "Shirt Red", &h.server);
    variant.variant_of = Some("SHIRT".into());
    variant.attributes = vec![ledgerbridge_api::ItemVariantAttribute {
        attribute: "Colour".into(),
        value: Some("Red".into()),
    }];
    h.store.seed_item(variant).await;

    h.service
        .sync(
            SyncTarget::Item {
                code: "SHIRT-R".into(),
            },
            Dispatch::Inline,
        )
        .await?;

    let parent_id = h
        .store
        .get_item("SHIRT")
        .await?
        .and_then(|i| i.ref_for(&h.server).and_then(|r| r.remote_id))
        .expect("parent linked");
    let parent_product = h.remote.product(parent_id).expect("parent product");
    assert_eq!(parent_product.attributes[0].options, vec!["Red", "Blue"]);

    let variant_id = h
        .store
        .get_item("SHIRT-R")
        .await?
        .and_then(|i| i.ref_for(&h.server).and_then(|r| r.remote_id))
        .expect("variant linked");
    let variant_product = h.remote.product(variant_id).expect("variant product");
    assert_eq!(variant_product.parent_id, Some(parent_id));
    assert_eq!(variant_product.attributes[0].option.as_deref(), Some("Red"));
    Ok(())
}

#[tokio::test]
async fn test_unchanged_gallery_is_not_rewritten() -> Result<()> {
    let h = Harness::with_server(|s| s.site_domain = Some("erp.example.com".into()));
    let p = h.remote.seed_product(product("Widget"));

    let mut item = linked_item("W", "Widget", &h.server, p.id);
    item.image = Some("/files/primary.jpg".into());
    item.modified = Utc::now() + Duration::seconds(1);
    h.store.seed_item(item).await;
    let base = Utc::now();
    for (n, name) in ["primary.jpg", "a.jpg", "b.jpg"].iter().enumerate() {
        h.store
            .add_attachment(
                Attachment {
                    name: format!("F{}", n),
                    attached_to: "W".into(),
                    file_name: name.to_string(),
                    file_url: format!("/files/{}", name),
                    is_private: false,
                    created: base + Duration::seconds(n as i64),
                },
                WriteOrigin::Sync,
            )
            .await;
    }

    let target = SyncTarget::Item { code: "W".into() };
    let outcomes = completed(h.service.sync(target.clone(), Dispatch::Inline).await?);
    assert_eq!(outcomes[0].action, Some(Action::UpdateRemote));
    let srcs: Vec<String> = h
        .remote
        .product(p.id)
        .expect("product")
        .images
        .into_iter()
        .map(|i| i.src)
        .collect();
    assert_eq!(
        srcs,
        vec![
            "https://erp.example.com/files/primary.jpg",
            "https://erp.example.com/files/a.jpg",
            "https://erp.example.com/files/b.jpg",
        ]
    );

    // Touch the item locally and force a re-evaluation: images are unchanged.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let item = h.store.get_item("W").await?.expect("item");
    h.store.save_item(item, WriteOrigin::User).await?;
    let remote_writes = h.remote.write_count();
    let outcomes = h.service.reset_and_sync(target).await?;
    assert_eq!(outcomes[0].action, Some(Action::UpdateRemote));
    assert_eq!(h.remote.write_count(), remote_writes);
    Ok(())
}

#[tokio::test]
async fn test_product_links_and_marker_reset() -> Result<()> {
    let h = Harness::new();
    let mut item = linked_item("W", "Widget", &h.server, RemoteId(7));
    item.remote_refs[0].last_sync_marker = Some(Utc::now());
    item.remote_refs
        .push(LinkedRemoteRef::pending("other.example.com".into()));
    h.store.seed_item(item).await;

    let links = h.service.product_links("W").await?;
    assert_eq!(links, vec![(h.server.clone(), RemoteId(7))]);

    let reset = h
        .service
        .reset_markers(&SyncTarget::Item { code: "W".into() })
        .await?;
    assert_eq!(reset, 1);
    let item = h.store.get_item("W").await?.expect("item");
    assert!(item.remote_refs.iter().all(|r| r.last_sync_marker.is_none()));
    Ok(())
}

#[tokio::test]
async fn test_enqueued_sync_runs_in_background() -> Result<()> {
    let h = Harness::new();
    let p = h.remote.seed_product(product("Widget"));
    let workers = h.service.queue().start_workers().await?;

    let response = h
        .service
        .sync(product_target(&h, p.id), Dispatch::Enqueue)
        .await?;
    assert_eq!(response, SyncResponse::Enqueued);

    let mut outcomes = h.service.outcomes().subscribe();
    let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            if let Some(done) = h
                .service
                .outcomes()
                .for_entity(&EntityKey::Product {
                    server: h.server.clone(),
                    id: p.id,
                })
                .pop()
            {
                return done;
            }
            let _ = outcomes.recv().await;
        }
    })
    .await?;
    assert_eq!(outcome.action, Some(Action::CreateLocal));
    workers.abort();
    Ok(())
}

#[tokio::test]
async fn test_local_and_remote_triggers_share_the_pair_lock() -> Result<()> {
    let h = Harness::new();
    let p = h.remote.seed_product(product("Widget"));
    h.store
        .seed_item(linked_item("W", "Widget", &h.server, p.id))
        .await;
    let wait = std::time::Duration::from_millis(200);

    // A remote-triggered cycle of the pair is in flight.
    let guard = h
        .service
        .orchestrator()
        .context()
        .locks
        .acquire(&EntityKey::Product {
            server: h.server.clone(),
            id: p.id,
        })
        .await;
    let local = h
        .service
        .sync(SyncTarget::Item { code: "W".into() }, Dispatch::Inline);
    assert!(
        tokio::time::timeout(wait, local).await.is_err(),
        "local-triggered cycle ran while the pair was locked"
    );
    drop(guard);

    // A local-triggered cycle of a linked item holds the same key, so a
    // sweep of the product waits on it.
    let guard = h
        .service
        .orchestrator()
        .context()
        .locks
        .acquire(&EntityKey::Product {
            server: h.server.clone(),
            id: p.id,
        })
        .await;
    let remote = h.service.sync(product_target(&h, p.id), Dispatch::Inline);
    assert!(tokio::time::timeout(wait, remote).await.is_err());
    drop(guard);

    let (local, remote) = tokio::join!(
        h.service
            .sync(SyncTarget::Item { code: "W".into() }, Dispatch::Inline),
        h.service.sync(product_target(&h, p.id), Dispatch::Inline),
    );
    let local = completed(local?);
    let remote = completed(remote?);
    assert_eq!(local.len(), 1);
    assert_eq!(remote.len(), 1);
    assert_eq!(h.store.items_for_remote(&h.server, p.id).await?, vec!["W".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_unlinked_item_locks_on_its_local_key() -> Result<()> {
    let h = Harness::new();
    h.store
        .seed_item(pending_item("NEW", "New", &h.server))
        .await;

    let guard = h
        .service
        .orchestrator()
        .context()
        .locks
        .acquire(&EntityKey::Item { code: "NEW".into() })
        .await;
    let pending = h
        .service
        .sync(SyncTarget::Item { code: "NEW".into() }, Dispatch::Inline);
    assert!(
        tokio::time::timeout(std::time::Duration::from_millis(200), pending)
            .await
            .is_err()
    );
    drop(guard);

    let outcomes = completed(
        h.service
            .sync(SyncTarget::Item { code: "NEW".into() }, Dispatch::Inline)
            .await?,
    );
    assert_eq!(outcomes[0].action, Some(Action::CreateRemote));
    Ok(())
}

#[tokio::test]
async fn test_server_with_sync_disabled_is_skipped() -> Result<()> {
    let h = Harness::with_server(|s| s.enable_sync = false);
    h.store
        .seed_item(pending_item("NEW", "New", &h.server))
        .await;
    let p = h.remote.seed_product(product("Widget"));

    let err = h
        .service
        .sync(SyncTarget::Item { code: "NEW".into() }, Dispatch::Inline)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::SyncDisabled { .. }));
    assert_eq!(h.remote.products().len(), 1, "no product may be created");
    assert_eq!(h.remote.write_count(), 0);

    let outcomes = h.service.outcomes().for_entity(&EntityKey::Item {
        code: "NEW".into(),
    });
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].failed_in, Some(CyclePhase::Pairing));

    let err = h
        .service
        .sync(product_target(&h, p.id), Dispatch::Inline)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::SyncDisabled { .. }));
    assert!(h.store.get_item(&p.id.to_string()).await?.is_none());
    Ok(())
}
