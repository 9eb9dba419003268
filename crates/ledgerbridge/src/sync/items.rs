//! Item ↔ product reconciliation.

use async_trait::async_trait;
use chrono::Utc;
use ledgerbridge_api::{
    EntityKey, Item, ItemAttribute, ItemAttributeValue, ItemVariantAttribute, LinkedRemoteRef,
    MediaAsset, Money, Product, ProductAttribute, ProductType, ServerId, SyncError, WriteOrigin,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::conflict::{Action, Decision, decide};
use super::context::SyncContext;
use super::images::{ImageReconciler, MediaLookup, public_url};
use super::orchestrator::{Orchestrator, Reconciler, missing_marker};
use super::pairing::{ItemPair, ItemTarget, PairingResolver};
use crate::Result;
use crate::config::ServerConfig;
use crate::core::DependencyTrail;
use crate::core::traits::RemoteCatalog;

pub struct ItemReconciler<'a> {
    orch: &'a Orchestrator,
}

impl<'a> ItemReconciler<'a> {
    pub fn new(orch: &'a Orchestrator) -> Self {
        Self { orch }
    }

    fn ctx(&self) -> &SyncContext {
        self.orch.context()
    }

    async fn create_remote(&self, pair: &mut ItemPair, trail: &DependencyTrail) -> Result<()> {
        let ctx = self.ctx();
        let server = ctx.server(&pair.server)?;
        let catalog = ctx.remote(&pair.server)?;
        let item = pair
            .local
            .clone()
            .ok_or_else(|| SyncError::reconciliation("CreateRemote without a local item"))?;

        let draft = self.product_from_item(&item, server, trail).await?;

        // Disabled while the POST is in flight: a crash between create and link
        // leaves the ref disabled instead of inviting a second create.
        let mut link = item
            .ref_for(&pair.server)
            .cloned()
            .unwrap_or_else(|| LinkedRemoteRef::pending(pair.server.clone()));
        link.enabled = false;
        ctx.store.update_item_ref(&item.code, link.clone()).await?;

        let created = match catalog.create_product(&draft).await {
            Ok(product) => product,
            Err(e) => {
                link.enabled = true;
                ctx.store.update_item_ref(&item.code, link).await?;
                return Err(e);
            }
        };
        info!(
            "[ItemReconciler] created product {} on {} for item {}",
            created.id, pair.server, item.code
        );

        link.remote_id = Some(created.id);
        ctx.store.update_item_ref(&item.code, link).await?;
        ctx.item_index
            .insert((pair.server.clone(), created.id), item.code.clone());

        pair.local = ctx.store.get_item(&item.code).await?;
        pair.remote = Some(created);
        Ok(())
    }

    async fn product_from_item(
        &self,
        item: &Item,
        server: &ServerConfig,
        trail: &DependencyTrail,
    ) -> Result<Product> {
        let ctx = self.ctx();
        let mut product = Product::draft(server.id.clone(), item.item_name.clone());
        product.kind = ProductType::Simple;
        product.status = Some(server.items.product_status().to_string());
        product.manage_stock = item.is_stock_item;

        if item.has_variants {
            product.kind = ProductType::Variable;
            let mut attributes = Vec::with_capacity(item.attributes.len());
            for row in &item.attributes {
                let definition = ctx
                    .store
                    .get_item_attribute(&row.attribute)
                    .await?
                    .ok_or_else(|| SyncError::not_found("Item Attribute", &row.attribute))?;
                attributes.push(ProductAttribute {
                    name: row.attribute.clone(),
                    slug: Some(attribute_slug(&row.attribute)),
                    visible: true,
                    variation: true,
                    options: definition.values.into_iter().map(|v| v.value).collect(),
                    option: None,
                });
            }
            product.attributes = attributes;
        }

        if let Some(parent_code) = &item.variant_of {
            product.parent_id = Some(self.ensure_remote_parent(parent_code, &server.id, trail).await?);
            product.kind = ProductType::Variation;
            product.attributes = item
                .attributes
                .iter()
                .map(|row| ProductAttribute {
                    name: row.attribute.clone(),
                    slug: Some(attribute_slug(&row.attribute)),
                    visible: false,
                    variation: false,
                    options: Vec::new(),
                    option: row.value.clone(),
                })
                .collect();
        }

        if let Some(primary) = &item.image {
            let attachments = ctx.store.item_attachments(&item.code).await?;
            let attachment = attachments.iter().find(|a| &a.file_url == primary);
            let is_private = attachment.map(|a| a.is_private).unwrap_or(false);
            if let Some(src) = public_url(primary, is_private, server.site_domain.as_deref()) {
                let created = attachment.map(|a| a.created).unwrap_or_else(Utc::now);
                product.images = vec![ledgerbridge_api::ImageRef {
                    id: None,
                    src,
                    date_created: Some(created.format("%Y-%m-%dT%H:%M:%S").to_string()),
                }];
            }
        }

        product.regular_price = Some(self.price_for(item, server).await?.unwrap_or(Money::ZERO));
        server.field_map.apply_to_remote(item, &mut product);
        Ok(product)
    }

    /// Creates (or confirms) the parent product of a variant through a nested cycle.
    async fn ensure_remote_parent(
        &self,
        parent_code: &str,
        server: &ServerId,
        trail: &DependencyTrail,
    ) -> Result<ledgerbridge_api::RemoteId> {
        let store = &self.ctx().store;
        let parent = store
            .get_item(parent_code)
            .await?
            .ok_or_else(|| SyncError::not_found("Item", parent_code))?;
        if parent.ref_for(server).is_none() {
            store
                .update_item_ref(parent_code, LinkedRemoteRef::pending(server.clone()))
                .await?;
        }

        self.orch
            .sync_item(
                ItemTarget::Local {
                    code: parent_code.to_string(),
                    server: server.clone(),
                },
                trail.clone(),
            )
            .await?;

        store
            .get_item(parent_code)
            .await?
            .and_then(|p| p.ref_for(server).and_then(|r| r.remote_id))
            .filter(|id| !id.is_unassigned())
            .ok_or_else(|| {
                SyncError::reconciliation(format!(
                    "Parent item {} has no remote product on {} after sync",
                    parent_code, server
                ))
            })
    }

    async fn price_for(&self, item: &Item, server: &ServerConfig) -> Result<Option<Money>> {
        let price_list = match (&server.items.price_list, server.items.enable_price_list_sync) {
            (Some(list), true) => list,
            _ => return Ok(None),
        };
        let today = Utc::now().date_naive();
        Ok(self
            .ctx()
            .store
            .item_prices(&item.code, price_list)
            .await?
            .into_iter()
            .find(|p| p.is_valid_on(today))
            .map(|p| p.rate))
    }

    async fn create_local(&self, pair: &mut ItemPair, trail: &DependencyTrail) -> Result<()> {
        let ctx = self.ctx();
        let server = ctx.server(&pair.server)?;
        let product = pair
            .remote
            .clone()
            .ok_or_else(|| SyncError::reconciliation("CreateLocal without a remote product"))?;

        let code = match (&server.items.name_by, &product.sku) {
            (crate::config::ItemNaming::Sku, Some(sku)) if !sku.is_empty() => sku.clone(),
            _ => product.id.to_string(),
        };
        let mut item = Item::new(code, product.name.clone());
        item.stock_uom = server.items.stock_uom().to_string();
        item.item_group = server.items.item_group.clone();

        if matches!(product.kind, ProductType::Variable | ProductType::Variation) {
            self.upsert_item_attributes(&product).await?;
            item.attributes = product
                .attributes
                .iter()
                .map(|a| ItemVariantAttribute {
                    attribute: a.name.clone(),
                    value: (product.kind == ProductType::Variation)
                        .then(|| a.option.clone())
                        .flatten(),
                })
                .collect();
        }
        item.has_variants = product.kind == ProductType::Variable;

        if product.kind == ProductType::Variation {
            let parent_id = product.parent_id.filter(|id| !id.is_unassigned()).ok_or_else(|| {
                SyncError::reconciliation(format!("Variation {} has no parent_id", product.id))
            })?;
            self.orch
                .sync_item(
                    ItemTarget::Remote {
                        server: pair.server.clone(),
                        id: parent_id,
                    },
                    trail.clone(),
                )
                .await?;
            let parents = ctx.store.items_for_remote(&pair.server, parent_id).await?;
            let parent = parents.first().ok_or_else(|| {
                SyncError::reconciliation(format!(
                    "Parent product {} of variation {} has no local item after sync",
                    parent_id, product.id
                ))
            })?;
            item.variant_of = Some(parent.clone());
        }

        item.remote_refs
            .push(LinkedRemoteRef::linked(pair.server.clone(), product.id));
        server.field_map.apply_to_local(&product, &mut item);

        let item = ctx.store.insert_item(item, WriteOrigin::Sync).await?;
        info!(
            "[ItemReconciler] created item {} from product {} on {}",
            item.code, product.id, pair.server
        );
        ctx.item_index
            .insert((pair.server.clone(), product.id), item.code.clone());
        pair.local = Some(item);
        Ok(())
    }

    /// Variable products define the full option list; variations only add
    /// their own option.
    async fn upsert_item_attributes(&self, product: &Product) -> Result<()> {
        let store = &self.ctx().store;
        for remote in &product.attributes {
            let options: Vec<String> = match product.kind {
                ProductType::Variable => remote.options.clone(),
                _ => remote.option.clone().into_iter().collect(),
            };
            let mut attribute = store
                .get_item_attribute(&remote.name)
                .await?
                .unwrap_or_else(|| ItemAttribute {
                    name: remote.name.clone(),
                    values: Vec::new(),
                });

            let existing: BTreeSet<&str> =
                attribute.values.iter().map(|v| v.value.as_str()).collect();
            let wanted: BTreeSet<&str> = options.iter().map(String::as_str).collect();
            let values = if product.kind == ProductType::Variable {
                if existing == wanted {
                    continue;
                }
                options.iter().map(|o| attribute_value(o)).collect()
            } else {
                if wanted.is_subset(&existing) {
                    continue;
                }
                let mut values = attribute.values.clone();
                values.extend(
                    options
                        .iter()
                        .filter(|o| !existing.contains(o.as_str()))
                        .map(|o| attribute_value(o)),
                );
                values
            };
            attribute.values = values;
            debug!(
                "[ItemReconciler] attribute {} now has {} values",
                attribute.name,
                attribute.values.len()
            );
            store.save_item_attribute(attribute).await?;
        }
        Ok(())
    }

    async fn update_local(&self, pair: &mut ItemPair) -> Result<()> {
        let ctx = self.ctx();
        let server = ctx.server(&pair.server)?;
        let (Some(local), Some(product)) = (&pair.local, &pair.remote) else {
            return Err(SyncError::reconciliation("UpdateLocal needs both sides"));
        };

        let mut item = local.clone();
        let mut dirty = false;
        if item.item_name != product.name {
            item.item_name = product.name.clone();
            dirty = true;
        }
        if server.field_map.apply_to_local(product, &mut item) {
            dirty = true;
        }
        if dirty {
            let saved = ctx.store.save_item(item, WriteOrigin::Sync).await?;
            pair.local = Some(saved);
        }
        Ok(())
    }

    async fn update_remote(&self, pair: &mut ItemPair) -> Result<()> {
        let ctx = self.ctx();
        let server = ctx.server(&pair.server)?;
        let catalog = ctx.remote(&pair.server)?;
        let (Some(item), Some(remote)) = (&pair.local, &pair.remote) else {
            return Err(SyncError::reconciliation("UpdateRemote needs both sides"));
        };

        let mut product = remote.clone();
        let mut dirty = false;

        if let Some(primary) = item.image.as_deref() {
            match self.reconcile_images(item, &product, primary, server, &catalog).await {
                Ok(result) if result.changed => {
                    product.images = result.images;
                    dirty = true;
                }
                Ok(_) => {}
                Err(e) => warn!(
                    "[ItemReconciler] image reconciliation for {} skipped: {}",
                    item.code, e
                ),
            }
        }

        if product.name != item.item_name {
            product.name = item.item_name.clone();
            dirty = true;
        }
        if product.manage_stock != item.is_stock_item {
            product.manage_stock = item.is_stock_item;
            dirty = true;
        }
        if server.field_map.apply_to_remote(item, &mut product) {
            dirty = true;
        }

        if dirty {
            let updated = catalog.update_product(&product).await?;
            debug!("[ItemReconciler] updated product {} on {}", updated.id, pair.server);
            pair.remote = Some(updated);
        } else {
            debug!("[ItemReconciler] product {} already up to date", product.id);
        }
        Ok(())
    }

    async fn reconcile_images(
        &self,
        item: &Item,
        product: &Product,
        primary: &str,
        server: &ServerConfig,
        catalog: &Arc<dyn RemoteCatalog>,
    ) -> Result<super::images::ImageReconciliation> {
        let attachments = self.ctx().store.item_attachments(&item.code).await?;
        let media = CachedMediaLookup {
            ctx: self.ctx(),
            server: &server.id,
            catalog: catalog.as_ref(),
        };
        let mut reconciler = ImageReconciler::new(server.site_domain.as_deref());
        if server.media_enabled() {
            reconciler = reconciler.with_media(&media);
        }
        reconciler
            .reconcile(&product.images, &attachments, Some(primary))
            .await
    }
}

fn attribute_slug(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

fn attribute_value(option: &str) -> ItemAttributeValue {
    ItemAttributeValue {
        value: option.to_string(),
        abbr: option.replace(' ', ""),
    }
}

/// Media library search through the context's read-through cache.
struct CachedMediaLookup<'a> {
    ctx: &'a SyncContext,
    server: &'a ServerId,
    catalog: &'a dyn RemoteCatalog,
}

#[async_trait]
impl MediaLookup for CachedMediaLookup<'_> {
    async fn find_media(&self, file_name: &str) -> Result<Option<MediaAsset>> {
        self.ctx
            .media_index
            .get_or_try_load((self.server.clone(), file_name.to_string()), || {
                self.catalog.search_media(file_name)
            })
            .await
    }
}

#[async_trait]
impl Reconciler for ItemReconciler<'_> {
    type Target = ItemTarget;
    type Pair = ItemPair;

    fn lock_key(&self, target: &ItemTarget) -> EntityKey {
        target.key()
    }

    async fn canonical_key(&self, target: &ItemTarget) -> Result<EntityKey> {
        let ItemTarget::Local { code, server } = target else {
            return Ok(target.key());
        };
        let linked = self
            .ctx()
            .store
            .get_item(code)
            .await?
            .and_then(|item| item.ref_for(server).and_then(|r| r.remote_id))
            .filter(|id| !id.is_unassigned());
        Ok(match linked {
            Some(id) => EntityKey::Product {
                server: server.clone(),
                id,
            },
            None => target.key(),
        })
    }

    async fn pair(&self, target: &ItemTarget) -> Result<ItemPair> {
        let resolver = PairingResolver::new(self.ctx());
        match target {
            ItemTarget::Local { code, server } => resolver.item_from_local(code, server).await,
            ItemTarget::Remote { server, id } => resolver.item_from_remote(server, *id).await,
        }
    }

    fn aliases(&self, pair: &ItemPair) -> Vec<EntityKey> {
        let mut keys = Vec::with_capacity(2);
        if let Some(item) = &pair.local {
            keys.push(EntityKey::Item {
                code: item.code.clone(),
            });
        }
        let remote_id = pair
            .remote
            .as_ref()
            .map(|p| p.id)
            .or_else(|| pair.link().and_then(|l| l.remote_id));
        if let Some(id) = remote_id.filter(|id| !id.is_unassigned()) {
            keys.push(EntityKey::Product {
                server: pair.server.clone(),
                id,
            });
        }
        keys
    }

    fn decide(&self, pair: &ItemPair) -> Result<Decision> {
        Ok(decide(&pair.state()?))
    }

    async fn apply(
        &self,
        pair: &mut ItemPair,
        action: Action,
        trail: &DependencyTrail,
    ) -> Result<()> {
        match action {
            Action::CreateRemote => self.create_remote(pair, trail).await,
            Action::CreateLocal => self.create_local(pair, trail).await,
            Action::UpdateLocal => self.update_local(pair).await,
            Action::UpdateRemote => self.update_remote(pair).await,
            Action::NoOp => Ok(()),
        }
    }

    async fn commit(&self, pair: &ItemPair) -> Result<()> {
        let (Some(item), Some(product)) = (&pair.local, &pair.remote) else {
            return Err(SyncError::reconciliation("Cannot commit a half-empty item pair"));
        };
        let marker = product
            .date_modified
            .ok_or_else(|| missing_marker(&format!("product {}", product.id)))?;

        let link = LinkedRemoteRef {
            server: pair.server.clone(),
            remote_id: Some(product.id),
            last_sync_marker: Some(marker),
            enabled: true,
        };
        self.ctx().store.update_item_ref(&item.code, link).await?;
        debug!(
            "[ItemReconciler] committed {} ↔ {} at {}",
            item.code, product.id, marker
        );
        Ok(())
    }
}
