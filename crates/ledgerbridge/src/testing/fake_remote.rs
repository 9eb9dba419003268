//! In-memory remote catalog.
//!
//! Behaves like the remote platform as far as the engine can observe:
//! ids are assigned on create, every write moves `date_modified` forward,
//! list calls honor filters and pagination, trashed orders only show up when
//! asked for by status. Writes are counted and failures can be injected.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ledgerbridge_api::{MediaAsset, Order, Product, RemoteId, ServerId, SyncError};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::Result;
use crate::core::traits::{ListQuery, RemoteCatalog};

const TRASH: &str = "trash";

#[derive(Default)]
struct FakeState {
    products: BTreeMap<RemoteId, Product>,
    orders: BTreeMap<RemoteId, Order>,
    media: BTreeMap<u64, MediaAsset>,
    next_id: u64,
    next_media_id: u64,
    last_tick: Option<DateTime<Utc>>,
}

impl FakeState {
    fn next_id(&mut self) -> RemoteId {
        self.next_id += 1;
        RemoteId(self.next_id)
    }

    /// Wall clock, forced strictly forward.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last_tick {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_tick = Some(next);
        next
    }

    fn assign_image_ids(&mut self, product: &mut Product) {
        for image in product.images.iter_mut().filter(|i| i.id.is_none()) {
            self.next_media_id += 1;
            image.id = Some(self.next_media_id);
        }
    }
}

pub struct FakeRemoteCatalog {
    server: ServerId,
    state: Mutex<FakeState>,
    writes: AtomicU64,
    failures: AtomicUsize,
}

impl FakeRemoteCatalog {
    pub fn new(server: impl Into<ServerId>) -> Self {
        Self {
            server: server.into(),
            state: Mutex::new(FakeState {
                next_id: 100,
                next_media_id: 5000,
                ..Default::default()
            }),
            writes: AtomicU64::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The next `count` calls fail with `RemoteUnavailable`.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    fn check_available(&self, call: &str) -> Result<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SyncError::remote(format!(
                "{} on {}: injected failure",
                call, self.server
            )));
        }
        Ok(())
    }

    /// Create/update/delete calls served since construction (seeding excluded).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn count_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    /// Adds a product as if someone created it on the remote side.
    pub fn seed_product(&self, mut product: Product) -> Product {
        let mut state = self.state();
        if product.id.is_unassigned() {
            product.id = state.next_id();
        }
        let now = state.tick();
        product.server = self.server.clone();
        product.date_created.get_or_insert(now);
        product.date_modified = Some(now);
        state.assign_image_ids(&mut product);
        state.products.insert(product.id, product.clone());
        product
    }

    pub fn seed_order(&self, mut order: Order) -> Order {
        let mut state = self.state();
        if order.id.is_unassigned() {
            order.id = state.next_id();
        }
        let now = state.tick();
        order.server = self.server.clone();
        order.date_created.get_or_insert(now);
        order.date_modified = Some(now);
        state.orders.insert(order.id, order.clone());
        order
    }

    pub fn seed_media(&self, title: &str, source_url: &str) -> MediaAsset {
        let mut state = self.state();
        state.next_media_id += 1;
        let asset = MediaAsset {
            id: state.next_media_id,
            source_url: source_url.to_string(),
            title: Some(title.to_string()),
        };
        state.media.insert(asset.id, asset.clone());
        asset
    }

    /// Edits a product out of band; `date_modified` moves forward.
    pub fn edit_product(&self, id: RemoteId, edit: impl FnOnce(&mut Product)) -> Option<Product> {
        let mut state = self.state();
        let now = state.tick();
        let product = state.products.get_mut(&id)?;
        edit(product);
        product.date_modified = Some(now);
        Some(product.clone())
    }

    pub fn edit_order(&self, id: RemoteId, edit: impl FnOnce(&mut Order)) -> Option<Order> {
        let mut state = self.state();
        let now = state.tick();
        let order = state.orders.get_mut(&id)?;
        edit(order);
        order.date_modified = Some(now);
        Some(order.clone())
    }

    /// Deletes a product out of band.
    pub fn remove_product(&self, id: RemoteId) -> Option<Product> {
        self.state().products.remove(&id)
    }

    pub fn product(&self, id: RemoteId) -> Option<Product> {
        self.state().products.get(&id).cloned()
    }

    pub fn products(&self) -> Vec<Product> {
        self.state().products.values().cloned().collect()
    }

    pub fn order(&self, id: RemoteId) -> Option<Order> {
        self.state().orders.get(&id).cloned()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.state().orders.values().cloned().collect()
    }

    pub fn media(&self) -> Vec<MediaAsset> {
        self.state().media.values().cloned().collect()
    }
}

fn matches_status(status: Option<&str>, query: &ListQuery) -> bool {
    match (&query.status, status) {
        (Some(wanted), Some(have)) => wanted == have,
        (Some(_), None) => false,
        (None, Some(have)) => have != TRASH,
        (None, None) => true,
    }
}

fn matches_common(
    id: RemoteId,
    created: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
    query: &ListQuery,
) -> bool {
    query.include.map(|wanted| wanted == id).unwrap_or(true)
        && query
            .modified_after
            .map(|after| modified.map(|m| m > after).unwrap_or(false))
            .unwrap_or(true)
        && query
            .created_after
            .map(|after| created.map(|c| c > after).unwrap_or(false))
            .unwrap_or(true)
}

fn page<T: Clone>(records: Vec<&T>, query: &ListQuery) -> Vec<T> {
    let per_page = query.per_page.max(1) as usize;
    let skip = (query.page.max(1) as usize - 1) * per_page;
    records
        .into_iter()
        .skip(skip)
        .take(per_page)
        .cloned()
        .collect()
}

#[async_trait]
impl RemoteCatalog for FakeRemoteCatalog {
    fn server(&self) -> &ServerId {
        &self.server
    }

    async fn list_products(&self, query: &ListQuery) -> Result<Vec<Product>> {
        self.check_available("list_products")?;
        let state = self.state();
        let matching: Vec<&Product> = state
            .products
            .values()
            .filter(|p| matches_common(p.id, p.date_created, p.date_modified, query))
            .filter(|p| matches_status(p.status.as_deref(), query))
            .collect();
        Ok(page(matching, query))
    }

    async fn create_product(&self, product: &Product) -> Result<Product> {
        self.check_available("create_product")?;
        let mut state = self.state();
        let mut created = product.clone();
        created.id = state.next_id();
        created.server = self.server.clone();
        let now = state.tick();
        created.date_created = Some(now);
        created.date_modified = Some(now);
        state.assign_image_ids(&mut created);
        state.products.insert(created.id, created.clone());
        self.count_write();
        Ok(created)
    }

    async fn update_product(&self, product: &Product) -> Result<Product> {
        self.check_available("update_product")?;
        let mut state = self.state();
        let now = state.tick();
        let created = state
            .products
            .get(&product.id)
            .map(|p| p.date_created)
            .ok_or_else(|| SyncError::remote(format!("product {} does not exist", product.id)))?;
        let mut updated = product.clone();
        updated.date_created = created;
        updated.date_modified = Some(now);
        state.assign_image_ids(&mut updated);
        state.products.insert(updated.id, updated.clone());
        self.count_write();
        Ok(updated)
    }

    async fn list_orders(&self, query: &ListQuery) -> Result<Vec<Order>> {
        self.check_available("list_orders")?;
        let state = self.state();
        let matching: Vec<&Order> = state
            .orders
            .values()
            .filter(|o| matches_common(o.id, o.date_created, o.date_modified, query))
            .filter(|o| matches_status(Some(&o.status), query))
            .collect();
        Ok(page(matching, query))
    }

    async fn create_order(&self, order: &Order) -> Result<Order> {
        self.check_available("create_order")?;
        let mut state = self.state();
        let mut created = order.clone();
        created.id = state.next_id();
        created.server = self.server.clone();
        let now = state.tick();
        created.date_created = Some(now);
        created.date_modified = Some(now);
        for line in created.line_items.iter_mut() {
            let id = state.next_id();
            line.id = Some(id);
        }
        state.orders.insert(created.id, created.clone());
        self.count_write();
        Ok(created)
    }

    async fn update_order(&self, order: &Order) -> Result<Order> {
        self.check_available("update_order")?;
        let mut state = self.state();
        let now = state.tick();
        let existing = state
            .orders
            .get(&order.id)
            .cloned()
            .ok_or_else(|| SyncError::remote(format!("order {} does not exist", order.id)))?;

        let mut updated = order.clone();
        updated.date_created = existing.date_created;
        updated.date_modified = Some(now);
        // A line with an id and no product removes that line; new lines get ids.
        let mut lines = Vec::with_capacity(updated.line_items.len());
        for mut line in std::mem::take(&mut updated.line_items) {
            match (line.id, line.product_id) {
                (Some(_), None) => continue,
                (None, _) => {
                    line.id = Some(state.next_id());
                    lines.push(line);
                }
                (Some(_), Some(_)) => lines.push(line),
            }
        }
        updated.line_items = lines;
        state.orders.insert(updated.id, updated.clone());
        self.count_write();
        Ok(updated)
    }

    async fn search_media(&self, file_name: &str) -> Result<Option<MediaAsset>> {
        self.check_available("search_media")?;
        Ok(self
            .state()
            .media
            .values()
            .find(|m| m.title.as_deref() == Some(file_name))
            .cloned())
    }

    async fn upload_media(
        &self,
        file_name: &str,
        _content_type: &str,
        _bytes: Vec<u8>,
    ) -> Result<MediaAsset> {
        self.check_available("upload_media")?;
        let mut state = self.state();
        state.next_media_id += 1;
        let asset = MediaAsset {
            id: state.next_media_id,
            source_url: format!("https://{}/wp-content/uploads/{}", self.server, file_name),
            title: Some(file_name.to_string()),
        };
        state.media.insert(asset.id, asset.clone());
        self.count_write();
        Ok(asset)
    }

    async fn delete_media(&self, id: u64) -> Result<()> {
        self.check_available("delete_media")?;
        self.state()
            .media
            .remove(&id)
            .ok_or_else(|| SyncError::remote(format!("media {} does not exist", id)))?;
        self.count_write();
        Ok(())
    }
}
