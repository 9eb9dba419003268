use ledgerbridge_api::{Order, Product, ServerId, SyncError};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::traits::{ListQuery, RemoteCatalog};
use crate::Result;

/// Remote catalogs keyed by server identity.
#[derive(Clone, Default)]
pub struct RemoteRegistry {
    catalogs: BTreeMap<ServerId, Arc<dyn RemoteCatalog>>,
}

impl RemoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, catalog: Arc<dyn RemoteCatalog>) {
        self.catalogs.insert(catalog.server().clone(), catalog);
    }

    pub fn with(mut self, catalog: Arc<dyn RemoteCatalog>) -> Self {
        self.register(catalog);
        self
    }

    pub fn get(&self, server: &ServerId) -> Result<Arc<dyn RemoteCatalog>> {
        self.catalogs.get(server).cloned().ok_or_else(|| {
            SyncError::config(format!("No remote catalog registered for server {}", server))
        })
    }

    pub fn servers(&self) -> impl Iterator<Item = &ServerId> {
        self.catalogs.keys()
    }
}

/// Fetches pages strictly in sequence until a page comes back shorter than
/// the page size.
pub async fn fetch_all<T, F, Fut>(query: ListQuery, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(ListQuery) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let per_page = query.per_page.max(1) as usize;
    let mut page = query.page.max(1);
    let mut all = Vec::new();

    loop {
        let batch = fetch(query.page(page)).await?;
        let len = batch.len();
        all.extend(batch);
        debug!("[RemoteRegistry] page {} returned {} records", page, len);
        if len < per_page {
            break;
        }
        page += 1;
    }

    Ok(all)
}

pub async fn all_products(catalog: &dyn RemoteCatalog, query: ListQuery) -> Result<Vec<Product>> {
    fetch_all(query, |q| async move { catalog.list_products(&q).await }).await
}

pub async fn all_orders(catalog: &dyn RemoteCatalog, query: ListQuery) -> Result<Vec<Order>> {
    fetch_all(query, |q| async move { catalog.list_orders(&q).await }).await
}

/// Looks a product up by id. `None` when the remote has no such record.
pub async fn product_by_id(
    catalog: &dyn RemoteCatalog,
    id: ledgerbridge_api::RemoteId,
) -> Result<Option<Product>> {
    Ok(catalog
        .list_products(&ListQuery::by_id(id))
        .await?
        .into_iter()
        .find(|p| p.id == id))
}

pub async fn order_by_id(
    catalog: &dyn RemoteCatalog,
    id: ledgerbridge_api::RemoteId,
) -> Result<Option<Order>> {
    Ok(catalog
        .list_orders(&ListQuery::by_id(id))
        .await?
        .into_iter()
        .find(|o| o.id == id))
}
