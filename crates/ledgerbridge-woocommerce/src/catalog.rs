use async_trait::async_trait;
use ledgerbridge::core::RemoteRegistry;
use ledgerbridge::{ListQuery, RemoteCatalog, Result, ServerConfig, SyncConfig};
use ledgerbridge_api::{MediaAsset, Order, Product, ProductType, ServerId, SyncError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::client::RestClient;
use crate::media::WordpressMedia;
use crate::models::{WcOrder, WcOrderWrite, WcProduct, WcProductWrite, format_gmt};

const WOOCOMMERCE_NAMESPACE: &str = "wc/v3";
const WORDPRESS_NAMESPACE: &str = "wp/v2";

/// [`RemoteCatalog`] over the WooCommerce REST API of one shop.
pub struct WooCommerceCatalog {
    server: ServerId,
    api: RestClient,
    media: Option<WordpressMedia>,
}

impl WooCommerceCatalog {
    pub fn new(config: &ServerConfig, timeout: Duration) -> Result<Self> {
        let api = RestClient::new(
            &config.url,
            WOOCOMMERCE_NAMESPACE,
            &config.consumer_key,
            &config.consumer_secret,
            timeout,
        )?;
        let media = match &config.wordpress {
            Some(wp) if wp.enabled => Some(WordpressMedia::new(RestClient::new(
                &config.url,
                WORDPRESS_NAMESPACE,
                &wp.user,
                &wp.application_password,
                timeout,
            )?)),
            _ => None,
        };
        Ok(Self {
            server: config.id.clone(),
            api,
            media,
        })
    }

    /// One catalog per enabled server.
    pub fn registry(config: &SyncConfig) -> Result<RemoteRegistry> {
        let timeout = Duration::from_secs(config.settings.request_timeout_secs);
        let mut registry = RemoteRegistry::new();
        for server in config.enabled_servers() {
            info!(
                "[WooCommerceCatalog] registering {} ({})",
                server.id, server.url
            );
            registry.register(Arc::new(Self::new(server, timeout)?));
        }
        Ok(registry)
    }

    fn media(&self) -> Result<&WordpressMedia> {
        self.media.as_ref().ok_or_else(|| {
            SyncError::config(format!(
                "No WordPress credentials configured for {}",
                self.server
            ))
        })
    }
}

/// Query string for a list call. Timestamps are sent as GMT.
pub fn list_params(query: &ListQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("page", query.page.to_string()),
        ("per_page", query.per_page.to_string()),
        ("orderby", "id".to_string()),
        ("order", "asc".to_string()),
    ];
    if query.modified_after.is_some() || query.created_after.is_some() {
        params.push(("dates_are_gmt", "true".to_string()));
    }
    if let Some(at) = query.modified_after {
        params.push(("modified_after", format_gmt(at)));
    }
    if let Some(at) = query.created_after {
        params.push(("after", format_gmt(at)));
    }
    if let Some(status) = &query.status {
        params.push(("status", status.clone()));
    }
    params
}

fn product_path(product: &Product) -> Result<String> {
    let id = (!product.id.is_unassigned()).then_some(product.id);
    match (product.kind, product.parent_id) {
        (ProductType::Variation, Some(parent)) => Ok(match id {
            Some(id) => format!("products/{}/variations/{}", parent, id),
            None => format!("products/{}/variations", parent),
        }),
        (ProductType::Variation, None) => Err(SyncError::invalid(format!(
            "Variation {} has no parent product",
            product.name
        ))),
        _ => Ok(match id {
            Some(id) => format!("products/{}", id),
            None => "products".to_string(),
        }),
    }
}

#[async_trait]
impl RemoteCatalog for WooCommerceCatalog {
    fn server(&self) -> &ServerId {
        &self.server
    }

    async fn list_products(&self, query: &ListQuery) -> Result<Vec<Product>> {
        // `products/<id>` also resolves variations, which a filtered list omits.
        let wire: Vec<WcProduct> = match query.include {
            Some(id) => self
                .api
                .get::<WcProduct>(&format!("products/{}", id), &[])
                .await?
                .into_iter()
                .collect(),
            None => self
                .api
                .get("products", &list_params(query))
                .await?
                .unwrap_or_default(),
        };
        debug!(
            "[WooCommerceCatalog] {} products from {} (page {})",
            wire.len(),
            self.server,
            query.page
        );
        Ok(wire
            .into_iter()
            .map(|p| p.into_product(&self.server))
            .collect())
    }

    async fn create_product(&self, product: &Product) -> Result<Product> {
        let path = product_path(product)?;
        let created: WcProduct = self
            .api
            .post(&path, &WcProductWrite::from(product))
            .await?;
        Ok(created.into_product(&self.server))
    }

    async fn update_product(&self, product: &Product) -> Result<Product> {
        if product.id.is_unassigned() {
            return Err(SyncError::invalid("Cannot update a product without an id"));
        }
        let path = product_path(product)?;
        let updated: WcProduct = self
            .api
            .put(&path, &WcProductWrite::from(product))
            .await?;
        Ok(updated.into_product(&self.server))
    }

    async fn list_orders(&self, query: &ListQuery) -> Result<Vec<Order>> {
        let wire: Vec<WcOrder> = match query.include {
            Some(id) => self
                .api
                .get::<WcOrder>(&format!("orders/{}", id), &[])
                .await?
                .into_iter()
                .collect(),
            None => self
                .api
                .get("orders", &list_params(query))
                .await?
                .unwrap_or_default(),
        };
        debug!(
            "[WooCommerceCatalog] {} orders from {} (page {})",
            wire.len(),
            self.server,
            query.page
        );
        Ok(wire
            .into_iter()
            .map(|o| o.into_order(&self.server))
            .collect())
    }

    async fn create_order(&self, order: &Order) -> Result<Order> {
        let created: WcOrder = self.api.post("orders", &WcOrderWrite::from(order)).await?;
        Ok(created.into_order(&self.server))
    }

    async fn update_order(&self, order: &Order) -> Result<Order> {
        if order.id.is_unassigned() {
            return Err(SyncError::invalid("Cannot update an order without an id"));
        }
        let updated: WcOrder = self
            .api
            .put(&format!("orders/{}", order.id), &WcOrderWrite::from(order))
            .await?;
        Ok(updated.into_order(&self.server))
    }

    async fn search_media(&self, file_name: &str) -> Result<Option<MediaAsset>> {
        self.media()?.search(file_name).await
    }

    async fn upload_media(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<MediaAsset> {
        self.media()?.upload(file_name, content_type, bytes).await
    }

    async fn delete_media(&self, id: u64) -> Result<()> {
        self.media()?.delete(id).await
    }
}
