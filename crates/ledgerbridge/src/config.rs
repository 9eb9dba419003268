//! Sync configuration loaded from YAML.
//!
//! Everything the engine needs to know about a remote server lives in one
//! [`ServerConfig`]. Mapping tables (field maps, status map, tax map) are
//! validated once at load so a bad entry fails startup instead of a cycle.

use chrono::{DateTime, Utc};
use ledgerbridge_api::{ServerId, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::Result;
use crate::field_map::{FieldMappingSpec, ResolvedFieldMap};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub settings: SyncSettings,
    pub servers: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Orders created before this instant are never pulled.
    pub minimum_creation_date: Option<DateTime<Utc>>,
    pub cache_ttl_secs: u64,
    /// Maximum characters of each entity snapshot written to failure logs.
    pub snapshot_log_limit: usize,
    pub request_timeout_secs: u64,
    pub page_size: u32,
    pub sweep_concurrency: usize,
    pub queue_concurrency: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            minimum_creation_date: None,
            cache_ttl_secs: 300,
            snapshot_log_limit: 1000,
            request_timeout_secs: 40,
            page_size: 100,
            sweep_concurrency: 4,
            queue_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordpressConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub user: String,
    pub application_password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ItemNaming {
    #[default]
    #[serde(rename = "remote_id", alias = "WooCommerce ID")]
    RemoteId,
    #[serde(rename = "sku", alias = "Product SKU")]
    Sku,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemOptions {
    pub default_product_status: Option<String>,
    pub name_by: ItemNaming,
    pub uom: Option<String>,
    pub item_group: Option<String>,
    pub enable_price_list_sync: bool,
    pub price_list: Option<String>,
}

impl ItemOptions {
    pub fn product_status(&self) -> &str {
        self.default_product_status.as_deref().unwrap_or("draft")
    }

    pub fn stock_uom(&self) -> &str {
        self.uom.as_deref().unwrap_or("Nos")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMapping {
    pub local: String,
    pub remote: String,
}

fn default_status_map() -> Vec<StatusMapping> {
    [
        ("Pending Payment", "pending"),
        ("On hold", "on-hold"),
        ("Failed", "failed"),
        ("Cancelled", "cancelled"),
        ("Processing", "processing"),
        ("Refunded", "refunded"),
        ("Shipped", "completed"),
        ("Ready for Pickup", "ready-pickup"),
        ("Picked up", "pickup"),
        ("Delivered", "delivered"),
        ("Processing LP", "processing-lp"),
        ("Draft", "checkout-draft"),
        ("Quote Sent", "gplsquote-req"),
        ("Trash", "trash"),
        ("Partially Shipped", "partial-shipped"),
    ]
    .into_iter()
    .map(|(local, remote)| StatusMapping {
        local: local.to_string(),
        remote: remote.to_string(),
    })
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxMapping {
    #[serde(default)]
    pub remote_tax_id: Option<u64>,
    #[serde(default)]
    pub tax_name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub rate: Option<f64>,
    pub account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingRuleMapping {
    pub shipping_rule: String,
    #[serde(default)]
    pub method_title: Option<String>,
    #[serde(default)]
    pub method_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AddressTitleConvention {
    #[serde(rename = "customer_name_only", alias = "Customer Name only")]
    CustomerNameOnly,
    #[default]
    #[serde(rename = "customer_name_and_type")]
    CustomerNameAndType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderOptions {
    pub company: Option<String>,
    pub warehouse: Option<String>,
    pub delivery_after_days: Option<i64>,
    pub submit_sales_orders: bool,
    pub sync_line_items_to_remote: bool,
    pub use_actual_tax_type: bool,
    pub sales_taxes_and_charges_template: Option<String>,
    pub tax_account: Option<String>,
    pub freight_account: Option<String>,
    pub rounding_account: Option<String>,
    pub enable_shipping_methods_sync: bool,
    pub shipping_rule_map: Vec<ShippingRuleMapping>,
    pub tax_map: Vec<TaxMapping>,
    pub status_map: Vec<StatusMapping>,
    pub address_title_convention: AddressTitleConvention,
    pub placeholder_item: String,
    pub default_currency: Option<String>,
}

impl Default for OrderOptions {
    fn default() -> Self {
        Self {
            company: None,
            warehouse: None,
            delivery_after_days: None,
            submit_sales_orders: false,
            sync_line_items_to_remote: false,
            use_actual_tax_type: true,
            sales_taxes_and_charges_template: None,
            tax_account: None,
            freight_account: None,
            rounding_account: None,
            enable_shipping_methods_sync: false,
            shipping_rule_map: Vec::new(),
            tax_map: Vec::new(),
            status_map: default_status_map(),
            address_title_convention: AddressTitleConvention::default(),
            placeholder_item: "DELETED_WOOCOMMERCE_PRODUCT".to_string(),
            default_currency: None,
        }
    }
}

impl OrderOptions {
    pub fn delivery_days(&self) -> i64 {
        self.delivery_after_days.unwrap_or(7)
    }

    pub fn status_to_local(&self, remote: &str) -> Option<&str> {
        self.status_map
            .iter()
            .find(|m| m.remote == remote)
            .map(|m| m.local.as_str())
    }

    pub fn status_to_remote(&self, local: &str) -> Option<&str> {
        self.status_map
            .iter()
            .find(|m| m.local == local)
            .map(|m| m.remote.as_str())
    }

    /// Shipping rule for a remote shipping line: title match first, then method id.
    pub fn shipping_rule_for(&self, method_title: &str, method_id: &str) -> Option<&str> {
        self.shipping_rule_map
            .iter()
            .find(|m| m.method_title.as_deref() == Some(method_title))
            .or_else(|| {
                self.shipping_rule_map
                    .iter()
                    .find(|m| m.method_id.as_deref() == Some(method_id))
            })
            .map(|m| m.shipping_rule.as_str())
    }
}

/// Meta keys a payment processor stores on the remote order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorMeta {
    #[serde(default)]
    pub fee_key: Option<String>,
    #[serde(default)]
    pub net_key: Option<String>,
    #[serde(default)]
    pub captured_key: Option<String>,
    #[serde(default = "default_captured_value")]
    pub captured_value: String,
}

fn default_captured_value() -> String {
    "yes".to_string()
}

fn default_processors() -> BTreeMap<String, ProcessorMeta> {
    let mut processors = BTreeMap::new();
    processors.insert(
        "stripe".to_string(),
        ProcessorMeta {
            fee_key: Some("_stripe_fee".to_string()),
            net_key: Some("_stripe_net".to_string()),
            captured_key: Some("_stripe_charge_captured".to_string()),
            captured_value: default_captured_value(),
        },
    );
    processors
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentOptions {
    pub enable_payments_sync: bool,
    pub ignore_date_paid: bool,
    pub auto_create_invoice: bool,
    pub cost_center: Option<String>,
    /// Payment method id → bank account paid from.
    pub bank_accounts: BTreeMap<String, String>,
    /// Payment method id → GL account paid to.
    pub gl_accounts: BTreeMap<String, String>,
    /// Payment method id → processor fee expense account.
    pub fee_accounts: BTreeMap<String, String>,
    pub processors: BTreeMap<String, ProcessorMeta>,
    /// Order meta keys tried, in order, for a transaction reference.
    pub reference_meta_keys: Vec<String>,
}

impl Default for PaymentOptions {
    fn default() -> Self {
        Self {
            enable_payments_sync: false,
            ignore_date_paid: false,
            auto_create_invoice: false,
            cost_center: None,
            bank_accounts: BTreeMap::new(),
            gl_accounts: BTreeMap::new(),
            fee_accounts: BTreeMap::new(),
            processors: default_processors(),
            reference_meta_keys: vec!["yoco_order_payment_id".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Defaults to the URL's host.
    #[serde(default)]
    pub id: ServerId,
    pub url: String,
    #[serde(default)]
    pub consumer_key: String,
    #[serde(default)]
    pub consumer_secret: String,
    #[serde(default = "default_true")]
    pub enable_sync: bool,
    #[serde(default)]
    pub wordpress: Option<WordpressConfig>,
    /// Public host of the local file server, for site-relative attachment URLs.
    #[serde(default)]
    pub site_domain: Option<String>,
    #[serde(default)]
    pub items: ItemOptions,
    #[serde(default)]
    pub orders: OrderOptions,
    #[serde(default)]
    pub payments: PaymentOptions,
    #[serde(default)]
    pub item_field_map: Vec<FieldMappingSpec>,
    #[serde(default)]
    pub local_custom_fields: Vec<String>,
    #[serde(skip)]
    pub field_map: ResolvedFieldMap,
}

fn default_true() -> bool {
    true
}

impl ServerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: ServerId::new(host_of(&url).unwrap_or_default()),
            url,
            consumer_key: String::new(),
            consumer_secret: String::new(),
            enable_sync: true,
            wordpress: None,
            site_domain: None,
            items: ItemOptions::default(),
            orders: OrderOptions::default(),
            payments: PaymentOptions::default(),
            item_field_map: Vec::new(),
            local_custom_fields: Vec::new(),
            field_map: ResolvedFieldMap::default(),
        }
    }

    pub fn media_enabled(&self) -> bool {
        self.wordpress.as_ref().map(|wp| wp.enabled).unwrap_or(false)
    }

    fn validate(&mut self) -> Result<()> {
        if !(self.url.starts_with("https://") || self.url.starts_with("http://")) {
            return Err(SyncError::config(format!(
                "Server URL must be http(s): '{}'",
                self.url
            )));
        }
        if self.id.as_str().is_empty() {
            let host = host_of(&self.url).ok_or_else(|| {
                SyncError::config(format!("Cannot derive server id from URL '{}'", self.url))
            })?;
            self.id = ServerId::new(host);
        }

        self.consumer_key = expand_env(&self.consumer_key)?;
        self.consumer_secret = expand_env(&self.consumer_secret)?;
        if let Some(wp) = self.wordpress.as_mut() {
            wp.application_password = expand_env(&wp.application_password)?;
        }

        let mut locals = HashSet::new();
        let mut remotes = HashSet::new();
        for mapping in &self.orders.status_map {
            if !locals.insert(mapping.local.as_str()) {
                return Err(SyncError::config(format!(
                    "Server {}: local status '{}' is mapped more than once",
                    self.id, mapping.local
                )));
            }
            if !remotes.insert(mapping.remote.as_str()) {
                return Err(SyncError::config(format!(
                    "Server {}: remote status '{}' is mapped more than once",
                    self.id, mapping.remote
                )));
            }
        }

        for tax in &self.orders.tax_map {
            if tax.rate.map(|r| r < 0.0).unwrap_or(false) {
                return Err(SyncError::config(format!(
                    "Server {}: tax rate for account '{}' must not be negative",
                    self.id, tax.account
                )));
            }
        }

        if self.items.enable_price_list_sync && self.items.price_list.is_none() {
            return Err(SyncError::config(format!(
                "Server {}: price list sync is enabled but no price list is set",
                self.id
            )));
        }

        self.field_map = ResolvedFieldMap::resolve(&self.item_field_map, &self.local_custom_fields)
            .map_err(|e| SyncError::config(format!("Server {}: {}", self.id, e)))?;
        Ok(())
    }
}

impl SyncConfig {
    pub fn new(servers: Vec<ServerConfig>) -> Result<Self> {
        let mut config = Self {
            settings: SyncSettings::default(),
            servers,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let mut config: SyncConfig = serde_yaml::from_str(content)
            .map_err(|e| SyncError::config(format!("Failed to parse config YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&mut self) -> Result<()> {
        let mut seen = HashSet::new();
        for server in &mut self.servers {
            server.validate()?;
            if !seen.insert(server.id.clone()) {
                return Err(SyncError::config(format!(
                    "Server id '{}' is configured more than once",
                    server.id
                )));
            }
        }
        Ok(())
    }

    pub fn server(&self, id: &ServerId) -> Result<&ServerConfig> {
        self.servers
            .iter()
            .find(|s| &s.id == id)
            .ok_or_else(|| SyncError::config(format!("Unknown server '{}'", id)))
    }

    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|s| s.enable_sync)
    }
}

/// Host (with port) of an http(s) URL.
pub fn host_of(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    (!host.is_empty()).then(|| host.to_string())
}

/// Replaces a whole-value `${VAR}` reference with the environment variable.
fn expand_env(value: &str) -> Result<String> {
    match value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(var) => std::env::var(var).map_err(|_| {
            SyncError::config(format!("Environment variable '{}' is not set", var))
        }),
        None => Ok(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
settings:
  cache_ttl_secs: 60
servers:
  - url: https://shop.example.com/
    consumer_key: ck_test
    consumer_secret: cs_test
    items:
      name_by: Product SKU
      item_group: Products
    orders:
      warehouse: Stores
      tax_map:
        - remote_tax_id: 1
          account: VAT
      shipping_rule_map:
        - shipping_rule: Express
          method_title: Express Delivery
        - shipping_rule: Flat
          method_id: flat_rate
    payments:
      enable_payments_sync: true
      bank_accounts:
        stripe: Stripe Clearing
    item_field_map:
      - local_field: "description | Description"
        remote_field: short_description
"#;

    #[test]
    fn test_load_yaml_with_defaults() {
        let config = SyncConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(config.settings.cache_ttl_secs, 60);
        assert_eq!(config.settings.snapshot_log_limit, 1000);

        let server = &config.servers[0];
        assert_eq!(server.id.as_str(), "shop.example.com");
        assert!(server.enable_sync);
        assert_eq!(server.items.name_by, ItemNaming::Sku);
        assert_eq!(server.items.product_status(), "draft");
        assert_eq!(server.items.stock_uom(), "Nos");
        assert_eq!(server.orders.delivery_days(), 7);
        assert!(server.orders.use_actual_tax_type);
        assert_eq!(server.orders.status_to_local("completed"), Some("Shipped"));
        assert_eq!(server.orders.status_to_remote("On hold"), Some("on-hold"));
        assert!(server.payments.processors.contains_key("stripe"));
        assert_eq!(server.field_map.len(), 1);
    }

    #[test]
    fn test_shipping_rule_prefers_title() {
        let config = SyncConfig::from_yaml_str(YAML).unwrap();
        let orders = &config.servers[0].orders;
        assert_eq!(
            orders.shipping_rule_for("Express Delivery", "flat_rate"),
            Some("Express")
        );
        assert_eq!(orders.shipping_rule_for("Other", "flat_rate"), Some("Flat"));
        assert_eq!(orders.shipping_rule_for("Other", "local_pickup"), None);
    }

    #[test]
    fn test_duplicate_status_mapping_is_rejected() {
        let mut server = ServerConfig::new("https://shop.example.com");
        server.orders.status_map.push(StatusMapping {
            local: "Shipped Again".into(),
            remote: "completed".into(),
        });
        let err = SyncConfig::new(vec![server]).unwrap_err();
        assert!(err.to_string().contains("completed"));
    }

    #[test]
    fn test_negative_tax_rate_is_rejected() {
        let mut server = ServerConfig::new("https://shop.example.com");
        server.orders.tax_map.push(TaxMapping {
            remote_tax_id: Some(1),
            tax_name: None,
            country: None,
            rate: Some(-1.0),
            account: "VAT".into(),
        });
        assert!(SyncConfig::new(vec![server]).is_err());
    }

    #[test]
    fn test_unknown_field_mapping_is_rejected() {
        let mut server = ServerConfig::new("https://shop.example.com");
        server.item_field_map.push(FieldMappingSpec {
            local_field: "not_a_field".into(),
            remote_field: "name".into(),
        });
        assert!(matches!(
            SyncConfig::new(vec![server]),
            Err(SyncError::Config { .. })
        ));
    }

    #[test]
    fn test_duplicate_server_ids_are_rejected() {
        let a = ServerConfig::new("https://shop.example.com");
        let b = ServerConfig::new("https://shop.example.com/other");
        assert!(SyncConfig::new(vec![a, b]).is_err());
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://a.example.com/x").as_deref(), Some("a.example.com"));
        assert_eq!(host_of("http://localhost:8080").as_deref(), Some("localhost:8080"));
        assert_eq!(host_of("ftp://nope"), None);
    }

    #[test]
    fn test_expand_env_reference() {
        // SAFETY: test-local variable name, not read by other tests.
        unsafe { std::env::set_var("LEDGERBRIDGE_TEST_SECRET", "s3cret") };
        assert_eq!(expand_env("${LEDGERBRIDGE_TEST_SECRET}").unwrap(), "s3cret");
        assert_eq!(expand_env("plain").unwrap(), "plain");
        assert!(expand_env("${LEDGERBRIDGE_TEST_UNSET_VAR}").is_err());
    }
}
