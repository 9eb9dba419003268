//! Builders for test documents and a wired-up engine over in-memory fakes.

use chrono::{NaiveDate, Utc};
use ledgerbridge_api::{
    AddressBlock, Item, LinkedRemoteRef, Money, Order, OrderLineItem, OrderTaxLine, Product,
    RemoteId, SalesOrder, SalesOrderLine, ServerId,
};
use std::sync::Arc;

use super::fake_remote::FakeRemoteCatalog;
use crate::config::{ServerConfig, SyncConfig, TaxMapping};
use crate::core::RemoteRegistry;
use crate::service::SyncService;
use crate::storage::{MemoryCursorStore, MemoryLocalStore};

pub const SHOP_URL: &str = "https://shop.example.com";
pub const SHOP: &str = "shop.example.com";

pub fn money(text: &str) -> Money {
    text.parse().unwrap_or(Money::ZERO)
}

/// A server with every mapping an inbound order needs: warehouse, a VAT tax
/// mapping for rate id 1, freight and rounding accounts.
pub fn server_config() -> ServerConfig {
    let mut server = ServerConfig::new(SHOP_URL);
    server.orders.company = Some("Test Company".into());
    server.orders.warehouse = Some("Stores".into());
    server.orders.tax_map = vec![TaxMapping {
        remote_tax_id: Some(1),
        tax_name: None,
        country: None,
        rate: Some(10.0),
        account: "VAT".into(),
    }];
    server.orders.freight_account = Some("Freight".into());
    server.orders.rounding_account = Some("Round Off".into());
    server
}

pub fn item(code: &str, name: &str) -> Item {
    Item::new(code, name)
}

/// Item linked to a remote product, with no sync marker yet.
pub fn linked_item(code: &str, name: &str, server: &ServerId, id: RemoteId) -> Item {
    let mut item = Item::new(code, name);
    item.remote_refs.push(LinkedRemoteRef::linked(server.clone(), id));
    item
}

/// Item waiting for its remote product.
pub fn pending_item(code: &str, name: &str, server: &ServerId) -> Item {
    let mut item = Item::new(code, name);
    item.remote_refs.push(LinkedRemoteRef::pending(server.clone()));
    item
}

pub fn product(name: &str) -> Product {
    let mut product = Product::draft(ServerId::new(SHOP), name);
    product.status = Some("publish".into());
    product
}

pub fn order_line(product_id: u64, qty: f64, price: &str) -> OrderLineItem {
    let price = money(price);
    OrderLineItem {
        id: None,
        name: format!("Product {}", product_id),
        product_id: Some(RemoteId(product_id)),
        variation_id: None,
        quantity: qty,
        price,
        subtotal: price.mul_qty(qty),
        subtotal_tax: Money::ZERO,
        total: price.mul_qty(qty),
        total_tax: Money::ZERO,
        sku: None,
    }
}

pub fn vat_line(amount: &str) -> OrderTaxLine {
    OrderTaxLine {
        id: None,
        rate_id: Some(1),
        rate_code: "VAT-1".into(),
        label: "VAT".into(),
        tax_total: money(amount),
        shipping_tax_total: Money::ZERO,
    }
}

/// A registered customer's processing order with matching billing and shipping.
pub fn remote_order(lines: Vec<OrderLineItem>, total: &str) -> Order {
    let mut order = Order::draft(ServerId::new(SHOP), "processing");
    order.customer_id = Some(42);
    order.currency = Some("EUR".into());
    order.total = money(total);
    order.billing = AddressBlock {
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        address_1: "1 Analytical Way".into(),
        city: "London".into(),
        postcode: "N1".into(),
        country: "GB".into(),
        email: Some("ada@example.com".into()),
        ..Default::default()
    };
    order.shipping = order.billing.clone();
    order.line_items = lines;
    order
}

/// Draft sales order with one line worth `net`.
pub fn sales_order(name: &str, net: &str) -> SalesOrder {
    SalesOrder {
        name: name.to_string(),
        customer: "Ada Lovelace".into(),
        po_no: None,
        remote_ref: None,
        modified: Utc::now(),
        docstatus: Default::default(),
        remote_status: None,
        payment_method: None,
        transaction_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
        delivery_date: None,
        company: None,
        currency: None,
        shipping_rule: None,
        taxes_and_charges: None,
        customer_address: None,
        shipping_address: None,
        items: vec![SalesOrderLine {
            item_code: "ITEM".into(),
            item_name: "Item".into(),
            qty: 1.0,
            rate: money(net),
            discount_percentage: 0.0,
            delivery_date: None,
            warehouse: None,
        }],
        taxes: Vec::new(),
        disable_rounded_total: false,
        payment_entry: None,
        payment_attempted: false,
    }
}

/// Engine wired to an in-memory store, one fake remote and memory cursors.
pub struct Harness {
    pub server: ServerId,
    pub store: Arc<MemoryLocalStore>,
    pub remote: Arc<FakeRemoteCatalog>,
    pub cursors: Arc<MemoryCursorStore>,
    pub service: SyncService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_server(|_| {})
    }

    /// Starts from [`server_config`] and lets the caller adjust it.
    pub fn with_server(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let mut server = server_config();
        configure(&mut server);
        let server_id = server.id.clone();
        let config = match SyncConfig::new(vec![server]) {
            Ok(config) => config,
            Err(e) => panic!("invalid test configuration: {}", e),
        };

        let store = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(FakeRemoteCatalog::new(server_id.clone()));
        let cursors = Arc::new(MemoryCursorStore::new());
        let service = SyncService::new(
            config,
            store.clone(),
            RemoteRegistry::new().with(remote.clone()),
            cursors.clone(),
        );
        Self {
            server: server_id,
            store,
            remote,
            cursors,
            service,
        }
    }

    /// Local plus remote writes so far.
    pub fn total_writes(&self) -> u64 {
        self.store.write_count() + self.remote.write_count()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
