//! Seams between the engine and the two systems it reconciles.
//!
//! [`RemoteCatalog`] is implemented once per remote server (HTTP client in
//! production, [`crate::testing::FakeRemoteCatalog`] in tests). [`LocalStore`]
//! fronts the local system of record, including its cross-reference index.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerbridge_api::{
    Address, Attachment, Contact, Customer, Invoice, Item, ItemAttribute, ItemPrice,
    LinkedRemoteRef, MediaAsset, Order, PaymentEntry, PaymentReference, Product, RemoteId,
    SalesOrder, ServerId, WriteOrigin,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Result;

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Filters and paging for remote list calls. Pages are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub page: u32,
    pub per_page: u32,
    pub modified_after: Option<DateTime<Utc>>,
    pub created_after: Option<DateTime<Utc>>,
    pub include: Option<RemoteId>,
    pub status: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PAGE_SIZE,
            modified_after: None,
            created_after: None,
            include: None,
            status: None,
        }
    }
}

impl ListQuery {
    pub fn by_id(id: RemoteId) -> Self {
        Self {
            include: Some(id),
            ..Default::default()
        }
    }

    pub fn modified_since(since: DateTime<Utc>) -> Self {
        Self {
            modified_after: Some(since),
            ..Default::default()
        }
    }

    pub fn created_after(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.created_after = at;
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_page_size(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    pub fn page(&self, page: u32) -> Self {
        Self {
            page,
            ..self.clone()
        }
    }
}

/// Paginated access to one remote server's products, orders and media.
///
/// Implementations are stateless and never retry; a failed call surfaces as
/// [`ledgerbridge_api::SyncError::RemoteUnavailable`] and the caller retries
/// the whole cycle.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    fn server(&self) -> &ServerId;

    async fn list_products(&self, query: &ListQuery) -> Result<Vec<Product>>;

    async fn create_product(&self, product: &Product) -> Result<Product>;

    async fn update_product(&self, product: &Product) -> Result<Product>;

    async fn list_orders(&self, query: &ListQuery) -> Result<Vec<Order>>;

    async fn create_order(&self, order: &Order) -> Result<Order>;

    async fn update_order(&self, order: &Order) -> Result<Order>;

    /// First media library entry whose title matches `file_name`.
    async fn search_media(&self, file_name: &str) -> Result<Option<MediaAsset>>;

    async fn upload_media(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<MediaAsset>;

    async fn delete_media(&self, id: u64) -> Result<()>;
}

/// The local system of record.
///
/// Writes tagged [`WriteOrigin::User`] publish a change notification; writes
/// tagged [`WriteOrigin::Sync`] do not. `update_*_ref` and
/// `update_item_fields` leave the document's `modified` timestamp untouched.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get_item(&self, code: &str) -> Result<Option<Item>>;

    async fn insert_item(&self, item: Item, origin: WriteOrigin) -> Result<Item>;

    async fn save_item(&self, item: Item, origin: WriteOrigin) -> Result<Item>;

    async fn update_item_ref(&self, code: &str, link: LinkedRemoteRef) -> Result<()>;

    async fn update_item_fields(&self, item: &Item) -> Result<()>;

    /// Cross-reference index: item codes linked to `(server, remote_id)`, in index order.
    async fn items_for_remote(&self, server: &ServerId, remote_id: RemoteId)
    -> Result<Vec<String>>;

    async fn item_attachments(&self, code: &str) -> Result<Vec<Attachment>>;

    async fn item_prices(&self, code: &str, price_list: &str) -> Result<Vec<ItemPrice>>;

    async fn get_item_attribute(&self, name: &str) -> Result<Option<ItemAttribute>>;

    async fn save_item_attribute(&self, attribute: ItemAttribute) -> Result<()>;

    async fn get_sales_order(&self, name: &str) -> Result<Option<SalesOrder>>;

    /// Inserts a new sales order; an empty `name` is assigned from the naming series.
    async fn insert_sales_order(&self, order: SalesOrder, origin: WriteOrigin)
    -> Result<SalesOrder>;

    async fn save_sales_order(&self, order: SalesOrder, origin: WriteOrigin)
    -> Result<SalesOrder>;

    async fn update_sales_order_ref(&self, name: &str, link: LinkedRemoteRef) -> Result<()>;

    async fn sales_orders_for_remote(
        &self,
        server: &ServerId,
        remote_id: RemoteId,
    ) -> Result<Vec<String>>;

    async fn submit_sales_order(&self, name: &str) -> Result<SalesOrder>;

    async fn find_customer(&self, identifier: &str) -> Result<Option<Customer>>;

    async fn save_customer(&self, customer: Customer) -> Result<Customer>;

    async fn customer_addresses(&self, customer: &str) -> Result<Vec<Address>>;

    async fn save_address(&self, address: Address) -> Result<Address>;

    async fn customer_contacts(&self, customer: &str) -> Result<Vec<Contact>>;

    async fn save_contact(&self, contact: Contact) -> Result<Contact>;

    async fn create_invoice(&self, invoice: Invoice) -> Result<Invoice>;

    async fn create_payment_entry(&self, entry: PaymentEntry) -> Result<PaymentEntry>;

    async fn payment_entries_for(&self, reference: &PaymentReference)
    -> Result<Vec<PaymentEntry>>;
}

/// Which sweep a cursor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorKind {
    Items,
    Orders,
}

impl fmt::Display for CursorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorKind::Items => f.write_str("items"),
            CursorKind::Orders => f.write_str("orders"),
        }
    }
}

/// Persisted "last synced at" cursors for sweeps.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Returns `None` before the first sweep.
    async fn load_cursor(&self, kind: CursorKind) -> Result<Option<DateTime<Utc>>>;

    async fn save_cursor(&self, kind: CursorKind, at: DateTime<Utc>) -> Result<()>;
}
