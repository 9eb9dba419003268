//! In-memory local store.
//!
//! Backs the tests and the command-line frontend (which persists the state
//! between runs through [`super::snapshot`]). Every mutation bumps a write
//! counter; user-origin writes are published on a broadcast channel.

use async_trait::async_trait;
use chrono::Utc;
use ledgerbridge_api::{
    Address, Attachment, Contact, Customer, DocStatus, Invoice, Item, ItemAttribute, ItemPrice,
    LinkedRemoteRef, LocalChange, PaymentEntry, PaymentReference, RemoteId, SalesOrder, ServerId,
    SyncError, WriteOrigin,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::Result;
use crate::core::traits::LocalStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryState {
    pub items: BTreeMap<String, Item>,
    pub attachments: Vec<Attachment>,
    pub item_prices: Vec<ItemPrice>,
    pub item_attributes: BTreeMap<String, ItemAttribute>,
    pub sales_orders: BTreeMap<String, SalesOrder>,
    pub customers: BTreeMap<String, Customer>,
    pub addresses: BTreeMap<String, Address>,
    pub contacts: BTreeMap<String, Contact>,
    pub invoices: BTreeMap<String, Invoice>,
    pub payment_entries: BTreeMap<String, PaymentEntry>,
    /// Naming series counters, keyed by prefix.
    pub series: BTreeMap<String, u64>,
}

impl MemoryState {
    fn next_name(&mut self, prefix: &str) -> String {
        let counter = self.series.entry(prefix.to_string()).or_insert(0);
        *counter += 1;
        format!("{}-{:05}", prefix, counter)
    }
}

/// `base`, or `base-N` for the first free N.
fn unique_name<V>(existing: &BTreeMap<String, V>, base: &str) -> String {
    if !existing.contains_key(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !existing.contains_key(candidate))
        .unwrap_or_else(|| base.to_string())
}

pub struct MemoryLocalStore {
    state: RwLock<MemoryState>,
    change_tx: broadcast::Sender<LocalChange>,
    writes: AtomicU64,
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::from_state(MemoryState::default())
    }

    pub fn from_state(state: MemoryState) -> Self {
        let (change_tx, _) = broadcast::channel(1000);
        Self {
            state: RwLock::new(state),
            change_tx,
            writes: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LocalChange> {
        self.change_tx.subscribe()
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.read().await.clone()
    }

    /// Number of mutations since construction (seeding excluded).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Inserts an item as-is, keeping its `modified` timestamp.
    pub async fn seed_item(&self, item: Item) {
        self.state.write().await.items.insert(item.code.clone(), item);
    }

    pub async fn seed_sales_order(&self, order: SalesOrder) {
        self.state
            .write()
            .await
            .sales_orders
            .insert(order.name.clone(), order);
    }

    pub async fn seed_customer(&self, customer: Customer) {
        self.state
            .write()
            .await
            .customers
            .insert(customer.name.clone(), customer);
    }

    pub async fn add_item_price(&self, price: ItemPrice) {
        self.state.write().await.item_prices.push(price);
    }

    pub async fn add_attachment(&self, attachment: Attachment, origin: WriteOrigin) {
        let change = LocalChange::AttachmentChanged {
            item_code: attachment.attached_to.clone(),
            file_url: attachment.file_url.clone(),
            is_private: attachment.is_private,
            deleted: false,
        };
        self.state.write().await.attachments.push(attachment);
        self.record_write(origin, change);
    }

    pub async fn remove_attachment(&self, name: &str, origin: WriteOrigin) -> Result<()> {
        let removed = {
            let mut state = self.state.write().await;
            let index = state
                .attachments
                .iter()
                .position(|a| a.name == name)
                .ok_or_else(|| SyncError::not_found("Attachment", name))?;
            state.attachments.remove(index)
        };
        self.record_write(
            origin,
            LocalChange::AttachmentChanged {
                item_code: removed.attached_to,
                file_url: removed.file_url,
                is_private: removed.is_private,
                deleted: true,
            },
        );
        Ok(())
    }

    fn record_write(&self, origin: WriteOrigin, change: LocalChange) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if origin == WriteOrigin::User {
            // No subscribers is fine.
            let _ = self.change_tx.send(change);
        }
    }

    fn count_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get_item(&self, code: &str) -> Result<Option<Item>> {
        Ok(self.state.read().await.items.get(code).cloned())
    }

    async fn insert_item(&self, mut item: Item, origin: WriteOrigin) -> Result<Item> {
        {
            let mut state = self.state.write().await;
            if state.items.contains_key(&item.code) {
                return Err(SyncError::invalid(format!(
                    "Item {} already exists",
                    item.code
                )));
            }
            item.modified = Utc::now();
            state.items.insert(item.code.clone(), item.clone());
        }
        debug!("[MemoryLocalStore] inserted item {}", item.code);
        self.record_write(
            origin,
            LocalChange::ItemSaved {
                code: item.code.clone(),
            },
        );
        Ok(item)
    }

    async fn save_item(&self, mut item: Item, origin: WriteOrigin) -> Result<Item> {
        {
            let mut state = self.state.write().await;
            if !state.items.contains_key(&item.code) {
                return Err(SyncError::not_found("Item", &item.code));
            }
            item.modified = Utc::now();
            state.items.insert(item.code.clone(), item.clone());
        }
        self.record_write(
            origin,
            LocalChange::ItemSaved {
                code: item.code.clone(),
            },
        );
        Ok(item)
    }

    async fn update_item_ref(&self, code: &str, link: LinkedRemoteRef) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let item = state
                .items
                .get_mut(code)
                .ok_or_else(|| SyncError::not_found("Item", code))?;
            match item.ref_for_mut(&link.server) {
                Some(existing) => *existing = link,
                None => item.remote_refs.push(link),
            }
        }
        self.count_write();
        Ok(())
    }

    async fn update_item_fields(&self, item: &Item) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let stored = state
                .items
                .get_mut(&item.code)
                .ok_or_else(|| SyncError::not_found("Item", &item.code))?;
            let modified = stored.modified;
            *stored = item.clone();
            stored.modified = modified;
        }
        self.count_write();
        Ok(())
    }

    async fn items_for_remote(
        &self,
        server: &ServerId,
        remote_id: RemoteId,
    ) -> Result<Vec<String>> {
        Ok(self
            .state
            .read()
            .await
            .items
            .values()
            .filter(|item| {
                item.remote_refs
                    .iter()
                    .any(|r| &r.server == server && r.remote_id == Some(remote_id))
            })
            .map(|item| item.code.clone())
            .collect())
    }

    async fn item_attachments(&self, code: &str) -> Result<Vec<Attachment>> {
        let mut attachments: Vec<Attachment> = self
            .state
            .read()
            .await
            .attachments
            .iter()
            .filter(|a| a.attached_to == code)
            .cloned()
            .collect();
        attachments.sort_by_key(|a| a.created);
        Ok(attachments)
    }

    async fn item_prices(&self, code: &str, price_list: &str) -> Result<Vec<ItemPrice>> {
        Ok(self
            .state
            .read()
            .await
            .item_prices
            .iter()
            .filter(|p| p.item_code == code && p.price_list == price_list)
            .cloned()
            .collect())
    }

    async fn get_item_attribute(&self, name: &str) -> Result<Option<ItemAttribute>> {
        Ok(self.state.read().await.item_attributes.get(name).cloned())
    }

    async fn save_item_attribute(&self, attribute: ItemAttribute) -> Result<()> {
        self.state
            .write()
            .await
            .item_attributes
            .insert(attribute.name.clone(), attribute);
        self.count_write();
        Ok(())
    }

    async fn get_sales_order(&self, name: &str) -> Result<Option<SalesOrder>> {
        Ok(self.state.read().await.sales_orders.get(name).cloned())
    }

    async fn insert_sales_order(
        &self,
        mut order: SalesOrder,
        origin: WriteOrigin,
    ) -> Result<SalesOrder> {
        {
            let mut state = self.state.write().await;
            if order.name.is_empty() {
                order.name = state.next_name("SO");
            } else if state.sales_orders.contains_key(&order.name) {
                return Err(SyncError::invalid(format!(
                    "Sales order {} already exists",
                    order.name
                )));
            }
            order.modified = Utc::now();
            state
                .sales_orders
                .insert(order.name.clone(), order.clone());
        }
        debug!("[MemoryLocalStore] inserted sales order {}", order.name);
        self.record_write(
            origin,
            LocalChange::SalesOrderSaved {
                name: order.name.clone(),
            },
        );
        Ok(order)
    }

    async fn save_sales_order(
        &self,
        mut order: SalesOrder,
        origin: WriteOrigin,
    ) -> Result<SalesOrder> {
        {
            let mut state = self.state.write().await;
            if !state.sales_orders.contains_key(&order.name) {
                return Err(SyncError::not_found("Sales Order", &order.name));
            }
            order.modified = Utc::now();
            state
                .sales_orders
                .insert(order.name.clone(), order.clone());
        }
        self.record_write(
            origin,
            LocalChange::SalesOrderSaved {
                name: order.name.clone(),
            },
        );
        Ok(order)
    }

    async fn update_sales_order_ref(&self, name: &str, link: LinkedRemoteRef) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let order = state
                .sales_orders
                .get_mut(name)
                .ok_or_else(|| SyncError::not_found("Sales Order", name))?;
            order.remote_ref = Some(link);
        }
        self.count_write();
        Ok(())
    }

    async fn sales_orders_for_remote(
        &self,
        server: &ServerId,
        remote_id: RemoteId,
    ) -> Result<Vec<String>> {
        Ok(self
            .state
            .read()
            .await
            .sales_orders
            .values()
            .filter(|so| {
                so.remote_ref
                    .as_ref()
                    .map(|r| &r.server == server && r.remote_id == Some(remote_id))
                    .unwrap_or(false)
            })
            .map(|so| so.name.clone())
            .collect())
    }

    async fn submit_sales_order(&self, name: &str) -> Result<SalesOrder> {
        let order = {
            let mut state = self.state.write().await;
            let order = state
                .sales_orders
                .get_mut(name)
                .ok_or_else(|| SyncError::not_found("Sales Order", name))?;
            if order.docstatus == DocStatus::Cancelled {
                return Err(SyncError::invalid(format!(
                    "Cannot submit cancelled sales order {}",
                    name
                )));
            }
            order.docstatus = DocStatus::Submitted;
            order.modified = Utc::now();
            order.clone()
        };
        self.count_write();
        Ok(order)
    }

    async fn find_customer(&self, identifier: &str) -> Result<Option<Customer>> {
        Ok(self
            .state
            .read()
            .await
            .customers
            .values()
            .find(|c| c.identifier == identifier)
            .cloned())
    }

    async fn save_customer(&self, mut customer: Customer) -> Result<Customer> {
        {
            let mut state = self.state.write().await;
            if customer.name.is_empty() {
                customer.name = unique_name(&state.customers, &customer.customer_name);
            }
            state
                .customers
                .insert(customer.name.clone(), customer.clone());
        }
        self.count_write();
        Ok(customer)
    }

    async fn customer_addresses(&self, customer: &str) -> Result<Vec<Address>> {
        Ok(self
            .state
            .read()
            .await
            .addresses
            .values()
            .filter(|a| a.links.iter().any(|l| l == customer))
            .cloned()
            .collect())
    }

    async fn save_address(&self, mut address: Address) -> Result<Address> {
        {
            let mut state = self.state.write().await;
            if address.name.is_empty() {
                let label = address.address_type.label();
                let base = if address.title.ends_with(label) {
                    address.title.clone()
                } else {
                    format!("{}-{}", address.title, label)
                };
                address.name = unique_name(&state.addresses, &base);
            }
            state
                .addresses
                .insert(address.name.clone(), address.clone());
        }
        self.count_write();
        Ok(address)
    }

    async fn customer_contacts(&self, customer: &str) -> Result<Vec<Contact>> {
        Ok(self
            .state
            .read()
            .await
            .contacts
            .values()
            .filter(|c| c.links.iter().any(|l| l == customer))
            .cloned()
            .collect())
    }

    async fn save_contact(&self, mut contact: Contact) -> Result<Contact> {
        {
            let mut state = self.state.write().await;
            if contact.name.is_empty() {
                contact.name = state.next_name("CONT");
            }
            state.contacts.insert(contact.name.clone(), contact.clone());
        }
        self.count_write();
        Ok(contact)
    }

    async fn create_invoice(&self, mut invoice: Invoice) -> Result<Invoice> {
        {
            let mut state = self.state.write().await;
            if invoice.name.is_empty() {
                invoice.name = state.next_name("SINV");
            }
            state.invoices.insert(invoice.name.clone(), invoice.clone());
        }
        self.count_write();
        Ok(invoice)
    }

    async fn create_payment_entry(&self, mut entry: PaymentEntry) -> Result<PaymentEntry> {
        {
            let mut state = self.state.write().await;
            if entry.name.is_empty() {
                entry.name = state.next_name("PE");
            }
            state
                .payment_entries
                .insert(entry.name.clone(), entry.clone());
        }
        self.count_write();
        Ok(entry)
    }

    async fn payment_entries_for(
        &self,
        reference: &PaymentReference,
    ) -> Result<Vec<PaymentEntry>> {
        Ok(self
            .state
            .read()
            .await
            .payment_entries
            .values()
            .filter(|p| &p.reference == reference && p.docstatus != DocStatus::Cancelled)
            .cloned()
            .collect())
    }
}
