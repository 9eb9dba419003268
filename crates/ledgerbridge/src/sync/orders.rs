//! Sales order ↔ remote order reconciliation.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use ledgerbridge_api::{
    DocStatus, EntityKey, Item, LinkedRemoteRef, Money, Order, OrderLineItem, RemoteId, SalesOrder,
    SalesOrderLine, ServerId, SyncError, WriteOrigin,
};
use tracing::{debug, info, warn};

use super::conflict::{Action, Decision, decide};
use super::context::SyncContext;
use super::customers::CustomerResolver;
use super::financial::{PaymentReconciler, TaxSynthesizer};
use super::orchestrator::{Orchestrator, Reconciler, missing_marker};
use super::pairing::{ItemTarget, OrderPair, OrderTarget, PairingResolver};
use crate::Result;
use crate::config::ServerConfig;
use crate::core::DependencyTrail;

const PLACEHOLDER_ITEM_NAME: &str = "Deleted remote product";
const MAX_PAYMENT_LABEL: usize = 140;

/// Unit rate of a remote line as booked locally.
fn local_rate(line: &OrderLineItem, server: &ServerConfig) -> Money {
    if server.orders.use_actual_tax_type {
        line.price
    } else {
        line.tax_inclusive_price()
    }
}

/// Payment method label stored on the sales order.
fn payment_label(order: &Order) -> Option<String> {
    match order.payment_method_title.as_deref() {
        Some(title) if !title.is_empty() && title.chars().count() < MAX_PAYMENT_LABEL => {
            Some(title.to_string())
        }
        _ => order.payment_method.clone().filter(|m| !m.is_empty()),
    }
}

pub struct OrderReconciler<'a> {
    orch: &'a Orchestrator,
}

impl<'a> OrderReconciler<'a> {
    pub fn new(orch: &'a Orchestrator) -> Self {
        Self { orch }
    }

    fn ctx(&self) -> &SyncContext {
        self.orch.context()
    }

    async fn create_local(&self, pair: &mut OrderPair, trail: &DependencyTrail) -> Result<()> {
        let ctx = self.ctx();
        let server = ctx.server(&pair.server)?;
        let order = pair
            .remote
            .clone()
            .ok_or_else(|| SyncError::reconciliation("CreateLocal without a remote order"))?;
        let options = &server.orders;

        let status = options.status_to_local(&order.status).ok_or_else(|| {
            SyncError::reconciliation(format!(
                "Order {}: remote status '{}' has no local mapping",
                order.id, order.status
            ))
        })?;
        let warehouse = options.warehouse.clone().ok_or_else(|| {
            SyncError::config(format!("No warehouse configured for server {}", server.id))
        })?;
        let transaction_date = order
            .date_created
            .map(|d| d.date_naive())
            .unwrap_or_else(|| Utc::now().date_naive());
        let delivery_date = transaction_date + Duration::days(options.delivery_days());

        let resolved = CustomerResolver::new(ctx.store.as_ref(), server)
            .resolve(&order)
            .await?;

        let mut lines = Vec::with_capacity(order.line_items.len());
        for line in &order.line_items {
            let item_code = match line.effective_product_id().filter(|id| !id.is_unassigned()) {
                Some(product_id) => self.item_for_product(&pair.server, product_id, trail).await?,
                None => self.placeholder_item(server).await?,
            };
            let rate = local_rate(line, server);
            lines.push(SalesOrderLine {
                item_name: if line.name.is_empty() {
                    item_code.clone()
                } else {
                    line.name.clone()
                },
                item_code,
                qty: line.quantity,
                rate,
                discount_percentage: if rate.is_zero() { 100.0 } else { 0.0 },
                delivery_date: Some(delivery_date),
                warehouse: Some(warehouse.clone()),
            });
        }

        // An order without lines is booked as one placeholder line worth the
        // remote total; tax rows would double count it.
        let placeholder_only = lines.is_empty();
        if placeholder_only {
            let item_code = self.placeholder_item(server).await?;
            lines.push(SalesOrderLine {
                item_name: PLACEHOLDER_ITEM_NAME.to_string(),
                item_code,
                qty: 1.0,
                rate: order.total,
                discount_percentage: 0.0,
                delivery_date: Some(delivery_date),
                warehouse: Some(warehouse),
            });
        }

        let shipping_rule = if options.enable_shipping_methods_sync {
            order
                .shipping_lines
                .first()
                .and_then(|s| options.shipping_rule_for(&s.method_title, &s.method_id))
                .map(str::to_string)
        } else {
            None
        };

        let mut sales_order = SalesOrder {
            name: String::new(),
            customer: resolved.customer.name.clone(),
            po_no: Some(order.id.to_string()),
            remote_ref: Some(LinkedRemoteRef::linked(pair.server.clone(), order.id)),
            modified: Utc::now(),
            docstatus: DocStatus::Draft,
            remote_status: Some(status.to_string()),
            payment_method: payment_label(&order),
            transaction_date,
            delivery_date: Some(delivery_date),
            company: options.company.clone(),
            currency: order.currency.clone().or_else(|| options.default_currency.clone()),
            shipping_rule,
            taxes_and_charges: None,
            customer_address: Some(resolved.billing_address),
            shipping_address: Some(resolved.shipping_address),
            items: lines,
            taxes: Vec::new(),
            disable_rounded_total: false,
            payment_entry: None,
            payment_attempted: false,
        };
        if !placeholder_only {
            TaxSynthesizer::new(server).apply(&order, &mut sales_order)?;
        }

        let mut sales_order = ctx
            .store
            .insert_sales_order(sales_order, WriteOrigin::Sync)
            .await?;
        if options.submit_sales_orders {
            sales_order = ctx.store.submit_sales_order(&sales_order.name).await?;
        }
        info!(
            "[OrderReconciler] created sales order {} from order {} on {} (grand total {})",
            sales_order.name,
            order.id,
            pair.server,
            sales_order.grand_total()
        );
        pair.local = Some(sales_order);
        Ok(())
    }

    /// Local item for a remote product, syncing the product in first when no
    /// enabled item is linked to it yet.
    async fn item_for_product(
        &self,
        server: &ServerId,
        product_id: RemoteId,
        trail: &DependencyTrail,
    ) -> Result<String> {
        let ctx = self.ctx();
        let key = (server.clone(), product_id);
        if let Some(code) = ctx.item_index.get(&key) {
            // The index may predate an edit that disabled or relinked the item.
            let still_valid = ctx.store.get_item(&code).await?.is_some_and(|item| {
                !item.disabled
                    && item.ref_for(server).and_then(|r| r.remote_id) == Some(product_id)
            });
            if still_valid {
                return Ok(code);
            }
            ctx.item_index.invalidate(&key);
        }
        if let Some(code) = self.linked_item(server, product_id).await? {
            ctx.item_index.insert(key, code.clone());
            return Ok(code);
        }

        self.orch
            .sync_item(
                ItemTarget::Remote {
                    server: server.clone(),
                    id: product_id,
                },
                trail.clone(),
            )
            .await?;
        let code = self.linked_item(server, product_id).await?.ok_or_else(|| {
            SyncError::reconciliation(format!(
                "Product {} on {} has no local item after sync",
                product_id, server
            ))
        })?;
        ctx.item_index.insert(key, code.clone());
        Ok(code)
    }

    async fn linked_item(&self, server: &ServerId, product_id: RemoteId) -> Result<Option<String>> {
        let store = &self.ctx().store;
        for code in store.items_for_remote(server, product_id).await? {
            if let Some(item) = store.get_item(&code).await? {
                if !item.disabled {
                    return Ok(Some(item.code));
                }
            }
        }
        Ok(None)
    }

    async fn placeholder_item(&self, server: &ServerConfig) -> Result<String> {
        let store = &self.ctx().store;
        let code = &server.orders.placeholder_item;
        if store.get_item(code).await?.is_none() {
            let mut item = Item::new(code.clone(), PLACEHOLDER_ITEM_NAME);
            item.is_stock_item = false;
            item.stock_uom = server.items.stock_uom().to_string();
            item.item_group = server.items.item_group.clone();
            store.insert_item(item, WriteOrigin::Sync).await?;
            debug!("[OrderReconciler] created placeholder item {}", code);
        }
        Ok(code.clone())
    }

    async fn update_local(&self, pair: &mut OrderPair) -> Result<()> {
        let ctx = self.ctx();
        let server = ctx.server(&pair.server)?;
        let (Some(sales_order), Some(order)) = (&pair.local, &pair.remote) else {
            return Err(SyncError::reconciliation("UpdateLocal without both halves"));
        };
        if sales_order.docstatus == DocStatus::Cancelled {
            debug!(
                "[OrderReconciler] {} is cancelled; not applying remote changes",
                sales_order.name
            );
            return Ok(());
        }

        let status = server.orders.status_to_local(&order.status).ok_or_else(|| {
            SyncError::reconciliation(format!(
                "Order {}: remote status '{}' has no local mapping",
                order.id, order.status
            ))
        })?;
        let mut updated = sales_order.clone();
        updated.remote_status = Some(status.to_string());
        updated.payment_method = payment_label(order);

        if updated != *sales_order {
            let saved = ctx
                .store
                .save_sales_order(updated, WriteOrigin::Sync)
                .await?;
            info!(
                "[OrderReconciler] updated {} from order {} (status {})",
                saved.name, order.id, status
            );
            pair.local = Some(saved);
        }
        Ok(())
    }

    async fn update_remote(&self, pair: &mut OrderPair, trail: &DependencyTrail) -> Result<()> {
        let ctx = self.ctx();
        let server = ctx.server(&pair.server)?;
        let (Some(sales_order), Some(order)) = (&pair.local, &pair.remote) else {
            return Err(SyncError::reconciliation("UpdateRemote without both halves"));
        };

        let mut updated = order.clone();
        let mut dirty = false;
        if let Some(remote_status) = sales_order
            .remote_status
            .as_deref()
            .and_then(|s| server.orders.status_to_remote(s))
        {
            if remote_status != order.status {
                updated.status = remote_status.to_string();
                dirty = true;
            }
        }

        if server.orders.sync_line_items_to_remote {
            let desired = self.remote_lines(sales_order, server, trail).await?;
            if lines_differ(&order.line_items, &desired, server) {
                // Existing lines are removed by id, then the new set is added.
                updated.line_items = order
                    .line_items
                    .iter()
                    .filter_map(|line| line.id)
                    .map(|id| OrderLineItem {
                        id: Some(id),
                        product_id: None,
                        quantity: 0.0,
                        ..blank_line()
                    })
                    .chain(desired)
                    .collect();
                dirty = true;
            }
        }

        if dirty {
            let catalog = ctx.remote(&pair.server)?;
            let saved = catalog.update_order(&updated).await?;
            info!(
                "[OrderReconciler] pushed {} to order {} on {}",
                sales_order.name, saved.id, pair.server
            );
            pair.remote = Some(saved);
        }
        Ok(())
    }

    async fn create_remote(&self, pair: &mut OrderPair, trail: &DependencyTrail) -> Result<()> {
        let ctx = self.ctx();
        let server = ctx.server(&pair.server)?;
        let catalog = ctx.remote(&pair.server)?;
        let sales_order = pair
            .local
            .clone()
            .ok_or_else(|| SyncError::reconciliation("CreateRemote without a sales order"))?;

        let status = sales_order
            .remote_status
            .as_deref()
            .and_then(|s| server.orders.status_to_remote(s))
            .unwrap_or("pending");
        let mut draft = Order::draft(pair.server.clone(), status);
        draft.currency = sales_order.currency.clone();
        draft.line_items = self.remote_lines(&sales_order, server, trail).await?;
        draft.total = sales_order.grand_total();
        if let Some(address) = &sales_order.customer_address {
            if let Some(address) = ctx
                .store
                .customer_addresses(&sales_order.customer)
                .await?
                .into_iter()
                .find(|a| &a.name == address)
            {
                draft.billing.first_name = sales_order.customer.clone();
                draft.billing.address_1 = address.line1;
                draft.billing.address_2 = address.line2.unwrap_or_default();
                draft.billing.city = address.city;
                draft.billing.state = address.state.unwrap_or_default();
                draft.billing.postcode = address.pincode.unwrap_or_default();
                draft.billing.country = address.country.unwrap_or_default();
                draft.billing.email = address.email;
                draft.billing.phone = address.phone;
            }
        }

        let mut link = sales_order
            .remote_ref
            .clone()
            .unwrap_or_else(|| LinkedRemoteRef::pending(pair.server.clone()));
        link.enabled = false;
        ctx.store
            .update_sales_order_ref(&sales_order.name, link.clone())
            .await?;

        let created = match catalog.create_order(&draft).await {
            Ok(order) => order,
            Err(e) => {
                link.enabled = true;
                ctx.store
                    .update_sales_order_ref(&sales_order.name, link)
                    .await?;
                return Err(e);
            }
        };
        info!(
            "[OrderReconciler] created order {} on {} for {}",
            created.id, pair.server, sales_order.name
        );

        link.remote_id = Some(created.id);
        link.enabled = true;
        ctx.store
            .update_sales_order_ref(&sales_order.name, link)
            .await?;
        pair.local = ctx.store.get_sales_order(&sales_order.name).await?;
        pair.remote = Some(created);
        Ok(())
    }

    /// Remote line items for the sales order, creating missing products
    /// through nested item cycles. Placeholder lines are not pushed.
    async fn remote_lines(
        &self,
        sales_order: &SalesOrder,
        server: &ServerConfig,
        trail: &DependencyTrail,
    ) -> Result<Vec<OrderLineItem>> {
        let mut lines = Vec::with_capacity(sales_order.items.len());
        for line in &sales_order.items {
            if line.item_code == server.orders.placeholder_item {
                continue;
            }
            let item = self
                .ctx()
                .store
                .get_item(&line.item_code)
                .await?
                .ok_or_else(|| SyncError::not_found("Item", &line.item_code))?;
            let product_id = self.product_for_item(&item, &server.id, trail).await?;
            let (product_id, variation_id) = match &item.variant_of {
                Some(parent) => {
                    let parent = self
                        .ctx()
                        .store
                        .get_item(parent)
                        .await?
                        .ok_or_else(|| SyncError::not_found("Item", parent))?;
                    let parent_id = self.product_for_item(&parent, &server.id, trail).await?;
                    (parent_id, Some(product_id))
                }
                None => (product_id, None),
            };
            lines.push(OrderLineItem {
                name: line.item_name.clone(),
                product_id: Some(product_id),
                variation_id,
                quantity: line.qty,
                price: line.rate,
                subtotal: line.rate.mul_qty(line.qty),
                total: line.amount(),
                ..blank_line()
            });
        }
        Ok(lines)
    }

    async fn product_for_item(
        &self,
        item: &Item,
        server: &ServerId,
        trail: &DependencyTrail,
    ) -> Result<RemoteId> {
        let linked = |item: &Item| {
            item.ref_for(server)
                .filter(|r| r.is_linked())
                .and_then(|r| r.remote_id)
        };
        if let Some(id) = linked(item) {
            return Ok(id);
        }

        let store = &self.ctx().store;
        if item.ref_for(server).is_none() {
            store
                .update_item_ref(&item.code, LinkedRemoteRef::pending(server.clone()))
                .await?;
        }
        self.orch
            .sync_item(
                ItemTarget::Local {
                    code: item.code.clone(),
                    server: server.clone(),
                },
                trail.clone(),
            )
            .await?;
        store
            .get_item(&item.code)
            .await?
            .as_ref()
            .and_then(linked)
            .ok_or_else(|| {
                SyncError::reconciliation(format!(
                    "Item {} has no remote product on {} after sync",
                    item.code, server
                ))
            })
    }
}

fn blank_line() -> OrderLineItem {
    OrderLineItem {
        id: None,
        name: String::new(),
        product_id: None,
        variation_id: None,
        quantity: 0.0,
        price: Money::ZERO,
        subtotal: Money::ZERO,
        subtotal_tax: Money::ZERO,
        total: Money::ZERO,
        total_tax: Money::ZERO,
        sku: None,
    }
}

/// Compares the product lines of a remote order with the desired set.
fn lines_differ(current: &[OrderLineItem], desired: &[OrderLineItem], server: &ServerConfig) -> bool {
    let current: Vec<&OrderLineItem> = current
        .iter()
        .filter(|l| l.effective_product_id().is_some_and(|id| !id.is_unassigned()))
        .collect();
    if current.len() != desired.len() {
        return true;
    }
    current.iter().zip(desired).any(|(have, want)| {
        have.effective_product_id() != want.effective_product_id()
            || (have.quantity - want.quantity).abs() > f64::EPSILON
            || local_rate(have, server) != want.price
    })
}

#[async_trait]
impl Reconciler for OrderReconciler<'_> {
    type Target = OrderTarget;
    type Pair = OrderPair;

    fn lock_key(&self, target: &OrderTarget) -> EntityKey {
        target.key()
    }

    async fn canonical_key(&self, target: &OrderTarget) -> Result<EntityKey> {
        let OrderTarget::Local { name } = target else {
            return Ok(target.key());
        };
        let linked = self
            .ctx()
            .store
            .get_sales_order(name)
            .await?
            .and_then(|so| so.remote_ref)
            .and_then(|r| Some((r.server, r.remote_id?)))
            .filter(|(_, id)| !id.is_unassigned());
        Ok(match linked {
            Some((server, id)) => EntityKey::Order { server, id },
            None => target.key(),
        })
    }

    async fn pair(&self, target: &OrderTarget) -> Result<OrderPair> {
        let resolver = PairingResolver::new(self.ctx());
        match target {
            OrderTarget::Local { name } => resolver.order_from_local(name).await,
            OrderTarget::Remote { server, id } => resolver.order_from_remote(server, *id).await,
        }
    }

    fn aliases(&self, pair: &OrderPair) -> Vec<EntityKey> {
        let mut keys = Vec::with_capacity(2);
        if let Some(so) = &pair.local {
            keys.push(EntityKey::SalesOrder {
                name: so.name.clone(),
            });
        }
        let remote_id = pair
            .remote
            .as_ref()
            .map(|o| o.id)
            .or_else(|| pair.link().and_then(|l| l.remote_id));
        if let Some(id) = remote_id.filter(|id| !id.is_unassigned()) {
            keys.push(EntityKey::Order {
                server: pair.server.clone(),
                id,
            });
        }
        keys
    }

    fn decide(&self, pair: &OrderPair) -> Result<Decision> {
        Ok(decide(&pair.state()?))
    }

    async fn apply(
        &self,
        pair: &mut OrderPair,
        action: Action,
        trail: &DependencyTrail,
    ) -> Result<()> {
        match action {
            Action::CreateLocal => self.create_local(pair, trail).await,
            Action::CreateRemote => self.create_remote(pair, trail).await,
            Action::UpdateLocal => self.update_local(pair).await,
            Action::UpdateRemote => self.update_remote(pair, trail).await,
            Action::NoOp => Ok(()),
        }
    }

    async fn commit(&self, pair: &OrderPair) -> Result<()> {
        let (Some(sales_order), Some(order)) = (&pair.local, &pair.remote) else {
            return Err(SyncError::reconciliation("Cannot commit a half-empty order pair"));
        };
        let marker = order
            .date_modified
            .ok_or_else(|| missing_marker(&format!("order {}", order.id)))?;
        let link = LinkedRemoteRef {
            server: pair.server.clone(),
            remote_id: Some(order.id),
            last_sync_marker: Some(marker),
            enabled: true,
        };
        self.ctx()
            .store
            .update_sales_order_ref(&sales_order.name, link)
            .await?;
        debug!(
            "[OrderReconciler] committed {} ↔ {} at {}",
            sales_order.name, order.id, marker
        );
        Ok(())
    }

    /// Posts the payment of a submitted, paid order once.
    async fn follow_up(&self, pair: &mut OrderPair) -> Option<String> {
        let (Some(sales_order), Some(order)) = (&pair.local, &pair.remote) else {
            return None;
        };
        if !sales_order.is_submitted()
            || sales_order.payment_entry.is_some()
            || sales_order.payment_attempted
        {
            return None;
        }

        let ctx = self.ctx();
        let server = match ctx.server(&pair.server) {
            Ok(server) => server,
            Err(e) => {
                warn!("[OrderReconciler] payment skipped for {}: {}", sales_order.name, e);
                return None;
            }
        };
        // The commit rewrote the ref; work on the stored copy.
        let mut fresh = match ctx.store.get_sales_order(&sales_order.name).await {
            Ok(Some(fresh)) => fresh,
            Ok(None) => return None,
            Err(e) => {
                warn!("[OrderReconciler] payment skipped for {}: {}", sales_order.name, e);
                return None;
            }
        };
        let order = order.clone();
        let outcome = PaymentReconciler::new(ctx.store.as_ref(), server)
            .reconcile(&order, &mut fresh)
            .await;
        pair.local = Some(fresh);
        outcome.note()
    }
}
