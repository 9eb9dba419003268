//! Payment posting for paid remote orders.
//!
//! Runs at most once per sales order: once the preconditions hold the order
//! is flagged as attempted whatever happens next. Failures are reported as
//! [`PaymentOutcome::Failed`] and never propagate into the order cycle.

use chrono::{NaiveDate, Utc};
use ledgerbridge_api::remote::meta_string;
use ledgerbridge_api::{
    Deduction, DocStatus, Invoice, Money, Order, PaymentEntry, PaymentReference, SalesOrder,
    SyncError, WriteOrigin,
};
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::{ProcessorMeta, ServerConfig};
use crate::core::traits::LocalStore;

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    /// Nothing to do; the reason is for the log.
    Skipped(String),
    Created {
        payment_entry: String,
        invoice: Option<String>,
    },
    Failed(SyncError),
}

impl PaymentOutcome {
    /// Human readable note for the cycle outcome, `None` for quiet skips.
    pub fn note(&self) -> Option<String> {
        match self {
            PaymentOutcome::Skipped(_) => None,
            PaymentOutcome::Created { payment_entry, .. } => {
                Some(format!("payment entry {} created", payment_entry))
            }
            PaymentOutcome::Failed(e) => Some(format!("payment posting failed: {}", e)),
        }
    }
}

pub struct PaymentReconciler<'a> {
    store: &'a dyn LocalStore,
    server: &'a ServerConfig,
}

impl<'a> PaymentReconciler<'a> {
    pub fn new(store: &'a dyn LocalStore, server: &'a ServerConfig) -> Self {
        Self { store, server }
    }

    /// Posts the payment for `sales_order` if it is due, saving the order
    /// with its link (or attempted flag) when a posting was tried.
    pub async fn reconcile(&self, order: &Order, sales_order: &mut SalesOrder) -> PaymentOutcome {
        if let Some(reason) = self.skip_reason(order, sales_order) {
            debug!(
                "[PaymentReconciler] {}: skipped ({})",
                sales_order.name, reason
            );
            return PaymentOutcome::Skipped(reason);
        }

        let reference = PaymentReference::SalesOrder(sales_order.name.clone());
        match self.store.payment_entries_for(&reference).await {
            Ok(existing) if !existing.is_empty() => {
                sales_order.payment_entry = Some(existing[0].name.clone());
                sales_order.payment_attempted = true;
                return match self.save(sales_order).await {
                    Ok(()) => PaymentOutcome::Skipped(format!(
                        "linked existing payment entry {}",
                        existing[0].name
                    )),
                    Err(e) => PaymentOutcome::Failed(e),
                };
            }
            Ok(_) => {}
            Err(e) => return PaymentOutcome::Failed(e),
        }

        sales_order.payment_attempted = true;
        let outcome = match self.post(order, sales_order).await {
            Ok((entry, invoice)) => {
                info!(
                    "[PaymentReconciler] {}: payment entry {} for {}",
                    sales_order.name, entry.name, entry.paid_amount
                );
                sales_order.payment_entry = Some(entry.name.clone());
                PaymentOutcome::Created {
                    payment_entry: entry.name,
                    invoice: invoice.map(|i| i.name),
                }
            }
            Err(e) => {
                warn!("[PaymentReconciler] {}: {}", sales_order.name, e);
                PaymentOutcome::Failed(e)
            }
        };

        match self.save(sales_order).await {
            Ok(()) => outcome,
            Err(e) => PaymentOutcome::Failed(e),
        }
    }

    fn skip_reason(&self, order: &Order, sales_order: &SalesOrder) -> Option<String> {
        let options = &self.server.payments;
        if sales_order.payment_entry.is_some() {
            return Some("payment entry already linked".into());
        }
        if sales_order.payment_attempted {
            return Some("already attempted".into());
        }
        if !sales_order.grand_total().is_positive() {
            return Some("nothing to pay".into());
        }
        if !sales_order.is_submitted() {
            return Some("sales order not submitted".into());
        }
        if !options.enable_payments_sync {
            return Some("payment sync disabled".into());
        }
        let method = match order.payment_method.as_deref().filter(|m| !m.is_empty()) {
            Some(method) => method,
            None => return Some("no payment method".into()),
        };
        if order.date_paid.is_none() && !options.ignore_date_paid {
            return Some("not paid yet".into());
        }
        if let Some(processor) = options.processors.get(method) {
            if !is_captured(processor, order) {
                return Some(format!("{} charge not captured", method));
            }
        }
        None
    }

    async fn post(
        &self,
        order: &Order,
        sales_order: &SalesOrder,
    ) -> Result<(PaymentEntry, Option<Invoice>)> {
        let options = &self.server.payments;
        let method = order.payment_method.clone().unwrap_or_default();
        let unmapped = |mapping: &str| SyncError::UnmappedPaymentMethod {
            server: self.server.id.clone(),
            method: method.clone(),
            mapping: mapping.to_string(),
        };
        let bank_account = options
            .bank_accounts
            .get(&method)
            .cloned()
            .ok_or_else(|| unmapped("bank account"))?;
        let paid_to = options
            .gl_accounts
            .get(&method)
            .cloned()
            .ok_or_else(|| unmapped("G/L account"))?;

        let paid_on: Option<NaiveDate> = order.date_paid.map(|d| d.date_naive());

        let invoice = if options.auto_create_invoice {
            let invoice = Invoice {
                name: String::new(),
                sales_order: sales_order.name.clone(),
                customer: sales_order.customer.clone(),
                posting_date: paid_on.unwrap_or_else(|| Utc::now().date_naive()),
                grand_total: sales_order.grand_total(),
                cost_center: options.cost_center.clone(),
                docstatus: DocStatus::Submitted,
            };
            Some(self.store.create_invoice(invoice).await?)
        } else {
            None
        };

        let (paid_amount, deductions) = self.amounts(order, &method)?;
        let entry = PaymentEntry {
            name: String::new(),
            party: sales_order.customer.clone(),
            reference: match &invoice {
                Some(invoice) => PaymentReference::SalesInvoice(invoice.name.clone()),
                None => PaymentReference::SalesOrder(sales_order.name.clone()),
            },
            mode_of_payment: sales_order
                .payment_method
                .clone()
                .unwrap_or_else(|| method.clone()),
            bank_account,
            paid_to,
            paid_amount,
            received_amount: paid_amount,
            deductions,
            reference_no: self.reference_no(order, &method),
            reference_date: paid_on.unwrap_or(sales_order.transaction_date),
            docstatus: DocStatus::Submitted,
        };
        let entry = self.store.create_payment_entry(entry).await?;
        Ok((entry, invoice))
    }

    /// Net of processor fees when the fee can be booked, else the order total.
    fn amounts(&self, order: &Order, method: &str) -> Result<(Money, Vec<Deduction>)> {
        let options = &self.server.payments;
        let processor = options.processors.get(method);
        let fee_account = options.fee_accounts.get(method);

        let meta_money = |key: Option<&String>| -> Result<Option<Money>> {
            match key.and_then(|k| meta_string(&order.meta_data, k)) {
                Some(raw) => raw.parse::<Money>().map(Some).map_err(|e| {
                    SyncError::reconciliation(format!(
                        "Order {}: unreadable processor amount '{}': {}",
                        order.id, raw, e
                    ))
                }),
                None => Ok(None),
            }
        };

        let (Some(processor), Some(fee_account)) = (processor, fee_account) else {
            return Ok((order.total, Vec::new()));
        };
        let Some(fee) = meta_money(processor.fee_key.as_ref())? else {
            return Ok((order.total, Vec::new()));
        };
        let net = meta_money(processor.net_key.as_ref())?.unwrap_or(order.total - fee);
        Ok((
            net,
            vec![Deduction {
                account: fee_account.clone(),
                cost_center: options.cost_center.clone(),
                amount: fee,
            }],
        ))
    }

    fn reference_no(&self, order: &Order, method: &str) -> String {
        if let Some(id) = order.transaction_id.as_deref().filter(|t| !t.is_empty()) {
            return id.to_string();
        }
        for key in &self.server.payments.reference_meta_keys {
            if let Some(value) = meta_string(&order.meta_data, key) {
                return value;
            }
        }
        order
            .payment_method_title
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| method.to_string())
    }

    async fn save(&self, sales_order: &mut SalesOrder) -> Result<()> {
        let saved = self
            .store
            .save_sales_order(sales_order.clone(), WriteOrigin::Sync)
            .await?;
        *sales_order = saved;
        Ok(())
    }
}

fn is_captured(processor: &ProcessorMeta, order: &Order) -> bool {
    match &processor.captured_key {
        Some(key) => meta_string(&order.meta_data, key).as_deref() == Some(processor.captured_value.as_str()),
        None => true,
    }
}
