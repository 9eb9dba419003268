//! Documents owned by the local system of record.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Money, RemoteId, ServerId};

/// Link from a local record to its mirror on one remote server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedRemoteRef {
    pub server: ServerId,
    #[serde(default)]
    pub remote_id: Option<RemoteId>,
    /// Remote `date_modified` observed at the last successful cycle.
    #[serde(default)]
    pub last_sync_marker: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl LinkedRemoteRef {
    /// A ref that is waiting for its remote counterpart to be created.
    pub fn pending(server: ServerId) -> Self {
        Self {
            server,
            remote_id: None,
            last_sync_marker: None,
            enabled: true,
        }
    }

    pub fn linked(server: ServerId, remote_id: RemoteId) -> Self {
        Self {
            server,
            remote_id: Some(remote_id),
            last_sync_marker: None,
            enabled: true,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.remote_id.map(|id| !id.is_unassigned()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemVariantAttribute {
    pub attribute: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub code: String,
    pub item_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub stock_uom: String,
    #[serde(default)]
    pub item_group: Option<String>,
    #[serde(default = "default_true")]
    pub is_stock_item: bool,
    #[serde(default)]
    pub has_variants: bool,
    #[serde(default)]
    pub variant_of: Option<String>,
    #[serde(default)]
    pub attributes: Vec<ItemVariantAttribute>,
    /// File URL of the primary image attachment.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub remote_refs: Vec<LinkedRemoteRef>,
    /// Site-specific fields addressable through field mappings.
    #[serde(default)]
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl Item {
    pub fn new(code: impl Into<String>, item_name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            item_name: item_name.into(),
            description: None,
            stock_uom: "Nos".to_string(),
            item_group: None,
            is_stock_item: true,
            has_variants: false,
            variant_of: None,
            attributes: Vec::new(),
            image: None,
            disabled: false,
            modified: Utc::now(),
            remote_refs: Vec::new(),
            custom: BTreeMap::new(),
        }
    }

    pub fn ref_for(&self, server: &ServerId) -> Option<&LinkedRemoteRef> {
        self.remote_refs.iter().find(|r| &r.server == server)
    }

    pub fn ref_for_mut(&mut self, server: &ServerId) -> Option<&mut LinkedRemoteRef> {
        self.remote_refs.iter_mut().find(|r| &r.server == server)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAttributeValue {
    pub value: String,
    pub abbr: String,
}

/// Attribute definition shared by variant items (e.g. "Colour").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAttribute {
    pub name: String,
    #[serde(default)]
    pub values: Vec<ItemAttributeValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPrice {
    pub item_code: String,
    pub price_list: String,
    pub rate: Money,
    #[serde(default)]
    pub valid_upto: Option<NaiveDate>,
}

impl ItemPrice {
    pub fn is_valid_on(&self, day: NaiveDate) -> bool {
        self.valid_upto.map(|upto| upto >= day).unwrap_or(true)
    }
}

/// A file attached to a local document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub attached_to: String,
    pub file_name: String,
    pub file_url: String,
    #[serde(default)]
    pub is_private: bool,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocStatus {
    #[default]
    Draft,
    Submitted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesOrderLine {
    pub item_code: String,
    pub item_name: String,
    pub qty: f64,
    pub rate: Money,
    #[serde(default)]
    pub discount_percentage: f64,
    #[serde(default)]
    pub delivery_date: Option<NaiveDate>,
    #[serde(default)]
    pub warehouse: Option<String>,
}

impl SalesOrderLine {
    pub fn amount(&self) -> Money {
        let gross = self.rate.mul_qty(self.qty);
        gross - gross.percent(self.discount_percentage)
    }
}

/// One "Actual" charge row on a sales order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxRow {
    pub account_head: String,
    pub description: String,
    pub tax_amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesOrder {
    pub name: String,
    pub customer: String,
    #[serde(default)]
    pub po_no: Option<String>,
    #[serde(default)]
    pub remote_ref: Option<LinkedRemoteRef>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub docstatus: DocStatus,
    /// Local label of the remote order status ("Processing", "Shipped", ...).
    #[serde(default)]
    pub remote_status: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    pub transaction_date: NaiveDate,
    #[serde(default)]
    pub delivery_date: Option<NaiveDate>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub shipping_rule: Option<String>,
    #[serde(default)]
    pub taxes_and_charges: Option<String>,
    #[serde(default)]
    pub customer_address: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<String>,
    #[serde(default)]
    pub items: Vec<SalesOrderLine>,
    #[serde(default)]
    pub taxes: Vec<TaxRow>,
    #[serde(default)]
    pub disable_rounded_total: bool,
    #[serde(default)]
    pub payment_entry: Option<String>,
    #[serde(default)]
    pub payment_attempted: bool,
}

impl SalesOrder {
    pub fn net_total(&self) -> Money {
        self.items.iter().map(SalesOrderLine::amount).sum()
    }

    pub fn tax_total(&self) -> Money {
        self.taxes.iter().map(|t| t.tax_amount).sum()
    }

    pub fn grand_total(&self) -> Money {
        self.net_total() + self.tax_total()
    }

    pub fn is_submitted(&self) -> bool {
        self.docstatus == DocStatus::Submitted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerType {
    Company,
    Individual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub customer_name: String,
    /// Stable identity derived from the remote order (email, guest id, ...).
    pub identifier: String,
    pub customer_type: CustomerType,
    #[serde(default)]
    pub is_guest: bool,
    #[serde(default)]
    pub tax_id: Option<String>,
    #[serde(default)]
    pub primary_address: Option<String>,
    #[serde(default)]
    pub primary_contact: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressType {
    Billing,
    Shipping,
}

impl AddressType {
    pub fn label(&self) -> &'static str {
        match self {
            AddressType::Billing => "Billing",
            AddressType::Shipping => "Shipping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub title: String,
    pub address_type: AddressType,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub pincode: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub is_shipping: bool,
    /// Customers this address is linked to.
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub name: String,
    pub sales_order: String,
    pub customer: String,
    pub posting_date: NaiveDate,
    pub grand_total: Money,
    #[serde(default)]
    pub cost_center: Option<String>,
    #[serde(default)]
    pub docstatus: DocStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "doctype", content = "name")]
pub enum PaymentReference {
    SalesInvoice(String),
    SalesOrder(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deduction {
    pub account: String,
    #[serde(default)]
    pub cost_center: Option<String>,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEntry {
    pub name: String,
    pub party: String,
    pub reference: PaymentReference,
    pub mode_of_payment: String,
    pub bank_account: String,
    pub paid_to: String,
    pub paid_amount: Money,
    pub received_amount: Money,
    #[serde(default)]
    pub deductions: Vec<Deduction>,
    pub reference_no: String,
    pub reference_date: NaiveDate,
    #[serde(default)]
    pub docstatus: DocStatus,
}
