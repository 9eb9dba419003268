//! Records owned by the remote commerce platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Money, RemoteId, ServerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    #[default]
    Simple,
    Variable,
    Variation,
    Grouped,
    External,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Simple => "simple",
            ProductType::Variable => "variable",
            ProductType::Variation => "variation",
            ProductType::Grouped => "grouped",
            ProductType::External => "external",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Media library id; absent for images the remote should sideload from `src`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_created: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductAttribute {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub variation: bool,
    /// Option list on variable products.
    #[serde(default)]
    pub options: Vec<String>,
    /// Chosen option on variations.
    #[serde(default)]
    pub option: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEntry {
    #[serde(default)]
    pub id: Option<u64>,
    pub key: String,
    pub value: serde_json::Value,
}

pub fn meta_value<'a>(meta: &'a [MetaEntry], key: &str) -> Option<&'a serde_json::Value> {
    meta.iter().find(|m| m.key == key).map(|m| &m.value)
}

/// Meta value rendered as a string, whether it was stored as text or number.
pub fn meta_string(meta: &[MetaEntry], key: &str) -> Option<String> {
    match meta_value(meta, key)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: RemoteId,
    pub server: ServerId,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub kind: ProductType,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub parent_id: Option<RemoteId>,
    #[serde(default)]
    pub regular_price: Option<Money>,
    #[serde(default)]
    pub manage_stock: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub weight: Option<String>,
    #[serde(default)]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    #[serde(default)]
    pub attributes: Vec<ProductAttribute>,
    #[serde(default)]
    pub meta_data: Vec<MetaEntry>,
}

impl Product {
    /// An unsaved product for `server`.
    pub fn draft(server: ServerId, name: impl Into<String>) -> Self {
        Self {
            id: RemoteId::UNASSIGNED,
            server,
            name: name.into(),
            sku: None,
            kind: ProductType::Simple,
            status: None,
            parent_id: None,
            regular_price: None,
            manage_stock: false,
            description: None,
            short_description: None,
            weight: None,
            date_created: None,
            date_modified: None,
            images: Vec::new(),
            attributes: Vec::new(),
            meta_data: Vec::new(),
        }
    }

    pub fn set_meta(&mut self, key: &str, value: serde_json::Value) {
        match self.meta_data.iter_mut().find(|m| m.key == key) {
            Some(entry) => entry.value = value,
            None => self.meta_data.push(MetaEntry {
                id: None,
                key: key.to_string(),
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressBlock {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub address_1: String,
    #[serde(default)]
    pub address_2: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub postcode: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub vat_id: Option<String>,
}

impl AddressBlock {
    /// Compares the postal part of two blocks; contact fields are ignored.
    pub fn same_location(&self, other: &AddressBlock) -> bool {
        self.first_name == other.first_name
            && self.last_name == other.last_name
            && self.company == other.company
            && self.address_1 == other.address_1
            && self.address_2 == other.address_2
            && self.city == other.city
            && self.state == other.state
            && self.postcode == other.postcode
            && self.country == other.country
    }

    pub fn full_name(&self) -> Option<String> {
        let name = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLineItem {
    #[serde(default)]
    pub id: Option<RemoteId>,
    #[serde(default)]
    pub name: String,
    /// `None` on an existing line id removes that line on write.
    #[serde(default)]
    pub product_id: Option<RemoteId>,
    #[serde(default)]
    pub variation_id: Option<RemoteId>,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub price: Money,
    #[serde(default)]
    pub subtotal: Money,
    #[serde(default)]
    pub subtotal_tax: Money,
    #[serde(default)]
    pub total: Money,
    #[serde(default)]
    pub total_tax: Money,
    #[serde(default)]
    pub sku: Option<String>,
}

impl OrderLineItem {
    /// The product this line sells: the variation when there is one.
    pub fn effective_product_id(&self) -> Option<RemoteId> {
        self.variation_id
            .filter(|id| !id.is_unassigned())
            .or(self.product_id)
    }

    /// Unit price including line tax.
    pub fn tax_inclusive_price(&self) -> Money {
        (self.subtotal + self.subtotal_tax).div_qty(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTaxLine {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub rate_id: Option<u64>,
    #[serde(default)]
    pub rate_code: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub tax_total: Money,
    #[serde(default)]
    pub shipping_tax_total: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderShippingLine {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method_title: String,
    #[serde(default)]
    pub method_id: String,
    #[serde(default)]
    pub total: Money,
    #[serde(default)]
    pub total_tax: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: RemoteId,
    pub server: ServerId,
    pub status: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_paid: Option<DateTime<Utc>>,
    /// Zero or absent for guest checkouts.
    #[serde(default)]
    pub customer_id: Option<u64>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_method_title: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub total: Money,
    #[serde(default)]
    pub shipping_total: Money,
    #[serde(default)]
    pub shipping_tax: Money,
    #[serde(default)]
    pub billing: AddressBlock,
    #[serde(default)]
    pub shipping: AddressBlock,
    #[serde(default)]
    pub line_items: Vec<OrderLineItem>,
    #[serde(default)]
    pub tax_lines: Vec<OrderTaxLine>,
    #[serde(default)]
    pub shipping_lines: Vec<OrderShippingLine>,
    #[serde(default)]
    pub meta_data: Vec<MetaEntry>,
}

impl Order {
    pub fn draft(server: ServerId, status: impl Into<String>) -> Self {
        Self {
            id: RemoteId::UNASSIGNED,
            server,
            status: status.into(),
            currency: None,
            date_created: None,
            date_modified: None,
            date_paid: None,
            customer_id: None,
            payment_method: None,
            payment_method_title: None,
            transaction_id: None,
            total: Money::ZERO,
            shipping_total: Money::ZERO,
            shipping_tax: Money::ZERO,
            billing: AddressBlock::default(),
            shipping: AddressBlock::default(),
            line_items: Vec::new(),
            tax_lines: Vec::new(),
            shipping_lines: Vec::new(),
            meta_data: Vec::new(),
        }
    }

    pub fn is_guest(&self) -> bool {
        self.customer_id.unwrap_or(0) == 0
    }
}

/// An entry in the remote media library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: u64,
    pub source_url: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_product_prefers_variation() {
        let mut line = OrderLineItem {
            id: None,
            name: "Shirt".into(),
            product_id: Some(RemoteId(10)),
            variation_id: Some(RemoteId(0)),
            quantity: 2.0,
            price: Money::from_units(10),
            subtotal: Money::from_units(20),
            subtotal_tax: Money::from_units(3),
            total: Money::from_units(20),
            total_tax: Money::from_units(3),
            sku: None,
        };
        assert_eq!(line.effective_product_id(), Some(RemoteId(10)));
        line.variation_id = Some(RemoteId(11));
        assert_eq!(line.effective_product_id(), Some(RemoteId(11)));
        assert_eq!(line.tax_inclusive_price(), Money::from_cents(1150));
    }

    #[test]
    fn test_meta_string_handles_numbers() {
        let meta = vec![
            MetaEntry {
                id: None,
                key: "_stripe_fee".into(),
                value: serde_json::json!(1.23),
            },
            MetaEntry {
                id: None,
                key: "empty".into(),
                value: serde_json::json!(""),
            },
        ];
        assert_eq!(meta_string(&meta, "_stripe_fee").as_deref(), Some("1.23"));
        assert_eq!(meta_string(&meta, "empty"), None);
        assert_eq!(meta_string(&meta, "missing"), None);
    }

    #[test]
    fn test_same_location_ignores_contact_fields() {
        let billing = AddressBlock {
            first_name: "Ada".into(),
            address_1: "1 Main St".into(),
            city: "Springfield".into(),
            email: Some("ada@example.com".into()),
            ..Default::default()
        };
        let mut shipping = billing.clone();
        shipping.email = None;
        assert!(billing.same_location(&shipping));
        shipping.city = "Shelbyville".into();
        assert!(!billing.same_location(&shipping));
    }
}
