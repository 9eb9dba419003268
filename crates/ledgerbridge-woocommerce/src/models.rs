//! WooCommerce REST (v3) and WordPress media payloads.
//!
//! The remote encodes "no value" as `0` for ids and `""` for strings, sends
//! timestamps as naive GMT strings, and quantities as integers. These wire
//! types absorb that and convert to and from the shared domain records.

use chrono::{DateTime, NaiveDateTime, Utc};
use ledgerbridge_api::{
    AddressBlock, ImageRef, MediaAsset, MetaEntry, Money, Order, OrderLineItem,
    OrderShippingLine, OrderTaxLine, Product, ProductAttribute, ProductType, RemoteId, ServerId,
};
use serde::{Deserialize, Serialize};

const GMT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn parse_gmt(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(value, GMT_FORMAT)
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|d| d.with_timezone(&Utc)))
        .ok()
}

pub fn format_gmt(at: DateTime<Utc>) -> String {
    at.format(GMT_FORMAT).to_string()
}

fn non_empty(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

fn remote_id(id: u64) -> Option<RemoteId> {
    (id != 0).then_some(RemoteId(id))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WcMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub key: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl From<WcMeta> for MetaEntry {
    fn from(meta: WcMeta) -> Self {
        MetaEntry {
            id: meta.id,
            key: meta.key,
            value: meta.value,
        }
    }
}

impl From<&MetaEntry> for WcMeta {
    fn from(meta: &MetaEntry) -> Self {
        WcMeta {
            id: meta.id,
            key: meta.key.clone(),
            value: meta.value.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WcImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_created: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WcAttribute {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub variation: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option: Option<String>,
}

/// A product or variation as returned by `products/<id>`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WcProduct {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sku: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub parent_id: u64,
    #[serde(default)]
    pub regular_price: String,
    #[serde(default)]
    pub manage_stock: serde_json::Value,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub weight: String,
    #[serde(default)]
    pub date_created_gmt: Option<String>,
    #[serde(default)]
    pub date_modified_gmt: Option<String>,
    #[serde(default)]
    pub images: Vec<WcImage>,
    /// Variations return a single `image` instead of `images`.
    #[serde(default)]
    pub image: Option<WcImage>,
    #[serde(default)]
    pub attributes: Vec<WcAttribute>,
    #[serde(default)]
    pub meta_data: Vec<WcMeta>,
}

fn product_type(kind: Option<&str>, parent_id: u64) -> ProductType {
    match kind {
        Some("variable") => ProductType::Variable,
        Some("variation") => ProductType::Variation,
        Some("grouped") => ProductType::Grouped,
        Some("external") => ProductType::External,
        Some(_) => ProductType::Simple,
        None if parent_id != 0 => ProductType::Variation,
        None => ProductType::Simple,
    }
}

impl WcProduct {
    pub fn into_product(self, server: &ServerId) -> Product {
        let kind = product_type(self.kind.as_deref(), self.parent_id);
        let mut images = self.images;
        if images.is_empty() {
            images.extend(self.image.filter(|img| !img.src.is_empty() || img.id.is_some()));
        }
        Product {
            id: RemoteId(self.id),
            server: server.clone(),
            name: self.name,
            sku: non_empty(self.sku),
            kind,
            status: self.status,
            parent_id: remote_id(self.parent_id),
            regular_price: non_empty(self.regular_price).and_then(|p| p.parse::<Money>().ok()),
            // Variations report "parent" when stock is managed on the parent.
            manage_stock: matches!(self.manage_stock, serde_json::Value::Bool(true)),
            description: non_empty(self.description),
            short_description: non_empty(self.short_description),
            weight: non_empty(self.weight),
            date_created: parse_gmt(self.date_created_gmt.as_deref()),
            date_modified: parse_gmt(self.date_modified_gmt.as_deref()),
            images: images
                .into_iter()
                .map(|img| ImageRef {
                    id: img.id.filter(|id| *id != 0),
                    src: img.src,
                    date_created: img.date_created,
                })
                .collect(),
            attributes: self
                .attributes
                .into_iter()
                .map(|a| ProductAttribute {
                    name: a.name,
                    slug: a.slug,
                    visible: a.visible,
                    variation: a.variation,
                    options: a.options,
                    option: a.option,
                })
                .collect(),
            meta_data: self.meta_data.into_iter().map(MetaEntry::from).collect(),
        }
    }
}

/// Body for creating or updating a product. Variations are written to
/// `products/<parent>/variations` and take a single `image`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WcProductWrite {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub regular_price: String,
    pub manage_stock: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<WcImage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<WcImage>,
    pub attributes: Vec<WcAttribute>,
    pub meta_data: Vec<WcMeta>,
}

fn wire_image(img: &ImageRef) -> WcImage {
    match img.id {
        // A library id is enough; sending src too would sideload a copy.
        Some(id) => WcImage {
            id: Some(id),
            ..Default::default()
        },
        None => WcImage {
            id: None,
            src: img.src.clone(),
            date_created: None,
        },
    }
}

impl From<&Product> for WcProductWrite {
    fn from(product: &Product) -> Self {
        let is_variation = product.kind == ProductType::Variation;
        WcProductWrite {
            name: (!is_variation).then(|| product.name.clone()),
            kind: (!is_variation).then(|| product.kind.as_str()),
            status: product.status.clone(),
            sku: product.sku.clone(),
            regular_price: product
                .regular_price
                .map(|p| p.to_string())
                .unwrap_or_else(|| "0".to_string()),
            manage_stock: product.manage_stock,
            description: product.description.clone(),
            short_description: product.short_description.clone(),
            weight: product.weight.clone(),
            images: (!is_variation).then(|| product.images.iter().map(wire_image).collect()),
            image: if is_variation {
                product.images.first().map(wire_image)
            } else {
                None
            },
            attributes: product
                .attributes
                .iter()
                .map(|a| WcAttribute {
                    name: a.name.clone(),
                    slug: a.slug.clone(),
                    visible: a.visible,
                    variation: a.variation,
                    options: a.options.clone(),
                    option: a.option.clone(),
                })
                .collect(),
            meta_data: product.meta_data.iter().map(WcMeta::from).collect(),
        }
    }
}

/// Billing or shipping block. The remote rejects `null` strings, so absent
/// contact fields travel as empty strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WcAddress {
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: String,
    #[serde(default, skip_serializing)]
    pub vat_id: String,
}

impl From<WcAddress> for AddressBlock {
    fn from(a: WcAddress) -> Self {
        AddressBlock {
            first_name: a.first_name,
            last_name: a.last_name,
            company: a.company,
            address_1: a.address_1,
            address_2: a.address_2,
            city: a.city,
            state: a.state,
            postcode: a.postcode,
            country: a.country,
            email: a.email.and_then(non_empty),
            phone: non_empty(a.phone),
            vat_id: non_empty(a.vat_id),
        }
    }
}

impl From<&AddressBlock> for WcAddress {
    fn from(a: &AddressBlock) -> Self {
        WcAddress {
            first_name: a.first_name.clone(),
            last_name: a.last_name.clone(),
            company: a.company.clone(),
            address_1: a.address_1.clone(),
            address_2: a.address_2.clone(),
            city: a.city.clone(),
            state: a.state.clone(),
            postcode: a.postcode.clone(),
            country: a.country.clone(),
            email: a.email.clone(),
            phone: a.phone.clone().unwrap_or_default(),
            vat_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WcLineItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// `null` on an existing line removes it.
    #[serde(default)]
    pub product_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<u64>,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default, skip_serializing)]
    pub price: Money,
    #[serde(default)]
    pub subtotal: Money,
    #[serde(default, skip_serializing)]
    pub subtotal_tax: Money,
    #[serde(default)]
    pub total: Money,
    #[serde(default, skip_serializing)]
    pub total_tax: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

impl From<WcLineItem> for OrderLineItem {
    fn from(line: WcLineItem) -> Self {
        OrderLineItem {
            id: line.id.and_then(remote_id),
            name: line.name,
            product_id: line.product_id.map(RemoteId),
            variation_id: line.variation_id.and_then(remote_id),
            quantity: line.quantity,
            price: line.price,
            subtotal: line.subtotal,
            subtotal_tax: line.subtotal_tax,
            total: line.total,
            total_tax: line.total_tax,
            sku: line.sku.and_then(non_empty),
        }
    }
}

impl From<&OrderLineItem> for WcLineItem {
    fn from(line: &OrderLineItem) -> Self {
        WcLineItem {
            id: line.id.map(|id| id.0),
            name: line.name.clone(),
            product_id: line.product_id.map(|id| id.0),
            variation_id: line.variation_id.map(|id| id.0),
            quantity: line.quantity.round(),
            price: line.price,
            subtotal: line.subtotal,
            subtotal_tax: line.subtotal_tax,
            total: line.total,
            total_tax: line.total_tax,
            sku: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WcTaxLine {
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

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WcShippingLine {
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

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WcOrder {
    pub id: u64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub date_created_gmt: Option<String>,
    #[serde(default)]
    pub date_modified_gmt: Option<String>,
    #[serde(default)]
    pub date_paid_gmt: Option<String>,
    #[serde(default)]
    pub customer_id: u64,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub payment_method_title: String,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub total: Money,
    #[serde(default)]
    pub shipping_total: Money,
    #[serde(default)]
    pub shipping_tax: Money,
    #[serde(default)]
    pub billing: WcAddress,
    #[serde(default)]
    pub shipping: WcAddress,
    #[serde(default)]
    pub line_items: Vec<WcLineItem>,
    #[serde(default)]
    pub tax_lines: Vec<WcTaxLine>,
    #[serde(default)]
    pub shipping_lines: Vec<WcShippingLine>,
    #[serde(default)]
    pub meta_data: Vec<WcMeta>,
}

impl WcOrder {
    pub fn into_order(self, server: &ServerId) -> Order {
        Order {
            id: RemoteId(self.id),
            server: server.clone(),
            status: self.status,
            currency: non_empty(self.currency),
            date_created: parse_gmt(self.date_created_gmt.as_deref()),
            date_modified: parse_gmt(self.date_modified_gmt.as_deref()),
            date_paid: parse_gmt(self.date_paid_gmt.as_deref()),
            customer_id: (self.customer_id != 0).then_some(self.customer_id),
            payment_method: non_empty(self.payment_method),
            payment_method_title: non_empty(self.payment_method_title),
            transaction_id: non_empty(self.transaction_id),
            total: self.total,
            shipping_total: self.shipping_total,
            shipping_tax: self.shipping_tax,
            billing: self.billing.into(),
            shipping: self.shipping.into(),
            line_items: self.line_items.into_iter().map(OrderLineItem::from).collect(),
            tax_lines: self
                .tax_lines
                .into_iter()
                .map(|t| OrderTaxLine {
                    id: t.id,
                    rate_id: t.rate_id,
                    rate_code: t.rate_code,
                    label: t.label,
                    tax_total: t.tax_total,
                    shipping_tax_total: t.shipping_tax_total,
                })
                .collect(),
            shipping_lines: self
                .shipping_lines
                .into_iter()
                .map(|s| OrderShippingLine {
                    id: s.id,
                    method_title: s.method_title,
                    method_id: s.method_id,
                    total: s.total,
                    total_tax: s.total_tax,
                })
                .collect(),
            meta_data: self.meta_data.into_iter().map(MetaEntry::from).collect(),
        }
    }
}

/// Writable subset of an order. Totals are recomputed by the remote from
/// the line items.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WcOrderWrite {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing: Option<WcAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping: Option<WcAddress>,
    pub line_items: Vec<WcLineItem>,
    pub meta_data: Vec<WcMeta>,
}

fn filled(address: &AddressBlock) -> Option<WcAddress> {
    (*address != AddressBlock::default()).then(|| WcAddress::from(address))
}

impl From<&Order> for WcOrderWrite {
    fn from(order: &Order) -> Self {
        WcOrderWrite {
            status: order.status.clone(),
            currency: order.currency.clone(),
            customer_id: order.customer_id,
            payment_method: order.payment_method.clone(),
            payment_method_title: order.payment_method_title.clone(),
            billing: filled(&order.billing),
            shipping: filled(&order.shipping),
            line_items: order.line_items.iter().map(WcLineItem::from).collect(),
            meta_data: order.meta_data.iter().map(WcMeta::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WpRendered {
    #[serde(default)]
    pub rendered: String,
}

/// Entry of the WordPress media library (`wp/v2/media`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WpMedia {
    pub id: u64,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub title: Option<WpRendered>,
}

impl From<WpMedia> for MediaAsset {
    fn from(media: WpMedia) -> Self {
        MediaAsset {
            id: media.id,
            source_url: media.source_url,
            title: media.title.and_then(|t| non_empty(t.rendered)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server() -> ServerId {
        ServerId::new("shop.example.com")
    }

    #[test]
    fn test_product_payload_converts() {
        let wire: WcProduct = serde_json::from_value(json!({
            "id": 17,
            "name": "Widget",
            "sku": "",
            "type": "simple",
            "status": "publish",
            "parent_id": 0,
            "regular_price": "12.50",
            "manage_stock": true,
            "description": "",
            "date_created_gmt": "2024-03-01T10:00:00",
            "date_modified_gmt": "2024-03-02T11:30:15",
            "images": [{"id": 5, "src": "https://shop.example.com/w.jpg"}],
            "attributes": [],
            "meta_data": [{"id": 1, "key": "custom_field", "value": "x"}]
        }))
        .unwrap();
        let product = wire.into_product(&server());

        assert_eq!(product.id, RemoteId(17));
        assert_eq!(product.sku, None);
        assert_eq!(product.parent_id, None);
        assert_eq!(product.regular_price, Some(Money::from_cents(1250)));
        assert!(product.manage_stock);
        assert_eq!(product.description, None);
        assert_eq!(
            product.date_modified.map(format_gmt).as_deref(),
            Some("2024-03-02T11:30:15")
        );
        assert_eq!(product.images[0].id, Some(5));
        assert_eq!(product.meta_data[0].key, "custom_field");
    }

    #[test]
    fn test_variation_payload_uses_single_image_and_parent() {
        let wire: WcProduct = serde_json::from_value(json!({
            "id": 18,
            "parent_id": 17,
            "manage_stock": "parent",
            "image": {"id": 9, "src": "https://shop.example.com/r.jpg"},
            "attributes": [{"name": "Colour", "option": "Red"}]
        }))
        .unwrap();
        let product = wire.into_product(&server());

        assert_eq!(product.kind, ProductType::Variation);
        assert_eq!(product.parent_id, Some(RemoteId(17)));
        assert!(!product.manage_stock);
        assert_eq!(product.images.len(), 1);
        assert_eq!(product.attributes[0].option.as_deref(), Some("Red"));
    }

    #[test]
    fn test_variation_write_omits_name_and_gallery() {
        let mut product = Product::draft(server(), "Shirt Red");
        product.kind = ProductType::Variation;
        product.parent_id = Some(RemoteId(17));
        product.images = vec![ImageRef {
            id: None,
            src: "https://erp.example.com/files/r.jpg".into(),
            date_created: None,
        }];
        let body = serde_json::to_value(WcProductWrite::from(&product)).unwrap();

        assert!(body.get("name").is_none());
        assert!(body.get("type").is_none());
        assert!(body.get("images").is_none());
        assert_eq!(body["image"]["src"], "https://erp.example.com/files/r.jpg");
        assert_eq!(body["regular_price"], "0");
    }

    #[test]
    fn test_library_images_are_sent_by_id_only() {
        let mut product = Product::draft(server(), "Widget");
        product.images = vec![ImageRef {
            id: Some(44),
            src: "https://shop.example.com/uploads/w.jpg".into(),
            date_created: None,
        }];
        let body = serde_json::to_value(WcProductWrite::from(&product)).unwrap();
        assert_eq!(body["images"], json!([{"id": 44, "src": ""}]));
        assert_eq!(body["type"], "simple");
    }

    #[test]
    fn test_order_payload_converts() {
        let wire: WcOrder = serde_json::from_value(json!({
            "id": 1001,
            "status": "processing",
            "currency": "EUR",
            "date_created_gmt": "2024-03-01T10:00:00",
            "date_modified_gmt": "2024-03-01T10:05:00",
            "date_paid_gmt": null,
            "customer_id": 0,
            "payment_method": "bacs",
            "payment_method_title": "Direct bank transfer",
            "transaction_id": "",
            "total": "110.00",
            "shipping_total": "0.00",
            "shipping_tax": "0.00",
            "billing": {"first_name": "Ada", "email": "ada@example.com", "phone": ""},
            "shipping": {},
            "line_items": [{
                "id": 7, "name": "Widget", "product_id": 17, "variation_id": 0,
                "quantity": 1, "price": 100, "subtotal": "100.00", "subtotal_tax": "10.00",
                "total": "100.00", "total_tax": "10.00", "sku": ""
            }],
            "tax_lines": [{"id": 3, "rate_code": "VAT-1", "rate_id": 1, "label": "VAT",
                           "tax_total": "10.00", "shipping_tax_total": "0.00"}],
            "shipping_lines": [],
            "meta_data": [{"id": 2, "key": "_stripe_fee", "value": 1.23}]
        }))
        .unwrap();
        let order = wire.into_order(&server());

        assert!(order.is_guest());
        assert_eq!(order.date_paid, None);
        assert_eq!(order.transaction_id, None);
        assert_eq!(order.total, Money::from_units(110));
        assert_eq!(order.billing.email.as_deref(), Some("ada@example.com"));
        assert_eq!(order.billing.phone, None);
        let line = &order.line_items[0];
        assert_eq!(line.variation_id, None);
        assert_eq!(line.effective_product_id(), Some(RemoteId(17)));
        assert_eq!(line.price, Money::from_units(100));
        assert_eq!(order.tax_lines[0].rate_id, Some(1));
    }

    #[test]
    fn test_removed_line_serializes_null_product() {
        let mut order = Order::draft(server(), "processing");
        order.line_items = vec![
            OrderLineItem {
                id: Some(RemoteId(7)),
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
            },
        ];
        let body = serde_json::to_value(WcOrderWrite::from(&order)).unwrap();
        assert_eq!(body["line_items"][0]["id"], 7);
        assert!(body["line_items"][0]["product_id"].is_null());
        assert!(body.get("billing").is_none());
    }

    #[test]
    fn test_gmt_parsing_accepts_offsets_and_blanks() {
        assert_eq!(parse_gmt(Some("")), None);
        assert_eq!(parse_gmt(None), None);
        assert_eq!(
            parse_gmt(Some("2024-03-01T10:00:00+00:00")),
            parse_gmt(Some("2024-03-01T10:00:00"))
        );
    }

    mod props {
        use super::*;
        use chrono::TimeZone;
        use proptest::prelude::*;

        proptest! {
            // Sweep cursors are sent at second precision; what the shop echoes back must compare equal.
            #[test]
            fn gmt_timestamps_survive_the_wire(secs in 0i64..4_102_444_800) {
                let at = Utc.timestamp_opt(secs, 0).single().unwrap();
                prop_assert_eq!(parse_gmt(Some(&format_gmt(at))), Some(at));
            }
        }
    }
}
