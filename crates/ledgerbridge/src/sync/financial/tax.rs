//! Tax, shipping and rounding rows for inbound orders.
//!
//! Rows are keyed by `(account, description)` and overwritten in place, so
//! running the synthesis again over the same remote order never grows the
//! table.

use ledgerbridge_api::{Money, Order, OrderTaxLine, SalesOrder, SyncError, TaxRow};
use tracing::{debug, warn};

use crate::Result;
use crate::config::ServerConfig;

pub const SHIPPING_TOTAL: &str = "Shipping Total";
pub const SHIPPING_TAX: &str = "Shipping Tax";
pub const ROUNDING_ADJUSTMENT: &str = "Rounding Adjustment";

/// Account for a remote tax line: by remote rate id, then by tax name, then
/// by billing country, then the server default.
pub fn resolve_tax_account(
    server: &ServerConfig,
    line: &OrderTaxLine,
    billing_country: &str,
) -> Result<String> {
    let map = &server.orders.tax_map;

    let by_id = line
        .rate_id
        .and_then(|id| map.iter().find(|m| m.remote_tax_id == Some(id)));
    let by_name = || {
        map.iter().find(|m| {
            m.tax_name
                .as_deref()
                .map(|name| name == line.rate_code || name == line.label)
                .unwrap_or(false)
        })
    };
    let by_country = || {
        (!billing_country.is_empty())
            .then(|| {
                map.iter().find(|m| {
                    m.country
                        .as_deref()
                        .map(|c| c.eq_ignore_ascii_case(billing_country))
                        .unwrap_or(false)
                })
            })
            .flatten()
    };

    if let Some(mapping) = by_id.or_else(by_name).or_else(by_country) {
        return Ok(mapping.account.clone());
    }
    server
        .orders
        .tax_account
        .clone()
        .ok_or_else(|| SyncError::UnmappedTaxAccount {
            server: server.id.clone(),
            label: line_label(line).to_string(),
        })
}

fn line_label(line: &OrderTaxLine) -> &str {
    if line.label.is_empty() {
        &line.rate_code
    } else {
        &line.label
    }
}

/// Sets the amount of the `(account, description)` row, appending it when absent.
pub fn upsert_tax_row(rows: &mut Vec<TaxRow>, account: &str, description: &str, amount: Money) {
    match rows
        .iter_mut()
        .find(|r| r.account_head == account && r.description == description)
    {
        Some(row) => row.tax_amount = amount,
        None => rows.push(TaxRow {
            account_head: account.to_string(),
            description: description.to_string(),
            tax_amount: amount,
        }),
    }
}

pub struct TaxSynthesizer<'a> {
    server: &'a ServerConfig,
}

impl<'a> TaxSynthesizer<'a> {
    pub fn new(server: &'a ServerConfig) -> Self {
        Self { server }
    }

    /// Brings the tax table of `sales_order` in line with `order`.
    pub fn apply(&self, order: &Order, sales_order: &mut SalesOrder) -> Result<()> {
        let options = &self.server.orders;
        if !options.use_actual_tax_type {
            sales_order.taxes_and_charges = options.sales_taxes_and_charges_template.clone();
            return Ok(());
        }

        for line in &order.tax_lines {
            let account = resolve_tax_account(self.server, line, &order.billing.country)?;
            let label = line_label(line);
            if !line.tax_total.is_zero() {
                upsert_tax_row(&mut sales_order.taxes, &account, label, line.tax_total);
            }
            if !line.shipping_tax_total.is_zero() {
                let description = format!("Shipping {}", label);
                upsert_tax_row(
                    &mut sales_order.taxes,
                    &account,
                    &description,
                    line.shipping_tax_total,
                );
            }
        }

        if order.tax_lines.is_empty() && !order.shipping_tax.is_zero() {
            let account = self.default_account(SHIPPING_TAX)?;
            upsert_tax_row(&mut sales_order.taxes, &account, SHIPPING_TAX, order.shipping_tax);
        }

        if !order.shipping_total.is_zero() {
            let account = match &options.freight_account {
                Some(account) => account.clone(),
                None => self.default_account(SHIPPING_TOTAL)?,
            };
            upsert_tax_row(
                &mut sales_order.taxes,
                &account,
                SHIPPING_TOTAL,
                order.shipping_total,
            );
        }

        self.apply_rounding(order, sales_order);
        debug!(
            "[TaxSynthesizer] order {}: {} tax rows, grand total {}",
            order.id,
            sales_order.taxes.len(),
            sales_order.grand_total()
        );
        Ok(())
    }

    fn default_account(&self, label: &str) -> Result<String> {
        self.server
            .orders
            .tax_account
            .clone()
            .ok_or_else(|| SyncError::UnmappedTaxAccount {
                server: self.server.id.clone(),
                label: label.to_string(),
            })
    }

    /// Absorbs the difference between the remote total and the computed
    /// grand total so both sides agree to the cent.
    fn apply_rounding(&self, order: &Order, sales_order: &mut SalesOrder) {
        sales_order
            .taxes
            .retain(|row| row.description != ROUNDING_ADJUSTMENT);
        let difference = order.total - sales_order.grand_total();
        if difference.is_zero() {
            return;
        }
        match &self.server.orders.rounding_account {
            Some(account) => {
                upsert_tax_row(&mut sales_order.taxes, account, ROUNDING_ADJUSTMENT, difference);
                sales_order.disable_rounded_total = true;
            }
            None => warn!(
                "[TaxSynthesizer] order {} differs from remote total by {} and no rounding account is configured",
                order.id, difference
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaxMapping;
    use chrono::NaiveDate;
    use ledgerbridge_api::{RemoteId, SalesOrderLine};

    fn server() -> ServerConfig {
        let mut server = ServerConfig::new("https://shop.example.com");
        server.orders.tax_map = vec![
            TaxMapping {
                remote_tax_id: Some(3),
                tax_name: None,
                country: None,
                rate: Some(10.0),
                account: "VAT".into(),
            },
            TaxMapping {
                remote_tax_id: None,
                tax_name: Some("GST".into()),
                country: None,
                rate: None,
                account: "GST Payable".into(),
            },
            TaxMapping {
                remote_tax_id: None,
                tax_name: None,
                country: Some("DE".into()),
                rate: None,
                account: "USt".into(),
            },
        ];
        server.orders.rounding_account = Some("Round Off".into());
        server
    }

    fn tax_line(rate_id: Option<u64>, code: &str, label: &str, total: &str) -> OrderTaxLine {
        OrderTaxLine {
            id: None,
            rate_id,
            rate_code: code.into(),
            label: label.into(),
            tax_total: total.parse().unwrap(),
            shipping_tax_total: Money::ZERO,
        }
    }

    fn sales_order(net: &str) -> SalesOrder {
        SalesOrder {
            name: "SO-00001".into(),
            customer: "Ada".into(),
            po_no: None,
            remote_ref: None,
            modified: chrono::Utc::now(),
            docstatus: Default::default(),
            remote_status: None,
            payment_method: None,
            transaction_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            delivery_date: None,
            company: None,
            currency: None,
            shipping_rule: None,
            taxes_and_charges: None,
            customer_address: None,
            shipping_address: None,
            items: vec![SalesOrderLine {
                item_code: "A".into(),
                item_name: "A".into(),
                qty: 1.0,
                rate: net.parse().unwrap(),
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

    fn remote(total: &str, lines: Vec<OrderTaxLine>) -> Order {
        let mut order = Order::draft("shop.example.com".into(), "processing");
        order.id = RemoteId(9);
        order.total = total.parse().unwrap();
        order.tax_lines = lines;
        order
    }

    #[test]
    fn test_account_resolution_order() {
        let server = server();
        let line = tax_line(Some(3), "GST", "GST", "1");
        assert_eq!(resolve_tax_account(&server, &line, "DE").unwrap(), "VAT");

        let line = tax_line(Some(99), "GST", "Goods tax", "1");
        assert_eq!(resolve_tax_account(&server, &line, "DE").unwrap(), "GST Payable");

        let line = tax_line(None, "X", "X", "1");
        assert_eq!(resolve_tax_account(&server, &line, "de").unwrap(), "USt");

        let err = resolve_tax_account(&server, &line, "FR").unwrap_err();
        assert!(matches!(err, SyncError::UnmappedTaxAccount { .. }));

        let mut with_default = server.clone();
        with_default.orders.tax_account = Some("Tax Default".into());
        assert_eq!(
            resolve_tax_account(&with_default, &line, "FR").unwrap(),
            "Tax Default"
        );
    }

    #[test]
    fn test_single_vat_line_matches_remote_total() {
        let server = server();
        let order = remote("110.00", vec![tax_line(Some(3), "VAT-1", "VAT", "10.00")]);
        let mut so = sales_order("100.00");

        TaxSynthesizer::new(&server).apply(&order, &mut so).unwrap();

        assert_eq!(
            so.taxes,
            vec![TaxRow {
                account_head: "VAT".into(),
                description: "VAT".into(),
                tax_amount: Money::from_cents(1000),
            }]
        );
        assert_eq!(so.grand_total(), Money::from_cents(11000));
    }

    #[test]
    fn test_rerun_keeps_row_count() {
        let server = server();
        let mut order = remote("125.00", vec![tax_line(Some(3), "VAT-1", "VAT", "10.00")]);
        order.shipping_total = "15.00".parse().unwrap();
        let mut server = server;
        server.orders.freight_account = Some("Freight".into());
        let mut so = sales_order("100.00");
        let synthesizer = TaxSynthesizer::new(&server);

        synthesizer.apply(&order, &mut so).unwrap();
        let rows = so.taxes.len();
        synthesizer.apply(&order, &mut so).unwrap();
        assert_eq!(so.taxes.len(), rows);
        assert_eq!(so.grand_total(), Money::from_cents(12500));
    }

    #[test]
    fn test_rounding_row_absorbs_difference() {
        let server = server();
        let order = remote("110.01", vec![tax_line(Some(3), "VAT-1", "VAT", "10.00")]);
        let mut so = sales_order("100.00");
        TaxSynthesizer::new(&server).apply(&order, &mut so).unwrap();

        let rounding = so
            .taxes
            .iter()
            .find(|r| r.description == ROUNDING_ADJUSTMENT)
            .unwrap();
        assert_eq!(rounding.tax_amount, Money::from_cents(1));
        assert_eq!(so.grand_total(), order.total);
        assert!(so.disable_rounded_total);
    }

    #[test]
    fn test_template_mode_skips_rows() {
        let mut server = server();
        server.orders.use_actual_tax_type = false;
        server.orders.sales_taxes_and_charges_template = Some("Standard VAT".into());
        let order = remote("110.00", vec![tax_line(Some(3), "VAT-1", "VAT", "10.00")]);
        let mut so = sales_order("100.00");

        TaxSynthesizer::new(&server).apply(&order, &mut so).unwrap();
        assert!(so.taxes.is_empty());
        assert_eq!(so.taxes_and_charges.as_deref(), Some("Standard VAT"));
    }
}
