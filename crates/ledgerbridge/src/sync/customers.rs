//! Customer, address and contact identity for inbound orders.

use ledgerbridge_api::{
    Address, AddressBlock, AddressType, Contact, Customer, CustomerType, Order, SyncError,
};
use tracing::debug;

use crate::Result;
use crate::config::{AddressTitleConvention, ServerConfig};
use crate::core::traits::LocalStore;

const NOT_PROVIDED: &str = "Not Provided";

/// The local customer an order is booked against, with its addresses.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCustomer {
    pub customer: Customer,
    pub billing_address: String,
    pub shipping_address: String,
}

/// Stable identity of the buyer behind a remote order.
///
/// Guests are keyed per order, registered buyers by e-mail (and company,
/// when ordering on behalf of one).
pub fn customer_identifier(order: &Order) -> Result<String> {
    if order.is_guest() {
        return Ok(format!("Guest-{}", order.id));
    }
    let email = order
        .billing
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| {
            SyncError::reconciliation(format!(
                "Order {} on {} has a registered customer without a billing e-mail",
                order.id, order.server
            ))
        })?;
    let company = order.billing.company.trim();
    Ok(if company.is_empty() {
        email.to_string()
    } else {
        format!("{}-{}", email, company)
    })
}

fn display_name(billing: &AddressBlock, identifier: &str) -> String {
    let company = billing.company.trim();
    if !company.is_empty() {
        return company.to_string();
    }
    billing
        .full_name()
        .or_else(|| billing.email.clone().filter(|e| !e.trim().is_empty()))
        .unwrap_or_else(|| identifier.to_string())
}

pub struct CustomerResolver<'a> {
    store: &'a dyn LocalStore,
    server: &'a ServerConfig,
}

impl<'a> CustomerResolver<'a> {
    pub fn new(store: &'a dyn LocalStore, server: &'a ServerConfig) -> Self {
        Self { store, server }
    }

    pub async fn resolve(&self, order: &Order) -> Result<ResolvedCustomer> {
        let identifier = customer_identifier(order)?;
        let billing = &order.billing;
        let has_company = !billing.company.trim().is_empty();

        let mut customer = match self.store.find_customer(&identifier).await? {
            Some(existing) => existing,
            None => Customer {
                name: String::new(),
                customer_name: String::new(),
                identifier: identifier.clone(),
                customer_type: if has_company {
                    CustomerType::Company
                } else {
                    CustomerType::Individual
                },
                is_guest: order.is_guest(),
                tax_id: None,
                primary_address: None,
                primary_contact: None,
            },
        };
        customer.customer_name = display_name(billing, &identifier);
        if let Some(vat) = billing.vat_id.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            customer.tax_id = Some(vat.to_string());
        }
        let mut customer = self.store.save_customer(customer).await?;
        debug!(
            "[CustomerResolver] order {} booked to customer {} ({})",
            order.id, customer.name, identifier
        );

        let (billing_address, shipping_address) = self.upsert_addresses(&customer, order).await?;
        let contact = self.upsert_contact(&customer, billing).await?;

        let primary_contact = contact.map(|c| c.name);
        if customer.primary_address.as_deref() != Some(billing_address.as_str())
            || (primary_contact.is_some() && customer.primary_contact != primary_contact)
        {
            customer.primary_address = Some(billing_address.clone());
            if primary_contact.is_some() {
                customer.primary_contact = primary_contact;
            }
            customer = self.store.save_customer(customer).await?;
        }

        Ok(ResolvedCustomer {
            customer,
            billing_address,
            shipping_address,
        })
    }

    /// One address serves both roles when billing and shipping are the same
    /// location; otherwise each role gets its own.
    async fn upsert_addresses(&self, customer: &Customer, order: &Order) -> Result<(String, String)> {
        let existing = self.store.customer_addresses(&customer.name).await?;
        let billing_existing = existing.iter().find(|a| a.is_primary).cloned();
        let shipping_existing = existing.iter().find(|a| a.is_shipping).cloned();

        if order.billing.same_location(&order.shipping) {
            let target = billing_existing.or(shipping_existing);
            let saved = self
                .upsert_address(target, customer, &order.billing, AddressType::Billing, true, true)
                .await?;
            return Ok((saved.name.clone(), saved.name));
        }

        let billing = self
            .upsert_address(
                billing_existing,
                customer,
                &order.billing,
                AddressType::Billing,
                true,
                false,
            )
            .await?;
        let shipping = self
            .upsert_address(
                shipping_existing,
                customer,
                &order.shipping,
                AddressType::Shipping,
                false,
                true,
            )
            .await?;
        Ok((billing.name, shipping.name))
    }

    async fn upsert_address(
        &self,
        existing: Option<Address>,
        customer: &Customer,
        block: &AddressBlock,
        address_type: AddressType,
        is_primary: bool,
        is_shipping: bool,
    ) -> Result<Address> {
        let mut address = existing.unwrap_or_else(|| Address {
            name: String::new(),
            title: String::new(),
            address_type,
            line1: String::new(),
            line2: None,
            city: String::new(),
            state: None,
            pincode: None,
            country: None,
            email: None,
            phone: None,
            is_primary,
            is_shipping,
            links: vec![customer.name.clone()],
        });
        let before = address.clone();

        address.title = match self.server.orders.address_title_convention {
            AddressTitleConvention::CustomerNameOnly => customer.customer_name.clone(),
            AddressTitleConvention::CustomerNameAndType => {
                format!("{}-{}", customer.name, address.address_type.label())
            }
        };
        address.line1 = or_not_provided(&block.address_1);
        address.line2 = non_empty(&block.address_2);
        address.city = or_not_provided(&block.city);
        address.state = non_empty(&block.state);
        address.pincode = non_empty(&block.postcode);
        address.country = non_empty(&block.country);
        address.email = block.email.clone().filter(|e| !e.trim().is_empty());
        address.phone = block.phone.clone().filter(|p| !p.trim().is_empty());
        address.is_primary = is_primary;
        address.is_shipping = is_shipping;
        if !address.links.contains(&customer.name) {
            address.links.push(customer.name.clone());
        }

        if !address.name.is_empty() && address == before {
            return Ok(address);
        }
        self.store.save_address(address).await
    }

    async fn upsert_contact(
        &self,
        customer: &Customer,
        billing: &AddressBlock,
    ) -> Result<Option<Contact>> {
        let email = billing.email.clone().filter(|e| !e.trim().is_empty());
        let phone = billing.phone.clone().filter(|p| !p.trim().is_empty());
        if email.is_none() && phone.is_none() {
            return Ok(None);
        }

        let existing = self.store.customer_contacts(&customer.name).await?;
        let found = existing.into_iter().find(|c| match (&email, &c.email) {
            (Some(wanted), Some(have)) => wanted.eq_ignore_ascii_case(have),
            (None, None) => c.phone == phone,
            _ => false,
        });

        let first_name = non_empty(&billing.first_name).unwrap_or_else(|| customer.customer_name.clone());
        let last_name = non_empty(&billing.last_name);
        match found {
            Some(contact)
                if contact.first_name == first_name
                    && contact.last_name == last_name
                    && contact.phone == phone =>
            {
                Ok(Some(contact))
            }
            Some(mut contact) => {
                contact.first_name = first_name;
                contact.last_name = last_name;
                contact.phone = phone;
                Ok(Some(self.store.save_contact(contact).await?))
            }
            None => {
                let contact = Contact {
                    name: String::new(),
                    first_name,
                    last_name,
                    email,
                    phone,
                    links: vec![customer.name.clone()],
                };
                Ok(Some(self.store.save_contact(contact).await?))
            }
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn or_not_provided(value: &str) -> String {
    non_empty(value).unwrap_or_else(|| NOT_PROVIDED.to_string())
}
