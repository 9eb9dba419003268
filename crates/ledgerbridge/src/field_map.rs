//! Typed item ↔ product field mappings.
//!
//! Configuration names fields as strings (`"description | Description"`,
//! `"short_description"`, `"meta:_gtin"`). They are resolved once into
//! [`LocalField`] / [`RemoteField`] accessors so an unknown field is a
//! startup error rather than a silent no-op during a cycle.

use ledgerbridge_api::{Item, Money, Product};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMappingSpec {
    pub local_field: String,
    pub remote_field: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalField {
    ItemName,
    Description,
    StockUom,
    ItemGroup,
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteField {
    Name,
    Sku,
    Status,
    RegularPrice,
    Description,
    ShortDescription,
    Weight,
    Meta(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub local: LocalField,
    pub remote: RemoteField,
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedFieldMap {
    mappings: Vec<FieldMapping>,
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn opt_value(value: Option<&String>) -> Value {
    value.map(|s| Value::String(s.clone())).unwrap_or(Value::Null)
}

/// Assigns `new` to `slot`, reporting whether anything changed.
fn assign<T: PartialEq>(slot: &mut T, new: T) -> bool {
    if *slot == new {
        false
    } else {
        *slot = new;
        true
    }
}

impl LocalField {
    /// Accepts `"field"` or the labelled form `"field | Label"`.
    pub fn parse(raw: &str, custom_fields: &[String]) -> Result<Self, String> {
        let name = raw.split('|').next().unwrap_or_default().trim();
        match name {
            "item_name" => Ok(LocalField::ItemName),
            "description" => Ok(LocalField::Description),
            "stock_uom" => Ok(LocalField::StockUom),
            "item_group" => Ok(LocalField::ItemGroup),
            other if custom_fields.iter().any(|c| c == other) => {
                Ok(LocalField::Custom(other.to_string()))
            }
            other => Err(format!("unknown local item field '{}'", other)),
        }
    }

    pub fn read(&self, item: &Item) -> Value {
        match self {
            LocalField::ItemName => Value::String(item.item_name.clone()),
            LocalField::Description => opt_value(item.description.as_ref()),
            LocalField::StockUom => Value::String(item.stock_uom.clone()),
            LocalField::ItemGroup => opt_value(item.item_group.as_ref()),
            LocalField::Custom(name) => item.custom.get(name).cloned().unwrap_or(Value::Null),
        }
    }

    /// Required fields ignore null values.
    pub fn write(&self, item: &mut Item, value: Value) -> bool {
        let text = value_to_string(&value);
        match self {
            LocalField::ItemName => match text {
                Some(name) => assign(&mut item.item_name, name),
                None => false,
            },
            LocalField::Description => assign(&mut item.description, text),
            LocalField::StockUom => match text {
                Some(uom) => assign(&mut item.stock_uom, uom),
                None => false,
            },
            LocalField::ItemGroup => assign(&mut item.item_group, text),
            LocalField::Custom(name) => {
                if value.is_null() {
                    item.custom.remove(name).is_some()
                } else if item.custom.get(name) == Some(&value) {
                    false
                } else {
                    item.custom.insert(name.clone(), value);
                    true
                }
            }
        }
    }
}

impl RemoteField {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let name = raw.trim();
        if let Some(key) = name
            .strip_prefix("meta:")
            .or_else(|| name.strip_prefix("meta_data."))
        {
            if key.is_empty() {
                return Err("empty remote meta key".to_string());
            }
            return Ok(RemoteField::Meta(key.to_string()));
        }
        match name {
            "name" => Ok(RemoteField::Name),
            "sku" => Ok(RemoteField::Sku),
            "status" => Ok(RemoteField::Status),
            "regular_price" => Ok(RemoteField::RegularPrice),
            "description" => Ok(RemoteField::Description),
            "short_description" => Ok(RemoteField::ShortDescription),
            "weight" => Ok(RemoteField::Weight),
            other => Err(format!("unknown remote product field '{}'", other)),
        }
    }

    pub fn read(&self, product: &Product) -> Value {
        match self {
            RemoteField::Name => Value::String(product.name.clone()),
            RemoteField::Sku => opt_value(product.sku.as_ref()),
            RemoteField::Status => opt_value(product.status.as_ref()),
            RemoteField::RegularPrice => product
                .regular_price
                .map(|p| Value::String(p.to_string()))
                .unwrap_or(Value::Null),
            RemoteField::Description => opt_value(product.description.as_ref()),
            RemoteField::ShortDescription => opt_value(product.short_description.as_ref()),
            RemoteField::Weight => opt_value(product.weight.as_ref()),
            RemoteField::Meta(key) => ledgerbridge_api::remote::meta_value(&product.meta_data, key)
                .cloned()
                .unwrap_or(Value::Null),
        }
    }

    pub fn write(&self, product: &mut Product, value: Value) -> bool {
        let text = value_to_string(&value);
        match self {
            RemoteField::Name => match text {
                Some(name) => assign(&mut product.name, name),
                None => false,
            },
            RemoteField::Sku => assign(&mut product.sku, text),
            RemoteField::Status => assign(&mut product.status, text),
            RemoteField::RegularPrice => {
                let price = text.and_then(|t| t.parse::<Money>().ok());
                assign(&mut product.regular_price, price)
            }
            RemoteField::Description => assign(&mut product.description, text),
            RemoteField::ShortDescription => assign(&mut product.short_description, text),
            RemoteField::Weight => assign(&mut product.weight, text),
            RemoteField::Meta(key) => {
                if ledgerbridge_api::remote::meta_value(&product.meta_data, key) == Some(&value) {
                    false
                } else {
                    product.set_meta(key, value);
                    true
                }
            }
        }
    }
}

impl ResolvedFieldMap {
    pub fn resolve(specs: &[FieldMappingSpec], custom_fields: &[String]) -> Result<Self, String> {
        let mappings = specs
            .iter()
            .map(|spec| {
                Ok(FieldMapping {
                    local: LocalField::parse(&spec.local_field, custom_fields)?,
                    remote: RemoteField::parse(&spec.remote_field)?,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;
        Ok(Self { mappings })
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Copies mapped local values onto the product. Returns true if it changed.
    pub fn apply_to_remote(&self, item: &Item, product: &mut Product) -> bool {
        self.mappings.iter().fold(false, |changed, m| {
            m.remote.write(product, m.local.read(item)) || changed
        })
    }

    /// Copies mapped remote values onto the item. Returns true if it changed.
    pub fn apply_to_local(&self, product: &Product, item: &mut Item) -> bool {
        self.mappings.iter().fold(false, |changed, m| {
            m.local.write(item, m.remote.read(product)) || changed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerbridge_api::ServerId;
    use serde_json::json;

    fn map(specs: &[(&str, &str)], custom: &[&str]) -> ResolvedFieldMap {
        let specs: Vec<FieldMappingSpec> = specs
            .iter()
            .map(|(l, r)| FieldMappingSpec {
                local_field: l.to_string(),
                remote_field: r.to_string(),
            })
            .collect();
        let custom: Vec<String> = custom.iter().map(|c| c.to_string()).collect();
        ResolvedFieldMap::resolve(&specs, &custom).unwrap()
    }

    #[test]
    fn test_parse_labelled_local_field() {
        assert_eq!(
            LocalField::parse("description | Description", &[]).unwrap(),
            LocalField::Description
        );
        assert_eq!(
            LocalField::parse("gtin", &["gtin".to_string()]).unwrap(),
            LocalField::Custom("gtin".into())
        );
        assert!(LocalField::parse("gtin", &[]).is_err());
    }

    #[test]
    fn test_parse_remote_meta_field() {
        assert_eq!(
            RemoteField::parse("meta:_gtin").unwrap(),
            RemoteField::Meta("_gtin".into())
        );
        assert!(RemoteField::parse("meta:").is_err());
        assert!(RemoteField::parse("colour").is_err());
    }

    #[test]
    fn test_apply_both_directions() {
        let fields = map(
            &[("description", "short_description"), ("gtin", "meta:_gtin")],
            &["gtin"],
        );
        let mut item = Item::new("SKU-1", "Shirt");
        item.description = Some("Soft cotton".into());
        item.custom.insert("gtin".into(), json!("4006381333931"));

        let mut product = Product::draft(ServerId::new("shop"), "Shirt");
        assert!(fields.apply_to_remote(&item, &mut product));
        assert_eq!(product.short_description.as_deref(), Some("Soft cotton"));
        assert_eq!(
            ledgerbridge_api::remote::meta_string(&product.meta_data, "_gtin").as_deref(),
            Some("4006381333931")
        );
        // Applying again is a no-op.
        assert!(!fields.apply_to_remote(&item, &mut product));

        product.short_description = Some("Now in linen".into());
        assert!(fields.apply_to_local(&product, &mut item));
        assert_eq!(item.description.as_deref(), Some("Now in linen"));
        assert!(!fields.apply_to_local(&product, &mut item));
    }

    #[test]
    fn test_null_does_not_clear_required_fields() {
        let fields = map(&[("item_name", "sku")], &[]);
        let mut item = Item::new("SKU-1", "Shirt");
        let product = Product::draft(ServerId::new("shop"), "Shirt");
        assert!(!fields.apply_to_local(&product, &mut item));
        assert_eq!(item.item_name, "Shirt");
    }
}
