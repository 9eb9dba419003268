use serde::{Deserialize, Serialize};
use std::fmt;

pub mod change;
pub mod local;
pub mod money;
pub mod remote;

pub use change::{LocalChange, WriteOrigin};
pub use local::{
    Address, AddressType, Attachment, Contact, Customer, CustomerType, Deduction, DocStatus,
    Invoice, Item, ItemAttribute, ItemAttributeValue, ItemPrice, ItemVariantAttribute,
    LinkedRemoteRef, PaymentEntry, PaymentReference, SalesOrder, SalesOrderLine, TaxRow,
};
pub use money::Money;
pub use remote::{
    AddressBlock, ImageRef, MediaAsset, MetaEntry, Order, OrderLineItem, OrderShippingLine,
    OrderTaxLine, Product, ProductAttribute, ProductType,
};

/// Identity of a remote commerce server, conventionally its host name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Remote object id. Zero is never assigned by the remote and marks
/// records that have not been created yet (or were deleted remotely).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RemoteId(pub u64);

impl RemoteId {
    pub const UNASSIGNED: RemoteId = RemoteId(0);

    pub fn is_unassigned(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of one reconcilable entity, on either side of the link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKey {
    Item { code: String },
    Product { server: ServerId, id: RemoteId },
    SalesOrder { name: String },
    Order { server: ServerId, id: RemoteId },
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Item { code } => write!(f, "item:{}", code),
            EntityKey::Product { server, id } => write!(f, "product:{}/{}", server, id),
            EntityKey::SalesOrder { name } => write!(f, "sales_order:{}", name),
            EntityKey::Order { server, id } => write!(f, "order:{}/{}", server, id),
        }
    }
}

/// Structured error taxonomy for reconciliation.
///
/// Serializable so cycle outcomes can be persisted or shipped to an operator
/// surface without losing the error kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum SyncError {
    #[error("Sync disabled for {entity} on server {server}")]
    SyncDisabled { server: ServerId, entity: String },

    #[error("Dangling reference: {entity} points to remote id {remote_id} on {server}, which does not exist")]
    DanglingReference {
        server: ServerId,
        remote_id: RemoteId,
        entity: String,
    },

    #[error("No account mapping for payment method '{method}' on server {server} ({mapping})")]
    UnmappedPaymentMethod {
        server: ServerId,
        method: String,
        mapping: String,
    },

    #[error("No tax account for tax line '{label}' on server {server} and no default tax account configured")]
    UnmappedTaxAccount { server: ServerId, label: String },

    #[error("Remote unavailable: {message}")]
    RemoteUnavailable { message: String },

    #[error("Reconciliation error: {message}")]
    Reconciliation { message: String },

    #[error("Dependency cycle detected: {chain}")]
    DependencyCycle { chain: String },

    #[error("{kind} not found: {key}")]
    NotFound { kind: String, key: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl SyncError {
    pub fn remote(message: impl Into<String>) -> Self {
        SyncError::RemoteUnavailable {
            message: message.into(),
        }
    }

    pub fn reconciliation(message: impl Into<String>) -> Self {
        SyncError::Reconciliation {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        SyncError::Config {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        SyncError::Storage {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        SyncError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        SyncError::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Only transport failures are worth retrying as-is; everything else
    /// needs data or configuration to change first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::RemoteUnavailable { .. })
    }
}
