//! Money-side effects of inbound orders: tax rows and payment posting.

pub mod payment;
pub mod tax;

pub use payment::{PaymentOutcome, PaymentReconciler};
pub use tax::{TaxSynthesizer, resolve_tax_account};
