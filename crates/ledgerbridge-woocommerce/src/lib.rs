//! WooCommerce remote catalog for the ledgerbridge engine.
//!
//! Products and orders go through the WooCommerce REST API (`wc/v3`, consumer
//! key and secret); media library access goes through the WordPress REST API
//! (`wp/v2`, application password).

pub mod catalog;
pub mod client;
pub mod media;
pub mod models;

pub use catalog::WooCommerceCatalog;
pub use client::RestClient;
pub use media::WordpressMedia;
