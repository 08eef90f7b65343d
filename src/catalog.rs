//! Catalog data model and the persistence boundary.
//!
//! A [`CatalogSnapshot`] is an immutable view of the known clients and
//! products loaded at the start of an analysis run. Snapshots are shared
//! by `Arc` and never mutated by the pipeline; edits to drafts only ever
//! reference catalog entries by id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A known client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Stable catalog identifier.
    pub id: String,
    /// Full display name, e.g. "Juan Perez".
    pub name: String,
    /// Contact phone, if known.
    #[serde(default)]
    pub phone: Option<String>,
}

impl ClientRecord {
    /// First word of the client name, the part informal messages use.
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }
}

/// A sellable variant of a product (size, flavor, presentation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    /// Stable catalog identifier.
    pub id: String,
    /// Variant display name, e.g. "Grande".
    pub name: String,
    /// Unit price for this variant. Overrides the product price.
    pub price: f64,
}

/// A known product with optional variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Stable catalog identifier.
    pub id: String,
    /// Product display name, e.g. "Leche".
    pub name: String,
    /// Base unit price, used when the product has no variants or none is chosen.
    pub price: f64,
    /// Variants of this product. Empty for single-form products.
    #[serde(default)]
    pub variants: Vec<VariantRecord>,
}

impl ProductRecord {
    /// Look up a variant of this product by id.
    pub fn variant(&self, variant_id: &str) -> Option<&VariantRecord> {
        self.variants.iter().find(|v| v.id == variant_id)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Immutable catalog view for one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// All known clients.
    #[serde(default)]
    pub clients: Vec<ClientRecord>,
    /// All known products.
    #[serde(default)]
    pub products: Vec<ProductRecord>,
}

impl CatalogSnapshot {
    /// Whether the catalog has no clients and no products.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty() && self.products.is_empty()
    }

    /// Look up a client by id.
    pub fn client(&self, id: &str) -> Option<&ClientRecord> {
        self.clients.iter().find(|c| c.id == id)
    }

    /// Look up a product by id.
    pub fn product(&self, id: &str) -> Option<&ProductRecord> {
        self.products.iter().find(|p| p.id == id)
    }

    /// Unit price for a product, preferring the variant price when one is given.
    ///
    /// Returns `None` when the product id (or variant id) is not in the catalog.
    pub fn unit_price(&self, product_id: &str, variant_id: Option<&str>) -> Option<f64> {
        let product = self.product(product_id)?;
        match variant_id {
            Some(vid) => product.variant(vid).map(|v| v.price),
            None => Some(product.price),
        }
    }
}

// ---------------------------------------------------------------------------
// Write-side records
// ---------------------------------------------------------------------------

/// A persisted order line, derived from a complete draft item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrderItem {
    /// Catalog product id.
    pub product_id: String,
    /// Catalog variant id, when the product was ordered in a variant.
    pub variant_id: Option<String>,
    /// Ordered quantity. May be fractional for by-weight products.
    pub quantity: f64,
    /// Price per unit at save time.
    pub unit_price: f64,
}

/// The record a complete draft card converts into for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    /// Catalog client id the order belongs to.
    pub client_id: String,
    /// Whether the order was already paid.
    pub paid: bool,
    /// Order lines. Never empty for a saveable order.
    pub items: Vec<NewOrderItem>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the catalog/order store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database file could not be opened or prepared.
    #[error("store open failed: {0}")]
    Open(String),
    /// A query or transaction failed.
    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),
    /// Catalog seed data was rejected.
    #[error("catalog import failed: {0}")]
    Import(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Persistence boundary for catalog reads and order writes.
///
/// Implementations must be `Send + Sync`; the session holds one behind an
/// `Arc` and calls it from async context. Failures surface unchanged, with
/// no retry, and a failed save must leave no partial rows behind.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Load the full catalog.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backing store cannot be read.
    async fn load_catalog(&self) -> Result<CatalogSnapshot, StoreError>;

    /// Persist one order and return its assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails; the order must not be
    /// partially persisted.
    async fn save_order(&self, order: &NewOrder) -> Result<String, StoreError>;
}
