//! SQLite-backed catalog and order store.
//!
//! Owns the single database file: catalog reads, catalog imports, and
//! order writes all go through here. Migration is applied inline via
//! `include_str!` on first open.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::catalog::{
    CatalogSnapshot, CatalogStore, ClientRecord, NewOrder, ProductRecord, StoreError,
    VariantRecord,
};

/// How many rows are imported by a catalog import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportCounts {
    /// Clients inserted or updated.
    pub clients: usize,
    /// Products inserted or updated.
    pub products: usize,
    /// Variants inserted or updated.
    pub variants: usize,
}

/// A persisted order as listed back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedOrder {
    /// Order identifier.
    pub id: String,
    /// Catalog id of the ordering client.
    pub client_id: String,
    /// Client display name at query time.
    pub client_name: String,
    /// When the order was saved (RFC 3339).
    pub created_at: String,
    /// Whether the order was marked paid.
    pub paid: bool,
    /// Sum of line totals at their saved prices.
    pub total: f64,
    /// Number of order lines.
    pub item_count: i64,
}

/// The order database.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at the given path and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the file cannot be opened or the schema
    /// cannot be applied.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                StoreError::Open(format!(
                    "failed to create db directory {}: {error}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .pragma("trusted_schema", "OFF")
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|error| {
                StoreError::Open(format!(
                    "failed to open order db at {}: {error}",
                    path.display()
                ))
            })?;

        sqlx::raw_sql(include_str!("../migrations/001_schema.sql"))
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Upsert a whole catalog in one transaction.
    ///
    /// Existing rows with matching ids are updated in place, so repeated
    /// imports of a grown catalog are safe. Rows are never deleted here.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Import`] for records with empty ids or names,
    /// or the underlying write failure. Nothing is committed on error.
    pub async fn import_catalog(
        &self,
        catalog: &CatalogSnapshot,
    ) -> Result<ImportCounts, StoreError> {
        let mut counts = ImportCounts::default();
        let mut tx = self.pool.begin().await?;

        for client in &catalog.clients {
            if client.id.trim().is_empty() || client.name.trim().is_empty() {
                return Err(StoreError::Import(format!(
                    "client with empty id or name: {client:?}"
                )));
            }
            sqlx::query(
                "INSERT INTO clients (id, name, phone) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = ?2, phone = ?3",
            )
            .bind(&client.id)
            .bind(&client.name)
            .bind(&client.phone)
            .execute(&mut *tx)
            .await?;
            counts.clients = counts.clients.saturating_add(1);
        }

        for product in &catalog.products {
            if product.id.trim().is_empty() || product.name.trim().is_empty() {
                return Err(StoreError::Import(format!(
                    "product with empty id or name: {}",
                    product.name
                )));
            }
            sqlx::query(
                "INSERT INTO products (id, name, price) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = ?2, price = ?3",
            )
            .bind(&product.id)
            .bind(&product.name)
            .bind(product.price)
            .execute(&mut *tx)
            .await?;
            counts.products = counts.products.saturating_add(1);

            for variant in &product.variants {
                if variant.id.trim().is_empty() || variant.name.trim().is_empty() {
                    return Err(StoreError::Import(format!(
                        "variant with empty id or name under product {}",
                        product.id
                    )));
                }
                sqlx::query(
                    "INSERT INTO variants (id, product_id, name, price) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET product_id = ?2, name = ?3, price = ?4",
                )
                .bind(&variant.id)
                .bind(&product.id)
                .bind(&variant.name)
                .bind(variant.price)
                .execute(&mut *tx)
                .await?;
                counts.variants = counts.variants.saturating_add(1);
            }
        }

        tx.commit().await?;
        info!(
            clients = counts.clients,
            products = counts.products,
            variants = counts.variants,
            "catalog imported"
        );
        Ok(counts)
    }

    /// List the most recently saved orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    pub async fn recent_orders(&self, limit: i64) -> Result<Vec<SavedOrder>, StoreError> {
        let rows: Vec<OrderRow> = sqlx::query_as(
            "SELECT o.id, o.client_id, c.name, o.created_at, o.paid,
                    COALESCE(SUM(oi.quantity * oi.unit_price), 0.0) AS total,
                    COUNT(oi.id) AS item_count
             FROM orders o
             JOIN clients c ON c.id = o.client_id
             LEFT JOIN order_items oi ON oi.order_id = o.id
             GROUP BY o.id
             ORDER BY o.created_at DESC, o.id DESC
             LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(order_row_into_saved).collect())
    }
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn load_catalog(&self) -> Result<CatalogSnapshot, StoreError> {
        let clients = sqlx::query_as::<_, (String, String, Option<String>)>(
            "SELECT id, name, phone FROM clients ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(id, name, phone)| ClientRecord { id, name, phone })
        .collect();

        let product_rows: Vec<(String, String, f64)> =
            sqlx::query_as("SELECT id, name, price FROM products ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        let variant_rows: Vec<(String, String, String, f64)> =
            sqlx::query_as("SELECT id, product_id, name, price FROM variants ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        let mut variants_by_product: HashMap<String, Vec<VariantRecord>> = HashMap::new();
        for (id, product_id, name, price) in variant_rows {
            variants_by_product
                .entry(product_id)
                .or_default()
                .push(VariantRecord { id, name, price });
        }

        let products = product_rows
            .into_iter()
            .map(|(id, name, price)| ProductRecord {
                variants: variants_by_product.remove(&id).unwrap_or_default(),
                id,
                name,
                price,
            })
            .collect();

        Ok(CatalogSnapshot { clients, products })
    }

    async fn save_order(&self, order: &NewOrder) -> Result<String, StoreError> {
        let order_id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();
        let paid: i64 = if order.paid { 1 } else { 0 };

        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO orders (id, client_id, created_at, paid) VALUES (?1, ?2, ?3, ?4)")
            .bind(&order_id)
            .bind(&order.client_id)
            .bind(&created_at)
            .bind(paid)
            .execute(&mut *tx)
            .await?;

        for item in &order.items {
            sqlx::query(
                "INSERT INTO order_items (order_id, product_id, variant_id, quantity, unit_price)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&order_id)
            .bind(&item.product_id)
            .bind(&item.variant_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(order_id = %order_id, items = order.items.len(), "order persisted");
        Ok(order_id)
    }
}

/// Raw row tuple from the order listing query.
type OrderRow = (String, String, String, String, i64, f64, i64);

fn order_row_into_saved(row: OrderRow) -> SavedOrder {
    let (id, client_id, client_name, created_at, paid, total, item_count) = row;
    SavedOrder {
        id,
        client_id,
        client_name,
        created_at,
        paid: paid != 0,
        total,
        item_count,
    }
}
