//! Postgres store implementations.
//!
//! Each table keeps the queryable key columns alongside a `doc` JSONB column
//! holding the serialized entity, so the domain types stay the single source
//! of shape. Optimistic concurrency uses a `version` column compared in the
//! UPDATE's WHERE clause; the idempotent ledger append leans on a unique
//! index over the change key plus `ON CONFLICT DO NOTHING`.
//!
//! Variant ids are stored with an empty-string sentinel so the uniqueness
//! constraint also covers variant-less products.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::inventory::{AlertStatus, InventoryAlert, InventoryChange};
use crate::domain::order::Order;
use crate::domain::payment::{PaymentMethod, PaymentTransaction, Refund};
use crate::error::{Error, Result};
use crate::store::{InventoryStore, OrderStore, PaymentStore, StockLevel};

fn db_err(e: sqlx::Error) -> Error {
    Error::Storage(e.to_string())
}

fn variant_column(variant_id: Option<&str>) -> &str {
    variant_id.unwrap_or("")
}

fn variant_from_column(column: String) -> Option<String> {
    if column.is_empty() {
        None
    } else {
        Some(column)
    }
}

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let doc = serde_json::to_value(&order)?;
        sqlx::query("INSERT INTO orders (id, order_number, version, doc) VALUES ($1, $2, $3, $4)")
            .bind(order.id())
            .bind(order.order_number())
            .bind(order.version() as i64)
            .bind(doc)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn update(&self, order: &Order) -> Result<()> {
        let doc = serde_json::to_value(order)?;
        let result =
            sqlx::query("UPDATE orders SET version = $2, doc = $3 WHERE id = $1 AND version = $2 - 1")
                .bind(order.id())
                .bind(order.version() as i64)
                .bind(doc)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        if result.rows_affected() == 0 {
            let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM orders WHERE id = $1")
                .bind(order.id())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            return Err(if exists.is_some() {
                Error::ConcurrencyConflict
            } else {
                Error::NotFound("order")
            });
        }
        Ok(())
    }

    async fn restore(&self, order: Order) -> Result<()> {
        let doc = serde_json::to_value(&order)?;
        sqlx::query("UPDATE orders SET version = $2, doc = $3 WHERE id = $1")
            .bind(order.id())
            .bind(order.version() as i64)
            .bind(doc)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Order> {
        let doc: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT doc FROM orders WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        let doc = doc.ok_or(Error::NotFound("order"))?;
        Ok(serde_json::from_value(doc)?)
    }

    async fn get_by_number(&self, order_number: &str) -> Result<Order> {
        let doc: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT doc FROM orders WHERE order_number = $1")
                .bind(order_number)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        let doc = doc.ok_or(Error::NotFound("order"))?;
        Ok(serde_json::from_value(doc)?)
    }
}

#[derive(Clone)]
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert_method(&self, method: PaymentMethod) -> Result<()> {
        let doc = serde_json::to_value(&method)?;
        sqlx::query(
            "INSERT INTO payment_methods (id, doc) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc",
        )
        .bind(&method.id)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_method(&self, id: &str) -> Result<PaymentMethod> {
        let doc: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT doc FROM payment_methods WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        let doc = doc.ok_or(Error::NotFound("payment method"))?;
        Ok(serde_json::from_value(doc)?)
    }

    async fn insert_transaction(&self, transaction: PaymentTransaction) -> Result<()> {
        let doc = serde_json::to_value(&transaction)?;
        sqlx::query("INSERT INTO payment_transactions (id, version, doc) VALUES ($1, $2, $3)")
            .bind(transaction.id())
            .bind(transaction.version() as i64)
            .bind(doc)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn update_transaction(&self, transaction: &PaymentTransaction) -> Result<()> {
        let doc = serde_json::to_value(transaction)?;
        let result = sqlx::query(
            "UPDATE payment_transactions SET version = $2, doc = $3 \
             WHERE id = $1 AND version = $2 - 1",
        )
        .bind(transaction.id())
        .bind(transaction.version() as i64)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            let exists: Option<i32> =
                sqlx::query_scalar("SELECT 1 FROM payment_transactions WHERE id = $1")
                    .bind(transaction.id())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_err)?;
            return Err(if exists.is_some() {
                Error::ConcurrencyConflict
            } else {
                Error::NotFound("payment transaction")
            });
        }
        Ok(())
    }

    async fn restore_transaction(&self, transaction: PaymentTransaction) -> Result<()> {
        let doc = serde_json::to_value(&transaction)?;
        sqlx::query("UPDATE payment_transactions SET version = $2, doc = $3 WHERE id = $1")
            .bind(transaction.id())
            .bind(transaction.version() as i64)
            .bind(doc)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_transaction(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM payment_transactions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_transaction(&self, id: &str) -> Result<PaymentTransaction> {
        let doc: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT doc FROM payment_transactions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        let doc = doc.ok_or(Error::NotFound("payment transaction"))?;
        Ok(serde_json::from_value(doc)?)
    }

    async fn insert_refund(&self, refund: Refund, transaction: &PaymentTransaction) -> Result<()> {
        let refund_doc = serde_json::to_value(&refund)?;
        let transaction_doc = serde_json::to_value(transaction)?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let result = sqlx::query(
            "UPDATE payment_transactions SET version = $2, doc = $3 \
             WHERE id = $1 AND version = $2 - 1",
        )
        .bind(transaction.id())
        .bind(transaction.version() as i64)
        .bind(transaction_doc)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            let exists: Option<i32> =
                sqlx::query_scalar("SELECT 1 FROM payment_transactions WHERE id = $1")
                    .bind(transaction.id())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?;
            return Err(if exists.is_some() {
                Error::ConcurrencyConflict
            } else {
                Error::NotFound("payment transaction")
            });
        }
        sqlx::query("INSERT INTO refunds (id, transaction_id, doc) VALUES ($1, $2, $3)")
            .bind(refund.id())
            .bind(refund.payment_transaction_id())
            .bind(refund_doc)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn update_refund(&self, refund: &Refund) -> Result<()> {
        let doc = serde_json::to_value(refund)?;
        let result = sqlx::query("UPDATE refunds SET doc = $2 WHERE id = $1")
            .bind(refund.id())
            .bind(doc)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("refund"));
        }
        Ok(())
    }

    async fn get_refund(&self, id: &str) -> Result<Refund> {
        let doc: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT doc FROM refunds WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        let doc = doc.ok_or(Error::NotFound("refund"))?;
        Ok(serde_json::from_value(doc)?)
    }

    async fn refunds_for_transaction(&self, transaction_id: &str) -> Result<Vec<Refund>> {
        let docs: Vec<serde_json::Value> = sqlx::query_scalar(
            "SELECT doc FROM refunds WHERE transaction_id = $1 ORDER BY id",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(Error::from))
            .collect()
    }
}

#[derive(Clone)]
pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn append_change(&self, change: InventoryChange) -> Result<bool> {
        let doc = serde_json::to_value(&change)?;
        let result = sqlx::query(
            "INSERT INTO inventory_changes \
             (id, product_id, variant_id, change_type, reference_id, quantity_delta, doc) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (reference_id, product_id, variant_id, change_type) DO NOTHING",
        )
        .bind(&change.id)
        .bind(&change.product_id)
        .bind(variant_column(change.variant_id.as_deref()))
        .bind(change.change_type.as_str())
        .bind(&change.reference_id)
        .bind(change.quantity_delta)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn changes_for_reference(&self, reference_id: &str) -> Result<Vec<InventoryChange>> {
        let docs: Vec<serde_json::Value> =
            sqlx::query_scalar("SELECT doc FROM inventory_changes WHERE reference_id = $1")
                .bind(reference_id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(Error::from))
            .collect()
    }

    async fn current_stock(&self, product_id: &str, variant_id: Option<&str>) -> Result<i64> {
        let stock: i64 = sqlx::query_scalar(
            "SELECT CAST(COALESCE(SUM(quantity_delta), 0) AS BIGINT) \
             FROM inventory_changes WHERE product_id = $1 AND variant_id = $2",
        )
        .bind(product_id)
        .bind(variant_column(variant_id))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(stock)
    }

    async fn stock_levels(&self) -> Result<Vec<StockLevel>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT product_id, variant_id, CAST(COALESCE(SUM(quantity_delta), 0) AS BIGINT) \
             FROM inventory_changes GROUP BY product_id, variant_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|(product_id, variant_id, stock)| StockLevel {
                product_id,
                variant_id: variant_from_column(variant_id),
                stock,
            })
            .collect())
    }

    async fn insert_alert(&self, alert: InventoryAlert) -> Result<()> {
        let doc = serde_json::to_value(&alert)?;
        sqlx::query(
            "INSERT INTO inventory_alerts (id, product_id, variant_id, status, doc) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&alert.id)
        .bind(&alert.product_id)
        .bind(variant_column(alert.variant_id.as_deref()))
        .bind("open")
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn unresolved_alert_exists(
        &self,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> Result<bool> {
        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM inventory_alerts \
             WHERE product_id = $1 AND variant_id = $2 AND status <> 'resolved' LIMIT 1",
        )
        .bind(product_id)
        .bind(variant_column(variant_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(exists.is_some())
    }

    async fn open_alerts(&self) -> Result<Vec<InventoryAlert>> {
        let docs: Vec<serde_json::Value> =
            sqlx::query_scalar("SELECT doc FROM inventory_alerts WHERE status = 'open'")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(Error::from))
            .collect()
    }

    async fn mark_alert_notified(&self, id: &str) -> Result<()> {
        let mut alert: InventoryAlert = {
            let doc: Option<serde_json::Value> =
                sqlx::query_scalar("SELECT doc FROM inventory_alerts WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_err)?;
            serde_json::from_value(doc.ok_or(Error::NotFound("inventory alert"))?)?
        };
        alert.status = AlertStatus::Notified;
        alert.notified_at = Some(chrono::Utc::now());
        let doc = serde_json::to_value(&alert)?;
        sqlx::query("UPDATE inventory_alerts SET status = 'notified', doc = $2 WHERE id = $1")
            .bind(id)
            .bind(doc)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn resolve_alerts(&self, product_id: &str, variant_id: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE inventory_alerts \
             SET status = 'resolved', doc = jsonb_set(doc, '{status}', '\"resolved\"') \
             WHERE product_id = $1 AND variant_id = $2 AND status <> 'resolved'",
        )
        .bind(product_id)
        .bind(variant_column(variant_id))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn alerts(&self) -> Result<Vec<InventoryAlert>> {
        let docs: Vec<serde_json::Value> =
            sqlx::query_scalar("SELECT doc FROM inventory_alerts ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(Error::from))
            .collect()
    }
}
