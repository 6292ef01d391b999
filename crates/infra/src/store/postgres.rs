//! Postgres-backed fulfillment store.
//!
//! ## Authoritative stock check
//!
//! `check_and_deduct` is a single conditional update:
//!
//! ```sql
//! UPDATE inventory SET quantity = quantity - $1
//! WHERE ingredient_id = $2 AND quantity >= $1
//! RETURNING ...
//! ```
//!
//! The check and the write happen in one statement and the row stays locked
//! until the surrounding transaction ends, so two concurrent orders can never
//! both consume the last units. Zero returned rows means either the
//! ingredient does not exist or the stock is short; a follow-up read tells
//! the two apart.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | RowNotFound | `NotFound` |
//! | Database / PoolClosed / other | `Backend` (with operation context) |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use cafeflow_core::{HistoryId, IngredientId, MenuItemId, OrderId, OrderItemId, TransactionId};
use cafeflow_inventory::{Ingredient, InventoryTransaction, Shortfall, StockLevel};
use cafeflow_menu::{Recipe, RecipeLine};
use cafeflow_orders::{Order, OrderItem, OrderStatus, OrderStatusHistory};

use crate::config::FulfillmentConfig;

use super::r#trait::{
    FulfillmentStore, InventoryLedger, OrderReader, RecipeIndex, StoreError, UnitOfWork,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS menu_items (
        menu_item_id UUID PRIMARY KEY,
        name         TEXT NOT NULL,
        description  TEXT NOT NULL DEFAULT '',
        price        NUMERIC(12, 2) NOT NULL CHECK (price >= 0),
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inventory (
        ingredient_id UUID PRIMARY KEY,
        name          TEXT NOT NULL,
        quantity      NUMERIC(14, 3) NOT NULL CHECK (quantity >= 0),
        unit          TEXT NOT NULL,
        unit_price    NUMERIC(12, 2) NOT NULL DEFAULT 0,
        reorder_point NUMERIC(14, 3) NOT NULL DEFAULT 0,
        last_updated  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS menu_item_ingredients (
        menu_item_id  UUID NOT NULL REFERENCES menu_items (menu_item_id) ON DELETE CASCADE,
        ingredient_id UUID NOT NULL REFERENCES inventory (ingredient_id),
        quantity      NUMERIC(14, 3) NOT NULL CHECK (quantity > 0),
        unit          TEXT NOT NULL,
        PRIMARY KEY (menu_item_id, ingredient_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        order_id             UUID PRIMARY KEY,
        customer_name        TEXT NOT NULL,
        special_instructions JSONB NOT NULL DEFAULT '{}',
        total_amount         NUMERIC(12, 2) NOT NULL,
        status               TEXT NOT NULL,
        created_at           TIMESTAMPTZ NOT NULL,
        updated_at           TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS order_items (
        order_item_id  UUID PRIMARY KEY,
        order_id       UUID NOT NULL REFERENCES orders (order_id) ON DELETE CASCADE,
        menu_item_id   UUID NOT NULL REFERENCES menu_items (menu_item_id),
        quantity       INTEGER NOT NULL CHECK (quantity > 0),
        price_at_time  NUMERIC(12, 2) NOT NULL,
        customizations JSONB NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS order_status_history (
        order_status_id UUID PRIMARY KEY,
        order_id        UUID NOT NULL REFERENCES orders (order_id) ON DELETE CASCADE,
        old_status      TEXT NOT NULL,
        new_status      TEXT NOT NULL,
        change_reason   TEXT NULL,
        changed_at      TIMESTAMPTZ NOT NULL
    )
    "#,
    // order_id is a plain reference: ledger rows outlive deleted orders.
    r#"
    CREATE TABLE IF NOT EXISTS inventory_transactions (
        transaction_id   UUID PRIMARY KEY,
        ingredient_id    UUID NOT NULL REFERENCES inventory (ingredient_id),
        quantity_change  NUMERIC(14, 3) NOT NULL,
        transaction_type TEXT NOT NULL,
        reason           TEXT NOT NULL,
        order_id         UUID NULL,
        created_at       TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS inventory_transactions_order_idx
        ON inventory_transactions (order_id)
    "#,
];

/// Postgres-backed fulfillment store.
///
/// `Send + Sync`; all database access goes through the SQLx pool. Units of
/// work are plain database transactions.
#[derive(Debug, Clone)]
pub struct PostgresFulfillmentStore {
    pool: Arc<PgPool>,
}

impl PostgresFulfillmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool sized from the configuration.
    pub async fn connect(config: &FulfillmentConfig) -> Result<Self, StoreError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Backend("DATABASE_URL is not set".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self::new(pool))
    }

    /// Create the fulfillment tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<Postgres>, StoreError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))
    }
}

#[async_trait]
impl RecipeIndex for PostgresFulfillmentStore {
    #[instrument(skip(self), fields(menu_item_id = %menu_item_id), err)]
    async fn recipe(&self, menu_item_id: MenuItemId) -> Result<Recipe, StoreError> {
        let mut conn = self.acquire().await?;
        load_recipe(&mut conn, menu_item_id).await
    }
}

#[async_trait]
impl InventoryLedger for PostgresFulfillmentStore {
    #[instrument(skip(self), fields(ingredient_id = %ingredient_id), err)]
    async fn ingredient(&self, ingredient_id: IngredientId) -> Result<Ingredient, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT ingredient_id, name, quantity, unit, reorder_point, last_updated
            FROM inventory
            WHERE ingredient_id = $1
            "#,
        )
        .bind(ingredient_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ingredient", e))?
        .ok_or_else(|| StoreError::NotFound(format!("ingredient {ingredient_id}")))?;

        IngredientRow::from_row(&row)
            .map_err(|e| map_sqlx_error("ingredient", e))?
            .try_into()
    }

    #[instrument(skip(self), fields(ingredient_id = %ingredient_id), err)]
    async fn transactions(
        &self,
        ingredient_id: IngredientId,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_id, ingredient_id, quantity_change, transaction_type, reason, order_id, created_at
            FROM inventory_transactions
            WHERE ingredient_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(ingredient_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("transactions", e))?;

        rows.iter().map(transaction_from_row).collect()
    }
}

#[async_trait]
impl OrderReader for PostgresFulfillmentStore {
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn order(&self, order_id: OrderId) -> Result<Order, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT order_id, customer_name, special_instructions, total_amount, status, created_at, updated_at
            FROM orders
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("order", e))?
        .ok_or_else(|| StoreError::NotFound(format!("order {order_id}")))?;

        order_from_row(&row)
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT order_item_id, order_id, menu_item_id, quantity, price_at_time, customizations
            FROM order_items
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("order_items", e))?;

        rows.iter().map(order_item_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, customer_name, special_instructions, total_amount, status, created_at, updated_at
            FROM orders
            ORDER BY created_at DESC, order_id DESC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_orders", e))?;

        rows.iter().map(order_from_row).collect()
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn status_history(&self, order_id: OrderId) -> Result<Vec<OrderStatusHistory>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT order_status_id, order_id, old_status, new_status, change_reason, changed_at
            FROM order_status_history
            WHERE order_id = $1
            ORDER BY changed_at DESC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("status_history", e))?;

        rows.iter().map(history_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn all_status_history(&self) -> Result<Vec<OrderStatusHistory>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT order_status_id, order_id, old_status, new_status, change_reason, changed_at
            FROM order_status_history
            ORDER BY changed_at DESC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("all_status_history", e))?;

        rows.iter().map(history_from_row).collect()
    }
}

#[async_trait]
impl FulfillmentStore for PostgresFulfillmentStore {
    type Unit = PostgresUnit;

    async fn begin(&self) -> Result<Self::Unit, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresUnit { tx })
    }
}

/// Unit of work backed by one Postgres transaction.
///
/// Dropping it without `commit` rolls the transaction back.
pub struct PostgresUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PostgresUnit {
    async fn current_price(&mut self, menu_item_id: MenuItemId) -> Result<Decimal, StoreError> {
        let row = sqlx::query("SELECT price FROM menu_items WHERE menu_item_id = $1")
            .bind(menu_item_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("current_price", e))?
            .ok_or_else(|| StoreError::NotFound(format!("menu item {menu_item_id}")))?;

        row.try_get("price")
            .map_err(|e| map_sqlx_error("current_price", e))
    }

    async fn recipe(&mut self, menu_item_id: MenuItemId) -> Result<Recipe, StoreError> {
        load_recipe(&mut self.tx, menu_item_id).await
    }

    #[instrument(skip(self, order, items), fields(order_id = %order.id_typed(), item_count = items.len()), err)]
    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (order_id, customer_name, special_instructions, total_amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id_typed().as_uuid())
        .bind(order.customer_name())
        .bind(order.special_instructions())
        .bind(order.total())
        .bind(order.status().as_str())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;

        for item in items {
            let quantity = i32::try_from(item.quantity)
                .map_err(|_| StoreError::Backend(format!("quantity {} out of range", item.quantity)))?;

            sqlx::query(
                r#"
                INSERT INTO order_items (order_item_id, order_id, menu_item_id, quantity, price_at_time, customizations)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(item.order_id.as_uuid())
            .bind(item.menu_item_id.as_uuid())
            .bind(quantity)
            .bind(item.price_at_time)
            .bind(&item.customizations)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_order_item", e))?;
        }

        Ok(())
    }

    #[instrument(skip(self), fields(ingredient_id = %ingredient_id, amount = %amount), err)]
    async fn check_and_deduct(
        &mut self,
        ingredient_id: IngredientId,
        amount: Decimal,
    ) -> Result<StockLevel, StoreError> {
        if amount <= Decimal::ZERO {
            return Err(StoreError::Backend(format!("invalid stock amount {amount}")));
        }

        let updated = sqlx::query(
            r#"
            UPDATE inventory
            SET quantity = quantity - $1, last_updated = NOW()
            WHERE ingredient_id = $2 AND quantity >= $1
            RETURNING ingredient_id, name, unit, quantity, reorder_point
            "#,
        )
        .bind(amount)
        .bind(ingredient_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("check_and_deduct", e))?;

        if let Some(row) = updated {
            return stock_level_from_row(&row);
        }

        let current = sqlx::query("SELECT name, unit, quantity FROM inventory WHERE ingredient_id = $1")
            .bind(ingredient_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("check_and_deduct", e))?
            .ok_or_else(|| StoreError::NotFound(format!("ingredient {ingredient_id}")))?;

        Err(StoreError::InsufficientStock(Shortfall {
            ingredient_id,
            name: current.try_get("name").map_err(|e| map_sqlx_error("check_and_deduct", e))?,
            unit: current.try_get("unit").map_err(|e| map_sqlx_error("check_and_deduct", e))?,
            required: amount,
            available: current
                .try_get("quantity")
                .map_err(|e| map_sqlx_error("check_and_deduct", e))?,
        }))
    }

    #[instrument(skip(self), fields(ingredient_id = %ingredient_id, amount = %amount), err)]
    async fn credit_stock(
        &mut self,
        ingredient_id: IngredientId,
        amount: Decimal,
    ) -> Result<StockLevel, StoreError> {
        if amount <= Decimal::ZERO {
            return Err(StoreError::Backend(format!("invalid stock amount {amount}")));
        }

        let row = sqlx::query(
            r#"
            UPDATE inventory
            SET quantity = quantity + $1, last_updated = NOW()
            WHERE ingredient_id = $2
            RETURNING ingredient_id, name, unit, quantity, reorder_point
            "#,
        )
        .bind(amount)
        .bind(ingredient_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("credit_stock", e))?
        .ok_or_else(|| StoreError::NotFound(format!("ingredient {ingredient_id}")))?;

        stock_level_from_row(&row)
    }

    async fn record_transaction(&mut self, transaction: &InventoryTransaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO inventory_transactions
                (transaction_id, ingredient_id, quantity_change, transaction_type, reason, order_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(transaction.transaction_id.as_uuid())
        .bind(transaction.ingredient_id.as_uuid())
        .bind(transaction.quantity_change)
        .bind(transaction.transaction_type.as_str())
        .bind(&transaction.reason)
        .bind(transaction.order_id.map(uuid::Uuid::from))
        .bind(transaction.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("record_transaction", e))?;

        Ok(())
    }

    async fn lock_order(&mut self, order_id: OrderId) -> Result<Order, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT order_id, customer_name, special_instructions, total_amount, status, created_at, updated_at
            FROM orders
            WHERE order_id = $1
            FOR UPDATE
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_order", e))?
        .ok_or_else(|| StoreError::NotFound(format!("order {order_id}")))?;

        order_from_row(&row)
    }

    async fn update_order_status(&mut self, order: &Order) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE orders SET status = $1, updated_at = $2 WHERE order_id = $3")
            .bind(order.status().as_str())
            .bind(order.updated_at())
            .bind(order.id_typed().as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_order_status", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("order {}", order.id_typed())));
        }
        Ok(())
    }

    async fn update_order_details(&mut self, order: &Order) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE orders SET customer_name = $1, special_instructions = $2, updated_at = $3 WHERE order_id = $4",
        )
        .bind(order.customer_name())
        .bind(order.special_instructions())
        .bind(order.updated_at())
        .bind(order.id_typed().as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_order_details", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("order {}", order.id_typed())));
        }
        Ok(())
    }

    async fn append_status_history(&mut self, history: &OrderStatusHistory) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO order_status_history (order_status_id, order_id, old_status, new_status, change_reason, changed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(history.id.as_uuid())
        .bind(history.order_id.as_uuid())
        .bind(history.previous_status.as_str())
        .bind(history.new_status.as_str())
        .bind(history.reason.as_deref())
        .bind(history.changed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_status_history", e))?;

        Ok(())
    }

    async fn order_deductions(&mut self, order_id: OrderId) -> Result<Vec<InventoryTransaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_id, ingredient_id, quantity_change, transaction_type, reason, order_id, created_at
            FROM inventory_transactions
            WHERE order_id = $1 AND transaction_type = 'deduction'
            ORDER BY ingredient_id
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("order_deductions", e))?;

        rows.iter().map(transaction_from_row).collect()
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn delete_order(&mut self, order_id: OrderId) -> Result<(), StoreError> {
        for statement in [
            "DELETE FROM order_status_history WHERE order_id = $1",
            "DELETE FROM order_items WHERE order_id = $1",
        ] {
            sqlx::query(statement)
                .bind(order_id.as_uuid())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("delete_order", e))?;
        }

        let result = sqlx::query("DELETE FROM orders WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_order", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("order {order_id}")));
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

async fn load_recipe(conn: &mut PgConnection, menu_item_id: MenuItemId) -> Result<Recipe, StoreError> {
    let exists = sqlx::query("SELECT 1 FROM menu_items WHERE menu_item_id = $1")
        .bind(menu_item_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("recipe", e))?;
    if exists.is_none() {
        return Err(StoreError::NotFound(format!("menu item {menu_item_id}")));
    }

    let rows = sqlx::query(
        r#"
        SELECT menu_item_id, ingredient_id, quantity, unit
        FROM menu_item_ingredients
        WHERE menu_item_id = $1
        ORDER BY ingredient_id
        "#,
    )
    .bind(menu_item_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("recipe", e))?;

    let mut lines = Vec::with_capacity(rows.len());
    for row in &rows {
        let get_err = |e| map_sqlx_error("recipe", e);
        lines.push(RecipeLine {
            menu_item_id: MenuItemId::from_uuid(row.try_get("menu_item_id").map_err(get_err)?),
            ingredient_id: IngredientId::from_uuid(row.try_get("ingredient_id").map_err(get_err)?),
            quantity: row.try_get("quantity").map_err(get_err)?,
            unit: row.try_get("unit").map_err(get_err)?,
        });
    }

    Recipe::new(menu_item_id, lines).map_err(|e| StoreError::Backend(format!("corrupt recipe: {e}")))
}

/// Database row for the `inventory` table.
struct IngredientRow {
    ingredient_id: uuid::Uuid,
    name: String,
    quantity: Decimal,
    unit: String,
    reorder_point: Decimal,
    last_updated: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for IngredientRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(IngredientRow {
            ingredient_id: row.try_get("ingredient_id")?,
            name: row.try_get("name")?,
            quantity: row.try_get("quantity")?,
            unit: row.try_get("unit")?,
            reorder_point: row.try_get("reorder_point")?,
            last_updated: row.try_get("last_updated")?,
        })
    }
}

impl TryFrom<IngredientRow> for Ingredient {
    type Error = StoreError;

    fn try_from(row: IngredientRow) -> Result<Self, Self::Error> {
        Ok(Ingredient::new(
            IngredientId::from_uuid(row.ingredient_id),
            row.name,
            row.quantity,
            row.unit,
        )
        .map_err(|e| StoreError::Backend(format!("corrupt inventory row: {e}")))?
        .with_reorder_point(row.reorder_point)
        .with_last_updated(row.last_updated))
    }
}

fn stock_level_from_row(row: &PgRow) -> Result<StockLevel, StoreError> {
    let get_err = |e| map_sqlx_error("stock_level", e);
    Ok(StockLevel {
        ingredient_id: IngredientId::from_uuid(row.try_get("ingredient_id").map_err(get_err)?),
        name: row.try_get("name").map_err(get_err)?,
        unit: row.try_get("unit").map_err(get_err)?,
        remaining: row.try_get("quantity").map_err(get_err)?,
        reorder_point: row.try_get("reorder_point").map_err(get_err)?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<InventoryTransaction, StoreError> {
    let get_err = |e| map_sqlx_error("transaction_row", e);
    let transaction_type: String = row.try_get("transaction_type").map_err(get_err)?;
    let order_id: Option<uuid::Uuid> = row.try_get("order_id").map_err(get_err)?;

    Ok(InventoryTransaction {
        transaction_id: TransactionId::from_uuid(row.try_get("transaction_id").map_err(get_err)?),
        ingredient_id: IngredientId::from_uuid(row.try_get("ingredient_id").map_err(get_err)?),
        quantity_change: row.try_get("quantity_change").map_err(get_err)?,
        transaction_type: transaction_type
            .parse()
            .map_err(|e| StoreError::Backend(format!("corrupt transaction row: {e}")))?,
        reason: row.try_get("reason").map_err(get_err)?,
        order_id: order_id.map(OrderId::from_uuid),
        created_at: row.try_get("created_at").map_err(get_err)?,
    })
}

fn parse_status(raw: &str) -> Result<OrderStatus, StoreError> {
    raw.parse()
        .map_err(|e| StoreError::Backend(format!("corrupt order status '{raw}': {e}")))
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let get_err = |e| map_sqlx_error("order_row", e);
    let status: String = row.try_get("status").map_err(get_err)?;
    let special_instructions: JsonValue = row.try_get("special_instructions").map_err(get_err)?;

    Ok(Order::restore(
        OrderId::from_uuid(row.try_get("order_id").map_err(get_err)?),
        row.try_get("customer_name").map_err(get_err)?,
        special_instructions,
        row.try_get("total_amount").map_err(get_err)?,
        parse_status(&status)?,
        row.try_get("created_at").map_err(get_err)?,
        row.try_get("updated_at").map_err(get_err)?,
    ))
}

fn order_item_from_row(row: &PgRow) -> Result<OrderItem, StoreError> {
    let get_err = |e| map_sqlx_error("order_item_row", e);
    let quantity: i32 = row.try_get("quantity").map_err(get_err)?;

    Ok(OrderItem {
        id: OrderItemId::from_uuid(row.try_get("order_item_id").map_err(get_err)?),
        order_id: OrderId::from_uuid(row.try_get("order_id").map_err(get_err)?),
        menu_item_id: MenuItemId::from_uuid(row.try_get("menu_item_id").map_err(get_err)?),
        quantity: u32::try_from(quantity)
            .map_err(|_| StoreError::Backend(format!("corrupt order item quantity {quantity}")))?,
        price_at_time: row.try_get("price_at_time").map_err(get_err)?,
        customizations: row.try_get("customizations").map_err(get_err)?,
    })
}

fn history_from_row(row: &PgRow) -> Result<OrderStatusHistory, StoreError> {
    let get_err = |e| map_sqlx_error("status_history_row", e);
    let old_status: String = row.try_get("old_status").map_err(get_err)?;
    let new_status: String = row.try_get("new_status").map_err(get_err)?;

    Ok(OrderStatusHistory {
        id: HistoryId::from_uuid(row.try_get("order_status_id").map_err(get_err)?),
        order_id: OrderId::from_uuid(row.try_get("order_id").map_err(get_err)?),
        previous_status: parse_status(&old_status)?,
        new_status: parse_status(&new_status)?,
        changed_at: row.try_get("changed_at").map_err(get_err)?,
        reason: row.try_get("change_reason").map_err(get_err)?,
    })
}

/// Map SQLx errors to StoreError with operation context.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            StoreError::Backend(format!(
                "database error in {operation} ({code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("row not found in {operation}")),
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = map_sqlx_error("order", sqlx::Error::RowNotFound);
        assert_eq!(err, StoreError::NotFound("row not found in order".to_string()));
    }

    #[test]
    fn pool_closed_maps_to_backend() {
        match map_sqlx_error("commit_transaction", sqlx::Error::PoolClosed) {
            StoreError::Backend(msg) => assert!(msg.contains("commit_transaction")),
            other => panic!("expected Backend, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_status_is_a_backend_error() {
        assert!(matches!(parse_status("shipped"), Err(StoreError::Backend(_))));
        assert_eq!(parse_status("ready").unwrap(), OrderStatus::Ready);
    }
}
