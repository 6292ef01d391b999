use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use cafeflow_core::{IngredientId, MenuItemId, OrderId};
use cafeflow_inventory::{Ingredient, InventoryTransaction, Shortfall, StockLevel};
use cafeflow_menu::Recipe;
use cafeflow_orders::{Order, OrderItem, OrderStatusHistory};

/// Store operation error.
///
/// These are **infrastructure errors** as opposed to domain errors. The one
/// exception is `InsufficientStock`, which is how the authoritative
/// compare-and-decrement reports a failed check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient stock: {0}")]
    InsufficientStock(Shortfall),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Read access to recipes (menu item → ingredient consumption).
#[async_trait]
pub trait RecipeIndex: Send + Sync {
    /// Recipe of a menu item. Unknown menu items fail with `NotFound`; a
    /// known item without ingredient links yields an empty recipe.
    async fn recipe(&self, menu_item_id: MenuItemId) -> Result<Recipe, StoreError>;
}

/// Read access to stock and the append-only ledger.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    async fn ingredient(&self, ingredient_id: IngredientId) -> Result<Ingredient, StoreError>;

    /// Ledger rows for one ingredient, newest first.
    async fn transactions(
        &self,
        ingredient_id: IngredientId,
    ) -> Result<Vec<InventoryTransaction>, StoreError>;
}

/// Read access to persisted orders.
#[async_trait]
pub trait OrderReader: Send + Sync {
    async fn order(&self, order_id: OrderId) -> Result<Order, StoreError>;

    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError>;

    /// All orders, newest first.
    async fn list_orders(&self) -> Result<Vec<Order>, StoreError>;

    /// Status history of one order, newest first.
    async fn status_history(&self, order_id: OrderId) -> Result<Vec<OrderStatusHistory>, StoreError>;

    /// Status history across every order, newest first.
    async fn all_status_history(&self) -> Result<Vec<OrderStatusHistory>, StoreError>;
}

/// Transactional record store used by the fulfillment services.
///
/// Every mutation goes through a [`UnitOfWork`]. Nothing a unit does is
/// visible to other readers until `commit` succeeds; dropping a unit without
/// committing discards all of its changes.
#[async_trait]
pub trait FulfillmentStore: RecipeIndex + InventoryLedger + OrderReader + Send + Sync {
    type Unit: UnitOfWork + 'static;

    async fn begin(&self) -> Result<Self::Unit, StoreError>;
}

/// One all-or-nothing unit of work.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Current menu price, read inside the unit.
    async fn current_price(&mut self, menu_item_id: MenuItemId) -> Result<Decimal, StoreError>;

    async fn recipe(&mut self, menu_item_id: MenuItemId) -> Result<Recipe, StoreError>;

    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> Result<(), StoreError>;

    /// Atomically check `quantity >= amount` and decrement.
    ///
    /// The row stays locked until the unit ends. Fails with
    /// `InsufficientStock` (nothing written) or `NotFound`.
    async fn check_and_deduct(
        &mut self,
        ingredient_id: IngredientId,
        amount: Decimal,
    ) -> Result<StockLevel, StoreError>;

    async fn credit_stock(
        &mut self,
        ingredient_id: IngredientId,
        amount: Decimal,
    ) -> Result<StockLevel, StoreError>;

    async fn record_transaction(&mut self, transaction: &InventoryTransaction) -> Result<(), StoreError>;

    /// Load an order and hold it against concurrent status changes.
    async fn lock_order(&mut self, order_id: OrderId) -> Result<Order, StoreError>;

    /// Persist the order's status and `updated_at`.
    async fn update_order_status(&mut self, order: &Order) -> Result<(), StoreError>;

    /// Persist the order's customer name, annotations and `updated_at`.
    async fn update_order_details(&mut self, order: &Order) -> Result<(), StoreError>;

    async fn append_status_history(&mut self, history: &OrderStatusHistory) -> Result<(), StoreError>;

    /// Deduction transactions recorded against an order.
    async fn order_deductions(&mut self, order_id: OrderId) -> Result<Vec<InventoryTransaction>, StoreError>;

    /// Remove an order with its items and status history.
    async fn delete_order(&mut self, order_id: OrderId) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
