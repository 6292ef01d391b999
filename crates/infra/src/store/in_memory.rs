use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use cafeflow_core::{Entity, IngredientId, MenuItemId, OrderId};
use cafeflow_inventory::{Ingredient, InventoryTransaction, StockError, StockLevel};
use cafeflow_menu::{MenuItem, Recipe};
use cafeflow_orders::{Order, OrderItem, OrderStatusHistory};

use super::r#trait::{
    FulfillmentStore, InventoryLedger, OrderReader, RecipeIndex, StoreError, UnitOfWork,
};

/// Operation at which the next unit of work fails with a backend error.
///
/// Used by tests to prove that a failure midway leaves nothing behind.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailPoint {
    PriceLookup,
    InsertOrder,
    RecordTransaction,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    menu_items: HashMap<MenuItemId, MenuItem>,
    recipes: HashMap<MenuItemId, Recipe>,
    ingredients: HashMap<IngredientId, Ingredient>,
    transactions: Vec<InventoryTransaction>,
    orders: HashMap<OrderId, Order>,
    order_items: Vec<OrderItem>,
    history: Vec<OrderStatusHistory>,
}

impl StoreState {
    fn recipe(&self, menu_item_id: MenuItemId) -> Result<Recipe, StoreError> {
        if !self.menu_items.contains_key(&menu_item_id) {
            return Err(StoreError::NotFound(format!("menu item {menu_item_id}")));
        }
        match self.recipes.get(&menu_item_id) {
            Some(recipe) => Ok(recipe.clone()),
            None => Recipe::new(menu_item_id, Vec::new())
                .map_err(|e| StoreError::Backend(e.to_string())),
        }
    }

    fn ingredient_mut(&mut self, ingredient_id: IngredientId) -> Result<&mut Ingredient, StoreError> {
        self.ingredients
            .get_mut(&ingredient_id)
            .ok_or_else(|| StoreError::NotFound(format!("ingredient {ingredient_id}")))
    }

    /// Orders are only ever updated from a copy loaded in the same unit, so
    /// the whole header is replaced.
    fn replace_order(&mut self, order: &Order) -> Result<(), StoreError> {
        let slot = self
            .orders
            .get_mut(&order.id_typed())
            .ok_or_else(|| StoreError::NotFound(format!("order {}", order.id_typed())))?;
        *slot = order.clone();
        Ok(())
    }

    fn order(&self, order_id: OrderId) -> Result<Order, StoreError> {
        self.orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("order {order_id}")))
    }
}

/// In-memory fulfillment store.
///
/// Intended for tests/dev. A unit of work owns the whole state for its
/// lifetime and stages its changes on a copy, so units are serialized and a
/// dropped unit leaves no trace.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFulfillmentStore {
    state: Arc<Mutex<StoreState>>,
    faults: Arc<SyncMutex<Option<FailPoint>>>,
}

impl InMemoryFulfillmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a menu item together with its recipe.
    pub async fn add_menu_item(&self, item: MenuItem, recipe: Recipe) {
        let mut state = self.state.lock().await;
        state.recipes.insert(*item.id(), recipe);
        state.menu_items.insert(*item.id(), item);
    }

    /// Register a menu item that has no ingredient links.
    pub async fn add_menu_item_without_recipe(&self, item: MenuItem) {
        self.state.lock().await.menu_items.insert(*item.id(), item);
    }

    pub async fn add_ingredient(&self, ingredient: Ingredient) {
        self.state
            .lock()
            .await
            .ingredients
            .insert(*ingredient.id(), ingredient);
    }

    /// Make the next unit of work that reaches `point` fail there.
    pub fn fail_next(&self, point: FailPoint) {
        if let Ok(mut slot) = self.faults.lock() {
            *slot = Some(point);
        }
    }
}

#[async_trait]
impl RecipeIndex for InMemoryFulfillmentStore {
    async fn recipe(&self, menu_item_id: MenuItemId) -> Result<Recipe, StoreError> {
        self.state.lock().await.recipe(menu_item_id)
    }
}

#[async_trait]
impl InventoryLedger for InMemoryFulfillmentStore {
    async fn ingredient(&self, ingredient_id: IngredientId) -> Result<Ingredient, StoreError> {
        self.state
            .lock()
            .await
            .ingredients
            .get(&ingredient_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("ingredient {ingredient_id}")))
    }

    async fn transactions(
        &self,
        ingredient_id: IngredientId,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.ingredient_id == ingredient_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

#[async_trait]
impl OrderReader for InMemoryFulfillmentStore {
    async fn order(&self, order_id: OrderId) -> Result<Order, StoreError> {
        self.state.lock().await.order(order_id)
    }

    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .order_items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn list_orders(&self) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        let mut orders: Vec<_> = state.orders.values().cloned().collect();
        orders.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });
        Ok(orders)
    }

    async fn status_history(&self, order_id: OrderId) -> Result<Vec<OrderStatusHistory>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .history
            .iter()
            .rev()
            .filter(|h| h.order_id == order_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.changed_at.cmp(&a.changed_at));
        Ok(rows)
    }

    async fn all_status_history(&self) -> Result<Vec<OrderStatusHistory>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state.history.iter().rev().cloned().collect();
        rows.sort_by(|a, b| b.changed_at.cmp(&a.changed_at));
        Ok(rows)
    }
}

#[async_trait]
impl FulfillmentStore for InMemoryFulfillmentStore {
    type Unit = InMemoryUnit;

    async fn begin(&self) -> Result<Self::Unit, StoreError> {
        let live = Arc::clone(&self.state).lock_owned().await;
        let staged = live.clone();
        Ok(InMemoryUnit {
            live,
            staged,
            faults: Arc::clone(&self.faults),
        })
    }
}

/// Unit of work over [`InMemoryFulfillmentStore`].
pub struct InMemoryUnit {
    live: OwnedMutexGuard<StoreState>,
    staged: StoreState,
    faults: Arc<SyncMutex<Option<FailPoint>>>,
}

impl InMemoryUnit {
    fn trip(&self, point: FailPoint) -> Result<(), StoreError> {
        let mut slot = self
            .faults
            .lock()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        if *slot == Some(point) {
            *slot = None;
            return Err(StoreError::Backend(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

fn map_stock_error(err: StockError) -> StoreError {
    match err {
        StockError::Insufficient(shortfall) => StoreError::InsufficientStock(shortfall),
        StockError::InvalidAmount(amount) => {
            StoreError::Backend(format!("invalid stock amount {amount}"))
        }
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnit {
    async fn current_price(&mut self, menu_item_id: MenuItemId) -> Result<Decimal, StoreError> {
        self.trip(FailPoint::PriceLookup)?;
        self.staged
            .menu_items
            .get(&menu_item_id)
            .map(|item| item.price)
            .ok_or_else(|| StoreError::NotFound(format!("menu item {menu_item_id}")))
    }

    async fn recipe(&mut self, menu_item_id: MenuItemId) -> Result<Recipe, StoreError> {
        self.staged.recipe(menu_item_id)
    }

    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> Result<(), StoreError> {
        self.trip(FailPoint::InsertOrder)?;
        self.staged.orders.insert(*order.id(), order.clone());
        self.staged.order_items.extend_from_slice(items);
        Ok(())
    }

    async fn check_and_deduct(
        &mut self,
        ingredient_id: IngredientId,
        amount: Decimal,
    ) -> Result<StockLevel, StoreError> {
        self.staged
            .ingredient_mut(ingredient_id)?
            .deduct(amount, Utc::now())
            .map_err(map_stock_error)
    }

    async fn credit_stock(
        &mut self,
        ingredient_id: IngredientId,
        amount: Decimal,
    ) -> Result<StockLevel, StoreError> {
        self.staged
            .ingredient_mut(ingredient_id)?
            .credit(amount, Utc::now())
            .map_err(map_stock_error)
    }

    async fn record_transaction(&mut self, transaction: &InventoryTransaction) -> Result<(), StoreError> {
        self.trip(FailPoint::RecordTransaction)?;
        self.staged.transactions.push(transaction.clone());
        Ok(())
    }

    async fn lock_order(&mut self, order_id: OrderId) -> Result<Order, StoreError> {
        self.staged.order(order_id)
    }

    async fn update_order_status(&mut self, order: &Order) -> Result<(), StoreError> {
        self.staged.replace_order(order)
    }

    async fn update_order_details(&mut self, order: &Order) -> Result<(), StoreError> {
        self.staged.replace_order(order)
    }

    async fn append_status_history(&mut self, history: &OrderStatusHistory) -> Result<(), StoreError> {
        self.staged.history.push(history.clone());
        Ok(())
    }

    async fn order_deductions(&mut self, order_id: OrderId) -> Result<Vec<InventoryTransaction>, StoreError> {
        Ok(self
            .staged
            .transactions
            .iter()
            .filter(|t| t.order_id == Some(order_id) && t.is_deduction())
            .cloned()
            .collect())
    }

    async fn delete_order(&mut self, order_id: OrderId) -> Result<(), StoreError> {
        if self.staged.orders.remove(&order_id).is_none() {
            return Err(StoreError::NotFound(format!("order {order_id}")));
        }
        self.staged.order_items.retain(|i| i.order_id != order_id);
        self.staged.history.retain(|h| h.order_id != order_id);
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        self.trip(FailPoint::Commit)?;
        *self.live = self.staged;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
