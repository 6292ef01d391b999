use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use cafeflow_core::{IngredientId, OrderId};
use cafeflow_inventory::{InventoryTransaction, StockLevel};
use cafeflow_orders::{
    CreateOrderRequest, Order, OrderDraft, OrderItem, OrderStatus, OrderStatusHistory,
};

use crate::store::{FulfillmentStore, StoreError, UnitOfWork};

use super::error::FulfillmentError;
use super::requirements::{aggregate_demand, ensure_recipe, map_recipe_error};

/// What happens to consumed stock when an order is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Stock stays consumed; only the order records go away.
    #[default]
    RetainConsumption,
    /// Every deduction of the order is credited back as an adjustment.
    Restock,
}

/// Stock consumed by one committed order for one ingredient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deduction {
    pub ingredient_id: IngredientId,
    pub name: String,
    pub unit: String,
    pub quantity_used: Decimal,
    pub remaining: Decimal,
}

/// Ingredient at or below its reorder point after a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowStockAlert {
    pub ingredient_id: IngredientId,
    pub name: String,
    pub unit: String,
    pub remaining: Decimal,
    pub reorder_point: Decimal,
}

impl From<&StockLevel> for LowStockAlert {
    fn from(level: &StockLevel) -> Self {
        Self {
            ingredient_id: level.ingredient_id,
            name: level.name.clone(),
            unit: level.unit.clone(),
            remaining: level.remaining,
            reorder_point: level.reorder_point,
        }
    }
}

/// Result of a committed order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitReceipt {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub deductions: Vec<Deduction>,
    pub low_stock: Vec<LowStockAlert>,
}

/// Order header after an edit, with the history row of its status change if
/// the edit moved the status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderAmendment {
    pub order: Order,
    pub history: Option<OrderStatusHistory>,
}

/// Requested header edit with the status already parsed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderEdit {
    pub customer_name: Option<String>,
    pub special_instructions: Option<serde_json::Value>,
    pub status: Option<OrderStatus>,
    pub reason: Option<String>,
}

/// Commits orders, status changes and deletions, each in one unit of work.
pub struct OrderCommitter<S> {
    store: Arc<S>,
}

impl<S> Clone for OrderCommitter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

/// Roll back after a failed step and hand back the original error.
async fn abort<U: UnitOfWork>(unit: U, err: FulfillmentError) -> FulfillmentError {
    if let Err(rollback_err) = unit.rollback().await {
        warn!(error = %rollback_err, "rollback failed");
    }
    err
}

impl<S> OrderCommitter<S>
where
    S: FulfillmentStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Price, persist and deduct stock for one order, all or nothing.
    ///
    /// Any shortfall found by the authoritative compare-and-decrement aborts
    /// the whole unit: no order, no items, no deductions.
    #[instrument(skip(self, request), fields(customer = %request.customer_name, lines = request.items.len()), err)]
    pub async fn commit(&self, request: &CreateOrderRequest) -> Result<CommitReceipt, FulfillmentError> {
        request.validate()?;

        let mut unit = self.store.begin().await?;
        let receipt = match stage_order(&mut unit, request).await {
            Ok(receipt) => receipt,
            Err(err) => return Err(abort(unit, err).await),
        };
        unit.commit().await?;

        info!(
            order_id = %receipt.order.id_typed(),
            total = %receipt.order.total(),
            "order committed"
        );
        for alert in &receipt.low_stock {
            warn!(
                ingredient_id = %alert.ingredient_id,
                ingredient = %alert.name,
                remaining = %alert.remaining,
                reorder_point = %alert.reorder_point,
                "ingredient at or below reorder point"
            );
        }

        Ok(receipt)
    }

    /// Move an order to `next`, recording one history row.
    #[instrument(skip(self, reason), fields(order_id = %order_id, next = %next), err)]
    pub async fn update_status(
        &self,
        order_id: OrderId,
        next: OrderStatus,
        reason: Option<String>,
    ) -> Result<OrderStatusHistory, FulfillmentError> {
        let mut unit = self.store.begin().await?;
        let history = match stage_transition(&mut unit, order_id, next, reason).await {
            Ok(history) => history,
            Err(err) => return Err(abort(unit, err).await),
        };
        unit.commit().await?;

        info!(
            from = %history.previous_status,
            to = %history.new_status,
            "order status changed"
        );
        Ok(history)
    }

    /// Edit customer name, annotations and/or status in one unit of work.
    #[instrument(skip(self, edit), fields(order_id = %order_id), err)]
    pub async fn amend(&self, order_id: OrderId, edit: OrderEdit) -> Result<OrderAmendment, FulfillmentError> {
        let mut unit = self.store.begin().await?;
        let amendment = match stage_amend(&mut unit, order_id, edit).await {
            Ok(amendment) => amendment,
            Err(err) => return Err(abort(unit, err).await),
        };
        unit.commit().await?;

        info!(
            status = %amendment.order.status(),
            status_changed = amendment.history.is_some(),
            "order updated"
        );
        Ok(amendment)
    }

    /// Delete an order with its items and history. Returns the restock
    /// transactions written under [`DeletePolicy::Restock`].
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn delete(
        &self,
        order_id: OrderId,
        policy: DeletePolicy,
    ) -> Result<Vec<InventoryTransaction>, FulfillmentError> {
        let mut unit = self.store.begin().await?;
        let restocked = match stage_delete(&mut unit, order_id, policy).await {
            Ok(restocked) => restocked,
            Err(err) => return Err(abort(unit, err).await),
        };
        unit.commit().await?;

        info!(?policy, restocked = restocked.len(), "order deleted");
        Ok(restocked)
    }
}

fn order_not_found(order_id: OrderId) -> impl FnOnce(StoreError) -> FulfillmentError {
    move |err| match err {
        StoreError::NotFound(_) => FulfillmentError::NotFound(format!("order {order_id}")),
        other => other.into(),
    }
}

async fn stage_order<U: UnitOfWork>(
    unit: &mut U,
    request: &CreateOrderRequest,
) -> Result<CommitReceipt, FulfillmentError> {
    let now = Utc::now();
    let mut draft = OrderDraft::new(
        request.customer_name.clone(),
        request.special_instructions.clone(),
        now,
    );

    for line in &request.items {
        let price = unit
            .current_price(line.menu_item_id)
            .await
            .map_err(|e| map_recipe_error(line.menu_item_id, e))?;
        draft.add_line(line.menu_item_id, line.quantity, price, line.customizations.clone());
    }

    let order = draft.order();
    unit.insert_order(&order, draft.items()).await?;

    let mut recipes = Vec::with_capacity(request.items.len());
    for line in &request.items {
        let recipe = unit
            .recipe(line.menu_item_id)
            .await
            .map_err(|e| map_recipe_error(line.menu_item_id, e))?;
        ensure_recipe(&recipe)?;
        recipes.push((recipe, line.quantity));
    }
    let demand = aggregate_demand(recipes.iter().map(|(r, q)| (r, *q)));

    // Deduct in ingredient-id order so concurrent units lock rows in the same order.
    let mut deductions = Vec::with_capacity(demand.len());
    let mut low_stock = Vec::new();
    for (ingredient_id, amount) in demand {
        let level = unit.check_and_deduct(ingredient_id, amount).await?;
        unit.record_transaction(&InventoryTransaction::deduction(
            ingredient_id,
            amount,
            order.id_typed(),
            now,
        ))
        .await?;

        debug!(
            ingredient_id = %ingredient_id,
            amount = %amount,
            remaining = %level.remaining,
            "stock deducted"
        );

        if level.is_low() {
            low_stock.push(LowStockAlert::from(&level));
        }
        deductions.push(Deduction {
            ingredient_id,
            name: level.name,
            unit: level.unit,
            quantity_used: amount,
            remaining: level.remaining,
        });
    }

    Ok(CommitReceipt {
        order,
        items: draft.items().to_vec(),
        deductions,
        low_stock,
    })
}

async fn stage_transition<U: UnitOfWork>(
    unit: &mut U,
    order_id: OrderId,
    next: OrderStatus,
    reason: Option<String>,
) -> Result<OrderStatusHistory, FulfillmentError> {
    let mut order = unit
        .lock_order(order_id)
        .await
        .map_err(order_not_found(order_id))?;
    let history = order.transition(next, reason, Utc::now())?;
    unit.update_order_status(&order).await?;
    unit.append_status_history(&history).await?;
    Ok(history)
}

async fn stage_amend<U: UnitOfWork>(
    unit: &mut U,
    order_id: OrderId,
    edit: OrderEdit,
) -> Result<OrderAmendment, FulfillmentError> {
    let mut order = unit
        .lock_order(order_id)
        .await
        .map_err(order_not_found(order_id))?;
    let now = Utc::now();

    if edit.customer_name.is_some() || edit.special_instructions.is_some() {
        order.amend(edit.customer_name, edit.special_instructions, now);
        unit.update_order_details(&order).await?;
    }

    let history = match edit.status {
        Some(next) => {
            let history = order.transition(next, edit.reason, now)?;
            unit.update_order_status(&order).await?;
            unit.append_status_history(&history).await?;
            Some(history)
        }
        None => None,
    };

    Ok(OrderAmendment { order, history })
}

async fn stage_delete<U: UnitOfWork>(
    unit: &mut U,
    order_id: OrderId,
    policy: DeletePolicy,
) -> Result<Vec<InventoryTransaction>, FulfillmentError> {
    unit.lock_order(order_id)
        .await
        .map_err(order_not_found(order_id))?;

    let mut restocked = Vec::new();
    if policy == DeletePolicy::Restock {
        let now = Utc::now();
        for deduction in unit.order_deductions(order_id).await? {
            unit.credit_stock(deduction.ingredient_id, deduction.amount())
                .await?;
            let credit = InventoryTransaction::reversal(
                deduction.ingredient_id,
                deduction.amount(),
                order_id,
                now,
            );
            unit.record_transaction(&credit).await?;
            restocked.push(credit);
        }
    }

    unit.delete_order(order_id)
        .await
        .map_err(order_not_found(order_id))?;
    Ok(restocked)
}
