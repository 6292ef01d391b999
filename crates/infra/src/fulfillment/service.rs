use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::instrument;

use cafeflow_core::{IngredientId, OrderId};
use cafeflow_inventory::InventoryTransaction;
use cafeflow_orders::{
    CreateOrderRequest, Order, OrderItem, OrderStatus, OrderStatusHistory, UpdateOrderRequest,
};

use crate::config::FulfillmentConfig;
use crate::store::FulfillmentStore;

use super::availability::AvailabilityValidator;
use super::batch::{BatchCoordinator, BatchReport};
use super::committer::{CommitReceipt, DeletePolicy, OrderAmendment, OrderCommitter, OrderEdit};
use super::error::FulfillmentError;
use super::requirements::RequirementCalculator;

/// An order with its lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Entry point of the fulfillment engine.
pub struct OrderService<S> {
    store: Arc<S>,
    calculator: RequirementCalculator<S>,
    committer: OrderCommitter<S>,
    batch: BatchCoordinator<S>,
    config: FulfillmentConfig,
}

impl<S> OrderService<S>
where
    S: FulfillmentStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, FulfillmentConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: FulfillmentConfig) -> Self {
        Self {
            calculator: RequirementCalculator::new(Arc::clone(&store)),
            committer: OrderCommitter::new(Arc::clone(&store)),
            batch: BatchCoordinator::new(Arc::clone(&store)),
            store,
            config,
        }
    }

    /// Calculate, pre-check and commit one order.
    #[instrument(skip(self, request), fields(customer = %request.customer_name), err)]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<CommitReceipt, FulfillmentError> {
        request.validate()?;
        let requirements = self.calculator.calculate(&request.items).await?;
        AvailabilityValidator::validate(&requirements)?;
        self.committer.commit(&request).await
    }

    /// Process a batch, honouring the configured deadline if any.
    pub async fn batch_create_orders(
        &self,
        requests: Vec<CreateOrderRequest>,
    ) -> Result<BatchReport, FulfillmentError> {
        match self.config.batch_deadline {
            Some(deadline) => self.batch.run_within(requests, deadline).await,
            None => self.batch.run(requests).await,
        }
    }

    pub async fn batch_create_orders_within(
        &self,
        requests: Vec<CreateOrderRequest>,
        deadline: Duration,
    ) -> Result<BatchReport, FulfillmentError> {
        self.batch.run_within(requests, deadline).await
    }

    pub async fn update_order_status(
        &self,
        order_id: OrderId,
        status: &str,
        reason: Option<String>,
    ) -> Result<OrderStatusHistory, FulfillmentError> {
        let next: OrderStatus = status.parse()?;
        self.committer.update_status(order_id, next, reason).await
    }

    /// Edit an order's customer name, annotations and/or status. A status
    /// change follows the same rules as [`OrderService::update_order_status`].
    pub async fn update_order(
        &self,
        order_id: OrderId,
        request: UpdateOrderRequest,
    ) -> Result<OrderAmendment, FulfillmentError> {
        request.validate()?;
        let status = request
            .status
            .as_deref()
            .map(str::parse::<OrderStatus>)
            .transpose()?;
        let edit = OrderEdit {
            customer_name: request.customer_name,
            special_instructions: request.special_instructions,
            status,
            reason: request.reason,
        };
        self.committer.amend(order_id, edit).await
    }

    /// Mark an order delivered. Inventory is not touched.
    pub async fn close_order(
        &self,
        order_id: OrderId,
        reason: Option<String>,
    ) -> Result<OrderStatusHistory, FulfillmentError> {
        let reason = reason.unwrap_or_else(|| self.config.close_reason.clone());
        self.committer
            .update_status(order_id, OrderStatus::Delivered, Some(reason))
            .await
    }

    pub async fn delete_order(
        &self,
        order_id: OrderId,
        policy: DeletePolicy,
    ) -> Result<Vec<InventoryTransaction>, FulfillmentError> {
        self.committer.delete(order_id, policy).await
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<OrderDetails, FulfillmentError> {
        let order = self.store.order(order_id).await?;
        let items = self.store.order_items(order_id).await?;
        Ok(OrderDetails { order, items })
    }

    pub async fn list_orders(&self) -> Result<Vec<Order>, FulfillmentError> {
        Ok(self.store.list_orders().await?)
    }

    pub async fn status_history(&self, order_id: OrderId) -> Result<Vec<OrderStatusHistory>, FulfillmentError> {
        self.store.order(order_id).await?;
        Ok(self.store.status_history(order_id).await?)
    }

    /// Every recorded status change, newest first.
    pub async fn all_status_history(&self) -> Result<Vec<OrderStatusHistory>, FulfillmentError> {
        Ok(self.store.all_status_history().await?)
    }

    pub async fn ingredient_transactions(
        &self,
        ingredient_id: IngredientId,
    ) -> Result<Vec<InventoryTransaction>, FulfillmentError> {
        self.store.ingredient(ingredient_id).await?;
        Ok(self.store.transactions(ingredient_id).await?)
    }
}
