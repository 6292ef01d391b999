//! Batch order processing.
//!
//! ```text
//! requests
//!   ↓
//! 1. Pre-check: resolve each order on its own, sum what resolved, run the
//!    availability check once over the sum
//!   ↓
//! 2. One task per order: validate, reject early if it touches a short
//!    ingredient, otherwise run the full commit protocol
//!   ↓
//! 3. Each task records its outcome in its own slot of the accumulator
//!   ↓
//! 4. Summary with counts, revenue and fresh remaining stock
//! ```
//!
//! The pre-check only avoids pointless units of work. An order that cannot be
//! resolved is left out of the sum, so it never changes what its siblings
//! see. Orders that pass the pre-check can still be rejected by the
//! authoritative deduction when they race each other; the first committer
//! wins.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use cafeflow_core::{IngredientId, OrderId};
use cafeflow_inventory::Shortfall;
use cafeflow_orders::CreateOrderRequest;

use crate::store::FulfillmentStore;

use super::availability::AvailabilityValidator;
use super::committer::{CommitReceipt, OrderCommitter};
use super::error::FulfillmentError;
use super::requirements::{RequirementCalculator, RequirementMap, merge_requirements};

const ABORTED_REASON: &str = "order task aborted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderOutcome {
    Accepted,
    Rejected,
}

/// Per-order line of a batch report, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedOrder {
    pub customer_name: String,
    pub status: OrderOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<Decimal>,
}

impl ProcessedOrder {
    fn accepted(customer_name: String, receipt: &CommitReceipt) -> Self {
        Self {
            customer_name,
            status: OrderOutcome::Accepted,
            order_id: Some(receipt.order.id_typed()),
            reason: None,
            total: Some(receipt.order.total()),
        }
    }

    fn rejected(customer_name: String, reason: String) -> Self {
        Self {
            customer_name,
            status: OrderOutcome::Rejected,
            order_id: None,
            reason: Some(reason),
            total: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == OrderOutcome::Accepted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryUpdate {
    pub ingredient_id: IngredientId,
    pub name: String,
    pub quantity_used: Decimal,
    pub remaining: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_orders: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub total_revenue: Decimal,
    pub inventory_updates: Vec<InventoryUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub processed_orders: Vec<ProcessedOrder>,
    pub summary: BatchSummary,
}

/// Shared, mutex-guarded batch state. Slot `i` belongs to request `i`.
#[derive(Debug, Default)]
struct BatchAccumulator {
    slots: Vec<Option<ProcessedOrder>>,
    revenue: Decimal,
    consumption: BTreeMap<IngredientId, (String, Decimal)>,
}

impl BatchAccumulator {
    fn with_slots(len: usize) -> Self {
        Self {
            slots: vec![None; len],
            ..Self::default()
        }
    }

    fn record(&mut self, index: usize, customer_name: String, outcome: Result<CommitReceipt, String>) {
        let processed = match outcome {
            Ok(receipt) => {
                self.revenue += receipt.order.total();
                for deduction in &receipt.deductions {
                    let entry = self
                        .consumption
                        .entry(deduction.ingredient_id)
                        .or_insert_with(|| (deduction.name.clone(), Decimal::ZERO));
                    entry.1 += deduction.quantity_used;
                }
                ProcessedOrder::accepted(customer_name, &receipt)
            }
            Err(reason) => ProcessedOrder::rejected(customer_name, reason),
        };
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(processed);
        }
    }
}

/// Runs many independent orders concurrently over one inventory pool.
pub struct BatchCoordinator<S> {
    calculator: RequirementCalculator<S>,
    committer: OrderCommitter<S>,
    store: Arc<S>,
}

impl<S> BatchCoordinator<S>
where
    S: FulfillmentStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            calculator: RequirementCalculator::new(Arc::clone(&store)),
            committer: OrderCommitter::new(Arc::clone(&store)),
            store,
        }
    }

    /// Like [`BatchCoordinator::run`], but gives up waiting after `deadline`.
    ///
    /// Tasks already spawned keep running to commit or rollback.
    pub async fn run_within(
        &self,
        requests: Vec<CreateOrderRequest>,
        deadline: Duration,
    ) -> Result<BatchReport, FulfillmentError> {
        tokio::time::timeout(deadline, self.run(requests))
            .await
            .map_err(|_| FulfillmentError::DeadlineExceeded(deadline))?
    }

    #[instrument(skip(self, requests), fields(orders = requests.len()), err)]
    pub async fn run(&self, requests: Vec<CreateOrderRequest>) -> Result<BatchReport, FulfillmentError> {
        if requests.is_empty() {
            return Err(FulfillmentError::Validation(
                "batch must contain at least one order".to_string(),
            ));
        }

        let short = Arc::new(self.precheck(&requests).await);
        let names: Vec<String> = requests.iter().map(|r| r.customer_name.clone()).collect();
        let accumulator = Arc::new(Mutex::new(BatchAccumulator::with_slots(requests.len())));

        let mut handles = Vec::with_capacity(requests.len());
        for (index, request) in requests.into_iter().enumerate() {
            let calculator = self.calculator.clone();
            let committer = self.committer.clone();
            let short = Arc::clone(&short);
            let accumulator = Arc::clone(&accumulator);

            handles.push(tokio::spawn(async move {
                let outcome = process_order(&calculator, &committer, &short, &request).await;
                if let Err(reason) = &outcome {
                    warn!(index, customer = %request.customer_name, %reason, "batch order rejected");
                }
                accumulator
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(index, request.customer_name, outcome);
            }));
        }

        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "batch order task failed");
            }
        }

        let accumulator = std::mem::take(&mut *accumulator.lock().unwrap_or_else(PoisonError::into_inner));
        let report = self.summarize(accumulator, names).await?;

        info!(
            total = report.summary.total_orders,
            accepted = report.summary.accepted,
            rejected = report.summary.rejected,
            revenue = %report.summary.total_revenue,
            "batch processed"
        );
        Ok(report)
    }

    /// Batch-wide shortfalls keyed by ingredient. Each order is validated and
    /// resolved on its own; one that fails is left out of the sum and
    /// rejected later by its own task.
    async fn precheck(&self, requests: &[CreateOrderRequest]) -> HashMap<IngredientId, Shortfall> {
        let mut total = RequirementMap::new();
        for (index, request) in requests.iter().enumerate() {
            if let Err(err) = request.validate() {
                debug!(index, error = %err, "order left out of batch pre-check");
                continue;
            }
            match self.calculator.calculate(&request.items).await {
                Ok(requirements) => merge_requirements(&mut total, &requirements),
                Err(err) => debug!(index, error = %err, "order left out of batch pre-check"),
            }
        }

        let short: HashMap<IngredientId, Shortfall> = AvailabilityValidator::shortfalls(&total)
            .into_iter()
            .map(|s| (s.ingredient_id, s))
            .collect();
        for shortfall in short.values() {
            warn!(
                ingredient = %shortfall.name,
                required = %shortfall.required,
                missing = %shortfall.missing(),
                "batch demand exceeds stock"
            );
        }
        short
    }

    async fn summarize(
        &self,
        accumulator: BatchAccumulator,
        names: Vec<String>,
    ) -> Result<BatchReport, FulfillmentError> {
        let processed_orders: Vec<ProcessedOrder> = accumulator
            .slots
            .into_iter()
            .zip(names)
            .map(|(slot, name)| {
                slot.unwrap_or_else(|| ProcessedOrder::rejected(name, ABORTED_REASON.to_string()))
            })
            .collect();

        let mut inventory_updates = Vec::with_capacity(accumulator.consumption.len());
        for (ingredient_id, (name, quantity_used)) in accumulator.consumption {
            let remaining = self.store.ingredient(ingredient_id).await?.quantity();
            inventory_updates.push(InventoryUpdate {
                ingredient_id,
                name,
                quantity_used,
                remaining,
            });
        }
        inventory_updates.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.ingredient_id.cmp(&b.ingredient_id))
        });

        let accepted = processed_orders.iter().filter(|p| p.is_accepted()).count();
        Ok(BatchReport {
            summary: BatchSummary {
                total_orders: processed_orders.len(),
                accepted,
                rejected: processed_orders.len() - accepted,
                total_revenue: accumulator.revenue,
                inventory_updates,
            },
            processed_orders,
        })
    }
}

async fn process_order<S: FulfillmentStore>(
    calculator: &RequirementCalculator<S>,
    committer: &OrderCommitter<S>,
    short: &HashMap<IngredientId, Shortfall>,
    request: &CreateOrderRequest,
) -> Result<CommitReceipt, String> {
    request
        .validate()
        .map_err(|e| FulfillmentError::from(e).rejection_reason())?;

    let requirements = calculator
        .calculate(&request.items)
        .await
        .map_err(|e| e.rejection_reason())?;

    let blocking = blocking_shortfalls(&requirements, short);
    if !blocking.is_empty() {
        return Err(FulfillmentError::InsufficientStock(blocking).rejection_reason());
    }

    committer
        .commit(request)
        .await
        .map_err(|e| e.rejection_reason())
}

/// This order's own need for every ingredient the batch as a whole is short
/// of, against the stock the pre-check saw.
fn blocking_shortfalls(
    requirements: &RequirementMap,
    short: &HashMap<IngredientId, Shortfall>,
) -> Vec<Shortfall> {
    requirements
        .values()
        .filter_map(|own| {
            short.get(&own.ingredient_id).map(|batch| Shortfall {
                ingredient_id: own.ingredient_id,
                name: own.name.clone(),
                unit: own.unit.clone(),
                required: own.required,
                available: batch.available,
            })
        })
        .collect()
}
