//! Order fulfillment pipeline.
//!
//! ```text
//! CreateOrderRequest
//!   ↓
//! RequirementCalculator   recipes × quantities → per-ingredient demand
//!   ↓
//! AvailabilityValidator   read-only pre-check against a stock snapshot
//!   ↓
//! OrderCommitter          one unit of work: price, persist, check-and-deduct
//! ```
//!
//! `BatchCoordinator` drives the same pipeline for many orders at once and
//! `OrderService` is the façade over all of it.

pub mod availability;
pub mod batch;
pub mod committer;
pub mod error;
pub mod requirements;
pub mod service;

pub use availability::AvailabilityValidator;
pub use batch::{BatchCoordinator, BatchReport, BatchSummary, InventoryUpdate, OrderOutcome, ProcessedOrder};
pub use committer::{
    CommitReceipt, Deduction, DeletePolicy, LowStockAlert, OrderAmendment, OrderCommitter, OrderEdit,
};
pub use error::FulfillmentError;
pub use requirements::{Demand, IngredientRequirement, RequirementCalculator, RequirementMap};
pub use service::{OrderDetails, OrderService};
