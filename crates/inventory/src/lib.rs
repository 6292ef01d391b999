//! Inventory ledger domain module.
//!
//! This crate contains the business rules for stocked ingredients, implemented
//! purely as deterministic domain logic (no IO, no storage). Stores apply these
//! rules inside their own units of work.

pub mod ingredient;
pub mod shortfall;
pub mod transaction;

pub use ingredient::{Ingredient, StockError, StockLevel};
pub use shortfall::{Shortfall, format_shortfalls};
pub use transaction::{InventoryTransaction, TransactionType, order_reference};
