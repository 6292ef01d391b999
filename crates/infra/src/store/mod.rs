//! Transactional record store boundary.
//!
//! The fulfillment services only see the traits in [`r#trait`]; two adapters
//! implement them:
//!
//! - [`InMemoryFulfillmentStore`]: tests/dev, serializable by construction.
//! - [`PostgresFulfillmentStore`]: production, row locks via conditional
//!   `UPDATE ... WHERE quantity >= $1`.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{FailPoint, InMemoryFulfillmentStore};
pub use postgres::PostgresFulfillmentStore;
pub use r#trait::{
    FulfillmentStore, InventoryLedger, OrderReader, RecipeIndex, StoreError, UnitOfWork,
};
