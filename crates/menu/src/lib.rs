//! Menu domain module: sellable items and the recipes that consume stock.
//!
//! Menu data is owned by the menu CRUD side of the system; fulfillment only
//! reads it, so every type here is an immutable record.

pub mod item;
pub mod recipe;

pub use item::MenuItem;
pub use recipe::{Recipe, RecipeLine};
