//! `cafeflow-core` — shared domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model and the entity marker trait.

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::DomainError;
pub use id::{HistoryId, IngredientId, MenuItemId, OrderId, OrderItemId, TransactionId};
