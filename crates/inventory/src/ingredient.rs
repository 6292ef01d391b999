use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cafeflow_core::{DomainError, Entity, IngredientId};

use crate::shortfall::Shortfall;

/// Stock arithmetic failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    /// Available stock does not cover the requested amount; nothing was changed.
    #[error("insufficient stock: {0}")]
    Insufficient(Shortfall),

    /// Movements must be strictly positive; the sign comes from the operation.
    #[error("invalid stock amount: {0}")]
    InvalidAmount(Decimal),
}

/// Stock position of one ingredient right after a ledger movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub ingredient_id: IngredientId,
    pub name: String,
    pub unit: String,
    pub remaining: Decimal,
    pub reorder_point: Decimal,
}

impl StockLevel {
    /// At or below the reorder point (low-stock signal, never an error).
    pub fn is_low(&self) -> bool {
        self.remaining <= self.reorder_point
    }
}

/// Inventory record of one stocked ingredient.
///
/// The quantity is only changed through [`Ingredient::deduct`] and
/// [`Ingredient::credit`], which keep it non-negative. Callers pair every
/// movement with exactly one `InventoryTransaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    id: IngredientId,
    name: String,
    quantity: Decimal,
    unit: String,
    reorder_point: Decimal,
    last_updated: DateTime<Utc>,
}

impl Ingredient {
    pub fn new(
        id: IngredientId,
        name: impl Into<String>,
        quantity: Decimal,
        unit: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("ingredient name cannot be empty"));
        }
        if quantity < Decimal::ZERO {
            return Err(DomainError::invariant("stock cannot go negative"));
        }
        Ok(Self {
            id,
            name,
            quantity,
            unit: unit.into(),
            reorder_point: Decimal::ZERO,
            last_updated: Utc::now(),
        })
    }

    pub fn with_reorder_point(mut self, reorder_point: Decimal) -> Self {
        self.reorder_point = reorder_point;
        self
    }

    pub fn with_last_updated(mut self, at: DateTime<Utc>) -> Self {
        self.last_updated = at;
        self
    }

    pub fn id_typed(&self) -> IngredientId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn reorder_point(&self) -> Decimal {
        self.reorder_point
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn level(&self) -> StockLevel {
        StockLevel {
            ingredient_id: self.id,
            name: self.name.clone(),
            unit: self.unit.clone(),
            remaining: self.quantity,
            reorder_point: self.reorder_point,
        }
    }

    /// Shortfall against `required`, if the current quantity does not cover it.
    pub fn shortfall(&self, required: Decimal) -> Option<Shortfall> {
        (self.quantity < required).then(|| Shortfall {
            ingredient_id: self.id,
            name: self.name.clone(),
            unit: self.unit.clone(),
            required,
            available: self.quantity,
        })
    }

    /// Compare-and-decrement: removes `amount` only if it is fully available.
    ///
    /// On failure the record is left untouched.
    pub fn deduct(&mut self, amount: Decimal, at: DateTime<Utc>) -> Result<StockLevel, StockError> {
        ensure_positive(amount)?;
        if let Some(shortfall) = self.shortfall(amount) {
            return Err(StockError::Insufficient(shortfall));
        }
        self.quantity -= amount;
        self.last_updated = at;
        Ok(self.level())
    }

    /// Adds `amount` back to stock (restock, reversal of a deduction).
    pub fn credit(&mut self, amount: Decimal, at: DateTime<Utc>) -> Result<StockLevel, StockError> {
        ensure_positive(amount)?;
        self.quantity += amount;
        self.last_updated = at;
        Ok(self.level())
    }
}

impl Entity for Ingredient {
    type Id = IngredientId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), StockError> {
    if amount <= Decimal::ZERO {
        return Err(StockError::InvalidAmount(amount));
    }
    Ok(())
}
