use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cafeflow_core::{DomainError, Entity, MenuItemId};

/// A sellable menu item with its current price.
///
/// Price history is kept by the menu side; orders capture the price at
/// order time and never look it up again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: MenuItemId,
    pub name: String,
    pub price: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl MenuItem {
    pub fn new(id: MenuItemId, name: impl Into<String>, price: Decimal) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("menu item name cannot be empty"));
        }
        if price < Decimal::ZERO {
            return Err(DomainError::validation("price cannot be negative"));
        }
        Ok(Self {
            id,
            name,
            price,
            updated_at: Utc::now(),
        })
    }
}

impl Entity for MenuItem {
    type Id = MenuItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
