use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cafeflow_core::{DomainError, IngredientId, MenuItemId};

/// One ingredient link of a recipe: how much is consumed per unit sold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeLine {
    pub menu_item_id: MenuItemId,
    pub ingredient_id: IngredientId,
    pub quantity: Decimal,
    pub unit: String,
}

/// The fixed ingredient consumption of one menu item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    menu_item_id: MenuItemId,
    lines: Vec<RecipeLine>,
}

impl Recipe {
    /// Build a recipe; every line must belong to `menu_item_id` and consume a
    /// positive quantity.
    pub fn new(menu_item_id: MenuItemId, lines: Vec<RecipeLine>) -> Result<Self, DomainError> {
        for line in &lines {
            if line.menu_item_id != menu_item_id {
                return Err(DomainError::invariant("recipe line belongs to another menu item"));
            }
            if line.quantity <= Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "recipe quantity for ingredient {} must be positive",
                    line.ingredient_id
                )));
            }
        }
        Ok(Self { menu_item_id, lines })
    }

    pub fn menu_item_id(&self) -> MenuItemId {
        self.menu_item_id
    }

    pub fn lines(&self) -> &[RecipeLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Ingredient demand for `units` sold, one entry per recipe line.
    ///
    /// Lines are not merged here; callers aggregate across menu items.
    pub fn scaled(&self, units: u32) -> impl Iterator<Item = (&RecipeLine, Decimal)> + '_ {
        let units = Decimal::from(units);
        self.lines.iter().map(move |line| (line, line.quantity * units))
    }
}
