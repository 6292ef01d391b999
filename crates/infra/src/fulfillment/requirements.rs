use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use cafeflow_core::{IngredientId, MenuItemId};
use cafeflow_menu::Recipe;
use cafeflow_orders::CreateOrderItem;

use crate::store::{InventoryLedger, RecipeIndex, StoreError};

use super::error::FulfillmentError;

/// Total quantity needed per ingredient, in ingredient-id order.
pub type Demand = BTreeMap<IngredientId, Decimal>;

/// Aggregate need for one ingredient with the stock seen when it was computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngredientRequirement {
    pub ingredient_id: IngredientId,
    pub name: String,
    pub unit: String,
    pub required: Decimal,
    pub available: Decimal,
}

pub type RequirementMap = BTreeMap<IngredientId, IngredientRequirement>;

/// Reject menu items that consume nothing; an order for them cannot be
/// fulfilled from inventory.
pub fn ensure_recipe(recipe: &Recipe) -> Result<(), FulfillmentError> {
    if recipe.is_empty() {
        return Err(FulfillmentError::RecipeLookup(format!(
            "menu item {} has no recipe",
            recipe.menu_item_id()
        )));
    }
    Ok(())
}

/// Recipe lookups report unknown menu items as `RecipeLookup`.
pub fn map_recipe_error(menu_item_id: MenuItemId, err: StoreError) -> FulfillmentError {
    match err {
        StoreError::NotFound(_) => {
            FulfillmentError::RecipeLookup(format!("menu item {menu_item_id} not found"))
        }
        other => other.into(),
    }
}

/// Sum per-unit recipe quantities times ordered units, per ingredient.
pub fn aggregate_demand<'a>(lines: impl IntoIterator<Item = (&'a Recipe, u32)>) -> Demand {
    let mut demand = Demand::new();
    for (recipe, units) in lines {
        for (line, quantity) in recipe.scaled(units) {
            *demand.entry(line.ingredient_id).or_default() += quantity;
        }
    }
    demand
}

/// Merge `other` into `into`, summing the required amounts of shared
/// ingredients. The first stock snapshot seen for an ingredient is kept.
pub fn merge_requirements(into: &mut RequirementMap, other: &RequirementMap) {
    for (ingredient_id, requirement) in other {
        into.entry(*ingredient_id)
            .and_modify(|existing| existing.required += requirement.required)
            .or_insert_with(|| requirement.clone());
    }
}

/// Translates order lines into ingredient requirements.
///
/// Read-only: recipes come from the [`RecipeIndex`], stock snapshots from the
/// [`InventoryLedger`]. Nothing here is binding.
pub struct RequirementCalculator<S> {
    store: Arc<S>,
}

impl<S> Clone for RequirementCalculator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> RequirementCalculator<S>
where
    S: RecipeIndex + InventoryLedger,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Ingredient demand of `items`. Fails on the first unknown menu item or
    /// empty recipe.
    pub async fn demand(&self, items: &[CreateOrderItem]) -> Result<Demand, FulfillmentError> {
        let mut recipes = Vec::with_capacity(items.len());
        for item in items {
            let recipe = self
                .store
                .recipe(item.menu_item_id)
                .await
                .map_err(|e| map_recipe_error(item.menu_item_id, e))?;
            ensure_recipe(&recipe)?;
            recipes.push((recipe, item.quantity));
        }
        Ok(aggregate_demand(recipes.iter().map(|(r, q)| (r, *q))))
    }

    /// Attach name, unit and currently available stock to each entry.
    pub async fn resolve(&self, demand: &Demand) -> Result<RequirementMap, FulfillmentError> {
        let mut requirements = RequirementMap::new();
        for (ingredient_id, required) in demand {
            let ingredient = self.store.ingredient(*ingredient_id).await.map_err(|e| match e {
                StoreError::NotFound(_) => FulfillmentError::RecipeLookup(format!(
                    "ingredient {ingredient_id} referenced by a recipe does not exist"
                )),
                other => other.into(),
            })?;
            requirements.insert(
                *ingredient_id,
                IngredientRequirement {
                    ingredient_id: *ingredient_id,
                    name: ingredient.name().to_string(),
                    unit: ingredient.unit().to_string(),
                    required: *required,
                    available: ingredient.quantity(),
                },
            );
        }
        Ok(requirements)
    }

    pub async fn calculate(&self, items: &[CreateOrderItem]) -> Result<RequirementMap, FulfillmentError> {
        let demand = self.demand(items).await?;
        self.resolve(&demand).await
    }
}
