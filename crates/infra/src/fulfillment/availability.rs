use cafeflow_inventory::Shortfall;

use super::error::FulfillmentError;
use super::requirements::RequirementMap;

/// Read-only availability pre-check over a requirement snapshot.
///
/// Never binding: stock can change between this check and the unit of work
/// that deducts it. The authoritative check is `UnitOfWork::check_and_deduct`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AvailabilityValidator;

impl AvailabilityValidator {
    /// One shortfall per ingredient whose snapshot does not cover the need,
    /// in ingredient-id order.
    pub fn shortfalls(requirements: &RequirementMap) -> Vec<Shortfall> {
        requirements
            .values()
            .filter(|r| r.available < r.required)
            .map(|r| Shortfall {
                ingredient_id: r.ingredient_id,
                name: r.name.clone(),
                unit: r.unit.clone(),
                required: r.required,
                available: r.available,
            })
            .collect()
    }

    pub fn validate(requirements: &RequirementMap) -> Result<(), FulfillmentError> {
        let shortfalls = Self::shortfalls(requirements);
        if shortfalls.is_empty() {
            Ok(())
        } else {
            Err(FulfillmentError::InsufficientStock(shortfalls))
        }
    }
}
