use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cafeflow_core::IngredientId;

/// One ingredient whose available stock does not cover a requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub ingredient_id: IngredientId,
    pub name: String,
    pub unit: String,
    pub required: Decimal,
    pub available: Decimal,
}

impl Shortfall {
    /// How much is missing to satisfy the requirement.
    pub fn missing(&self) -> Decimal {
        self.required - self.available
    }
}

impl core::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} (need {} {}, have {} {})",
            self.name,
            self.required.normalize(),
            self.unit,
            self.available.normalize(),
            self.unit
        )
    }
}

/// Human-readable list of shortfalls, comma separated.
pub fn format_shortfalls(shortfalls: &[Shortfall]) -> String {
    shortfalls
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
