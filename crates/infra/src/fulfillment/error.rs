use std::time::Duration;

use thiserror::Error;

use cafeflow_core::DomainError;
use cafeflow_inventory::{Shortfall, format_shortfalls};

use crate::store::StoreError;

/// Failure of a fulfillment operation.
///
/// Deterministic failures (`Validation`, `InsufficientStock`, `RecipeLookup`,
/// `InvalidStatus`) leave the store exactly as it was. `Persistence` means
/// the backend failed; the unit of work was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FulfillmentError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient inventory: {}", format_shortfalls(.0))]
    InsufficientStock(Vec<Shortfall>),

    #[error("recipe lookup failed: {0}")]
    RecipeLookup(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid status transition: {0}")]
    InvalidStatus(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("batch did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

impl FulfillmentError {
    /// Reason text recorded for a rejected order in a batch report.
    pub fn rejection_reason(&self) -> String {
        match self {
            FulfillmentError::InsufficientStock(shortfalls) => {
                format!("insufficient_inventory: {}", format_shortfalls(shortfalls))
            }
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for FulfillmentError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(what) => FulfillmentError::NotFound(what),
            StoreError::InsufficientStock(shortfall) => {
                FulfillmentError::InsufficientStock(vec![shortfall])
            }
            StoreError::Backend(msg) => FulfillmentError::Persistence(msg),
        }
    }
}

impl From<DomainError> for FulfillmentError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => FulfillmentError::Validation(msg),
            DomainError::InvalidId(msg) => FulfillmentError::Validation(msg),
            DomainError::InvariantViolation(msg) => FulfillmentError::Validation(msg),
            DomainError::InvalidTransition(msg) => FulfillmentError::InvalidStatus(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cafeflow_core::IngredientId;
    use rust_decimal_macros::dec;

    fn test_shortfall() -> Shortfall {
        Shortfall {
            ingredient_id: IngredientId::new(),
            name: "Milk".to_string(),
            unit: "ml".to_string(),
            required: dec!(12),
            available: dec!(10),
        }
    }

    #[test]
    fn store_errors_map_to_service_errors() {
        let err: FulfillmentError = StoreError::InsufficientStock(test_shortfall()).into();
        match err {
            FulfillmentError::InsufficientStock(list) => assert_eq!(list.len(), 1),
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        let err: FulfillmentError = StoreError::Backend("connection reset".to_string()).into();
        assert_eq!(err, FulfillmentError::Persistence("connection reset".to_string()));
    }

    #[test]
    fn illegal_transition_maps_to_invalid_status() {
        let err: FulfillmentError = DomainError::invalid_transition("delivered to ready").into();
        assert!(matches!(err, FulfillmentError::InvalidStatus(_)));
    }

    #[test]
    fn rejection_reason_lists_shortfalls() {
        let err = FulfillmentError::InsufficientStock(vec![test_shortfall()]);
        assert_eq!(
            err.rejection_reason(),
            "insufficient_inventory: Milk (need 12 ml, have 10 ml)"
        );
    }
}
