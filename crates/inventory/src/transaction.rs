use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cafeflow_core::{DomainError, IngredientId, OrderId, TransactionId};

/// Kind of stock movement recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Addition,
    Deduction,
    Adjustment,
    Waste,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Addition => "addition",
            TransactionType::Deduction => "deduction",
            TransactionType::Adjustment => "adjustment",
            TransactionType::Waste => "waste",
        }
    }
}

impl core::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TransactionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "addition" => Ok(TransactionType::Addition),
            "deduction" => Ok(TransactionType::Deduction),
            "adjustment" => Ok(TransactionType::Adjustment),
            "waste" => Ok(TransactionType::Waste),
            other => Err(DomainError::validation(format!(
                "unknown transaction type: {other}"
            ))),
        }
    }
}

/// Reason string linking a ledger row to the order that caused it.
pub fn order_reference(order_id: OrderId) -> String {
    format!("Order {order_id}")
}

/// Immutable, append-only ledger record of one stock change.
///
/// `quantity_change` is signed: deductions are negative, additions and
/// restocks positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTransaction {
    pub transaction_id: TransactionId,
    pub ingredient_id: IngredientId,
    pub quantity_change: Decimal,
    pub transaction_type: TransactionType,
    pub reason: String,
    pub order_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
}

impl InventoryTransaction {
    /// Stock consumed by an order.
    pub fn deduction(
        ingredient_id: IngredientId,
        amount: Decimal,
        order_id: OrderId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id: TransactionId::new(),
            ingredient_id,
            quantity_change: -amount.abs(),
            transaction_type: TransactionType::Deduction,
            reason: order_reference(order_id),
            order_id: Some(order_id),
            created_at: at,
        }
    }

    /// Stock returned when a deleted order's consumption is reversed.
    pub fn reversal(
        ingredient_id: IngredientId,
        amount: Decimal,
        order_id: OrderId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id: TransactionId::new(),
            ingredient_id,
            quantity_change: amount.abs(),
            transaction_type: TransactionType::Adjustment,
            reason: format!("{} deleted", order_reference(order_id)),
            order_id: Some(order_id),
            created_at: at,
        }
    }

    /// Magnitude of the movement regardless of direction.
    pub fn amount(&self) -> Decimal {
        self.quantity_change.abs()
    }

    pub fn is_deduction(&self) -> bool {
        self.transaction_type == TransactionType::Deduction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn deduction_is_negative_and_references_order() {
        let order_id = OrderId::new();
        let tx = InventoryTransaction::deduction(IngredientId::new(), dec!(4), order_id, Utc::now());
        assert_eq!(tx.quantity_change, dec!(-4));
        assert_eq!(tx.amount(), dec!(4));
        assert_eq!(tx.reason, format!("Order {order_id}"));
        assert!(tx.is_deduction());
    }

    #[test]
    fn reversal_is_a_positive_adjustment() {
        let order_id = OrderId::new();
        let tx = InventoryTransaction::reversal(IngredientId::new(), dec!(4), order_id, Utc::now());
        assert_eq!(tx.quantity_change, dec!(4));
        assert_eq!(tx.transaction_type, TransactionType::Adjustment);
        assert!(tx.reason.ends_with("deleted"));
    }

    #[test]
    fn transaction_type_parses_its_own_names() {
        for t in [
            TransactionType::Addition,
            TransactionType::Deduction,
            TransactionType::Adjustment,
            TransactionType::Waste,
        ] {
            assert_eq!(t.as_str().parse::<TransactionType>().unwrap(), t);
        }
        assert!("spoiled".parse::<TransactionType>().is_err());
    }
}
