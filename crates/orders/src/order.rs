use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use cafeflow_core::{DomainError, Entity, HistoryId, MenuItemId, OrderId, OrderItemId};

use crate::request::normalize_annotations;
use crate::status::OrderStatus;

/// One line of an order, priced at the moment the order was placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub menu_item_id: MenuItemId,
    pub quantity: u32,
    pub price_at_time: Decimal,
    pub customizations: JsonValue,
}

impl OrderItem {
    pub fn subtotal(&self) -> Decimal {
        self.price_at_time * Decimal::from(self.quantity)
    }
}

/// Audit record of one status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusHistory {
    pub id: HistoryId,
    pub order_id: OrderId,
    pub previous_status: OrderStatus,
    pub new_status: OrderStatus,
    pub changed_at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Persisted order header.
///
/// Status only moves through [`Order::transition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    customer_name: String,
    special_instructions: JsonValue,
    total: Decimal,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Rehydrate an order loaded from storage.
    pub fn restore(
        id: OrderId,
        customer_name: String,
        special_instructions: JsonValue,
        total: Decimal,
        status: OrderStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            customer_name,
            special_instructions,
            total,
            status,
            created_at,
            updated_at,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn customer_name(&self) -> &str {
        &self.customer_name
    }

    pub fn special_instructions(&self) -> &JsonValue {
        &self.special_instructions
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Replace the customer name and/or annotations. `None` keeps the
    /// current value; a `null` annotation becomes `{}`.
    pub fn amend(
        &mut self,
        customer_name: Option<String>,
        special_instructions: Option<JsonValue>,
        at: DateTime<Utc>,
    ) {
        if let Some(name) = customer_name {
            self.customer_name = name;
        }
        if let Some(value) = special_instructions {
            self.special_instructions = normalize_annotations(Some(value));
        }
        self.updated_at = at;
    }

    /// Move to `next`, returning the history row the change must be
    /// recorded with. The order is untouched when the move is illegal.
    pub fn transition(
        &mut self,
        next: OrderStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<OrderStatusHistory, DomainError> {
        self.status.ensure_transition(next)?;

        let history = OrderStatusHistory {
            id: HistoryId::new(),
            order_id: self.id,
            previous_status: self.status,
            new_status: next,
            changed_at: at,
            reason,
        };
        self.status = next;
        self.updated_at = at;
        Ok(history)
    }
}

impl Entity for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// An order being assembled inside a unit of work, before it is persisted.
///
/// Lines are priced from the menu as they are added, and the total is the
/// running sum of their subtotals.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDraft {
    id: OrderId,
    customer_name: String,
    special_instructions: JsonValue,
    items: Vec<OrderItem>,
    total: Decimal,
    created_at: DateTime<Utc>,
}

impl OrderDraft {
    pub fn new(
        customer_name: impl Into<String>,
        special_instructions: Option<JsonValue>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OrderId::new(),
            customer_name: customer_name.into(),
            special_instructions: normalize_annotations(special_instructions),
            items: Vec::new(),
            total: Decimal::ZERO,
            created_at: at,
        }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn add_line(
        &mut self,
        menu_item_id: MenuItemId,
        quantity: u32,
        price_at_time: Decimal,
        customizations: Option<JsonValue>,
    ) -> &OrderItem {
        let item = OrderItem {
            id: OrderItemId::new(),
            order_id: self.id,
            menu_item_id,
            quantity,
            price_at_time,
            customizations: normalize_annotations(customizations),
        };
        self.total += item.subtotal();
        self.items.push(item);
        &self.items[self.items.len() - 1]
    }

    /// The header row for this draft; new orders always start `pending`.
    pub fn order(&self) -> Order {
        Order {
            id: self.id,
            customer_name: self.customer_name.clone(),
            special_instructions: self.special_instructions.clone(),
            total: self.total,
            status: OrderStatus::Pending,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}
