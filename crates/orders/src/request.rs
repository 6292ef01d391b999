use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use cafeflow_core::{DomainError, MenuItemId};

/// Inbound order line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderItem {
    pub menu_item_id: MenuItemId,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customizations: Option<JsonValue>,
}

/// Inbound order, as submitted singly or inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_instructions: Option<JsonValue>,
    pub items: Vec<CreateOrderItem>,
}

impl CreateOrderRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.customer_name.trim().is_empty() {
            return Err(DomainError::validation("customer name is required"));
        }
        if self.items.is_empty() {
            return Err(DomainError::validation("order must contain at least one item"));
        }
        if let Some(item) = self.items.iter().find(|item| item.quantity == 0) {
            return Err(DomainError::validation(format!(
                "quantity for menu item {} must be positive",
                item.menu_item_id
            )));
        }
        Ok(())
    }
}

/// Edit of an existing order's header. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateOrderRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_instructions: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl UpdateOrderRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.customer_name.is_none() && self.special_instructions.is_none() && self.status.is_none() {
            return Err(DomainError::validation("no fields to update"));
        }
        if self
            .customer_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(DomainError::validation("customer name is required"));
        }
        Ok(())
    }
}

/// Absent or `null` annotations are stored as the empty object.
pub fn normalize_annotations(value: Option<JsonValue>) -> JsonValue {
    match value {
        None | Some(JsonValue::Null) => JsonValue::Object(serde_json::Map::new()),
        Some(v) => v,
    }
}
