//! Order snapshot consumed from the order workflow.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order lifecycle state as reported by the order workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename = "NEW")]
    New,
    #[serde(rename = "PREPARATION")]
    Preparation,
    #[serde(rename = "LIVREE")]
    Delivered,
    #[serde(rename = "ANNULEE")]
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Preparation => "PREPARATION",
            OrderStatus::Delivered => "LIVREE",
            OrderStatus::Cancelled => "ANNULEE",
        }
    }

    /// Only delivered orders can be invoiced.
    pub fn is_invoiceable(&self) -> bool {
        matches!(self, OrderStatus::Delivered)
    }
}

/// Read-only view of a finalized order. The ledger never mutates orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub shop_id: Uuid,
    pub status: OrderStatus,
    pub total_ht: Decimal,
    pub total_tva: Decimal,
    pub total_ttc: Decimal,
}
