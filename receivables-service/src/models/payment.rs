//! Payment model for receivables-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Payment status. Only confirmed payments count toward the invoice balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Confirmed => "CONFIRMED",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "CONFIRMED" => PaymentStatus::Confirmed,
            "CANCELLED" => PaymentStatus::Cancelled,
            _ => PaymentStatus::Pending,
        }
    }

    pub fn counts_toward_balance(&self) -> bool {
        matches!(self, PaymentStatus::Confirmed)
    }
}

/// Money received against an invoice, with its receipt number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub order_id: Uuid,
    pub receipt_number: String,
    pub amount: Decimal,
    pub payment_method: String,
    pub payment_reference: Option<String>,
    pub payment_date: NaiveDate,
    pub status: PaymentStatus,
    pub notes: Option<String>,
    pub recorded_by: String,
    pub idempotency_key: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for recording a payment.
#[derive(Debug, Clone, Validate)]
pub struct RecordPayment {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    #[validate(length(min = 1, max = 50, message = "payment method is required"))]
    pub payment_method: String,
    #[validate(length(max = 255))]
    pub payment_reference: Option<String>,
    pub payment_date: NaiveDate,
    pub notes: Option<String>,
    #[validate(length(min = 1, message = "recording actor is required"))]
    pub recorded_by: String,
    /// Repeating a request with the same key returns the original payment.
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: Option<String>,
}

/// Administrative edit of a recorded payment. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Validate)]
pub struct UpdatePayment {
    pub amount: Option<Decimal>,
    #[validate(length(min = 1, max = 50, message = "payment method cannot be empty"))]
    pub payment_method: Option<String>,
    #[validate(length(max = 255))]
    pub payment_reference: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub status: Option<PaymentStatus>,
    pub notes: Option<String>,
}
