//! Invoice model for receivables-service.

use super::order::Order;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Invoice type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceType {
    Invoice,
    Proforma,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::Invoice => "INVOICE",
            InvoiceType::Proforma => "PROFORMA",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "PROFORMA" => InvoiceType::Proforma,
            _ => InvoiceType::Invoice,
        }
    }
}

/// Invoice status. Always derived from the balance, see `services::status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Partial,
    Paid,
    Overdue,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 5] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Sent,
        InvoiceStatus::Partial,
        InvoiceStatus::Paid,
        InvoiceStatus::Overdue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Partial => "PARTIAL",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Overdue => "OVERDUE",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "SENT" => InvoiceStatus::Sent,
            "PARTIAL" => InvoiceStatus::Partial,
            "PAID" => InvoiceStatus::Paid,
            "OVERDUE" => InvoiceStatus::Overdue,
            _ => InvoiceStatus::Draft,
        }
    }

    /// Paid invoices are final: no time-based transition applies to them.
    pub fn is_final(&self) -> bool {
        matches!(self, InvoiceStatus::Paid)
    }
}

/// Invoice (or proforma) issued for one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub order_id: Uuid,
    pub shop_id: Uuid,
    pub invoice_number: String,
    pub invoice_type: InvoiceType,
    pub status: InvoiceStatus,
    pub total_ht: Decimal,
    pub total_tva: Decimal,
    pub total_ttc: Decimal,
    pub paid_amount: Decimal,
    pub remaining_amount: Decimal,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub generated_utc: DateTime<Utc>,
    pub sent_utc: Option<DateTime<Utc>>,
    pub paid_utc: Option<DateTime<Utc>>,
    pub reminder_count: i32,
    pub reminder_sent_utc: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn is_proforma(&self) -> bool {
        self.invoice_type == InvoiceType::Proforma
    }

    /// `totalTTC - paid - remaining`. Zero unless a credit note was applied under
    /// `CreditNotePolicy::AsObserved` and the balance was later recomputed.
    pub fn balance_drift(&self) -> Decimal {
        self.total_ttc - self.paid_amount - self.remaining_amount
    }

    pub fn is_balanced(&self) -> bool {
        self.balance_drift().is_zero()
    }

    /// Whole days past due at `as_of`, if the invoice has a due date before it.
    pub fn days_overdue(&self, as_of: NaiveDate) -> Option<i64> {
        self.due_date
            .filter(|due| *due < as_of)
            .map(|due| (as_of - due).num_days())
    }
}

/// Input for creating a binding invoice from a delivered order.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub order: Order,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    /// The calling workflow sends the invoice immediately (status SENT instead of DRAFT).
    pub mark_sent: bool,
}

/// Input for creating a proforma.
#[derive(Debug, Clone)]
pub struct CreateProforma {
    pub order: Order,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub invoice_type: Option<InvoiceType>,
    pub statuses: Option<Vec<InvoiceStatus>>,
    pub shop_id: Option<Uuid>,
    pub due_before: Option<NaiveDate>,
    pub generated_from: Option<NaiveDate>,
    pub generated_to: Option<NaiveDate>,
}

impl InvoiceFilter {
    /// Binding invoices that are not yet paid.
    pub fn open_invoices() -> Self {
        Self {
            invoice_type: Some(InvoiceType::Invoice),
            statuses: Some(
                InvoiceStatus::ALL
                    .into_iter()
                    .filter(|s| !s.is_final())
                    .collect(),
            ),
            ..Default::default()
        }
    }

    pub fn matches(&self, invoice: &Invoice) -> bool {
        let generated = invoice.generated_utc.date_naive();
        self.invoice_type.is_none_or(|t| invoice.invoice_type == t)
            && self
                .statuses
                .as_ref()
                .is_none_or(|s| s.contains(&invoice.status))
            && self.shop_id.is_none_or(|id| invoice.shop_id == id)
            && self
                .due_before
                .is_none_or(|d| invoice.due_date.is_some_and(|due| due < d))
            && self.generated_from.is_none_or(|d| generated >= d)
            && self.generated_to.is_none_or(|d| generated <= d)
    }
}
