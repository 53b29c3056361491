//! Aging and statistics report shapes.

use super::invoice::{Invoice, InvoiceStatus};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inclusive calendar range over invoice generation dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// An invoice with an unpaid balance past its due date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverdueInvoice {
    pub invoice: Invoice,
    pub days_overdue: i64,
}

/// Aggregates over the invoices generated within a date range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceStats {
    pub invoice_count: u64,
    pub count_by_status: BTreeMap<InvoiceStatus, u64>,
    pub total_ttc: Decimal,
    pub total_paid: Decimal,
    pub total_remaining: Decimal,
    /// Unpaid invoices due between today and today + the due-soon window.
    pub due_soon_count: u64,
}

impl InvoiceStats {
    pub fn count(&self, status: InvoiceStatus) -> u64 {
        self.count_by_status.get(&status).copied().unwrap_or(0)
    }
}
