//! Invoice status derivation and aging reports.

use crate::models::{
    DateRange, Invoice, InvoiceFilter, InvoiceStats, InvoiceStatus, InvoiceType, OverdueInvoice,
};
use crate::services::clock::Clock;
use crate::services::ledger::InvoiceLedger;
use crate::services::metrics::{record_outcome, LEDGER_OPERATION_DURATION};
use crate::services::store::LedgerStore;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument};

/// Derive an invoice's status from its balance and due date.
///
/// Rules, first match wins:
/// 1. nothing remaining: `Paid`
/// 2. partly paid: `Partial`
/// 3. nothing paid and due before `now`'s date: `Overdue`
/// 4. otherwise `Sent`, or `Draft` if it was never sent
pub fn derive_status(
    paid_amount: Decimal,
    total_ttc: Decimal,
    remaining_amount: Decimal,
    due_date: Option<NaiveDate>,
    now: DateTime<Utc>,
    sent: bool,
) -> InvoiceStatus {
    if remaining_amount <= Decimal::ZERO {
        return InvoiceStatus::Paid;
    }
    if paid_amount > Decimal::ZERO && paid_amount < total_ttc {
        return InvoiceStatus::Partial;
    }
    if paid_amount.is_zero() && due_date.is_some_and(|due| due < now.date_naive()) {
        return InvoiceStatus::Overdue;
    }
    if sent {
        InvoiceStatus::Sent
    } else {
        InvoiceStatus::Draft
    }
}

/// Status of `invoice` at `now`.
///
/// Proformas carry no payable balance: they are only ever drafted or sent.
pub fn status_of(invoice: &Invoice, now: DateTime<Utc>) -> InvoiceStatus {
    let sent = invoice.sent_utc.is_some();
    match invoice.invoice_type {
        InvoiceType::Invoice => derive_status(
            invoice.paid_amount,
            invoice.total_ttc,
            invoice.remaining_amount,
            invoice.due_date,
            now,
            sent,
        ),
        InvoiceType::Proforma if sent => InvoiceStatus::Sent,
        InvoiceType::Proforma => InvoiceStatus::Draft,
    }
}

/// Time-based status sweeps and receivables reporting.
pub struct AgingEngine {
    store: Arc<dyn LedgerStore>,
    ledger: Arc<InvoiceLedger>,
    clock: Arc<dyn Clock>,
    due_soon_days: i64,
}

impl AgingEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        ledger: Arc<InvoiceLedger>,
        clock: Arc<dyn Clock>,
        due_soon_days: i64,
    ) -> Self {
        Self {
            store,
            ledger,
            clock,
            due_soon_days,
        }
    }

    /// Re-derive the status of every unpaid binding invoice at `now`.
    ///
    /// Nothing else fires when a due date passes without payment activity, so
    /// this is what moves invoices to `Overdue`. Returns the invoices whose
    /// status changed.
    #[instrument(skip(self))]
    pub async fn recompute_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Invoice>, AppError> {
        let timer = LEDGER_OPERATION_DURATION
            .with_label_values(&["recompute_overdue"])
            .start_timer();
        let result = self.sweep(now).await;
        timer.observe_duration();
        record_outcome("recompute_overdue", &result);
        result
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<Invoice>, AppError> {
        let candidates = self
            .store
            .list_invoices(&InvoiceFilter::open_invoices())
            .await?;
        let examined = candidates.len();

        let mut updated = Vec::new();
        for invoice in candidates {
            if status_of(&invoice, now) == invoice.status {
                continue;
            }
            if let Some(changed) = self.ledger.refresh_status(invoice.invoice_id, now).await? {
                updated.push(changed);
            }
        }

        info!(examined, updated = updated.len(), "Status sweep completed");
        Ok(updated)
    }

    /// Unpaid binding invoices due before `as_of`, most overdue first.
    #[instrument(skip(self))]
    pub async fn list_overdue(&self, as_of: NaiveDate) -> Result<Vec<OverdueInvoice>, AppError> {
        let filter = InvoiceFilter {
            invoice_type: Some(InvoiceType::Invoice),
            due_before: Some(as_of),
            ..Default::default()
        };
        let invoices = self.store.list_invoices(&filter).await?;

        let mut overdue: Vec<OverdueInvoice> = invoices
            .into_iter()
            .filter(|i| i.remaining_amount > Decimal::ZERO)
            .filter_map(|invoice| {
                invoice.days_overdue(as_of).map(|days_overdue| OverdueInvoice {
                    invoice,
                    days_overdue,
                })
            })
            .collect();
        overdue.sort_by(|a, b| {
            b.days_overdue
                .cmp(&a.days_overdue)
                .then_with(|| a.invoice.invoice_number.cmp(&b.invoice.invoice_number))
        });

        Ok(overdue)
    }

    /// Aggregate binding invoices generated within `range`.
    #[instrument(skip(self))]
    pub async fn compute_stats(&self, range: DateRange) -> Result<InvoiceStats, AppError> {
        let filter = InvoiceFilter {
            invoice_type: Some(InvoiceType::Invoice),
            generated_from: Some(range.from),
            generated_to: Some(range.to),
            ..Default::default()
        };
        let invoices = self.store.list_invoices(&filter).await?;

        let today = self.clock.today();
        let horizon = today + Duration::days(self.due_soon_days);

        let mut stats = InvoiceStats::default();
        for invoice in &invoices {
            stats.invoice_count += 1;
            *stats.count_by_status.entry(invoice.status).or_insert(0) += 1;
            stats.total_ttc += invoice.total_ttc;
            stats.total_paid += invoice.paid_amount;
            stats.total_remaining += invoice.remaining_amount;

            let due_soon = invoice
                .due_date
                .is_some_and(|due| today <= due && due <= horizon);
            if due_soon && invoice.remaining_amount > Decimal::ZERO {
                stats.due_soon_count += 1;
            }
        }

        Ok(stats)
    }
}
