//! Invoice ledger: invoice creation and every write to an invoice balance.
//!
//! Balance writes are optimistic. A write is planned against the invoice as it
//! was read, carries that version, and is retried from a fresh read when the
//! store reports the version moved.

use crate::models::{
    CreateInvoice, CreateProforma, CreditNote, DocumentKind, Invoice, InvoiceFilter,
    InvoiceStatus, InvoiceType, Order, Payment,
};
use crate::services::clock::Clock;
use crate::services::metrics::{
    record_outcome, BALANCE_DRIFT_TOTAL, INVOICES_TOTAL, LEDGER_OPERATION_DURATION,
    WRITE_CONFLICTS_TOTAL,
};
use crate::services::numbering::DocumentNumberAllocator;
use crate::services::status::status_of;
use crate::services::store::{ChangeSet, LedgerStore, StoreError, Write};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use service_core::utils::{retry_on_conflict, RetryConfig};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// An invoice insert, or an update conditional on the version it was planned from.
#[derive(Debug, Clone)]
pub struct InvoiceWrite {
    invoice: Invoice,
    expected_version: Option<i64>,
}

impl InvoiceWrite {
    pub fn insert(invoice: Invoice) -> Self {
        Self {
            invoice,
            expected_version: None,
        }
    }

    pub(crate) fn update(invoice: Invoice, expected_version: i64) -> Self {
        Self {
            invoice,
            expected_version: Some(expected_version),
        }
    }

    pub fn invoice(&self) -> &Invoice {
        &self.invoice
    }

    /// `None` for inserts.
    pub fn expected_version(&self) -> Option<i64> {
        self.expected_version
    }

    pub(crate) fn into_parts(self) -> (Invoice, Option<i64>) {
        (self.invoice, self.expected_version)
    }
}

/// A change to an invoice's paid and remaining amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChange {
    /// `paid += delta`, `remaining -= delta`. On a balanced invoice this is
    /// `remaining = totalTTC - paid`.
    Delta(Decimal),
    /// Credit note application, split by the configured policy.
    Credit {
        paid_increment: Decimal,
        balance_reduction: Decimal,
    },
    /// Both amounts recomputed from the invoice's records.
    Recomputed { paid: Decimal, remaining: Decimal },
}

/// Balance of an invoice rebuilt from its confirmed payments and applied credit notes.
pub fn recomputed_balance(
    total_ttc: Decimal,
    payments: &[Payment],
    applied_credit_notes: &[CreditNote],
) -> BalanceChange {
    let confirmed: Decimal = payments
        .iter()
        .filter(|p| p.status.counts_toward_balance())
        .map(|p| p.amount)
        .sum();
    let credited: Decimal = applied_credit_notes
        .iter()
        .map(|c| c.paid_increment.unwrap_or_default())
        .sum();
    let reduced: Decimal = applied_credit_notes
        .iter()
        .map(|c| c.balance_reduction.unwrap_or_default())
        .sum();

    BalanceChange::Recomputed {
        paid: confirmed + credited,
        remaining: total_ttc - confirmed - reduced,
    }
}

/// Plan the write that applies `change` to `invoice` at `now`.
///
/// Remaining is clamped at zero and the status re-derived. The returned write
/// is conditional on `invoice.version`.
pub fn plan_balance_change(
    invoice: &Invoice,
    change: BalanceChange,
    now: DateTime<Utc>,
) -> Result<InvoiceWrite, AppError> {
    if invoice.is_proforma() {
        return Err(AppError::PreconditionFailed(anyhow::anyhow!(
            "Proforma {} does not carry a payable balance",
            invoice.invoice_number
        )));
    }

    let (paid, remaining) = match change {
        // Moves both sides by the same amount so a drift left by an earlier
        // credit note survives, exactly as a recompute from the records would.
        BalanceChange::Delta(delta) => (
            invoice.paid_amount + delta,
            invoice.remaining_amount - delta,
        ),
        BalanceChange::Credit {
            paid_increment,
            balance_reduction,
        } => (
            invoice.paid_amount + paid_increment,
            invoice.remaining_amount - balance_reduction,
        ),
        BalanceChange::Recomputed { paid, remaining } => (paid, remaining),
    };

    if paid < Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Balance change would leave invoice {} with a negative paid amount ({})",
            invoice.invoice_number,
            paid
        )));
    }

    let mut next = invoice.clone();
    next.paid_amount = paid;
    next.remaining_amount = remaining.max(Decimal::ZERO);
    restamp(&mut next, invoice, now);

    if !next.is_balanced() {
        BALANCE_DRIFT_TOTAL.inc();
        warn!(
            invoice_id = %next.invoice_id,
            invoice_number = %next.invoice_number,
            total_ttc = %next.total_ttc,
            paid_amount = %next.paid_amount,
            remaining_amount = %next.remaining_amount,
            drift = %next.balance_drift(),
            "Invoice balance no longer adds up to its total"
        );
    }

    Ok(InvoiceWrite::update(next, invoice.version))
}

/// Re-derive status and bump bookkeeping fields of `next`, planned from `current`.
fn restamp(next: &mut Invoice, current: &Invoice, now: DateTime<Utc>) {
    next.status = status_of(next, now);
    next.paid_utc = match next.status {
        InvoiceStatus::Paid => current.paid_utc.or(Some(now)),
        _ => None,
    };
    next.version = current.version + 1;
    next.updated_utc = now;
}

/// Commit `changes`, counting optimistic conflicts against `operation`.
pub(crate) async fn commit_changes(
    store: &dyn LedgerStore,
    operation: &'static str,
    changes: ChangeSet,
) -> Result<(), StoreError> {
    store.commit(changes).await.inspect_err(|e| {
        if matches!(e, StoreError::StaleWrite(_) | StoreError::Missing(_)) {
            WRITE_CONFLICTS_TOTAL.with_label_values(&[operation]).inc();
            debug!(operation, error = %e, "Optimistic write rejected");
        }
    })
}

pub(crate) fn invoice_not_found(invoice_id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id))
}

/// Amounts must be positive and representable in cents.
pub(crate) fn check_amount(what: &str, amount: Decimal) -> Result<(), AppError> {
    if amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "{} must be greater than 0, got {}",
            what,
            amount
        )));
    }
    if amount.normalize().scale() > 2 {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "{} must have at most 2 decimal places, got {}",
            what,
            amount
        )));
    }
    Ok(())
}

/// Creates invoices and owns every write to their balance and status.
pub struct InvoiceLedger {
    store: Arc<dyn LedgerStore>,
    numbers: Arc<DocumentNumberAllocator>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl InvoiceLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        numbers: Arc<DocumentNumberAllocator>,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            numbers,
            clock,
            retry,
        }
    }

    /// Issue the binding invoice for a delivered order.
    #[instrument(skip(self, input), fields(order_id = %input.order.order_id))]
    pub async fn create_invoice(&self, input: CreateInvoice) -> Result<Invoice, AppError> {
        let timer = LEDGER_OPERATION_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();
        let result = self.issue_invoice(input).await;
        timer.observe_duration();
        record_outcome("create_invoice", &result);
        result
    }

    async fn issue_invoice(&self, input: CreateInvoice) -> Result<Invoice, AppError> {
        let order = &input.order;
        if !order.status.is_invoiceable() {
            return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                "Order {} is {}, only delivered orders can be invoiced",
                order.order_id,
                order.status.as_str()
            )));
        }
        check_totals(order)?;

        if let Some(existing) = self.store.find_invoice_for_order(order.order_id).await? {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "An invoice already exists for order {}: {}",
                order.order_id,
                existing.invoice_number
            )));
        }

        let invoice_number = self.numbers.allocate(DocumentKind::Invoice).await?;
        let now = self.clock.now();
        let invoice = new_invoice(
            order,
            invoice_number,
            InvoiceType::Invoice,
            input.due_date,
            input.notes,
            input.mark_sent,
            now,
        );

        commit_changes(
            self.store.as_ref(),
            "create_invoice",
            Write::Invoice(InvoiceWrite::insert(invoice.clone())).into(),
        )
        .await?;

        INVOICES_TOTAL
            .with_label_values(&[InvoiceType::Invoice.as_str()])
            .inc();
        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            total_ttc = %invoice.total_ttc,
            status = invoice.status.as_str(),
            "Invoice created"
        );

        Ok(invoice)
    }

    /// Issue a proforma. An order may have any number of proformas besides its invoice.
    #[instrument(skip(self, input), fields(order_id = %input.order.order_id))]
    pub async fn create_proforma(&self, input: CreateProforma) -> Result<Invoice, AppError> {
        let timer = LEDGER_OPERATION_DURATION
            .with_label_values(&["create_proforma"])
            .start_timer();
        let result = self.issue_proforma(input).await;
        timer.observe_duration();
        record_outcome("create_proforma", &result);
        result
    }

    async fn issue_proforma(&self, input: CreateProforma) -> Result<Invoice, AppError> {
        check_totals(&input.order)?;

        let invoice_number = self.numbers.allocate(DocumentKind::Proforma).await?;
        let invoice = new_invoice(
            &input.order,
            invoice_number,
            InvoiceType::Proforma,
            input.due_date,
            input.notes,
            false,
            self.clock.now(),
        );

        commit_changes(
            self.store.as_ref(),
            "create_proforma",
            Write::Invoice(InvoiceWrite::insert(invoice.clone())).into(),
        )
        .await?;

        INVOICES_TOTAL
            .with_label_values(&[InvoiceType::Proforma.as_str()])
            .inc();
        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            "Proforma created"
        );

        Ok(invoice)
    }

    #[instrument(skip(self))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        self.store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))
    }

    /// The binding invoice issued for `order_id`, if any.
    #[instrument(skip(self))]
    pub async fn get_invoice_for_order(&self, order_id: Uuid) -> Result<Option<Invoice>, AppError> {
        Ok(self.store.find_invoice_for_order(order_id).await?)
    }

    #[instrument(skip(self, filter))]
    pub async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, AppError> {
        Ok(self.store.list_invoices(filter).await?)
    }

    /// Add `delta` to the paid amount and re-derive remaining and status.
    #[instrument(skip(self), fields(delta = %delta))]
    pub async fn apply_balance_change(
        &self,
        invoice_id: Uuid,
        delta: Decimal,
    ) -> Result<Invoice, AppError> {
        let timer = LEDGER_OPERATION_DURATION
            .with_label_values(&["apply_balance_change"])
            .start_timer();
        let result = retry_on_conflict(&self.retry, "apply_balance_change", || async move {
            let invoice = self.get_invoice(invoice_id).await?;
            let write =
                plan_balance_change(&invoice, BalanceChange::Delta(delta), self.clock.now())?;
            let updated = write.invoice().clone();
            commit_changes(
                self.store.as_ref(),
                "apply_balance_change",
                Write::Invoice(write).into(),
            )
            .await?;
            Ok(updated)
        })
        .await;
        timer.observe_duration();
        record_outcome("apply_balance_change", &result);

        let invoice = result?;
        info!(
            invoice_number = %invoice.invoice_number,
            paid_amount = %invoice.paid_amount,
            remaining_amount = %invoice.remaining_amount,
            status = invoice.status.as_str(),
            "Invoice balance changed"
        );
        Ok(invoice)
    }

    /// Stamp the invoice as sent. Sending again keeps the first timestamp.
    #[instrument(skip(self))]
    pub async fn mark_sent(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let timer = LEDGER_OPERATION_DURATION
            .with_label_values(&["mark_sent"])
            .start_timer();
        let result = self
            .touch(invoice_id, "mark_sent", |invoice, now| {
                invoice.sent_utc.get_or_insert(now);
                Ok(())
            })
            .await;
        timer.observe_duration();
        record_outcome("mark_sent", &result);
        result
    }

    /// Count a payment reminder sent for the invoice.
    #[instrument(skip(self))]
    pub async fn record_reminder(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let timer = LEDGER_OPERATION_DURATION
            .with_label_values(&["record_reminder"])
            .start_timer();
        let result = self
            .touch(invoice_id, "record_reminder", |invoice, now| {
                if invoice.status == InvoiceStatus::Paid {
                    return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                        "Invoice {} is already paid",
                        invoice.invoice_number
                    )));
                }
                invoice.reminder_count += 1;
                invoice.reminder_sent_utc = Some(now);
                Ok(())
            })
            .await;
        timer.observe_duration();
        record_outcome("record_reminder", &result);

        let invoice = result?;
        info!(
            invoice_number = %invoice.invoice_number,
            reminder_count = invoice.reminder_count,
            "Reminder recorded"
        );
        Ok(invoice)
    }

    /// Re-derive the status of one invoice at `now`.
    ///
    /// Returns the updated invoice, or `None` when the derived status is the
    /// one already stored.
    #[instrument(skip(self))]
    pub async fn refresh_status(
        &self,
        invoice_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Invoice>, AppError> {
        retry_on_conflict(&self.retry, "refresh_status", || async move {
            let invoice = self.get_invoice(invoice_id).await?;
            let status = status_of(&invoice, now);
            if status == invoice.status {
                return Ok(None);
            }

            let mut next = invoice.clone();
            restamp(&mut next, &invoice, now);
            commit_changes(
                self.store.as_ref(),
                "refresh_status",
                Write::Invoice(InvoiceWrite::update(next.clone(), invoice.version)).into(),
            )
            .await?;

            info!(
                invoice_number = %next.invoice_number,
                from = invoice.status.as_str(),
                to = next.status.as_str(),
                "Invoice status changed"
            );
            Ok(Some(next))
        })
        .await
    }

    /// Versioned read-modify-write of non-balance fields.
    async fn touch<F>(
        &self,
        invoice_id: Uuid,
        operation: &'static str,
        modify: F,
    ) -> Result<Invoice, AppError>
    where
        F: Fn(&mut Invoice, DateTime<Utc>) -> Result<(), AppError>,
    {
        let modify = &modify;
        retry_on_conflict(&self.retry, operation, || async move {
            let invoice = self.get_invoice(invoice_id).await?;
            let now = self.clock.now();

            let mut next = invoice.clone();
            modify(&mut next, now)?;
            restamp(&mut next, &invoice, now);

            commit_changes(
                self.store.as_ref(),
                operation,
                Write::Invoice(InvoiceWrite::update(next.clone(), invoice.version)).into(),
            )
            .await?;
            Ok(next)
        })
        .await
    }
}

fn check_totals(order: &Order) -> Result<(), AppError> {
    for (name, value) in [
        ("totalHT", order.total_ht),
        ("totalTVA", order.total_tva),
        ("totalTTC", order.total_ttc),
    ] {
        if value < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Order {} has a negative {} ({}), totals must be at least 0",
                order.order_id,
                name,
                value
            )));
        }
        if value.normalize().scale() > 2 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Order {} has a {} of {} with more than 2 decimal places",
                order.order_id,
                name,
                value
            )));
        }
    }
    Ok(())
}

fn new_invoice(
    order: &Order,
    invoice_number: String,
    invoice_type: InvoiceType,
    due_date: Option<NaiveDate>,
    notes: Option<String>,
    sent: bool,
    now: DateTime<Utc>,
) -> Invoice {
    let mut invoice = Invoice {
        invoice_id: Uuid::new_v4(),
        order_id: order.order_id,
        shop_id: order.shop_id,
        invoice_number,
        invoice_type,
        status: InvoiceStatus::Draft,
        total_ht: order.total_ht,
        total_tva: order.total_tva,
        total_ttc: order.total_ttc,
        paid_amount: Decimal::ZERO,
        remaining_amount: order.total_ttc,
        due_date,
        notes,
        generated_utc: now,
        sent_utc: sent.then_some(now),
        paid_utc: None,
        reminder_count: 0,
        reminder_sent_utc: None,
        version: 0,
        updated_utc: now,
    };
    invoice.status = status_of(&invoice, now);
    if invoice.status == InvoiceStatus::Paid {
        invoice.paid_utc = Some(now);
    }
    invoice
}
