//! Payment recorder.
//!
//! Recording a payment adds its amount to the invoice balance. Editing or
//! deleting one rebuilds the balance from the full set of remaining records,
//! never by applying a delta.

use crate::models::{
    DocumentKind, Invoice, Payment, PaymentStatus, RecordPayment, UpdatePayment,
};
use crate::services::clock::Clock;
use crate::services::ledger::{
    check_amount, commit_changes, invoice_not_found, plan_balance_change, recomputed_balance,
    BalanceChange, InvoiceWrite,
};
use crate::services::metrics::{
    payment_method_label, record_outcome, LEDGER_OPERATION_DURATION, PAYMENTS_TOTAL,
    PAYMENT_AMOUNT_TOTAL,
};
use crate::services::numbering::DocumentNumberAllocator;
use crate::services::store::{ChangeSet, LedgerStore, UniqueConstraint, Write};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use service_core::error::AppError;
use service_core::utils::{retry_on_conflict, RetryConfig};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Records, edits and deletes payments against invoices.
pub struct PaymentRecorder {
    store: Arc<dyn LedgerStore>,
    numbers: Arc<DocumentNumberAllocator>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl PaymentRecorder {
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

    /// Record a confirmed payment and add it to the invoice balance.
    ///
    /// With an idempotency key, repeating the request returns the payment
    /// recorded the first time and leaves the balance alone.
    #[instrument(skip(self, input), fields(invoice_id = %input.invoice_id, amount = %input.amount))]
    pub async fn record_payment(&self, input: RecordPayment) -> Result<Payment, AppError> {
        let timer = LEDGER_OPERATION_DURATION
            .with_label_values(&["record_payment"])
            .start_timer();
        let result = self.record(&input).await;
        timer.observe_duration();
        record_outcome("record_payment", &result);
        result
    }

    async fn record(&self, input: &RecordPayment) -> Result<Payment, AppError> {
        input.validate()?;
        check_amount("Payment amount", input.amount)?;

        if let Some(existing) = self.find_replay(input).await? {
            return Ok(existing);
        }

        match self.record_new(input).await {
            // A concurrent request under the same key may have settled the
            // balance this one was checked against.
            Err(err) if input.idempotency_key.is_some() && is_lost_race(&err) => {
                match self.find_replay(input).await? {
                    Some(existing) => Ok(existing),
                    None => Err(err),
                }
            }
            other => other,
        }
    }

    async fn record_new(&self, input: &RecordPayment) -> Result<Payment, AppError> {
        // Reject early so an obviously invalid request does not burn a receipt number.
        let invoice = self.payable_invoice(input.invoice_id).await?;
        check_within_remaining(&invoice, input.amount)?;

        let receipt_number = self.numbers.allocate(DocumentKind::Receipt).await?;
        let receipt_number = receipt_number.as_str();
        let payment_id = Uuid::new_v4();

        let recorded = retry_on_conflict(&self.retry, "record_payment", || async move {
            let invoice = self.payable_invoice(input.invoice_id).await?;
            check_within_remaining(&invoice, input.amount)?;

            let now = self.clock.now();
            let payment = Payment {
                payment_id,
                invoice_id: invoice.invoice_id,
                order_id: invoice.order_id,
                receipt_number: receipt_number.to_string(),
                amount: input.amount,
                payment_method: input.payment_method.clone(),
                payment_reference: input.payment_reference.clone(),
                payment_date: input.payment_date,
                status: PaymentStatus::Confirmed,
                notes: input.notes.clone(),
                recorded_by: input.recorded_by.clone(),
                idempotency_key: input.idempotency_key.clone(),
                created_utc: now,
                updated_utc: now,
            };
            let write = plan_balance_change(&invoice, BalanceChange::Delta(input.amount), now)?;
            let updated = write.invoice().clone();

            let changes = ChangeSet::new()
                .with(Write::InsertPayment(payment.clone()))
                .with(Write::Invoice(write));
            match commit_changes(self.store.as_ref(), "record_payment", changes).await {
                Ok(()) => Ok(Some((payment, updated))),
                // A concurrent request with the same key won the race.
                Err(e) if e.is_duplicate(UniqueConstraint::IdempotencyKey) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await?;

        let Some((payment, invoice)) = recorded else {
            return self.find_replay(input).await?.ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!("Duplicate payment idempotency key"))
            });
        };

        let method = payment_method_label(&payment.payment_method);
        PAYMENTS_TOTAL.with_label_values(&[method]).inc();
        PAYMENT_AMOUNT_TOTAL
            .with_label_values(&[method])
            .inc_by(payment.amount.to_f64().unwrap_or(0.0));
        info!(
            payment_id = %payment.payment_id,
            receipt_number = %payment.receipt_number,
            invoice_number = %invoice.invoice_number,
            remaining_amount = %invoice.remaining_amount,
            status = invoice.status.as_str(),
            recorded_by = %payment.recorded_by,
            "Payment recorded"
        );

        Ok(payment)
    }

    /// Edit a recorded payment and rebuild the invoice balance.
    #[instrument(skip(self, input))]
    pub async fn update_payment(
        &self,
        payment_id: Uuid,
        input: &UpdatePayment,
    ) -> Result<Payment, AppError> {
        let timer = LEDGER_OPERATION_DURATION
            .with_label_values(&["update_payment"])
            .start_timer();
        let result = self.update(payment_id, input).await;
        timer.observe_duration();
        record_outcome("update_payment", &result);
        result
    }

    async fn update(&self, payment_id: Uuid, input: &UpdatePayment) -> Result<Payment, AppError> {
        input.validate()?;
        if let Some(amount) = input.amount {
            check_amount("Payment amount", amount)?;
        }

        let (payment, invoice) =
            retry_on_conflict(&self.retry, "update_payment", || async move {
                let (current, invoice, mut payments) = self.load(payment_id).await?;

                let mut edited = current.clone();
                apply_update(&mut edited, input);
                edited.updated_utc = self.clock.now();
                for p in payments.iter_mut() {
                    if p.payment_id == payment_id {
                        *p = edited.clone();
                    }
                }

                let write = self.rebalance(&invoice, &payments, Some(&edited)).await?;
                let updated = write.invoice().clone();
                let changes = ChangeSet::new()
                    .with(Write::UpdatePayment(edited.clone()))
                    .with(Write::Invoice(write));
                commit_changes(self.store.as_ref(), "update_payment", changes).await?;
                Ok((edited, updated))
            })
            .await?;

        info!(
            payment_id = %payment.payment_id,
            amount = %payment.amount,
            status = payment.status.as_str(),
            invoice_number = %invoice.invoice_number,
            paid_amount = %invoice.paid_amount,
            remaining_amount = %invoice.remaining_amount,
            "Payment updated"
        );
        Ok(payment)
    }

    /// Delete a payment and rebuild the invoice balance without it.
    #[instrument(skip(self))]
    pub async fn delete_payment(&self, payment_id: Uuid) -> Result<Invoice, AppError> {
        let timer = LEDGER_OPERATION_DURATION
            .with_label_values(&["delete_payment"])
            .start_timer();
        let result = retry_on_conflict(&self.retry, "delete_payment", || async move {
            let (current, invoice, mut payments) = self.load(payment_id).await?;
            payments.retain(|p| p.payment_id != payment_id);

            let write = self.rebalance(&invoice, &payments, None).await?;
            let updated = write.invoice().clone();
            let changes = ChangeSet::new()
                .with(Write::DeletePayment(payment_id))
                .with(Write::Invoice(write));
            commit_changes(self.store.as_ref(), "delete_payment", changes).await?;
            Ok((current, updated))
        })
        .await;
        timer.observe_duration();
        record_outcome("delete_payment", &result);

        let (payment, invoice) = result?;
        info!(
            payment_id = %payment.payment_id,
            receipt_number = %payment.receipt_number,
            invoice_number = %invoice.invoice_number,
            paid_amount = %invoice.paid_amount,
            remaining_amount = %invoice.remaining_amount,
            "Payment deleted"
        );
        Ok(invoice)
    }

    #[instrument(skip(self))]
    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        self.store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| payment_not_found(payment_id))
    }

    /// Payments recorded against an invoice, oldest first.
    #[instrument(skip(self))]
    pub async fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, AppError> {
        if self.store.get_invoice(invoice_id).await?.is_none() {
            return Err(invoice_not_found(invoice_id));
        }
        Ok(self.store.list_payments(invoice_id).await?)
    }

    async fn payable_invoice(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        if invoice.is_proforma() {
            return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                "Proforma {} cannot receive payments",
                invoice.invoice_number
            )));
        }
        Ok(invoice)
    }

    /// The payment previously recorded under `input`'s idempotency key, if any.
    async fn find_replay(&self, input: &RecordPayment) -> Result<Option<Payment>, AppError> {
        let Some(key) = input.idempotency_key.as_deref() else {
            return Ok(None);
        };
        let Some(existing) = self.store.find_payment_by_idempotency_key(key).await? else {
            return Ok(None);
        };

        if existing.invoice_id != input.invoice_id {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Idempotency key {} was already used for a payment on another invoice",
                key
            )));
        }
        if existing.amount != input.amount {
            warn!(
                payment_id = %existing.payment_id,
                recorded_amount = %existing.amount,
                requested_amount = %input.amount,
                "Replayed payment request differs from the recorded payment"
            );
        }

        info!(
            payment_id = %existing.payment_id,
            receipt_number = %existing.receipt_number,
            "Payment request replayed"
        );
        Ok(Some(existing))
    }

    /// Invoice first, then its payments: a write landing in between moves the
    /// invoice version and the commit is retried.
    async fn load(&self, payment_id: Uuid) -> Result<(Payment, Invoice, Vec<Payment>), AppError> {
        let payment = self.get_payment(payment_id).await?;
        let invoice = self.payable_invoice(payment.invoice_id).await?;
        let payments = self.store.list_payments(invoice.invoice_id).await?;
        let current = payments
            .iter()
            .find(|p| p.payment_id == payment_id)
            .cloned()
            .ok_or_else(|| payment_not_found(payment_id))?;
        Ok((current, invoice, payments))
    }

    /// Plan the invoice write for the given full set of payments.
    async fn rebalance(
        &self,
        invoice: &Invoice,
        payments: &[Payment],
        edited: Option<&Payment>,
    ) -> Result<InvoiceWrite, AppError> {
        let credit_notes = self
            .store
            .list_applied_credit_notes(invoice.invoice_id)
            .await?;
        let change = recomputed_balance(invoice.total_ttc, payments, &credit_notes);

        if let BalanceChange::Recomputed { remaining, .. } = change {
            if remaining < Decimal::ZERO {
                return Err(overdraw_error(invoice, remaining, edited));
            }
        }

        plan_balance_change(invoice, change, self.clock.now())
    }
}

fn payment_not_found(payment_id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("Payment {} not found", payment_id))
}

fn is_lost_race(err: &AppError) -> bool {
    matches!(
        err,
        AppError::BadRequest(_) | AppError::Conflict(_) | AppError::ConcurrentModification(_)
    )
}

fn check_within_remaining(invoice: &Invoice, amount: Decimal) -> Result<(), AppError> {
    if amount > invoice.remaining_amount {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Payment amount {} exceeds the remaining amount {} of invoice {}",
            amount,
            invoice.remaining_amount,
            invoice.invoice_number
        )));
    }
    Ok(())
}

fn overdraw_error(invoice: &Invoice, remaining: Decimal, edited: Option<&Payment>) -> AppError {
    match edited.filter(|p| p.status.counts_toward_balance()) {
        Some(payment) => AppError::BadRequest(anyhow::anyhow!(
            "Payment amount {} would overdraw invoice {}, the maximum allowed is {}",
            payment.amount,
            invoice.invoice_number,
            (payment.amount + remaining).max(Decimal::ZERO)
        )),
        None => AppError::BadRequest(anyhow::anyhow!(
            "Recorded payments exceed the total {} of invoice {} by {}",
            invoice.total_ttc,
            invoice.invoice_number,
            -remaining
        )),
    }
}

fn apply_update(payment: &mut Payment, input: &UpdatePayment) {
    if let Some(amount) = input.amount {
        payment.amount = amount;
    }
    if let Some(method) = &input.payment_method {
        payment.payment_method = method.clone();
    }
    if let Some(reference) = &input.payment_reference {
        payment.payment_reference = Some(reference.clone());
    }
    if let Some(date) = input.payment_date {
        payment.payment_date = date;
    }
    if let Some(status) = input.status {
        payment.status = status;
    }
    if let Some(notes) = &input.notes {
        payment.notes = Some(notes.clone());
    }
}
