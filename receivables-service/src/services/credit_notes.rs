//! Credit note processor.
//!
//! A credit note is issued PENDING and applied at most once. Application moves
//! the note to APPLIED and changes the invoice balance in one commit.

use crate::models::{
    CreditNote, CreditNotePolicy, CreditNoteStatus, DocumentKind, Invoice, IssueCreditNote,
};
use crate::services::clock::Clock;
use crate::services::ledger::{
    check_amount, commit_changes, invoice_not_found, plan_balance_change, BalanceChange,
};
use crate::services::metrics::{record_outcome, CREDIT_NOTES_TOTAL, LEDGER_OPERATION_DURATION};
use crate::services::numbering::DocumentNumberAllocator;
use crate::services::store::{ChangeSet, LedgerStore, Write};
use serde::Serialize;
use service_core::error::AppError;
use service_core::utils::{retry_on_conflict, RetryConfig};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Result of applying a credit note.
#[derive(Debug, Clone, Serialize)]
pub struct CreditNoteApplication {
    pub credit_note: CreditNote,
    pub invoice: Invoice,
}

pub struct CreditNoteProcessor {
    store: Arc<dyn LedgerStore>,
    numbers: Arc<DocumentNumberAllocator>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    policy: CreditNotePolicy,
}

impl CreditNoteProcessor {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        numbers: Arc<DocumentNumberAllocator>,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
        policy: CreditNotePolicy,
    ) -> Self {
        Self {
            store,
            numbers,
            clock,
            retry,
            policy,
        }
    }

    pub fn policy(&self) -> CreditNotePolicy {
        self.policy
    }

    /// Issue a PENDING credit note against an invoice. The balance is untouched.
    #[instrument(skip(self, input), fields(invoice_id = %input.invoice_id, amount = %input.amount))]
    pub async fn issue_credit_note(&self, input: IssueCreditNote) -> Result<CreditNote, AppError> {
        let timer = LEDGER_OPERATION_DURATION
            .with_label_values(&["issue_credit_note"])
            .start_timer();
        let result = self.issue(input).await;
        timer.observe_duration();
        record_outcome("issue_credit_note", &result);
        result
    }

    async fn issue(&self, input: IssueCreditNote) -> Result<CreditNote, AppError> {
        input.validate()?;
        check_amount("Credit note amount", input.amount)?;

        let invoice = self.creditable_invoice(input.invoice_id).await?;
        if input.amount > invoice.total_ttc {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Credit note amount {} exceeds the total {} of invoice {}",
                input.amount,
                invoice.total_ttc,
                invoice.invoice_number
            )));
        }

        let credit_note_number = self.numbers.allocate(DocumentKind::CreditNote).await?;
        let credit_note = CreditNote {
            credit_note_id: Uuid::new_v4(),
            credit_note_number,
            original_invoice_id: invoice.invoice_id,
            amount: input.amount,
            reason: input.reason,
            notes: input.notes,
            status: CreditNoteStatus::Pending,
            paid_increment: None,
            balance_reduction: None,
            applied_utc: None,
            applied_to_invoice_id: None,
            created_utc: self.clock.now(),
        };

        commit_changes(
            self.store.as_ref(),
            "issue_credit_note",
            Write::InsertCreditNote(credit_note.clone()).into(),
        )
        .await?;

        CREDIT_NOTES_TOTAL.with_label_values(&["issued"]).inc();
        info!(
            credit_note_id = %credit_note.credit_note_id,
            credit_note_number = %credit_note.credit_note_number,
            invoice_number = %invoice.invoice_number,
            amount = %credit_note.amount,
            "Credit note issued"
        );

        Ok(credit_note)
    }

    /// Apply a PENDING credit note to an invoice.
    ///
    /// The paid amount rises by `min(amount, remaining)`; what comes off the
    /// remaining amount depends on the [`CreditNotePolicy`]. Applying a note
    /// that is no longer PENDING is a conflict.
    #[instrument(skip(self))]
    pub async fn apply_credit_note(
        &self,
        invoice_id: Uuid,
        credit_note_id: Uuid,
    ) -> Result<CreditNoteApplication, AppError> {
        let timer = LEDGER_OPERATION_DURATION
            .with_label_values(&["apply_credit_note"])
            .start_timer();
        let result = retry_on_conflict(&self.retry, "apply_credit_note", || async move {
            let invoice = self.creditable_invoice(invoice_id).await?;
            let note = self.get_credit_note(credit_note_id).await?;
            if note.status != CreditNoteStatus::Pending {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Credit note {} is already {}",
                    note.credit_note_number,
                    note.status.as_str()
                )));
            }

            let (paid_increment, balance_reduction) =
                self.policy.split(note.amount, invoice.remaining_amount);
            if note.amount > invoice.remaining_amount {
                warn!(
                    credit_note_number = %note.credit_note_number,
                    amount = %note.amount,
                    remaining_amount = %invoice.remaining_amount,
                    policy = self.policy.as_str(),
                    "Credit note exceeds the remaining balance"
                );
            }

            let now = self.clock.now();
            let write = plan_balance_change(
                &invoice,
                BalanceChange::Credit {
                    paid_increment,
                    balance_reduction,
                },
                now,
            )?;
            let updated = write.invoice().clone();

            let applied = CreditNote {
                status: CreditNoteStatus::Applied,
                paid_increment: Some(paid_increment),
                balance_reduction: Some(balance_reduction),
                applied_utc: Some(now),
                applied_to_invoice_id: Some(invoice.invoice_id),
                ..note
            };

            let changes = ChangeSet::new()
                .with(Write::ApplyCreditNote(applied.clone()))
                .with(Write::Invoice(write));
            commit_changes(self.store.as_ref(), "apply_credit_note", changes).await?;

            Ok(CreditNoteApplication {
                credit_note: applied,
                invoice: updated,
            })
        })
        .await;
        timer.observe_duration();
        record_outcome("apply_credit_note", &result);

        let application = result?;
        CREDIT_NOTES_TOTAL.with_label_values(&["applied"]).inc();
        info!(
            credit_note_number = %application.credit_note.credit_note_number,
            invoice_number = %application.invoice.invoice_number,
            paid_amount = %application.invoice.paid_amount,
            remaining_amount = %application.invoice.remaining_amount,
            status = application.invoice.status.as_str(),
            "Credit note applied"
        );
        Ok(application)
    }

    #[instrument(skip(self))]
    pub async fn get_credit_note(&self, credit_note_id: Uuid) -> Result<CreditNote, AppError> {
        self.store
            .get_credit_note(credit_note_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Credit note {} not found", credit_note_id))
            })
    }

    /// Credit notes issued against an invoice, oldest first.
    #[instrument(skip(self))]
    pub async fn list_credit_notes(&self, invoice_id: Uuid) -> Result<Vec<CreditNote>, AppError> {
        if self.store.get_invoice(invoice_id).await?.is_none() {
            return Err(invoice_not_found(invoice_id));
        }
        Ok(self.store.list_credit_notes(invoice_id).await?)
    }

    async fn creditable_invoice(&self, invoice_id: Uuid) -> Result<Invoice, AppError> {
        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| invoice_not_found(invoice_id))?;
        if invoice.is_proforma() {
            return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                "Proforma {} cannot be credited",
                invoice.invoice_number
            )));
        }
        Ok(invoice)
    }
}
