//! In-process [`LedgerStore`] with the same constraints as the Postgres schema.
//!
//! A commit stages its writes on a copy of the tables and swaps the copy in
//! only when every write passed its checks.

use super::{ChangeSet, LedgerStore, StoreError, UniqueConstraint, Write};
use crate::models::{
    CreditNote, CreditNoteStatus, DocumentKind, Invoice, InvoiceFilter, InvoiceType, Payment,
};
use crate::services::ledger::InvoiceWrite;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct Tables {
    invoices: HashMap<Uuid, Invoice>,
    payments: HashMap<Uuid, Payment>,
    credit_notes: HashMap<Uuid, CreditNote>,
    document_numbers: HashSet<String>,
}

impl Tables {
    fn apply(&mut self, write: Write) -> Result<(), StoreError> {
        match write {
            Write::Invoice(w) => self.write_invoice(w),
            Write::InsertPayment(payment) => {
                if self.payments.contains_key(&payment.payment_id) {
                    return Err(duplicate(UniqueConstraint::PrimaryKey, payment.payment_id));
                }
                if self
                    .payments
                    .values()
                    .any(|p| p.receipt_number == payment.receipt_number)
                {
                    return Err(duplicate(
                        UniqueConstraint::ReceiptNumber,
                        &payment.receipt_number,
                    ));
                }
                if let Some(key) = &payment.idempotency_key {
                    if self
                        .payments
                        .values()
                        .any(|p| p.idempotency_key.as_ref() == Some(key))
                    {
                        return Err(duplicate(UniqueConstraint::IdempotencyKey, key));
                    }
                }
                self.payments.insert(payment.payment_id, payment);
                Ok(())
            }
            Write::UpdatePayment(payment) => match self.payments.get_mut(&payment.payment_id) {
                Some(existing) => {
                    *existing = payment;
                    Ok(())
                }
                None => Err(StoreError::Missing(format!(
                    "payment {}",
                    payment.payment_id
                ))),
            },
            Write::DeletePayment(payment_id) => self
                .payments
                .remove(&payment_id)
                .map(|_| ())
                .ok_or_else(|| StoreError::Missing(format!("payment {}", payment_id))),
            Write::InsertCreditNote(note) => {
                if self.credit_notes.contains_key(&note.credit_note_id) {
                    return Err(duplicate(UniqueConstraint::PrimaryKey, note.credit_note_id));
                }
                if self
                    .credit_notes
                    .values()
                    .any(|c| c.credit_note_number == note.credit_note_number)
                {
                    return Err(duplicate(
                        UniqueConstraint::CreditNoteNumber,
                        &note.credit_note_number,
                    ));
                }
                self.credit_notes.insert(note.credit_note_id, note);
                Ok(())
            }
            Write::ApplyCreditNote(note) => match self.credit_notes.get_mut(&note.credit_note_id)
            {
                Some(existing) if existing.status == CreditNoteStatus::Pending => {
                    *existing = note;
                    Ok(())
                }
                Some(existing) => Err(StoreError::StaleWrite(format!(
                    "credit note {} is {}",
                    existing.credit_note_number,
                    existing.status.as_str()
                ))),
                None => Err(StoreError::Missing(format!(
                    "credit note {}",
                    note.credit_note_id
                ))),
            },
        }
    }

    fn write_invoice(&mut self, write: InvoiceWrite) -> Result<(), StoreError> {
        let (mut invoice, expected_version) = write.into_parts();

        let Some(expected) = expected_version else {
            if self.invoices.contains_key(&invoice.invoice_id) {
                return Err(duplicate(UniqueConstraint::PrimaryKey, invoice.invoice_id));
            }
            if self
                .invoices
                .values()
                .any(|i| i.invoice_number == invoice.invoice_number)
            {
                return Err(duplicate(
                    UniqueConstraint::InvoiceNumber,
                    &invoice.invoice_number,
                ));
            }
            if invoice.invoice_type == InvoiceType::Invoice
                && self.invoices.values().any(|i| {
                    i.invoice_type == InvoiceType::Invoice && i.order_id == invoice.order_id
                })
            {
                return Err(duplicate(UniqueConstraint::OrderInvoice, invoice.order_id));
            }
            self.invoices.insert(invoice.invoice_id, invoice);
            return Ok(());
        };

        match self.invoices.get_mut(&invoice.invoice_id) {
            Some(existing) if existing.version == expected => {
                invoice.version = expected + 1;
                *existing = invoice;
                Ok(())
            }
            Some(existing) => Err(StoreError::StaleWrite(format!(
                "invoice {} is at version {}, expected {}",
                existing.invoice_number, existing.version, expected
            ))),
            None => Err(StoreError::Missing(format!("invoice {}", invoice.invoice_id))),
        }
    }
}

fn duplicate(constraint: UniqueConstraint, value: impl ToString) -> StoreError {
    StoreError::Duplicate {
        constraint,
        value: value.to_string(),
    }
}

/// Ledger store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, StoreError> {
        Ok(self.tables.read().await.invoices.get(&invoice_id).cloned())
    }

    async fn find_invoice_for_order(&self, order_id: Uuid) -> Result<Option<Invoice>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .invoices
            .values()
            .find(|i| i.order_id == order_id && i.invoice_type == InvoiceType::Invoice)
            .cloned())
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, StoreError> {
        let tables = self.tables.read().await;
        let mut invoices: Vec<Invoice> = tables
            .invoices
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            a.generated_utc
                .cmp(&b.generated_utc)
                .then_with(|| a.invoice_number.cmp(&b.invoice_number))
        });
        Ok(invoices)
    }

    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.tables.read().await.payments.get(&payment_id).cloned())
    }

    async fn find_payment_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .payments
            .values()
            .find(|p| p.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| p.invoice_id == invoice_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| {
            a.created_utc
                .cmp(&b.created_utc)
                .then_with(|| a.receipt_number.cmp(&b.receipt_number))
        });
        Ok(payments)
    }

    async fn get_credit_note(
        &self,
        credit_note_id: Uuid,
    ) -> Result<Option<CreditNote>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .credit_notes
            .get(&credit_note_id)
            .cloned())
    }

    async fn list_credit_notes(&self, invoice_id: Uuid) -> Result<Vec<CreditNote>, StoreError> {
        let tables = self.tables.read().await;
        let mut notes: Vec<CreditNote> = tables
            .credit_notes
            .values()
            .filter(|c| c.original_invoice_id == invoice_id)
            .cloned()
            .collect();
        notes.sort_by(|a, b| a.created_utc.cmp(&b.created_utc));
        Ok(notes)
    }

    async fn list_applied_credit_notes(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<CreditNote>, StoreError> {
        let tables = self.tables.read().await;
        let mut notes: Vec<CreditNote> = tables
            .credit_notes
            .values()
            .filter(|c| {
                c.status == CreditNoteStatus::Applied
                    && c.applied_to_invoice_id == Some(invoice_id)
            })
            .cloned()
            .collect();
        notes.sort_by(|a, b| a.applied_utc.cmp(&b.applied_utc));
        Ok(notes)
    }

    async fn reserve_document_number(
        &self,
        _kind: DocumentKind,
        number: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.document_numbers.insert(number.to_string()) {
            return Err(duplicate(UniqueConstraint::DocumentNumber, number));
        }
        Ok(())
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        for write in changes.into_writes() {
            staged.apply(write)?;
        }
        *tables = staged;
        Ok(())
    }
}
