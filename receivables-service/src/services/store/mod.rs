//! Persistence seam for the ledger.
//!
//! Reads are plain lookups. Every write goes through [`LedgerStore::commit`],
//! which applies a [`ChangeSet`] atomically: either all writes land or none do.
//! Invoice writes carry the version they were computed from and fail with
//! [`StoreError::StaleWrite`] if another writer moved it in the meantime.

mod memory;

pub use memory::MemoryStore;

use crate::models::{CreditNote, DocumentKind, Invoice, InvoiceFilter, Payment};
use crate::services::ledger::InvoiceWrite;
use async_trait::async_trait;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

/// Hard uniqueness constraints enforced by every store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueConstraint {
    InvoiceNumber,
    /// At most one binding invoice per order.
    OrderInvoice,
    ReceiptNumber,
    IdempotencyKey,
    CreditNoteNumber,
    DocumentNumber,
    PrimaryKey,
}

impl UniqueConstraint {
    pub fn as_str(&self) -> &'static str {
        match self {
            UniqueConstraint::InvoiceNumber => "invoice_number",
            UniqueConstraint::OrderInvoice => "order_invoice",
            UniqueConstraint::ReceiptNumber => "receipt_number",
            UniqueConstraint::IdempotencyKey => "idempotency_key",
            UniqueConstraint::CreditNoteNumber => "credit_note_number",
            UniqueConstraint::DocumentNumber => "document_number",
            UniqueConstraint::PrimaryKey => "primary_key",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate {}: {value}", constraint.as_str())]
    Duplicate {
        constraint: UniqueConstraint,
        value: String,
    },

    /// A conditional write found the record in a different state than expected.
    #[error("stale write: {0}")]
    StaleWrite(String),

    /// An update or delete targeted a record that no longer exists.
    #[error("missing record: {0}")]
    Missing(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_duplicate(&self, constraint: UniqueConstraint) -> bool {
        matches!(self, StoreError::Duplicate { constraint: c, .. } if *c == constraint)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate {
                constraint: UniqueConstraint::OrderInvoice,
                value,
            } => AppError::Conflict(anyhow::anyhow!(
                "An invoice already exists for order {}",
                value
            )),
            StoreError::Duplicate { constraint, value } => AppError::Conflict(anyhow::anyhow!(
                "Duplicate {}: {}",
                constraint.as_str(),
                value
            )),
            StoreError::StaleWrite(msg) | StoreError::Missing(msg) => {
                AppError::ConcurrentModification(anyhow::anyhow!(msg))
            }
            StoreError::Backend(e) => AppError::DatabaseError(e),
        }
    }
}

/// One record-level write inside a [`ChangeSet`].
#[derive(Debug, Clone)]
pub enum Write {
    /// Insert or versioned update of an invoice; only the ledger builds these.
    Invoice(InvoiceWrite),
    InsertPayment(Payment),
    UpdatePayment(Payment),
    DeletePayment(Uuid),
    InsertCreditNote(CreditNote),
    /// Store the applied credit note; the stored copy must still be PENDING.
    ApplyCreditNote(CreditNote),
}

impl Write {
    pub fn label(&self) -> &'static str {
        match self {
            Write::Invoice(w) if w.expected_version().is_none() => "insert_invoice",
            Write::Invoice(_) => "update_invoice",
            Write::InsertPayment(_) => "insert_payment",
            Write::UpdatePayment(_) => "update_payment",
            Write::DeletePayment(_) => "delete_payment",
            Write::InsertCreditNote(_) => "insert_credit_note",
            Write::ApplyCreditNote(_) => "apply_credit_note",
        }
    }
}

/// Writes that commit together or not at all.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    writes: Vec<Write>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, write: Write) -> Self {
        self.writes.push(write);
        self
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

impl From<Write> for ChangeSet {
    fn from(write: Write) -> Self {
        ChangeSet::new().with(write)
    }
}

/// Storage backend for invoices, payments, credit notes and document numbers.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, StoreError>;

    /// The binding (non-proforma) invoice issued for an order, if any.
    async fn find_invoice_for_order(&self, order_id: Uuid) -> Result<Option<Invoice>, StoreError>;

    /// Invoices matching `filter`, oldest first.
    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, StoreError>;

    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, StoreError>;

    async fn find_payment_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Payment>, StoreError>;

    /// All payments recorded against an invoice, oldest first.
    async fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, StoreError>;

    async fn get_credit_note(&self, credit_note_id: Uuid)
    -> Result<Option<CreditNote>, StoreError>;

    /// Credit notes issued against an invoice, oldest first.
    async fn list_credit_notes(&self, invoice_id: Uuid) -> Result<Vec<CreditNote>, StoreError>;

    /// Credit notes applied to an invoice (whatever invoice they were issued against).
    async fn list_applied_credit_notes(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<CreditNote>, StoreError>;

    /// Claim `number` for `kind`. Fails with `Duplicate(DocumentNumber)` if taken.
    async fn reserve_document_number(
        &self,
        kind: DocumentKind,
        number: &str,
    ) -> Result<(), StoreError>;

    /// Apply all writes atomically.
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;
}
