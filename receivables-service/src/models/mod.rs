//! Domain models for receivables-service.

mod credit_note;
mod document;
mod invoice;
mod order;
mod payment;
mod report;

pub use credit_note::{CreditNote, CreditNotePolicy, CreditNoteStatus, IssueCreditNote};
pub use document::DocumentKind;
pub use invoice::{
    CreateInvoice, CreateProforma, Invoice, InvoiceFilter, InvoiceStatus, InvoiceType,
};
pub use order::{Order, OrderStatus};
pub use payment::{Payment, PaymentStatus, RecordPayment, UpdatePayment};
pub use report::{DateRange, InvoiceStats, OverdueInvoice};
