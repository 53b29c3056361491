//! Services module for receivables-service.

pub mod clock;
pub mod credit_notes;
pub mod database;
pub mod ledger;
pub mod metrics;
pub mod numbering;
pub mod payments;
pub mod status;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use credit_notes::{CreditNoteApplication, CreditNoteProcessor};
pub use database::Database;
pub use ledger::{BalanceChange, InvoiceLedger};
pub use metrics::{get_metrics, init_metrics};
pub use numbering::{DocumentNumberAllocator, RandomSuffix, SuffixSource};
pub use payments::PaymentRecorder;
pub use status::{derive_status, AgingEngine};
pub use store::{LedgerStore, MemoryStore, StoreError};

use crate::models::CreditNotePolicy;
use service_core::utils::RetryConfig;
use std::sync::Arc;

/// Tunables shared by the ledger components.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub credit_note_policy: CreditNotePolicy,
    /// Candidates tried per document number before giving up.
    pub number_allocation_attempts: u32,
    /// Retries of an optimistic write after a concurrent modification.
    pub write_retries: u32,
    /// Look-ahead window for "due soon" in invoice statistics.
    pub due_soon_days: i64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            credit_note_policy: CreditNotePolicy::default(),
            number_allocation_attempts: numbering::DEFAULT_MAX_ATTEMPTS,
            write_retries: 5,
            due_soon_days: 7,
        }
    }
}

/// The receivables ledger: every component wired to one store, clock and
/// number allocator.
#[derive(Clone)]
pub struct Receivables {
    pub ledger: Arc<InvoiceLedger>,
    pub payments: Arc<PaymentRecorder>,
    pub credit_notes: Arc<CreditNoteProcessor>,
    pub aging: Arc<AgingEngine>,
    pub numbers: Arc<DocumentNumberAllocator>,
    store: Arc<dyn LedgerStore>,
}

impl Receivables {
    /// Wire the components with the system clock and random number suffixes.
    pub fn new(store: Arc<dyn LedgerStore>, settings: &LedgerSettings) -> Self {
        Self::with_parts(
            store,
            Arc::new(SystemClock),
            Arc::new(RandomSuffix),
            settings,
        )
    }

    pub fn with_parts(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        suffixes: Arc<dyn SuffixSource>,
        settings: &LedgerSettings,
    ) -> Self {
        let retry = RetryConfig::with_max_retries(settings.write_retries);
        let numbers = Arc::new(DocumentNumberAllocator::new(
            store.clone(),
            clock.clone(),
            suffixes,
            settings.number_allocation_attempts,
        ));
        let ledger = Arc::new(InvoiceLedger::new(
            store.clone(),
            numbers.clone(),
            clock.clone(),
            retry.clone(),
        ));
        let payments = Arc::new(PaymentRecorder::new(
            store.clone(),
            numbers.clone(),
            clock.clone(),
            retry.clone(),
        ));
        let credit_notes = Arc::new(CreditNoteProcessor::new(
            store.clone(),
            numbers.clone(),
            clock.clone(),
            retry,
            settings.credit_note_policy,
        ));
        let aging = Arc::new(AgingEngine::new(
            store.clone(),
            ledger.clone(),
            clock,
            settings.due_soon_days,
        ));

        Self {
            ledger,
            payments,
            credit_notes,
            aging,
            numbers,
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }
}
