//! Document number allocation.
//!
//! Numbers look like `FAC-202410-0042`: class prefix, issue year and month,
//! then a zero-padded four digit suffix. Candidates are drawn from a
//! [`SuffixSource`] and claimed through the store's uniqueness constraint, so
//! two concurrent allocators can never hand out the same number; the loser of
//! a collision draws again.

use crate::models::DocumentKind;
use crate::services::clock::Clock;
use crate::services::metrics::NUMBER_COLLISIONS_TOTAL;
use crate::services::store::{LedgerStore, UniqueConstraint};
use chrono::{DateTime, Utc};
use rand::Rng;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Exclusive upper bound of the numeric suffix.
pub const SUFFIX_SPACE: u16 = 10_000;

/// Default number of candidates tried before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Source of candidate suffixes in `0..SUFFIX_SPACE`.
pub trait SuffixSource: Send + Sync {
    fn next_suffix(&self) -> u16;
}

/// Uniformly random suffixes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSuffix;

impl SuffixSource for RandomSuffix {
    fn next_suffix(&self) -> u16 {
        rand::thread_rng().gen_range(0..SUFFIX_SPACE)
    }
}

/// Format a document number for `kind` issued at `issued_at`.
pub fn format_number(kind: DocumentKind, issued_at: DateTime<Utc>, suffix: u16) -> String {
    format!(
        "{}-{}-{:04}",
        kind.prefix(),
        issued_at.format("%Y%m"),
        suffix % SUFFIX_SPACE
    )
}

/// Whether `number` is a well-formed number of class `kind`.
pub fn is_well_formed(kind: DocumentKind, number: &str) -> bool {
    let mut parts = number.split('-');
    let (Some(prefix), Some(period), Some(suffix), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    let month = period.get(4..).and_then(|m| m.parse::<u32>().ok());
    prefix == kind.prefix()
        && period.len() == 6
        && period.bytes().all(|b| b.is_ascii_digit())
        && month.is_some_and(|m| (1..=12).contains(&m))
        && suffix.len() == 4
        && suffix.bytes().all(|b| b.is_ascii_digit())
}

/// Hands out unique document numbers per class.
pub struct DocumentNumberAllocator {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    suffixes: Arc<dyn SuffixSource>,
    max_attempts: u32,
}

impl DocumentNumberAllocator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        suffixes: Arc<dyn SuffixSource>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            clock,
            suffixes,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Allocate and reserve the next number for `kind`.
    #[instrument(skip(self), fields(prefix = kind.prefix()))]
    pub async fn allocate(&self, kind: DocumentKind) -> Result<String, AppError> {
        let issued_at = self.clock.now();

        for attempt in 1..=self.max_attempts {
            let candidate = format_number(kind, issued_at, self.suffixes.next_suffix());
            match self.store.reserve_document_number(kind, &candidate).await {
                Ok(()) => {
                    debug!(number = %candidate, attempt, "Document number allocated");
                    return Ok(candidate);
                }
                Err(e) if e.is_duplicate(UniqueConstraint::DocumentNumber) => {
                    NUMBER_COLLISIONS_TOTAL
                        .with_label_values(&[kind.prefix()])
                        .inc();
                    warn!(number = %candidate, attempt, "Document number collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Conflict(anyhow::anyhow!(
            "Could not allocate a unique {} number after {} attempts",
            kind.prefix(),
            self.max_attempts
        )))
    }
}
