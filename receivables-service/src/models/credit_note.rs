//! Credit note model for receivables-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Credit note lifecycle. PENDING -> APPLIED, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditNoteStatus {
    Pending,
    Applied,
}

impl CreditNoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditNoteStatus::Pending => "PENDING",
            CreditNoteStatus::Applied => "APPLIED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "APPLIED" => CreditNoteStatus::Applied,
            _ => CreditNoteStatus::Pending,
        }
    }
}

/// How applying a credit note reduces the remaining balance.
///
/// Both policies raise `paidAmount` by `min(amount, remaining)`. They differ in
/// what is taken off `remainingAmount`, which matters once the balance is
/// recomputed from records after a payment edit or deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditNotePolicy {
    /// Remaining is reduced by the full credit note amount. Can leave
    /// `paid + remaining < totalTTC`; pending product clarification.
    #[default]
    AsObserved,
    /// Remaining is reduced by the same amount that was added to paid.
    Balanced,
}

impl CreditNotePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditNotePolicy::AsObserved => "as_observed",
            CreditNotePolicy::Balanced => "balanced",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "as_observed" => Some(CreditNotePolicy::AsObserved),
            "balanced" => Some(CreditNotePolicy::Balanced),
            _ => None,
        }
    }

    /// `(paid_increment, balance_reduction)` for a credit of `amount` against `remaining`.
    pub fn split(&self, amount: Decimal, remaining: Decimal) -> (Decimal, Decimal) {
        let paid_increment = amount.min(remaining).max(Decimal::ZERO);
        let balance_reduction = match self {
            CreditNotePolicy::AsObserved => amount,
            CreditNotePolicy::Balanced => paid_increment,
        };
        (paid_increment, balance_reduction)
    }
}

/// Credit note reducing what a customer owes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditNote {
    pub credit_note_id: Uuid,
    pub credit_note_number: String,
    pub original_invoice_id: Uuid,
    pub amount: Decimal,
    pub reason: String,
    pub notes: Option<String>,
    pub status: CreditNoteStatus,
    /// Amount added to the target invoice's paid amount when applied.
    pub paid_increment: Option<Decimal>,
    /// Amount taken off the target invoice's remaining amount when applied.
    pub balance_reduction: Option<Decimal>,
    pub applied_utc: Option<DateTime<Utc>>,
    pub applied_to_invoice_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

/// Input for issuing a credit note.
#[derive(Debug, Clone, Validate)]
pub struct IssueCreditNote {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    #[validate(length(min = 1, max = 500, message = "credit note reason is required"))]
    pub reason: String,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_split_within_remaining_is_identical_for_both_policies() {
        for policy in [CreditNotePolicy::AsObserved, CreditNotePolicy::Balanced] {
            assert_eq!(policy.split(dec!(30), dec!(100)), (dec!(30), dec!(30)));
        }
    }

    #[test]
    fn test_split_beyond_remaining() {
        assert_eq!(
            CreditNotePolicy::AsObserved.split(dec!(50), dec!(20)),
            (dec!(20), dec!(50))
        );
        assert_eq!(
            CreditNotePolicy::Balanced.split(dec!(50), dec!(20)),
            (dec!(20), dec!(20))
        );
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            CreditNotePolicy::from_string("balanced"),
            Some(CreditNotePolicy::Balanced)
        );
        assert_eq!(CreditNotePolicy::from_string("strict"), None);
        assert_eq!(CreditNotePolicy::default(), CreditNotePolicy::AsObserved);
    }
}
