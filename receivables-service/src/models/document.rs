//! Document numbering classes.

use serde::{Deserialize, Serialize};

/// A class of numbered document. Each class has its own prefix and number space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    Proforma,
    CreditNote,
    Receipt,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 4] = [
        DocumentKind::Invoice,
        DocumentKind::Proforma,
        DocumentKind::CreditNote,
        DocumentKind::Receipt,
    ];

    /// Number prefix, e.g. `FAC` in `FAC-202410-0042`.
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::Invoice => "FAC",
            DocumentKind::Proforma => "PRO",
            DocumentKind::CreditNote => "AV",
            DocumentKind::Receipt => "REC",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Invoice => "invoice",
            DocumentKind::Proforma => "proforma",
            DocumentKind::CreditNote => "credit_note",
            DocumentKind::Receipt => "receipt",
        }
    }

    /// Which class a formatted number belongs to, judged by its prefix.
    pub fn from_number(number: &str) -> Option<Self> {
        let prefix = number.split('-').next()?;
        Self::ALL.into_iter().find(|k| k.prefix() == prefix)
    }
}
