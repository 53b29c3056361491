//! Prometheus metrics for receivables-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, register_int_counter_vec,
    CounterVec, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use service_core::error::AppError;

/// Ledger operation counter by operation and outcome.
pub static LEDGER_OPERATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "receivables_operations_total",
        "Total number of ledger operations",
        &["operation", "outcome"]
    )
    .expect("Failed to register operations_total")
});

/// Ledger operation duration histogram by operation.
pub static LEDGER_OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "receivables_operation_duration_seconds",
        "Ledger operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register operation_duration")
});

/// Invoice counter by type.
pub static INVOICES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "receivables_invoices_total",
        "Total number of invoices created by type",
        &["invoice_type"] // INVOICE, PROFORMA
    )
    .expect("Failed to register invoices_total")
});

/// Payment counter by method.
pub static PAYMENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "receivables_payments_total",
        "Total number of payments recorded by payment method",
        &["payment_method"]
    )
    .expect("Failed to register payments_total")
});

/// Payment amount counter.
pub static PAYMENT_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "receivables_payment_amount_total",
        "Total payment amount recorded",
        &["payment_method"]
    )
    .expect("Failed to register payment_amount_total")
});

/// Credit note counter by lifecycle event.
pub static CREDIT_NOTES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "receivables_credit_notes_total",
        "Total number of credit note lifecycle events",
        &["event"] // issued, applied
    )
    .expect("Failed to register credit_notes_total")
});

/// Document number collisions by prefix.
pub static NUMBER_COLLISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "receivables_number_collisions_total",
        "Document number candidates rejected by the uniqueness constraint",
        &["prefix"]
    )
    .expect("Failed to register number_collisions_total")
});

/// Optimistic write conflicts by operation.
pub static WRITE_CONFLICTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "receivables_write_conflicts_total",
        "Optimistic writes rejected because the record changed concurrently",
        &["operation"]
    )
    .expect("Failed to register write_conflicts_total")
});

/// Invoices whose paid + remaining no longer equals totalTTC.
pub static BALANCE_DRIFT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "receivables_balance_drift_total",
        "Invoice writes leaving paid + remaining different from totalTTC"
    )
    .expect("Failed to register balance_drift_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "receivables_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Store query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "receivables_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Bounded label for a free-text payment method.
pub fn payment_method_label(method: &str) -> &'static str {
    match method.trim().to_uppercase().as_str() {
        "VIREMENT" | "TRANSFER" | "BANK_TRANSFER" => "transfer",
        "CHEQUE" | "CHECK" => "cheque",
        "ESPECES" | "ESPÈCES" | "CASH" => "cash",
        "CARTE" | "CB" | "CARD" => "card",
        "PRELEVEMENT" | "PRÉLÈVEMENT" | "DIRECT_DEBIT" => "direct_debit",
        "TRAITE" | "LCR" => "bill_of_exchange",
        _ => "other",
    }
}

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&LEDGER_OPERATIONS_TOTAL);
    Lazy::force(&LEDGER_OPERATION_DURATION);
    Lazy::force(&INVOICES_TOTAL);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&PAYMENT_AMOUNT_TOTAL);
    Lazy::force(&CREDIT_NOTES_TOTAL);
    Lazy::force(&NUMBER_COLLISIONS_TOTAL);
    Lazy::force(&WRITE_CONFLICTS_TOTAL);
    Lazy::force(&BALANCE_DRIFT_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Count an operation's outcome, and its error class on failure.
pub fn record_outcome<T>(operation: &str, result: &Result<T, AppError>) {
    match result {
        Ok(_) => LEDGER_OPERATIONS_TOTAL
            .with_label_values(&[operation, "ok"])
            .inc(),
        Err(e) => {
            LEDGER_OPERATIONS_TOTAL
                .with_label_values(&[operation, e.kind()])
                .inc();
            ERRORS_TOTAL.with_label_values(&[e.kind()]).inc();
        }
    }
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
