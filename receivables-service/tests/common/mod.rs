//! Common test utilities for receivables-service integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use receivables_service::models::{
    CreateInvoice, CreditNotePolicy, Invoice, IssueCreditNote, Order, OrderStatus, Payment,
    RecordPayment,
};
use receivables_service::config::{DatabaseConfig, ReceivablesConfig};
use receivables_service::services::{
    Clock, Database, LedgerSettings, MemoryStore, Receivables, SuffixSource,
};
use receivables_service::startup::Application;
use service_core::config::Config as CommonConfig;
use rust_decimal::Decimal;
use service_core::error::AppError;
use service_core::observability::init_test_tracing;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    init_test_tracing("info,receivables_service=debug");
}

/// 15 October 2024, noon UTC.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 15, 12, 0, 0)
        .single()
        .expect("valid test instant")
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
}

/// Clock that only moves when told to.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock lock") = now;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().expect("clock lock") += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

/// Hands out scripted suffixes first, then a running counter.
pub struct ScriptedSuffixes {
    script: Mutex<VecDeque<u16>>,
    counter: AtomicU16,
    drawn: AtomicUsize,
}

impl ScriptedSuffixes {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            counter: AtomicU16::new(1),
            drawn: AtomicUsize::new(0),
        }
    }

    /// Queue suffixes to be returned before the counter resumes.
    pub fn script(&self, suffixes: &[u16]) {
        self.script
            .lock()
            .expect("script lock")
            .extend(suffixes.iter().copied());
    }

    /// Number of suffixes handed out so far.
    pub fn drawn(&self) -> usize {
        self.drawn.load(Ordering::SeqCst)
    }
}

impl SuffixSource for ScriptedSuffixes {
    fn next_suffix(&self) -> u16 {
        self.drawn.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.script.lock().expect("script lock").pop_front() {
            return next;
        }
        // Above the range scripted by tests.
        5_000 + self.counter.fetch_add(1, Ordering::SeqCst)
    }
}

fn database_config() -> ReceivablesConfig {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run the PostgreSQL tests");

    ReceivablesConfig {
        common: CommonConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        service_name: "receivables-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: database_url,
            max_connections: 4,
            min_connections: 1,
        },
        ledger: LedgerSettings::default(),
        overdue_sweep_interval: None,
    }
}

/// Running service backed by the PostgreSQL database in `TEST_DATABASE_URL`.
pub struct TestApp {
    pub receivables: Receivables,
    pub db: Database,
    pub http_port: u16,
}

/// Migrate the test database, then start the service in the background.
pub async fn spawn_app() -> TestApp {
    init_tracing();

    let config = database_config();
    let db = Database::new(&config.database.url, 1, 1)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations()
        .await
        .expect("Failed to migrate test database");

    let app = Application::build_without_migrations(config)
        .await
        .expect("Failed to build application");
    let test_app = TestApp {
        receivables: app.receivables().clone(),
        db: app.db().clone(),
        http_port: app.http_port(),
    };

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    test_app
}

/// Ledger over an in-memory store with a fixed clock and predictable numbers.
pub struct TestLedger {
    pub receivables: Receivables,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub suffixes: Arc<ScriptedSuffixes>,
}

impl TestLedger {
    pub fn new() -> Self {
        Self::with_settings(LedgerSettings::default())
    }

    pub fn with_policy(policy: CreditNotePolicy) -> Self {
        Self::with_settings(LedgerSettings {
            credit_note_policy: policy,
            ..LedgerSettings::default()
        })
    }

    pub fn with_settings(settings: LedgerSettings) -> Self {
        init_tracing();

        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(test_now()));
        let suffixes = Arc::new(ScriptedSuffixes::new());
        let receivables =
            Receivables::with_parts(store.clone(), clock.clone(), suffixes.clone(), &settings);

        Self {
            receivables,
            store,
            clock,
            suffixes,
        }
    }

    /// Create a sent invoice for a fresh delivered order.
    pub async fn invoice(&self, total_ht: Decimal, total_tva: Decimal, total_ttc: Decimal) -> Invoice {
        self.invoice_due(total_ht, total_tva, total_ttc, Some(date(2024, 11, 14)))
            .await
    }

    pub async fn invoice_due(
        &self,
        total_ht: Decimal,
        total_tva: Decimal,
        total_ttc: Decimal,
        due_date: Option<NaiveDate>,
    ) -> Invoice {
        self.receivables
            .ledger
            .create_invoice(CreateInvoice {
                order: order(total_ht, total_tva, total_ttc, OrderStatus::Delivered),
                due_date,
                notes: None,
                mark_sent: true,
            })
            .await
            .expect("Failed to create invoice")
    }

    pub async fn pay(&self, invoice_id: Uuid, amount: Decimal) -> Result<Payment, AppError> {
        self.receivables
            .payments
            .record_payment(payment_request(invoice_id, amount))
            .await
    }

    pub async fn reload(&self, invoice_id: Uuid) -> Invoice {
        self.receivables
            .ledger
            .get_invoice(invoice_id)
            .await
            .expect("Failed to reload invoice")
    }
}

pub fn order(
    total_ht: Decimal,
    total_tva: Decimal,
    total_ttc: Decimal,
    status: OrderStatus,
) -> Order {
    Order {
        order_id: Uuid::new_v4(),
        shop_id: Uuid::new_v4(),
        status,
        total_ht,
        total_tva,
        total_ttc,
    }
}

pub fn payment_request(invoice_id: Uuid, amount: Decimal) -> RecordPayment {
    RecordPayment {
        invoice_id,
        amount,
        payment_method: "VIREMENT".to_string(),
        payment_reference: Some("VIR-2024-1015".to_string()),
        payment_date: date(2024, 10, 15),
        notes: None,
        recorded_by: "comptable@primeur.test".to_string(),
        idempotency_key: None,
    }
}

pub fn credit_note_request(invoice_id: Uuid, amount: Decimal) -> IssueCreditNote {
    IssueCreditNote {
        invoice_id,
        amount,
        reason: "Damaged crates on delivery".to_string(),
        notes: None,
    }
}
