//! PostgreSQL ledger store.

use crate::models::{
    CreditNote, CreditNoteStatus, DocumentKind, Invoice, InvoiceFilter, InvoiceStatus,
    InvoiceType, Payment, PaymentStatus,
};
use crate::services::ledger::InvoiceWrite;
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{ChangeSet, LedgerStore, StoreError, UniqueConstraint, Write};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, PgConnection};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "invoice_id, order_id, shop_id, invoice_number, invoice_type, status, \
    total_ht, total_tva, total_ttc, paid_amount, remaining_amount, due_date, notes, generated_utc, \
    sent_utc, paid_utc, reminder_count, reminder_sent_utc, version, updated_utc";

const PAYMENT_COLUMNS: &str = "payment_id, invoice_id, order_id, receipt_number, amount, \
    payment_method, payment_reference, payment_date, status, notes, recorded_by, idempotency_key, \
    created_utc, updated_utc";

const CREDIT_NOTE_COLUMNS: &str = "credit_note_id, credit_note_number, original_invoice_id, amount, \
    reason, notes, status, paid_increment, balance_reduction, applied_utc, applied_to_invoice_id, \
    created_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "receivables-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for Database {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| backend("Health check failed", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let sql = format!("SELECT {} FROM invoices WHERE invoice_id = $1", INVOICE_COLUMNS);
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("Failed to get invoice", e))?;

        timer.observe_duration();

        Ok(row.map(Invoice::from))
    }

    #[instrument(skip(self))]
    async fn find_invoice_for_order(&self, order_id: Uuid) -> Result<Option<Invoice>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_invoice_for_order"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM invoices WHERE order_id = $1 AND invoice_type = 'INVOICE'",
            INVOICE_COLUMNS
        );
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("Failed to find invoice for order", e))?;

        timer.observe_duration();

        Ok(row.map(Invoice::from))
    }

    #[instrument(skip(self, filter))]
    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let invoice_type = filter.invoice_type.map(|t| t.as_str());
        let statuses: Option<Vec<String>> = filter
            .statuses
            .as_ref()
            .map(|s| s.iter().map(|s| s.as_str().to_string()).collect());

        let sql = format!(
            r#"
            SELECT {}
            FROM invoices
            WHERE ($1::varchar IS NULL OR invoice_type = $1)
              AND ($2::varchar[] IS NULL OR status = ANY($2))
              AND ($3::uuid IS NULL OR shop_id = $3)
              AND ($4::date IS NULL OR due_date < $4)
              AND ($5::date IS NULL OR (generated_utc AT TIME ZONE 'UTC')::date >= $5)
              AND ($6::date IS NULL OR (generated_utc AT TIME ZONE 'UTC')::date <= $6)
            ORDER BY generated_utc, invoice_number
            "#,
            INVOICE_COLUMNS
        );
        let rows = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(invoice_type)
            .bind(statuses)
            .bind(filter.shop_id)
            .bind(filter.due_before)
            .bind(filter.generated_from)
            .bind(filter.generated_to)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend("Failed to list invoices", e))?;

        timer.observe_duration();

        Ok(rows.into_iter().map(Invoice::from).collect())
    }

    #[instrument(skip(self))]
    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();

        let sql = format!("SELECT {} FROM payments WHERE payment_id = $1", PAYMENT_COLUMNS);
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("Failed to get payment", e))?;

        timer.observe_duration();

        Ok(row.map(Payment::from))
    }

    #[instrument(skip(self))]
    async fn find_payment_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_payment_by_idempotency_key"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM payments WHERE idempotency_key = $1",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("Failed to check idempotency", e))?;

        timer.observe_duration();

        Ok(row.map(Payment::from))
    }

    #[instrument(skip(self))]
    async fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM payments WHERE invoice_id = $1 ORDER BY created_utc, receipt_number",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend("Failed to list payments", e))?;

        timer.observe_duration();

        Ok(rows.into_iter().map(Payment::from).collect())
    }

    #[instrument(skip(self))]
    async fn get_credit_note(
        &self,
        credit_note_id: Uuid,
    ) -> Result<Option<CreditNote>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_credit_note"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM credit_notes WHERE credit_note_id = $1",
            CREDIT_NOTE_COLUMNS
        );
        let row = sqlx::query_as::<_, CreditNoteRow>(&sql)
            .bind(credit_note_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("Failed to get credit note", e))?;

        timer.observe_duration();

        Ok(row.map(CreditNote::from))
    }

    #[instrument(skip(self))]
    async fn list_credit_notes(&self, invoice_id: Uuid) -> Result<Vec<CreditNote>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_credit_notes"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM credit_notes WHERE original_invoice_id = $1 ORDER BY created_utc",
            CREDIT_NOTE_COLUMNS
        );
        let rows = sqlx::query_as::<_, CreditNoteRow>(&sql)
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend("Failed to list credit notes", e))?;

        timer.observe_duration();

        Ok(rows.into_iter().map(CreditNote::from).collect())
    }

    #[instrument(skip(self))]
    async fn list_applied_credit_notes(
        &self,
        invoice_id: Uuid,
    ) -> Result<Vec<CreditNote>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_applied_credit_notes"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {}
            FROM credit_notes
            WHERE applied_to_invoice_id = $1 AND status = 'APPLIED'
            ORDER BY applied_utc
            "#,
            CREDIT_NOTE_COLUMNS
        );
        let rows = sqlx::query_as::<_, CreditNoteRow>(&sql)
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend("Failed to list applied credit notes", e))?;

        timer.observe_duration();

        Ok(rows.into_iter().map(CreditNote::from).collect())
    }

    #[instrument(skip(self))]
    async fn reserve_document_number(
        &self,
        kind: DocumentKind,
        number: &str,
    ) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reserve_document_number"])
            .start_timer();

        sqlx::query("INSERT INTO document_numbers (document_number, kind) VALUES ($1, $2)")
            .bind(number)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| match unique_violation(&e) {
                Some(_) => duplicate(UniqueConstraint::DocumentNumber, number),
                None => backend("Failed to reserve document number", e),
            })?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self, changes), fields(writes = changes.writes().len()))]
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend("Failed to begin transaction", e))?;

        // Dropping the transaction on error rolls it back.
        for write in changes.into_writes() {
            apply_write(&mut tx, write).await?;
        }

        tx.commit()
            .await
            .map_err(|e| backend("Failed to commit transaction", e))?;

        timer.observe_duration();

        Ok(())
    }
}

async fn apply_write(conn: &mut PgConnection, write: Write) -> Result<(), StoreError> {
    match write {
        Write::Invoice(w) => write_invoice(conn, w).await,
        Write::InsertPayment(payment) => insert_payment(conn, &payment).await,
        Write::UpdatePayment(payment) => {
            let result = sqlx::query(
                r#"
                UPDATE payments
                SET amount = $2,
                    payment_method = $3,
                    payment_reference = $4,
                    payment_date = $5,
                    status = $6,
                    notes = $7,
                    updated_utc = $8
                WHERE payment_id = $1
                "#,
            )
            .bind(payment.payment_id)
            .bind(payment.amount)
            .bind(&payment.payment_method)
            .bind(&payment.payment_reference)
            .bind(payment.payment_date)
            .bind(payment.status.as_str())
            .bind(&payment.notes)
            .bind(payment.updated_utc)
            .execute(&mut *conn)
            .await
            .map_err(|e| backend("Failed to update payment", e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::Missing(format!("payment {}", payment.payment_id)));
            }
            Ok(())
        }
        Write::DeletePayment(payment_id) => {
            let result = sqlx::query("DELETE FROM payments WHERE payment_id = $1")
                .bind(payment_id)
                .execute(&mut *conn)
                .await
                .map_err(|e| backend("Failed to delete payment", e))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::Missing(format!("payment {}", payment_id)));
            }
            Ok(())
        }
        Write::InsertCreditNote(note) => insert_credit_note(conn, &note).await,
        Write::ApplyCreditNote(note) => {
            let result = sqlx::query(
                r#"
                UPDATE credit_notes
                SET status = 'APPLIED',
                    paid_increment = $2,
                    balance_reduction = $3,
                    applied_utc = $4,
                    applied_to_invoice_id = $5
                WHERE credit_note_id = $1 AND status = 'PENDING'
                "#,
            )
            .bind(note.credit_note_id)
            .bind(note.paid_increment)
            .bind(note.balance_reduction)
            .bind(note.applied_utc)
            .bind(note.applied_to_invoice_id)
            .execute(&mut *conn)
            .await
            .map_err(|e| backend("Failed to apply credit note", e))?;

            if result.rows_affected() == 0 {
                let exists = sqlx::query_scalar::<_, String>(
                    "SELECT status FROM credit_notes WHERE credit_note_id = $1",
                )
                .bind(note.credit_note_id)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| backend("Failed to check credit note", e))?;

                return Err(match exists {
                    Some(status) => StoreError::StaleWrite(format!(
                        "credit note {} is {}",
                        note.credit_note_number, status
                    )),
                    None => StoreError::Missing(format!("credit note {}", note.credit_note_id)),
                });
            }
            Ok(())
        }
    }
}

async fn write_invoice(conn: &mut PgConnection, write: InvoiceWrite) -> Result<(), StoreError> {
    let (invoice, expected_version) = write.into_parts();

    let Some(expected) = expected_version else {
        sqlx::query(
            r#"
            INSERT INTO invoices (
                invoice_id, order_id, shop_id, invoice_number, invoice_type, status,
                total_ht, total_tva, total_ttc, paid_amount, remaining_amount, due_date, notes,
                generated_utc, sent_utc, paid_utc, reminder_count, reminder_sent_utc, version, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(invoice.invoice_id)
        .bind(invoice.order_id)
        .bind(invoice.shop_id)
        .bind(&invoice.invoice_number)
        .bind(invoice.invoice_type.as_str())
        .bind(invoice.status.as_str())
        .bind(invoice.total_ht)
        .bind(invoice.total_tva)
        .bind(invoice.total_ttc)
        .bind(invoice.paid_amount)
        .bind(invoice.remaining_amount)
        .bind(invoice.due_date)
        .bind(&invoice.notes)
        .bind(invoice.generated_utc)
        .bind(invoice.sent_utc)
        .bind(invoice.paid_utc)
        .bind(invoice.reminder_count)
        .bind(invoice.reminder_sent_utc)
        .bind(invoice.version)
        .bind(invoice.updated_utc)
        .execute(&mut *conn)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(UniqueConstraint::OrderInvoice) => {
                duplicate(UniqueConstraint::OrderInvoice, invoice.order_id)
            }
            Some(UniqueConstraint::PrimaryKey) => {
                duplicate(UniqueConstraint::PrimaryKey, invoice.invoice_id)
            }
            Some(constraint) => duplicate(constraint, &invoice.invoice_number),
            None => backend("Failed to insert invoice", e),
        })?;
        return Ok(());
    };

    let result = sqlx::query(
        r#"
        UPDATE invoices
        SET status = $3,
            paid_amount = $4,
            remaining_amount = $5,
            due_date = $6,
            notes = $7,
            sent_utc = $8,
            paid_utc = $9,
            reminder_count = $10,
            reminder_sent_utc = $11,
            updated_utc = $12,
            version = $2 + 1
        WHERE invoice_id = $1 AND version = $2
        "#,
    )
    .bind(invoice.invoice_id)
    .bind(expected)
    .bind(invoice.status.as_str())
    .bind(invoice.paid_amount)
    .bind(invoice.remaining_amount)
    .bind(invoice.due_date)
    .bind(&invoice.notes)
    .bind(invoice.sent_utc)
    .bind(invoice.paid_utc)
    .bind(invoice.reminder_count)
    .bind(invoice.reminder_sent_utc)
    .bind(invoice.updated_utc)
    .execute(&mut *conn)
    .await
    .map_err(|e| backend("Failed to update invoice", e))?;

    if result.rows_affected() == 0 {
        let current = sqlx::query_scalar::<_, i64>("SELECT version FROM invoices WHERE invoice_id = $1")
            .bind(invoice.invoice_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| backend("Failed to check invoice version", e))?;

        return Err(match current {
            Some(version) => StoreError::StaleWrite(format!(
                "invoice {} is at version {}, expected {}",
                invoice.invoice_number, version, expected
            )),
            None => StoreError::Missing(format!("invoice {}", invoice.invoice_id)),
        });
    }

    Ok(())
}

async fn insert_payment(conn: &mut PgConnection, payment: &Payment) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO payments (
            payment_id, invoice_id, order_id, receipt_number, amount, payment_method,
            payment_reference, payment_date, status, notes, recorded_by, idempotency_key,
            created_utc, updated_utc
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(payment.payment_id)
    .bind(payment.invoice_id)
    .bind(payment.order_id)
    .bind(&payment.receipt_number)
    .bind(payment.amount)
    .bind(&payment.payment_method)
    .bind(&payment.payment_reference)
    .bind(payment.payment_date)
    .bind(payment.status.as_str())
    .bind(&payment.notes)
    .bind(&payment.recorded_by)
    .bind(&payment.idempotency_key)
    .bind(payment.created_utc)
    .bind(payment.updated_utc)
    .execute(&mut *conn)
    .await
    .map_err(|e| match unique_violation(&e) {
        Some(UniqueConstraint::IdempotencyKey) => duplicate(
            UniqueConstraint::IdempotencyKey,
            payment.idempotency_key.as_deref().unwrap_or_default(),
        ),
        Some(UniqueConstraint::PrimaryKey) => {
            duplicate(UniqueConstraint::PrimaryKey, payment.payment_id)
        }
        Some(constraint) => duplicate(constraint, &payment.receipt_number),
        None => backend("Failed to insert payment", e),
    })?;
    Ok(())
}

async fn insert_credit_note(conn: &mut PgConnection, note: &CreditNote) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO credit_notes (
            credit_note_id, credit_note_number, original_invoice_id, amount, reason, notes,
            status, paid_increment, balance_reduction, applied_utc, applied_to_invoice_id, created_utc
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(note.credit_note_id)
    .bind(&note.credit_note_number)
    .bind(note.original_invoice_id)
    .bind(note.amount)
    .bind(&note.reason)
    .bind(&note.notes)
    .bind(note.status.as_str())
    .bind(note.paid_increment)
    .bind(note.balance_reduction)
    .bind(note.applied_utc)
    .bind(note.applied_to_invoice_id)
    .bind(note.created_utc)
    .execute(&mut *conn)
    .await
    .map_err(|e| match unique_violation(&e) {
        Some(UniqueConstraint::PrimaryKey) => {
            duplicate(UniqueConstraint::PrimaryKey, note.credit_note_id)
        }
        Some(constraint) => duplicate(constraint, &note.credit_note_number),
        None => backend("Failed to insert credit note", e),
    })?;
    Ok(())
}

/// Which uniqueness constraint `err` violated, by index name.
fn unique_violation(err: &sqlx::Error) -> Option<UniqueConstraint> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    if !db_err.is_unique_violation() {
        return None;
    }
    Some(match db_err.constraint() {
        Some("invoices_invoice_number_key") => UniqueConstraint::InvoiceNumber,
        Some("invoices_order_invoice_key") => UniqueConstraint::OrderInvoice,
        Some("payments_receipt_number_key") => UniqueConstraint::ReceiptNumber,
        Some("payments_idempotency_key_key") => UniqueConstraint::IdempotencyKey,
        Some("credit_notes_number_key") => UniqueConstraint::CreditNoteNumber,
        Some("document_numbers_pkey") => UniqueConstraint::DocumentNumber,
        _ => UniqueConstraint::PrimaryKey,
    })
}

fn duplicate(constraint: UniqueConstraint, value: impl ToString) -> StoreError {
    StoreError::Duplicate {
        constraint,
        value: value.to_string(),
    }
}

fn backend(context: &str, err: sqlx::Error) -> StoreError {
    StoreError::Backend(anyhow::anyhow!("{}: {}", context, err))
}

#[derive(FromRow)]
struct InvoiceRow {
    invoice_id: Uuid,
    order_id: Uuid,
    shop_id: Uuid,
    invoice_number: String,
    invoice_type: String,
    status: String,
    total_ht: Decimal,
    total_tva: Decimal,
    total_ttc: Decimal,
    paid_amount: Decimal,
    remaining_amount: Decimal,
    due_date: Option<NaiveDate>,
    notes: Option<String>,
    generated_utc: DateTime<Utc>,
    sent_utc: Option<DateTime<Utc>>,
    paid_utc: Option<DateTime<Utc>>,
    reminder_count: i32,
    reminder_sent_utc: Option<DateTime<Utc>>,
    version: i64,
    updated_utc: DateTime<Utc>,
}

impl From<InvoiceRow> for Invoice {
    fn from(row: InvoiceRow) -> Self {
        Invoice {
            invoice_id: row.invoice_id,
            order_id: row.order_id,
            shop_id: row.shop_id,
            invoice_number: row.invoice_number,
            invoice_type: InvoiceType::from_string(&row.invoice_type),
            status: InvoiceStatus::from_string(&row.status),
            total_ht: row.total_ht,
            total_tva: row.total_tva,
            total_ttc: row.total_ttc,
            paid_amount: row.paid_amount,
            remaining_amount: row.remaining_amount,
            due_date: row.due_date,
            notes: row.notes,
            generated_utc: row.generated_utc,
            sent_utc: row.sent_utc,
            paid_utc: row.paid_utc,
            reminder_count: row.reminder_count,
            reminder_sent_utc: row.reminder_sent_utc,
            version: row.version,
            updated_utc: row.updated_utc,
        }
    }
}

#[derive(FromRow)]
struct PaymentRow {
    payment_id: Uuid,
    invoice_id: Uuid,
    order_id: Uuid,
    receipt_number: String,
    amount: Decimal,
    payment_method: String,
    payment_reference: Option<String>,
    payment_date: NaiveDate,
    status: String,
    notes: Option<String>,
    recorded_by: String,
    idempotency_key: Option<String>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            payment_id: row.payment_id,
            invoice_id: row.invoice_id,
            order_id: row.order_id,
            receipt_number: row.receipt_number,
            amount: row.amount,
            payment_method: row.payment_method,
            payment_reference: row.payment_reference,
            payment_date: row.payment_date,
            status: PaymentStatus::from_string(&row.status),
            notes: row.notes,
            recorded_by: row.recorded_by,
            idempotency_key: row.idempotency_key,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        }
    }
}

#[derive(FromRow)]
struct CreditNoteRow {
    credit_note_id: Uuid,
    credit_note_number: String,
    original_invoice_id: Uuid,
    amount: Decimal,
    reason: String,
    notes: Option<String>,
    status: String,
    paid_increment: Option<Decimal>,
    balance_reduction: Option<Decimal>,
    applied_utc: Option<DateTime<Utc>>,
    applied_to_invoice_id: Option<Uuid>,
    created_utc: DateTime<Utc>,
}

impl From<CreditNoteRow> for CreditNote {
    fn from(row: CreditNoteRow) -> Self {
        CreditNote {
            credit_note_id: row.credit_note_id,
            credit_note_number: row.credit_note_number,
            original_invoice_id: row.original_invoice_id,
            amount: row.amount,
            reason: row.reason,
            notes: row.notes,
            status: CreditNoteStatus::from_string(&row.status),
            paid_increment: row.paid_increment,
            balance_reduction: row.balance_reduction,
            applied_utc: row.applied_utc,
            applied_to_invoice_id: row.applied_to_invoice_id,
            created_utc: row.created_utc,
        }
    }
}
