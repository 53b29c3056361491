//! Payment recorder integration tests for receivables-service.

mod common;

use chrono::Duration;
use common::{date, payment_request, test_now, TestLedger};
use receivables_service::models::{
    DocumentKind, InvoiceStatus, PaymentStatus, RecordPayment, UpdatePayment,
};
use receivables_service::services::numbering::is_well_formed;
use receivables_service::services::LedgerSettings;
use rust_decimal_macros::dec;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn test_partial_then_full_payment() {
    let t = TestLedger::new();
    let invoice = t.invoice(dec!(100.00), dec!(21.00), dec!(121.00)).await;

    let first = t
        .pay(invoice.invoice_id, dec!(50.00))
        .await
        .expect("Failed to record payment");
    assert_eq!(first.status, PaymentStatus::Confirmed);
    assert!(is_well_formed(DocumentKind::Receipt, &first.receipt_number));

    let after_first = t.reload(invoice.invoice_id).await;
    assert_eq!(after_first.paid_amount, dec!(50.00));
    assert_eq!(after_first.remaining_amount, dec!(71.00));
    assert_eq!(after_first.status, InvoiceStatus::Partial);
    assert!(after_first.paid_utc.is_none());

    let paid_at = test_now() + Duration::hours(3);
    t.clock.set(paid_at);
    t.pay(invoice.invoice_id, dec!(71.00))
        .await
        .expect("Failed to record payment");

    let settled = t.reload(invoice.invoice_id).await;
    assert_eq!(settled.paid_amount, dec!(121.00));
    assert_eq!(settled.remaining_amount, dec!(0.00));
    assert_eq!(settled.status, InvoiceStatus::Paid);
    assert_eq!(settled.paid_utc, Some(paid_at));
    assert!(settled.is_balanced());
}

#[tokio::test]
async fn test_payment_above_remaining_is_rejected() {
    let t = TestLedger::new();
    let invoice = t.invoice(dec!(100.00), dec!(21.00), dec!(121.00)).await;
    t.pay(invoice.invoice_id, dec!(50.00))
        .await
        .expect("Failed to record payment");
    let before = t.reload(invoice.invoice_id).await;

    let err = t
        .pay(invoice.invoice_id, dec!(71.01))
        .await
        .expect_err("Overpayment should be rejected");

    match err {
        AppError::BadRequest(e) => assert!(e.to_string().contains("71.00"), "message: {e}"),
        other => panic!("expected BadRequest, got {other:?}"),
    }
    assert_eq!(t.reload(invoice.invoice_id).await, before);
}

#[tokio::test]
async fn test_payment_input_validation() {
    let t = TestLedger::new();
    let invoice = t.invoice(dec!(10.00), dec!(0), dec!(10.00)).await;

    for amount in [dec!(0), dec!(-5.00), dec!(1.005)] {
        let err = t
            .pay(invoice.invoice_id, amount)
            .await
            .expect_err("Invalid amount should be rejected");
        assert!(matches!(err, AppError::BadRequest(_)), "{amount}: {err:?}");
    }

    let missing_method = RecordPayment {
        payment_method: String::new(),
        ..payment_request(invoice.invoice_id, dec!(5.00))
    };
    let err = t
        .receivables
        .payments
        .record_payment(missing_method)
        .await
        .expect_err("Missing method should be rejected");
    assert!(matches!(err, AppError::ValidationError(_)));

    let err = t
        .pay(Uuid::new_v4(), dec!(5.00))
        .await
        .expect_err("Unknown invoice");
    assert!(matches!(err, AppError::NotFound(_)));

    assert_eq!(t.reload(invoice.invoice_id).await.paid_amount, dec!(0));
}

#[tokio::test]
async fn test_retried_payment_is_recorded_once() {
    let t = TestLedger::new();
    let invoice = t.invoice(dec!(80.00), dec!(0), dec!(80.00)).await;
    let request = RecordPayment {
        idempotency_key: Some("bank-import-2024-10-15-0042".to_string()),
        ..payment_request(invoice.invoice_id, dec!(30.00))
    };

    let first = t
        .receivables
        .payments
        .record_payment(request.clone())
        .await
        .expect("Failed to record payment");
    let replay = t
        .receivables
        .payments
        .record_payment(request)
        .await
        .expect("Replay should succeed");

    assert_eq!(replay.payment_id, first.payment_id);
    assert_eq!(replay.receipt_number, first.receipt_number);

    let reloaded = t.reload(invoice.invoice_id).await;
    assert_eq!(reloaded.paid_amount, dec!(30.00));
    let payments = t
        .receivables
        .payments
        .list_payments(invoice.invoice_id)
        .await
        .expect("Failed to list payments");
    assert_eq!(payments.len(), 1);
}

#[tokio::test]
async fn test_idempotency_key_reused_on_other_invoice_conflicts() {
    let t = TestLedger::new();
    let a = t.invoice(dec!(80.00), dec!(0), dec!(80.00)).await;
    let b = t.invoice(dec!(80.00), dec!(0), dec!(80.00)).await;
    let key = Some("cheque-1187".to_string());

    t.receivables
        .payments
        .record_payment(RecordPayment {
            idempotency_key: key.clone(),
            ..payment_request(a.invoice_id, dec!(10.00))
        })
        .await
        .expect("Failed to record payment");
    let err = t
        .receivables
        .payments
        .record_payment(RecordPayment {
            idempotency_key: key,
            ..payment_request(b.invoice_id, dec!(10.00))
        })
        .await
        .expect_err("Key reuse across invoices should conflict");

    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(t.reload(b.invoice_id).await.paid_amount, dec!(0));
}

#[tokio::test]
async fn test_update_payment_recomputes_balance() {
    let t = TestLedger::new();
    let invoice = t.invoice(dec!(100.00), dec!(0), dec!(100.00)).await;
    let first = t
        .pay(invoice.invoice_id, dec!(40.00))
        .await
        .expect("Failed to record payment");
    t.pay(invoice.invoice_id, dec!(60.00))
        .await
        .expect("Failed to record payment");
    assert_eq!(t.reload(invoice.invoice_id).await.status, InvoiceStatus::Paid);

    let edited = t
        .receivables
        .payments
        .update_payment(
            first.payment_id,
            &UpdatePayment {
                amount: Some(dec!(25.00)),
                payment_date: Some(date(2024, 10, 14)),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to update payment");
    assert_eq!(edited.amount, dec!(25.00));
    assert_eq!(edited.payment_date, date(2024, 10, 14));

    let reloaded = t.reload(invoice.invoice_id).await;
    assert_eq!(reloaded.paid_amount, dec!(85.00));
    assert_eq!(reloaded.remaining_amount, dec!(15.00));
    assert_eq!(reloaded.status, InvoiceStatus::Partial);
    assert!(reloaded.paid_utc.is_none());
}

#[tokio::test]
async fn test_update_payment_beyond_total_names_maximum() {
    let t = TestLedger::new();
    let invoice = t.invoice(dec!(100.00), dec!(0), dec!(100.00)).await;
    let first = t
        .pay(invoice.invoice_id, dec!(40.00))
        .await
        .expect("Failed to record payment");
    t.pay(invoice.invoice_id, dec!(30.00))
        .await
        .expect("Failed to record payment");

    let err = t
        .receivables
        .payments
        .update_payment(
            first.payment_id,
            &UpdatePayment {
                amount: Some(dec!(75.00)),
                ..Default::default()
            },
        )
        .await
        .expect_err("Edit would overdraw the invoice");

    match err {
        AppError::BadRequest(e) => assert!(e.to_string().contains("70.00"), "message: {e}"),
        other => panic!("expected BadRequest, got {other:?}"),
    }
    let unchanged = t
        .receivables
        .payments
        .get_payment(first.payment_id)
        .await
        .expect("Failed to get payment");
    assert_eq!(unchanged.amount, dec!(40.00));
}

#[tokio::test]
async fn test_cancelled_payment_stops_counting() {
    let t = TestLedger::new();
    let invoice = t.invoice(dec!(60.00), dec!(0), dec!(60.00)).await;
    let payment = t
        .pay(invoice.invoice_id, dec!(60.00))
        .await
        .expect("Failed to record payment");

    t.receivables
        .payments
        .update_payment(
            payment.payment_id,
            &UpdatePayment {
                status: Some(PaymentStatus::Cancelled),
                notes: Some("Cheque returned unpaid".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to cancel payment");

    let reloaded = t.reload(invoice.invoice_id).await;
    assert_eq!(reloaded.paid_amount, dec!(0));
    assert_eq!(reloaded.remaining_amount, dec!(60.00));
    assert_eq!(reloaded.status, InvoiceStatus::Sent);
}

#[tokio::test]
async fn test_delete_payment_recomputes_from_remaining_payments() {
    let t = TestLedger::new();
    let invoice = t.invoice(dec!(100.00), dec!(0), dec!(100.00)).await;
    let keep = t
        .pay(invoice.invoice_id, dec!(35.00))
        .await
        .expect("Failed to record payment");
    let drop = t
        .pay(invoice.invoice_id, dec!(65.00))
        .await
        .expect("Failed to record payment");

    let reopened = t
        .receivables
        .payments
        .delete_payment(drop.payment_id)
        .await
        .expect("Failed to delete payment");
    assert_eq!(reopened.paid_amount, dec!(35.00));
    assert_eq!(reopened.remaining_amount, dec!(65.00));
    assert_eq!(reopened.status, InvoiceStatus::Partial);

    let payments = t
        .receivables
        .payments
        .list_payments(invoice.invoice_id)
        .await
        .expect("Failed to list payments");
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].payment_id, keep.payment_id);

    let err = t
        .receivables
        .payments
        .delete_payment(drop.payment_id)
        .await
        .expect_err("Payment is already gone");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_payments_never_overdraw() {
    let t = TestLedger::with_settings(LedgerSettings {
        write_retries: 30,
        ..LedgerSettings::default()
    });
    let invoice = t.invoice(dec!(100.00), dec!(0), dec!(100.00)).await;
    let recorder = Arc::clone(&t.receivables.payments);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let recorder = Arc::clone(&recorder);
            let request = payment_request(invoice.invoice_id, dec!(20.00));
            tokio::spawn(async move { recorder.record_payment(request).await })
        })
        .collect();

    let mut accepted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.expect("Payment task panicked") {
            Ok(_) => accepted += 1,
            Err(AppError::BadRequest(_)) => rejected += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(accepted, 5);
    assert_eq!(rejected, 5);

    let settled = t.reload(invoice.invoice_id).await;
    assert_eq!(settled.paid_amount, dec!(100.00));
    assert_eq!(settled.remaining_amount, dec!(0));
    assert_eq!(settled.status, InvoiceStatus::Paid);
    assert_eq!(settled.version, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_retries_of_keyed_settlement_all_replay() {
    for round in 0..8 {
        let t = TestLedger::new();
        let invoice = t.invoice(dec!(75.00), dec!(0), dec!(75.00)).await;
        let recorder = Arc::clone(&t.receivables.payments);
        let key = format!("bank-import-2024-10-15-{round:04}");

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let recorder = Arc::clone(&recorder);
                let request = RecordPayment {
                    idempotency_key: Some(key.clone()),
                    ..payment_request(invoice.invoice_id, dec!(75.00))
                };
                tokio::spawn(async move { recorder.record_payment(request).await })
            })
            .collect();

        let mut payment_ids = Vec::new();
        for handle in handles {
            let payment = handle
                .await
                .expect("Payment task panicked")
                .expect("Every retry of the same request should succeed");
            payment_ids.push(payment.payment_id);
        }
        payment_ids.dedup();
        assert_eq!(payment_ids.len(), 1, "round {round}: {payment_ids:?}");

        let payments = t
            .receivables
            .payments
            .list_payments(invoice.invoice_id)
            .await
            .expect("Failed to list payments");
        assert_eq!(payments.len(), 1);

        let settled = t.reload(invoice.invoice_id).await;
        assert_eq!(settled.paid_amount, dec!(75.00));
        assert_eq!(settled.remaining_amount, dec!(0));
        assert_eq!(settled.status, InvoiceStatus::Paid);
    }
}

#[tokio::test]
async fn test_balance_invariant_over_operation_sequence() {
    let t = TestLedger::new();
    let invoice = t.invoice(dec!(250.00), dec!(13.75), dec!(263.75)).await;
    let id = invoice.invoice_id;

    let p1 = t.pay(id, dec!(100.00)).await.expect("payment 1");
    let p2 = t.pay(id, dec!(63.75)).await.expect("payment 2");
    let check = |inv: &receivables_service::models::Invoice| {
        assert!(inv.remaining_amount >= dec!(0));
        assert_eq!(inv.paid_amount + inv.remaining_amount, inv.total_ttc);
    };
    check(&t.reload(id).await);

    t.receivables
        .payments
        .update_payment(
            p1.payment_id,
            &UpdatePayment {
                amount: Some(dec!(150.00)),
                ..Default::default()
            },
        )
        .await
        .expect("update");
    check(&t.reload(id).await);

    t.receivables
        .payments
        .delete_payment(p2.payment_id)
        .await
        .expect("delete");
    check(&t.reload(id).await);

    t.pay(id, dec!(113.75)).await.expect("payment 3");
    let settled = t.reload(id).await;
    check(&settled);
    assert_eq!(settled.status, InvoiceStatus::Paid);
}
