//! Invoice ledger integration tests for receivables-service.

mod common;

use chrono::Duration;
use common::{date, order, test_now, TestLedger};
use receivables_service::models::{
    CreateInvoice, CreateProforma, DocumentKind, InvoiceFilter, InvoiceStatus, InvoiceType,
    OrderStatus,
};
use receivables_service::services::numbering::is_well_formed;
use rust_decimal_macros::dec;
use service_core::error::AppError;
use uuid::Uuid;

#[tokio::test]
async fn test_create_invoice_copies_order_totals() {
    let t = TestLedger::new();
    let order = order(dec!(100.00), dec!(21.00), dec!(121.00), OrderStatus::Delivered);

    let invoice = t
        .receivables
        .ledger
        .create_invoice(CreateInvoice {
            order: order.clone(),
            due_date: Some(date(2024, 11, 14)),
            notes: Some("Livraison marché de Rungis".to_string()),
            mark_sent: false,
        })
        .await
        .expect("Failed to create invoice");

    assert_eq!(invoice.order_id, order.order_id);
    assert_eq!(invoice.shop_id, order.shop_id);
    assert_eq!(invoice.invoice_type, InvoiceType::Invoice);
    assert_eq!(invoice.total_ht, dec!(100.00));
    assert_eq!(invoice.total_tva, dec!(21.00));
    assert_eq!(invoice.total_ttc, dec!(121.00));
    assert_eq!(invoice.paid_amount, dec!(0));
    assert_eq!(invoice.remaining_amount, dec!(121.00));
    assert_eq!(invoice.status, InvoiceStatus::Draft);
    assert_eq!(invoice.generated_utc, test_now());
    assert!(invoice.sent_utc.is_none());
    assert!(invoice.invoice_number.starts_with("FAC-202410-"));
    assert!(is_well_formed(DocumentKind::Invoice, &invoice.invoice_number));
}

#[tokio::test]
async fn test_create_invoice_sent_by_workflow() {
    let t = TestLedger::new();
    let invoice = t.invoice(dec!(50.00), dec!(2.75), dec!(52.75)).await;

    assert_eq!(invoice.status, InvoiceStatus::Sent);
    assert_eq!(invoice.sent_utc, Some(test_now()));
}

#[tokio::test]
async fn test_second_invoice_for_order_conflicts() {
    let t = TestLedger::new();
    let order = order(dec!(10.00), dec!(0.55), dec!(10.55), OrderStatus::Delivered);
    let request = CreateInvoice {
        order,
        due_date: None,
        notes: None,
        mark_sent: true,
    };

    t.receivables
        .ledger
        .create_invoice(request.clone())
        .await
        .expect("Failed to create invoice");
    let err = t
        .receivables
        .ledger
        .create_invoice(request)
        .await
        .expect_err("Second invoice should be rejected");

    assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");
}

#[tokio::test]
async fn test_undelivered_order_cannot_be_invoiced() {
    let t = TestLedger::new();

    for status in [
        OrderStatus::New,
        OrderStatus::Preparation,
        OrderStatus::Cancelled,
    ] {
        let err = t
            .receivables
            .ledger
            .create_invoice(CreateInvoice {
                order: order(dec!(10.00), dec!(0), dec!(10.00), status),
                due_date: None,
                notes: None,
                mark_sent: false,
            })
            .await
            .expect_err("Undelivered order should be rejected");
        assert!(matches!(err, AppError::PreconditionFailed(_)), "got {err:?}");
    }

    let all = t
        .receivables
        .ledger
        .list_invoices(&InvoiceFilter::default())
        .await
        .expect("Failed to list invoices");
    assert!(all.is_empty());
}

#[tokio::test]
async fn test_negative_order_total_is_rejected() {
    let t = TestLedger::new();
    let err = t
        .receivables
        .ledger
        .create_invoice(CreateInvoice {
            order: order(dec!(-5.00), dec!(0), dec!(-5.00), OrderStatus::Delivered),
            due_date: None,
            notes: None,
            mark_sent: false,
        })
        .await
        .expect_err("Negative totals should be rejected");
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn test_sub_cent_order_total_is_rejected() {
    let t = TestLedger::new();
    let err = t
        .receivables
        .ledger
        .create_invoice(CreateInvoice {
            order: order(dec!(100.00), dec!(21.005), dec!(121.005), OrderStatus::Delivered),
            due_date: None,
            notes: None,
            mark_sent: false,
        })
        .await
        .expect_err("Totals beyond cents should be rejected");
    match err {
        AppError::BadRequest(e) => assert!(e.to_string().contains("totalTVA"), "message: {e}"),
        other => panic!("expected BadRequest, got {other:?}"),
    }

    let err = t
        .receivables
        .ledger
        .create_proforma(CreateProforma {
            order: order(dec!(10.001), dec!(0), dec!(10.001), OrderStatus::New),
            due_date: None,
            notes: None,
        })
        .await
        .expect_err("Proforma totals beyond cents should be rejected");
    assert!(matches!(err, AppError::BadRequest(_)));

    // Trailing zeros are still whole cents.
    let invoice = t.invoice(dec!(10.000), dec!(0), dec!(10.000)).await;
    assert_eq!(invoice.total_ttc, dec!(10.00));
}

#[tokio::test]
async fn test_proforma_coexists_with_invoice() {
    let t = TestLedger::new();
    let order = order(dec!(200.00), dec!(11.00), dec!(211.00), OrderStatus::Preparation);

    let proforma = t
        .receivables
        .ledger
        .create_proforma(CreateProforma {
            order: order.clone(),
            due_date: Some(date(2024, 10, 1)),
            notes: Some("Devis avant livraison".to_string()),
        })
        .await
        .expect("Failed to create proforma");

    assert_eq!(proforma.invoice_type, InvoiceType::Proforma);
    assert_eq!(proforma.status, InvoiceStatus::Draft);
    assert!(is_well_formed(DocumentKind::Proforma, &proforma.invoice_number));

    let delivered = receivables_service::models::Order {
        status: OrderStatus::Delivered,
        ..order
    };
    let invoice = t
        .receivables
        .ledger
        .create_invoice(CreateInvoice {
            order: delivered.clone(),
            due_date: None,
            notes: None,
            mark_sent: true,
        })
        .await
        .expect("Invoice should be allowed alongside a proforma");

    let for_order = t
        .receivables
        .ledger
        .get_invoice_for_order(delivered.order_id)
        .await
        .expect("Failed to look up invoice for order")
        .expect("Order should have an invoice");
    assert_eq!(for_order.invoice_id, invoice.invoice_id);
}

#[tokio::test]
async fn test_proforma_is_not_payable() {
    let t = TestLedger::new();
    let proforma = t
        .receivables
        .ledger
        .create_proforma(CreateProforma {
            order: order(dec!(30.00), dec!(0), dec!(30.00), OrderStatus::New),
            due_date: None,
            notes: None,
        })
        .await
        .expect("Failed to create proforma");

    let err = t
        .pay(proforma.invoice_id, dec!(10.00))
        .await
        .expect_err("Proforma should not take payments");
    assert!(matches!(err, AppError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_unknown_invoice_is_not_found() {
    let t = TestLedger::new();
    let err = t
        .receivables
        .ledger
        .get_invoice(Uuid::new_v4())
        .await
        .expect_err("Unknown invoice");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_mark_sent_keeps_first_timestamp() {
    let t = TestLedger::new();
    let draft = t
        .receivables
        .ledger
        .create_invoice(CreateInvoice {
            order: order(dec!(10.00), dec!(0), dec!(10.00), OrderStatus::Delivered),
            due_date: None,
            notes: None,
            mark_sent: false,
        })
        .await
        .expect("Failed to create invoice");

    let sent = t
        .receivables
        .ledger
        .mark_sent(draft.invoice_id)
        .await
        .expect("Failed to mark sent");
    assert_eq!(sent.status, InvoiceStatus::Sent);
    assert_eq!(sent.sent_utc, Some(test_now()));
    assert_eq!(sent.version, 1);

    t.clock.advance(Duration::days(2));
    let again = t
        .receivables
        .ledger
        .mark_sent(draft.invoice_id)
        .await
        .expect("Failed to mark sent again");
    assert_eq!(again.sent_utc, Some(test_now()));
    assert_eq!(again.paid_amount, dec!(0));
    assert_eq!(again.remaining_amount, dec!(10.00));
}

#[tokio::test]
async fn test_record_reminder_counts_and_stamps() {
    let t = TestLedger::new();
    let invoice = t.invoice(dec!(40.00), dec!(0), dec!(40.00)).await;

    t.receivables
        .ledger
        .record_reminder(invoice.invoice_id)
        .await
        .expect("Failed to record reminder");
    t.clock.advance(Duration::days(7));
    let reminded = t
        .receivables
        .ledger
        .record_reminder(invoice.invoice_id)
        .await
        .expect("Failed to record reminder");

    assert_eq!(reminded.reminder_count, 2);
    assert_eq!(reminded.reminder_sent_utc, Some(test_now() + Duration::days(7)));
    assert_eq!(reminded.remaining_amount, dec!(40.00));
}

#[tokio::test]
async fn test_reminder_for_paid_invoice_is_rejected() {
    let t = TestLedger::new();
    let invoice = t.invoice(dec!(40.00), dec!(0), dec!(40.00)).await;
    t.pay(invoice.invoice_id, dec!(40.00))
        .await
        .expect("Failed to pay invoice");

    let err = t
        .receivables
        .ledger
        .record_reminder(invoice.invoice_id)
        .await
        .expect_err("Paid invoice needs no reminder");
    assert!(matches!(err, AppError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_apply_balance_change_rederives_status() {
    let t = TestLedger::new();
    let invoice = t.invoice(dec!(100.00), dec!(0), dec!(100.00)).await;

    let partial = t
        .receivables
        .ledger
        .apply_balance_change(invoice.invoice_id, dec!(25.00))
        .await
        .expect("Failed to apply balance change");
    assert_eq!(partial.paid_amount, dec!(25.00));
    assert_eq!(partial.remaining_amount, dec!(75.00));
    assert_eq!(partial.status, InvoiceStatus::Partial);

    let err = t
        .receivables
        .ledger
        .apply_balance_change(invoice.invoice_id, dec!(-30.00))
        .await
        .expect_err("Paid amount cannot go negative");
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(t.reload(invoice.invoice_id).await.paid_amount, dec!(25.00));
}

#[tokio::test]
async fn test_list_invoices_filters() {
    let t = TestLedger::new();
    let open = t.invoice(dec!(10.00), dec!(0), dec!(10.00)).await;
    let paid = t.invoice(dec!(20.00), dec!(0), dec!(20.00)).await;
    t.pay(paid.invoice_id, dec!(20.00))
        .await
        .expect("Failed to pay invoice");

    let unpaid = t
        .receivables
        .ledger
        .list_invoices(&InvoiceFilter::open_invoices())
        .await
        .expect("Failed to list invoices");
    assert_eq!(unpaid.len(), 1);
    assert_eq!(unpaid[0].invoice_id, open.invoice_id);

    let by_shop = t
        .receivables
        .ledger
        .list_invoices(&InvoiceFilter {
            shop_id: Some(paid.shop_id),
            ..Default::default()
        })
        .await
        .expect("Failed to list invoices");
    assert_eq!(by_shop.len(), 1);
    assert_eq!(by_shop[0].status, InvoiceStatus::Paid);
}
