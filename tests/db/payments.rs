#[path = "../common/mod.rs"]
mod common;
use common::*;

use coursepay::db::queries::Transition;
use coursepay::error::AppError;

#[test]
fn test_create_payment_starts_pending() {
    let conn = setup_test_db();
    let f = create_payment_fixture(&conn, PaymentMethod::BankTransfer);

    assert!(f.payment.id.starts_with("cp_pay_"));
    assert_eq!(f.payment.status, PaymentStatus::Pending);
    assert_eq!(f.payment.amount, COURSE_PRICE);
    assert_eq!(f.payment.currency, "LKR");

    let stored = queries::get_payment_by_id(&conn, &f.payment.id)
        .unwrap()
        .expect("payment should exist");
    assert_eq!(stored.status, PaymentStatus::Pending);
    assert_eq!(stored.method, PaymentMethod::BankTransfer);
    assert!(stored.completed_at.is_none());
}

#[test]
fn test_try_complete_applies_once() {
    let conn = setup_test_db();
    let f = create_payment_fixture(&conn, PaymentMethod::HostedCheckout);

    let details = TransitionDetails {
        gateway_payment_id: Some("320025071278"),
        ..Default::default()
    };
    let first = queries::try_complete_payment(&conn, &f.payment.id, &details).unwrap();
    assert!(first.was_applied(), "first completion should apply");
    assert_eq!(first.payment().status, PaymentStatus::Completed);
    assert_eq!(first.payment().gateway_payment_id.as_deref(), Some("320025071278"));
    assert!(first.payment().completed_at.is_some());

    let second = queries::try_complete_payment(&conn, &f.payment.id, &details).unwrap();
    assert!(
        matches!(second, Transition::Unchanged(_)),
        "redelivery should be a no-op"
    );
}

#[test]
fn test_try_complete_refuses_failed_payment() {
    let conn = setup_test_db();
    let f = create_payment_fixture(&conn, PaymentMethod::HostedCheckout);

    queries::try_fail_payment(
        &conn,
        &f.payment.id,
        FailureStatus::Failed,
        Some("Card declined"),
        &TransitionDetails::default(),
    )
    .unwrap();

    let result = queries::try_complete_payment(&conn, &f.payment.id, &TransitionDetails::default());
    match result {
        Err(AppError::Validation(detail)) => assert!(
            detail.contains("failed"),
            "error should name the current status, got: {}",
            detail
        ),
        other => panic!("expected Validation error, got {:?}", other.map(|t| t.was_applied())),
    }
    assert_eq!(payment_status(&conn, &f.payment.id), PaymentStatus::Failed);
}

#[test]
fn test_try_fail_refuses_completed_payment() {
    let conn = setup_test_db();
    let f = create_payment_fixture(&conn, PaymentMethod::CardGateway);

    queries::try_complete_payment(&conn, &f.payment.id, &TransitionDetails::default()).unwrap();

    let result = queries::try_fail_payment(
        &conn,
        &f.payment.id,
        FailureStatus::Failed,
        Some("late failure"),
        &TransitionDetails::default(),
    );
    assert!(matches!(result, Err(AppError::Validation(_))));

    let stored = queries::get_payment_by_id(&conn, &f.payment.id).unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
    assert!(stored.failure_reason.is_none(), "conflicting failure must not write a reason");
}

#[test]
fn test_try_fail_same_terminal_is_unchanged() {
    let conn = setup_test_db();
    let f = create_payment_fixture(&conn, PaymentMethod::BankTransfer);
    let admin = create_test_profile(&conn, "Admin One", Role::Admin);

    let details = TransitionDetails {
        reviewed_by: Some(&admin.id),
        notes: Some("Slip unreadable"),
        ..Default::default()
    };
    let first = queries::try_fail_payment(
        &conn,
        &f.payment.id,
        FailureStatus::Rejected,
        Some("Slip unreadable"),
        &details,
    )
    .unwrap();
    assert!(first.was_applied());
    assert_eq!(first.payment().status, PaymentStatus::Rejected);
    assert_eq!(first.payment().reviewed_by.as_deref(), Some(admin.id.as_str()));
    assert_eq!(first.payment().admin_notes.as_deref(), Some("Slip unreadable"));

    let again = queries::try_fail_payment(
        &conn,
        &f.payment.id,
        FailureStatus::Rejected,
        Some("Slip unreadable"),
        &details,
    )
    .unwrap();
    assert!(!again.was_applied());

    // Rejected and failed are distinct terminals
    let other = queries::try_fail_payment(
        &conn,
        &f.payment.id,
        FailureStatus::Failed,
        None,
        &TransitionDetails::default(),
    );
    assert!(matches!(other, Err(AppError::Validation(_))));
}

#[test]
fn test_transition_on_missing_payment_is_not_found() {
    let conn = setup_test_db();

    let result = queries::try_complete_payment(
        &conn,
        "cp_pay_00000000000000000000000000000000",
        &TransitionDetails::default(),
    );
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[test]
fn test_legacy_rows_read_as_canonical() {
    let conn = setup_test_db();
    let f = create_payment_fixture(&conn, PaymentMethod::BankTransfer);

    conn.execute(
        "UPDATE payments SET status = 'approved', method = 'bank' WHERE id = ?1",
        [&f.payment.id],
    )
    .unwrap();

    let stored = queries::get_payment_by_id(&conn, &f.payment.id).unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
    assert_eq!(stored.method, PaymentMethod::BankTransfer);

    // A legacy success row is still a success terminal
    let transition =
        queries::try_complete_payment(&conn, &f.payment.id, &TransitionDetails::default()).unwrap();
    assert!(!transition.was_applied());
}

#[test]
fn test_lookup_by_provider_references() {
    let conn = setup_test_db();
    let f = create_payment_fixture(&conn, PaymentMethod::CardGateway);

    queries::set_payment_external_reference(&conn, &f.payment.id, "cs_test_123").unwrap();

    let found = queries::get_payment_by_external_reference(&conn, PaymentMethod::CardGateway, "cs_test_123")
        .unwrap()
        .expect("lookup by session id should succeed");
    assert_eq!(found.id, f.payment.id);

    let wrong_method =
        queries::get_payment_by_external_reference(&conn, PaymentMethod::HostedCheckout, "cs_test_123")
            .unwrap();
    assert!(wrong_method.is_none(), "references are scoped by method");

    let details = TransitionDetails {
        gateway_payment_id: Some("pi_test_456"),
        ..Default::default()
    };
    queries::try_complete_payment(&conn, &f.payment.id, &details).unwrap();
    let by_intent = queries::get_payment_by_gateway_payment_id(&conn, PaymentMethod::CardGateway, "pi_test_456")
        .unwrap()
        .expect("lookup by intent id should succeed");
    assert_eq!(by_intent.id, f.payment.id);
}

#[test]
fn test_set_payment_invoice() {
    let conn = setup_test_db();
    let f = create_payment_fixture(&conn, PaymentMethod::BankTransfer);

    queries::set_payment_invoice(&conn, &f.payment.id, "INV-20240302-ABCDEF01", "/invoices/x.pdf")
        .unwrap();

    let stored = queries::get_payment_by_id(&conn, &f.payment.id).unwrap().unwrap();
    assert_eq!(stored.invoice_number.as_deref(), Some("INV-20240302-ABCDEF01"));
    assert_eq!(stored.invoice_url.as_deref(), Some("/invoices/x.pdf"));
}

#[test]
fn test_list_payments_filters() {
    let conn = setup_test_db();
    let student = create_test_profile(&conn, "Kamal Silva", Role::Student);
    let course = create_test_course(&conn, "Physics");

    let bank = create_test_payment(&conn, &student, &course, PaymentMethod::BankTransfer);
    let legacy_bank = create_test_payment(&conn, &student, &course, PaymentMethod::BankTransfer);
    conn.execute(
        "UPDATE payments SET method = 'bank' WHERE id = ?1",
        [&legacy_bank.id],
    )
    .unwrap();
    let card = create_test_payment(&conn, &student, &course, PaymentMethod::CardGateway);
    queries::try_complete_payment(&conn, &card.id, &TransitionDetails::default()).unwrap();

    let all = queries::list_payments(&conn, &PaymentFilters::default()).unwrap();
    assert_eq!(all.len(), 3);

    let bank_only = queries::list_payments(
        &conn,
        &PaymentFilters {
            method: Some(PaymentMethod::BankTransfer),
            ..Default::default()
        },
    )
    .unwrap();
    let mut ids: Vec<_> = bank_only.iter().map(|p| p.id.clone()).collect();
    ids.sort();
    let mut expected = vec![bank.id.clone(), legacy_bank.id.clone()];
    expected.sort();
    assert_eq!(ids, expected, "bank filter should include legacy 'bank' rows");

    let pending_bank = queries::list_payments(
        &conn,
        &PaymentFilters {
            status: Some(PaymentStatus::Pending),
            method: Some(PaymentMethod::BankTransfer),
        },
    )
    .unwrap();
    assert_eq!(pending_bank.len(), 2);

    let completed = queries::list_payments(
        &conn,
        &PaymentFilters {
            status: Some(PaymentStatus::Completed),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, card.id);
}
