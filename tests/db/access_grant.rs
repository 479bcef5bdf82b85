#[path = "../common/mod.rs"]
mod common;
use common::*;

use coursepay::error::AppError;
use coursepay::reconcile;

#[test]
fn test_grant_is_idempotent() {
    let conn = setup_test_db();
    let f = create_payment_fixture(&conn, PaymentMethod::BankTransfer);

    let first =
        queries::grant_course_access(&conn, &f.student.id, &f.course.id, &f.payment.id).unwrap();
    let second =
        queries::grant_course_access(&conn, &f.student.id, &f.course.id, &f.payment.id).unwrap();

    assert!(first, "first grant should create the row");
    assert!(!second, "second grant should be a no-op");
    assert_eq!(
        queries::count_access_grants(&conn, &f.student.id, &f.course.id).unwrap(),
        1
    );
}

#[test]
fn test_grant_keeps_first_payment() {
    let conn = setup_test_db();
    let f = create_payment_fixture(&conn, PaymentMethod::BankTransfer);
    let other = create_test_payment(&conn, &f.student, &f.course, PaymentMethod::CardGateway);

    queries::grant_course_access(&conn, &f.student.id, &f.course.id, &f.payment.id).unwrap();
    queries::grant_course_access(&conn, &f.student.id, &f.course.id, &other.id).unwrap();

    let grant = queries::get_access_grant(&conn, &f.student.id, &f.course.id)
        .unwrap()
        .expect("grant should exist");
    assert!(grant.id.starts_with("cp_grant_"));
    assert!(grant.granted);
    assert_eq!(grant.payment_id, f.payment.id);
}

#[test]
fn test_no_grant_without_payment() {
    let conn = setup_test_db();
    let f = create_payment_fixture(&conn, PaymentMethod::BankTransfer);

    let grant = queries::get_access_grant(&conn, &f.student.id, &f.course.id).unwrap();
    assert!(grant.is_none());
}

#[test]
fn test_complete_and_grant_commits_both() {
    let mut conn = setup_test_db();
    let f = create_payment_fixture(&conn, PaymentMethod::HostedCheckout);

    let completion =
        reconcile::complete_and_grant(&mut conn, &f.payment.id, &TransitionDetails::default())
            .unwrap();
    assert!(completion.applied);
    assert!(completion.newly_granted);
    assert_eq!(completion.payment.status, PaymentStatus::Completed);

    let redelivery =
        reconcile::complete_and_grant(&mut conn, &f.payment.id, &TransitionDetails::default())
            .unwrap();
    assert!(!redelivery.applied);
    assert!(!redelivery.newly_granted);
    assert_eq!(
        queries::count_access_grants(&conn, &f.student.id, &f.course.id).unwrap(),
        1
    );
}

#[test]
fn test_complete_and_grant_on_rejected_writes_nothing() {
    let mut conn = setup_test_db();
    let f = create_payment_fixture(&conn, PaymentMethod::BankTransfer);

    reconcile::fail_payment(
        &conn,
        &f.payment.id,
        FailureStatus::Rejected,
        Some("Amount short"),
        &TransitionDetails::default(),
    )
    .unwrap();

    let result =
        reconcile::complete_and_grant(&mut conn, &f.payment.id, &TransitionDetails::default());
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(payment_status(&conn, &f.payment.id), PaymentStatus::Rejected);
    assert_eq!(
        queries::count_access_grants(&conn, &f.student.id, &f.course.id).unwrap(),
        0,
        "a rejected payment must not grant access"
    );
}

#[test]
fn test_load_snapshot() {
    let conn = setup_test_db();
    let f = create_payment_fixture(&conn, PaymentMethod::BankTransfer);

    let snapshot = reconcile::load_snapshot(&conn, f.payment.clone()).unwrap();
    assert_eq!(snapshot.customer.id, f.student.id);
    assert_eq!(snapshot.course.title, "Advanced Mathematics");
    assert_eq!(snapshot.payment.id, f.payment.id);
}
