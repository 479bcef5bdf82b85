//! Checkout initiation and course access

#[path = "../common/mod.rs"]
mod common;
use common::*;

use axum::http::StatusCode;
use serde_json::json;

use coursepay::handlers::webhooks::HOSTED_CHECKOUT_NOTIFY_PATH;

struct StudentFixture {
    student: Profile,
    key: String,
    course: Course,
}

fn seed(app: &TestApp) -> StudentFixture {
    let conn = app.conn();
    let student = create_test_profile(&conn, "Sahan Fernando", Role::Student);
    let key = create_test_api_key(&conn, &student);
    let course = create_test_course(&conn, "Combined Maths 2025");
    StudentFixture {
        student,
        key,
        course,
    }
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let response = {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;
        app.router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap()
    };
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_bank_transfer_checkout_creates_pending_payment() {
    let app = TestApp::new();
    let s = seed(&app);

    let (status, body) = post_json(
        app.router(),
        "/payments",
        &s.key,
        &json!({ "courseId": s.course.id, "method": "bank_transfer" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body["checkout"]["type"], "bank_transfer");
    assert_eq!(body["payment"]["status"], "pending");
    assert_eq!(body["payment"]["amount"], COURSE_PRICE);
    assert_eq!(body["payment"]["currency"], "LKR");
    assert_eq!(body["payment"]["userId"], s.student.id.as_str());

    let payment_id = body["payment"]["id"].as_str().unwrap();
    let conn = app.conn();
    let payment = queries::get_payment_by_id(&conn, payment_id).unwrap().unwrap();
    assert_eq!(payment.method, PaymentMethod::BankTransfer);
    assert_eq!(payment.course_id, s.course.id);
}

#[tokio::test]
async fn test_hosted_checkout_returns_signed_form() {
    let app = TestApp::new();
    let s = seed(&app);

    let (status, body) = post_json(
        app.router(),
        "/payments",
        &s.key,
        &json!({ "courseId": s.course.id, "method": "hosted_checkout" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {}", body);

    let checkout = &body["checkout"];
    assert_eq!(checkout["type"], "hosted_checkout");
    assert_eq!(checkout["action_url"], "https://sandbox.payhere.lk/pay/checkout");

    let fields = &checkout["fields"];
    let payment_id = body["payment"]["id"].as_str().unwrap();
    assert_eq!(fields["merchant_id"], MERCHANT_ID);
    assert_eq!(fields["order_id"], payment_id);
    assert_eq!(fields["amount"], "15000.00");
    assert_eq!(fields["currency"], "LKR");
    assert_eq!(fields["email"], s.student.email.as_str());
    assert_eq!(
        fields["notify_url"],
        format!("http://localhost:3000{}", HOSTED_CHECKOUT_NOTIFY_PATH).as_str()
    );

    let expected_hash = app
        .state
        .hosted_checkout
        .as_ref()
        .unwrap()
        .checkout_hash(payment_id, "15000.00", "LKR");
    assert_eq!(fields["hash"], expected_hash.as_str());
}

#[tokio::test]
async fn test_card_gateway_failure_marks_payment_failed() {
    let app = TestApp::new();
    let s = seed(&app);

    // The test key is refused by the gateway (or the gateway is unreachable)
    let (status, _) = post_json(
        app.router(),
        "/payments",
        &s.key,
        &json!({ "courseId": s.course.id, "method": "card_gateway" }),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let conn = app.conn();
    let payments = queries::list_payments(&conn, &PaymentFilters::default()).unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Failed);
    assert!(payments[0].external_reference.is_none());
}

#[tokio::test]
async fn test_checkout_for_unknown_course_is_not_found() {
    let app = TestApp::new();
    let s = seed(&app);

    let (status, _) = post_json(
        app.router(),
        "/payments",
        &s.key,
        &json!({ "courseId": "cp_crs_00000000000000000000000000000000", "method": "bank_transfer" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_checkout_refused_when_already_granted() {
    let app = TestApp::new();
    let s = seed(&app);
    {
        let conn = app.conn();
        let earlier = create_test_payment(&conn, &s.student, &s.course, PaymentMethod::BankTransfer);
        queries::grant_course_access(&conn, &s.student.id, &s.course.id, &earlier.id).unwrap();
    }

    let (status, body) = post_json(
        app.router(),
        "/payments",
        &s.key,
        &json!({ "courseId": s.course.id, "method": "bank_transfer" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"], coursepay::error::msg::ALREADY_HAS_ACCESS);
}

#[tokio::test]
async fn test_checkout_with_unconfigured_provider_creates_nothing() {
    let app = TestApp::without_providers();
    let s = seed(&app);

    for method in ["hosted_checkout", "card_gateway"] {
        let (status, _) = post_json(
            app.router(),
            "/payments",
            &s.key,
            &json!({ "courseId": s.course.id, "method": method }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "method {}", method);
    }

    let conn = app.conn();
    assert!(queries::list_payments(&conn, &PaymentFilters::default()).unwrap().is_empty());
}

#[tokio::test]
async fn test_card_checkout_with_unrepresentable_price_creates_nothing() {
    let app = TestApp::new();
    let s = seed(&app);
    let course = queries::create_course(
        &app.conn(),
        &CreateCourse {
            title: "Lifetime Bundle".to_string(),
            price: i64::MAX / 10,
            currency: "LKR".to_string(),
        },
    )
    .unwrap();

    let (status, _) = post_json(
        app.router(),
        "/payments",
        &s.key,
        &json!({ "courseId": course.id, "method": "card_gateway" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let conn = app.conn();
    assert!(queries::list_payments(&conn, &PaymentFilters::default()).unwrap().is_empty());
}

#[tokio::test]
async fn test_checkout_rejects_bad_input() {
    let app = TestApp::new();
    let s = seed(&app);

    let (status, _) = post_json(
        app.router(),
        "/payments",
        &s.key,
        &json!({ "courseId": s.course.id, "method": "cash" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(
        app.router(),
        "/payments",
        "cp_unknown",
        &json!({ "courseId": s.course.id, "method": "bank_transfer" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_course_access_reflects_grant() {
    let app = TestApp::new();
    let s = seed(&app);
    let uri = format!("/courses/{}/access", s.course.id);

    let (status, body) = get_json(app.router(), &uri, &s.key).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["courseId"], s.course.id.as_str());
    assert_eq!(body["hasAccess"], false);
    assert!(body.get("grantedAt").is_none());

    {
        let mut conn = app.conn();
        let payment = create_test_payment(&conn, &s.student, &s.course, PaymentMethod::HostedCheckout);
        coursepay::reconcile::complete_and_grant(&mut conn, &payment.id, &TransitionDetails::default())
            .unwrap();
    }

    let (status, body) = get_json(app.router(), &uri, &s.key).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hasAccess"], true);
    assert!(body["grantedAt"].is_i64());
}

#[tokio::test]
async fn test_course_access_unknown_course() {
    let app = TestApp::new();
    let s = seed(&app);

    let (status, _) = get_json(
        app.router(),
        "/courses/cp_crs_00000000000000000000000000000000/access",
        &s.key,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
