//! Authenticated billing and usage routes driven through the HTTP router.

use listwise::billing::{
    CheckoutMode, CheckoutSessionDetails, Entitlement, EntitlementStatus, PaymentStatus,
    PaymentType, Plan, StripeSubscriptionData, Tier,
};
use listwise::testing::{TestApp, events, mint_token};
use serde_json::{Value, json};

fn token(user_id: &str) -> String {
    mint_token(user_id, Some(&format!("{}@example.com", user_id)))
}

fn paid_session(id: &str, customer_id: Option<&str>, user_id: &str) -> CheckoutSessionDetails {
    CheckoutSessionDetails {
        id: id.to_string(),
        customer_id: customer_id.map(str::to_string),
        mode: CheckoutMode::Payment,
        payment_status: PaymentStatus::Paid,
        subscription_id: None,
        user_id: Some(user_id.to_string()),
    }
}

async fn seed_subscriber(app: &TestApp, user_id: &str, subscription_id: &str) {
    let mut entitlement = Entitlement::new_free(listwise::now_unix());
    entitlement.tier = Tier::Premium;
    entitlement.billing_account_id = Some("cus_1".to_string());
    entitlement.billing_subscription_id = Some(subscription_id.to_string());
    entitlement.payment_type = Some(PaymentType::Recurring);
    entitlement.status = Some(EntitlementStatus::Active);
    entitlement.current_period_end = Some(listwise::now_unix() + 86_400);
    app.store.seed_entitlement(user_id, entitlement).await;

    app.stripe.add_subscription(StripeSubscriptionData {
        id: subscription_id.to_string(),
        customer_id: "cus_1".to_string(),
        status: "active".to_string(),
        current_period_end: Some(listwise::now_unix() + 86_400),
        cancel_at_period_end: false,
        user_id: Some(user_id.to_string()),
    });
}

#[tokio::test]
async fn test_routes_require_a_token() {
    let app = TestApp::new();

    for uri in ["/api/subscription", "/api/todos/limit", "/api/checkout/return"] {
        app.get(uri).execute().await.assert_unauthorized();
    }
    for uri in [
        "/api/checkout",
        "/api/checkout/verify",
        "/api/subscription/cancel",
        "/api/billing/portal",
    ] {
        app.post(uri).execute().await.assert_unauthorized();
    }

    app.get("/api/subscription")
        .bearer_token("not-a-jwt")
        .execute()
        .await
        .assert_unauthorized();

    assert_eq!(app.store.write_count(), 0);
}

#[tokio::test]
async fn test_new_user_reads_free_without_writing() {
    let app = TestApp::new();

    let body: Value = app
        .get("/api/subscription")
        .bearer_token(&token("u1"))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;

    assert_eq!(body["tier"], "FREE");
    assert_eq!(body["cancel_at_period_end"], false);
    assert_eq!(body["created_at"], body["updated_at"]);
    assert_eq!(app.store.write_count(), 0);
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let app = TestApp::new();
    let response = app.get("/health").execute().await.assert_ok();
    assert!(response.header("x-request-id").is_some());
}

#[tokio::test]
async fn test_create_checkout_session() {
    let app = TestApp::new();

    let body: Value = app
        .post("/api/checkout")
        .bearer_token(&token("u1"))
        .json_body(&json!({ "plan": "monthly" }))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;
    assert!(body["url"].as_str().unwrap().starts_with("https://checkout.stripe.com/"));

    let requests = app.stripe.checkout_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].plan, Plan::Monthly);
    assert_eq!(requests[0].price_id, "price_test_monthly");
    assert_eq!(requests[0].user_id, "u1");
    assert_eq!(
        requests[0].success_url,
        "https://listwise.test/settings?session_id={CHECKOUT_SESSION_ID}"
    );
    assert_eq!(requests[0].cancel_url, "https://listwise.test/settings?canceled=true");

    // The new customer is remembered for the next checkout.
    app.post("/api/checkout")
        .bearer_token(&token("u1"))
        .json_body(&json!({ "plan": "one-time" }))
        .execute()
        .await
        .assert_ok();
    assert_eq!(app.stripe.created_customers().len(), 1);
    assert_eq!(app.stripe.checkout_requests()[1].price_id, "price_test_lifetime");
}

#[tokio::test]
async fn test_unknown_plan_is_rejected() {
    let app = TestApp::new();

    app.post("/api/checkout")
        .bearer_token(&token("u1"))
        .json_body(&json!({ "plan": "yearly" }))
        .execute()
        .await
        .assert_bad_request();

    assert!(app.stripe.checkout_requests().is_empty());
    assert!(app.stripe.created_customers().is_empty());
}

#[tokio::test]
async fn test_checkout_needs_an_email() {
    let app = TestApp::new();

    app.post("/api/checkout")
        .bearer_token(&mint_token("u1", None))
        .json_body(&json!({ "plan": "monthly" }))
        .execute()
        .await
        .assert_bad_request();
}

#[tokio::test]
async fn test_verify_checkout_applies_once() {
    let app = TestApp::new();
    app.stripe.add_checkout_session(paid_session("cs_1", Some("cus_9"), "u1"));

    let first: Value = app
        .post("/api/checkout/verify")
        .bearer_token(&token("u1"))
        .json_body(&json!({ "session_id": "cs_1" }))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;
    assert_eq!(first["success"], true);
    assert_eq!(first["subscription_updated"], true);

    let second: Value = app
        .post("/api/checkout/verify")
        .bearer_token(&token("u1"))
        .json_body(&json!({ "session_id": "cs_1" }))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;
    assert_eq!(second["success"], true);
    assert_eq!(second["subscription_updated"], false);

    let entitlement: Value = app
        .get("/api/subscription")
        .bearer_token(&token("u1"))
        .execute()
        .await
        .json()
        .await;
    assert_eq!(entitlement["tier"], "PREMIUM");
    assert_eq!(entitlement["billing_account_id"], "cus_9");
}

#[tokio::test]
async fn test_verify_after_webhook_changes_nothing() {
    let app = TestApp::new();
    app.stripe.add_checkout_session(paid_session("cs_1", Some("cus_1"), "u1"));
    app.send_webhook(&events::checkout_completed("cs_1", "cus_1", Some("u1"), "payment"))
        .await
        .assert_ok();
    let writes = app.store.write_count();

    let body: Value = app
        .post("/api/checkout/verify")
        .bearer_token(&token("u1"))
        .json_body(&json!({ "session_id": "cs_1" }))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;
    assert_eq!(body["subscription_updated"], false);
    assert_eq!(app.store.write_count(), writes);
}

#[tokio::test]
async fn test_verify_rejects_another_users_session() {
    let app = TestApp::new();
    app.stripe.add_checkout_session(paid_session("cs_1", Some("cus_1"), "u2"));

    app.post("/api/checkout/verify")
        .bearer_token(&token("u1"))
        .json_body(&json!({ "session_id": "cs_1" }))
        .execute()
        .await
        .assert_forbidden();

    assert_eq!(app.store.write_count(), 0);
}

#[tokio::test]
async fn test_verify_unpaid_session() {
    let app = TestApp::new();
    let mut session = paid_session("cs_1", Some("cus_1"), "u1");
    session.payment_status = PaymentStatus::Unpaid;
    app.stripe.add_checkout_session(session);

    let body: Value = app
        .post("/api/checkout/verify")
        .bearer_token(&token("u1"))
        .json_body(&json!({ "session_id": "cs_1" }))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Payment not completed");
    assert_eq!(app.store.write_count(), 0);
}

#[tokio::test]
async fn test_checkout_return_notices() {
    let app = TestApp::new();

    let canceled: Value = app
        .get("/api/checkout/return")
        .with_query(&[("canceled", "true")])
        .bearer_token(&token("u1"))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;
    assert_eq!(
        canceled["notices"],
        json!([{ "kind": "error", "message": "Payment was canceled", "persistent": true }])
    );

    app.stripe.add_checkout_session(paid_session("cs_1", Some("cus_1"), "u1"));
    let verified: Value = app
        .get("/api/checkout/return")
        .with_query(&[("session_id", "cs_1")])
        .bearer_token(&token("u1"))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;
    assert_eq!(
        verified["notices"],
        json!([{
            "kind": "success",
            "message": "Your Premium subscription is active!",
            "persistent": true
        }])
    );
}

#[tokio::test]
async fn test_checkout_return_without_customer_asks_for_recheck() {
    let app = TestApp::new();
    app.stripe.add_checkout_session(paid_session("cs_1", None, "u1"));

    let body: Value = app
        .get("/api/checkout/return")
        .with_query(&[("session_id", "cs_1")])
        .bearer_token(&token("u1"))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;

    assert_eq!(body["recheck_after_ms"], 20);
    let notices = body["notices"].as_array().unwrap();
    assert_eq!(notices.len(), 2);
    assert_eq!(notices[0]["kind"], "error");
    assert_eq!(
        notices[0]["message"],
        "Payment successful but customer ID not found. Webhook should update your subscription shortly."
    );
    assert_eq!(notices[1]["kind"], "success");
    assert_eq!(notices[1]["persistent"], false);

    app.send_webhook(&events::checkout_completed("cs_1", "cus_1", Some("u1"), "payment"))
        .await
        .assert_ok();
    let entitlement: Value = app
        .get("/api/subscription")
        .bearer_token(&token("u1"))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;
    assert_eq!(entitlement["tier"], "PREMIUM");
}

#[tokio::test]
async fn test_checkout_return_write_failure_shows_support_error() {
    let app = TestApp::new();
    app.stripe.add_checkout_session(paid_session("cs_1", Some("cus_1"), "u1"));
    app.store.fail_writes(true);

    let body: Value = app
        .get("/api/checkout/return")
        .with_query(&[("session_id", "cs_1")])
        .bearer_token(&token("u1"))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;

    let notices = body["notices"].as_array().unwrap();
    assert_eq!(notices[0]["kind"], "error");
    assert_eq!(notices[0]["persistent"], true);
    let message = notices[0]["message"].as_str().unwrap();
    assert!(message.starts_with("Payment successful but subscription update failed"));
    assert!(message.ends_with("Please contact support."));
}

#[tokio::test]
async fn test_cancel_at_period_end_keeps_premium() {
    let app = TestApp::new();
    seed_subscriber(&app, "u1", "sub_1").await;

    let body: Value = app
        .post("/api/subscription/cancel")
        .bearer_token(&token("u1"))
        .json_body(&json!({}))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;

    assert_eq!(body["tier"], "PREMIUM");
    assert_eq!(body["cancel_at_period_end"], true);
    assert_eq!(app.stripe.period_end_cancellations(), vec!["sub_1".to_string()]);
    assert!(app.stripe.canceled_subscriptions().is_empty());
}

#[tokio::test]
async fn test_immediate_cancel_downgrades() {
    let app = TestApp::new();
    seed_subscriber(&app, "u1", "sub_1").await;

    let body: Value = app
        .post("/api/subscription/cancel")
        .bearer_token(&token("u1"))
        .json_body(&json!({ "immediate": true }))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;

    assert_eq!(body["tier"], "FREE");
    assert_eq!(body["status"], "canceled");
    assert_eq!(body["current_period_end"], Value::Null);
    assert_eq!(app.stripe.canceled_subscriptions(), vec!["sub_1".to_string()]);
}

#[tokio::test]
async fn test_cancel_without_subscription_resets_to_free() {
    let app = TestApp::new();
    let mut lifetime = Entitlement::new_free(listwise::now_unix());
    lifetime.tier = Tier::Premium;
    lifetime.payment_type = Some(PaymentType::OneTime);
    app.store.seed_entitlement("u1", lifetime).await;

    let body: Value = app
        .post("/api/subscription/cancel")
        .bearer_token(&token("u1"))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;

    assert_eq!(body["tier"], "FREE");
    assert!(app.stripe.canceled_subscriptions().is_empty());
    assert!(app.stripe.period_end_cancellations().is_empty());
}

#[tokio::test]
async fn test_billing_portal() {
    let app = TestApp::new();

    app.post("/api/billing/portal")
        .bearer_token(&token("u1"))
        .execute()
        .await
        .assert_bad_request();

    seed_subscriber(&app, "u1", "sub_1").await;
    let body: Value = app
        .post("/api/billing/portal")
        .bearer_token(&token("u1"))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;

    assert!(body["url"].as_str().unwrap().starts_with("https://billing.stripe.com/"));
    assert_eq!(
        app.stripe.portal_requests(),
        vec![("cus_1".to_string(), "https://listwise.test/settings".to_string())]
    );
}

#[tokio::test]
async fn test_todo_limit_by_tier() {
    let app = TestApp::new();
    app.todos.set_count("u1", 10).await;

    let free: Value = app
        .get("/api/todos/limit")
        .bearer_token(&token("u1"))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;
    assert_eq!(free["can_create"], false);
    assert_eq!(free["current_count"], 10);
    assert_eq!(free["max_todos"], 10);
    assert_eq!(
        free["message"],
        "You've reached your limit of 10 todos. Please upgrade to create more."
    );

    app.send_webhook(&events::checkout_completed("cs_1", "cus_1", Some("u1"), "payment"))
        .await
        .assert_ok();

    let premium: Value = app
        .get("/api/todos/limit")
        .bearer_token(&token("u1"))
        .execute()
        .await
        .assert_ok()
        .json()
        .await;
    assert_eq!(premium["can_create"], true);
    assert_eq!(premium["max_todos"], Value::Null);
    assert!(premium.get("message").is_none());
}
