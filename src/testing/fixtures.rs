//! A fully wired service over in-memory backends, plus tokens and signed
//! webhook payloads to drive it.

use axum::Router;
use jsonwebtoken::{EncodingKey, Header, encode};
use std::sync::Arc;

use super::scenario::{Scenario, ScenarioAssert, get, post};
use crate::App;
use crate::app::AppContext;
use crate::auth::{IdentityClaims, JwtIdentityProvider};
use crate::billing::webhook::signature_header;
use crate::billing::{EntitlementManager, InMemoryEntitlementStore, MockStripeClient};
use crate::config::{Config, ConfigBuilder};
use crate::todos::InMemoryTodoCounter;
use crate::utils::now_unix;

pub const TEST_JWT_SECRET: &str = "listwise_test_jwt_secret_0123456789";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_listwise_test";

/// Signed webhooks, a short re-check delay and test price ids.
pub fn test_config() -> Config {
    ConfigBuilder::new()
        .with_jwt_secret(TEST_JWT_SECRET)
        .with_webhook_secret(TEST_WEBHOOK_SECRET)
        .with_base_url("https://listwise.test")
        .with_price_ids("price_test_monthly", "price_test_lifetime")
        .with_recheck_delay_ms(20)
        .build()
        .unwrap()
}

/// An identity token for `user_id`, valid for an hour.
pub fn mint_token(user_id: &str, email: Option<&str>) -> String {
    let claims = IdentityClaims {
        sub: user_id.to_string(),
        email: email.map(str::to_string),
        exp: now_unix() + 3600,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Serialize `event` and sign it with [`TEST_WEBHOOK_SECRET`] at the current time.
pub fn signed_webhook(event: &serde_json::Value) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(event).unwrap();
    let header = signature_header(TEST_WEBHOOK_SECRET, &body, now_unix() as i64);
    (body, header)
}

/// The router plus handles on every backend behind it.
pub struct TestApp {
    pub store: InMemoryEntitlementStore,
    pub stripe: MockStripeClient,
    pub todos: InMemoryTodoCounter,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let store = InMemoryEntitlementStore::new();
        let stripe = MockStripeClient::new();
        let todos = InMemoryTodoCounter::new();

        let context = AppContext::new(
            &config.billing,
            EntitlementManager::new(Arc::new(store.clone())),
            Arc::new(stripe.clone()),
            Arc::new(todos.clone()),
        )
        .unwrap();
        let provider = JwtIdentityProvider::from_config(&config.auth).unwrap();
        let router = App::new(config, context, provider).router();

        Self {
            store,
            stripe,
            todos,
            router,
        }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn get(&self, uri: &str) -> Scenario {
        get(self.router(), uri)
    }

    pub fn post(&self, uri: &str) -> Scenario {
        post(self.router(), uri)
    }

    /// Deliver a correctly signed webhook.
    pub async fn send_webhook(&self, event: &serde_json::Value) -> ScenarioAssert {
        let (body, signature) = signed_webhook(event);
        self.post("/api/stripe/webhook")
            .header("stripe-signature", &signature)
            .raw_body(body)
            .execute()
            .await
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Stripe event payloads shaped like real deliveries.
pub mod events {
    use serde_json::{Value, json};
    use uuid::Uuid;

    /// Wrap `object` in an event envelope of type `event_type`.
    pub fn event(event_type: &str, object: Value) -> Value {
        json!({
            "id": format!("evt_{}", Uuid::new_v4().simple()),
            "object": "event",
            "type": event_type,
            "created": crate::utils::now_unix(),
            "data": { "object": object },
        })
    }

    fn metadata(user_id: Option<&str>) -> Value {
        match user_id {
            Some(id) => json!({ "userId": id }),
            None => json!({}),
        }
    }

    /// `checkout.session.completed` for a paid session.
    pub fn checkout_completed(
        session_id: &str,
        customer_id: &str,
        user_id: Option<&str>,
        mode: &str,
    ) -> Value {
        event(
            "checkout.session.completed",
            json!({
                "id": session_id,
                "object": "checkout.session",
                "customer": customer_id,
                "mode": mode,
                "payment_status": "paid",
                "subscription": null,
                "metadata": metadata(user_id),
            }),
        )
    }

    /// `customer.subscription.*` with the customer expanded, as Stripe may send it.
    pub fn subscription(
        event_type: &str,
        subscription_id: &str,
        customer_id: &str,
        status: &str,
        current_period_end: Option<u64>,
        cancel_at_period_end: bool,
    ) -> Value {
        event(
            event_type,
            json!({
                "id": subscription_id,
                "object": "subscription",
                "customer": { "id": customer_id, "object": "customer" },
                "status": status,
                "current_period_end": current_period_end,
                "cancel_at_period_end": cancel_at_period_end,
                "metadata": {},
            }),
        )
    }

    /// `payment_intent.succeeded` for a one-time purchase.
    pub fn payment_intent_succeeded(
        payment_intent_id: &str,
        customer_id: &str,
        user_id: Option<&str>,
    ) -> Value {
        event(
            "payment_intent.succeeded",
            json!({
                "id": payment_intent_id,
                "object": "payment_intent",
                "customer": customer_id,
                "metadata": metadata(user_id),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::webhook::verify_signature;

    #[test]
    fn test_signed_webhook_verifies() {
        let (body, header) = signed_webhook(&events::event("ping", serde_json::json!({})));
        assert!(verify_signature(TEST_WEBHOOK_SECRET, &body, &header, 300, now_unix()).is_ok());
    }

    #[tokio::test]
    async fn test_health_needs_no_token() {
        TestApp::new().get("/health").execute().await.assert_ok();
    }
}
