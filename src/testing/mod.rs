//! Helpers for driving the service in tests.
//!
//! [`TestApp`] assembles the real router over in-memory storage and a mock
//! Stripe client; [`Scenario`] sends requests through it without binding a
//! socket.
//!
//! # Example
//!
//! ```rust,ignore
//! use listwise::testing::{TestApp, mint_token};
//!
//! #[tokio::test]
//! async fn test_new_users_are_free() {
//!     let app = TestApp::new();
//!
//!     let body: serde_json::Value = app
//!         .get("/api/subscription")
//!         .bearer_token(&mint_token("u1", None))
//!         .execute()
//!         .await
//!         .assert_ok()
//!         .json()
//!         .await;
//!
//!     assert_eq!(body["tier"], "FREE");
//! }
//! ```

mod fixtures;
mod scenario;

pub use fixtures::{
    TEST_JWT_SECRET, TEST_WEBHOOK_SECRET, TestApp, events, mint_token, signed_webhook,
    test_config,
};
pub use scenario::{Scenario, ScenarioAssert, get, post};
