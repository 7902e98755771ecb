//! Premium subscriptions billed through Stripe.
//!
//! Entitlements are the source of truth for what a user may do. Stripe
//! reaches them two ways: signed webhooks ([`WebhookHandler`]) and the
//! post-checkout verification call ([`CheckoutManager::verify_checkout_session`]).
//! Both funnel through [`Reconciler`], so either may run first, or both.
//!
//! # Example
//!
//! ```rust,ignore
//! use listwise::billing::{
//!     DocumentEntitlementStore, EntitlementManager, InMemoryDocumentStore, Reconciler,
//!     WebhookHandler,
//! };
//!
//! let store = DocumentEntitlementStore::new(InMemoryDocumentStore::new());
//! let entitlements = EntitlementManager::new(Arc::new(store));
//! let reconciler = Reconciler::new(entitlements, stripe_client);
//! let webhooks = WebhookHandler::new(reconciler, Some(secret), false);
//!
//! let outcome = webhooks.process(&body, signature).await?;
//! ```

pub mod checkout;
pub mod checkout_return;
pub mod client;
pub mod customer;
pub mod entitlement;
pub mod error;
pub mod live_client;
pub mod manager;
pub mod portal;
pub mod reconcile;
pub mod storage;
pub mod subscription;
pub mod webhook;

pub use checkout::{
    CheckoutConfig, CheckoutManager, CheckoutMode, CheckoutSession, CheckoutSessionDetails,
    CreateCheckoutSessionRequest, PaymentStatus, Plan, StripeCheckoutClient, VerifyCheckoutResult,
};
pub use checkout_return::{
    CheckoutReturn, CheckoutReturnFlow, CheckoutReturnQuery, Notice, NoticeKind, recheck_notice,
};
pub use client::FullStripeClient;
pub use customer::{CreateCustomerRequest, CustomerManager, StripeCustomerClient};
pub use entitlement::{Entitlement, EntitlementStatus, EntitlementUpdate, PaymentType, Tier};
pub use error::BillingError;
pub use live_client::{validate_api_key, LiveStripeClient, LiveStripeClientConfig};
pub use manager::EntitlementManager;
pub use portal::{PortalManager, PortalSession, StripePortalClient};
pub use reconcile::{should_be_premium, Reconciler};
pub use storage::{
    DocumentEntitlementStore, DocumentStore, EntitlementStore, InMemoryDocumentStore,
};
pub use subscription::{StripeSubscriptionClient, StripeSubscriptionData, SubscriptionManager};
pub use webhook::{BillingEvent, WebhookEvent, WebhookHandler, WebhookOutcome};

#[cfg(any(test, feature = "test-helpers"))]
pub use client::test::MockStripeClient;
#[cfg(any(test, feature = "test-helpers"))]
pub use storage::test::InMemoryEntitlementStore;
