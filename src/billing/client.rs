//! The combined Stripe client seam.
//!
//! Each Stripe capability has its own trait next to the code that uses it.
//! Services hold one `Arc<dyn FullStripeClient>` so the live client and the
//! test mock can be swapped in one place.

use super::checkout::StripeCheckoutClient;
use super::customer::StripeCustomerClient;
use super::portal::StripePortalClient;
use super::subscription::StripeSubscriptionClient;

/// A type that implements every Stripe client trait.
pub trait FullStripeClient:
    StripeCustomerClient + StripeCheckoutClient + StripeSubscriptionClient + StripePortalClient
{
}

impl<T> FullStripeClient for T where
    T: StripeCustomerClient + StripeCheckoutClient + StripeSubscriptionClient + StripePortalClient
{
}

/// In-memory Stripe stand-in.
#[cfg(any(test, feature = "test-helpers"))]
pub mod test {
    use super::super::checkout::{
        CheckoutSession, CheckoutSessionDetails, CreateCheckoutSessionRequest, StripeCheckoutClient,
    };
    use super::super::customer::{CreateCustomerRequest, StripeCustomerClient};
    use super::super::error::BillingError;
    use super::super::portal::{PortalSession, StripePortalClient};
    use super::super::subscription::{StripeSubscriptionClient, StripeSubscriptionData};
    use crate::error::Result;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    #[derive(Default)]
    struct Inner {
        counter: AtomicU64,
        fail_subscriptions: AtomicBool,
        customers: Mutex<HashSet<String>>,
        created_customers: Mutex<Vec<CreateCustomerRequest>>,
        subscriptions: Mutex<HashMap<String, StripeSubscriptionData>>,
        sessions: Mutex<HashMap<String, CheckoutSessionDetails>>,
        checkout_requests: Mutex<Vec<CreateCheckoutSessionRequest>>,
        canceled: Mutex<Vec<String>>,
        period_end: Mutex<Vec<String>>,
        portal_requests: Mutex<Vec<(String, String)>>,
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn api_error(operation: &str, status: u16, message: &str) -> crate::error::ListwiseError {
        BillingError::StripeApiError {
            operation: operation.to_string(),
            message: message.to_string(),
            code: None,
            http_status: Some(status),
        }
        .into()
    }

    /// Records every call and serves seeded customers, sessions and
    /// subscriptions. Clones share state.
    #[derive(Clone, Default)]
    pub struct MockStripeClient {
        inner: Arc<Inner>,
    }

    impl MockStripeClient {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn next_id(&self, prefix: &str) -> String {
            format!("{}_mock_{}", prefix, self.inner.counter.fetch_add(1, Ordering::SeqCst))
        }

        /// Mark a customer id as existing at Stripe.
        pub fn add_customer(&self, customer_id: &str) {
            lock(&self.inner.customers).insert(customer_id.to_string());
        }

        pub fn created_customers(&self) -> Vec<CreateCustomerRequest> {
            lock(&self.inner.created_customers).clone()
        }

        pub fn add_subscription(&self, subscription: StripeSubscriptionData) {
            lock(&self.inner.subscriptions).insert(subscription.id.clone(), subscription);
        }

        pub fn add_checkout_session(&self, session: CheckoutSessionDetails) {
            lock(&self.inner.sessions).insert(session.id.clone(), session);
        }

        /// Make every subscription call fail with a 503.
        pub fn fail_subscription_calls(&self, fail: bool) {
            self.inner.fail_subscriptions.store(fail, Ordering::SeqCst);
        }

        pub fn canceled_subscriptions(&self) -> Vec<String> {
            lock(&self.inner.canceled).clone()
        }

        pub fn period_end_cancellations(&self) -> Vec<String> {
            lock(&self.inner.period_end).clone()
        }

        /// `(customer_id, return_url)` per portal session.
        pub fn portal_requests(&self) -> Vec<(String, String)> {
            lock(&self.inner.portal_requests).clone()
        }

        pub fn checkout_requests(&self) -> Vec<CreateCheckoutSessionRequest> {
            lock(&self.inner.checkout_requests).clone()
        }

        fn check_subscription_calls(&self, operation: &str) -> Result<()> {
            if self.inner.fail_subscriptions.load(Ordering::SeqCst) {
                return Err(api_error(operation, 503, "mock outage"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl StripeCustomerClient for MockStripeClient {
        async fn create_customer(&self, request: CreateCustomerRequest) -> Result<String> {
            let id = self.next_id("cus");
            lock(&self.inner.customers).insert(id.clone());
            lock(&self.inner.created_customers).push(request);
            Ok(id)
        }

        async fn customer_exists(&self, customer_id: &str) -> Result<bool> {
            Ok(lock(&self.inner.customers).contains(customer_id))
        }
    }

    #[async_trait]
    impl StripeCheckoutClient for MockStripeClient {
        async fn create_checkout_session(
            &self,
            request: CreateCheckoutSessionRequest,
        ) -> Result<CheckoutSession> {
            let id = self.next_id("cs");
            lock(&self.inner.checkout_requests).push(request);
            Ok(CheckoutSession {
                url: format!("https://checkout.stripe.com/c/pay/{}", id),
                id,
            })
        }

        async fn retrieve_checkout_session(&self, session_id: &str) -> Result<CheckoutSessionDetails> {
            lock(&self.inner.sessions)
                .get(session_id)
                .cloned()
                .ok_or_else(|| api_error("retrieve checkout session", 404, "No such checkout session"))
        }
    }

    #[async_trait]
    impl StripeSubscriptionClient for MockStripeClient {
        async fn get_subscription(&self, subscription_id: &str) -> Result<StripeSubscriptionData> {
            self.check_subscription_calls("retrieve subscription")?;
            lock(&self.inner.subscriptions)
                .get(subscription_id)
                .cloned()
                .ok_or_else(|| api_error("retrieve subscription", 404, "No such subscription"))
        }

        async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
            self.check_subscription_calls("cancel subscription")?;
            if let Some(sub) = lock(&self.inner.subscriptions).get_mut(subscription_id) {
                sub.status = "canceled".to_string();
                sub.cancel_at_period_end = false;
            }
            lock(&self.inner.canceled).push(subscription_id.to_string());
            Ok(())
        }

        async fn set_cancel_at_period_end(&self, subscription_id: &str, cancel: bool) -> Result<()> {
            self.check_subscription_calls("update subscription")?;
            if let Some(sub) = lock(&self.inner.subscriptions).get_mut(subscription_id) {
                sub.cancel_at_period_end = cancel;
            }
            if cancel {
                lock(&self.inner.period_end).push(subscription_id.to_string());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl StripePortalClient for MockStripeClient {
        async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<PortalSession> {
            let id = self.next_id("bps");
            lock(&self.inner.portal_requests).push((customer_id.to_string(), return_url.to_string()));
            Ok(PortalSession {
                url: format!("https://billing.stripe.com/p/session/{}?customer={}", id, customer_id),
                id,
            })
        }
    }
}
