//! Live Stripe client.
//!
//! Wraps `async-stripe` with key validation, retries with backoff and a
//! per-request timeout, and idempotency keys on every create or update.

use crate::error::{ListwiseError, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::time::Duration;

use super::checkout::{
    CheckoutMode, CheckoutSession, CheckoutSessionDetails, CreateCheckoutSessionRequest,
    PaymentStatus, StripeCheckoutClient,
};
use super::customer::{CreateCustomerRequest, StripeCustomerClient};
use super::error::BillingError;
use super::portal::{PortalSession, StripePortalClient};
use super::subscription::{StripeSubscriptionClient, StripeSubscriptionData};

/// Metadata key carrying our user id on customers, sessions and subscriptions.
pub const META_USER_ID: &str = "userId";
/// Metadata key carrying the plan's payment type on checkout sessions.
pub const META_PAYMENT_TYPE: &str = "paymentType";

/// Retry and timeout settings for [`LiveStripeClient`].
#[derive(Debug, Clone)]
pub struct LiveStripeClientConfig {
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-attempt timeout.
    pub timeout_seconds: u64,
}

impl Default for LiveStripeClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            timeout_seconds: 30,
        }
    }
}

impl LiveStripeClientConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

/// Check a Stripe secret key's shape.
///
/// Accepts `sk_test_`, `sk_live_`, `rk_test_` and `rk_live_` keys.
/// Publishable keys are rejected.
pub fn validate_api_key(key: &str) -> std::result::Result<(), BillingError> {
    const MIN_KEY_LENGTH: usize = 20;

    if key.is_empty() {
        return Err(BillingError::InvalidApiKey {
            reason: "API key cannot be empty".to_string(),
        });
    }

    if key.len() < MIN_KEY_LENGTH {
        return Err(BillingError::InvalidApiKey {
            reason: format!("API key too short (minimum {} characters)", MIN_KEY_LENGTH),
        });
    }

    let valid_prefixes = ["sk_test_", "sk_live_", "rk_test_", "rk_live_"];
    if !valid_prefixes.iter().any(|prefix| key.starts_with(prefix)) {
        return Err(BillingError::InvalidApiKey {
            reason: "API key must start with sk_test_, sk_live_, rk_test_, or rk_live_".to_string(),
        });
    }

    Ok(())
}

fn parse_id<T: std::str::FromStr>(kind: &str, id: &str) -> Result<T> {
    id.parse()
        .map_err(|_| ListwiseError::bad_request(format!("Invalid {} ID: {}", kind, id)))
}

/// Stripe client for production use.
#[derive(Clone)]
pub struct LiveStripeClient {
    client: stripe::Client,
    config: LiveStripeClientConfig,
    api_key: SecretString,
}

impl LiveStripeClient {
    /// # Errors
    ///
    /// Fails if the key is not a Stripe secret or restricted key.
    pub fn new(
        api_key: impl Into<SecretString>,
        config: LiveStripeClientConfig,
    ) -> std::result::Result<Self, BillingError> {
        let api_key: SecretString = api_key.into();
        validate_api_key(api_key.expose_secret())?;

        let client = stripe::Client::new(api_key.expose_secret()).with_app_info(
            "listwise".to_string(),
            Some(env!("CARGO_PKG_VERSION").to_string()),
            None,
        );

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    pub fn with_default_config(
        api_key: impl Into<SecretString>,
    ) -> std::result::Result<Self, BillingError> {
        Self::new(api_key, LiveStripeClientConfig::default())
    }

    #[must_use]
    pub fn is_test_mode(&self) -> bool {
        let key = self.api_key.expose_secret();
        key.starts_with("sk_test_") || key.starts_with("rk_test_")
    }

    fn idempotent_client(&self, operation: &str) -> stripe::Client {
        let key = format!("{}_{}", operation, uuid::Uuid::new_v4());
        self.client
            .clone()
            .with_strategy(stripe::RequestStrategy::Idempotent(key))
    }
}

// Never print the key.
impl std::fmt::Debug for LiveStripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStripeClient")
            .field("config", &self.config)
            .field("is_test_mode", &self.is_test_mode())
            .finish_non_exhaustive()
    }
}

/// Run a Stripe call with a timeout, retrying rate limits, 5xx and timeouts.
async fn with_retry<T, F, Fut>(
    config: &LiveStripeClientConfig,
    operation: &str,
    operation_fn: F,
) -> std::result::Result<T, BillingError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, stripe::StripeError>>,
{
    let timeout_duration = Duration::from_secs(config.timeout_seconds);
    let mut attempts = 0;

    loop {
        match tokio::time::timeout(timeout_duration, operation_fn()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                if !is_retryable_error(&e) || attempts >= config.max_retries {
                    return Err(map_stripe_error(e, operation));
                }

                tracing::warn!(
                    target: "listwise::billing::stripe",
                    operation = operation,
                    attempt = attempts + 1,
                    error = %e,
                    "Retrying Stripe API call after transient error"
                );
            }
            Err(_elapsed) => {
                if attempts >= config.max_retries {
                    return Err(BillingError::StripeApiError {
                        operation: operation.to_string(),
                        message: format!(
                            "Request timed out after {} seconds",
                            config.timeout_seconds
                        ),
                        code: None,
                        http_status: Some(408),
                    });
                }

                tracing::warn!(
                    target: "listwise::billing::stripe",
                    operation = operation,
                    attempt = attempts + 1,
                    timeout_seconds = config.timeout_seconds,
                    "Stripe API request timed out, retrying"
                );
            }
        }

        tokio::time::sleep(backoff_delay(attempts, config.base_delay_ms, config.max_delay_ms)).await;
        attempts += 1;
    }
}

fn is_retryable_error(error: &stripe::StripeError) -> bool {
    match error {
        stripe::StripeError::Stripe(request_error) => {
            let status = request_error.http_status;
            status == 429 || (500..600).contains(&status)
        }
        stripe::StripeError::Timeout => true,
        _ => false,
    }
}

/// Exponential backoff with up to 25% jitter.
fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let delay_ms = base_ms
        .saturating_mul(2_u64.saturating_pow(attempt))
        .min(max_ms);
    let jitter = if delay_ms > 0 {
        fastrand::u64(0..=delay_ms / 4)
    } else {
        0
    };
    Duration::from_millis(delay_ms.saturating_add(jitter))
}

fn map_stripe_error(error: stripe::StripeError, operation: &str) -> BillingError {
    match error {
        stripe::StripeError::Stripe(request_error) => BillingError::StripeApiError {
            operation: operation.to_string(),
            message: request_error
                .message
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string()),
            code: request_error.code.as_ref().map(|c| format!("{c:?}")),
            http_status: Some(request_error.http_status),
        },
        stripe::StripeError::QueryStringSerialize(e) => BillingError::Internal {
            message: format!("Failed to serialize request: {e}"),
        },
        stripe::StripeError::JSONSerialize(e) => BillingError::Internal {
            message: format!("Failed to serialize JSON: {e}"),
        },
        stripe::StripeError::UnsupportedVersion => BillingError::Internal {
            message: "Unsupported Stripe API version".to_string(),
        },
        stripe::StripeError::ClientError(msg) => BillingError::Internal {
            message: format!("HTTP client error: {msg}"),
        },
        stripe::StripeError::Timeout => BillingError::StripeApiError {
            operation: operation.to_string(),
            message: "Request timed out".to_string(),
            code: None,
            http_status: Some(408),
        },
    }
}

fn expandable_id<T: stripe::Object>(value: &stripe::Expandable<T>) -> String
where
    T::Id: ToString + Clone + Default,
{
    value.id().to_string()
}

fn subscription_status(status: &stripe::SubscriptionStatus) -> &'static str {
    match status {
        stripe::SubscriptionStatus::Active => "active",
        stripe::SubscriptionStatus::Canceled => "canceled",
        stripe::SubscriptionStatus::Incomplete => "incomplete",
        stripe::SubscriptionStatus::IncompleteExpired => "incomplete_expired",
        stripe::SubscriptionStatus::PastDue => "past_due",
        stripe::SubscriptionStatus::Trialing => "trialing",
        stripe::SubscriptionStatus::Unpaid => "unpaid",
        stripe::SubscriptionStatus::Paused => "paused",
    }
}

fn map_subscription(sub: stripe::Subscription) -> StripeSubscriptionData {
    StripeSubscriptionData {
        id: sub.id.to_string(),
        customer_id: expandable_id(&sub.customer),
        status: subscription_status(&sub.status).to_string(),
        current_period_end: u64::try_from(sub.current_period_end).ok(),
        cancel_at_period_end: sub.cancel_at_period_end,
        user_id: sub.metadata.get(META_USER_ID).cloned(),
    }
}

#[async_trait]
impl StripeCustomerClient for LiveStripeClient {
    async fn create_customer(&self, request: CreateCustomerRequest) -> Result<String> {
        let client = self.idempotent_client("create_customer");

        let mut params = stripe::CreateCustomer::new();
        params.email = Some(&request.email);
        params.metadata = Some(HashMap::from([(
            META_USER_ID.to_string(),
            request.user_id.clone(),
        )]));

        let customer = with_retry(&self.config, "create_customer", || {
            let client = client.clone();
            let params = params.clone();
            async move { stripe::Customer::create(&client, params).await }
        })
        .await?;

        Ok(customer.id.to_string())
    }

    async fn customer_exists(&self, customer_id: &str) -> Result<bool> {
        let id: stripe::CustomerId = parse_id("customer", customer_id)?;

        let result = with_retry(&self.config, "retrieve_customer", || {
            let client = self.client.clone();
            let id = id.clone();
            async move { stripe::Customer::retrieve(&client, &id, &[]).await }
        })
        .await;

        match result {
            Ok(customer) => Ok(!customer.deleted),
            Err(BillingError::StripeApiError {
                http_status: Some(404),
                ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StripeCheckoutClient for LiveStripeClient {
    async fn create_checkout_session(
        &self,
        request: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession> {
        let client = self.idempotent_client("create_checkout_session");
        let customer_id: stripe::CustomerId = parse_id("customer", &request.customer_id)?;

        let metadata: HashMap<String, String> = HashMap::from([
            (META_USER_ID.to_string(), request.user_id.clone()),
            (
                META_PAYMENT_TYPE.to_string(),
                request.plan.payment_type().as_str().to_string(),
            ),
        ]);

        let mut params = stripe::CreateCheckoutSession::new();
        params.customer = Some(customer_id);
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.line_items = Some(vec![stripe::CreateCheckoutSessionLineItems {
            price: Some(request.price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.metadata = Some(metadata.clone());

        // Copy the user id onto the object the later webhooks describe.
        match request.plan.mode() {
            CheckoutMode::Subscription => {
                params.mode = Some(stripe::CheckoutSessionMode::Subscription);
                params.subscription_data = Some(stripe::CreateCheckoutSessionSubscriptionData {
                    metadata: Some(metadata.clone()),
                    ..Default::default()
                });
            }
            CheckoutMode::Payment => {
                params.mode = Some(stripe::CheckoutSessionMode::Payment);
                params.payment_intent_data = Some(stripe::CreateCheckoutSessionPaymentIntentData {
                    metadata: Some(metadata.clone()),
                    ..Default::default()
                });
            }
        }

        let session = with_retry(&self.config, "create_checkout_session", || {
            let client = client.clone();
            let params = params.clone();
            async move { stripe::CheckoutSession::create(&client, params).await }
        })
        .await?;

        let url = session.url.ok_or_else(|| BillingError::Internal {
            message: "Checkout session URL missing".to_string(),
        })?;

        Ok(CheckoutSession {
            id: session.id.to_string(),
            url,
        })
    }

    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<CheckoutSessionDetails> {
        let id: stripe::CheckoutSessionId = parse_id("checkout session", session_id)?;

        let session = with_retry(&self.config, "retrieve_checkout_session", || {
            let client = self.client.clone();
            let id = id.clone();
            async move { stripe::CheckoutSession::retrieve(&client, &id, &[]).await }
        })
        .await?;

        let mode = match session.mode {
            stripe::CheckoutSessionMode::Subscription => CheckoutMode::Subscription,
            _ => CheckoutMode::Payment,
        };
        let payment_status = match session.payment_status {
            stripe::CheckoutSessionPaymentStatus::Paid => PaymentStatus::Paid,
            stripe::CheckoutSessionPaymentStatus::NoPaymentRequired => {
                PaymentStatus::NoPaymentRequired
            }
            stripe::CheckoutSessionPaymentStatus::Unpaid => PaymentStatus::Unpaid,
        };

        Ok(CheckoutSessionDetails {
            id: session.id.to_string(),
            customer_id: session.customer.as_ref().map(expandable_id),
            mode,
            payment_status,
            subscription_id: session.subscription.as_ref().map(expandable_id),
            user_id: session
                .metadata
                .as_ref()
                .and_then(|m| m.get(META_USER_ID).cloned()),
        })
    }
}

#[async_trait]
impl StripeSubscriptionClient for LiveStripeClient {
    async fn get_subscription(&self, subscription_id: &str) -> Result<StripeSubscriptionData> {
        let id: stripe::SubscriptionId = parse_id("subscription", subscription_id)?;

        let subscription = with_retry(&self.config, "get_subscription", || {
            let client = self.client.clone();
            let id = id.clone();
            async move { stripe::Subscription::retrieve(&client, &id, &[]).await }
        })
        .await?;

        Ok(map_subscription(subscription))
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
        let id: stripe::SubscriptionId = parse_id("subscription", subscription_id)?;

        with_retry(&self.config, "cancel_subscription", || {
            let client = self.client.clone();
            let id = id.clone();
            async move {
                stripe::Subscription::cancel(&client, &id, stripe::CancelSubscription::default())
                    .await
            }
        })
        .await?;

        Ok(())
    }

    async fn set_cancel_at_period_end(&self, subscription_id: &str, cancel: bool) -> Result<()> {
        let client = self.idempotent_client("update_subscription");
        let id: stripe::SubscriptionId = parse_id("subscription", subscription_id)?;

        let mut params = stripe::UpdateSubscription::new();
        params.cancel_at_period_end = Some(cancel);

        with_retry(&self.config, "update_subscription", || {
            let client = client.clone();
            let id = id.clone();
            let params = params.clone();
            async move { stripe::Subscription::update(&client, &id, params).await }
        })
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StripePortalClient for LiveStripeClient {
    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<PortalSession> {
        let customer_id: stripe::CustomerId = parse_id("customer", customer_id)?;

        let mut params = stripe::CreateBillingPortalSession::new(customer_id);
        params.return_url = Some(return_url);

        let session = with_retry(&self.config, "create_portal_session", || {
            let client = self.client.clone();
            let params = params.clone();
            async move { stripe::BillingPortalSession::create(&client, params).await }
        })
        .await?;

        Ok(PortalSession {
            id: session.id.to_string(),
            url: session.url,
        })
    }
}
