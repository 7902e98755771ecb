//! Hosted checkout: starting sessions and confirming them on return.

use crate::error::{ListwiseError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use super::client::FullStripeClient;
use super::customer::CustomerManager;
use super::entitlement::PaymentType;
use super::error::BillingError;
use super::reconcile::Reconciler;

/// Placeholder Stripe substitutes with the real session id.
pub const CHECKOUT_SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

/// Stripe checkout mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    /// One-off payment.
    Payment,
    /// Recurring subscription.
    Subscription,
}

impl CheckoutMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Subscription => "subscription",
        }
    }

    /// Anything other than `"subscription"` is treated as a payment.
    #[must_use]
    pub fn from_stripe(mode: &str) -> Self {
        match mode {
            "subscription" => Self::Subscription,
            _ => Self::Payment,
        }
    }
}

/// Stripe checkout payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

impl PaymentStatus {
    #[must_use]
    pub fn from_stripe(status: &str) -> Self {
        match status {
            "paid" => Self::Paid,
            "no_payment_required" => Self::NoPaymentRequired,
            _ => Self::Unpaid,
        }
    }
}

/// What the user is buying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plan {
    /// $9.99 a month.
    #[serde(rename = "monthly")]
    Monthly,
    /// $99.99 once, premium for life.
    #[serde(rename = "one-time")]
    OneTime,
}

impl Plan {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::OneTime => "one-time",
        }
    }

    #[must_use]
    pub fn mode(&self) -> CheckoutMode {
        match self {
            Self::Monthly => CheckoutMode::Subscription,
            Self::OneTime => CheckoutMode::Payment,
        }
    }

    #[must_use]
    pub fn payment_type(&self) -> PaymentType {
        match self {
            Self::Monthly => PaymentType::Recurring,
            Self::OneTime => PaymentType::OneTime,
        }
    }
}

impl FromStr for Plan {
    type Err = BillingError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(Self::Monthly),
            "one-time" => Ok(Self::OneTime),
            other => Err(BillingError::UnknownPlan {
                plan: other.to_string(),
            }),
        }
    }
}

/// A checkout session as returned by Stripe, reduced to what we use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionDetails {
    pub id: String,
    pub customer_id: Option<String>,
    pub mode: CheckoutMode,
    pub payment_status: PaymentStatus,
    pub subscription_id: Option<String>,
    /// `userId` from the session metadata.
    pub user_id: Option<String>,
}

/// Parameters for a new hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCheckoutSessionRequest {
    pub customer_id: String,
    pub user_id: String,
    pub plan: Plan,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// A created checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Stripe checkout operations.
#[async_trait]
pub trait StripeCheckoutClient: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession>;

    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<CheckoutSessionDetails>;
}

/// Where checkout sends users and which prices it charges.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    base_url: String,
    monthly_price_id: String,
    lifetime_price_id: String,
}

impl CheckoutConfig {
    /// # Errors
    ///
    /// Fails if `base_url` is not an absolute http(s) URL.
    pub fn new(
        base_url: &str,
        monthly_price_id: impl Into<String>,
        lifetime_price_id: impl Into<String>,
    ) -> std::result::Result<Self, BillingError> {
        validate_base_url(base_url)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            monthly_price_id: monthly_price_id.into(),
            lifetime_price_id: lifetime_price_id.into(),
        })
    }

    pub fn from_billing_config(
        config: &crate::config::BillingConfig,
    ) -> std::result::Result<Self, BillingError> {
        Self::new(
            &config.base_url,
            config.monthly_price_id.clone(),
            config.lifetime_price_id.clone(),
        )
    }

    #[must_use]
    pub fn success_url(&self) -> String {
        format!(
            "{}/settings?session_id={}",
            self.base_url, CHECKOUT_SESSION_ID_PLACEHOLDER
        )
    }

    #[must_use]
    pub fn cancel_url(&self) -> String {
        format!("{}/settings?canceled=true", self.base_url)
    }

    #[must_use]
    pub fn price_id(&self, plan: Plan) -> &str {
        match plan {
            Plan::Monthly => &self.monthly_price_id,
            Plan::OneTime => &self.lifetime_price_id,
        }
    }
}

fn validate_base_url(base_url: &str) -> std::result::Result<(), BillingError> {
    let parsed = url::Url::parse(base_url).map_err(|e| BillingError::InvalidRedirectUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(BillingError::InvalidRedirectUrl {
            url: base_url.to_string(),
            reason: "must use http or https".to_string(),
        });
    }
    Ok(())
}

/// Outcome of confirming a checkout from the return page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyCheckoutResult {
    pub success: bool,
    pub error: Option<String>,
    /// Whether this call changed the entitlement.
    pub subscription_updated: bool,
}

impl VerifyCheckoutResult {
    fn updated() -> Self {
        Self {
            success: true,
            error: None,
            subscription_updated: true,
        }
    }

    fn unchanged(error: Option<String>) -> Self {
        Self {
            success: true,
            error,
            subscription_updated: false,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            subscription_updated: false,
        }
    }
}

/// Starts checkouts and applies them when the user comes back.
#[derive(Clone)]
pub struct CheckoutManager {
    reconciler: Reconciler,
    customers: CustomerManager,
    client: Arc<dyn FullStripeClient>,
    config: CheckoutConfig,
}

impl CheckoutManager {
    #[must_use]
    pub fn new(
        reconciler: Reconciler,
        customers: CustomerManager,
        client: Arc<dyn FullStripeClient>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            reconciler,
            customers,
            client,
            config,
        }
    }

    /// Create a hosted checkout session for `plan`.
    ///
    /// The Stripe customer is looked up or created first. The session
    /// carries `userId` and `paymentType` in its metadata so the webhook can
    /// find the user without the customer index.
    pub async fn create_checkout_session(
        &self,
        user_id: &str,
        email: Option<&str>,
        plan: Plan,
    ) -> Result<CheckoutSession> {
        let email = email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ListwiseError::bad_request("An email address is required to start checkout"))?;

        let customer_id = self.customers.get_or_create_customer(user_id, email).await?;

        let session = self
            .client
            .create_checkout_session(CreateCheckoutSessionRequest {
                customer_id: customer_id.clone(),
                user_id: user_id.to_string(),
                plan,
                price_id: self.config.price_id(plan).to_string(),
                success_url: self.config.success_url(),
                cancel_url: self.config.cancel_url(),
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            customer_id = %customer_id,
            session_id = %session.id,
            plan = plan.as_str(),
            "Checkout session created"
        );

        Ok(session)
    }

    /// Apply a checkout right after the user is redirected back.
    ///
    /// Covers setups where the webhook is late or never arrives. Applies the
    /// same update as the `checkout.session.completed` webhook, so the two
    /// can race safely.
    pub async fn verify_checkout_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<VerifyCheckoutResult> {
        let session = self.client.retrieve_checkout_session(session_id).await?;

        if session.payment_status != PaymentStatus::Paid {
            tracing::info!(
                user_id = %user_id,
                session_id = %session_id,
                payment_status = ?session.payment_status,
                "Checkout not paid yet"
            );
            return Ok(VerifyCheckoutResult::failed(
                BillingError::PaymentNotCompleted {
                    session_id: session_id.to_string(),
                }
                .to_string(),
            ));
        }

        if let Some(owner) = session.user_id.as_deref().filter(|id| !id.is_empty()) {
            if owner != user_id {
                tracing::warn!(
                    user_id = %user_id,
                    session_id = %session_id,
                    "Checkout session verification attempted by another user"
                );
                return Err(BillingError::SessionOwnershipMismatch {
                    session_id: session_id.to_string(),
                }
                .into());
            }
        }

        let current = self.reconciler.entitlements().get_entitlement(user_id).await?;
        if current.is_premium() {
            tracing::debug!(user_id = %user_id, session_id = %session_id, "Already premium");
            return Ok(VerifyCheckoutResult::unchanged(None));
        }

        let Some(customer_id) = session.customer_id.as_deref().filter(|id| !id.is_empty()) else {
            tracing::warn!(user_id = %user_id, session_id = %session_id, "Paid checkout has no customer");
            return Ok(VerifyCheckoutResult::unchanged(Some(
                "Payment successful but customer ID not found. Webhook should update your subscription shortly."
                    .to_string(),
            )));
        };

        match self
            .reconciler
            .apply_checkout_completed(user_id, &session, customer_id)
            .await
        {
            Ok(_) => Ok(VerifyCheckoutResult::updated()),
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    session_id = %session_id,
                    error = %e,
                    "Paid checkout could not be applied"
                );
                Ok(VerifyCheckoutResult::unchanged(Some(format!(
                    "Payment successful but subscription update failed: {}. Please contact support.",
                    e
                ))))
            }
        }
    }
}
