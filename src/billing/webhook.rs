//! Stripe webhook handling.
//!
//! Verifies the `Stripe-Signature` header, types the payload into a
//! [`BillingEvent`] and hands it to the [`Reconciler`].

use crate::error::Result;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use subtle::ConstantTimeEq;

use super::checkout::{CheckoutMode, CheckoutSessionDetails, PaymentStatus};
use super::error::BillingError;
use super::reconcile::Reconciler;
use super::subscription::StripeSubscriptionData;

type HmacSha256 = Hmac<Sha256>;

/// Default allowed clock skew for signed webhooks.
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// A raw Stripe event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
    #[serde(default)]
    pub created: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

/// A Stripe reference that may arrive as a bare id or an expanded object.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ExpandableId {
    Id(String),
    Object { id: String },
}

impl ExpandableId {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) | Self::Object { id } => id,
        }
    }
}

type Metadata = Option<HashMap<String, String>>;

fn user_id_from(metadata: &Metadata) -> Option<String> {
    metadata
        .as_ref()
        .and_then(|m| m.get("userId"))
        .filter(|id| !id.is_empty())
        .cloned()
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    id: String,
    customer: Option<ExpandableId>,
    mode: Option<String>,
    payment_status: Option<String>,
    subscription: Option<ExpandableId>,
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    customer: ExpandableId,
    status: String,
    current_period_end: Option<i64>,
    #[serde(default)]
    cancel_at_period_end: bool,
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentObject {
    id: String,
    customer: Option<ExpandableId>,
    metadata: Metadata,
}

impl From<CheckoutSessionObject> for CheckoutSessionDetails {
    fn from(obj: CheckoutSessionObject) -> Self {
        Self {
            user_id: user_id_from(&obj.metadata),
            id: obj.id,
            customer_id: obj.customer.map(|c| c.id().to_string()),
            mode: CheckoutMode::from_stripe(obj.mode.as_deref().unwrap_or_default()),
            payment_status: PaymentStatus::from_stripe(
                obj.payment_status.as_deref().unwrap_or_default(),
            ),
            subscription_id: obj.subscription.map(|s| s.id().to_string()),
        }
    }
}

impl From<SubscriptionObject> for StripeSubscriptionData {
    fn from(obj: SubscriptionObject) -> Self {
        Self {
            user_id: user_id_from(&obj.metadata),
            id: obj.id,
            customer_id: obj.customer.id().to_string(),
            status: obj.status,
            current_period_end: obj.current_period_end.and_then(|t| u64::try_from(t).ok()),
            cancel_at_period_end: obj.cancel_at_period_end,
        }
    }
}

/// The Stripe events that move entitlements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    /// `checkout.session.completed`
    CheckoutCompleted(CheckoutSessionDetails),
    /// `customer.subscription.created` / `customer.subscription.updated`
    SubscriptionChanged(StripeSubscriptionData),
    /// `customer.subscription.deleted`
    SubscriptionRemoved(StripeSubscriptionData),
    /// `payment_intent.succeeded`
    OneTimePaymentSucceeded {
        payment_intent_id: String,
        customer_id: Option<String>,
        user_id: Option<String>,
    },
    /// Anything else. Acknowledged and ignored.
    Unhandled { event_type: String },
}

impl BillingEvent {
    /// Type the event's `data.object` according to its `type`.
    pub fn from_event(event: &WebhookEvent) -> std::result::Result<Self, BillingError> {
        fn parse<T: serde::de::DeserializeOwned>(
            event: &WebhookEvent,
        ) -> std::result::Result<T, BillingError> {
            serde_json::from_value(event.data.object.clone()).map_err(|e| {
                tracing::warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Malformed webhook object"
                );
                BillingError::InvalidWebhookPayload {
                    message: format!("malformed {} object", event.event_type),
                }
            })
        }

        Ok(match event.event_type.as_str() {
            "checkout.session.completed" => {
                Self::CheckoutCompleted(parse::<CheckoutSessionObject>(event)?.into())
            }
            "customer.subscription.created" | "customer.subscription.updated" => {
                Self::SubscriptionChanged(parse::<SubscriptionObject>(event)?.into())
            }
            "customer.subscription.deleted" => {
                Self::SubscriptionRemoved(parse::<SubscriptionObject>(event)?.into())
            }
            "payment_intent.succeeded" => {
                let intent: PaymentIntentObject = parse(event)?;
                Self::OneTimePaymentSucceeded {
                    user_id: user_id_from(&intent.metadata),
                    payment_intent_id: intent.id,
                    customer_id: intent.customer.map(|c| c.id().to_string()),
                }
            }
            other => Self::Unhandled {
                event_type: other.to_string(),
            },
        })
    }
}

/// What happened to a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// An entitlement was written.
    Processed,
    /// Not an event we act on.
    Ignored,
    /// No user could be found for the event; dropped.
    UserUnresolved,
}

/// Parsed `Stripe-Signature` header.
#[derive(Debug)]
struct SignatureParts {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> std::result::Result<SignatureParts, BillingError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .split_once('=')
            .ok_or(BillingError::InvalidWebhookSignature)?;

        match key.trim() {
            "t" => timestamp = value.trim().parse().ok(),
            "v1" => signatures.push(value.trim().to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(BillingError::InvalidWebhookSignature)?;
    if signatures.is_empty() {
        return Err(BillingError::InvalidWebhookSignature);
    }

    Ok(SignatureParts {
        timestamp,
        signatures,
    })
}

fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> std::result::Result<Vec<u8>, BillingError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| BillingError::Internal {
        message: "HMAC key error".to_string(),
    })?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Check a `Stripe-Signature` header against `payload` at time `now`.
///
/// Any `v1` entry may match. The timestamp must be within `tolerance_secs`
/// of `now` in either direction.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    tolerance_secs: u64,
    now: u64,
) -> std::result::Result<(), BillingError> {
    let parts = parse_signature_header(header)?;

    let age_seconds = i64::try_from(now).unwrap_or(i64::MAX) - parts.timestamp;
    if age_seconds.unsigned_abs() > tolerance_secs {
        return Err(BillingError::WebhookTimestampExpired { age_seconds });
    }

    let expected = compute_signature(secret, parts.timestamp, payload)?;
    let matched = parts
        .signatures
        .iter()
        .filter_map(|sig| hex::decode(sig).ok())
        .any(|provided| expected.ct_eq(&provided).into());

    if matched {
        Ok(())
    } else {
        Err(BillingError::InvalidWebhookSignature)
    }
}

/// Build a valid `Stripe-Signature` header for `payload`.
#[cfg(any(test, feature = "test-helpers"))]
pub fn signature_header(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let sig = compute_signature(secret, timestamp, payload).unwrap_or_default();
    format!("t={},v1={}", timestamp, hex::encode(sig))
}

/// Verifies and applies Stripe webhooks.
///
/// With a secret configured every delivery must be signed. Without one,
/// payloads are accepted unverified only when unsigned webhooks are allowed
/// (local emulator setups); otherwise every delivery is refused.
#[derive(Clone)]
pub struct WebhookHandler {
    reconciler: Reconciler,
    secret: Option<SecretString>,
    allow_unsigned: bool,
    tolerance_secs: u64,
}

impl WebhookHandler {
    #[must_use]
    pub fn new(reconciler: Reconciler, secret: Option<SecretString>, allow_unsigned: bool) -> Self {
        Self {
            reconciler,
            secret,
            allow_unsigned,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    #[must_use]
    pub fn with_tolerance(mut self, tolerance_secs: u64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Authenticate a delivery and parse its envelope.
    pub fn verify(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> std::result::Result<WebhookEvent, BillingError> {
        match &self.secret {
            Some(secret) => {
                let header = signature.ok_or(BillingError::MissingWebhookSignature)?;
                verify_signature(
                    secret.expose_secret(),
                    payload,
                    header,
                    self.tolerance_secs,
                    crate::utils::now_unix(),
                )
                .inspect_err(|e| tracing::warn!(error = %e, "Webhook signature rejected"))?;
            }
            None if self.allow_unsigned => {
                tracing::warn!("Webhook secret not configured, accepting unsigned payload");
            }
            None => {
                tracing::error!("Webhook received but no webhook secret is configured");
                return Err(BillingError::WebhookSecretNotConfigured);
            }
        }

        serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse webhook payload");
            BillingError::InvalidWebhookPayload {
                message: "malformed JSON payload".to_string(),
            }
        })
    }

    /// Verify, type and apply one delivery.
    pub async fn process(&self, payload: &[u8], signature: Option<&str>) -> Result<WebhookOutcome> {
        let event = self.verify(payload, signature)?;
        tracing::info!(event_id = %event.id, event_type = %event.event_type, "Webhook received");

        let billing_event = BillingEvent::from_event(&event)?;
        let outcome = self.handle_event(billing_event).await;

        match &outcome {
            Ok(outcome) => tracing::debug!(event_id = %event.id, ?outcome, "Webhook handled"),
            Err(e) => tracing::error!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "Webhook processing failed"
            ),
        }
        outcome
    }

    /// Apply a typed event.
    ///
    /// Unresolvable users are dropped with [`WebhookOutcome::UserUnresolved`].
    /// Write failures are returned so the delivery is retried.
    pub async fn handle_event(&self, event: BillingEvent) -> Result<WebhookOutcome> {
        let entitlements = self.reconciler.entitlements();

        match event {
            BillingEvent::CheckoutCompleted(session) => {
                let Some(customer_id) = session.customer_id.as_deref() else {
                    tracing::warn!(session_id = %session.id, "No customer in checkout session");
                    return Ok(WebhookOutcome::UserUnresolved);
                };
                let Some(user_id) = entitlements
                    .resolve_user(session.user_id.as_deref(), Some(customer_id))
                    .await?
                else {
                    tracing::warn!(customer_id = %customer_id, "Could not find user for customer");
                    return Ok(WebhookOutcome::UserUnresolved);
                };

                self.reconciler
                    .apply_checkout_completed(&user_id, &session, customer_id)
                    .await?;
                Ok(WebhookOutcome::Processed)
            }
            BillingEvent::SubscriptionChanged(sub) => {
                let Some(user_id) = self.resolve_subscription_user(&sub).await? else {
                    return Ok(WebhookOutcome::UserUnresolved);
                };
                self.reconciler.apply_subscription_changed(&user_id, &sub).await?;
                Ok(WebhookOutcome::Processed)
            }
            BillingEvent::SubscriptionRemoved(sub) => {
                let Some(user_id) = self.resolve_subscription_user(&sub).await? else {
                    return Ok(WebhookOutcome::UserUnresolved);
                };
                self.reconciler.apply_subscription_removed(&user_id).await?;
                Ok(WebhookOutcome::Processed)
            }
            BillingEvent::OneTimePaymentSucceeded {
                payment_intent_id,
                customer_id,
                user_id,
            } => {
                let Some(customer_id) = customer_id else {
                    tracing::warn!(payment_intent_id = %payment_intent_id, "No customer in payment intent");
                    return Ok(WebhookOutcome::UserUnresolved);
                };
                let Some(user_id) = entitlements
                    .resolve_user(user_id.as_deref(), Some(&customer_id))
                    .await?
                else {
                    tracing::warn!(
                        customer_id = %customer_id,
                        payment_intent_id = %payment_intent_id,
                        "Could not find user for customer in payment intent"
                    );
                    return Ok(WebhookOutcome::UserUnresolved);
                };

                self.reconciler
                    .apply_one_time_payment(&user_id, &customer_id)
                    .await?;
                Ok(WebhookOutcome::Processed)
            }
            BillingEvent::Unhandled { event_type } => {
                tracing::debug!(event_type = %event_type, "Unhandled webhook event type");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn resolve_subscription_user(&self, sub: &StripeSubscriptionData) -> Result<Option<String>> {
        let user_id = self
            .reconciler
            .entitlements()
            .resolve_user(sub.user_id.as_deref(), Some(&sub.customer_id))
            .await?;
        if user_id.is_none() {
            tracing::warn!(
                customer_id = %sub.customer_id,
                subscription_id = %sub.id,
                "Could not find user for customer"
            );
        }
        Ok(user_id)
    }
}
