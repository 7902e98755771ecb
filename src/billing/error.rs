//! Billing-specific error types.
//!
//! Every variant converts into `ListwiseError`, so billing code can use `?`
//! inside HTTP handlers and still produce the right status code.

use std::fmt;

/// Billing-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    // Webhook errors
    /// The `Stripe-Signature` header was absent.
    MissingWebhookSignature,
    /// The webhook signature didn't match.
    InvalidWebhookSignature,
    /// The webhook timestamp is outside the tolerance window.
    WebhookTimestampExpired { age_seconds: i64 },
    /// The webhook payload could not be parsed.
    InvalidWebhookPayload { message: String },
    /// No signing secret and unsigned delivery not allowed.
    WebhookSecretNotConfigured,

    // Entitlement errors
    /// Writing the entitlement record or the customer index failed.
    EntitlementWriteFailed { user_id: String, message: String },
    /// Reading the entitlement record or the customer index failed.
    EntitlementReadFailed { key: String, message: String },

    // Checkout errors
    /// The checkout session has not been paid yet.
    PaymentNotCompleted { session_id: String },
    /// The checkout session was started by another user.
    SessionOwnershipMismatch { session_id: String },
    /// Plan name is not one of the offered plans.
    UnknownPlan { plan: String },
    /// Redirect URL could not be built from the configured base URL.
    InvalidRedirectUrl { url: String, reason: String },

    // Customer and subscription errors
    /// No Stripe customer is linked to the user.
    NoCustomer { user_id: String },
    /// No recurring subscription is linked to the user.
    NoSubscription { user_id: String },

    // Stripe API errors
    /// Stripe returned an error or could not be reached.
    StripeApiError {
        operation: String,
        message: String,
        code: Option<String>,
        http_status: Option<u16>,
    },
    /// The configured API key is malformed.
    InvalidApiKey { reason: String },

    /// Anything else that went wrong on our side.
    Internal { message: String },
}

impl fmt::Display for BillingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingWebhookSignature => write!(f, "Missing Stripe-Signature header"),
            Self::InvalidWebhookSignature => write!(f, "Invalid webhook signature"),
            Self::WebhookTimestampExpired { age_seconds } => {
                write!(f, "Webhook timestamp outside tolerance ({} seconds old)", age_seconds)
            }
            Self::InvalidWebhookPayload { message } => {
                write!(f, "Invalid webhook payload: {}", message)
            }
            Self::WebhookSecretNotConfigured => write!(f, "Webhook secret not configured"),
            Self::EntitlementWriteFailed { user_id, message } => {
                write!(f, "Failed to update subscription for user {}: {}", user_id, message)
            }
            Self::EntitlementReadFailed { key, message } => {
                write!(f, "Failed to read {}: {}", key, message)
            }
            Self::PaymentNotCompleted { .. } => write!(f, "Payment not completed"),
            Self::SessionOwnershipMismatch { session_id } => {
                write!(f, "Checkout session {} belongs to another user", session_id)
            }
            Self::UnknownPlan { plan } => {
                write!(f, "Unknown plan '{}', expected 'monthly' or 'one-time'", plan)
            }
            Self::InvalidRedirectUrl { url, reason } => {
                write!(f, "Invalid redirect URL '{}': {}", url, reason)
            }
            Self::NoCustomer { user_id } => {
                write!(f, "No Stripe customer found for user {}", user_id)
            }
            Self::NoSubscription { user_id } => {
                write!(f, "No subscription found for user {}", user_id)
            }
            Self::StripeApiError {
                operation,
                message,
                code,
                ..
            } => match code {
                Some(code) => write!(f, "Stripe {} failed ({}): {}", operation, code, message),
                None => write!(f, "Stripe {} failed: {}", operation, message),
            },
            Self::InvalidApiKey { reason } => write!(f, "Invalid Stripe API key: {}", reason),
            Self::Internal { message } => write!(f, "Billing error: {}", message),
        }
    }
}

impl std::error::Error for BillingError {}

impl From<BillingError> for crate::error::ListwiseError {
    fn from(err: BillingError) -> Self {
        use crate::error::ListwiseError;

        match &err {
            BillingError::NoCustomer { .. } | BillingError::NoSubscription { .. } => {
                ListwiseError::BadRequest(err.to_string())
            }

            BillingError::SessionOwnershipMismatch { .. } => {
                ListwiseError::Forbidden(err.to_string())
            }

            BillingError::MissingWebhookSignature
            | BillingError::InvalidWebhookSignature
            | BillingError::WebhookTimestampExpired { .. }
            | BillingError::InvalidWebhookPayload { .. }
            | BillingError::PaymentNotCompleted { .. }
            | BillingError::UnknownPlan { .. } => ListwiseError::BadRequest(err.to_string()),

            BillingError::WebhookSecretNotConfigured
            | BillingError::EntitlementWriteFailed { .. }
            | BillingError::EntitlementReadFailed { .. }
            | BillingError::InvalidRedirectUrl { .. }
            | BillingError::InvalidApiKey { .. }
            | BillingError::Internal { .. } => ListwiseError::Internal(err.to_string()),

            BillingError::StripeApiError { http_status, .. } => match http_status {
                Some(404) => ListwiseError::NotFound(err.to_string()),
                Some(408) => ListwiseError::RequestTimeout,
                Some(400..=499) => ListwiseError::BadRequest(err.to_string()),
                _ => ListwiseError::ServiceUnavailable(err.to_string()),
            },
        }
    }
}

impl BillingError {
    /// Whether the caller sent something we can't act on.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::MissingWebhookSignature
            | Self::InvalidWebhookSignature
            | Self::WebhookTimestampExpired { .. }
            | Self::InvalidWebhookPayload { .. }
            | Self::PaymentNotCompleted { .. }
            | Self::SessionOwnershipMismatch { .. }
            | Self::UnknownPlan { .. }
            | Self::NoCustomer { .. }
            | Self::NoSubscription { .. } => true,
            Self::StripeApiError { http_status, .. } => {
                matches!(http_status, Some(400..=499)) && *http_status != Some(429)
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Whether trying again later can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EntitlementWriteFailed { .. } | Self::EntitlementReadFailed { .. } => true,
            Self::StripeApiError { http_status, .. } => {
                matches!(http_status, Some(408) | Some(429) | Some(500..=599) | None)
            }
            _ => false,
        }
    }
}
