//! What the settings page shows when Stripe sends the user back.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::checkout::CheckoutManager;
use super::entitlement::Entitlement;
use super::manager::EntitlementManager;

/// Query string on the settings page after a hosted checkout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutReturnQuery {
    pub session_id: Option<String>,
    #[serde(default)]
    pub canceled: Option<String>,
}

impl CheckoutReturnQuery {
    fn is_canceled(&self) -> bool {
        self.canceled.as_deref() == Some("true")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Success,
    Error,
}

/// A message for the user. Persistent notices stay until dismissed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub persistent: bool,
}

impl Notice {
    fn persistent(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            persistent: true,
        }
    }

    fn provisional(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
            persistent: false,
        }
    }
}

pub const PAYMENT_CANCELED: &str = "Payment was canceled";
pub const PREMIUM_ACTIVE: &str = "Your Premium subscription is active!";
pub const PREMIUM_ACTIVATING: &str = "Payment successful! Your subscription is being activated...";
pub const PREMIUM_NOW_ACTIVE: &str = "Your Premium subscription is now active!";

/// Notices for the settings page, plus when to look again.
///
/// `recheck_after_ms` is set while premium is still activating. The caller
/// reads `GET /api/subscription` once after that delay and, if premium,
/// swaps the provisional notice for [`recheck_notice`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckoutReturn {
    pub notices: Vec<Notice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recheck_after_ms: Option<u64>,
}

impl CheckoutReturn {
    fn settled(notices: Vec<Notice>) -> Self {
        Self {
            notices,
            recheck_after_ms: None,
        }
    }
}

/// The notice to show after the delayed re-check, if premium has landed.
pub fn recheck_notice(entitlement: &Entitlement) -> Option<Notice> {
    entitlement
        .is_premium()
        .then(|| Notice::persistent(NoticeKind::Success, PREMIUM_NOW_ACTIVE))
}

/// Confirms a returning checkout and reports progress as notices.
///
/// Never waits on the webhook. A payment that verified but has not produced
/// premium yet comes back with a re-check hint instead.
#[derive(Clone)]
pub struct CheckoutReturnFlow {
    checkout: CheckoutManager,
    entitlements: EntitlementManager,
    recheck_delay: Duration,
}

impl CheckoutReturnFlow {
    #[must_use]
    pub fn new(
        checkout: CheckoutManager,
        entitlements: EntitlementManager,
        recheck_delay: Duration,
    ) -> Self {
        Self {
            checkout,
            entitlements,
            recheck_delay,
        }
    }

    /// Notices in the order they would be shown.
    pub async fn run(&self, user_id: &str, query: &CheckoutReturnQuery) -> Result<CheckoutReturn> {
        if query.is_canceled() {
            return Ok(CheckoutReturn::settled(vec![Notice::persistent(
                NoticeKind::Error,
                PAYMENT_CANCELED,
            )]));
        }

        let Some(session_id) = query.session_id.as_deref().filter(|id| !id.is_empty()) else {
            return Ok(CheckoutReturn::default());
        };

        let verified = match self.checkout.verify_checkout_session(user_id, session_id).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(user_id = %user_id, session_id = %session_id, error = %e, "Checkout verification failed");
                return Ok(CheckoutReturn::settled(vec![Notice::persistent(
                    NoticeKind::Error,
                    e.safe_message(),
                )]));
            }
        };

        if !verified.success {
            let message = verified
                .error
                .unwrap_or_else(|| "Failed to verify payment".to_string());
            return Ok(CheckoutReturn::settled(vec![Notice::persistent(
                NoticeKind::Error,
                message,
            )]));
        }

        // Paid, but the entitlement may not have been written.
        let mut notices = Vec::new();
        if let Some(message) = verified.error {
            tracing::warn!(user_id = %user_id, session_id = %session_id, "{}", message);
            notices.push(Notice::persistent(NoticeKind::Error, message));
        }

        if self.entitlements.get_entitlement(user_id).await?.is_premium() {
            notices.push(Notice::persistent(NoticeKind::Success, PREMIUM_ACTIVE));
            return Ok(CheckoutReturn::settled(notices));
        }

        notices.push(Notice::provisional(PREMIUM_ACTIVATING));
        Ok(CheckoutReturn {
            notices,
            recheck_after_ms: Some(self.recheck_delay.as_millis() as u64),
        })
    }
}
