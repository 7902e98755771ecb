//! Stripe customer portal sessions.

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use super::client::FullStripeClient;
use super::error::BillingError;
use super::manager::EntitlementManager;

/// A hosted portal session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortalSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait StripePortalClient: Send + Sync {
    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<PortalSession>;
}

/// Opens the Stripe portal for users who already have a customer.
#[derive(Clone)]
pub struct PortalManager {
    entitlements: EntitlementManager,
    client: Arc<dyn FullStripeClient>,
    return_url: String,
}

impl PortalManager {
    /// `base_url` is the web app origin; users return to its settings page.
    #[must_use]
    pub fn new(
        entitlements: EntitlementManager,
        client: Arc<dyn FullStripeClient>,
        base_url: &str,
    ) -> Self {
        Self {
            entitlements,
            client,
            return_url: format!("{}/settings", base_url.trim_end_matches('/')),
        }
    }

    pub async fn create_portal_session(&self, user_id: &str) -> Result<PortalSession> {
        let entitlement = self.entitlements.get_entitlement(user_id).await?;
        let customer_id = entitlement
            .billing_account_id
            .ok_or_else(|| BillingError::NoCustomer {
                user_id: user_id.to_string(),
            })?;

        self.client
            .create_portal_session(&customer_id, &self.return_url)
            .await
    }
}
