//! Recurring subscriptions: Stripe reads and user-initiated cancellation.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::client::FullStripeClient;
use super::entitlement::{Entitlement, EntitlementStatus, EntitlementUpdate, Tier};
use super::manager::EntitlementManager;

/// The parts of a Stripe subscription the reconciler looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeSubscriptionData {
    pub id: String,
    pub customer_id: String,
    /// Raw Stripe status string, e.g. `"past_due"`.
    pub status: String,
    /// Unix seconds.
    pub current_period_end: Option<u64>,
    pub cancel_at_period_end: bool,
    /// `userId` from the subscription metadata, if checkout set it.
    pub user_id: Option<String>,
}

/// Stripe subscription operations.
#[async_trait]
pub trait StripeSubscriptionClient: Send + Sync {
    async fn get_subscription(&self, subscription_id: &str) -> Result<StripeSubscriptionData>;

    /// Cancel right away.
    async fn cancel_subscription(&self, subscription_id: &str) -> Result<()>;

    /// Set or clear `cancel_at_period_end`.
    async fn set_cancel_at_period_end(&self, subscription_id: &str, cancel: bool) -> Result<()>;
}

/// Handles cancellation requests from the settings page.
#[derive(Clone)]
pub struct SubscriptionManager {
    entitlements: EntitlementManager,
    client: Arc<dyn FullStripeClient>,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(entitlements: EntitlementManager, client: Arc<dyn FullStripeClient>) -> Self {
        Self {
            entitlements,
            client,
        }
    }

    /// Cancel the user's premium access.
    ///
    /// Without a Stripe subscription (lifetime grants, stale records) the
    /// user is simply set back to free. With `immediate` the subscription is
    /// canceled at Stripe and the user drops to free now; otherwise Stripe is
    /// told to cancel at period end and the user keeps premium until then.
    pub async fn cancel_subscription(&self, user_id: &str, immediate: bool) -> Result<Entitlement> {
        let current = self.entitlements.get_entitlement(user_id).await?;

        let Some(subscription_id) = current.billing_subscription_id.as_deref() else {
            tracing::info!(user_id = %user_id, "No Stripe subscription, downgrading locally");
            return self
                .entitlements
                .upsert_entitlement(
                    user_id,
                    EntitlementUpdate::new()
                        .tier(Tier::Free)
                        .current_period_end(None)
                        .cancel_at_period_end(false),
                )
                .await;
        };

        if immediate {
            self.client.cancel_subscription(subscription_id).await?;
            tracing::info!(
                user_id = %user_id,
                subscription_id = %subscription_id,
                "Subscription canceled immediately"
            );
            self.entitlements
                .upsert_entitlement(
                    user_id,
                    EntitlementUpdate::new()
                        .tier(Tier::Free)
                        .status(EntitlementStatus::Canceled)
                        .current_period_end(None)
                        .cancel_at_period_end(false),
                )
                .await
        } else {
            self.client
                .set_cancel_at_period_end(subscription_id, true)
                .await?;
            tracing::info!(
                user_id = %user_id,
                subscription_id = %subscription_id,
                "Subscription scheduled to cancel at period end"
            );
            self.entitlements
                .upsert_entitlement(user_id, EntitlementUpdate::new().cancel_at_period_end(true))
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::client::test::MockStripeClient;
    use crate::billing::entitlement::PaymentType;
    use crate::billing::storage::test::InMemoryEntitlementStore;

    fn setup() -> (InMemoryEntitlementStore, MockStripeClient, SubscriptionManager) {
        let store = InMemoryEntitlementStore::new();
        let client = MockStripeClient::new();
        let manager = SubscriptionManager::new(
            EntitlementManager::new(Arc::new(store.clone())),
            Arc::new(client.clone()),
        );
        (store, client, manager)
    }

    fn recurring_premium() -> Entitlement {
        Entitlement {
            tier: Tier::Premium,
            billing_account_id: Some("cus_1".to_string()),
            billing_subscription_id: Some("sub_1".to_string()),
            payment_type: Some(PaymentType::Recurring),
            status: Some(EntitlementStatus::Active),
            current_period_end: Some(1_900_000_000),
            cancel_at_period_end: false,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn test_cancel_at_period_end_keeps_premium() {
        let (store, client, manager) = setup();
        store.seed_entitlement("u1", recurring_premium()).await;

        let after = manager.cancel_subscription("u1", false).await.unwrap();

        assert_eq!(after.tier, Tier::Premium);
        assert!(after.cancel_at_period_end);
        assert_eq!(after.current_period_end, Some(1_900_000_000));
        assert_eq!(client.period_end_cancellations(), vec!["sub_1".to_string()]);
        assert!(client.canceled_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_immediately_downgrades() {
        let (store, client, manager) = setup();
        store.seed_entitlement("u1", recurring_premium()).await;

        let after = manager.cancel_subscription("u1", true).await.unwrap();

        assert_eq!(after.tier, Tier::Free);
        assert_eq!(after.status, Some(EntitlementStatus::Canceled));
        assert_eq!(after.current_period_end, None);
        assert!(!after.cancel_at_period_end);
        assert_eq!(client.canceled_subscriptions(), vec!["sub_1".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_without_subscription_downgrades_locally() {
        let (store, client, manager) = setup();
        let mut lifetime = recurring_premium();
        lifetime.billing_subscription_id = None;
        lifetime.payment_type = Some(PaymentType::OneTime);
        lifetime.current_period_end = None;
        store.seed_entitlement("u1", lifetime).await;

        let after = manager.cancel_subscription("u1", false).await.unwrap();

        assert_eq!(after.tier, Tier::Free);
        assert_eq!(after.current_period_end, None);
        assert!(!after.cancel_at_period_end);
        assert!(client.canceled_subscriptions().is_empty());
        assert!(client.period_end_cancellations().is_empty());
    }

    #[tokio::test]
    async fn test_stripe_failure_leaves_entitlement_untouched() {
        let (store, client, manager) = setup();
        store.seed_entitlement("u1", recurring_premium()).await;
        client.fail_subscription_calls(true);

        assert!(manager.cancel_subscription("u1", true).await.is_err());
        assert_eq!(store.write_count(), 0);
    }
}
