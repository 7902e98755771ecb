//! Turns Stripe state into entitlement updates.
//!
//! The pure functions here decide *what* a user's record should look like
//! after each kind of Stripe event; [`Reconciler`] resolves the extra reads
//! and writes them through [`EntitlementManager`]. The webhook handler and
//! the post-checkout verification both go through the same code, so whichever
//! runs first (or both) leaves the same record behind.

use crate::error::Result;
use std::sync::Arc;

use super::checkout::{CheckoutMode, CheckoutSessionDetails};
use super::client::FullStripeClient;
use super::entitlement::{Entitlement, EntitlementStatus, EntitlementUpdate, PaymentType, Tier};
use super::manager::EntitlementManager;
use super::subscription::StripeSubscriptionData;

/// Whether a subscription in this state grants premium.
///
/// Active or trialing subscriptions do, unless canceled outright. A
/// subscription flagged to cancel at period end keeps premium until Stripe
/// reports it ended.
#[must_use]
pub fn should_be_premium(stripe_status: &str, cancel_at_period_end: bool) -> bool {
    let is_active = matches!(stripe_status, "active" | "trialing");
    let is_immediately_canceled = stripe_status == "canceled" && !cancel_at_period_end;
    is_active && !is_immediately_canceled
}

/// Premium grant from a completed checkout.
#[must_use]
pub fn checkout_completed_update(mode: CheckoutMode, customer_id: &str) -> EntitlementUpdate {
    let payment_type = match mode {
        CheckoutMode::Subscription => PaymentType::Recurring,
        CheckoutMode::Payment => PaymentType::OneTime,
    };

    EntitlementUpdate::new()
        .tier(Tier::Premium)
        .billing_account_id(customer_id)
        .payment_type(payment_type)
        .status(EntitlementStatus::Active)
        .cancel_at_period_end(false)
}

/// Subscription details copied onto the record after a recurring checkout.
#[must_use]
pub fn subscription_details_update(sub: &StripeSubscriptionData) -> EntitlementUpdate {
    EntitlementUpdate::new()
        .billing_subscription_id(sub.id.clone())
        .status(EntitlementStatus::from_stripe(&sub.status))
        .current_period_end(sub.current_period_end)
        .cancel_at_period_end(sub.cancel_at_period_end)
}

/// Full mirror of a changed subscription, with the tier recomputed.
#[must_use]
pub fn subscription_changed_update(sub: &StripeSubscriptionData) -> EntitlementUpdate {
    let tier = if should_be_premium(&sub.status, sub.cancel_at_period_end) {
        Tier::Premium
    } else {
        Tier::Free
    };

    EntitlementUpdate::new()
        .tier(tier)
        .billing_subscription_id(sub.id.clone())
        .payment_type(PaymentType::Recurring)
        .status(EntitlementStatus::from_stripe(&sub.status))
        .current_period_end(sub.current_period_end)
        .cancel_at_period_end(sub.cancel_at_period_end)
}

/// Terminal downgrade after Stripe deletes the subscription.
#[must_use]
pub fn subscription_removed_update() -> EntitlementUpdate {
    EntitlementUpdate::new()
        .tier(Tier::Free)
        .status(EntitlementStatus::Canceled)
        .current_period_end(None)
        .cancel_at_period_end(false)
}

/// Lifetime grant from a successful one-off payment.
#[must_use]
pub fn one_time_payment_update(customer_id: &str) -> EntitlementUpdate {
    EntitlementUpdate::new()
        .tier(Tier::Premium)
        .billing_account_id(customer_id)
        .payment_type(PaymentType::OneTime)
        .status(EntitlementStatus::Active)
        .cancel_at_period_end(false)
}

/// Applies Stripe state to entitlements.
#[derive(Clone)]
pub struct Reconciler {
    entitlements: EntitlementManager,
    client: Arc<dyn FullStripeClient>,
}

impl Reconciler {
    #[must_use]
    pub fn new(entitlements: EntitlementManager, client: Arc<dyn FullStripeClient>) -> Self {
        Self {
            entitlements,
            client,
        }
    }

    pub fn entitlements(&self) -> &EntitlementManager {
        &self.entitlements
    }

    /// Grant premium for a paid checkout.
    ///
    /// The tier is written first. For subscription checkouts the
    /// subscription is then fetched to fill in its id, status and period;
    /// if that fetch fails the grant stands and the failure is only logged.
    pub async fn apply_checkout_completed(
        &self,
        user_id: &str,
        session: &CheckoutSessionDetails,
        customer_id: &str,
    ) -> Result<Entitlement> {
        let granted = self
            .entitlements
            .upsert_entitlement(user_id, checkout_completed_update(session.mode, customer_id))
            .await?;

        tracing::info!(
            user_id = %user_id,
            customer_id = %customer_id,
            session_id = %session.id,
            payment_type = ?granted.payment_type,
            "Premium granted from checkout"
        );

        let subscription_id = match (session.mode, session.subscription_id.as_deref()) {
            (CheckoutMode::Subscription, Some(id)) => id,
            _ => return Ok(granted),
        };

        let sub = match self.client.get_subscription(subscription_id).await {
            Ok(sub) => sub,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    subscription_id = %subscription_id,
                    error = %e,
                    "Could not fetch subscription details after checkout"
                );
                return Ok(granted);
            }
        };

        self.entitlements
            .upsert_entitlement(user_id, subscription_details_update(&sub))
            .await
    }

    pub async fn apply_subscription_changed(
        &self,
        user_id: &str,
        sub: &StripeSubscriptionData,
    ) -> Result<Entitlement> {
        let updated = self
            .entitlements
            .upsert_entitlement(user_id, subscription_changed_update(sub))
            .await?;

        if !updated.is_premium() {
            tracing::info!(user_id = %user_id, status = %sub.status, "Subscription ended, downgraded to free");
        } else if sub.cancel_at_period_end {
            tracing::info!(
                user_id = %user_id,
                current_period_end = ?sub.current_period_end,
                "Subscription will cancel at period end, premium kept until then"
            );
        } else {
            tracing::info!(user_id = %user_id, status = %sub.status, "Subscription active");
        }

        Ok(updated)
    }

    pub async fn apply_subscription_removed(&self, user_id: &str) -> Result<Entitlement> {
        let updated = self
            .entitlements
            .upsert_entitlement(user_id, subscription_removed_update())
            .await?;
        tracing::info!(user_id = %user_id, "Subscription deleted, downgraded to free");
        Ok(updated)
    }

    pub async fn apply_one_time_payment(&self, user_id: &str, customer_id: &str) -> Result<Entitlement> {
        let updated = self
            .entitlements
            .upsert_entitlement(user_id, one_time_payment_update(customer_id))
            .await?;
        tracing::info!(user_id = %user_id, customer_id = %customer_id, "Lifetime premium granted");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::checkout::PaymentStatus;
    use crate::billing::client::test::MockStripeClient;
    use crate::billing::storage::test::InMemoryEntitlementStore;

    fn subscription(status: &str, cancel_at_period_end: bool) -> StripeSubscriptionData {
        StripeSubscriptionData {
            id: "sub_1".to_string(),
            customer_id: "cus_1".to_string(),
            status: status.to_string(),
            current_period_end: Some(1_900_000_000),
            cancel_at_period_end,
            user_id: None,
        }
    }

    fn recurring_session() -> CheckoutSessionDetails {
        CheckoutSessionDetails {
            id: "cs_1".to_string(),
            customer_id: Some("cus_1".to_string()),
            mode: CheckoutMode::Subscription,
            payment_status: PaymentStatus::Paid,
            subscription_id: Some("sub_1".to_string()),
            user_id: Some("u1".to_string()),
        }
    }

    fn setup() -> (InMemoryEntitlementStore, MockStripeClient, Reconciler) {
        let store = InMemoryEntitlementStore::new();
        let client = MockStripeClient::new();
        let reconciler = Reconciler::new(
            EntitlementManager::new(Arc::new(store.clone())).with_clock(|| 1_000),
            Arc::new(client.clone()),
        );
        (store, client, reconciler)
    }

    #[test]
    fn test_should_be_premium_table() {
        assert!(should_be_premium("active", false));
        assert!(should_be_premium("active", true));
        assert!(should_be_premium("trialing", false));
        assert!(!should_be_premium("canceled", false));
        assert!(!should_be_premium("canceled", true));
        assert!(!should_be_premium("past_due", false));
        assert!(!should_be_premium("unpaid", false));
        assert!(!should_be_premium("incomplete", false));
        assert!(!should_be_premium("paused", false));
    }

    #[test]
    fn test_checkout_update_payment_type_follows_mode() {
        let recurring = checkout_completed_update(CheckoutMode::Subscription, "cus_1");
        assert_eq!(recurring.payment_type, Some(PaymentType::Recurring));

        let lifetime = checkout_completed_update(CheckoutMode::Payment, "cus_1");
        assert_eq!(lifetime.payment_type, Some(PaymentType::OneTime));
        assert_eq!(lifetime.tier, Some(Tier::Premium));
        assert_eq!(lifetime.status, Some(EntitlementStatus::Active));
        assert_eq!(lifetime.cancel_at_period_end, Some(false));
        assert_eq!(lifetime.billing_account_id.as_deref(), Some("cus_1"));
    }

    #[test]
    fn test_changed_update_mirrors_subscription() {
        let update = subscription_changed_update(&subscription("past_due", false));
        assert_eq!(update.tier, Some(Tier::Free));
        assert_eq!(update.status, Some(EntitlementStatus::PastDue));
        assert_eq!(update.payment_type, Some(PaymentType::Recurring));
        assert_eq!(update.current_period_end, Some(Some(1_900_000_000)));
        assert_eq!(update.billing_subscription_id.as_deref(), Some("sub_1"));
    }

    #[tokio::test]
    async fn test_recurring_checkout_is_enriched() {
        let (_store, client, reconciler) = setup();
        client.add_subscription(subscription("trialing", false));

        let result = reconciler
            .apply_checkout_completed("u1", &recurring_session(), "cus_1")
            .await
            .unwrap();

        assert_eq!(result.tier, Tier::Premium);
        assert_eq!(result.payment_type, Some(PaymentType::Recurring));
        assert_eq!(result.status, Some(EntitlementStatus::Trialing));
        assert_eq!(result.billing_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(result.current_period_end, Some(1_900_000_000));
    }

    #[tokio::test]
    async fn test_enrichment_failure_keeps_grant() {
        let (store, client, reconciler) = setup();
        client.fail_subscription_calls(true);

        let result = reconciler
            .apply_checkout_completed("u1", &recurring_session(), "cus_1")
            .await
            .unwrap();

        assert_eq!(result.tier, Tier::Premium);
        assert_eq!(result.status, Some(EntitlementStatus::Active));
        assert!(result.billing_subscription_id.is_none());

        let stored = reconciler.entitlements().get_entitlement("u1").await.unwrap();
        assert_eq!(stored, result);
        assert_eq!(
            store.paths().await,
            vec!["stripeCustomers/cus_1", "users/u1/subscription/current"]
        );
    }

    #[tokio::test]
    async fn test_grace_period_then_removal() {
        let (_store, _client, reconciler) = setup();
        reconciler
            .apply_subscription_changed("u1", &subscription("active", false))
            .await
            .unwrap();

        let grace = reconciler
            .apply_subscription_changed("u1", &subscription("active", true))
            .await
            .unwrap();
        assert_eq!(grace.tier, Tier::Premium);
        assert!(grace.cancel_at_period_end);

        let removed = reconciler.apply_subscription_removed("u1").await.unwrap();
        assert_eq!(removed.tier, Tier::Free);
        assert_eq!(removed.status, Some(EntitlementStatus::Canceled));
        assert_eq!(removed.current_period_end, None);
        assert!(!removed.cancel_at_period_end);
    }

    #[tokio::test]
    async fn test_immediate_cancellation_has_no_grace_period() {
        let (_store, _client, reconciler) = setup();
        reconciler
            .apply_subscription_changed("u1", &subscription("active", false))
            .await
            .unwrap();

        let canceled = reconciler
            .apply_subscription_changed("u1", &subscription("canceled", false))
            .await
            .unwrap();
        assert_eq!(canceled.tier, Tier::Free);
        assert_eq!(canceled.status, Some(EntitlementStatus::Canceled));
    }

    #[tokio::test]
    async fn test_unknown_status_is_stored_as_active() {
        let (_store, _client, reconciler) = setup();
        let result = reconciler
            .apply_subscription_changed("u1", &subscription("mystery_state", false))
            .await
            .unwrap();
        assert_eq!(result.status, Some(EntitlementStatus::Active));
        assert_eq!(result.tier, Tier::Free);
    }

    #[tokio::test]
    async fn test_every_event_kind_is_idempotent() {
        let (_store, client, reconciler) = setup();
        client.add_subscription(subscription("active", false));

        let first = reconciler
            .apply_checkout_completed("u1", &recurring_session(), "cus_1")
            .await
            .unwrap();
        let second = reconciler
            .apply_checkout_completed("u1", &recurring_session(), "cus_1")
            .await
            .unwrap();
        assert_eq!(first, second);

        let sub = subscription("active", true);
        let first = reconciler.apply_subscription_changed("u1", &sub).await.unwrap();
        let second = reconciler.apply_subscription_changed("u1", &sub).await.unwrap();
        assert_eq!(first, second);

        let first = reconciler.apply_subscription_removed("u1").await.unwrap();
        let second = reconciler.apply_subscription_removed("u1").await.unwrap();
        assert_eq!(first, second);

        let first = reconciler.apply_one_time_payment("u2", "cus_2").await.unwrap();
        let second = reconciler.apply_one_time_payment("u2", "cus_2").await.unwrap();
        assert_eq!(first, second);
    }
}
