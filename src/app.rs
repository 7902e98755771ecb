use std::sync::Arc;

use crate::billing::{
    CheckoutConfig, CheckoutManager, CheckoutReturnFlow, CustomerManager, EntitlementManager,
    FullStripeClient, PortalManager, Reconciler, SubscriptionManager, WebhookHandler,
};
use crate::config::BillingConfig;
use crate::error::Result;
use crate::todos::{TodoCounter, UsageGate};

/// Shared state handed to every handler.
///
/// All services share one entitlement store and one Stripe client, so the
/// webhook path and the checkout return path update the same records.
#[derive(Clone)]
pub struct AppContext {
    pub entitlements: EntitlementManager,
    pub checkout: CheckoutManager,
    pub checkout_return: CheckoutReturnFlow,
    pub subscriptions: SubscriptionManager,
    pub portal: PortalManager,
    pub webhooks: WebhookHandler,
    pub usage: UsageGate,
}

impl AppContext {
    /// Wire the billing services from configuration.
    ///
    /// # Errors
    ///
    /// Fails when `config.base_url` is not an absolute http(s) URL.
    pub fn new(
        config: &BillingConfig,
        entitlements: EntitlementManager,
        stripe: Arc<dyn FullStripeClient>,
        todos: Arc<dyn TodoCounter>,
    ) -> Result<Self> {
        let reconciler = Reconciler::new(entitlements.clone(), stripe.clone());
        let customers = CustomerManager::new(entitlements.clone(), stripe.clone());

        let checkout = CheckoutManager::new(
            reconciler.clone(),
            customers,
            stripe.clone(),
            CheckoutConfig::from_billing_config(config)?,
        );
        let checkout_return =
            CheckoutReturnFlow::new(checkout.clone(), entitlements.clone(), config.recheck_delay());

        let webhooks = WebhookHandler::new(
            reconciler,
            config.webhook_secret.clone(),
            config.unsigned_webhooks_allowed(),
        )
        .with_tolerance(config.signature_tolerance_secs);

        Ok(Self {
            subscriptions: SubscriptionManager::new(entitlements.clone(), stripe.clone()),
            portal: PortalManager::new(entitlements.clone(), stripe, config.base_url()),
            usage: UsageGate::new(entitlements.clone(), todos),
            entitlements,
            checkout,
            checkout_return,
            webhooks,
        })
    }
}
