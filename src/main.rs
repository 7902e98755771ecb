use anyhow::Context;
use std::sync::Arc;

use listwise::auth::JwtIdentityProvider;
use listwise::billing::{
    DocumentEntitlementStore, EntitlementManager, InMemoryDocumentStore, LiveStripeClient,
};
use listwise::todos::InMemoryTodoCounter;
use listwise::{App, AppContext, ConfigBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigBuilder::new()
        .from_env()
        .build()
        .context("invalid configuration")?;
    listwise::init_tracing_with_config(&config);

    let stripe_key = config
        .billing
        .stripe_secret_key
        .clone()
        .context("STRIPE_SECRET_KEY is required")?;
    let stripe = LiveStripeClient::with_default_config(stripe_key)?;
    if stripe.is_test_mode() {
        tracing::warn!("Stripe is in test mode");
    }

    // Entitlements and todo counts live in process memory until a document
    // database backend is wired in.
    let store = DocumentEntitlementStore::new(InMemoryDocumentStore::new());
    let entitlements = EntitlementManager::new(Arc::new(store));
    let todos = InMemoryTodoCounter::new();

    let context = AppContext::new(
        &config.billing,
        entitlements,
        Arc::new(stripe),
        Arc::new(todos),
    )?;
    let provider = JwtIdentityProvider::from_config(&config.auth)?;

    App::new(config, context, provider).serve().await?;
    Ok(())
}
