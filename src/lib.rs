//! Listwise - billing backend for the Listwise todo app
//!
//! Users start on the free tier with a capped number of todos. Premium is
//! bought through Stripe Checkout, either as a monthly subscription or as a
//! one-time lifetime purchase, and is recorded as a per-user entitlement.
//!
//! # Features
//!
//! - **Entitlements**: one record per user, merged idempotently and indexed
//!   by Stripe customer
//! - **Webhooks**: signed Stripe deliveries reconciled into entitlements
//! - **Checkout**: hosted checkout, customer portal, cancellation, and a
//!   verification fallback for when the webhook is late
//! - **Usage**: the free-tier todo limit
//! - **Auth**: bearer identity tokens verified with a shared secret
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use listwise::{App, AppContext, ConfigBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigBuilder::new().from_env().build()?;
//!     listwise::init_tracing_with_config(&config);
//!
//!     // let context = AppContext::new(&config.billing, entitlements, stripe, todos)?;
//!     // App::new(config, context, provider).serve().await?;
//!     Ok(())
//! }
//! ```

mod app;
pub mod auth;
pub mod billing;
mod config;
mod core;
mod error;
pub mod health;
pub mod http;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
pub mod todos;
mod utils;

// Re-exports for public API
pub use app::AppContext;
pub use config::{AuthConfig, BillingConfig, Config, ConfigBuilder, LoggingConfig, ServerConfig};
pub use core::App;
pub use error::{ErrorResponse, ListwiseError, Result};
pub use health::{HealthResponse, HealthStatus};
pub use utils::now_unix;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "listwise=debug")
/// - `LISTWISE_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("LISTWISE_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    install_subscriber(env_filter, json_logs);
}

/// Initialize tracing from configuration
///
/// `RUST_LOG` still wins over `logging.level` when set.
pub fn init_tracing_with_config(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    install_subscriber(env_filter, config.logging.json);
}

fn install_subscriber(env_filter: EnvFilter, json: bool) {
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(e) = result {
        eprintln!("Tracing already initialized: {}", e);
    }
}
