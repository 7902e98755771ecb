use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};

use super::response::{JsonResponse, WebhookReceived};
use super::routes::RouteModule;
use crate::app::AppContext;

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// `POST /stripe/webhook`, authenticated by signature rather than by token.
pub struct WebhookRoutes;

impl RouteModule for WebhookRoutes {
    fn routes(&self) -> Router<AppContext> {
        Router::new().route("/stripe/webhook", post(stripe_webhook))
    }

    fn prefix(&self) -> Option<&str> {
        Some("/api")
    }
}

/// Verify and apply one Stripe delivery.
///
/// The body is taken raw; the signature covers the exact bytes sent.
/// Dropped and unhandled events are still acknowledged, write failures are
/// not, so Stripe retries them.
async fn stripe_webhook(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    body: Bytes,
) -> JsonResponse<WebhookReceived> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    ctx.webhooks.process(&body, signature).await?;
    Ok(Json(WebhookReceived::ok()))
}
