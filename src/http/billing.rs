use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use serde::Deserialize;
use std::marker::PhantomData;

use super::response::JsonResponse;
use super::routes::RouteModule;
use crate::app::AppContext;
use crate::auth::{AuthProvider, AuthUser, Identity};
use crate::billing::{
    CheckoutReturn, CheckoutReturnQuery, CheckoutSession, Entitlement, Plan, PortalSession, VerifyCheckoutResult,
};
use crate::error::ListwiseError;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCheckoutRequest {
    /// `monthly` or `one-time`.
    pub plan: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyCheckoutRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelSubscriptionRequest {
    #[serde(default)]
    pub immediate: bool,
}

/// Subscription, checkout and portal routes for the signed-in user.
pub struct BillingRoutes<P> {
    _provider: PhantomData<P>,
}

impl<P> BillingRoutes<P> {
    pub fn new() -> Self {
        Self {
            _provider: PhantomData,
        }
    }
}

impl<P> Default for BillingRoutes<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> RouteModule for BillingRoutes<P>
where
    P: AuthProvider<User = Identity>,
{
    fn routes(&self) -> Router<AppContext> {
        Router::new()
            .route("/subscription", get(get_subscription::<P>))
            .route("/subscription/cancel", post(cancel_subscription::<P>))
            .route("/checkout", post(create_checkout::<P>))
            .route("/checkout/verify", post(verify_checkout::<P>))
            .route("/checkout/return", get(checkout_return::<P>))
            .route("/billing/portal", post(create_portal::<P>))
    }

    fn prefix(&self) -> Option<&str> {
        Some("/api")
    }
}

async fn get_subscription<P>(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser<P>,
) -> JsonResponse<Entitlement>
where
    P: AuthProvider<User = Identity>,
{
    Ok(Json(ctx.entitlements.get_entitlement(&user.user_id).await?))
}

async fn create_checkout<P>(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser<P>,
    Json(request): Json<CreateCheckoutRequest>,
) -> JsonResponse<CheckoutSession>
where
    P: AuthProvider<User = Identity>,
{
    let plan: Plan = request.plan.parse()?;
    let session = ctx
        .checkout
        .create_checkout_session(&user.user_id, user.email.as_deref(), plan)
        .await?;
    Ok(Json(session))
}

async fn verify_checkout<P>(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser<P>,
    Json(request): Json<VerifyCheckoutRequest>,
) -> JsonResponse<VerifyCheckoutResult>
where
    P: AuthProvider<User = Identity>,
{
    if request.session_id.trim().is_empty() {
        return Err(ListwiseError::bad_request("session_id is required"));
    }

    let result = ctx
        .checkout
        .verify_checkout_session(&user.user_id, &request.session_id)
        .await?;
    Ok(Json(result))
}

async fn checkout_return<P>(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser<P>,
    Query(query): Query<CheckoutReturnQuery>,
) -> JsonResponse<CheckoutReturn>
where
    P: AuthProvider<User = Identity>,
{
    let result = ctx.checkout_return.run(&user.user_id, &query).await?;
    Ok(Json(result))
}

async fn cancel_subscription<P>(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser<P>,
    request: Option<Json<CancelSubscriptionRequest>>,
) -> JsonResponse<Entitlement>
where
    P: AuthProvider<User = Identity>,
{
    let immediate = request.is_some_and(|Json(request)| request.immediate);
    let entitlement = ctx
        .subscriptions
        .cancel_subscription(&user.user_id, immediate)
        .await?;
    Ok(Json(entitlement))
}

async fn create_portal<P>(
    State(ctx): State<AppContext>,
    AuthUser(user): AuthUser<P>,
) -> JsonResponse<PortalSession>
where
    P: AuthProvider<User = Identity>,
{
    Ok(Json(ctx.portal.create_portal_session(&user.user_id).await?))
}
