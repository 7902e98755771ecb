//! HTTP routes for the billing API.
//!
//! Routes are grouped into [`RouteModule`]s and mounted under `/api` by
//! [`App`](crate::App). Authenticated routes take the caller from
//! [`AuthUser`](crate::auth::AuthUser).

pub mod billing;
pub mod response;
pub mod routes;
pub mod todos;
pub mod webhook;

pub use billing::{BillingRoutes, CancelSubscriptionRequest, CreateCheckoutRequest, VerifyCheckoutRequest};
pub use response::{JsonResponse, WebhookReceived};
pub use routes::RouteModule;
pub use todos::TodoRoutes;
pub use webhook::WebhookRoutes;
