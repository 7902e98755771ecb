use axum::Json;
use serde::Serialize;

use crate::error::ListwiseError;

/// Handler result carrying a JSON body.
pub type JsonResponse<T> = Result<Json<T>, ListwiseError>;

/// Acknowledgement returned to Stripe for every accepted delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WebhookReceived {
    pub received: bool,
}

impl WebhookReceived {
    pub fn ok() -> Self {
        Self { received: true }
    }
}
