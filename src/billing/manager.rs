//! Entitlement reads and idempotent upserts.

use crate::error::Result;
use crate::utils::now_unix;
use std::sync::Arc;

use super::entitlement::{Entitlement, EntitlementUpdate};
use super::error::BillingError;
use super::storage::EntitlementStore;

/// Owns every write to entitlements and the customer index.
#[derive(Clone)]
pub struct EntitlementManager {
    store: Arc<dyn EntitlementStore>,
    clock: fn() -> u64,
}

impl EntitlementManager {
    #[must_use]
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self {
            store,
            clock: now_unix,
        }
    }

    /// Replace the unix-seconds clock used for timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    /// The user's entitlement, or a fresh free record if none is stored.
    ///
    /// Never writes.
    pub async fn get_entitlement(&self, user_id: &str) -> Result<Entitlement> {
        let stored = self.store.get_entitlement(user_id).await?;
        Ok(stored.unwrap_or_else(|| Entitlement::new_free((self.clock)())))
    }

    /// Merge `update` into the stored record and write it back.
    ///
    /// `created_at` survives from the first write; `updated_at` is stamped
    /// now. When the update carries a customer id the reverse index is
    /// written after the entitlement. Either write failing returns
    /// [`BillingError::EntitlementWriteFailed`].
    pub async fn upsert_entitlement(
        &self,
        user_id: &str,
        update: EntitlementUpdate,
    ) -> Result<Entitlement> {
        let write_failed = |e: crate::error::ListwiseError| BillingError::EntitlementWriteFailed {
            user_id: user_id.to_string(),
            message: e.to_string(),
        };

        let now = (self.clock)();
        let existing = self
            .store
            .get_entitlement(user_id)
            .await
            .map_err(write_failed)?
            .unwrap_or_else(|| Entitlement::new_free(now));

        let merged = update.apply_to(existing, now);

        self.store
            .save_entitlement(user_id, &merged)
            .await
            .map_err(write_failed)?;

        if let Some(customer_id) = &update.billing_account_id {
            self.store
                .link_customer(customer_id, user_id)
                .await
                .map_err(write_failed)?;
        }

        tracing::debug!(
            user_id = %user_id,
            tier = ?merged.tier,
            status = ?merged.status,
            "Entitlement updated"
        );

        Ok(merged)
    }

    /// Find the user an event belongs to.
    ///
    /// The `userId` from metadata wins; otherwise the customer index is consulted.
    pub async fn resolve_user(
        &self,
        metadata_user_id: Option<&str>,
        customer_id: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(user_id) = metadata_user_id.filter(|id| !id.is_empty()) {
            return Ok(Some(user_id.to_string()));
        }

        match customer_id.filter(|id| !id.is_empty()) {
            Some(customer_id) => self.store.find_user_by_customer(customer_id).await,
            None => Ok(None),
        }
    }
}
