//! Stripe customer lookup and creation.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::client::FullStripeClient;
use super::entitlement::EntitlementUpdate;
use super::manager::EntitlementManager;

/// Request to create a Stripe customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCustomerRequest {
    pub email: String,
    /// Stored as `userId` in the customer metadata.
    pub user_id: String,
}

/// Stripe customer operations.
#[async_trait]
pub trait StripeCustomerClient: Send + Sync {
    /// Create a customer and return its id.
    async fn create_customer(&self, request: CreateCustomerRequest) -> Result<String>;

    /// Whether the customer exists and has not been deleted.
    async fn customer_exists(&self, customer_id: &str) -> Result<bool>;
}

/// Links users to Stripe customers.
#[derive(Clone)]
pub struct CustomerManager {
    entitlements: EntitlementManager,
    client: Arc<dyn FullStripeClient>,
}

impl CustomerManager {
    #[must_use]
    pub fn new(entitlements: EntitlementManager, client: Arc<dyn FullStripeClient>) -> Self {
        Self {
            entitlements,
            client,
        }
    }

    /// The user's Stripe customer id, creating the customer on first use.
    ///
    /// A stored id is reused only while Stripe still knows it. New ids are
    /// written to the entitlement record, which also fills the customer index.
    pub async fn get_or_create_customer(&self, user_id: &str, email: &str) -> Result<String> {
        let entitlement = self.entitlements.get_entitlement(user_id).await?;

        if let Some(customer_id) = entitlement.billing_account_id.as_deref() {
            match self.client.customer_exists(customer_id).await {
                Ok(true) => return Ok(customer_id.to_string()),
                Ok(false) => {
                    tracing::info!(
                        user_id = %user_id,
                        customer_id = %customer_id,
                        "Stored Stripe customer no longer exists, creating a new one"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        customer_id = %customer_id,
                        error = %e,
                        "Could not confirm Stripe customer, creating a new one"
                    );
                }
            }
        }

        let customer_id = self
            .client
            .create_customer(CreateCustomerRequest {
                email: email.to_string(),
                user_id: user_id.to_string(),
            })
            .await?;

        self.entitlements
            .upsert_entitlement(
                user_id,
                EntitlementUpdate::new().billing_account_id(customer_id.clone()),
            )
            .await?;

        tracing::info!(user_id = %user_id, customer_id = %customer_id, "Created Stripe customer");
        Ok(customer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::client::test::MockStripeClient;
    use crate::billing::entitlement::{Entitlement, Tier};
    use crate::billing::storage::test::InMemoryEntitlementStore;

    fn setup() -> (InMemoryEntitlementStore, MockStripeClient, CustomerManager) {
        let store = InMemoryEntitlementStore::new();
        let client = MockStripeClient::new();
        let entitlements = EntitlementManager::new(Arc::new(store.clone()));
        let manager = CustomerManager::new(entitlements, Arc::new(client.clone()));
        (store, client, manager)
    }

    #[tokio::test]
    async fn test_creates_and_links_new_customer() {
        let (store, client, manager) = setup();

        let customer_id = manager
            .get_or_create_customer("u1", "u1@example.com")
            .await
            .unwrap();

        assert!(customer_id.starts_with("cus_mock_"));
        assert_eq!(client.created_customers().len(), 1);
        assert_eq!(client.created_customers()[0].user_id, "u1");

        let entitlements = EntitlementManager::new(Arc::new(store.clone()));
        let stored = entitlements.get_entitlement("u1").await.unwrap();
        assert_eq!(stored.billing_account_id.as_deref(), Some(customer_id.as_str()));
        assert_eq!(stored.tier, Tier::Free);
        assert_eq!(
            entitlements
                .resolve_user(None, Some(&customer_id))
                .await
                .unwrap()
                .as_deref(),
            Some("u1")
        );
    }

    #[tokio::test]
    async fn test_reuses_existing_customer() {
        let (store, client, manager) = setup();
        let mut existing = Entitlement::new_free(1);
        existing.billing_account_id = Some("cus_existing".to_string());
        store.seed_entitlement("u1", existing).await;
        client.add_customer("cus_existing");

        let customer_id = manager
            .get_or_create_customer("u1", "u1@example.com")
            .await
            .unwrap();

        assert_eq!(customer_id, "cus_existing");
        assert!(client.created_customers().is_empty());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_replaces_deleted_customer() {
        let (store, client, manager) = setup();
        let mut existing = Entitlement::new_free(1);
        existing.billing_account_id = Some("cus_deleted".to_string());
        store.seed_entitlement("u1", existing).await;

        let customer_id = manager
            .get_or_create_customer("u1", "u1@example.com")
            .await
            .unwrap();

        assert_ne!(customer_id, "cus_deleted");
        assert_eq!(client.created_customers().len(), 1);
    }
}
