//! Storage for entitlements and the Stripe customer index.
//!
//! The data lives in a document store with two collections:
//!
//! - `users/{user_id}/subscription/current`: the user's [`Entitlement`]
//! - `stripeCustomers/{customer_id}`: `{ "userId": ... }`, the reverse index
//!
//! Only the billing services write to either path.

use crate::error::{ListwiseError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::entitlement::Entitlement;
use super::error::BillingError;

/// Document path of a user's entitlement record.
#[must_use]
pub fn entitlement_path(user_id: &str) -> String {
    format!("users/{}/subscription/current", user_id)
}

/// Document path of the reverse index entry for a Stripe customer.
#[must_use]
pub fn customer_index_path(customer_id: &str) -> String {
    format!("stripeCustomers/{}", customer_id)
}

const INDEX_USER_FIELD: &str = "userId";

/// Persistence for entitlements and the customer → user index.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Load the stored entitlement, if the user has one.
    async fn get_entitlement(&self, user_id: &str) -> Result<Option<Entitlement>>;

    /// Write the full entitlement record.
    async fn save_entitlement(&self, user_id: &str, entitlement: &Entitlement) -> Result<()>;

    /// Resolve a Stripe customer id to a user id.
    async fn find_user_by_customer(&self, customer_id: &str) -> Result<Option<String>>;

    /// Point a Stripe customer id at a user.
    async fn link_customer(&self, customer_id: &str, user_id: &str) -> Result<()>;
}

/// A minimal document database: JSON objects addressed by slash paths.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Set the given top-level fields, leaving other fields in place.
    async fn merge(&self, path: &str, fields: Map<String, Value>) -> Result<()>;
}

/// [`EntitlementStore`] laid out over a [`DocumentStore`].
#[derive(Debug, Clone, Default)]
pub struct DocumentEntitlementStore<D> {
    docs: D,
}

impl<D: DocumentStore> DocumentEntitlementStore<D> {
    #[must_use]
    pub fn new(docs: D) -> Self {
        Self { docs }
    }

    pub fn documents(&self) -> &D {
        &self.docs
    }
}

#[async_trait]
impl<D: DocumentStore> EntitlementStore for DocumentEntitlementStore<D> {
    async fn get_entitlement(&self, user_id: &str) -> Result<Option<Entitlement>> {
        let path = entitlement_path(user_id);
        let Some(doc) = self.docs.get(&path).await? else {
            return Ok(None);
        };

        serde_json::from_value(doc).map(Some).map_err(|e| {
            BillingError::EntitlementReadFailed {
                key: path,
                message: e.to_string(),
            }
            .into()
        })
    }

    async fn save_entitlement(&self, user_id: &str, entitlement: &Entitlement) -> Result<()> {
        let fields = match serde_json::to_value(entitlement)? {
            Value::Object(fields) => fields,
            _ => return Err(ListwiseError::internal("entitlement did not serialize to an object")),
        };
        self.docs.merge(&entitlement_path(user_id), fields).await
    }

    async fn find_user_by_customer(&self, customer_id: &str) -> Result<Option<String>> {
        let doc = self.docs.get(&customer_index_path(customer_id)).await?;
        Ok(doc
            .as_ref()
            .and_then(|d| d.get(INDEX_USER_FIELD))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string))
    }

    async fn link_customer(&self, customer_id: &str, user_id: &str) -> Result<()> {
        let mut fields = Map::new();
        fields.insert(INDEX_USER_FIELD.to_string(), Value::String(user_id.to_string()));
        self.docs.merge(&customer_index_path(customer_id), fields).await
    }
}

/// Process-local document store.
///
/// Cheap to clone; clones share the same documents.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDocumentStore {
    docs: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths of every stored document, sorted.
    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.docs.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        Ok(self.docs.read().await.get(path).cloned())
    }

    async fn merge(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        let mut docs = self.docs.write().await;
        let doc = docs
            .entry(path.to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        match doc {
            Value::Object(existing) => existing.extend(fields),
            other => *other = Value::Object(fields),
        }
        Ok(())
    }
}

/// Test doubles for entitlement storage.
#[cfg(any(test, feature = "test-helpers"))]
pub mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory entitlement store with switchable failures and write counting.
    #[derive(Clone, Default)]
    pub struct InMemoryEntitlementStore {
        inner: DocumentEntitlementStore<InMemoryDocumentStore>,
        flags: Arc<Flags>,
    }

    #[derive(Default)]
    struct Flags {
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
        fail_index_writes: AtomicBool,
        writes: AtomicUsize,
    }

    impl InMemoryEntitlementStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every read fail.
        pub fn fail_reads(&self, fail: bool) {
            self.flags.fail_reads.store(fail, Ordering::SeqCst);
        }

        /// Make entitlement writes fail.
        pub fn fail_writes(&self, fail: bool) {
            self.flags.fail_writes.store(fail, Ordering::SeqCst);
        }

        /// Make customer index writes fail.
        pub fn fail_index_writes(&self, fail: bool) {
            self.flags.fail_index_writes.store(fail, Ordering::SeqCst);
        }

        /// Number of successful writes to either collection.
        pub fn write_count(&self) -> usize {
            self.flags.writes.load(Ordering::SeqCst)
        }

        /// Seed an entitlement without counting it as a write.
        pub async fn seed_entitlement(&self, user_id: &str, entitlement: Entitlement) {
            self.inner
                .save_entitlement(user_id, &entitlement)
                .await
                .expect("seeding in-memory store");
        }

        /// Seed an index entry without counting it as a write.
        pub async fn seed_customer(&self, customer_id: &str, user_id: &str) {
            self.inner
                .link_customer(customer_id, user_id)
                .await
                .expect("seeding in-memory store");
        }

        /// Every stored document path.
        pub async fn paths(&self) -> Vec<String> {
            self.inner.documents().paths().await
        }

        fn check(flag: &AtomicBool, what: &str) -> Result<()> {
            if flag.load(Ordering::SeqCst) {
                Err(ListwiseError::service_unavailable(format!("{} unavailable", what)))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl EntitlementStore for InMemoryEntitlementStore {
        async fn get_entitlement(&self, user_id: &str) -> Result<Option<Entitlement>> {
            Self::check(&self.flags.fail_reads, "entitlement store")?;
            self.inner.get_entitlement(user_id).await
        }

        async fn save_entitlement(&self, user_id: &str, entitlement: &Entitlement) -> Result<()> {
            Self::check(&self.flags.fail_writes, "entitlement store")?;
            self.inner.save_entitlement(user_id, entitlement).await?;
            self.flags.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn find_user_by_customer(&self, customer_id: &str) -> Result<Option<String>> {
            Self::check(&self.flags.fail_reads, "customer index")?;
            self.inner.find_user_by_customer(customer_id).await
        }

        async fn link_customer(&self, customer_id: &str, user_id: &str) -> Result<()> {
            Self::check(&self.flags.fail_index_writes, "customer index")?;
            self.inner.link_customer(customer_id, user_id).await?;
            self.flags.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
