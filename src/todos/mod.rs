//! Todo counts and the creation limit.
//!
//! Todo CRUD lives elsewhere; this crate only needs how many items a user
//! has, to decide whether they may add another.

pub mod usage;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub use usage::{FREE_TODO_LIMIT, ON_READ_ERROR, ReadErrorPolicy, TodoLimitCheck, UsageGate};

/// Read access to a user's todo collection size.
#[async_trait]
pub trait TodoCounter: Send + Sync {
    async fn count(&self, user_id: &str) -> Result<u64>;
}

/// Counter backed by a map, for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTodoCounter {
    counts: Arc<RwLock<HashMap<String, u64>>>,
}

impl InMemoryTodoCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_count(&self, user_id: &str, count: u64) {
        self.counts.write().await.insert(user_id.to_string(), count);
    }
}

#[async_trait]
impl TodoCounter for InMemoryTodoCounter {
    async fn count(&self, user_id: &str) -> Result<u64> {
        Ok(self.counts.read().await.get(user_id).copied().unwrap_or(0))
    }
}
