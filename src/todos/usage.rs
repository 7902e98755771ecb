//! The todo creation limit per tier.

use serde::Serialize;
use std::sync::Arc;

use super::TodoCounter;
use crate::billing::{EntitlementManager, Tier};

/// Free users may hold this many todos.
pub const FREE_TODO_LIMIT: u64 = 10;

/// What to do when a count or entitlement read fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadErrorPolicy {
    /// Let the user create the todo.
    Allow,
    /// Refuse until the read succeeds.
    Deny,
}

/// Policy applied to every read failure in the gate.
pub const ON_READ_ERROR: ReadErrorPolicy = ReadErrorPolicy::Allow;

/// Maximum todos for a tier; `None` is unlimited.
#[must_use]
pub fn max_todos(tier: Tier) -> Option<u64> {
    match tier {
        Tier::Free => Some(FREE_TODO_LIMIT),
        Tier::Premium => None,
    }
}

/// Answer to "may this user create another todo?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TodoLimitCheck {
    pub can_create: bool,
    pub current_count: u64,
    /// `null` when unlimited.
    pub max_todos: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TodoLimitCheck {
    fn evaluate(current_count: u64, max_todos: Option<u64>) -> Self {
        let can_create = max_todos.is_none_or(|max| current_count < max);
        let message = match (can_create, max_todos) {
            (false, Some(max)) => Some(format!(
                "You've reached your limit of {} todos. Please upgrade to create more.",
                max
            )),
            _ => None,
        };
        Self {
            can_create,
            current_count,
            max_todos,
            message,
        }
    }

    fn on_read_error(policy: ReadErrorPolicy, current_count: u64) -> Self {
        match policy {
            ReadErrorPolicy::Allow => Self {
                can_create: true,
                current_count,
                max_todos: None,
                message: None,
            },
            ReadErrorPolicy::Deny => Self {
                can_create: false,
                current_count,
                max_todos: None,
                message: Some("Unable to check your todo limit right now. Please try again.".to_string()),
            },
        }
    }
}

/// Combines the todo count with the user's tier.
#[derive(Clone)]
pub struct UsageGate {
    entitlements: EntitlementManager,
    counter: Arc<dyn TodoCounter>,
    policy: ReadErrorPolicy,
}

impl UsageGate {
    #[must_use]
    pub fn new(entitlements: EntitlementManager, counter: Arc<dyn TodoCounter>) -> Self {
        Self {
            entitlements,
            counter,
            policy: ON_READ_ERROR,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ReadErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Never fails; read errors are resolved by the gate's policy.
    pub async fn check_todo_limit(&self, user_id: &str) -> TodoLimitCheck {
        let count = match self.counter.count(user_id).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, policy = ?self.policy, "Todo count unavailable");
                return TodoLimitCheck::on_read_error(self.policy, 0);
            }
        };

        match self.entitlements.get_entitlement(user_id).await {
            Ok(entitlement) => TodoLimitCheck::evaluate(count, max_todos(entitlement.tier)),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, policy = ?self.policy, "Entitlement unavailable for todo limit");
                TodoLimitCheck::on_read_error(self.policy, count)
            }
        }
    }
}
