//! The per-user entitlement record and partial updates to it.

use serde::{Deserialize, Serialize};

/// Access tier. `Premium` is the only flag the rest of the app checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    #[default]
    Free,
    Premium,
}

/// How a premium grant was paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentType {
    /// Lifetime purchase. Never expires, nothing to cancel at Stripe.
    OneTime,
    /// Monthly subscription.
    Recurring,
}

impl PaymentType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneTime => "one-time",
            Self::Recurring => "recurring",
        }
    }
}

/// Subscription status mirrored from Stripe. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementStatus {
    Active,
    Canceled,
    PastDue,
    Trialing,
    Unpaid,
}

impl EntitlementStatus {
    /// Map a Stripe subscription status onto the statuses we store.
    ///
    /// `incomplete`, `paused` and anything unrecognised become `Active`;
    /// `incomplete_expired` becomes `Canceled`. This errs on the side of
    /// keeping users' access.
    #[must_use]
    pub fn from_stripe(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "canceled" => Self::Canceled,
            "past_due" => Self::PastDue,
            "trialing" => Self::Trialing,
            "unpaid" => Self::Unpaid,
            "incomplete" => Self::Active,
            "incomplete_expired" => Self::Canceled,
            "paused" => Self::Active,
            _ => Self::Active,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Canceled => "canceled",
            Self::PastDue => "past_due",
            Self::Trialing => "trialing",
            Self::Unpaid => "unpaid",
        }
    }
}

impl std::fmt::Display for EntitlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user's subscription tier and billing linkage.
///
/// Stored at `users/{user_id}/subscription/current`. A missing record reads
/// as [`Entitlement::new_free`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    #[serde(default)]
    pub tier: Tier,
    /// Stripe customer id (`cus_...`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_account_id: Option<String>,
    /// Stripe subscription id (`sub_...`), recurring grants only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_type: Option<PaymentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EntitlementStatus>,
    /// Unix seconds. `None` for one-time and free users.
    #[serde(default)]
    pub current_period_end: Option<u64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// Unix seconds, set by the first write.
    pub created_at: u64,
    /// Unix seconds, set by every write.
    pub updated_at: u64,
}

impl Entitlement {
    /// A fresh free-tier record with both timestamps at `now`.
    #[must_use]
    pub fn new_free(now: u64) -> Self {
        Self {
            tier: Tier::Free,
            billing_account_id: None,
            billing_subscription_id: None,
            payment_type: None,
            status: None,
            current_period_end: None,
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_premium(&self) -> bool {
        self.tier == Tier::Premium
    }
}

/// Fields to change on an [`Entitlement`]. `None` leaves the stored value alone.
///
/// `current_period_end` is doubly optional: `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitlementUpdate {
    pub tier: Option<Tier>,
    pub billing_account_id: Option<String>,
    pub billing_subscription_id: Option<String>,
    pub payment_type: Option<PaymentType>,
    pub status: Option<EntitlementStatus>,
    pub current_period_end: Option<Option<u64>>,
    pub cancel_at_period_end: Option<bool>,
}

impl EntitlementUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    /// Empty ids are treated as unset.
    #[must_use]
    pub fn billing_account_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.billing_account_id = (!id.is_empty()).then_some(id);
        self
    }

    /// Empty ids are treated as unset.
    #[must_use]
    pub fn billing_subscription_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.billing_subscription_id = (!id.is_empty()).then_some(id);
        self
    }

    #[must_use]
    pub fn payment_type(mut self, payment_type: PaymentType) -> Self {
        self.payment_type = Some(payment_type);
        self
    }

    #[must_use]
    pub fn status(mut self, status: EntitlementStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn current_period_end(mut self, end: Option<u64>) -> Self {
        self.current_period_end = Some(end);
        self
    }

    #[must_use]
    pub fn cancel_at_period_end(mut self, flag: bool) -> Self {
        self.cancel_at_period_end = Some(flag);
        self
    }

    /// Combine two updates, `other` winning where both set a field.
    #[must_use]
    pub fn merge(mut self, other: EntitlementUpdate) -> Self {
        if other.tier.is_some() {
            self.tier = other.tier;
        }
        if other.billing_account_id.is_some() {
            self.billing_account_id = other.billing_account_id;
        }
        if other.billing_subscription_id.is_some() {
            self.billing_subscription_id = other.billing_subscription_id;
        }
        if other.payment_type.is_some() {
            self.payment_type = other.payment_type;
        }
        if other.status.is_some() {
            self.status = other.status;
        }
        if other.current_period_end.is_some() {
            self.current_period_end = other.current_period_end;
        }
        if other.cancel_at_period_end.is_some() {
            self.cancel_at_period_end = other.cancel_at_period_end;
        }
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply onto `existing`, keeping its `created_at` and stamping `updated_at`.
    #[must_use]
    pub fn apply_to(&self, mut existing: Entitlement, now: u64) -> Entitlement {
        if let Some(tier) = self.tier {
            existing.tier = tier;
        }
        if let Some(id) = &self.billing_account_id {
            existing.billing_account_id = Some(id.clone());
        }
        if let Some(id) = &self.billing_subscription_id {
            existing.billing_subscription_id = Some(id.clone());
        }
        if let Some(payment_type) = self.payment_type {
            existing.payment_type = Some(payment_type);
        }
        if let Some(status) = self.status {
            existing.status = Some(status);
        }
        if let Some(end) = self.current_period_end {
            existing.current_period_end = end;
        }
        if let Some(flag) = self.cancel_at_period_end {
            existing.cancel_at_period_end = flag;
        }
        existing.updated_at = now;
        existing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping_table() {
        let cases = [
            ("active", EntitlementStatus::Active),
            ("canceled", EntitlementStatus::Canceled),
            ("past_due", EntitlementStatus::PastDue),
            ("trialing", EntitlementStatus::Trialing),
            ("unpaid", EntitlementStatus::Unpaid),
            ("incomplete", EntitlementStatus::Active),
            ("incomplete_expired", EntitlementStatus::Canceled),
            ("paused", EntitlementStatus::Active),
        ];
        for (stripe, expected) in cases {
            assert_eq!(EntitlementStatus::from_stripe(stripe), expected, "{stripe}");
        }
    }

    #[test]
    fn test_unknown_status_defaults_to_active() {
        assert_eq!(
            EntitlementStatus::from_stripe("some_future_status"),
            EntitlementStatus::Active
        );
        assert_eq!(EntitlementStatus::from_stripe(""), EntitlementStatus::Active);
    }

    #[test]
    fn test_apply_preserves_created_at_and_untouched_fields() {
        let existing = Entitlement {
            tier: Tier::Premium,
            billing_account_id: Some("cus_1".to_string()),
            billing_subscription_id: Some("sub_1".to_string()),
            payment_type: Some(PaymentType::Recurring),
            status: Some(EntitlementStatus::Active),
            current_period_end: Some(2_000),
            cancel_at_period_end: false,
            created_at: 100,
            updated_at: 100,
        };

        let updated = EntitlementUpdate::new()
            .cancel_at_period_end(true)
            .apply_to(existing.clone(), 500);

        assert_eq!(updated.created_at, 100);
        assert_eq!(updated.updated_at, 500);
        assert!(updated.cancel_at_period_end);
        assert_eq!(updated.tier, Tier::Premium);
        assert_eq!(updated.billing_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(updated.current_period_end, Some(2_000));
    }

    #[test]
    fn test_period_end_can_be_cleared() {
        let mut existing = Entitlement::new_free(1);
        existing.current_period_end = Some(99);

        let untouched = EntitlementUpdate::new().apply_to(existing.clone(), 2);
        assert_eq!(untouched.current_period_end, Some(99));

        let cleared = EntitlementUpdate::new()
            .current_period_end(None)
            .apply_to(existing, 2);
        assert_eq!(cleared.current_period_end, None);
    }

    #[test]
    fn test_empty_ids_do_not_clobber() {
        let update = EntitlementUpdate::new()
            .billing_account_id("")
            .billing_subscription_id("");
        assert!(update.is_empty());

        let mut existing = Entitlement::new_free(1);
        existing.billing_account_id = Some("cus_1".to_string());
        let after = update.apply_to(existing, 2);
        assert_eq!(after.billing_account_id.as_deref(), Some("cus_1"));
    }

    #[test]
    fn test_merge_prefers_later_fields() {
        let base = EntitlementUpdate::new()
            .tier(Tier::Premium)
            .status(EntitlementStatus::Active);
        let details = EntitlementUpdate::new()
            .status(EntitlementStatus::Trialing)
            .current_period_end(Some(42));

        let merged = base.merge(details);
        assert_eq!(merged.tier, Some(Tier::Premium));
        assert_eq!(merged.status, Some(EntitlementStatus::Trialing));
        assert_eq!(merged.current_period_end, Some(Some(42)));
    }

    #[test]
    fn test_serialized_shape() {
        let mut entitlement = Entitlement::new_free(10);
        entitlement.tier = Tier::Premium;
        entitlement.payment_type = Some(PaymentType::OneTime);
        entitlement.status = Some(EntitlementStatus::PastDue);

        let json = serde_json::to_value(&entitlement).unwrap();
        assert_eq!(json["tier"], "PREMIUM");
        assert_eq!(json["payment_type"], "one-time");
        assert_eq!(json["status"], "past_due");
        assert_eq!(json["current_period_end"], serde_json::Value::Null);
        assert!(json.get("billing_account_id").is_none());
    }
}
