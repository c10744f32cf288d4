//! Pure discount and eligibility logic for a single rule.
//!
//! Nothing here touches the store: the checks can run any number of times,
//! including as a dry-run, without recording usage.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Amount;
use crate::model::{DiscountPolicy, DiscountRule, DiscountType, OrderContext, ProductScope};

/// Why a rule cannot be applied to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IneligibleReason {
    Inactive,
    NotYetValid,
    Expired,
    UsageLimitExceeded,
    BelowMinimumOrderValue,
    ProductNotApplicable,
    CustomerLimitExceeded,
}

impl IneligibleReason {
    pub fn as_str(self) -> &'static str {
        match self {
            IneligibleReason::Inactive => "inactive",
            IneligibleReason::NotYetValid => "not-yet-valid",
            IneligibleReason::Expired => "expired",
            IneligibleReason::UsageLimitExceeded => "usage-limit-exceeded",
            IneligibleReason::BelowMinimumOrderValue => "below-minimum-order-value",
            IneligibleReason::ProductNotApplicable => "product-not-applicable",
            IneligibleReason::CustomerLimitExceeded => "customer-limit-exceeded",
        }
    }
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible(IneligibleReason),
}

impl Eligibility {
    pub fn is_eligible(self) -> bool {
        matches!(self, Eligibility::Eligible)
    }

    pub fn into_result(self) -> Result<(), IneligibleReason> {
        match self {
            Eligibility::Eligible => Ok(()),
            Eligibility::Ineligible(reason) => Err(reason),
        }
    }
}

impl DiscountPolicy {
    /// Discount granted on `order_value` under this policy.
    pub fn apply(self, order_value: Amount) -> Amount {
        if !order_value.is_positive() {
            return Amount::ZERO;
        }
        match self.kind {
            DiscountType::Percentage => order_value.percent(self.value),
            DiscountType::Fixed => self.value.min(order_value),
        }
    }
}

/// Discount `rule` grants on an order worth `order_value`.
pub fn calculate_discount(rule: &DiscountRule, order_value: Amount) -> Amount {
    rule.discount.apply(order_value)
}

/// Evaluate `rule` against an order at `now`.
///
/// Checks run in a fixed order and the first failure wins:
/// active flag, validity window, global usage limit, minimum order value,
/// product applicability, per-customer limit.
pub fn evaluate(
    rule: &DiscountRule,
    order: OrderContext<'_>,
    now: DateTime<Utc>,
    customer_usage_count: u32,
) -> Eligibility {
    use IneligibleReason::*;

    if !rule.is_active {
        return Eligibility::Ineligible(Inactive);
    }
    if now < rule.start_date {
        return Eligibility::Ineligible(NotYetValid);
    }
    if now > rule.end_date {
        return Eligibility::Ineligible(Expired);
    }
    if let Some(limit) = rule.usage_limit {
        if rule.usage_count >= limit {
            return Eligibility::Ineligible(UsageLimitExceeded);
        }
    }
    if order.order_value < rule.minimum_order_value {
        return Eligibility::Ineligible(BelowMinimumOrderValue);
    }
    if let ProductScope::Only(applicable) = &rule.scope {
        // An order without product ids is not checked against the scope.
        if !order.product_ids.is_empty()
            && !order.product_ids.iter().any(|p| applicable.contains(p))
        {
            return Eligibility::Ineligible(ProductNotApplicable);
        }
    }
    if let (Some(per_customer), Some(_)) = (rule.usage_per_customer, order.customer_id) {
        if customer_usage_count >= per_customer {
            return Eligibility::Ineligible(CustomerLimitExceeded);
        }
    }

    Eligibility::Eligible
}

/// Derived views, computed on demand rather than stored.
impl DiscountRule {
    /// Active and inside its validity window at `now`.
    pub fn is_currently_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.start_date <= now && now <= self.end_date
    }

    /// Redemptions left before the global limit, `None` when unlimited.
    pub fn remaining_uses(&self) -> Option<u32> {
        self.usage_limit
            .map(|limit| limit.saturating_sub(self.usage_count))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_uses() == Some(0)
    }
}
