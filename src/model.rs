//! Core domain types for the redemption engine.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Amount;

/// Discount rule identifier.
pub type RuleId = Uuid;

/// Usage record identifier.
pub type UsageId = Uuid;

/// Customer identifier, opaque to the engine.
pub type CustomerId = String;

/// Order identifier. Unique across every usage record.
pub type OrderId = String;

/// Product identifier, opaque to the engine.
pub type ProductId = String;

/// Identity of the administrative actor performing a registry operation.
pub type ActorId = String;

/// How a rule's discount value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    /// `discount_value` is a rate in percent of the order value.
    Percentage,
    /// `discount_value` is an absolute amount, capped at the order value.
    Fixed,
}

impl fmt::Display for DiscountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscountType::Percentage => write!(f, "percentage"),
            DiscountType::Fixed => write!(f, "fixed"),
        }
    }
}

/// Error returned when parsing a [`DiscountType`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown discount type '{0}'")]
pub struct ParseDiscountTypeError(String);

impl FromStr for DiscountType {
    type Err = ParseDiscountTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "percentage" | "percent" => Ok(DiscountType::Percentage),
            "fixed" => Ok(DiscountType::Fixed),
            other => Err(ParseDiscountTypeError(other.to_string())),
        }
    }
}

/// Discount type and value, as configured on a rule and snapshotted into
/// each usage record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountPolicy {
    pub kind: DiscountType,
    pub value: Amount,
}

/// Which products a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductScope {
    /// Every product qualifies.
    All,
    /// Only the listed products qualify. Never empty.
    Only(BTreeSet<ProductId>),
}

impl ProductScope {
    pub fn products(&self) -> Option<&BTreeSet<ProductId>> {
        match self {
            ProductScope::All => None,
            ProductScope::Only(products) => Some(products),
        }
    }
}

/// A persisted promo code definition.
///
/// `usage_count` is only ever changed by the redemption path and `version`
/// is bumped by the store on every write.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscountRule {
    pub id: RuleId,
    /// Normalized (uppercase) code.
    pub code: String,
    pub description: Option<String>,
    pub discount: DiscountPolicy,
    pub minimum_order_value: Amount,
    pub usage_limit: Option<u32>,
    pub usage_per_customer: Option<u32>,
    pub usage_count: u32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub scope: ProductScope,
    pub created_by: ActorId,
    pub updated_by: Option<ActorId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl DiscountRule {
    /// Rebuild the editable definition from this rule, for applying patches.
    pub fn definition(&self) -> RuleDefinition {
        let (all_products, applicable_products) = match &self.scope {
            ProductScope::All => (true, Vec::new()),
            ProductScope::Only(products) => (false, products.iter().cloned().collect()),
        };
        RuleDefinition {
            code: self.code.clone(),
            description: self.description.clone(),
            discount_type: self.discount.kind,
            discount_value: self.discount.value,
            minimum_order_value: self.minimum_order_value,
            usage_limit: self.usage_limit,
            usage_per_customer: self.usage_per_customer,
            start_date: self.start_date,
            end_date: self.end_date,
            is_active: self.is_active,
            all_products,
            applicable_products,
        }
    }
}

/// Caller-supplied rule definition, validated before it becomes a
/// [`DiscountRule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Amount,
    #[serde(default)]
    pub minimum_order_value: Amount,
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub usage_per_customer: Option<u32>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_true")]
    pub all_products: bool,
    #[serde(default)]
    pub applicable_products: Vec<ProductId>,
}

fn default_true() -> bool {
    true
}

/// Partial update of a rule. `None` leaves a field untouched; the nested
/// `Option` fields use `Some(None)` to clear the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RulePatch {
    pub code: Option<String>,
    pub description: Option<Option<String>>,
    pub discount_type: Option<DiscountType>,
    pub discount_value: Option<Amount>,
    pub minimum_order_value: Option<Amount>,
    pub usage_limit: Option<Option<u32>>,
    pub usage_per_customer: Option<Option<u32>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    pub all_products: Option<bool>,
    pub applicable_products: Option<Vec<ProductId>>,
}

impl RulePatch {
    /// Apply the patch on top of `definition`, producing the resulting state.
    pub fn apply_to(self, mut definition: RuleDefinition) -> RuleDefinition {
        if let Some(code) = self.code {
            definition.code = code;
        }
        if let Some(description) = self.description {
            definition.description = description;
        }
        if let Some(kind) = self.discount_type {
            definition.discount_type = kind;
        }
        if let Some(value) = self.discount_value {
            definition.discount_value = value;
        }
        if let Some(minimum) = self.minimum_order_value {
            definition.minimum_order_value = minimum;
        }
        if let Some(limit) = self.usage_limit {
            definition.usage_limit = limit;
        }
        if let Some(per_customer) = self.usage_per_customer {
            definition.usage_per_customer = per_customer;
        }
        if let Some(start) = self.start_date {
            definition.start_date = start;
        }
        if let Some(end) = self.end_date {
            definition.end_date = end;
        }
        if let Some(active) = self.is_active {
            definition.is_active = active;
        }
        if let Some(all) = self.all_products {
            definition.all_products = all;
        }
        if let Some(products) = self.applicable_products {
            definition.applicable_products = products;
        }
        definition
    }
}

/// Informational request metadata stored with a usage record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// The order being checked against a rule.
#[derive(Debug, Clone, Copy)]
pub struct OrderContext<'a> {
    pub customer_id: Option<&'a str>,
    pub order_value: Amount,
    pub product_ids: &'a [ProductId],
}

/// A request to redeem a code against an order.
#[derive(Debug, Clone, PartialEq)]
pub struct RedemptionRequest {
    pub code: String,
    pub customer_id: Option<CustomerId>,
    pub order_id: OrderId,
    pub order_value: Amount,
    pub product_ids: Vec<ProductId>,
    pub provenance: Provenance,
}

impl RedemptionRequest {
    pub fn new(
        code: impl Into<String>,
        customer_id: Option<CustomerId>,
        order_id: impl Into<OrderId>,
        order_value: Amount,
    ) -> Self {
        Self {
            code: code.into(),
            customer_id,
            order_id: order_id.into(),
            order_value,
            product_ids: Vec::new(),
            provenance: Provenance::default(),
        }
    }

    pub fn with_products(mut self, product_ids: Vec<ProductId>) -> Self {
        self.product_ids = product_ids;
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn order(&self) -> OrderContext<'_> {
        OrderContext {
            customer_id: self.customer_id.as_deref(),
            order_value: self.order_value,
            product_ids: &self.product_ids,
        }
    }
}

/// Immutable ledger entry for one successful redemption.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub id: UsageId,
    pub rule_id: RuleId,
    pub code: String,
    pub customer_id: Option<CustomerId>,
    pub order_id: OrderId,
    pub order_value: Amount,
    pub discount_amount: Amount,
    /// Discount policy at the time of use.
    pub discount: DiscountPolicy,
    pub product_ids: Vec<ProductId>,
    pub used_at: DateTime<Utc>,
    pub provenance: Provenance,
}

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}
