//! Abstract transactional store for rules and usage records.
//!
//! Plain reads go straight to the store. Writes, and the reads a write
//! decision depends on, happen inside a [`Transaction`]:
//! either every staged write becomes visible on [`Transaction::commit`] or,
//! if the transaction is dropped first, none of them do.

use thiserror::Error;

use crate::model::{DateRange, DiscountRule, OrderId, RuleId, UsageRecord};

mod memory;
pub use memory::{InMemoryStore, InMemoryTx};

/// Errors raised by a [`Store`] or one of its transactions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("rule {0} not found")]
    RuleNotFound(RuleId),
    #[error("code '{0}' already exists")]
    DuplicateCode(String),
    #[error("order '{0}' already has a usage record")]
    DuplicateOrder(OrderId),
    #[error("rule {id} changed concurrently: expected version {expected}, found {found}")]
    VersionConflict { id: RuleId, expected: u64, found: u64 },
    #[error("rule {0} has reached its usage limit")]
    UsageLimitReached(RuleId),
    #[error("rule {0} is referenced by usage records")]
    RuleInUse(RuleId),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Durable storage for rules and the usage ledger.
pub trait Store: Send + Sync {
    type Tx<'a>: Transaction
    where
        Self: 'a;

    /// Start an atomic unit of work.
    fn begin(&self) -> Result<Self::Tx<'_>, StoreError>;

    fn rule(&self, id: RuleId) -> Result<Option<DiscountRule>, StoreError>;

    /// Look up a rule by its normalized code.
    fn rule_by_code(&self, code: &str) -> Result<Option<DiscountRule>, StoreError>;

    fn code_exists(&self, code: &str) -> Result<bool, StoreError> {
        Ok(self.rule_by_code(code)?.is_some())
    }

    fn rules(&self) -> Result<Vec<DiscountRule>, StoreError>;

    fn usage_by_order(&self, order_id: &str) -> Result<Option<UsageRecord>, StoreError>;

    fn customer_usage_count(&self, rule_id: RuleId, customer_id: &str)
    -> Result<u32, StoreError>;

    /// Usage records of a rule in commit order, optionally limited to a window.
    fn usage_for_rule(
        &self,
        rule_id: RuleId,
        range: Option<DateRange>,
    ) -> Result<Vec<UsageRecord>, StoreError>;
}

/// Writes staged within one atomic unit of work.
///
/// Reads through a transaction see its own staged writes.
pub trait Transaction {
    fn rule_by_code(&self, code: &str) -> Result<Option<DiscountRule>, StoreError>;

    fn usage_by_order(&self, order_id: &str) -> Result<Option<UsageRecord>, StoreError>;

    fn customer_usage_count(&self, rule_id: RuleId, customer_id: &str)
    -> Result<u32, StoreError>;

    /// Insert a new rule. Fails if the code is taken.
    fn insert_rule(&mut self, rule: DiscountRule) -> Result<DiscountRule, StoreError>;

    /// Replace a rule. `rule.version` must match the stored version; the
    /// stored copy gets the next version.
    fn update_rule(&mut self, rule: DiscountRule) -> Result<DiscountRule, StoreError>;

    /// Remove a rule that no usage record references.
    fn delete_rule(&mut self, id: RuleId) -> Result<DiscountRule, StoreError>;

    /// Append a usage record. Order ids are unique across all records.
    fn append_usage(&mut self, record: UsageRecord) -> Result<(), StoreError>;

    /// Increment a rule's usage count if its version is still `expected_version`.
    fn increment_usage(
        &mut self,
        id: RuleId,
        expected_version: u64,
    ) -> Result<DiscountRule, StoreError>;

    fn commit(self) -> Result<(), StoreError>;
}
