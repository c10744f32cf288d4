//! Usage ledger: the durable record of every successful redemption.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::Amount;
use crate::model::{DateRange, OrderId, RuleId, UsageRecord};
use crate::store::{Store, StoreError, Transaction};

/// Errors raised when appending to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("order '{order_id}': discount {actual} does not match expected {expected}")]
    DiscountMismatch {
        order_id: OrderId,
        expected: Amount,
        actual: Amount,
    },
    #[error("order '{order_id}': discount {discount} exceeds order value {order_value}")]
    DiscountExceedsOrder {
        order_id: OrderId,
        discount: Amount,
        order_value: Amount,
    },
}

/// Aggregate totals over a rule's usage records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageStatistics {
    pub total_uses: u64,
    pub total_discount: Amount,
    pub total_order_value: Amount,
    pub unique_customers: u64,
    pub average_discount: Amount,
    pub average_order_value: Amount,
}

impl UsageStatistics {
    pub fn from_records(records: &[UsageRecord]) -> Self {
        let total_uses = records.len() as u64;
        let total_discount: Amount = records.iter().map(|r| r.discount_amount).sum();
        let total_order_value: Amount = records.iter().map(|r| r.order_value).sum();
        let unique_customers = records
            .iter()
            .filter_map(|r| r.customer_id.as_deref())
            .collect::<HashSet<_>>()
            .len() as u64;

        Self {
            total_uses,
            total_discount,
            total_order_value,
            unique_customers,
            average_discount: total_discount.average(total_uses),
            average_order_value: total_order_value.average(total_uses),
        }
    }
}

/// Append-only view over the store's usage records.
#[derive(Debug)]
pub struct UsageLedger<S> {
    store: Arc<S>,
    tolerance: Amount,
}

impl<S: Store> UsageLedger<S> {
    pub fn new(store: Arc<S>, tolerance: Amount) -> Self {
        Self { store, tolerance }
    }

    /// Append `record` inside `tx`.
    ///
    /// The stored discount must match what the record's policy snapshot
    /// yields for its order value and can never exceed that order value.
    /// Order uniqueness is enforced by the store.
    pub fn record_usage(&self, tx: &mut S::Tx<'_>, record: UsageRecord) -> Result<(), LedgerError> {
        if record.discount_amount > record.order_value {
            return Err(LedgerError::DiscountExceedsOrder {
                order_id: record.order_id,
                discount: record.discount_amount,
                order_value: record.order_value,
            });
        }
        let expected = record.discount.apply(record.order_value);
        if expected.abs_diff(record.discount_amount) > self.tolerance {
            return Err(LedgerError::DiscountMismatch {
                order_id: record.order_id,
                expected,
                actual: record.discount_amount,
            });
        }

        tx.append_usage(record)?;
        Ok(())
    }

    /// Prior redemptions of `rule_id` by `customer_id`.
    pub fn count_for_customer(&self, rule_id: RuleId, customer_id: &str) -> Result<u32, StoreError> {
        self.store.customer_usage_count(rule_id, customer_id)
    }

    pub fn find_by_order(&self, order_id: &str) -> Result<Option<UsageRecord>, StoreError> {
        self.store.usage_by_order(order_id)
    }

    /// [`UsageLedger::count_for_customer`] as seen from inside `tx`.
    pub fn count_for_customer_in(
        &self,
        tx: &S::Tx<'_>,
        rule_id: RuleId,
        customer_id: &str,
    ) -> Result<u32, StoreError> {
        tx.customer_usage_count(rule_id, customer_id)
    }

    /// [`UsageLedger::find_by_order`] as seen from inside `tx`.
    pub fn find_by_order_in(
        &self,
        tx: &S::Tx<'_>,
        order_id: &str,
    ) -> Result<Option<UsageRecord>, StoreError> {
        tx.usage_by_order(order_id)
    }

    pub fn history(&self, rule_id: RuleId) -> Result<Vec<UsageRecord>, StoreError> {
        self.store.usage_for_rule(rule_id, None)
    }

    pub fn statistics(
        &self,
        rule_id: RuleId,
        range: Option<DateRange>,
    ) -> Result<UsageStatistics, StoreError> {
        let records = self.store.usage_for_rule(rule_id, range)?;
        Ok(UsageStatistics::from_records(&records))
    }
}
