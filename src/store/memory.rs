use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};

use tracing::debug;

use super::{Store, StoreError, Transaction};
use crate::model::{CustomerId, DateRange, DiscountRule, OrderId, RuleId, UsageRecord};

#[derive(Debug, Default)]
struct Tables {
    rules: HashMap<RuleId, DiscountRule>,
    /// Unique index on normalized code.
    codes: HashMap<String, RuleId>,
    /// Append-only ledger.
    usage: Vec<UsageRecord>,
    /// Unique index on order id.
    by_order: HashMap<OrderId, usize>,
    /// (rule, time) index: ledger positions per rule in commit order.
    by_rule: HashMap<RuleId, Vec<usize>>,
    /// (rule, customer) index.
    by_customer: HashMap<(RuleId, CustomerId), u32>,
}

impl Tables {
    fn put_rule(&mut self, rule: DiscountRule) {
        self.codes.insert(rule.code.clone(), rule.id);
        self.rules.insert(rule.id, rule);
    }

    fn take_rule(&mut self, id: RuleId) -> Option<DiscountRule> {
        let rule = self.rules.remove(&id)?;
        self.codes.remove(&rule.code);
        Some(rule)
    }

    fn rule_by_code(&self, code: &str) -> Option<&DiscountRule> {
        self.codes.get(code).and_then(|id| self.rules.get(id))
    }

    fn usage_by_order(&self, order_id: &str) -> Option<&UsageRecord> {
        self.by_order.get(order_id).and_then(|&pos| self.usage.get(pos))
    }

    fn customer_usage_count(&self, rule_id: RuleId, customer_id: &str) -> u32 {
        self.by_customer
            .get(&(rule_id, customer_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn has_usage(&self, id: RuleId) -> bool {
        self.by_rule.get(&id).is_some_and(|positions| !positions.is_empty())
    }

    fn pop_usage(&mut self) {
        let Some(record) = self.usage.pop() else {
            return;
        };
        self.by_order.remove(&record.order_id);
        if let Some(positions) = self.by_rule.get_mut(&record.rule_id) {
            positions.pop();
        }
        if let Some(customer) = record.customer_id {
            let key = (record.rule_id, customer);
            if let Some(count) = self.by_customer.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    self.by_customer.remove(&key);
                }
            }
        }
    }
}

/// Inverse of a write applied inside a transaction.
#[derive(Debug)]
enum Undo {
    RemoveRule(RuleId),
    RestoreRule(DiscountRule),
    PopUsage,
}

/// In-memory store.
///
/// A single lock covers every table, so each transaction is serialized
/// against all other writers.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&tables))
    }
}

impl Store for InMemoryStore {
    type Tx<'a> = InMemoryTx<'a>;

    fn begin(&self) -> Result<InMemoryTx<'_>, StoreError> {
        let tables = self.tables.write().map_err(|_| StoreError::Poisoned)?;
        Ok(InMemoryTx {
            tables,
            undo: Vec::new(),
            committed: false,
        })
    }

    fn rule(&self, id: RuleId) -> Result<Option<DiscountRule>, StoreError> {
        self.read(|t| t.rules.get(&id).cloned())
    }

    fn rule_by_code(&self, code: &str) -> Result<Option<DiscountRule>, StoreError> {
        self.read(|t| t.rule_by_code(code).cloned())
    }

    fn code_exists(&self, code: &str) -> Result<bool, StoreError> {
        self.read(|t| t.codes.contains_key(code))
    }

    fn rules(&self) -> Result<Vec<DiscountRule>, StoreError> {
        self.read(|t| t.rules.values().cloned().collect())
    }

    fn usage_by_order(&self, order_id: &str) -> Result<Option<UsageRecord>, StoreError> {
        self.read(|t| t.usage_by_order(order_id).cloned())
    }

    fn customer_usage_count(
        &self,
        rule_id: RuleId,
        customer_id: &str,
    ) -> Result<u32, StoreError> {
        self.read(|t| t.customer_usage_count(rule_id, customer_id))
    }

    fn usage_for_rule(
        &self,
        rule_id: RuleId,
        range: Option<DateRange>,
    ) -> Result<Vec<UsageRecord>, StoreError> {
        self.read(|t| {
            t.by_rule
                .get(&rule_id)
                .into_iter()
                .flatten()
                .filter_map(|&pos| t.usage.get(pos))
                .filter(|record| range.is_none_or(|r| r.contains(record.used_at)))
                .cloned()
                .collect()
        })
    }
}

/// Transaction over [`InMemoryStore`]. Holds the write lock until it is
/// committed or dropped; dropping without commit rolls back.
#[derive(Debug)]
pub struct InMemoryTx<'a> {
    tables: RwLockWriteGuard<'a, Tables>,
    undo: Vec<Undo>,
    committed: bool,
}

impl InMemoryTx<'_> {
    fn rollback(&mut self) {
        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::RemoveRule(id) => {
                    self.tables.take_rule(id);
                }
                Undo::RestoreRule(rule) => {
                    self.tables.take_rule(rule.id);
                    self.tables.put_rule(rule);
                }
                Undo::PopUsage => self.tables.pop_usage(),
            }
        }
    }

    fn current(&self, id: RuleId) -> Result<&DiscountRule, StoreError> {
        self.tables.rules.get(&id).ok_or(StoreError::RuleNotFound(id))
    }
}

impl Transaction for InMemoryTx<'_> {
    fn rule_by_code(&self, code: &str) -> Result<Option<DiscountRule>, StoreError> {
        Ok(self.tables.rule_by_code(code).cloned())
    }

    fn usage_by_order(&self, order_id: &str) -> Result<Option<UsageRecord>, StoreError> {
        Ok(self.tables.usage_by_order(order_id).cloned())
    }

    fn customer_usage_count(
        &self,
        rule_id: RuleId,
        customer_id: &str,
    ) -> Result<u32, StoreError> {
        Ok(self.tables.customer_usage_count(rule_id, customer_id))
    }

    fn insert_rule(&mut self, rule: DiscountRule) -> Result<DiscountRule, StoreError> {
        if self.tables.codes.contains_key(&rule.code) {
            return Err(StoreError::DuplicateCode(rule.code));
        }
        self.undo.push(Undo::RemoveRule(rule.id));
        self.tables.put_rule(rule.clone());
        Ok(rule)
    }

    fn update_rule(&mut self, mut rule: DiscountRule) -> Result<DiscountRule, StoreError> {
        let current = self.current(rule.id)?;
        if current.version != rule.version {
            return Err(StoreError::VersionConflict {
                id: rule.id,
                expected: rule.version,
                found: current.version,
            });
        }
        if current.code != rule.code && self.tables.codes.contains_key(&rule.code) {
            return Err(StoreError::DuplicateCode(rule.code));
        }

        let previous = current.clone();
        rule.usage_count = previous.usage_count;
        rule.version = previous.version + 1;

        self.tables.take_rule(rule.id);
        self.tables.put_rule(rule.clone());
        self.undo.push(Undo::RestoreRule(previous));
        Ok(rule)
    }

    fn delete_rule(&mut self, id: RuleId) -> Result<DiscountRule, StoreError> {
        self.current(id)?;
        if self.tables.has_usage(id) {
            return Err(StoreError::RuleInUse(id));
        }
        let rule = self
            .tables
            .take_rule(id)
            .ok_or(StoreError::RuleNotFound(id))?;
        self.undo.push(Undo::RestoreRule(rule.clone()));
        Ok(rule)
    }

    fn append_usage(&mut self, record: UsageRecord) -> Result<(), StoreError> {
        self.current(record.rule_id)?;
        if self.tables.by_order.contains_key(&record.order_id) {
            return Err(StoreError::DuplicateOrder(record.order_id));
        }

        let tables = &mut *self.tables;
        let pos = tables.usage.len();
        tables.by_order.insert(record.order_id.clone(), pos);
        tables.by_rule.entry(record.rule_id).or_default().push(pos);
        if let Some(customer) = &record.customer_id {
            *tables
                .by_customer
                .entry((record.rule_id, customer.clone()))
                .or_default() += 1;
        }
        tables.usage.push(record);
        self.undo.push(Undo::PopUsage);
        Ok(())
    }

    fn increment_usage(
        &mut self,
        id: RuleId,
        expected_version: u64,
    ) -> Result<DiscountRule, StoreError> {
        let current = self.current(id)?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                id,
                expected: expected_version,
                found: current.version,
            });
        }
        if current.usage_limit.is_some_and(|limit| current.usage_count >= limit) {
            return Err(StoreError::UsageLimitReached(id));
        }

        let previous = current.clone();
        let rule = self
            .tables
            .rules
            .get_mut(&id)
            .ok_or(StoreError::RuleNotFound(id))?;
        rule.usage_count += 1;
        rule.version += 1;
        let updated = rule.clone();
        self.undo.push(Undo::RestoreRule(previous));
        Ok(updated)
    }

    fn commit(mut self) -> Result<(), StoreError> {
        debug!(writes = self.undo.len(), "transaction committed");
        self.undo.clear();
        self.committed = true;
        Ok(())
    }
}

impl Drop for InMemoryTx<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.undo.is_empty() {
            debug!(writes = self.undo.len(), "transaction rolled back");
            self.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::model::{DiscountPolicy, DiscountType, ProductScope, Provenance};
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn rule(code: &str, limit: Option<u32>) -> DiscountRule {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        DiscountRule {
            id: Uuid::new_v4(),
            code: code.to_string(),
            description: None,
            discount: DiscountPolicy {
                kind: DiscountType::Fixed,
                value: Amount::from_whole(5),
            },
            minimum_order_value: Amount::ZERO,
            usage_limit: limit,
            usage_per_customer: None,
            usage_count: 0,
            start_date: t0,
            end_date: t0 + Duration::days(365),
            is_active: true,
            scope: ProductScope::All,
            created_by: "admin".to_string(),
            updated_by: None,
            created_at: t0,
            updated_at: t0,
            version: 1,
        }
    }

    fn usage(rule: &DiscountRule, order: &str, customer: Option<&str>) -> UsageRecord {
        UsageRecord {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            code: rule.code.clone(),
            customer_id: customer.map(str::to_string),
            order_id: order.to_string(),
            order_value: Amount::from_whole(100),
            discount_amount: Amount::from_whole(5),
            discount: rule.discount,
            product_ids: Vec::new(),
            used_at: rule.start_date + Duration::hours(1),
            provenance: Provenance::default(),
        }
    }

    fn seed(store: &InMemoryStore, rule: &DiscountRule) {
        let mut tx = store.begin().unwrap();
        tx.insert_rule(rule.clone()).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn committed_writes_are_visible() {
        let store = InMemoryStore::new();
        let r = rule("SAVE10", None);
        seed(&store, &r);

        assert_eq!(store.rule(r.id).unwrap(), Some(r.clone()));
        assert_eq!(store.rule_by_code("SAVE10").unwrap(), Some(r));
        assert!(store.code_exists("SAVE10").unwrap());
        assert!(!store.code_exists("OTHER").unwrap());
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let store = InMemoryStore::new();
        let r = rule("SAVE10", Some(3));
        seed(&store, &r);

        {
            let mut tx = store.begin().unwrap();
            tx.append_usage(usage(&r, "order-1", Some("alice"))).unwrap();
            tx.increment_usage(r.id, r.version).unwrap();
            tx.insert_rule(rule("OTHER", None)).unwrap();
        }

        assert_eq!(store.rule(r.id).unwrap().unwrap().usage_count, 0);
        assert_eq!(store.usage_by_order("order-1").unwrap(), None);
        assert_eq!(store.customer_usage_count(r.id, "alice").unwrap(), 0);
        assert!(store.usage_for_rule(r.id, None).unwrap().is_empty());
        assert!(!store.code_exists("OTHER").unwrap());
    }

    #[test]
    fn increment_checks_version_and_limit() {
        let store = InMemoryStore::new();
        let r = rule("SAVE10", Some(1));
        seed(&store, &r);

        let mut tx = store.begin().unwrap();
        let updated = tx.increment_usage(r.id, r.version).unwrap();
        assert_eq!(updated.usage_count, 1);
        assert_eq!(updated.version, r.version + 1);

        assert_eq!(
            tx.increment_usage(r.id, r.version),
            Err(StoreError::VersionConflict {
                id: r.id,
                expected: r.version,
                found: r.version + 1
            })
        );
        assert_eq!(
            tx.increment_usage(r.id, updated.version),
            Err(StoreError::UsageLimitReached(r.id))
        );
    }

    #[test]
    fn transaction_reads_see_staged_writes() {
        let store = InMemoryStore::new();
        let r = rule("SAVE10", None);
        seed(&store, &r);

        let mut tx = store.begin().unwrap();
        tx.append_usage(usage(&r, "order-1", Some("alice"))).unwrap();
        tx.increment_usage(r.id, r.version).unwrap();

        assert_eq!(tx.rule_by_code("SAVE10").unwrap().unwrap().usage_count, 1);
        assert!(tx.usage_by_order("order-1").unwrap().is_some());
        assert_eq!(tx.customer_usage_count(r.id, "alice").unwrap(), 1);
    }

    #[test]
    fn order_ids_are_unique() {
        let store = InMemoryStore::new();
        let r = rule("SAVE10", None);
        seed(&store, &r);

        let mut tx = store.begin().unwrap();
        tx.append_usage(usage(&r, "order-1", None)).unwrap();
        assert_eq!(
            tx.append_usage(usage(&r, "order-1", None)),
            Err(StoreError::DuplicateOrder("order-1".to_string()))
        );
    }

    #[test]
    fn update_rule_renames_code_and_bumps_version() {
        let store = InMemoryStore::new();
        let r = rule("SAVE10", None);
        seed(&store, &r);
        let taken = rule("TAKEN", None);
        seed(&store, &taken);

        let mut renamed = r.clone();
        renamed.code = "TAKEN".to_string();
        let mut tx = store.begin().unwrap();
        assert_eq!(
            tx.update_rule(renamed.clone()),
            Err(StoreError::DuplicateCode("TAKEN".to_string()))
        );

        renamed.code = "SAVE20".to_string();
        let stored = tx.update_rule(renamed).unwrap();
        tx.commit().unwrap();

        assert_eq!(stored.version, r.version + 1);
        assert!(!store.code_exists("SAVE10").unwrap());
        assert_eq!(store.rule_by_code("SAVE20").unwrap(), Some(stored));
    }

    #[test]
    fn rolled_back_update_restores_code_index() {
        let store = InMemoryStore::new();
        let r = rule("SAVE10", None);
        seed(&store, &r);

        {
            let mut tx = store.begin().unwrap();
            let mut renamed = r.clone();
            renamed.code = "SAVE20".to_string();
            tx.update_rule(renamed).unwrap();
        }

        assert_eq!(store.rule_by_code("SAVE10").unwrap(), Some(r));
        assert!(!store.code_exists("SAVE20").unwrap());
    }

    #[test]
    fn delete_rejects_rules_with_usage() {
        let store = InMemoryStore::new();
        let used = rule("USED", None);
        let unused = rule("UNUSED", None);
        seed(&store, &used);
        seed(&store, &unused);

        let mut tx = store.begin().unwrap();
        tx.append_usage(usage(&used, "order-1", None)).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        assert_eq!(tx.delete_rule(used.id), Err(StoreError::RuleInUse(used.id)));
        tx.delete_rule(unused.id).unwrap();
        tx.commit().unwrap();

        assert!(store.rule(used.id).unwrap().is_some());
        assert!(store.rule(unused.id).unwrap().is_none());
    }

    #[test]
    fn usage_for_rule_filters_by_window() {
        let store = InMemoryStore::new();
        let r = rule("SAVE10", None);
        seed(&store, &r);

        let mut tx = store.begin().unwrap();
        let mut early = usage(&r, "order-1", Some("alice"));
        early.used_at = r.start_date + Duration::days(1);
        let mut late = usage(&r, "order-2", Some("alice"));
        late.used_at = r.start_date + Duration::days(10);
        tx.append_usage(early).unwrap();
        tx.append_usage(late).unwrap();
        tx.commit().unwrap();

        assert_eq!(store.usage_for_rule(r.id, None).unwrap().len(), 2);
        let window = DateRange::new(r.start_date, r.start_date + Duration::days(5));
        let in_window = store.usage_for_rule(r.id, Some(window)).unwrap();
        assert_eq!(in_window.len(), 1);
        assert_eq!(in_window[0].order_id, "order-1");
        assert_eq!(store.customer_usage_count(r.id, "alice").unwrap(), 2);
    }
}
