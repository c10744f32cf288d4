//! Redemption engine.
//!
//! The engine resolves codes, runs the eligibility checks and commits
//! redemptions. It is the only place a rule's usage count changes: the
//! ledger append and the counter increment happen in one store transaction
//! guarded by the rule's version, and a stale read is retried from scratch.
//! Also supports an async stream of redemption requests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::Amount;
use crate::config::EngineConfig;
use crate::ledger::{LedgerError, UsageLedger, UsageStatistics};
use crate::model::{
    DateRange, DiscountRule, OrderContext, RedemptionRequest, RuleDefinition, RuleId, RulePatch,
    UsageRecord,
};
use crate::registry::{AnyProduct, ProductCatalog, Registry, RegistryError};
use crate::rule::{self, IneligibleReason};
use crate::store::{Store, StoreError, Transaction};
use crate::validation::normalize_code;

mod state;
pub use state::{EligibilityCheck, Redemption};

mod error;
pub use error::{EngineError, RedeemError};

/// The redemption engine.
///
/// All operations take `&self`; share it across threads behind an `Arc`.
#[derive(Debug)]
pub struct Engine<S, C = AnyProduct> {
    store: Arc<S>,
    registry: Registry<S, C>,
    ledger: UsageLedger<S>,
    config: EngineConfig,
}

impl<S: Store> Engine<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: S, config: EngineConfig) -> Self {
        Self::with_catalog(store, AnyProduct, config)
    }
}

/// Public API
impl<S: Store, C: ProductCatalog> Engine<S, C> {
    pub fn with_catalog(store: S, catalog: C, config: EngineConfig) -> Self {
        let store = Arc::new(store);
        Self {
            registry: Registry::new(
                Arc::clone(&store),
                catalog,
                config.max_commit_attempts,
                config.code_generation_attempts,
            ),
            ledger: UsageLedger::new(Arc::clone(&store), config.discount_tolerance),
            store,
            config,
        }
    }

    pub fn registry(&self) -> &Registry<S, C> {
        &self.registry
    }

    pub fn ledger(&self) -> &UsageLedger<S> {
        &self.ledger
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn create_rule(
        &self,
        definition: RuleDefinition,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<DiscountRule, RegistryError> {
        self.registry.create(definition, actor, at)
    }

    pub fn update_rule(
        &self,
        id: RuleId,
        patch: RulePatch,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<DiscountRule, RegistryError> {
        self.registry.update(id, patch, actor, at)
    }

    pub fn deactivate_rule(
        &self,
        id: RuleId,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<DiscountRule, RegistryError> {
        self.registry.deactivate(id, actor, at)
    }

    pub fn activate_rule(
        &self,
        id: RuleId,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<DiscountRule, RegistryError> {
        self.registry.activate(id, actor, at)
    }

    pub fn delete_rule(&self, id: RuleId) -> Result<DiscountRule, RegistryError> {
        self.registry.delete(id)
    }

    pub fn generate_unique_code(&self, prefix: &str, length: usize) -> Result<String, RegistryError> {
        self.registry.generate_unique_code(prefix, length)
    }

    /// Dry-run: would `code` apply to `order` at `at`? Records nothing.
    pub fn check_eligibility(
        &self,
        code: &str,
        order: OrderContext<'_>,
        at: DateTime<Utc>,
    ) -> Result<EligibilityCheck, RedeemError> {
        Self::check_order_value(order.order_value)?;
        let code = normalize_code(code);
        let rule = self.resolve(&code)?;
        let customer_usage = self.customer_usage(&rule, order.customer_id)?;
        let eligibility = rule::evaluate(&rule, order, at, customer_usage);
        Ok(EligibilityCheck::new(
            eligibility,
            rule::calculate_discount(&rule, order.order_value),
        ))
    }

    /// Redeem a code against an order.
    ///
    /// At most one redemption per order id ever commits, and a rule's usage
    /// count never passes its limit regardless of concurrent callers.
    pub fn redeem(
        &self,
        request: &RedemptionRequest,
        at: DateTime<Utc>,
    ) -> Result<Redemption, RedeemError> {
        let result = self.try_redeem(request, at);
        Self::log_result(request, &result);
        result
    }

    /// Aggregate usage of a rule, optionally limited to a window.
    pub fn usage_statistics(
        &self,
        id: RuleId,
        range: Option<DateRange>,
    ) -> Result<UsageStatistics, EngineError> {
        let rule = self.registry.get(id)?;
        Ok(self.ledger.statistics(rule.id, range)?)
    }

    /// Every rule with its lifetime usage statistics, ordered by code.
    pub fn summary(&self) -> Result<Vec<(DiscountRule, UsageStatistics)>, EngineError> {
        self.registry
            .list()?
            .into_iter()
            .map(|rule| -> Result<_, EngineError> {
                let stats = self.ledger.statistics(rule.id, None)?;
                Ok((rule, stats))
            })
            .collect()
    }

    /// Run the engine with the given stream of redemption requests
    pub async fn run(&self, mut stream: impl Stream<Item = RedemptionRequest> + Unpin) {
        while let Some(request) = stream.next().await {
            // any error should not stop the engine, so we just ignore the redemption result
            let _ = self.redeem(&request, Utc::now());
        }
    }
}

/// Private API
impl<S: Store, C: ProductCatalog> Engine<S, C> {
    /// Small helper to log `redeem` results
    fn log_result(request: &RedemptionRequest, result: &Result<Redemption, RedeemError>) {
        match result {
            Ok(redemption) => {
                info!(
                    code = %redemption.rule.code,
                    order = %request.order_id,
                    discount = %redemption.discount_amount,
                    attempts = redemption.attempts,
                    "redemption applied"
                );
            }
            Err(e) => {
                info!(
                    code = %request.code,
                    order = %request.order_id,
                    reason = %e,
                    "redemption skipped"
                );
            }
        }
    }

    fn resolve(&self, code: &str) -> Result<DiscountRule, RedeemError> {
        self.store
            .rule_by_code(code)?
            .ok_or_else(|| RedeemError::NotFound(code.to_string()))
    }

    fn customer_usage(
        &self,
        rule: &DiscountRule,
        customer_id: Option<&str>,
    ) -> Result<u32, StoreError> {
        match customer_id {
            Some(customer) => self.ledger.count_for_customer(rule.id, customer),
            None => Ok(0),
        }
    }

    /// Reject requests no rule could ever accept, before touching the store.
    fn check_order_value(order_value: Amount) -> Result<(), RedeemError> {
        if order_value.is_negative() {
            return Err(RedeemError::NegativeOrderValue(order_value));
        }
        if order_value > Amount::MAX {
            return Err(RedeemError::OrderValueTooLarge(order_value));
        }
        Ok(())
    }

    /// Run read, decide and commit; start over while the commit loses a race
    /// against another writer of the same rule.
    fn try_redeem(
        &self,
        request: &RedemptionRequest,
        at: DateTime<Utc>,
    ) -> Result<Redemption, RedeemError> {
        if request.order_id.trim().is_empty() {
            return Err(RedeemError::MissingOrderId);
        }
        Self::check_order_value(request.order_value)?;

        let code = normalize_code(&request.code);
        let attempts = self.config.max_commit_attempts;

        for attempt in 1..=attempts {
            match self.redeem_once(&code, request, at) {
                Ok((rule, record)) => {
                    return Ok(Redemption {
                        discount_amount: record.discount_amount,
                        record,
                        rule,
                        attempts: attempt,
                    });
                }
                Err(RedeemError::Store(StoreError::VersionConflict { expected, found, .. })) => {
                    warn!(
                        code = %code,
                        order = %request.order_id,
                        attempt,
                        expected,
                        found,
                        "rule changed before commit, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        warn!(code = %code, order = %request.order_id, attempts, "redemption gave up under contention");
        Err(RedeemError::Conflict { code, attempts })
    }

    /// One attempt. The reads the decision depends on go through the same
    /// transaction as the ledger append and the versioned counter increment,
    /// so either both writes land against the state that was checked or
    /// neither does.
    fn redeem_once(
        &self,
        code: &str,
        request: &RedemptionRequest,
        at: DateTime<Utc>,
    ) -> Result<(DiscountRule, UsageRecord), RedeemError> {
        let mut tx = self.store.begin()?;

        let rule = tx
            .rule_by_code(code)?
            .ok_or_else(|| RedeemError::NotFound(code.to_string()))?;

        if self.ledger.find_by_order_in(&tx, &request.order_id)?.is_some() {
            return Err(RedeemError::AlreadyRedeemed(request.order_id.clone()));
        }

        let customer_usage = match request.customer_id.as_deref() {
            Some(customer) => self.ledger.count_for_customer_in(&tx, rule.id, customer)?,
            None => 0,
        };
        rule::evaluate(&rule, request.order(), at, customer_usage)
            .into_result()
            .map_err(RedeemError::Ineligible)?;

        let record = UsageRecord {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            code: rule.code.clone(),
            customer_id: request.customer_id.clone(),
            order_id: request.order_id.clone(),
            order_value: request.order_value,
            discount_amount: rule::calculate_discount(&rule, request.order_value),
            discount: rule.discount,
            product_ids: request.product_ids.clone(),
            used_at: at,
            provenance: request.provenance.clone(),
        };

        self.ledger
            .record_usage(&mut tx, record.clone())
            .map_err(|e| match e {
                LedgerError::Store(e) => commit_error(code, e),
                e => RedeemError::Ledger(e),
            })?;
        let updated = tx
            .increment_usage(rule.id, rule.version)
            .map_err(|e| commit_error(code, e))?;
        tx.commit()?;

        Ok((updated, record))
    }
}

/// Store rejections at commit time, in redemption terms.
fn commit_error(code: &str, err: StoreError) -> RedeemError {
    match err {
        StoreError::DuplicateOrder(order) => RedeemError::AlreadyRedeemed(order),
        StoreError::UsageLimitReached(_) => {
            RedeemError::Ineligible(IneligibleReason::UsageLimitExceeded)
        }
        StoreError::RuleNotFound(_) => RedeemError::NotFound(code.to_string()),
        other => RedeemError::Store(other),
    }
}
