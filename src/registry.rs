//! Code registry: creation, editing and removal of rule definitions.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::{
    ActorId, DiscountPolicy, DiscountRule, ProductId, ProductScope, RuleDefinition, RuleId,
    RulePatch,
};
use crate::store::{Store, StoreError, Transaction};
use crate::validation::{self, Validated, ValidationError};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Errors returned by [`Registry`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("invalid rule: {0}")]
    Validation(#[from] ValidationError),
    #[error("code '{0}' already exists")]
    DuplicateCode(String),
    #[error("rule {0} not found")]
    NotFound(RuleId),
    #[error("rule {0} has usage history and cannot be deleted")]
    HasUsageHistory(RuleId),
    #[error("unknown products: {}", .0.join(", "))]
    UnknownProducts(Vec<ProductId>),
    #[error("no unique code found for prefix '{prefix}' after {attempts} attempts")]
    GenerationExhausted { prefix: String, attempts: u32 },
    #[error("rule {0} kept changing while being updated")]
    Conflict(RuleId),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateCode(code) => RegistryError::DuplicateCode(code),
            StoreError::RuleNotFound(id) => RegistryError::NotFound(id),
            StoreError::RuleInUse(id) => RegistryError::HasUsageHistory(id),
            other => RegistryError::Store(other),
        }
    }
}

/// Product existence lookup consulted when a rule targets explicit products.
pub trait ProductCatalog: Send + Sync {
    /// The ids in `products` that do not exist.
    fn unknown_products(&self, products: &BTreeSet<ProductId>) -> Vec<ProductId>;
}

/// Catalog that accepts every product id.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyProduct;

impl ProductCatalog for AnyProduct {
    fn unknown_products(&self, _products: &BTreeSet<ProductId>) -> Vec<ProductId> {
        Vec::new()
    }
}

impl ProductCatalog for HashSet<ProductId> {
    fn unknown_products(&self, products: &BTreeSet<ProductId>) -> Vec<ProductId> {
        products
            .iter()
            .filter(|p| !self.contains(*p))
            .cloned()
            .collect()
    }
}

/// Rule definitions and their unique codes.
#[derive(Debug)]
pub struct Registry<S, C> {
    store: Arc<S>,
    catalog: C,
    max_commit_attempts: u32,
    generation_attempts: u32,
}

impl<S: Store, C: ProductCatalog> Registry<S, C> {
    pub fn new(
        store: Arc<S>,
        catalog: C,
        max_commit_attempts: u32,
        generation_attempts: u32,
    ) -> Self {
        Self {
            store,
            catalog,
            max_commit_attempts,
            generation_attempts,
        }
    }

    pub fn get(&self, id: RuleId) -> Result<DiscountRule, RegistryError> {
        self.store.rule(id)?.ok_or(RegistryError::NotFound(id))
    }

    /// Look up a rule by code, case-insensitively.
    pub fn find_by_code(&self, code: &str) -> Result<Option<DiscountRule>, StoreError> {
        self.store.rule_by_code(&validation::normalize_code(code))
    }

    /// All rules, ordered by code.
    pub fn list(&self) -> Result<Vec<DiscountRule>, StoreError> {
        let mut rules = self.store.rules()?;
        rules.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(rules)
    }

    pub fn create(
        &self,
        definition: RuleDefinition,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<DiscountRule, RegistryError> {
        let validated = validation::validate(&definition, 0)?;
        self.check_products(&validated.scope)?;

        let rule = build_rule(
            Uuid::new_v4(),
            validated,
            definition,
            actor.to_string(),
            at,
        );
        let rule = self.write(|tx| tx.insert_rule(rule))?;

        info!(code = %rule.code, id = %rule.id, actor, "rule created");
        Ok(rule)
    }

    /// Apply `patch` and re-validate the resulting rule as a whole.
    pub fn update(
        &self,
        id: RuleId,
        patch: RulePatch,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<DiscountRule, RegistryError> {
        for attempt in 1..=self.max_commit_attempts {
            let current = self.get(id)?;
            let definition = patch.clone().apply_to(current.definition());
            let validated = validation::validate(&definition, current.usage_count)?;
            self.check_products(&validated.scope)?;

            let mut updated = build_rule(
                id,
                validated,
                definition,
                current.created_by,
                current.created_at,
            );
            updated.usage_count = current.usage_count;
            updated.updated_by = Some(actor.to_string());
            updated.updated_at = at;
            updated.version = current.version;

            match self.write(|tx| tx.update_rule(updated)) {
                Ok(rule) => {
                    info!(code = %rule.code, id = %rule.id, actor, "rule updated");
                    return Ok(rule);
                }
                Err(StoreError::VersionConflict { expected, found, .. }) => {
                    warn!(id = %id, attempt, expected, found, "rule changed during update, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RegistryError::Conflict(id))
    }

    pub fn deactivate(
        &self,
        id: RuleId,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<DiscountRule, RegistryError> {
        self.set_active(id, false, actor, at)
    }

    pub fn activate(
        &self,
        id: RuleId,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<DiscountRule, RegistryError> {
        self.set_active(id, true, actor, at)
    }

    /// Delete a rule that has never been redeemed.
    pub fn delete(&self, id: RuleId) -> Result<DiscountRule, RegistryError> {
        let rule = self.write(|tx| tx.delete_rule(id))?;
        info!(code = %rule.code, id = %rule.id, "rule deleted");
        Ok(rule)
    }

    /// `prefix` followed by `length` random alphanumeric characters, not yet
    /// used by any rule.
    pub fn generate_unique_code(&self, prefix: &str, length: usize) -> Result<String, RegistryError> {
        self.generate_unique_code_with(&mut rand::thread_rng(), prefix, length)
    }

    pub fn generate_unique_code_with<R: Rng>(
        &self,
        rng: &mut R,
        prefix: &str,
        length: usize,
    ) -> Result<String, RegistryError> {
        let prefix = validation::normalize_code(prefix);
        // shape check on a placeholder candidate of the final length
        validation::validate_code(&format!("{prefix}{}", "0".repeat(length)))?;

        for _ in 0..self.generation_attempts {
            let suffix: String = (0..length)
                .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
                .collect();
            let candidate = format!("{prefix}{suffix}");
            if !self.store.code_exists(&candidate)? {
                return Ok(candidate);
            }
        }

        warn!(prefix = %prefix, length, attempts = self.generation_attempts, "code generation exhausted");
        Err(RegistryError::GenerationExhausted {
            prefix,
            attempts: self.generation_attempts,
        })
    }

    fn set_active(
        &self,
        id: RuleId,
        active: bool,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<DiscountRule, RegistryError> {
        let patch = RulePatch {
            is_active: Some(active),
            ..RulePatch::default()
        };
        self.update(id, patch, actor, at)
    }

    fn check_products(&self, scope: &ProductScope) -> Result<(), RegistryError> {
        let Some(products) = scope.products() else {
            return Ok(());
        };
        let unknown = self.catalog.unknown_products(products);
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::UnknownProducts(unknown))
        }
    }

    /// Run a single write in its own transaction.
    fn write<'s, T>(
        &'s self,
        op: impl FnOnce(&mut S::Tx<'s>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tx = self.store.begin()?;
        let out = op(&mut tx)?;
        tx.commit()?;
        Ok(out)
    }
}

fn build_rule(
    id: RuleId,
    validated: Validated,
    definition: RuleDefinition,
    created_by: ActorId,
    created_at: DateTime<Utc>,
) -> DiscountRule {
    DiscountRule {
        id,
        code: validated.code,
        description: definition.description,
        discount: DiscountPolicy {
            kind: definition.discount_type,
            value: definition.discount_value,
        },
        minimum_order_value: definition.minimum_order_value,
        usage_limit: definition.usage_limit,
        usage_per_customer: definition.usage_per_customer,
        usage_count: 0,
        start_date: definition.start_date,
        end_date: definition.end_date,
        is_active: definition.is_active,
        scope: validated.scope,
        created_by,
        updated_by: None,
        created_at,
        updated_at: created_at,
        version: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::model::DiscountType;
    use crate::store::InMemoryStore;
    use chrono::{Duration, TimeZone};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn registry() -> Registry<InMemoryStore, AnyProduct> {
        Registry::new(Arc::new(InMemoryStore::new()), AnyProduct, 4, 100)
    }

    fn definition(code: &str) -> RuleDefinition {
        RuleDefinition {
            code: code.to_string(),
            description: Some("spring sale".to_string()),
            discount_type: DiscountType::Percentage,
            discount_value: Amount::from_whole(10),
            minimum_order_value: Amount::from_whole(50),
            usage_limit: Some(2),
            usage_per_customer: None,
            start_date: now() - Duration::days(1),
            end_date: now() + Duration::days(30),
            is_active: true,
            all_products: true,
            applicable_products: Vec::new(),
        }
    }

    #[test]
    fn create_normalizes_and_stamps() {
        let registry = registry();
        let rule = registry.create(definition("save10"), "admin", now()).unwrap();

        assert_eq!(rule.code, "SAVE10");
        assert_eq!(rule.usage_count, 0);
        assert_eq!(rule.created_by, "admin");
        assert_eq!(rule.created_at, now());
        assert_eq!(registry.get(rule.id).unwrap(), rule);
        assert_eq!(registry.find_by_code("Save10").unwrap(), Some(rule));
    }

    #[test]
    fn create_rejects_invalid_and_duplicate() {
        let registry = registry();
        let mut bad = definition("SAVE10");
        bad.end_date = bad.start_date;
        assert_eq!(
            registry.create(bad, "admin", now()),
            Err(RegistryError::Validation(ValidationError::InvalidWindow))
        );

        registry.create(definition("SAVE10"), "admin", now()).unwrap();
        assert_eq!(
            registry.create(definition("save10"), "admin", now()),
            Err(RegistryError::DuplicateCode("SAVE10".to_string()))
        );
    }

    #[test]
    fn create_checks_products_against_catalog() {
        let catalog: HashSet<ProductId> = ["P1".to_string()].into_iter().collect();
        let registry = Registry::new(Arc::new(InMemoryStore::new()), catalog, 4, 100);

        let mut def = definition("ONLYP");
        def.all_products = false;
        def.applicable_products = vec!["P1".to_string(), "P9".to_string()];
        assert_eq!(
            registry.create(def.clone(), "admin", now()),
            Err(RegistryError::UnknownProducts(vec!["P9".to_string()]))
        );

        def.applicable_products = vec!["P1".to_string()];
        assert!(registry.create(def, "admin", now()).is_ok());
    }

    #[test]
    fn update_revalidates_resulting_state() {
        let registry = registry();
        let rule = registry.create(definition("SAVE10"), "admin", now()).unwrap();

        // only the end date changes, but the resulting window is invalid
        let patch = RulePatch {
            end_date: Some(rule.start_date - Duration::days(1)),
            ..RulePatch::default()
        };
        assert_eq!(
            registry.update(rule.id, patch, "editor", now()),
            Err(RegistryError::Validation(ValidationError::InvalidWindow))
        );

        let patch = RulePatch {
            discount_type: Some(DiscountType::Fixed),
            discount_value: Some(Amount::from_whole(150)),
            ..RulePatch::default()
        };
        let updated = registry.update(rule.id, patch, "editor", now()).unwrap();
        assert_eq!(updated.discount.kind, DiscountType::Fixed);
        assert_eq!(updated.updated_by.as_deref(), Some("editor"));
        assert_eq!(updated.created_by, "admin");
        assert_eq!(updated.version, rule.version + 1);
    }

    #[test]
    fn update_unknown_rule() {
        let registry = registry();
        let id = Uuid::new_v4();
        assert_eq!(
            registry.update(id, RulePatch::default(), "admin", now()),
            Err(RegistryError::NotFound(id))
        );
    }

    #[test]
    fn update_to_taken_code() {
        let registry = registry();
        registry.create(definition("TAKEN"), "admin", now()).unwrap();
        let rule = registry.create(definition("SAVE10"), "admin", now()).unwrap();
        let patch = RulePatch {
            code: Some("taken".to_string()),
            ..RulePatch::default()
        };
        assert_eq!(
            registry.update(rule.id, patch, "admin", now()),
            Err(RegistryError::DuplicateCode("TAKEN".to_string()))
        );
    }

    #[test]
    fn deactivate_and_reactivate() {
        let registry = registry();
        let rule = registry.create(definition("SAVE10"), "admin", now()).unwrap();

        let inactive = registry.deactivate(rule.id, "admin", now()).unwrap();
        assert!(!inactive.is_active);
        let active = registry.activate(rule.id, "admin", now()).unwrap();
        assert!(active.is_active);
    }

    #[test]
    fn delete_unused_rule() {
        let registry = registry();
        let rule = registry.create(definition("SAVE10"), "admin", now()).unwrap();
        registry.delete(rule.id).unwrap();
        assert_eq!(registry.get(rule.id), Err(RegistryError::NotFound(rule.id)));
        assert_eq!(registry.delete(rule.id), Err(RegistryError::NotFound(rule.id)));
    }

    #[test]
    fn generated_codes_are_valid_and_prefixed() {
        let registry = registry();
        let mut rng = StdRng::seed_from_u64(7);
        let code = registry
            .generate_unique_code_with(&mut rng, "sale", 6)
            .unwrap();
        assert!(code.starts_with("SALE"));
        assert_eq!(code.len(), 10);
        assert!(validation::validate_code(&code).is_ok());
    }

    #[test]
    fn generation_rejects_impossible_shapes() {
        let registry = registry();
        assert!(matches!(
            registry.generate_unique_code("PROMO", 20),
            Err(RegistryError::Validation(ValidationError::CodeLength(25)))
        ));
        assert!(matches!(
            registry.generate_unique_code("PRO-", 4),
            Err(RegistryError::Validation(ValidationError::CodeCharacters(_)))
        ));
    }

    #[test]
    fn generation_gives_up_when_space_is_exhausted() {
        let registry = Registry::new(Arc::new(InMemoryStore::new()), AnyProduct, 4, 100);
        for c in CODE_ALPHABET {
            let code = format!("AB{}", char::from(*c));
            registry.create(definition(&code), "admin", now()).unwrap();
        }

        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            registry.generate_unique_code_with(&mut rng, "ab", 1),
            Err(RegistryError::GenerationExhausted {
                prefix: "AB".to_string(),
                attempts: 100
            })
        );
    }
}
