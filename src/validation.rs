//! Rule definition validation, shared by the create and update paths.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::Amount;
use crate::model::{DiscountType, ProductScope, RuleDefinition};

pub const MIN_CODE_LEN: usize = 3;
pub const MAX_CODE_LEN: usize = 20;

/// A rule definition violates one of the rule invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("code must be {MIN_CODE_LEN}-{MAX_CODE_LEN} characters, got {0}")]
    CodeLength(usize),
    #[error("code '{0}' must be alphanumeric")]
    CodeCharacters(String),
    #[error("discount value must be positive, got {0}")]
    NonPositiveDiscount(Amount),
    #[error("percentage discount cannot exceed 100, got {0}")]
    PercentageTooLarge(Amount),
    #[error("minimum order value cannot be negative, got {0}")]
    NegativeMinimumOrderValue(Amount),
    #[error("usage limit must be positive")]
    ZeroUsageLimit,
    #[error("usage per customer must be positive")]
    ZeroUsagePerCustomer,
    #[error("usage per customer ({per_customer}) cannot exceed usage limit ({limit})")]
    PerCustomerExceedsLimit { per_customer: u32, limit: u32 },
    #[error("usage limit ({limit}) is below the current usage count ({used})")]
    LimitBelowUsage { limit: u32, used: u32 },
    #[error("start date must be before end date")]
    InvalidWindow,
    #[error("a rule for all products cannot list applicable products")]
    ProductsWithAllProducts,
    #[error("a rule without all products needs at least one applicable product")]
    MissingApplicableProducts,
}

/// Normalized parts of a definition that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    pub code: String,
    pub scope: ProductScope,
}

/// Uppercase and trim a code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Check a code's shape after normalization.
pub fn validate_code(code: &str) -> Result<(), ValidationError> {
    let len = code.chars().count();
    if !(MIN_CODE_LEN..=MAX_CODE_LEN).contains(&len) {
        return Err(ValidationError::CodeLength(len));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::CodeCharacters(code.to_string()));
    }
    Ok(())
}

/// Validate a full definition, stopping at the first violation.
///
/// `usage_count` is the rule's current count (0 on create) so an update
/// cannot lower the limit below what was already redeemed.
pub fn validate(definition: &RuleDefinition, usage_count: u32) -> Result<Validated, ValidationError> {
    let code = normalize_code(&definition.code);
    validate_code(&code)?;

    if !definition.discount_value.is_positive() {
        return Err(ValidationError::NonPositiveDiscount(definition.discount_value));
    }
    if definition.discount_type == DiscountType::Percentage
        && definition.discount_value > Amount::from_whole(100)
    {
        return Err(ValidationError::PercentageTooLarge(definition.discount_value));
    }
    if definition.minimum_order_value.is_negative() {
        return Err(ValidationError::NegativeMinimumOrderValue(
            definition.minimum_order_value,
        ));
    }

    if definition.usage_limit == Some(0) {
        return Err(ValidationError::ZeroUsageLimit);
    }
    if definition.usage_per_customer == Some(0) {
        return Err(ValidationError::ZeroUsagePerCustomer);
    }
    if let (Some(per_customer), Some(limit)) = (definition.usage_per_customer, definition.usage_limit)
    {
        if per_customer > limit {
            return Err(ValidationError::PerCustomerExceedsLimit {
                per_customer,
                limit,
            });
        }
    }
    if let Some(limit) = definition.usage_limit {
        if limit < usage_count {
            return Err(ValidationError::LimitBelowUsage {
                limit,
                used: usage_count,
            });
        }
    }

    if definition.start_date >= definition.end_date {
        return Err(ValidationError::InvalidWindow);
    }

    let scope = match (definition.all_products, definition.applicable_products.is_empty()) {
        (true, true) => ProductScope::All,
        (true, false) => return Err(ValidationError::ProductsWithAllProducts),
        (false, true) => return Err(ValidationError::MissingApplicableProducts),
        (false, false) => ProductScope::Only(
            definition
                .applicable_products
                .iter()
                .map(|p| p.trim().to_string())
                .collect::<BTreeSet<_>>(),
        ),
    };

    Ok(Validated { code, scope })
}
