//! Error types for redemption processing.

use thiserror::Error;

use crate::Amount;
use crate::ledger::LedgerError;
use crate::model::OrderId;
use crate::registry::RegistryError;
use crate::rule::IneligibleReason;
use crate::store::StoreError;

/// Top-level error for engine operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Error during eligibility checks and redemptions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedeemError {
    #[error("code '{0}' not found")]
    NotFound(String),

    #[error("order '{0}' already redeemed a code")]
    AlreadyRedeemed(OrderId),

    #[error("code not applicable: {0}")]
    Ineligible(IneligibleReason),

    #[error("code '{code}' is contended, gave up after {attempts} attempts")]
    Conflict { code: String, attempts: u32 },

    #[error("order value cannot be negative, got {0}")]
    NegativeOrderValue(Amount),

    #[error("order value {0} exceeds the accepted maximum")]
    OrderValueTooLarge(Amount),

    #[error("order id is required")]
    MissingOrderId,

    #[error(transparent)]
    Ledger(LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
