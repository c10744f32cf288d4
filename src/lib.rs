pub mod amount;
pub mod config;
pub mod csv;
pub mod engine;
pub mod ledger;
pub mod model;
pub mod registry;
pub mod rule;
pub mod store;
pub mod validation;

pub use amount::Amount;
pub use config::EngineConfig;
pub use engine::{EligibilityCheck, Engine, EngineError, RedeemError, Redemption};
pub use ledger::{UsageLedger, UsageStatistics};
pub use model::{
    DiscountRule, DiscountType, OrderContext, RedemptionRequest, RuleDefinition, RuleId,
    RulePatch, UsageRecord,
};
pub use registry::{AnyProduct, ProductCatalog, Registry, RegistryError};
pub use rule::{Eligibility, IneligibleReason};
pub use store::{InMemoryStore, Store, StoreError};
