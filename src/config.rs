//! Engine tunables.

use serde::Deserialize;

use crate::Amount;

/// Tunables for the redemption engine and the code registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Commit attempts per redemption or rule update, including the first.
    pub max_commit_attempts: u32,
    /// Random candidates tried before code generation gives up.
    pub code_generation_attempts: u32,
    /// Accepted gap between a recorded discount and its recomputed value.
    pub discount_tolerance: Amount,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 4,
            code_generation_attempts: 100,
            discount_tolerance: Amount::from_float(0.01),
        }
    }
}

impl EngineConfig {
    pub fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts.max(1);
        self
    }

    pub fn with_code_generation_attempts(mut self, attempts: u32) -> Self {
        self.code_generation_attempts = attempts.max(1);
        self
    }

    pub fn with_discount_tolerance(mut self, tolerance: Amount) -> Self {
        self.discount_tolerance = tolerance;
        self
    }
}
