use crate::Amount;
use crate::model::{DiscountRule, UsageRecord};
use crate::rule::{Eligibility, IneligibleReason};

/// Result of a dry-run eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityCheck {
    pub eligible: bool,
    pub reason: Option<IneligibleReason>,
    /// Discount the order would get, when eligible.
    pub discount_amount: Option<Amount>,
}

impl EligibilityCheck {
    pub fn new(eligibility: Eligibility, discount: Amount) -> Self {
        match eligibility {
            Eligibility::Eligible => Self {
                eligible: true,
                reason: None,
                discount_amount: Some(discount),
            },
            Eligibility::Ineligible(reason) => Self {
                eligible: false,
                reason: Some(reason),
                discount_amount: None,
            },
        }
    }
}

/// A committed redemption.
#[derive(Debug, Clone, PartialEq)]
pub struct Redemption {
    pub discount_amount: Amount,
    pub record: UsageRecord,
    /// The rule as it stands right after the commit.
    pub rule: DiscountRule,
    /// Commit attempts it took, including the successful one.
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligible_check_carries_discount() {
        let check = EligibilityCheck::new(Eligibility::Eligible, Amount::from_whole(5));
        assert!(check.eligible);
        assert_eq!(check.reason, None);
        assert_eq!(check.discount_amount, Some(Amount::from_whole(5)));
    }

    #[test]
    fn ineligible_check_carries_reason_only() {
        let check = EligibilityCheck::new(
            Eligibility::Ineligible(IneligibleReason::Expired),
            Amount::from_whole(5),
        );
        assert!(!check.eligible);
        assert_eq!(check.reason, Some(IneligibleReason::Expired));
        assert_eq!(check.discount_amount, None);
    }
}
