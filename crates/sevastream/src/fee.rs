//! Protocol fee policy.
//!
//! `fee = max(minimum_fee, amount × fee_rate)`, rounded up to the paisa.
//! The policy is pure and deterministic; one instance is owned by each
//! scheduler so there is exactly one source of truth per engine.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Decimal places fees are rounded to (1 paisa).
pub const FEE_SCALE: u32 = 2;

/// Fee configuration for a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    /// Fraction of the amount charged per tick (0.001 = 0.1%).
    pub fee_rate: Decimal,
    /// Floor applied to every tick regardless of amount.
    pub minimum_fee: Decimal,
}

impl FeePolicy {
    /// Rate used by the streaming helpers: 0.1% with a ₹0.01 floor.
    pub const STREAMING: FeePolicy = FeePolicy {
        fee_rate: Decimal::from_parts(1, 0, 0, false, 3),
        minimum_fee: Decimal::from_parts(1, 0, 0, false, 2),
    };

    /// Rate quoted on aid-request donations: 2% with a ₹0.01 floor.
    pub const AID_REQUEST: FeePolicy = FeePolicy {
        fee_rate: Decimal::from_parts(2, 0, 0, false, 2),
        minimum_fee: Decimal::from_parts(1, 0, 0, false, 2),
    };

    pub fn new(fee_rate: Decimal, minimum_fee: Decimal) -> Self {
        Self {
            fee_rate,
            minimum_fee,
        }
    }

    /// Fee charged on top of `amount` for one tick, saturating at
    /// `Decimal::MAX`.
    pub fn fee(&self, amount: Decimal) -> Decimal {
        self.checked_fee(amount).unwrap_or(Decimal::MAX)
    }

    /// Like [`fee`](Self::fee), or `None` if `amount × fee_rate` overflows.
    pub fn checked_fee(&self, amount: Decimal) -> Option<Decimal> {
        let proportional = amount
            .checked_mul(self.fee_rate)?
            .round_dp_with_strategy(FEE_SCALE, RoundingStrategy::AwayFromZero);
        Some(proportional.max(self.minimum_fee))
    }

    /// What the donor is debited per tick: `amount + fee`.
    pub fn total_debit(&self, amount: Decimal) -> Decimal {
        amount.saturating_add(self.fee(amount))
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self::STREAMING
    }
}
