//! Stake schedule derived from the day's opening cash.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::LadderError;

/// Stakes for levels 1-4, shared by both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LadderAmounts {
    /// Level 1 stake.
    pub l1: Decimal,
    /// Level 2 stake.
    pub l2: Decimal,
    /// Level 3 stake.
    pub l3: Decimal,
    /// Level 4 stake.
    pub l4: Decimal,
}

impl LadderAmounts {
    /// Stake for level `n` (1-4).
    pub fn for_level(&self, n: u8) -> Option<Decimal> {
        match n {
            1 => Some(self.l1),
            2 => Some(self.l2),
            3 => Some(self.l3),
            4 => Some(self.l4),
            _ => None,
        }
    }

    /// Total committed if all four levels fill on one side.
    pub fn total(&self) -> Decimal {
        self.l1 + self.l2 + self.l3 + self.l4
    }
}

/// Compute the ladder stakes.
///
/// Percentages are ratios (`0.025` for 2.5%). `L1 = cash * initial`,
/// `L2 = L1 * first_rebound`, `L3 = L2 * n_rebound`, `L4 = L3 * n_rebound`.
pub fn compute_ladder_amounts(
    cash: Decimal,
    initial_pct: Decimal,
    first_rebound_pct: Decimal,
    n_rebound_pct: Decimal,
) -> Result<LadderAmounts, LadderError> {
    if cash <= Decimal::ZERO {
        return Err(LadderError::InvalidInput(format!(
            "cash must be positive, got {}",
            cash
        )));
    }

    for (name, pct) in [
        ("initial", initial_pct),
        ("first rebound", first_rebound_pct),
        ("n rebound", n_rebound_pct),
    ] {
        if pct <= Decimal::ZERO {
            return Err(LadderError::InvalidInput(format!(
                "{} percentage must be positive, got {}",
                name, pct
            )));
        }
    }

    let l1 = cash * initial_pct;
    let l2 = l1 * first_rebound_pct;
    let l3 = l2 * n_rebound_pct;
    let l4 = l3 * n_rebound_pct;

    Ok(LadderAmounts { l1, l2, l3, l4 })
}

/// Convert a percent figure (`2.5`) into a ratio (`0.025`).
pub fn percent(value: Decimal) -> Decimal {
    value / Decimal::ONE_HUNDRED
}
