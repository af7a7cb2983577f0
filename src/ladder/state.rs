//! Ladder levels and run counters.

use rust_decimal::Decimal;
use serde::Serialize;

use super::amounts::LadderAmounts;
use crate::market::Side;

/// Number of levels per side.
pub const LEVELS: u8 = 5;

/// Level-5 targets above this mark a clean resolution.
pub const SAFE_RESET_THRESHOLD: Decimal = Decimal::from_parts(90, 0, 0, false, 0);

/// Lifecycle of one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LevelState {
    /// Waiting for its trigger.
    Armed,
    /// Trigger fired, execution in progress.
    Triggered,
    /// Executed and verified this run.
    Consumed,
}

/// One rung of a side's ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Level {
    /// Rung number, 1-5.
    pub index: u8,
    /// Target price in cents, 0 disables the level.
    pub target_price: Decimal,
    /// Stake for buy levels; level 5 has none.
    pub stake: Option<Decimal>,
    /// Counter-party shares needed to trust the quote.
    pub min_liquidity: Decimal,
    /// Current lifecycle state.
    pub state: LevelState,
}

impl Level {
    fn new(index: u8, min_liquidity: Decimal) -> Self {
        Self {
            index,
            target_price: Decimal::ZERO,
            stake: (index < LEVELS).then_some(Decimal::ZERO),
            min_liquidity,
            state: LevelState::Armed,
        }
    }

    /// Arm at `price`.
    pub fn arm(&mut self, price: Decimal) {
        self.target_price = price;
        self.state = LevelState::Armed;
    }

    /// Disable by zeroing the target.
    pub fn clear(&mut self) {
        self.arm(Decimal::ZERO);
    }

    /// Armed with a non-zero target.
    pub fn is_live(&self) -> bool {
        self.state == LevelState::Armed && !self.target_price.is_zero()
    }
}

/// The five levels of one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SideLadder {
    /// Side these levels trade.
    pub side: Side,
    /// Levels 1-5 in order.
    pub levels: Vec<Level>,
}

impl SideLadder {
    fn new(side: Side, min_liquidity: Decimal) -> Self {
        Self {
            side,
            levels: (1..=LEVELS).map(|n| Level::new(n, min_liquidity)).collect(),
        }
    }

    /// Level `n` (1-based).
    pub fn level(&self, n: u8) -> &Level {
        &self.levels[usize::from(n.clamp(1, LEVELS)) - 1]
    }

    /// Mutable level `n` (1-based).
    pub fn level_mut(&mut self, n: u8) -> &mut Level {
        &mut self.levels[usize::from(n.clamp(1, LEVELS)) - 1]
    }
}

/// Prices applied when a level fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillPrices {
    /// Default target price.
    pub default_price: Decimal,
    /// Level-5 price for the side that filled level 4.
    pub rebound_sell: Decimal,
    /// Level-5 price for both sides after a level-1 fill.
    pub safe_sell: Decimal,
}

/// Counters and balances reported alongside alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Buys executed this run.
    pub trade_count: u32,
    /// Sells executed this run.
    pub sell_count: u32,
    /// Lifetime ladder resets.
    pub reset_count: u32,
    /// Last polled cash balance.
    pub cash: Option<Decimal>,
    /// Last polled portfolio value.
    pub portfolio: Option<Decimal>,
}

/// Both tracks plus the counters of the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LadderState {
    /// Up track.
    pub up: SideLadder,
    /// Down track.
    pub down: SideLadder,
    /// Buys executed this run.
    pub trade_count: u32,
    /// Sells executed this run.
    pub sell_count: u32,
    /// Lifetime ladder resets.
    pub reset_count: u32,
    /// Cash captured at the start of the trading day.
    pub cash_snapshot: Option<Decimal>,
    /// Last polled cash balance.
    pub cash: Option<Decimal>,
    /// Last polled portfolio value.
    pub portfolio: Option<Decimal>,
    /// Whether ticks are evaluated.
    pub active: bool,
    /// Price used when arming levels.
    pub default_target_price: Decimal,
    /// Stakes currently applied to levels 1-4.
    pub amounts: Option<LadderAmounts>,
}

impl LadderState {
    /// Fresh state with every level disabled.
    pub fn new(default_target_price: Decimal, up_min: Decimal, down_min: Decimal) -> Self {
        Self {
            up: SideLadder::new(Side::Up, up_min),
            down: SideLadder::new(Side::Down, down_min),
            trade_count: 0,
            sell_count: 0,
            reset_count: 0,
            cash_snapshot: None,
            cash: None,
            portfolio: None,
            active: false,
            default_target_price,
            amounts: None,
        }
    }

    /// Track for `side`.
    pub fn side(&self, side: Side) -> &SideLadder {
        match side {
            Side::Up => &self.up,
            Side::Down => &self.down,
        }
    }

    /// Mutable track for `side`.
    pub fn side_mut(&mut self, side: Side) -> &mut SideLadder {
        match side {
            Side::Up => &mut self.up,
            Side::Down => &mut self.down,
        }
    }

    /// Level `n` of `side`.
    pub fn level(&self, side: Side, n: u8) -> &Level {
        self.side(side).level(n)
    }

    /// Mutable level `n` of `side`.
    pub fn level_mut(&mut self, side: Side, n: u8) -> &mut Level {
        self.side_mut(side).level_mut(n)
    }

    /// Write stakes into levels 1-4 of both sides.
    pub fn apply_amounts(&mut self, amounts: LadderAmounts) {
        for side in Side::ALL {
            for n in 1..LEVELS {
                self.level_mut(side, n).stake = amounts.for_level(n);
            }
        }
        self.amounts = Some(amounts);
    }

    /// Arm level 1 of both sides at the default price.
    pub fn arm_entry(&mut self) {
        let price = self.default_target_price;
        for side in Side::ALL {
            self.level_mut(side, 1).arm(price);
        }
    }

    /// Apply a verified level-`n` (1-4) buy on `side`.
    ///
    /// Consumes the level, clears the opposite side's level `n` and arms the
    /// opposite side's level `n + 1`. Level 1 also arms both exits at the
    /// safe price; level 4 arms this side's exit at the rebound price.
    pub fn record_fill(&mut self, side: Side, n: u8, prices: FillPrices) {
        let other = side.opposite();

        self.level_mut(side, n).state = LevelState::Consumed;
        self.level_mut(other, n).clear();

        match n {
            1 => {
                self.level_mut(other, 2).arm(prices.default_price);
                self.level_mut(side, LEVELS).arm(prices.safe_sell);
                self.level_mut(other, LEVELS).arm(prices.safe_sell);
            }
            2 | 3 => self.level_mut(other, n + 1).arm(prices.default_price),
            _ => {
                self.level_mut(side, LEVELS).arm(prices.rebound_sell);
                self.level_mut(other, LEVELS).arm(prices.default_price);
            }
        }

        self.trade_count += 1;
    }

    /// Whether both exits sit above the safe threshold.
    pub fn resolved_cleanly(&self) -> bool {
        self.up.level(LEVELS).target_price > SAFE_RESET_THRESHOLD
            && self.down.level(LEVELS).target_price > SAFE_RESET_THRESHOLD
    }

    /// Start a fresh cycle; returns whether `reset_count` was incremented.
    ///
    /// Counters go to zero, level 1 is re-armed at the default price on both
    /// sides, levels 2-5 are cleared.
    pub fn reset(&mut self) -> bool {
        let counted = !self.resolved_cleanly();
        if counted {
            self.reset_count += 1;
        }

        self.trade_count = 0;
        self.sell_count = 0;
        for side in Side::ALL {
            for n in 2..=LEVELS {
                self.level_mut(side, n).clear();
            }
        }
        self.arm_entry();
        counted
    }

    /// Zero the targets of levels 1-4 on both sides.
    pub fn clear_buy_levels(&mut self) {
        for side in Side::ALL {
            for n in 1..LEVELS {
                self.level_mut(side, n).clear();
            }
        }
    }

    /// Counters for alert bodies.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            trade_count: self.trade_count,
            sell_count: self.sell_count,
            reset_count: self.reset_count,
            cash: self.cash,
            portfolio: self.portfolio,
        }
    }

    /// Whether any level is mid-execution.
    pub fn has_triggered(&self) -> bool {
        Side::ALL.iter().any(|s| {
            self.side(*s)
                .levels
                .iter()
                .any(|l| l.state == LevelState::Triggered)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn prices() -> FillPrices {
        FillPrices {
            default_price: dec!(52),
            rebound_sell: dec!(47),
            safe_sell: dec!(99),
        }
    }

    fn armed() -> LadderState {
        let mut state = LadderState::new(dec!(52), dec!(100), dec!(100));
        state.arm_entry();
        state
    }

    #[test]
    fn level_one_fill_cross_arms_and_sets_safe_exits() {
        let mut state = armed();
        state.record_fill(Side::Up, 1, prices());

        assert_eq!(state.level(Side::Up, 1).state, LevelState::Consumed);
        assert_eq!(state.level(Side::Down, 1).target_price, dec!(0));
        assert_eq!(state.level(Side::Down, 2).target_price, dec!(52));
        assert_eq!(state.level(Side::Up, 2).target_price, dec!(0));
        assert_eq!(state.level(Side::Up, 5).target_price, dec!(99));
        assert_eq!(state.level(Side::Down, 5).target_price, dec!(99));
        assert_eq!(state.trade_count, 1);
    }

    #[test]
    fn level_four_fill_arms_rebound_exit() {
        let mut state = armed();
        state.record_fill(Side::Down, 4, prices());

        assert_eq!(state.level(Side::Down, 5).target_price, dec!(47));
        assert_eq!(state.level(Side::Up, 5).target_price, dec!(52));
        assert_eq!(state.level(Side::Down, 4).state, LevelState::Consumed);
    }

    #[test]
    fn reset_counts_unless_both_exits_safe() {
        let mut state = armed();
        state.record_fill(Side::Up, 1, prices());
        assert!(!state.reset());
        assert_eq!(state.reset_count, 0);

        state.record_fill(Side::Up, 1, prices());
        state.record_fill(Side::Down, 2, prices());
        state.level_mut(Side::Up, 5).arm(dec!(47));
        assert!(state.reset());
        assert_eq!(state.reset_count, 1);
        assert_eq!(state.trade_count, 0);
        assert_eq!(state.level(Side::Up, 1).target_price, dec!(52));
        assert_eq!(state.level(Side::Down, 1).target_price, dec!(52));
        assert_eq!(state.level(Side::Up, 3).target_price, dec!(0));
        assert_eq!(state.level(Side::Up, 5).target_price, dec!(0));
    }

    #[test]
    fn apply_amounts_leaves_exit_without_stake() {
        let mut state = armed();
        state.apply_amounts(LadderAmounts {
            l1: dec!(2.5),
            l2: dec!(5.5),
            l3: dec!(6.6),
            l4: dec!(7.92),
        });

        assert_eq!(state.level(Side::Down, 3).stake, Some(dec!(6.6)));
        assert_eq!(state.level(Side::Up, 5).stake, None);
    }
}
