//! The 5-level Up/Down trade ladder.
//!
//! - [`amounts`]: stake schedule derived from the cash snapshot
//! - [`matcher`]: per-level trigger decision
//! - [`state`]: levels, counters and the fill/reset transitions
//! - [`engine`]: the tick-driven state machine that executes trades

pub mod amounts;
pub mod engine;
pub mod matcher;
pub mod state;

pub use amounts::{compute_ladder_amounts, percent, LadderAmounts};
pub use engine::{ExitBands, ExitKind, LadderParams, PriceBand, QuoteGuards, TickOutcome, TradeLadder};
pub use matcher::matches;
pub use state::{FillPrices, LadderState, Level, LevelState, RunSummary, SideLadder, LEVELS};
