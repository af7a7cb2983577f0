//! Level trigger decision.

use rust_decimal::Decimal;

use crate::market::Side;

/// Whether a level's trigger condition holds for the live quote.
///
/// Up fires once the ask has moved to or just above the target, Down once
/// the bid has moved to or just below it, each within `premium` cents. A
/// zero target disables the level; `live_shares` must reach `min_shares`.
pub fn matches(
    live_ask: Decimal,
    live_bid: Decimal,
    target_price: Decimal,
    side: Side,
    live_shares: Decimal,
    min_shares: Decimal,
    premium: Decimal,
) -> bool {
    if target_price.is_zero() {
        return false;
    }
    if live_shares < min_shares {
        return false;
    }

    match side {
        Side::Up => (live_ask - target_price).abs() <= premium && live_ask >= target_price,
        Side::Down => (live_bid - target_price).abs() <= premium && live_bid <= target_price,
    }
}
