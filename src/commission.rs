//! Swap commission tiers
//!
//! - up to and including 100: 2%
//! - above 100: 1%

use rust_decimal::Decimal;

/// Amounts at or below this pay the higher rate
const TIER_BOUNDARY: Decimal = Decimal::from_parts(100, 0, 0, false, 0);
/// 2%
const LOWER_TIER_RATE: Decimal = Decimal::from_parts(2, 0, 0, false, 2);
/// 1%
const UPPER_TIER_RATE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Rate applied to a notional amount
pub fn commission_rate(amount: Decimal) -> Decimal {
    if amount <= TIER_BOUNDARY {
        LOWER_TIER_RATE
    } else {
        UPPER_TIER_RATE
    }
}

/// Fee charged on a swap of `amount`. Non-positive amounts pay nothing.
pub fn commission(amount: Decimal) -> Decimal {
    if amount <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (amount * commission_rate(amount)).normalize()
}

/// Amount left for the swap after the fee
pub fn net_of_commission(amount: Decimal) -> Decimal {
    amount - commission(amount)
}
