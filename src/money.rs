//! Fixed-point EUR helpers. SQLite has no decimal type; EUR-denominated
//! columns are stored as `INTEGER` minor units (cents) so all arithmetic
//! that happens inside SQL (balance CAS debits/credits) is exact integer
//! arithmetic rather than floating point. Non-EUR decimal fields (crypto
//! amounts, discount percentages) are stored as `TEXT` and parsed back
//! through `Decimal::from_str`; they are never arithmetically compared
//! inside a SQL statement, only in Rust after being read.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

const SCALE: i64 = 100;

/// Converts a EUR amount to integer cents, rounding down to 2dp.
pub fn to_minor_units(amount: Decimal) -> i64 {
    let scaled = (amount * Decimal::from(SCALE)).trunc();
    scaled.to_i64().unwrap_or(0)
}

pub fn from_minor_units(cents: i64) -> Decimal {
    Decimal::from(cents) / Decimal::from(SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_exactly() {
        let amount = Decimal::new(1250, 2); // 12.50
        assert_eq!(to_minor_units(amount), 1250);
        assert_eq!(from_minor_units(1250), amount);
    }

    #[test]
    fn truncates_rather_than_rounds() {
        let amount = Decimal::new(1259, 3); // 1.259
        assert_eq!(to_minor_units(amount), 125);
    }
}
