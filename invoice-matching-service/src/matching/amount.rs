//! Monetary normalisation and the shared settlement tolerance.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use std::str::FromStr;

/// Two amounts within this distance are the same amount. Every exactness and
/// settlement decision in the engine goes through [`approx_equal`] or
/// [`is_negligible`] with this value.
pub const AMOUNT_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Funding percentage at which a subscription counts as fully funded.
pub const FUNDED_RATIO_THRESHOLD: Decimal = Decimal::from_parts(9999, 0, 0, false, 2);

/// Parse a loosely-typed amount. Numbers and numeric strings are accepted;
/// anything else (null, booleans, garbage) becomes zero.
pub fn to_amount(value: &Value) -> Decimal {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| n.as_u64().map(Decimal::from))
            .or_else(|| n.as_f64().and_then(Decimal::from_f64))
            .unwrap_or(Decimal::ZERO),
        Value::String(s) => parse_amount_str(s),
        _ => Decimal::ZERO,
    }
}

/// [`to_amount`] for an optional field.
pub fn to_amount_opt(value: Option<&Value>) -> Decimal {
    value.map(to_amount).unwrap_or(Decimal::ZERO)
}

fn parse_amount_str(s: &str) -> Decimal {
    let trimmed = s.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .unwrap_or(Decimal::ZERO)
}

/// Round to cents, halves away from zero.
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn approx_equal(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() <= AMOUNT_EPSILON
}

/// True when the amount is zero for settlement purposes (including negatives).
pub fn is_negligible(amount: Decimal) -> bool {
    amount <= AMOUNT_EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn epsilon_is_one_cent() {
        assert_eq!(AMOUNT_EPSILON, dec!(0.01));
        assert_eq!(FUNDED_RATIO_THRESHOLD, dec!(99.99));
    }

    #[test]
    fn to_amount_accepts_numbers_and_numeric_strings() {
        assert_eq!(to_amount(&json!(1000)), dec!(1000));
        assert_eq!(to_amount(&json!(12.5)), dec!(12.5));
        assert_eq!(to_amount(&json!("400.25")), dec!(400.25));
        assert_eq!(to_amount(&json!(" 75 ")), dec!(75));
    }

    #[test]
    fn to_amount_degrades_to_zero() {
        assert_eq!(to_amount(&Value::Null), Decimal::ZERO);
        assert_eq!(to_amount(&json!("abc")), Decimal::ZERO);
        assert_eq!(to_amount(&json!(true)), Decimal::ZERO);
        assert_eq!(to_amount(&json!({"amount": 5})), Decimal::ZERO);
        assert_eq!(to_amount_opt(None), Decimal::ZERO);
    }

    #[test]
    fn round2_rounds_half_away_from_zero() {
        assert_eq!(round2(dec!(10.005)), dec!(10.01));
        assert_eq!(round2(dec!(10.004)), dec!(10.00));
        assert_eq!(round2(dec!(99.999)), dec!(100.00));
    }

    #[test]
    fn approx_equal_uses_cent_tolerance() {
        assert!(approx_equal(dec!(100.00), dec!(100.01)));
        assert!(approx_equal(dec!(100.01), dec!(100.00)));
        assert!(!approx_equal(dec!(100.00), dec!(100.02)));
        assert!(is_negligible(dec!(0.01)));
        assert!(is_negligible(dec!(-5)));
        assert!(!is_negligible(dec!(0.02)));
    }
}
