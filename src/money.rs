// 💰 Money - centavo rounding, amount parsing, SQLite column helpers
//
// Amounts are rust_decimal::Decimal everywhere and stored as TEXT so that
// SQLite never rounds them through a float.

use rusqlite::types::Type;
use rusqlite::Row;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Round to centavos (2 dp, midpoint away from zero)
pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Parse a user-entered amount ("1,250.50", "₱300", "45")
///
/// Must be strictly positive; result is rounded to centavos.
pub fn parse_amount(input: &str) -> Result<Decimal> {
    let cleaned: String = input
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '₱' | '$' | ' '))
        .collect();

    let amount = Decimal::from_str(&cleaned)
        .map_err(|e| Error::InvalidAmount(format!("'{}': {}", input, e)))?;

    if amount <= Decimal::ZERO {
        return Err(Error::InvalidAmount(format!("'{}' must be greater than zero", input)));
    }

    Ok(round_cents(amount))
}

/// Parse a rate given either as a fraction ("0.12") or a percentage ("12%")
pub fn parse_rate(input: &str) -> Result<Decimal> {
    let trimmed = input.trim();
    let (digits, percent) = match trimmed.strip_suffix('%') {
        Some(d) => (d.trim(), true),
        None => (trimmed, false),
    };

    let value = Decimal::from_str(digits)
        .map_err(|e| Error::InvalidAmount(format!("rate '{}': {}", input, e)))?;

    if value < Decimal::ZERO {
        return Err(Error::InvalidAmount(format!("rate '{}' cannot be negative", input)));
    }

    Ok(if percent { value / Decimal::ONE_HUNDRED } else { value })
}

/// Format as peso amount with thousands separators: 1234.5 → "1,234.50"
pub fn format_amount(amount: Decimal) -> String {
    let rounded = round_cents(amount);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let mut magnitude = rounded.abs();
    magnitude.rescale(2);
    let text = magnitude.to_string();
    let (whole, frac) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::new();
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}{}.{}", if negative { "-" } else { "" }, grouped, frac)
}

/// Two decimals, no grouping: 1200.5 → "1200.50" (CSV and JSON output)
pub fn to_fixed(amount: Decimal) -> String {
    let mut rounded = round_cents(amount);
    rounded.rescale(2);
    rounded.to_string()
}

// ============================================================================
// SQLITE HELPERS
// ============================================================================

/// Decimal → TEXT column value
pub fn to_sql_text(amount: Decimal) -> String {
    amount.normalize().to_string()
}

/// Read a TEXT column as Decimal
pub fn get_decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a TEXT column through a `FromStr` impl (status/role enums)
pub fn get_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    T::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_cents_midpoint_away_from_zero() {
        assert_eq!(round_cents(dec!(10.005)), dec!(10.01));
        assert_eq!(round_cents(dec!(10.004)), dec!(10.00));
        assert_eq!(round_cents(dec!(-2.345)), dec!(-2.35));
    }

    #[test]
    fn test_parse_amount_accepts_grouped_input() {
        assert_eq!(parse_amount("1,250.50").unwrap(), dec!(1250.50));
        assert_eq!(parse_amount("₱300").unwrap(), dec!(300));
        assert_eq!(parse_amount(" 45.999 ").unwrap(), dec!(46.00));
    }

    #[test]
    fn test_parse_amount_rejects_zero_negative_and_garbage() {
        assert!(matches!(parse_amount("0"), Err(Error::InvalidAmount(_))));
        assert!(matches!(parse_amount("-5"), Err(Error::InvalidAmount(_))));
        assert!(matches!(parse_amount("abc"), Err(Error::InvalidAmount(_))));
    }

    #[test]
    fn test_parse_rate_percent_and_fraction() {
        assert_eq!(parse_rate("12%").unwrap(), dec!(0.12));
        assert_eq!(parse_rate("0.015").unwrap(), dec!(0.015));
        assert!(parse_rate("-1%").is_err());
    }

    #[test]
    fn test_format_amount_groups_thousands() {
        assert_eq!(format_amount(dec!(1234567.5)), "1,234,567.50");
        assert_eq!(format_amount(dec!(999)), "999.00");
        assert_eq!(format_amount(dec!(-1500)), "-1,500.00");
        assert_eq!(format_amount(Decimal::ZERO), "0.00");
    }

    #[test]
    fn test_to_fixed() {
        assert_eq!(to_fixed(dec!(1200.5)), "1200.50");
        assert_eq!(to_fixed(dec!(5000)), "5000.00");
        assert_eq!(to_fixed(dec!(-0.126)), "-0.13");
    }
}
