//! Money Conversion Module
//!
//! Conversion between on-chain base units (`u128`: lamports, wei, token
//! atoms) and the `Decimal` amounts stored in the deposit ledger. All
//! conversions MUST go through this module.
//!
//! ## Design Principles
//! 1. Asset decimals come from chain configuration, never from the RPC payload
//! 2. Explicit Error Handling: No silent truncation
//! 3. Exact arithmetic: amounts never pass through floating point
//!
//! ## Usage
//! ```rust
//! use deposit_sentinel::money::{to_decimal, to_base_units};
//!
//! // 50 USDC (6 decimals) observed on chain
//! let amount = to_decimal(50_000_000, 6).unwrap();
//! assert_eq!(amount.to_string(), "50");
//! assert_eq!(to_base_units(amount, 6).unwrap(), 50_000_000);
//! ```

use rust_decimal::prelude::*;
use thiserror::Error;

/// Highest scale `Decimal` can carry.
pub const MAX_DECIMALS: u32 = 28;

// ============================================================================
// Error Types
// ============================================================================

/// Money conversion errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must not be negative")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported asset decimals: {0}")]
    UnsupportedDecimals(u32),
}

fn check_decimals(decimals: u32) -> Result<(), MoneyError> {
    if decimals > MAX_DECIMALS {
        return Err(MoneyError::UnsupportedDecimals(decimals));
    }
    Ok(())
}

// ============================================================================
// Chain → Ledger (u128 base units → Decimal)
// ============================================================================

/// Convert raw on-chain base units to a normalized `Decimal`.
///
/// # Errors
/// * `UnsupportedDecimals` - decimals beyond `MAX_DECIMALS`
/// * `Overflow` - value does not fit the 96-bit `Decimal` mantissa
pub fn to_decimal(raw: u128, decimals: u32) -> Result<Decimal, MoneyError> {
    check_decimals(decimals)?;
    let signed = i128::try_from(raw).map_err(|_| MoneyError::Overflow)?;
    Decimal::try_from_i128_with_scale(signed, decimals)
        .map(|d| d.normalize())
        .map_err(|_| MoneyError::Overflow)
}

// ============================================================================
// Ledger → Chain (Decimal → u128 base units)
// ============================================================================

/// Convert a ledger amount back to base units for transaction construction.
///
/// # Errors
/// * `InvalidAmount` - negative input
/// * `PrecisionOverflow` - more fractional digits than the asset supports
/// * `Overflow` - result would overflow
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<u128, MoneyError> {
    check_decimals(decimals)?;
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }

    let normalized = amount.normalize();
    if normalized.scale() > decimals {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: decimals,
        });
    }

    // mantissa * 10^(decimals - scale), done in u128 to stay exact
    let mantissa = u128::try_from(normalized.mantissa()).map_err(|_| MoneyError::InvalidAmount)?;
    let shift = decimals - normalized.scale();
    10u128
        .checked_pow(shift)
        .and_then(|m| mantissa.checked_mul(m))
        .ok_or(MoneyError::Overflow)
}

// ============================================================================
// Operator input (config thresholds, CLI)
// ============================================================================

/// Parse an operator-supplied amount string such as `"10"` or `"0.05"`.
///
/// Zero is accepted (a zero sweep threshold sweeps every confirmed deposit).
/// Formats like `".5"`, `"5."`, signs and exponents are rejected.
pub fn parse_amount(amount_str: &str, decimals: u32) -> Result<Decimal, MoneyError> {
    check_decimals(decimals)?;
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }
    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let (whole, frac) = match amount_str.split_once('.') {
        None => (amount_str, ""),
        Some((w, f)) => {
            if w.is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                ));
            }
            if f.is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                ));
            }
            (w, f)
        }
    };

    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in amount: {}",
            amount_str
        )));
    }

    // Precision validation: REJECT if too many decimals (no silent truncation!)
    if frac.len() > decimals as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: decimals,
        });
    }

    Decimal::from_str_exact(amount_str)
        .map(|d| d.normalize())
        .map_err(|_| MoneyError::Overflow)
}

/// Render base units for logs, e.g. `format_amount(1_500_000, 6) == "1.5"`.
pub fn format_amount(raw: u128, decimals: u32) -> String {
    match to_decimal(raw, decimals) {
        Ok(d) => d.to_string(),
        Err(_) => format!("{}e-{}", raw, decimals),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qa_to_decimal_common_assets() {
        assert_eq!(to_decimal(50_000_000, 6).unwrap(), Decimal::from(50));
        assert_eq!(to_decimal(1, 9).unwrap().to_string(), "0.000000001");
        assert_eq!(
            to_decimal(1_500_000_000_000_000_000, 18).unwrap().to_string(),
            "1.5"
        );
        assert_eq!(to_decimal(0, 18).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn qa_to_decimal_overflow() {
        assert_eq!(to_decimal(u128::MAX, 18), Err(MoneyError::Overflow));
        assert_eq!(to_decimal(1, 29), Err(MoneyError::UnsupportedDecimals(29)));
    }

    #[test]
    fn qa_to_base_units_exact() {
        assert_eq!(to_base_units(Decimal::from(50), 6).unwrap(), 50_000_000);
        assert_eq!(
            to_base_units(Decimal::from_str("0.5").unwrap(), 6).unwrap(),
            500_000
        );
        assert_eq!(
            to_base_units(Decimal::from_str("1.50").unwrap(), 18).unwrap(),
            1_500_000_000_000_000_000
        );
    }

    #[test]
    fn qa_to_base_units_rejects_excess_precision() {
        let err = to_base_units(Decimal::from_str("0.0000001").unwrap(), 6).unwrap_err();
        assert_eq!(
            err,
            MoneyError::PrecisionOverflow {
                provided: 7,
                max: 6
            }
        );
    }

    #[test]
    fn qa_to_base_units_rejects_negative() {
        assert_eq!(
            to_base_units(Decimal::from(-1), 6),
            Err(MoneyError::InvalidAmount)
        );
    }

    #[test]
    fn qa_parse_amount_variations() {
        assert_eq!(parse_amount("10", 6).unwrap(), Decimal::from(10));
        assert_eq!(parse_amount("0.05", 9).unwrap().to_string(), "0.05");
        assert_eq!(parse_amount(" 0 ", 6).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn qa_parse_amount_invalid_formats() {
        assert!(matches!(
            parse_amount(".5", 6),
            Err(MoneyError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_amount("5.", 6),
            Err(MoneyError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_amount("1e5", 6),
            Err(MoneyError::InvalidFormat(_))
        ));
        assert_eq!(parse_amount("-1", 6), Err(MoneyError::InvalidAmount));
        assert_eq!(
            parse_amount("0.1234567", 6),
            Err(MoneyError::PrecisionOverflow {
                provided: 7,
                max: 6
            })
        );
    }

    #[test]
    fn qa_format_amount() {
        assert_eq!(format_amount(1_500_000, 6), "1.5");
        assert_eq!(format_amount(0, 9), "0");
    }
}
