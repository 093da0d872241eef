//! Amount normalization between major and minor currency units.
//!
//! Processor APIs deal in minor units (cents for USD, kobo for NGN, cents
//! for KES); the local data model stores amounts in major units as exact
//! decimals. Conversions go through a per-currency scale table with a safe
//! default, so adding a currency never touches call sites.
//!
//! Amounts are `rust_decimal::Decimal` throughout - never floats.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::AppError;

/// Minor-unit scale (number of fractional digits) per currency code.
///
/// Every currency in this domain uses a 100:1 major:minor ratio, but the
/// table keeps the mapping explicit and extensible.
const MINOR_UNIT_SCALE: &[(&str, u32)] = &[
    ("KES", 2),
    ("NGN", 2),
    ("USD", 2),
    ("GHS", 2),
    ("ZAR", 2),
    ("TZS", 2),
    ("UGX", 2),
];

/// Fallback scale for currency codes not in the table.
const DEFAULT_SCALE: u32 = 2;

/// Look up the minor-unit scale for a currency code (case-insensitive).
fn scale_for(currency: &str) -> u32 {
    let code = currency.to_ascii_uppercase();
    MINOR_UNIT_SCALE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, scale)| *scale)
        .unwrap_or(DEFAULT_SCALE)
}

/// Convert a major-unit amount to the processor's minor-unit integer.
///
/// # Errors
///
/// Returns `InvalidRequest` if the amount carries more fractional digits
/// than the currency supports (e.g. 10.005 KES), or if it is negative or
/// too large for an i64. Silently rounding money is not an option here.
pub fn to_minor_units(amount: Decimal, currency: &str) -> Result<i64, AppError> {
    if amount.is_sign_negative() {
        return Err(AppError::InvalidRequest(
            "Amount must not be negative".to_string(),
        ));
    }

    let scale = scale_for(currency);
    // Client-supplied amounts reach this path; an overflow is a bad
    // request, not a crash
    let scaled = amount
        .checked_mul(Decimal::from(10i64.pow(scale)))
        .ok_or_else(|| {
            AppError::InvalidRequest(format!("Amount {} out of range for {}", amount, currency))
        })?;

    if !scaled.fract().is_zero() {
        return Err(AppError::InvalidRequest(format!(
            "Amount {} has more than {} decimal places for {}",
            amount, scale, currency
        )));
    }

    scaled.trunc().to_i64().ok_or_else(|| {
        AppError::InvalidRequest(format!("Amount {} out of range for {}", amount, currency))
    })
}

/// Convert a processor-reported minor-unit integer back to major units.
pub fn from_minor_units(minor: i64, currency: &str) -> Decimal {
    Decimal::new(minor, scale_for(currency))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn converts_major_to_minor_units() {
        assert_eq!(to_minor_units(dec("1500.00"), "KES").unwrap(), 150_000);
        assert_eq!(to_minor_units(dec("0.01"), "USD").unwrap(), 1);
        assert_eq!(to_minor_units(dec("0"), "NGN").unwrap(), 0);
    }

    #[test]
    fn round_trips_for_all_supported_currencies() {
        let amounts = ["0", "0.01", "1", "99.99", "1000000.00"];
        for (currency, _) in MINOR_UNIT_SCALE {
            for raw in amounts {
                let amount = dec(raw);
                let minor = to_minor_units(amount, currency).unwrap();
                assert_eq!(
                    from_minor_units(minor, currency),
                    amount,
                    "round trip failed for {} {}",
                    raw,
                    currency
                );
            }
        }
    }

    #[test]
    fn unknown_currency_uses_default_scale() {
        assert_eq!(to_minor_units(dec("12.34"), "XXX").unwrap(), 1234);
        assert_eq!(from_minor_units(1234, "XXX"), dec("12.34"));
    }

    #[test]
    fn currency_lookup_is_case_insensitive() {
        assert_eq!(to_minor_units(dec("5.00"), "kes").unwrap(), 500);
    }

    #[test]
    fn rejects_over_precise_amounts() {
        let result = to_minor_units(dec("10.005"), "KES");
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }

    #[test]
    fn rejects_negative_amounts() {
        let result = to_minor_units(dec("-1.00"), "KES");
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }

    #[test]
    fn out_of_range_amounts_are_an_error_not_a_panic() {
        let result = to_minor_units(Decimal::MAX, "KES");
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    }
}
