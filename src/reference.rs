//! Transaction reference generation.
//!
//! Every payment attempt gets a globally unique reference of the form
//! `{prefix}_{unix_millis}_{random suffix}`. The reference doubles as the
//! gateway-side transaction reference and as the idempotency handle for
//! webhook matching, so uniqueness matters: the timestamp keeps references
//! roughly ordered and the random suffix makes concurrent collisions
//! negligible without any cross-process coordination.
//!
//! The `reference` column carries a UNIQUE constraint, so in the negligible
//! event of a collision the insert fails loudly instead of overwriting an
//! existing transaction.

use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of the random alphanumeric suffix.
const SUFFIX_LEN: usize = 8;

/// Generate a payment reference with the given prefix.
///
/// # Example
///
/// ```text
/// generate_reference("JIR") -> "JIR_1718034000123_x7Kp2mQa"
/// ```
pub fn generate_reference(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect();

    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn reference_has_expected_shape() {
        let reference = generate_reference("JIR");

        let parts: Vec<&str> = reference.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "JIR");
        assert!(parts[1].parse::<i64>().is_ok(), "middle part is a timestamp");
        assert_eq!(parts[2].len(), SUFFIX_LEN);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn references_are_unique_across_many_calls() {
        let refs: HashSet<String> = (0..1000).map(|_| generate_reference("JIR")).collect();
        assert_eq!(refs.len(), 1000);
    }

    #[test]
    fn prefix_is_preserved_verbatim() {
        assert!(generate_reference("POS").starts_with("POS_"));
        assert!(generate_reference("JIR").starts_with("JIR_"));
    }
}
