//! Tolerant comparison of a claimed outcome against the computed one.
//!
//! A mismatch is not an error: it routes the case to manual review.

use lac_core::{Record, Value};

/// Maximum relative difference for numeric fields to count as equal.
pub const RELATIVE_TOLERANCE: f64 = 0.01;

/// True if `claimed` agrees with `verified`.
///
/// Both must have the same keys. A numeric verified field accepts a numeric
/// claimed field within [`RELATIVE_TOLERANCE`]; a verified zero accepts only
/// an exact zero; a non-numeric claimed value never matches a numeric one.
/// All other fields compare structurally, numbers inside lists and
/// records by value.
pub fn results_match(claimed: &Record, verified: &Record) -> bool {
    if claimed.len() != verified.len() {
        return false;
    }
    verified.iter().all(|(key, expected)| match claimed.get(key) {
        Some(actual) => field_matches(actual, expected),
        None => false,
    })
}

fn field_matches(claimed: &Value, verified: &Value) -> bool {
    let Some(expected) = verified.as_f64() else {
        return claimed.loose_eq(verified);
    };
    let Some(actual) = claimed.as_f64() else {
        return false;
    };
    if expected == 0.0 {
        actual == 0.0
    } else {
        ((expected - actual) / expected).abs() <= RELATIVE_TOLERANCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lac_core::record;
    use proptest::prelude::*;

    #[test]
    fn identical_results_match() {
        assert!(results_match(&record! { "amount" => 1200 }, &record! { "amount" => 1200 }));
    }

    #[test]
    fn more_than_one_percent_differs() {
        assert!(!results_match(&record! { "amount" => 1215 }, &record! { "amount" => 1200 }));
        assert!(results_match(&record! { "amount" => 1211 }, &record! { "amount" => 1200 }));
    }

    #[test]
    fn zero_requires_exact_zero() {
        assert!(!results_match(&record! { "amount" => 0.001 }, &record! { "amount" => 0 }));
        assert!(results_match(&record! { "amount" => 0.0 }, &record! { "amount" => 0 }));
    }

    #[test]
    fn key_sets_must_agree() {
        assert!(!results_match(&record! { "amount" => 1 }, &record! { "amount" => 1, "eligible" => true }));
        assert!(!results_match(&record! { "total" => 1 }, &record! { "amount" => 1 }));
    }

    #[test]
    fn type_mismatch_is_a_mismatch() {
        assert!(!results_match(&record! { "amount" => "1200" }, &record! { "amount" => 1200 }));
        assert!(results_match(&record! { "eligible" => true }, &record! { "eligible" => true }));
        assert!(!results_match(&record! { "eligible" => false }, &record! { "eligible" => true }));
    }

    #[test]
    fn nested_numbers_compare_by_value() {
        let claimed = record! { "breakdown" => record! { "base" => 5, "items" => vec![Value::Int(1), Value::Float(2.0)] } };
        let verified = record! { "breakdown" => record! { "base" => 5.0, "items" => vec![Value::Float(1.0), Value::Int(2)] } };
        assert!(results_match(&claimed, &verified));

        let off = record! { "breakdown" => record! { "base" => 6, "items" => vec![Value::Int(1), Value::Int(2)] } };
        assert!(!results_match(&off, &verified));
    }

    proptest! {
        #[test]
        fn every_result_matches_itself(amount in -1_000_000i64..1_000_000, eligible: bool, label in "[a-z]{0,8}") {
            let r = record! { "amount" => amount, "eligible" => eligible, "label" => label };
            prop_assert!(results_match(&r, &r));
        }
    }
}
