//! Measurement result validation

/// Decide whether a tool's raw output passes a step
///
/// `PASS`/`FAIL` (any case) decide outright. Anything else must parse as a
/// number inside `[min, max]`; an absent bound leaves that side open.
pub fn validate(raw_value: &str, min: Option<f64>, max: Option<f64>) -> bool {
    let raw_value = raw_value.trim();

    if raw_value.eq_ignore_ascii_case("PASS") {
        return true;
    }
    if raw_value.eq_ignore_ascii_case("FAIL") {
        return false;
    }

    let value = match raw_value.parse::<f64>() {
        Ok(v) if !v.is_nan() => v,
        _ => {
            tracing::debug!(
                "Cannot compare value '{}' numerically with range [{:?}, {:?}]",
                raw_value,
                min,
                max
            );
            return false;
        }
    };

    if let Some(min) = min {
        if value < min {
            return false;
        }
    }
    if let Some(max) = max {
        if value > max {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries_pass() {
        assert!(validate("1", Some(1.0), Some(5.0)));
        assert!(validate("5", Some(1.0), Some(5.0)));
        assert!(validate("3.3", Some(1.0), Some(5.0)));
    }

    #[test]
    fn test_outside_range_fails() {
        assert!(!validate("5.001", Some(1.0), Some(5.0)));
        assert!(!validate("0.999", Some(1.0), Some(5.0)));
        assert!(!validate("-1", Some(1.0), Some(5.0)));
    }

    #[test]
    fn test_keywords_short_circuit() {
        assert!(validate("PASS", Some(1.0), Some(5.0)));
        assert!(validate("pass", Some(1.0), Some(5.0)));
        assert!(validate("Pass", None, None));
        assert!(!validate("FAIL", None, None));
        assert!(!validate("fail", Some(-100.0), Some(100.0)));
    }

    #[test]
    fn test_unbounded_sides() {
        assert!(validate("1000", Some(5.0), None));
        assert!(!validate("4", Some(5.0), None));
        assert!(validate("-1000", None, Some(5.0)));
        assert!(!validate("6", None, Some(5.0)));
        assert!(validate("123456", None, None));
    }

    #[test]
    fn test_unparsable_fails() {
        assert!(!validate("", None, None));
        assert!(!validate("OK", None, None));
        assert!(!validate("12 dBm", None, None));
        assert!(!validate("NaN", None, None));
    }

    #[test]
    fn test_negative_and_exponent_values() {
        assert!(validate("-45.5", Some(-70.0), Some(-20.0)));
        assert!(validate("1e1", Some(10.0), Some(20.0)));
    }
}
