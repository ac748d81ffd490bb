//! Measurement comparison against registration baselines.

use crate::types::{MeasurementResult, Registration, TdxMeasurements};

/// Error label for registrations without a recorded baseline.
pub const UNCONFIGURED: &str = "unconfigured";

/// Error label when registers cannot be parsed out of a quote.
pub const EXTRACTION_FAILED: &str = "extraction_failed";

/// Compares extracted measurements to the baseline recorded for a
/// registration.
///
/// RTMR3 is skipped by default because many runtimes extend it after launch;
/// when skipped its match bit is reported as `true` regardless of value.
#[derive(Debug, Clone)]
pub struct MeasurementVerifier {
    pub skip_rtmr3: bool,
}

impl Default for MeasurementVerifier {
    fn default() -> Self {
        Self { skip_rtmr3: true }
    }
}

impl MeasurementVerifier {
    /// Compare actual vs expected register values (case-insensitive hex).
    pub fn compare(
        &self,
        actual: &TdxMeasurements,
        expected: &TdxMeasurements,
    ) -> MeasurementResult {
        let eq = |a: &str, b: &str| a.eq_ignore_ascii_case(b);

        let mrtd_match = eq(&actual.mrtd, &expected.mrtd);
        let rtmr0_match = eq(&actual.rtmr0, &expected.rtmr0);
        let rtmr1_match = eq(&actual.rtmr1, &expected.rtmr1);
        let rtmr2_match = eq(&actual.rtmr2, &expected.rtmr2);
        let rtmr3_match = self.skip_rtmr3 || eq(&actual.rtmr3, &expected.rtmr3);

        let verified = mrtd_match && rtmr0_match && rtmr1_match && rtmr2_match && rtmr3_match;

        let error = if verified {
            None
        } else {
            let mismatched: Vec<&str> = [
                (mrtd_match, "MRTD"),
                (rtmr0_match, "RTMR0"),
                (rtmr1_match, "RTMR1"),
                (rtmr2_match, "RTMR2"),
                (rtmr3_match, "RTMR3"),
            ]
            .iter()
            .filter(|(matched, _)| !matched)
            .map(|(_, name)| *name)
            .collect();
            Some(format!("mismatch: {}", mismatched.join(", ")))
        };

        MeasurementResult {
            verified,
            mrtd_match,
            rtmr0_match,
            rtmr1_match,
            rtmr2_match,
            rtmr3_match,
            actual: Some(actual.clone()),
            expected: Some(expected.clone()),
            error,
        }
    }

    /// Compare against the registration's baseline. Without `expected_mrtd`
    /// the result is `unconfigured` (never verified), with the actual
    /// measurements attached so a baseline can be captured from them.
    pub fn verify_against_baseline(
        &self,
        registration: &Registration,
        actual: &TdxMeasurements,
    ) -> MeasurementResult {
        let Some(expected_mrtd) = &registration.expected_mrtd else {
            let mut result = MeasurementResult::failure(UNCONFIGURED);
            result.actual = Some(actual.clone());
            return result;
        };

        let expected = TdxMeasurements {
            mrtd: expected_mrtd.clone(),
            rtmr0: registration.expected_rtmr0.clone().unwrap_or_default(),
            rtmr1: registration.expected_rtmr1.clone().unwrap_or_default(),
            rtmr2: registration.expected_rtmr2.clone().unwrap_or_default(),
            rtmr3: registration.expected_rtmr3.clone().unwrap_or_default(),
        };

        self.compare(actual, &expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurements(fill: &str) -> TdxMeasurements {
        TdxMeasurements {
            mrtd: fill.repeat(48),
            rtmr0: fill.repeat(48),
            rtmr1: fill.repeat(48),
            rtmr2: fill.repeat(48),
            rtmr3: fill.repeat(48),
        }
    }

    #[test]
    fn test_compare_identical() {
        let m = measurements("ab");
        let result = MeasurementVerifier::default().compare(&m, &m);
        assert!(result.verified);
        assert!(result.mrtd_match && result.rtmr0_match && result.rtmr3_match);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_compare_is_case_insensitive() {
        let lower = measurements("ab");
        let mut upper = measurements("ab");
        upper.mrtd = upper.mrtd.to_uppercase();
        let result = MeasurementVerifier::default().compare(&lower, &upper);
        assert!(result.verified);
    }

    #[test]
    fn test_single_register_mismatch_is_named() {
        let actual = measurements("ab");
        let mut expected = measurements("ab");
        expected.rtmr1 = "ff".repeat(48);
        let result = MeasurementVerifier::default().compare(&actual, &expected);
        assert!(!result.verified);
        assert!(!result.rtmr1_match);
        assert!(result.mrtd_match && result.rtmr0_match && result.rtmr2_match);
        assert_eq!(result.error.as_deref(), Some("mismatch: RTMR1"));
    }

    #[test]
    fn test_rtmr3_skipped_by_default() {
        let actual = measurements("ab");
        let mut expected = measurements("ab");
        expected.rtmr3 = "00".repeat(48);
        let result = MeasurementVerifier::default().compare(&actual, &expected);
        assert!(result.verified);
        assert!(result.rtmr3_match);

        let strict = MeasurementVerifier { skip_rtmr3: false };
        let result = strict.compare(&actual, &expected);
        assert!(!result.verified);
        assert_eq!(result.error.as_deref(), Some("mismatch: RTMR3"));
    }

    #[test]
    fn test_missing_baseline_is_unconfigured() {
        let registration: Registration = serde_json::from_str(
            r#"{
                "id": "a",
                "name": "a",
                "image_repository": "ghcr.io/org/a",
                "forge_owner": "org",
                "forge_repo": "a",
                "app_endpoint": "http://localhost:1",
                "quote_provider_endpoint": "http://localhost:2"
            }"#,
        )
        .unwrap();

        let actual = measurements("ab");
        let result =
            MeasurementVerifier::default().verify_against_baseline(&registration, &actual);
        assert!(!result.verified);
        assert_eq!(result.error.as_deref(), Some(UNCONFIGURED));
        assert_eq!(result.actual.as_ref().unwrap().mrtd, actual.mrtd);
    }
}
