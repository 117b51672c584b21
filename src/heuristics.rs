//! Heuristic gates (C7): GPS accuracy, Haversine speed, moratorium, and
//! clock-drift tolerance.

use crate::config::HeuristicsConfig;
use crate::error::ProofError;
use crate::geometry::{haversine_distance_m, LatLon};

/// Checks `0 < accuracy ≤ max`.
pub fn check_gps_accuracy(accuracy_m: f64, cfg: &HeuristicsConfig) -> Result<(), ProofError> {
    if accuracy_m > 0.0 && accuracy_m <= cfg.gps_max_accuracy_m {
        Ok(())
    } else {
        Err(ProofError::LowGpsAccuracy)
    }
}

/// Checks elapsed time since the account's last accepted click against the
/// clock-drift tolerance and moratorium window. Returns the elapsed
/// milliseconds on success, for the scorer's moratorium signal.
pub fn check_timestamp(
    now_ms: i64,
    last_click_at_ms: Option<i64>,
    cfg: &HeuristicsConfig,
) -> Result<i64, ProofError> {
    let Some(last) = last_click_at_ms else {
        return Ok(i64::MAX);
    };
    let delta = now_ms - last;
    if delta < -cfg.clock_drift_tolerance_ms {
        return Err(ProofError::TimeWentBackwards);
    }
    if delta < cfg.proof_moratorium_ms {
        return Err(ProofError::Moratorium);
    }
    Ok(delta)
}

/// Checks `haversine(last, current) / Δt ≤ limit`. `Δt` in seconds.
pub fn check_speed(
    last: Option<(LatLon, i64)>,
    current: LatLon,
    now_ms: i64,
    cfg: &HeuristicsConfig,
) -> Result<Option<f64>, ProofError> {
    let Some((last_pos, last_ms)) = last else {
        return Ok(None);
    };
    let delta_ms = now_ms - last_ms;
    if delta_ms <= 0 {
        return Err(ProofError::InvalidTimestamp);
    }
    let delta_s = delta_ms as f64 / 1000.0;
    let distance_m = haversine_distance_m(&last_pos, &current);
    let speed = distance_m / delta_s;
    if speed > cfg.proof_speed_limit_mps {
        return Err(ProofError::TooFast);
    }
    Ok(Some(speed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> HeuristicsConfig {
        HeuristicsConfig {
            gps_max_accuracy_m: 50.0,
            proof_speed_limit_mps: 15.0,
            proof_moratorium_ms: 10_000,
            clock_drift_tolerance_ms: 120_000,
        }
    }

    #[test]
    fn accuracy_at_threshold_is_accepted() {
        assert!(check_gps_accuracy(50.0, &cfg()).is_ok());
    }

    #[test]
    fn accuracy_one_meter_over_is_rejected() {
        assert!(matches!(
            check_gps_accuracy(51.0, &cfg()),
            Err(ProofError::LowGpsAccuracy)
        ));
    }

    #[test]
    fn delta_exactly_at_moratorium_is_accepted() {
        let result = check_timestamp(10_000, Some(0), &cfg());
        assert!(result.is_ok());
    }

    #[test]
    fn negative_delta_within_drift_tolerance_is_moratorium_failure() {
        let result = check_timestamp(0, Some(120_000), &cfg());
        assert!(matches!(result, Err(ProofError::Moratorium)));
    }

    #[test]
    fn negative_delta_beyond_drift_tolerance_is_time_went_backwards() {
        let result = check_timestamp(0, Some(120_001), &cfg());
        assert!(matches!(result, Err(ProofError::TimeWentBackwards)));
    }

    #[test]
    fn no_last_click_skips_moratorium_gate() {
        assert_eq!(check_timestamp(0, None, &cfg()).unwrap(), i64::MAX);
    }

    #[test]
    fn speed_over_limit_is_rejected() {
        let a = LatLon::new(47.4979, 19.0402);
        let b = LatLon::new(47.5979, 19.0402);
        let result = check_speed(Some((a, 0)), b, 100, &cfg());
        assert!(matches!(result, Err(ProofError::TooFast)));
    }

    #[test]
    fn zero_or_negative_delta_is_invalid_timestamp() {
        let a = LatLon::new(47.0, 19.0);
        let result = check_speed(Some((a, 1000)), a, 1000, &cfg());
        assert!(matches!(result, Err(ProofError::InvalidTimestamp)));
    }

    #[test]
    fn no_prior_location_skips_speed_gate() {
        let a = LatLon::new(47.0, 19.0);
        assert_eq!(check_speed(None, a, 1000, &cfg()).unwrap(), None);
    }
}
