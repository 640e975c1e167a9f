//! Heart-rate variability approximation and drain modulation
//!
//! True RMSSD needs beat-to-beat R-R intervals; a watch that only reports
//! bucketed heart rate cannot provide those. This module approximates
//! variability as the root mean square of successive bpm differences over a
//! short trailing window. The absolute numbers are not clinical HRV, but the
//! ratio against a personal baseline still separates "strained" from
//! "relaxed" and is used to scale the drain rate during simulation.

use chrono::{DateTime, Duration, Utc};

use crate::models::{HrSample, HrvConfig, HrvSample};

/// Upper bound for a plausible heart-rate-derived RMSSD; values at or above
/// this are discarded as artifacts
const RMSSD_PLAUSIBILITY_CAP: f64 = 50.0;

/// Baseline used when no HRV samples exist
const DEFAULT_BASELINE: f64 = 50.0;

/// Compute the RMSSD approximation series from heart-rate samples
///
/// Requires at least 5 raw samples to produce any output. For each sample, a
/// trailing window of `window_minutes` must contain at least 3 samples; the
/// RMSSD of successive bpm differences within it is emitted when it falls in
/// `[0, 50)`.
pub fn compute_hrv_series(hr: &[HrSample], window_minutes: i64) -> Vec<HrvSample> {
    if hr.len() < 5 {
        return Vec::new();
    }

    let mut sorted: Vec<HrSample> = hr.to_vec();
    sorted.sort_by_key(|s| s.timestamp);

    let window = Duration::minutes(window_minutes);
    let mut results = Vec::new();
    let mut window_start_idx = 0usize;

    for i in 0..sorted.len() {
        let window_end = sorted[i].timestamp;
        let window_start = window_end - window;

        // Trailing window is (window_end - window, window_end]
        while sorted[window_start_idx].timestamp <= window_start {
            window_start_idx += 1;
        }

        let window_data = &sorted[window_start_idx..=i];
        if window_data.len() < 3 {
            continue;
        }

        let mut sum_squared_diffs = 0.0;
        for pair in window_data.windows(2) {
            let diff = pair[1].bpm - pair[0].bpm;
            sum_squared_diffs += diff * diff;
        }
        let rmssd = (sum_squared_diffs / (window_data.len() - 1) as f64).sqrt();

        if (0.0..RMSSD_PLAUSIBILITY_CAP).contains(&rmssd) {
            results.push(HrvSample {
                timestamp: window_end,
                rmssd,
            });
        }
    }

    results
}

/// Personal baseline: the median RMSSD of the working set, defaulting to 50
/// when no samples exist
pub fn hrv_baseline(hrv: &[HrvSample]) -> f64 {
    if hrv.is_empty() {
        return DEFAULT_BASELINE;
    }

    let mut values: Vec<f64> = hrv.iter().map(|s| s.rmssd).collect();
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Nearest-sample HRV lookup
///
/// Returns the closest sample's RMSSD if it lies within `tolerance_minutes`
/// of the target, else `None`. Callers must treat `None` as "no HRV effect".
pub fn hrv_at_time(
    hrv: &[HrvSample],
    target: DateTime<Utc>,
    tolerance_minutes: i64,
) -> Option<f64> {
    let closest = hrv.iter().min_by_key(|s| {
        (s.timestamp - target).num_milliseconds().abs()
    })?;

    let diff = (closest.timestamp - target).num_milliseconds().abs();
    if diff <= tolerance_minutes * 60 * 1000 {
        Some(closest.rmssd)
    } else {
        None
    }
}

/// Drain multiplier from current HRV relative to baseline
///
/// Ratio below the low threshold means autonomic strain and amplifies the
/// drain; ratio above the high threshold means relaxation and dampens it.
/// Both boundaries are exclusive: a ratio exactly at a threshold is normal.
/// `None` (no reading) always maps to the normal multiplier.
pub fn drain_multiplier(current: Option<f64>, baseline: f64, config: &HrvConfig) -> f64 {
    let Some(current) = current else {
        return config.normal_hrv_multiplier;
    };

    let ratio = current / baseline;
    if ratio < config.low_threshold {
        config.low_hrv_multiplier
    } else if ratio > config.high_threshold {
        config.high_hrv_multiplier
    } else {
        config.normal_hrv_multiplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::models::HrSample;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn sample(seconds: i64, bpm: f64) -> HrSample {
        HrSample::new(ts(seconds), bpm)
    }

    #[test]
    fn test_requires_five_raw_samples() {
        let data: Vec<HrSample> = (0..4).map(|i| sample(i * 60, 70.0)).collect();
        assert!(compute_hrv_series(&data, 5).is_empty());
    }

    #[test]
    fn test_rmssd_of_constant_series_is_zero() {
        let data: Vec<HrSample> = (0..6).map(|i| sample(i * 60, 70.0)).collect();
        let hrv = compute_hrv_series(&data, 5);
        assert!(!hrv.is_empty());
        for point in &hrv {
            assert_eq!(point.rmssd, 0.0);
        }
    }

    #[test]
    fn test_rmssd_value() {
        // Differences of +4/-4 within the window give RMSSD = 4
        let data = vec![
            sample(0, 70.0),
            sample(60, 74.0),
            sample(120, 70.0),
            sample(180, 74.0),
            sample(240, 70.0),
        ];
        let hrv = compute_hrv_series(&data, 5);
        assert!(!hrv.is_empty());
        let last = hrv.last().unwrap();
        assert!((last.rmssd - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_implausible_rmssd_discarded() {
        // Swings of 80 bpm produce RMSSD >= 50, which must be dropped
        let data = vec![
            sample(0, 60.0),
            sample(60, 140.0),
            sample(120, 60.0),
            sample(180, 140.0),
            sample(240, 60.0),
        ];
        assert!(compute_hrv_series(&data, 5).is_empty());
    }

    #[test]
    fn test_baseline_median_and_default() {
        assert_eq!(hrv_baseline(&[]), 50.0);

        let hrv = vec![
            HrvSample { timestamp: ts(0), rmssd: 1.0 },
            HrvSample { timestamp: ts(60), rmssd: 3.0 },
            HrvSample { timestamp: ts(120), rmssd: 2.0 },
        ];
        assert_eq!(hrv_baseline(&hrv), 2.0);

        let hrv = vec![
            HrvSample { timestamp: ts(0), rmssd: 1.0 },
            HrvSample { timestamp: ts(60), rmssd: 2.0 },
            HrvSample { timestamp: ts(120), rmssd: 3.0 },
            HrvSample { timestamp: ts(180), rmssd: 4.0 },
        ];
        assert_eq!(hrv_baseline(&hrv), 2.5);
    }

    #[test]
    fn test_lookup_tolerance() {
        let hrv = vec![HrvSample { timestamp: ts(0), rmssd: 10.0 }];
        assert_eq!(hrv_at_time(&hrv, ts(4 * 60), 5), Some(10.0));
        assert_eq!(hrv_at_time(&hrv, ts(6 * 60), 5), None);
        assert_eq!(hrv_at_time(&[], ts(0), 5), None);
    }

    #[test]
    fn test_drain_multiplier_bands() {
        let config = HrvConfig::default();
        // Low HRV (strain) amplifies drain
        assert_eq!(drain_multiplier(Some(30.0), 50.0, &config), 1.5);
        // High HRV (relaxed) dampens drain
        assert_eq!(drain_multiplier(Some(70.0), 50.0, &config), 0.5);
        // Normal band
        assert_eq!(drain_multiplier(Some(50.0), 50.0, &config), 1.0);
        // No reading means no effect
        assert_eq!(drain_multiplier(None, 50.0, &config), 1.0);
    }

    #[test]
    fn test_drain_multiplier_thresholds_exclusive() {
        let config = HrvConfig::default();
        // Exactly at the boundaries counts as normal
        assert_eq!(drain_multiplier(Some(35.0), 50.0, &config), 1.0); // ratio 0.7
        assert_eq!(drain_multiplier(Some(65.0), 50.0, &config), 1.0); // ratio 1.3
    }
}
