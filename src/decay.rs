//! No-signal fallback: personalized hourly energy decay
//!
//! When no heart rate is available the engine cannot simulate, but it can
//! still extrapolate from the user's own reporting history: consecutive
//! validated observations imply an hourly rate of change, and those rates
//! average into a personal decay profile, optionally split by time of day
//! (overnight pairs usually show recovery, afternoon pairs decay).
//!
//! Pairs closer than 6 minutes are noise, pairs further apart than 12 hours
//! extrapolate too far; both are excluded. Hours are taken in UTC; callers
//! wanting local-time buckets shift their timestamps before calling.

use chrono::{DateTime, Timelike, Utc};
use tracing::debug;

use crate::models::{DecayRateResult, EnergyObservation};

/// Minimum pair gap in hours (~6 minutes)
const MIN_PAIR_HOURS: f64 = 0.1;
/// Maximum pair gap in hours
const MAX_PAIR_HOURS: f64 = 12.0;

/// Minimum pairs in a time-of-day bucket for a bucket-specific rate
const MIN_PAIRS_PER_BUCKET: usize = 3;

/// Clamp range for the overall hourly decay, percent per hour
const DECAY_CLAMP_MIN: f64 = -10.0;
const DECAY_CLAMP_MAX: f64 = 15.0;

/// Hours the future projection looks ahead
const FUTURE_HORIZON_HOURS: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DayBucket {
    Morning,
    Afternoon,
    Evening,
    Night,
}

fn bucket_for_hour(hour: u32) -> DayBucket {
    match hour {
        6..=11 => DayBucket::Morning,
        12..=17 => DayBucket::Afternoon,
        18..=21 => DayBucket::Evening,
        _ => DayBucket::Night,
    }
}

/// Compute a personalized decay rate from validated energy history
///
/// Every time-ordered pair of observations with a gap in [6 min, 12 h]
/// contributes `(before - after) / gap_hours` percent per hour (positive
/// means decay). Fewer than 2 observations, or zero valid pairs, yields the
/// default rate of 3%/h with no time-of-day profile.
pub fn compute_decay_rate(observations: &[EnergyObservation]) -> DecayRateResult {
    if observations.len() < 2 {
        return DecayRateResult::default();
    }

    let mut sorted: Vec<&EnergyObservation> = observations.iter().collect();
    sorted.sort_by_key(|o| o.timestamp);

    // (rate, bucket of the earlier timestamp)
    let mut rates: Vec<(f64, DayBucket)> = Vec::new();

    for pair in sorted.windows(2) {
        let (before, after) = (pair[0], pair[1]);
        let gap_hours =
            (after.timestamp - before.timestamp).num_milliseconds() as f64 / 3_600_000.0;

        if !(MIN_PAIR_HOURS..=MAX_PAIR_HOURS).contains(&gap_hours) {
            continue;
        }

        let rate = (before.percentage - after.percentage) / gap_hours;
        rates.push((rate, bucket_for_hour(before.timestamp.hour())));
    }

    if rates.is_empty() {
        debug!(observations = sorted.len(), "no valid observation pairs, using default decay");
        return DecayRateResult::default();
    }

    let overall = rates.iter().map(|(r, _)| r).sum::<f64>() / rates.len() as f64;

    let bucket_rate = |bucket: DayBucket| -> Option<f64> {
        let values: Vec<f64> = rates
            .iter()
            .filter(|(_, b)| *b == bucket)
            .map(|(r, _)| *r)
            .collect();
        if values.len() >= MIN_PAIRS_PER_BUCKET {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        } else {
            None
        }
    };

    DecayRateResult {
        average_hourly_decay: overall.clamp(DECAY_CLAMP_MIN, DECAY_CLAMP_MAX),
        morning_decay_rate: bucket_rate(DayBucket::Morning),
        afternoon_decay_rate: bucket_rate(DayBucket::Afternoon),
        evening_decay_rate: bucket_rate(DayBucket::Evening),
        night_recovery_rate: bucket_rate(DayBucket::Night),
        data_points_used: rates.len(),
    }
}

/// Rate applying at a given hour of day: the bucket-specific rate when one
/// exists, else the overall average
pub fn decay_for_hour(rate: &DecayRateResult, hour: u32) -> f64 {
    let bucket_rate = match bucket_for_hour(hour) {
        DayBucket::Morning => rate.morning_decay_rate,
        DayBucket::Afternoon => rate.afternoon_decay_rate,
        DayBucket::Evening => rate.evening_decay_rate,
        DayBucket::Night => rate.night_recovery_rate,
    };
    bucket_rate.unwrap_or(rate.average_hourly_decay)
}

/// Project the last known energy forward with the decay model
///
/// `last_energy` is on the [0, 1] scale. Returns `(current, future)`:
/// `current` decays from the last known value over the elapsed time, and
/// `future` continues for another 2 hours from there. Both are clamped to
/// [0, 1]; a non-positive elapsed time leaves the energy unchanged.
pub fn predict_with_decay(
    last_energy: f64,
    last_time: DateTime<Utc>,
    now: DateTime<Utc>,
    rate: Option<&DecayRateResult>,
) -> (f64, f64) {
    let default_rate = DecayRateResult::default();
    let rate = rate.unwrap_or(&default_rate);

    let elapsed_hours =
        ((now - last_time).num_milliseconds() as f64 / 3_600_000.0).max(0.0);

    // Rates are on the 0-100 scale, energy here is 0-1
    let hourly = decay_for_hour(rate, last_time.hour()) / 100.0;
    let current = (last_energy - hourly * elapsed_hours).clamp(0.0, 1.0);

    let future_hourly = decay_for_hour(rate, now.hour()) / 100.0;
    let future = (current - future_hourly * FUTURE_HORIZON_HOURS).clamp(0.0, 1.0);

    (current, future)
}
