//! Core data model for the energy estimation engine
//!
//! Everything here is an immutable value object: each pipeline stage consumes
//! collections of these and produces new ones, nothing is mutated in place.
//!
//! # Background
//!
//! People managing a chronic fatigue / post-exertional-malaise condition pace
//! themselves against a personal "energy envelope". The engine models that
//! envelope as a 0-100% battery: sustained heart rate above a personal
//! threshold drains it, rest below a lower threshold recharges it. Sparse
//! self-reported energy percentages serve as ground truth for calibrating the
//! thresholds and for pinning the simulated curve back to reality.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{PacersError, Result};

/// One heart-rate reading, raw or bucket-averaged
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrSample {
    /// When the reading was taken (bucket start for aggregated data)
    pub timestamp: DateTime<Utc>,
    /// Beats per minute
    pub bpm: f64,
}

impl HrSample {
    pub fn new(timestamp: DateTime<Utc>, bpm: f64) -> Self {
        HrSample { timestamp, bpm }
    }
}

/// Short-horizon heart-rate variability estimate
///
/// RMSSD here is approximated from bucketed heart-rate samples, not true
/// beat-to-beat intervals, so absolute values are not comparable to
/// clinical HRV. Values of 50 and above are discarded as implausible for
/// this derivation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrvSample {
    pub timestamp: DateTime<Utc>,
    /// Root mean square of successive bpm differences over the window
    pub rmssd: f64,
}

/// A user-provided (or otherwise trusted) ground-truth energy value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyObservation {
    pub timestamp: DateTime<Utc>,
    /// Energy level in percent, 0-100
    pub percentage: f64,
    /// Optional provenance tag (e.g. "confirmed", "adjusted")
    pub validation: Option<String>,
}

impl EnergyObservation {
    /// Create a validated observation; percentage must be within [0, 100]
    pub fn new(
        timestamp: DateTime<Utc>,
        percentage: f64,
        validation: Option<String>,
    ) -> Result<Self> {
        if !(0.0..=100.0).contains(&percentage) || !percentage.is_finite() {
            return Err(PacersError::Validation(format!(
                "energy percentage out of range: {}",
                percentage
            )));
        }
        Ok(EnergyObservation {
            timestamp,
            percentage,
            validation,
        })
    }
}

/// An interval where aggregated heart rate stayed below the wake threshold
/// for at least the configured minimum duration
///
/// `start` is backdated to the local heart-rate peak preceding the decline,
/// not the first below-threshold sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SleepPhase {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SleepPhase {
    /// Create a sleep phase; `end` must be after `start`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(PacersError::Validation(format!(
                "sleep phase end {} not after start {}",
                end, start
            )));
        }
        Ok(SleepPhase { start, end })
    }

    /// Phase duration in whole minutes
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// The moment a sleep phase ended
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WakeEvent {
    pub timestamp: DateTime<Utc>,
}

/// The interval between the starts of two consecutive sleep phases
///
/// This is the natural unit for per-day parameter fitting: one cycle covers
/// one night's recovery plus the following waking day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepCycle {
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
    /// Human-readable label, the ISO date of the cycle start
    pub label: String,
}

impl SleepCycle {
    /// Create a sleep cycle; `cycle_end` must be after `cycle_start`
    pub fn new(cycle_start: DateTime<Utc>, cycle_end: DateTime<Utc>, label: String) -> Result<Self> {
        if cycle_end <= cycle_start {
            return Err(PacersError::Validation(format!(
                "sleep cycle end {} not after start {}",
                cycle_end, cycle_start
            )));
        }
        Ok(SleepCycle {
            cycle_start,
            cycle_end,
            label,
        })
    }
}

/// Per-cycle bundle handed to the optimizer
///
/// Built by intersecting heart-rate data and validated observations with one
/// sleep-bounded interval. `start_energy` is the last validated value
/// strictly before `cycle_start`, defaulting to 50.0 when none exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleData {
    pub label: String,
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
    pub validated_points: Vec<EnergyObservation>,
    pub hr_data: Vec<HrSample>,
    pub start_energy: f64,
}

/// The fitted physiological model
///
/// `hr_low < hr_high` and both factors positive are hard invariants; the
/// optimizer encodes violations as infinite loss rather than errors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    /// Below this bpm the battery recharges
    pub hr_low: f64,
    /// Above this bpm the battery drains
    pub hr_high: f64,
    /// Multiplier on the drain rate
    pub drain_factor: f64,
    /// Multiplier on the recovery rate
    pub recovery_factor: f64,
    /// Constant bias subtracted from simulated energy, fit separately
    pub energy_offset: f64,
    /// Mean squared error against validated observations
    pub loss: f64,
}

impl Default for ParameterSet {
    fn default() -> Self {
        ParameterSet {
            hr_low: 60.0,
            hr_high: 100.0,
            drain_factor: 1.0,
            recovery_factor: 1.0,
            energy_offset: 0.0,
            loss: f64::INFINITY,
        }
    }
}

/// One simulated energy output point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyResult {
    /// Sample timestamp shifted by the perception lag
    pub timestamp: DateTime<Utc>,
    /// Simulated energy in percent, clamped to [0, 100]
    pub energy: f64,
    /// The HRV drain multiplier that applied at this step (1.0 when HRV
    /// was disabled or unavailable)
    pub hrv_multiplier: f64,
}

/// Result of fitting one sleep cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayFitResult {
    pub hr_low: f64,
    pub hr_high: f64,
    pub drain_factor: f64,
    pub recovery_factor: f64,
    pub loss: f64,
    pub energy_offset: f64,
    /// The cycle's label (ISO date of cycle start)
    pub date: String,
    /// Validated observations inside the cycle
    pub data_points: usize,
}

/// Time-range filter for the auto-fit, relative to the newest cycle start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitRange {
    All,
    /// Last 30 days
    Month,
    /// Last 7 days
    Week,
}

/// Statistic used to combine per-cycle fits into one global parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregationMethod {
    /// Sorted-middle median
    Median,
    /// Mean of values within 1.5 IQR of the quartiles; falls back to the
    /// median below 4 values
    IqrTrimmedMean,
}

/// Output of the cross-cycle auto-fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoFitResult {
    /// Aggregated global parameters
    pub result: ParameterSet,
    /// Per-cycle fits, including the ones rejected by the quality gate
    pub day_results: Vec<DayFitResult>,
    /// Cycles that survived the quality gate
    pub used_days: usize,
    /// Eligible cycles before the quality gate
    pub total_days: usize,
}

/// Personalized no-signal decay model
///
/// Rates are percent-per-hour on the 0-100 scale; positive means decay,
/// negative means recovery. Time-of-day rates are `None` when too few pairs
/// fell into that bucket, and callers fall back to the overall average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayRateResult {
    pub average_hourly_decay: f64,
    /// 06:00-11:59
    pub morning_decay_rate: Option<f64>,
    /// 12:00-17:59
    pub afternoon_decay_rate: Option<f64>,
    /// 18:00-21:59
    pub evening_decay_rate: Option<f64>,
    /// 22:00-05:59, typically negative (overnight recovery)
    pub night_recovery_rate: Option<f64>,
    /// Observation pairs that contributed
    pub data_points_used: usize,
}

impl Default for DecayRateResult {
    fn default() -> Self {
        DecayRateResult {
            average_hourly_decay: 3.0,
            morning_decay_rate: None,
            afternoon_decay_rate: None,
            evening_decay_rate: None,
            night_recovery_rate: None,
            data_points_used: 0,
        }
    }
}

/// Sleep detection thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SleepConfig {
    /// Falling below this bpm starts a candidate sleep phase
    pub sleep_hr_threshold: f64,
    /// Reaching this bpm ends the phase
    pub wake_hr_threshold: f64,
    /// Phases shorter than this are discarded as naps or artifacts
    pub min_sleep_minutes: i64,
    /// Force energy to 100% at each wake event during simulation
    pub reset_on_wake: bool,
}

impl Default for SleepConfig {
    fn default() -> Self {
        SleepConfig {
            sleep_hr_threshold: 62.0,
            wake_hr_threshold: 70.0,
            min_sleep_minutes: 200,
            reset_on_wake: false,
        }
    }
}

/// Simulation timing configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyConfig {
    /// Lag between physiological signal and perceived energy, in minutes;
    /// simulated points are stamped this far after their HR sample
    pub time_offset_minutes: i64,
    /// Bucket width the HR data was aggregated with; also the assumed gap
    /// before the first sample of a segment
    pub aggregation_minutes: i64,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        EnergyConfig {
            time_offset_minutes: 120,
            aggregation_minutes: 15,
        }
    }
}

/// HRV drain-modulation configuration
///
/// Threshold boundaries are exclusive: a ratio exactly at a threshold
/// counts as normal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrvConfig {
    /// Trailing window for the RMSSD approximation, minutes
    pub window_minutes: i64,
    /// Nearest-sample lookup tolerance, minutes
    pub lookup_tolerance_minutes: i64,
    /// Drain multiplier when current/baseline ratio < `low_threshold`
    pub low_hrv_multiplier: f64,
    /// Drain multiplier in the normal band
    pub normal_hrv_multiplier: f64,
    /// Drain multiplier when the ratio > `high_threshold`
    pub high_hrv_multiplier: f64,
    pub low_threshold: f64,
    pub high_threshold: f64,
}

impl Default for HrvConfig {
    fn default() -> Self {
        HrvConfig {
            window_minutes: 5,
            lookup_tolerance_minutes: 5,
            low_hrv_multiplier: 1.5,
            normal_hrv_multiplier: 1.0,
            high_hrv_multiplier: 0.5,
            low_threshold: 0.7,
            high_threshold: 1.3,
        }
    }
}

/// Two-point energy forecast on the [0, 1] scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyForecast {
    pub time: DateTime<Utc>,
    pub energy_now: f64,
    pub time_future: DateTime<Utc>,
    pub energy_future: f64,
}

/// Bucket raw heart-rate samples into fixed-width time buckets, averaging
/// within each bucket
///
/// Bucket boundaries are aligned to the epoch. Output is sorted by bucket
/// start. This is the aggregation every downstream stage assumes.
pub fn aggregate_hr(data: &[HrSample], bucket_minutes: i64) -> Vec<HrSample> {
    if data.is_empty() || bucket_minutes <= 0 {
        return Vec::new();
    }

    let bucket_ms = bucket_minutes * 60 * 1000;
    let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();

    for sample in data {
        let key = (sample.timestamp.timestamp_millis() / bucket_ms) * bucket_ms;
        buckets.entry(key).or_default().push(sample.bpm);
    }

    buckets
        .into_iter()
        .map(|(ts, values)| HrSample {
            timestamp: DateTime::from_timestamp_millis(ts).unwrap_or_default(),
            bpm: values.iter().sum::<f64>() / values.len() as f64,
        })
        .collect()
}
