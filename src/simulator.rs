//! Energy drain/recovery simulation
//!
//! The simulator advances a 0-100% energy value sample-by-sample over
//! aggregated heart rate. Heart rate above `hr_high` drains energy, below
//! `hr_low` recharges it, and the band between is neutral. Each step is
//! scaled by the elapsed time since the previous sample and optionally by an
//! HRV-derived drain multiplier.
//!
//! Left to itself the simulation drifts: a fixed bias in the fitted
//! thresholds compounds over days. Anchoring bounds the drift by restarting
//! the simulation at every validated user observation. Anchored and
//! unanchored simulation are one algorithm; the anchored variant just
//! partitions the data into segments at the anchor timestamps and runs the
//! same segment loop from each anchor's energy.
//!
//! Per-step update rule (`delta` in minutes):
//!
//! ```text
//! bpm > hr_high: energy -= (bpm - hr_high) * 0.15 * drain_factor * hrv_mult * (delta / 15)
//! bpm < hr_low:  energy += (hr_low - bpm) * 0.1 * recovery_factor * (delta / 15)
//! ```
//!
//! The 0.15 / 0.1 / 15 constants are empirically tuned against real pacing
//! data; change them and every previously fitted parameter set shifts
//! meaning.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::hrv;
use crate::models::{
    EnergyConfig, EnergyObservation, EnergyResult, HrSample, HrvConfig, HrvSample, ParameterSet,
    WakeEvent,
};

/// Drain rate per bpm above `hr_high` per 15 minutes, before factors
const DRAIN_RATE: f64 = 0.15;
/// Recovery rate per bpm below `hr_low` per 15 minutes, before factors
const RECOVERY_RATE: f64 = 0.1;
/// Minutes of one nominal simulation step
const STEP_MINUTES: f64 = 15.0;

/// A known-good energy value the simulation restarts from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub timestamp: DateTime<Utc>,
    /// Energy percentage at the anchor, 0-100
    pub energy: f64,
}

/// Energy simulator over a fixed parameter set
///
/// The parameter set is caller-owned: fit it once with the optimizer, hold
/// on to it, and construct simulators from it at prediction time. The
/// simulator itself is stateless between calls.
#[derive(Debug, Clone)]
pub struct EnergySimulator {
    params: ParameterSet,
    energy_config: EnergyConfig,
    hrv_config: HrvConfig,
}

impl EnergySimulator {
    pub fn new(params: ParameterSet, energy_config: EnergyConfig, hrv_config: HrvConfig) -> Self {
        EnergySimulator {
            params,
            energy_config,
            hrv_config,
        }
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    /// Run the simulation over `hr`
    ///
    /// With `anchors: None` this is one unanchored pass from `start_energy`.
    /// With anchors, the samples are partitioned into segments
    /// `[anchor_i, anchor_i+1)` (last segment open-ended) and each segment
    /// runs independently from its anchor's energy; `start_energy` is
    /// ignored. Empty segments are skipped. Results are concatenated in
    /// time order.
    ///
    /// Passing wake events enables the reset-on-wake override: a sample
    /// whose timestamp equals a wake event sets energy to 100 instead of
    /// applying the update rule.
    pub fn simulate(
        &self,
        hr: &[HrSample],
        hrv: &[HrvSample],
        start_energy: f64,
        anchors: Option<&[Anchor]>,
        wake_events: Option<&[WakeEvent]>,
    ) -> Vec<EnergyResult> {
        if hr.is_empty() {
            return Vec::new();
        }

        let Some(anchors) = anchors else {
            return self.run_segment(hr, hrv, start_energy, wake_events);
        };

        let mut results = Vec::new();
        for (i, anchor) in anchors.iter().enumerate() {
            let next = anchors.get(i + 1);

            let segment_hr = slice_segment(hr, anchor.timestamp, next.map(|a| a.timestamp));
            if segment_hr.is_empty() {
                continue;
            }
            let segment_hrv = slice_segment(hrv, anchor.timestamp, next.map(|a| a.timestamp));

            results.extend(self.run_segment(segment_hr, segment_hrv, anchor.energy, wake_events));
        }

        results
    }

    /// Anchored simulation against validated observations
    ///
    /// Builds the anchor list from the observations (see [`build_anchors`])
    /// and runs [`simulate`](Self::simulate) with it. `fallback_start` is
    /// used when no observation precedes the heart-rate coverage.
    pub fn simulate_anchored(
        &self,
        hr: &[HrSample],
        hrv: &[HrvSample],
        observations: &[EnergyObservation],
        fallback_start: f64,
        wake_events: Option<&[WakeEvent]>,
    ) -> Vec<EnergyResult> {
        if hr.is_empty() {
            return Vec::new();
        }

        let anchors = build_anchors(
            observations,
            hr[0].timestamp,
            hr[hr.len() - 1].timestamp,
            self.energy_config.time_offset_minutes,
            fallback_start,
        );
        self.simulate(hr, hrv, fallback_start, Some(&anchors), wake_events)
    }

    /// One unanchored pass over a segment
    fn run_segment(
        &self,
        hr: &[HrSample],
        hrv: &[HrvSample],
        start_energy: f64,
        wake_events: Option<&[WakeEvent]>,
    ) -> Vec<EnergyResult> {
        let mut results = Vec::with_capacity(hr.len());
        let mut energy = start_energy;
        let offset = Duration::minutes(self.energy_config.time_offset_minutes);
        let baseline = hrv::hrv_baseline(hrv);

        for (i, sample) in hr.iter().enumerate() {
            let delta_minutes = if i > 0 {
                (sample.timestamp - hr[i - 1].timestamp).num_milliseconds() as f64 / 60_000.0
            } else {
                self.energy_config.aggregation_minutes as f64
            };

            let current_hrv = hrv::hrv_at_time(
                hrv,
                sample.timestamp,
                self.hrv_config.lookup_tolerance_minutes,
            );
            let multiplier = hrv::drain_multiplier(current_hrv, baseline, &self.hrv_config);

            let is_wake = wake_events
                .map(|events| events.iter().any(|w| w.timestamp == sample.timestamp))
                .unwrap_or(false);

            energy = if is_wake {
                100.0
            } else {
                step_energy(energy, sample.bpm, &self.params, multiplier, delta_minutes)
            };

            results.push(EnergyResult {
                timestamp: sample.timestamp + offset,
                energy: (energy - self.params.energy_offset).clamp(0.0, 100.0),
                hrv_multiplier: multiplier,
            });
        }

        results
    }
}

/// Apply the drain/recovery rule for one step and clamp to [0, 100]
pub(crate) fn step_energy(
    energy: f64,
    bpm: f64,
    params: &ParameterSet,
    hrv_multiplier: f64,
    delta_minutes: f64,
) -> f64 {
    let time_factor = delta_minutes / STEP_MINUTES;

    let next = if bpm > params.hr_high {
        energy - (bpm - params.hr_high) * DRAIN_RATE * params.drain_factor * hrv_multiplier * time_factor
    } else if bpm < params.hr_low {
        energy + (params.hr_low - bpm) * RECOVERY_RATE * params.recovery_factor * time_factor
    } else {
        energy
    };

    next.clamp(0.0, 100.0)
}

/// Build the ordered anchor list for a heart-rate coverage window
///
/// The first anchor sits at the start of the coverage and carries the most
/// recent validated observation at or before it (observation timestamps are
/// shifted back by the perception lag so they align with the heart-rate
/// timeline); without one it carries `fallback_start`. Every observation
/// whose shifted time falls strictly inside the coverage becomes a further
/// anchor.
pub fn build_anchors(
    observations: &[EnergyObservation],
    hr_start: DateTime<Utc>,
    hr_end: DateTime<Utc>,
    time_offset_minutes: i64,
    fallback_start: f64,
) -> Vec<Anchor> {
    let offset = Duration::minutes(time_offset_minutes);

    let mut sorted: Vec<&EnergyObservation> = observations.iter().collect();
    sorted.sort_by_key(|o| o.timestamp);

    let mut anchors = Vec::new();

    let start_value = sorted
        .iter()
        .filter(|o| o.timestamp - offset <= hr_start)
        .next_back()
        .map(|o| o.percentage)
        .unwrap_or(fallback_start);
    anchors.push(Anchor {
        timestamp: hr_start,
        energy: start_value,
    });

    for obs in &sorted {
        let adjusted = obs.timestamp - offset;
        if adjusted > hr_start && adjusted <= hr_end {
            anchors.push(Anchor {
                timestamp: adjusted,
                energy: obs.percentage,
            });
        }
    }

    anchors
}

/// Items of a timestamped slice falling in `[start, end)`, or `[start, ..)`
/// when `end` is `None`
fn slice_segment<T: HasTimestamp>(
    data: &[T],
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> &[T] {
    let from = data.partition_point(|item| item.timestamp() < start);
    let to = match end {
        Some(end) => data.partition_point(|item| item.timestamp() < end),
        None => data.len(),
    };
    &data[from..to.max(from)]
}

trait HasTimestamp {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl HasTimestamp for HrSample {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl HasTimestamp for HrvSample {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
