//! Per-cycle parameter fitting and cross-cycle aggregation
//!
//! Each sleep cycle (one night plus the following day) is fit independently:
//! a coarse grid search over the four physiological parameters finds a
//! starting point, and a Nelder-Mead simplex refines it. The loss is the
//! mean squared error between the unanchored simulation and the cycle's
//! validated observations. Invalid parameter combinations are not errors,
//! they simply carry infinite loss and fall out of the search.
//!
//! Fitted cycles are then combined into one global parameter set with a
//! robust statistic (median or IQR-trimmed mean), and a bias offset is
//! calibrated separately as the median residual against the aggregated
//! parameters.
//!
//! The energy offset is deliberately not a fifth optimizer dimension: a
//! constant bias shifts every residual equally, so the median residual
//! recovers it exactly once the shape parameters are fixed, at a fraction
//! of the search cost.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::models::{
    AggregationMethod, AutoFitResult, CycleData, DayFitResult, EnergyConfig, EnergyObservation,
    FitRange, HrSample, ParameterSet, SleepConfig,
};
use crate::simulator::step_energy;
use crate::sleep;

/// Grid lattice for the coarse search
const HR_LOW_GRID: [f64; 6] = [50.0, 55.0, 60.0, 65.0, 70.0, 75.0];
const HR_HIGH_GRID: [f64; 6] = [80.0, 90.0, 100.0, 110.0, 120.0, 130.0];
const FACTOR_GRID: [f64; 6] = [0.5, 1.0, 1.5, 2.0, 2.5, 3.0];

/// Observations farther than this from any simulated point are unmatched
const MATCH_TOLERANCE_MINUTES: i64 = 30;

/// Per-cycle fits with a loss at or above this are excluded from aggregation
const LOSS_QUALITY_GATE: f64 = 500.0;

/// Nelder-Mead coefficients: reflect / expand / contract / shrink
const NM_ALPHA: f64 = 1.0;
const NM_GAMMA: f64 = 2.0;
const NM_RHO: f64 = 0.5;
const NM_SIGMA: f64 = 0.5;

/// Simplex loss spread below which the search stops
const NM_CONVERGENCE_THRESHOLD: f64 = 0.01;

/// Default iteration cap for the simplex refinement
pub const NM_DEFAULT_MAX_ITERATIONS: usize = 50;

/// Group heart-rate data and validated observations by sleep cycle
///
/// Cycles with fewer than 2 validated observations or no heart-rate samples
/// are dropped before fitting. `start_energy` is the last validated value
/// strictly before the cycle start, defaulting to 50.
pub fn group_by_sleep_cycle(
    validated: &[EnergyObservation],
    hr_agg: &[HrSample],
    sleep_config: &SleepConfig,
) -> Vec<CycleData> {
    let cycles = sleep::sleep_cycles(hr_agg, sleep_config);
    if cycles.is_empty() {
        return Vec::new();
    }

    let mut result = Vec::new();

    for cycle in cycles {
        let mut cycle_validations: Vec<EnergyObservation> = validated
            .iter()
            .filter(|v| v.timestamp >= cycle.cycle_start && v.timestamp < cycle.cycle_end)
            .cloned()
            .collect();

        if cycle_validations.len() < 2 {
            continue;
        }
        cycle_validations.sort_by_key(|v| v.timestamp);

        let cycle_hr: Vec<HrSample> = hr_agg
            .iter()
            .filter(|h| h.timestamp >= cycle.cycle_start && h.timestamp < cycle.cycle_end)
            .copied()
            .collect();

        if cycle_hr.is_empty() {
            continue;
        }

        let start_energy = last_validation_before(validated, cycle.cycle_start);

        result.push(CycleData {
            label: cycle.label,
            cycle_start: cycle.cycle_start,
            cycle_end: cycle.cycle_end,
            validated_points: cycle_validations,
            hr_data: cycle_hr,
            start_energy,
        });
    }

    result
}

fn last_validation_before(validated: &[EnergyObservation], before: DateTime<Utc>) -> f64 {
    validated
        .iter()
        .filter(|v| v.timestamp < before)
        .max_by_key(|v| v.timestamp)
        .map(|v| v.percentage)
        .unwrap_or(50.0)
}

/// Unanchored objective-function simulation
///
/// No HRV modulation, no offset: just the raw drain/recovery walk. Keys are
/// epoch milliseconds of the output timestamps, which include the fixed
/// physiological delay so they line up with when the user feels the effect.
fn simulate_energy_map(
    hr_data: &[HrSample],
    start_energy: f64,
    hr_low: f64,
    hr_high: f64,
    drain_factor: f64,
    recovery_factor: f64,
    config: &EnergyConfig,
) -> BTreeMap<i64, f64> {
    let params = ParameterSet {
        hr_low,
        hr_high,
        drain_factor,
        recovery_factor,
        energy_offset: 0.0,
        loss: f64::INFINITY,
    };

    let delay_ms = config.time_offset_minutes * 60 * 1000;
    let mut result = BTreeMap::new();
    let mut energy = start_energy;

    for (i, sample) in hr_data.iter().enumerate() {
        let delta_minutes = if i > 0 {
            (sample.timestamp - hr_data[i - 1].timestamp).num_milliseconds() as f64 / 60_000.0
        } else {
            config.aggregation_minutes as f64
        };

        energy = step_energy(energy, sample.bpm, &params, 1.0, delta_minutes);
        result.insert(sample.timestamp.timestamp_millis() + delay_ms, energy);
    }

    result
}

/// Closest simulated energy to `target_ms`, or `None` when nothing lies
/// within the matching tolerance
fn find_closest_energy(energy_map: &BTreeMap<i64, f64>, target_ms: i64) -> Option<f64> {
    let before = energy_map.range(..=target_ms).next_back();
    let after = energy_map.range(target_ms + 1..).next();

    let closest = match (before, after) {
        (Some((tb, eb)), Some((ta, ea))) => {
            if target_ms - tb <= ta - target_ms {
                Some((target_ms - tb, *eb))
            } else {
                Some((ta - target_ms, *ea))
            }
        }
        (Some((tb, eb)), None) => Some((target_ms - tb, *eb)),
        (None, Some((ta, ea))) => Some((ta - target_ms, *ea)),
        (None, None) => None,
    };

    closest.and_then(|(diff, energy)| {
        if diff <= MATCH_TOLERANCE_MINUTES * 60 * 1000 {
            Some(energy)
        } else {
            None
        }
    })
}

/// Mean squared error of a candidate parameter set over one cycle
///
/// Infinite when the candidate violates `hr_low < hr_high` or has a
/// non-positive factor, and when no observation matches a simulated point.
pub fn cycle_loss(
    cycle: &CycleData,
    hr_low: f64,
    hr_high: f64,
    drain_factor: f64,
    recovery_factor: f64,
    config: &EnergyConfig,
) -> f64 {
    if hr_low >= hr_high {
        return f64::INFINITY;
    }
    if drain_factor <= 0.0 || recovery_factor <= 0.0 {
        return f64::INFINITY;
    }

    let energy_map = simulate_energy_map(
        &cycle.hr_data,
        cycle.start_energy,
        hr_low,
        hr_high,
        drain_factor,
        recovery_factor,
        config,
    );

    let mut sum_squared_error = 0.0;
    let mut matched = 0usize;

    for validated in &cycle.validated_points {
        if let Some(predicted) =
            find_closest_energy(&energy_map, validated.timestamp.timestamp_millis())
        {
            let error = predicted - validated.percentage;
            sum_squared_error += error * error;
            matched += 1;
        }
    }

    if matched == 0 {
        f64::INFINITY
    } else {
        sum_squared_error / matched as f64
    }
}

/// Median residual (simulated minus validated) for a cycle under fixed
/// parameters; this is the decoupled bias correction
pub fn energy_offset_for_cycle(
    cycle: &CycleData,
    params: &ParameterSet,
    config: &EnergyConfig,
) -> f64 {
    let energy_map = simulate_energy_map(
        &cycle.hr_data,
        cycle.start_energy,
        params.hr_low,
        params.hr_high,
        params.drain_factor,
        params.recovery_factor,
        config,
    );

    let residuals: Vec<f64> = cycle
        .validated_points
        .iter()
        .filter_map(|v| {
            find_closest_energy(&energy_map, v.timestamp.timestamp_millis())
                .map(|predicted| predicted - v.percentage)
        })
        .collect();

    if residuals.is_empty() {
        0.0
    } else {
        median(&residuals)
    }
}

/// Exhaustive coarse search over the parameter lattice
///
/// Combinations with `hr_low >= hr_high` are skipped. Returns the default
/// parameter set (infinite loss) when nothing on the grid produces a finite
/// improvement.
pub fn grid_search_cycle(cycle: &CycleData, config: &EnergyConfig) -> ParameterSet {
    let mut best = ParameterSet::default();

    for &hr_low in &HR_LOW_GRID {
        for &hr_high in &HR_HIGH_GRID {
            if hr_low >= hr_high {
                continue;
            }
            for &drain in &FACTOR_GRID {
                for &recovery in &FACTOR_GRID {
                    let loss = cycle_loss(cycle, hr_low, hr_high, drain, recovery, config);
                    if loss < best.loss {
                        best = ParameterSet {
                            hr_low,
                            hr_high,
                            drain_factor: drain,
                            recovery_factor: recovery,
                            energy_offset: 0.0,
                            loss,
                        };
                    }
                }
            }
        }
    }

    best
}

#[derive(Debug, Clone, Copy)]
struct SimplexVertex {
    point: [f64; 4],
    loss: f64,
}

fn centroid(simplex: &[SimplexVertex]) -> [f64; 4] {
    // All vertices except the worst (last after sorting)
    let mut c = [0.0; 4];
    let n = simplex.len() - 1;
    for vertex in &simplex[..n] {
        for j in 0..4 {
            c[j] += vertex.point[j];
        }
    }
    for value in &mut c {
        *value /= n as f64;
    }
    c
}

fn blend(centroid: [f64; 4], other: [f64; 4], coefficient: f64) -> [f64; 4] {
    let mut p = [0.0; 4];
    for j in 0..4 {
        p[j] = centroid[j] + coefficient * (other[j] - centroid[j]);
    }
    p
}

fn is_converged(simplex: &[SimplexVertex]) -> bool {
    let finite: Vec<f64> = simplex
        .iter()
        .map(|v| v.loss)
        .filter(|l| l.is_finite())
        .collect();
    if finite.is_empty() {
        return false;
    }
    finite.population_std_dev() < NM_CONVERGENCE_THRESHOLD
}

/// One Nelder-Mead iteration over a loss-sorted simplex, producing a new
/// vertex list rather than mutating in place
fn update_simplex<F>(simplex: &[SimplexVertex], loss_fn: F) -> Vec<SimplexVertex>
where
    F: Fn(&[f64; 4]) -> f64,
{
    let best = &simplex[0];
    let second_worst = &simplex[simplex.len() - 2];
    let worst = &simplex[simplex.len() - 1];

    let c = centroid(simplex);

    // Reflect the worst vertex through the centroid
    let reflected = blend(c, worst.point, -NM_ALPHA);
    let reflected_loss = loss_fn(&reflected);

    let replace_worst = |vertex: SimplexVertex| -> Vec<SimplexVertex> {
        let mut next = simplex[..simplex.len() - 1].to_vec();
        next.push(vertex);
        next
    };

    if reflected_loss < best.loss {
        let expanded = blend(c, reflected, NM_GAMMA);
        let expanded_loss = loss_fn(&expanded);
        if expanded_loss < reflected_loss {
            replace_worst(SimplexVertex {
                point: expanded,
                loss: expanded_loss,
            })
        } else {
            replace_worst(SimplexVertex {
                point: reflected,
                loss: reflected_loss,
            })
        }
    } else if reflected_loss < second_worst.loss {
        replace_worst(SimplexVertex {
            point: reflected,
            loss: reflected_loss,
        })
    } else {
        let contracted = blend(c, worst.point, NM_RHO);
        let contracted_loss = loss_fn(&contracted);
        if contracted_loss < worst.loss {
            replace_worst(SimplexVertex {
                point: contracted,
                loss: contracted_loss,
            })
        } else {
            // Shrink everything toward the best vertex
            std::iter::once(*best)
                .chain(simplex[1..].iter().map(|vertex| {
                    let mut point = [0.0; 4];
                    for j in 0..4 {
                        point[j] =
                            best.point[j] + NM_SIGMA * (vertex.point[j] - best.point[j]);
                    }
                    let loss = loss_fn(&point);
                    SimplexVertex { point, loss }
                }))
                .collect()
        }
    }
}

/// Nelder-Mead refinement of a grid-search result
///
/// Four dimensions (hr_low, hr_high, drain_factor, recovery_factor); the
/// initial simplex perturbs one dimension per extra vertex. Stops when the
/// spread of finite losses falls below the convergence threshold or after
/// `max_iterations`. Heart-rate bounds are rounded to 1 decimal, factors
/// to 2.
pub fn nelder_mead_cycle(
    cycle: &CycleData,
    start: &ParameterSet,
    config: &EnergyConfig,
    max_iterations: usize,
) -> ParameterSet {
    let loss_fn = |p: &[f64; 4]| cycle_loss(cycle, p[0], p[1], p[2], p[3], config);

    let origin = [
        start.hr_low,
        start.hr_high,
        start.drain_factor,
        start.recovery_factor,
    ];
    const PERTURBATIONS: [f64; 4] = [3.0, 5.0, 0.3, 0.3];

    let mut simplex: Vec<SimplexVertex> = Vec::with_capacity(5);
    simplex.push(SimplexVertex {
        point: origin,
        loss: loss_fn(&origin),
    });
    for (dim, delta) in PERTURBATIONS.iter().enumerate() {
        let mut point = origin;
        point[dim] += delta;
        simplex.push(SimplexVertex {
            point,
            loss: loss_fn(&point),
        });
    }

    for _ in 0..max_iterations {
        simplex.sort_by(|a, b| a.loss.total_cmp(&b.loss));
        simplex = update_simplex(&simplex, loss_fn);
        if is_converged(&simplex) {
            break;
        }
    }

    let best = simplex
        .iter()
        .min_by(|a, b| a.loss.total_cmp(&b.loss))
        .copied()
        .unwrap_or(SimplexVertex {
            point: origin,
            loss: f64::INFINITY,
        });

    ParameterSet {
        hr_low: round_to(best.point[0], 1),
        hr_high: round_to(best.point[1], 1),
        drain_factor: round_to(best.point[2], 2),
        recovery_factor: round_to(best.point[3], 2),
        energy_offset: 0.0,
        loss: best.loss,
    }
}

/// Fit one sleep cycle: grid search, then simplex refinement
pub fn fit_single_cycle(cycle: &CycleData, config: &EnergyConfig) -> DayFitResult {
    let grid = grid_search_cycle(cycle, config);
    debug!(
        cycle = %cycle.label,
        loss = grid.loss,
        "grid search starting point"
    );
    let refined = nelder_mead_cycle(cycle, &grid, config, NM_DEFAULT_MAX_ITERATIONS);

    DayFitResult {
        hr_low: refined.hr_low,
        hr_high: refined.hr_high,
        drain_factor: refined.drain_factor,
        recovery_factor: refined.recovery_factor,
        loss: refined.loss,
        energy_offset: refined.energy_offset,
        date: cycle.label.clone(),
        data_points: cycle.validated_points.len(),
    }
}

/// Sorted-middle median; 0 for an empty slice
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Mean of values within 1.5 IQR of the quartiles
///
/// Falls back to the median below 4 values, and again when trimming removes
/// everything. Quartiles are taken at positions `⌊n·0.25⌋` and `⌊n·0.75⌋`
/// of the sorted values.
pub fn iqr_trimmed_mean(values: &[f64]) -> f64 {
    if values.len() < 4 {
        return median(values);
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let q1 = sorted[(sorted.len() as f64 * 0.25) as usize];
    let q3 = sorted[(sorted.len() as f64 * 0.75) as usize];
    let iqr = q3 - q1;
    let low = q1 - 1.5 * iqr;
    let high = q3 + 1.5 * iqr;

    let kept: Vec<f64> = sorted
        .iter()
        .copied()
        .filter(|v| (low..=high).contains(v))
        .collect();

    if kept.is_empty() {
        median(values)
    } else {
        kept.iter().sum::<f64>() / kept.len() as f64
    }
}

fn combine(values: &[f64], method: AggregationMethod) -> f64 {
    match method {
        AggregationMethod::Median => median(values),
        AggregationMethod::IqrTrimmedMean => iqr_trimmed_mean(values),
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Keep only cycles within the range, measured back from the newest cycle
/// start
pub fn filter_cycles_by_range(cycles: Vec<CycleData>, range: FitRange) -> Vec<CycleData> {
    let cutoff_days = match range {
        FitRange::All => return cycles,
        FitRange::Month => 30,
        FitRange::Week => 7,
    };

    let Some(newest) = cycles.iter().map(|c| c.cycle_start).max() else {
        return cycles;
    };
    let cutoff = newest - Duration::days(cutoff_days);

    cycles
        .into_iter()
        .filter(|c| c.cycle_start >= cutoff)
        .collect()
}

/// Fit every eligible sleep cycle and combine the results into one global
/// parameter set
///
/// Cycles are fit independently and in parallel. Fits with non-finite loss
/// or loss at or above the quality gate are excluded from aggregation but
/// still reported in `day_results`. When no cycle survives, the default
/// parameter set with infinite loss is returned.
pub fn auto_fit(
    hr_agg: &[HrSample],
    validated: &[EnergyObservation],
    sleep_config: &SleepConfig,
    energy_config: &EnergyConfig,
    range: FitRange,
    method: AggregationMethod,
) -> AutoFitResult {
    let all_cycles = group_by_sleep_cycle(validated, hr_agg, sleep_config);
    let total_days = all_cycles.len();
    let cycles = filter_cycles_by_range(all_cycles, range);

    debug!(
        total = total_days,
        in_range = cycles.len(),
        hr_points = hr_agg.len(),
        validated_points = validated.len(),
        "auto-fit eligible cycles"
    );

    if cycles.is_empty() {
        return AutoFitResult {
            result: ParameterSet::default(),
            day_results: Vec::new(),
            used_days: 0,
            total_days,
        };
    }

    // Every cycle's fit is independent; this is the one loop worth
    // parallelizing
    let day_results: Vec<DayFitResult> = cycles
        .par_iter()
        .map(|cycle| fit_single_cycle(cycle, energy_config))
        .collect();

    let surviving: Vec<(&CycleData, &DayFitResult)> = cycles
        .iter()
        .zip(day_results.iter())
        .filter(|(_, fit)| fit.loss.is_finite() && fit.loss < LOSS_QUALITY_GATE)
        .collect();

    if surviving.is_empty() {
        return AutoFitResult {
            result: ParameterSet::default(),
            day_results,
            used_days: 0,
            total_days,
        };
    }

    let collect_param = |f: fn(&DayFitResult) -> f64| -> Vec<f64> {
        surviving.iter().map(|(_, fit)| f(fit)).collect()
    };

    let hr_low = round_to(combine(&collect_param(|f| f.hr_low), method), 1);
    let hr_high = round_to(combine(&collect_param(|f| f.hr_high), method), 1);
    let drain_factor = round_to(combine(&collect_param(|f| f.drain_factor), method), 2);
    let recovery_factor = round_to(combine(&collect_param(|f| f.recovery_factor), method), 2);
    let loss = combine(&collect_param(|f| f.loss), method);

    // The bias offset is calibrated against the aggregated parameters, not
    // against each cycle's own fit
    let aggregated = ParameterSet {
        hr_low,
        hr_high,
        drain_factor,
        recovery_factor,
        energy_offset: 0.0,
        loss,
    };
    let offsets: Vec<f64> = surviving
        .iter()
        .map(|(cycle, _)| energy_offset_for_cycle(cycle, &aggregated, energy_config))
        .collect();
    let energy_offset = round_to(median(&offsets), 1);

    info!(
        used = surviving.len(),
        total = total_days,
        hr_low,
        hr_high,
        drain_factor,
        recovery_factor,
        energy_offset,
        "auto-fit complete"
    );

    let used_days = surviving.len();
    AutoFitResult {
        result: ParameterSet {
            energy_offset,
            ..aggregated
        },
        day_results,
        used_days,
        total_days,
    }
}
