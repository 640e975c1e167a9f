//! End-to-end tests for the energy estimation pipeline: CSV import,
//! sleep-cycle grouping, auto-fit, simulation, and prediction wired
//! together the way the CLI wires them.

use std::io::Write;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use tempfile::NamedTempFile;

use pacers::models::{
    aggregate_hr, AggregationMethod, EnergyConfig, EnergyObservation, FitRange, HrSample,
    HrvConfig, ParameterSet, SleepConfig,
};
use pacers::simulator::EnergySimulator;
use pacers::{import, optimizer, sleep, Predictor};

fn ts(minutes: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + minutes * 60, 0).unwrap()
}

fn obs(minutes: i64, percentage: f64) -> EnergyObservation {
    EnergyObservation::new(ts(minutes), percentage, None).unwrap()
}

fn params(hr_low: f64, hr_high: f64, drain: f64, recovery: f64) -> ParameterSet {
    ParameterSet {
        hr_low,
        hr_high,
        drain_factor: drain,
        recovery_factor: recovery,
        energy_offset: 0.0,
        loss: 0.0,
    }
}

/// Synthetic multi-night trace: each night is 7 hours at 55 bpm, the rest
/// of the day sits at `day_bpm`, sampled every 15 minutes
fn multi_night_trace(nights: usize, day_bpm: f64) -> Vec<HrSample> {
    let mut data = Vec::new();
    for night in 0..nights {
        let base = night as i64 * 1440;
        let mut t = 0;
        while t < 1440 {
            let bpm = if t < 420 { 55.0 } else { day_bpm };
            data.push(HrSample::new(ts(base + t), bpm));
            t += 15;
        }
    }
    data
}

#[test]
fn test_sustained_exertion_drains_monotonically() {
    let sim = EnergySimulator::new(
        params(60.0, 100.0, 1.0, 1.0),
        EnergyConfig::default(),
        HrvConfig::default(),
    );
    let hr: Vec<HrSample> = (0..24).map(|i| HrSample::new(ts(i * 15), 110.0)).collect();
    let curve = sim.simulate(&hr, &[], 80.0, None, None);

    assert_eq!(curve.len(), 24);
    for pair in curve.windows(2) {
        assert!(pair[1].energy < pair[0].energy);
    }
    for point in &curve {
        assert!(point.energy >= 0.0 && point.energy <= 80.0);
    }
}

#[test]
fn test_higher_drain_factor_ends_lower() {
    let hr: Vec<HrSample> = (0..24).map(|i| HrSample::new(ts(i * 15), 120.0)).collect();
    let config = EnergyConfig::default();
    let hrv = HrvConfig::default();

    let gentle = EnergySimulator::new(params(60.0, 100.0, 0.5, 1.0), config, hrv)
        .simulate(&hr, &[], 90.0, None, None);
    let harsh = EnergySimulator::new(params(60.0, 100.0, 2.0, 1.0), config, hrv)
        .simulate(&hr, &[], 90.0, None, None);

    assert!(harsh.last().unwrap().energy < gentle.last().unwrap().energy);
}

#[test]
fn test_sleep_detection_on_multi_night_trace() {
    let hr = multi_night_trace(3, 75.0);
    let config = SleepConfig::default();

    let phases = sleep::detect_sleep_phases(&hr, &config);
    assert_eq!(phases.len(), 3);
    for phase in &phases {
        assert!(phase.duration_minutes() >= config.min_sleep_minutes);
    }

    let cycles = sleep::sleep_cycles(&hr, &config);
    assert_eq!(cycles.len(), 2);
    assert_eq!(cycles[0].cycle_end, cycles[1].cycle_start);
}

#[test]
fn test_auto_fit_over_synthetic_week() {
    // Day heart rate of 75 sits inside every candidate neutral band with
    // hr_low at 50, so constant observations make a zero-loss fit reachable
    let hr = multi_night_trace(3, 75.0);
    let observations = vec![
        obs(600, 50.0),
        obs(1020, 50.0),
        obs(1440 + 600, 50.0),
        obs(1440 + 1020, 50.0),
    ];

    let fit = optimizer::auto_fit(
        &hr,
        &observations,
        &SleepConfig::default(),
        &EnergyConfig::default(),
        FitRange::All,
        AggregationMethod::Median,
    );

    assert_eq!(fit.total_days, 2);
    assert_eq!(fit.day_results.len(), 2);
    assert_eq!(fit.used_days, 2);
    assert_eq!(fit.result.loss, 0.0);
    assert_eq!(fit.result.energy_offset, 0.0);
    assert!(fit.result.hr_low < fit.result.hr_high);
    assert!(fit.result.drain_factor > 0.0);
    assert!(fit.result.recovery_factor > 0.0);
}

#[test]
fn test_auto_fit_range_filter_reduces_cycles() {
    let hr = multi_night_trace(10, 75.0);
    let observations: Vec<EnergyObservation> = (0..10)
        .flat_map(|day| {
            let base = day * 1440;
            vec![obs(base + 600, 50.0), obs(base + 1020, 50.0)]
        })
        .collect();

    let all = optimizer::auto_fit(
        &hr,
        &observations,
        &SleepConfig::default(),
        &EnergyConfig::default(),
        FitRange::All,
        AggregationMethod::Median,
    );
    let week = optimizer::auto_fit(
        &hr,
        &observations,
        &SleepConfig::default(),
        &EnergyConfig::default(),
        FitRange::Week,
        AggregationMethod::Median,
    );

    assert_eq!(all.total_days, 9);
    assert_eq!(week.total_days, 9);
    assert!(week.day_results.len() < all.day_results.len());
}

#[test]
fn test_csv_to_simulation_pipeline() {
    let mut hr_file = NamedTempFile::new().unwrap();
    writeln!(hr_file, "timestamp,bpm").unwrap();
    for i in 0..16 {
        writeln!(hr_file, "{},110.0", ts(i * 15).to_rfc3339()).unwrap();
    }

    let mut obs_file = NamedTempFile::new().unwrap();
    writeln!(obs_file, "timestamp,percentage,validation").unwrap();
    writeln!(obs_file, "{},90.0,confirmed", ts(180).to_rfc3339()).unwrap();

    let hr = import::read_hr_csv(hr_file.path()).unwrap();
    let observations = import::read_observations_csv(obs_file.path()).unwrap();

    let config = EnergyConfig::default();
    let hr_agg = aggregate_hr(&hr, config.aggregation_minutes);
    assert_eq!(hr_agg.len(), 16);

    let sim = EnergySimulator::new(params(60.0, 100.0, 1.0, 1.0), config, HrvConfig::default());
    let curve = sim.simulate_anchored(&hr_agg, &[], &observations, 50.0, None);

    assert_eq!(curve.len(), 16);
    for point in &curve {
        assert!(point.energy >= 0.0 && point.energy <= 100.0);
    }
}

#[test]
fn test_predictor_train_and_predict() {
    let hr = multi_night_trace(3, 75.0);
    let observations = vec![
        obs(600, 50.0),
        obs(1020, 50.0),
        obs(1440 + 600, 50.0),
        obs(1440 + 1020, 50.0),
    ];

    let predictor = Predictor::train(
        &hr,
        &observations,
        SleepConfig::default(),
        EnergyConfig::default(),
        HrvConfig::default(),
    )
    .unwrap();

    let p = predictor.params();
    assert!(p.hr_low < p.hr_high);

    let now = ts(2 * 1440 + 600);
    let forecast = predictor.predict(&hr, &observations, now);
    assert!(forecast.energy_now >= 0.0 && forecast.energy_now <= 1.0);
    assert!(forecast.energy_future >= 0.0 && forecast.energy_future <= 1.0);
    assert_eq!(forecast.time_future - forecast.time, Duration::hours(2));
}

proptest! {
    #[test]
    fn prop_simulated_energy_stays_in_range(
        bpms in prop::collection::vec(30.0f64..180.0, 1..60),
        start in 0.0f64..100.0,
    ) {
        let hr: Vec<HrSample> = bpms
            .iter()
            .enumerate()
            .map(|(i, &bpm)| HrSample::new(ts(i as i64 * 15), bpm))
            .collect();

        let sim = EnergySimulator::new(
            ParameterSet::default(),
            EnergyConfig::default(),
            HrvConfig::default(),
        );
        let curve = sim.simulate(&hr, &[], start, None, None);

        prop_assert_eq!(curve.len(), hr.len());
        for point in &curve {
            prop_assert!(point.energy >= 0.0 && point.energy <= 100.0);
        }
    }
}
