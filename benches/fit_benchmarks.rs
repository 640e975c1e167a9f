use chrono::{DateTime, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use pacers::models::{CycleData, EnergyConfig, EnergyObservation, HrSample};
use pacers::optimizer;

fn ts(minutes: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + minutes * 60, 0).unwrap()
}

/// One synthetic day cycle: overnight recovery, a morning exertion block,
/// an afternoon rest block, with observations every few hours
fn synthetic_cycle() -> CycleData {
    let mut hr_data = Vec::new();
    for i in 0..96 {
        let t = i * 15;
        let bpm = match t {
            0..=419 => 52.0,
            420..=719 => 115.0,
            720..=1019 => 75.0,
            _ => 55.0,
        };
        hr_data.push(HrSample::new(ts(t), bpm));
    }

    let validated_points = vec![
        EnergyObservation::new(ts(540), 70.0, None).unwrap(),
        EnergyObservation::new(ts(780), 45.0, None).unwrap(),
        EnergyObservation::new(ts(1080), 50.0, None).unwrap(),
        EnergyObservation::new(ts(1380), 60.0, None).unwrap(),
    ];

    CycleData {
        label: "bench".to_string(),
        cycle_start: ts(0),
        cycle_end: ts(1440),
        validated_points,
        hr_data,
        start_energy: 65.0,
    }
}

fn bench_grid_search(c: &mut Criterion) {
    let cycle = synthetic_cycle();
    let config = EnergyConfig::default();

    c.bench_function("grid_search_single_cycle", |b| {
        b.iter(|| optimizer::grid_search_cycle(black_box(&cycle), black_box(&config)))
    });
}

fn bench_full_fit(c: &mut Criterion) {
    let cycle = synthetic_cycle();
    let config = EnergyConfig::default();

    c.bench_function("fit_single_cycle", |b| {
        b.iter(|| optimizer::fit_single_cycle(black_box(&cycle), black_box(&config)))
    });
}

criterion_group!(benches, bench_grid_search, bench_full_fit);
criterion_main!(benches);
