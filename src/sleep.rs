//! Sleep phase and wake event detection from aggregated heart rate
//!
//! Sleep is inferred from heart rate alone: a sustained drop below the sleep
//! threshold opens a candidate phase, and the first sample at or above the
//! wake threshold closes it. Phases shorter than the configured minimum are
//! discarded as naps or sensor artifacts.
//!
//! The recorded phase start is backdated to the local heart-rate peak
//! preceding the decline, because the physiological wind-down begins at the
//! peak, not at the first below-threshold reading. The look-back is a bounded
//! ring of the most recent samples so the detector stays streaming-friendly.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{HrSample, SleepConfig, SleepCycle, SleepPhase, WakeEvent};

/// Samples kept for backdating a phase start to the preceding peak
const PEAK_LOOKBACK: usize = 20;

/// Detect sleep phases in time-ordered aggregated heart-rate data
///
/// Requires at least 2 samples, otherwise returns empty. A phase that is
/// still open when the data ends is not emitted.
pub fn detect_sleep_phases(hr: &[HrSample], config: &SleepConfig) -> Vec<SleepPhase> {
    if hr.len() < 2 {
        return Vec::new();
    }

    let mut phases = Vec::new();
    let mut recent: VecDeque<HrSample> = VecDeque::with_capacity(PEAK_LOOKBACK);
    let mut sleep_start: Option<DateTime<Utc>> = None;

    for sample in hr {
        match sleep_start {
            None if sample.bpm < config.sleep_hr_threshold => {
                sleep_start = Some(peak_timestamp(&recent, sample));
            }
            Some(start) if sample.bpm >= config.wake_hr_threshold => {
                let elapsed_minutes =
                    (sample.timestamp - start).num_milliseconds() as f64 / 60_000.0;
                if elapsed_minutes >= config.min_sleep_minutes as f64 {
                    if let Ok(phase) = SleepPhase::new(start, sample.timestamp) {
                        phases.push(phase);
                    }
                } else {
                    debug!(
                        start = %start,
                        minutes = elapsed_minutes,
                        "discarding sleep phase below minimum duration"
                    );
                }
                sleep_start = None;
            }
            _ => {}
        }

        if recent.len() == PEAK_LOOKBACK {
            recent.pop_front();
        }
        recent.push_back(*sample);
    }

    phases
}

/// Timestamp of the local bpm maximum among the look-back window and the
/// current sample; the current sample wins ties
fn peak_timestamp(recent: &VecDeque<HrSample>, current: &HrSample) -> DateTime<Utc> {
    let mut peak = *current;
    for sample in recent.iter().rev() {
        if sample.bpm > peak.bpm {
            peak = *sample;
        }
    }
    peak.timestamp
}

/// Wake events: the end of each detected sleep phase
pub fn detect_wake_events(hr: &[HrSample], config: &SleepConfig) -> Vec<WakeEvent> {
    detect_sleep_phases(hr, config)
        .into_iter()
        .map(|phase| WakeEvent {
            timestamp: phase.end,
        })
        .collect()
}

/// Sleep cycles: the intervals between the starts of consecutive sleep
/// phases; requires at least 2 detected phases, otherwise empty
pub fn sleep_cycles(hr: &[HrSample], config: &SleepConfig) -> Vec<SleepCycle> {
    let phases = detect_sleep_phases(hr, config);
    if phases.len() < 2 {
        return Vec::new();
    }

    phases
        .windows(2)
        .filter_map(|pair| {
            let label = pair[0].start.date_naive().format("%Y-%m-%d").to_string();
            SleepCycle::new(pair[0].start, pair[1].start, label).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + minutes * 60, 0).unwrap()
    }

    fn sample(minutes: i64, bpm: f64) -> HrSample {
        HrSample::new(ts(minutes), bpm)
    }

    /// Trace with one dip below the sleep threshold of the given length,
    /// sampled every 15 minutes
    fn dip_trace(dip_minutes: i64) -> Vec<HrSample> {
        let mut data = vec![sample(0, 80.0), sample(15, 75.0)];
        let dip_start = 30;
        let mut t = dip_start;
        while t < dip_start + dip_minutes {
            data.push(sample(t, 55.0));
            t += 15;
        }
        data.push(sample(dip_start + dip_minutes, 85.0));
        data.push(sample(dip_start + dip_minutes + 15, 85.0));
        data
    }

    #[test]
    fn test_short_dip_yields_no_phase() {
        let config = SleepConfig {
            min_sleep_minutes: 200,
            ..SleepConfig::default()
        };
        let phases = detect_sleep_phases(&dip_trace(60), &config);
        assert!(phases.is_empty());
    }

    #[test]
    fn test_long_dip_yields_one_phase() {
        let config = SleepConfig {
            min_sleep_minutes: 200,
            ..SleepConfig::default()
        };
        let phases = detect_sleep_phases(&dip_trace(300), &config);
        assert_eq!(phases.len(), 1);
        assert!(phases[0].duration_minutes() >= 200);
    }

    #[test]
    fn test_phase_start_backdated_to_peak() {
        let config = SleepConfig {
            min_sleep_minutes: 60,
            ..SleepConfig::default()
        };
        // Peak at t=15, decline, below threshold from t=45
        let data = vec![
            sample(0, 72.0),
            sample(15, 90.0),
            sample(30, 66.0),
            sample(45, 55.0),
            sample(60, 54.0),
            sample(120, 54.0),
            sample(180, 85.0),
        ];
        let phases = detect_sleep_phases(&data, &config);
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].start, ts(15));
        assert_eq!(phases[0].end, ts(180));
    }

    #[test]
    fn test_requires_two_samples() {
        let config = SleepConfig::default();
        assert!(detect_sleep_phases(&[], &config).is_empty());
        assert!(detect_sleep_phases(&[sample(0, 50.0)], &config).is_empty());
    }

    #[test]
    fn test_open_phase_not_emitted() {
        let config = SleepConfig {
            min_sleep_minutes: 60,
            ..SleepConfig::default()
        };
        // Falls asleep and never wakes within the data
        let data = vec![
            sample(0, 80.0),
            sample(15, 55.0),
            sample(240, 54.0),
            sample(480, 53.0),
        ];
        assert!(detect_sleep_phases(&data, &config).is_empty());
    }

    #[test]
    fn test_wake_events_match_phase_ends() {
        let config = SleepConfig {
            min_sleep_minutes: 200,
            ..SleepConfig::default()
        };
        let data = dip_trace(300);
        let phases = detect_sleep_phases(&data, &config);
        let wakes = detect_wake_events(&data, &config);
        assert_eq!(wakes.len(), phases.len());
        assert_eq!(wakes[0].timestamp, phases[0].end);
    }

    #[test]
    fn test_cycles_require_two_phases() {
        let config = SleepConfig {
            min_sleep_minutes: 200,
            ..SleepConfig::default()
        };
        assert!(sleep_cycles(&dip_trace(300), &config).is_empty());
    }

    #[test]
    fn test_cycles_span_consecutive_phase_starts() {
        let config = SleepConfig {
            min_sleep_minutes: 120,
            ..SleepConfig::default()
        };
        // Two nights: sleep 0-240, awake until 1440, sleep 1440-1680, wake
        let mut data = Vec::new();
        data.push(sample(0, 80.0));
        let mut t = 15;
        while t <= 240 {
            data.push(sample(t, 55.0));
            t += 15;
        }
        data.push(sample(255, 85.0));
        data.push(sample(1440, 80.0));
        t = 1455;
        while t <= 1680 {
            data.push(sample(t, 55.0));
            t += 15;
        }
        data.push(sample(1695, 85.0));

        let phases = detect_sleep_phases(&data, &config);
        assert_eq!(phases.len(), 2);

        let cycles = sleep_cycles(&data, &config);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].cycle_start, phases[0].start);
        assert_eq!(cycles[0].cycle_end, phases[1].start);
    }
}
