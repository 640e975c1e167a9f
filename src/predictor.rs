//! Train/predict façade over the full pipeline
//!
//! A `Predictor` is an explicit, caller-owned model value: train it once
//! from history, hold on to it, and re-train on whatever schedule suits the
//! caller. There is no hidden module state; dropping the predictor drops
//! the model.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::decay;
use crate::error::{CalculationError, Result};
use crate::hrv;
use crate::models::{
    aggregate_hr, AggregationMethod, DecayRateResult, EnergyConfig, EnergyForecast,
    EnergyObservation, EnergyResult, FitRange, HrSample, HrvConfig, ParameterSet, SleepConfig,
};
use crate::optimizer;
use crate::simulator::EnergySimulator;

/// Aggregated samples required before training is meaningful
const MIN_AGGREGATED_SAMPLES: usize = 10;

/// Matching tolerance when reading the simulated curve at a point in time
const CURVE_LOOKUP_TOLERANCE_MINUTES: i64 = 30;

/// How far ahead the second forecast point looks
const FORECAST_HORIZON: Duration = Duration::hours(2);

/// A trained energy model: fitted physiological parameters plus the
/// no-signal decay fallback
#[derive(Debug, Clone)]
pub struct Predictor {
    params: ParameterSet,
    decay_rate: DecayRateResult,
    sleep_config: SleepConfig,
    energy_config: EnergyConfig,
    hrv_config: HrvConfig,
}

impl Predictor {
    /// Train from heart-rate history and validated observations
    ///
    /// Aggregates the heart rate, runs the auto-fit over all sleep cycles,
    /// and computes the decay fallback. When no cycle survives the quality
    /// gate the predictor falls back to default parameters; that is a
    /// usable (if generic) model, not an error. Errors indicate the input
    /// is too thin to even attempt a fit.
    pub fn train(
        heart_rate: &[HrSample],
        observations: &[EnergyObservation],
        sleep_config: SleepConfig,
        energy_config: EnergyConfig,
        hrv_config: HrvConfig,
    ) -> Result<Self> {
        if heart_rate.is_empty() || observations.is_empty() {
            return Err(CalculationError::InsufficientData {
                calculation: "train".to_string(),
                reason: format!(
                    "hr samples: {}, observations: {}",
                    heart_rate.len(),
                    observations.len()
                ),
            }
            .into());
        }

        let hr_agg = aggregate_hr(heart_rate, energy_config.aggregation_minutes);
        if hr_agg.len() < MIN_AGGREGATED_SAMPLES {
            return Err(CalculationError::InsufficientData {
                calculation: "train".to_string(),
                reason: format!("only {} aggregated hr samples", hr_agg.len()),
            }
            .into());
        }

        let fit = optimizer::auto_fit(
            &hr_agg,
            observations,
            &sleep_config,
            &energy_config,
            FitRange::All,
            AggregationMethod::Median,
        );

        let params = if fit.used_days > 0 {
            info!(
                used = fit.used_days,
                total = fit.total_days,
                "predictor trained from fitted cycles"
            );
            fit.result
        } else {
            warn!("no cycle survived fitting, using default parameters");
            ParameterSet::default()
        };

        Ok(Predictor {
            params,
            decay_rate: decay::compute_decay_rate(observations),
            sleep_config,
            energy_config,
            hrv_config,
        })
    }

    /// Build a predictor from already-fitted parameters
    pub fn from_params(
        params: ParameterSet,
        decay_rate: DecayRateResult,
        sleep_config: SleepConfig,
        energy_config: EnergyConfig,
        hrv_config: HrvConfig,
    ) -> Self {
        Predictor {
            params,
            decay_rate,
            sleep_config,
            energy_config,
            hrv_config,
        }
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn decay_rate(&self) -> &DecayRateResult {
        &self.decay_rate
    }

    /// Forecast energy at `now` and two hours ahead
    ///
    /// With heart-rate data, runs the anchored HRV-modulated simulation and
    /// reads the curve at the two target times. Without it, extrapolates
    /// from the last validated observation with the decay fallback.
    /// Energies are on the [0, 1] scale.
    pub fn predict(
        &self,
        heart_rate: &[HrSample],
        observations: &[EnergyObservation],
        now: DateTime<Utc>,
    ) -> EnergyForecast {
        let future = now + FORECAST_HORIZON;

        let hr_agg = aggregate_hr(heart_rate, self.energy_config.aggregation_minutes);
        if hr_agg.is_empty() {
            return self.fallback_forecast(observations, now);
        }

        let hrv_data = hrv::compute_hrv_series(heart_rate, self.hrv_config.window_minutes);
        let last_validated = observations
            .iter()
            .max_by_key(|o| o.timestamp)
            .map(|o| o.percentage)
            .unwrap_or(50.0);

        let wake_events = if self.sleep_config.reset_on_wake {
            Some(crate::sleep::detect_wake_events(&hr_agg, &self.sleep_config))
        } else {
            None
        };

        let simulator =
            EnergySimulator::new(self.params, self.energy_config, self.hrv_config);
        let curve = simulator.simulate_anchored(
            &hr_agg,
            &hrv_data,
            observations,
            last_validated,
            wake_events.as_deref(),
        );

        let energy_now = curve_at(&curve, now).unwrap_or(last_validated / 100.0);
        let energy_future = curve_at(&curve, future)
            .or_else(|| curve.last().map(|r| r.energy / 100.0))
            .unwrap_or(last_validated / 100.0);

        EnergyForecast {
            time: now,
            energy_now: energy_now.clamp(0.0, 1.0),
            time_future: future,
            energy_future: energy_future.clamp(0.0, 1.0),
        }
    }

    fn fallback_forecast(
        &self,
        observations: &[EnergyObservation],
        now: DateTime<Utc>,
    ) -> EnergyForecast {
        let last = observations.iter().max_by_key(|o| o.timestamp);
        let last_energy = last.map(|o| o.percentage / 100.0).unwrap_or(0.5);
        let last_time = last.map(|o| o.timestamp).unwrap_or(now);

        let (energy_now, energy_future) =
            decay::predict_with_decay(last_energy, last_time, now, Some(&self.decay_rate));

        EnergyForecast {
            time: now,
            energy_now,
            time_future: now + FORECAST_HORIZON,
            energy_future,
        }
    }
}

/// Curve value nearest to `target`, on the [0, 1] scale, when within the
/// lookup tolerance
fn curve_at(curve: &[EnergyResult], target: DateTime<Utc>) -> Option<f64> {
    let closest = curve
        .iter()
        .min_by_key(|r| (r.timestamp - target).num_milliseconds().abs())?;

    let diff = (closest.timestamp - target).num_milliseconds().abs();
    if diff <= CURVE_LOOKUP_TOLERANCE_MINUTES * 60 * 1000 {
        Some(closest.energy / 100.0)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + minutes * 60, 0).unwrap()
    }

    fn obs(minutes: i64, percentage: f64) -> EnergyObservation {
        EnergyObservation::new(ts(minutes), percentage, None).unwrap()
    }

    fn predictor() -> Predictor {
        Predictor::from_params(
            ParameterSet::default(),
            DecayRateResult::default(),
            SleepConfig::default(),
            EnergyConfig::default(),
            HrvConfig::default(),
        )
    }

    #[test]
    fn test_train_rejects_empty_input() {
        let result = Predictor::train(
            &[],
            &[],
            SleepConfig::default(),
            EnergyConfig::default(),
            HrvConfig::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_train_rejects_thin_hr_data() {
        let hr: Vec<HrSample> = (0..3).map(|i| HrSample::new(ts(i * 15), 70.0)).collect();
        let result = Predictor::train(
            &hr,
            &[obs(0, 60.0)],
            SleepConfig::default(),
            EnergyConfig::default(),
            HrvConfig::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_predict_without_hr_uses_decay_fallback() {
        let p = predictor();
        let forecast = p.predict(&[], &[obs(0, 80.0)], ts(120));
        // Default 3%/h over 2 hours from 0.8
        assert!((forecast.energy_now - 0.74).abs() < 1e-9);
        assert!(forecast.energy_future < forecast.energy_now);
        assert_eq!(forecast.time_future - forecast.time, Duration::hours(2));
    }

    #[test]
    fn test_predict_without_any_data_is_neutral() {
        let p = predictor();
        let forecast = p.predict(&[], &[], ts(0));
        // No last observation: starts from 0.5 with zero elapsed time
        assert!((forecast.energy_now - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_predict_with_hr_reads_simulated_curve() {
        let p = predictor();
        // Steady high heart rate for 6 hours
        let hr: Vec<HrSample> = (0..24).map(|i| HrSample::new(ts(i * 15), 120.0)).collect();
        let observations = vec![obs(0, 90.0)];

        // Query at the end of the shifted curve
        let now = ts(23 * 15 + 120);
        let forecast = p.predict(&hr, &observations, now);

        // Draining the whole time: the forecast must sit below the anchor
        assert!(forecast.energy_now < 0.9);
        assert!(forecast.energy_now >= 0.0);
        // Future beyond curve end falls back to the curve's last value
        assert!(forecast.energy_future <= forecast.energy_now + 1e-9);
    }

    #[test]
    fn test_forecast_clamped_to_unit_range() {
        let p = predictor();
        let hr: Vec<HrSample> = (0..40).map(|i| HrSample::new(ts(i * 15), 160.0)).collect();
        let forecast = p.predict(&hr, &[obs(0, 10.0)], ts(39 * 15 + 120));
        assert!(forecast.energy_now >= 0.0 && forecast.energy_now <= 1.0);
        assert!(forecast.energy_future >= 0.0 && forecast.energy_future <= 1.0);
    }
}
