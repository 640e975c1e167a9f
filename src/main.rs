use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::*;
use tabled::{Table, Tabled};

use pacers::config::AppConfig;
use pacers::logging::{init_logging, LogConfig, LogLevel};
use pacers::models::{
    aggregate_hr, AggregationMethod, AutoFitResult, FitRange, ParameterSet,
};
use pacers::simulator::EnergySimulator;
use pacers::{decay, hrv, import, optimizer, sleep};

/// pacers - Energy envelope estimation CLI
///
/// Fits personal heart-rate thresholds and drain/recovery factors from
/// wearable data and self-reported energy levels, then simulates and
/// forecasts the energy battery for pacing decisions.
#[derive(Parser)]
#[command(name = "pacers")]
#[command(version = "0.1.0")]
#[command(about = "Energy envelope estimation CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit model parameters from heart rate and validated energy levels
    Fit {
        /// Heart-rate CSV (timestamp,bpm)
        #[arg(long)]
        hr: PathBuf,

        /// Energy observation CSV (timestamp,percentage,validation)
        #[arg(long)]
        observations: PathBuf,

        /// Time range of cycles to fit (all, month, week)
        #[arg(short, long)]
        range: Option<String>,

        /// Aggregation statistic (median, iqr-trimmed-mean)
        #[arg(short, long)]
        method: Option<String>,

        /// Print the fitted parameters as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Simulate the energy curve with given or default parameters
    Simulate {
        /// Heart-rate CSV (timestamp,bpm)
        #[arg(long)]
        hr: PathBuf,

        /// Energy observation CSV used for anchoring
        #[arg(long)]
        observations: PathBuf,

        /// JSON file with fitted parameters (defaults when omitted)
        #[arg(short, long)]
        params: Option<PathBuf>,

        /// Start energy when no observation precedes the data
        #[arg(short, long, default_value = "50.0")]
        start_energy: f64,

        /// Write the simulated curve to a CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Train on history and forecast current and near-future energy
    Predict {
        /// Heart-rate CSV (timestamp,bpm)
        #[arg(long)]
        hr: PathBuf,

        /// Energy observation CSV (timestamp,percentage,validation)
        #[arg(long)]
        observations: PathBuf,
    },

    /// Show the personalized no-signal decay profile
    Decay {
        /// Energy observation CSV (timestamp,percentage,validation)
        #[arg(long)]
        observations: PathBuf,
    },

    /// Show or initialize the configuration file
    Config {
        /// Write a default config file to the standard location
        #[arg(long)]
        init: bool,
    },
}

#[derive(Tabled)]
struct FitRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "HR low")]
    hr_low: String,
    #[tabled(rename = "HR high")]
    hr_high: String,
    #[tabled(rename = "Drain")]
    drain: String,
    #[tabled(rename = "Recovery")]
    recovery: String,
    #[tabled(rename = "Offset")]
    offset: String,
    #[tabled(rename = "Loss")]
    loss: String,
    #[tabled(rename = "Points")]
    points: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig {
        level: LogLevel::from_verbosity(cli.verbose),
        ..LogConfig::default()
    };
    init_logging(&log_config)?;

    let config_path = cli
        .config
        .or_else(AppConfig::default_path)
        .unwrap_or_else(|| PathBuf::from("pacers.toml"));
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    match cli.command {
        Commands::Fit {
            hr,
            observations,
            range,
            method,
            json,
        } => {
            let range = match range.as_deref() {
                Some("all") => FitRange::All,
                Some("month") => FitRange::Month,
                Some("week") => FitRange::Week,
                Some(other) => anyhow::bail!("unknown range: {}", other),
                None => config.fit.range,
            };
            let method = match method.as_deref() {
                Some("median") => AggregationMethod::Median,
                Some("iqr-trimmed-mean") => AggregationMethod::IqrTrimmedMean,
                Some(other) => anyhow::bail!("unknown method: {}", other),
                None => config.fit.method,
            };

            let hr_data = import::read_hr_csv(&hr)?;
            let obs = import::read_observations_csv(&observations)?;
            let hr_agg = aggregate_hr(&hr_data, config.energy.aggregation_minutes);

            println!("{}", "Fitting energy model...".blue().bold());
            let fit = optimizer::auto_fit(
                &hr_agg,
                &obs,
                &config.sleep,
                &config.energy,
                range,
                method,
            );

            if json {
                println!("{}", serde_json::to_string_pretty(&fit.result)?);
            } else {
                print_fit(&fit);
            }
        }

        Commands::Simulate {
            hr,
            observations,
            params,
            start_energy,
            output,
        } => {
            let params = match params {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    serde_json::from_str::<ParameterSet>(&content)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                None => ParameterSet::default(),
            };

            let hr_data = import::read_hr_csv(&hr)?;
            let obs = import::read_observations_csv(&observations)?;
            let hr_agg = aggregate_hr(&hr_data, config.energy.aggregation_minutes);
            let hrv_data = hrv::compute_hrv_series(&hr_data, config.hrv.window_minutes);

            let wake_events = if config.sleep.reset_on_wake {
                Some(sleep::detect_wake_events(&hr_agg, &config.sleep))
            } else {
                None
            };

            println!("{}", "Simulating energy curve...".cyan().bold());
            let simulator = EnergySimulator::new(params, config.energy, config.hrv);
            let curve = simulator.simulate_anchored(
                &hr_agg,
                &hrv_data,
                &obs,
                start_energy,
                wake_events.as_deref(),
            );

            match output {
                Some(path) => {
                    let mut writer = csv::Writer::from_path(&path)
                        .with_context(|| format!("writing {}", path.display()))?;
                    for point in &curve {
                        writer.serialize(point)?;
                    }
                    writer.flush()?;
                    println!(
                        "{}",
                        format!("✓ Wrote {} points to {}", curve.len(), path.display()).cyan()
                    );
                }
                None => {
                    for point in &curve {
                        println!("{},{:.1}", point.timestamp.to_rfc3339(), point.energy);
                    }
                }
            }
        }

        Commands::Predict { hr, observations } => {
            let hr_data = import::read_hr_csv(&hr)?;
            let obs = import::read_observations_csv(&observations)?;

            println!("{}", "Training predictor...".green().bold());
            let predictor = pacers::Predictor::train(
                &hr_data,
                &obs,
                config.sleep,
                config.energy,
                config.hrv,
            )?;

            let forecast = predictor.predict(&hr_data, &obs, Utc::now());
            let p = predictor.params();
            println!(
                "  Parameters: hr_low {:.1}, hr_high {:.1}, drain {:.2}, recovery {:.2}",
                p.hr_low, p.hr_high, p.drain_factor, p.recovery_factor
            );
            println!(
                "{}",
                format!("  Energy now:       {:.0}%", forecast.energy_now * 100.0)
                    .green()
                    .bold()
            );
            println!(
                "{}",
                format!(
                    "  Energy at {}: {:.0}%",
                    forecast.time_future.format("%H:%M"),
                    forecast.energy_future * 100.0
                )
                .green()
            );
        }

        Commands::Decay { observations } => {
            let obs = import::read_observations_csv(&observations)?;
            let rate = decay::compute_decay_rate(&obs);

            println!("{}", "Decay profile".yellow().bold());
            println!("  Average:   {:+.2} %/h", rate.average_hourly_decay);
            let bucket = |label: &str, value: Option<f64>| match value {
                Some(v) => println!("  {:<10} {:+.2} %/h", label, v),
                None => println!("  {:<10} (not enough data)", label),
            };
            bucket("Morning:", rate.morning_decay_rate);
            bucket("Afternoon:", rate.afternoon_decay_rate);
            bucket("Evening:", rate.evening_decay_rate);
            bucket("Night:", rate.night_recovery_rate);
            println!("  Pairs used: {}", rate.data_points_used);
        }

        Commands::Config { init } => {
            if init {
                config.save(&config_path)?;
                println!(
                    "{}",
                    format!("✓ Wrote config to {}", config_path.display()).white()
                );
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

fn print_fit(fit: &AutoFitResult) {
    let rows: Vec<FitRow> = fit
        .day_results
        .iter()
        .map(|day| FitRow {
            date: day.date.clone(),
            hr_low: format!("{:.1}", day.hr_low),
            hr_high: format!("{:.1}", day.hr_high),
            drain: format!("{:.2}", day.drain_factor),
            recovery: format!("{:.2}", day.recovery_factor),
            offset: format!("{:.1}", day.energy_offset),
            loss: if day.loss.is_finite() {
                format!("{:.1}", day.loss)
            } else {
                "inf".to_string()
            },
            points: day.data_points,
        })
        .collect();

    println!("{}", Table::new(rows));

    let p = &fit.result;
    println!(
        "{}",
        format!(
            "✓ Fitted on {}/{} cycles: hr_low {:.1}, hr_high {:.1}, drain {:.2}, recovery {:.2}, offset {:.1}",
            fit.used_days, fit.total_days, p.hr_low, p.hr_high, p.drain_factor, p.recovery_factor, p.energy_offset
        )
        .blue()
    );
}
