use clap::Parser;
use log::info;
use std::path::PathBuf;

mod config;
mod dosing;
mod error;
mod models;
mod output;
mod simulation;
mod solver;

use crate::config::Config;
use crate::dosing::{DoseEvent, DoseKind, DoseSchedule};
use crate::error::SimError;
use crate::models::{AsaClass, PatientCovariates, Sex};
use crate::simulation::SimulationRun;

#[derive(Parser)]
#[command(name = "pkpd_simulation")]
#[command(about = "Three-compartment PK/PD effect-site simulation")]
struct Cli {
    /// Configuration file path (built-in model constants when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Patient age (years)
    #[arg(long, default_value = "54")]
    age: f64,

    /// Patient weight (kg)
    #[arg(long, default_value = "67.3")]
    weight: f64,

    /// Patient height (cm)
    #[arg(long, default_value = "165")]
    height: f64,

    /// Female patient (male when omitted)
    #[arg(long)]
    female: bool,

    /// ASA physical status III-IV (I-II when omitted)
    #[arg(long)]
    asa34: bool,

    /// Bolus dose at t = 0 (mg)
    #[arg(long)]
    bolus: Option<f64>,

    /// Continuous infusion from t = 0 (mg/kg/h)
    #[arg(long)]
    infusion: Option<f64>,

    /// Relative tolerance override
    #[arg(long)]
    rtol: Option<f64>,

    /// Absolute tolerance override
    #[arg(long)]
    atol: Option<f64>,

    /// Simulated duration override (min)
    #[arg(long)]
    duration: Option<f64>,

    /// Output tick override (min)
    #[arg(long)]
    tick: Option<f64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), SimError> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::from_file(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::default(),
    };
    if let Some(rtol) = cli.rtol {
        config.integration.rtol = rtol;
    }
    if let Some(atol) = cli.atol {
        config.integration.atol = atol;
    }
    if let Some(duration) = cli.duration {
        config.simulation.duration_min = duration;
    }
    if let Some(tick) = cli.tick {
        config.simulation.tick_min = tick;
    }
    config.validate()?;

    let covariates = PatientCovariates {
        age_yr: cli.age,
        weight_kg: cli.weight,
        height_cm: cli.height,
        sex: if cli.female { Sex::Female } else { Sex::Male },
        asa: if cli.asa34 {
            AsaClass::Class3Or4
        } else {
            AsaClass::Class1Or2
        },
    };

    let mut events = Vec::new();
    if let Some(amount_mg) = cli.bolus {
        events.push(DoseEvent {
            time_min: 0.0,
            kind: DoseKind::Bolus { amount_mg },
        });
    }
    if let Some(mg_per_kg_per_h) = cli.infusion {
        events.push(DoseEvent {
            time_min: 0.0,
            kind: DoseKind::InfusionStart {
                rate_mg_per_min: mg_per_kg_per_h * cli.weight / 60.0,
            },
        });
    }
    let schedule = DoseSchedule::new(events)?;

    info!(
        "Starting simulation: {:.0} min at {:.2} min ticks, {} dose event(s)",
        config.simulation.duration_min,
        config.simulation.tick_min,
        schedule.events().len()
    );

    let mut run = SimulationRun::new(config, &covariates, schedule)?;
    let result = run.run()?;
    info!(
        "Simulation completed: {} snapshots, {} accepted steps ({} rejected)",
        result.snapshots.len(),
        result.diagnostics.accepted_steps,
        result.diagnostics.rejected_steps
    );

    // Create output directory if it doesn't exist
    std::fs::create_dir_all(&cli.output)?;

    // Save results
    crate::output::save_results(&result, &cli.output)?;
    info!("Results saved to {:?}", cli.output);

    Ok(())
}
