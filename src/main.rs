use clap::{Parser, Subcommand};

use camber::adapt::MeshAdaptationController;
use camber::bridge::OptimizationBridge;
use camber::config;
use camber::engine::FlowEngine;
use camber::error::CamberError;
use camber::external::ExternalEngine;

#[derive(Parser)]
#[command(name = "camber")]
#[command(about = "Shape optimization bridge and adjoint mesh adaptation for an external flow engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one optimizer evaluation: read the independent-variable file,
    /// solve, and write function values (and gradients) back
    Evaluate {
        /// Path to the run-settings json file
        #[arg(long)]
        config: String,

        /// Override the gradient flag from the settings file
        #[arg(long)]
        gradients: Option<bool>,
    },
    /// Run an adjoint-driven mesh adaptation campaign
    Adapt {
        /// Path to the run-settings json file
        #[arg(long)]
        config: String,

        /// Override the level count from the settings file
        #[arg(long)]
        levels: Option<u32>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Evaluate { config, gradients } => evaluate(&config, gradients),
        Commands::Adapt { config, levels } => adapt(&config, levels),
    };

    if let Err(err) = result {
        eprintln!("error: {}", err);
        std::process::exit(1)
    }
}

fn evaluate(config_path: &str, gradients_override: Option<bool>) -> Result<(), CamberError> {
    let settings = config::load_run_settings(config_path)?;
    let include_gradients = gradients_override.unwrap_or(settings.gradients);

    let engine = ExternalEngine::from_settings(&settings);
    let mut bridge = OptimizationBridge::new(
        engine,
        settings.variable_columns.clone(),
        settings.function_columns.clone(),
    );

    bridge.read_independent_variables(&settings.independent_variables)?;

    if include_gradients {
        settings.adjoint.run(bridge.engine_mut())?;
    } else {
        bridge.engine_mut().restart_primal(settings.primal_steps)?;
    }
    bridge.engine_mut().save_state("Evaluated")?;

    bridge.write_dependent_variables(&settings.dependent_variables, include_gradients)?;

    Ok(())
}

fn adapt(config_path: &str, levels_override: Option<u32>) -> Result<(), CamberError> {
    let settings = config::load_run_settings(config_path)?;
    let levels = levels_override.unwrap_or(settings.adaptation_levels);

    let engine = ExternalEngine::from_settings(&settings);
    let mut controller = MeshAdaptationController::new(
        engine,
        settings.adaptation.clone(),
        settings.adjoint,
        settings.primal_steps,
    );

    controller.run(levels)
}
