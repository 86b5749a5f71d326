//! Recurring Escrow CLI
//!
//! Drives the agreement manager against the in-memory collector and escrow.
//!
//! Usage:
//!   recurring-escrow demo thaw-withdraw
//!   recurring-escrow run scenarios/update_lifecycle.json --json
//!   recurring-escrow config

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use recurring_escrow_harness::{Scenario, ScenarioReport, ScenarioRunner, TestEnv};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod demo;
mod output;

use config::{CliConfig, LoggingConfig};
use demo::Demo;

/// Recurring Escrow - agreement escrow accounting simulator
#[derive(Parser, Debug)]
#[command(name = "recurring-escrow")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "RECURRING_ESCROW_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RECURRING_ESCROW_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "RECURRING_ESCROW_LOG_FORMAT")]
    log_format: Option<String>,

    /// Print the report as JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one of the built-in scenarios
    Demo {
        #[arg(value_enum)]
        name: Demo,
    },

    /// Run a scenario script
    Run {
        /// Path to the scenario JSON file
        script: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut cli_config = CliConfig::load(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        cli_config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        cli_config.logging.format = format;
    }

    init_logging(&cli_config.logging)?;

    match args.command {
        Commands::Demo { name } => {
            let scenario = demo_scenario(name)?;
            let report = run(&scenario, &cli_config)?;
            print(&report, args.json)?;
        }
        Commands::Run { script } => {
            let json = std::fs::read_to_string(&script)
                .with_context(|| format!("failed to read {}", script.display()))?;
            let scenario = Scenario::from_json(&json)
                .with_context(|| format!("failed to parse {}", script.display()))?;
            let report = run(&scenario, &cli_config)?;
            print(&report, args.json)?;
            if !args.json {
                println!("{}", "Final snapshot".bright_white().bold());
                println!("{}", "─".repeat(60));
                println!("{}", serde_json::to_string_pretty(&report.snapshot)?);
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&cli_config)?);
        }
    }

    Ok(())
}

fn demo_scenario(demo: Demo) -> anyhow::Result<Scenario> {
    demo.scenario()
        .with_context(|| format!("built-in scenario {:?} is malformed", demo))
}

fn run(scenario: &Scenario, cli_config: &CliConfig) -> anyhow::Result<ScenarioReport> {
    let sim = scenario.sim.unwrap_or(cli_config.escrow);
    let env = TestEnv::with_config(cli_config.manager.clone(), sim)?;

    info!(
        payer = %cli_config.manager.payer,
        thaw_period_secs = sim.thaw_period_secs,
        start_timestamp = sim.start_timestamp,
        "Simulated escrow ready"
    );

    let report = ScenarioRunner::new(env).run(scenario)?;
    Ok(report)
}

fn print(report: &ScenarioReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        output::print_report(report);
    }
    Ok(())
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    // Logs go to stderr so reports on stdout stay machine-readable
    match config.format.as_str() {
        "json" => {
            subscriber
                .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            subscriber
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
