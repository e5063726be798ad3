//! ---
//! hcu_section: "01-core-functionality"
//! hcu_subsection: "binary"
//! hcu_type: "source"
//! hcu_scope: "code"
//! hcu_description: "Binary entrypoint for the R-HCU daemon."
//! hcu_version: "v0.0.0-prealpha"
//! hcu_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use r_hcu_common::config::AppConfig;
use r_hcu_common::logging::init_tracing;
use r_hcu_common::StartMode;
use r_hcu_core::{Robot, READY};
use r_hcu_sim::catalog;
use tokio::signal;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about = "R-HCU daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Override the start mode of every robot")]
    start_mode: Option<CliStartMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliStartMode {
    Manual,
    Auto,
}

impl From<CliStartMode> for StartMode {
    fn from(value: CliStartMode) -> Self {
        match value {
            CliStartMode::Manual => StartMode::Manual,
            CliStartMode::Auto => StartMode::Auto,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Assemble and run every configured robot")]
    Run,
    #[command(about = "Print the serialized form of every configured robot and exit")]
    Inspect,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/example.prod.toml"));
    candidates.push(PathBuf::from("configs/example.dev.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(mode) = cli.start_mode {
        for robot in &mut config.robots {
            robot.start = mode.into();
        }
    }
    init_tracing("r-hcud", &config.logging)?;
    info!(config_path = %loaded.source.display(), robots = config.robots.len(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await,
        Commands::Inspect => inspect(config),
    }
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let mut robots = Vec::new();
    for decl in &config.robots {
        let auto = decl.start.is_auto();
        let robot = Robot::spawn(catalog::materialize(decl)?)?;
        robot.on(READY, |event| {
            info!(robot = %event.payload["name"], "robot reported ready");
        });
        if !auto {
            robot.start().await?;
        }
        robots.push(robot);
    }

    info!(robots = robots.len(), "daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    for robot in &robots {
        robot.halt().await?;
    }
    Ok(())
}

fn inspect(config: AppConfig) -> Result<()> {
    for decl in &config.robots {
        let robot = Robot::new(catalog::materialize(decl)?)?;
        println!("{}", robot);
        println!("{}", serde_json::to_string_pretty(&robot.to_json())?);
    }
    Ok(())
}
