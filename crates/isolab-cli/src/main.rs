//! isolab command line.
//!
//! Runs the phantom read and write skew scenarios against every configured
//! target and prints what each task observed.
//!
//! # Quick Start
//!
//! ```bash
//! # Targets from the legacy variables
//! PG_URL=postgres://postgres@localhost/postgres isolab --phantom
//!
//! # Both scenarios, deterministic interleaving, one target
//! isolab --phantom --write-skew --lockstep --target PostgreSQL
//!
//! # The configuration the run would use
//! isolab --show-config
//! ```

mod commands;
mod report;
mod style;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use isolab::{IsolationLevel, Scenario};
use isolab_config::ConfigLoader;
use tracing_subscriber::EnvFilter;

/// isolab - reproduce transaction isolation anomalies against SQL stores.
#[derive(Parser)]
#[command(name = "isolab")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Run the phantom read scenario.
    #[arg(long)]
    phantom: bool,

    /// Run the write skew scenario.
    #[arg(long, visible_alias = "write")]
    write_skew: bool,

    /// Directory holding isolab.toml and .env.
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Only run against these targets (repeatable, case-insensitive).
    #[arg(short, long = "target", value_name = "NAME")]
    targets: Vec<String>,

    /// Isolation level for every target (read-committed, repeatable-read, serializable).
    #[arg(long, value_name = "LEVEL")]
    isolation: Option<IsolationLevel>,

    /// Interleave tasks with barriers instead of sleeps.
    #[arg(long)]
    lockstep: bool,

    /// Print the effective configuration and exit.
    #[arg(long)]
    show_config: bool,

    /// Disable colored output.
    #[arg(long)]
    no_color: bool,

    /// More log output on stderr (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn scenarios(&self) -> Vec<Scenario> {
        let mut scenarios = Vec::new();
        if self.phantom {
            scenarios.push(Scenario::PhantomRead);
        }
        if self.write_skew {
            scenarios.push(Scenario::WriteSkew);
        }
        scenarios
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    style::init(cli.no_color);

    let scenarios = cli.scenarios();
    if scenarios.is_empty() && !cli.show_config {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    }

    let mut config = ConfigLoader::new()
        .with_project_dir(&cli.project_dir)
        .load()
        .with_context(|| {
            format!(
                "Failed to load configuration from {}",
                cli.project_dir.display()
            )
        })?;

    if let Some(level) = cli.isolation {
        for target in &mut config.targets {
            target.isolation = Some(level);
        }
    }
    if cli.lockstep {
        config.run.lockstep = true;
    }

    let configured = config.targets.len();
    config.retain_targets(&cli.targets);
    if configured > 0 && config.targets.is_empty() {
        bail!(
            "No configured target matches {}",
            cli.targets.join(", ")
        );
    }

    if cli.show_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    commands::run::run(&config, &scenarios)
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
