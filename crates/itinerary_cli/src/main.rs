//! Maintenance entry point for itinerary databases.
//!
//! # Responsibility
//! - Report groups whose day or item ordinals are not dense.
//! - Renumber such groups through the position manager.

use clap::{Parser, Subcommand};
use itinerary_core::db::schema_version;
use itinerary_core::position::audit::{audit_all, repair_all};
use itinerary_core::{
    core_version, init_logging_from_config, open_db_with_config, ConcurrencyGuard, CoreConfig,
    PositionManager,
};
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "itinerary", version, about = "Itinerary ordinal maintenance", long_about = None)]
struct Cli {
    /// JSON config file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the core version
    Version,
    /// List day and item groups whose ordinals are not 1..N
    Audit {
        #[arg(long)]
        db: PathBuf,
        /// Print violations as JSON
        #[arg(long)]
        json: bool,
    },
    /// Renumber every non-dense group
    Normalize {
        #[arg(long)]
        db: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => CoreConfig::load(path)?,
        None => CoreConfig::default(),
    };
    init_logging_from_config(&config.logging)?;

    match cli.command {
        Commands::Version => {
            println!("itinerary_core version={}", core_version());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Audit { db, json } => {
            let conn = open_db_with_config(&db, &config.db)?;
            let violations = audit_all(&conn)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&violations)?);
            } else {
                for violation in &violations {
                    println!(
                        "{} group={} ordinals={:?} {}",
                        violation.collection, violation.group, violation.ordinals, violation.detail
                    );
                }
                println!(
                    "schema_version={} violations={}",
                    schema_version(&conn)?,
                    violations.len()
                );
            }
            Ok(if violations.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
        Commands::Normalize { db } => {
            let conn = open_db_with_config(&db, &config.db)?;
            let manager = PositionManager::new(
                &conn,
                ConcurrencyGuard::from_config(&config.positions),
                config.positions.clone(),
            );
            let report = repair_all(&manager)?;
            info!(
                "event=cli_normalize module=cli status=ok groups={} rows={}",
                report.repaired.len(),
                report.rewritten_rows
            );
            println!(
                "repaired_groups={} rewritten_rows={}",
                report.repaired.len(),
                report.rewritten_rows
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}
