//! SDP Pipeline - command line entry point

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use sdp_common::config::EnvSource;
use sdp_common::logging::{init_logging, LogConfig, LogLevel};
use sdp_pipeline::config::PipelineConfig;
use sdp_pipeline::graph::{RunReport, UnitOutcome, UnitReport};
use sdp_pipeline::units;

#[derive(Parser, Debug)]
#[command(name = "sdp-pipeline")]
#[command(author, version, about = "Scheduled sales ETL pipeline")]
struct Cli {
    /// Load configuration from this .env file instead of ./.env
    #[arg(long, global = true, env = "SDP_ENV_FILE")]
    env_file: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the whole graph once
    Run,

    /// Run a single unit without its dependencies
    Unit {
        /// Unit id (extract_postgresql_data, extract_api_data, extract_parquet_data, transform_data)
        id: String,
    },

    /// Run on the configured schedule until interrupted
    Schedule,

    /// Print the resolved configuration (secrets redacted)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let source = EnvSource::load(cli.env_file.as_deref())?;

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("sdp-pipeline")
        .filter_directives("sqlx=warn,reqwest=info,hyper=info")
        .build()
        .with_overrides(&source)?;
    let _log_guard = init_logging(&log_config)?;

    let config = PipelineConfig::from_source(&source)?;
    info!(
        source = %config.source_db.display_name(),
        target = %config.target_db.display_name(),
        schedule = %config.schedule.expression,
        "Configuration loaded"
    );

    match cli.command {
        Command::Run => {
            let graph = units::build_graph(&config)?;
            let report = graph.run_once().await;
            print_report(&report);
            if !report.is_success() {
                bail!(
                    "run {} finished with {} failed and {} skipped units",
                    report.run_id,
                    report.count("failed"),
                    report.count("skipped")
                );
            }
        },
        Command::Unit { id } => {
            let graph = units::build_graph(&config)?;
            let unit = graph.run_unit(&id).await?;
            print_unit(&unit);
            if !unit.outcome.is_success() {
                bail!("unit {} did not succeed", unit.id);
            }
        },
        Command::Schedule => {
            let graph = units::build_graph(&config)?;
            let Some(trigger) = graph.trigger().cloned() else {
                bail!("no trigger configured");
            };

            let cancel = CancellationToken::new();
            tokio::spawn(shutdown_signal(cancel.clone()));

            let graph = &graph;
            trigger
                .run(Utc::now(), cancel, move |fire_time| async move {
                    let report = graph.run_once().await;
                    if report.is_success() {
                        info!(%fire_time, run_id = %report.run_id, "Scheduled run succeeded");
                    } else {
                        error!(
                            %fire_time,
                            run_id = %report.run_id,
                            failed = report.count("failed"),
                            skipped = report.count("skipped"),
                            "Scheduled run did not complete"
                        );
                    }
                })
                .await;

            info!("Scheduler stopped");
        },
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        },
    }

    Ok(())
}

fn print_unit(unit: &UnitReport) {
    match &unit.outcome {
        UnitOutcome::Succeeded { attempts, stats } => println!(
            "  {:<24} succeeded  attempts={} extracted={} loaded={}",
            unit.id, attempts, stats.rows_extracted, stats.rows_loaded
        ),
        UnitOutcome::Failed { attempts, kind, error } => println!(
            "  {:<24} failed     attempts={} kind={} error={}",
            unit.id, attempts, kind, error
        ),
        UnitOutcome::Skipped { blocked_by } => {
            println!("  {:<24} skipped    blocked_by={}", unit.id, blocked_by)
        },
    }
}

fn print_report(report: &RunReport) {
    println!("Run {}", report.run_id);
    for unit in &report.units {
        print_unit(unit);
    }
    let total = report.total_stats();
    println!(
        "Total: {} rows extracted, {} rows loaded in {:.1}s",
        total.rows_extracted,
        total.rows_loaded,
        (report.completed_at - report.started_at).num_milliseconds() as f64 / 1000.0
    );
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping scheduler");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping scheduler");
        },
    }

    token.cancel();
}
