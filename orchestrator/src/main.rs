//! Federated Aggregation Orchestrator
//!
//! This binary drives round-based aggregation against a shared artifact
//! store. Providers deposit their update artifacts out-of-band; the
//! orchestrator closes each round's submission window, merges what arrived,
//! and persists the next global state.
//!
//! # Usage
//!
//! ```bash
//! # Install the round-0 baseline produced by the model initializer
//! fed-orchestrator init --store ./storage --from baseline.fed
//!
//! # Aggregate a single round
//! fed-orchestrator aggregate --store ./storage --round 1
//!
//! # Drive rounds on a fixed cadence until interrupted
//! fed-orchestrator serve --store ./storage --round-duration-ms 15000
//! ```
//!
//! Exit codes: 0 on success (stdout distinguishes `merged` from
//! `carried-forward`), 2 on a validation failure (duplicate submission or
//! schema mismatch), 3 when the prior round's state is missing, 1 on any
//! other storage or configuration error.

mod driver;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use driver::RoundDriver;
use fed_core::{
    Aggregator, ArtifactCodec, ArtifactStore, FedConfig, FedError, LocalStore, RoundOutcome,
};

/// Federated Aggregation Orchestrator
#[derive(Parser, Debug)]
#[command(name = "fed-orchestrator")]
#[command(about = "Round-based aggregation orchestrator for federated training")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Close a round's submission window and aggregate it
    Aggregate {
        /// Artifact store base directory
        #[arg(short, long)]
        store: PathBuf,

        /// Provider submissions directory (defaults to <store>/provider-updates)
        #[arg(short, long)]
        updates: Option<PathBuf>,

        /// Round to aggregate
        #[arg(short, long)]
        round: u64,
    },

    /// Install an externally produced model artifact as the round-0 baseline
    Init {
        /// Artifact store base directory
        #[arg(short, long)]
        store: PathBuf,

        /// Baseline artifact produced by the model initializer
        #[arg(short, long)]
        from: PathBuf,
    },

    /// Drive rounds on a fixed cadence until interrupted
    Serve {
        /// Artifact store base directory
        #[arg(short, long)]
        store: PathBuf,

        /// Provider submissions directory (defaults to <store>/provider-updates)
        #[arg(short, long)]
        updates: Option<PathBuf>,

        /// Submission window duration in milliseconds
        #[arg(long)]
        round_duration_ms: Option<u64>,

        /// Delay between window close and aggregation in milliseconds
        #[arg(long)]
        aggregation_delay_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(err: &FedError) -> ExitCode {
    if err.is_validation() {
        ExitCode::from(2)
    } else if matches!(err, FedError::NotFound { .. }) {
        ExitCode::from(3)
    } else {
        ExitCode::FAILURE
    }
}

async fn run(args: Args) -> fed_core::Result<ExitCode> {
    match args.command {
        Command::Aggregate {
            store,
            updates,
            round,
        } => {
            let config = build_config(args.config.as_deref(), store, updates)?;
            let store = Arc::new(LocalStore::new(&config)?);

            // Cut the submission window so the engine sees a stable snapshot.
            store.close_round(round)?;

            let report = Aggregator::new(store).aggregate(round)?;
            match report.outcome {
                RoundOutcome::Merged => {
                    tracing::info!(round, providers = report.providers.len(), "round merged");
                    println!(
                        "merged round={} providers={}",
                        report.round,
                        report.providers.len()
                    );
                }
                RoundOutcome::CarriedForward => {
                    tracing::warn!(round, "no submissions; carried forward previous state");
                    println!("carried-forward round={}", report.round);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Init { store, from } => {
            let config = build_config(args.config.as_deref(), store, None)?;

            let bytes = std::fs::read(&from).map_err(|e| {
                FedError::storage_with_source(&from, "failed to read baseline artifact", e)
            })?;
            let state = ArtifactCodec::new(&config.artifact).decode(&bytes)?;

            let store = LocalStore::new(&config)?;
            store.save_global_state(0, &state)?;

            tracing::info!(parameters = state.len(), "baseline installed as round 0");
            println!("initialized round=0 parameters={}", state.len());
            Ok(ExitCode::SUCCESS)
        }

        Command::Serve {
            store,
            updates,
            round_duration_ms,
            aggregation_delay_ms,
        } => {
            let mut config = build_config(args.config.as_deref(), store, updates)?;
            if let Some(ms) = round_duration_ms {
                config.round.round_duration_ms = ms;
            }
            if let Some(ms) = aggregation_delay_ms {
                config.round.aggregation_delay_ms = ms;
            }
            config.validate()?;

            let store: Arc<dyn ArtifactStore> = Arc::new(LocalStore::new(&config)?);
            let driver = RoundDriver::new(store, &config.round);

            tracing::info!("Starting round driver");
            tracing::info!("  Round duration: {}ms", config.round.round_duration_ms);
            tracing::info!(
                "  Aggregation delay: {}ms",
                config.round.aggregation_delay_ms
            );

            tokio::select! {
                result = driver.run() => result.map(|()| ExitCode::SUCCESS),
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down round driver...");
                    Ok(ExitCode::SUCCESS)
                }
            }
        }
    }
}

fn build_config(
    config_path: Option<&Path>,
    store: PathBuf,
    updates: Option<PathBuf>,
) -> fed_core::Result<FedConfig> {
    let mut config = match config_path {
        Some(path) => FedConfig::from_file(path)?,
        None => FedConfig::default(),
    }
    .with_env_overrides();

    config.store.base_path = store;
    if let Some(updates) = updates {
        config.store.updates_dir = updates;
    }
    config.validate()?;
    Ok(config)
}
