//! Synthetic Events CLI
//!
//! Loads a YAML configuration, wires file-backed collaborators under an
//! output directory and runs the driver until the configured end.
//!
//! # Example
//!
//! ```bash
//! synthetic-events --config sim.yaml --output out/
//!
//! # Resume the same run later (the checkpoint under out/state is picked up)
//! synthetic-events --config sim.yaml --output out/ --max-ticks 24
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use synthetic_events_core_rs::catalog::ReferenceCatalog;
use synthetic_events_core_rs::nudge::NoNudges;
use synthetic_events_core_rs::persistence::JsonFileStore;
use synthetic_events_core_rs::sink::{FileSpool, JsonLinesSink};
use synthetic_events_core_rs::{Collaborators, Driver, ErrorClass, SimulationConfig, StopHandle, SystemClock};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Synthetic event generator
///
/// Single-threaded and reproducible: the same seed and configuration
/// produce the same event streams.
#[derive(Parser, Debug)]
#[command(name = "synthetic-events")]
#[command(version, about, long_about = None)]
struct Args {
    /// YAML simulation configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Directory for events, checkpoints and the fallback spool
    #[arg(short, long, default_value = "out")]
    output: PathBuf,

    /// Override the configured seed
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many ticks (the run can be resumed)
    #[arg(long)]
    max_ticks: Option<u64>,
}

fn exit_code(class: ErrorClass) -> i32 {
    match class {
        ErrorClass::Integrity => 3,
        ErrorClass::Configuration => 2,
        ErrorClass::External => 4,
    }
}

/// Stop the driver between ticks on Ctrl+C or SIGTERM.
fn spawn_signal_handler(stop: StopHandle) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(error = %err, "Could not start signal handler");
                return;
            }
        };

        runtime.block_on(async move {
            let ctrl_c = async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = %err, "Failed to install Ctrl+C handler");
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(err) => {
                        warn!(error = %err, "Failed to install SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => info!("Received Ctrl+C"),
                _ = terminate => info!("Received SIGTERM"),
            }
            info!("Stopping after the current tick");
            stop.stop();
        });
    });
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,synthetic_events_core_rs=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = SimulationConfig::from_path(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(seed) = args.seed {
        config.global.seed = seed;
    }

    info!(
        config = %args.config.display(),
        output = %args.output.display(),
        seed = config.global.seed,
        start = %config.global.start_ts,
        "Starting simulation"
    );

    let catalog = ReferenceCatalog::from_config(&config);
    let collaborators = Collaborators {
        store: Box::new(JsonFileStore::new(args.output.join("state"))),
        sinks: vec![Box::new(JsonLinesSink::new(args.output.join("events")))],
        spool: Box::new(FileSpool::new(args.output.join("spool"))),
        catalog: Box::new(catalog),
        nudges: Box::new(NoNudges),
        clock: Box::new(SystemClock),
    };

    let mut driver = match Driver::new(config, collaborators) {
        Ok(driver) => driver,
        Err(err) => {
            error!(error = %err, "Could not start simulation");
            std::process::exit(exit_code(err.class()));
        }
    };

    info!(
        clock = %driver.current_ts(),
        behind_real_time_secs = driver.lag().num_seconds(),
        active = driver.state().active_count(),
        "Driver ready"
    );

    spawn_signal_handler(driver.stop_handle());
    let outcome = driver.run_for(args.max_ticks).map(|summary| summary.ticks);

    match outcome {
        Ok(ticks) => {
            info!(ticks, clock = %driver.current_ts(), "Simulation finished");
            Ok(())
        }
        Err(err) => {
            error!(class = ?err.class(), error = %err, "Simulation failed");
            std::process::exit(exit_code(err.class()));
        }
    }
}
