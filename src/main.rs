use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tipline::api::{create_router, AppState};
use tipline::config::AppConfig;
use tipline::error::Result;
use tipline::scheduler::{JobContext, Scheduler};
use tipline::storage::MemoryStore;
use tipline::supervisor::ErrorReporter;
use tipline::TiplineError;

/// Footy tipping pipeline CLI
#[derive(Parser, Debug)]
#[command(name = "tipline")]
#[command(author, version, about = "Scheduled tipping data pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scheduler and query API
    Serve,
    /// Sync fixtures for the current season
    Fixtures {
        /// Refresh the whole season instead of just the current round
        #[arg(long)]
        full: bool,
    },
    /// Backfill match results and prediction correctness
    Results,
    /// Request predictions for the current round
    Predict,
    /// Submit the current round's tips to every competition
    Submit,
    /// Request predictions and submit tips in one pass
    Tip,
    /// Print cumulative season metrics as JSON
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging();

    let config = AppConfig::load()?;
    if let Err(problems) = config.validate() {
        for problem in &problems {
            error!("config: {problem}");
        }
        return Err(TiplineError::Validation(format!(
            "invalid configuration ({} problems)",
            problems.len()
        )));
    }

    let store = Arc::new(MemoryStore::new());
    let reporter = ErrorReporter::from_config(config.error_webhook_url.as_deref())
        .or_else(ErrorReporter::from_env);
    let context = Arc::new(JobContext::new(store.clone(), config.clone(), reporter));

    match cli.command {
        Commands::Serve => {
            let api_port = config.api_port.unwrap_or(8080);
            let state = AppState::new(store, config.metrics.margin_model_bits);
            let router = create_router(state);

            let listener =
                tokio::net::TcpListener::bind(("0.0.0.0", api_port)).await?;
            info!(port = api_port, "query API listening");

            let scheduler = Scheduler::new(context);

            tokio::select! {
                _ = scheduler.run() => {}
                result = axum::serve(listener, router) => {
                    if let Err(e) = result {
                        error!("API server failed: {e}");
                    }
                }
                _ = shutdown_signal() => {
                    info!("shutting down");
                }
            }
        }
        Commands::Fixtures { full } => {
            let report = context.fixture_sync(full).await?;
            info!(
                upserted = report.matches_upserted,
                skipped = report.rows_skipped,
                "fixtures synced"
            );
        }
        Commands::Results => {
            let report = context.result_sync().await?;
            info!(
                set = report.results_set,
                conflicts = report.conflicts,
                "results synced"
            );
        }
        Commands::Predict => {
            context
                .request_predictions(&config.schedule.prediction_models)
                .await?;
        }
        Commands::Submit => {
            context.submit_tips().await?;
        }
        Commands::Tip => {
            context.tip(&config.schedule.prediction_models).await?;
        }
        Commands::Metrics => {
            let metrics = context.season_metrics().await?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tipline=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
