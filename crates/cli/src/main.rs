//! CLI for the municipal dropout forecasting service.

mod api;

use api::AppState;
use clap::{Parser, Subcommand};
use dropout_db::DbPool;
use dropout_forecasting::{ModelConfig, ProphetTrainer, SeasonalityMode};
use dropout_ingestion::{Pipeline, PipelineConfig};
use dropout_telemetry::{audit, init_logging, Metrics, TelemetryObserver};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dropout-forecast")]
#[command(about = "Forecast municipal school dropout rates and serve the results")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the dataset, forecast every municipality and store the results
    Process {
        /// Dropout dataset: Excel workbook, or CSV (`,` or `;` separated)
        #[arg(long, default_value = "base_sp_abandono.xlsx")]
        data_path: PathBuf,

        /// Database path
        #[arg(long, default_value = "dropout.db")]
        database_path: String,

        /// State whose municipalities are forecast
        #[arg(long, default_value = "SP")]
        jurisdiction: String,

        /// First year held out from training
        #[arg(long, default_value = "2024")]
        cutoff_year: i64,

        /// Years forecast after the cutoff year
        #[arg(long, default_value = "2")]
        horizon_years: u32,

        /// Municipalities with fewer training years are skipped
        #[arg(long, default_value = "3")]
        min_training_points: usize,

        /// Use the last training value when the cutoff year is missing
        #[arg(long, default_value = "false")]
        impute_missing_validation: bool,

        /// Also store the forecast for the cutoff year
        #[arg(long, default_value = "false")]
        persist_validation_forecast: bool,

        /// Seasonality mode: additive or multiplicative
        #[arg(long, default_value = "multiplicative")]
        seasonality_mode: String,

        /// Confidence interval coverage, in (0, 1)
        #[arg(long, default_value = "0.8")]
        interval_width: f64,

        /// Log level
        #[arg(long)]
        log_level: Option<String>,

        /// JSON log file
        #[arg(long, default_value = "dropout_processing.log")]
        log_file: PathBuf,

        /// Append the run report (JSON line) to this file
        #[arg(long)]
        report_path: Option<PathBuf>,
    },
    /// Serve the stored data as a JSON API
    Serve {
        /// Database path
        #[arg(long, default_value = "dropout.db")]
        database_path: String,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind_address: String,

        /// Cutoff year the stored forecasts were produced with
        #[arg(long, default_value = "2024")]
        cutoff_year: i64,

        /// Log level
        #[arg(long)]
        log_level: Option<String>,
    },
}

/// Settings of the `serve` command.
struct ServeConfig {
    database_path: String,
    bind_address: String,
    cutoff_year: i64,
}

// The log guard scopes the subscriber to this thread, so everything runs on
// the current-thread runtime.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            data_path,
            database_path,
            jurisdiction,
            cutoff_year,
            horizon_years,
            min_training_points,
            impute_missing_validation,
            persist_validation_forecast,
            seasonality_mode,
            interval_width,
            log_level,
            log_file,
            report_path,
        } => {
            let _log_guard = init_logging(log_level.as_deref(), Some(&log_file))?;
            let config = PipelineConfig {
                jurisdiction,
                cutoff_year,
                horizon_years,
                min_training_points,
                impute_missing_validation,
                persist_validation_forecast,
            };
            let model_config = ModelConfig {
                seasonality_mode: seasonality_mode.parse::<SeasonalityMode>()?,
                interval_width,
                ..ModelConfig::default()
            };
            run_process(&data_path, &database_path, config, model_config, report_path).await?;
        }
        Commands::Serve {
            database_path,
            bind_address,
            cutoff_year,
            log_level,
        } => {
            let _log_guard = init_logging(log_level.as_deref(), None)?;
            run_serve(ServeConfig {
                database_path,
                bind_address,
                cutoff_year,
            })
            .await?;
        }
    }

    Ok(())
}

async fn run_process(
    data_path: &Path,
    db_path: &str,
    config: PipelineConfig,
    model_config: ModelConfig,
    report_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("Starting dropout forecasting run on {}", data_path.display());

    let db = DbPool::new(db_path).await?;
    db.migrate().await?;

    let trainer = ProphetTrainer::new(model_config);
    let observer = TelemetryObserver::new(Metrics::new()?);
    let pipeline = Pipeline::new(&db, &trainer, &observer, config);

    let summary = pipeline.run_path(data_path).await?;
    info!(
        "Processing finished: {} processed, {} skipped, {} failed",
        summary.processed, summary.skipped, summary.failed
    );
    if summary.failed > 0 {
        warn!("{} municipalities failed; see the log for details", summary.failed);
    }

    if let Some(path) = report_path {
        audit::append_report(&path, &summary)?;
    }

    Ok(())
}

async fn run_serve(config: ServeConfig) -> anyhow::Result<()> {
    let db = DbPool::new(&config.database_path).await?;
    db.migrate().await?;

    let state = AppState {
        db,
        metrics: Metrics::new()?,
        cutoff_year: config.cutoff_year,
    };
    api::serve(&config.bind_address, state).await
}
