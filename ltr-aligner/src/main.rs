//! ltr-aligner - Batch Alignment Orchestrator
//!
//! Splits a parallel document pair into batches, aligns them on a worker
//! pool through the configured bridge program, and commits the results into
//! the per-job alignment store. Default port: 5730.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ltr_aligner::config::{AlignerSettings, StoragePaths};
use ltr_aligner::services::{BatchProcessor, Collaborators, LingtrainBridge};
use ltr_aligner::AppState;
use ltr_common::config::{
    default_config_path, load_toml_config_or_default, RootFolderInitializer, RootFolderResolver,
};
use ltr_common::events::EventBus;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "ltr-aligner", version, about = "Batch alignment orchestrator")]
struct Args {
    /// Root folder holding the service database and alignment stores
    #[arg(long, env = "LTR_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Listen address
    #[arg(long, default_value = "127.0.0.1:5730")]
    bind: String,

    /// TOML config file (defaults to the platform location)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);
    let toml_config = load_toml_config_or_default(config_path.as_deref());

    // RUST_LOG wins over the config file
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&toml_config.logging.level));
    match &toml_config.logging.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    info!("Starting ltr-aligner (Batch Alignment Orchestrator)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve root folder
    let resolver = RootFolderResolver::new("ltr-aligner")
        .with_cli_arg(args.root_folder)
        .with_config_path(config_path);
    let root_folder = resolver.resolve();

    // Step 2: Create root folder directory if missing
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;
    info!("Root folder: {}", initializer.root_folder().display());

    // Step 3: Open or create the service database
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = ltr_aligner::db::init_database_pool(&db_path).await?;

    // Step 4: Aligner settings (env > TOML > defaults)
    let settings = AlignerSettings::resolve(&toml_config)?;
    info!(
        processors = settings.processors,
        batch_size = settings.batch_size,
        max_batches = settings.max_batches,
        model = %settings.model_name,
        bridge = %settings.bridge_program,
        "Aligner settings loaded"
    );

    let bridge = Arc::new(LingtrainBridge::new(settings.bridge_program.clone()));
    let collaborators = Collaborators::from_single(bridge);

    let event_bus = EventBus::new(100);
    let processor = BatchProcessor::new(
        db_pool.clone(),
        settings,
        StoragePaths::new(initializer.root_folder()),
        collaborators,
        event_bus.clone(),
    );

    let state = AppState::new(db_pool, event_bus, processor);
    let app = ltr_aligner::build_router(state);

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    info!("Listening on http://{}", args.bind);
    info!("Health check: http://{}/health", args.bind);

    axum::serve(listener, app).await?;

    Ok(())
}
