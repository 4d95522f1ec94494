use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use arbor::{Config, Database, LocalObjectStore, TreeOptions, TreeService};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = arbor::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        arbor::logging::init_console_only(&config.logging.level);
    }

    info!("Arbor - hierarchical file-system layer");

    if let Err(e) = run(config).await {
        error!("Fatal: {e}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> arbor::Result<()> {
    config.validate()?;

    let db = Database::open_with_max_connections(
        &config.database.path,
        config.database.max_connections,
    )
    .await?;
    info!(path = %config.database.path, version = db.schema_version().await?, "database ready");

    let store = LocalObjectStore::from_config(&config.storage).await?;
    info!(path = %store.base_path().display(), "object store ready");

    let service = TreeService::new(&db, &store).with_options(TreeOptions::from(&config));
    let mut interval =
        tokio::time::interval(Duration::from_secs(config.expiry.reaper_interval_secs.max(1)));

    info!(
        interval_secs = config.expiry.reaper_interval_secs,
        "expiry reaper started"
    );
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match service.purge_expired(Utc::now()).await {
                    Ok(outcome) if outcome.is_partial() => {
                        error!(failed = ?outcome.failed_keys, "reaper left objects behind");
                    }
                    Ok(_) => {}
                    Err(e) => error!("reaper run failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    db.close().await;
    Ok(())
}
