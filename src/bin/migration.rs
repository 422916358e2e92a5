use tracing::{error, info};

use daylove_api::config;

/// Applies pending schema migrations against the configured database.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    info!("Starting database migration");

    if let Err(e) = daylove_api::migrator::run_migration(cfg.database_url()).await {
        error!("Migration failed: {}", e);
        return Err(e);
    }

    info!("Migration completed successfully");
    Ok(())
}
