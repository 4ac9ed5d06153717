use std::sync::Arc;

use ravenrock_core::config::{AppConfig, ConfigError, LoadOptions};
use ravenrock_core::selection::RecommendationService;
use ravenrock_db::repositories::{SqlProductCatalog, SqlShopSettingsRepository};
use ravenrock_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<RecommendationService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let service = recommendation_service(&db_pool, &config);
    Ok(Application { config, db_pool, service })
}

/// Wires the SQLite stores into one service; settings and usage share a repository.
pub fn recommendation_service(pool: &DbPool, config: &AppConfig) -> Arc<RecommendationService> {
    let settings = Arc::new(SqlShopSettingsRepository::new(pool.clone()));
    Arc::new(RecommendationService::new(
        settings.clone(),
        settings,
        Arc::new(SqlProductCatalog::new(pool.clone())),
        config.selection.policy(),
        config.widget.defaults(),
    ))
}
