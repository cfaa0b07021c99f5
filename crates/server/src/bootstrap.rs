use noticeboard_core::config::{AppConfig, ConfigError};
use noticeboard_db::{connect_with_settings, migrations, DbPool};
use noticeboard_service::{outbox_relay, DispatchError, OutboxRelay, Services};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub services: Services,
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

impl Application {
    pub fn relay(&self) -> Result<OutboxRelay, DispatchError> {
        outbox_relay(&self.db_pool, &self.config)
    }
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

    let services = Services::from_pool(&db_pool, &config);
    info!(
        event_name = "system.bootstrap.services_ready",
        correlation_id = "bootstrap",
        directory_enforced = config.directory.enforce,
        dispatch_enabled = config.dispatch.enabled,
        gate_webhook = config.dispatch.gate_webhook_url.is_some(),
        "approval services wired"
    );

    Ok(Application { config, db_pool, services })
}

#[cfg(test)]
mod tests {
    use noticeboard_core::config::AppConfig;

    use crate::bootstrap::{bootstrap_with_config, BootstrapError};

    fn in_memory_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:".to_string();
        config.database.max_connections = 1;
        config
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_services() {
        let app = bootstrap_with_config(in_memory_config()).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('approval_record', 'approval_step', 'approval_outbox')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("query schema");
        assert_eq!(table_count, 3);

        let report = app.relay().expect("relay").run_once().await.expect("idle relay");
        assert!(report.is_idle());

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_when_database_cannot_be_opened() {
        let mut config = in_memory_config();
        config.database.url = "sqlite:///nonexistent-noticeboard-dir/nested/approvals.db".to_string();
        config.database.timeout_secs = 1;

        let result = bootstrap_with_config(config).await;

        assert!(matches!(result, Err(BootstrapError::DatabaseConnect(_))));
    }
}
