//! `GET /health`: liveness plus readiness of the approval store.
//!
//! The service is `ready` only when the database answers and every embedded
//! migration has been applied. The outbox backlog is reported but never
//! degrades readiness.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use noticeboard_db::repositories::{OutboxRepository, SqlOutboxRepository};
use noticeboard_db::{connection, migrations, DbPool};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

impl HealthCheck {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: "ready", detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: "degraded", detail: detail.into() }
    }

    fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub schema: HealthCheck,
    pub outbox: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match connection::ping(&state.db_pool).await {
        Ok(()) => HealthCheck::ready("approval store reachable"),
        Err(error) => HealthCheck::degraded(format!("approval store unreachable: {error}")),
    };
    let (schema, outbox) = if database.is_ready() {
        (schema_check(&state.db_pool).await, outbox_check(&state.db_pool).await)
    } else {
        (HealthCheck::degraded("skipped"), HealthCheck::degraded("skipped"))
    };

    let ready = database.is_ready() && schema.is_ready();
    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        schema,
        outbox,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn schema_check(pool: &DbPool) -> HealthCheck {
    match migrations::pending_versions(pool).await {
        Ok(pending) if pending.is_empty() => HealthCheck::ready("all migrations applied"),
        Ok(pending) => HealthCheck::degraded(format!("pending migrations: {pending:?}")),
        Err(error) => HealthCheck::degraded(format!("migration state unreadable: {error}")),
    }
}

async fn outbox_check(pool: &DbPool) -> HealthCheck {
    match SqlOutboxRepository::new(pool.clone()).count_undelivered().await {
        Ok(backlog) => HealthCheck::ready(format!("{backlog} undelivered event(s)")),
        Err(error) => HealthCheck::degraded(format!("outbox unreadable: {error}")),
    }
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use noticeboard_db::{connect_with_settings, migrations};

    use crate::health::{health, HealthState};

    #[tokio::test]
    async fn health_is_ready_once_migrations_are_applied() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.schema.detail, "all migrations applied");
        assert_eq!(payload.outbox.detail, "0 undelivered event(s)");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_is_degraded_before_migrations_run() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.schema.status, "degraded");
        assert!(payload.schema.detail.starts_with("pending migrations"));

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_closed() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.schema.detail, "skipped");
    }
}
