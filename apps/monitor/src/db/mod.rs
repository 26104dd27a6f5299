mod block_summaries;
mod events;
mod subscriptions;
mod webhooks;

pub use block_summaries::{BlockSummaryRecord, BlockSummaryRepository};
pub use events::{EventRecord, EventRepository};
pub use subscriptions::SubscriptionRepository;
pub use webhooks::{WebhookDeliveryRecord, WebhookRepository};

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use crate::metrics::MonitorTelemetry;

/// Thin wrapper over the connection pool plus the repository traits the
/// Manager depends on (spec §6's "Repositories" capability), matching the
/// teacher's `Db { pool: PgPool }` + connect-time schema check shape.
#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
    telemetry: Arc<MonitorTelemetry>,
}

impl Db {
    pub async fn connect(database_url: &str, telemetry: Arc<MonitorTelemetry>) -> Result<Self> {
        let options = PgConnectOptions::from_str(database_url)
            .context("invalid DATABASE_URL")?
            .log_statements(tracing::log::LevelFilter::Debug)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_millis(250));

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .context("failed to connect to postgres")?;

        Ok(Self { pool, telemetry })
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE SCHEMA IF NOT EXISTS monitor;

            CREATE TABLE IF NOT EXISTS monitor.subscription (
                id TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                address_hex TEXT NOT NULL,
                network TEXT NOT NULL,
                webhook_url TEXT,
                webhook_secret TEXT,
                filters JSONB NOT NULL,
                status TEXT NOT NULL,
                start_block BIGINT NOT NULL,
                current_block BIGINT NOT NULL,
                events_count BIGINT NOT NULL DEFAULT 0,
                last_event_at BIGINT,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                wallet_type TEXT,
                user_id TEXT,
                label TEXT,
                metadata JSONB NOT NULL DEFAULT '{}',
                global BOOLEAN NOT NULL DEFAULT FALSE
            );

            CREATE INDEX IF NOT EXISTS subscription_address_idx
                ON monitor.subscription (address_hex, status);

            CREATE TABLE IF NOT EXISTS monitor.event (
                id BIGSERIAL PRIMARY KEY,
                subscription_id TEXT NOT NULL REFERENCES monitor.subscription (id),
                tx_id TEXT NOT NULL,
                block_number BIGINT NOT NULL,
                payload JSONB NOT NULL,
                created_at BIGINT NOT NULL,
                expires_at BIGINT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS event_subscription_idx
                ON monitor.event (subscription_id, block_number);
            CREATE INDEX IF NOT EXISTS event_tx_idx ON monitor.event (tx_id);

            CREATE TABLE IF NOT EXISTS monitor.webhook_delivery (
                id BIGSERIAL PRIMARY KEY,
                subscription_id TEXT NOT NULL REFERENCES monitor.subscription (id),
                tx_id TEXT NOT NULL,
                attempts INT NOT NULL,
                succeeded BOOLEAN NOT NULL,
                delivered_at BIGINT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS monitor.block_summary (
                subscription_id TEXT NOT NULL REFERENCES monitor.subscription (id),
                block_number BIGINT NOT NULL,
                payload JSONB NOT NULL,
                created_at BIGINT NOT NULL,
                PRIMARY KEY (subscription_id, block_number)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure monitor schema")?;
        Ok(())
    }
}
