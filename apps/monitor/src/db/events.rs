use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;

use crate::types::AddressEvent;

use super::Db;

const EVENT_TTL_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct EventRecord {
    pub subscription_id: String,
    pub tx_id: String,
    pub block_number: i64,
    pub payload: AddressEvent,
    pub created_at: i64,
}

/// The event store; applies the spec's 30-day TTL via a creation-time
/// `expires_at` (spec §6).
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn create(&self, event: &AddressEvent, created_at: i64) -> Result<()>;
    async fn find_by_tx_id(&self, tx_id: &str) -> Result<Vec<EventRecord>>;
    async fn list_for_subscription(&self, subscription_id: &str, limit: i64, skip: i64) -> Result<Vec<EventRecord>>;
}

#[async_trait]
impl EventRepository for Db {
    async fn create(&self, event: &AddressEvent, created_at: i64) -> Result<()> {
        let expires_at = created_at + EVENT_TTL_SECS;
        let started = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO monitor.event (subscription_id, tx_id, block_number, payload, created_at, expires_at)
            VALUES ($1,$2,$3,$4,$5,$6)
            "#,
        )
        .bind(&event.subscription_id)
        .bind(&event.tx_id)
        .bind(event.block_number)
        .bind(serde_json::to_value(event)?)
        .bind(created_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .context("failed to insert event");
        self.telemetry.db_ms("event_create", started.elapsed().as_millis() as u64);
        result?;
        Ok(())
    }

    async fn find_by_tx_id(&self, tx_id: &str) -> Result<Vec<EventRecord>> {
        let started = Instant::now();
        let rows = sqlx::query("SELECT * FROM monitor.event WHERE tx_id = $1 ORDER BY id ASC")
            .bind(tx_id)
            .fetch_all(&self.pool)
            .await
            .context("failed to query events by tx id");
        self.telemetry.db_ms("event_find_by_tx_id", started.elapsed().as_millis() as u64);
        rows?.into_iter().map(row_to_event).collect()
    }

    async fn list_for_subscription(&self, subscription_id: &str, limit: i64, skip: i64) -> Result<Vec<EventRecord>> {
        let started = Instant::now();
        let rows = sqlx::query(
            "SELECT * FROM monitor.event WHERE subscription_id = $1 ORDER BY block_number DESC LIMIT $2 OFFSET $3",
        )
        .bind(subscription_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await
        .context("failed to list events for subscription");
        self.telemetry
            .db_ms("event_list_for_subscription", started.elapsed().as_millis() as u64);
        rows?.into_iter().map(row_to_event).collect()
    }
}

fn row_to_event(row: sqlx::postgres::PgRow) -> Result<EventRecord> {
    let payload: serde_json::Value = row.try_get("payload")?;
    Ok(EventRecord {
        subscription_id: row.try_get("subscription_id")?,
        tx_id: row.try_get("tx_id")?,
        block_number: row.try_get("block_number")?,
        payload: serde_json::from_value(payload).context("stored event payload failed to deserialize")?,
        created_at: row.try_get("created_at")?,
    })
}
