use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::Db;

#[derive(Debug, Clone)]
pub struct WebhookDeliveryRecord {
    pub subscription_id: String,
    pub tx_id: String,
    pub attempts: i32,
    pub succeeded: bool,
    pub delivered_at: i64,
}

/// Delivery-history log. Not on the hot path (the Dispatcher's in-process
/// retry loop does not consult it); used for operator visibility only.
#[async_trait]
pub trait WebhookRepository: Send + Sync {
    async fn record_delivery(&self, record: &WebhookDeliveryRecord) -> Result<()>;
}

#[async_trait]
impl WebhookRepository for Db {
    async fn record_delivery(&self, record: &WebhookDeliveryRecord) -> Result<()> {
        let started = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO monitor.webhook_delivery (subscription_id, tx_id, attempts, succeeded, delivered_at)
            VALUES ($1,$2,$3,$4,$5)
            "#,
        )
        .bind(&record.subscription_id)
        .bind(&record.tx_id)
        .bind(record.attempts)
        .bind(record.succeeded)
        .bind(record.delivered_at)
        .execute(&self.pool)
        .await
        .context("failed to record webhook delivery");
        self.telemetry.db_ms("webhook_record_delivery", started.elapsed().as_millis() as u64);
        result?;
        Ok(())
    }
}
