use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::types::BlockSummary;

use super::Db;

#[derive(Debug, Clone)]
pub struct BlockSummaryRecord {
    pub subscription_id: String,
    pub block_number: i64,
    pub summary: BlockSummary,
    pub created_at: i64,
}

/// Global/block-wide tally store (spec §8's "global" monitor mode). One row
/// per subscription per block, mirroring `monitor.event`'s shape so the same
/// retention story applies.
#[async_trait]
pub trait BlockSummaryRepository: Send + Sync {
    async fn record(&self, subscription_id: &str, summary: &BlockSummary, created_at: i64) -> Result<()>;
}

#[async_trait]
impl BlockSummaryRepository for Db {
    async fn record(&self, subscription_id: &str, summary: &BlockSummary, created_at: i64) -> Result<()> {
        let started = std::time::Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO monitor.block_summary (subscription_id, block_number, payload, created_at)
            VALUES ($1,$2,$3,$4)
            ON CONFLICT (subscription_id, block_number) DO UPDATE SET payload = EXCLUDED.payload
            "#,
        )
        .bind(subscription_id)
        .bind(summary.block_number)
        .bind(serde_json::to_value(summary)?)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("failed to record block summary");
        self.telemetry.db_ms("block_summary_record", started.elapsed().as_millis() as u64);
        result?;
        Ok(())
    }
}
