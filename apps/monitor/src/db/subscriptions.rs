use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;

use crate::types::{Subscription, SubscriptionFilters, SubscriptionStatus};

use super::Db;

/// `create`, `find_by_id`, `find_by_<business_key>`, `list`, `update`,
/// `delete`, plus the domain-specific helpers the Manager needs (spec §6).
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn create(&self, sub: &Subscription) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Subscription>>;
    async fn find_active_by_address(&self, address_hex: &str) -> Result<Option<Subscription>>;
    async fn list(&self, limit: i64, skip: i64) -> Result<Vec<Subscription>>;
    async fn update_status(&self, id: &str, status: SubscriptionStatus, updated_at: i64) -> Result<()>;
    async fn increment_events_counter(&self, id: &str, last_event_at: i64) -> Result<()>;
    async fn update_current_block(&self, id: &str, current_block: i64, updated_at: i64) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

#[async_trait]
impl SubscriptionRepository for Db {
    async fn create(&self, sub: &Subscription) -> Result<()> {
        let started = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO monitor.subscription
                (id, address, address_hex, network, webhook_url, webhook_secret, filters,
                 status, start_block, current_block, events_count, last_event_at,
                 created_at, updated_at, wallet_type, user_id, label, metadata, global)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)
            "#,
        )
        .bind(&sub.id)
        .bind(&sub.address)
        .bind(&sub.address_hex)
        .bind(&sub.network)
        .bind(&sub.webhook_url)
        .bind(&sub.webhook_secret)
        .bind(serde_json::to_value(&sub.filters)?)
        .bind(sub.status.as_db_str())
        .bind(sub.start_block)
        .bind(sub.current_block)
        .bind(sub.events_count)
        .bind(sub.last_event_at)
        .bind(sub.created_at)
        .bind(sub.updated_at)
        .bind(&sub.wallet_type)
        .bind(&sub.user_id)
        .bind(&sub.label)
        .bind(&sub.metadata)
        .bind(sub.global)
        .execute(&self.pool)
        .await
        .context("failed to insert subscription");
        self.telemetry.db_ms("subscription_create", started.elapsed().as_millis() as u64);
        result?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Subscription>> {
        let started = Instant::now();
        let row = sqlx::query("SELECT * FROM monitor.subscription WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to query subscription by id");
        self.telemetry.db_ms("subscription_find_by_id", started.elapsed().as_millis() as u64);
        row?.map(row_to_subscription).transpose()
    }

    async fn find_active_by_address(&self, address_hex: &str) -> Result<Option<Subscription>> {
        let started = Instant::now();
        let row = sqlx::query(
            "SELECT * FROM monitor.subscription WHERE address_hex = $1 AND status = 'active' LIMIT 1",
        )
        .bind(address_hex)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query active subscription by address");
        self.telemetry
            .db_ms("subscription_find_active_by_address", started.elapsed().as_millis() as u64);
        row?.map(row_to_subscription).transpose()
    }

    async fn list(&self, limit: i64, skip: i64) -> Result<Vec<Subscription>> {
        let started = Instant::now();
        let rows = sqlx::query("SELECT * FROM monitor.subscription ORDER BY created_at DESC LIMIT $1 OFFSET $2")
            .bind(limit)
            .bind(skip)
            .fetch_all(&self.pool)
            .await
            .context("failed to list subscriptions");
        self.telemetry.db_ms("subscription_list", started.elapsed().as_millis() as u64);
        rows?.into_iter().map(row_to_subscription).collect()
    }

    async fn update_status(&self, id: &str, status: SubscriptionStatus, updated_at: i64) -> Result<()> {
        let started = Instant::now();
        let result = sqlx::query("UPDATE monitor.subscription SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_db_str())
            .bind(updated_at)
            .execute(&self.pool)
            .await
            .context("failed to update subscription status");
        self.telemetry.db_ms("subscription_update_status", started.elapsed().as_millis() as u64);
        result?;
        Ok(())
    }

    async fn increment_events_counter(&self, id: &str, last_event_at: i64) -> Result<()> {
        let started = Instant::now();
        let result = sqlx::query(
            "UPDATE monitor.subscription SET events_count = events_count + 1, last_event_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(last_event_at)
        .execute(&self.pool)
        .await
        .context("failed to increment events_count");
        self.telemetry
            .db_ms("subscription_increment_events_counter", started.elapsed().as_millis() as u64);
        result?;
        Ok(())
    }

    async fn update_current_block(&self, id: &str, current_block: i64, updated_at: i64) -> Result<()> {
        let started = Instant::now();
        let result = sqlx::query(
            "UPDATE monitor.subscription SET current_block = $2, updated_at = $3 WHERE id = $1 AND current_block < $2",
        )
        .bind(id)
        .bind(current_block)
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .context("failed to update current_block");
        self.telemetry
            .db_ms("subscription_update_current_block", started.elapsed().as_millis() as u64);
        result?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let started = Instant::now();
        let result = sqlx::query("DELETE FROM monitor.subscription WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to delete subscription");
        self.telemetry.db_ms("subscription_delete", started.elapsed().as_millis() as u64);
        result?;
        Ok(())
    }
}

fn row_to_subscription(row: sqlx::postgres::PgRow) -> Result<Subscription> {
    let filters: serde_json::Value = row.try_get("filters")?;
    let status: String = row.try_get("status")?;
    Ok(Subscription {
        id: row.try_get("id")?,
        address: row.try_get("address")?,
        address_hex: row.try_get("address_hex")?,
        network: row.try_get("network")?,
        webhook_url: row.try_get("webhook_url")?,
        webhook_secret: row.try_get("webhook_secret")?,
        filters: serde_json::from_value(filters).unwrap_or_else(|_| SubscriptionFilters::default()),
        status: SubscriptionStatus::parse(&status)?,
        start_block: row.try_get("start_block")?,
        current_block: row.try_get("current_block")?,
        events_count: row.try_get("events_count")?,
        last_event_at: row.try_get("last_event_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        wallet_type: row.try_get("wallet_type")?,
        user_id: row.try_get("user_id")?,
        label: row.try_get("label")?,
        metadata: row.try_get("metadata")?,
        global: row.try_get("global")?,
    })
}
