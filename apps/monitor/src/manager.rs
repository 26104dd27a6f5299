use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tron::{Trc20TokenTable, TronAddress};

use crate::chain::ChainClient;
use crate::db::{BlockSummaryRepository, EventRepository, SubscriptionRepository};
use crate::filters;
use crate::metrics::MonitorTelemetry;
use crate::monitor::{AddressMonitor, MonitorConfig, DEFAULT_POLL_INTERVAL, STOP_GRACE_PERIOD};
use crate::router::EventRouter;
use crate::types::{
    AddressEvent, MonitorOutput, Subscription, SubscriptionFilters, SubscriptionStatus, WebhookTarget,
};

struct ManagedMonitor {
    monitor: Arc<AddressMonitor>,
    forwarder: JoinHandle<()>,
}

/// Owns every live `AddressMonitor`, keyed by subscription id. Nothing else
/// in the process creates, starts, or stops a Monitor (Design Notes:
/// "arena of subscriptions").
pub struct SubscriptionManager {
    chain: Arc<dyn ChainClient>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    events: Arc<dyn EventRepository>,
    block_summaries: Arc<dyn BlockSummaryRepository>,
    router: Arc<EventRouter>,
    telemetry: Arc<MonitorTelemetry>,
    token_table: Arc<Trc20TokenTable>,
    root_token: CancellationToken,
    poll_interval: Duration,
    monitors: Mutex<HashMap<String, ManagedMonitor>>,
}

impl SubscriptionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        events: Arc<dyn EventRepository>,
        block_summaries: Arc<dyn BlockSummaryRepository>,
        router: Arc<EventRouter>,
        telemetry: Arc<MonitorTelemetry>,
        token_table: Arc<Trc20TokenTable>,
        root_token: CancellationToken,
    ) -> Self {
        Self::with_poll_interval(
            chain,
            subscriptions,
            events,
            block_summaries,
            router,
            telemetry,
            token_table,
            root_token,
            DEFAULT_POLL_INTERVAL,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_poll_interval(
        chain: Arc<dyn ChainClient>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        events: Arc<dyn EventRepository>,
        block_summaries: Arc<dyn BlockSummaryRepository>,
        router: Arc<EventRouter>,
        telemetry: Arc<MonitorTelemetry>,
        token_table: Arc<Trc20TokenTable>,
        root_token: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        Self {
            chain,
            subscriptions,
            events,
            block_summaries,
            router,
            telemetry,
            token_table,
            root_token,
            poll_interval,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a subscription record, starts its Monitor, and wires the
    /// forwarder task that turns raw chain events into filtered, persisted,
    /// routed ones. Rejects a malformed address before anything is persisted.
    #[allow(clippy::too_many_arguments)]
    pub async fn subscribe(
        &self,
        address: &str,
        webhook: Option<WebhookTarget>,
        filters: SubscriptionFilters,
        start_block: i64,
        global: bool,
    ) -> Result<Subscription> {
        let parsed = TronAddress::parse_text(address).context("malformed tron address")?;
        let now = now_unix();

        let sub = Subscription {
            id: Uuid::new_v4().to_string(),
            address: parsed.to_base58(),
            address_hex: parsed.to_hex(),
            network: webhook.as_ref().map(|w| w.network.clone()).unwrap_or_else(|| "mainnet".to_string()),
            webhook_url: webhook.as_ref().map(|w| w.url.clone()),
            webhook_secret: webhook.as_ref().map(|w| w.secret.clone()),
            filters,
            status: SubscriptionStatus::Active,
            start_block,
            current_block: start_block.max(0),
            events_count: 0,
            last_event_at: None,
            created_at: now,
            updated_at: now,
            wallet_type: webhook.as_ref().and_then(|w| w.wallet_type.clone()),
            user_id: None,
            label: None,
            metadata: serde_json::Value::Null,
            global,
        };

        self.subscriptions.create(&sub).await?;
        if let Some(target) = webhook {
            self.router.set_webhook(&sub.id, target).await;
        }
        self.spawn_monitor(&sub).await?;
        Ok(sub)
    }

    /// Stops and unregisters a subscription's Monitor. Idempotent: calling
    /// this twice, or on an id with no live Monitor, is a no-op.
    pub async fn unsubscribe(&self, id: &str) -> Result<()> {
        if let Some(managed) = self.monitors.lock().await.remove(id) {
            managed.monitor.stop();
            let _ = tokio::time::timeout(STOP_GRACE_PERIOD, managed.forwarder).await;
        }
        self.router.remove_subscription(id).await;
        self.router.clear_webhook(id).await;
        self.subscriptions.update_status(id, SubscriptionStatus::Stopped, now_unix()).await?;
        Ok(())
    }

    /// Returns the existing active subscription for `address` if one is
    /// live, otherwise creates a fresh one. A subscription that was
    /// previously unsubscribed never gets its old id back (spec's
    /// new-id-on-resubscribe rule): this always mints a new id when it has
    /// to create a record at all.
    pub async fn resubscribe(
        &self,
        address: &str,
        webhook: Option<WebhookTarget>,
        filters: SubscriptionFilters,
        scan_gap: bool,
    ) -> Result<Subscription> {
        let parsed = TronAddress::parse_text(address).context("malformed tron address")?;
        let address_hex = parsed.to_hex();

        if let Some(existing) = self.subscriptions.find_active_by_address(&address_hex).await? {
            return Ok(existing);
        }

        let previous = self
            .subscriptions
            .list(1000, 0)
            .await?
            .into_iter()
            .filter(|s| s.address_hex == address_hex)
            .max_by_key(|s| s.updated_at);

        let start_block = previous.as_ref().map(|s| s.current_block + 1).unwrap_or(0);
        let sub = self.subscribe(address, webhook, filters, start_block, false).await?;

        if scan_gap {
            if let Some(prev) = previous {
                if let Ok(head_block) = self.chain.get_now_block().await {
                    let head = head_block
                        .block_header
                        .as_ref()
                        .and_then(|h| h.raw_data.as_ref())
                        .map(|r| r.number)
                        .unwrap_or(0);
                    if prev.current_block > 0 && prev.current_block < head {
                        if let Err(err) = self.scan_historical(&sub.id, prev.current_block + 1, head).await {
                            tracing::warn!(subscription_id = %sub.id, error = %err, "gap scan failed");
                        }
                    }
                }
            }
        }

        Ok(sub)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Subscription>> {
        self.subscriptions.find_by_id(id).await
    }

    pub async fn list(&self, limit: i64, skip: i64) -> Result<Vec<Subscription>> {
        self.subscriptions.list(limit, skip).await
    }

    pub async fn get_by_address(&self, address_hex: &str) -> Result<Option<Subscription>> {
        self.subscriptions.find_active_by_address(address_hex).await
    }

    pub async fn active_monitor_count(&self) -> usize {
        self.monitors.lock().await.len()
    }

    /// Ad-hoc backfill over `[from, to]`, driving a throwaway `AddressMonitor`
    /// through `process_block` directly instead of its tick loop, then
    /// pushing every matched event through the same filter/persist/route path
    /// live events take.
    pub async fn scan_historical(&self, id: &str, from: i64, to: i64) -> Result<usize> {
        let sub = self.subscriptions.find_by_id(id).await?.context("subscription not found")?;

        let config = MonitorConfig {
            subscription_id: sub.id.clone(),
            address_hex: sub.address_hex.clone(),
            global: sub.global,
            start_block: from,
            poll_interval: self.poll_interval,
        };
        let scanner = AddressMonitor::new(
            config,
            self.chain.clone(),
            self.telemetry.clone(),
            self.token_table.clone(),
            &self.root_token,
        );

        let (tx, mut rx) = mpsc::channel(1024);
        for num in from..=to {
            if let Err(err) = scanner.process_block(num, &tx).await {
                tracing::warn!(block = num, error = %err, "historical scan skipped block");
            }
        }
        drop(tx);

        let mut count = 0usize;
        while let Some(output) = rx.recv().await {
            if let MonitorOutput::Event(event) = output {
                count += 1;
                intake_event(&self.subscriptions, &self.events, &self.router, &self.telemetry, id, event).await;
            }
        }
        Ok(count)
    }

    /// Restarts a Monitor for every persisted `active` subscription. Called
    /// once at process startup: subscriptions outlive a restart, but the live
    /// Monitors and the Router's webhook/client registrations do not.
    pub async fn resume_active(&self) -> Result<usize> {
        let mut resumed = 0usize;
        let mut skip = 0i64;
        const PAGE: i64 = 500;
        loop {
            let page = self.subscriptions.list(PAGE, skip).await?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            for sub in page.into_iter().filter(|s| s.status == SubscriptionStatus::Active) {
                if let (Some(url), Some(secret)) = (sub.webhook_url.clone(), sub.webhook_secret.clone()) {
                    let target = WebhookTarget {
                        url,
                        secret,
                        network: sub.network.clone(),
                        wallet_type: sub.wallet_type.clone(),
                    };
                    self.router.set_webhook(&sub.id, target).await;
                }
                if let Err(err) = self.spawn_monitor(&sub).await {
                    tracing::warn!(subscription_id = %sub.id, error = %err, "failed to resume subscription monitor");
                    continue;
                }
                resumed += 1;
            }
            if (page_len as i64) < PAGE {
                break;
            }
            skip += PAGE;
        }
        tracing::info!(resumed, "resumed active subscriptions");
        Ok(resumed)
    }

    async fn spawn_monitor(&self, sub: &Subscription) -> Result<()> {
        let config = MonitorConfig {
            subscription_id: sub.id.clone(),
            address_hex: sub.address_hex.clone(),
            global: sub.global,
            start_block: sub.start_block,
            poll_interval: self.poll_interval,
        };
        let monitor = Arc::new(AddressMonitor::new(
            config,
            self.chain.clone(),
            self.telemetry.clone(),
            self.token_table.clone(),
            &self.root_token,
        ));
        let mut rx = monitor.clone().start().await?;

        // The Monitor reports its resolved starting cursor as the very first
        // outbound message (before the first tick). Consume it here so the
        // subscription record is seeded to the resolved head synchronously,
        // instead of sitting at `start_block.max(0)` until the first tick
        // fires, bounded so a wedged Monitor can't hang `subscribe`/`resume`.
        match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
            Ok(Some(MonitorOutput::Cursor(block))) => {
                let _ = self.subscriptions.update_current_block(&sub.id, block, now_unix()).await;
            }
            Ok(Some(other)) => {
                tracing::warn!(
                    subscription_id = %sub.id,
                    "expected an initial cursor report from the monitor, got {other:?}"
                );
            }
            Ok(None) => {
                tracing::warn!(subscription_id = %sub.id, "monitor closed before reporting its starting cursor");
            }
            Err(_) => {
                tracing::warn!(subscription_id = %sub.id, "timed out waiting for the monitor's starting cursor");
            }
        }

        let subscriptions = self.subscriptions.clone();
        let events = self.events.clone();
        let block_summaries = self.block_summaries.clone();
        let router = self.router.clone();
        let telemetry = self.telemetry.clone();
        let subscription_id = sub.id.clone();

        let forwarder = tokio::spawn(async move {
            while let Some(output) = rx.recv().await {
                match output {
                    MonitorOutput::Event(event) => {
                        intake_event(&subscriptions, &events, &router, &telemetry, &subscription_id, event).await;
                    }
                    MonitorOutput::Block(summary) => {
                        let created_at = now_unix();
                        if let Err(err) = block_summaries.record(&subscription_id, &summary, created_at).await {
                            tracing::warn!(subscription_id = %subscription_id, error = %err, "failed to persist block summary");
                        }
                    }
                    MonitorOutput::Cursor(block) => {
                        let _ = subscriptions.update_current_block(&subscription_id, block, now_unix()).await;
                    }
                }
            }
        });

        self.monitors.lock().await.insert(sub.id.clone(), ManagedMonitor { monitor, forwarder });
        Ok(())
    }
}

/// The "single logical acceptance" of one raw chain event: apply the
/// subscription's filters, persist (retried once in-process, logged and
/// countered rather than blocking on repeated failure), bump the
/// subscription's counters, then hand off to the Router. Never drops an
/// event from routing because persistence failed.
async fn intake_event(
    subscriptions: &Arc<dyn SubscriptionRepository>,
    events: &Arc<dyn EventRepository>,
    router: &Arc<EventRouter>,
    telemetry: &Arc<MonitorTelemetry>,
    subscription_id: &str,
    event: AddressEvent,
) {
    let filters = match subscriptions.find_by_id(subscription_id).await {
        Ok(Some(sub)) => sub.filters,
        Ok(None) => return,
        Err(err) => {
            tracing::warn!(subscription_id, error = %err, "failed to load subscription filters, accepting event");
            SubscriptionFilters::default()
        }
    };
    if !filters::matches(&filters, &event) {
        return;
    }

    let now = now_unix();
    if persist_with_retry(events, telemetry, &event, now).await {
        let _ = subscriptions.increment_events_counter(subscription_id, now).await;
    }
    let _ = subscriptions.update_current_block(subscription_id, event.block_number, now).await;

    router.dispatch(event).await;
}

async fn persist_with_retry(
    events: &Arc<dyn EventRepository>,
    telemetry: &Arc<MonitorTelemetry>,
    event: &AddressEvent,
    now: i64,
) -> bool {
    for attempt in 0..2 {
        match events.create(event, now).await {
            Ok(()) => return true,
            Err(err) if attempt == 0 => {
                telemetry.persistence_retry("event_create");
                tracing::debug!(error = %err, tx_id = %event.tx_id, "event persistence failed, retrying once");
            }
            Err(err) => {
                telemetry.persistence_failure("event_create");
                tracing::error!(error = %err, tx_id = %event.tx_id, "event persistence failed after retry");
            }
        }
    }
    false
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::fake::FakeChainClient;
    use crate::db::EventRecord;
    use crate::webhook::WebhookDispatcher;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct InMemorySubscriptions {
        rows: StdMutex<HashMap<String, Subscription>>,
    }

    #[async_trait::async_trait]
    impl SubscriptionRepository for InMemorySubscriptions {
        async fn create(&self, sub: &Subscription) -> Result<()> {
            self.rows.lock().unwrap().insert(sub.id.clone(), sub.clone());
            Ok(())
        }
        async fn find_by_id(&self, id: &str) -> Result<Option<Subscription>> {
            Ok(self.rows.lock().unwrap().get(id).cloned())
        }
        async fn find_active_by_address(&self, address_hex: &str) -> Result<Option<Subscription>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .find(|s| s.address_hex == address_hex && s.status == SubscriptionStatus::Active)
                .cloned())
        }
        async fn list(&self, limit: i64, skip: i64) -> Result<Vec<Subscription>> {
            let mut rows: Vec<_> = self.rows.lock().unwrap().values().cloned().collect();
            rows.sort_by_key(|s| std::cmp::Reverse(s.created_at));
            Ok(rows.into_iter().skip(skip as usize).take(limit as usize).collect())
        }
        async fn update_status(&self, id: &str, status: SubscriptionStatus, updated_at: i64) -> Result<()> {
            if let Some(sub) = self.rows.lock().unwrap().get_mut(id) {
                sub.status = status;
                sub.updated_at = updated_at;
            }
            Ok(())
        }
        async fn increment_events_counter(&self, id: &str, last_event_at: i64) -> Result<()> {
            if let Some(sub) = self.rows.lock().unwrap().get_mut(id) {
                sub.events_count += 1;
                sub.last_event_at = Some(last_event_at);
            }
            Ok(())
        }
        async fn update_current_block(&self, id: &str, current_block: i64, updated_at: i64) -> Result<()> {
            if let Some(sub) = self.rows.lock().unwrap().get_mut(id) {
                if sub.current_block < current_block {
                    sub.current_block = current_block;
                    sub.updated_at = updated_at;
                }
            }
            Ok(())
        }
        async fn delete(&self, id: &str) -> Result<()> {
            self.rows.lock().unwrap().remove(id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct InMemoryBlockSummaries {
        rows: StdMutex<Vec<crate::types::BlockSummary>>,
    }

    #[async_trait::async_trait]
    impl BlockSummaryRepository for InMemoryBlockSummaries {
        async fn record(&self, _subscription_id: &str, summary: &crate::types::BlockSummary, _created_at: i64) -> Result<()> {
            self.rows.lock().unwrap().push(summary.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct InMemoryWebhooks {
        rows: StdMutex<Vec<crate::db::WebhookDeliveryRecord>>,
    }

    #[async_trait::async_trait]
    impl crate::db::WebhookRepository for InMemoryWebhooks {
        async fn record_delivery(&self, record: &crate::db::WebhookDeliveryRecord) -> Result<()> {
            self.rows.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct InMemoryEvents {
        rows: StdMutex<Vec<AddressEvent>>,
    }

    #[async_trait::async_trait]
    impl EventRepository for InMemoryEvents {
        async fn create(&self, event: &AddressEvent, _created_at: i64) -> Result<()> {
            self.rows.lock().unwrap().push(event.clone());
            Ok(())
        }
        async fn find_by_tx_id(&self, _tx_id: &str) -> Result<Vec<EventRecord>> {
            Ok(Vec::new())
        }
        async fn list_for_subscription(&self, _subscription_id: &str, _limit: i64, _skip: i64) -> Result<Vec<EventRecord>> {
            Ok(Vec::new())
        }
    }

    fn make_block(number: i64) -> tron::protocol::BlockExtention {
        tron::protocol::BlockExtention {
            transactions: Vec::new(),
            block_header: Some(tron::protocol::BlockHeader {
                raw_data: Some(tron::protocol::block_header::Raw {
                    number,
                    ..Default::default()
                }),
                witness_signature: Vec::new(),
            }),
            blockid: vec![0xCD; 32],
        }
    }

    fn make_manager(chain: Arc<FakeChainClient>) -> (Arc<SubscriptionManager>, Arc<InMemoryEvents>) {
        make_manager_with_subscriptions(chain, Arc::new(InMemorySubscriptions::default()))
    }

    fn make_manager_with_subscriptions(
        chain: Arc<FakeChainClient>,
        subscriptions: Arc<InMemorySubscriptions>,
    ) -> (Arc<SubscriptionManager>, Arc<InMemoryEvents>) {
        let telemetry = Arc::new(MonitorTelemetry::new());
        let webhooks: Arc<dyn crate::db::WebhookRepository> = Arc::new(InMemoryWebhooks::default());
        let dispatcher = WebhookDispatcher::spawn(telemetry.clone(), webhooks, CancellationToken::new());
        let router = Arc::new(EventRouter::new(dispatcher, telemetry.clone()));
        let subscriptions: Arc<dyn SubscriptionRepository> = subscriptions;
        let events_impl = Arc::new(InMemoryEvents::default());
        let events: Arc<dyn EventRepository> = events_impl.clone();
        let block_summaries: Arc<dyn BlockSummaryRepository> = Arc::new(InMemoryBlockSummaries::default());
        let manager = Arc::new(SubscriptionManager::new(
            chain,
            subscriptions,
            events,
            block_summaries,
            router,
            telemetry,
            Arc::new(Trc20TokenTable::new()),
            CancellationToken::new(),
        ));
        (manager, events_impl)
    }

    #[tokio::test]
    async fn subscribe_rejects_malformed_address() {
        let chain = Arc::new(FakeChainClient::new());
        let (manager, _events) = make_manager(chain);
        let result = manager
            .subscribe("not-an-address", None, SubscriptionFilters::default(), 0, false)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let chain = Arc::new(FakeChainClient::new());
        chain.set_head(1);
        chain.insert_block(1, make_block(1));
        let (manager, _events) = make_manager(chain);

        let sub = manager
            .subscribe(
                "0x41aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                None,
                SubscriptionFilters::default(),
                1,
                false,
            )
            .await
            .unwrap();

        manager.unsubscribe(&sub.id).await.unwrap();
        manager.unsubscribe(&sub.id).await.unwrap();
        assert_eq!(manager.active_monitor_count().await, 0);
        let stored = manager.get(&sub.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Stopped);
    }

    #[tokio::test]
    async fn resubscribe_after_unsubscribe_gets_new_id() {
        let chain = Arc::new(FakeChainClient::new());
        chain.set_head(1);
        chain.insert_block(1, make_block(1));
        let (manager, _events) = make_manager(chain);

        let address = "0x41bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
        let first = manager
            .subscribe(address, None, SubscriptionFilters::default(), 1, false)
            .await
            .unwrap();
        manager.unsubscribe(&first.id).await.unwrap();

        let second = manager
            .resubscribe(address, None, SubscriptionFilters::default(), false)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn resume_active_restarts_monitors_for_active_subscriptions_only() {
        let chain = Arc::new(FakeChainClient::new());
        chain.set_head(1);
        chain.insert_block(1, make_block(1));
        let subscriptions = Arc::new(InMemorySubscriptions::default());
        let (manager, _events) = make_manager_with_subscriptions(chain.clone(), subscriptions.clone());

        let active = manager
            .subscribe(
                "0x41cccccccccccccccccccccccccccccccccccccccc",
                None,
                SubscriptionFilters::default(),
                1,
                false,
            )
            .await
            .unwrap();
        let stopped = manager
            .subscribe(
                "0x41dddddddddddddddddddddddddddddddddddddddd",
                None,
                SubscriptionFilters::default(),
                1,
                false,
            )
            .await
            .unwrap();
        manager.unsubscribe(&stopped.id).await.unwrap();

        // Simulate a process restart: a fresh manager over the same
        // persisted subscriptions, with no live Monitors yet.
        let (restarted, _events2) = make_manager_with_subscriptions(chain, subscriptions);
        assert_eq!(restarted.active_monitor_count().await, 0);

        let resumed = restarted.resume_active().await.unwrap();
        assert_eq!(resumed, 1);
        assert_eq!(restarted.active_monitor_count().await, 1);
        let _ = active;
    }
}
