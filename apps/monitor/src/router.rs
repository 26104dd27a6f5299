use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::metrics::MonitorTelemetry;
use crate::types::{AddressEvent, WebhookTarget};
use crate::webhook::WebhookDispatcher;

pub type ClientId = String;

/// A registered push-socket sink: a bounded outbound queue the Hub drains.
#[derive(Clone)]
pub struct RegisteredClient {
    pub id: ClientId,
    pub sender: mpsc::Sender<AddressEvent>,
}

struct Route {
    clients: Vec<RegisteredClient>,
    webhook: Option<WebhookTarget>,
}

/// Sole source of truth for `subscription_id -> {clients, webhook}` (spec
/// open question #2: the Hub holds no parallel map, only a handle back into
/// this table). Guarded by a readers-writer lock: register/unregister take
/// the write half, dispatch takes the read half.
pub struct EventRouter {
    routes: RwLock<HashMap<String, Route>>,
    dispatcher: Arc<WebhookDispatcher>,
    telemetry: Arc<MonitorTelemetry>,
}

impl EventRouter {
    pub fn new(dispatcher: Arc<WebhookDispatcher>, telemetry: Arc<MonitorTelemetry>) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            dispatcher,
            telemetry,
        }
    }

    pub async fn register_client(&self, subscription_id: &str, client: RegisteredClient) {
        let mut routes = self.routes.write().await;
        routes
            .entry(subscription_id.to_string())
            .or_insert_with(|| Route {
                clients: Vec::new(),
                webhook: None,
            })
            .clients
            .push(client);
    }

    pub async fn unregister_client(&self, subscription_id: &str, client_id: &str) {
        let mut routes = self.routes.write().await;
        if let Some(route) = routes.get_mut(subscription_id) {
            route.clients.retain(|c| c.id != client_id);
        }
    }

    pub async fn set_webhook(&self, subscription_id: &str, target: WebhookTarget) {
        let mut routes = self.routes.write().await;
        routes
            .entry(subscription_id.to_string())
            .or_insert_with(|| Route {
                clients: Vec::new(),
                webhook: None,
            })
            .webhook = Some(target);
    }

    pub async fn clear_webhook(&self, subscription_id: &str) {
        let mut routes = self.routes.write().await;
        if let Some(route) = routes.get_mut(subscription_id) {
            route.webhook = None;
        }
    }

    pub async fn remove_subscription(&self, subscription_id: &str) {
        self.routes.write().await.remove(subscription_id);
    }

    /// Fans `event` out to every registered client (non-blocking, drop on
    /// overflow) and hands off to the Dispatcher if a webhook is set. The two
    /// deliveries run independently; neither blocks the other.
    pub async fn dispatch(&self, event: AddressEvent) {
        let (clients, webhook) = {
            let routes = self.routes.read().await;
            match routes.get(&event.subscription_id) {
                Some(route) => (route.clients.clone(), route.webhook.clone()),
                None => (Vec::new(), None),
            }
        };

        for client in &clients {
            if client.sender.try_send(event.clone()).is_err() {
                self.telemetry.sink_overflow(&event.subscription_id);
                tracing::debug!(
                    subscription_id = %event.subscription_id,
                    client_id = %client.id,
                    "push client queue full, dropping event"
                );
            }
        }

        if let Some(target) = webhook {
            self.dispatcher.enqueue(target, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::WebhookRepository;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    struct NoopWebhookRepository;

    #[async_trait]
    impl WebhookRepository for NoopWebhookRepository {
        async fn record_delivery(&self, _record: &crate::db::WebhookDeliveryRecord) -> Result<()> {
            Ok(())
        }
    }

    fn make_router() -> EventRouter {
        let telemetry = Arc::new(MonitorTelemetry::new());
        let dispatcher = WebhookDispatcher::spawn(telemetry.clone(), Arc::new(NoopWebhookRepository), CancellationToken::new());
        EventRouter::new(dispatcher, telemetry)
    }

    fn sample_event(subscription_id: &str, block_number: i64) -> AddressEvent {
        AddressEvent {
            subscription_id: subscription_id.to_string(),
            block_number,
            block_hash: format!("hash{block_number}"),
            block_timestamp: 1_700_000_000_000 + block_number,
            tx_id: format!("tx{block_number}"),
            tx_index: 0,
            from: "0x41aa".to_string(),
            to: "0x41bb".to_string(),
            amount: "1".to_string(),
            contract_type: "TransferContract".to_string(),
            success: true,
            event_type: "trx_transfer".to_string(),
            data: json!({}),
            raw_tx: None,
            raw_tx_info: None,
        }
    }

    /// Two push clients registered on the same subscription both see every
    /// event, in the order the blocks were produced.
    #[tokio::test]
    async fn fans_out_events_in_order_to_every_registered_client() {
        let router = make_router();
        let (tx_a, mut rx_a) = mpsc::channel(10);
        let (tx_b, mut rx_b) = mpsc::channel(10);
        router
            .register_client("sub1", RegisteredClient { id: "a".to_string(), sender: tx_a })
            .await;
        router
            .register_client("sub1", RegisteredClient { id: "b".to_string(), sender: tx_b })
            .await;

        for block in [100, 101, 102] {
            router.dispatch(sample_event("sub1", block)).await;
        }

        for rx in [&mut rx_a, &mut rx_b] {
            for expected_block in [100, 101, 102] {
                let event = rx.recv().await.unwrap();
                assert_eq!(event.block_number, expected_block);
            }
        }
    }

    /// A client with a queue of 2 sees the first two events and drops the
    /// rest; the survivors stay in order, with no reordering around the drop.
    #[tokio::test]
    async fn overflowing_client_drops_without_reordering_survivors() {
        let router = make_router();
        let (tx, mut rx) = mpsc::channel(2);
        router
            .register_client("sub1", RegisteredClient { id: "a".to_string(), sender: tx })
            .await;

        for block in [100, 101, 102, 103] {
            router.dispatch(sample_event("sub1", block)).await;
        }

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.block_number, 100);
        assert_eq!(second.block_number, 101);
        assert!(rx.try_recv().is_err(), "events 102/103 should have been dropped, not queued");
    }
}
