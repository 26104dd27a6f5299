use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::manager::SubscriptionManager;
use crate::router::{EventRouter, RegisteredClient};
use crate::types::{AddressEvent, SubscriptionStatus};

/// Per-connection outbound queue depth (spec §4.6: 256 for push-socket
/// clients, smaller than the Monitor's own internal channels since each
/// client is one browser tab, not a whole subscription's fan-out).
pub const CLIENT_QUEUE_CAPACITY: usize = 256;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Clone)]
pub struct HubState {
    pub manager: Arc<SubscriptionManager>,
    pub router: Arc<EventRouter>,
}

pub fn router(state: HubState) -> Router {
    Router::new().route("/ws/{subscription_id}", get(upgrade)).with_state(state)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Path(subscription_id): Path<String>,
    State(state): State<HubState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, subscription_id, state))
}

/// One push-socket connection's lifetime: verify the subscription is active,
/// send a welcome frame, register a sink with the Router, then run split
/// send/receive loops until either side ends, unregistering exactly once on
/// the way out (spec §4.6).
async fn handle_socket(mut socket: WebSocket, subscription_id: String, state: HubState) {
    let active = match state.manager.get(&subscription_id).await {
        Ok(Some(sub)) => sub.status == SubscriptionStatus::Active,
        Ok(None) => false,
        Err(err) => {
            tracing::warn!(subscription_id, error = %err, "failed to load subscription for push socket");
            false
        }
    };
    if !active {
        let _ = socket
            .send(Message::Text(error_payload("subscription not found or not active").to_string().into()))
            .await;
        let _ = socket.close().await;
        return;
    }

    let client_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::channel::<AddressEvent>(CLIENT_QUEUE_CAPACITY);
    state
        .router
        .register_client(&subscription_id, RegisteredClient { id: client_id.clone(), sender: tx })
        .await;

    let (mut sink, mut stream) = socket.split();

    let welcome = welcome_payload(&subscription_id);
    if sink.send(Message::Text(welcome.to_string().into())).await.is_err() {
        state.router.unregister_client(&subscription_id, &client_id).await;
        return;
    }

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            let Ok(payload) = serde_json::to_string(&event_frame(&event)) else { continue };
                            if sink.send(Message::Text(payload.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let client_id_recv = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            match tokio::time::timeout(HEARTBEAT_TIMEOUT, stream.next()).await {
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(err))) => {
                    tracing::debug!(client_id = %client_id_recv, error = %err, "push socket read error");
                    break;
                }
                Err(_) => {
                    tracing::debug!(client_id = %client_id_recv, "push socket heartbeat timeout");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.router.unregister_client(&subscription_id, &client_id).await;
}

fn welcome_payload(subscription_id: &str) -> Value {
    json!({
        "type": "connected",
        "subscription_id": subscription_id,
        "timestamp": unix_now(),
        "message": "subscribed",
    })
}

/// Wraps an outbound `AddressEvent` with the `type:"event"` envelope,
/// flattening the event's own fields alongside it (spec's push-socket wire
/// schema).
fn event_frame(event: &AddressEvent) -> Value {
    let mut value = serde_json::to_value(event).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("type".to_string(), Value::String("event".to_string()));
    }
    value
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn error_payload(message: &str) -> Value {
    json!({"type": "error", "message": message})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_payload_carries_subscription_id_and_message() {
        let payload = welcome_payload("sub1");
        assert_eq!(payload["type"], "connected");
        assert_eq!(payload["subscription_id"], "sub1");
        assert!(payload["timestamp"].is_i64());
        assert_eq!(payload["message"], "subscribed");
    }

    #[test]
    fn event_frame_wraps_and_flattens_event() {
        let event = AddressEvent {
            subscription_id: "sub1".to_string(),
            block_number: 10,
            block_hash: "0xabc".to_string(),
            block_timestamp: 1_700_000_000,
            tx_id: "txid".to_string(),
            tx_index: 0,
            from: "0x41a".to_string(),
            to: "0x41b".to_string(),
            amount: "100".to_string(),
            contract_type: "TransferContract".to_string(),
            success: true,
            event_type: "trx_transfer".to_string(),
            data: json!({}),
            raw_tx: None,
            raw_tx_info: None,
        };
        let payload = event_frame(&event);
        assert_eq!(payload["type"], "event");
        assert_eq!(payload["subscription_id"], "sub1");
        assert_eq!(payload["block_number"], 10);
    }

    #[test]
    fn error_payload_has_error_type() {
        let payload = error_payload("nope");
        assert_eq!(payload["type"], "error");
        assert_eq!(payload["message"], "nope");
    }

    #[test]
    fn client_queue_capacity_matches_spec() {
        assert_eq!(CLIENT_QUEUE_CAPACITY, 256);
    }
}
