use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use tron::protocol::{BlockExtention, NodeInfo, TransactionInfo};
use tron::TronGrpc;

use crate::metrics::MonitorTelemetry;

/// The Manager and Monitor depend on this capability, not on a concrete
/// transport, so tests can substitute an in-memory fake (Design Notes:
/// "Interface abstraction instead of dynamic collaborator injection").
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_now_block(&self) -> Result<BlockExtention>;
    async fn get_block_by_num(&self, num: i64) -> Result<BlockExtention>;
    async fn get_tx_info_by_id(&self, tx_id: &str) -> Result<Option<TransactionInfo>>;
    async fn get_node_info(&self) -> Result<NodeInfo>;
    async fn is_connected(&self) -> bool;
}

/// Wraps the generated Tron gRPC client behind the capability trait. Owns a
/// single connection; a failed probe call does not reconnect eagerly, only
/// on the next real call (matches the spec's "reconnect on next call" rule).
pub struct TronChainClient {
    inner: tokio::sync::Mutex<TronGrpc>,
    telemetry: Arc<MonitorTelemetry>,
}

impl TronChainClient {
    pub async fn connect(
        url: impl Into<String>,
        api_key: Option<String>,
        telemetry: Arc<MonitorTelemetry>,
    ) -> Result<Self> {
        let grpc = TronGrpc::connect(url, api_key).await?;
        Ok(Self {
            inner: tokio::sync::Mutex::new(grpc),
            telemetry,
        })
    }
}

#[async_trait]
impl ChainClient for TronChainClient {
    async fn get_now_block(&self) -> Result<BlockExtention> {
        let started = Instant::now();
        let result = self.inner.lock().await.get_now_block().await;
        self.telemetry.rpc_ms("get_now_block", started.elapsed().as_millis() as u64);
        result
    }

    async fn get_block_by_num(&self, num: i64) -> Result<BlockExtention> {
        let started = Instant::now();
        let result = self.inner.lock().await.get_block_by_num(num).await;
        self.telemetry.rpc_ms("get_block_by_num", started.elapsed().as_millis() as u64);
        result
    }

    async fn get_tx_info_by_id(&self, tx_id: &str) -> Result<Option<TransactionInfo>> {
        let started = Instant::now();
        let result = self.inner.lock().await.get_tx_info_by_id(tx_id).await;
        self.telemetry.rpc_ms("get_tx_info_by_id", started.elapsed().as_millis() as u64);
        match result {
            Ok(info) => Ok(Some(info)),
            Err(err) => {
                tracing::debug!(tx_id, error = %err, "get_tx_info_by_id failed");
                Ok(None)
            }
        }
    }

    async fn get_node_info(&self) -> Result<NodeInfo> {
        let started = Instant::now();
        let result = self.inner.lock().await.get_node_info().await;
        self.telemetry.rpc_ms("get_node_info", started.elapsed().as_millis() as u64);
        result
    }

    async fn is_connected(&self) -> bool {
        let probe = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            self.inner.lock().await.get_node_info().await
        })
        .await;
        matches!(probe, Ok(Ok(_)))
    }
}
