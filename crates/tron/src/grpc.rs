use anyhow::{Context, Result};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use crate::protocol::wallet_client::WalletClient;
use crate::protocol::{BlockExtention, BytesMessage, EmptyMessage, NodeInfo, NumberMessage, TransactionInfo};

const CALL_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Thin, read-only wrapper over the Tron full-node `Wallet` gRPC service.
/// This client never signs or broadcasts; it only tails blocks and looks up
/// transaction receipts, matching the monitor's read-only role.
pub struct TronGrpc {
    url: String,
    api_key: Option<String>,
    client: WalletClient<Channel>,
}

impl TronGrpc {
    pub async fn connect(url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let url = url.into();
        let endpoint = Endpoint::from_shared(url.clone())
            .with_context(|| format!("invalid tron grpc endpoint: {url}"))?
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(CALL_TIMEOUT);
        let channel = endpoint
            .connect()
            .await
            .with_context(|| format!("failed to connect to tron grpc endpoint: {url}"))?;
        let client = WalletClient::new(channel);
        Ok(Self {
            url,
            api_key,
            client,
        })
    }

    pub async fn reconnect(&mut self) -> Result<()> {
        let reconnected = Self::connect(self.url.clone(), self.api_key.clone()).await?;
        self.client = reconnected.client;
        Ok(())
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut req = Request::new(message);
        if let Some(key) = &self.api_key {
            if let Ok(value) = key.parse() {
                req.metadata_mut().insert("tron-pro-api-key", value);
            }
        }
        req
    }

    pub async fn get_now_block(&mut self) -> Result<BlockExtention> {
        let resp = self
            .client
            .get_now_block2(self.request(EmptyMessage {}))
            .await
            .context("get_now_block2 rpc failed")?;
        Ok(resp.into_inner())
    }

    pub async fn get_block_by_num(&mut self, num: i64) -> Result<BlockExtention> {
        let resp = self
            .client
            .get_block_by_num2(self.request(NumberMessage { num }))
            .await
            .with_context(|| format!("get_block_by_num2({num}) rpc failed"))?;
        Ok(resp.into_inner())
    }

    pub async fn get_tx_info_by_id(&mut self, txid_hex: &str) -> Result<TransactionInfo> {
        let value = hex::decode(txid_hex).with_context(|| format!("invalid txid hex: {txid_hex}"))?;
        let resp = self
            .client
            .get_transaction_info_by_id(self.request(BytesMessage { value }))
            .await
            .with_context(|| format!("get_transaction_info_by_id({txid_hex}) rpc failed"))?;
        Ok(resp.into_inner())
    }

    pub async fn get_node_info(&mut self) -> Result<NodeInfo> {
        let resp = self
            .client
            .get_node_info(self.request(EmptyMessage {}))
            .await
            .context("get_node_info rpc failed")?;
        Ok(resp.into_inner())
    }
}
