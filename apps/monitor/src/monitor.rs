use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use tron::decode::{self, Trc20TokenTable};
use tron::protocol::{BlockExtention, Transaction, TransactionInfo};

use crate::chain::ChainClient;
use crate::metrics::MonitorTelemetry;
use crate::types::{AddressActivity, AddressEvent, BlockSummary, DecodedCall, Direction, MonitorOutput};

pub const ADDRESS_QUEUE_CAPACITY: usize = 100;
pub const GLOBAL_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initialized,
    Running,
    Stopped,
}

pub struct MonitorConfig {
    pub subscription_id: String,
    pub address_hex: String,
    pub global: bool,
    pub start_block: i64,
    pub poll_interval: Duration,
}

impl MonitorConfig {
    fn queue_capacity(&self) -> usize {
        if self.global {
            GLOBAL_QUEUE_CAPACITY
        } else {
            ADDRESS_QUEUE_CAPACITY
        }
    }
}

/// Drives one subscription's cursor along the chain. State machine
/// `Initialized -> Running -> Stopped`; `start` is idempotent-erroring,
/// `stop` is idempotent-silent (spec §4.3).
pub struct AddressMonitor {
    config: MonitorConfig,
    chain: Arc<dyn ChainClient>,
    telemetry: Arc<MonitorTelemetry>,
    token_table: Arc<Trc20TokenTable>,
    cancellation: CancellationToken,
    state: Mutex<State>,
    last_processed: AtomicI64,
}

impl AddressMonitor {
    pub fn new(
        config: MonitorConfig,
        chain: Arc<dyn ChainClient>,
        telemetry: Arc<MonitorTelemetry>,
        token_table: Arc<Trc20TokenTable>,
        parent_token: &CancellationToken,
    ) -> Self {
        Self {
            config,
            chain,
            telemetry,
            token_table,
            cancellation: parent_token.child_token(),
            state: Mutex::new(State::Initialized),
            last_processed: AtomicI64::new(0),
        }
    }

    pub fn current_block(&self) -> i64 {
        self.last_processed.load(Ordering::SeqCst)
    }

    /// Spawns the tick loop. Fails if this Monitor has already been started.
    pub async fn start(self: Arc<Self>) -> Result<mpsc::Receiver<MonitorOutput>> {
        {
            let mut state = self.state.lock().await;
            if *state != State::Initialized {
                anyhow::bail!("monitor for {} already started", self.config.subscription_id);
            }
            *state = State::Running;
        }
        self.telemetry.monitor_started();

        let (tx, rx) = mpsc::channel(self.config.queue_capacity());
        let this = self.clone();
        tokio::spawn(async move { this.run(tx).await });
        Ok(rx)
    }

    /// Cancels the tick loop. Idempotent: cancelling twice is a no-op.
    pub fn stop(&self) {
        self.cancellation.cancel();
    }

    async fn run(self: Arc<Self>, tx: mpsc::Sender<MonitorOutput>) {
        let start = match self.resolve_start_block().await {
            Ok(n) => n,
            Err(err) => {
                tracing::error!(
                    subscription_id = %self.config.subscription_id,
                    error = %err,
                    "failed to resolve start block, aborting monitor"
                );
                *self.state.lock().await = State::Stopped;
                self.telemetry.monitor_stopped();
                return;
            }
        };
        self.last_processed.store(start, Ordering::SeqCst);
        // Report the resolved starting cursor right away so a caller waiting
        // on the first outbound message sees it before the first tick fires,
        // rather than waiting `poll_interval` for the record to be seeded.
        self.emit(&tx, MonitorOutput::Cursor(start)).await;

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let tick_started = std::time::Instant::now();

            let head = match self.chain.get_now_block().await {
                Ok(block) => block_number(&block),
                Err(err) => {
                    tracing::warn!(
                        subscription_id = %self.config.subscription_id,
                        error = %err,
                        "failed to fetch head block"
                    );
                    continue;
                }
            };

            let mut next = self.last_processed.load(Ordering::SeqCst) + 1;
            while next <= head {
                if self.cancellation.is_cancelled() {
                    break;
                }
                match self.process_block(next, &tx).await {
                    Ok(()) => {
                        self.last_processed.store(next, Ordering::SeqCst);
                        next += 1;
                    }
                    Err(err) => {
                        tracing::warn!(
                            subscription_id = %self.config.subscription_id,
                            block = next,
                            error = %err,
                            "block fetch failed, cursor not advanced"
                        );
                        break;
                    }
                }
            }

            // Report cursor progress every tick, even an empty one: the
            // persisted `current_block` must track the head regardless of
            // whether any block in range produced an event (spec §8
            // scenario 2).
            self.emit(&tx, MonitorOutput::Cursor(self.last_processed.load(Ordering::SeqCst)))
                .await;
            self.telemetry.tick_ms(tick_started.elapsed().as_millis() as u64);
        }

        // Outbound channel is closed exactly once, by dropping the sender
        // here as the loop exits.
        drop(tx);
        *self.state.lock().await = State::Stopped;
        self.telemetry.monitor_stopped();
    }

    async fn resolve_start_block(&self) -> Result<i64> {
        if self.config.start_block <= 0 {
            let head = self.chain.get_now_block().await?;
            Ok(block_number(&head))
        } else {
            Ok(self.config.start_block - 1)
        }
    }

    /// `pub(crate)` so the Subscription Manager can drive it directly for
    /// historical backfill without spinning up a full tick loop.
    pub(crate) async fn process_block(&self, num: i64, tx: &mpsc::Sender<MonitorOutput>) -> Result<()> {
        let block = self.chain.get_block_by_num(num).await?;
        let block_hash = hex::encode(&block.blockid);
        let block_timestamp = block
            .block_header
            .as_ref()
            .and_then(|h| h.raw_data.as_ref())
            .map(|r| r.timestamp)
            .unwrap_or(0);

        let mut summary = self.config.global.then(|| BlockSummary {
            block_number: num,
            block_hash: block_hash.clone(),
            block_timestamp,
            addresses: HashMap::new(),
        });

        for (tx_index, ext) in block.transactions.iter().enumerate() {
            let Some(transaction) = ext.transaction.as_ref() else {
                continue;
            };
            let tx_id = decode::canonical_tx_id(transaction).unwrap_or_else(|_| hex::encode(&ext.txid));
            let addresses = decode::extract_addresses(transaction);

            if let Some(summary) = summary.as_mut() {
                tally_block_summary(summary, transaction, &addresses, &self.token_table);
            }

            let matched = if self.config.global {
                true
            } else {
                addresses.iter().any(|a| a == &self.config.address_hex)
            };
            if !matched {
                continue;
            }

            let tx_info = self.chain.get_tx_info_by_id(&tx_id).await.unwrap_or(None);
            for event in self.build_events(transaction, &tx_id, num, &block_hash, block_timestamp, tx_index, tx_info.as_ref())
            {
                self.emit(tx, MonitorOutput::Event(event)).await;
            }
        }

        if let Some(summary) = summary {
            self.emit(tx, MonitorOutput::Block(summary)).await;
        }

        Ok(())
    }

    /// Non-blocking emission: a full channel drops the item and bumps a
    /// counter rather than ever blocking the poll loop (spec §4.3 step d).
    async fn emit(&self, tx: &mpsc::Sender<MonitorOutput>, output: MonitorOutput) {
        match tx.try_send(output) {
            Ok(()) => self.telemetry.event_emitted(&self.config.subscription_id),
            Err(_) => self.telemetry.event_dropped(&self.config.subscription_id),
        }
    }

    fn build_events(
        &self,
        transaction: &Transaction,
        tx_id: &str,
        block_number: i64,
        block_hash: &str,
        block_timestamp: i64,
        tx_index: usize,
        tx_info: Option<&TransactionInfo>,
    ) -> Vec<AddressEvent> {
        let Some(raw) = transaction.raw_data.as_ref() else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for contract in &raw.contract {
            let Ok(parsed) = decode::parse_contract(contract) else {
                self.telemetry.decode_failure("parse_contract");
                continue;
            };

            let (from, to, amount, contract_type, event_type, asset) =
                transfer_fields(&parsed, &self.token_table);

            // `basic mode` (documented choice, see SPEC_FULL §4.3): a
            // missing tx-info still yields a successful event with no
            // receipt, rather than being suppressed.
            let success = tx_info.map(|info| info.result == 0).unwrap_or(true);
            let data = self.build_data(&parsed, tx_info, &from, &to, &amount, &asset);

            events.push(AddressEvent {
                subscription_id: self.config.subscription_id.clone(),
                block_number,
                block_hash: block_hash.to_string(),
                block_timestamp,
                tx_id: tx_id.to_string(),
                tx_index: tx_index as i64,
                from,
                to,
                amount,
                contract_type,
                success,
                event_type,
                data,
                raw_tx: None,
                raw_tx_info: None,
            });
        }
        events
    }

    fn build_data(
        &self,
        parsed: &decode::ParsedContract,
        tx_info: Option<&TransactionInfo>,
        from: &str,
        to: &str,
        amount: &str,
        asset: &serde_json::Value,
    ) -> serde_json::Value {
        let direction = Direction::classify(&self.config.address_hex, from, to).as_str();
        let logs = tx_info.map(decode::parse_logs).unwrap_or_default();
        let internal = tx_info.map(decode::parse_internal_txs).unwrap_or_default();
        let trc20_transfers = tx_info
            .map(|info| decode::parse_trc20_transfers(info, &self.token_table))
            .unwrap_or_default();
        let (energy_usage, energy_fee, net_usage, net_fee) = tx_info
            .and_then(|info| info.receipt.as_ref())
            .map(|r| (r.energy_usage, r.energy_fee, r.net_usage, r.net_fee))
            .unwrap_or((0, 0, 0, 0));

        let smart_contract = match parsed {
            decode::ParsedContract::TriggerSmartContract { call: Some(call), .. } => {
                Some(smart_contract_json(call))
            }
            _ => None,
        };

        let amount_decimal = asset
            .get("decimals")
            .and_then(|d| d.as_u64())
            .and_then(|decimals| amount.parse::<alloy::primitives::U256>().ok().map(|v| (v, decimals)))
            .map(|(v, decimals)| decode::format_decimal(v, decimals as u8));

        json!({
            "direction": direction,
            "asset": asset,
            "amount_decimal": amount_decimal,
            "logs": logs,
            "internal": internal,
            "trc20_transfers": trc20_transfers,
            "smart_contract": smart_contract,
            "energy_usage": energy_usage,
            "energy_fee": energy_fee,
            "net_usage": net_usage,
            "net_fee": net_fee,
            "operation": operation_json(parsed),
            "permissions": permission_json(parsed),
        })
    }
}

fn block_number(block: &BlockExtention) -> i64 {
    block
        .block_header
        .as_ref()
        .and_then(|h| h.raw_data.as_ref())
        .map(|r| r.number)
        .unwrap_or(0)
}

fn decoded_call_info(call: &decode::DecodedCall) -> DecodedCall {
    match call {
        decode::DecodedCall::Trc20Transfer { to, amount } => DecodedCall {
            method_id: "a9059cbb".to_string(),
            method_name: "transfer(address,uint256)".to_string(),
            addresses: vec![to.clone()],
            amount: Some(amount.clone()),
            parameters: json!({}),
        },
        decode::DecodedCall::Trc20TransferFrom { from, to, amount } => DecodedCall {
            method_id: "23b872dd".to_string(),
            method_name: "transferFrom(address,address,uint256)".to_string(),
            addresses: vec![from.clone(), to.clone()],
            amount: Some(amount.clone()),
            parameters: json!({}),
        },
        decode::DecodedCall::Trc20Approve { spender, amount } => DecodedCall {
            method_id: "095ea7b3".to_string(),
            method_name: "approve(address,uint256)".to_string(),
            addresses: vec![spender.clone()],
            amount: Some(amount.clone()),
            parameters: json!({}),
        },
        decode::DecodedCall::Trc20BalanceOf { owner } => DecodedCall {
            method_id: "70a08231".to_string(),
            method_name: "balanceOf(address)".to_string(),
            addresses: vec![owner.clone()],
            amount: None,
            parameters: json!({}),
        },
        decode::DecodedCall::Trc20Allowance { owner, spender } => DecodedCall {
            method_id: "dd62ed3e".to_string(),
            method_name: "allowance(address,address)".to_string(),
            addresses: vec![owner.clone(), spender.clone()],
            amount: None,
            parameters: json!({}),
        },
        decode::DecodedCall::Trc20TotalSupply => DecodedCall {
            method_id: "18160ddd".to_string(),
            method_name: "totalSupply()".to_string(),
            addresses: vec![],
            amount: None,
            parameters: json!({}),
        },
        decode::DecodedCall::Labeled { label, raw } => DecodedCall {
            method_id: String::new(),
            method_name: label.clone(),
            addresses: vec![],
            amount: None,
            parameters: json!({"raw": raw}),
        },
        decode::DecodedCall::Other { selector, raw } => DecodedCall {
            method_id: selector.trim_start_matches("0x").to_string(),
            method_name: selector.clone(),
            addresses: vec![],
            amount: None,
            parameters: json!({"raw": raw}),
        },
    }
}

fn smart_contract_json(call: &decode::DecodedCall) -> serde_json::Value {
    serde_json::to_value(decoded_call_info(call)).unwrap_or(serde_json::Value::Null)
}

fn operation_json(parsed: &decode::ParsedContract) -> Option<serde_json::Value> {
    match parsed {
        decode::ParsedContract::FreezeBalanceV2 { frozen_balance, resource, .. } => {
            Some(json!({"frozen_balance": frozen_balance, "resource": resource}))
        }
        decode::ParsedContract::UnfreezeBalanceV2 { unfreeze_balance, resource, .. } => {
            Some(json!({"unfreeze_balance": unfreeze_balance, "resource": resource}))
        }
        decode::ParsedContract::WithdrawExpireUnfreeze { .. } => Some(json!({})),
        decode::ParsedContract::DelegateResource {
            receiver_address,
            balance,
            resource,
            lock,
            ..
        } => Some(json!({
            "receiver_address": receiver_address,
            "balance": balance,
            "resource": resource,
            "lock": lock,
        })),
        decode::ParsedContract::UnDelegateResource {
            receiver_address,
            balance,
            resource,
            ..
        } => Some(json!({
            "receiver_address": receiver_address,
            "balance": balance,
            "resource": resource,
        })),
        decode::ParsedContract::VoteWitness { votes, .. } => Some(json!({ "votes": votes })),
        _ => None,
    }
}

fn permission_json(parsed: &decode::ParsedContract) -> Option<serde_json::Value> {
    match parsed {
        decode::ParsedContract::AccountPermissionUpdate {
            owner,
            witness,
            actives,
            ..
        } => Some(json!({
            "before": serde_json::Value::Null,
            "after": {
                "owner": owner,
                "witness": witness,
                "actives": actives,
            },
        })),
        _ => None,
    }
}

/// Maps a parsed contract to the `(from, to, amount, contract_type,
/// event_type, asset)` tuple used for webhook payload shaping and filters.
fn transfer_fields(
    parsed: &decode::ParsedContract,
    table: &Trc20TokenTable,
) -> (String, String, String, String, String, serde_json::Value) {
    match parsed {
        decode::ParsedContract::Transfer {
            owner_address,
            to_address,
            amount,
        } => (
            owner_address.clone(),
            to_address.clone(),
            amount.clone(),
            "TransferContract".to_string(),
            "trx_transfer".to_string(),
            json!({"type": "TRX", "symbol": "TRX", "id": null, "decimals": 6}),
        ),
        decode::ParsedContract::TransferAsset {
            asset_name,
            owner_address,
            to_address,
            amount,
        } => (
            owner_address.clone(),
            to_address.clone(),
            amount.clone(),
            "TransferAssetContract".to_string(),
            "trc10_transfer".to_string(),
            json!({"type": "TRC10", "symbol": asset_name, "id": asset_name, "decimals": 0}),
        ),
        decode::ParsedContract::TriggerSmartContract {
            owner_address,
            contract_address,
            call,
            ..
        } => {
            let (to, amount) = match call {
                Some(decode::DecodedCall::Trc20Transfer { to, amount }) => (to.clone(), amount.clone()),
                Some(decode::DecodedCall::Trc20TransferFrom { to, amount, .. }) => (to.clone(), amount.clone()),
                _ => (contract_address.clone(), "0".to_string()),
            };
            let token = table.lookup(contract_address);
            let asset = json!({
                "type": "TRC20",
                "symbol": token.map(|t| t.symbol.clone()).unwrap_or_else(|| "TRC20".to_string()),
                "id": contract_address,
                "decimals": token.map(|t| t.decimals).unwrap_or(18),
            });
            let event_type = match call {
                Some(decode::DecodedCall::Trc20Transfer { .. })
                | Some(decode::DecodedCall::Trc20TransferFrom { .. }) => "trc20_transfer",
                _ => "smart_contract_call",
            };
            (
                owner_address.clone(),
                to,
                amount,
                "TriggerSmartContract".to_string(),
                event_type.to_string(),
                asset,
            )
        }
        decode::ParsedContract::FreezeBalanceV2 { owner_address, .. } => (
            owner_address.clone(),
            String::new(),
            "0".to_string(),
            "FreezeBalanceV2Contract".to_string(),
            "freeze_balance".to_string(),
            json!({"type": "TRX", "symbol": "TRX", "id": null, "decimals": 6}),
        ),
        decode::ParsedContract::UnfreezeBalanceV2 { owner_address, .. } => (
            owner_address.clone(),
            String::new(),
            "0".to_string(),
            "UnfreezeBalanceV2Contract".to_string(),
            "unfreeze_balance".to_string(),
            json!({"type": "TRX", "symbol": "TRX", "id": null, "decimals": 6}),
        ),
        decode::ParsedContract::WithdrawExpireUnfreeze { owner_address } => (
            owner_address.clone(),
            String::new(),
            "0".to_string(),
            "WithdrawExpireUnfreezeContract".to_string(),
            "withdraw_expire_unfreeze".to_string(),
            json!({"type": "TRX", "symbol": "TRX", "id": null, "decimals": 6}),
        ),
        decode::ParsedContract::DelegateResource {
            owner_address,
            receiver_address,
            balance,
            ..
        } => (
            owner_address.clone(),
            receiver_address.clone(),
            balance.clone(),
            "DelegateResourceContract".to_string(),
            "delegate_resource".to_string(),
            json!({"type": "TRX", "symbol": "TRX", "id": null, "decimals": 6}),
        ),
        decode::ParsedContract::UnDelegateResource {
            owner_address,
            receiver_address,
            balance,
            ..
        } => (
            owner_address.clone(),
            receiver_address.clone(),
            balance.clone(),
            "UnDelegateResourceContract".to_string(),
            "undelegate_resource".to_string(),
            json!({"type": "TRX", "symbol": "TRX", "id": null, "decimals": 6}),
        ),
        decode::ParsedContract::VoteWitness { owner_address, .. } => (
            owner_address.clone(),
            String::new(),
            "0".to_string(),
            "VoteWitnessContract".to_string(),
            "vote_witness".to_string(),
            json!({"type": "TRX", "symbol": "TRX", "id": null, "decimals": 6}),
        ),
        decode::ParsedContract::CreateSmartContract {
            owner_address,
            contract_address,
            ..
        } => (
            owner_address.clone(),
            contract_address.clone(),
            "0".to_string(),
            "CreateSmartContract".to_string(),
            "create_smart_contract".to_string(),
            json!({"type": "TRX", "symbol": "TRX", "id": null, "decimals": 6}),
        ),
        decode::ParsedContract::AccountPermissionUpdate { owner_address, .. } => (
            owner_address.clone(),
            owner_address.clone(),
            "0".to_string(),
            "AccountPermissionUpdateContract".to_string(),
            "permission_update".to_string(),
            json!({"type": "TRX", "symbol": "TRX", "id": null, "decimals": 6}),
        ),
        decode::ParsedContract::Other { contract_type } => (
            String::new(),
            String::new(),
            "0".to_string(),
            format!("Unknown({contract_type})"),
            "unknown".to_string(),
            json!({"type": "TRX", "symbol": "TRX", "id": null, "decimals": 6}),
        ),
    }
}

fn tally_block_summary(
    summary: &mut BlockSummary,
    transaction: &Transaction,
    addresses: &[String],
    table: &Trc20TokenTable,
) {
    let Some(raw) = transaction.raw_data.as_ref() else {
        return;
    };
    for contract in &raw.contract {
        let type_tag = contract.r#type.to_string();
        let (from, to) = decode::parse_contract(contract)
            .map(|parsed| {
                let (from, to, ..) = transfer_fields(&parsed, table);
                (from, to)
            })
            .unwrap_or_default();
        for addr in addresses {
            let activity = summary.addresses.entry(addr.clone()).or_insert_with(AddressActivity::default);
            activity.contract_types.insert(type_tag.clone());
            activity.tx_count += 1;
            if contract.r#type == 31 {
                activity.contract_calls += 1;
            }
            if addr == &to {
                activity.incoming += 1;
            }
            if addr == &from {
                activity.outgoing += 1;
            }
            for other in addresses {
                if other != addr {
                    activity.interactions.push(other.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::fake::FakeChainClient;
    use tron::protocol::transaction::Raw as TxRaw;
    use tron::protocol::transaction::{Contract, ContractType};
    use tron::protocol::{BlockHeader, TransferContract};

    fn make_block(number: i64, tx: Option<(Vec<u8>, Transaction)>) -> BlockExtention {
        let header = BlockHeader {
            raw_data: Some(tron::protocol::block_header::Raw {
                timestamp: 1_700_000_000_000,
                number,
                ..Default::default()
            }),
            witness_signature: Vec::new(),
        };
        let transactions = tx
            .into_iter()
            .map(|(txid, transaction)| tron::protocol::block_extention::TransactionExtention {
                transaction: Some(transaction),
                txid,
            })
            .collect();
        BlockExtention {
            transactions,
            block_header: Some(header),
            blockid: vec![0xAB; 32],
        }
    }

    fn transfer_tx(owner: [u8; 21], to: [u8; 21], amount: i64) -> Transaction {
        let contract_bytes = TransferContract {
            owner_address: owner.to_vec(),
            to_address: to.to_vec(),
            amount,
        };
        use prost::Message;
        let contract = Contract {
            r#type: ContractType::TransferContract as i32,
            parameter: Some(prost_types::Any {
                type_url: "type.googleapis.com/protocol.TransferContract".to_string(),
                value: contract_bytes.encode_to_vec(),
            }),
            provider: Vec::new(),
            contract_name: Vec::new(),
            permission_id: 0,
        };
        Transaction {
            raw_data: Some(TxRaw {
                ref_block_bytes: Vec::new(),
                ref_block_num: 0,
                ref_block_hash: Vec::new(),
                expiration: 0,
                contract: vec![contract],
                data: Vec::new(),
                timestamp: 0,
                fee_limit: 0,
            }),
            signature: Vec::new(),
            ret: Vec::new(),
        }
    }

    fn watched_address() -> [u8; 21] {
        let mut a = [0x41u8; 21];
        a[0] = 0x41;
        a
    }

    #[tokio::test]
    async fn start_from_head_with_no_matching_tx_advances_cursor_without_events() {
        let chain = Arc::new(FakeChainClient::new());
        chain.set_head(1000);
        chain.insert_block(1000, make_block(1000, None));

        let watched = watched_address();
        let config = MonitorConfig {
            subscription_id: "sub1".to_string(),
            address_hex: format!("0x{}", hex::encode(watched)),
            global: false,
            start_block: 0,
            poll_interval: Duration::from_millis(10),
        };
        let monitor = Arc::new(AddressMonitor::new(
            config,
            chain.clone(),
            Arc::new(MonitorTelemetry::new()),
            Arc::new(Trc20TokenTable::new()),
            &CancellationToken::new(),
        ));
        let mut rx = monitor.clone().start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(monitor.current_block(), 1000);
        // Every message on the channel so far must be a cursor report, not an
        // event: the block had no matching transaction.
        while let Ok(output) = rx.try_recv() {
            match output {
                MonitorOutput::Cursor(n) => assert_eq!(n, 1000),
                other => panic!("expected only cursor reports, got {other:?}"),
            }
        }
        monitor.stop();
        let _ = tokio::time::timeout(STOP_GRACE_PERIOD, async { while rx.recv().await.is_some() {} }).await;
    }

    #[tokio::test]
    async fn failed_block_fetch_does_not_advance_cursor() {
        let chain = Arc::new(FakeChainClient::new());
        chain.set_head(2);
        chain.fail_block(1);
        chain.insert_block(2, make_block(2, None));

        let config = MonitorConfig {
            subscription_id: "sub1".to_string(),
            address_hex: "0x41aa".to_string(),
            global: false,
            start_block: 1,
            poll_interval: Duration::from_millis(10),
        };
        let monitor = Arc::new(AddressMonitor::new(
            config,
            chain,
            Arc::new(MonitorTelemetry::new()),
            Arc::new(Trc20TokenTable::new()),
            &CancellationToken::new(),
        ));
        let _rx = monitor.clone().start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(monitor.current_block(), 0);
        monitor.stop();
    }

    #[tokio::test]
    async fn second_start_call_fails() {
        let chain = Arc::new(FakeChainClient::new());
        chain.set_head(1);
        let config = MonitorConfig {
            subscription_id: "sub1".to_string(),
            address_hex: "0x41aa".to_string(),
            global: false,
            start_block: 1,
            poll_interval: Duration::from_secs(3),
        };
        let monitor = Arc::new(AddressMonitor::new(
            config,
            chain,
            Arc::new(MonitorTelemetry::new()),
            Arc::new(Trc20TokenTable::new()),
            &CancellationToken::new(),
        ));
        let _rx = monitor.clone().start().await.unwrap();
        assert!(monitor.clone().start().await.is_err());
        monitor.stop();
    }

    #[tokio::test]
    async fn matching_tx_emits_event_with_watched_address() {
        let owner = watched_address();
        let mut to = [0x41u8; 21];
        to[1] = 0x99;
        let chain = Arc::new(FakeChainClient::new());
        chain.set_head(5);
        chain.insert_block(5, make_block(5, Some((vec![0x01; 32], transfer_tx(owner, to, 1_000_000)))));

        let config = MonitorConfig {
            subscription_id: "sub1".to_string(),
            address_hex: format!("0x{}", hex::encode(owner)),
            global: false,
            start_block: 5,
            poll_interval: Duration::from_millis(10),
        };
        let monitor = Arc::new(AddressMonitor::new(
            config,
            chain,
            Arc::new(MonitorTelemetry::new()),
            Arc::new(Trc20TokenTable::new()),
            &CancellationToken::new(),
        ));
        let mut rx = monitor.clone().start().await.unwrap();
        let event = loop {
            let output = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            match output {
                MonitorOutput::Event(event) => break event,
                MonitorOutput::Cursor(_) => continue,
                MonitorOutput::Block(_) => panic!("expected an event, not a block summary"),
            }
        };
        assert_eq!(event.contract_type, "TransferContract");
        assert_eq!(event.amount, "1000000");
        assert!(event.success);
        monitor.stop();
    }
}
