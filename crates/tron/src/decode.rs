use alloy::primitives::U256;
use anyhow::{Context, Result};
use prost::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::address::{addr_bytes_to_hex, sha256};
use crate::protocol::transaction::Contract as RawContract;
use crate::protocol::transaction::ContractType as RawContractType;
use crate::protocol::{
    AccountPermissionUpdateContract, CreateSmartContract, DelegateResourceContract,
    FreezeBalanceV2Contract, Permission, Transaction, TransactionInfo, TransferAssetContract,
    TransferContract, TriggerSmartContract, UnDelegateResourceContract, UnfreezeBalanceV2Contract,
    VoteWitnessContract, WithdrawExpireUnfreezeContract,
};

const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
const TRANSFER_FROM_SELECTOR: [u8; 4] = [0x23, 0xb8, 0x72, 0xdd];

// Curated signatures beyond the two mandatory TRC20 transfer methods. Method
// ids are keccak256(signature)[..4], identical to Ethereum ABI selectors
// since Tron smart contracts run EVM-compatible bytecode. Any selector not
// listed here passes through as `0x<hex>` (spec "decode_call").
const APPROVE_SELECTOR: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
const ALLOWANCE_SELECTOR: [u8; 4] = [0xdd, 0x62, 0xed, 0x3e];
const TOTAL_SUPPLY_SELECTOR: [u8; 4] = [0x18, 0x16, 0x0d, 0xdd];
const SWAP_EXACT_TOKENS_SELECTOR: [u8; 4] = [0x38, 0xed, 0x17, 0x39];
const ADD_LIQUIDITY_SELECTOR: [u8; 4] = [0xe8, 0xe3, 0x37, 0x00];
const REMOVE_LIQUIDITY_SELECTOR: [u8; 4] = [0xba, 0xa2, 0xab, 0xde];
const STAKE_SELECTOR: [u8; 4] = [0xa6, 0x94, 0xfc, 0x3a];
const WITHDRAW_SELECTOR: [u8; 4] = [0x2e, 0x1a, 0x7d, 0x4d];
const DEPOSIT_SELECTOR: [u8; 4] = [0xd0, 0xe3, 0x0d, 0xb0];

/// Closed set of contract variants this repository decodes. A tagged-variant
/// enum stands in for Tron's runtime `ContractType` dispatch so downstream
/// consumers match exhaustively instead of re-inspecting a type tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "contract_type", content = "params")]
pub enum ParsedContract {
    Transfer {
        owner_address: String,
        to_address: String,
        amount: String,
    },
    TransferAsset {
        asset_name: String,
        owner_address: String,
        to_address: String,
        amount: String,
    },
    TriggerSmartContract {
        owner_address: String,
        contract_address: String,
        call_value: String,
        call_token_value: String,
        token_id: i64,
        call: Option<DecodedCall>,
    },
    CreateSmartContract {
        owner_address: String,
        contract_address: String,
        name: String,
    },
    FreezeBalanceV2 {
        owner_address: String,
        frozen_balance: String,
        resource: i32,
    },
    UnfreezeBalanceV2 {
        owner_address: String,
        unfreeze_balance: String,
        resource: i32,
    },
    WithdrawExpireUnfreeze {
        owner_address: String,
    },
    DelegateResource {
        owner_address: String,
        receiver_address: String,
        balance: String,
        resource: i32,
        lock: bool,
    },
    UnDelegateResource {
        owner_address: String,
        receiver_address: String,
        balance: String,
        resource: i32,
    },
    VoteWitness {
        owner_address: String,
        votes: Vec<(String, String)>,
    },
    AccountPermissionUpdate {
        owner_address: String,
        owner: Option<PermissionInfo>,
        witness: Option<PermissionInfo>,
        actives: Vec<PermissionInfo>,
    },
    /// Any contract type this crate recognizes by tag but does not need to
    /// decode further. Never an error: unknown/irrelevant contract types are
    /// skipped, not rejected.
    Other {
        contract_type: i32,
    },
}

/// A recognized ABI-encoded call inside a `TriggerSmartContract` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method")]
pub enum DecodedCall {
    Trc20Transfer { to: String, amount: String },
    Trc20TransferFrom { from: String, to: String, amount: String },
    Trc20Approve { spender: String, amount: String },
    Trc20BalanceOf { owner: String },
    Trc20Allowance { owner: String, spender: String },
    Trc20TotalSupply,
    /// Recognized by selector but not positionally decoded: swap/liquidity/
    /// stake-family methods whose ABI shape varies too much between router
    /// contracts to decode generically. `label` is the method name, `raw` is
    /// the undecoded parameter payload as hex.
    Labeled { label: String, raw: String },
    /// Any other 4-byte selector, passed through verbatim.
    Other { selector: String, raw: String },
}

/// One node of an `AccountPermissionUpdateContract`'s owner/witness/actives
/// tree: the signing threshold plus the weighted key set that must meet it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionInfo {
    pub permission_name: String,
    pub threshold: i64,
    pub keys: Vec<PermissionKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionKey {
    pub address: String,
    pub weight: i64,
}

impl From<&Permission> for PermissionInfo {
    fn from(p: &Permission) -> Self {
        PermissionInfo {
            permission_name: p.permission_name.clone(),
            threshold: p.threshold,
            keys: p
                .keys
                .iter()
                .map(|k| PermissionKey {
                    address: addr_bytes_to_hex(&k.address),
                    weight: k.weight,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InternalTx {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub rejected: bool,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trc20Transfer {
    pub token_contract: String,
    pub from: String,
    pub to: String,
    pub raw_amount: String,
    pub decimal_amount: Option<String>,
    pub symbol: Option<String>,
}

/// Canonical transaction id: SHA-256 of the serialized raw transaction body.
pub fn canonical_tx_id(tx: &Transaction) -> Result<String> {
    let raw = tx
        .raw_data
        .as_ref()
        .context("transaction missing raw_data")?;
    let bytes = raw.encode_to_vec();
    Ok(hex::encode(sha256(&bytes)))
}

/// Every address referenced by a transaction's contracts, for subscription
/// address-filter matching. Returned in hex form (empty fields are skipped).
pub fn extract_addresses(tx: &Transaction) -> Vec<String> {
    let mut out = Vec::new();
    let Some(raw) = tx.raw_data.as_ref() else {
        return out;
    };
    for contract in &raw.contract {
        if let Ok(parsed) = parse_contract(contract) {
            collect_addresses(&parsed, &mut out);
        }
    }
    out.retain(|a| !a.is_empty());
    out.dedup();
    out
}

fn collect_addresses(parsed: &ParsedContract, out: &mut Vec<String>) {
    match parsed {
        ParsedContract::Transfer {
            owner_address,
            to_address,
            ..
        } => {
            out.push(owner_address.clone());
            out.push(to_address.clone());
        }
        ParsedContract::TransferAsset {
            owner_address,
            to_address,
            ..
        } => {
            out.push(owner_address.clone());
            out.push(to_address.clone());
        }
        ParsedContract::TriggerSmartContract {
            owner_address,
            contract_address,
            call,
            ..
        } => {
            out.push(owner_address.clone());
            out.push(contract_address.clone());
            match call {
                Some(DecodedCall::Trc20Transfer { to, .. }) => out.push(to.clone()),
                Some(DecodedCall::Trc20TransferFrom { from, to, .. }) => {
                    out.push(from.clone());
                    out.push(to.clone());
                }
                Some(DecodedCall::Trc20Approve { spender, .. }) => out.push(spender.clone()),
                Some(DecodedCall::Trc20BalanceOf { owner }) => out.push(owner.clone()),
                Some(DecodedCall::Trc20Allowance { owner, spender }) => {
                    out.push(owner.clone());
                    out.push(spender.clone());
                }
                Some(DecodedCall::Trc20TotalSupply)
                | Some(DecodedCall::Labeled { .. })
                | Some(DecodedCall::Other { .. })
                | None => {}
            }
        }
        ParsedContract::CreateSmartContract {
            owner_address,
            contract_address,
            ..
        } => {
            out.push(owner_address.clone());
            out.push(contract_address.clone());
        }
        ParsedContract::FreezeBalanceV2 { owner_address, .. }
        | ParsedContract::UnfreezeBalanceV2 { owner_address, .. }
        | ParsedContract::WithdrawExpireUnfreeze { owner_address }
        | ParsedContract::AccountPermissionUpdate { owner_address, .. } => {
            out.push(owner_address.clone());
        }
        ParsedContract::VoteWitness { owner_address, votes } => {
            out.push(owner_address.clone());
            out.extend(votes.iter().map(|(addr, _)| addr.clone()));
        }
        ParsedContract::DelegateResource {
            owner_address,
            receiver_address,
            ..
        }
        | ParsedContract::UnDelegateResource {
            owner_address,
            receiver_address,
            ..
        } => {
            out.push(owner_address.clone());
            out.push(receiver_address.clone());
        }
        ParsedContract::Other { .. } => {}
    }
}

/// Decodes one contract from a transaction's `raw_data.contract` list. Never
/// fails on an unrecognized contract type; falls back to `ParsedContract::Other`.
pub fn parse_contract(contract: &RawContract) -> Result<ParsedContract> {
    let any = contract
        .parameter
        .as_ref()
        .context("contract missing parameter")?;
    let contract_type = contract.r#type;

    macro_rules! decode_as {
        ($ty:ty) => {
            <$ty>::decode(any.value.as_slice()).context("failed to decode contract parameter")?
        };
    }

    let parsed = match RawContractType::try_from(contract_type) {
        Ok(RawContractType::TransferContract) => {
            let c: TransferContract = decode_as!(TransferContract);
            ParsedContract::Transfer {
                owner_address: addr_bytes_to_hex(&c.owner_address),
                to_address: addr_bytes_to_hex(&c.to_address),
                amount: c.amount.to_string(),
            }
        }
        Ok(RawContractType::TransferAssetContract) => {
            let c: TransferAssetContract = decode_as!(TransferAssetContract);
            ParsedContract::TransferAsset {
                asset_name: String::from_utf8_lossy(&c.asset_name).into_owned(),
                owner_address: addr_bytes_to_hex(&c.owner_address),
                to_address: addr_bytes_to_hex(&c.to_address),
                amount: c.amount.to_string(),
            }
        }
        Ok(RawContractType::TriggerSmartContract) => {
            let c: TriggerSmartContract = decode_as!(TriggerSmartContract);
            let call = decode_call(&c.data);
            ParsedContract::TriggerSmartContract {
                owner_address: addr_bytes_to_hex(&c.owner_address),
                contract_address: addr_bytes_to_hex(&c.contract_address),
                call_value: c.call_value.to_string(),
                call_token_value: c.call_token_value.to_string(),
                token_id: c.token_id,
                call,
            }
        }
        Ok(RawContractType::CreateSmartContract) => {
            let c: CreateSmartContract = decode_as!(CreateSmartContract);
            let new_contract = c.new_contract.unwrap_or_default();
            ParsedContract::CreateSmartContract {
                owner_address: addr_bytes_to_hex(&c.owner_address),
                contract_address: addr_bytes_to_hex(&new_contract.contract_address),
                name: new_contract.name,
            }
        }
        Ok(RawContractType::FreezeBalanceV2Contract) => {
            let c: FreezeBalanceV2Contract = decode_as!(FreezeBalanceV2Contract);
            ParsedContract::FreezeBalanceV2 {
                owner_address: addr_bytes_to_hex(&c.owner_address),
                frozen_balance: c.frozen_balance.to_string(),
                resource: c.resource,
            }
        }
        Ok(RawContractType::UnfreezeBalanceV2Contract) => {
            let c: UnfreezeBalanceV2Contract = decode_as!(UnfreezeBalanceV2Contract);
            ParsedContract::UnfreezeBalanceV2 {
                owner_address: addr_bytes_to_hex(&c.owner_address),
                unfreeze_balance: c.unfreeze_balance.to_string(),
                resource: c.resource,
            }
        }
        Ok(RawContractType::WithdrawExpireUnfreezeContract) => {
            let c: WithdrawExpireUnfreezeContract = decode_as!(WithdrawExpireUnfreezeContract);
            ParsedContract::WithdrawExpireUnfreeze {
                owner_address: addr_bytes_to_hex(&c.owner_address),
            }
        }
        Ok(RawContractType::DelegateResourceContract) => {
            let c: DelegateResourceContract = decode_as!(DelegateResourceContract);
            ParsedContract::DelegateResource {
                owner_address: addr_bytes_to_hex(&c.owner_address),
                receiver_address: addr_bytes_to_hex(&c.receiver_address),
                balance: c.balance.to_string(),
                resource: c.resource,
                lock: c.lock,
            }
        }
        Ok(RawContractType::UnDelegateResourceContract) => {
            let c: UnDelegateResourceContract = decode_as!(UnDelegateResourceContract);
            ParsedContract::UnDelegateResource {
                owner_address: addr_bytes_to_hex(&c.owner_address),
                receiver_address: addr_bytes_to_hex(&c.receiver_address),
                balance: c.balance.to_string(),
                resource: c.resource,
            }
        }
        Ok(RawContractType::VoteWitnessContract) => {
            let c: VoteWitnessContract = decode_as!(VoteWitnessContract);
            ParsedContract::VoteWitness {
                owner_address: addr_bytes_to_hex(&c.owner_address),
                votes: c
                    .votes
                    .iter()
                    .map(|v| (addr_bytes_to_hex(&v.vote_address), v.vote_count.to_string()))
                    .collect(),
            }
        }
        Ok(RawContractType::AccountPermissionUpdateContract) => {
            let c: AccountPermissionUpdateContract = decode_as!(AccountPermissionUpdateContract);
            ParsedContract::AccountPermissionUpdate {
                owner_address: addr_bytes_to_hex(&c.owner_address),
                owner: c.owner.as_ref().map(PermissionInfo::from),
                witness: c.witness.as_ref().map(PermissionInfo::from),
                actives: c.actives.iter().map(PermissionInfo::from).collect(),
            }
        }
        _ => ParsedContract::Other { contract_type },
    };
    Ok(parsed)
}

/// Decodes a `TriggerSmartContract` payload's method selector against the
/// curated signature table. `transfer`/`transferFrom`/`approve`/`balanceOf`/
/// `allowance` are positionally decoded; swap/liquidity/stake-family methods
/// are recognized by name only (`DecodedCall::Labeled`); anything else passes
/// through as `DecodedCall::Other` with its raw hex selector. Returns `None`
/// only when the payload is too short to carry a selector at all.
pub fn decode_call(data: &[u8]) -> Option<DecodedCall> {
    if data.len() < 4 {
        return None;
    }
    let selector: [u8; 4] = data[0..4].try_into().ok()?;
    let params = &data[4..];

    match selector {
        TRANSFER_SELECTOR if params.len() >= 64 => {
            let to = addr_word_to_hex(&params[0..32])?;
            let amount = U256::from_be_slice(&params[32..64]);
            Some(DecodedCall::Trc20Transfer {
                to,
                amount: amount.to_string(),
            })
        }
        TRANSFER_FROM_SELECTOR if params.len() >= 96 => {
            let from = addr_word_to_hex(&params[0..32])?;
            let to = addr_word_to_hex(&params[32..64])?;
            let amount = U256::from_be_slice(&params[64..96]);
            Some(DecodedCall::Trc20TransferFrom {
                from,
                to,
                amount: amount.to_string(),
            })
        }
        APPROVE_SELECTOR if params.len() >= 64 => {
            let spender = addr_word_to_hex(&params[0..32])?;
            let amount = U256::from_be_slice(&params[32..64]);
            Some(DecodedCall::Trc20Approve {
                spender,
                amount: amount.to_string(),
            })
        }
        BALANCE_OF_SELECTOR if params.len() >= 32 => {
            let owner = addr_word_to_hex(&params[0..32])?;
            Some(DecodedCall::Trc20BalanceOf { owner })
        }
        ALLOWANCE_SELECTOR if params.len() >= 64 => {
            let owner = addr_word_to_hex(&params[0..32])?;
            let spender = addr_word_to_hex(&params[32..64])?;
            Some(DecodedCall::Trc20Allowance { owner, spender })
        }
        TOTAL_SUPPLY_SELECTOR => Some(DecodedCall::Trc20TotalSupply),
        SWAP_EXACT_TOKENS_SELECTOR => Some(DecodedCall::Labeled {
            label: "swapExactTokensForTokens".to_string(),
            raw: hex::encode(params),
        }),
        ADD_LIQUIDITY_SELECTOR => Some(DecodedCall::Labeled {
            label: "addLiquidity".to_string(),
            raw: hex::encode(params),
        }),
        REMOVE_LIQUIDITY_SELECTOR => Some(DecodedCall::Labeled {
            label: "removeLiquidity".to_string(),
            raw: hex::encode(params),
        }),
        STAKE_SELECTOR => Some(DecodedCall::Labeled {
            label: "stake".to_string(),
            raw: hex::encode(params),
        }),
        WITHDRAW_SELECTOR => Some(DecodedCall::Labeled {
            label: "withdraw".to_string(),
            raw: hex::encode(params),
        }),
        DEPOSIT_SELECTOR => Some(DecodedCall::Labeled {
            label: "deposit".to_string(),
            raw: hex::encode(params),
        }),
        other => Some(DecodedCall::Other {
            selector: format!("0x{}", hex::encode(other)),
            raw: hex::encode(params),
        }),
    }
}

/// An ABI `address` parameter is a 32-byte word with the 20-byte account id
/// right-aligned; Tron addresses additionally carry the `0x41` chain prefix
/// that the EVM-style ABI encoding never includes.
fn addr_word_to_hex(word: &[u8]) -> Option<String> {
    if word.len() != 32 || word[..12].iter().any(|b| *b != 0) {
        return None;
    }
    Some(addr_bytes_to_hex(&word[12..32]))
}

pub fn parse_logs(info: &TransactionInfo) -> Vec<LogEntry> {
    info.log
        .iter()
        .map(|log| LogEntry {
            address: addr_bytes_to_hex(&log.address),
            topics: log.topics.iter().map(hex::encode).collect(),
            data: hex::encode(&log.data),
        })
        .collect()
}

pub fn parse_internal_txs(info: &TransactionInfo) -> Vec<InternalTx> {
    info.internal_transactions
        .iter()
        .map(|itx| {
            let value: i64 = itx.call_value_info.iter().map(|c| c.call_value).sum();
            InternalTx {
                hash: hex::encode(&itx.hash),
                from: addr_bytes_to_hex(&itx.caller_address),
                to: addr_bytes_to_hex(&itx.transfer_to_address),
                value: value.to_string(),
                rejected: itx.rejected,
                note: String::from_utf8_lossy(&itx.note).into_owned(),
            }
        })
        .collect()
}

/// The ERC20 `Transfer(address,address,uint256)` event topic, keccak256 of
/// the event signature. Logged by every TRC20-compatible token contract.
const TRANSFER_EVENT_TOPIC: &str =
    "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Extracts TRC20 `Transfer` events from a transaction's logs, using the
/// supplied token table for symbol/decimals formatting. A contract absent
/// from the table still yields a transfer record, defaulting to the generic
/// `{TRC20, 18 decimals}` shape rather than being dropped (matches
/// `transfer_fields`'s unknown-token default).
pub fn parse_trc20_transfers(info: &TransactionInfo, table: &Trc20TokenTable) -> Vec<Trc20Transfer> {
    info.log
        .iter()
        .filter_map(|log| {
            let topic0 = log.topics.first()?;
            if hex::encode(topic0) != TRANSFER_EVENT_TOPIC {
                return None;
            }
            if log.topics.len() < 3 || log.data.len() < 32 {
                return None;
            }
            let from = addr_word_to_hex(&log.topics[1])?;
            let to = addr_word_to_hex(&log.topics[2])?;
            let raw_amount = U256::from_be_slice(&log.data[log.data.len() - 32..]);
            let token_contract = addr_bytes_to_hex(&log.address);
            let token = table.lookup(&token_contract);
            let decimals = token.map(|t| t.decimals).unwrap_or(18);
            let symbol = token.map(|t| t.symbol.clone()).unwrap_or_else(|| "TRC20".to_string());
            Some(Trc20Transfer {
                token_contract,
                from,
                to,
                raw_amount: raw_amount.to_string(),
                decimal_amount: Some(format_decimal(raw_amount, decimals)),
                symbol: Some(symbol),
            })
        })
        .collect()
}

/// Formats a raw integer amount at `decimals` fixed-point precision, trimming
/// trailing zeroes and a trailing decimal point.
pub fn format_decimal(raw: U256, decimals: u8) -> String {
    if decimals == 0 {
        return raw.to_string();
    }
    let s = raw.to_string();
    let decimals = decimals as usize;
    let padded = if s.len() <= decimals {
        format!("{:0>width$}", s, width = decimals + 1)
    } else {
        s
    };
    let split_at = padded.len() - decimals;
    let (int_part, frac_part) = padded.split_at(split_at);
    let frac_trimmed = frac_part.trim_end_matches('0');
    if frac_trimmed.is_empty() {
        int_part.to_string()
    } else {
        format!("{int_part}.{frac_trimmed}")
    }
}

#[derive(Debug, Clone)]
pub struct Trc20Token {
    pub symbol: String,
    pub decimals: u8,
}

/// Contract-address → symbol/decimals table for TRC20 amount formatting.
/// Ships with a small curated set of well-known tokens and accepts overrides
/// so a deployment is never locked into an 18-decimals-only assumption.
#[derive(Debug, Clone, Default)]
pub struct Trc20TokenTable {
    entries: HashMap<String, Trc20Token>,
}

impl Trc20TokenTable {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        // USDT (TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t in base58, hex below).
        entries.insert(
            "0x41a614f803b6fd780986a42c78ec9c7f77e6ded13c".to_string(),
            Trc20Token {
                symbol: "USDT".to_string(),
                decimals: 6,
            },
        );
        Self { entries }
    }

    pub fn with_overrides(overrides: impl IntoIterator<Item = (String, Trc20Token)>) -> Self {
        let mut table = Self::new();
        for (addr, token) in overrides {
            table.entries.insert(addr, token);
        }
        table
    }

    pub fn lookup(&self, contract_hex: &str) -> Option<&Trc20Token> {
        self.entries.get(contract_hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_trc20_transfer_selector() {
        let mut data = TRANSFER_SELECTOR.to_vec();
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(&[0x11u8; 20]);
        data.extend_from_slice(&[0u8; 31]);
        data.push(100);
        let call = decode_call(&data).unwrap();
        match call {
            DecodedCall::Trc20Transfer { to, amount } => {
                assert_eq!(amount, "100");
                assert!(to.starts_with("0x41"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_selector_passes_through() {
        let data = vec![0xde, 0xad, 0xbe, 0xef, 1, 2, 3];
        match decode_call(&data).unwrap() {
            DecodedCall::Other { selector, raw } => {
                assert_eq!(selector, "0xdeadbeef");
                assert_eq!(raw, "010203");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn too_short_selector_returns_none() {
        assert!(decode_call(&[0xde, 0xad]).is_none());
    }

    #[test]
    fn decodes_curated_approve_and_balance_of() {
        let mut data = APPROVE_SELECTOR.to_vec();
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(&[0x22u8; 20]);
        data.extend_from_slice(&[0u8; 31]);
        data.push(50);
        match decode_call(&data).unwrap() {
            DecodedCall::Trc20Approve { spender, amount } => {
                assert!(spender.starts_with("0x41"));
                assert_eq!(amount, "50");
            }
            _ => panic!("wrong variant"),
        }

        let mut data = BALANCE_OF_SELECTOR.to_vec();
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(&[0x33u8; 20]);
        match decode_call(&data).unwrap() {
            DecodedCall::Trc20BalanceOf { owner } => assert!(owner.starts_with("0x41")),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn decodes_labeled_swap_selector() {
        let mut data = SWAP_EXACT_TOKENS_SELECTOR.to_vec();
        data.extend_from_slice(&[1, 2, 3]);
        match decode_call(&data).unwrap() {
            DecodedCall::Labeled { label, raw } => {
                assert_eq!(label, "swapExactTokensForTokens");
                assert_eq!(raw, "010203");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn format_decimal_trims_trailing_zeroes() {
        assert_eq!(format_decimal(U256::from(1_000_000u64), 6), "1");
        assert_eq!(format_decimal(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_decimal(U256::from(1u64), 6), "0.000001");
        assert_eq!(format_decimal(U256::from(0u64), 6), "0");
    }

    #[test]
    fn format_decimal_zero_decimals_passthrough() {
        assert_eq!(format_decimal(U256::from(42u64), 0), "42");
    }

    #[test]
    fn token_table_override_replaces_default() {
        let table = Trc20TokenTable::with_overrides([(
            "0x41aaaa".to_string(),
            Trc20Token {
                symbol: "FOO".to_string(),
                decimals: 2,
            },
        )]);
        assert_eq!(table.lookup("0x41aaaa").unwrap().symbol, "FOO");
        assert!(table.lookup("0x41a614f803b6fd780986a42c78ec9c7f77e6ded13c").is_some());
    }

    fn raw_contract(r#type: RawContractType, value: Vec<u8>) -> RawContract {
        RawContract {
            r#type: r#type as i32,
            parameter: Some(prost_types::Any {
                type_url: String::new(),
                value,
            }),
            provider: Vec::new(),
            contract_name: Vec::new(),
            permission_id: 0,
        }
    }

    fn transfer_transaction(owner: [u8; 21], to: [u8; 21], amount: i64) -> Transaction {
        let contract = TransferContract {
            owner_address: owner.to_vec(),
            to_address: to.to_vec(),
            amount,
        };
        Transaction {
            raw_data: Some(crate::protocol::transaction::Raw {
                ref_block_bytes: Vec::new(),
                ref_block_num: 0,
                ref_block_hash: Vec::new(),
                expiration: 0,
                contract: vec![raw_contract(RawContractType::TransferContract, contract.encode_to_vec())],
                data: Vec::new(),
                timestamp: 0,
                fee_limit: 0,
            }),
            signature: Vec::new(),
            ret: Vec::new(),
        }
    }

    #[test]
    fn canonical_tx_id_matches_sha256_of_serialized_raw_data() {
        let tx = transfer_transaction([0x41u8; 21], [0x42u8; 21], 1_000_000);
        let expected = hex::encode(sha256(&tx.raw_data.as_ref().unwrap().encode_to_vec()));
        assert_eq!(canonical_tx_id(&tx).unwrap(), expected);
    }

    #[test]
    fn canonical_tx_id_rejects_missing_raw_data() {
        let tx = Transaction {
            raw_data: None,
            signature: Vec::new(),
            ret: Vec::new(),
        };
        assert!(canonical_tx_id(&tx).is_err());
    }

    #[test]
    fn extract_addresses_dedupes_and_skips_empty() {
        let owner = [0x41u8; 21];
        let to = [0x42u8; 21];
        let tx = transfer_transaction(owner, to, 1);
        let addrs = extract_addresses(&tx);
        assert_eq!(addrs, vec![addr_bytes_to_hex(&owner), addr_bytes_to_hex(&to)]);
    }

    #[test]
    fn extract_addresses_includes_vote_targets() {
        let owner = [0x41u8; 21];
        let candidate_a = [0x43u8; 21];
        let candidate_b = [0x44u8; 21];
        let vote_contract = VoteWitnessContract {
            owner_address: owner.to_vec(),
            votes: vec![
                crate::protocol::Vote {
                    vote_address: candidate_a.to_vec(),
                    vote_count: 10,
                },
                crate::protocol::Vote {
                    vote_address: candidate_b.to_vec(),
                    vote_count: 5,
                },
            ],
            support: false,
        };
        let tx = Transaction {
            raw_data: Some(crate::protocol::transaction::Raw {
                ref_block_bytes: Vec::new(),
                ref_block_num: 0,
                ref_block_hash: Vec::new(),
                expiration: 0,
                contract: vec![raw_contract(RawContractType::VoteWitnessContract, vote_contract.encode_to_vec())],
                data: Vec::new(),
                timestamp: 0,
                fee_limit: 0,
            }),
            signature: Vec::new(),
            ret: Vec::new(),
        };
        let addrs = extract_addresses(&tx);
        assert!(addrs.contains(&addr_bytes_to_hex(&owner)));
        assert!(addrs.contains(&addr_bytes_to_hex(&candidate_a)));
        assert!(addrs.contains(&addr_bytes_to_hex(&candidate_b)));
    }

    #[test]
    fn parse_contract_decodes_transfer() {
        let owner = [0x41u8; 21];
        let to = [0x45u8; 21];
        let contract = raw_contract(
            RawContractType::TransferContract,
            TransferContract {
                owner_address: owner.to_vec(),
                to_address: to.to_vec(),
                amount: 42,
            }
            .encode_to_vec(),
        );
        match parse_contract(&contract).unwrap() {
            ParsedContract::Transfer { owner_address, to_address, amount } => {
                assert_eq!(owner_address, addr_bytes_to_hex(&owner));
                assert_eq!(to_address, addr_bytes_to_hex(&to));
                assert_eq!(amount, "42");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn parse_contract_unknown_type_falls_back_to_other() {
        let contract = RawContract {
            r#type: 9999,
            parameter: Some(prost_types::Any {
                type_url: String::new(),
                value: Vec::new(),
            }),
            provider: Vec::new(),
            contract_name: Vec::new(),
            permission_id: 0,
        };
        match parse_contract(&contract).unwrap() {
            ParsedContract::Other { contract_type } => assert_eq!(contract_type, 9999),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    fn trc20_transfer_log(token_contract: [u8; 21], from: [u8; 21], to: [u8; 21], raw_amount: u64) -> TransactionInfo {
        let mut from_topic = vec![0u8; 12];
        from_topic.extend_from_slice(&from[1..]);
        let mut to_topic = vec![0u8; 12];
        to_topic.extend_from_slice(&to[1..]);
        let mut data = vec![0u8; 24];
        data.extend_from_slice(&raw_amount.to_be_bytes());

        TransactionInfo {
            log: vec![crate::protocol::transaction_info::Log {
                address: token_contract.to_vec(),
                topics: vec![hex::decode(TRANSFER_EVENT_TOPIC).unwrap(), from_topic, to_topic],
                data,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn parse_trc20_transfers_uses_known_token_decimals() {
        let usdt_contract = {
            let mut bytes = [0u8; 21];
            bytes[0] = 0x41;
            // 0xa614f803b6fd780986a42c78ec9c7f77e6ded13c, matches the table's USDT entry.
            let rest = hex::decode("a614f803b6fd780986a42c78ec9c7f77e6ded13c").unwrap();
            bytes[1..].copy_from_slice(&rest);
            bytes
        };
        let from = [0x46u8; 21];
        let to = [0x47u8; 21];
        let info = trc20_transfer_log(usdt_contract, from, to, 1_000_000);
        let table = Trc20TokenTable::new();

        let transfers = parse_trc20_transfers(&info, &table);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].symbol.as_deref(), Some("USDT"));
        assert_eq!(transfers[0].decimal_amount.as_deref(), Some("1"));
    }

    #[test]
    fn parse_trc20_transfers_defaults_unknown_token_to_trc20_18_decimals() {
        let unknown_contract = [0x48u8; 21];
        let from = [0x49u8; 21];
        let to = [0x4au8; 21];
        let info = trc20_transfer_log(unknown_contract, from, to, 1_000_000_000_000_000_000);
        let table = Trc20TokenTable::new();

        let transfers = parse_trc20_transfers(&info, &table);
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].symbol.as_deref(), Some("TRC20"));
        assert_eq!(transfers[0].decimal_amount.as_deref(), Some("1"));
    }
}
