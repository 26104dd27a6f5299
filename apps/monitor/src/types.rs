use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Stopped,
}

impl SubscriptionStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            other => anyhow::bail!("unknown subscription status: {other}"),
        }
    }
}

/// Immutable once a subscription is created. `min_amount`/`max_amount` of
/// zero mean "no bound", compared against the event's amount as a 256-bit
/// unsigned integer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionFilters {
    #[serde(default)]
    pub contract_types: HashSet<String>,
    #[serde(default)]
    pub min_amount: String,
    #[serde(default)]
    pub max_amount: String,
    #[serde(default)]
    pub only_success: bool,
}

impl Default for SubscriptionFilters {
    fn default() -> Self {
        Self {
            contract_types: HashSet::new(),
            min_amount: "0".to_string(),
            max_amount: "0".to_string(),
            only_success: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub address: String,
    pub address_hex: String,
    pub network: String,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub filters: SubscriptionFilters,
    pub status: SubscriptionStatus,
    pub start_block: i64,
    pub current_block: i64,
    pub events_count: i64,
    pub last_event_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub wallet_type: Option<String>,
    pub user_id: Option<String>,
    pub label: Option<String>,
    pub metadata: serde_json::Value,
    /// When true, the monitor materializes every transaction in each block
    /// instead of filtering by `address` (spec's "global/block-wide" mode).
    pub global: bool,
}

/// A recognized ABI call, decoded from a `TriggerSmartContract`'s data
/// payload. Transient: never persisted on its own, only embedded in
/// `AddressEvent.data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedCall {
    pub method_id: String,
    pub method_name: String,
    pub addresses: Vec<String>,
    pub amount: Option<String>,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
    Related,
}

impl Direction {
    pub fn classify(watched_hex: &str, from: &str, to: &str) -> Self {
        if to == watched_hex {
            Self::Incoming
        } else if from == watched_hex {
            Self::Outgoing
        } else {
            Self::Related
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
            Self::Related => "related",
        }
    }
}

/// One decoded, filtered, and (eventually) persisted chain event. Built once
/// by the Monitor and never mutated after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressEvent {
    pub subscription_id: String,
    pub block_number: i64,
    pub block_hash: String,
    pub block_timestamp: i64,
    pub tx_id: String,
    pub tx_index: i64,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub contract_type: String,
    pub success: bool,
    pub event_type: String,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_tx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_tx_info: Option<String>,
}

/// One block's worth of address-activity tallies, emitted only by the
/// global/block-wide monitor variant alongside its per-tx `AddressEvent`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSummary {
    pub block_number: i64,
    pub block_hash: String,
    pub block_timestamp: i64,
    pub addresses: std::collections::HashMap<String, AddressActivity>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressActivity {
    pub contract_types: HashSet<String>,
    pub tx_count: u64,
    pub incoming: u64,
    pub outgoing: u64,
    pub contract_calls: u64,
    pub interactions: Vec<String>,
}

/// What the Monitor puts on its outbound channel each tick.
#[derive(Debug, Clone)]
pub enum MonitorOutput {
    Event(AddressEvent),
    Block(BlockSummary),
    /// Reports the cursor's new value after a tick, whether or not any block
    /// in range produced events, so the persisted `current_block` advances
    /// even on an empty tick (spec §8 scenario 2).
    Cursor(i64),
}

#[derive(Debug, Clone)]
pub struct WebhookTarget {
    pub url: String,
    pub secret: String,
    pub network: String,
    pub wallet_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_status_roundtrip_db_strings() {
        for s in [
            SubscriptionStatus::Active,
            SubscriptionStatus::Paused,
            SubscriptionStatus::Stopped,
        ] {
            assert_eq!(SubscriptionStatus::parse(s.as_db_str()).unwrap(), s);
        }
    }

    #[test]
    fn subscription_status_parse_rejects_unknown() {
        assert!(SubscriptionStatus::parse("bogus").is_err());
    }

    #[test]
    fn direction_classifies_relative_to_watched_address() {
        assert_eq!(Direction::classify("0x41aa", "0x41bb", "0x41aa"), Direction::Incoming);
        assert_eq!(Direction::classify("0x41aa", "0x41aa", "0x41bb"), Direction::Outgoing);
        assert_eq!(Direction::classify("0x41aa", "0x41bb", "0x41cc"), Direction::Related);
    }
}
