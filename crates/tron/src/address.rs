use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Tron addresses are 21 bytes on the wire: a fixed `0x41` prefix followed by
/// the 20-byte account id. The external (human) form is base58check; the
/// canonical internal form this crate stores everywhere else is the 21-byte
/// hex string, converted at API boundaries only (spec "Address encoding").
pub const ADDRESS_PREFIX: u8 = 0x41;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TronAddress([u8; 21]);

impl TronAddress {
    pub fn from_prefixed_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 21 {
            anyhow::bail!("expected 21-byte tron address, got {}", bytes.len());
        }
        if bytes[0] != ADDRESS_PREFIX {
            anyhow::bail!("tron address missing 0x41 prefix: 0x{}", hex::encode(bytes));
        }
        let mut out = [0u8; 21];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Accepts either a bare 20-byte account id or a 21-byte prefixed address.
    pub fn from_account_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes.len() {
            21 => Self::from_prefixed_bytes(bytes),
            20 => {
                let mut out = [0u8; 21];
                out[0] = ADDRESS_PREFIX;
                out[1..].copy_from_slice(bytes);
                Ok(Self(out))
            }
            other => anyhow::bail!("expected 20 or 21-byte tron address, got {other}"),
        }
    }

    pub fn parse_text(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Some(hex_part) = trimmed.strip_prefix("0x") {
            return Self::parse_hex(hex_part);
        }
        let decoded = bs58::decode(trimmed)
            .with_check(Some(ADDRESS_PREFIX))
            .into_vec()
            .with_context(|| format!("invalid base58check tron address: {trimmed}"))?;
        Self::from_prefixed_bytes(&decoded)
    }

    pub fn parse_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).with_context(|| format!("invalid hex tron address: {s}"))?;
        Self::from_account_bytes(&bytes)
    }

    pub fn prefixed_bytes(&self) -> [u8; 21] {
        self.0
    }

    pub fn to_hex(self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn to_base58(self) -> String {
        bs58::encode(self.0).with_check().into_string()
    }
}

impl fmt::Display for TronAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl FromStr for TronAddress {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_text(s)
    }
}

/// Non-fatal hex rendering of a raw protobuf address field: an empty payload
/// decodes to an empty string, never to an error (spec "Address encoding").
pub fn addr_bytes_to_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    match TronAddress::from_account_bytes(bytes) {
        Ok(addr) => addr.to_hex(),
        Err(_) => format!("0x{}", hex::encode(bytes)),
    }
}

/// Non-fatal base58 rendering of a raw protobuf address field.
pub fn addr_bytes_to_base58(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    match TronAddress::from_account_bytes(bytes) {
        Ok(addr) => addr.to_base58(),
        Err(_) => String::new(),
    }
}

/// SHA-256 of the serialized raw transaction body — the canonical
/// transaction id (spec "canonical_tx_id").
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrips_through_base58() {
        let addr = TronAddress::from_account_bytes(&[0x11; 20]).unwrap();
        let b58 = addr.to_base58();
        let parsed = TronAddress::parse_text(&b58).unwrap();
        assert_eq!(parsed, addr);
        assert_eq!(parsed.to_hex(), addr.to_hex());
    }

    #[test]
    fn base58_roundtrips_through_hex() {
        let addr = TronAddress::from_account_bytes(&[0x22; 20]).unwrap();
        let hex_str = addr.to_hex();
        let parsed = TronAddress::parse_text(&hex_str).unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn empty_address_decodes_to_empty_string() {
        assert_eq!(addr_bytes_to_hex(&[]), "");
        assert_eq!(addr_bytes_to_base58(&[]), "");
    }

    #[test]
    fn malformed_address_is_non_fatal() {
        let hex_str = addr_bytes_to_hex(&[0xAB; 3]);
        assert_eq!(hex_str, "0xababab");
    }

    #[test]
    fn rejects_wrong_prefix() {
        let mut bytes = [0u8; 21];
        bytes[0] = 0x42;
        assert!(TronAddress::from_prefixed_bytes(&bytes).is_err());
    }
}
