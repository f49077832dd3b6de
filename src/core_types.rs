//! Core types used throughout the system
//!
//! Identifiers and the closed set of chain kinds every module dispatches on.
//! Chain selection happens once at startup from configuration; nothing below
//! this layer branches on free-form chain names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Deposit ID - primary key of an `onchain_deposits` row.
pub type DepositId = uuid::Uuid;

/// User ID - owner of a deposit address, issued by the surrounding application.
pub type UserId = uuid::Uuid;

/// Deposit address ID - primary key in the external address registry.
pub type AddressId = uuid::Uuid;

/// Block number (EVM) or slot (Solana).
pub type Height = u64;

/// Chain family. Determines which client and sweep adapter are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Solana,
    Evm,
}

/// A configured chain.
///
/// # Storage format
/// Persisted as text: `"solana"` or `"evm:<chain-id>"` (e.g. `"evm:8453"` for Base).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainId {
    Solana,
    Evm(u64),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid chain id: {0}")]
pub struct ParseChainIdError(pub String);

impl ChainId {
    #[inline]
    pub fn family(&self) -> ChainFamily {
        match self {
            ChainId::Solana => ChainFamily::Solana,
            ChainId::Evm(_) => ChainFamily::Evm,
        }
    }

    /// EIP-155 chain id, if this is an EVM chain
    #[inline]
    pub fn evm_chain_id(&self) -> Option<u64> {
        match self {
            ChainId::Evm(id) => Some(*id),
            ChainId::Solana => None,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainId::Solana => write!(f, "solana"),
            ChainId::Evm(id) => write!(f, "evm:{}", id),
        }
    }
}

impl FromStr for ChainId {
    type Err = ParseChainIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        if lower == "solana" {
            return Ok(ChainId::Solana);
        }
        lower
            .strip_prefix("evm:")
            .and_then(|id| id.parse::<u64>().ok())
            .map(ChainId::Evm)
            .ok_or_else(|| ParseChainIdError(s.to_string()))
    }
}

impl Serialize for ChainId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_display_roundtrip() {
        assert_eq!(ChainId::Solana.to_string(), "solana");
        assert_eq!(ChainId::Evm(8453).to_string(), "evm:8453");
        assert_eq!("evm:8453".parse::<ChainId>(), Ok(ChainId::Evm(8453)));
        assert_eq!("SOLANA".parse::<ChainId>(), Ok(ChainId::Solana));
    }

    #[test]
    fn test_chain_id_rejects_garbage() {
        assert!("evm:".parse::<ChainId>().is_err());
        assert!("evm:base".parse::<ChainId>().is_err());
        assert!("bitcoin".parse::<ChainId>().is_err());
    }

    #[test]
    fn test_chain_family() {
        assert_eq!(ChainId::Solana.family(), ChainFamily::Solana);
        assert_eq!(ChainId::Evm(1).family(), ChainFamily::Evm);
        assert_eq!(ChainId::Evm(1).evm_chain_id(), Some(1));
        assert_eq!(ChainId::Solana.evm_chain_id(), None);
    }
}
