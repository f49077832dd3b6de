//! Sentinel - per-chain deposit watching
//!
//! One [`ChainWatcher`] per configured chain polls the chain through a
//! [`ChainClient`] (Solana or EVM), records inbound transfers to the
//! registered deposit addresses in the ledger and advances their
//! confirmation state. Deposits that become sweepable are handed to a
//! [`SweepTrigger`].

pub mod client;
pub mod config;
pub mod confirmation;
pub mod cursor;
pub mod error;
pub mod evm;
pub mod rpc;
pub mod solana;
pub mod worker;

#[cfg(test)]
pub mod mock;

pub use client::{AssetKind, ChainClient, Confirmation, InboundTransfer, SignedTransaction};
pub use config::{AssetConfig, ChainConfig, ChainSweepConfig, RpcConfig, ScanningConfig};
pub use confirmation::{ConfirmationMonitor, confirmations};
pub use cursor::{CursorStore, MemoryCursorStore, PgCursorStore};
pub use error::{ClientError, SentinelError};
pub use evm::{EvmCall, EvmChainOps, EvmClient};
pub use solana::{SolanaChainOps, SolanaClient};
pub use worker::{
    AssetRule, ChainWatcher, SweepTrigger, TickReport, WatcherSettings, asset_rules,
};
