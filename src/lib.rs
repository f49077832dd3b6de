//! Deposit Sentinel - deposit watcher and sponsored sweep engine
//!
//! Watches registered deposit addresses on Solana and EVM chains, records
//! inbound transfers in a ledger exactly once, tracks them to confirmation
//! and sweeps confirmed balances to a treasury with a sponsor wallet paying
//! the fees.
//!
//! # Modules
//!
//! - [`core_types`] - Chain identifiers and id aliases
//! - [`money`] - Decimal <-> base unit conversion
//! - [`ledger`] - Deposit ledger and its state machine
//! - [`registry`] - Deposit address source
//! - [`vault`] - Encrypted key material
//! - [`sentinel`] - Chain clients and per-chain watchers
//! - [`sweep`] - Sponsored sweep engine
//! - [`audit`] - Cost and alert events
//! - [`service`] - Wiring for the long-running process

// Core types - must be first!
pub mod core_types;
pub mod money;

pub mod audit;
pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;
pub mod registry;
pub mod sentinel;
pub mod service;
pub mod shutdown;
pub mod sweep;
pub mod vault;

// Convenient re-exports at crate root
pub use core_types::{AddressId, ChainFamily, ChainId, DepositId, Height, UserId};
pub use ledger::{DepositLedger, DepositStatus, OnchainDeposit};
pub use sentinel::{ChainWatcher, TickReport};
pub use service::SentinelService;
pub use sweep::{SweepEngine, SweepReceipt};
