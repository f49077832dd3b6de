//! Deposit Ledger
//!
//! Authoritative record of observed deposits. Enforces at-most-once
//! recording per (chain, tx_id) and owns the confirmation state machine:
//! CONFIRMING -> CONFIRMED -> SWEPT.

pub mod deposit_ledger;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod state;
pub mod store;
pub mod types;

pub use deposit_ledger::DepositLedger;
pub use error::{LedgerError, StoreError};
pub use memory::MemoryDepositStore;
pub use postgres::{PgDepositStore, init_schema};
pub use state::DepositStatus;
pub use store::DepositStore;
pub use types::{Observation, OnchainDeposit, RecordOutcome};
