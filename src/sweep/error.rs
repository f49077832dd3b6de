//! Sweep Error Types

use crate::core_types::{AddressId, DepositId};
use crate::ledger::{DepositStatus, LedgerError};
use crate::money::MoneyError;
use crate::registry::RegistryError;
use crate::sentinel::ClientError;
use crate::vault::VaultError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SweepError {
    // === Preconditions ===
    #[error("Sweep of deposit {0} already in flight")]
    AlreadyInFlight(DepositId),

    #[error("Deposit {id} is {status}, only confirmed deposits are swept")]
    NotSweepable { id: DepositId, status: DepositStatus },

    #[error("Sweep engine is shutting down, deposit {0} left for the next run")]
    ShuttingDown(DepositId),

    #[error("Deposit {0} is below the sweep threshold")]
    BelowThreshold(DepositId),

    #[error("Asset {0} is not configured for sweeping")]
    UnknownAsset(String),

    #[error("Deposit address {0} not found among active addresses")]
    AddressNotFound(AddressId),

    #[error("Decrypted key controls {actual}, expected {expected}")]
    AddressMismatch { expected: String, actual: String },

    // === Keys and signing ===
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Signer does not belong to this chain family")]
    WrongSigner,

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    // === Execution ===
    #[error("Sponsor {sponsor} has {balance}, needs {required} (native base units)")]
    SponsorInsufficientFunds {
        sponsor: String,
        balance: u128,
        required: u128,
    },

    #[error("Sweep did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Amount conversion failed: {0}")]
    Money(#[from] MoneyError),

    #[error("Chain client error: {0}")]
    Client(#[from] ClientError),

    // === Bookkeeping ===
    /// Funds moved on chain but the SWEPT transition was not written
    #[error("Deposit {id} swept by {sweep_tx_id} but not yet marked: {source}")]
    SweptUnrecorded {
        id: DepositId,
        sweep_tx_id: String,
        source: LedgerError,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl SweepError {
    pub fn code(&self) -> &'static str {
        match self {
            SweepError::AlreadyInFlight(_) => "ALREADY_IN_FLIGHT",
            SweepError::NotSweepable { .. } => "NOT_SWEEPABLE",
            SweepError::ShuttingDown(_) => "SHUTTING_DOWN",
            SweepError::BelowThreshold(_) => "BELOW_THRESHOLD",
            SweepError::UnknownAsset(_) => "UNKNOWN_ASSET",
            SweepError::AddressNotFound(_) => "ADDRESS_NOT_FOUND",
            SweepError::AddressMismatch { .. } => "ADDRESS_MISMATCH",
            SweepError::InvalidKey(_) => "INVALID_KEY",
            SweepError::WrongSigner => "WRONG_SIGNER",
            SweepError::Signing(_) => "SIGNING_FAILED",
            SweepError::Vault(_) => "KEY_DECRYPTION_FAILED",
            SweepError::SponsorInsufficientFunds { .. } => "SPONSOR_INSUFFICIENT_FUNDS",
            SweepError::Timeout(_) => "TIMEOUT",
            SweepError::Money(_) => "AMOUNT_CONVERSION",
            SweepError::Client(_) => "RPC_ERROR",
            SweepError::SweptUnrecorded { .. } => "SWEPT_UNRECORDED",
            SweepError::Ledger(_) => "LEDGER_ERROR",
            SweepError::Registry(_) => "REGISTRY_ERROR",
        }
    }

    /// Rejected before any key was touched; nothing to record on the row
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SweepError::AlreadyInFlight(_)
                | SweepError::NotSweepable { .. }
                | SweepError::ShuttingDown(_)
                | SweepError::BelowThreshold(_)
        )
    }

    /// A later attempt may succeed without operator action. Anything else
    /// halts automatic retries for the deposit.
    pub fn is_retryable(&self) -> bool {
        match self {
            SweepError::Client(e) => e.is_transient(),
            SweepError::AlreadyInFlight(_)
            | SweepError::ShuttingDown(_)
            | SweepError::AddressNotFound(_)
            | SweepError::SponsorInsufficientFunds { .. }
            | SweepError::Timeout(_)
            | SweepError::SweptUnrecorded { .. }
            | SweepError::Ledger(_)
            | SweepError::Registry(_) => true,
            SweepError::NotSweepable { .. }
            | SweepError::BelowThreshold(_)
            | SweepError::UnknownAsset(_)
            | SweepError::AddressMismatch { .. }
            | SweepError::InvalidKey(_)
            | SweepError::WrongSigner
            | SweepError::Signing(_)
            | SweepError::Vault(_)
            | SweepError::Money(_) => false,
        }
    }
}
