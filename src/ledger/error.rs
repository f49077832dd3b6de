use crate::core_types::{ChainId, DepositId};
use thiserror::Error;

use super::state::DepositStatus;

/// Persistence failures, independent of the backing store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Deposit not found: {0}")]
    NotFound(DepositId),

    /// Precondition violation. Indicates a trigger bug, not a transient fault.
    #[error("Invalid state for deposit {id}: expected {expected}, found {actual}")]
    InvalidState {
        id: DepositId,
        expected: DepositStatus,
        actual: DepositStatus,
    },

    #[error("Concurrent update on {chain}/{tx_id} did not settle")]
    Conflict { chain: ChainId, tx_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Stable code for logs and audit records
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::NotFound(_) => "DEPOSIT_NOT_FOUND",
            LedgerError::InvalidState { .. } => "INVALID_STATE",
            LedgerError::Conflict { .. } => "CONFLICT",
            LedgerError::Store(_) => "STORE_ERROR",
        }
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, LedgerError::InvalidState { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message() {
        let err = LedgerError::InvalidState {
            id: uuid::Uuid::nil(),
            expected: DepositStatus::Confirmed,
            actual: DepositStatus::Swept,
        };
        assert!(err.is_invalid_state());
        assert_eq!(err.code(), "INVALID_STATE");
        assert!(err.to_string().contains("expected confirmed, found swept"));
    }
}
