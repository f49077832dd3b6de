use crate::ledger::LedgerError;
use crate::registry::RegistryError;
use thiserror::Error;

/// Chain RPC failures
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("RPC timeout: {0}")]
    Timeout(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Transaction failed on chain: {0}")]
    TransactionFailed(String),

    #[error("Transaction {0} not confirmed before deadline")]
    ConfirmationTimeout(String),

    #[error("Signed transaction does not belong to this chain family")]
    WrongTransactionKind,

    #[error("{address}: more than {pages} signature pages in one scan window")]
    SignatureBacklog { address: String, pages: usize },
}

impl ClientError {
    /// Worth retrying on the next tick without operator action
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::RpcConnection(_)
                | ClientError::Rpc { .. }
                | ClientError::Timeout(_)
                | ClientError::ConfirmationTimeout(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("Chain client error: {0}")]
    Client(#[from] ClientError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Cursor store error: {0}")]
    Cursor(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ClientError::Timeout("getSlot".into()).is_transient());
        assert!(
            ClientError::Rpc {
                code: -32005,
                message: "rate limited".into()
            }
            .is_transient()
        );
        assert!(!ClientError::TransactionFailed("reverted".into()).is_transient());
        assert!(!ClientError::InvalidAddress("zz".into()).is_transient());
    }
}
