//! Chain Client Adapter interface
//!
//! The watcher and the sweep engine only see this trait. The concrete
//! client for each configured chain is chosen once at startup.

use crate::core_types::{ChainId, Height};
use async_trait::async_trait;

use super::error::ClientError;

/// What a deposit address receives: the chain's gas asset or a token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Native,
    /// SPL mint or ERC-20 contract
    Token { contract: String },
}

/// An inbound transfer to a watched address, amount in base units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundTransfer {
    pub tx_id: String,
    pub amount: u128,
    pub counterparty: Option<String>,
    pub height: Height,
}

/// Signed, ready-to-broadcast transaction
#[derive(Debug, Clone)]
pub enum SignedTransaction {
    /// RLP-encoded signed transaction and its hash
    Evm { raw: Vec<u8>, tx_hash: String },
    Solana(Box<solana_sdk::transaction::Transaction>),
}

/// Outcome of a submitted transaction once the chain accepted it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_id: String,
    pub height: Option<Height>,
    /// Network fee actually charged, native base units (when the node reports it)
    pub fee: Option<u128>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain(&self) -> ChainId;

    /// Latest block number / slot
    async fn current_height(&self) -> Result<Height, ClientError>;

    /// Successful inbound transfers of `asset` to `address` with
    /// `from <= height <= to`
    async fn transfers_to(
        &self,
        address: &str,
        asset: &AssetKind,
        from: Height,
        to: Height,
    ) -> Result<Vec<InboundTransfer>, ClientError>;

    /// Broadcast and wait until the chain reports the transaction landed
    async fn submit(&self, tx: SignedTransaction) -> Result<Confirmation, ClientError>;
}
