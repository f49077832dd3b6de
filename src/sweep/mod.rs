//! Sponsored Sweep Engine
//!
//! Moves confirmed deposits from user deposit wallets to the chain's
//! treasury while a sponsor wallet pays the network fees.
//!
//! - EVM: the sponsor tops up the deposit wallet's gas first, then the
//!   deposit wallet sends the asset (two transactions).
//! - Solana: one transaction, sponsor as fee payer and deposit wallet as
//!   asset owner, both signing.

pub mod engine;
pub mod error;
pub mod evm;
pub mod signers;
pub mod solana;

#[cfg(test)]
pub mod mock;

use crate::core_types::{ChainId, DepositId};
use crate::sentinel::AssetKind;
use async_trait::async_trait;

pub use engine::{RetryReport, SweepDispatcher, SweepEngine, SweepSettings};
pub use error::SweepError;
pub use evm::EvmSponsoredTransfer;
pub use signers::{ChainSigner, SponsoredSigners};
pub use solana::SolanaSponsoredTransfer;

/// Everything a chain adapter needs to move one deposit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepPlan {
    pub deposit_id: DepositId,
    pub chain: ChainId,
    pub asset: String,
    pub kind: AssetKind,
    pub decimals: u32,
    /// Base units
    pub amount: u128,
    pub source: String,
    pub treasury: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReceipt {
    pub sweep_tx_id: String,
    /// EVM gas top-up sent by the sponsor, if one was needed
    pub funding_tx_id: Option<String>,
    /// What the sponsor paid, native base units
    pub gas_spent: u128,
}

/// Chain-specific assembly of the owner + fee-payer transfer
#[async_trait]
pub trait SponsoredTransfer: Send + Sync {
    async fn execute(
        &self,
        plan: &SweepPlan,
        signers: &SponsoredSigners,
    ) -> Result<SweepReceipt, SweepError>;

    /// Sponsor's native balance in base units
    async fn sponsor_balance(&self, sponsor: &ChainSigner) -> Result<u128, SweepError>;
}
