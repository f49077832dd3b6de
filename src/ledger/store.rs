//! Storage seam for the deposit ledger
//!
//! Implementations only provide atomic primitives. All state machine
//! decisions live in [`super::DepositLedger`].

use crate::core_types::{ChainId, DepositId};
use async_trait::async_trait;

use super::error::StoreError;
use super::state::DepositStatus;
use super::types::OnchainDeposit;

#[async_trait]
pub trait DepositStore: Send + Sync {
    /// Insert unless a row with the same (chain, tx_id) exists.
    /// Must be a single atomic operation. Returns `false` on conflict.
    async fn insert_if_absent(&self, deposit: &OnchainDeposit) -> Result<bool, StoreError>;

    async fn find_by_tx(
        &self,
        chain: ChainId,
        tx_id: &str,
    ) -> Result<Option<OnchainDeposit>, StoreError>;

    async fn find(&self, id: DepositId) -> Result<Option<OnchainDeposit>, StoreError>;

    /// Replace `expected` with `next` only if the stored row still matches
    /// `expected` on status, confirmations and sweep_attempts.
    async fn compare_and_set(
        &self,
        expected: &OnchainDeposit,
        next: &OnchainDeposit,
    ) -> Result<bool, StoreError>;

    /// Rows on `chain` with `status`, oldest first
    async fn list_by_status(
        &self,
        chain: ChainId,
        status: DepositStatus,
    ) -> Result<Vec<OnchainDeposit>, StoreError>;
}

/// Version fields compared by `compare_and_set`
#[inline]
pub fn same_version(a: &OnchainDeposit, b: &OnchainDeposit) -> bool {
    a.status == b.status
        && a.confirmations == b.confirmations
        && a.sweep_attempts == b.sweep_attempts
}
