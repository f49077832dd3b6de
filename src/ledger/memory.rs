//! In-memory deposit store (tests, local runs without PostgreSQL)

use crate::core_types::{ChainId, DepositId};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::error::StoreError;
use super::state::DepositStatus;
use super::store::{DepositStore, same_version};
use super::types::OnchainDeposit;

/// Keyed on (chain, tx_id), the same uniqueness the SQL table enforces
#[derive(Default)]
pub struct MemoryDepositStore {
    rows: DashMap<(ChainId, String), OnchainDeposit>,
}

impl MemoryDepositStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn key_of(&self, id: DepositId) -> Option<(ChainId, String)> {
        self.rows
            .iter()
            .find(|r| r.value().id == id)
            .map(|r| r.key().clone())
    }
}

#[async_trait]
impl DepositStore for MemoryDepositStore {
    async fn insert_if_absent(&self, deposit: &OnchainDeposit) -> Result<bool, StoreError> {
        match self.rows.entry((deposit.chain, deposit.tx_id.clone())) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(deposit.clone());
                Ok(true)
            }
        }
    }

    async fn find_by_tx(
        &self,
        chain: ChainId,
        tx_id: &str,
    ) -> Result<Option<OnchainDeposit>, StoreError> {
        Ok(self
            .rows
            .get(&(chain, tx_id.to_string()))
            .map(|r| r.value().clone()))
    }

    async fn find(&self, id: DepositId) -> Result<Option<OnchainDeposit>, StoreError> {
        Ok(self
            .rows
            .iter()
            .find(|r| r.value().id == id)
            .map(|r| r.value().clone()))
    }

    async fn compare_and_set(
        &self,
        expected: &OnchainDeposit,
        next: &OnchainDeposit,
    ) -> Result<bool, StoreError> {
        let Some(key) = self.key_of(expected.id) else {
            return Ok(false);
        };
        let Some(mut row) = self.rows.get_mut(&key) else {
            return Ok(false);
        };
        if !same_version(row.value(), expected) {
            return Ok(false);
        }
        *row.value_mut() = next.clone();
        Ok(true)
    }

    async fn list_by_status(
        &self,
        chain: ChainId,
        status: DepositStatus,
    ) -> Result<Vec<OnchainDeposit>, StoreError> {
        let mut rows: Vec<OnchainDeposit> = self
            .rows
            .iter()
            .filter(|r| r.value().chain == chain && r.value().status == status)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by_key(|d| d.first_observed_at);
        Ok(rows)
    }
}
