//! Deposit Ledger - sole writer of `onchain_deposits`
//!
//! Every mutation is read → decide → compare-and-set. A lost race re-reads
//! and decides again, so concurrent callers can never move a row backwards
//! or report the CONFIRMED edge twice.

use crate::core_types::{ChainId, DepositId};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::error::LedgerError;
use super::state::DepositStatus;
use super::store::DepositStore;
use super::types::{Observation, OnchainDeposit, RecordOutcome};

const MAX_CAS_ATTEMPTS: usize = 3;

/// Longest error text kept on a row
const MAX_ERROR_LEN: usize = 512;

pub struct DepositLedger {
    store: Arc<dyn DepositStore>,
}

impl DepositLedger {
    pub fn new(store: Arc<dyn DepositStore>) -> Self {
        Self { store }
    }

    /// Insert a newly observed transfer, or advance an existing row.
    ///
    /// Confirmations only move forward; a lower count than stored is ignored.
    /// `first_confirmed` is set only on the call that performs the
    /// CONFIRMING -> CONFIRMED transition (or inserts straight into CONFIRMED).
    pub async fn record_or_update(
        &self,
        chain: ChainId,
        tx_id: &str,
        obs: Observation,
    ) -> Result<RecordOutcome, LedgerError> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let now = Utc::now();
            let fresh = OnchainDeposit::observed(chain, tx_id, &obs, now);

            if self.store.insert_if_absent(&fresh).await? {
                info!(
                    chain = %chain,
                    tx_id,
                    deposit_id = %fresh.id,
                    asset = %fresh.asset,
                    amount = %fresh.amount,
                    confirmations = fresh.confirmations,
                    status = %fresh.status,
                    "Recorded new deposit"
                );
                let first_confirmed = fresh.status == DepositStatus::Confirmed;
                return Ok(RecordOutcome {
                    deposit: fresh,
                    created: true,
                    first_confirmed,
                });
            }

            let Some(current) = self.store.find_by_tx(chain, tx_id).await? else {
                // Row vanished between insert and read; try again
                continue;
            };

            if obs.confirmations < current.confirmations {
                debug!(
                    chain = %chain,
                    tx_id,
                    stored = current.confirmations,
                    offered = obs.confirmations,
                    "Ignoring confirmation regression"
                );
            }

            let Some(next) = current.advanced(obs.confirmations, now) else {
                return Ok(RecordOutcome {
                    deposit: current,
                    created: false,
                    first_confirmed: false,
                });
            };

            if self.store.compare_and_set(&current, &next).await? {
                let first_confirmed = current.status == DepositStatus::Confirming
                    && next.status == DepositStatus::Confirmed;
                if first_confirmed {
                    info!(
                        chain = %chain,
                        tx_id,
                        deposit_id = %next.id,
                        confirmations = next.confirmations,
                        "Deposit confirmed"
                    );
                } else {
                    debug!(
                        chain = %chain,
                        tx_id,
                        confirmations = next.confirmations,
                        "Confirmations advanced"
                    );
                }
                return Ok(RecordOutcome {
                    deposit: next,
                    created: false,
                    first_confirmed,
                });
            }

            debug!(chain = %chain, tx_id, attempt, "Deposit row changed concurrently, retrying");
        }

        warn!(chain = %chain, tx_id, "record_or_update gave up after repeated conflicts");
        Err(LedgerError::Conflict {
            chain,
            tx_id: tx_id.to_string(),
        })
    }

    /// CONFIRMED -> SWEPT. Fails with `InvalidState` for any other status.
    pub async fn mark_swept(
        &self,
        id: DepositId,
        sweep_tx_id: &str,
    ) -> Result<OnchainDeposit, LedgerError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.find(id).await?.ok_or(LedgerError::NotFound(id))?;

            if current.status != DepositStatus::Confirmed {
                error!(
                    deposit_id = %id,
                    status = %current.status,
                    sweep_tx_id,
                    "mark_swept called on a deposit that is not confirmed"
                );
                return Err(LedgerError::InvalidState {
                    id,
                    expected: DepositStatus::Confirmed,
                    actual: current.status,
                });
            }

            let mut next = current.clone();
            next.status = DepositStatus::Swept;
            next.swept_at = Some(Utc::now());
            next.sweep_tx_id = Some(sweep_tx_id.to_string());
            next.last_sweep_error = None;
            next.sweep_halted = false;

            if self.store.compare_and_set(&current, &next).await? {
                info!(
                    deposit_id = %id,
                    chain = %next.chain,
                    sweep_tx_id,
                    "Deposit swept"
                );
                return Ok(next);
            }
        }

        let current = self.store.find(id).await?.ok_or(LedgerError::NotFound(id))?;
        Err(LedgerError::Conflict {
            chain: current.chain,
            tx_id: current.tx_id,
        })
    }

    /// Note the on-chain sweep transaction of a CONFIRMED deposit whose
    /// SWEPT transition could not be written. Status is left untouched; a
    /// later `mark_swept` with the same id finishes the job.
    pub async fn record_sweep_submitted(
        &self,
        id: DepositId,
        sweep_tx_id: &str,
    ) -> Result<OnchainDeposit, LedgerError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.find(id).await?.ok_or(LedgerError::NotFound(id))?;
            if current.status != DepositStatus::Confirmed {
                return Err(LedgerError::InvalidState {
                    id,
                    expected: DepositStatus::Confirmed,
                    actual: current.status,
                });
            }
            if current.sweep_tx_id.as_deref() == Some(sweep_tx_id) {
                return Ok(current);
            }

            let mut next = current.clone();
            next.sweep_tx_id = Some(sweep_tx_id.to_string());

            if self.store.compare_and_set(&current, &next).await? {
                warn!(
                    deposit_id = %id,
                    chain = %next.chain,
                    sweep_tx_id,
                    "Sweep transaction noted, deposit still awaiting SWEPT"
                );
                return Ok(next);
            }
        }

        let current = self.store.find(id).await?.ok_or(LedgerError::NotFound(id))?;
        Err(LedgerError::Conflict {
            chain: current.chain,
            tx_id: current.tx_id,
        })
    }

    /// Note a failed sweep attempt. Status is left untouched.
    ///
    /// With `halt` set the deposit drops out of automatic retries until a
    /// manual sweep succeeds.
    pub async fn record_sweep_failure(
        &self,
        id: DepositId,
        reason: &str,
        halt: bool,
    ) -> Result<OnchainDeposit, LedgerError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.find(id).await?.ok_or(LedgerError::NotFound(id))?;
            if current.status != DepositStatus::Confirmed {
                return Ok(current);
            }

            let mut next = current.clone();
            next.sweep_attempts = current.sweep_attempts.saturating_add(1);
            next.last_sweep_error = Some(reason.chars().take(MAX_ERROR_LEN).collect());
            next.last_sweep_attempt_at = Some(Utc::now());
            next.sweep_halted = halt;

            if self.store.compare_and_set(&current, &next).await? {
                if halt {
                    warn!(deposit_id = %id, reason, "Automatic sweeps halted for deposit");
                }
                return Ok(next);
            }
        }

        let current = self.store.find(id).await?.ok_or(LedgerError::NotFound(id))?;
        Err(LedgerError::Conflict {
            chain: current.chain,
            tx_id: current.tx_id,
        })
    }

    pub async fn get(&self, id: DepositId) -> Result<OnchainDeposit, LedgerError> {
        self.store.find(id).await?.ok_or(LedgerError::NotFound(id))
    }

    pub async fn find_by_tx(
        &self,
        chain: ChainId,
        tx_id: &str,
    ) -> Result<Option<OnchainDeposit>, LedgerError> {
        Ok(self.store.find_by_tx(chain, tx_id).await?)
    }

    /// Deposits still waiting for confirmations
    pub async fn list_confirming(&self, chain: ChainId) -> Result<Vec<OnchainDeposit>, LedgerError> {
        Ok(self
            .store
            .list_by_status(chain, DepositStatus::Confirming)
            .await?)
    }

    /// Confirmed deposits that have not been swept yet
    pub async fn list_unswept(&self, chain: ChainId) -> Result<Vec<OnchainDeposit>, LedgerError> {
        Ok(self
            .store
            .list_by_status(chain, DepositStatus::Confirmed)
            .await?)
    }
}
