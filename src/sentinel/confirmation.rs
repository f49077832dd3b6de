//! Confirmation Monitor
//!
//! Advances confirmation counts of deposits still CONFIRMING and reports
//! the ones that crossed into CONFIRMED on this pass.

use crate::core_types::{ChainId, Height};
use crate::ledger::{DepositLedger, Observation, OnchainDeposit};
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::SentinelError;

/// Blocks on top of, and including, the transaction's block.
///
/// A transaction in the current block has one confirmation. A height ahead
/// of the observed tip (lagging RPC node) counts as zero.
#[inline]
pub fn confirmations(current_height: Height, tx_height: Height) -> u64 {
    if current_height >= tx_height {
        current_height - tx_height + 1
    } else {
        0
    }
}

pub struct ConfirmationMonitor {
    ledger: Arc<DepositLedger>,
}

impl ConfirmationMonitor {
    pub fn new(ledger: Arc<DepositLedger>) -> Self {
        Self { ledger }
    }

    /// Re-evaluate every CONFIRMING deposit on `chain` against `current_height`.
    ///
    /// Returns deposits that reached CONFIRMED during this call. A failure on
    /// one row is logged and does not stop the others.
    pub async fn update_confirmations(
        &self,
        chain: ChainId,
        current_height: Height,
    ) -> Result<Vec<OnchainDeposit>, SentinelError> {
        let pending = self.ledger.list_confirming(chain).await?;
        if pending.is_empty() {
            return Ok(vec![]);
        }

        debug!("{}: Checking {} pending deposits", chain, pending.len());

        let mut newly_confirmed = Vec::new();
        for deposit in pending {
            let confs = confirmations(current_height, deposit.block_height);
            if confs <= deposit.confirmations {
                continue;
            }

            let obs = Observation::from_deposit(&deposit, confs);
            match self
                .ledger
                .record_or_update(chain, &deposit.tx_id, obs)
                .await
            {
                Ok(outcome) if outcome.first_confirmed => newly_confirmed.push(outcome.deposit),
                Ok(_) => {}
                Err(e) => warn!(
                    "{}: Failed to update confirmations for {}: {}",
                    chain, deposit.tx_id, e
                ),
            }
        }

        Ok(newly_confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{DepositStatus, MemoryDepositStore};
    use rust_decimal::Decimal;

    #[test]
    fn test_confirmation_arithmetic() {
        assert_eq!(confirmations(100, 100), 1);
        assert_eq!(confirmations(505, 500), 6);
        assert_eq!(confirmations(512, 500), 13);
        assert_eq!(confirmations(99, 100), 0);
    }

    fn obs(block_height: u64, confirmations: u64) -> Observation {
        Observation {
            user_id: uuid::Uuid::new_v4(),
            deposit_address_id: uuid::Uuid::new_v4(),
            asset: "USDC".to_string(),
            amount: Decimal::from(50),
            from_address: None,
            block_height,
            confirmations,
            required_confirmations: 12,
        }
    }

    #[tokio::test]
    async fn test_monitor_promotes_matured_deposits_once() {
        let chain = ChainId::Evm(8453);
        let ledger = Arc::new(DepositLedger::new(Arc::new(MemoryDepositStore::new())));
        ledger.record_or_update(chain, "0xa", obs(500, 6)).await.unwrap();
        ledger.record_or_update(chain, "0xb", obs(510, 1)).await.unwrap();

        let monitor = ConfirmationMonitor::new(ledger.clone());

        let promoted = monitor.update_confirmations(chain, 512).await.unwrap();
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].tx_id, "0xa");
        assert_eq!(promoted[0].confirmations, 13);
        assert_eq!(promoted[0].status, DepositStatus::Confirmed);

        // 0xb advanced but still pending
        let pending = ledger.list_confirming(chain).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].confirmations, 3);

        // Re-running at the same height promotes nothing
        assert!(monitor.update_confirmations(chain, 512).await.unwrap().is_empty());
    }
}
