use crate::core_types::{AddressId, ChainId, DepositId, Height, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::state::DepositStatus;

/// A deposit observed on chain. Unique per (chain, tx_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnchainDeposit {
    pub id: DepositId,
    pub user_id: UserId,
    pub deposit_address_id: AddressId,
    pub chain: ChainId,
    pub asset: String,
    /// EVM tx hash or Solana signature
    pub tx_id: String,
    /// Asset-native units (e.g. 50.0 USDC, not 50_000_000)
    pub amount: Decimal,
    pub confirmations: u64,
    pub required_confirmations: u64,
    pub status: DepositStatus,
    pub first_observed_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub swept_at: Option<DateTime<Utc>>,
    pub from_address: Option<String>,
    pub block_height: Height,
    pub sweep_tx_id: Option<String>,
    pub sweep_attempts: u32,
    pub last_sweep_error: Option<String>,
    pub last_sweep_attempt_at: Option<DateTime<Utc>>,
    /// Last failure needs operator action; the retry pass leaves the row alone
    pub sweep_halted: bool,
}

/// Attributes the watcher supplies to `record_or_update`
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub user_id: UserId,
    pub deposit_address_id: AddressId,
    pub asset: String,
    pub amount: Decimal,
    pub from_address: Option<String>,
    pub block_height: Height,
    pub confirmations: u64,
    pub required_confirmations: u64,
}

/// Result of `record_or_update`
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub deposit: OnchainDeposit,
    /// Row was inserted by this call
    pub created: bool,
    /// This call moved the row into CONFIRMED. True at most once per deposit.
    pub first_confirmed: bool,
}

impl Observation {
    /// Re-observation of a stored deposit with a fresh confirmation count
    pub fn from_deposit(deposit: &OnchainDeposit, confirmations: u64) -> Self {
        Self {
            user_id: deposit.user_id,
            deposit_address_id: deposit.deposit_address_id,
            asset: deposit.asset.clone(),
            amount: deposit.amount,
            from_address: deposit.from_address.clone(),
            block_height: deposit.block_height,
            confirmations,
            required_confirmations: deposit.required_confirmations,
        }
    }
}

impl OnchainDeposit {
    /// First sighting; status follows the initial confirmation count
    pub fn observed(chain: ChainId, tx_id: &str, obs: &Observation, now: DateTime<Utc>) -> Self {
        let status = DepositStatus::for_confirmations(obs.confirmations, obs.required_confirmations);
        Self {
            id: uuid::Uuid::new_v4(),
            user_id: obs.user_id,
            deposit_address_id: obs.deposit_address_id,
            chain,
            asset: obs.asset.clone(),
            tx_id: tx_id.to_string(),
            amount: obs.amount,
            confirmations: obs.confirmations,
            required_confirmations: obs.required_confirmations,
            status,
            first_observed_at: now,
            confirmed_at: (status == DepositStatus::Confirmed).then_some(now),
            swept_at: None,
            from_address: obs.from_address.clone(),
            block_height: obs.block_height,
            sweep_tx_id: None,
            sweep_attempts: 0,
            last_sweep_error: None,
            last_sweep_attempt_at: None,
            sweep_halted: false,
        }
    }

    /// Next version of this row for a new confirmation count.
    ///
    /// Returns `None` when nothing would change, including when `confirmations`
    /// is lower than what is stored.
    pub fn advanced(&self, confirmations: u64, now: DateTime<Utc>) -> Option<Self> {
        if confirmations <= self.confirmations {
            return None;
        }
        let mut next = self.clone();
        next.confirmations = confirmations;
        if self.status == DepositStatus::Confirming && confirmations >= self.required_confirmations
        {
            next.status = DepositStatus::Confirmed;
            next.confirmed_at = Some(now);
        }
        Some(next)
    }

    /// Detection-to-confirmation latency
    pub fn confirmation_latency(&self) -> Option<chrono::Duration> {
        self.confirmed_at.map(|at| at - self.first_observed_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(confirmations: u64, required: u64) -> Observation {
        Observation {
            user_id: uuid::Uuid::new_v4(),
            deposit_address_id: uuid::Uuid::new_v4(),
            asset: "USDC".to_string(),
            amount: Decimal::from(50),
            from_address: None,
            block_height: 500,
            confirmations,
            required_confirmations: required,
        }
    }

    #[test]
    fn test_observed_sets_status_and_confirmed_at() {
        let now = Utc::now();
        let pending = OnchainDeposit::observed(ChainId::Evm(8453), "0xabc", &obs(6, 12), now);
        assert_eq!(pending.status, DepositStatus::Confirming);
        assert!(pending.confirmed_at.is_none());

        let done = OnchainDeposit::observed(ChainId::Solana, "sig", &obs(1, 1), now);
        assert_eq!(done.status, DepositStatus::Confirmed);
        assert_eq!(done.confirmed_at, Some(now));
        assert_eq!(done.confirmation_latency(), Some(chrono::Duration::zero()));
    }

    #[test]
    fn test_advanced_is_forward_only() {
        let now = Utc::now();
        let d = OnchainDeposit::observed(ChainId::Evm(8453), "0xabc", &obs(6, 12), now);

        assert!(d.advanced(6, now).is_none());
        assert!(d.advanced(3, now).is_none());

        let later = d.advanced(13, now).unwrap();
        assert_eq!(later.status, DepositStatus::Confirmed);
        assert_eq!(later.confirmations, 13);
        assert!(later.confirmed_at.is_some());

        // Already confirmed: confirmations still move, confirmed_at stays put
        let t2 = now + chrono::Duration::seconds(30);
        let again = later.advanced(20, t2).unwrap();
        assert_eq!(again.confirmed_at, later.confirmed_at);
    }
}
