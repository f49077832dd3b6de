//! Scriptable sponsored transfer for engine tests

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::sentinel::ClientError;

use super::error::SweepError;
use super::signers::{ChainSigner, SponsoredSigners};
use super::{SponsoredTransfer, SweepPlan, SweepReceipt};

pub struct MockSponsoredTransfer {
    pub executed: AtomicUsize,
    pub plans: Mutex<Vec<SweepPlan>>,
    sponsor_balance: AtomicU64,
    fail_sponsor: Mutex<bool>,
    fail_rpc: Mutex<bool>,
    fail_revert: Mutex<bool>,
    delay: Mutex<Duration>,
}

impl MockSponsoredTransfer {
    pub fn new() -> Self {
        Self {
            executed: AtomicUsize::new(0),
            plans: Mutex::new(Vec::new()),
            sponsor_balance: AtomicU64::new(1_000_000_000),
            fail_sponsor: Mutex::new(false),
            fail_rpc: Mutex::new(false),
            fail_revert: Mutex::new(false),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Sponsor wallet empty: every execute fails before submitting
    pub fn set_fail_sponsor(&self, fail: bool) {
        *self.fail_sponsor.lock().unwrap() = fail;
        if fail {
            self.sponsor_balance.store(0, Ordering::SeqCst);
        }
    }

    pub fn set_fail_rpc(&self, fail: bool) {
        *self.fail_rpc.lock().unwrap() = fail;
    }

    /// Transaction lands and reverts
    pub fn set_fail_revert(&self, fail: bool) {
        *self.fail_revert.lock().unwrap() = fail;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_sponsor_balance(&self, balance: u64) {
        self.sponsor_balance.store(balance, Ordering::SeqCst);
    }
}

#[async_trait]
impl SponsoredTransfer for MockSponsoredTransfer {
    async fn execute(
        &self,
        plan: &SweepPlan,
        signers: &SponsoredSigners,
    ) -> Result<SweepReceipt, SweepError> {
        let n = self.executed.fetch_add(1, Ordering::SeqCst) + 1;
        self.plans.lock().unwrap().push(plan.clone());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_sponsor.lock().unwrap() {
            return Err(SweepError::SponsorInsufficientFunds {
                sponsor: signers.fee_payer.address(),
                balance: 0,
                required: 42_000,
            });
        }
        if *self.fail_rpc.lock().unwrap() {
            return Err(SweepError::Client(ClientError::Timeout(
                "sendTransaction".to_string(),
            )));
        }
        if *self.fail_revert.lock().unwrap() {
            return Err(SweepError::Client(ClientError::TransactionFailed(
                "execution reverted".to_string(),
            )));
        }
        Ok(SweepReceipt {
            sweep_tx_id: format!("sweep-{n}"),
            funding_tx_id: None,
            gas_spent: 10_000,
        })
    }

    async fn sponsor_balance(&self, _sponsor: &ChainSigner) -> Result<u128, SweepError> {
        Ok(self.sponsor_balance.load(Ordering::SeqCst) as u128)
    }
}
