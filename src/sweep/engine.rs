//! Sweep Engine
//!
//! Drives one sponsored sweep end to end: re-read the deposit, decrypt the
//! deposit wallet key, run the chain adapter under a timeout, then ask the
//! ledger for CONFIRMED -> SWEPT. The deposit row is only touched through
//! the ledger, and only the final transition changes its status.
//!
//! Sweeps on one chain run one at a time so concurrent sweeps never race
//! for the sponsor balance.
//!
//! A sweep that landed on chain but could not be marked SWEPT keeps its
//! transaction id (on the row when possible, in memory otherwise). Later
//! attempts only finish the ledger write and never submit again.

use crate::audit::{AuditEvent, AuditSink};
use crate::config::SweepConfig;
use crate::core_types::{AddressId, ChainFamily, ChainId, DepositId};
use crate::ledger::{DepositLedger, DepositStatus, OnchainDeposit};
use crate::money;
use crate::registry::{AddressRegistry, DepositAddress};
use crate::sentinel::{AssetRule, ChainConfig, SentinelError, SweepTrigger, asset_rules};
use crate::shutdown::ShutdownSignal;
use crate::vault::KeyVault;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::error::SweepError;
use super::signers::{ChainSigner, SponsoredSigners};
use super::{SponsoredTransfer, SweepPlan, SweepReceipt};

/// Extra time `drain` allows on top of the sweep timeout
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub chain: ChainId,
    pub family: ChainFamily,
    pub treasury: String,
    pub assets: HashMap<String, AssetRule>,
    pub timeout: Duration,
    pub retry_interval: Duration,
    pub max_attempts: u32,
    /// Native base units
    pub sponsor_min_balance: Option<u128>,
}

impl SweepSettings {
    pub fn from_config(chain: &ChainConfig, sweep: &SweepConfig) -> Result<Self, SentinelError> {
        let native_decimals = chain
            .native_asset()
            .map(|a| a.decimals)
            .unwrap_or(match chain.family {
                ChainFamily::Solana => 9,
                ChainFamily::Evm => 18,
            });
        let sponsor_min_balance = chain
            .sweep
            .sponsor_min_balance
            .map(|min| money::to_base_units(min, native_decimals))
            .transpose()
            .map_err(|e| {
                SentinelError::Config(format!("{}: sponsor_min_balance: {}", chain.name, e))
            })?;

        Ok(Self {
            chain: chain.chain_id()?,
            family: chain.family,
            treasury: chain.sweep.treasury_address.clone(),
            assets: asset_rules(chain)?,
            timeout: sweep.timeout(),
            retry_interval: sweep.retry_interval(),
            max_attempts: sweep.max_attempts,
            sponsor_min_balance,
        })
    }
}

/// Outcome of one retry pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub swept: usize,
    pub failed: usize,
    pub in_flight: usize,
    /// Deposits at `max_attempts`; only a manual sweep retries them
    pub exhausted: usize,
    /// Last failure was not retryable; only a manual sweep retries them
    pub halted: usize,
    /// No active address or unknown asset
    pub skipped: usize,
}

/// Removes the deposit from the in-flight set when the sweep ends
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<DepositId, ()>,
    id: DepositId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

pub struct SweepEngine {
    settings: SweepSettings,
    ledger: Arc<DepositLedger>,
    registry: Arc<dyn AddressRegistry>,
    vault: Arc<dyn KeyVault>,
    transfer: Arc<dyn SponsoredTransfer>,
    sponsor: Arc<ChainSigner>,
    audit: Arc<dyn AuditSink>,
    /// One sweep at a time per chain
    serial: Mutex<()>,
    in_flight: DashMap<DepositId, ()>,
    /// Landed on chain, SWEPT not written yet
    unrecorded: DashMap<DepositId, SweepReceipt>,
    /// Sweeps started by the watcher
    tasks: std::sync::Mutex<JoinSet<()>>,
    shutdown: ShutdownSignal,
}

impl SweepEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: SweepSettings,
        ledger: Arc<DepositLedger>,
        registry: Arc<dyn AddressRegistry>,
        vault: Arc<dyn KeyVault>,
        transfer: Arc<dyn SponsoredTransfer>,
        sponsor: Arc<ChainSigner>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        info!(
            "{}: Sweep engine ready, sponsor {}, treasury {}",
            settings.chain,
            sponsor.address(),
            settings.treasury
        );
        Self {
            settings,
            ledger,
            registry,
            vault,
            transfer,
            sponsor,
            audit,
            serial: Mutex::new(()),
            in_flight: DashMap::new(),
            unrecorded: DashMap::new(),
            tasks: std::sync::Mutex::new(JoinSet::new()),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn chain(&self) -> ChainId {
        self.settings.chain
    }

    /// Sponsor address, which the watcher must not count as a depositor
    pub fn sponsor_address(&self) -> String {
        self.sponsor.address()
    }

    /// Sweep one confirmed deposit held at `address`.
    ///
    /// Precondition failures (already in flight, not CONFIRMED, below
    /// threshold, shutting down) are returned without touching the row.
    /// Every other failure is recorded on the deposit, which stays CONFIRMED.
    pub async fn sweep(
        &self,
        deposit_id: DepositId,
        address: &DepositAddress,
    ) -> Result<SweepReceipt, SweepError> {
        self.run_sweep(deposit_id, Some(address)).await
    }

    /// Operator retry by deposit id
    pub async fn sweep_by_id(&self, deposit_id: DepositId) -> Result<SweepReceipt, SweepError> {
        let deposit = self.ledger.get(deposit_id).await?;
        let address = match self.find_address(deposit.deposit_address_id).await {
            Ok(address) => Some(address),
            // Only the ledger write is left, no key needed
            Err(SweepError::AddressNotFound(_)) if self.has_unrecorded_sweep(&deposit) => None,
            Err(e) => return Err(e),
        };
        self.run_sweep(deposit_id, address.as_ref()).await
    }

    async fn run_sweep(
        &self,
        deposit_id: DepositId,
        address: Option<&DepositAddress>,
    ) -> Result<SweepReceipt, SweepError> {
        if self.in_flight.insert(deposit_id, ()).is_some() {
            debug!("{}: Sweep of {} already in flight", self.settings.chain, deposit_id);
            return Err(SweepError::AlreadyInFlight(deposit_id));
        }
        let _in_flight = InFlightGuard {
            in_flight: &self.in_flight,
            id: deposit_id,
        };
        let _serial = self.serial.lock().await;
        if self.shutdown.is_shutdown_requested() {
            return Err(SweepError::ShuttingDown(deposit_id));
        }

        let deposit = self.ledger.get(deposit_id).await?;
        if deposit.status == DepositStatus::Confirmed
            && let Some(receipt) = self.unrecorded_receipt(&deposit)
        {
            info!(
                "{}: Deposit {} already moved by {}, recording it",
                self.settings.chain, deposit.id, receipt.sweep_tx_id
            );
            return self.record_swept(&deposit, receipt).await;
        }
        let rule = self.check_sweepable(&deposit)?;
        let address = address.ok_or(SweepError::AddressNotFound(deposit.deposit_address_id))?;

        match self.execute(&deposit, rule, address).await {
            Ok(receipt) => self.record_swept(&deposit, receipt).await,
            Err(e) => {
                self.on_failure(&deposit, &e).await;
                Err(e)
            }
        }
    }

    fn has_unrecorded_sweep(&self, deposit: &OnchainDeposit) -> bool {
        deposit.sweep_tx_id.is_some() || self.unrecorded.contains_key(&deposit.id)
    }

    fn unrecorded_receipt(&self, deposit: &OnchainDeposit) -> Option<SweepReceipt> {
        if let Some(receipt) = self.unrecorded.get(&deposit.id) {
            return Some(receipt.clone());
        }
        deposit.sweep_tx_id.as_ref().map(|tx| SweepReceipt {
            sweep_tx_id: tx.clone(),
            funding_tx_id: None,
            gas_spent: 0,
        })
    }

    /// CONFIRMED -> SWEPT for a sweep that landed. On failure the receipt is
    /// kept so no later attempt submits again.
    async fn record_swept(
        &self,
        deposit: &OnchainDeposit,
        receipt: SweepReceipt,
    ) -> Result<SweepReceipt, SweepError> {
        let chain = self.settings.chain;
        match self.ledger.mark_swept(deposit.id, &receipt.sweep_tx_id).await {
            Ok(_) => {
                self.unrecorded.remove(&deposit.id);
                Ok(receipt)
            }
            Err(e) => {
                error!(
                    "{}: Deposit {} moved on chain by {} but ledger update failed: {}",
                    chain, deposit.id, receipt.sweep_tx_id, e
                );
                if deposit.sweep_tx_id.as_deref() != Some(receipt.sweep_tx_id.as_str())
                    && let Err(le) = self
                        .ledger
                        .record_sweep_submitted(deposit.id, &receipt.sweep_tx_id)
                        .await
                {
                    warn!(
                        "{}: Sweep tx of {} kept in memory only: {}",
                        chain, deposit.id, le
                    );
                }
                let sweep_tx_id = receipt.sweep_tx_id.clone();
                self.unrecorded.insert(deposit.id, receipt);
                Err(SweepError::SweptUnrecorded {
                    id: deposit.id,
                    sweep_tx_id,
                    source: e,
                })
            }
        }
    }

    fn check_sweepable(&self, deposit: &OnchainDeposit) -> Result<&AssetRule, SweepError> {
        if deposit.status != DepositStatus::Confirmed {
            return Err(SweepError::NotSweepable {
                id: deposit.id,
                status: deposit.status,
            });
        }
        let rule = self
            .settings
            .assets
            .get(&deposit.asset)
            .ok_or_else(|| SweepError::UnknownAsset(deposit.asset.clone()))?;
        if deposit.amount < rule.sweep_threshold {
            return Err(SweepError::BelowThreshold(deposit.id));
        }
        Ok(rule)
    }

    async fn execute(
        &self,
        deposit: &OnchainDeposit,
        rule: &AssetRule,
        address: &DepositAddress,
    ) -> Result<SweepReceipt, SweepError> {
        if address.id != deposit.deposit_address_id {
            return Err(SweepError::AddressNotFound(deposit.deposit_address_id));
        }

        let owner = {
            let secret = self.vault.decrypt(&address.encrypted_key)?;
            ChainSigner::from_secret(
                self.settings.family,
                &secret,
                self.settings.chain.evm_chain_id(),
            )?
        };
        if !owner.controls(&address.address) {
            return Err(SweepError::AddressMismatch {
                expected: address.address.clone(),
                actual: owner.address(),
            });
        }

        let plan = SweepPlan {
            deposit_id: deposit.id,
            chain: self.settings.chain,
            asset: deposit.asset.clone(),
            kind: rule.kind.clone(),
            decimals: rule.decimals,
            amount: money::to_base_units(deposit.amount, rule.decimals)?,
            source: address.address.clone(),
            treasury: self.settings.treasury.clone(),
        };
        let signers = SponsoredSigners {
            owner,
            fee_payer: self.sponsor.clone(),
        };

        info!(
            "{}: Sweeping deposit {} ({} {}) from {}",
            plan.chain, deposit.id, deposit.amount, deposit.asset, plan.source
        );
        let receipt = tokio::time::timeout(
            self.settings.timeout,
            self.transfer.execute(&plan, &signers),
        )
        .await
        .map_err(|_| SweepError::Timeout(self.settings.timeout))??;

        self.audit.emit(AuditEvent::SweepSucceeded {
            deposit_id: deposit.id,
            chain: plan.chain,
            asset: deposit.asset.clone(),
            amount: deposit.amount,
            sweep_tx_id: receipt.sweep_tx_id.clone(),
            funding_tx_id: receipt.funding_tx_id.clone(),
            gas_spent: receipt.gas_spent,
        });
        Ok(receipt)
    }

    async fn on_failure(&self, deposit: &OnchainDeposit, e: &SweepError) {
        let chain = self.settings.chain;
        warn!(
            "{}: Sweep of deposit {} failed [{}]: {}",
            chain,
            deposit.id,
            e.code(),
            e
        );

        let halt = !e.is_retryable();
        if let Err(le) = self
            .ledger
            .record_sweep_failure(deposit.id, &e.to_string(), halt)
            .await
        {
            warn!(
                "{}: Failed to record sweep failure of {}: {}",
                chain, deposit.id, le
            );
        }

        self.audit.emit(AuditEvent::SweepFailed {
            deposit_id: deposit.id,
            chain,
            asset: deposit.asset.clone(),
            code: e.code(),
            reason: e.to_string(),
        });

        if let SweepError::SponsorInsufficientFunds {
            sponsor,
            balance,
            required,
        } = e
        {
            error!(
                "{}: Sponsor {} cannot cover sweeps ({} < {}), top it up",
                chain, sponsor, balance, required
            );
            self.audit.emit(AuditEvent::SponsorBalanceLow {
                chain,
                sponsor: sponsor.clone(),
                balance: *balance,
                required: *required,
            });
        }
    }

    async fn find_address(&self, id: AddressId) -> Result<DepositAddress, SweepError> {
        self.registry
            .list_active_addresses(self.settings.chain)
            .await?
            .into_iter()
            .find(|a| a.id == id)
            .ok_or(SweepError::AddressNotFound(id))
    }

    /// Alert when the sponsor is under its configured floor
    pub async fn check_sponsor_balance(&self) {
        let Some(min) = self.settings.sponsor_min_balance else {
            return;
        };
        match self.transfer.sponsor_balance(&self.sponsor).await {
            Ok(balance) if balance < min => {
                warn!(
                    "{}: Sponsor {} balance {} below floor {}",
                    self.settings.chain,
                    self.sponsor.address(),
                    balance,
                    min
                );
                self.audit.emit(AuditEvent::SponsorBalanceLow {
                    chain: self.settings.chain,
                    sponsor: self.sponsor.address(),
                    balance,
                    required: min,
                });
            }
            Ok(_) => {}
            Err(e) => warn!(
                "{}: Failed to read sponsor balance: {}",
                self.settings.chain, e
            ),
        }
    }

    /// Re-attempt every CONFIRMED deposit above threshold that has not used up
    /// its attempts
    pub async fn retry_pass(&self) -> Result<RetryReport, SweepError> {
        let chain = self.settings.chain;
        self.check_sponsor_balance().await;

        let mut report = RetryReport::default();
        let unswept = self.ledger.list_unswept(chain).await?;
        if unswept.is_empty() {
            return Ok(report);
        }

        let addresses: HashMap<AddressId, DepositAddress> = self
            .registry
            .list_active_addresses(chain)
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        for deposit in unswept {
            if self.shutdown.is_shutdown_requested() {
                break;
            }
            // Landed sweeps only need the ledger write, whatever their history
            let unrecorded = self.has_unrecorded_sweep(&deposit);
            if !unrecorded {
                let Some(rule) = self.settings.assets.get(&deposit.asset) else {
                    report.skipped += 1;
                    continue;
                };
                if deposit.amount < rule.sweep_threshold {
                    continue;
                }
                if deposit.sweep_halted {
                    report.halted += 1;
                    continue;
                }
                if deposit.sweep_attempts >= self.settings.max_attempts {
                    report.exhausted += 1;
                    continue;
                }
            }
            let address = addresses.get(&deposit.deposit_address_id);
            if address.is_none() && !unrecorded {
                warn!(
                    "{}: No active address {} for deposit {}",
                    chain, deposit.deposit_address_id, deposit.id
                );
                report.skipped += 1;
                continue;
            }

            report.attempted += 1;
            match self.run_sweep(deposit.id, address).await {
                Ok(_) => report.swept += 1,
                Err(SweepError::AlreadyInFlight(_)) => report.in_flight += 1,
                Err(_) => report.failed += 1,
            }
        }

        if report.attempted > 0 || report.exhausted > 0 || report.halted > 0 {
            info!(
                "{}: Retry pass: {} attempted, {} swept, {} failed, {} exhausted, {} halted",
                chain,
                report.attempted,
                report.swept,
                report.failed,
                report.exhausted,
                report.halted
            );
        }
        Ok(report)
    }

    /// Periodic retry pass until [`SweepEngine::stop`]
    pub fn start_retry_loop(self: &Arc<Self>) -> JoinHandle<()> {
        self.shutdown.reset();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let chain = engine.settings.chain;
            info!(
                "{}: Sweep retry loop every {:?}",
                chain, engine.settings.retry_interval
            );
            loop {
                engine
                    .shutdown
                    .sleep_or_shutdown(engine.settings.retry_interval)
                    .await;
                if engine.shutdown.is_shutdown_requested() {
                    break;
                }
                if let Err(e) = engine.retry_pass().await {
                    warn!("{}: Retry pass aborted: {}", chain, e);
                }
            }
            info!("{}: Sweep retry loop stopped", chain);
        })
    }

    /// Stop the retry loop and refuse sweeps that have not started yet.
    /// The sweep holding the chain lock runs on; [`SweepEngine::drain`]
    /// waits for it.
    pub fn stop(&self) {
        self.shutdown.request_shutdown();
    }

    /// Run a sweep on its own task, tracked until [`SweepEngine::drain`]
    pub fn spawn_sweep(self: &Arc<Self>, deposit: OnchainDeposit, address: DepositAddress) {
        let engine = Arc::clone(self);
        let task = async move {
            let chain = engine.chain();
            match engine.sweep(deposit.id, &address).await {
                Ok(receipt) => debug!(
                    "{}: Triggered sweep of {} done (tx: {})",
                    chain, deposit.id, receipt.sweep_tx_id
                ),
                Err(e) if e.is_precondition() => {
                    debug!("{}: Triggered sweep of {} skipped: {}", chain, deposit.id, e)
                }
                Err(e) => debug!("{}: Triggered sweep of {} failed: {}", chain, deposit.id, e),
            }
        };

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Wait for every spawned sweep to end, up to the sweep timeout plus a
    /// grace period. Call after [`SweepEngine::stop`].
    pub async fn drain(&self) {
        let chain = self.settings.chain;
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        if tasks.is_empty() {
            return;
        }

        info!("{}: Waiting for {} sweep task(s)", chain, tasks.len());
        let deadline = self.settings.timeout + DRAIN_GRACE;
        let drained = tokio::time::timeout(deadline, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!("{}: Sweep task ended abnormally: {}", chain, e);
                }
            }
        })
        .await;

        if drained.is_err() {
            error!(
                "{}: {} sweep task(s) still running after {:?}, aborting",
                chain,
                tasks.len(),
                deadline
            );
            tasks.shutdown().await;
        }
    }
}

/// Runs triggered sweeps on the engine's task set so the watcher never waits
pub struct SweepDispatcher(pub Arc<SweepEngine>);

impl SweepTrigger for SweepDispatcher {
    fn trigger(&self, deposit: OnchainDeposit, address: DepositAddress) {
        self.0.spawn_sweep(deposit, address);
    }
}
