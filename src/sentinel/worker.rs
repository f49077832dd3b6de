//! Chain Watcher - per-chain polling loop
//!
//! Each tick lists the chain's active deposit addresses, asks the chain
//! client for inbound transfers inside a bounded height window, records
//! them in the ledger and re-evaluates deposits still confirming.
//!
//! The tick is pure in its cursor: it receives the last processed height
//! and returns the next one in its [`TickReport`]. Only the run loop keeps
//! it between ticks (and persists it through a [`CursorStore`]).

use crate::audit::{AuditEvent, AuditSink};
use crate::core_types::{AddressId, ChainId, Height};
use crate::ledger::{DepositLedger, Observation, OnchainDeposit};
use crate::money;
use crate::registry::{AddressRegistry, DepositAddress};
use crate::shutdown::ShutdownSignal;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::client::{AssetKind, ChainClient, InboundTransfer};
use super::config::ChainConfig;
use super::confirmation::{ConfirmationMonitor, confirmations};
use super::cursor::CursorStore;
use super::error::SentinelError;

/// How the watcher treats one configured asset
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRule {
    pub kind: AssetKind,
    pub decimals: u32,
    pub sweep_threshold: Decimal,
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub chain: ChainId,
    pub required_confirmations: u64,
    pub poll_interval: Duration,
    pub address_concurrency: usize,
    pub max_blocks_per_tick: u64,
    pub initial_lookback: u64,
    pub start_height: Option<Height>,
    pub assets: HashMap<String, AssetRule>,
    /// Sponsor and treasury addresses, lowercased. Transfers from them are
    /// service traffic, not deposits.
    pub ignored_senders: HashSet<String>,
}

impl WatcherSettings {
    pub fn from_config<I>(config: &ChainConfig, ignored_senders: I) -> Result<Self, SentinelError>
    where
        I: IntoIterator<Item = String>,
    {
        let assets = asset_rules(config)?;

        Ok(Self {
            chain: config.chain_id()?,
            required_confirmations: config.required_confirmations(),
            poll_interval: config.poll_interval(),
            address_concurrency: config.address_concurrency(),
            max_blocks_per_tick: config.max_blocks_per_tick(),
            initial_lookback: config.initial_lookback(),
            start_height: config.scanning.start_height,
            assets,
            ignored_senders: ignored_senders
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect(),
        })
    }

    pub fn is_ignored_sender(&self, sender: Option<&str>) -> bool {
        sender.is_some_and(|s| self.ignored_senders.contains(&s.to_lowercase()))
    }

    /// Height window to scan this tick, inclusive. `None` when caught up.
    pub fn scan_window(&self, last_height: Option<Height>, current: Height) -> Option<(Height, Height)> {
        let from = match last_height {
            Some(h) => h.saturating_add(1),
            None => self
                .start_height
                .unwrap_or_else(|| current.saturating_sub(self.initial_lookback)),
        };
        if from > current {
            return None;
        }
        let to = current.min(from.saturating_add(self.max_blocks_per_tick.max(1) - 1));
        Some((from, to))
    }
}

/// Watch/sweep rules for every asset configured on `config`
pub fn asset_rules(config: &ChainConfig) -> Result<HashMap<String, AssetRule>, SentinelError> {
    config
        .assets
        .iter()
        .map(|a| {
            let kind = match (&a.contract, a.native) {
                (_, true) => AssetKind::Native,
                (Some(contract), false) => AssetKind::Token {
                    contract: contract.clone(),
                },
                (None, false) => {
                    return Err(SentinelError::Config(format!(
                        "{}/{}: non-native asset needs a contract",
                        config.name, a.symbol
                    )));
                }
            };
            Ok((
                a.symbol.clone(),
                AssetRule {
                    kind,
                    decimals: a.decimals,
                    sweep_threshold: a.sweep_threshold,
                },
            ))
        })
        .collect()
}

/// Receives deposits that just became sweepable
pub trait SweepTrigger: Send + Sync {
    /// Must return without waiting for the sweep
    fn trigger(&self, deposit: OnchainDeposit, address: DepositAddress);
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub current_height: Height,
    pub window: Option<(Height, Height)>,
    /// Cursor for the next tick. Stays at the input height if anything failed.
    pub next_height: Option<Height>,
    pub addresses: usize,
    pub transfers_seen: usize,
    pub recorded: usize,
    pub newly_confirmed: usize,
    pub sweeps_triggered: usize,
    /// Skipped transfers: zero amount or sent by the service itself
    pub ignored: usize,
    /// Address checks or ledger writes that failed this tick
    pub failures: usize,
}

pub struct ChainWatcher {
    settings: WatcherSettings,
    client: Arc<dyn ChainClient>,
    registry: Arc<dyn AddressRegistry>,
    ledger: Arc<DepositLedger>,
    monitor: ConfirmationMonitor,
    cursor: Arc<dyn CursorStore>,
    sweeper: Option<Arc<dyn SweepTrigger>>,
    audit: Arc<dyn AuditSink>,
    running: AtomicBool,
    shutdown: ShutdownSignal,
}

impl ChainWatcher {
    pub fn new(
        settings: WatcherSettings,
        client: Arc<dyn ChainClient>,
        registry: Arc<dyn AddressRegistry>,
        ledger: Arc<DepositLedger>,
        cursor: Arc<dyn CursorStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            settings,
            client,
            registry,
            monitor: ConfirmationMonitor::new(ledger.clone()),
            ledger,
            cursor,
            sweeper: None,
            audit,
            running: AtomicBool::new(false),
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Deposits crossing into CONFIRMED above threshold are handed to `sweeper`
    pub fn with_sweeper(mut self, sweeper: Arc<dyn SweepTrigger>) -> Self {
        self.sweeper = Some(sweeper);
        self
    }

    pub fn chain(&self) -> ChainId {
        self.settings.chain
    }

    pub fn settings(&self) -> &WatcherSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the polling loop. A second call while running only logs a warning.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("{}: Watcher already running, start ignored", self.settings.chain);
            return None;
        }
        self.shutdown.reset();

        let watcher = Arc::clone(self);
        Some(tokio::spawn(async move {
            watcher.run().await;
            watcher.running.store(false, Ordering::SeqCst);
        }))
    }

    /// Let the current tick finish, then exit the loop
    pub fn stop(&self) {
        info!("{}: Watcher stop requested", self.settings.chain);
        self.shutdown.request_shutdown();
    }

    async fn run(&self) {
        let chain = self.settings.chain;
        info!(
            "{}: Watcher starting, poll interval {:?}, {} confirmations required",
            chain, self.settings.poll_interval, self.settings.required_confirmations
        );

        let Some(mut last_height) = self.load_cursor().await else {
            info!("{}: Watcher stopped before the cursor was loaded", chain);
            return;
        };

        while !self.shutdown.is_shutdown_requested() {
            match self.tick(last_height).await {
                Ok(report) => {
                    if report.next_height != last_height
                        && let Some(height) = report.next_height
                        && let Err(e) = self.cursor.save(chain, height).await
                    {
                        warn!("{}: Failed to persist cursor {}: {}", chain, height, e);
                    }
                    if report.recorded > 0 || report.newly_confirmed > 0 || report.failures > 0 {
                        info!(
                            "{}: Tick at {} window {:?}: {} recorded, {} confirmed, {} sweeps, {} failures",
                            chain,
                            report.current_height,
                            report.window,
                            report.recorded,
                            report.newly_confirmed,
                            report.sweeps_triggered,
                            report.failures
                        );
                    } else {
                        debug!("{}: Tick at {} idle", chain, report.current_height);
                    }
                    last_height = report.next_height;
                }
                Err(e) => warn!("{}: Tick aborted: {}", chain, e),
            }

            self.shutdown
                .sleep_or_shutdown(self.settings.poll_interval)
                .await;
        }

        info!("{}: Watcher stopped", chain);
    }

    /// Retries until the cursor loads. `None` only when stopped meanwhile.
    async fn load_cursor(&self) -> Option<Option<Height>> {
        loop {
            match self.cursor.load(self.settings.chain).await {
                Ok(height) => return Some(height),
                Err(e) => warn!("{}: Failed to load cursor: {}", self.settings.chain, e),
            }
            self.shutdown
                .sleep_or_shutdown(self.settings.poll_interval)
                .await;
            if self.shutdown.is_shutdown_requested() {
                return None;
            }
        }
    }

    /// One polling pass starting after `last_height`.
    ///
    /// Fails only when the chain height or the address list is unavailable;
    /// per-address errors are counted in the report instead.
    pub async fn tick(&self, last_height: Option<Height>) -> Result<TickReport, SentinelError> {
        let chain = self.settings.chain;
        let current = self.client.current_height().await?;
        let addresses = self.registry.list_active_addresses(chain).await?;

        let window = self.settings.scan_window(last_height, current);
        let mut report = TickReport {
            current_height: current,
            window,
            addresses: addresses.len(),
            ..Default::default()
        };

        if let Some((from, to)) = window {
            let mut targets = Vec::with_capacity(addresses.len());
            for address in &addresses {
                match self.settings.assets.get(&address.asset) {
                    Some(rule) => targets.push((address, rule)),
                    None => debug!(
                        "{}: Address {} has unconfigured asset {}",
                        chain, address.address, address.asset
                    ),
                }
            }

            // Futures are built eagerly but stay lazy until polled by
            // buffer_unordered; keeps the closure type out of the await
            // state so the spawned run loop type-checks as Send.
            let lookups: Vec<_> = targets
                .into_iter()
                .map(|(address, rule)| async move {
                    let result = self
                        .client
                        .transfers_to(&address.address, &rule.kind, from, to)
                        .await;
                    (address, rule, result)
                })
                .collect();
            let results: Vec<_> = stream::iter(lookups)
                .buffer_unordered(self.settings.address_concurrency.max(1))
                .collect()
                .await;

            for (address, rule, result) in results {
                match result {
                    Ok(transfers) => {
                        for transfer in transfers {
                            self.ingest(address, rule, transfer, current, &mut report)
                                .await;
                        }
                    }
                    Err(e) => {
                        if e.is_transient() {
                            warn!(
                                "{}: Failed to list {} transfers to {}: {}",
                                chain, address.asset, address.address, e
                            );
                        } else {
                            error!(
                                "{}: Cannot list {} transfers to {}, cursor held: {}",
                                chain, address.asset, address.address, e
                            );
                        }
                        report.failures += 1;
                    }
                }
            }
        }

        self.reevaluate_pending(&addresses, current, &mut report)
            .await;

        report.next_height = match window {
            Some((_, to)) if report.failures == 0 => Some(to),
            _ => last_height,
        };
        Ok(report)
    }

    async fn ingest(
        &self,
        address: &DepositAddress,
        rule: &AssetRule,
        transfer: InboundTransfer,
        current: Height,
        report: &mut TickReport,
    ) {
        let chain = self.settings.chain;
        report.transfers_seen += 1;

        if transfer.amount == 0 || self.settings.is_ignored_sender(transfer.counterparty.as_deref())
        {
            debug!("{}: Ignoring transfer {}", chain, transfer.tx_id);
            report.ignored += 1;
            return;
        }

        let amount = match money::to_decimal(transfer.amount, rule.decimals) {
            Ok(amount) => amount,
            Err(e) => {
                error!(
                    "{}: Unrepresentable amount {} in {}: {}",
                    chain, transfer.amount, transfer.tx_id, e
                );
                report.ignored += 1;
                return;
            }
        };

        let obs = Observation {
            user_id: address.user_id,
            deposit_address_id: address.id,
            asset: address.asset.clone(),
            amount,
            from_address: transfer.counterparty,
            block_height: transfer.height,
            confirmations: confirmations(current, transfer.height),
            required_confirmations: self.settings.required_confirmations,
        };

        match self.ledger.record_or_update(chain, &transfer.tx_id, obs).await {
            Ok(outcome) => {
                if outcome.created {
                    report.recorded += 1;
                    debug!(
                        "{}: Detected deposit {} {} to {} (tx: {}, {} confirmations)",
                        chain,
                        outcome.deposit.amount,
                        outcome.deposit.asset,
                        address.address,
                        outcome.deposit.tx_id,
                        outcome.deposit.confirmations
                    );
                }
                if outcome.first_confirmed {
                    self.on_confirmed(outcome.deposit, Some(address), report);
                }
            }
            Err(e) => {
                warn!("{}: Failed to record {}: {}", chain, transfer.tx_id, e);
                report.failures += 1;
            }
        }
    }

    async fn reevaluate_pending(
        &self,
        addresses: &[DepositAddress],
        current: Height,
        report: &mut TickReport,
    ) {
        let promoted = match self
            .monitor
            .update_confirmations(self.settings.chain, current)
            .await
        {
            Ok(promoted) => promoted,
            Err(e) => {
                warn!(
                    "{}: Failed to update confirmations: {}",
                    self.settings.chain, e
                );
                return;
            }
        };

        let by_id: HashMap<AddressId, &DepositAddress> =
            addresses.iter().map(|a| (a.id, a)).collect();
        for deposit in promoted {
            let address = by_id.get(&deposit.deposit_address_id).copied();
            self.on_confirmed(deposit, address, report);
        }
    }

    /// Runs once per deposit, on the CONFIRMING -> CONFIRMED edge
    fn on_confirmed(
        &self,
        deposit: OnchainDeposit,
        address: Option<&DepositAddress>,
        report: &mut TickReport,
    ) {
        let chain = self.settings.chain;
        report.newly_confirmed += 1;

        self.audit.emit(AuditEvent::DepositConfirmed {
            deposit_id: deposit.id,
            chain,
            asset: deposit.asset.clone(),
            amount: deposit.amount,
            latency_ms: deposit
                .confirmation_latency()
                .map(|d| d.num_milliseconds())
                .unwrap_or_default(),
        });

        let Some(rule) = self.settings.assets.get(&deposit.asset) else {
            warn!("{}: Confirmed deposit {} has unconfigured asset {}", chain, deposit.id, deposit.asset);
            return;
        };
        if deposit.amount < rule.sweep_threshold {
            info!(
                "{}: Deposit {} of {} {} below sweep threshold {}",
                chain, deposit.id, deposit.amount, deposit.asset, rule.sweep_threshold
            );
            return;
        }
        let Some(sweeper) = &self.sweeper else {
            return;
        };
        let Some(address) = address else {
            warn!(
                "{}: Deposit address {} of {} no longer active, sweep left to retry pass",
                chain, deposit.deposit_address_id, deposit.id
            );
            return;
        };

        debug!("{}: Triggering sweep of {}", chain, deposit.id);
        sweeper.trigger(deposit, address.clone());
        report.sweeps_triggered += 1;
    }
}
