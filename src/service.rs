//! Service wiring
//!
//! Builds one watcher (and, with sweeping enabled, one sweep engine) per
//! configured chain on top of a shared PostgreSQL pool, then runs them until
//! Ctrl-C.

use crate::audit::{AuditSink, TracingAuditSink};
use crate::config::{AppConfig, ConfigError};
use crate::core_types::{ChainFamily, ChainId, DepositId};
use crate::db::Database;
use crate::ledger::{DepositLedger, LedgerError, PgDepositStore, init_schema};
use crate::registry::{AddressRegistry, PgAddressRegistry};
use crate::sentinel::{
    ChainClient, ChainConfig, ChainWatcher, ClientError, CursorStore, EvmClient, PgCursorStore,
    SentinelError, SolanaClient, WatcherSettings,
};
use crate::sweep::{
    ChainSigner, EvmSponsoredTransfer, SolanaSponsoredTransfer, SponsoredTransfer,
    SweepDispatcher, SweepEngine, SweepError, SweepReceipt, SweepSettings,
};
use crate::vault::{AesGcmVault, KeyVault, VaultError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Sentinel(#[from] SentinelError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Sweep(#[from] SweepError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("{chain}: RPC reports chain id {remote}, configured {configured}")]
    ChainIdMismatch {
        chain: String,
        configured: u64,
        remote: u64,
    },

    #[error("Sweeping is disabled for {0}")]
    SweepDisabled(ChainId),
}

/// Shared stores every chain runtime is built on
struct Stores {
    ledger: Arc<DepositLedger>,
    registry: Arc<dyn AddressRegistry>,
    cursor: Arc<dyn CursorStore>,
    vault: Arc<dyn KeyVault>,
    audit: Arc<dyn AuditSink>,
}

pub struct ChainRuntime {
    pub watcher: Arc<ChainWatcher>,
    pub engine: Option<Arc<SweepEngine>>,
}

pub struct SentinelService {
    db: Database,
    ledger: Arc<DepositLedger>,
    chains: Vec<ChainRuntime>,
}

impl SentinelService {
    /// Connect, prepare the schema and build every chain runtime. Nothing is
    /// started yet.
    pub async fn build(config: &AppConfig) -> Result<Self, ServiceError> {
        let db = Database::connect(&config.database_url()?, &config.database).await?;
        db.health_check().await?;
        init_schema(db.pool()).await?;

        let stores = Stores {
            ledger: Arc::new(DepositLedger::new(Arc::new(PgDepositStore::new(
                db.pool().clone(),
            )))),
            registry: Arc::new(PgAddressRegistry::new(db.pool().clone())),
            cursor: Arc::new(PgCursorStore::new(db.pool().clone())),
            vault: Arc::new(AesGcmVault::from_env(&config.vault.master_key_env)?),
            audit: Arc::new(TracingAuditSink),
        };

        let mut chains = Vec::with_capacity(config.chains.len());
        for chain in &config.chains {
            chains.push(build_chain(chain, config, &stores).await?);
        }

        Ok(Self {
            db,
            ledger: stores.ledger,
            chains,
        })
    }

    pub fn ledger(&self) -> &Arc<DepositLedger> {
        &self.ledger
    }

    pub fn chains(&self) -> &[ChainRuntime] {
        &self.chains
    }

    fn engine(&self, chain: ChainId) -> Result<&Arc<SweepEngine>, ServiceError> {
        self.chains
            .iter()
            .find(|c| c.watcher.chain() == chain)
            .and_then(|c| c.engine.as_ref())
            .ok_or(ServiceError::SweepDisabled(chain))
    }

    /// Operator retry of one deposit
    pub async fn sweep(&self, deposit_id: DepositId) -> Result<SweepReceipt, ServiceError> {
        let deposit = self.ledger.get(deposit_id).await?;
        let engine = self.engine(deposit.chain)?;
        Ok(engine.sweep_by_id(deposit_id).await?)
    }

    /// Start every watcher and retry loop, block until Ctrl-C, then stop
    /// them and wait for in-progress ticks and triggered sweeps to finish
    pub async fn run(&self) -> Result<(), ServiceError> {
        let mut handles = Vec::new();
        for runtime in &self.chains {
            if let Some(handle) = runtime.watcher.start() {
                handles.push(handle);
            }
            if let Some(engine) = &runtime.engine {
                handles.push(engine.start_retry_loop());
            }
        }
        info!("Deposit sentinel running on {} chain(s)", self.chains.len());

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
        }
        info!("Shutdown requested");

        for runtime in &self.chains {
            runtime.watcher.stop();
            if let Some(engine) = &runtime.engine {
                engine.stop();
            }
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Task ended abnormally: {}", e);
            }
        }
        // Watchers are stopped, so no sweep is spawned past this point
        for engine in self.chains.iter().filter_map(|c| c.engine.as_ref()) {
            engine.drain().await;
        }

        self.db.pool().close().await;
        info!("Deposit sentinel stopped");
        Ok(())
    }
}

async fn build_chain(
    chain: &ChainConfig,
    config: &AppConfig,
    stores: &Stores,
) -> Result<ChainRuntime, ServiceError> {
    let chain_id = chain.chain_id()?;
    let confirm_timeout = config.sweep.timeout();

    let (client, transfer): (Arc<dyn ChainClient>, Arc<dyn SponsoredTransfer>) =
        match chain.family {
            ChainFamily::Solana => {
                let client = Arc::new(SolanaClient::new(
                    &chain.rpc.url,
                    chain.rpc_timeout(),
                    confirm_timeout,
                    chain.signature_limit(),
                )?);
                let transfer: Arc<dyn SponsoredTransfer> =
                    Arc::new(SolanaSponsoredTransfer::new(client.clone()));
                let client: Arc<dyn ChainClient> = client;
                (client, transfer)
            }
            ChainFamily::Evm => {
                let configured = chain_id.evm_chain_id().unwrap_or_default();
                let client = Arc::new(EvmClient::new(
                    configured,
                    &chain.rpc.url,
                    chain.rpc_timeout(),
                    confirm_timeout,
                )?);
                let remote = client.remote_chain_id().await?;
                if remote != configured {
                    return Err(ServiceError::ChainIdMismatch {
                        chain: chain.name.clone(),
                        configured,
                        remote,
                    });
                }
                let transfer: Arc<dyn SponsoredTransfer> = Arc::new(EvmSponsoredTransfer::new(
                    client.clone(),
                    configured,
                    chain.sweep.gas_buffer_multiplier,
                ));
                let client: Arc<dyn ChainClient> = client;
                (client, transfer)
            }
        };

    let mut ignored = vec![chain.sweep.treasury_address.clone()];
    let engine = if config.sweep.enabled {
        let sponsor = Arc::new(ChainSigner::from_env(
            chain.family,
            &chain.sweep.sponsor_key_env,
            chain_id.evm_chain_id(),
        )?);
        ignored.push(sponsor.address());
        Some(Arc::new(SweepEngine::new(
            SweepSettings::from_config(chain, &config.sweep)?,
            stores.ledger.clone(),
            stores.registry.clone(),
            stores.vault.clone(),
            transfer,
            sponsor,
            stores.audit.clone(),
        )))
    } else {
        info!("{}: Sweeping disabled, watching only", chain.name);
        None
    };

    let mut watcher = ChainWatcher::new(
        WatcherSettings::from_config(chain, ignored)?,
        client,
        stores.registry.clone(),
        stores.ledger.clone(),
        stores.cursor.clone(),
        stores.audit.clone(),
    );
    if let Some(engine) = &engine {
        watcher = watcher.with_sweeper(Arc::new(SweepDispatcher(engine.clone())));
    }

    Ok(ChainRuntime {
        watcher: Arc::new(watcher),
        engine,
    })
}
