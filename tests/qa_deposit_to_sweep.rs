//! End-to-end: a transfer lands on a watched Solana address, the watcher
//! records and confirms it, the dispatcher hands it to the sweep engine and
//! the ledger ends at SWEPT. Chain and sponsor are in-memory stand-ins.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use deposit_sentinel::audit::{AuditEvent, MemoryAuditSink};
use deposit_sentinel::config::SweepConfig;
use deposit_sentinel::core_types::{ChainFamily, ChainId, DepositId, Height};
use deposit_sentinel::ledger::{DepositLedger, DepositStatus, MemoryDepositStore};
use deposit_sentinel::registry::{DepositAddress, StaticAddressRegistry};
use deposit_sentinel::sentinel::{
    AssetKind, ChainClient, ChainConfig, ChainWatcher, ClientError, Confirmation, InboundTransfer,
    MemoryCursorStore, SignedTransaction, WatcherSettings,
};
use deposit_sentinel::sweep::{
    ChainSigner, SponsoredSigners, SponsoredTransfer, SweepDispatcher, SweepEngine, SweepError,
    SweepPlan, SweepReceipt, SweepSettings,
};
use deposit_sentinel::vault::AesGcmVault;

const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

const SOLANA_YAML: &str = r#"
name: "solana"
family: solana
rpc:
  url: "http://localhost:8899"
sweep:
  treasury_address: "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM"
  sponsor_key_env: "SOLANA_SPONSOR_KEY"
assets:
  - symbol: "USDC"
    contract: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
    decimals: 6
    sweep_threshold: "10"
"#;

/// Chain with a settable tip and a fixed list of USDC transfers
struct FixedChain {
    height: AtomicU64,
    transfers: Mutex<Vec<(String, InboundTransfer)>>,
}

#[async_trait]
impl ChainClient for FixedChain {
    fn chain(&self) -> ChainId {
        ChainId::Solana
    }

    async fn current_height(&self) -> Result<Height, ClientError> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn transfers_to(
        &self,
        address: &str,
        asset: &AssetKind,
        from: Height,
        to: Height,
    ) -> Result<Vec<InboundTransfer>, ClientError> {
        if asset != &(AssetKind::Token { contract: USDC_MINT.to_string() }) {
            return Ok(Vec::new());
        }
        Ok(self
            .transfers
            .lock()
            .unwrap()
            .iter()
            .filter(|(to_addr, t)| to_addr == address && t.height >= from && t.height <= to)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn submit(&self, _tx: SignedTransaction) -> Result<Confirmation, ClientError> {
        Err(ClientError::TransactionFailed("read-only chain".to_string()))
    }
}

#[derive(Default)]
struct CountingSponsor {
    executed: AtomicUsize,
}

#[async_trait]
impl SponsoredTransfer for CountingSponsor {
    async fn execute(
        &self,
        plan: &SweepPlan,
        signers: &SponsoredSigners,
    ) -> Result<SweepReceipt, SweepError> {
        assert_eq!(signers.owner.address(), plan.source);
        let n = self.executed.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SweepReceipt {
            sweep_tx_id: format!("sweep-sig-{n}"),
            funding_tx_id: None,
            gas_spent: 5_000 + 2_039_280,
        })
    }

    async fn sponsor_balance(&self, _sponsor: &ChainSigner) -> Result<u128, SweepError> {
        Ok(1_000_000_000)
    }
}

struct Pipeline {
    watcher: Arc<ChainWatcher>,
    engine: Arc<SweepEngine>,
    chain: Arc<FixedChain>,
    ledger: Arc<DepositLedger>,
    store: Arc<MemoryDepositStore>,
    sponsor: Arc<CountingSponsor>,
    audit: Arc<MemoryAuditSink>,
    address: DepositAddress,
}

fn pipeline() -> Pipeline {
    let config: ChainConfig = serde_yaml::from_str(SOLANA_YAML).unwrap();
    let vault = AesGcmVault::from_master_key(&[1u8; 32]).unwrap();
    let seed = [3u8; 32];
    let owner = ChainSigner::from_bytes(ChainFamily::Solana, &seed, None).unwrap();
    let address = DepositAddress {
        id: uuid::Uuid::new_v4(),
        chain: ChainId::Solana,
        asset: "USDC".to_string(),
        address: owner.address(),
        encrypted_key: vault.encrypt(&seed).unwrap(),
        user_id: uuid::Uuid::new_v4(),
        created_at: Utc::now(),
    };
    let sponsor_signer =
        Arc::new(ChainSigner::from_bytes(ChainFamily::Solana, &[4u8; 32], None).unwrap());

    let chain = Arc::new(FixedChain {
        height: AtomicU64::new(1000),
        transfers: Mutex::new(Vec::new()),
    });
    let store = Arc::new(MemoryDepositStore::new());
    let ledger = Arc::new(DepositLedger::new(store.clone()));
    let registry = Arc::new(StaticAddressRegistry::new(vec![address.clone()]));
    let sponsor = Arc::new(CountingSponsor::default());
    let audit = Arc::new(MemoryAuditSink::new());

    let engine = Arc::new(SweepEngine::new(
        SweepSettings::from_config(&config, &SweepConfig::default()).unwrap(),
        ledger.clone(),
        registry.clone(),
        Arc::new(vault),
        sponsor.clone(),
        sponsor_signer.clone(),
        audit.clone(),
    ));
    let settings = WatcherSettings::from_config(
        &config,
        [config.sweep.treasury_address.clone(), sponsor_signer.address()],
    )
    .unwrap();
    let watcher = Arc::new(
        ChainWatcher::new(
            settings,
            chain.clone(),
            registry,
            ledger.clone(),
            Arc::new(MemoryCursorStore::new()),
            audit.clone(),
        )
        .with_sweeper(Arc::new(SweepDispatcher(engine.clone()))),
    );

    Pipeline {
        watcher,
        engine,
        chain,
        ledger,
        store,
        sponsor,
        audit,
        address,
    }
}

impl Pipeline {
    fn send(&self, tx_id: &str, amount: u128, height: Height) {
        self.chain.transfers.lock().unwrap().push((
            self.address.address.clone(),
            InboundTransfer {
                tx_id: tx_id.to_string(),
                amount,
                counterparty: Some("SenderWallet111111111111111111111111111111".to_string()),
                height,
            },
        ));
    }

    async fn wait_for_status(&self, tx_id: &str, status: DepositStatus) -> DepositId {
        for _ in 0..100 {
            if let Some(d) = self.ledger.find_by_tx(ChainId::Solana, tx_id).await.unwrap()
                && d.status == status
            {
                return d.id;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{tx_id} never reached {status}");
    }
}

#[tokio::test]
async fn qa_tc_deposit_is_recorded_confirmed_and_swept_once() {
    let p = pipeline();
    p.send("sig-1", 25_000_000, 1000);

    let report = p.watcher.tick(None).await.unwrap();
    assert_eq!(report.recorded, 1);
    assert_eq!(report.newly_confirmed, 1);
    assert_eq!(report.next_height, Some(1000));

    let id = p.wait_for_status("sig-1", DepositStatus::Swept).await;
    let deposit = p.ledger.get(id).await.unwrap();
    assert_eq!(deposit.amount, Decimal::from(25));
    assert_eq!(deposit.sweep_tx_id.as_deref(), Some("sweep-sig-1"));

    // Rescanning the same window does not record or sweep again
    let report = p.watcher.tick(None).await.unwrap();
    assert_eq!(report.recorded, 0);
    assert_eq!(p.store.len(), 1);
    assert_eq!(p.sponsor.executed.load(Ordering::SeqCst), 1);

    let events = p.audit.events();
    assert!(events.iter().any(|e| matches!(e, AuditEvent::DepositConfirmed { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        AuditEvent::SweepSucceeded { gas_spent: 2_044_280, .. }
    )));
}

#[tokio::test]
async fn qa_tc_dust_is_confirmed_but_never_swept() {
    let p = pipeline();
    p.send("sig-dust", 500_000, 1000);

    p.watcher.tick(None).await.unwrap();
    let id = p.wait_for_status("sig-dust", DepositStatus::Confirmed).await;

    let report = p.engine.retry_pass().await.unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(p.ledger.get(id).await.unwrap().status, DepositStatus::Confirmed);
    assert_eq!(p.sponsor.executed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn qa_tc_transfer_from_sponsor_is_not_a_deposit() {
    let p = pipeline();
    let sponsor = ChainSigner::from_bytes(ChainFamily::Solana, &[4u8; 32], None).unwrap();
    p.chain.transfers.lock().unwrap().push((
        p.address.address.clone(),
        InboundTransfer {
            tx_id: "sig-funding".to_string(),
            amount: 2_039_280,
            counterparty: Some(sponsor.address()),
            height: 1000,
        },
    ));

    let report = p.watcher.tick(None).await.unwrap();
    assert_eq!(report.ignored, 1);
    assert_eq!(report.recorded, 0);
    assert!(p.store.is_empty());
}
