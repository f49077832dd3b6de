//! Scriptable in-memory chain client for watcher and sweep tests

use crate::core_types::{ChainId, Height};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::client::{AssetKind, ChainClient, Confirmation, InboundTransfer, SignedTransaction};
use super::error::ClientError;

pub struct MockChainClient {
    chain: ChainId,
    height: AtomicU64,
    /// (address, asset) -> transfers ever sent there
    transfers: Mutex<HashMap<(String, AssetKind), Vec<InboundTransfer>>>,
    fail_height: Mutex<bool>,
    fail_addresses: Mutex<HashSet<String>>,
    pub height_calls: AtomicUsize,
    pub transfer_calls: AtomicUsize,
    pub submitted: Mutex<Vec<SignedTransaction>>,
}

impl MockChainClient {
    pub fn new(chain: ChainId, height: Height) -> Self {
        Self {
            chain,
            height: AtomicU64::new(height),
            transfers: Mutex::new(HashMap::new()),
            fail_height: Mutex::new(false),
            fail_addresses: Mutex::new(HashSet::new()),
            height_calls: AtomicUsize::new(0),
            transfer_calls: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn set_height(&self, height: Height) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn add_transfer(&self, address: &str, asset: AssetKind, transfer: InboundTransfer) {
        self.transfers
            .lock()
            .unwrap()
            .entry((address.to_string(), asset))
            .or_default()
            .push(transfer);
    }

    pub fn set_fail_height(&self, fail: bool) {
        *self.fail_height.lock().unwrap() = fail;
    }

    pub fn set_fail_address(&self, address: &str, fail: bool) {
        let mut failing = self.fail_addresses.lock().unwrap();
        if fail {
            failing.insert(address.to_string());
        } else {
            failing.remove(address);
        }
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn chain(&self) -> ChainId {
        self.chain
    }

    async fn current_height(&self) -> Result<Height, ClientError> {
        self.height_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_height.lock().unwrap() {
            return Err(ClientError::Timeout("current_height".to_string()));
        }
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn transfers_to(
        &self,
        address: &str,
        asset: &AssetKind,
        from: Height,
        to: Height,
    ) -> Result<Vec<InboundTransfer>, ClientError> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_addresses.lock().unwrap().contains(address) {
            return Err(ClientError::RpcConnection(format!("{address} unreachable")));
        }
        let transfers = self.transfers.lock().unwrap();
        Ok(transfers
            .get(&(address.to_string(), asset.clone()))
            .map(|all| {
                all.iter()
                    .filter(|t| t.height >= from && t.height <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn submit(&self, tx: SignedTransaction) -> Result<Confirmation, ClientError> {
        let tx_id = match &tx {
            SignedTransaction::Evm { tx_hash, .. } => tx_hash.clone(),
            SignedTransaction::Solana(tx) => tx.signatures[0].to_string(),
        };
        self.submitted.lock().unwrap().push(tx);
        Ok(Confirmation {
            tx_id,
            height: Some(self.height.load(Ordering::SeqCst)),
            fee: Some(5000),
        })
    }
}
