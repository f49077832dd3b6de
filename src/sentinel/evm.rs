//! EVM chain client
//!
//! Native deposits leave no event log, so they are found by scanning full
//! blocks for transactions whose `to` is the deposit address. Token
//! deposits are found with `eth_getLogs` on the ERC-20 `Transfer` topic
//! filtered by the indexed `to`.

use crate::core_types::{ChainId, Height};
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, U256};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::client::{AssetKind, ChainClient, Confirmation, InboundTransfer, SignedTransaction};
use super::error::ClientError;
use super::rpc::{JsonRpcTransport, parse_hex_u64, parse_hex_u128};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

const NO_PARAMS: [u8; 0] = [];
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Extra RPC the sponsored sweep needs on EVM chains
#[async_trait]
pub trait EvmChainOps: ChainClient {
    async fn native_balance(&self, address: Address) -> Result<U256, ClientError>;
    async fn gas_price(&self) -> Result<U256, ClientError>;
    async fn estimate_gas(&self, call: &EvmCall) -> Result<U256, ClientError>;
    async fn pending_nonce(&self, address: Address) -> Result<U256, ClientError>;
}

/// Call description used for gas estimation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmCall {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EvmBlock {
    transactions: Vec<EvmTransaction>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EvmTransaction {
    pub hash: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub value: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EvmLog {
    pub transaction_hash: Option<String>,
    pub block_number: Option<String>,
    pub data: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub removed: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EvmReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
    gas_used: Option<String>,
    effective_gas_price: Option<String>,
}

/// A value-carrying transaction kept in the per-tick block cache
#[derive(Debug, Clone, PartialEq, Eq)]
struct NativeTx {
    hash: String,
    from: Option<String>,
    to: String,
    value: u128,
}

pub struct EvmClient {
    chain: ChainId,
    rpc: JsonRpcTransport,
    /// Value transfers per block; shared by every address check in a tick
    blocks: DashMap<u64, Arc<Vec<NativeTx>>>,
    confirm_timeout: Duration,
}

impl EvmClient {
    pub fn new(
        evm_chain_id: u64,
        url: &str,
        rpc_timeout: Duration,
        confirm_timeout: Duration,
    ) -> Result<Self, ClientError> {
        info!(
            "Initializing EVM client for chain {} at {}",
            evm_chain_id, url
        );
        Ok(Self {
            chain: ChainId::Evm(evm_chain_id),
            rpc: JsonRpcTransport::new(url, rpc_timeout)?,
            blocks: DashMap::new(),
            confirm_timeout,
        })
    }

    /// `eth_chainId` as reported by the node
    pub async fn remote_chain_id(&self) -> Result<u64, ClientError> {
        let id: String = self.rpc.call("eth_chainId", NO_PARAMS).await?;
        parse_hex_u64(&id)
    }

    async fn block_value_transfers(&self, height: u64) -> Result<Arc<Vec<NativeTx>>, ClientError> {
        if let Some(cached) = self.blocks.get(&height) {
            return Ok(cached.value().clone());
        }

        let height_hex = format!("0x{:x}", height);
        let block: EvmBlock = self
            .rpc
            .call("eth_getBlockByNumber", (height_hex, true))
            .await?;

        let txs = Arc::new(value_transfers(&block.transactions)?);
        self.blocks.insert(height, txs.clone());
        Ok(txs)
    }

    async fn native_transfers(
        &self,
        address: &str,
        from: Height,
        to: Height,
    ) -> Result<Vec<InboundTransfer>, ClientError> {
        self.blocks.retain(|h, _| *h >= from);

        let mut found = Vec::new();
        for height in from..=to {
            let txs = self.block_value_transfers(height).await?;
            found.extend(
                txs.iter()
                    .filter(|tx| tx.to.eq_ignore_ascii_case(address))
                    .map(|tx| InboundTransfer {
                        tx_id: tx.hash.clone(),
                        amount: tx.value,
                        counterparty: tx.from.clone(),
                        height,
                    }),
            );
        }
        Ok(found)
    }

    async fn token_transfers(
        &self,
        address: &str,
        contract: &str,
        from: Height,
        to: Height,
    ) -> Result<Vec<InboundTransfer>, ClientError> {
        let filter = json!({
            "fromBlock": format!("0x{:x}", from),
            "toBlock": format!("0x{:x}", to),
            "address": contract,
            "topics": [TRANSFER_TOPIC, serde_json::Value::Null, address_topic(address)?],
        });
        let logs: Vec<EvmLog> = self.rpc.call("eth_getLogs", [filter]).await?;
        transfers_from_logs(&logs)
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<Confirmation, ClientError> {
        let deadline = Instant::now() + self.confirm_timeout;
        loop {
            let receipt: Option<EvmReceipt> = self
                .rpc
                .call_optional("eth_getTransactionReceipt", [tx_hash])
                .await?;

            if let Some(receipt) = receipt
                && receipt.block_number.is_some()
            {
                return confirmation_from_receipt(receipt);
            }

            if Instant::now() >= deadline {
                return Err(ClientError::ConfirmationTimeout(tx_hash.to_string()));
            }
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

/// Keep only transactions that move value to some recipient
fn value_transfers(txs: &[EvmTransaction]) -> Result<Vec<NativeTx>, ClientError> {
    let mut out = Vec::new();
    for tx in txs {
        let Some(to) = tx.to.as_ref() else {
            continue; // contract creation
        };
        let value = parse_hex_u128(&tx.value)?;
        if value > 0 {
            out.push(NativeTx {
                hash: tx.hash.clone(),
                from: tx.from.clone(),
                to: to.clone(),
                value,
            });
        }
    }
    Ok(out)
}

/// Left-pad an address to a 32-byte topic word
pub fn address_topic(address: &str) -> Result<String, ClientError> {
    let parsed =
        Address::from_str(address).map_err(|_| ClientError::InvalidAddress(address.to_string()))?;
    Ok(format!("0x{:0>64}", hex::encode(parsed.as_bytes())))
}

/// Aggregate `Transfer` logs by transaction hash
pub fn transfers_from_logs(logs: &[EvmLog]) -> Result<Vec<InboundTransfer>, ClientError> {
    let mut by_tx: BTreeMap<String, InboundTransfer> = BTreeMap::new();
    for log in logs.iter().filter(|l| !l.removed) {
        let (Some(tx_hash), Some(block)) = (&log.transaction_hash, &log.block_number) else {
            continue; // pending log
        };
        let sender = match log.topics.get(1).map(|t| topic_to_address(t)) {
            Some(None) => {
                warn!("EVM: skipping log in {} with malformed sender topic", tx_hash);
                continue;
            }
            Some(Some(sender)) => Some(sender),
            None => None,
        };
        let amount = parse_hex_u128(&log.data)?;
        let height = parse_hex_u64(block)?;

        let entry = by_tx
            .entry(tx_hash.to_lowercase())
            .or_insert_with(|| InboundTransfer {
                tx_id: tx_hash.clone(),
                amount: 0,
                counterparty: sender,
                height,
            });
        entry.amount = entry.amount.saturating_add(amount);
    }
    Ok(by_tx.into_values().filter(|t| t.amount > 0).collect())
}

/// Address in the low 20 bytes of a 32-byte topic word
fn topic_to_address(topic: &str) -> Option<String> {
    let word = topic.strip_prefix("0x").unwrap_or(topic);
    if word.len() != 64 || !word.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", &word[24..]))
}

fn confirmation_from_receipt(receipt: EvmReceipt) -> Result<Confirmation, ClientError> {
    if receipt.status.as_deref() == Some("0x0") {
        return Err(ClientError::TransactionFailed(format!(
            "{} reverted",
            receipt.transaction_hash
        )));
    }
    let height = receipt.block_number.as_deref().map(parse_hex_u64).transpose()?;
    let fee = match (&receipt.gas_used, &receipt.effective_gas_price) {
        (Some(used), Some(price)) => {
            Some(parse_hex_u128(used)?.saturating_mul(parse_hex_u128(price)?))
        }
        _ => None,
    };
    Ok(Confirmation {
        tx_id: receipt.transaction_hash,
        height,
        fee,
    })
}

fn parse_u256(value: &str) -> Result<U256, ClientError> {
    U256::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| ClientError::Parse(format!("invalid quantity {}: {}", value, e)))
}

#[async_trait]
impl ChainClient for EvmClient {
    fn chain(&self) -> ChainId {
        self.chain
    }

    async fn current_height(&self) -> Result<Height, ClientError> {
        let result: String = self.rpc.call("eth_blockNumber", NO_PARAMS).await?;
        parse_hex_u64(&result)
    }

    async fn transfers_to(
        &self,
        address: &str,
        asset: &AssetKind,
        from: Height,
        to: Height,
    ) -> Result<Vec<InboundTransfer>, ClientError> {
        if from > to {
            return Ok(Vec::new());
        }
        let found = match asset {
            AssetKind::Native => self.native_transfers(address, from, to).await?,
            AssetKind::Token { contract } => {
                self.token_transfers(address, contract, from, to).await?
            }
        };
        if !found.is_empty() {
            debug!(
                "{}: {} inbound transfers to {} in [{}, {}]",
                self.chain,
                found.len(),
                address,
                from,
                to
            );
        }
        Ok(found)
    }

    async fn submit(&self, tx: SignedTransaction) -> Result<Confirmation, ClientError> {
        let SignedTransaction::Evm { raw, tx_hash } = tx else {
            return Err(ClientError::WrongTransactionKind);
        };

        let raw_hex = format!("0x{}", hex::encode(&raw));
        let returned: String = self.rpc.call("eth_sendRawTransaction", [raw_hex]).await?;
        if !returned.eq_ignore_ascii_case(&tx_hash) {
            debug!(
                "{}: node returned hash {} for locally computed {}",
                self.chain, returned, tx_hash
            );
        }
        self.wait_for_receipt(&returned).await
    }
}

#[async_trait]
impl EvmChainOps for EvmClient {
    async fn native_balance(&self, address: Address) -> Result<U256, ClientError> {
        let value: String = self
            .rpc
            .call("eth_getBalance", (address, "latest"))
            .await?;
        parse_u256(&value)
    }

    async fn gas_price(&self) -> Result<U256, ClientError> {
        let value: String = self.rpc.call("eth_gasPrice", NO_PARAMS).await?;
        parse_u256(&value)
    }

    async fn estimate_gas(&self, call: &EvmCall) -> Result<U256, ClientError> {
        let params = json!({
            "from": call.from,
            "to": call.to,
            "value": call.value,
            "data": format!("0x{}", hex::encode(&call.data)),
        });
        let value: String = self.rpc.call("eth_estimateGas", [params]).await?;
        parse_u256(&value)
    }

    async fn pending_nonce(&self, address: Address) -> Result<U256, ClientError> {
        let value: String = self
            .rpc
            .call("eth_getTransactionCount", (address, "pending"))
            .await?;
        parse_u256(&value)
    }
}
