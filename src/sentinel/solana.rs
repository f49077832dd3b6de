//! Solana chain client
//!
//! Inbound transfers are found by listing recent signatures for the watched
//! account (the owner for SOL, its associated token account for SPL) and
//! diffing pre/post balances of each successful transaction. Signatures
//! are paged newest to oldest until the scan window's lower slot is passed.

use crate::core_types::{ChainId, Height};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Deserialize;
use serde_json::json;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::client::{AssetKind, ChainClient, Confirmation, InboundTransfer, SignedTransaction};
use super::error::ClientError;
use super::rpc::JsonRpcTransport;

/// SPL Token program
pub const TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");

/// Associated Token Account program
pub const ATA_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Size of an SPL token account, for rent exemption
pub const TOKEN_ACCOUNT_LEN: usize = 165;

const COMMITMENT: &str = "confirmed";
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Signature pages read for one address in one scan window
const MAX_SIGNATURE_PAGES: usize = 20;

/// Extra RPC the sponsored sweep needs on Solana
#[async_trait]
pub trait SolanaChainOps: ChainClient {
    async fn balance(&self, account: &Pubkey) -> Result<u64, ClientError>;
    async fn account_exists(&self, account: &Pubkey) -> Result<bool, ClientError>;
    async fn latest_blockhash(&self) -> Result<Hash, ClientError>;
    async fn rent_exempt_minimum(&self, data_len: usize) -> Result<u64, ClientError>;
}

/// Compute the associated token account of `owner` for `mint`
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[owner.as_ref(), TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
        &ATA_PROGRAM_ID,
    )
    .0
}

pub fn parse_pubkey(s: &str) -> Result<Pubkey, ClientError> {
    Pubkey::from_str(s).map_err(|_| ClientError::InvalidAddress(s.to_string()))
}

#[derive(Deserialize, Debug)]
struct SignatureInfo {
    signature: String,
    slot: u64,
    #[serde(default)]
    err: Option<serde_json::Value>,
}

/// Page through signatures (newest first) with `fetch(before)` and keep
/// those in slots [from, to].
///
/// Stops at a short page or once a page reaches below `from`. Fails with
/// `SignatureBacklog` rather than return a partial window.
async fn collect_signatures<F, Fut>(
    address: &str,
    limit: usize,
    from: Height,
    to: Height,
    mut fetch: F,
) -> Result<Vec<SignatureInfo>, ClientError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Vec<SignatureInfo>, ClientError>>,
{
    let mut collected = Vec::new();
    let mut before = None;
    for page_no in 1..=MAX_SIGNATURE_PAGES {
        let page = fetch(before.take()).await?;
        let exhausted = page.len() < limit.max(1);
        let passed_window = page.last().is_some_and(|s| s.slot < from);
        before = page.last().map(|s| s.signature.clone());
        collected.extend(page.into_iter().filter(|s| s.slot >= from && s.slot <= to));

        if exhausted || passed_window {
            if page_no > 1 {
                debug!("Solana: {} signature pages for {}", page_no, address);
            }
            return Ok(collected);
        }
    }

    Err(ClientError::SignatureBacklog {
        address: address.to_string(),
        pages: MAX_SIGNATURE_PAGES,
    })
}

#[derive(Deserialize, Debug)]
struct RpcValue<T> {
    value: T,
}

#[derive(Deserialize, Debug)]
struct BlockhashValue {
    blockhash: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    slot: u64,
    #[serde(default)]
    err: Option<serde_json::Value>,
    confirmation_status: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ParsedTransaction {
    pub slot: u64,
    pub meta: Option<TransactionMeta>,
    pub transaction: TransactionBody,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    #[serde(default)]
    pub err: Option<serde_json::Value>,
    #[serde(default)]
    pub fee: u64,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    #[serde(default)]
    pub pre_token_balances: Vec<TokenBalance>,
    #[serde(default)]
    pub post_token_balances: Vec<TokenBalance>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub account_index: usize,
    pub mint: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub ui_token_amount: UiTokenAmount,
}

#[derive(Deserialize, Debug, Clone)]
pub struct UiTokenAmount {
    pub amount: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TransactionBody {
    pub message: ParsedMessage,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ParsedMessage {
    pub account_keys: Vec<ParsedAccountKey>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ParsedAccountKey {
    pub pubkey: String,
}

pub struct SolanaClient {
    rpc: JsonRpcTransport,
    signature_limit: usize,
    confirm_timeout: Duration,
}

impl SolanaClient {
    pub fn new(
        url: &str,
        rpc_timeout: Duration,
        confirm_timeout: Duration,
        signature_limit: usize,
    ) -> Result<Self, ClientError> {
        info!("Initializing Solana client at {}", url);
        Ok(Self {
            rpc: JsonRpcTransport::new(url, rpc_timeout)?,
            signature_limit,
            confirm_timeout,
        })
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<ParsedTransaction>, ClientError> {
        self.rpc
            .call_optional(
                "getTransaction",
                json!([
                    signature,
                    {
                        "encoding": "jsonParsed",
                        "commitment": COMMITMENT,
                        "maxSupportedTransactionVersion": 0
                    }
                ]),
            )
            .await
    }

    async fn wait_for_signature(&self, signature: &str) -> Result<u64, ClientError> {
        let deadline = Instant::now() + self.confirm_timeout;
        loop {
            let statuses: RpcValue<Vec<Option<SignatureStatus>>> = self
                .rpc
                .call(
                    "getSignatureStatuses",
                    json!([[signature], {"searchTransactionHistory": false}]),
                )
                .await?;

            if let Some(Some(status)) = statuses.value.into_iter().next() {
                if let Some(err) = status.err {
                    return Err(ClientError::TransactionFailed(format!(
                        "{}: {}",
                        signature, err
                    )));
                }
                if matches!(
                    status.confirmation_status.as_deref(),
                    Some("confirmed") | Some("finalized")
                ) {
                    return Ok(status.slot);
                }
            }

            if Instant::now() >= deadline {
                return Err(ClientError::ConfirmationTimeout(signature.to_string()));
            }
            sleep(STATUS_POLL_INTERVAL).await;
        }
    }
}

/// Lamports gained by `owner` in a transaction, with the biggest payer
pub fn native_delta(tx: &ParsedTransaction, owner: &str) -> Option<(u128, Option<String>)> {
    let meta = tx.meta.as_ref()?;
    let keys = &tx.transaction.message.account_keys;
    let idx = keys.iter().position(|k| k.pubkey == owner)?;

    let diff = |i: usize| -> i128 {
        let pre = meta.pre_balances.get(i).copied().unwrap_or(0) as i128;
        let post = meta.post_balances.get(i).copied().unwrap_or(0) as i128;
        post - pre
    };

    let gained = diff(idx);
    if gained <= 0 {
        return None;
    }

    let payer = (0..keys.len())
        .filter(|i| *i != idx)
        .min_by_key(|i| diff(*i))
        .filter(|i| diff(*i) < 0)
        .map(|i| keys[i].pubkey.clone());

    Some((gained as u128, payer))
}

/// Token units of `mint` gained by `owner`, with the sending owner
pub fn token_delta(tx: &ParsedTransaction, owner: &str, mint: &str) -> Option<(u128, Option<String>)> {
    let meta = tx.meta.as_ref()?;

    let amount_of = |balances: &[TokenBalance], index: usize| -> i128 {
        balances
            .iter()
            .find(|b| b.account_index == index && b.mint == mint)
            .and_then(|b| b.ui_token_amount.amount.parse::<i128>().ok())
            .unwrap_or(0)
    };

    let mut gained: i128 = 0;
    let mut sender: Option<(i128, String)> = None;

    for post in meta.post_token_balances.iter().filter(|b| b.mint == mint) {
        let delta = amount_of(&meta.post_token_balances, post.account_index)
            - amount_of(&meta.pre_token_balances, post.account_index);
        match post.owner.as_deref() {
            Some(o) if o == owner => gained += delta,
            Some(o) if delta < 0 => {
                if sender.as_ref().is_none_or(|(d, _)| delta < *d) {
                    sender = Some((delta, o.to_string()));
                }
            }
            _ => {}
        }
    }

    if gained <= 0 {
        return None;
    }
    Some((gained as u128, sender.map(|(_, o)| o)))
}

#[async_trait]
impl ChainClient for SolanaClient {
    fn chain(&self) -> ChainId {
        ChainId::Solana
    }

    async fn current_height(&self) -> Result<Height, ClientError> {
        self.rpc
            .call("getSlot", json!([{"commitment": COMMITMENT}]))
            .await
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

        let owner = parse_pubkey(address)?;
        let watched = match asset {
            AssetKind::Native => owner,
            AssetKind::Token { contract } => {
                associated_token_address(&owner, &parse_pubkey(contract)?)
            }
        };

        let account = watched.to_string();
        let rpc = &self.rpc;
        let limit = self.signature_limit;
        let signatures = collect_signatures(&account, limit, from, to, |before| {
            let mut options = json!({"limit": limit, "commitment": COMMITMENT});
            if let Some(before) = before {
                options["before"] = json!(before);
            }
            let params = json!([account.as_str(), options]);
            async move {
                rpc.call::<_, Vec<SignatureInfo>>("getSignaturesForAddress", params)
                    .await
            }
        })
        .await?;

        let mut found = Vec::new();
        for sig in signatures.iter().filter(|s| s.err.is_none()) {
            let Some(tx) = self.get_transaction(&sig.signature).await? else {
                warn!("Solana: signature {} not yet retrievable", sig.signature);
                continue;
            };
            if tx.meta.as_ref().is_none_or(|m| m.err.is_some()) {
                continue;
            }

            let delta = match asset {
                AssetKind::Native => native_delta(&tx, address),
                AssetKind::Token { contract } => token_delta(&tx, address, contract),
            };
            if let Some((amount, counterparty)) = delta {
                found.push(InboundTransfer {
                    tx_id: sig.signature.clone(),
                    amount,
                    counterparty,
                    height: tx.slot,
                });
            }
        }

        if !found.is_empty() {
            debug!(
                "Solana: {} inbound transfers to {} in slots [{}, {}]",
                found.len(),
                address,
                from,
                to
            );
        }
        Ok(found)
    }

    async fn submit(&self, tx: SignedTransaction) -> Result<Confirmation, ClientError> {
        let SignedTransaction::Solana(tx) = tx else {
            return Err(ClientError::WrongTransactionKind);
        };

        let wire = bincode::serialize(tx.as_ref())
            .map_err(|e| ClientError::Parse(format!("serialize transaction: {}", e)))?;

        let signature: String = self
            .rpc
            .call(
                "sendTransaction",
                json!([
                    BASE64.encode(wire),
                    {"encoding": "base64", "preflightCommitment": COMMITMENT}
                ]),
            )
            .await?;

        let slot = self.wait_for_signature(&signature).await?;

        // Fee is informational; a lookup failure does not fail the submit
        let fee = match self.get_transaction(&signature).await {
            Ok(Some(parsed)) => parsed.meta.map(|m| m.fee as u128),
            _ => None,
        };

        Ok(Confirmation {
            tx_id: signature,
            height: Some(slot),
            fee,
        })
    }
}

#[async_trait]
impl SolanaChainOps for SolanaClient {
    async fn balance(&self, account: &Pubkey) -> Result<u64, ClientError> {
        let result: RpcValue<u64> = self
            .rpc
            .call(
                "getBalance",
                json!([account.to_string(), {"commitment": COMMITMENT}]),
            )
            .await?;
        Ok(result.value)
    }

    async fn account_exists(&self, account: &Pubkey) -> Result<bool, ClientError> {
        let result: RpcValue<Option<serde_json::Value>> = self
            .rpc
            .call(
                "getAccountInfo",
                json!([account.to_string(), {"encoding": "base64", "commitment": COMMITMENT}]),
            )
            .await?;
        Ok(result.value.is_some())
    }

    async fn latest_blockhash(&self) -> Result<Hash, ClientError> {
        let result: RpcValue<BlockhashValue> = self
            .rpc
            .call("getLatestBlockhash", json!([{"commitment": COMMITMENT}]))
            .await?;
        Hash::from_str(&result.value.blockhash)
            .map_err(|e| ClientError::Parse(format!("blockhash: {}", e)))
    }

    async fn rent_exempt_minimum(&self, data_len: usize) -> Result<u64, ClientError> {
        self.rpc
            .call("getMinimumBalanceForRentExemption", json!([data_len]))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
    const SENDER: &str = "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T";
    const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    fn native_tx() -> ParsedTransaction {
        serde_json::from_value(json!({
            "slot": 1000,
            "meta": {
                "err": null,
                "fee": 5000,
                "preBalances": [2_000_000_000u64, 0, 1],
                "postBalances": [999_995_000u64, 1_000_000_000u64, 1]
            },
            "transaction": {"message": {"accountKeys": [
                {"pubkey": SENDER}, {"pubkey": USER}, {"pubkey": "11111111111111111111111111111111"}
            ]}}
        }))
        .unwrap()
    }

    fn token_tx(pre_user: &str, post_user: &str) -> ParsedTransaction {
        serde_json::from_value(json!({
            "slot": 1000,
            "meta": {
                "err": null,
                "preBalances": [], "postBalances": [],
                "preTokenBalances": [
                    {"accountIndex": 1, "mint": USDC_MINT, "owner": SENDER, "uiTokenAmount": {"amount": "80000000"}},
                    {"accountIndex": 2, "mint": USDC_MINT, "owner": USER, "uiTokenAmount": {"amount": pre_user}}
                ],
                "postTokenBalances": [
                    {"accountIndex": 1, "mint": USDC_MINT, "owner": SENDER, "uiTokenAmount": {"amount": "30000000"}},
                    {"accountIndex": 2, "mint": USDC_MINT, "owner": USER, "uiTokenAmount": {"amount": post_user}}
                ]
            },
            "transaction": {"message": {"accountKeys": [
                {"pubkey": SENDER}, {"pubkey": "ata1"}, {"pubkey": "ata2"}
            ]}}
        }))
        .unwrap()
    }

    #[test]
    fn test_native_delta_detects_inbound_lamports() {
        let (amount, from) = native_delta(&native_tx(), USER).unwrap();
        assert_eq!(amount, 1_000_000_000);
        assert_eq!(from.as_deref(), Some(SENDER));
    }

    #[test]
    fn test_native_delta_ignores_outbound() {
        assert!(native_delta(&native_tx(), SENDER).is_none());
        assert!(native_delta(&native_tx(), "UnknownAccount").is_none());
    }

    #[test]
    fn test_token_delta_detects_inbound_units() {
        let (amount, from) = token_delta(&token_tx("0", "50000000"), USER, USDC_MINT).unwrap();
        assert_eq!(amount, 50_000_000);
        assert_eq!(from.as_deref(), Some(SENDER));
    }

    #[test]
    fn test_token_delta_new_account_has_no_pre_balance() {
        let mut tx = token_tx("0", "50000000");
        if let Some(meta) = tx.meta.as_mut() {
            meta.pre_token_balances.retain(|b| b.account_index != 2);
        }
        let (amount, _) = token_delta(&tx, USER, USDC_MINT).unwrap();
        assert_eq!(amount, 50_000_000);
    }

    #[test]
    fn test_token_delta_other_mint_or_outflow() {
        assert!(token_delta(&token_tx("0", "50000000"), USER, "OtherMint").is_none());
        assert!(token_delta(&token_tx("50000000", "0"), USER, USDC_MINT).is_none());
    }

    #[test]
    fn test_associated_token_address_is_deterministic() {
        let owner = parse_pubkey(USER).unwrap();
        let mint = parse_pubkey(USDC_MINT).unwrap();
        let a = associated_token_address(&owner, &mint);
        assert_eq!(a, associated_token_address(&owner, &mint));
        assert_ne!(a, owner);
        assert!(parse_pubkey("not-base58!").is_err());
    }

    fn sig(slot: u64) -> SignatureInfo {
        SignatureInfo {
            signature: format!("sig-{slot}"),
            slot,
            err: None,
        }
    }

    #[tokio::test]
    async fn test_signatures_are_paged_past_the_limit() {
        // Newest first, three per page
        let history: Vec<u64> = (1000..=1006).rev().collect();
        let calls = std::sync::Mutex::new(Vec::new());

        let fetched = collect_signatures(USER, 3, 1001, 1005, |before: Option<String>| {
            calls.lock().unwrap().push(before.clone());
            let start = before
                .and_then(|b| history.iter().position(|s| format!("sig-{s}") == b))
                .map_or(0, |i| i + 1);
            let page: Vec<SignatureInfo> = history[start..].iter().take(3).map(|&s| sig(s)).collect();
            async move { Ok::<_, ClientError>(page) }
        })
        .await
        .unwrap();

        let slots: Vec<u64> = fetched.iter().map(|s| s.slot).collect();
        assert_eq!(slots, vec![1005, 1004, 1003, 1002, 1001]);
        let calls = calls.into_inner().unwrap();
        assert_eq!(
            calls,
            vec![None, Some("sig-1004".to_string()), Some("sig-1001".to_string())]
        );
    }

    #[tokio::test]
    async fn test_paging_stops_once_window_is_passed() {
        let mut pages = 0;
        let fetched = collect_signatures(USER, 2, 1003, 1010, |_| {
            pages += 1;
            let page = vec![sig(1004), sig(1002)];
            async move { Ok::<_, ClientError>(page) }
        })
        .await
        .unwrap();

        assert_eq!(pages, 1);
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].slot, 1004);
    }

    #[tokio::test]
    async fn test_endless_history_is_an_error_not_a_partial_window() {
        let mut newest = 10_000u64;
        let err = collect_signatures(USER, 2, 1, 5, |_| {
            newest -= 2;
            let page = vec![sig(newest + 1), sig(newest)];
            async move { Ok::<_, ClientError>(page) }
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            ClientError::SignatureBacklog {
                pages: MAX_SIGNATURE_PAGES,
                ..
            }
        ));
        assert!(!err.is_transient());
    }
}
