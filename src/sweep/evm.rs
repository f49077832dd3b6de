//! EVM sponsored transfer: gas top-up from the sponsor, then the transfer

use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, U256};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::sentinel::{AssetKind, ClientError, EvmCall, EvmChainOps, SignedTransaction};

use super::error::SweepError;
use super::signers::{ChainSigner, SponsoredSigners};
use super::{SponsoredTransfer, SweepPlan, SweepReceipt};

/// transfer(address,uint256)
const ERC20_TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Gas of a plain value transfer
const NATIVE_TRANSFER_GAS: u64 = 21_000;

pub struct EvmSponsoredTransfer<C: EvmChainOps + ?Sized> {
    client: Arc<C>,
    evm_chain_id: u64,
    gas_buffer: Decimal,
}

impl<C: EvmChainOps + ?Sized> EvmSponsoredTransfer<C> {
    pub fn new(client: Arc<C>, evm_chain_id: u64, gas_buffer: Decimal) -> Self {
        Self {
            client,
            evm_chain_id,
            gas_buffer,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn sign(
        &self,
        wallet: &LocalWallet,
        to: Address,
        value: U256,
        data: Vec<u8>,
        nonce: U256,
        gas: U256,
        gas_price: U256,
    ) -> Result<SignedTransaction, SweepError> {
        let tx: TypedTransaction = TransactionRequest::new()
            .from(wallet.address())
            .to(to)
            .value(value)
            .data(data)
            .nonce(nonce)
            .gas(gas)
            .gas_price(gas_price)
            .chain_id(self.evm_chain_id)
            .into();

        let signature = wallet
            .sign_transaction_sync(&tx)
            .map_err(|e| SweepError::Signing(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);
        let tx_hash = format!("0x{}", hex::encode(ethers::utils::keccak256(&raw)));

        Ok(SignedTransaction::Evm {
            raw: raw.to_vec(),
            tx_hash,
        })
    }
}

/// ABI-encoded `transfer(to, amount)` call
pub fn erc20_transfer_data(to: Address, amount: U256) -> Vec<u8> {
    let mut data = ERC20_TRANSFER_SELECTOR.to_vec();
    data.extend(abi::encode(&[Token::Address(to), Token::Uint(amount)]));
    data
}

/// `cost * multiplier`, rounded up
pub fn apply_buffer(cost: U256, multiplier: Decimal) -> U256 {
    let multiplier = multiplier.normalize();
    let numerator = U256::from(multiplier.mantissa().unsigned_abs());
    let denominator = U256::exp10(multiplier.scale() as usize);
    (cost * numerator + denominator - 1) / denominator
}

fn parse_address(s: &str) -> Result<Address, SweepError> {
    Address::from_str(s).map_err(|_| SweepError::Client(ClientError::InvalidAddress(s.to_string())))
}

fn to_u128(value: U256) -> u128 {
    if value > U256::from(u128::MAX) {
        u128::MAX
    } else {
        value.as_u128()
    }
}

#[async_trait]
impl<C: EvmChainOps + ?Sized + 'static> SponsoredTransfer for EvmSponsoredTransfer<C> {
    async fn execute(
        &self,
        plan: &SweepPlan,
        signers: &SponsoredSigners,
    ) -> Result<SweepReceipt, SweepError> {
        let owner = signers.owner.evm()?;
        let sponsor = signers.fee_payer.evm()?;
        let source = owner.address();
        let treasury = parse_address(&plan.treasury)?;
        let amount = U256::from(plan.amount);

        let (to, value, data) = match &plan.kind {
            AssetKind::Native => (treasury, amount, Vec::new()),
            AssetKind::Token { contract } => (
                parse_address(contract)?,
                U256::zero(),
                erc20_transfer_data(treasury, amount),
            ),
        };

        // 1. Price the transfer and see what the deposit wallet is missing
        let gas_limit = self
            .client
            .estimate_gas(&EvmCall {
                from: source,
                to,
                value,
                data: data.clone(),
            })
            .await?;
        let gas_price = self.client.gas_price().await?;
        let required = value + apply_buffer(gas_limit * gas_price, self.gas_buffer);
        let balance = self.client.native_balance(source).await?;

        // 2. Sponsor tops up the shortfall and waits for it to be mined
        let mut funding_tx_id = None;
        let mut gas_spent = 0u128;
        if balance < required {
            let shortfall = required - balance;
            let sponsor_address = sponsor.address();
            let funding_gas = U256::from(NATIVE_TRANSFER_GAS);
            let sponsor_needed = shortfall + funding_gas * gas_price;
            let sponsor_balance = self.client.native_balance(sponsor_address).await?;
            if sponsor_balance < sponsor_needed {
                return Err(SweepError::SponsorInsufficientFunds {
                    sponsor: signers.fee_payer.address(),
                    balance: to_u128(sponsor_balance),
                    required: to_u128(sponsor_needed),
                });
            }

            let nonce = self.client.pending_nonce(sponsor_address).await?;
            let funding = self.sign(
                sponsor,
                source,
                shortfall,
                Vec::new(),
                nonce,
                funding_gas,
                gas_price,
            )?;
            let confirmation = self.client.submit(funding).await?;
            info!(
                "{}: Sponsor funded {} with {} wei for deposit {} (tx: {})",
                plan.chain, plan.source, shortfall, plan.deposit_id, confirmation.tx_id
            );
            gas_spent = to_u128(shortfall).saturating_add(
                confirmation
                    .fee
                    .unwrap_or_else(|| to_u128(funding_gas * gas_price)),
            );
            funding_tx_id = Some(confirmation.tx_id);
        }

        // 3. Deposit wallet sends the asset, paying gas from its own balance
        let nonce = self.client.pending_nonce(source).await?;
        let transfer = self.sign(owner, to, value, data, nonce, gas_limit, gas_price)?;
        let confirmation = self.client.submit(transfer).await?;

        Ok(SweepReceipt {
            sweep_tx_id: confirmation.tx_id,
            funding_tx_id,
            gas_spent,
        })
    }

    async fn sponsor_balance(&self, sponsor: &ChainSigner) -> Result<u128, SweepError> {
        let balance = self.client.native_balance(sponsor.evm()?.address()).await?;
        Ok(to_u128(balance))
    }
}
