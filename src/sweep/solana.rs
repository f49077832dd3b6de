//! Solana sponsored transfer: one transaction, two signers
//!
//! The sponsor is the fee payer (and funds the treasury token account when
//! it does not exist yet); the deposit wallet signs as the asset owner.

use async_trait::async_trait;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::Transaction;
use solana_sdk::{system_instruction, system_program};
use std::sync::Arc;
use tracing::{debug, info};

use crate::money::MoneyError;
use crate::sentinel::solana::{
    ATA_PROGRAM_ID, TOKEN_ACCOUNT_LEN, TOKEN_PROGRAM_ID, associated_token_address, parse_pubkey,
};
use crate::sentinel::{AssetKind, SignedTransaction, SolanaChainOps};

use super::error::SweepError;
use super::signers::{ChainSigner, SponsoredSigners};
use super::{SponsoredTransfer, SweepPlan, SweepReceipt};

const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

/// SPL Token `TransferChecked` instruction tag
const TRANSFER_CHECKED: u8 = 12;

/// Associated Token Account `CreateIdempotent` instruction tag
const CREATE_IDEMPOTENT: u8 = 1;

pub struct SolanaSponsoredTransfer<C: SolanaChainOps + ?Sized> {
    client: Arc<C>,
}

/// Instructions of one sweep plus the rent the sponsor pays for them
#[derive(Debug, Clone, PartialEq)]
pub struct SweepInstructions {
    pub instructions: Vec<Instruction>,
    pub rent: u64,
}

impl<C: SolanaChainOps + ?Sized> SolanaSponsoredTransfer<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    async fn instructions(
        &self,
        plan: &SweepPlan,
        owner: &Pubkey,
        sponsor: &Pubkey,
        amount: u64,
    ) -> Result<SweepInstructions, SweepError> {
        let treasury = parse_pubkey(&plan.treasury)?;

        match &plan.kind {
            AssetKind::Native => Ok(SweepInstructions {
                instructions: vec![system_instruction::transfer(owner, &treasury, amount)],
                rent: 0,
            }),
            AssetKind::Token { contract } => {
                let mint = parse_pubkey(contract)?;
                let decimals = u8::try_from(plan.decimals)
                    .map_err(|_| MoneyError::UnsupportedDecimals(plan.decimals))?;
                let source_ata = associated_token_address(owner, &mint);
                let treasury_ata = associated_token_address(&treasury, &mint);

                let mut instructions = Vec::with_capacity(2);
                let mut rent = 0;
                if !self.client.account_exists(&treasury_ata).await? {
                    debug!(
                        "Solana: Treasury token account {} missing, sponsor creates it",
                        treasury_ata
                    );
                    instructions.push(create_associated_token_account_idempotent(
                        sponsor, &treasury, &mint,
                    ));
                    rent = self.client.rent_exempt_minimum(TOKEN_ACCOUNT_LEN).await?;
                }
                instructions.push(transfer_checked(
                    &source_ata,
                    &mint,
                    &treasury_ata,
                    owner,
                    amount,
                    decimals,
                ));
                Ok(SweepInstructions { instructions, rent })
            }
        }
    }
}

/// Creates `owner`'s token account for `mint`, no-op if it already exists
pub fn create_associated_token_account_idempotent(
    payer: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
) -> Instruction {
    Instruction {
        program_id: ATA_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(associated_token_address(owner, mint), false),
            AccountMeta::new_readonly(*owner, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
        ],
        data: vec![CREATE_IDEMPOTENT],
    }
}

pub fn transfer_checked(
    source: &Pubkey,
    mint: &Pubkey,
    destination: &Pubkey,
    authority: &Pubkey,
    amount: u64,
    decimals: u8,
) -> Instruction {
    let mut data = Vec::with_capacity(10);
    data.push(TRANSFER_CHECKED);
    data.extend_from_slice(&amount.to_le_bytes());
    data.push(decimals);

    Instruction {
        program_id: TOKEN_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*source, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new(*destination, false),
            AccountMeta::new_readonly(*authority, true),
        ],
        data,
    }
}

/// Sponsor pays and signs first; the owner co-signs
pub fn build_sponsored_transaction(
    instructions: &[Instruction],
    sponsor: &Keypair,
    owner: &Keypair,
    blockhash: Hash,
) -> Result<Transaction, SweepError> {
    let mut tx = Transaction::new_with_payer(instructions, Some(&sponsor.pubkey()));
    tx.try_sign(&[sponsor, owner], blockhash)
        .map_err(|e| SweepError::Signing(e.to_string()))?;
    Ok(tx)
}

#[async_trait]
impl<C: SolanaChainOps + ?Sized + 'static> SponsoredTransfer for SolanaSponsoredTransfer<C> {
    async fn execute(
        &self,
        plan: &SweepPlan,
        signers: &SponsoredSigners,
    ) -> Result<SweepReceipt, SweepError> {
        let owner = signers.owner.solana()?;
        let sponsor = signers.fee_payer.solana()?;
        let amount = u64::try_from(plan.amount).map_err(|_| MoneyError::Overflow)?;

        let swept = self
            .instructions(plan, &owner.pubkey(), &sponsor.pubkey(), amount)
            .await?;

        let fee = LAMPORTS_PER_SIGNATURE * 2;
        let required = fee + swept.rent;
        let balance = self.client.balance(&sponsor.pubkey()).await?;
        if balance < required {
            return Err(SweepError::SponsorInsufficientFunds {
                sponsor: sponsor.pubkey().to_string(),
                balance: balance as u128,
                required: required as u128,
            });
        }

        let blockhash = self.client.latest_blockhash().await?;
        let tx = build_sponsored_transaction(&swept.instructions, sponsor, owner, blockhash)?;
        let confirmation = self
            .client
            .submit(SignedTransaction::Solana(Box::new(tx)))
            .await?;

        info!(
            "Solana: Swept {} {} from {} for deposit {} (tx: {})",
            plan.amount, plan.asset, plan.source, plan.deposit_id, confirmation.tx_id
        );

        Ok(SweepReceipt {
            sweep_tx_id: confirmation.tx_id,
            funding_tx_id: None,
            gas_spent: confirmation.fee.unwrap_or(fee as u128) + swept.rent as u128,
        })
    }

    async fn sponsor_balance(&self, sponsor: &ChainSigner) -> Result<u128, SweepError> {
        let balance = self.client.balance(&sponsor.solana()?.pubkey()).await?;
        Ok(balance as u128)
    }
}
