//! Signing keys for sponsored sweeps
//!
//! A sweep always involves two parties: the deposit wallet that owns the
//! funds and the sponsor wallet that pays the network fee. Each chain
//! adapter decides how the two signatures are assembled.

use crate::core_types::ChainFamily;
use crate::vault::SecretKeyMaterial;
use ethers::signers::{LocalWallet, Signer};
use solana_sdk::signature::{Keypair, Signer as _, keypair_from_seed};
use std::fmt;
use std::sync::Arc;

use super::error::SweepError;

pub enum ChainSigner {
    Solana(Keypair),
    Evm(LocalWallet),
}

impl ChainSigner {
    /// Build a signer from raw key bytes.
    ///
    /// Solana takes a 32-byte seed or a 64-byte keypair (seed || pubkey).
    /// EVM takes a 32-byte secp256k1 secret.
    pub fn from_bytes(
        family: ChainFamily,
        bytes: &[u8],
        evm_chain_id: Option<u64>,
    ) -> Result<Self, SweepError> {
        match family {
            ChainFamily::Solana => {
                if bytes.len() != 32 && bytes.len() != 64 {
                    return Err(SweepError::InvalidKey(format!(
                        "solana key must be 32 or 64 bytes, got {}",
                        bytes.len()
                    )));
                }
                let keypair = keypair_from_seed(&bytes[..32])
                    .map_err(|e| SweepError::InvalidKey(e.to_string()))?;
                if bytes.len() == 64 && keypair.pubkey().as_ref() != &bytes[32..] {
                    return Err(SweepError::InvalidKey(
                        "solana keypair public half does not match its secret".to_string(),
                    ));
                }
                Ok(ChainSigner::Solana(keypair))
            }
            ChainFamily::Evm => {
                let wallet = LocalWallet::from_bytes(bytes)
                    .map_err(|e| SweepError::InvalidKey(e.to_string()))?;
                Ok(ChainSigner::Evm(match evm_chain_id {
                    Some(id) => wallet.with_chain_id(id),
                    None => wallet,
                }))
            }
        }
    }

    pub fn from_secret(
        family: ChainFamily,
        secret: &SecretKeyMaterial,
        evm_chain_id: Option<u64>,
    ) -> Result<Self, SweepError> {
        Self::from_bytes(family, secret.expose(), evm_chain_id)
    }

    /// Sponsor key from an environment variable holding hex or a JSON byte array
    pub fn from_env(
        family: ChainFamily,
        var: &str,
        evm_chain_id: Option<u64>,
    ) -> Result<Self, SweepError> {
        let raw = std::env::var(var)
            .map_err(|_| SweepError::InvalidKey(format!("env var {} is not set", var)))?;
        let bytes = SecretKeyMaterial::new(decode_key_text(&raw)?);
        Self::from_secret(family, &bytes, evm_chain_id)
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            ChainSigner::Solana(_) => ChainFamily::Solana,
            ChainSigner::Evm(_) => ChainFamily::Evm,
        }
    }

    /// On-chain address in the chain's canonical text form
    pub fn address(&self) -> String {
        match self {
            ChainSigner::Solana(keypair) => keypair.pubkey().to_string(),
            ChainSigner::Evm(wallet) => ethers::utils::to_checksum(&wallet.address(), None),
        }
    }

    pub fn solana(&self) -> Result<&Keypair, SweepError> {
        match self {
            ChainSigner::Solana(keypair) => Ok(keypair),
            ChainSigner::Evm(_) => Err(SweepError::WrongSigner),
        }
    }

    pub fn evm(&self) -> Result<&LocalWallet, SweepError> {
        match self {
            ChainSigner::Evm(wallet) => Ok(wallet),
            ChainSigner::Solana(_) => Err(SweepError::WrongSigner),
        }
    }

    /// Same on-chain account as `address` (EVM compared case-insensitively)
    pub fn controls(&self, address: &str) -> bool {
        match self {
            ChainSigner::Solana(_) => self.address() == address,
            ChainSigner::Evm(_) => self.address().eq_ignore_ascii_case(address),
        }
    }
}

impl fmt::Debug for ChainSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainSigner({:?}, {})", self.family(), self.address())
    }
}

/// Asset owner plus the sponsor paying fees for it
pub struct SponsoredSigners {
    pub owner: ChainSigner,
    pub fee_payer: Arc<ChainSigner>,
}

fn decode_key_text(raw: &str) -> Result<Vec<u8>, SweepError> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<u8>>(trimmed)
            .map_err(|e| SweepError::InvalidKey(format!("json key: {}", e)));
    }
    hex::decode(trimmed.trim_start_matches("0x"))
        .map_err(|e| SweepError::InvalidKey(format!("hex key: {}", e)))
}
