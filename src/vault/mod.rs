//! Key Vault Adapter
//!
//! Deposit-address private keys are stored sealed with AES-256-GCM under a
//! master key. Blobs are `base64(nonce(12) || ciphertext || tag)`.
//! Decrypted material lives only in [`SecretKeyMaterial`], which never
//! prints its bytes and zeroes them on drop.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use std::fmt;
use thiserror::Error;

const NONCE_LEN: usize = 12;
const MASTER_KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Master key must be {MASTER_KEY_LEN} bytes of hex")]
    InvalidMasterKey,

    #[error("Master key env var {0} is not set")]
    MissingMasterKey(String),

    #[error("Malformed key blob: {0}")]
    MalformedBlob(String),

    /// Wrong master key or tampered blob. Deliberately carries no detail.
    #[error("Key decryption failed")]
    DecryptionFailed,

    #[error("Key encryption failed")]
    EncryptionFailed,
}

/// Reference to a sealed key as stored in the address registry
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedKeyRef(pub String);

impl fmt::Debug for EncryptedKeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedKeyRef({} bytes)", self.0.len())
    }
}

/// Decrypted signing key bytes. Never logged, never persisted.
pub struct SecretKeyMaterial(Vec<u8>);

impl SecretKeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKeyMaterial([REDACTED])")
    }
}

impl Drop for SecretKeyMaterial {
    fn drop(&mut self) {
        self.0.fill(0);
    }
}

pub trait KeyVault: Send + Sync {
    fn decrypt(&self, key_ref: &EncryptedKeyRef) -> Result<SecretKeyMaterial, VaultError>;
}

/// AES-256-GCM vault keyed by a 32-byte master key
pub struct AesGcmVault {
    cipher: Aes256Gcm,
}

impl AesGcmVault {
    pub fn from_master_key(key: &[u8]) -> Result<Self, VaultError> {
        if key.len() != MASTER_KEY_LEN {
            return Err(VaultError::InvalidMasterKey);
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| VaultError::InvalidMasterKey)?;
        Ok(Self { cipher })
    }

    pub fn from_hex(master_key_hex: &str) -> Result<Self, VaultError> {
        let bytes = hex::decode(master_key_hex.trim().trim_start_matches("0x"))
            .map_err(|_| VaultError::InvalidMasterKey)?;
        Self::from_master_key(&bytes)
    }

    /// Load the master key from the named environment variable
    pub fn from_env(var: &str) -> Result<Self, VaultError> {
        let value =
            std::env::var(var).map_err(|_| VaultError::MissingMasterKey(var.to_string()))?;
        Self::from_hex(&value)
    }

    /// Seal raw key bytes into a storable blob (operator provisioning)
    pub fn encrypt(&self, secret: &[u8]) -> Result<EncryptedKeyRef, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, secret)
            .map_err(|_| VaultError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(EncryptedKeyRef(BASE64.encode(blob)))
    }
}

impl KeyVault for AesGcmVault {
    fn decrypt(&self, key_ref: &EncryptedKeyRef) -> Result<SecretKeyMaterial, VaultError> {
        let blob = BASE64
            .decode(key_ref.0.trim())
            .map_err(|e| VaultError::MalformedBlob(e.to_string()))?;
        if blob.len() <= NONCE_LEN {
            return Err(VaultError::MalformedBlob("blob too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| VaultError::DecryptionFailed)?;

        Ok(SecretKeyMaterial::new(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> AesGcmVault {
        AesGcmVault::from_master_key(&[7u8; 32]).unwrap()
    }

    #[test]
    fn test_seal_then_open() {
        let v = vault();
        let sealed = v.encrypt(&[1, 2, 3, 4]).unwrap();
        let opened = v.decrypt(&sealed).unwrap();
        assert_eq!(opened.expose(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_nonce_is_random() {
        let v = vault();
        assert_ne!(v.encrypt(&[9; 32]).unwrap(), v.encrypt(&[9; 32]).unwrap());
    }

    #[test]
    fn test_wrong_master_key_fails() {
        let sealed = vault().encrypt(&[1, 2, 3]).unwrap();
        let other = AesGcmVault::from_master_key(&[8u8; 32]).unwrap();
        assert!(matches!(
            other.decrypt(&sealed),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_blob_fails() {
        let v = vault();
        let sealed = v.encrypt(&[1, 2, 3]).unwrap();
        let mut raw = BASE64.decode(&sealed.0).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let tampered = EncryptedKeyRef(BASE64.encode(raw));
        assert!(matches!(
            v.decrypt(&tampered),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_malformed_blob() {
        let v = vault();
        assert!(matches!(
            v.decrypt(&EncryptedKeyRef("not base64!".to_string())),
            Err(VaultError::MalformedBlob(_))
        ));
        assert!(matches!(
            v.decrypt(&EncryptedKeyRef(BASE64.encode([0u8; 4]))),
            Err(VaultError::MalformedBlob(_))
        ));
    }

    #[test]
    fn test_master_key_validation() {
        assert!(AesGcmVault::from_hex("abcd").is_err());
        assert!(AesGcmVault::from_hex(&"11".repeat(32)).is_ok());
        assert!(AesGcmVault::from_hex(&format!("0x{}", "11".repeat(32))).is_ok());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = SecretKeyMaterial::new(vec![0xde, 0xad]);
        assert_eq!(format!("{:?}", secret), "SecretKeyMaterial([REDACTED])");
        let r = EncryptedKeyRef("abcdef".to_string());
        assert_eq!(format!("{:?}", r), "EncryptedKeyRef(6 bytes)");
    }
}
