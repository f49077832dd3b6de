//! Address Registry Adapter
//!
//! Read-only view of the per-user deposit addresses managed by the
//! surrounding application. One address may appear several times on the
//! same chain, once per asset it receives.

use crate::core_types::{AddressId, ChainId, UserId};
use crate::vault::EncryptedKeyRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

/// A deposit address for one (chain, address, asset)
#[derive(Debug, Clone, PartialEq)]
pub struct DepositAddress {
    pub id: AddressId,
    pub chain: ChainId,
    pub asset: String,
    pub address: String,
    pub encrypted_key: EncryptedKeyRef,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AddressRegistry: Send + Sync {
    /// Active (not soft-disabled) addresses on `chain`
    async fn list_active_addresses(
        &self,
        chain: ChainId,
    ) -> Result<Vec<DepositAddress>, RegistryError>;
}

/// Reads the application's `deposit_addresses` table
pub struct PgAddressRegistry {
    pool: PgPool,
}

impl PgAddressRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AddressRegistry for PgAddressRegistry {
    async fn list_active_addresses(
        &self,
        chain: ChainId,
    ) -> Result<Vec<DepositAddress>, RegistryError> {
        let rows = sqlx::query(
            r#"SELECT id, chain, asset, address, encrypted_key, user_id, created_at
               FROM deposit_addresses
               WHERE chain = $1 AND disabled_at IS NULL
               ORDER BY created_at"#,
        )
        .bind(chain.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut addresses = Vec::with_capacity(rows.len());
        for row in rows {
            addresses.push(DepositAddress {
                id: row.try_get("id")?,
                chain,
                asset: row.try_get("asset")?,
                address: row.try_get("address")?,
                encrypted_key: EncryptedKeyRef(row.try_get("encrypted_key")?),
                user_id: row.try_get("user_id")?,
                created_at: row.try_get("created_at")?,
            });
        }
        tracing::debug!("{}: Loaded {} active deposit addresses", chain, addresses.len());
        Ok(addresses)
    }
}

/// Fixed in-memory registry
#[derive(Default)]
pub struct StaticAddressRegistry {
    addresses: RwLock<Vec<DepositAddress>>,
}

impl StaticAddressRegistry {
    pub fn new(addresses: Vec<DepositAddress>) -> Self {
        Self {
            addresses: RwLock::new(addresses),
        }
    }

    pub fn add(&self, address: DepositAddress) {
        if let Ok(mut guard) = self.addresses.write() {
            guard.push(address);
        }
    }
}

#[async_trait]
impl AddressRegistry for StaticAddressRegistry {
    async fn list_active_addresses(
        &self,
        chain: ChainId,
    ) -> Result<Vec<DepositAddress>, RegistryError> {
        let guard = self
            .addresses
            .read()
            .map_err(|_| RegistryError::Unavailable("registry lock poisoned".to_string()))?;
        Ok(guard.iter().filter(|a| a.chain == chain).cloned().collect())
    }
}
