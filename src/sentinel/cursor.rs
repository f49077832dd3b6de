//! Scan cursor persistence
//!
//! The watcher tick itself is pure in its cursor: it takes the last
//! processed height and returns the next one. These stores only carry
//! that value across ticks and restarts.

use crate::core_types::{ChainId, Height};
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{PgPool, Row};

use super::error::SentinelError;

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, chain: ChainId) -> Result<Option<Height>, SentinelError>;
    async fn save(&self, chain: ChainId, height: Height) -> Result<(), SentinelError>;
}

/// `chain_cursor` table
pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn load(&self, chain: ChainId) -> Result<Option<Height>, SentinelError> {
        let row = sqlx::query("SELECT last_scanned_height FROM chain_cursor WHERE chain = $1")
            .bind(chain.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let height: i64 = r.try_get("last_scanned_height")?;
                Ok(u64::try_from(height).ok())
            }
            None => Ok(None),
        }
    }

    async fn save(&self, chain: ChainId, height: Height) -> Result<(), SentinelError> {
        sqlx::query(
            r#"INSERT INTO chain_cursor (chain, last_scanned_height)
               VALUES ($1, $2)
               ON CONFLICT (chain) DO UPDATE
               SET last_scanned_height = EXCLUDED.last_scanned_height,
                   updated_at = NOW()"#,
        )
        .bind(chain.to_string())
        .bind(height as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCursorStore {
    heights: DashMap<ChainId, Height>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, chain: ChainId) -> Result<Option<Height>, SentinelError> {
        Ok(self.heights.get(&chain).map(|h| *h.value()))
    }

    async fn save(&self, chain: ChainId, height: Height) -> Result<(), SentinelError> {
        self.heights.insert(chain, height);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cursor_per_chain() {
        let store = MemoryCursorStore::new();
        assert_eq!(store.load(ChainId::Solana).await.unwrap(), None);

        store.save(ChainId::Solana, 1000).await.unwrap();
        store.save(ChainId::Evm(8453), 500).await.unwrap();
        store.save(ChainId::Solana, 1010).await.unwrap();

        assert_eq!(store.load(ChainId::Solana).await.unwrap(), Some(1010));
        assert_eq!(store.load(ChainId::Evm(8453)).await.unwrap(), Some(500));
    }
}
