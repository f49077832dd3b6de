//! PostgreSQL deposit store
//!
//! Uniqueness of (chain, tx_id) is enforced by the table constraint, so
//! insert-if-absent is a single `ON CONFLICT DO NOTHING` statement.

use crate::core_types::{ChainId, DepositId};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::error::StoreError;
use super::state::DepositStatus;
use super::store::DepositStore;
use super::types::OnchainDeposit;

/// DDL for the tables this crate owns
pub const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS onchain_deposits (
        id                     UUID PRIMARY KEY,
        user_id                UUID NOT NULL,
        deposit_address_id     UUID NOT NULL,
        chain                  TEXT NOT NULL,
        asset                  TEXT NOT NULL,
        tx_id                  TEXT NOT NULL,
        amount                 NUMERIC NOT NULL,
        confirmations          BIGINT NOT NULL,
        required_confirmations BIGINT NOT NULL,
        status                 SMALLINT NOT NULL,
        first_observed_at      TIMESTAMPTZ NOT NULL,
        confirmed_at           TIMESTAMPTZ,
        swept_at               TIMESTAMPTZ,
        from_address           TEXT,
        block_height           BIGINT NOT NULL,
        sweep_tx_id            TEXT,
        sweep_attempts         INTEGER NOT NULL DEFAULT 0,
        last_sweep_error       TEXT,
        last_sweep_attempt_at  TIMESTAMPTZ,
        sweep_halted           BOOLEAN NOT NULL DEFAULT FALSE,
        CONSTRAINT onchain_deposits_chain_tx_uniq UNIQUE (chain, tx_id)
    )"#,
    r#"ALTER TABLE onchain_deposits
        ADD COLUMN IF NOT EXISTS sweep_halted BOOLEAN NOT NULL DEFAULT FALSE"#,
    r#"CREATE INDEX IF NOT EXISTS idx_onchain_deposits_chain_status
        ON onchain_deposits (chain, status)"#,
    r#"CREATE TABLE IF NOT EXISTS chain_cursor (
        chain               TEXT PRIMARY KEY,
        last_scanned_height BIGINT NOT NULL,
        updated_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
];

/// Create owned tables if they do not exist yet
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("Deposit ledger schema ready");
    Ok(())
}

const SELECT_COLUMNS: &str = r#"SELECT id, user_id, deposit_address_id, chain, asset, tx_id, amount,
    confirmations, required_confirmations, status, first_observed_at, confirmed_at,
    swept_at, from_address, block_height, sweep_tx_id, sweep_attempts,
    last_sweep_error, last_sweep_attempt_at, sweep_halted
    FROM onchain_deposits"#;

pub struct PgDepositStore {
    pool: PgPool,
}

impl PgDepositStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn corrupt(id: &DepositId, reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason: reason.into(),
    }
}

fn row_to_deposit(row: &PgRow) -> Result<OnchainDeposit, StoreError> {
    let id: DepositId = row.try_get("id")?;
    let chain: String = row.try_get("chain")?;
    let status: i16 = row.try_get("status")?;
    let confirmations: i64 = row.try_get("confirmations")?;
    let required: i64 = row.try_get("required_confirmations")?;
    let block_height: i64 = row.try_get("block_height")?;
    let sweep_attempts: i32 = row.try_get("sweep_attempts")?;

    Ok(OnchainDeposit {
        id,
        user_id: row.try_get("user_id")?,
        deposit_address_id: row.try_get("deposit_address_id")?,
        chain: chain
            .parse::<ChainId>()
            .map_err(|e| corrupt(&id, e.to_string()))?,
        asset: row.try_get("asset")?,
        tx_id: row.try_get("tx_id")?,
        amount: row.try_get("amount")?,
        confirmations: u64::try_from(confirmations)
            .map_err(|_| corrupt(&id, "negative confirmations"))?,
        required_confirmations: u64::try_from(required)
            .map_err(|_| corrupt(&id, "negative required_confirmations"))?,
        status: DepositStatus::from_id(status)
            .ok_or_else(|| corrupt(&id, format!("unknown status {}", status)))?,
        first_observed_at: row.try_get("first_observed_at")?,
        confirmed_at: row.try_get("confirmed_at")?,
        swept_at: row.try_get("swept_at")?,
        from_address: row.try_get("from_address")?,
        block_height: u64::try_from(block_height)
            .map_err(|_| corrupt(&id, "negative block_height"))?,
        sweep_tx_id: row.try_get("sweep_tx_id")?,
        sweep_attempts: u32::try_from(sweep_attempts).unwrap_or(0),
        last_sweep_error: row.try_get("last_sweep_error")?,
        last_sweep_attempt_at: row.try_get("last_sweep_attempt_at")?,
        sweep_halted: row.try_get("sweep_halted")?,
    })
}

#[async_trait]
impl DepositStore for PgDepositStore {
    async fn insert_if_absent(&self, d: &OnchainDeposit) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO onchain_deposits
               (id, user_id, deposit_address_id, chain, asset, tx_id, amount,
                confirmations, required_confirmations, status, first_observed_at,
                confirmed_at, swept_at, from_address, block_height, sweep_tx_id,
                sweep_attempts, last_sweep_error, last_sweep_attempt_at, sweep_halted)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
               ON CONFLICT (chain, tx_id) DO NOTHING"#,
        )
        .bind(d.id)
        .bind(d.user_id)
        .bind(d.deposit_address_id)
        .bind(d.chain.to_string())
        .bind(&d.asset)
        .bind(&d.tx_id)
        .bind(d.amount)
        .bind(d.confirmations as i64)
        .bind(d.required_confirmations as i64)
        .bind(d.status.id())
        .bind(d.first_observed_at)
        .bind(d.confirmed_at)
        .bind(d.swept_at)
        .bind(&d.from_address)
        .bind(d.block_height as i64)
        .bind(&d.sweep_tx_id)
        .bind(d.sweep_attempts as i32)
        .bind(&d.last_sweep_error)
        .bind(d.last_sweep_attempt_at)
        .bind(d.sweep_halted)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_tx(
        &self,
        chain: ChainId,
        tx_id: &str,
    ) -> Result<Option<OnchainDeposit>, StoreError> {
        let sql = format!("{} WHERE chain = $1 AND tx_id = $2", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(chain.to_string())
            .bind(tx_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_deposit).transpose()
    }

    async fn find(&self, id: DepositId) -> Result<Option<OnchainDeposit>, StoreError> {
        let sql = format!("{} WHERE id = $1", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_deposit).transpose()
    }

    async fn compare_and_set(
        &self,
        expected: &OnchainDeposit,
        next: &OnchainDeposit,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE onchain_deposits
               SET confirmations = $5,
                   status = $6,
                   confirmed_at = $7,
                   swept_at = $8,
                   sweep_tx_id = $9,
                   sweep_attempts = $10,
                   last_sweep_error = $11,
                   last_sweep_attempt_at = $12,
                   sweep_halted = $13
               WHERE id = $1 AND status = $2 AND confirmations = $3 AND sweep_attempts = $4"#,
        )
        .bind(expected.id)
        .bind(expected.status.id())
        .bind(expected.confirmations as i64)
        .bind(expected.sweep_attempts as i32)
        .bind(next.confirmations as i64)
        .bind(next.status.id())
        .bind(next.confirmed_at)
        .bind(next.swept_at)
        .bind(&next.sweep_tx_id)
        .bind(next.sweep_attempts as i32)
        .bind(&next.last_sweep_error)
        .bind(next.last_sweep_attempt_at)
        .bind(next.sweep_halted)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_by_status(
        &self,
        chain: ChainId,
        status: DepositStatus,
    ) -> Result<Vec<OnchainDeposit>, StoreError> {
        let sql = format!(
            "{} WHERE chain = $1 AND status = $2 ORDER BY first_observed_at",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(chain.to_string())
            .bind(status.id())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_deposit).collect()
    }
}
