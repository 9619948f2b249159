//! Wallet engine.
//!
//! Each user has at most one wallet. Balances only move through [`WalletEngine::credit`]
//! and [`WalletEngine::debit`], and every move writes exactly one ledger row in the
//! same transaction. The debit guard lives in the UPDATE itself, so two
//! concurrent debits can never drive a balance negative.

use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance_cents: i64,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    /// Signed: credits positive, debits negative.
    pub amount_cents: i64,
    pub direction: String,
    pub description: String,
    /// Opaque id of the order or subscription that caused the movement.
    pub reference: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct WalletEngine {
    pool: PgPool,
}

impl WalletEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch the user's wallet, creating a zero-balance one on first touch.
    pub async fn get_or_create(&self, user_id: Uuid) -> BillingResult<Wallet> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, user_id, balance_cents, updated_at)
            VALUES ($1, $2, 0, NOW())
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        let wallet: Wallet = sqlx::query_as(
            "SELECT id, user_id, balance_cents, updated_at FROM wallets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(wallet)
    }

    pub async fn balance(&self, user_id: Uuid) -> BillingResult<i64> {
        Ok(self.get_or_create(user_id).await?.balance_cents)
    }

    /// Add funds. Amount must be positive.
    pub async fn credit(
        &self,
        user_id: Uuid,
        amount_cents: i64,
        description: &str,
        reference: Option<Uuid>,
    ) -> BillingResult<Wallet> {
        if amount_cents <= 0 {
            return Err(BillingError::Validation(
                "credit amount must be positive".to_string(),
            ));
        }

        let wallet = self.get_or_create(user_id).await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE wallets
            SET balance_cents = balance_cents + $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(amount_cents)
        .bind(wallet.id)
        .execute(&mut *tx)
        .await?;

        record_transaction(&mut tx, wallet.id, amount_cents, "credit", description, reference)
            .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            amount_cents = amount_cents,
            "Wallet credited"
        );

        self.get_or_create(user_id).await
    }

    /// Remove funds. The balance check and the decrement are one statement;
    /// zero rows affected means the balance was insufficient at execution
    /// time, regardless of what any earlier read saw.
    pub async fn debit(
        &self,
        user_id: Uuid,
        amount_cents: i64,
        description: &str,
        reference: Option<Uuid>,
    ) -> BillingResult<Wallet> {
        if amount_cents <= 0 {
            return Err(BillingError::Validation(
                "debit amount must be positive".to_string(),
            ));
        }

        let wallet = self.get_or_create(user_id).await?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET balance_cents = balance_cents - $1, updated_at = NOW()
            WHERE id = $2 AND balance_cents >= $1
            "#,
        )
        .bind(amount_cents)
        .bind(wallet.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(BillingError::InsufficientBalance {
                required_cents: amount_cents,
                available_cents: wallet.balance_cents,
            });
        }

        record_transaction(&mut tx, wallet.id, -amount_cents, "debit", description, reference)
            .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            amount_cents = amount_cents,
            description = description,
            "Wallet debited"
        );

        self.get_or_create(user_id).await
    }

    /// Ledger entries, newest first.
    pub async fn history(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<WalletTransaction>> {
        let wallet = self.get_or_create(user_id).await?;

        let rows: Vec<WalletTransaction> = sqlx::query_as(
            r#"
            SELECT id, wallet_id, amount_cents, direction, description, reference, created_at
            FROM wallet_transactions
            WHERE wallet_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(wallet.id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

async fn record_transaction(
    tx: &mut Transaction<'_, Postgres>,
    wallet_id: Uuid,
    amount_cents: i64,
    direction: &str,
    description: &str,
    reference: Option<Uuid>,
) -> BillingResult<()> {
    sqlx::query(
        r#"
        INSERT INTO wallet_transactions (id, wallet_id, amount_cents, direction, description, reference, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(wallet_id)
    .bind(amount_cents)
    .bind(direction)
    .bind(description)
    .bind(reference)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
