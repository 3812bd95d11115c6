//! Per-(agent, token, competition) trading balances.
//!
//! Increments are a single atomic upsert against the unique key, and
//! decrements hold a row lock for the check-and-update, so concurrent
//! transactions on the same key serialize instead of losing updates.
//! Distinct keys never contend, which is what keeps competitions
//! sharing an agent isolated from each other.

use rust_decimal::Decimal;
use sqlx::PgConnection;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::{DbPool, DbTx};
use crate::errors::{LedgerError, Result};
use crate::models::{Balance, TokenBalance};

pub struct BalanceStore {
    pool: DbPool,
}

impl BalanceStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get one balance row, if present.
    pub async fn get_balance(
        &self,
        agent_id: Uuid,
        token_address: &str,
        competition_id: Uuid,
    ) -> Result<Option<Balance>> {
        let balance = sqlx::query_as::<_, Balance>(
            r#"
            SELECT * FROM balances
            WHERE agent_id = $1 AND token_address = $2 AND competition_id = $3
            "#,
        )
        .bind(agent_id)
        .bind(token_address)
        .bind(competition_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance)
    }

    /// All balances for one agent in one competition. Empty when the
    /// agent or competition is unknown or holds nothing.
    pub async fn get_agent_balances(
        &self,
        agent_id: Uuid,
        competition_id: Uuid,
    ) -> Result<Vec<Balance>> {
        let balances = sqlx::query_as::<_, Balance>(
            r#"
            SELECT * FROM balances
            WHERE agent_id = $1 AND competition_id = $2
            ORDER BY token_address
            "#,
        )
        .bind(agent_id)
        .bind(competition_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(balances)
    }

    /// Balances for several agents in one competition. An empty id list
    /// short-circuits without touching the database.
    pub async fn get_agents_bulk_balances(
        &self,
        agent_ids: &[Uuid],
        competition_id: Uuid,
    ) -> Result<Vec<Balance>> {
        if agent_ids.is_empty() {
            return Ok(Vec::new());
        }

        let balances = sqlx::query_as::<_, Balance>(
            r#"
            SELECT * FROM balances
            WHERE agent_id = ANY($1) AND competition_id = $2
            ORDER BY agent_id, token_address
            "#,
        )
        .bind(agent_ids)
        .bind(competition_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(balances)
    }

    /// Atomically add `amount` to the (agent, token, competition) balance,
    /// creating the row when absent. Returns the new amount.
    ///
    /// A zero amount is a legal operation that still persists a row.
    #[allow(clippy::too_many_arguments)]
    pub async fn increment_balance(
        &self,
        tx: Option<&mut DbTx<'_>>,
        agent_id: Uuid,
        token_address: &str,
        competition_id: Uuid,
        amount: Decimal,
        specific_chain: &str,
        symbol: &str,
    ) -> Result<Decimal> {
        validate_amount(amount)?;

        let new_amount = match tx {
            Some(tx) => {
                Self::increment_in(
                    &mut **tx,
                    agent_id,
                    token_address,
                    competition_id,
                    amount,
                    specific_chain,
                    symbol,
                )
                .await?
            }
            None => {
                let mut own_tx = self.pool.begin().await?;
                let new_amount = Self::increment_in(
                    &mut own_tx,
                    agent_id,
                    token_address,
                    competition_id,
                    amount,
                    specific_chain,
                    symbol,
                )
                .await?;
                own_tx.commit().await?;
                new_amount
            }
        };

        info!(
            %agent_id,
            %competition_id,
            token_address,
            %amount,
            %new_amount,
            "Incremented balance"
        );

        Ok(new_amount)
    }

    /// Atomically subtract `amount`, failing with `InsufficientBalance`
    /// when it exceeds the available funds. The stored value is left
    /// unchanged on failure.
    #[allow(clippy::too_many_arguments)]
    pub async fn decrement_balance(
        &self,
        tx: Option<&mut DbTx<'_>>,
        agent_id: Uuid,
        token_address: &str,
        competition_id: Uuid,
        amount: Decimal,
        specific_chain: &str,
        symbol: &str,
    ) -> Result<Decimal> {
        validate_amount(amount)?;

        let new_amount = match tx {
            Some(tx) => {
                Self::decrement_in(
                    &mut **tx,
                    agent_id,
                    token_address,
                    competition_id,
                    amount,
                    specific_chain,
                    symbol,
                )
                .await?
            }
            None => {
                let mut own_tx = self.pool.begin().await?;
                let new_amount = Self::decrement_in(
                    &mut own_tx,
                    agent_id,
                    token_address,
                    competition_id,
                    amount,
                    specific_chain,
                    symbol,
                )
                .await?;
                own_tx.commit().await?;
                new_amount
            }
        };

        info!(
            %agent_id,
            %competition_id,
            token_address,
            %amount,
            %new_amount,
            "Decremented balance"
        );

        Ok(new_amount)
    }

    /// Replace the entire balance set for one (agent, competition) pair.
    ///
    /// Existing rows for the pair are removed and exactly the provided
    /// set is inserted, all in one transaction. An empty map yields zero
    /// rows for the pair. Other agents and other competitions are
    /// untouched.
    pub async fn reset_agent_balances(
        &self,
        tx: Option<&mut DbTx<'_>>,
        agent_id: Uuid,
        competition_id: Uuid,
        new_balances: &HashMap<String, TokenBalance>,
    ) -> Result<()> {
        for (token_address, token) in new_balances {
            if token.amount < Decimal::ZERO {
                return Err(LedgerError::Validation(format!(
                    "Negative amount for token {}: {}",
                    token_address, token.amount
                )));
            }
        }

        match tx {
            Some(tx) => {
                Self::reset_in(&mut **tx, agent_id, competition_id, new_balances).await?;
            }
            None => {
                let mut own_tx = self.pool.begin().await?;
                Self::reset_in(&mut own_tx, agent_id, competition_id, new_balances).await?;
                own_tx.commit().await?;
            }
        }

        info!(
            %agent_id,
            %competition_id,
            tokens = new_balances.len(),
            "Reset agent balances"
        );

        Ok(())
    }

    /// Total number of balance rows, optionally scoped to one competition.
    pub async fn count(&self, competition_id: Option<Uuid>) -> Result<i64> {
        let count = match competition_id {
            Some(competition_id) => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM balances WHERE competition_id = $1",
                )
                .bind(competition_id)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM balances")
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        Ok(count)
    }

    async fn increment_in(
        conn: &mut PgConnection,
        agent_id: Uuid,
        token_address: &str,
        competition_id: Uuid,
        amount: Decimal,
        specific_chain: &str,
        symbol: &str,
    ) -> Result<Decimal> {
        // Upsert arithmetic happens inside the statement, so two
        // transactions hitting the same key serialize on the row
        // instead of losing an update.
        let new_amount = sqlx::query_scalar::<_, Decimal>(
            r#"
            INSERT INTO balances (
                id, agent_id, token_address, competition_id,
                amount, specific_chain, symbol, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            ON CONFLICT (agent_id, token_address, competition_id)
            DO UPDATE SET
                amount = balances.amount + EXCLUDED.amount,
                updated_at = NOW()
            RETURNING amount
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(agent_id)
        .bind(token_address)
        .bind(competition_id)
        .bind(amount)
        .bind(specific_chain)
        .bind(symbol)
        .fetch_one(&mut *conn)
        .await?;

        Ok(new_amount)
    }

    async fn decrement_in(
        conn: &mut PgConnection,
        agent_id: Uuid,
        token_address: &str,
        competition_id: Uuid,
        amount: Decimal,
        specific_chain: &str,
        symbol: &str,
    ) -> Result<Decimal> {
        // Lock the row so no concurrent decrement can observe the same
        // available funds between the check and the update.
        let available = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT amount FROM balances
            WHERE agent_id = $1 AND token_address = $2 AND competition_id = $3
            FOR UPDATE
            "#,
        )
        .bind(agent_id)
        .bind(token_address)
        .bind(competition_id)
        .fetch_optional(&mut *conn)
        .await?;

        match available {
            None if amount.is_zero() => {
                // Absent row, zero decrement: still persists a row.
                let new_amount = sqlx::query_scalar::<_, Decimal>(
                    r#"
                    INSERT INTO balances (
                        id, agent_id, token_address, competition_id,
                        amount, specific_chain, symbol, created_at, updated_at
                    )
                    VALUES ($1, $2, $3, $4, 0, $5, $6, NOW(), NOW())
                    ON CONFLICT (agent_id, token_address, competition_id)
                    DO UPDATE SET updated_at = NOW()
                    RETURNING amount
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(agent_id)
                .bind(token_address)
                .bind(competition_id)
                .bind(specific_chain)
                .bind(symbol)
                .fetch_one(&mut *conn)
                .await?;

                Ok(new_amount)
            }
            None => Err(LedgerError::InsufficientBalance {
                agent_id,
                token_address: token_address.to_string(),
                requested: amount,
                available: Decimal::ZERO,
            }),
            Some(available) if available < amount => {
                debug!(
                    %agent_id,
                    token_address,
                    %amount,
                    %available,
                    "Overdraft rejected"
                );
                Err(LedgerError::InsufficientBalance {
                    agent_id,
                    token_address: token_address.to_string(),
                    requested: amount,
                    available,
                })
            }
            Some(_) => {
                let new_amount = sqlx::query_scalar::<_, Decimal>(
                    r#"
                    UPDATE balances
                    SET amount = amount - $4, updated_at = NOW()
                    WHERE agent_id = $1 AND token_address = $2 AND competition_id = $3
                    RETURNING amount
                    "#,
                )
                .bind(agent_id)
                .bind(token_address)
                .bind(competition_id)
                .bind(amount)
                .fetch_one(&mut *conn)
                .await?;

                Ok(new_amount)
            }
        }
    }

    async fn reset_in(
        conn: &mut PgConnection,
        agent_id: Uuid,
        competition_id: Uuid,
        new_balances: &HashMap<String, TokenBalance>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM balances
            WHERE agent_id = $1 AND competition_id = $2
            "#,
        )
        .bind(agent_id)
        .bind(competition_id)
        .execute(&mut *conn)
        .await?;

        for (token_address, token) in new_balances {
            sqlx::query(
                r#"
                INSERT INTO balances (
                    id, agent_id, token_address, competition_id,
                    amount, specific_chain, symbol, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(agent_id)
            .bind(token_address)
            .bind(competition_id)
            .bind(token.amount)
            .bind(&token.specific_chain)
            .bind(&token.symbol)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }
}

fn validate_amount(amount: Decimal) -> Result<()> {
    if amount < Decimal::ZERO {
        return Err(LedgerError::Validation(format!(
            "Amount must not be negative: {}",
            amount
        )));
    }
    Ok(())
}
