//! Per-(user, competition) boost credits backed by an append-only
//! change log.
//!
//! The aggregate balance and its change log move together: every
//! applied increase adds one `boost_changes` row and bumps the
//! `boost_balances` row in the same transaction, preserving
//! `balance == Σ delta_amount`.

use bigdecimal::{BigDecimal, Zero};
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

use crate::database::{DbPool, DbTx};
use crate::errors::{LedgerError, Result};
use crate::idempotency::IdempotencyKey;
use crate::models::{BoostChange, BoostIncrease, IncreaseBoost};

pub struct BoostLedger {
    pool: DbPool,
}

impl BoostLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Idempotently credit a user's boost balance for one competition.
    ///
    /// The first call for an idempotency key applies the mutation and
    /// returns `Applied`; any retry, from this process or another one
    /// sharing the database, returns `Noop` with the current aggregate
    /// balance and performs no further write. Racing callers with the
    /// same key serialize on the balance row lock and on the unique
    /// index over `idem_key`: exactly one of them applies.
    pub async fn increase(
        &self,
        tx: Option<&mut DbTx<'_>>,
        args: IncreaseBoost,
    ) -> Result<BoostIncrease> {
        if args.amount < BigDecimal::zero() {
            return Err(LedgerError::Validation(format!(
                "Boost amount must not be negative: {}",
                args.amount
            )));
        }
        if !args.amount.is_integer() {
            return Err(LedgerError::Validation(format!(
                "Boost amount must be an integer: {}",
                args.amount
            )));
        }

        let outcome = match tx {
            Some(tx) => Self::increase_in(&mut **tx, &args).await?,
            None => {
                let mut own_tx = self.pool.begin().await?;
                let outcome = Self::increase_in(&mut own_tx, &args).await?;
                own_tx.commit().await?;
                outcome
            }
        };

        match &outcome {
            BoostIncrease::Applied {
                balance_after,
                change_id,
                ..
            } => {
                info!(
                    user_id = %args.user_id,
                    competition_id = %args.competition_id,
                    amount = %args.amount,
                    %balance_after,
                    %change_id,
                    "Boost increase applied"
                );
            }
            BoostIncrease::Noop { balance } => {
                info!(
                    user_id = %args.user_id,
                    competition_id = %args.competition_id,
                    %balance,
                    "Boost increase already recorded, noop"
                );
            }
        }

        Ok(outcome)
    }

    /// Current boost balance for a (user, competition) pair, 0 when no
    /// row exists.
    pub async fn user_boost_balance(
        &self,
        user_id: Uuid,
        competition_id: Uuid,
    ) -> Result<BigDecimal> {
        let balance = sqlx::query_scalar::<_, BigDecimal>(
            r#"
            SELECT balance FROM boost_balances
            WHERE user_id = $1 AND competition_id = $2
            "#,
        )
        .bind(user_id)
        .bind(competition_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance.unwrap_or_else(BigDecimal::zero))
    }

    /// Audit projection: change rows carrying the given correlation id
    /// in their `meta`, newest first. Never mutates state.
    pub async fn changes_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<BoostChange>> {
        let changes = sqlx::query_as::<_, BoostChange>(
            r#"
            SELECT * FROM boost_changes
            WHERE meta->>'correlationId' = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(changes)
    }

    /// Audit projection: all change rows for one competition, newest
    /// first. Never mutates state.
    pub async fn changes_by_competition(&self, competition_id: Uuid) -> Result<Vec<BoostChange>> {
        let changes = sqlx::query_as::<_, BoostChange>(
            r#"
            SELECT c.id, c.balance_id, c.delta_amount, c.wallet,
                   c.idem_key, c.meta, c.created_at
            FROM boost_changes c
            JOIN boost_balances b ON b.id = c.balance_id
            WHERE b.competition_id = $1
            ORDER BY c.created_at DESC
            "#,
        )
        .bind(competition_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(changes)
    }

    async fn increase_in(conn: &mut PgConnection, args: &IncreaseBoost) -> Result<BoostIncrease> {
        let idem_key = args.idem_key.unwrap_or_else(|| {
            IdempotencyKey::derive(
                args.user_id,
                args.competition_id,
                &args.wallet,
                &args.amount,
            )
        });

        // Create-or-lock the aggregate row. The no-op DO UPDATE takes
        // the row lock, so retries racing on the same pair serialize
        // here and read a committed balance below.
        let (balance_id, balance) = sqlx::query_as::<_, (Uuid, BigDecimal)>(
            r#"
            INSERT INTO boost_balances (
                id, user_id, competition_id, balance, created_at, updated_at
            )
            VALUES ($1, $2, $3, 0, NOW(), NOW())
            ON CONFLICT (user_id, competition_id)
            DO UPDATE SET balance = boost_balances.balance
            RETURNING id, balance
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(args.user_id)
        .bind(args.competition_id)
        .fetch_one(&mut *conn)
        .await?;

        // The unique index on idem_key decides applied vs noop. A zero
        // delta still appends a change row.
        let change_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO boost_changes (
                id, balance_id, delta_amount, wallet, idem_key, meta, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (idem_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(balance_id)
        .bind(&args.amount)
        .bind(args.wallet.to_vec())
        .bind(idem_key.to_vec())
        .bind(&args.meta)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(change_id) = change_id else {
            return Ok(BoostIncrease::Noop { balance });
        };

        let balance_after = sqlx::query_scalar::<_, BigDecimal>(
            r#"
            UPDATE boost_balances
            SET balance = balance + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING balance
            "#,
        )
        .bind(balance_id)
        .bind(&args.amount)
        .fetch_one(&mut *conn)
        .await?;

        Ok(BoostIncrease::Applied {
            balance_after,
            change_id,
            idem_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WalletAddress;

    fn args(amount: &str) -> IncreaseBoost {
        IncreaseBoost {
            user_id: Uuid::new_v4(),
            competition_id: Uuid::new_v4(),
            wallet: WalletAddress::from_hex("0x1122334455667788990011223344556677889900")
                .unwrap(),
            amount: amount.parse().unwrap(),
            idem_key: None,
            meta: None,
        }
    }

    #[test]
    fn test_negative_amount_is_invalid() {
        let args = args("-1");
        assert!(args.amount < BigDecimal::zero());
    }

    #[test]
    fn test_fractional_amount_is_invalid() {
        let args = args("1.5");
        assert!(!args.amount.is_integer());
    }

    #[test]
    fn test_thirty_digit_amount_is_exact() {
        let args = args("123456789012345678901234567890");
        assert_eq!(
            args.amount.to_string(),
            "123456789012345678901234567890"
        );
    }
}
