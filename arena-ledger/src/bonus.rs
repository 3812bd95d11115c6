//! Competition-independent, time-bounded boost credit grants.
//!
//! A bonus starts active and becomes inactive only through an explicit
//! update. The registry does no time-based deactivation of its own;
//! expiry enforcement belongs to an external scheduler. Bonuses
//! correlate to boost changes loosely via metadata, never a foreign key.

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

use crate::database::{DbPool, DbTx};
use crate::errors::{LedgerError, Result};
use crate::models::{BoostBonus, BoostBonusUpdate, NewBoostBonus};

pub struct BoostBonusRegistry {
    pool: DbPool,
}

impl BoostBonusRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Grant a new bonus. `amount` must be a positive integer and is
    /// immutable after creation.
    pub async fn create_boost_bonus(
        &self,
        tx: Option<&mut DbTx<'_>>,
        new_bonus: NewBoostBonus,
    ) -> Result<BoostBonus> {
        if new_bonus.amount <= BigDecimal::zero() {
            return Err(LedgerError::Validation(format!(
                "Bonus amount must be positive: {}",
                new_bonus.amount
            )));
        }
        if !new_bonus.amount.is_integer() {
            return Err(LedgerError::Validation(format!(
                "Bonus amount must be an integer: {}",
                new_bonus.amount
            )));
        }

        let bonus = match tx {
            Some(tx) => Self::create_in(&mut **tx, &new_bonus).await?,
            None => {
                let mut own_tx = self.pool.begin().await?;
                let bonus = Self::create_in(&mut own_tx, &new_bonus).await?;
                own_tx.commit().await?;
                bonus
            }
        };

        info!(
            bonus_id = %bonus.id,
            user_id = %bonus.user_id,
            amount = %bonus.amount,
            expires_at = %bonus.expires_at,
            "Created boost bonus"
        );

        Ok(bonus)
    }

    /// Partial update. `amount` is never accepted; `updated_at` is
    /// always refreshed. Fails with `BonusNotFound` for an unknown id.
    pub async fn update_boost_bonus(
        &self,
        tx: Option<&mut DbTx<'_>>,
        id: Uuid,
        update: BoostBonusUpdate,
    ) -> Result<BoostBonus> {
        let bonus = match tx {
            Some(tx) => Self::update_in(&mut **tx, id, &update).await?,
            None => {
                let mut own_tx = self.pool.begin().await?;
                let bonus = Self::update_in(&mut own_tx, id, &update).await?;
                own_tx.commit().await?;
                bonus
            }
        };

        info!(bonus_id = %id, is_active = bonus.is_active, "Updated boost bonus");

        Ok(bonus)
    }

    pub async fn find_boost_bonus_by_id(&self, id: Uuid) -> Result<Option<BoostBonus>> {
        let bonus = sqlx::query_as::<_, BoostBonus>(
            r#"
            SELECT * FROM boost_bonus WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(bonus)
    }

    /// Active bonuses for one user, newest first.
    pub async fn find_active_boost_bonuses_by_user_id(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<BoostBonus>> {
        let bonuses = sqlx::query_as::<_, BoostBonus>(
            r#"
            SELECT * FROM boost_bonus
            WHERE user_id = $1 AND is_active = TRUE
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(bonuses)
    }

    /// All active bonuses across users, newest first.
    pub async fn find_all_active_boost_bonuses(&self) -> Result<Vec<BoostBonus>> {
        let bonuses = sqlx::query_as::<_, BoostBonus>(
            r#"
            SELECT * FROM boost_bonus
            WHERE is_active = TRUE
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(bonuses)
    }

    /// Users holding active bonuses that expire strictly later than the
    /// cutoff. A bonus expiring exactly at the cutoff is excluded.
    pub async fn find_users_with_active_boost_bonuses(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let user_ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT user_id FROM boost_bonus
            WHERE is_active = TRUE AND expires_at > $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(user_ids)
    }

    /// The matching subset of the given ids, active and inactive alike.
    /// An empty id list short-circuits without touching the database.
    pub async fn find_boost_bonuses_by_ids(&self, ids: &[Uuid]) -> Result<Vec<BoostBonus>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let bonuses = sqlx::query_as::<_, BoostBonus>(
            r#"
            SELECT * FROM boost_bonus WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(bonuses)
    }

    /// Sum of active bonus amounts for one user, 0 when none. Exact for
    /// 30+ digit magnitudes, no floating-point rounding.
    pub async fn sum_active_boost_bonuses_for_user(&self, user_id: Uuid) -> Result<BigDecimal> {
        let total = sqlx::query_scalar::<_, BigDecimal>(
            r#"
            SELECT COALESCE(SUM(amount), 0) FROM boost_bonus
            WHERE user_id = $1 AND is_active = TRUE
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn create_in(conn: &mut PgConnection, new_bonus: &NewBoostBonus) -> Result<BoostBonus> {
        let bonus = sqlx::query_as::<_, BoostBonus>(
            r#"
            INSERT INTO boost_bonus (
                id, user_id, amount, expires_at, is_active,
                created_by_admin_id, meta, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, TRUE, $5, $6, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_bonus.user_id)
        .bind(&new_bonus.amount)
        .bind(new_bonus.expires_at)
        .bind(new_bonus.created_by_admin_id)
        .bind(&new_bonus.meta)
        .fetch_one(&mut *conn)
        .await?;

        Ok(bonus)
    }

    async fn update_in(
        conn: &mut PgConnection,
        id: Uuid,
        update: &BoostBonusUpdate,
    ) -> Result<BoostBonus> {
        let bonus = sqlx::query_as::<_, BoostBonus>(
            r#"
            UPDATE boost_bonus
            SET expires_at = COALESCE($2, expires_at),
                is_active = COALESCE($3, is_active),
                revoked_at = COALESCE($4, revoked_at),
                meta = COALESCE($5, meta),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.expires_at)
        .bind(update.is_active)
        .bind(update.revoked_at)
        .bind(&update.meta)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(LedgerError::BonusNotFound(id))?;

        Ok(bonus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_amount_fails_validation() {
        let amount = BigDecimal::zero();
        assert!(amount <= BigDecimal::zero());
    }

    #[test]
    fn test_update_has_no_amount_field() {
        // Compile-time shape check: the update struct carries only the
        // mutable fields.
        let update = BoostBonusUpdate {
            is_active: Some(false),
            revoked_at: Some(Utc::now()),
            ..Default::default()
        };
        assert!(update.expires_at.is_none());
        assert!(update.meta.is_none());
    }
}
