//! Repository for group-gift contributions

use super::{ContributionRepository, RepoResult};
use crate::error::RepositoryError;
use crate::models::contribution::remaining;
use crate::models::{Contribution, ContributionDraft, ContributionPatch, ContributionRow, UpsertOutcome};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

pub struct PgContributionRepository {
    pool: PgPool,
}

impl PgContributionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Lock the gift row for the rest of the transaction and return its target.
///
/// Every pledge write for a gift goes through this lock, so the sum read
/// afterwards cannot change until commit.
async fn lock_gift_target(conn: &mut PgConnection, gift_id: Uuid) -> RepoResult<Decimal> {
    let gift: Option<(bool, Option<Decimal>)> = sqlx::query_as(
        r#"
        SELECT is_group_gift, target_price
        FROM gifts
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(gift_id)
    .fetch_optional(&mut *conn)
    .await?;

    match gift {
        None => Err(RepositoryError::NotFound(format!("gift {}", gift_id))),
        Some((false, _)) => Err(RepositoryError::Conflict(format!(
            "gift {} is not a group gift",
            gift_id
        ))),
        Some((true, None)) => Err(RepositoryError::Conflict(format!(
            "gift {} has no target price",
            gift_id
        ))),
        Some((true, Some(target))) => Ok(target),
    }
}

/// Sum of the gift's pledges, leaving out one row
async fn total_of_others(
    conn: &mut PgConnection,
    gift_id: Uuid,
    excluded_contributor: Uuid,
) -> RepoResult<Decimal> {
    let total: Option<Decimal> = sqlx::query_scalar(
        r#"
        SELECT SUM(amount)
        FROM contributions
        WHERE gift_id = $1 AND contributor_id <> $2
        "#,
    )
    .bind(gift_id)
    .bind(excluded_contributor)
    .fetch_one(&mut *conn)
    .await?;

    Ok(total.unwrap_or(Decimal::ZERO))
}

fn check_target(target: Decimal, others: Decimal, amount: Decimal) -> RepoResult<()> {
    if others + amount > target {
        return Err(RepositoryError::TargetExceeded {
            remaining: remaining(target, others),
        });
    }
    Ok(())
}

#[async_trait]
impl ContributionRepository for PgContributionRepository {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Contribution>> {
        let row = sqlx::query_as::<_, ContributionRow>(
            r#"
            SELECT id, gift_id, contributor_id, amount, message, is_anonymous, created_at, updated_at
            FROM contributions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Contribution::try_from).transpose()
    }

    async fn list_by_gift(&self, gift_id: Uuid) -> RepoResult<Vec<Contribution>> {
        let rows = sqlx::query_as::<_, ContributionRow>(
            r#"
            SELECT id, gift_id, contributor_id, amount, message, is_anonymous, created_at, updated_at
            FROM contributions
            WHERE gift_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(gift_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Contribution::try_from).collect()
    }

    async fn upsert_checked(
        &self,
        draft: &ContributionDraft,
    ) -> RepoResult<(Contribution, UpsertOutcome)> {
        let mut tx = self.pool.begin().await?;

        let target = lock_gift_target(&mut tx, draft.gift_id).await?;
        let others = total_of_others(&mut tx, draft.gift_id, draft.contributor_id).await?;
        check_target(target, others, draft.amount)?;

        let existing: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM contributions
            WHERE gift_id = $1 AND contributor_id = $2
            "#,
        )
        .bind(draft.gift_id)
        .bind(draft.contributor_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (row, outcome) = match existing {
            Some(id) => {
                let row = sqlx::query_as::<_, ContributionRow>(
                    r#"
                    UPDATE contributions
                    SET amount = $2, message = $3, is_anonymous = $4, updated_at = NOW()
                    WHERE id = $1
                    RETURNING id, gift_id, contributor_id, amount, message, is_anonymous, created_at, updated_at
                    "#,
                )
                .bind(id)
                .bind(draft.amount)
                .bind(&draft.message)
                .bind(draft.is_anonymous)
                .fetch_one(&mut *tx)
                .await?;
                (row, UpsertOutcome::Updated)
            }
            None => {
                // A racing first pledge by the same user trips the unique constraint
                let row = sqlx::query_as::<_, ContributionRow>(
                    r#"
                    INSERT INTO contributions (gift_id, contributor_id, amount, message, is_anonymous)
                    VALUES ($1, $2, $3, $4, $5)
                    RETURNING id, gift_id, contributor_id, amount, message, is_anonymous, created_at, updated_at
                    "#,
                )
                .bind(draft.gift_id)
                .bind(draft.contributor_id)
                .bind(draft.amount)
                .bind(&draft.message)
                .bind(draft.is_anonymous)
                .fetch_one(&mut *tx)
                .await?;
                (row, UpsertOutcome::Inserted)
            }
        };

        tx.commit().await?;

        Ok((Contribution::try_from(row)?, outcome))
    }

    async fn update_checked(&self, id: Uuid, patch: &ContributionPatch) -> RepoResult<Contribution> {
        let mut tx = self.pool.begin().await?;

        let current: (Uuid, Uuid, Decimal) = sqlx::query_as(
            r#"
            SELECT gift_id, contributor_id, amount
            FROM contributions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("contribution {}", id)))?;
        let (gift_id, contributor_id, current_amount) = current;

        if let Some(amount) = patch.amount {
            let target = lock_gift_target(&mut tx, gift_id).await?;
            let others = total_of_others(&mut tx, gift_id, contributor_id).await?;
            check_target(target, others, amount)?;
        }

        let (set_message, message) = match &patch.message {
            Some(message) => (true, message.clone()),
            None => (false, None),
        };

        let row = sqlx::query_as::<_, ContributionRow>(
            r#"
            UPDATE contributions
            SET amount = $2,
                message = CASE WHEN $3 THEN $4 ELSE message END,
                is_anonymous = COALESCE($5, is_anonymous),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, gift_id, contributor_id, amount, message, is_anonymous, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(patch.amount.unwrap_or(current_amount))
        .bind(set_message)
        .bind(message)
        .bind(patch.is_anonymous)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Contribution::try_from(row)
    }

    async fn delete(&self, id: Uuid) -> RepoResult<Option<Contribution>> {
        let row = sqlx::query_as::<_, ContributionRow>(
            r#"
            DELETE FROM contributions
            WHERE id = $1
            RETURNING id, gift_id, contributor_id, amount, message, is_anonymous, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Contribution::try_from).transpose()
    }
}
