use super::{GiftRepository, RepoResult};
use crate::error::RepositoryError;
use crate::models::{Gift, GiftRow, NewGift};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Repository for gift data access
pub struct PgGiftRepository {
    pool: PgPool,
}

impl PgGiftRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn require_exists(&self, id: Uuid) -> RepoResult<()> {
        match self.find_by_id(id).await? {
            Some(_) => Ok(()),
            None => Err(RepositoryError::NotFound(format!("gift {}", id))),
        }
    }
}

#[async_trait]
impl GiftRepository for PgGiftRepository {
    async fn create(&self, gift: NewGift) -> RepoResult<Gift> {
        let row = sqlx::query_as::<_, GiftRow>(
            r#"
            INSERT INTO gifts (wishlist_id, title, description, product_url, target_price, currency, priority)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, wishlist_id, title, description, product_url, target_price, currency,
                      priority, is_group_gift, reserved_by, reserved_at, created_at, updated_at
            "#,
        )
        .bind(gift.wishlist_id)
        .bind(&gift.title)
        .bind(&gift.description)
        .bind(&gift.product_url)
        .bind(gift.target_price)
        .bind(&gift.currency)
        .bind(gift.priority.as_str())
        .fetch_one(&self.pool)
        .await?;

        Gift::try_from(row)
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Gift>> {
        let row = sqlx::query_as::<_, GiftRow>(
            r#"
            SELECT id, wishlist_id, title, description, product_url, target_price, currency,
                   priority, is_group_gift, reserved_by, reserved_at, created_at, updated_at
            FROM gifts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Gift::try_from).transpose()
    }

    async fn find_by_wishlist(&self, wishlist_id: Uuid) -> RepoResult<Vec<Gift>> {
        let rows = sqlx::query_as::<_, GiftRow>(
            r#"
            SELECT id, wishlist_id, title, description, product_url, target_price, currency,
                   priority, is_group_gift, reserved_by, reserved_at, created_at, updated_at
            FROM gifts
            WHERE wishlist_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(wishlist_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Gift::try_from).collect()
    }

    async fn mark_group_gift(&self, id: Uuid) -> RepoResult<Option<Gift>> {
        // The conditional update is the single point where the flag flips
        let row = sqlx::query_as::<_, GiftRow>(
            r#"
            UPDATE gifts
            SET is_group_gift = TRUE, reserved_by = NULL, reserved_at = NULL, updated_at = NOW()
            WHERE id = $1 AND is_group_gift = FALSE
            RETURNING id, wishlist_id, title, description, product_url, target_price, currency,
                      priority, is_group_gift, reserved_by, reserved_at, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Gift::try_from(row)?)),
            None => {
                self.require_exists(id).await?;
                Ok(None)
            }
        }
    }

    async fn reserve(&self, id: Uuid, user_id: Uuid) -> RepoResult<Option<Gift>> {
        let row = sqlx::query_as::<_, GiftRow>(
            r#"
            UPDATE gifts
            SET reserved_by = $2, reserved_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND is_group_gift = FALSE AND reserved_by IS NULL
            RETURNING id, wishlist_id, title, description, product_url, target_price, currency,
                      priority, is_group_gift, reserved_by, reserved_at, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Gift::try_from(row)?)),
            None => {
                self.require_exists(id).await?;
                Ok(None)
            }
        }
    }

    async fn release(&self, id: Uuid, user_id: Uuid) -> RepoResult<Option<Gift>> {
        let row = sqlx::query_as::<_, GiftRow>(
            r#"
            UPDATE gifts
            SET reserved_by = NULL, reserved_at = NULL, updated_at = NOW()
            WHERE id = $1 AND reserved_by = $2
            RETURNING id, wishlist_id, title, description, product_url, target_price, currency,
                      priority, is_group_gift, reserved_by, reserved_at, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Gift::try_from(row)?)),
            None => {
                self.require_exists(id).await?;
                Ok(None)
            }
        }
    }

    async fn delete(&self, id: Uuid) -> RepoResult<bool> {
        let rows_affected = sqlx::query(
            r#"
            DELETE FROM gifts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected > 0)
    }
}
