use super::{RepoResult, WishlistRepository};
use crate::error::RepositoryError;
use crate::models::{Wishlist, WishlistRow};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Repository for wishlist data access
pub struct PgWishlistRepository {
    pool: PgPool,
}

impl PgWishlistRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WishlistRepository for PgWishlistRepository {
    async fn create(&self, owner_id: Uuid, title: &str, is_public: bool) -> RepoResult<Wishlist> {
        let row = sqlx::query_as::<_, WishlistRow>(
            r#"
            INSERT INTO wishlists (owner_id, title, is_public)
            VALUES ($1, $2, $3)
            RETURNING id, owner_id, title, is_public, visibility_mode, created_at, updated_at
            "#,
        )
        .bind(owner_id)
        .bind(title)
        .bind(is_public)
        .fetch_one(&self.pool)
        .await?;

        Wishlist::try_from(row)
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Wishlist>> {
        let row = sqlx::query_as::<_, WishlistRow>(
            r#"
            SELECT id, owner_id, title, is_public, visibility_mode, created_at, updated_at
            FROM wishlists
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Wishlist::try_from).transpose()
    }

    async fn find_by_owner(&self, owner_id: Uuid) -> RepoResult<Vec<Wishlist>> {
        let rows = sqlx::query_as::<_, WishlistRow>(
            r#"
            SELECT id, owner_id, title, is_public, visibility_mode, created_at, updated_at
            FROM wishlists
            WHERE owner_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Wishlist::try_from).collect()
    }

    async fn set_managed(&self, id: Uuid) -> RepoResult<Wishlist> {
        // No-op rewrite when already managed keeps the call idempotent
        let row = sqlx::query_as::<_, WishlistRow>(
            r#"
            UPDATE wishlists
            SET visibility_mode = 'managed',
                updated_at = CASE WHEN visibility_mode = 'managed' THEN updated_at ELSE NOW() END
            WHERE id = $1
            RETURNING id, owner_id, title, is_public, visibility_mode, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("wishlist {}", id)))?;

        Wishlist::try_from(row)
    }
}
