use super::{RepoResult, SuggestionRepository};
use crate::error::RepositoryError;
use crate::models::Suggestion;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Repository for group-gift suggestions
pub struct PgSuggestionRepository {
    pool: PgPool,
}

impl PgSuggestionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SuggestionRepository for PgSuggestionRepository {
    async fn insert(&self, gift_id: Uuid, user_id: Uuid) -> RepoResult<Suggestion> {
        let mut tx = self.pool.begin().await?;

        // Share lock: conversion's UPDATE waits for us and vice versa
        let is_group_gift: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT is_group_gift
            FROM gifts
            WHERE id = $1
            FOR SHARE
            "#,
        )
        .bind(gift_id)
        .fetch_optional(&mut *tx)
        .await?;

        match is_group_gift {
            None => return Err(RepositoryError::NotFound(format!("gift {}", gift_id))),
            Some(true) => {
                return Err(RepositoryError::Conflict(format!(
                    "gift {} is already a group gift",
                    gift_id
                )))
            }
            Some(false) => {}
        }

        let suggestion = sqlx::query_as::<_, Suggestion>(
            r#"
            INSERT INTO gift_suggestions (gift_id, user_id)
            VALUES ($1, $2)
            RETURNING id, gift_id, user_id, created_at
            "#,
        )
        .bind(gift_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(suggestion)
    }

    async fn count_by_gift(&self, gift_id: Uuid) -> RepoResult<usize> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM gift_suggestions
            WHERE gift_id = $1
            "#,
        )
        .bind(gift_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn exists(&self, gift_id: Uuid, user_id: Uuid) -> RepoResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM gift_suggestions WHERE gift_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(gift_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn list_by_gift(&self, gift_id: Uuid) -> RepoResult<Vec<Suggestion>> {
        let suggestions = sqlx::query_as::<_, Suggestion>(
            r#"
            SELECT id, gift_id, user_id, created_at
            FROM gift_suggestions
            WHERE gift_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(gift_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(suggestions)
    }

    async fn delete(&self, gift_id: Uuid, user_id: Uuid) -> RepoResult<Option<Suggestion>> {
        let suggestion = sqlx::query_as::<_, Suggestion>(
            r#"
            DELETE FROM gift_suggestions
            WHERE gift_id = $1 AND user_id = $2
            RETURNING id, gift_id, user_id, created_at
            "#,
        )
        .bind(gift_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(suggestion)
    }
}
