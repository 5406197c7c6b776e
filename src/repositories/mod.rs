//! Row-store access.
//!
//! Each table has a repository trait. `Pg*Repository` types implement them
//! over sqlx/PostgreSQL; [`MemoryStore`] implements all of them behind one
//! mutex for tests and the `memory` store backend.

pub mod contribution_repository;
pub mod gift_repository;
pub mod memory;
pub mod message_repository;
pub mod suggestion_repository;
pub mod user_repository;
pub mod wishlist_repository;

use crate::error::RepositoryError;
use crate::models::{
    Contribution, ContributionDraft, ContributionMessage, ContributionPatch, Gift, NewGift,
    Suggestion, UpsertOutcome, User, Wishlist,
};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

pub use contribution_repository::PgContributionRepository;
pub use gift_repository::PgGiftRepository;
pub use memory::MemoryStore;
pub use message_repository::PgMessageRepository;
pub use suggestion_repository::PgSuggestionRepository;
pub use user_repository::PgUserRepository;
pub use wishlist_repository::PgWishlistRepository;

pub type RepoResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, email: &str, display_name: Option<&str>) -> RepoResult<User>;

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<User>>;

    async fn find_many(&self, ids: &[Uuid]) -> RepoResult<Vec<User>>;
}

#[async_trait]
pub trait WishlistRepository: Send + Sync {
    async fn create(&self, owner_id: Uuid, title: &str, is_public: bool) -> RepoResult<Wishlist>;

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Wishlist>>;

    /// Newest first
    async fn find_by_owner(&self, owner_id: Uuid) -> RepoResult<Vec<Wishlist>>;

    /// One-way switch to the managed mode; idempotent
    async fn set_managed(&self, id: Uuid) -> RepoResult<Wishlist>;
}

#[async_trait]
pub trait GiftRepository: Send + Sync {
    async fn create(&self, gift: NewGift) -> RepoResult<Gift>;

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Gift>>;

    /// Newest first
    async fn find_by_wishlist(&self, wishlist_id: Uuid) -> RepoResult<Vec<Gift>>;

    /// Flip `is_group_gift` and clear the reservation, only if not yet set.
    ///
    /// Returns the updated gift when this call performed the flip and `None`
    /// when the gift already was a group gift.
    async fn mark_group_gift(&self, id: Uuid) -> RepoResult<Option<Gift>>;

    /// Reserve for `user_id` if the gift is a free single-owner gift.
    /// `None` means the condition no longer held at write time.
    async fn reserve(&self, id: Uuid, user_id: Uuid) -> RepoResult<Option<Gift>>;

    /// Clear a reservation held by `user_id`. `None` if it was not theirs.
    async fn release(&self, id: Uuid, user_id: Uuid) -> RepoResult<Option<Gift>>;

    /// Deletes the gift; contributions, suggestions and messages cascade
    async fn delete(&self, id: Uuid) -> RepoResult<bool>;
}

#[async_trait]
pub trait ContributionRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Contribution>>;

    /// Oldest first
    async fn list_by_gift(&self, gift_id: Uuid) -> RepoResult<Vec<Contribution>>;

    /// Insert the pledge, or rewrite the contributor's existing row for the gift.
    ///
    /// The store re-checks the target against everyone else's pledges while
    /// holding the gift, so concurrent writers cannot jointly overflow it.
    /// Fails with `TargetExceeded` when they would.
    async fn upsert_checked(
        &self,
        draft: &ContributionDraft,
    ) -> RepoResult<(Contribution, UpsertOutcome)>;

    /// Apply a patch under the same locked target re-check, excluding the
    /// row's own prior amount.
    async fn update_checked(&self, id: Uuid, patch: &ContributionPatch) -> RepoResult<Contribution>;

    /// Returns the removed row, `None` if it was already gone
    async fn delete(&self, id: Uuid) -> RepoResult<Option<Contribution>>;
}

#[async_trait]
pub trait SuggestionRepository: Send + Sync {
    /// Fails with `Duplicate` on a second row for (gift, user) and with
    /// `Conflict` when the gift is already a group gift at write time.
    async fn insert(&self, gift_id: Uuid, user_id: Uuid) -> RepoResult<Suggestion>;

    async fn count_by_gift(&self, gift_id: Uuid) -> RepoResult<usize>;

    async fn exists(&self, gift_id: Uuid, user_id: Uuid) -> RepoResult<bool>;

    /// Oldest first
    async fn list_by_gift(&self, gift_id: Uuid) -> RepoResult<Vec<Suggestion>>;

    async fn delete(&self, gift_id: Uuid, user_id: Uuid) -> RepoResult<Option<Suggestion>>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, gift_id: Uuid, sender_id: Uuid, body: &str)
        -> RepoResult<ContributionMessage>;

    /// Oldest first
    async fn list_by_gift(&self, gift_id: Uuid) -> RepoResult<Vec<ContributionMessage>>;
}

/// Handles to every repository, shared by the services
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub wishlists: Arc<dyn WishlistRepository>,
    pub gifts: Arc<dyn GiftRepository>,
    pub contributions: Arc<dyn ContributionRepository>,
    pub suggestions: Arc<dyn SuggestionRepository>,
    pub messages: Arc<dyn MessageRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(PgUserRepository::new(pool.clone())),
            wishlists: Arc::new(PgWishlistRepository::new(pool.clone())),
            gifts: Arc::new(PgGiftRepository::new(pool.clone())),
            contributions: Arc::new(PgContributionRepository::new(pool.clone())),
            suggestions: Arc::new(PgSuggestionRepository::new(pool.clone())),
            messages: Arc::new(PgMessageRepository::new(pool)),
        }
    }

    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            wishlists: store.clone(),
            gifts: store.clone(),
            contributions: store.clone(),
            suggestions: store.clone(),
            messages: store,
        }
    }
}
