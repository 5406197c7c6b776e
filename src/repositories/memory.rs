//! In-memory row store.
//!
//! All tables sit behind one mutex, so every check-then-write below is
//! atomic with respect to other writers, matching the row locks the
//! Postgres repositories take.

use super::{
    ContributionRepository, GiftRepository, MessageRepository, RepoResult, SuggestionRepository,
    UserRepository, WishlistRepository,
};
use crate::error::RepositoryError;
use crate::models::contribution::{remaining, total_excluding};
use crate::models::{
    Contribution, ContributionDraft, ContributionMessage, ContributionPatch, Gift, NewGift,
    Suggestion, UpsertOutcome, User, Wishlist,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    wishlists: HashMap<Uuid, Wishlist>,
    gifts: HashMap<Uuid, Gift>,
    contributions: Vec<Contribution>,
    suggestions: Vec<Suggestion>,
    messages: Vec<ContributionMessage>,
}

impl Tables {
    fn gift(&self, id: Uuid) -> RepoResult<&Gift> {
        self.gifts
            .get(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("gift {}", id)))
    }

    fn gift_mut(&mut self, id: Uuid) -> RepoResult<&mut Gift> {
        self.gifts
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("gift {}", id)))
    }

    /// Target of a group gift, or why pledges are not possible
    fn funding_target(&self, gift_id: Uuid) -> RepoResult<Decimal> {
        let gift = self.gift(gift_id)?;
        if !gift.is_group_gift {
            return Err(RepositoryError::Conflict(format!(
                "gift {} is not a group gift",
                gift_id
            )));
        }
        gift.target_price.ok_or_else(|| {
            RepositoryError::Conflict(format!("gift {} has no target price", gift_id))
        })
    }

    fn pledges_for(&self, gift_id: Uuid) -> Vec<Contribution> {
        self.contributions
            .iter()
            .filter(|c| c.gift_id == gift_id)
            .cloned()
            .collect()
    }
}

fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// Row store kept in process memory
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `Unavailable` until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> RepoResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "in-memory store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, email: &str, display_name: Option<&str>) -> RepoResult<User> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;

        if tables.users.values().any(|u| u.email == email) {
            return Err(RepositoryError::Duplicate(format!("user {}", email)));
        }

        let user = User::new(email.to_string(), display_name.map(str::to_string));
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<User>> {
        self.check_available()?;
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_many(&self, ids: &[Uuid]) -> RepoResult<Vec<User>> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(ids.iter().filter_map(|id| tables.users.get(id).cloned()).collect())
    }
}

#[async_trait]
impl WishlistRepository for MemoryStore {
    async fn create(&self, owner_id: Uuid, title: &str, is_public: bool) -> RepoResult<Wishlist> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;

        if !tables.users.contains_key(&owner_id) {
            return Err(RepositoryError::ConstraintViolation(format!(
                "owner {} does not exist",
                owner_id
            )));
        }

        let wishlist = Wishlist::new(owner_id, title.to_string(), is_public);
        tables.wishlists.insert(wishlist.id, wishlist.clone());
        Ok(wishlist)
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Wishlist>> {
        self.check_available()?;
        Ok(self.tables.lock().await.wishlists.get(&id).cloned())
    }

    async fn find_by_owner(&self, owner_id: Uuid) -> RepoResult<Vec<Wishlist>> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        let mut wishlists: Vec<Wishlist> = tables
            .wishlists
            .values()
            .filter(|w| w.owner_id == owner_id)
            .cloned()
            .collect();
        wishlists.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(wishlists)
    }

    async fn set_managed(&self, id: Uuid) -> RepoResult<Wishlist> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let wishlist = tables
            .wishlists
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("wishlist {}", id)))?;

        if !wishlist.mode.is_managed() {
            wishlist.mode = wishlist.mode.into_managed();
            wishlist.updated_at = now();
        }
        Ok(wishlist.clone())
    }
}

#[async_trait]
impl GiftRepository for MemoryStore {
    async fn create(&self, gift: NewGift) -> RepoResult<Gift> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;

        if !tables.wishlists.contains_key(&gift.wishlist_id) {
            return Err(RepositoryError::ConstraintViolation(format!(
                "wishlist {} does not exist",
                gift.wishlist_id
            )));
        }
        if matches!(gift.target_price, Some(price) if price <= Decimal::ZERO) {
            return Err(RepositoryError::ConstraintViolation(
                "target price must be positive".to_string(),
            ));
        }

        let gift = Gift::from_new(gift);
        tables.gifts.insert(gift.id, gift.clone());
        Ok(gift)
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Gift>> {
        self.check_available()?;
        Ok(self.tables.lock().await.gifts.get(&id).cloned())
    }

    async fn find_by_wishlist(&self, wishlist_id: Uuid) -> RepoResult<Vec<Gift>> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        let mut gifts: Vec<Gift> = tables
            .gifts
            .values()
            .filter(|g| g.wishlist_id == wishlist_id)
            .cloned()
            .collect();
        gifts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(gifts)
    }

    async fn mark_group_gift(&self, id: Uuid) -> RepoResult<Option<Gift>> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let gift = tables.gift_mut(id)?;

        if gift.is_group_gift {
            return Ok(None);
        }

        gift.is_group_gift = true;
        gift.reserved_by = None;
        gift.reserved_at = None;
        gift.updated_at = now();
        Ok(Some(gift.clone()))
    }

    async fn reserve(&self, id: Uuid, user_id: Uuid) -> RepoResult<Option<Gift>> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let gift = tables.gift_mut(id)?;

        if gift.is_group_gift || gift.reserved_by.is_some() {
            return Ok(None);
        }

        let at = now();
        gift.reserved_by = Some(user_id);
        gift.reserved_at = Some(at);
        gift.updated_at = at;
        Ok(Some(gift.clone()))
    }

    async fn release(&self, id: Uuid, user_id: Uuid) -> RepoResult<Option<Gift>> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let gift = tables.gift_mut(id)?;

        if gift.reserved_by != Some(user_id) {
            return Ok(None);
        }

        gift.reserved_by = None;
        gift.reserved_at = None;
        gift.updated_at = now();
        Ok(Some(gift.clone()))
    }

    async fn delete(&self, id: Uuid) -> RepoResult<bool> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;

        if tables.gifts.remove(&id).is_none() {
            return Ok(false);
        }

        // ON DELETE CASCADE
        tables.contributions.retain(|c| c.gift_id != id);
        tables.suggestions.retain(|s| s.gift_id != id);
        tables.messages.retain(|m| m.gift_id != id);
        Ok(true)
    }
}

#[async_trait]
impl ContributionRepository for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Contribution>> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables.contributions.iter().find(|c| c.id == id).cloned())
    }

    async fn list_by_gift(&self, gift_id: Uuid) -> RepoResult<Vec<Contribution>> {
        self.check_available()?;
        Ok(self.tables.lock().await.pledges_for(gift_id))
    }

    async fn upsert_checked(
        &self,
        draft: &ContributionDraft,
    ) -> RepoResult<(Contribution, UpsertOutcome)> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;

        let target = tables.funding_target(draft.gift_id)?;
        let others = total_excluding(&tables.pledges_for(draft.gift_id), draft.contributor_id);
        if others + draft.amount > target {
            return Err(RepositoryError::TargetExceeded {
                remaining: remaining(target, others),
            });
        }

        let at = now();
        if let Some(existing) = tables
            .contributions
            .iter_mut()
            .find(|c| c.gift_id == draft.gift_id && c.contributor_id == draft.contributor_id)
        {
            existing.amount = draft.amount;
            existing.message = draft.message.clone();
            existing.is_anonymous = draft.is_anonymous;
            existing.updated_at = at;
            return Ok((existing.clone(), UpsertOutcome::Updated));
        }

        let contribution = Contribution {
            id: Uuid::new_v4(),
            gift_id: draft.gift_id,
            contributor_id: draft.contributor_id,
            amount: draft.amount,
            message: draft.message.clone(),
            is_anonymous: draft.is_anonymous,
            created_at: at,
            updated_at: at,
        };
        tables.contributions.push(contribution.clone());
        Ok((contribution, UpsertOutcome::Inserted))
    }

    async fn update_checked(&self, id: Uuid, patch: &ContributionPatch) -> RepoResult<Contribution> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;

        let current = tables
            .contributions
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("contribution {}", id)))?;

        if let Some(amount) = patch.amount {
            let target = tables.funding_target(current.gift_id)?;
            let others = total_excluding(&tables.pledges_for(current.gift_id), current.contributor_id);
            if others + amount > target {
                return Err(RepositoryError::TargetExceeded {
                    remaining: remaining(target, others),
                });
            }
        }

        let row = tables
            .contributions
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("contribution {}", id)))?;
        patch.apply(row);
        row.updated_at = now();
        Ok(row.clone())
    }

    async fn delete(&self, id: Uuid) -> RepoResult<Option<Contribution>> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let position = tables.contributions.iter().position(|c| c.id == id);
        Ok(position.map(|index| tables.contributions.remove(index)))
    }
}

#[async_trait]
impl SuggestionRepository for MemoryStore {
    async fn insert(&self, gift_id: Uuid, user_id: Uuid) -> RepoResult<Suggestion> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;

        if tables.gift(gift_id)?.is_group_gift {
            return Err(RepositoryError::Conflict(format!(
                "gift {} is already a group gift",
                gift_id
            )));
        }
        if tables
            .suggestions
            .iter()
            .any(|s| s.gift_id == gift_id && s.user_id == user_id)
        {
            return Err(RepositoryError::Duplicate(format!(
                "suggestion for gift {} by user {}",
                gift_id, user_id
            )));
        }

        let suggestion = Suggestion::new(gift_id, user_id);
        tables.suggestions.push(suggestion.clone());
        Ok(suggestion)
    }

    async fn count_by_gift(&self, gift_id: Uuid) -> RepoResult<usize> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables.suggestions.iter().filter(|s| s.gift_id == gift_id).count())
    }

    async fn exists(&self, gift_id: Uuid, user_id: Uuid) -> RepoResult<bool> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .suggestions
            .iter()
            .any(|s| s.gift_id == gift_id && s.user_id == user_id))
    }

    async fn list_by_gift(&self, gift_id: Uuid) -> RepoResult<Vec<Suggestion>> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .suggestions
            .iter()
            .filter(|s| s.gift_id == gift_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, gift_id: Uuid, user_id: Uuid) -> RepoResult<Option<Suggestion>> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let position = tables
            .suggestions
            .iter()
            .position(|s| s.gift_id == gift_id && s.user_id == user_id);
        Ok(position.map(|index| tables.suggestions.remove(index)))
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn append(
        &self,
        gift_id: Uuid,
        sender_id: Uuid,
        body: &str,
    ) -> RepoResult<ContributionMessage> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        tables.gift(gift_id)?;

        let message = ContributionMessage::new(gift_id, sender_id, body.to_string());
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn list_by_gift(&self, gift_id: Uuid) -> RepoResult<Vec<ContributionMessage>> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.gift_id == gift_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn group_gift(store: &MemoryStore, target: i64) -> Gift {
        let owner = UserRepository::create(store, "owner@example.cz", None).await.unwrap();
        let wishlist = WishlistRepository::create(store, owner.id, "Wedding", true)
            .await
            .unwrap();
        let gift = GiftRepository::create(
            store,
            NewGift::new(wishlist.id, "Sofa").priced(Decimal::new(target, 0), "CZK"),
        )
        .await
        .unwrap();
        store.mark_group_gift(gift.id).await.unwrap().unwrap()
    }

    fn draft(gift_id: Uuid, contributor_id: Uuid, amount: i64) -> ContributionDraft {
        ContributionDraft {
            gift_id,
            contributor_id,
            amount: Decimal::new(amount, 0),
            message: None,
            is_anonymous: false,
        }
    }

    #[tokio::test]
    async fn test_recheck_rejects_stale_writer() {
        let store = MemoryStore::new();
        let gift = group_gift(&store, 1000).await;

        // Both writers validated against an empty ledger before either wrote
        store.upsert_checked(&draft(gift.id, Uuid::new_v4(), 700)).await.unwrap();
        let err = store
            .upsert_checked(&draft(gift.id, Uuid::new_v4(), 700))
            .await
            .unwrap_err();

        match err {
            RepositoryError::TargetExceeded { remaining } => {
                assert_eq!(remaining, Decimal::new(300, 0))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_second_pledge_rewrites_row() {
        let store = MemoryStore::new();
        let gift = group_gift(&store, 1000).await;
        let contributor = Uuid::new_v4();

        let (_, first) = store.upsert_checked(&draft(gift.id, contributor, 200)).await.unwrap();
        let (row, second) = store.upsert_checked(&draft(gift.id, contributor, 900)).await.unwrap();

        assert_eq!(first, UpsertOutcome::Inserted);
        assert_eq!(second, UpsertOutcome::Updated);
        assert_eq!(row.amount, Decimal::new(900, 0));
        assert_eq!(ContributionRepository::list_by_gift(&store, gift.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_group_gift_flips_once() {
        let store = MemoryStore::new();
        let gift = group_gift(&store, 500).await;
        assert!(gift.is_group_gift);
        assert!(store.mark_group_gift(gift.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_gift_cascades() {
        let store = MemoryStore::new();
        let gift = group_gift(&store, 500).await;
        store.upsert_checked(&draft(gift.id, Uuid::new_v4(), 100)).await.unwrap();
        store.append(gift.id, Uuid::new_v4(), "hi").await.unwrap();

        assert!(GiftRepository::delete(&store, gift.id).await.unwrap());
        assert!(ContributionRepository::list_by_gift(&store, gift.id).await.unwrap().is_empty());
        assert!(MessageRepository::list_by_gift(&store, gift.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_store_reports_unavailable() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = UserRepository::find_by_id(&store, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Unavailable(_)));
    }
}
