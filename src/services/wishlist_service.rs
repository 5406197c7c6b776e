use crate::auth::Caller;
use crate::error::{AppError, AppResult};
use crate::models::{Gift, GroupGiftSummary, Wishlist};
use crate::realtime::{ChangeFeed, ChangeKind, ChangeRow, ChannelKey};
use crate::repositories::Repositories;
use crate::services::visibility::{can_view_wishlist, project_gift, GiftView, ViewerRole};
use crate::services::{load_gift, load_gift_with_wishlist};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Wishlist listings, single-owner reservations and the list mode
pub struct WishlistService {
    repos: Repositories,
    feed: Arc<ChangeFeed>,
}

impl WishlistService {
    pub fn new(repos: Repositories, feed: Arc<ChangeFeed>) -> Self {
        Self { repos, feed }
    }

    async fn load_wishlist(&self, wishlist_id: Uuid) -> AppResult<Wishlist> {
        self.repos
            .wishlists
            .find_by_id(wishlist_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Wishlist not found".into()))
    }

    /// Gifts of a wishlist, newest first, redacted for the caller
    pub async fn view_gifts(&self, caller: &Caller, wishlist_id: Uuid) -> AppResult<Vec<GiftView>> {
        let wishlist = self.load_wishlist(wishlist_id).await?;
        let role = ViewerRole::for_wishlist(caller, &wishlist);

        if !can_view_wishlist(role, &wishlist) {
            return Err(AppError::NotPublic);
        }

        let gifts = self.repos.gifts.find_by_wishlist(wishlist_id).await?;
        let mut views = Vec::with_capacity(gifts.len());

        for gift in &gifts {
            let summary = if gift.is_group_gift {
                let contributions = self.repos.contributions.list_by_gift(gift.id).await?;
                Some(GroupGiftSummary::compute(
                    gift.id,
                    gift.target_price,
                    &gift.currency,
                    &contributions,
                ))
            } else {
                None
            };
            views.push(project_gift(role, &wishlist, gift, summary.as_ref()));
        }

        Ok(views)
    }

    /// Reserve an ordinary gift for the caller. Reserving a gift the caller
    /// already holds returns it unchanged.
    pub async fn reserve_gift(&self, caller: &Caller, gift_id: Uuid) -> AppResult<Gift> {
        let user = caller.require_user()?;
        let (gift, wishlist) = load_gift_with_wishlist(&self.repos, gift_id).await?;

        if !wishlist.is_public && !wishlist.is_owned_by(user.id) {
            return Err(AppError::NotPublic);
        }
        if gift.is_group_gift {
            return Err(AppError::AlreadyGroupGift);
        }
        if wishlist.is_owned_by(user.id) {
            return Err(AppError::OwnGift);
        }
        match gift.reserved_by {
            Some(holder) if holder == user.id => return Ok(gift),
            Some(_) => return Err(AppError::AlreadyReserved),
            None => {}
        }

        let Some(reserved) = self.repos.gifts.reserve(gift_id, user.id).await? else {
            // Lost a race: converted or reserved by someone else meanwhile
            let current = load_gift(&self.repos, gift_id).await?;
            return Err(if current.is_group_gift {
                AppError::AlreadyGroupGift
            } else {
                AppError::AlreadyReserved
            });
        };

        info!("Gift reserved: gift={}, user={}", gift_id, user.id);
        self.publish_gift(&reserved).await;

        Ok(reserved)
    }

    /// Release the caller's reservation; a no-op when the gift is free
    pub async fn release_reservation(&self, caller: &Caller, gift_id: Uuid) -> AppResult<Gift> {
        let user = caller.require_user()?;
        let gift = load_gift(&self.repos, gift_id).await?;

        match gift.reserved_by {
            None => return Ok(gift),
            Some(holder) if holder != user.id => {
                return Err(AppError::Forbidden(
                    "Only the person who reserved a gift can release it".into(),
                ))
            }
            Some(_) => {}
        }

        let Some(released) = self.repos.gifts.release(gift_id, user.id).await? else {
            return load_gift(&self.repos, gift_id).await;
        };

        info!("Reservation released: gift={}, user={}", gift_id, user.id);
        self.publish_gift(&released).await;

        Ok(released)
    }

    /// Switch the caller's list to managed mode, which reveals reservers to
    /// the owner. There is no way back.
    pub async fn convert_to_managed(&self, caller: &Caller, wishlist_id: Uuid) -> AppResult<Wishlist> {
        let user = caller.require_user()?;
        let wishlist = self.load_wishlist(wishlist_id).await?;

        if !wishlist.is_owned_by(user.id) {
            return Err(AppError::Forbidden(
                "Only the owner can change how a wishlist is managed".into(),
            ));
        }
        if wishlist.mode.is_managed() {
            return Ok(wishlist);
        }

        let updated = self.repos.wishlists.set_managed(wishlist_id).await?;

        info!("Wishlist {} switched to managed mode", wishlist_id);

        self.feed
            .publish_change(
                ChannelKey::UserWishlists(updated.owner_id),
                ChangeKind::Update,
                ChangeRow::Wishlist(updated.clone()),
            )
            .await;

        Ok(updated)
    }

    /// Newest first
    pub async fn list_own_wishlists(&self, caller: &Caller) -> AppResult<Vec<Wishlist>> {
        let user = caller.require_user()?;
        Ok(self.repos.wishlists.find_by_owner(user.id).await?)
    }

    async fn publish_gift(&self, gift: &Gift) {
        self.feed
            .publish_change(
                ChannelKey::WishlistGifts(gift.wishlist_id),
                ChangeKind::Update,
                ChangeRow::Gift(gift.clone()),
            )
            .await;
    }
}
