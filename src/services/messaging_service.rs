use crate::auth::Caller;
use crate::error::{AppError, AppResult};
use crate::models::{ContributionMessage, Gift, Wishlist};
use crate::realtime::{ChangeFeed, ChangeKind, ChangeRow, ChannelKey};
use crate::repositories::Repositories;
use crate::services::load_gift_with_wishlist;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Coordination thread among the contributors of one group gift
pub struct MessagingService {
    repos: Repositories,
    feed: Arc<ChangeFeed>,
}

/// Contributors of the gift and the wishlist owner may read and post
pub async fn can_use_messages(
    repos: &Repositories,
    user_id: Uuid,
    gift: &Gift,
    wishlist: &Wishlist,
) -> AppResult<bool> {
    if wishlist.is_owned_by(user_id) {
        return Ok(true);
    }

    let contributions = repos.contributions.list_by_gift(gift.id).await?;
    Ok(contributions.iter().any(|c| c.contributor_id == user_id))
}

impl MessagingService {
    pub fn new(repos: Repositories, feed: Arc<ChangeFeed>) -> Self {
        Self { repos, feed }
    }

    /// Oldest first
    pub async fn list_messages(
        &self,
        caller: &Caller,
        gift_id: Uuid,
    ) -> AppResult<Vec<ContributionMessage>> {
        let user = caller.require_user()?;
        let (gift, wishlist) = load_gift_with_wishlist(&self.repos, gift_id).await?;

        if !can_use_messages(&self.repos, user.id, &gift, &wishlist).await? {
            return Err(AppError::NotContributor);
        }

        Ok(self.repos.messages.list_by_gift(gift_id).await?)
    }

    pub async fn post_message(
        &self,
        caller: &Caller,
        gift_id: Uuid,
        body: &str,
    ) -> AppResult<ContributionMessage> {
        let user = caller.require_user()?;

        let body = body.trim();
        if body.is_empty() {
            return Err(AppError::EmptyMessage);
        }

        let (gift, wishlist) = load_gift_with_wishlist(&self.repos, gift_id).await?;

        if !can_use_messages(&self.repos, user.id, &gift, &wishlist).await? {
            return Err(AppError::NotContributor);
        }

        let message = self.repos.messages.append(gift_id, user.id, body).await?;

        info!("Message posted: gift={}, sender={}", gift_id, user.id);

        self.feed
            .publish_change(
                ChannelKey::GiftMessages(gift_id),
                ChangeKind::Insert,
                ChangeRow::Message(message.clone()),
            )
            .await;

        Ok(message)
    }
}
